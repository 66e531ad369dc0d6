//! Short-circuit boolean and ternary lowering (spec.md §4.5.1).
//!
//! `&&`/`||` and `?:` need a join point the plain precedence-climbing
//! evaluator can't express with a single register result, so they get
//! their own lowering routines, called out from the operator dispatch
//! table rather than folded into the general expression evaluator.

use crate::ir::entities::RegisterId;
use crate::ir::function::Function;
use crate::ir::instruction::{Opcode, RegOperands};
use crate::regalloc::{flush_and_discard_all, FlushAllMode, FlushFn};
use crate::result::{CodegenResult, SourcePosition};

/// Which short-circuit operator is being lowered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShortCircuitOp {
    And,
    Or,
}

/// Lower `a && b` or `a || b` (spec.md §4.5.1): evaluate `a`, normalize it
/// to 0/1 with `snz`, branch past `b` if short-circuiting, otherwise flush
/// without discarding (the branch might not be taken) and evaluate `b`
/// into the same result register, joining at a shared label.
///
/// `eval_a` produces the register holding `a`'s value. `eval_b` receives
/// that same register (already holding `a`'s boolean result) and is
/// responsible for reducing it to the final 0/1 result in place.
pub fn lower_short_circuit<FA, FB>(
    function: &mut Function,
    op: ShortCircuitOp,
    result_size: u32,
    pos: SourcePosition,
    eval_a: FA,
    eval_b: FB,
    flush: &mut FlushFn,
) -> CodegenResult<RegisterId>
where
    FA: FnOnce(&mut Function, &mut FlushFn) -> CodegenResult<RegisterId>,
    FB: FnOnce(&mut Function, RegisterId, &mut FlushFn) -> CodegenResult<()>,
{
    let result = eval_a(function, flush)?;
    function.emit(Opcode::SetNonZero, RegOperands::one(result), result_size as u8, None);

    let join = function.declare_label("shortcircuit_join");
    let branch_if = match op {
        ShortCircuitOp::And => Opcode::JumpIfZero,
        ShortCircuitOp::Or => Opcode::JumpIfNotZero,
    };
    let imm = function.reference_label(join, pos);
    function.emit(branch_if, RegOperands::one(result), 0, Some(imm));

    // The branch above might not be taken, so nothing can be discarded
    // yet -- only flushed, per spec.md §4.2 `FlushOnly`.
    flush_and_discard_all(function.ring_mut(), FlushAllMode::FlushOnly, flush)?;

    eval_b(function, result, flush)?;
    function.emit(Opcode::SetNonZero, RegOperands::one(result), result_size as u8, None);

    function.plant_label(join)?;
    Ok(result)
}

/// Lower `cond ? then_branch : else_branch` (spec.md §4.5.1): evaluate
/// `cond`, branch to the false arm, evaluate the true arm into a shared
/// tempvar register, jump to the join label, evaluate the false arm into
/// the same register, and plant the join label. Both arms receive the
/// same destination register so they can copy their value into it.
pub fn lower_ternary<FC, FT, FE>(
    function: &mut Function,
    pos: SourcePosition,
    eval_cond: FC,
    eval_then: FT,
    eval_else: FE,
    flush: &mut FlushFn,
) -> CodegenResult<RegisterId>
where
    FC: FnOnce(&mut Function, &mut FlushFn) -> CodegenResult<RegisterId>,
    FT: FnOnce(&mut Function, &mut FlushFn) -> CodegenResult<RegisterId>,
    FE: FnOnce(&mut Function, RegisterId, &mut FlushFn) -> CodegenResult<()>,
{
    let cond = eval_cond(function, flush)?;

    let false_label = function.declare_label("ternary_false");
    let join_label = function.declare_label("ternary_join");
    let imm = function.reference_label(false_label, pos);
    function.emit(Opcode::JumpIfZero, RegOperands::one(cond), 0, Some(imm));

    flush_and_discard_all(function.ring_mut(), FlushAllMode::FlushOnly, flush)?;
    let result = eval_then(function, flush)?;
    let join_imm = function.reference_label(join_label, pos);
    function.emit(Opcode::Jump, RegOperands::none(), 0, Some(join_imm));

    function.plant_label(false_label)?;
    flush_and_discard_all(function.ring_mut(), FlushAllMode::FlushOnly, flush)?;
    eval_else(function, result, flush)?;

    function.plant_label(join_label)?;
    Ok(result)
}
