//! Expression Evaluator (spec.md §2 component 5, §4.5): precedence
//! climbing over postfix chains, short-circuit boolean operators and
//! ternaries, casts, and call dispatch. Everything here bottoms out in
//! `memory::get_reg_for_var` for the actual register traffic.

use std::collections::HashMap;

use corec_entity::PrimaryMap;
use smallvec::SmallVec;

use crate::call::{emit_call, CallArgument, CallKind, CallPlan};
use crate::config::Config;
use crate::eval::dispatch::{self, CallTarget, CallTargetKind};
use crate::external::{Lexer, SymbolKind, SymbolTable};
use crate::interner::Interner;
use crate::ir::entities::{FunctionId, RegisterId};
use crate::ir::function::Function;
use crate::ir::immediate::ImmediateDescriptor;
use crate::ir::instruction::{Opcode, RegOperands};
use crate::memory::{GetRegForVar, Purpose};
use crate::regalloc::{flush_and_discard_all, FlushAllMode, FlushFn};
use crate::result::{CodegenError, CodegenResult, SourcePosition};
use crate::ty::TypeTable;
use crate::variable::{Variable, VariableId, VariableKind, VariableStore};

/// Everything the evaluator threads through its recursive-descent chain,
/// bundled so free functions take one context parameter instead of a long
/// argument list (spec.md Design Notes "deep parameter threading ->
/// context struct").
pub struct EvalCtx<'x, S> {
    pub functions: &'x PrimaryMap<FunctionId, Function>,
    pub current: FunctionId,
    pub variables: &'x mut VariableStore,
    pub interner: &'x mut Interner,
    pub cfg: &'x Config,
    pub symbols: &'x S,
    pub lexer: &'x mut dyn Lexer,
    /// Maps a resolved call target's opaque external id to the `FunctionId`
    /// that's actually callable in this compilation unit.
    pub external_functions: &'x HashMap<u32, FunctionId>,
    pub scope: u32,
    postfix_queue: Vec<DeferredIncDec>,
}

impl<'x, S> EvalCtx<'x, S> {
    /// Build a context with an empty deferred-postfix queue. The queue
    /// itself is private: it's drained once by `eval_expression` and has no
    /// meaning to a caller constructing a fresh context (e.g. the assembly
    /// parser evaluating one operand expression, spec.md §4.7).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        functions: &'x PrimaryMap<FunctionId, Function>,
        current: FunctionId,
        variables: &'x mut VariableStore,
        interner: &'x mut Interner,
        cfg: &'x Config,
        symbols: &'x S,
        lexer: &'x mut dyn Lexer,
        external_functions: &'x HashMap<u32, FunctionId>,
        scope: u32,
    ) -> Self {
        Self {
            functions,
            current,
            variables,
            interner,
            cfg,
            symbols,
            lexer,
            external_functions,
            scope,
            postfix_queue: Vec::new(),
        }
    }
}

/// A postfix `++`/`--` whose increment is deferred to the end of the
/// enclosing full expression (spec.md §4.5 "postfix increment/decrement is
/// applied after the full expression has been evaluated").
#[derive(Clone, Copy, Debug)]
struct DeferredIncDec {
    var: VariableId,
    increment: bool,
}

const LEVELS: &[&[&str]] = &[
    &["|"],
    &["^"],
    &["&"],
    &["==", "!="],
    &["<", "<=", ">", ">="],
    &["<<", ">>"],
    &["+", "-"],
    &["*", "/"],
];

const NATIVE_BINARY_OPS: &[(&str, Opcode)] = &[
    ("|", Opcode::Or),
    ("^", Opcode::Xor),
    ("&", Opcode::And),
    ("<<", Opcode::Shl),
    (">>", Opcode::Shr),
    ("+", Opcode::Add),
    ("-", Opcode::Sub),
    ("*", Opcode::Mul),
    ("/", Opcode::Div),
];

const PREFIX_OPS: &[&str] = &["-", "~", "!"];
const PREFIX_OPCODES: &[Opcode] = &[Opcode::Neg, Opcode::Not, Opcode::SetZero];

/// The public entry point: evaluate one full expression, then apply every
/// postfix increment/decrement deferred during it, in the order they were
/// parsed (spec.md §4.5, §8 scenario S2).
pub fn eval_expression<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    ctx.postfix_queue.clear();
    let result = eval_ternary(ctx, function, pos, flush)?;
    drain_postfix_queue(ctx, function, pos, flush)?;
    Ok(result)
}

fn drain_postfix_queue<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let queue = std::mem::take(&mut ctx.postfix_queue);
    for deferred in queue {
        let size = ctx.variables.get(deferred.var).size;
        let reg = get_reg_for_var(ctx, function, deferred.var, Purpose::ForInput, pos, flush)?;
        let delta: i64 = if deferred.increment { 1 } else { -1 };
        function.emit(
            Opcode::AddImmediate,
            RegOperands::two(reg, reg),
            size as u8,
            Some(ImmediateDescriptor::literal(delta)),
        );
        function.ring_mut().get_mut(reg).dirty = true;
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Ternary / short-circuit boolean operators
// ---------------------------------------------------------------------

fn eval_ternary<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    eval_ternary_from(ctx, function, None, pos, flush)
}

fn eval_ternary_from<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    seed: Option<VariableId>,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    let cond = match seed {
        Some(v) => v,
        None => eval_or(ctx, function, pos, flush)?,
    };
    if ctx.lexer.read_operator(&["?"]).is_none() {
        return Ok(cond);
    }

    let cond_size = ctx.variables.get(cond).size;
    let cond_reg = get_reg_for_var(ctx, function, cond, Purpose::ForInput, pos, flush)?;
    function.emit(Opcode::SetNonZero, RegOperands::one(cond_reg), cond_size.min(ctx.cfg.sizeofgpr as u32) as u8, None);

    // Elvis form `cond ?: else` -- the then-value is `cond` itself.
    if ctx.lexer.read_operator(&[":"]).is_some() {
        let false_label = function.declare_label("elvis_false");
        let join = function.declare_label("elvis_join");
        let imm = function.reference_label(false_label, pos);
        function.emit(Opcode::JumpIfZero, RegOperands::one(cond_reg), 0, Some(imm));
        let jimm = function.reference_label(join, pos);
        function.emit(Opcode::Jump, RegOperands::none(), 0, Some(jimm));
        flush_and_discard_all(function.ring_mut(), FlushAllMode::FlushOnly, flush)?;
        function.plant_label(false_label)?;
        let else_val = eval_ternary(ctx, function, pos, flush)?;
        let else_reg = get_reg_for_var(ctx, function, else_val, Purpose::ForInput, pos, flush)?;
        if else_reg != cond_reg {
            function.emit(Opcode::Copy, RegOperands::two(cond_reg, else_reg), ctx.cfg.sizeofgpr, None);
        }
        function.plant_label(join)?;
        return claim_register_as_tempvar(ctx, function, cond_reg, ctx.cfg.sizeofgpr as u32, pos);
    }

    let false_label = function.declare_label("ternary_false");
    let join = function.declare_label("ternary_join");
    let imm = function.reference_label(false_label, pos);
    function.emit(Opcode::JumpIfZero, RegOperands::one(cond_reg), 0, Some(imm));
    flush_and_discard_all(function.ring_mut(), FlushAllMode::FlushOnly, flush)?;

    function.ring_mut().get_mut(cond_reg).locked = true;
    let then_val = eval_ternary(ctx, function, pos, flush);
    function.ring_mut().get_mut(cond_reg).locked = false;
    let then_val = then_val?;
    let then_reg = get_reg_for_var(ctx, function, then_val, Purpose::ForInput, pos, flush)?;
    let result_reg = cond_reg;
    if then_reg != result_reg {
        function.emit(Opcode::Copy, RegOperands::two(result_reg, then_reg), ctx.cfg.sizeofgpr, None);
    }

    expect_operator(ctx, ":", pos)?;

    let jimm = function.reference_label(join, pos);
    function.emit(Opcode::Jump, RegOperands::none(), 0, Some(jimm));
    flush_and_discard_all(function.ring_mut(), FlushAllMode::FlushOnly, flush)?;
    function.plant_label(false_label)?;

    function.ring_mut().get_mut(result_reg).locked = true;
    let else_val = eval_ternary(ctx, function, pos, flush);
    function.ring_mut().get_mut(result_reg).locked = false;
    let else_val = else_val?;
    let else_reg = get_reg_for_var(ctx, function, else_val, Purpose::ForInput, pos, flush)?;
    if else_reg != result_reg {
        function.emit(Opcode::Copy, RegOperands::two(result_reg, else_reg), ctx.cfg.sizeofgpr, None);
    }

    function.plant_label(join)?;
    claim_register_as_tempvar(ctx, function, result_reg, ctx.cfg.sizeofgpr as u32, pos)
}

fn eval_or<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    eval_or_from(ctx, function, None, pos, flush)
}

fn eval_or_from<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    seed: Option<VariableId>,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    let mut left = match seed {
        Some(v) => v,
        None => eval_and(ctx, function, pos, flush)?,
    };
    while ctx.lexer.read_operator(&["||"]).is_some() {
        let lsize = ctx.variables.get(left).size;
        let lreg = get_reg_for_var(ctx, function, left, Purpose::ForInput, pos, flush)?;
        function.emit(Opcode::SetNonZero, RegOperands::one(lreg), lsize.min(ctx.cfg.sizeofgpr as u32) as u8, None);

        let join = function.declare_label("or_join");
        let imm = function.reference_label(join, pos);
        function.emit(Opcode::JumpIfNotZero, RegOperands::one(lreg), 0, Some(imm));
        flush_and_discard_all(function.ring_mut(), FlushAllMode::FlushOnly, flush)?;

        function.ring_mut().get_mut(lreg).locked = true;
        let right = eval_and(ctx, function, pos, flush);
        function.ring_mut().get_mut(lreg).locked = false;
        let right = right?;
        let rreg = get_reg_for_var(ctx, function, right, Purpose::ForInput, pos, flush)?;
        if rreg != lreg {
            function.emit(Opcode::Copy, RegOperands::two(lreg, rreg), ctx.cfg.sizeofgpr, None);
        }
        function.emit(Opcode::SetNonZero, RegOperands::one(lreg), ctx.cfg.sizeofgpr as u8, None);
        function.plant_label(join)?;
        left = claim_register_as_tempvar(ctx, function, lreg, ctx.cfg.sizeofgpr as u32, pos)?;
    }
    Ok(left)
}

fn eval_and<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    eval_and_from(ctx, function, None, pos, flush)
}

fn eval_and_from<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    seed: Option<VariableId>,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    let mut left = match seed {
        Some(v) => v,
        None => eval_level(ctx, function, 0, pos, flush)?,
    };
    while ctx.lexer.read_operator(&["&&"]).is_some() {
        let lsize = ctx.variables.get(left).size;
        let lreg = get_reg_for_var(ctx, function, left, Purpose::ForInput, pos, flush)?;
        function.emit(Opcode::SetNonZero, RegOperands::one(lreg), lsize.min(ctx.cfg.sizeofgpr as u32) as u8, None);

        let join = function.declare_label("and_join");
        let imm = function.reference_label(join, pos);
        function.emit(Opcode::JumpIfZero, RegOperands::one(lreg), 0, Some(imm));
        flush_and_discard_all(function.ring_mut(), FlushAllMode::FlushOnly, flush)?;

        function.ring_mut().get_mut(lreg).locked = true;
        let right = eval_level(ctx, function, 0, pos, flush);
        function.ring_mut().get_mut(lreg).locked = false;
        let right = right?;
        let rreg = get_reg_for_var(ctx, function, right, Purpose::ForInput, pos, flush)?;
        if rreg != lreg {
            function.emit(Opcode::Copy, RegOperands::two(lreg, rreg), ctx.cfg.sizeofgpr, None);
        }
        function.emit(Opcode::SetNonZero, RegOperands::one(lreg), ctx.cfg.sizeofgpr as u8, None);
        function.plant_label(join)?;
        left = claim_register_as_tempvar(ctx, function, lreg, ctx.cfg.sizeofgpr as u32, pos)?;
    }
    Ok(left)
}

// ---------------------------------------------------------------------
// Precedence ladder
// ---------------------------------------------------------------------

fn eval_level<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    level: usize,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    eval_level_from(ctx, function, level, None, pos, flush)
}

fn eval_level_from<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    level: usize,
    seed: Option<VariableId>,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    if level >= LEVELS.len() {
        return eval_unary(ctx, function, pos, flush);
    }
    let mut left = match seed {
        Some(v) => v,
        None => eval_level_from(ctx, function, level + 1, None, pos, flush)?,
    };
    while let Some(idx) = ctx.lexer.read_operator(LEVELS[level]) {
        let op = LEVELS[level][idx];
        let right = eval_level(ctx, function, level + 1, pos, flush)?;
        left = apply_binary_op(ctx, function, op, left, right, pos, flush)?;
    }
    Ok(left)
}

fn apply_binary_op<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    op: &str,
    lhs: VariableId,
    rhs: VariableId,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    if let Some(&(_, opcode)) = NATIVE_BINARY_OPS.iter().find(|&&(sym, _)| sym == op) {
        if type_is_native(ctx, lhs) && type_is_native(ctx, rhs) {
            return lower_native_binary(ctx, function, opcode, lhs, rhs, pos, flush);
        }
    }
    dispatch_binary(ctx, function, op, lhs, rhs, pos, flush)
}

fn lower_native_binary<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    opcode: Opcode,
    lhs: VariableId,
    rhs: VariableId,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    let size = ctx.variables.get(lhs).size.max(ctx.variables.get(rhs).size);
    let lreg = get_reg_for_var(ctx, function, lhs, Purpose::ForInput, pos, flush)?;
    let rreg = get_reg_for_var(ctx, function, rhs, Purpose::ForInput, pos, flush)?;
    function.emit(opcode, RegOperands::two(lreg, rreg), size as u8, None);
    claim_register_as_tempvar(ctx, function, lreg, size, pos)
}

fn dispatch_binary<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    op: &str,
    lhs: VariableId,
    rhs: VariableId,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    let lty = type_name_of(ctx, lhs);
    let rty = type_name_of(ctx, rhs);
    let target = dispatch::resolve_call(ctx.symbols, op, &[&lty, &rty], ctx.scope)
        .ok_or_else(|| CodegenError::ty(pos, format!("no matching operator '{}' for '{}', '{}'", op, lty, rty)))?;
    call_resolved(ctx, function, target, &[lhs, rhs], None, pos, flush)
}

fn dispatch_unary<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    op: &str,
    operand: VariableId,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    let ty = type_name_of(ctx, operand);
    let target = dispatch::resolve_call(ctx.symbols, op, &[&ty], ctx.scope)
        .ok_or_else(|| CodegenError::ty(pos, format!("no matching unary operator '{}' for '{}'", op, ty)))?;
    call_resolved(ctx, function, target, &[operand], None, pos, flush)
}

fn claim_register_as_tempvar<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    reg: RegisterId,
    size: u32,
    pos: SourcePosition,
) -> CodegenResult<VariableId> {
    let var = ctx.variables.new_temp(ctx.current, ctx.interner, size.max(1), None, pos)?;
    let r = function.ring_mut().get_mut(reg);
    r.bind_variable(var, 0, size.max(1), 0);
    r.dirty = true;
    function.ring_mut().touch(reg);
    Ok(var)
}

// ---------------------------------------------------------------------
// Unary and postfix
// ---------------------------------------------------------------------

fn eval_unary<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    if let Some(idx) = ctx.lexer.read_operator(PREFIX_OPS) {
        let op = PREFIX_OPS[idx];
        let opcode = PREFIX_OPCODES[idx];
        let operand = eval_unary(ctx, function, pos, flush)?;
        if type_is_native(ctx, operand) {
            let size = ctx.variables.get(operand).size;
            let reg = get_reg_for_var(ctx, function, operand, Purpose::ForInput, pos, flush)?;
            function.emit(opcode, RegOperands::two(reg, reg), size as u8, None);
            return claim_register_as_tempvar(ctx, function, reg, size, pos);
        }
        return dispatch_unary(ctx, function, op, operand, pos, flush);
    }
    if ctx.lexer.read_operator(&["&"]).is_some() {
        let target = eval_unary(ctx, function, pos, flush)?;
        return ctx
            .variables
            .address_of(ctx.current, ctx.interner, target, ctx.cfg.sizeofgpr as u32, pos);
    }
    if ctx.lexer.read_operator(&["*"]).is_some() {
        let target = eval_unary(ctx, function, pos, flush)?;
        let size = ctx.cfg.sizeofgpr as u32;
        return ctx.variables.dereference(ctx.current, ctx.interner, target, None, size, pos);
    }
    if ctx.lexer.read_operator(&["++"]).is_some() {
        let target = eval_unary(ctx, function, pos, flush)?;
        return apply_prefix_step(ctx, function, target, true, pos, flush);
    }
    if ctx.lexer.read_operator(&["--"]).is_some() {
        let target = eval_unary(ctx, function, pos, flush)?;
        return apply_prefix_step(ctx, function, target, false, pos, flush);
    }
    eval_postfix(ctx, function, pos, flush)
}

fn apply_prefix_step<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    var: VariableId,
    increment: bool,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    let size = ctx.variables.get(var).size;
    let reg = get_reg_for_var(ctx, function, var, Purpose::ForInput, pos, flush)?;
    let delta: i64 = if increment { 1 } else { -1 };
    function.emit(
        Opcode::AddImmediate,
        RegOperands::two(reg, reg),
        size as u8,
        Some(ImmediateDescriptor::literal(delta)),
    );
    function.ring_mut().get_mut(reg).dirty = true;
    Ok(var)
}

fn eval_postfix<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    eval_postfix_from(ctx, function, None, pos, flush)
}

fn eval_postfix_from<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    seed: Option<VariableId>,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    let mut value = match seed {
        Some(v) => v,
        None => eval_primary(ctx, function, pos, flush)?,
    };
    loop {
        if ctx.lexer.read_operator(&["["]).is_some() {
            let index = eval_ternary(ctx, function, pos, flush)?;
            expect_operator(ctx, "]", pos)?;
            value = eval_index(ctx, function, value, index, pos, flush)?;
            continue;
        }
        if ctx.lexer.read_operator(&["->"]).is_some() {
            let deref_size = ctx.cfg.sizeofgpr as u32;
            let ptr = ctx.variables.dereference(ctx.current, ctx.interner, value, None, deref_size, pos)?;
            value = eval_field_or_method(ctx, function, ptr, pos, flush)?;
            continue;
        }
        if ctx.lexer.read_operator(&["."]).is_some() {
            value = eval_field_or_method(ctx, function, value, pos, flush)?;
            continue;
        }
        if ctx.lexer.read_operator(&["++"]).is_some() {
            ctx.postfix_queue.push(DeferredIncDec { var: value, increment: true });
            continue;
        }
        if ctx.lexer.read_operator(&["--"]).is_some() {
            ctx.postfix_queue.push(DeferredIncDec { var: value, increment: false });
            continue;
        }
        break;
    }
    Ok(value)
}

fn eval_index<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    base: VariableId,
    index: VariableId,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    if let VariableKind::NumberConstant(n) = ctx.variables.get(index).kind {
        let base_type = type_name_of(ctx, base);
        if let Some(element) = ctx.symbols.resolve_element(&base_type, ctx.scope) {
            let extra_offset = (n * element.size as i64) as u32;
            let result = ctx.variables.offset_suffixed(ctx.current, ctx.interner, base, extra_offset, element.size);
            if let Some(type_name) = &element.type_name {
                let sym = ctx.interner.intern(type_name);
                ctx.variables.set_cast(result, Some(sym));
            }
            return Ok(result);
        }
    }
    // Non-constant index, or `base` isn't an array (e.g. it's a pointer):
    // fall back to runtime pointer arithmetic.
    let addr = apply_binary_op(ctx, function, "+", base, index, pos, flush)?;
    let size = ctx.cfg.sizeofgpr as u32;
    ctx.variables.dereference(ctx.current, ctx.interner, addr, None, size, pos)
}

fn eval_field_or_method<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    object: VariableId,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    let field_name = ctx
        .lexer
        .read_symbol(true)
        .ok_or_else(|| CodegenError::syntax(pos, "expected a field or method name"))?;
    let object_type = type_name_of(ctx, object);

    if ctx.lexer.read_operator(&["("]).is_some() {
        let mut args = vec![object];
        args.extend(parse_call_arguments(ctx, function, pos, flush)?);
        let base_types = ctx.symbols.base_types(&object_type);
        let base_type_refs: Vec<&str> = base_types.iter().map(String::as_str).collect();
        let arg_types: Vec<String> = args[1..].iter().map(|&a| type_name_of(ctx, a)).collect();
        let arg_type_refs: Vec<&str> = arg_types.iter().map(String::as_str).collect();
        let target = dispatch::resolve_method_call(ctx.symbols, &field_name, &object_type, &base_type_refs, &arg_type_refs, ctx.scope)
            .ok_or_else(|| CodegenError::ty(pos, format!("no method '{}' on '{}'", field_name, object_type)))?;
        // `object` is already the first entry of `args`; passing it again
        // via `this_var` would double-count it against the resolved
        // signature, which already has the receiver type prepended.
        return call_resolved(ctx, function, target, &args, None, pos, flush);
    }

    let field = ctx
        .symbols
        .resolve_field(&object_type, &field_name)
        .ok_or_else(|| CodegenError::ty(pos, format!("'{}' has no field '{}'", object_type, field_name)))?;
    Ok(ctx.variables.offset_suffixed(ctx.current, ctx.interner, object, field.offset, field.size))
}

// ---------------------------------------------------------------------
// Primary expressions: literals, identifiers, parens, casts, calls
// ---------------------------------------------------------------------

fn eval_primary<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    if let Some((value, has_fraction)) = ctx.lexer.read_number() {
        let _ = has_fraction;
        let ty = ctx.interner.intern("int");
        return Ok(ctx.variables.new_number_const(ctx.current, value as i64, ty, ctx.cfg.sizeofgpr as u32));
    }
    if let Some(s) = ctx.lexer.read_string_constant(false) {
        return Ok(ctx.variables.new_string_const(ctx.current, ctx.interner, &s));
    }
    if let Some(c) = ctx.lexer.read_char_constant() {
        let ty = ctx.interner.intern("int");
        return Ok(ctx.variables.new_number_const(ctx.current, c, ty, ctx.cfg.sizeofgpr as u32));
    }
    if ctx.lexer.read_operator(&["("]).is_some() {
        return eval_paren_or_cast(ctx, function, pos, flush);
    }
    if let Some(name) = ctx.lexer.read_symbol(true) {
        return resolve_identifier(ctx, function, &name, pos, flush);
    }
    Err(CodegenError::syntax(pos, "expected an expression"))
}

/// The lexer commits to reading an identifier with no rewind, so `(` must
/// be disambiguated by reading the identifier first and classifying it: a
/// type name makes this a cast, anything else makes it the leading token
/// of a parenthesized sub-expression, seeded back into the precedence
/// chain via the `_from` variants (spec.md §4.5 "a parenthesized cast is
/// distinguished from a parenthesized sub-expression by symbol lookup").
fn eval_paren_or_cast<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    let Some(name) = ctx.lexer.read_symbol(true) else {
        let inner = eval_ternary(ctx, function, pos, flush)?;
        expect_operator(ctx, ")", pos)?;
        return Ok(inner);
    };

    if matches!(ctx.symbols.search_symbol(&name, ctx.scope), SymbolKind::Type) {
        return eval_cast(ctx, function, &name, pos, flush);
    }

    let seed = resolve_identifier_name(ctx, function, &name, pos, flush)?;
    let chained = eval_postfix_from(ctx, function, Some(seed), pos, flush)?;
    let inner = eval_ternary_from(ctx, function, Some(chained), pos, flush)?;
    expect_operator(ctx, ")", pos)?;
    Ok(inner)
}

fn eval_cast<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    type_name: &str,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    let mut type_name = type_name.to_string();
    if ctx.lexer.read_operator(&["*"]).is_some() {
        type_name.push('*');
    }
    expect_operator(ctx, ")", pos)?;

    let size = ctx.symbols.size_of(&type_name, ctx.scope).unwrap_or(ctx.cfg.sizeofgpr as u32);
    let cast_sym = ctx.interner.intern(&type_name);

    if ctx.lexer.read_operator(&["{"]).is_some() {
        let var = ctx.variables.new_temp(ctx.current, ctx.interner, size.max(1), Some(cast_sym), pos)?;
        if ctx.lexer.read_operator(&["}"]).is_none() {
            let init = eval_ternary(ctx, function, pos, flush)?;
            copy_into(ctx, function, var, init, pos, flush)?;
            expect_operator(ctx, "}", pos)?;
        }
        return Ok(var);
    }

    let value = eval_unary(ctx, function, pos, flush)?;
    // A bit-selected value is duplicated before a cast is attached, so the
    // cast never leaks onto the register binding of the un-cast original.
    let value = if ctx.variables.get(value).is_bitselected() {
        let dup = ctx.variables.get_var_duplicate(ctx.current, ctx.interner, value, pos)?;
        copy_into(ctx, function, dup, value, pos, flush)?;
        dup
    } else {
        value
    };
    ctx.variables.set_cast(value, Some(cast_sym));
    Ok(value)
}

fn copy_into<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    dest: VariableId,
    src: VariableId,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let size = ctx.variables.get(dest).size.min(ctx.variables.get(src).size).max(1);
    let src_reg = get_reg_for_var(ctx, function, src, Purpose::ForInput, pos, flush)?;
    let dest_reg = get_reg_for_var(ctx, function, dest, Purpose::ForOutput, pos, flush)?;
    function.emit(Opcode::Copy, RegOperands::two(dest_reg, src_reg), size as u8, None);
    Ok(())
}

fn resolve_identifier<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    name: &str,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    match ctx.symbols.search_symbol(name, ctx.scope) {
        SymbolKind::Type => Err(CodegenError::ty(pos, format!("'{}' names a type, not a value", name))),
        SymbolKind::Variable(var) => {
            if ctx.lexer.read_operator(&["("]).is_some() {
                eval_indirect_call(ctx, function, var, pos, flush)
            } else {
                Ok(var)
            }
        }
        SymbolKind::Function(external_id) => {
            expect_operator(ctx, "(", pos)?;
            eval_direct_or_native_call(ctx, function, name, external_id, pos, flush)
        }
        SymbolKind::NotFound => Err(CodegenError::semantic(pos, format!("undeclared identifier '{}'", name))),
    }
}

/// Same resolution as `resolve_identifier`, minus the "must be immediately
/// followed by a value position" call consumption used when the name was
/// already read as part of the cast-vs-paren lookahead.
fn resolve_identifier_name<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    name: &str,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    match ctx.symbols.search_symbol(name, ctx.scope) {
        SymbolKind::Type => Err(CodegenError::internal(pos, "type name reached the paren-expression path")),
        SymbolKind::Variable(var) => {
            if ctx.lexer.read_operator(&["("]).is_some() {
                eval_indirect_call(ctx, function, var, pos, flush)
            } else {
                Ok(var)
            }
        }
        SymbolKind::Function(external_id) => {
            expect_operator(ctx, "(", pos)?;
            eval_direct_or_native_call(ctx, function, name, external_id, pos, flush)
        }
        SymbolKind::NotFound => Err(CodegenError::semantic(pos, format!("undeclared identifier '{}'", name))),
    }
}

fn parse_call_arguments<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<Vec<VariableId>> {
    let mut args = Vec::new();
    if ctx.lexer.read_operator(&[")"]).is_some() {
        return Ok(args);
    }
    loop {
        args.push(eval_ternary(ctx, function, pos, flush)?);
        if ctx.lexer.read_operator(&[","]).is_some() {
            continue;
        }
        expect_operator(ctx, ")", pos)?;
        break;
    }
    Ok(args)
}

fn eval_direct_or_native_call<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    name: &str,
    _name_external_id: u32,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    let args = parse_call_arguments(ctx, function, pos, flush)?;
    let arg_types: Vec<String> = args.iter().map(|&a| type_name_of(ctx, a)).collect();
    let arg_type_refs: Vec<&str> = arg_types.iter().map(String::as_str).collect();
    let target = dispatch::resolve_call(ctx.symbols, name, &arg_type_refs, ctx.scope)
        .ok_or_else(|| CodegenError::ty(pos, format!("no matching function '{}' for the given argument types", name)))?;

    let callee = lookup_callee(ctx, target, pos)?;
    let mut args = args;
    if ctx.functions[callee].is_variadic {
        let ptr_ty = ctx.interner.intern("voidptr");
        args.push(ctx.variables.new_number_const(ctx.current, 0, ptr_ty, ctx.cfg.sizeofgpr as u32));
    }
    call_resolved(ctx, function, target, &args, None, pos, flush)
}

fn eval_indirect_call<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    callee_ptr: VariableId,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    let args = parse_call_arguments(ctx, function, pos, flush)?;
    let retvar = ctx.variables.new_temp(ctx.current, ctx.interner, ctx.cfg.sizeofgpr as u32, None, pos)?;

    let mut call_args: SmallVec<[CallArgument; 4]> = SmallVec::with_capacity(args.len());
    for &a in &args {
        let v = ctx.variables.get(a).clone();
        call_args.push(CallArgument {
            var: a,
            passed_size: v.size,
            is_by_ref: v.is_byref,
            signed: is_native_signed(ctx, &v),
        });
    }

    let plan = CallPlan {
        kind: CallKind::Indirect(callee_ptr),
        this_var: None,
        retvar: Some(retvar),
        args: call_args,
        is_tiny_frame: false,
        callee_is_stackframe_holder: false,
    };

    let functions = ctx.functions;
    let cfg = ctx.cfg;
    let current = ctx.current;
    dispatch::call_with_reserved_registers_saved(
        functions,
        current,
        function,
        ctx.variables,
        ctx.interner,
        cfg,
        pos,
        |function, variables, interner, flush| emit_call(functions, current, function, variables, interner, cfg, &plan, pos, flush),
        flush,
    )?;
    Ok(retvar)
}

fn lookup_callee<S: SymbolTable>(ctx: &EvalCtx<S>, target: CallTarget, pos: SourcePosition) -> CodegenResult<FunctionId> {
    let external_id = match target.kind {
        CallTargetKind::UserFunction(id) | CallTargetKind::Native(id) => id,
    };
    ctx.external_functions
        .get(&external_id)
        .copied()
        .ok_or_else(|| CodegenError::internal(pos, format!("resolved call target {} has no registered core function", external_id)))
}

fn call_resolved<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    target: CallTarget,
    args: &[VariableId],
    this_var: Option<VariableId>,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<VariableId> {
    let callee = lookup_callee(ctx, target, pos)?;
    // No return-type/return-size field exists anywhere on `Function`, so
    // every call's implicit return variable is a word-sized tempvar.
    let retvar = ctx.variables.new_temp(ctx.current, ctx.interner, ctx.cfg.sizeofgpr as u32, None, pos)?;

    let mut call_args: SmallVec<[CallArgument; 4]> = SmallVec::with_capacity(args.len());
    for &a in args {
        let v = ctx.variables.get(a).clone();
        call_args.push(CallArgument {
            var: a,
            passed_size: v.size,
            is_by_ref: v.is_byref,
            signed: is_native_signed(ctx, &v),
        });
    }

    let plan = CallPlan {
        kind: CallKind::Direct(callee),
        this_var,
        retvar: Some(retvar),
        args: call_args,
        is_tiny_frame: ctx.functions[callee].stackframe_holder.is_some(),
        callee_is_stackframe_holder: ctx.functions[callee].is_stackframe_holder,
    };

    let functions = ctx.functions;
    let cfg = ctx.cfg;
    let current = ctx.current;
    dispatch::call_with_reserved_registers_saved(
        functions,
        current,
        function,
        ctx.variables,
        ctx.interner,
        cfg,
        pos,
        |function, variables, interner, flush| emit_call(functions, current, function, variables, interner, cfg, &plan, pos, flush),
        flush,
    )?;

    Ok(retvar)
}

// ---------------------------------------------------------------------
// Small shared helpers
// ---------------------------------------------------------------------

pub(crate) fn expect_operator<S: SymbolTable>(ctx: &mut EvalCtx<S>, op: &str, pos: SourcePosition) -> CodegenResult<()> {
    if ctx.lexer.read_operator(&[op]).is_some() {
        Ok(())
    } else {
        Err(CodegenError::syntax(pos, format!("expected '{}'", op)))
    }
}

pub(crate) fn get_reg_for_var<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    var: VariableId,
    purpose: Purpose,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<RegisterId> {
    let v = ctx.variables.get(var).clone();
    let signed = is_native_signed(ctx, &v);
    let mut gv = GetRegForVar {
        functions: ctx.functions,
        current: ctx.current,
        function,
        variables: ctx.variables,
        interner: ctx.interner,
        cfg: ctx.cfg,
    };
    gv.run(var, 0, v.size, v.bitselect, signed, purpose, pos, flush)
}

fn type_name_of<S: SymbolTable>(ctx: &EvalCtx<S>, var: VariableId) -> String {
    match ctx.variables.get(var).cast.or(ctx.variables.get(var).ty) {
        Some(sym) => ctx.interner.resolve(sym).to_string(),
        None => "int".to_string(),
    }
}

fn is_native_signed<S: SymbolTable>(ctx: &EvalCtx<S>, v: &Variable) -> bool {
    let name = match v.cast.or(v.ty) {
        Some(sym) => ctx.interner.resolve(sym),
        None => return false,
    };
    ctx.symbols.resolve(name, ctx.scope).map(|t| t.is_signed()).unwrap_or(false)
}

pub(crate) fn type_is_native<S: SymbolTable>(ctx: &EvalCtx<S>, var: VariableId) -> bool {
    let v = ctx.variables.get(var);
    let name = match v.cast.or(v.ty) {
        Some(sym) => ctx.interner.resolve(sym),
        None => return true,
    };
    ctx.symbols.resolve(name, ctx.scope).map(|t| t.is_native()).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::testing::FakeCompiler;
    use crate::external::SymbolKind as SK;
    use crate::interner::Interner;
    use crate::ir::entities::FunctionId;
    use crate::regalloc::RegisterRing;
    use crate::ty::testing::FakeTypeTable;

    // `EvalCtx` borrows `symbols` and `lexer` separately, so tests use two
    // `FakeCompiler`s: one driving symbol/type lookups, one driving the
    // token stream, exactly as two distinct embedder objects would.
    fn lexer_for(tokens: Vec<&str>) -> FakeCompiler {
        FakeCompiler::new(tokens.into_iter().map(str::to_string).collect())
    }

    fn no_flush() -> Box<FlushFn<'static>> {
        Box::new(|_ring: &mut RegisterRing, _id| Ok(()))
    }

    #[test]
    fn native_addition_lowers_to_a_single_add_and_a_tempvar() {
        let functions: PrimaryMap<FunctionId, Function> = PrimaryMap::new();
        let mut variables = VariableStore::new(1 << 20);
        let mut interner = Interner::new();
        let cfg = Config::default();
        let external_functions: HashMap<u32, FunctionId> = HashMap::new();
        let fid = FunctionId::from_u32(0);
        let mut function = Function::new(interner.intern("f"), None);
        function.begin_codegen(8);

        let mut symbols = FakeCompiler::new(vec![]);
        symbols.types.insert("int".to_string(), FakeTypeTable::native("int", 4, true));
        let mut lexer = lexer_for(vec!["1", "+", "2"]);

        let mut ctx = EvalCtx {
            functions: &functions,
            current: fid,
            variables: &mut variables,
            interner: &mut interner,
            cfg: &cfg,
            symbols: &symbols,
            lexer: &mut lexer,
            external_functions: &external_functions,
            scope: 0,
            postfix_queue: Vec::new(),
        };
        let mut flush = no_flush();
        let before = function.instruction_count();
        let result = eval_expression(&mut ctx, &mut function, SourcePosition::default(), &mut *flush).unwrap();
        assert!(function.instruction_count() > before);
        assert!(ctx.variables.get(result).is_tempvar());
    }

    #[test]
    fn postfix_increment_is_deferred_to_the_end_of_the_expression() {
        let functions: PrimaryMap<FunctionId, Function> = PrimaryMap::new();
        let mut variables = VariableStore::new(1 << 20);
        let mut interner = Interner::new();
        let cfg = Config::default();
        let external_functions: HashMap<u32, FunctionId> = HashMap::new();
        let fid = FunctionId::from_u32(0);
        let mut function = Function::new(interner.intern("f"), None);
        function.begin_codegen(8);

        let x_name = interner.intern("x");
        let x = variables.new_local(fid, x_name, 0, 4, None);

        let mut symbols = FakeCompiler::new(vec![]);
        symbols.symbols.insert("x".to_string(), SK::Variable(x));
        let mut lexer = lexer_for(vec!["x", "++"]);

        let mut ctx = EvalCtx {
            functions: &functions,
            current: fid,
            variables: &mut variables,
            interner: &mut interner,
            cfg: &cfg,
            symbols: &symbols,
            lexer: &mut lexer,
            external_functions: &external_functions,
            scope: 0,
            postfix_queue: Vec::new(),
        };
        let mut flush = no_flush();
        let result = eval_expression(&mut ctx, &mut function, SourcePosition::default(), &mut *flush).unwrap();
        assert_eq!(result, x);
        assert!(function
            .instructions()
            .iter()
            .any(|inst| matches!(inst.opcode, Opcode::AddImmediate)));
    }

    #[test]
    fn short_circuit_or_emits_a_conditional_join() {
        let functions: PrimaryMap<FunctionId, Function> = PrimaryMap::new();
        let mut variables = VariableStore::new(1 << 20);
        let mut interner = Interner::new();
        let cfg = Config::default();
        let external_functions: HashMap<u32, FunctionId> = HashMap::new();
        let fid = FunctionId::from_u32(0);
        let mut function = Function::new(interner.intern("f"), None);
        function.begin_codegen(8);

        let symbols = FakeCompiler::new(vec![]);
        let mut lexer = lexer_for(vec!["1", "||", "2"]);

        let mut ctx = EvalCtx {
            functions: &functions,
            current: fid,
            variables: &mut variables,
            interner: &mut interner,
            cfg: &cfg,
            symbols: &symbols,
            lexer: &mut lexer,
            external_functions: &external_functions,
            scope: 0,
            postfix_queue: Vec::new(),
        };
        let mut flush = no_flush();
        let result = eval_expression(&mut ctx, &mut function, SourcePosition::default(), &mut *flush).unwrap();
        assert!(ctx.variables.get(result).is_tempvar());
        assert!(function
            .instructions()
            .iter()
            .any(|inst| matches!(inst.opcode, Opcode::JumpIfNotZero)));
        function.finish_codegen().unwrap();
    }

    #[test]
    fn constant_index_into_an_array_folds_to_a_static_offset() {
        let functions: PrimaryMap<FunctionId, Function> = PrimaryMap::new();
        let mut variables = VariableStore::new(1 << 20);
        let mut interner = Interner::new();
        let cfg = Config::default();
        let external_functions: HashMap<u32, FunctionId> = HashMap::new();
        let fid = FunctionId::from_u32(0);
        let mut function = Function::new(interner.intern("f"), None);
        function.begin_codegen(8);

        let arr_name = interner.intern("a");
        let arr_ty = interner.intern("intarr");
        let arr = variables.new_local(fid, arr_name, 0, 16, Some(arr_ty));

        let mut symbols = FakeCompiler::new(vec![]);
        symbols.symbols.insert("a".to_string(), SK::Variable(arr));
        symbols.elements.insert(
            "intarr".to_string(),
            crate::ty::ElementInfo { size: 4, type_name: Some("int".to_string()) },
        );
        let mut lexer = lexer_for(vec!["a", "[", "2", "]"]);

        let mut ctx = EvalCtx {
            functions: &functions,
            current: fid,
            variables: &mut variables,
            interner: &mut interner,
            cfg: &cfg,
            symbols: &symbols,
            lexer: &mut lexer,
            external_functions: &external_functions,
            scope: 0,
            postfix_queue: Vec::new(),
        };
        let mut flush = no_flush();
        let before = function.instruction_count();
        let result = eval_postfix(&mut ctx, &mut function, SourcePosition::default(), &mut *flush).unwrap();
        assert_eq!(function.instruction_count(), before);
        assert!(matches!(
            ctx.variables.get(result).kind,
            VariableKind::OffsetSuffixed { base, extra_offset: 8 } if base == arr
        ));
        assert_eq!(ctx.variables.get(result).size, 4);
    }
}
