//! Assembly Statement Parser (spec.md §2 component 10, §4.7).
//!
//! Parses one inline-assembly pseudo-statement at a time: a raw machine-code
//! string, a label definition, or `mnemonic operand, ...;`. Operands are
//! either a bare physical register (`%N`, reserved for the rest of the
//! enclosing block) or an expression lowered through the evaluator
//! (spec.md §4.5), which must yield a native- or pointer-typed variable.
//! Each mnemonic's operand roles (output/input/immediate/label) are fixed
//! by the opcode, following the "opcode categories" named in the GLOSSARY.

use crate::eval::evaluator::{eval_expression, expect_operator, get_reg_for_var, type_is_native, EvalCtx};
use crate::external::{Lexer, SymbolTable};
use crate::ir::entities::RegisterId;
use crate::ir::function::Function;
use crate::ir::immediate::ImmediateDescriptor;
use crate::ir::instruction::{Opcode, RegOperands};
use crate::memory::Purpose;
use crate::regalloc::{flush_and_discard_all, FlushAllMode, FlushFn};
use crate::result::{CodegenError, CodegenResult, SourcePosition};
use crate::variable::VariableId;

/// One parsed assembly operand, before it's pinned to a concrete register.
enum AsmOperand {
    /// `%N`: a physical register reserved for this block.
    Register(RegisterId),
    /// An expression, evaluated to a variable.
    Value(VariableId),
}

/// Parse a single pseudo-statement and lower it. Returns once the
/// terminating `;` (or, for a label, the `:`) has been consumed.
pub fn parse_statement<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    if let Some(code) = ctx.lexer.read_string_constant(false) {
        function.emit_machine_code(&code);
        return expect_operator(ctx, ";", pos);
    }

    let name = ctx
        .lexer
        .read_symbol(true)
        .ok_or_else(|| CodegenError::syntax(pos, "expected a label, mnemonic, or machine-code string"))?;

    if ctx.lexer.read_operator(&[":"]).is_some() {
        flush_and_discard_all(function.ring_mut(), FlushAllMode::FlushAndDiscardAll, flush)?;
        let label = function.declare_label(&name);
        function.plant_label(label)?;
        return Ok(());
    }

    lower_mnemonic(ctx, function, &name, pos, flush)?;
    expect_operator(ctx, ";", pos)
}

// ---------------------------------------------------------------------
// Operand parsing
// ---------------------------------------------------------------------

fn parse_operand<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<AsmOperand> {
    if ctx.lexer.read_operator(&["%"]).is_some() {
        let (n, _) = ctx
            .lexer
            .read_number()
            .ok_or_else(|| CodegenError::syntax(pos, "expected a register number after '%'"))?;
        let reg = RegisterId::from_u32(n as u32);
        if n != 0 {
            reserve(function, reg, flush)?;
        }
        return Ok(AsmOperand::Register(reg));
    }
    let value = eval_expression(ctx, function, pos, flush)?;
    if !type_is_native(ctx, value) {
        return Err(CodegenError::ty(pos, "assembly operand must be a native- or pointer-typed value"));
    }
    Ok(AsmOperand::Value(value))
}

/// Reserve `reg` for the enclosing block: whatever it currently holds is
/// discarded, flushed first if dirty (spec.md §4.7, GLOSSARY "Reserved
/// register").
fn reserve(function: &mut Function, reg: RegisterId, flush: &mut FlushFn) -> CodegenResult<()> {
    if function.ring().get(reg).dirty {
        flush(function.ring_mut(), reg)?;
    }
    let r = function.ring_mut().get_mut(reg);
    r.clear();
    r.reserved = true;
    Ok(())
}

fn read_label_name<S: SymbolTable>(ctx: &mut EvalCtx<S>, pos: SourcePosition) -> CodegenResult<String> {
    ctx.lexer
        .read_symbol(true)
        .ok_or_else(|| CodegenError::syntax(pos, "expected a label name"))
}

fn read_number<S: SymbolTable>(ctx: &mut EvalCtx<S>, pos: SourcePosition) -> CodegenResult<i64> {
    let (n, _) = ctx
        .lexer
        .read_number()
        .ok_or_else(|| CodegenError::syntax(pos, "expected an immediate"))?;
    Ok(n as i64)
}

fn comma<S: SymbolTable>(ctx: &mut EvalCtx<S>, pos: SourcePosition) -> CodegenResult<()> {
    expect_operator(ctx, ",", pos)
}

// ---------------------------------------------------------------------
// Register acquisition per operand role
// ---------------------------------------------------------------------

fn acquire<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    operand: &AsmOperand,
    purpose: Purpose,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<RegisterId> {
    match *operand {
        AsmOperand::Register(reg) => Ok(reg),
        AsmOperand::Value(var) => get_reg_for_var(ctx, function, var, purpose, pos, flush),
    }
}

fn operand_size<S: SymbolTable>(ctx: &EvalCtx<S>, operand: &AsmOperand) -> u32 {
    match *operand {
        AsmOperand::Register(_) => ctx.cfg.sizeofgpr as u32,
        AsmOperand::Value(var) => ctx.variables.get(var).size,
    }
}

// ---------------------------------------------------------------------
// Mnemonic dispatch
// ---------------------------------------------------------------------

fn lower_mnemonic<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    name: &str,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    match name {
        "add" => lower_out_in_in(ctx, function, Opcode::Add, pos, flush),
        "sub" => lower_out_in_in(ctx, function, Opcode::Sub, pos, flush),
        "and" => lower_out_in_in(ctx, function, Opcode::And, pos, flush),
        "or" => lower_out_in_in(ctx, function, Opcode::Or, pos, flush),
        "xor" => lower_out_in_in(ctx, function, Opcode::Xor, pos, flush),
        "shl" => lower_out_in_in(ctx, function, Opcode::Shl, pos, flush),
        "shr" => lower_out_in_in(ctx, function, Opcode::Shr, pos, flush),
        "sar" => lower_out_in_in(ctx, function, Opcode::Sar, pos, flush),
        "mul" => lower_out_in_in(ctx, function, Opcode::Mul, pos, flush),
        "div" => lower_out_in_in(ctx, function, Opcode::Div, pos, flush),

        "not" => lower_out_in(ctx, function, Opcode::Not, pos, flush),
        "neg" => lower_out_in(ctx, function, Opcode::Neg, pos, flush),
        "snz" => lower_out_in(ctx, function, Opcode::SetNonZero, pos, flush),
        "sez" => lower_out_in(ctx, function, Opcode::SetZero, pos, flush),
        "zxt" => lower_out_in(ctx, function, Opcode::ZeroExtend, pos, flush),
        "sxt" => lower_out_in(ctx, function, Opcode::SignExtend, pos, flush),
        "cpy" => lower_out_in(ctx, function, Opcode::Copy, pos, flush),

        "li" => lower_out_imm(ctx, function, Opcode::LoadImmediate, pos, flush),
        "pagealloc" => lower_out_imm(ctx, function, Opcode::PageAlloc, pos, flush),

        "addi" => lower_out_in_imm(ctx, function, Opcode::AddImmediate, 0, pos, flush),
        "ldb" => lower_out_in_imm(ctx, function, Opcode::Load, 1, pos, flush),
        "ldh" => lower_out_in_imm(ctx, function, Opcode::Load, 2, pos, flush),
        "ldw" => lower_out_in_imm(ctx, function, Opcode::Load, 4, pos, flush),
        "ldd" => lower_out_in_imm(ctx, function, Opcode::Load, 8, pos, flush),

        "stb" => lower_store(ctx, function, 1, pos, flush),
        "sth" => lower_store(ctx, function, 2, pos, flush),
        "stw" => lower_store(ctx, function, 4, pos, flush),
        "std" => lower_store(ctx, function, 8, pos, flush),

        "memcpy" => lower_mem_copy(ctx, function, Opcode::MemCopy, pos, flush),
        "memcpyi" => lower_mem_copy(ctx, function, Opcode::MemCopyUpdating, pos, flush),

        "afip" => lower_out_label(ctx, function, Opcode::Afip, pos, flush),
        "jl" => lower_out_label(ctx, function, Opcode::JumpAndLink, pos, flush),

        "j" => lower_jlabel(ctx, function, pos, flush),
        "jz" => lower_jcond(ctx, function, Opcode::JumpIfZero, pos, flush),
        "jnz" => lower_jcond(ctx, function, Opcode::JumpIfNotZero, pos, flush),

        "jpush" => lower_jpush_label(ctx, function, pos, flush),
        "jpushi" => lower_jpush_immediate(ctx, function, pos, flush),
        "jpushr" => lower_jpush_register(ctx, function, pos, flush),

        "stackpagealloc" => lower_out_only(ctx, function, Opcode::StackPageAlloc, pos, flush),
        "stackpagefree" => lower_in_only(ctx, function, Opcode::StackPageFree, pos, flush),
        "pagefree" => lower_in_only(ctx, function, Opcode::PageFree, pos, flush),

        _ => Err(CodegenError::syntax(pos, format!("unknown assembly mnemonic '{}'", name))),
    }
}

// ---------------------------------------------------------------------
// Lowering routines, one per opcode category (GLOSSARY "Opcode categories")
// ---------------------------------------------------------------------

/// `outinin`: `op dst, a, b`.
fn lower_out_in_in<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    opcode: Opcode,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let dst = parse_operand(ctx, function, pos, flush)?;
    comma(ctx, pos)?;
    let a = parse_operand(ctx, function, pos, flush)?;
    comma(ctx, pos)?;
    let b = parse_operand(ctx, function, pos, flush)?;

    let areg = acquire(ctx, function, &a, Purpose::ForInput, pos, flush)?;
    let breg = acquire(ctx, function, &b, Purpose::ForInput, pos, flush)?;
    let size = operand_size(ctx, &dst).max(operand_size(ctx, &a)).max(operand_size(ctx, &b));
    let dreg = acquire(ctx, function, &dst, Purpose::ForOutput, pos, flush)?;
    function.emit(opcode, RegOperands::three(dreg, areg, breg), size as u8, None);
    Ok(())
}

/// `outin`: `op dst, a`.
fn lower_out_in<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    opcode: Opcode,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let dst = parse_operand(ctx, function, pos, flush)?;
    comma(ctx, pos)?;
    let a = parse_operand(ctx, function, pos, flush)?;

    let areg = acquire(ctx, function, &a, Purpose::ForInput, pos, flush)?;
    let size = operand_size(ctx, &dst).max(operand_size(ctx, &a));
    let dreg = acquire(ctx, function, &dst, Purpose::ForOutput, pos, flush)?;
    function.emit(opcode, RegOperands::two(dreg, areg), size as u8, None);
    Ok(())
}

/// `outimm`: `op dst, imm`.
fn lower_out_imm<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    opcode: Opcode,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let dst = parse_operand(ctx, function, pos, flush)?;
    comma(ctx, pos)?;
    let n = read_number(ctx, pos)?;

    let size = operand_size(ctx, &dst);
    let dreg = acquire(ctx, function, &dst, Purpose::ForOutput, pos, flush)?;
    function.emit(opcode, RegOperands::one(dreg), size as u8, Some(ImmediateDescriptor::literal(n)));
    Ok(())
}

/// `outinimm`: `op dst, base, imm` (address computation and loads; `size`
/// is fixed by the mnemonic for loads, 0 -- "whatever the operands carry"
/// -- for `addi`).
fn lower_out_in_imm<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    opcode: Opcode,
    fixed_size: u32,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let dst = parse_operand(ctx, function, pos, flush)?;
    comma(ctx, pos)?;
    let base = parse_operand(ctx, function, pos, flush)?;
    comma(ctx, pos)?;
    let n = read_number(ctx, pos)?;

    let basereg = acquire(ctx, function, &base, Purpose::ForInput, pos, flush)?;
    let size = if fixed_size != 0 {
        fixed_size
    } else {
        operand_size(ctx, &dst).max(operand_size(ctx, &base))
    };
    let dreg = acquire(ctx, function, &dst, Purpose::ForOutput, pos, flush)?;
    function.emit(opcode, RegOperands::two(dreg, basereg), size as u8, Some(ImmediateDescriptor::literal(n)));
    Ok(())
}

/// `stb`/`sth`/`stw`/`std base, imm, src` -- the one opcode whose textual
/// operand order doesn't put the immediate last (spec.md §4.7).
fn lower_store<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    size: u32,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let base = parse_operand(ctx, function, pos, flush)?;
    comma(ctx, pos)?;
    let n = read_number(ctx, pos)?;
    comma(ctx, pos)?;
    let src = parse_operand(ctx, function, pos, flush)?;

    let basereg = acquire(ctx, function, &base, Purpose::ForInput, pos, flush)?;
    let srcreg = acquire(ctx, function, &src, Purpose::ForInput, pos, flush)?;
    function.emit(Opcode::Store, RegOperands::two(basereg, srcreg), size as u8, Some(ImmediateDescriptor::literal(n)));
    Ok(())
}

/// `memcpy`/`memcpyi dst, src, imm`. `memcpyi` additionally applies
/// `propagatevarchange` to `dst` (spec.md §4.7), i.e. acquires it
/// `FOR-OUTPUT` instead of `FOR-INPUT`.
fn lower_mem_copy<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    opcode: Opcode,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let dst = parse_operand(ctx, function, pos, flush)?;
    comma(ctx, pos)?;
    let src = parse_operand(ctx, function, pos, flush)?;
    comma(ctx, pos)?;
    let n = read_number(ctx, pos)?;

    let srcreg = acquire(ctx, function, &src, Purpose::ForInput, pos, flush)?;
    let dst_purpose = if matches!(opcode, Opcode::MemCopyUpdating) {
        Purpose::ForOutput
    } else {
        Purpose::ForInput
    };
    let dstreg = acquire(ctx, function, &dst, dst_purpose, pos, flush)?;
    function.emit(opcode, RegOperands::two(dstreg, srcreg), ctx.cfg.sizeofgpr, Some(ImmediateDescriptor::literal(n)));
    Ok(())
}

/// `afip dst, label` / `jl dst, label` -- both require a bare register
/// destination, not a general expression (spec.md §4.7 "Special opcodes").
fn lower_out_label<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    opcode: Opcode,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let dst = parse_operand(ctx, function, pos, flush)?;
    let dreg = match dst {
        AsmOperand::Register(reg) => reg,
        AsmOperand::Value(_) => {
            return Err(CodegenError::semantic(pos, "this opcode requires a %N register destination"))
        }
    };
    comma(ctx, pos)?;
    let label_name = read_label_name(ctx, pos)?;
    let label = function.declare_label(&label_name);
    let imm = function.reference_label(label, pos);
    function.emit(opcode, RegOperands::one(dreg), 0, Some(imm));
    Ok(())
}

/// `j label` -- unconditional jump (`jlabel` category).
fn lower_jlabel<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let label_name = read_label_name(ctx, pos)?;
    let label = function.declare_label(&label_name);
    let imm = function.reference_label(label, pos);
    flush_and_discard_all(function.ring_mut(), FlushAllMode::FlushAndDiscardAll, flush)?;
    function.emit(Opcode::Jump, RegOperands::none(), 0, Some(imm));
    Ok(())
}

/// `jz a, label` / `jnz a, label` (`jcondinimm` category).
fn lower_jcond<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    opcode: Opcode,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let a = parse_operand(ctx, function, pos, flush)?;
    comma(ctx, pos)?;
    let label_name = read_label_name(ctx, pos)?;

    let areg = acquire(ctx, function, &a, Purpose::ForInput, pos, flush)?;
    let label = function.declare_label(&label_name);
    let imm = function.reference_label(label, pos);
    flush_and_discard_all(function.ring_mut(), FlushAllMode::FlushOnly, flush)?;
    function.emit(opcode, RegOperands::one(areg), 0, Some(imm));
    Ok(())
}

/// `jpush label` -- call sequencer's direct call form; also forces
/// `could_not_get_a_stackframe_holder` (spec.md §4.7 "Special opcodes").
fn lower_jpush_label<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let label_name = read_label_name(ctx, pos)?;
    let label = function.declare_label(&label_name);
    let imm = function.reference_label(label, pos);
    flush_and_discard_all(function.ring_mut(), FlushAllMode::FlushAndDiscardAll, flush)?;
    function.emit(Opcode::JumpPush, RegOperands::none(), 0, Some(imm));
    function.could_not_get_a_stackframe_holder = true;
    Ok(())
}

/// `jpushi imm` -- push to an immediate (deferred) target.
fn lower_jpush_immediate<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let n = read_number(ctx, pos)?;
    flush_and_discard_all(function.ring_mut(), FlushAllMode::FlushAndDiscardAll, flush)?;
    function.emit(Opcode::JumpPushImmediate, RegOperands::none(), 0, Some(ImmediateDescriptor::literal(n)));
    function.could_not_get_a_stackframe_holder = true;
    Ok(())
}

/// `jpushr reg` -- indirect call through a register holding the callee.
fn lower_jpush_register<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let a = parse_operand(ctx, function, pos, flush)?;
    let areg = acquire(ctx, function, &a, Purpose::ForInput, pos, flush)?;
    flush_and_discard_all(function.ring_mut(), FlushAllMode::FlushAndDiscardAll, flush)?;
    function.emit(Opcode::JumpPushRegister, RegOperands::one(areg), 0, None);
    function.could_not_get_a_stackframe_holder = true;
    Ok(())
}

/// `stackpagealloc dst` -- one output register, no inputs.
fn lower_out_only<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    opcode: Opcode,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let dst = parse_operand(ctx, function, pos, flush)?;
    let dreg = acquire(ctx, function, &dst, Purpose::ForOutput, pos, flush)?;
    function.emit(opcode, RegOperands::one(dreg), 0, None);
    Ok(())
}

/// `stackpagefree reg` / `pagefree reg` -- one input register.
fn lower_in_only<S: SymbolTable>(
    ctx: &mut EvalCtx<S>,
    function: &mut Function,
    opcode: Opcode,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let a = parse_operand(ctx, function, pos, flush)?;
    let areg = acquire(ctx, function, &a, Purpose::ForInput, pos, flush)?;
    function.emit(opcode, RegOperands::one(areg), 0, None);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::external::testing::FakeCompiler;
    use crate::interner::Interner;
    use crate::ir::entities::FunctionId;
    use crate::regalloc::RegisterRing;
    use crate::variable::VariableStore;
    use corec_entity::PrimaryMap;
    use std::collections::HashMap;

    fn no_flush() -> Box<FlushFn<'static>> {
        Box::new(|_ring: &mut RegisterRing, _id| Ok(()))
    }

    fn new_function() -> Function {
        let mut it = Interner::new();
        let name = it.intern("f");
        let mut f = Function::new(name, None);
        f.begin_codegen(8);
        f
    }

    #[test]
    fn register_operand_reserves_and_clears_the_slot() {
        let mut function = new_function();
        let reg = function.ring().scan_order().next().unwrap();
        function.ring_mut().get_mut(reg).dirty = false;

        let mut lexer = FakeCompiler::new(vec!["%".into(), format!("{}", reg.as_u32())]);
        let symbols = FakeCompiler::new(Vec::new());
        let mut variables = VariableStore::new(1 << 16);
        let mut interner = Interner::new();
        let cfg = Config::default();
        let functions: PrimaryMap<FunctionId, Function> = PrimaryMap::new();
        let external_functions = HashMap::new();
        let mut ctx = EvalCtx::new(
            &functions,
            FunctionId::from_u32(0),
            &mut variables,
            &mut interner,
            &cfg,
            &symbols,
            &mut lexer,
            &external_functions,
            0,
        );
        let mut flush = no_flush();
        let operand = parse_operand(&mut ctx, &mut function, SourcePosition::default(), &mut flush).unwrap();
        match operand {
            AsmOperand::Register(r) => assert_eq!(r, reg),
            AsmOperand::Value(_) => panic!("expected a register operand"),
        }
        assert!(function.ring().get(reg).reserved);
    }

    #[test]
    fn unconditional_jump_flushes_and_discards_before_emitting() {
        let mut function = new_function();
        let reg = function.ring().scan_order().next().unwrap();
        function.ring_mut().get_mut(reg).bind_variable(
            crate::variable::VariableId::from_u32(0),
            0,
            4,
            0,
        );
        function.ring_mut().get_mut(reg).dirty = true;

        let mut lexer = FakeCompiler::new(vec!["target".into()]);
        let symbols = FakeCompiler::new(Vec::new());
        let mut variables = VariableStore::new(1 << 16);
        let mut interner = Interner::new();
        let cfg = Config::default();
        let functions: PrimaryMap<FunctionId, Function> = PrimaryMap::new();
        let external_functions = HashMap::new();
        let mut ctx = EvalCtx::new(
            &functions,
            FunctionId::from_u32(0),
            &mut variables,
            &mut interner,
            &cfg,
            &symbols,
            &mut lexer,
            &external_functions,
            0,
        );
        let mut flushed = false;
        let mut flush: Box<FlushFn> = Box::new(|_ring, _id| {
            flushed = true;
            Ok(())
        });
        lower_jlabel(&mut ctx, &mut function, SourcePosition::default(), &mut flush).unwrap();
        assert!(flushed);
        assert!(matches!(function.instructions().last().unwrap().opcode, Opcode::Jump));
    }

    #[test]
    fn jpushr_sets_the_no_stackframe_holder_flag() {
        let mut function = new_function();
        assert!(!function.could_not_get_a_stackframe_holder);
        let reg = function.ring().scan_order().next().unwrap();

        let mut lexer = FakeCompiler::new(vec!["%".into(), format!("{}", reg.as_u32())]);
        let symbols = FakeCompiler::new(Vec::new());
        let mut variables = VariableStore::new(1 << 16);
        let mut interner = Interner::new();
        let cfg = Config::default();
        let functions: PrimaryMap<FunctionId, Function> = PrimaryMap::new();
        let external_functions = HashMap::new();
        let mut ctx = EvalCtx::new(
            &functions,
            FunctionId::from_u32(0),
            &mut variables,
            &mut interner,
            &cfg,
            &symbols,
            &mut lexer,
            &external_functions,
            0,
        );
        let mut flush = no_flush();
        lower_jpush_register(&mut ctx, &mut function, SourcePosition::default(), &mut flush).unwrap();
        assert!(function.could_not_get_a_stackframe_holder);
    }
}
