//! Call Sequencer (spec.md §2, §4.6).
//!
//! Builds a callee's stackframe at a call site, writes its fixed fields and
//! arguments, and emits the jump that hands control to it. Shares the
//! Stackframe Pointer Engine (`stackframe::pointer`) for resolving the
//! lexical-parent field and the Memory Load/Store Lowering routines
//! (`memory`) for every field and argument that is itself a variable
//! access.

use corec_entity::PrimaryMap;
use smallvec::SmallVec;

use crate::config::Config;
use crate::interner::Interner;
use crate::ir::entities::{FunctionId, RegisterId};
use crate::ir::function::Function;
use crate::ir::immediate::{ImmTerm, ImmediateDescriptor};
use crate::ir::instruction::{Opcode, RegOperands};
use crate::memory::{generate_load_instr, GetRegForVar, LoadKind, Purpose};
use crate::regalloc::{allocate, discard_overlapping, flush_and_discard_all, Criticality, FlushAllMode, FlushFn, OverlapPolicy, Tenant};
use crate::result::{CodegenError, CodegenResult, SourcePosition};
use crate::stackframe::layout::{regular_fixed_size, tiny_fixed_size, RegularField, TinyField};
use crate::stackframe::pointer::{get_ancestor_frame_pointer, FrameSource};
use crate::variable::{VariableId, VariableStore};

/// How control actually reaches the callee (spec.md §4.6 step 5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    /// `jpush`: a statically known callee.
    Direct(FunctionId),
    /// `jpushr`: the callee's address is held in a register, already bound
    /// to `ptr_var`.
    Indirect(VariableId),
    /// The predeclared-variable write-through call (spec.md §4.9): same
    /// sequencing as `Direct`, but with no arguments, no `this`, no return
    /// variable.
    Callback(FunctionId),
}

/// One argument to write into the callee's argument block.
#[derive(Clone, Copy, Debug)]
pub struct CallArgument {
    pub var: VariableId,
    /// Size, in bytes, the argument was pushed under (spec.md §4.6 step 4:
    /// "decide its effective size (min of (passed type size, variable's
    /// size))").
    pub passed_size: u32,
    pub is_by_ref: bool,
    pub signed: bool,
}

/// Everything the call sequencer needs to build one call site.
pub struct CallPlan {
    pub kind: CallKind,
    /// `this` pointer, if any (spec.md §4.6 field 5).
    pub this_var: Option<VariableId>,
    /// Return-variable address to pass down, if the callee returns through
    /// an out-parameter (spec.md §4.6 field 6).
    pub retvar: Option<VariableId>,
    /// Most call sites pass a handful of arguments; inline storage avoids a
    /// heap allocation per call for the common case.
    pub args: SmallVec<[CallArgument; 4]>,
    /// Is the callee a subfunction of a stackframe holder (spec.md §4.6:
    /// "a tiny stackframe is used when the callee is a stackframe-holder's
    /// subfunction")?
    pub is_tiny_frame: bool,
    /// Does the callee itself hold subfunctions, so the call must use `jl`
    /// with the return address stashed in register 1 instead of `jpush`
    /// (spec.md §4.6 step 5)?
    pub callee_is_stackframe_holder: bool,
}

fn argument_area_size(cfg: &Config, plan: &CallPlan, pos: SourcePosition) -> CodegenResult<u32> {
    let word = cfg.sizeofgpr as u32;
    let mut total = 0u32;
    for arg in &plan.args {
        let slot = if arg.is_by_ref { word } else { arg.passed_size.min(word) };
        total += ((slot + word - 1) / word) * word;
    }
    total += cfg.function_call_args_guard_space * word;
    if total > cfg.max_arg_usage {
        return Err(CodegenError::resource(
            pos,
            format!("call-args-usage-exceeds-limit: {} exceeds {}", total, cfg.max_arg_usage),
        ));
    }
    Ok(total)
}

/// `stack-needed` bound for the page-availability check (spec.md §4.6 step
/// 1): `MAX-STACK-USAGE` for an indirect or otherwise statically unknown
/// callee, else the callee's own symbolic locals/shared/cache size plus
/// this call's fixed-field and argument-block size.
fn stack_needed(
    functions: &PrimaryMap<FunctionId, Function>,
    cfg: &Config,
    plan: &CallPlan,
    arg_area: u32,
) -> u32 {
    let fixed = if plan.is_tiny_frame {
        tiny_fixed_size(cfg, plan.retvar.is_some())
    } else {
        regular_fixed_size(cfg)
    };
    match plan.kind {
        CallKind::Indirect(_) => cfg.max_stack_usage,
        CallKind::Direct(callee) | CallKind::Callback(callee) => {
            let f = &functions[callee];
            fixed
                + f.locals_size.unwrap_or(0)
                + f.shared_region_size.unwrap_or(0)
                + f.stackframe_pointer_cache_size.unwrap_or(0)
                + arg_area
                + cfg.stack_page_alloc_provision
        }
    }
}

/// Emit the in-line "enough room left in the current stack page?" check and
/// a `stackpagealloc` fallback (spec.md §4.6 step 2). Uses a scratch
/// register rather than the stack pointer itself, since `SetNonZero`
/// normalizes its operand in place and the stack pointer must survive the
/// comparison untouched.
fn emit_stack_page_check(
    function: &mut Function,
    variables: &VariableStore,
    cfg: &Config,
    needed: u32,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let sp = RegisterId::from_u32(0);
    let scratch = allocate(function.ring_mut(), variables, Criticality::NonCritical, flush)?;
    function.emit(Opcode::Copy, RegOperands::two(scratch, sp), cfg.sizeofgpr, None);
    function.emit(
        Opcode::AddImmediate,
        RegOperands::two(scratch, scratch),
        cfg.sizeofgpr,
        Some(ImmediateDescriptor::literal(-(needed as i64))),
    );
    function.emit(Opcode::SetNonZero, RegOperands::one(scratch), 0, None);
    let skip = function.declare_label("stackpage_ok");
    let imm = function.reference_label(skip, pos);
    function.emit(Opcode::JumpIfNotZero, RegOperands::one(scratch), 0, Some(imm));
    function.emit(Opcode::StackPageAlloc, RegOperands::none(), 0, None);
    function.plant_label(skip)?;
    Ok(())
}

/// Emit the post-return "did we fall off the bottom of the page?" check and
/// a `stackpagefree` fallback (spec.md §4.6 step 6).
fn emit_excess_page_check(
    function: &mut Function,
    variables: &VariableStore,
    cfg: &Config,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let sp = RegisterId::from_u32(0);
    let scratch = allocate(function.ring_mut(), variables, Criticality::NonCritical, flush)?;
    function.emit(Opcode::Copy, RegOperands::two(scratch, sp), cfg.sizeofgpr, None);
    function.emit(
        Opcode::AddImmediate,
        RegOperands::two(scratch, scratch),
        cfg.sizeofgpr,
        Some(ImmediateDescriptor::literal(-(cfg.page_size as i64 - cfg.sizeofgpr as i64))),
    );
    function.emit(Opcode::SetNonZero, RegOperands::one(scratch), 0, None);
    let skip = function.declare_label("stackpage_keep");
    let imm = function.reference_label(skip, pos);
    function.emit(Opcode::JumpIfNotZero, RegOperands::one(scratch), 0, Some(imm));
    function.emit(Opcode::StackPageFree, RegOperands::none(), 0, None);
    function.plant_label(skip)?;
    Ok(())
}

fn write_fixed_fields(
    functions: &PrimaryMap<FunctionId, Function>,
    current: FunctionId,
    function: &mut Function,
    variables: &VariableStore,
    cfg: &Config,
    plan: &CallPlan,
    frame_base: RegisterId,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let sp = RegisterId::from_u32(0);
    let word = cfg.sizeofgpr;

    if plan.is_tiny_frame {
        let has_retvar = plan.retvar.is_some();
        let prev_offset = TinyField::PreviousStackframe.offset(word, has_retvar);
        function.emit(Opcode::Store, RegOperands::two(frame_base, sp), word, Some(ImmediateDescriptor::literal(prev_offset as i64)));
        if let Some(retvar) = plan.retvar {
            let addr_reg = allocate(function.ring_mut(), variables, Criticality::NonCritical, flush)?;
            generate_load_instr(functions, current, function, variables, addr_reg, retvar, 0, 0, LoadKind::Addr, pos, flush)?;
            let off = TinyField::RetvarAddress.offset(word, true);
            function.emit(Opcode::Store, RegOperands::two(frame_base, addr_reg), word, Some(ImmediateDescriptor::literal(off as i64)));
        }
        return Ok(());
    }

    let prev_offset = RegularField::PreviousStackframe.offset(word);
    function.emit(Opcode::Store, RegOperands::two(frame_base, sp), word, Some(ImmediateDescriptor::literal(prev_offset as i64)));

    // Field 7 itself is written by the jump instruction below, which
    // stores the actual return address as part of its `jpush`/`jl`
    // semantics; only field 1, the compile-time-constant displacement to
    // that field, is the caller's responsibility to write up front.
    let return_addr_offset = RegularField::ReturnAddress.offset(word);
    let field1_offset = RegularField::ReturnAddressFieldOffset.offset(word);
    let field1_reg = allocate(function.ring_mut(), variables, Criticality::NonCritical, flush)?;
    function.emit(
        Opcode::LoadImmediate,
        RegOperands::one(field1_reg),
        word,
        Some(ImmediateDescriptor::literal(return_addr_offset as i64)),
    );
    function.emit(Opcode::Store, RegOperands::two(frame_base, field1_reg), word, Some(ImmediateDescriptor::literal(field1_offset as i64)));

    if let CallKind::Direct(callee) | CallKind::Callback(callee) = plan.kind {
        let parent_offset = RegularField::ParentStackframe.offset(word);
        match get_ancestor_frame_pointer(functions, current, function, 1, false, pos, flush)? {
            FrameSource::StackPointerSuffices => {
                function.emit(Opcode::Store, RegOperands::two(frame_base, sp), word, Some(ImmediateDescriptor::literal(parent_offset as i64)));
            }
            FrameSource::Existing(id) | FrameSource::Fresh(id) => {
                function.emit(Opcode::Store, RegOperands::two(frame_base, id), word, Some(ImmediateDescriptor::literal(parent_offset as i64)));
            }
        }

        let id_offset = RegularField::StackframeId.offset(word);
        let id_reg = allocate(function.ring_mut(), variables, Criticality::NonCritical, flush)?;
        let mut id_imm = ImmediateDescriptor::zero();
        id_imm.add_term(ImmTerm::FunctionCodeOffset(callee));
        function.emit(Opcode::Afip, RegOperands::one(id_reg), 0, Some(id_imm));
        function.emit(Opcode::Store, RegOperands::two(frame_base, id_reg), word, Some(ImmediateDescriptor::literal(id_offset as i64)));
    }

    let this_offset = RegularField::This.offset(word);
    let this_reg = allocate(function.ring_mut(), variables, Criticality::NonCritical, flush)?;
    if let Some(this_var) = plan.this_var {
        generate_load_instr(functions, current, function, variables, this_reg, this_var, 0, 0, LoadKind::Addr, pos, flush)?;
    } else {
        function.emit(Opcode::LoadImmediate, RegOperands::one(this_reg), word, Some(ImmediateDescriptor::zero()));
    }
    function.emit(Opcode::Store, RegOperands::two(frame_base, this_reg), word, Some(ImmediateDescriptor::literal(this_offset as i64)));

    if let Some(retvar) = plan.retvar {
        let retvar_offset = RegularField::RetvarAddress.offset(word);
        let addr_reg = allocate(function.ring_mut(), variables, Criticality::NonCritical, flush)?;
        generate_load_instr(functions, current, function, variables, addr_reg, retvar, 0, 0, LoadKind::Addr, pos, flush)?;
        function.emit(Opcode::Store, RegOperands::two(frame_base, addr_reg), word, Some(ImmediateDescriptor::literal(retvar_offset as i64)));
    }

    Ok(())
}

fn write_one_argument(
    functions: &PrimaryMap<FunctionId, Function>,
    current: FunctionId,
    function: &mut Function,
    variables: &mut VariableStore,
    interner: &mut Interner,
    cfg: &Config,
    frame_base: RegisterId,
    offset: u32,
    arg: &CallArgument,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let word = cfg.sizeofgpr as u32;
    if arg.is_by_ref {
        let reg = allocate(function.ring_mut(), variables, Criticality::NonCritical, flush)?;
        generate_load_instr(functions, current, function, variables, reg, arg.var, 0, 0, LoadKind::Addr, pos, flush)?;
        function.emit(Opcode::Store, RegOperands::two(frame_base, reg), cfg.sizeofgpr, Some(ImmediateDescriptor::literal(offset as i64)));
        return Ok(());
    }

    if arg.passed_size <= word {
        let effective = arg.passed_size.min(word);
        let mut gv = GetRegForVar {
            functions,
            current,
            function,
            variables,
            interner,
            cfg,
        };
        let reg = gv.run(arg.var, 0, effective, 0, arg.signed, Purpose::ForInput, pos, flush)?;
        function.emit(Opcode::Store, RegOperands::two(frame_base, reg), effective as u8, Some(ImmediateDescriptor::literal(offset as i64)));
        return Ok(());
    }

    let addr_reg = allocate(function.ring_mut(), variables, Criticality::NonCritical, flush)?;
    generate_load_instr(functions, current, function, variables, addr_reg, arg.var, 0, 0, LoadKind::Addr, pos, flush)?;
    discard_overlapping(function.ring_mut(), arg.var, 0, arg.passed_size, 0, OverlapPolicy::FlushWithoutDiscard, flush)?;

    let dest_reg = allocate(function.ring_mut(), variables, Criticality::NonCritical, flush)?;
    function.emit(Opcode::AddImmediate, RegOperands::two(dest_reg, frame_base), cfg.sizeofgpr, Some(ImmediateDescriptor::literal(offset as i64)));

    let words = (arg.passed_size + word - 1) / word;
    function.emit(
        Opcode::MemCopyUpdating,
        RegOperands::two(dest_reg, addr_reg),
        cfg.sizeofgpr,
        Some(ImmediateDescriptor::literal(words as i64)),
    );
    Ok(())
}

fn write_arguments(
    functions: &PrimaryMap<FunctionId, Function>,
    current: FunctionId,
    function: &mut Function,
    variables: &mut VariableStore,
    interner: &mut Interner,
    cfg: &Config,
    plan: &CallPlan,
    frame_base: RegisterId,
    fixed_size: u32,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let word = cfg.sizeofgpr as u32;
    let mut offset = fixed_size;
    for arg in &plan.args {
        write_one_argument(functions, current, function, variables, interner, cfg, frame_base, offset, arg, pos, flush)?;
        let slot = if arg.is_by_ref { word } else { arg.passed_size.min(word) };
        offset += ((slot + word - 1) / word) * word;
    }
    Ok(())
}

/// If the current function is itself holding its own return address in a
/// register (it was reached via `jl`, spec.md §8 property "Register 1...
/// carries the return address"), and the call about to be made also uses
/// `jl`, register 1 is about to be overwritten with the nested callee's
/// return address. Store the old value to this function's own stackframe
/// (field 7, the return-address field the caller's caller already wrote an
/// offset for) before it's lost.
fn preserve_return_address(function: &mut Function, cfg: &Config, nested_call_uses_jl: bool) {
    if !nested_call_uses_jl {
        return;
    }
    let holder = function.ring().all().find(|&id| matches!(function.ring().get(id).tenant, Tenant::ReturnAddress));
    let Some(id) = holder else {
        return;
    };
    let sp = RegisterId::from_u32(0);
    let word = cfg.sizeofgpr;
    let offset = RegularField::ReturnAddress.offset(word);
    function.emit(Opcode::Store, RegOperands::two(sp, id), word, Some(ImmediateDescriptor::literal(offset as i64)));
    function.ring_mut().get_mut(id).clear();
}

fn emit_jump(
    functions: &PrimaryMap<FunctionId, Function>,
    current: FunctionId,
    function: &mut Function,
    variables: &mut VariableStore,
    interner: &mut Interner,
    cfg: &Config,
    plan: &CallPlan,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    match plan.kind {
        CallKind::Direct(callee) | CallKind::Callback(callee) => {
            let mut imm = ImmediateDescriptor::zero();
            imm.add_term(ImmTerm::OffsetToFunction(callee));
            if plan.callee_is_stackframe_holder {
                function.emit(Opcode::JumpAndLink, RegOperands::one(RegisterId::from_u32(1)), 0, Some(imm));
            } else {
                // jpush needs the stack pointer at the top of stack, so
                // it forces the enclosing function to give up on ever
                // becoming a stackframe holder itself (spec.md §4.7
                // Special opcodes).
                function.could_not_get_a_stackframe_holder = true;
                function.emit(Opcode::JumpPush, RegOperands::none(), 0, Some(imm));
            }
            Ok(())
        }
        CallKind::Indirect(ptr_var) => {
            let reg = {
                let mut gv = GetRegForVar {
                    functions,
                    current,
                    function,
                    variables,
                    interner,
                    cfg,
                };
                gv.run(ptr_var, 0, cfg.sizeofgpr as u32, 0, false, Purpose::ForInput, pos, flush)?
            };
            function.could_not_get_a_stackframe_holder = true;
            function.emit(Opcode::JumpPushRegister, RegOperands::one(reg), 0, None);
            Ok(())
        }
    }
}

/// Run the full call sequence of spec.md §4.6 for one call site.
pub fn emit_call(
    functions: &PrimaryMap<FunctionId, Function>,
    current: FunctionId,
    function: &mut Function,
    variables: &mut VariableStore,
    interner: &mut Interner,
    cfg: &Config,
    plan: &CallPlan,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let arg_area = argument_area_size(cfg, plan, pos)?;
    let fixed_size = if plan.is_tiny_frame {
        tiny_fixed_size(cfg, plan.retvar.is_some())
    } else {
        regular_fixed_size(cfg)
    };
    let needed = stack_needed(functions, cfg, plan, arg_area);
    emit_stack_page_check(function, variables, cfg, needed, pos, flush)?;

    let frame_base = allocate(function.ring_mut(), variables, Criticality::NonCritical, flush)?;
    let total_size = fixed_size + arg_area;
    function.emit(
        Opcode::AddImmediate,
        RegOperands::two(frame_base, RegisterId::from_u32(0)),
        cfg.sizeofgpr,
        Some(ImmediateDescriptor::literal(-(total_size as i64))),
    );

    write_fixed_fields(functions, current, function, variables, cfg, plan, frame_base, pos, flush)?;
    write_arguments(functions, current, function, variables, interner, cfg, plan, frame_base, fixed_size, pos, flush)?;

    let uses_jl = matches!(plan.kind, CallKind::Direct(_) | CallKind::Callback(_)) && plan.callee_is_stackframe_holder;
    preserve_return_address(function, cfg, uses_jl);
    let discard_mode = if uses_jl { FlushAllMode::FlushAndDiscardAll } else { FlushAllMode::KeepReturnAddress };
    flush_and_discard_all(function.ring_mut(), discard_mode, flush)?;
    function.emit(Opcode::Copy, RegOperands::two(RegisterId::from_u32(0), frame_base), cfg.sizeofgpr, None);

    if let CallKind::Direct(callee) = plan.kind {
        function.record_call(callee);
    }
    emit_jump(functions, current, function, variables, interner, cfg, plan, pos, flush)?;

    function.emit(
        Opcode::AddImmediate,
        RegOperands::two(RegisterId::from_u32(0), RegisterId::from_u32(0)),
        cfg.sizeofgpr,
        Some(ImmediateDescriptor::literal(total_size as i64)),
    );
    emit_excess_page_check(function, variables, cfg, pos, flush)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interner::Symbol;
    use crate::ir::entities::FunctionId;

    fn noop_flush<'a>() -> Box<FlushFn<'a>> {
        Box::new(|_, _| Ok(()))
    }

    fn two_functions() -> (PrimaryMap<FunctionId, Function>, FunctionId, FunctionId) {
        let mut functions: PrimaryMap<FunctionId, Function> = PrimaryMap::new();
        let caller = functions.push(Function::new(Symbol::from_u32(0), None));
        let mut callee_fn = Function::new(Symbol::from_u32(1), None);
        callee_fn.locals_size = Some(16);
        callee_fn.shared_region_size = Some(0);
        callee_fn.stackframe_pointer_cache_size = Some(0);
        let callee = functions.push(callee_fn);
        (functions, caller, callee)
    }

    #[test]
    fn direct_call_with_no_args_emits_a_jpush() {
        let (functions, caller, callee) = two_functions();
        let mut function = Function::new(Symbol::from_u32(0), None);
        function.begin_codegen(16);
        let mut variables = VariableStore::new(1 << 16);
        let mut interner = Interner::new();
        let cfg = Config::default();
        let mut flush = noop_flush();

        let plan = CallPlan {
            kind: CallKind::Direct(callee),
            this_var: None,
            retvar: None,
            args: SmallVec::new(),
            is_tiny_frame: false,
            callee_is_stackframe_holder: false,
        };

        emit_call(&functions, caller, &mut function, &mut variables, &mut interner, &cfg, &plan, SourcePosition::default(), &mut *flush).unwrap();

        assert!(function.could_not_get_a_stackframe_holder);
        assert_eq!(*function.called_functions.get(&callee).unwrap(), 1);
        function.finish_codegen().unwrap();
    }

    #[test]
    fn argument_area_over_the_limit_fails() {
        let (_functions, _caller, _callee) = two_functions();
        let mut cfg = Config::default();
        cfg.max_arg_usage = 4;
        let plan = CallPlan {
            kind: CallKind::Direct(FunctionId::from_u32(1)),
            this_var: None,
            retvar: None,
            args: smallvec::smallvec![CallArgument { var: VariableId::from_u32(0), passed_size: 8, is_by_ref: false, signed: false }],
            is_tiny_frame: false,
            callee_is_stackframe_holder: false,
        };
        let err = argument_area_size(&cfg, &plan, SourcePosition::default()).unwrap_err();
        assert!(format!("{}", err).contains("call-args-usage-exceeds-limit"));
    }

    #[test]
    fn stackframe_holder_callee_uses_jump_and_link() {
        let (functions, caller, callee) = two_functions();
        let mut function = Function::new(Symbol::from_u32(0), None);
        function.begin_codegen(16);
        let mut variables = VariableStore::new(1 << 16);
        let mut interner = Interner::new();
        let cfg = Config::default();
        let mut flush = noop_flush();

        let plan = CallPlan {
            kind: CallKind::Direct(callee),
            this_var: None,
            retvar: None,
            args: SmallVec::new(),
            is_tiny_frame: false,
            callee_is_stackframe_holder: true,
        };

        emit_call(&functions, caller, &mut function, &mut variables, &mut interner, &cfg, &plan, SourcePosition::default(), &mut *flush).unwrap();
        assert!(!function.could_not_get_a_stackframe_holder);
    }
}
