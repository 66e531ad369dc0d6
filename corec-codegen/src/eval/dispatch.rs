//! Operator and function call dispatch (spec.md §4.5.2): composing a call
//! signature from a name and its pushed argument types, resolving it
//! against a user function or a native operator, method dispatch with
//! base-type fallback, and the reserved-register save/restore wrapper
//! around indirect and function calls (spec.md §8 scenario S4).

use corec_entity::PrimaryMap;

use crate::config::Config;
use crate::external::SymbolTable;
use crate::interner::Interner;
use crate::ir::entities::{FunctionId, RegisterId};
use crate::ir::function::Function;
use crate::ir::immediate::ImmediateDescriptor;
use crate::ir::instruction::{Opcode, RegOperands};
use crate::memory::{generate_load_instr, LoadKind};
use crate::regalloc::{allocate, Criticality, FlushFn};
use crate::result::{CodegenResult, SourcePosition};
use crate::variable::VariableStore;

/// Which kind of callee a resolved call signature named.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallTargetKind {
    /// A user-declared function, by its external id.
    UserFunction(u32),
    /// A host-language native operator implementation, by its external id.
    Native(u32),
}

/// The outcome of resolving a call signature to an implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallTarget {
    pub kind: CallTargetKind,
}

/// Build the pipe-delimited signature `name|type1|type2|...|` a call site's
/// name and pushed argument types compose to (spec.md §4.5.2).
pub fn compose_signature(name: &str, arg_types: &[&str]) -> String {
    let mut sig = String::with_capacity(name.len() + arg_types.iter().map(|t| t.len() + 1).sum::<usize>());
    sig.push_str(name);
    sig.push('|');
    for ty in arg_types {
        sig.push_str(ty);
        sig.push('|');
    }
    sig
}

/// Resolve `name(arg_types...)` against the user function table first, then
/// the native-operator table (spec.md §4.5.2 "user functions shadow native
/// operators of the same signature").
pub fn resolve_call<S: SymbolTable>(symbols: &S, name: &str, arg_types: &[&str], scope: u32) -> Option<CallTarget> {
    let sig = compose_signature(name, arg_types);
    if let Some(id) = symbols.search_func(&sig, scope) {
        log::trace!("signature `{}` resolved to user function {}", sig, id);
        return Some(CallTarget { kind: CallTargetKind::UserFunction(id) });
    }
    let target = symbols
        .search_native_op(&sig)
        .map(|id| CallTarget { kind: CallTargetKind::Native(id) });
    match target {
        Some(_) => log::trace!("signature `{}` resolved to a native operator", sig),
        None => log::trace!("signature `{}` did not resolve", sig),
    }
    target
}

/// Resolve a method call `object.name(args...)`, retrying against each of
/// `object_type`'s base types in order when the exact-type signature isn't
/// declared (spec.md §4.5.2 method dispatch, §8 scenario S3).
pub fn resolve_method_call<S: SymbolTable>(
    symbols: &S,
    name: &str,
    object_type: &str,
    base_types: &[&str],
    arg_types: &[&str],
    scope: u32,
) -> Option<CallTarget> {
    std::iter::once(object_type).chain(base_types.iter().copied()).find_map(|receiver_type| {
        if receiver_type != object_type {
            log::debug!("method `{}` not found on `{}`, falling back to base type `{}`", name, object_type, receiver_type);
        }
        let mut full_args = Vec::with_capacity(arg_types.len() + 1);
        full_args.push(receiver_type);
        full_args.extend_from_slice(arg_types);
        resolve_call(symbols, name, &full_args, scope)
    })
}

/// Save every reserved register to a fresh stack tempvar, run `emit_call`,
/// then reload them (spec.md §4.5.2, §8 scenario S4: "an indirect call
/// through a function pointer saves and restores every reserved register
/// across the call"). A no-op pass-through when no register is reserved.
pub fn call_with_reserved_registers_saved<F>(
    functions: &PrimaryMap<FunctionId, Function>,
    owner: FunctionId,
    function: &mut Function,
    variables: &mut VariableStore,
    interner: &mut Interner,
    cfg: &Config,
    pos: SourcePosition,
    emit_call: F,
    flush: &mut FlushFn,
) -> CodegenResult<()>
where
    // `variables`/`interner` are threaded through as parameters rather than
    // captured, so a caller building this closure doesn't have to hold a
    // second borrow of them alongside the ones passed into this function
    // directly (they're the same evaluator-owned store across both).
    F: FnOnce(&mut Function, &mut VariableStore, &mut Interner, &mut FlushFn) -> CodegenResult<()>,
{
    let reserved: Vec<RegisterId> = function
        .ring()
        .scan_order()
        .filter(|&id| function.ring().get(id).reserved)
        .collect();
    if reserved.is_empty() {
        return emit_call(function, variables, interner, flush);
    }

    let slot_size = cfg.sizeofgpr as u32 * reserved.len() as u32;
    let slot = variables.new_temp(owner, interner, slot_size, None, pos)?;

    store_reserved(functions, owner, function, variables, cfg, slot, &reserved, pos, flush)?;
    emit_call(function, variables, interner, flush)?;
    load_reserved(functions, owner, function, variables, cfg, slot, &reserved, pos, flush)?;

    variables.var_free_temp_var_related(slot);
    Ok(())
}

fn store_reserved(
    functions: &PrimaryMap<FunctionId, Function>,
    owner: FunctionId,
    function: &mut Function,
    variables: &VariableStore,
    cfg: &Config,
    slot: crate::variable::VariableId,
    reserved: &[RegisterId],
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let addr_reg = allocate(function.ring_mut(), variables, Criticality::NonCritical, flush)?;
    generate_load_instr(functions, owner, function, variables, addr_reg, slot, 0, 0, LoadKind::Addr, pos, flush)?;
    for (i, &reg) in reserved.iter().enumerate() {
        let imm = ImmediateDescriptor::literal(i as i64 * cfg.sizeofgpr as i64);
        function.emit(Opcode::Store, RegOperands::two(addr_reg, reg), cfg.sizeofgpr, Some(imm));
    }
    Ok(())
}

fn load_reserved(
    functions: &PrimaryMap<FunctionId, Function>,
    owner: FunctionId,
    function: &mut Function,
    variables: &VariableStore,
    cfg: &Config,
    slot: crate::variable::VariableId,
    reserved: &[RegisterId],
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    // Recomputed after the call rather than reusing the earlier address
    // register: a call flushes and discards the ring's bindings, so
    // nothing guarantees that register is still tracked as holding it.
    let addr_reg = allocate(function.ring_mut(), variables, Criticality::NonCritical, flush)?;
    generate_load_instr(functions, owner, function, variables, addr_reg, slot, 0, 0, LoadKind::Addr, pos, flush)?;
    for (i, &reg) in reserved.iter().enumerate() {
        let imm = ImmediateDescriptor::literal(i as i64 * cfg.sizeofgpr as i64);
        function.emit(Opcode::Load, RegOperands::two(reg, addr_reg), cfg.sizeofgpr, Some(imm));
    }
    Ok(())
}
