//! The Stackframe Pointer Engine (spec.md §2 component 6, §4.3).
//!
//! Obtains, caches, and restores pointers to ancestor function stackframes
//! by lexical level, including the stackframe-id scan loop used when an
//! ancestor's address has been taken (spec.md §8 scenario S6).

use corec_entity::PrimaryMap;

use crate::ir::entities::{FunctionId, RegisterId};
use crate::ir::immediate::{ImmTerm, ImmediateDescriptor};
use crate::ir::instruction::{Opcode, RegOperands};
use crate::ir::function::Function;
use crate::regalloc::register::Tenant;
use crate::regalloc::{allocate, Criticality, FlushFn};
use crate::result::{CodegenError, CodegenResult, SourcePosition};
use crate::stackframe::layout::RegularField;
use crate::config::Config;

/// Where to find the ancestor-frame pointer requested by
/// `get_ancestor_frame_pointer`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameSource {
    /// The stack pointer itself already addresses the requested scope
    /// (register 0).
    StackPointerSuffices,
    /// An existing register in the ring already holds this level.
    Existing(RegisterId),
    /// Must be loaded fresh into a newly allocated register.
    Fresh(RegisterId),
}

/// Translate `level` (counted from `current`) to be counted from
/// `current`'s stackframe holder instead, if it has one, per spec.md §4.3
/// step 1. Returns `None` when the stack pointer already suffices (the
/// requested ancestor is at or above the holder).
fn translate_through_holder(
    functions: &PrimaryMap<FunctionId, Function>,
    current: FunctionId,
    level: u32,
) -> Option<u32> {
    let cur = &functions[current];
    let Some(holder) = cur.stackframe_holder else {
        return Some(level);
    };
    // Depth in lexical-parent hops from `current` up to `holder`.
    let mut depth = 0u32;
    let mut cursor = current;
    loop {
        if cursor == holder {
            break;
        }
        match functions[cursor].parent {
            Some(p) => {
                cursor = p;
                depth += 1;
            }
            None => break,
        }
    }
    if level <= depth {
        None
    } else {
        Some(level - depth)
    }
}

/// Redirect `level` further up the ancestor chain until it names a
/// stackframe holder, per spec.md §4.3 step 2 (a non-holder ancestor keeps
/// its frame inside its own holder's shared region, so there's no
/// standalone pointer to find for it).
fn redirect_to_nearest_holder(
    functions: &PrimaryMap<FunctionId, Function>,
    current: FunctionId,
    mut level: u32,
) -> u32 {
    loop {
        let Some(ancestor) = nth_ancestor(functions, current, level) else {
            return level;
        };
        if functions[ancestor].is_stackframe_holder {
            return level;
        }
        level += 1;
    }
}

fn nth_ancestor(functions: &PrimaryMap<FunctionId, Function>, start: FunctionId, level: u32) -> Option<FunctionId> {
    let mut cursor = start;
    for _ in 0..level {
        cursor = functions[cursor].parent?;
    }
    Some(cursor)
}

/// Search the current function's register ring for an existing binding at
/// `funclevel == level` (spec.md §4.3 step 3).
fn find_existing(function: &Function, level: u32) -> Option<RegisterId> {
    function.ring().scan_order().find(|&id| {
        matches!(function.ring().get(id).tenant, Tenant::FuncLevel(l) if l == level)
    })
}

/// `getregptrtofuncstackframe(level)`: resolve the register holding the
/// base address of the ancestor stackframe `level` hops up the lexical
/// parent chain (1 = immediate parent). Emits a fresh load when no
/// existing register or cache slot already holds it.
pub fn get_ancestor_frame_pointer(
    functions: &PrimaryMap<FunctionId, Function>,
    current: FunctionId,
    function: &mut Function,
    level: u32,
    cache_finalized: bool,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<FrameSource> {
    let Some(level) = translate_through_holder(functions, current, level) else {
        return Ok(FrameSource::StackPointerSuffices);
    };
    let level = redirect_to_nearest_holder(functions, current, level);

    if let Some(id) = find_existing(function, level) {
        function.ring_mut().touch(id);
        return Ok(FrameSource::Existing(id));
    }

    let store = crate::variable::VariableStore::new(0);
    let reg = allocate(function.ring_mut(), &store, Criticality::NonCritical, flush)?;

    if cache_finalized && level > 1 {
        let position = function.cache_slot_for_level(level);
        // The cache sits at the bottom of the current frame's fixed
        // fields; slot `position` is `position` GPR-words in.
        let mut imm = ImmediateDescriptor::zero();
        imm.add_literal(position as i64);
        function.emit(Opcode::Load, RegOperands::one(reg), 0, Some(imm));
    } else {
        emit_ancestor_walk(functions, current, function, level, reg, pos, flush)?;
    }

    let r = function.ring_mut().get_mut(reg);
    r.tenant = Tenant::FuncLevel(level);
    r.dirty = false;
    Ok(FrameSource::Fresh(reg))
}

/// Walk the lexical parent chain one level at a time, emitting either a
/// stored-pointer load or, for an address-taken ancestor, the
/// stackframe-id scan loop (spec.md §4.3 step 5, §8 scenario S6).
fn emit_ancestor_walk(
    functions: &PrimaryMap<FunctionId, Function>,
    current: FunctionId,
    function: &mut Function,
    level: u32,
    dest: RegisterId,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let ancestor = nth_ancestor(functions, current, level).ok_or_else(|| {
        CodegenError::internal(pos, format!("ancestor level {} has no corresponding function", level))
    })?;

    if functions[ancestor].its_pointer_is_obtained {
        // Scan previous stackframes comparing each candidate's
        // stackframe-id field against the target ancestor's code
        // address, following the previous-stackframe chain until a
        // match is found (spec.md §4.3 step 5, §8 scenario S6). This
        // needs three live registers: `dest` becomes the running
        // candidate frame pointer and ends the loop holding the match;
        // `target` preserves the afip'd code address across every
        // iteration; `scratch` holds the loaded id and then the
        // comparison difference. All three are locked for the duration
        // so `allocate` can't hand one of them back out mid-sequence.
        let store = crate::variable::VariableStore::new(0);
        function.ring_mut().get_mut(dest).locked = true;
        let target = allocate(function.ring_mut(), &store, Criticality::Critical, flush)?;
        function.ring_mut().get_mut(target).locked = true;
        let scratch = allocate(function.ring_mut(), &store, Criticality::Critical, flush)?;
        function.ring_mut().get_mut(scratch).locked = true;

        let mut afip_imm = ImmediateDescriptor::zero();
        afip_imm.add_term(ImmTerm::FunctionCodeOffset(ancestor));
        function.emit(Opcode::Afip, RegOperands::one(target), 0, Some(afip_imm));

        // The id chain only runs through regular stackframes, starting
        // at the previous one: the current frame itself isn't a
        // candidate, so step up once before the comparison loop begins.
        let mut start_imm = ImmediateDescriptor::zero();
        start_imm.add_literal(RegularField::PreviousStackframe.offset(8) as i64);
        function.emit(Opcode::Load, RegOperands::two(dest, RegisterId::from_u32(0)), 0, Some(start_imm));

        let loop_label = function.declare_label("stackframe_id_scan");
        function.plant_label(loop_label)?;

        let id_imm = ImmediateDescriptor::literal(RegularField::StackframeId.offset(8) as i64);
        function.emit(Opcode::Load, RegOperands::two(scratch, dest), 0, Some(id_imm));
        function.emit(Opcode::Sub, RegOperands::three(scratch, scratch, target), 0, None);

        let found_label = function.declare_label("stackframe_id_found");
        let found_imm = function.reference_label(found_label, pos);
        function.emit(Opcode::JumpIfZero, RegOperands::one(scratch), 0, Some(found_imm));

        let mut next_imm = ImmediateDescriptor::zero();
        next_imm.add_literal(RegularField::PreviousStackframe.offset(8) as i64);
        function.emit(Opcode::Load, RegOperands::two(dest, dest), 0, Some(next_imm));

        let loop_imm = function.reference_label(loop_label, pos);
        function.emit(Opcode::Jump, RegOperands::none(), 0, Some(loop_imm));

        function.plant_label(found_label)?;

        function.ring_mut().get_mut(scratch).locked = false;
        function.ring_mut().get_mut(target).locked = false;
        function.ring_mut().get_mut(dest).locked = false;
    } else {
        // Plain case: load the stored parent-frame pointer out of the
        // current frame.
        let mut imm = ImmediateDescriptor::zero();
        imm.add_literal(RegularField::ParentStackframe.offset(8) as i64);
        function.emit(Opcode::Load, RegOperands::two(dest, RegisterId::from_u32(0)), 0, Some(imm));
    }
    Ok(())
}

/// `cachestackframepointers()`: run once at function entry. For each
/// cached-stackframe entry that can't be recovered cheaply, load the
/// ancestor pointer and mark the register dirty so the next flush writes
/// it into the reserved cache slot. Fails with *resource-exceeded* if the
/// total cache size would exceed `Config::max_stackframe_pointer_cache_size`
/// (spec.md §4.3, §8 property 3).
pub fn cache_stackframe_pointers(
    functions: &PrimaryMap<FunctionId, Function>,
    current: FunctionId,
    function: &mut Function,
    cfg: &Config,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let total = function.cached_stackframes.len() as u32 * cfg.sizeofgpr as u32;
    if total > cfg.max_stackframe_pointer_cache_size {
        return Err(CodegenError::resource(
            pos,
            format!(
                "function nested too deep: stackframe-pointer cache of {} bytes exceeds the {} byte limit",
                total, cfg.max_stackframe_pointer_cache_size
            ),
        ));
    }
    let levels: Vec<u32> = function.cached_stackframes.iter().map(|c| c.level).collect();
    for level in levels {
        // Level 1 (the immediate parent) is always recoverable cheaply
        // from the current frame's own parent-stackframe field, so only
        // levels > 1 need an explicit cache load here.
        if level == 1 {
            continue;
        }
        let source = get_ancestor_frame_pointer(functions, current, function, level, false, pos, flush)?;
        if let FrameSource::Fresh(reg) = source {
            function.ring_mut().get_mut(reg).dirty = true;
        }
    }
    function.stackframe_pointer_cache_size = Some(total);
    Ok(())
}
