//! Register classification, allocation, and the flush-all / overlap
//! policies (spec.md §4.2).
//!
//! Actually writing a flushed register's value back to memory requires
//! resolving a region base address, which is the Stackframe Pointer
//! Engine's job (spec.md §4.3) composed with the Memory Load/Store
//! Lowering routines (spec.md §4.4) -- both live above this module. So
//! every operation here that needs to flush a register takes the flush
//! action as a callback instead of performing it directly; `memory.rs`
//! supplies the real one, tests supply a recording fake.

use crate::result::{CodegenError, CodegenResult, SourcePosition};
use crate::variable::{VariableId, VariableStore};

use super::register::Tenant;
use super::ring::RegisterRing;
use crate::ir::entities::RegisterId;

/// Whether a requested register must be critical (cheap to flush, spec.md
/// §4.2) or may be anything.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Criticality {
    Critical,
    NonCritical,
}

/// A callback invoked to flush one dirty register's value out to memory.
/// Must not change the register's `dirty` bit or tenant itself -- the
/// allocator does that once the callback returns successfully.
pub type FlushFn<'a> = dyn FnMut(&mut RegisterRing, RegisterId) -> CodegenResult<()> + 'a;

/// Is `id` critical right now (spec.md §4.2 Classification)? Critical iff
/// free, clean, bound to a readonly variable, bound to a non-bitselected,
/// non-dereference variable (i.e. a plain stack-local), or bound to the
/// return address / an ancestor-frame pointer / the global or string
/// region. `this` and `retvar` pointers are excluded from that last
/// carve-out and so are only critical while clean.
pub fn classify(ring: &RegisterRing, store: &VariableStore, id: RegisterId) -> Criticality {
    let r = ring.get(id);
    if !r.dirty {
        return Criticality::Critical;
    }
    match r.tenant {
        Tenant::Free | Tenant::StackPointer => Criticality::Critical,
        Tenant::ReturnAddress | Tenant::FuncLevel(_) | Tenant::GlobalRegionAddr | Tenant::StringRegionAddr => {
            Criticality::Critical
        }
        Tenant::ThisAddr | Tenant::RetvarAddr => Criticality::NonCritical,
        Tenant::Variable { var, bitselect, .. } => {
            if bitselect != 0 {
                Criticality::NonCritical
            } else if store.is_readonly(var) {
                Criticality::Critical
            } else if store.get(var).is_dereference() {
                Criticality::NonCritical
            } else {
                Criticality::Critical
            }
        }
    }
}

/// Minimum number of unlocked critical registers the allocator must be
/// able to show at every entry point (spec.md §4.2 Invariant).
const MIN_UNLOCKED_CRITICAL: usize = 2;

/// Count unlocked, unreserved, critical registers currently in the ring.
fn unlocked_critical_count(ring: &RegisterRing, store: &VariableStore) -> usize {
    ring.scan_order()
        .filter(|&id| {
            let r = ring.get(id);
            !r.locked && !r.reserved && classify(ring, store, id) == Criticality::Critical
        })
        .count()
}

/// Promote non-critical registers to critical, by flushing them, until at
/// least `MIN_UNLOCKED_CRITICAL` unlocked critical registers exist
/// (spec.md §4.2 Invariant).
pub fn ensure_critical_minimum(
    ring: &mut RegisterRing,
    store: &VariableStore,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    while unlocked_critical_count(ring, store) < MIN_UNLOCKED_CRITICAL {
        let candidate = ring
            .scan_order()
            .find(|&id| {
                let r = ring.get(id);
                !r.locked && !r.reserved && classify(ring, store, id) == Criticality::NonCritical
            });
        let Some(id) = candidate else {
            return Err(CodegenError::resource(
                SourcePosition::default(),
                "register exhaustion while restoring the critical-register minimum",
            ));
        };
        if ring.get(id).dirty {
            flush(ring, id)?;
        }
        let r = ring.get_mut(id);
        r.dirty = false;
        r.tenant = Tenant::Free;
        r.size = 0;
        ring.sink(id);
    }
    Ok(())
}

/// Run the allocation algorithm of spec.md §4.2: scan from the top of the
/// LRU ring, skipping locked and reserved slots, and return the first
/// register suitable for reuse, having ensured the critical-register
/// invariant and flushed the winner if it was dirty.
pub fn allocate(
    ring: &mut RegisterRing,
    store: &VariableStore,
    want: Criticality,
    flush: &mut FlushFn,
) -> CodegenResult<RegisterId> {
    ensure_critical_minimum(ring, store, flush)?;

    let order: Vec<RegisterId> = ring.scan_order().collect();
    for id in order {
        let r = ring.get(id);
        if r.locked || r.reserved {
            continue;
        }
        let criticality = classify(ring, store, id);
        if criticality == Criticality::NonCritical && want == Criticality::Critical {
            // Prevents recursive allocation during a flush: this slot
            // would itself need another register allocated to flush it.
            continue;
        }
        if want == Criticality::NonCritical {
            ensure_critical_minimum(ring, store, flush)?;
        }
        if r.dirty {
            flush(ring, id)?;
        }
        let r = ring.get_mut(id);
        r.dirty = false;
        r.tenant = Tenant::Free;
        r.size = 0;
        ring.touch(id);
        return Ok(id);
    }
    Err(CodegenError::resource(
        SourcePosition::default(),
        "register exhaustion: every slot is locked or reserved",
    ))
}

/// The five `flushanddiscardallreg` modes (spec.md §4.2 Flush-all
/// semantics).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushAllMode {
    /// Flush every dirty register, then discard every binding.
    FlushAndDiscardAll,
    /// Flush every dirty register; keep all bindings (conditional
    /// branches, which may not take the jump).
    FlushOnly,
    /// Discard every variable binding without flushing (block exit: the
    /// locals region is about to go out of scope anyway).
    DiscardLocalsWithoutFlushing,
    /// Like `FlushAndDiscardAll`, but registers holding the return address
    /// are left bound (function return).
    KeepReturnAddress,
    /// Like `FlushAndDiscardAll`, but registers holding an ancestor-frame
    /// pointer are left bound (before a frame-pointer restore).
    KeepFuncLevel,
}

/// Run `flushanddiscardallreg` in the given mode (spec.md §4.2, §8
/// property 4).
pub fn flush_and_discard_all(ring: &mut RegisterRing, mode: FlushAllMode, flush: &mut FlushFn) -> CodegenResult<()> {
    let ids: Vec<RegisterId> = ring.all().collect();
    for id in ids {
        let r = ring.get(id);
        if matches!(r.tenant, Tenant::StackPointer) {
            continue;
        }
        let keep = match mode {
            FlushAllMode::DiscardLocalsWithoutFlushing => !matches!(r.tenant, Tenant::Variable { .. }),
            FlushAllMode::KeepReturnAddress => matches!(r.tenant, Tenant::ReturnAddress),
            FlushAllMode::KeepFuncLevel => matches!(r.tenant, Tenant::FuncLevel(_)),
            FlushAllMode::FlushAndDiscardAll | FlushAllMode::FlushOnly => false,
        };
        if keep {
            continue;
        }
        let dirty = ring.get(id).dirty;
        let should_flush = dirty
            && !matches!(
                (mode, ring.get(id).tenant),
                (FlushAllMode::DiscardLocalsWithoutFlushing, _)
            );
        if should_flush {
            flush(ring, id)?;
        }
        if mode != FlushAllMode::FlushOnly {
            let r = ring.get_mut(id);
            r.clear();
        } else {
            ring.get_mut(id).dirty = false;
        }
    }
    Ok(())
}

/// The three `discardoverlappingreg` policies (spec.md §4.2
/// Overlap-handling).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// Flush (if dirty) then discard every overlapping register,
    /// including one that matches exactly.
    DiscardAfterFlush,
    /// Flush dirty overlapping registers but leave them bound.
    FlushWithoutDiscard,
    /// Flush and discard every overlapping register except one that
    /// matches `(var, offset, size, bitselect)` exactly, which is left
    /// untouched.
    FlushAndDiscardExceptExact,
}

/// Find every register whose binding overlaps `(var, offset, size)` and
/// apply `policy` to it (spec.md §4.2 Overlap-handling, §8 properties 1
/// and 7). Must run before `getregforvar`'s own lookup, per spec.md §5
/// ordering guarantees.
pub fn discard_overlapping(
    ring: &mut RegisterRing,
    var: VariableId,
    offset: u32,
    size: u32,
    bitselect: u64,
    policy: OverlapPolicy,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let ids: Vec<RegisterId> = ring.all().collect();
    for id in ids {
        if !ring.get(id).overlaps(var, offset, size) {
            continue;
        }
        if policy == OverlapPolicy::FlushAndDiscardExceptExact && ring.get(id).matches(var, offset, size, bitselect) {
            continue;
        }
        if ring.get(id).dirty {
            flush(ring, id)?;
        }
        match policy {
            OverlapPolicy::FlushWithoutDiscard => {
                ring.get_mut(id).dirty = false;
            }
            OverlapPolicy::DiscardAfterFlush | OverlapPolicy::FlushAndDiscardExceptExact => {
                ring.get_mut(id).clear();
                ring.sink(id);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interner::Interner;
    use crate::ir::entities::FunctionId;

    fn noop_flush<'a>() -> Box<FlushFn<'a>> {
        Box::new(|_ring: &mut RegisterRing, _id: RegisterId| Ok(()))
    }

    #[test]
    fn free_registers_are_critical() {
        let ring = RegisterRing::new(4);
        let store = VariableStore::new(1 << 16);
        let id = ring.scan_order().next().unwrap();
        assert_eq!(classify(&ring, &store, id), Criticality::Critical);
    }

    #[test]
    fn dirty_local_binding_is_critical_clean_or_not_dereference() {
        let mut ring = RegisterRing::new(4);
        let mut store = VariableStore::new(1 << 16);
        let mut it = Interner::new();
        let name = it.intern("x");
        let f = FunctionId::from_u32(0);
        let v = store.new_local(f, name, 0, 4, None);
        let id = ring.scan_order().next().unwrap();
        ring.get_mut(id).bind_variable(v, 0, 4, 0);
        ring.get_mut(id).dirty = true;
        assert_eq!(classify(&ring, &store, id), Criticality::Critical);
    }

    #[test]
    fn dirty_dereference_binding_is_non_critical() {
        let mut ring = RegisterRing::new(4);
        let mut store = VariableStore::new(1 << 16);
        let mut it = Interner::new();
        let name = it.intern("p");
        let f = FunctionId::from_u32(0);
        let p = store.new_local(f, name, 0, 8, None);
        let deref = store
            .dereference(f, &mut it, p, None, 4, Default::default())
            .unwrap();
        let id = ring.scan_order().next().unwrap();
        ring.get_mut(id).bind_variable(deref, 0, 4, 0);
        ring.get_mut(id).dirty = true;
        assert_eq!(classify(&ring, &store, id), Criticality::NonCritical);
    }

    #[test]
    fn flush_and_discard_all_clears_every_non_stackpointer_register() {
        let mut ring = RegisterRing::new(4);
        for id in ring.scan_order().collect::<Vec<_>>() {
            ring.get_mut(id).tenant = Tenant::GlobalRegionAddr;
            ring.get_mut(id).dirty = true;
        }
        let mut flush = noop_flush();
        flush_and_discard_all(&mut ring, FlushAllMode::FlushAndDiscardAll, &mut *flush).unwrap();
        for id in ring.scan_order() {
            assert!(matches!(ring.get(id).tenant, Tenant::Free));
        }
    }

    #[test]
    fn keep_return_address_mode_preserves_only_that_tenant() {
        let mut ring = RegisterRing::new(4);
        let ids: Vec<_> = ring.scan_order().collect();
        ring.get_mut(ids[0]).tenant = Tenant::ReturnAddress;
        ring.get_mut(ids[1]).tenant = Tenant::GlobalRegionAddr;
        let mut flush = noop_flush();
        flush_and_discard_all(&mut ring, FlushAllMode::KeepReturnAddress, &mut *flush).unwrap();
        assert!(matches!(ring.get(ids[0]).tenant, Tenant::ReturnAddress));
        assert!(matches!(ring.get(ids[1]).tenant, Tenant::Free));
    }

    #[test]
    fn ensure_critical_minimum_flushes_non_critical_registers() {
        let mut ring = RegisterRing::new(4);
        let mut store = VariableStore::new(1 << 16);
        let mut it = Interner::new();
        let f = FunctionId::from_u32(0);
        let ids: Vec<_> = ring.scan_order().collect();
        for &id in &ids {
            let name = it.fresh_tempvar();
            let p = store.new_local(f, name, 0, 8, None);
            let deref = store
                .dereference(f, &mut it, p, None, 4, Default::default())
                .unwrap();
            ring.get_mut(id).bind_variable(deref, 0, 4, 0);
            ring.get_mut(id).dirty = true;
        }
        let mut flushed = Vec::new();
        let mut flush = |_: &mut RegisterRing, id: RegisterId| {
            flushed.push(id);
            Ok(())
        };
        ensure_critical_minimum(&mut ring, &store, &mut flush).unwrap();
        assert!(flushed.len() >= MIN_UNLOCKED_CRITICAL);
        assert_eq!(unlocked_critical_count(&ring, &store), MIN_UNLOCKED_CRITICAL.max(unlocked_critical_count(&ring, &store)));
    }
}
