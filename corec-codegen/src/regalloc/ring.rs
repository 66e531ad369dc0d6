//! The per-function register ring: a circular list acting as an LRU
//! (spec.md §3 Virtual Register entity: "Registers form a circular list
//! acting as an LRU; top = least-recently-used").

use std::collections::VecDeque;

use corec_entity::PrimaryMap;

use crate::ir::entities::RegisterId;

use super::register::{Tenant, VirtualRegister};

/// A function's register file: `gpr_count` virtual registers, register 0
/// fixed as the stack pointer, plus the LRU order used to pick allocation
/// candidates (spec.md §4.2).
pub struct RegisterRing {
    registers: PrimaryMap<RegisterId, VirtualRegister>,
    /// LRU order, front = top = least-recently-used, back = bottom =
    /// most-recently-used. Register 0 (the stack pointer) never appears
    /// here.
    order: VecDeque<RegisterId>,
}

impl RegisterRing {
    /// Build a ring of `gpr_count` registers for a new function.
    pub fn new(gpr_count: usize) -> Self {
        assert!(gpr_count >= 2, "need at least the stack pointer and one GPR");
        let mut registers = PrimaryMap::with_capacity(gpr_count);
        let mut order = VecDeque::with_capacity(gpr_count - 1);
        registers.push(VirtualRegister::stack_pointer());
        for _ in 1..gpr_count {
            let id = registers.push(VirtualRegister::free());
            order.push_back(id);
        }
        Self { registers, order }
    }

    /// Borrow a register.
    pub fn get(&self, id: RegisterId) -> &VirtualRegister {
        &self.registers[id]
    }

    /// Mutably borrow a register.
    pub fn get_mut(&mut self, id: RegisterId) -> &mut VirtualRegister {
        &mut self.registers[id]
    }

    /// Total register count, including the stack pointer.
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    /// Mark `id` as just-used: move it to the bottom (most-recently-used
    /// end) of the LRU order. Corresponds to the source's
    /// `setregtothebottom`.
    pub fn touch(&mut self, id: RegisterId) {
        if let Some(pos) = self.order.iter().position(|&r| r == id) {
            self.order.remove(pos);
        }
        self.order.push_back(id);
    }

    /// Mark `id` as immediately reusable: move it to the top (least-
    /// recently-used end) of the LRU order, so the next allocation scan
    /// finds it first. Corresponds to the source's `setregtothetop`.
    pub fn sink(&mut self, id: RegisterId) {
        if let Some(pos) = self.order.iter().position(|&r| r == id) {
            self.order.remove(pos);
        }
        self.order.push_front(id);
    }

    /// Iterate register ids from the top (least-recently-used) to the
    /// bottom, the order the allocator scans in (spec.md §4.2 "Scan from
    /// the top").
    pub fn scan_order(&self) -> impl Iterator<Item = RegisterId> + '_ {
        self.order.iter().copied()
    }

    /// Iterate every register, including the stack pointer, in id order.
    pub fn all(&self) -> impl Iterator<Item = RegisterId> + '_ {
        self.registers.keys()
    }

    /// Count of registers that are neither locked nor reserved nor the
    /// stack pointer and are currently free and clean -- used by the
    /// allocator's "at least two unlocked critical registers" invariant
    /// check for the cheap common case (spec.md §4.2).
    pub fn free_unlocked_count(&self) -> usize {
        self.order
            .iter()
            .filter(|&&id| {
                let r = &self.registers[id];
                !r.locked && !r.reserved && matches!(r.tenant, Tenant::Free)
            })
            .count()
    }
}
