//! Labels and their resolution (spec.md §3 Label entity, §4.8 Instruction
//! Emitter, testable property 5).
//!
//! A label is planted at some instruction position within the function that
//! owns it. Every reference builds an `ImmTerm::LabelTarget`, resolved once
//! the label's final instruction id is known -- which happens no later than
//! the end of the emitting function (spec.md §4.8). References recorded
//! before the label is planted go on a patch list so `check_all_resolved`
//! can catch one that's never planted.

use crate::ir::entities::{InstId, LabelId};
use crate::ir::immediate::{ImmTerm, ImmediateDescriptor};
use crate::result::{CodegenError, CodegenResult, SourcePosition};
use corec_entity::PrimaryMap;

/// One label within a function: a name (kept only for diagnostics) and,
/// once planted, the instruction it resolves to.
#[derive(Clone, Debug)]
pub struct Label {
    name: Box<str>,
    target: Option<InstId>,
}

/// One reference to a label recorded before it was planted, kept only to
/// report a useful position if the label is never planted.
#[derive(Clone, Copy, Debug)]
struct PendingUse {
    label: LabelId,
    pos: SourcePosition,
}

/// Per-function table of labels and their outstanding forward references.
#[derive(Default)]
pub struct LabelTable {
    labels: PrimaryMap<LabelId, Label>,
    pending: Vec<PendingUse>,
}

impl LabelTable {
    /// Create a new, unplanted label.
    pub fn declare(&mut self, name: &str) -> LabelId {
        self.labels.push(Label {
            name: name.into(),
            target: None,
        })
    }

    /// Plant `label` at `at`. A label may only be planted once.
    pub fn plant(&mut self, label: LabelId, at: InstId) -> CodegenResult<()> {
        let entry = &mut self.labels[label];
        if entry.target.is_some() {
            return Err(CodegenError::internal(
                SourcePosition::default(),
                format!("label {} planted twice", entry.name),
            ));
        }
        entry.target = Some(at);
        Ok(())
    }

    /// Build an immediate descriptor referencing `label`, used from the
    /// instruction that will carry it. The descriptor is a `LabelTarget`
    /// term either way; if the label isn't planted yet the reference is
    /// also recorded as pending so an unresolved one can be caught at
    /// function close.
    pub fn reference(&mut self, label: LabelId, pos: SourcePosition) -> ImmediateDescriptor {
        if self.labels[label].target.is_none() {
            self.pending.push(PendingUse { label, pos });
        }
        let mut imm = ImmediateDescriptor::zero();
        imm.add_term(ImmTerm::LabelTarget(label));
        imm
    }

    /// Called at function close: every label referenced before being
    /// planted must by now have a target, else this is an unresolved
    /// forward reference (spec.md §8 property 5).
    pub fn check_all_resolved(&self) -> CodegenResult<()> {
        for pending in &self.pending {
            let label = &self.labels[pending.label];
            if label.target.is_none() {
                return Err(CodegenError::internal(
                    pending.pos,
                    format!("label {} never planted", label.name),
                ));
            }
        }
        Ok(())
    }

    /// The instruction a planted label resolves to, if any.
    pub fn target_of(&self, label: LabelId) -> Option<InstId> {
        self.labels[label].target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backward_reference_builds_a_label_target_term() {
        let mut table = LabelTable::default();
        let l = table.declare("L1");
        table.plant(l, InstId::from_u32(3)).unwrap();
        let imm = table.reference(l, SourcePosition::default());
        assert_eq!(imm.terms(), &[ImmTerm::LabelTarget(l)]);
        assert!(table.check_all_resolved().is_ok());
    }

    #[test]
    fn forward_reference_resolves_after_planting() {
        let mut table = LabelTable::default();
        let l = table.declare("L1");
        table.reference(l, SourcePosition::default());
        assert!(table.check_all_resolved().is_err());
        table.plant(l, InstId::from_u32(5)).unwrap();
        assert!(table.check_all_resolved().is_ok());
        assert_eq!(table.target_of(l), Some(InstId::from_u32(5)));
    }

    #[test]
    fn planting_twice_fails() {
        let mut table = LabelTable::default();
        let l = table.declare("L1");
        table.plant(l, InstId::from_u32(0)).unwrap();
        assert!(table.plant(l, InstId::from_u32(1)).is_err());
    }
}
