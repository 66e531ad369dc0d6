//! The per-evaluator argument push stack (spec.md §3 Argument entity).
//!
//! Arguments are identified across firstpass/secondpass by their source
//! position, since the evaluator's in-memory stack itself only lives for
//! the duration of one expression (spec.md §3 Lifecycle, §9 Design Notes
//! "Two-pass identity across lists -> stable ids").

use corec_entity::PrimaryMap;

use crate::interner::Symbol;
use crate::ir::entities::ArgumentId;
use crate::result::SourcePosition;
use crate::variable::VariableId;

/// One pushed call argument (spec.md §3 Argument entity).
#[derive(Clone, Copy, Debug)]
pub struct Argument {
    /// Where in the source this argument was parsed; the stable id firstpass
    /// and secondpass match records by.
    pub source_pos: SourcePosition,
    /// The variable as originally evaluated.
    pub original: VariableId,
    /// The variable actually passed, after a possible duplication (e.g. to
    /// preserve a volatile value across argument evaluation order).
    pub actual: VariableId,
    /// The type string under which this argument was pushed, for signature
    /// composition.
    pub type_name: Symbol,
    /// Bitselect saved at push time, in case `actual` is later replaced.
    pub bitselect: u64,
    /// Set by firstpass when the matched parameter is an output parameter.
    pub is_to_be_output: bool,
    /// Set by firstpass when the matched parameter is by-reference.
    pub is_to_be_passed_by_ref: bool,
    /// Set when this argument stands in for the callee's return variable
    /// (an implicit extra argument for large/aggregate returns).
    pub to_be_used_as_return_variable: bool,
}

impl Argument {
    /// A freshly pushed argument with no firstpass flags set yet.
    pub fn new(source_pos: SourcePosition, var: VariableId, type_name: Symbol) -> Self {
        Self {
            source_pos,
            original: var,
            actual: var,
            type_name,
            bitselect: 0,
            is_to_be_output: false,
            is_to_be_passed_by_ref: false,
            to_be_used_as_return_variable: false,
        }
    }
}

/// The evaluator's push-order argument list for one call site (spec.md
/// §4.5 "maintains a push-order argument list"). Backed by the same
/// arena-plus-stable-index convention the rest of the core's entities use,
/// even though an `ArgumentStack` only lives for one call site: cross-pass
/// identity is carried by `source_pos`, not by `ArgumentId` continuity.
#[derive(Default)]
pub struct ArgumentStack {
    args: PrimaryMap<ArgumentId, Argument>,
}

impl ArgumentStack {
    /// An empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an argument, in evaluation order.
    pub fn push(&mut self, arg: Argument) -> ArgumentId {
        self.args.push(arg)
    }

    /// Number of arguments pushed so far.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Is the stack empty?
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Look up a pushed argument by id.
    pub fn get(&self, id: ArgumentId) -> &Argument {
        &self.args[id]
    }

    /// Iterate arguments in push order.
    pub fn iter(&self) -> impl Iterator<Item = &Argument> {
        self.args.values()
    }

    /// Iterate arguments mutably, in push order (firstpass flag-setting).
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Argument> {
        self.args.values_mut()
    }

    /// Find the record matching `pos`, the stable cross-pass id.
    pub fn find_by_pos(&self, pos: SourcePosition) -> Option<&Argument> {
        self.args.values().find(|a| a.source_pos == pos)
    }

    /// Find the record matching `pos`, mutably.
    pub fn find_by_pos_mut(&mut self, pos: SourcePosition) -> Option<&mut Argument> {
        self.args.values_mut().find(|a| a.source_pos == pos)
    }

    /// Drop every pushed argument, ready for the next call site.
    pub fn clear(&mut self) {
        self.args = PrimaryMap::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interner::Interner;
    use crate::ir::entities::FunctionId;
    use crate::variable::VariableStore;

    #[test]
    fn push_order_is_preserved() {
        let mut store = VariableStore::new(1 << 16);
        let mut it = Interner::new();
        let f = FunctionId::from_u32(0);
        let ty = it.intern("int");
        let a = store.new_local(f, it.intern("a"), 0, 4, None);
        let b = store.new_local(f, it.intern("b"), 4, 4, None);

        let mut stack = ArgumentStack::new();
        stack.push(Argument::new(SourcePosition::new(0, 1, 1), a, ty));
        stack.push(Argument::new(SourcePosition::new(5, 1, 6), b, ty));

        let collected: Vec<VariableId> = stack.iter().map(|arg| arg.original).collect();
        assert_eq!(collected, vec![a, b]);
    }

    #[test]
    fn find_by_pos_matches_the_stable_cross_pass_id() {
        let mut store = VariableStore::new(1 << 16);
        let mut it = Interner::new();
        let f = FunctionId::from_u32(0);
        let ty = it.intern("int");
        let a = store.new_local(f, it.intern("a"), 0, 4, None);
        let pos = SourcePosition::new(3, 1, 4);

        let mut stack = ArgumentStack::new();
        stack.push(Argument::new(pos, a, ty));
        stack.find_by_pos_mut(pos).unwrap().is_to_be_passed_by_ref = true;

        assert!(stack.find_by_pos(pos).unwrap().is_to_be_passed_by_ref);
        assert!(stack.find_by_pos(SourcePosition::new(99, 1, 100)).is_none());
    }
}
