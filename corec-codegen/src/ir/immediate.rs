//! Deferred immediate values (spec.md §3 Instruction entity, Design Notes
//! "Deferred immediates -> algebraic term lists").
//!
//! The firstpass emits code before final layout sizes (a function's locals
//! region, shared region, stackframe-pointer cache) are known. Rather than
//! blocking on that information, every immediate operand is represented as
//! a small sum of symbolic terms and only reduced to a concrete integer once
//! by an external layout-finalization sweep (spec.md §6 Outputs).

use crate::ir::entities::{FunctionId, InstId, LabelId};

/// One term of a deferred immediate. The final immediate value is the sum
/// of all of a `ImmediateDescriptor`'s terms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImmTerm {
    /// A literal integer contribution, known at emission time.
    Literal(i64),

    /// The finalized size of `function`'s locals region.
    LocalsSize(FunctionId),

    /// The finalized size of `function`'s shared region (nonzero only for
    /// stackframe holders).
    SharedRegionSize(FunctionId),

    /// The finalized size of `function`'s stackframe-pointer cache.
    StackframePointerCacheSize(FunctionId),

    /// The offset of a named shared-region user within the owning
    /// stackframe holder's shared region.
    SharedRegionOffset(FunctionId),

    /// The code offset (address) of `function`.
    FunctionCodeOffset(FunctionId),

    /// An offset-to-function value: the code offset of `function` minus
    /// the code offset of the instruction holding this immediate, used for
    /// PC-relative function references.
    OffsetToFunction(FunctionId),

    /// The code offset of the global data region.
    GlobalRegionCodeOffset,

    /// The code offset of the string constant region.
    StringRegionCodeOffset,

    /// The code offset of a named instruction within the current function.
    InstructionCodeOffset(InstId),

    /// The code offset of wherever `label` ultimately resolves to. Kept
    /// distinct from `InstructionCodeOffset` because a label use recorded
    /// before the label is planted doesn't yet know its target instruction
    /// (spec.md §4.8 "forward references are recorded in a patch list");
    /// the layout finalization sweep resolves this by first consulting the
    /// label table, then the resolved instruction's code offset.
    LabelTarget(LabelId),
}

/// A deferred immediate: the sum of its terms, finalized once all of the
/// referenced sizes/offsets are known.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImmediateDescriptor {
    terms: Vec<ImmTerm>,
}

impl ImmediateDescriptor {
    /// An immediate that is just a literal integer.
    pub fn literal(n: i64) -> Self {
        Self {
            terms: vec![ImmTerm::Literal(n)],
        }
    }

    /// The empty immediate, equal to zero.
    pub fn zero() -> Self {
        Self { terms: Vec::new() }
    }

    /// Append a term to this immediate's sum.
    pub fn add_term(&mut self, term: ImmTerm) -> &mut Self {
        self.terms.push(term);
        self
    }

    /// Fold a literal into the descriptor, combining it with any existing
    /// `Literal` term instead of growing the term list.
    pub fn add_literal(&mut self, n: i64) -> &mut Self {
        if n == 0 {
            return self;
        }
        for term in &mut self.terms {
            if let ImmTerm::Literal(existing) = term {
                *existing += n;
                return self;
            }
        }
        self.terms.push(ImmTerm::Literal(n));
        self
    }

    /// Does this descriptor resolve to the literal value zero, i.e. it has
    /// no terms at all (the common case that lets a load/store lowering
    /// routine skip emitting an `addi` and emit a plain `cpy` instead, per
    /// spec.md §4.4)?
    pub fn is_statically_zero(&self) -> bool {
        self.terms.is_empty()
    }

    /// Iterate the terms making up this immediate's sum.
    pub fn terms(&self) -> &[ImmTerm] {
        &self.terms
    }

    /// Resolve this immediate to a concrete value, given finalized sizes
    /// and code offsets. `fn_of_inst` resolves an `InstId` to `(function,
    /// offset-within-function)` so `InstructionCodeOffset` and
    /// `OffsetToFunction` can be computed relative to the instruction that
    /// holds this immediate.
    pub fn resolve<F>(&self, current_code_offset: i64, mut lookup: F) -> i64
    where
        F: FnMut(ImmTerm) -> i64,
    {
        self.terms
            .iter()
            .map(|&term| match term {
                ImmTerm::Literal(n) => n,
                ImmTerm::OffsetToFunction(f) => lookup(ImmTerm::FunctionCodeOffset(f)) - current_code_offset,
                other => lookup(other),
            })
            .sum()
    }
}

impl From<i64> for ImmediateDescriptor {
    fn from(n: i64) -> Self {
        Self::literal(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::entities::FunctionId;

    #[test]
    fn zero_is_statically_zero() {
        assert!(ImmediateDescriptor::zero().is_statically_zero());
        assert!(!ImmediateDescriptor::literal(1).is_statically_zero());
    }

    #[test]
    fn literal_folding_does_not_grow_term_list() {
        let mut imm = ImmediateDescriptor::zero();
        imm.add_literal(3).add_literal(4);
        assert_eq!(imm.terms().len(), 1);
        assert_eq!(
            imm.resolve(0, |_| unreachable!("no symbolic terms")),
            7
        );
    }

    #[test]
    fn resolves_sum_of_terms() {
        let f = FunctionId::from_u32(0);
        let mut imm = ImmediateDescriptor::zero();
        imm.add_literal(8);
        imm.add_term(ImmTerm::LocalsSize(f));
        let resolved = imm.resolve(0, |term| match term {
            ImmTerm::LocalsSize(_) => 24,
            _ => unreachable!(),
        });
        assert_eq!(resolved, 32);
    }
}
