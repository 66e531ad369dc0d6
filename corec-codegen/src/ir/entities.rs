//! Entity references used to cross-link functions, variables, registers,
//! instructions and labels without raw pointers (spec.md Design Notes:
//! "Pointer-heavy source graph -> arena + stable index").
//!
//! Every reference is a `u32`-sized newtype wrapping an index into the
//! `PrimaryMap` that owns the referent, following the same convention as
//! `cranelift-codegen::ir::entities` (`Ebb`, `Value`, `Inst`, ...).

use core::fmt;

/// A reference to a `Function` in the compilation unit's function arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(u32);
corec_entity::entity_impl!(FunctionId, "fn");

/// A reference to a `Variable` in the compilation unit's variable arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(u32);
corec_entity::entity_impl!(VariableId, "v");

/// A reference to an `Instruction` within one function's instruction list.
/// Instruction ids are only meaningful relative to the function that owns
/// them (spec.md §3 Lifecycle: instructions are created only in secondpass).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(u32);
corec_entity::entity_impl!(InstId, "inst");

/// A reference to a virtual register within one function's register ring.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterId(u32);
corec_entity::entity_impl!(RegisterId, "r");

/// A reference to a label within one function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(u32);
corec_entity::entity_impl!(LabelId, "L");

/// A reference to an entry in a function's cached-stackframes list.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CachedFrameId(u32);
corec_entity::entity_impl!(CachedFrameId, "cf");

/// A reference to a pushed `Argument` on the expression evaluator's stack.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArgumentId(u32);
corec_entity::entity_impl!(ArgumentId, "arg");

/// Any of the entities defined in this module, for error reporting that
/// wants to name the offending entity generically.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub enum AnyEntity {
    /// A function.
    Function(FunctionId),
    /// A variable.
    Variable(VariableId),
    /// An instruction.
    Inst(InstId),
    /// A virtual register.
    Register(RegisterId),
    /// A label.
    Label(LabelId),
}

impl fmt::Display for AnyEntity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            AnyEntity::Function(r) => r.fmt(f),
            AnyEntity::Variable(r) => r.fmt(f),
            AnyEntity::Inst(r) => r.fmt(f),
            AnyEntity::Register(r) => r.fmt(f),
            AnyEntity::Label(r) => r.fmt(f),
        }
    }
}

impl fmt::Debug for AnyEntity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        (self as &dyn fmt::Display).fmt(f)
    }
}
