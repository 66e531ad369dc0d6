//! The Expression Evaluator and its collaborators (spec.md §2 component 5,
//! §4.5): operator/call dispatch, the argument push stack, short-circuit
//! lowering helpers, and the evaluator proper.

pub mod argument;
pub mod dispatch;
pub mod evaluator;
pub mod shortcircuit;

pub use argument::{Argument, ArgumentStack};
pub use dispatch::{call_with_reserved_registers_saved, compose_signature, resolve_call, resolve_method_call, CallTarget, CallTargetKind};
pub use evaluator::{eval_expression, EvalCtx};
