//! Core code generator for a nested-function, closure-walking C-like
//! language (spec.md §1 Purpose): lowers already-parsed expressions and
//! statements into three-address IR, handling register allocation,
//! stackframe layout, and function calls. Parsing, type resolution, and
//! symbol tables are out of scope and are reached only through the trait
//! boundary in `external`/`ty`.
#![warn(missing_docs, unused_import_braces)]

pub mod call;
pub mod config;
pub mod eval;
pub mod external;
pub mod interner;
pub mod ir;
pub mod memory;
pub mod regalloc;
pub mod result;
pub mod stackframe;
pub mod ty;
pub mod variable;

pub mod asm;

pub use crate::config::Config;
pub use crate::eval::{eval_expression, EvalCtx};
pub use crate::result::{CodegenError, CodegenResult, SourcePosition};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
