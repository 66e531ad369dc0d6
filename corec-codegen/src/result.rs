//! Typed errors raised by the core, each carrying the source position at
//! which the problem was detected (spec.md §7).
//!
//! The core never recovers locally: every fallible operation returns a
//! `CodegenResult<T>`, and the first error encountered aborts the
//! compilation unit. This mirrors `cranelift-codegen::result::CodegenError`
//! in shape (a `Fail`-deriving enum plus a `CodegenResult` alias) but the
//! variant set follows spec.md's five error kinds instead of Cranelift's
//! verifier/legalizer errors.

use core::fmt;
use failure_derive::Fail;

/// A position in the source text being compiled, as handed to the core by
/// the surrounding compiler's `current-source-position` cursor (spec.md §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, PartialOrd, Ord)]
pub struct SourcePosition {
    /// Byte offset into the translation unit.
    pub offset: u32,
    /// 1-based line number, for diagnostics.
    pub line: u32,
    /// 1-based column number, for diagnostics.
    pub column: u32,
}

impl SourcePosition {
    /// Construct a new source position.
    pub fn new(offset: u32, line: u32, column: u32) -> Self {
        Self {
            offset,
            line,
            column,
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The five error kinds surfaced by the core (spec.md §7).
#[derive(Fail, Debug)]
pub enum CodegenError {
    /// Malformed assembly operand, missing delimiter, unknown opcode, or
    /// other tokenization-adjacent problem.
    #[fail(display = "{}: syntax error: {}", pos, message)]
    Syntax {
        /// Where the problem was detected.
        pos: SourcePosition,
        /// Human-readable detail.
        message: String,
    },

    /// A type mismatch: non-native index, bad cast, undefined operator for
    /// a signature, method call on a non-object, and similar.
    #[fail(display = "{}: type error: {}", pos, message)]
    Type {
        /// Where the problem was detected.
        pos: SourcePosition,
        /// Human-readable detail.
        message: String,
    },

    /// A hard resource limit was exceeded: nesting too deep, call-args
    /// usage, stack/global allocation budget, register exhaustion.
    #[fail(display = "{}: resource exceeded: {}", pos, message)]
    Resource {
        /// Where the problem was detected.
        pos: SourcePosition,
        /// Human-readable detail.
        message: String,
    },

    /// A well-formedness rule was violated: writing a readonly variable,
    /// overlapping output operands, byref/address-of on a bitselected or
    /// readonly value, and similar.
    #[fail(display = "{}: semantic error: {}", pos, message)]
    Semantic {
        /// Where the problem was detected.
        pos: SourcePosition,
        /// Human-readable detail.
        message: String,
    },

    /// An invariant was violated that indicates a bug in the core itself,
    /// not in the program being compiled (e.g. a stackframe pointer missing
    /// from the cache after `cachestackframepointers` ran).
    #[fail(display = "{}: internal error: {}", pos, message)]
    Internal {
        /// Where the problem was detected.
        pos: SourcePosition,
        /// Human-readable detail.
        message: String,
    },
}

impl CodegenError {
    /// The source position at which this error was raised.
    pub fn position(&self) -> SourcePosition {
        match *self {
            CodegenError::Syntax { pos, .. }
            | CodegenError::Type { pos, .. }
            | CodegenError::Resource { pos, .. }
            | CodegenError::Semantic { pos, .. }
            | CodegenError::Internal { pos, .. } => pos,
        }
    }

    /// Construct a `Syntax` error.
    pub fn syntax(pos: SourcePosition, message: impl Into<String>) -> Self {
        CodegenError::Syntax {
            pos,
            message: message.into(),
        }
    }

    /// Construct a `Type` error.
    pub fn ty(pos: SourcePosition, message: impl Into<String>) -> Self {
        CodegenError::Type {
            pos,
            message: message.into(),
        }
    }

    /// Construct a `Resource` error.
    pub fn resource(pos: SourcePosition, message: impl Into<String>) -> Self {
        CodegenError::Resource {
            pos,
            message: message.into(),
        }
    }

    /// Construct a `Semantic` error.
    pub fn semantic(pos: SourcePosition, message: impl Into<String>) -> Self {
        CodegenError::Semantic {
            pos,
            message: message.into(),
        }
    }

    /// Construct an `Internal` error. Reaching this indicates a compiler bug.
    pub fn internal(pos: SourcePosition, message: impl Into<String>) -> Self {
        CodegenError::Internal {
            pos,
            message: message.into(),
        }
    }
}

/// The result type used throughout the core.
pub type CodegenResult<T> = Result<T, CodegenError>;
