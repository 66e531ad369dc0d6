//! Compile-time configuration record handed to the core by its embedder
//! (spec.md §6).

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// Width, in bytes, of a general-purpose register on the target. The core
/// only ever supports one of the four native machine-word sizes.
pub type GprSize = u8;

/// Configuration flags and limits read once per compilation unit.
///
/// Grounded on `macros.h`'s linked-list/bit macros and the constants
/// referenced throughout `regmanipulations.tools.parsestatement.lyrical.c`
/// (stack page size, argument-area guard space, stackframe-pointer cache
/// ceiling); defaults below match the values that file assumes implicitly
/// for a 64-bit target.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Config {
    /// Size, in bytes, of a general-purpose register (1, 2, 4, or 8).
    pub sizeofgpr: GprSize,

    /// Size, in bytes, of a stack page. Stack memory is obtained from the
    /// runtime a page at a time via `stackpagealloc`/`stackpagefree`.
    pub page_size: u32,

    /// Upper bound on the stack a single call site may need to reserve when
    /// the callee isn't staticaly known (indirect calls, imported
    /// functions): `MAX-STACK-USAGE`.
    pub max_stack_usage: u32,

    /// Upper bound on the cumulative size of a call's argument area:
    /// `MAX-ARG-USAGE`.
    pub max_arg_usage: u32,

    /// Upper bound on the total size of a function's stackframe-pointer
    /// cache: `MAX-STACKFRAME-POINTER-CACHE-SIZE`.
    pub max_stackframe_pointer_cache_size: u32,

    /// Extra words of guard space reserved beyond the computed argument
    /// area at every call site.
    pub function_call_args_guard_space: u32,

    /// Extra bytes of provision added when allocating a new stack page.
    pub stack_page_alloc_provision: u32,

    /// When set, the instruction emitter interleaves non-semantic `comment`
    /// instructions (size zero, ignored by layout) describing each lowering
    /// step.
    pub emit_comments: bool,

    /// When set, every variable behaves as if marked `always-volatile`,
    /// regardless of whether its address was taken or it is a dereference
    /// variable. Useful for debugging miscompilations believed to stem from
    /// stale register caching.
    pub all_var_volatile: bool,
}

impl Config {
    /// Number of virtual registers in the per-function ring; this is fixed
    /// by the target's GPR count and register 0 (never allocated: it is the
    /// stack pointer) plus register 1 (carries the return address when the
    /// callee is a stackframe holder).
    pub fn gpr_count(&self) -> usize {
        // A small, fixed target-independent count is assumed by the core;
        // real embeddings override this through target-specific config.
        16
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sizeofgpr: 8,
            page_size: 4096,
            max_stack_usage: 1 << 16,
            max_arg_usage: 1 << 12,
            max_stackframe_pointer_cache_size: 1 << 10,
            function_call_args_guard_space: 2,
            stack_page_alloc_provision: 256,
            emit_comments: false,
            all_var_volatile: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_64_bit() {
        let cfg = Config::default();
        assert_eq!(cfg.sizeofgpr, 8);
        assert!(cfg.gpr_count() > 1);
    }
}
