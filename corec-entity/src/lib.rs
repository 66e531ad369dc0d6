//! Densely numbered entity references as mapping keys.
//!
//! This crate provides the small set of generic containers the code
//! generator uses to avoid raw pointers between its own entities
//! (functions, variables, registers, instructions, labels): every
//! cross-reference becomes a `u32`-sized index into a `PrimaryMap`, typed so
//! a `Variable` reference can never be confused with a `RegisterId`.
//!
//! The split mirrors the rest of the workspace: this crate owns nothing
//! specific to code generation, only the indexing machinery.

#![deny(missing_docs)]

mod keys;
mod map;
pub mod packed_option;
mod primary;

pub use crate::keys::Keys;
pub use crate::map::SecondaryMap;
pub use crate::packed_option::{PackedOption, ReservedValue};
pub use crate::primary::PrimaryMap;

/// A type that can be used as a densely-numbered entity reference.
///
/// Implementors wrap a `u32` index and are `Copy`, so they're cheap to pass
/// around and store by value inside other entities instead of behind a
/// pointer or `Rc`.
pub trait EntityRef: Copy + Eq {
    /// Create a new entity reference from a linear index.
    fn new(index: usize) -> Self;

    /// Get the index of this reference.
    fn index(self) -> usize;
}

/// Macro that provides the common implementation of an `EntityRef` type.
///
/// This generates the `EntityRef` impl along with `Display`/`Debug` that
/// render the index with a short textual prefix, matching the convention
/// used throughout this crate's consumers (`v3`, `r12`, `fn0`, ...).
#[macro_export]
macro_rules! entity_impl {
    // Basic traits.
    ($entity:ident) => {
        impl $crate::EntityRef for $entity {
            fn new(index: usize) -> Self {
                debug_assert!(index < (u32::MAX as usize));
                $entity(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $crate::packed_option::ReservedValue for $entity {
            fn reserved_value() -> $entity {
                $entity(u32::MAX)
            }

            fn is_reserved_value(&self) -> bool {
                self.0 == u32::MAX
            }
        }

        impl $entity {
            /// Create a new instance from a `u32`.
            #[allow(dead_code)]
            pub fn from_u32(x: u32) -> Self {
                debug_assert!(x < u32::MAX);
                $entity(x)
            }

            /// Return the underlying index value as a `u32`.
            #[allow(dead_code)]
            pub fn as_u32(self) -> u32 {
                self.0
            }
        }
    };

    // Include a Display impl using the given prefix.
    ($entity:ident, $display_prefix:expr) => {
        entity_impl!($entity);

        impl ::core::fmt::Display for $entity {
            fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
                write!(f, concat!($display_prefix, "{}"), self.0)
            }
        }

        impl ::core::fmt::Debug for $entity {
            fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
                (self as &dyn ::core::fmt::Display).fmt(f)
            }
        }
    };
}
