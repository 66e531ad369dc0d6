//! The Stackframe Pointer Engine and stackframe field layout (spec.md §2
//! components 6, §4.3, §4.6).

pub mod layout;
pub mod pointer;

pub use layout::{regular_fixed_size, tiny_fixed_size, RegularField, TinyField};
pub use pointer::{cache_stackframe_pointers, get_ancestor_frame_pointer, FrameSource};
