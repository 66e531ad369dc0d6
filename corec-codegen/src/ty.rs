//! Type System Queries (spec.md §2 component 3).
//!
//! Type parsing itself is out of scope (spec.md §1): the core only needs to
//! ask three things about a type string handed to it by the surrounding
//! compiler -- its size and alignment, whether it is a native scalar or a
//! pointer, and if native, whether it is signed. This is expressed as a
//! trait so the core can be driven from tests with a tiny fake table
//! instead of a real parser, the same way `cranelift-codegen`'s ISA layer is
//! abstracted behind the `TargetIsa` trait.

/// How a type is represented in a register and in memory, from the core's
/// point of view. Everything the core needs to know to lower loads, stores,
/// casts, and sign/zero extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeClass {
    /// A native scalar of the given signedness.
    Native {
        /// Is this type signed? Drives whether extension is `sign` or `zero`.
        signed: bool,
    },
    /// A pointer (to data or to a function).
    Pointer,
    /// A compound type (struct/array) with no register-resident value of
    /// its own; accessed only through member/element offsets.
    Aggregate,
    /// `void`, used only in pointer-to-void and as a sizeof error case.
    Void,
}

/// Queryable facts about a single resolved type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeInfo {
    /// Size in bytes. Zero for `void`.
    pub size: u32,
    /// Required alignment in bytes; always a power of two and `<= size`
    /// when `size` is itself a power of two, per the load/store lowering
    /// rules in spec.md §4.4.
    pub align: u32,
    /// The classification driving register/memory lowering.
    pub class: TypeClass,
}

impl TypeInfo {
    /// Is this a native (non-aggregate, non-void) scalar?
    pub fn is_native(&self) -> bool {
        matches!(self.class, TypeClass::Native { .. } | TypeClass::Pointer)
    }

    /// Is this specifically a pointer type?
    pub fn is_pointer(&self) -> bool {
        matches!(self.class, TypeClass::Pointer)
    }

    /// Is this a signed native type? Pointers and aggregates are not signed.
    pub fn is_signed(&self) -> bool {
        matches!(self.class, TypeClass::Native { signed: true })
    }
}

/// A resolved struct/union member: its byte offset within the aggregate,
/// its size, and its type name (for further field chains and casts).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    pub offset: u32,
    pub size: u32,
    pub type_name: Option<String>,
}

/// A resolved array element: its size (the subscript stride) and its type
/// name, so a constant-index subscript can fold to a statically offset
/// variable instead of a runtime pointer computation (spec.md §4.5 postfix
/// `[` "if the base is an array and the index is a constant...").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementInfo {
    pub size: u32,
    pub type_name: Option<String>,
}

/// External collaborator: resolves type strings to `TypeInfo`.
///
/// Implemented by the surrounding compiler's type-parsing stage; the core
/// only ever calls through this trait (spec.md §6 `searchtype`/`sizeoftype`).
pub trait TypeTable {
    /// Resolve `name` to its `TypeInfo`, if it names a known type. `scope`
    /// is an opaque handle meaningful only to the implementation (struct
    /// nesting, file-local typedefs, ...).
    fn resolve(&self, name: &str, scope: u32) -> Option<TypeInfo>;

    /// Size in bytes of `name`'s type, or `None` if unresolvable. Provided
    /// as a convenience so callers that only need the size don't have to
    /// destructure `TypeInfo`; the two calls must agree on the member type.
    fn size_of(&self, name: &str, scope: u32) -> Option<u32> {
        self.resolve(name, scope).map(|t| t.size)
    }

    /// Resolve `field_name` within aggregate `type_name` (spec.md §4.5
    /// postfix `.`/`->` field selection needs the member's offset and
    /// size). Default `None`: types with no aggregate members never
    /// override this.
    fn resolve_field(&self, type_name: &str, field_name: &str) -> Option<FieldInfo> {
        let _ = (type_name, field_name);
        None
    }

    /// Resolve `name`'s array element type, if `name` names an array type
    /// (spec.md §4.5 postfix `[`). `None` for every type that isn't an
    /// array, including pointers: a pointer subscript always lowers to
    /// `*(base + index)` pointer arithmetic regardless of constness,
    /// because a pointer has no fixed element count to fold the constant
    /// into a static struct-like layout. Default `None`: types with no
    /// array element never override this.
    fn resolve_element(&self, name: &str, scope: u32) -> Option<ElementInfo> {
        let _ = (name, scope);
        None
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;

    /// An in-memory `TypeTable` for unit and integration tests.
    #[derive(Default)]
    pub struct FakeTypeTable {
        types: HashMap<String, TypeInfo>,
    }

    impl FakeTypeTable {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, name: &str, info: TypeInfo) -> Self {
            self.types.insert(name.to_string(), info);
            self
        }

        pub fn native(name: &str, size: u32, signed: bool) -> TypeInfo {
            TypeInfo {
                size,
                align: size,
                class: TypeClass::Native { signed },
            }
        }

        pub fn pointer(size: u32) -> TypeInfo {
            TypeInfo {
                size,
                align: size,
                class: TypeClass::Pointer,
            }
        }
    }

    impl TypeTable for FakeTypeTable {
        fn resolve(&self, name: &str, _scope: u32) -> Option<TypeInfo> {
            self.types.get(name).cloned()
        }
    }

    #[test]
    fn size_of_delegates_to_resolve() {
        let t = FakeTypeTable::new().with("uint", FakeTypeTable::native("uint", 4, false));
        assert_eq!(t.size_of("uint", 0), Some(4));
        assert_eq!(t.size_of("missing", 0), None);
    }
}
