//! External collaborator interfaces (spec.md §6), excluding the type table
//! (see `ty.rs`). Lexical scanning, declaration parsing, symbol tables, and
//! function lookup by call signature are all out of the core's scope
//! (spec.md §1); the core only calls through these traits.

use crate::result::SourcePosition;
use crate::ty::TypeTable;
use crate::variable::VariableId;

/// A symbol lookup result, tagged by what the name turned out to name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    /// Names a type.
    Type,
    /// Names a variable, identified by its `VariableId`.
    Variable(VariableId),
    /// Names a function, identified by its opaque external id.
    Function(u32),
    /// Not found in any enclosing scope.
    NotFound,
}

/// Tokenization callbacks (spec.md §6): `readsymbol`, `readnumber`,
/// `readstringconstant`, `readcharconstant`, `readoperator`.
pub trait Lexer {
    /// Current cursor position, advanced by every `read*` call below.
    fn position(&self) -> SourcePosition;

    /// Read an identifier-shaped token. `case_sensitive` selects whether
    /// the surrounding language folds identifier case.
    fn read_symbol(&mut self, case_sensitive: bool) -> Option<String>;

    /// Read a numeric literal, already parsed into its bit pattern plus a
    /// flag for whether a fractional/exponent part was present (the core
    /// only needs to know this to pick an integer vs. floating representation
    /// upstream; it does not interpret floating values itself).
    fn read_number(&mut self) -> Option<(u64, bool)>;

    /// Read a string constant. `wide` selects a wide/narrow literal form.
    fn read_string_constant(&mut self, wide: bool) -> Option<String>;

    /// Read a single character constant, returned as its integer value.
    fn read_char_constant(&mut self) -> Option<i64>;

    /// Read an operator token found in `table`, returning its index.
    fn read_operator(&mut self, table: &[&str]) -> Option<usize>;
}

/// Symbol table lookups (spec.md §6): `searchsymbol`, `searchtype` (the
/// latter folded into `TypeTable`), `searchfunc`, `searchnativeop`.
pub trait SymbolTable: TypeTable {
    /// Resolve `name` within `scope`.
    fn search_symbol(&self, name: &str, scope: u32) -> SymbolKind;

    /// Resolve a call signature (e.g. `"method|child_type|arg_type|"`) to a
    /// user-declared function, if one matches exactly.
    fn search_func(&self, signature: &str, scope: u32) -> Option<u32>;

    /// Resolve a call signature to a native built-in operator implementation,
    /// if the core's host language defines one for it.
    fn search_native_op(&self, signature: &str) -> Option<u32>;

    /// The immediate base types `type_name` inherits from, nearest first
    /// (spec.md §4.5.2 method dispatch, §8 scenario S3). Default empty: a
    /// flat type system has nothing to walk.
    fn base_types(&self, type_name: &str) -> Vec<String> {
        let _ = type_name;
        Vec::new()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::ty::{ElementInfo, TypeInfo, TypeTable};
    use std::collections::HashMap;

    /// A fake `SymbolTable` + `Lexer` for unit and integration tests: a
    /// fixed token stream plus a small name table.
    pub struct FakeCompiler {
        pub tokens: Vec<String>,
        pub pos: usize,
        pub types: HashMap<String, TypeInfo>,
        pub elements: HashMap<String, ElementInfo>,
        pub symbols: HashMap<String, SymbolKind>,
        pub funcs: HashMap<String, u32>,
        pub native_ops: HashMap<String, u32>,
    }

    impl FakeCompiler {
        pub fn new(tokens: Vec<String>) -> Self {
            Self {
                tokens,
                pos: 0,
                types: HashMap::new(),
                elements: HashMap::new(),
                symbols: HashMap::new(),
                funcs: HashMap::new(),
                native_ops: HashMap::new(),
            }
        }
    }

    impl TypeTable for FakeCompiler {
        fn resolve(&self, name: &str, _scope: u32) -> Option<TypeInfo> {
            self.types.get(name).cloned()
        }

        fn resolve_element(&self, name: &str, _scope: u32) -> Option<ElementInfo> {
            self.elements.get(name).cloned()
        }
    }

    impl SymbolTable for FakeCompiler {
        fn search_symbol(&self, name: &str, _scope: u32) -> SymbolKind {
            self.symbols.get(name).copied().unwrap_or(SymbolKind::NotFound)
        }

        fn search_func(&self, signature: &str, _scope: u32) -> Option<u32> {
            self.funcs.get(signature).copied()
        }

        fn search_native_op(&self, signature: &str) -> Option<u32> {
            self.native_ops.get(signature).copied()
        }
    }

    impl Lexer for FakeCompiler {
        fn position(&self) -> SourcePosition {
            SourcePosition::new(self.pos as u32, 1, self.pos as u32 + 1)
        }

        fn read_symbol(&mut self, _case_sensitive: bool) -> Option<String> {
            let tok = self.tokens.get(self.pos).cloned();
            if tok.is_some() {
                self.pos += 1;
            }
            tok
        }

        fn read_number(&mut self) -> Option<(u64, bool)> {
            let tok = self.tokens.get(self.pos)?;
            let n: u64 = tok.parse().ok()?;
            self.pos += 1;
            Some((n, false))
        }

        fn read_string_constant(&mut self, _wide: bool) -> Option<String> {
            let tok = self.tokens.get(self.pos).cloned();
            if tok.is_some() {
                self.pos += 1;
            }
            tok
        }

        fn read_char_constant(&mut self) -> Option<i64> {
            let tok = self.tokens.get(self.pos)?;
            let c = tok.chars().next()? as i64;
            self.pos += 1;
            Some(c)
        }

        fn read_operator(&mut self, table: &[&str]) -> Option<usize> {
            let tok = self.tokens.get(self.pos)?;
            let idx = table.iter().position(|op| op == tok)?;
            self.pos += 1;
            Some(idx)
        }
    }
}
