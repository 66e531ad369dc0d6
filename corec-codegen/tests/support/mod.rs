//! Shared fixtures for the scenario tests in spec.md §8 "Concrete
//! scenarios". A minimal `Lexer`/`SymbolTable`/`TypeTable` triple, built the
//! same way a real embedder (a parser, a symbol table) would implement
//! these traits, just backed by fixed maps instead of a live compilation
//! unit.

use std::collections::HashMap;

use corec_codegen::external::{Lexer, SymbolKind, SymbolTable};
use corec_codegen::result::SourcePosition;
use corec_codegen::ty::{ElementInfo, FieldInfo, TypeInfo, TypeTable};

/// A fixed token stream plus a small name/type table, standing in for a
/// real lexer and symbol table across a scenario.
pub struct Fixture {
    pub tokens: Vec<String>,
    pub pos: usize,
    pub types: HashMap<String, TypeInfo>,
    pub elements: HashMap<String, ElementInfo>,
    pub fields: HashMap<(String, String), FieldInfo>,
    pub symbols: HashMap<String, SymbolKind>,
    pub funcs: HashMap<String, u32>,
    pub native_ops: HashMap<String, u32>,
    pub base_types: HashMap<String, Vec<String>>,
}

impl Fixture {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            pos: 0,
            types: HashMap::new(),
            elements: HashMap::new(),
            fields: HashMap::new(),
            symbols: HashMap::new(),
            funcs: HashMap::new(),
            native_ops: HashMap::new(),
            base_types: HashMap::new(),
        }
    }

    pub fn native(&mut self, name: &str, size: u32, signed: bool) {
        self.types.insert(
            name.to_string(),
            TypeInfo {
                size,
                align: size,
                class: corec_codegen::ty::TypeClass::Native { signed },
            },
        );
    }
}

impl TypeTable for Fixture {
    fn resolve(&self, name: &str, _scope: u32) -> Option<TypeInfo> {
        self.types.get(name).cloned()
    }

    fn resolve_field(&self, type_name: &str, field_name: &str) -> Option<FieldInfo> {
        self.fields.get(&(type_name.to_string(), field_name.to_string())).cloned()
    }

    fn resolve_element(&self, name: &str, _scope: u32) -> Option<ElementInfo> {
        self.elements.get(name).cloned()
    }
}

impl SymbolTable for Fixture {
    fn search_symbol(&self, name: &str, _scope: u32) -> SymbolKind {
        self.symbols.get(name).copied().unwrap_or(SymbolKind::NotFound)
    }

    fn search_func(&self, signature: &str, _scope: u32) -> Option<u32> {
        self.funcs.get(signature).copied()
    }

    fn search_native_op(&self, signature: &str) -> Option<u32> {
        self.native_ops.get(signature).copied()
    }

    fn base_types(&self, type_name: &str) -> Vec<String> {
        self.base_types.get(type_name).cloned().unwrap_or_default()
    }
}

impl Lexer for Fixture {
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

/// A `FlushFn` that does nothing, for scenarios where nothing cares what a
/// flush would actually write.
pub fn no_flush() -> Box<corec_codegen::regalloc::FlushFn<'static>> {
    Box::new(|_ring, _id| Ok(()))
}
