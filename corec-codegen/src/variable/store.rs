//! `VariableStore`: creation, deduplication, and address/dereference
//! synthesis for variables (spec.md §4.1).

use std::collections::HashMap;

use corec_entity::PrimaryMap;

use crate::interner::{Interner, Symbol};
use crate::ir::entities::{FunctionId, VariableId};
use crate::result::{CodegenError, CodegenResult, SourcePosition};

use super::var::{Variable, VariableKind};

/// The universe of compile-time variables for one compilation unit
/// (spec.md §2 component 2).
pub struct VariableStore {
    vars: PrimaryMap<VariableId, Variable>,
    number_dedup: HashMap<(i64, Symbol), VariableId>,
    string_dedup: HashMap<Symbol, VariableId>,
    string_region_size: u32,
    locals_budget: u32,
    locals_used: u32,
    /// Descendants of a variable whose lifetime is tied to it: offset-
    /// suffixed and dereference variables built on top of a tempvar, so
    /// that freeing the tempvar also discards them (spec.md §4.1
    /// `var-free-temp-var-related`).
    dependents: HashMap<VariableId, Vec<VariableId>>,
}

impl VariableStore {
    /// Create an empty store. `locals_budget` bounds the total size of
    /// tempvars any one function may hold live at once.
    pub fn new(locals_budget: u32) -> Self {
        Self {
            vars: PrimaryMap::new(),
            number_dedup: HashMap::new(),
            string_dedup: HashMap::new(),
            string_region_size: 0,
            locals_budget,
            locals_used: 0,
            dependents: HashMap::new(),
        }
    }

    /// Look up a variable's record.
    pub fn get(&self, id: VariableId) -> &Variable {
        &self.vars[id]
    }

    fn get_mut(&mut self, id: VariableId) -> &mut Variable {
        &mut self.vars[id]
    }

    /// Is `id` readonly (spec.md §3 Invariants)?
    pub fn is_readonly(&self, id: VariableId) -> bool {
        self.vars[id].is_readonly()
    }

    /// Attach (or clear) a cast string on an already-created variable
    /// (spec.md §4.5 "the value after `)` is cast by attaching a cast
    /// string"). The variable's `size`/`kind` are left untouched; a cast
    /// only annotates how the value is to be interpreted downstream.
    pub fn set_cast(&mut self, id: VariableId, cast: Option<Symbol>) {
        self.get_mut(id).cast = cast;
    }

    /// A new local variable.
    pub fn new_local(
        &mut self,
        owner: FunctionId,
        name: Symbol,
        offset: u32,
        size: u32,
        ty: Option<Symbol>,
    ) -> VariableId {
        self.vars.push(Variable {
            name,
            owner,
            offset,
            size,
            ty,
            cast: None,
            bitselect: 0,
            kind: VariableKind::Local,
            is_byref: false,
            always_volatile: false,
            preserve_temp_attr: false,
        })
    }

    /// A new global variable.
    pub fn new_global(
        &mut self,
        owner: FunctionId,
        name: Symbol,
        offset: u32,
        size: u32,
        ty: Option<Symbol>,
    ) -> VariableId {
        self.vars.push(Variable {
            name,
            owner,
            offset,
            size,
            ty,
            cast: None,
            bitselect: 0,
            kind: VariableKind::Global,
            is_byref: false,
            always_volatile: false,
            preserve_temp_attr: false,
        })
    }

    /// A new formal parameter.
    pub fn new_argument(
        &mut self,
        owner: FunctionId,
        name: Symbol,
        offset: u32,
        size: u32,
        ty: Option<Symbol>,
        is_byref: bool,
    ) -> VariableId {
        self.vars.push(Variable {
            name,
            owner,
            offset,
            size,
            ty,
            cast: None,
            bitselect: 0,
            kind: VariableKind::Argument,
            is_byref,
            always_volatile: false,
            preserve_temp_attr: false,
        })
    }

    /// A new temporary with a freshly generated name. Fails with
    /// *resource-exceeded* if `size` would push the owning function's
    /// live-tempvar budget past `locals_budget` (spec.md §4.1 Failure).
    pub fn new_temp(
        &mut self,
        owner: FunctionId,
        interner: &mut Interner,
        size: u32,
        ty: Option<Symbol>,
        pos: SourcePosition,
    ) -> CodegenResult<VariableId> {
        if self.locals_used.saturating_add(size) > self.locals_budget {
            return Err(CodegenError::resource(
                pos,
                format!(
                    "temporary of size {} exceeds remaining locals budget ({} of {} used)",
                    size, self.locals_used, self.locals_budget
                ),
            ));
        }
        self.locals_used += size;
        let name = interner.fresh_tempvar();
        Ok(self.vars.push(Variable {
            name,
            owner,
            offset: 0,
            size,
            ty,
            cast: None,
            bitselect: 0,
            kind: VariableKind::Tempvar,
            is_byref: false,
            always_volatile: false,
            preserve_temp_attr: false,
        }))
    }

    /// A deduplicated integer constant: two calls with the same `(value,
    /// ty)` return the same `VariableId`.
    pub fn new_number_const(
        &mut self,
        owner: FunctionId,
        value: i64,
        ty: Symbol,
        size: u32,
    ) -> VariableId {
        if let Some(&id) = self.number_dedup.get(&(value, ty)) {
            return id;
        }
        let id = self.vars.push(Variable {
            name: ty,
            owner,
            offset: 0,
            size,
            ty: Some(ty),
            cast: None,
            bitselect: 0,
            kind: VariableKind::NumberConstant(value),
            is_byref: false,
            always_volatile: false,
            preserve_temp_attr: false,
        });
        self.number_dedup.insert((value, ty), id);
        id
    }

    /// A deduplicated string constant: two calls with the same payload
    /// share a `VariableId` and a string-region offset.
    pub fn new_string_const(&mut self, owner: FunctionId, interner: &mut Interner, payload: &str) -> VariableId {
        let key = interner.intern(payload);
        if let Some(&id) = self.string_dedup.get(&key) {
            return id;
        }
        let offset = self.string_region_size;
        let size = payload.len() as u32 + 1; // NUL terminator
        self.string_region_size += size;
        let id = self.vars.push(Variable {
            name: key,
            owner,
            offset,
            size,
            ty: None,
            cast: None,
            bitselect: 0,
            kind: VariableKind::StringConstant(offset),
            is_byref: false,
            always_volatile: false,
            preserve_temp_attr: false,
        });
        self.string_dedup.insert(key, id);
        id
    }

    /// The address of a function, usable as a `voidfnc` value.
    pub fn new_function_address(
        &mut self,
        owner: FunctionId,
        name: Symbol,
        target: FunctionId,
        ptr_size: u32,
    ) -> VariableId {
        self.vars.push(Variable {
            name,
            owner,
            offset: 0,
            size: ptr_size,
            ty: None,
            cast: None,
            bitselect: 0,
            kind: VariableKind::FunctionAddress(target),
            is_byref: false,
            always_volatile: false,
            preserve_temp_attr: false,
        })
    }

    /// A compiler-exposed fixed-address variable, optionally with a
    /// write-through callback (spec.md §3 Variable, §4.9).
    pub fn new_predeclared(
        &mut self,
        owner: FunctionId,
        name: Symbol,
        address: u64,
        size: u32,
        ty: Option<Symbol>,
        callback: Option<FunctionId>,
    ) -> VariableId {
        self.vars.push(Variable {
            name,
            owner,
            offset: 0,
            size,
            ty,
            cast: None,
            bitselect: 0,
            kind: VariableKind::Predeclared { address, callback },
            is_byref: false,
            always_volatile: true,
            preserve_temp_attr: false,
        })
    }

    /// The address-of operator. Errors if `target` is bit-selected or
    /// already readonly (spec.md §4.5 Prefix operators); marks `target`
    /// always-volatile.
    pub fn address_of(
        &mut self,
        owner: FunctionId,
        interner: &mut Interner,
        target: VariableId,
        ptr_size: u32,
        pos: SourcePosition,
    ) -> CodegenResult<VariableId> {
        let t = &self.vars[target];
        if t.is_bitselected() {
            return Err(CodegenError::semantic(pos, "address-of on a bit-selected value"));
        }
        if t.is_readonly() {
            return Err(CodegenError::semantic(pos, "address-of on a readonly value"));
        }
        let base_name = interner.resolve(t.name).to_string();
        let name = interner.address_name(&base_name);
        self.get_mut(target).always_volatile = true;
        Ok(self.vars.push(Variable {
            name,
            owner,
            offset: 0,
            size: ptr_size,
            ty: None,
            cast: None,
            bitselect: 0,
            kind: VariableKind::AddressOf { target },
            is_byref: false,
            always_volatile: false,
            preserve_temp_attr: false,
        }))
    }

    /// The dereference operator. Errors if `target` is bit-selected or
    /// readonly (spec.md §4.5 Prefix operators); the produced variable is
    /// always-volatile and has no memory residence of its own.
    pub fn dereference(
        &mut self,
        owner: FunctionId,
        interner: &mut Interner,
        target: VariableId,
        cast: Option<Symbol>,
        size: u32,
        pos: SourcePosition,
    ) -> CodegenResult<VariableId> {
        let t = &self.vars[target];
        if t.is_bitselected() {
            return Err(CodegenError::semantic(pos, "dereference of a bit-selected value"));
        }
        if t.is_readonly() {
            return Err(CodegenError::semantic(pos, "dereference of a readonly value"));
        }
        let base_name = interner.resolve(t.name).to_string();
        let cast_str = cast.map(|c| interner.resolve(c).to_string());
        let name = interner.dereference_name(&base_name, cast_str.as_deref());
        let id = self.vars.push(Variable {
            name,
            owner,
            offset: 0,
            size,
            ty: None,
            cast,
            bitselect: 0,
            kind: VariableKind::Dereference { target, cast },
            is_byref: false,
            always_volatile: true,
            preserve_temp_attr: false,
        });
        if self.vars[target].is_tempvar() || self.dependents.contains_key(&target) {
            self.dependents.entry(target).or_default().push(id);
        }
        Ok(id)
    }

    /// An offset-suffixed member sharing `base`'s memory at `extra_offset`
    /// bytes past its start; inherits `base`'s volatility record.
    pub fn offset_suffixed(
        &mut self,
        owner: FunctionId,
        interner: &mut Interner,
        base: VariableId,
        extra_offset: u32,
        size: u32,
    ) -> VariableId {
        let b = &self.vars[base];
        let base_name = interner.resolve(b.name).to_string();
        let always_volatile = b.always_volatile;
        let name = interner.offset_name(&base_name, extra_offset);
        let id = self.vars.push(Variable {
            name,
            owner,
            offset: self.vars[base].offset + extra_offset,
            size,
            ty: None,
            cast: None,
            bitselect: 0,
            kind: VariableKind::OffsetSuffixed { base, extra_offset },
            is_byref: false,
            always_volatile,
            preserve_temp_attr: false,
        });
        if self.vars[base].is_tempvar() || self.dependents.contains_key(&base) {
            self.dependents.entry(base).or_default().push(id);
        }
        id
    }

    /// `process-var-offset-if-any` (spec.md §4.1, testable property 8):
    /// for an offset-suffixed variable, returns its base and the suffix
    /// offset; otherwise returns `var` unchanged with offset 0.
    pub fn process_var_offset_if_any(&self, var: VariableId) -> (VariableId, u32) {
        match self.vars[var].kind {
            VariableKind::OffsetSuffixed { base, extra_offset } => (base, extra_offset),
            _ => (var, 0),
        }
    }

    /// `get-var-duplicate`: allocates a tempvar sized and typed like
    /// `source`. The caller (memory lowering / evaluator) is responsible
    /// for emitting the copy instruction, since the store has no access to
    /// the instruction stream.
    pub fn get_var_duplicate(
        &mut self,
        owner: FunctionId,
        interner: &mut Interner,
        source: VariableId,
        pos: SourcePosition,
    ) -> CodegenResult<VariableId> {
        let src = self.vars[source].clone();
        self.new_temp(owner, interner, src.size, src.ty, pos)
    }

    /// `var-free-temp-var-related`: frees `var` (which must be a tempvar)
    /// and recursively any dereference/offset-suffixed variables built on
    /// top of it, refunding their share of the locals budget. A no-op if
    /// `var` is not a tempvar. Also used, per the supplemented operation
    /// in this core's design, to unwind the same chain on early-return
    /// error paths -- see `discard_temp_chain`.
    pub fn var_free_temp_var_related(&mut self, var: VariableId) {
        if !self.vars[var].is_tempvar() {
            return;
        }
        self.discard_chain(var);
    }

    /// Supplemented operation: identical cleanup to
    /// `var_free_temp_var_related`, invoked from error-propagation paths
    /// that bail out of expression evaluation before the statement's
    /// normal tempvar bookkeeping runs.
    pub fn discard_temp_chain(&mut self, var: VariableId) {
        self.discard_chain(var);
    }

    fn discard_chain(&mut self, var: VariableId) {
        if let Some(deps) = self.dependents.remove(&var) {
            for dep in deps {
                self.discard_chain(dep);
            }
        }
        let size = self.vars[var].size;
        self.locals_used = self.locals_used.saturating_sub(size);
    }

    /// Bytes of the locals budget currently charged to live tempvars.
    pub fn locals_used(&self) -> u32 {
        self.locals_used
    }

    /// Total size, in bytes, of the deduplicated string constant region
    /// accumulated so far.
    pub fn string_region_size(&self) -> u32 {
        self.string_region_size
    }
}
