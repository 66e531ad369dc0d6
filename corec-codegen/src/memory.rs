//! Memory Load/Store Lowering (spec.md §2 component 7, §4.4).
//!
//! `generate_load_instr` turns a `(variable, offset, size)` triple into
//! aligned load/address instructions; `get_reg_for_var` is the central
//! dispatcher every expression operand and assembly operand goes through
//! to obtain a register.

use corec_entity::PrimaryMap;

use crate::config::Config;
use crate::interner::Interner;
use crate::ir::entities::{FunctionId, RegisterId};
use crate::ir::function::Function;
use crate::ir::immediate::{ImmTerm, ImmediateDescriptor};
use crate::ir::instruction::{Opcode, RegOperands};
use crate::regalloc::register::Tenant;
use crate::regalloc::{allocate, discard_overlapping, Criticality, FlushFn, OverlapPolicy};
use crate::result::{CodegenError, CodegenResult, SourcePosition};
use crate::stackframe::{cache_stackframe_pointers, get_ancestor_frame_pointer, FrameSource};
use crate::variable::{VariableId, VariableKind, VariableStore};

/// What `generate_load_instr` should produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadKind {
    /// The variable's value.
    Value,
    /// The variable's address.
    Addr,
}

/// Whether `get_reg_for_var` is obtaining a register to read from or to
/// write into (spec.md §4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Purpose {
    ForInput,
    ForOutput,
}

/// Largest store/load width, in bytes, that is both `<= max` and evenly
/// divides `offset` (spec.md §4.4: "choose the largest aligned ... size
/// that divides ...").
fn largest_aligned_size(offset: u32, max: u32) -> u32 {
    let mut size = max.next_power_of_two().min(max).max(1);
    while size > 1 && (offset % size != 0 || size > max) {
        size /= 2;
    }
    size.max(1)
}

/// Resolve the register (or immediate-only access, for predeclared
/// variables) addressing the region `var` lives in, per spec.md §4.4 step
/// 1. Returns the register holding the base address, plus an extra literal
/// offset to fold into the access (nonzero only for the predeclared case,
/// whose address is a compile-time constant with no region register at
/// all).
fn region_base(
    functions: &PrimaryMap<FunctionId, Function>,
    current: FunctionId,
    function: &mut Function,
    variables: &VariableStore,
    var: VariableId,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<(Option<RegisterId>, i64)> {
    let v = variables.get(var);
    match v.kind {
        VariableKind::Predeclared { address, .. } => Ok((None, address as i64)),
        VariableKind::Global | VariableKind::StringConstant(_) => {
            let (tenant, code_offset_term) = if matches!(v.kind, VariableKind::Global) {
                (Tenant::GlobalRegionAddr, ImmTerm::GlobalRegionCodeOffset)
            } else {
                (Tenant::StringRegionAddr, ImmTerm::StringRegionCodeOffset)
            };
            if let Some(id) = find_singleton(function, tenant) {
                return Ok((Some(id), 0));
            }
            let store = VariableStore::new(0);
            let reg = allocate(function.ring_mut(), &store, Criticality::Critical, flush)?;
            let mut imm = ImmediateDescriptor::zero();
            imm.add_term(code_offset_term);
            function.emit(Opcode::Afip, RegOperands::one(reg), 0, Some(imm));
            function.ring_mut().get_mut(reg).tenant = tenant;
            Ok((Some(reg), 0))
        }
        VariableKind::Local | VariableKind::Argument | VariableKind::Tempvar => {
            if v.owner == current {
                Ok((Some(RegisterId::from_u32(0)), 0))
            } else {
                let level = lexical_distance(functions, current, v.owner).ok_or_else(|| {
                    CodegenError::internal(pos, "variable's owning function is not a lexical ancestor")
                })?;
                match get_ancestor_frame_pointer(functions, current, function, level, false, pos, flush)? {
                    FrameSource::StackPointerSuffices => Ok((Some(RegisterId::from_u32(0)), 0)),
                    FrameSource::Existing(id) | FrameSource::Fresh(id) => Ok((Some(id), 0)),
                }
            }
        }
        VariableKind::Dereference { .. } | VariableKind::AddressOf { .. } | VariableKind::OffsetSuffixed { .. } => {
            Err(CodegenError::internal(
                pos,
                "region_base called on a variable with no region of its own",
            ))
        }
        VariableKind::NumberConstant(_) | VariableKind::FunctionAddress(_) => Err(CodegenError::internal(
            pos,
            "region_base called on a register-only constant",
        )),
    }
}

fn find_singleton(function: &Function, tenant: Tenant) -> Option<RegisterId> {
    function
        .ring()
        .scan_order()
        .find(|&id| std::mem::discriminant(&function.ring().get(id).tenant) == std::mem::discriminant(&tenant))
}

fn lexical_distance(functions: &PrimaryMap<FunctionId, Function>, from: FunctionId, to: FunctionId) -> Option<u32> {
    let mut cursor = from;
    let mut level = 0;
    loop {
        if cursor == to {
            return Some(level);
        }
        cursor = functions[cursor].parent?;
        level += 1;
    }
}

/// `generateloadinstr` (spec.md §4.4): emit the access for a
/// stack/global/predeclared-resident variable.
pub fn generate_load_instr(
    functions: &PrimaryMap<FunctionId, Function>,
    current: FunctionId,
    function: &mut Function,
    variables: &VariableStore,
    reg: RegisterId,
    var: VariableId,
    size: u32,
    offset: u32,
    kind: LoadKind,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    let (base, const_offset) = region_base(functions, current, function, variables, var, pos, flush)?;
    let v = variables.get(var);
    let mut imm = ImmediateDescriptor::zero();
    imm.add_literal(v.offset as i64 + offset as i64 + const_offset);
    if v.owner != current {
        // The firstpass doesn't yet know the owning ancestor's finalized
        // locals size, so it's folded in as a deferred term.
        imm.add_term(ImmTerm::LocalsSize(v.owner));
    }

    match kind {
        LoadKind::Addr => {
            if imm.is_statically_zero() {
                if let Some(base_reg) = base {
                    function.emit(Opcode::Copy, RegOperands::two(reg, base_reg), 0, None);
                }
            } else if let Some(base_reg) = base {
                function.emit(Opcode::AddImmediate, RegOperands::two(reg, base_reg), 0, Some(imm));
            } else {
                function.emit(Opcode::LoadImmediate, RegOperands::one(reg), 0, Some(imm));
            }
        }
        LoadKind::Value => {
            let mut remaining = size;
            let mut byte_off: i64 = 0;
            while remaining > 0 {
                let chunk = largest_aligned_size((offset + byte_off as u32).max(1), remaining.min(8));
                let mut chunk_imm = imm.clone();
                chunk_imm.add_literal(byte_off);
                let regs = match base {
                    Some(base_reg) => RegOperands::two(reg, base_reg),
                    None => RegOperands::one(reg),
                };
                function.emit(Opcode::Load, regs, chunk as u8, Some(chunk_imm));
                byte_off += chunk as i64;
                remaining -= chunk;
            }
        }
    }
    Ok(())
}

/// `getregforvar` (spec.md §4.4): the central register-acquisition
/// dispatcher used by every expression operand.
pub struct GetRegForVar<'f, 'v> {
    pub functions: &'f PrimaryMap<FunctionId, Function>,
    pub current: FunctionId,
    pub function: &'f mut Function,
    pub variables: &'v mut VariableStore,
    pub interner: &'f mut Interner,
    pub cfg: &'f Config,
}

impl<'f, 'v> GetRegForVar<'f, 'v> {
    /// Run the dispatcher for `(var, offset, size, bitselect)`.
    pub fn run(
        &mut self,
        var: VariableId,
        offset: u32,
        size: u32,
        bitselect: u64,
        signed: bool,
        purpose: Purpose,
        pos: SourcePosition,
        flush: &mut FlushFn,
    ) -> CodegenResult<RegisterId> {
        let (var, extra_offset) = self.variables.process_var_offset_if_any(var);
        let offset = offset + extra_offset;

        let policy = match purpose {
            Purpose::ForOutput => OverlapPolicy::DiscardAfterFlush,
            Purpose::ForInput => OverlapPolicy::FlushAndDiscardExceptExact,
        };
        discard_overlapping(self.function.ring_mut(), var, offset, size, bitselect, policy, flush)?;

        if let Some(existing) = find_matching(self.function, var, offset, size, bitselect) {
            log::trace!("reusing register {:?} already bound to var {:?}", existing, var);
            return self.reuse_existing(existing, var, purpose, signed, pos, flush);
        }

        let is_dereference = self.variables.get(var).is_dereference();
        let criticality = if !is_dereference && bitselect == 0 && self.variables.get(var).owner == self.current {
            Criticality::Critical
        } else {
            Criticality::NonCritical
        };
        let reg = allocate(self.function.ring_mut(), self.variables, criticality, flush)?;
        log::debug!("var {:?} missed the ring, allocated register {:?} ({:?})", var, reg, purpose);

        if purpose == Purpose::ForOutput {
            self.function.ring_mut().get_mut(reg).bind_variable(var, offset, size, bitselect);
            self.function.ring_mut().get_mut(reg).dirty = true;
            self.function.ring_mut().touch(reg);
            return Ok(reg);
        }

        self.load_input(reg, var, offset, size, bitselect, signed, pos, flush)?;
        self.function.ring_mut().touch(reg);
        Ok(reg)
    }

    fn reuse_existing(
        &mut self,
        reg: RegisterId,
        var: VariableId,
        purpose: Purpose,
        signed: bool,
        pos: SourcePosition,
        flush: &mut FlushFn,
    ) -> CodegenResult<RegisterId> {
        match purpose {
            Purpose::ForOutput => {
                self.function.ring_mut().get_mut(reg).dirty = true;
                self.function.ring_mut().touch(reg);
                Ok(reg)
            }
            Purpose::ForInput => {
                let v = self.variables.get(var);
                let needs_reload = v.always_volatile || v.is_dereference();
                if needs_reload {
                    if self.function.ring().get(reg).dirty {
                        flush(self.function.ring_mut(), reg)?;
                    }
                    let (offset, size, bitselect) = match self.function.ring().get(reg).tenant {
                        Tenant::Variable { offset, size, bitselect, .. } => (offset, size, bitselect),
                        _ => (0, 0, 0),
                    };
                    self.load_input(reg, var, offset, size, bitselect, signed, pos, flush)?;
                }
                self.function.ring_mut().touch(reg);
                Ok(reg)
            }
        }
    }

    fn load_input(
        &mut self,
        reg: RegisterId,
        var: VariableId,
        offset: u32,
        size: u32,
        bitselect: u64,
        signed: bool,
        pos: SourcePosition,
        flush: &mut FlushFn,
    ) -> CodegenResult<()> {
        self.function.ring_mut().get_mut(reg).bind_variable(var, offset, size, bitselect);
        let v = self.variables.get(var).clone();

        match v.kind {
            VariableKind::NumberConstant(value) if bitselect == 0 => {
                let imm = ImmediateDescriptor::literal(value);
                self.function.emit(Opcode::LoadImmediate, RegOperands::one(reg), size as u8, Some(imm));
            }
            VariableKind::FunctionAddress(target) if bitselect == 0 => {
                let mut imm = ImmediateDescriptor::zero();
                imm.add_term(ImmTerm::FunctionCodeOffset(target));
                self.function.emit(Opcode::Afip, RegOperands::one(reg), 0, Some(imm));
            }
            VariableKind::AddressOf { target } if bitselect == 0 => {
                generate_load_instr(
                    self.functions,
                    self.current,
                    self.function,
                    self.variables,
                    reg,
                    target,
                    0,
                    0,
                    LoadKind::Addr,
                    pos,
                    flush,
                )?;
            }
            VariableKind::StringConstant(_) if bitselect == 0 => {
                generate_load_instr(
                    self.functions,
                    self.current,
                    self.function,
                    self.variables,
                    reg,
                    var,
                    0,
                    offset,
                    LoadKind::Addr,
                    pos,
                    flush,
                )?;
            }
            VariableKind::Dereference { target, .. } => {
                let addr_reg = allocate(self.function.ring_mut(), self.variables, Criticality::NonCritical, flush)?;
                generate_load_instr(
                    self.functions,
                    self.current,
                    self.function,
                    self.variables,
                    addr_reg,
                    target,
                    0,
                    0,
                    LoadKind::Addr,
                    pos,
                    flush,
                )?;
                let imm = ImmediateDescriptor::literal(offset as i64);
                self.function
                    .emit(Opcode::Load, RegOperands::two(reg, addr_reg), size as u8, Some(imm));
            }
            _ => {
                generate_load_instr(
                    self.functions,
                    self.current,
                    self.function,
                    self.variables,
                    reg,
                    var,
                    size,
                    offset,
                    LoadKind::Value,
                    pos,
                    flush,
                )?;
                if bitselect != 0 {
                    let shift = bitselect.trailing_zeros() as i64;
                    if shift > 0 {
                        let imm = ImmediateDescriptor::literal(shift);
                        self.function.emit(Opcode::Shr, RegOperands::two(reg, reg), size as u8, Some(imm));
                    }
                }
            }
        }

        let r = self.function.ring_mut().get_mut(reg);
        let already_extended = if signed { r.was_sign_extended } else { r.was_zero_extended };
        if !already_extended && (size as usize) < self.cfg.sizeofgpr as usize {
            let op = if signed { Opcode::SignExtend } else { Opcode::ZeroExtend };
            self.function.emit(op, RegOperands::two(reg, reg), size as u8, None);
            let r = self.function.ring_mut().get_mut(reg);
            if signed {
                r.was_sign_extended = true;
            } else {
                r.was_zero_extended = true;
            }
        }
        Ok(())
    }
}

fn find_matching(function: &Function, var: VariableId, offset: u32, size: u32, bitselect: u64) -> Option<RegisterId> {
    function
        .ring()
        .scan_order()
        .find(|&id| function.ring().get(id).matches(var, offset, size, bitselect))
}

/// Force the stackframe-pointer cache for `current` to be built before
/// code generation of its body proceeds, delegating to the Stackframe
/// Pointer Engine (spec.md §4.3).
pub fn cache_ancestor_pointers(
    functions: &PrimaryMap<FunctionId, Function>,
    current: FunctionId,
    function: &mut Function,
    cfg: &Config,
    pos: SourcePosition,
    flush: &mut FlushFn,
) -> CodegenResult<()> {
    cache_stackframe_pointers(functions, current, function, cfg, pos, flush)
}
