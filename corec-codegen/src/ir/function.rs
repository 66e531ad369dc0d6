//! The `Function` entity (spec.md §3 Data Model) and the Instruction
//! Emitter (spec.md §4.8).

use std::collections::HashMap;

use crate::interner::Symbol;
use crate::ir::entities::{FunctionId, InstId, RegisterId, VariableId};
use crate::ir::instruction::{CommentIndex, Instruction, MachineCodeIndex, Opcode, RegOperands};
use crate::ir::label::LabelTable;
use crate::regalloc::ring::RegisterRing;
use crate::result::{CodegenResult, SourcePosition};

/// `(ancestor-level, position-within-owning-function's-cache)` (spec.md §3
/// Cached Stackframe record).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CachedFrame {
    pub level: u32,
    pub position: u32,
}

/// A function, nested function, or closure body (spec.md §3 Function
/// entity).
pub struct Function {
    pub name: Symbol,
    pub signature: Option<Symbol>,
    /// Lexical parent, for nested functions. `None` at the top level.
    pub parent: Option<FunctionId>,
    pub children: Vec<FunctionId>,
    pub params: Vec<VariableId>,
    pub locals: Vec<VariableId>,

    pub is_variadic: bool,
    pub is_recursive: bool,
    /// Address taken via `&function_name` somewhere in the unit; forces
    /// ancestor walks that reach through this function to use the
    /// stackframe-id scan loop (spec.md §4.3 step 5).
    pub its_pointer_is_obtained: bool,
    pub uses_this: bool,
    /// Set once an indirect-target call (`jpush`/`jpushi`/`jpushr`) is
    /// emitted inside this function (spec.md §4.7 Special opcodes).
    pub could_not_get_a_stackframe_holder: bool,
    /// Is this function itself a stackframe holder for its subfunctions
    /// (spec.md Glossary)?
    pub is_stackframe_holder: bool,
    /// The nearest stackframe-holder ancestor whose shared region this
    /// function's tiny frame, if any, is carved from.
    pub stackframe_holder: Option<FunctionId>,

    /// Ancestor stackframe pointers this function caches, ordered by
    /// ascending level (spec.md §3, §4.3 `cachestackframepointers`).
    pub cached_stackframes: Vec<CachedFrame>,
    /// Functions called from this one, with per-callee use counts
    /// (spec.md §3 Function entity).
    pub called_functions: HashMap<FunctionId, u32>,

    /// The register ring, created only once secondpass begins emitting
    /// this function's code (spec.md §3 Lifecycle).
    pub register_ring: Option<RegisterRing>,
    instructions: Vec<Instruction>,
    machine_code: Vec<Box<str>>,
    comments: Vec<Box<str>>,
    labels: LabelTable,
    /// Last instruction, if any, that referenced each register -- kept for
    /// a later physical-register back-allocation pass (spec.md §4.8).
    last_use: HashMap<RegisterId, InstId>,

    /// Layout sizes, filled in after the firstpass by external layout
    /// finalization (spec.md §3 Function entity, §6 Outputs).
    pub locals_size: Option<u32>,
    pub shared_region_size: Option<u32>,
    pub stackframe_pointer_cache_size: Option<u32>,
}

impl Function {
    /// A new function declaration, as produced by firstpass.
    pub fn new(name: Symbol, parent: Option<FunctionId>) -> Self {
        Self {
            name,
            signature: None,
            parent,
            children: Vec::new(),
            params: Vec::new(),
            locals: Vec::new(),
            is_variadic: false,
            is_recursive: false,
            its_pointer_is_obtained: false,
            uses_this: false,
            could_not_get_a_stackframe_holder: false,
            is_stackframe_holder: false,
            stackframe_holder: None,
            cached_stackframes: Vec::new(),
            called_functions: HashMap::new(),
            register_ring: None,
            instructions: Vec::new(),
            machine_code: Vec::new(),
            comments: Vec::new(),
            labels: LabelTable::default(),
            last_use: HashMap::new(),
            locals_size: None,
            shared_region_size: None,
            stackframe_pointer_cache_size: None,
        }
    }

    /// Begin secondpass code emission: allocate this function's register
    /// ring.
    pub fn begin_codegen(&mut self, gpr_count: usize) {
        self.register_ring = Some(RegisterRing::new(gpr_count));
    }

    /// The register ring, once `begin_codegen` has run.
    pub fn ring(&self) -> &RegisterRing {
        self.register_ring.as_ref().expect("begin_codegen not called")
    }

    /// The register ring, mutably, once `begin_codegen` has run.
    pub fn ring_mut(&mut self) -> &mut RegisterRing {
        self.register_ring.as_mut().expect("begin_codegen not called")
    }

    /// Record a call to `callee`, bumping its use count.
    pub fn record_call(&mut self, callee: FunctionId) {
        *self.called_functions.entry(callee).or_insert(0) += 1;
    }

    /// Find (or reserve) this function's cache slot for the ancestor at
    /// `level`, returning its position. Slots are kept ordered by
    /// ascending level (spec.md §3 Cached Stackframe record, §4.3).
    pub fn cache_slot_for_level(&mut self, level: u32) -> u32 {
        if let Some(existing) = self.cached_stackframes.iter().find(|c| c.level == level) {
            return existing.position;
        }
        let position = self.cached_stackframes.len() as u32;
        self.cached_stackframes.push(CachedFrame { level, position });
        self.cached_stackframes.sort_by_key(|c| c.level);
        // Positions are assigned at first-insertion time and never
        // renumbered even though the list display order is sorted by
        // level, so that earlier-resolved immediates stay valid.
        position
    }

    /// Append an instruction, returning its id. Updates the per-register
    /// last-use table with every register this instruction touches
    /// (spec.md §4.8).
    pub fn emit(&mut self, opcode: Opcode, regs: RegOperands, size: u8, imm: Option<crate::ir::immediate::ImmediateDescriptor>) -> InstId {
        let id = InstId::from_u32(self.instructions.len() as u32);
        for reg in regs.iter() {
            self.last_use.insert(reg, id);
        }
        self.instructions.push(Instruction {
            opcode,
            regs,
            size,
            imm,
        });
        id
    }

    /// Append a raw machine-code string from an inline assembly block.
    pub fn emit_machine_code(&mut self, code: &str) -> InstId {
        let idx = MachineCodeIndex(self.machine_code.len() as u32);
        self.machine_code.push(code.into());
        self.emit(Opcode::MachineCode(idx), RegOperands::none(), 0, None)
    }

    /// Append a non-semantic comment, only meant to be emitted when
    /// `Config::emit_comments` is set (spec.md §7).
    pub fn emit_comment(&mut self, text: &str) -> InstId {
        let idx = CommentIndex(self.comments.len() as u32);
        self.comments.push(text.into());
        self.emit(Opcode::Comment(idx), RegOperands::none(), 0, None)
    }

    /// Declare a new, unplanted label.
    pub fn declare_label(&mut self, name: &str) -> crate::ir::entities::LabelId {
        self.labels.declare(name)
    }

    /// Plant `label` at the next instruction to be emitted, inserting a
    /// zero-width marker (spec.md §4.8 "Emits labels by inserting a
    /// zero-width marker").
    pub fn plant_label(&mut self, label: crate::ir::entities::LabelId) -> CodegenResult<InstId> {
        let id = self.emit(Opcode::LabelMark, RegOperands::none(), 0, None);
        self.labels.plant(label, id)?;
        Ok(id)
    }

    /// Build an immediate descriptor referencing `label`.
    pub fn reference_label(
        &mut self,
        label: crate::ir::entities::LabelId,
        pos: SourcePosition,
    ) -> crate::ir::immediate::ImmediateDescriptor {
        self.labels.reference(label, pos)
    }

    /// Close out code generation for this function: every label must have
    /// been planted by now (spec.md §4.8, §8 property 5).
    pub fn finish_codegen(&self) -> CodegenResult<()> {
        self.labels.check_all_resolved()
    }

    /// Total instructions emitted so far.
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Borrow the instruction list.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Raw machine-code string for a `MachineCode` instruction's index.
    pub fn machine_code(&self, idx: MachineCodeIndex) -> &str {
        &self.machine_code[idx.0 as usize]
    }

    /// Comment text for a `Comment` instruction's index.
    pub fn comment(&self, idx: CommentIndex) -> &str {
        &self.comments[idx.0 as usize]
    }
}
