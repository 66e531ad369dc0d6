//! Three-address IR instructions and the opcode set they're built from
//! (spec.md §2 component 4, §3 Instruction entity).

use crate::ir::entities::RegisterId;
use crate::ir::immediate::ImmediateDescriptor;

/// The opcodes the core can emit. Operand roles are documented per variant;
/// the assembly parser (spec.md §4.7) groups opcodes into the "opcode
/// categories" named in the GLOSSARY (`outinin`, `inoutin`, `jcondinimm`,
/// `jlabel`, ...) by inspecting these same roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    /// `add dst, a, b` -- integer addition.
    Add,
    /// `sub dst, a, b` -- integer subtraction.
    Sub,
    /// `and dst, a, b` -- bitwise and.
    And,
    /// `or dst, a, b` -- bitwise or; also used to OR-merge a bitfield back
    /// into its main register during a bitselected flush (spec.md §4.2).
    Or,
    /// `xor dst, a, b` -- bitwise xor.
    Xor,
    /// `shl dst, a, b` -- logical shift left.
    Shl,
    /// `shr dst, a, b` -- logical shift right, used between successive
    /// stores of a multi-store flush and to extract a bitfield after load.
    Shr,
    /// `sar dst, a, b` -- arithmetic shift right, used for sign extension
    /// via shift-pairs on targets without a dedicated extend opcode.
    Sar,
    /// `mul dst, a, b` -- integer multiply.
    Mul,
    /// `div dst, a, b` -- integer divide.
    Div,
    /// `not dst, a` -- bitwise complement.
    Not,
    /// `neg dst, a` -- arithmetic negation.
    Neg,
    /// `snz dst, a` -- "set non-zero": dst = (a != 0) ? 1 : 0. Used to
    /// reduce a short-circuit operand to a boolean (spec.md §4.5.1).
    SetNonZero,
    /// `sez dst, a` -- "set equal to zero": dst = (a == 0) ? 1 : 0.
    SetZero,
    /// `zxt dst, a` -- zero-extend `a` (already sized by the instruction's
    /// `size` field, carried on the owning register instead) into `dst`.
    ZeroExtend,
    /// `sxt dst, a` -- sign-extend `a` into `dst`.
    SignExtend,
    /// `li dst, imm` -- load an immediate/deferred-immediate into `dst`.
    LoadImmediate,
    /// `cpy dst, a` -- register-to-register copy, or a zero-immediate
    /// `addi` degenerates to this (spec.md §4.4).
    Copy,
    /// `addi dst, base, imm` -- `dst = base + imm`, the address-computation
    /// workhorse for LOAD-ADDR and for region-base arithmetic.
    AddImmediate,
    /// `afip dst, imm` -- "add from instruction pointer": a code-relative
    /// address-of-label/function/region load.
    Afip,
    /// `ldb`/`ldh`/`ldw`/`ldd dst, base, imm` -- aligned load of 1/2/4/8
    /// bytes from `base + imm`. The concrete width is carried in the
    /// instruction's `size` field.
    Load,
    /// `stb`/`sth`/`stw`/`std base, imm, src` -- aligned store of 1/2/4/8
    /// bytes of `src` to `base + imm`.
    Store,
    /// `j label` -- unconditional jump.
    Jump,
    /// `jz a, label` -- jump if `a == 0`.
    JumpIfZero,
    /// `jnz a, label` -- jump if `a != 0`.
    JumpIfNotZero,
    /// `jl dst, label` -- jump-and-link: branch to a statically known
    /// function, storing the return address in register `dst`.
    JumpAndLink,
    /// `jpush label` -- call sequencer's direct call: like `jl` but also
    /// performs the stackframe push implied by the callee's ABI.
    JumpPush,
    /// `jpushi imm` -- `jpush` to an immediate (deferred) target.
    JumpPushImmediate,
    /// `jpushr reg` -- indirect call through a register holding the callee
    /// address.
    JumpPushRegister,
    /// `stackpagealloc dst` -- installs a new stack page, linking it at the
    /// bottom of the current one; `dst` receives the new page's top.
    StackPageAlloc,
    /// `stackpagefree reg` -- frees the stack page whose prior-page pointer
    /// was loaded into `reg`.
    StackPageFree,
    /// `pagealloc dst, imm` -- generic page allocation (inline-asm visible
    /// opcode distinct from the call sequencer's own stack page intrinsics).
    PageAlloc,
    /// `pagefree reg` -- generic page free.
    PageFree,
    /// `memcpy dst, src, imm` -- copy `imm` words from `src` to `dst`,
    /// without touching the code model's view of `src`/`dst`'s contents.
    MemCopy,
    /// `memcpyi dst, src, imm` -- like `memcpy`, but additionally applies
    /// `propagatevarchange` to the destination operand (spec.md §4.7).
    MemCopyUpdating,
    /// A zero-width marker recording where a label was planted; never
    /// itself has size and is skipped by layout.
    LabelMark,
    /// Raw machine code string supplied by an inline assembly block. The
    /// programmer is responsible for respecting unreserved registers.
    MachineCode(MachineCodeIndex),
    /// A non-semantic annotation, emitted only when `Config::emit_comments`
    /// is set; has size zero and must be ignored by layout and code-size
    /// computation (spec.md §7).
    Comment(CommentIndex),
}

/// Index into a function's table of raw machine-code strings, kept out of
/// line from `Instruction` itself so the latter stays small and `Copy`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MachineCodeIndex(pub u32);

/// Index into a function's table of comment strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommentIndex(pub u32);

/// Up to three register operands, in (dst, a, b) order for opcodes that use
/// fewer than three; unused slots are `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegOperands {
    /// First operand -- almost always the destination for opcodes with an
    /// output.
    pub r0: Option<RegisterId>,
    /// Second operand.
    pub r1: Option<RegisterId>,
    /// Third operand.
    pub r2: Option<RegisterId>,
}

impl RegOperands {
    /// No register operands.
    pub fn none() -> Self {
        Self::default()
    }

    /// A single register operand.
    pub fn one(r0: RegisterId) -> Self {
        Self {
            r0: Some(r0),
            r1: None,
            r2: None,
        }
    }

    /// Two register operands.
    pub fn two(r0: RegisterId, r1: RegisterId) -> Self {
        Self {
            r0: Some(r0),
            r1: Some(r1),
            r2: None,
        }
    }

    /// Three register operands.
    pub fn three(r0: RegisterId, r1: RegisterId, r2: RegisterId) -> Self {
        Self {
            r0: Some(r0),
            r1: Some(r1),
            r2: Some(r2),
        }
    }

    /// Iterate the operands actually present.
    pub fn iter(&self) -> impl Iterator<Item = RegisterId> + '_ {
        [self.r0, self.r1, self.r2].into_iter().flatten()
    }
}

/// One emitted instruction: an opcode, its register operands, and an
/// optional deferred immediate (spec.md §3 Instruction entity).
#[derive(Clone, Debug)]
pub struct Instruction {
    /// The opcode.
    pub opcode: Opcode,
    /// Register operands, role depending on `opcode`.
    pub regs: RegOperands,
    /// The size in bytes of the memory access or register value this
    /// instruction manipulates (0 when not applicable, e.g. `Jump`).
    pub size: u8,
    /// Deferred immediate operand, if any.
    pub imm: Option<ImmediateDescriptor>,
}

impl Instruction {
    /// Does this instruction have zero size for layout purposes (labels
    /// and comments)?
    pub fn is_zero_width(&self) -> bool {
        matches!(self.opcode, Opcode::LabelMark | Opcode::Comment(_))
    }

    /// Is this opcode one of the call-sequencer's indirect/immediate-target
    /// jump-push forms, which forces the enclosing function's
    /// `could_not_get_a_stackframe_holder` flag (spec.md §4.7 "Special
    /// opcodes")?
    pub fn forces_no_stackframe_holder(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::JumpPush | Opcode::JumpPushImmediate | Opcode::JumpPushRegister
        )
    }

    /// Is this an unconditional or conditional branch (used to decide the
    /// `flushanddiscardallreg` flag before emitting it, spec.md §4.7)?
    pub fn is_branch(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::Jump
                | Opcode::JumpIfZero
                | Opcode::JumpIfNotZero
                | Opcode::JumpAndLink
                | Opcode::JumpPush
                | Opcode::JumpPushImmediate
                | Opcode::JumpPushRegister
        )
    }

    /// Is this a conditional branch specifically (uses
    /// `DONOTDISCARD`/flush-without-discard before emission, rather than a
    /// full flush-and-discard)?
    pub fn is_conditional_branch(&self) -> bool {
        matches!(self.opcode, Opcode::JumpIfZero | Opcode::JumpIfNotZero)
    }
}
