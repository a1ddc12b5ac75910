//! Intermediate representation: machine modes, instruction attributes,
//! registers, mnemonics, operands, and instructions.

use core::fmt;

use crate::program::LabelId;
use crate::x86::MAX_OPERANDS;

// ─── Machine mode ──────────────────────────────────────────────────────

/// Target machine mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MachineMode {
    /// 32-bit protected mode.
    I386,
    /// 64-bit long mode.
    Amd64,
}

impl MachineMode {
    /// Whether this is 64-bit long mode.
    #[inline]
    pub fn is_64(self) -> bool {
        matches!(self, MachineMode::Amd64)
    }
}

impl fmt::Display for MachineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineMode::I386 => write!(f, "i386"),
            MachineMode::Amd64 => write!(f, "amd64"),
        }
    }
}

// ─── Attributes ────────────────────────────────────────────────────────

/// Instruction attributes: legacy prefixes and operand-size hints.
///
/// Prefix flags map 1:1 to the byte-level encoder's prefix bits; the size
/// flags select its operand-size hint. At most one size flag should be set;
/// if several are, the smaller size wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Attribs(u16);

impl Attribs {
    /// No attributes.
    pub const NONE: Attribs = Attribs(0);
    /// `LOCK` prefix.
    pub const LOCK: Attribs = Attribs(1 << 0);
    /// `REP` prefix.
    pub const REP: Attribs = Attribs(1 << 1);
    /// `REPE` / `REPZ` prefix.
    pub const REPE: Attribs = Attribs(1 << 2);
    /// `REPNE` / `REPNZ` prefix.
    pub const REPNE: Attribs = Attribs(1 << 3);
    /// `BND` prefix.
    pub const BND: Attribs = Attribs(1 << 4);
    /// `XACQUIRE` prefix.
    pub const XACQUIRE: Attribs = Attribs(1 << 5);
    /// `XRELEASE` prefix.
    pub const XRELEASE: Attribs = Attribs(1 << 6);
    /// Force 8-bit operand size.
    pub const OPERAND_SIZE8: Attribs = Attribs(1 << 7);
    /// Force 16-bit operand size.
    pub const OPERAND_SIZE16: Attribs = Attribs(1 << 8);
    /// Force 32-bit operand size.
    pub const OPERAND_SIZE32: Attribs = Attribs(1 << 9);
    /// Force 64-bit operand size.
    pub const OPERAND_SIZE64: Attribs = Attribs(1 << 10);

    /// Whether all flags in `other` are set.
    #[inline]
    pub const fn contains(self, other: Attribs) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no flag is set.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl core::ops::BitOr for Attribs {
    type Output = Attribs;
    #[inline]
    fn bitor(self, rhs: Attribs) -> Attribs {
        Attribs(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for Attribs {
    #[inline]
    fn bitor_assign(&mut self, rhs: Attribs) {
        self.0 |= rhs.0;
    }
}

// ─── Registers ─────────────────────────────────────────────────────────

/// An x86/x86-64 register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum Register {
    // 8-bit low
    Al, Cl, Dl, Bl, Spl, Bpl, Sil, Dil,
    R8b, R9b, R10b, R11b, R12b, R13b, R14b, R15b,
    // 8-bit high (no REX)
    Ah, Ch, Dh, Bh,
    // 16-bit
    Ax, Cx, Dx, Bx, Sp, Bp, Si, Di,
    R8w, R9w, R10w, R11w, R12w, R13w, R14w, R15w,
    // 32-bit
    Eax, Ecx, Edx, Ebx, Esp, Ebp, Esi, Edi,
    R8d, R9d, R10d, R11d, R12d, R13d, R14d, R15d,
    // 64-bit
    Rax, Rcx, Rdx, Rbx, Rsp, Rbp, Rsi, Rdi,
    R8, R9, R10, R11, R12, R13, R14, R15,
    // Instruction pointer
    Rip,
    // Segment registers
    Es, Cs, Ss, Ds, Fs, Gs,
    // SSE
    Xmm0, Xmm1, Xmm2, Xmm3, Xmm4, Xmm5, Xmm6, Xmm7,
    Xmm8, Xmm9, Xmm10, Xmm11, Xmm12, Xmm13, Xmm14, Xmm15,
    // AVX
    Ymm0, Ymm1, Ymm2, Ymm3, Ymm4, Ymm5, Ymm6, Ymm7,
    Ymm8, Ymm9, Ymm10, Ymm11, Ymm12, Ymm13, Ymm14, Ymm15,
}

impl Register {
    /// Low 3 bits of the register number (the ModR/M / SIB field value).
    pub fn base_code(self) -> u8 {
        use Register::*;
        match self {
            Al | Ax | Eax | Rax | R8b | R8w | R8d | R8 | Xmm0 | Xmm8 | Ymm0 | Ymm8 | Es => 0,
            Cl | Cx | Ecx | Rcx | R9b | R9w | R9d | R9 | Xmm1 | Xmm9 | Ymm1 | Ymm9 | Cs => 1,
            Dl | Dx | Edx | Rdx | R10b | R10w | R10d | R10 | Xmm2 | Xmm10 | Ymm2 | Ymm10 | Ss => 2,
            Bl | Bx | Ebx | Rbx | R11b | R11w | R11d | R11 | Xmm3 | Xmm11 | Ymm3 | Ymm11 | Ds => 3,
            Ah | Spl | Sp | Esp | Rsp | R12b | R12w | R12d | R12 | Xmm4 | Xmm12 | Ymm4 | Ymm12
            | Fs => 4,
            Ch | Bpl | Bp | Ebp | Rbp | R13b | R13w | R13d | R13 | Xmm5 | Xmm13 | Ymm5 | Ymm13
            | Gs | Rip => 5,
            Dh | Sil | Si | Esi | Rsi | R14b | R14w | R14d | R14 | Xmm6 | Xmm14 | Ymm6 | Ymm14 => 6,
            Bh | Dil | Di | Edi | Rdi | R15b | R15w | R15d | R15 | Xmm7 | Xmm15 | Ymm7 | Ymm15 => 7,
        }
    }

    /// Full 4-bit register number (`base_code` plus the extension bit).
    #[inline]
    pub fn full_code(self) -> u8 {
        self.base_code() | if self.is_extended() { 8 } else { 0 }
    }

    /// Whether the register needs the REX.B/R/X extension bit (R8-R15,
    /// XMM8-15, YMM8-15).
    pub fn is_extended(self) -> bool {
        use Register::*;
        matches!(
            self,
            R8b | R9b | R10b | R11b | R12b | R13b | R14b | R15b
                | R8w | R9w | R10w | R11w | R12w | R13w | R14w | R15w
                | R8d | R9d | R10d | R11d | R12d | R13d | R14d | R15d
                | R8 | R9 | R10 | R11 | R12 | R13 | R14 | R15
                | Xmm8 | Xmm9 | Xmm10 | Xmm11 | Xmm12 | Xmm13 | Xmm14 | Xmm15
                | Ymm8 | Ymm9 | Ymm10 | Ymm11 | Ymm12 | Ymm13 | Ymm14 | Ymm15
        )
    }

    /// Register width in bits.
    pub fn size_bits(self) -> u16 {
        use Register::*;
        match self {
            Al | Cl | Dl | Bl | Spl | Bpl | Sil | Dil | R8b | R9b | R10b | R11b | R12b | R13b
            | R14b | R15b | Ah | Ch | Dh | Bh => 8,
            Ax | Cx | Dx | Bx | Sp | Bp | Si | Di | R8w | R9w | R10w | R11w | R12w | R13w | R14w
            | R15w | Es | Cs | Ss | Ds | Fs | Gs => 16,
            Eax | Ecx | Edx | Ebx | Esp | Ebp | Esi | Edi | R8d | R9d | R10d | R11d | R12d
            | R13d | R14d | R15d => 32,
            Rax | Rcx | Rdx | Rbx | Rsp | Rbp | Rsi | Rdi | R8 | R9 | R10 | R11 | R12 | R13
            | R14 | R15 | Rip => 64,
            Xmm0 | Xmm1 | Xmm2 | Xmm3 | Xmm4 | Xmm5 | Xmm6 | Xmm7 | Xmm8 | Xmm9 | Xmm10 | Xmm11
            | Xmm12 | Xmm13 | Xmm14 | Xmm15 => 128,
            Ymm0 | Ymm1 | Ymm2 | Ymm3 | Ymm4 | Ymm5 | Ymm6 | Ymm7 | Ymm8 | Ymm9 | Ymm10 | Ymm11
            | Ymm12 | Ymm13 | Ymm14 | Ymm15 => 256,
        }
    }

    /// Whether this is a general-purpose register.
    pub fn is_gp(self) -> bool {
        !self.is_vector() && !self.is_segment() && self != Register::Rip
    }

    /// Whether this is an XMM register.
    pub fn is_xmm(self) -> bool {
        use Register::*;
        matches!(
            self,
            Xmm0 | Xmm1 | Xmm2 | Xmm3 | Xmm4 | Xmm5 | Xmm6 | Xmm7 | Xmm8 | Xmm9 | Xmm10 | Xmm11
                | Xmm12 | Xmm13 | Xmm14 | Xmm15
        )
    }

    /// Whether this is a YMM register.
    pub fn is_ymm(self) -> bool {
        use Register::*;
        matches!(
            self,
            Ymm0 | Ymm1 | Ymm2 | Ymm3 | Ymm4 | Ymm5 | Ymm6 | Ymm7 | Ymm8 | Ymm9 | Ymm10 | Ymm11
                | Ymm12 | Ymm13 | Ymm14 | Ymm15
        )
    }

    /// Whether this is a vector (XMM/YMM) register.
    #[inline]
    pub fn is_vector(self) -> bool {
        self.is_xmm() || self.is_ymm()
    }

    /// Whether this is a segment register.
    pub fn is_segment(self) -> bool {
        use Register::*;
        matches!(self, Es | Cs | Ss | Ds | Fs | Gs)
    }

    /// Whether this is a high-byte register (AH, CH, DH, BH).
    /// These cannot be encoded together with a REX prefix.
    pub fn is_high_byte(self) -> bool {
        use Register::*;
        matches!(self, Ah | Ch | Dh | Bh)
    }

    /// Whether addressing this byte register requires a REX prefix even
    /// without extension bits (SPL, BPL, SIL, DIL).
    pub fn requires_rex_for_byte(self) -> bool {
        use Register::*;
        matches!(self, Spl | Bpl | Sil | Dil)
    }

    fn name(self) -> &'static str {
        use Register::*;
        match self {
            Al => "al", Cl => "cl", Dl => "dl", Bl => "bl",
            Spl => "spl", Bpl => "bpl", Sil => "sil", Dil => "dil",
            R8b => "r8b", R9b => "r9b", R10b => "r10b", R11b => "r11b",
            R12b => "r12b", R13b => "r13b", R14b => "r14b", R15b => "r15b",
            Ah => "ah", Ch => "ch", Dh => "dh", Bh => "bh",
            Ax => "ax", Cx => "cx", Dx => "dx", Bx => "bx",
            Sp => "sp", Bp => "bp", Si => "si", Di => "di",
            R8w => "r8w", R9w => "r9w", R10w => "r10w", R11w => "r11w",
            R12w => "r12w", R13w => "r13w", R14w => "r14w", R15w => "r15w",
            Eax => "eax", Ecx => "ecx", Edx => "edx", Ebx => "ebx",
            Esp => "esp", Ebp => "ebp", Esi => "esi", Edi => "edi",
            R8d => "r8d", R9d => "r9d", R10d => "r10d", R11d => "r11d",
            R12d => "r12d", R13d => "r13d", R14d => "r14d", R15d => "r15d",
            Rax => "rax", Rcx => "rcx", Rdx => "rdx", Rbx => "rbx",
            Rsp => "rsp", Rbp => "rbp", Rsi => "rsi", Rdi => "rdi",
            R8 => "r8", R9 => "r9", R10 => "r10", R11 => "r11",
            R12 => "r12", R13 => "r13", R14 => "r14", R15 => "r15",
            Rip => "rip",
            Es => "es", Cs => "cs", Ss => "ss", Ds => "ds", Fs => "fs", Gs => "gs",
            Xmm0 => "xmm0", Xmm1 => "xmm1", Xmm2 => "xmm2", Xmm3 => "xmm3",
            Xmm4 => "xmm4", Xmm5 => "xmm5", Xmm6 => "xmm6", Xmm7 => "xmm7",
            Xmm8 => "xmm8", Xmm9 => "xmm9", Xmm10 => "xmm10", Xmm11 => "xmm11",
            Xmm12 => "xmm12", Xmm13 => "xmm13", Xmm14 => "xmm14", Xmm15 => "xmm15",
            Ymm0 => "ymm0", Ymm1 => "ymm1", Ymm2 => "ymm2", Ymm3 => "ymm3",
            Ymm4 => "ymm4", Ymm5 => "ymm5", Ymm6 => "ymm6", Ymm7 => "ymm7",
            Ymm8 => "ymm8", Ymm9 => "ymm9", Ymm10 => "ymm10", Ymm11 => "ymm11",
            Ymm12 => "ymm12", Ymm13 => "ymm13", Ymm14 => "ymm14", Ymm15 => "ymm15",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Mnemonics ─────────────────────────────────────────────────────────

/// Instruction mnemonic.
///
/// A closed set: the general-purpose and branch mnemonics the byte-level
/// encoder implements, plus the is4 (XOP/FMA4-style) group the operand
/// fixup recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum Mnemonic {
    Add,
    And,
    Call,
    Cmp,
    Dec,
    Inc,
    Int3,
    Jb,
    Jbe,
    Jcxz,
    Jecxz,
    Jknzd,
    Jkzd,
    Jl,
    Jle,
    Jmp,
    Jnb,
    Jnbe,
    Jnl,
    Jnle,
    Jno,
    Jnp,
    Jns,
    Jnz,
    Jo,
    Jp,
    Jrcxz,
    Js,
    Jz,
    Lea,
    Loop,
    Loope,
    Loopne,
    Mov,
    Nop,
    Or,
    Pop,
    Push,
    Ret,
    Sub,
    Test,
    Xor,
    Vblendvpd,
    Vblendvps,
    Vfmaddpd,
    Vfmaddps,
    Vfmaddsd,
    Vfmaddss,
    Vfmaddsubpd,
    Vfmaddsubps,
    Vfmsubaddpd,
    Vfmsubaddps,
    Vfmsubpd,
    Vfmsubps,
    Vfmsubsd,
    Vfmsubss,
    Vfnmaddpd,
    Vfnmaddps,
    Vfnmaddsd,
    Vfnmaddss,
    Vfnmsubpd,
    Vfnmsubps,
    Vfnmsubsd,
    Vfnmsubss,
    Vpblendvb,
    Vpcmov,
    Vpermil2pd,
    Vpermil2ps,
    Vpmacsdd,
    Vpmacsdqh,
    Vpmacsdql,
    Vpmacssdd,
    Vpmacssdqh,
    Vpmacssdql,
    Vpmacsswd,
    Vpmacssww,
    Vpmacswd,
    Vpmacsww,
    Vpmadcsswd,
    Vpmadcswd,
    Vpperm,
}

impl Mnemonic {
    /// Lower-case mnemonic text.
    pub fn as_str(self) -> &'static str {
        use Mnemonic::*;
        match self {
            Add => "add",
            And => "and",
            Call => "call",
            Cmp => "cmp",
            Dec => "dec",
            Inc => "inc",
            Int3 => "int3",
            Jb => "jb",
            Jbe => "jbe",
            Jcxz => "jcxz",
            Jecxz => "jecxz",
            Jknzd => "jknzd",
            Jkzd => "jkzd",
            Jl => "jl",
            Jle => "jle",
            Jmp => "jmp",
            Jnb => "jnb",
            Jnbe => "jnbe",
            Jnl => "jnl",
            Jnle => "jnle",
            Jno => "jno",
            Jnp => "jnp",
            Jns => "jns",
            Jnz => "jnz",
            Jo => "jo",
            Jp => "jp",
            Jrcxz => "jrcxz",
            Js => "js",
            Jz => "jz",
            Lea => "lea",
            Loop => "loop",
            Loope => "loope",
            Loopne => "loopne",
            Mov => "mov",
            Nop => "nop",
            Or => "or",
            Pop => "pop",
            Push => "push",
            Ret => "ret",
            Sub => "sub",
            Test => "test",
            Xor => "xor",
            Vblendvpd => "vblendvpd",
            Vblendvps => "vblendvps",
            Vfmaddpd => "vfmaddpd",
            Vfmaddps => "vfmaddps",
            Vfmaddsd => "vfmaddsd",
            Vfmaddss => "vfmaddss",
            Vfmaddsubpd => "vfmaddsubpd",
            Vfmaddsubps => "vfmaddsubps",
            Vfmsubaddpd => "vfmsubaddpd",
            Vfmsubaddps => "vfmsubaddps",
            Vfmsubpd => "vfmsubpd",
            Vfmsubps => "vfmsubps",
            Vfmsubsd => "vfmsubsd",
            Vfmsubss => "vfmsubss",
            Vfnmaddpd => "vfnmaddpd",
            Vfnmaddps => "vfnmaddps",
            Vfnmaddsd => "vfnmaddsd",
            Vfnmaddss => "vfnmaddss",
            Vfnmsubpd => "vfnmsubpd",
            Vfnmsubps => "vfnmsubps",
            Vfnmsubsd => "vfnmsubsd",
            Vfnmsubss => "vfnmsubss",
            Vpblendvb => "vpblendvb",
            Vpcmov => "vpcmov",
            Vpermil2pd => "vpermil2pd",
            Vpermil2ps => "vpermil2ps",
            Vpmacsdd => "vpmacsdd",
            Vpmacsdqh => "vpmacsdqh",
            Vpmacsdql => "vpmacsdql",
            Vpmacssdd => "vpmacssdd",
            Vpmacssdqh => "vpmacssdqh",
            Vpmacssdql => "vpmacssdql",
            Vpmacsswd => "vpmacsswd",
            Vpmacssww => "vpmacssww",
            Vpmacswd => "vpmacswd",
            Vpmacsww => "vpmacsww",
            Vpmadcsswd => "vpmadcsswd",
            Vpmadcswd => "vpmadcswd",
            Vpperm => "vpperm",
        }
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Operands ──────────────────────────────────────────────────────────

/// A memory (indirect) operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemOperand {
    /// Access size in bytes, or 0 to infer from the other operand.
    pub size: u16,
    /// Base register (e.g., `rbp` in `[rbp+8]`).
    pub base: Option<Register>,
    /// Index register for SIB addressing (e.g., `rsi` in `[rbx+rsi*4]`).
    pub index: Option<Register>,
    /// SIB scale factor: 1, 2, 4, or 8.
    pub scale: u8,
    /// Displacement (constant offset) in bytes.
    pub disp: i64,
    /// When set, the label's address is folded into the displacement.
    pub label: Option<LabelId>,
    /// Segment override, if any (only FS/GS are encoded).
    pub segment: Option<Register>,
}

impl Default for MemOperand {
    fn default() -> Self {
        Self {
            size: 0,
            base: None,
            index: None,
            scale: 1,
            disp: 0,
            label: None,
            segment: None,
        }
    }
}

impl MemOperand {
    /// `[base]` with an access size in bytes.
    pub fn base(size: u16, base: Register) -> Self {
        Self {
            size,
            base: Some(base),
            ..Self::default()
        }
    }

    /// `[base + disp]`.
    pub fn base_disp(size: u16, base: Register, disp: i64) -> Self {
        Self {
            size,
            base: Some(base),
            disp,
            ..Self::default()
        }
    }

    /// `[label]`: the label's address becomes the displacement. Promoted
    /// to RIP-relative in 64-bit mode.
    pub fn label(size: u16, label: LabelId) -> Self {
        Self {
            size,
            label: Some(label),
            ..Self::default()
        }
    }

    /// `[disp]`: absolute addressing.
    pub fn abs(size: u16, disp: i64) -> Self {
        Self {
            size,
            disp,
            ..Self::default()
        }
    }
}

/// A single instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Operand {
    /// Absent slot.
    #[default]
    None,
    /// A register operand.
    Reg(Register),
    /// A literal immediate.
    Imm(i64),
    /// A symbolic reference to a label.
    Label(LabelId),
    /// A memory operand.
    Mem(MemOperand),
}

/// Operand visibility on an [`Instruction`].
///
/// Hidden operands terminate the explicit-operand prefix the encoder
/// receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OperandVisibility {
    /// Written by the user, encoded explicitly.
    #[default]
    Explicit,
    /// Implied by the mnemonic but still part of the operand list.
    Implicit,
    /// Not part of the encoded operand list.
    Hidden,
}

// ─── Instruction ───────────────────────────────────────────────────────

/// A single instruction: mnemonic, attributes, and up to
/// [`MAX_OPERANDS`] operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    /// Instruction mnemonic.
    pub mnemonic: Mnemonic,
    /// Prefixes and operand-size hints.
    pub attribs: Attribs,
    /// Operand slots, in Intel order (dest, src, ...).
    pub operands: [Operand; MAX_OPERANDS],
    /// Per-slot visibility.
    pub visibility: [OperandVisibility; MAX_OPERANDS],
}

impl Instruction {
    /// An instruction with no operands.
    pub fn new(mnemonic: Mnemonic) -> Self {
        Self {
            mnemonic,
            attribs: Attribs::NONE,
            operands: [Operand::None; MAX_OPERANDS],
            visibility: [OperandVisibility::Explicit; MAX_OPERANDS],
        }
    }

    /// An instruction with the given leading operands.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_OPERANDS`] operands are given.
    pub fn with_operands(mnemonic: Mnemonic, ops: &[Operand]) -> Self {
        assert!(
            ops.len() <= MAX_OPERANDS,
            "instruction has at most {} operands",
            MAX_OPERANDS
        );
        let mut instr = Self::new(mnemonic);
        instr.operands[..ops.len()].copy_from_slice(ops);
        instr
    }

    /// Builder-style attribute setter.
    pub fn with_attribs(mut self, attribs: Attribs) -> Self {
        self.attribs = attribs;
        self
    }

    /// Mark the operand at `index` with a visibility.
    pub fn set_visibility(&mut self, index: usize, visibility: OperandVisibility) {
        self.visibility[index] = visibility;
    }

    /// Number of leading explicit operands: counting stops at the first
    /// hidden or absent slot.
    pub fn explicit_op_count(&self) -> usize {
        let mut count = 0;
        for i in 0..MAX_OPERANDS {
            if self.visibility[i] == OperandVisibility::Hidden
                || self.operands[i] == Operand::None
            {
                break;
            }
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribs_bitops() {
        let a = Attribs::LOCK | Attribs::REP;
        assert!(a.contains(Attribs::LOCK));
        assert!(a.contains(Attribs::REP));
        assert!(!a.contains(Attribs::REPNE));
        assert!(Attribs::NONE.is_empty());
        assert!(!a.is_empty());
    }

    #[test]
    fn register_codes() {
        assert_eq!(Register::Rax.base_code(), 0);
        assert_eq!(Register::Rdi.base_code(), 7);
        assert_eq!(Register::R8.base_code(), 0);
        assert_eq!(Register::R8.full_code(), 8);
        assert!(Register::R8.is_extended());
        assert!(!Register::Rax.is_extended());
        assert_eq!(Register::Rip.base_code(), 5);
    }

    #[test]
    fn register_sizes() {
        assert_eq!(Register::Al.size_bits(), 8);
        assert_eq!(Register::Ax.size_bits(), 16);
        assert_eq!(Register::Eax.size_bits(), 32);
        assert_eq!(Register::Rax.size_bits(), 64);
        assert_eq!(Register::Xmm3.size_bits(), 128);
        assert_eq!(Register::Ymm12.size_bits(), 256);
    }

    #[test]
    fn register_classes() {
        assert!(Register::Rax.is_gp());
        assert!(!Register::Rip.is_gp());
        assert!(Register::Xmm9.is_xmm());
        assert!(Register::Xmm9.is_extended());
        assert!(Register::Ymm1.is_vector());
        assert!(Register::Fs.is_segment());
        assert!(Register::Ah.is_high_byte());
        assert!(Register::Spl.requires_rex_for_byte());
    }

    #[test]
    fn register_display() {
        assert_eq!(format!("{}", Register::Rax), "rax");
        assert_eq!(format!("{}", Register::R13d), "r13d");
        assert_eq!(format!("{}", Register::Ymm15), "ymm15");
    }

    #[test]
    fn explicit_op_count_stops_at_gap() {
        let instr = Instruction::with_operands(
            Mnemonic::Mov,
            &[Operand::Reg(Register::Rax), Operand::Imm(1)],
        );
        assert_eq!(instr.explicit_op_count(), 2);

        let mut hidden = instr;
        hidden.set_visibility(1, OperandVisibility::Hidden);
        assert_eq!(hidden.explicit_op_count(), 1);

        assert_eq!(Instruction::new(Mnemonic::Nop).explicit_op_count(), 0);
    }
}
