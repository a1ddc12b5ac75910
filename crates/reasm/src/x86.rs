//! Byte-level x86/x86-64 instruction encoder.
//!
//! Turns a populated [`Request`] into machine-code bytes with manual REX,
//! ModR/M, SIB, and VEX prefix construction. The context-aware core in
//! [`crate::encoder`] resolves labels and relative displacements before the
//! request reaches this layer; everything here works on concrete values.
//!
//! Any request this layer cannot express is [`Error::ImpossibleInstruction`].

use alloc::vec::Vec;

use crate::error::Error;
use crate::ir::{MachineMode, Mnemonic, Register};

/// Operand capacity of a [`Request`].
pub const MAX_OPERANDS: usize = 5;

/// Architectural maximum instruction length.
pub const MAX_INSTR_LEN: usize = 15;

// ─── InstrBytes: stack-allocated instruction buffer ────────────────────

/// Stack-allocated instruction byte buffer. x86 instructions are at most
/// 15 bytes, so encoding never touches the heap.
#[derive(Clone, Copy)]
pub struct InstrBytes {
    data: [u8; MAX_INSTR_LEN],
    len: u8,
}

impl InstrBytes {
    /// Create an empty buffer.
    #[inline]
    pub const fn new() -> Self {
        Self {
            data: [0; MAX_INSTR_LEN],
            len: 0,
        }
    }

    /// Create a buffer pre-filled from a byte slice.
    ///
    /// # Panics
    ///
    /// Panics if `src` exceeds the 15-byte capacity.
    #[inline]
    pub fn from_slice(src: &[u8]) -> Self {
        let mut buf = Self::new();
        buf.extend_from_slice(src);
        buf
    }

    /// Append a single byte.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is already full.
    #[inline]
    pub fn push(&mut self, byte: u8) {
        assert!(
            (self.len as usize) < MAX_INSTR_LEN,
            "InstrBytes overflow: cannot push beyond {} bytes",
            MAX_INSTR_LEN
        );
        self.data[self.len as usize] = byte;
        self.len += 1;
    }

    /// Append a slice of bytes.
    ///
    /// # Panics
    ///
    /// Panics if appending would exceed the 15-byte capacity.
    #[inline]
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        let start = self.len as usize;
        let end = start + bytes.len();
        assert!(
            end <= MAX_INSTR_LEN,
            "InstrBytes overflow: {} + {} exceeds {}-byte capacity",
            start,
            bytes.len(),
            MAX_INSTR_LEN
        );
        self.data[start..end].copy_from_slice(bytes);
        self.len = end as u8;
    }

    /// Number of bytes in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Convert to a heap-allocated `Vec<u8>`.
    #[inline]
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_ref().to_vec()
    }
}

impl Default for InstrBytes {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl core::ops::Deref for InstrBytes {
    type Target = [u8];
    #[inline]
    fn deref(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl AsRef<[u8]> for InstrBytes {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl core::fmt::Debug for InstrBytes {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl PartialEq for InstrBytes {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl Eq for InstrBytes {}

impl PartialEq<[u8]> for InstrBytes {
    fn eq(&self, other: &[u8]) -> bool {
        **self == *other
    }
}

impl PartialEq<Vec<u8>> for InstrBytes {
    fn eq(&self, other: &Vec<u8>) -> bool {
        **self == **other
    }
}

// ─── Request ───────────────────────────────────────────────────────────

/// Legacy prefix bits on a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrefixFlags(u16);

impl PrefixFlags {
    /// No prefixes.
    pub const NONE: PrefixFlags = PrefixFlags(0);
    /// `LOCK` (0xF0).
    pub const LOCK: PrefixFlags = PrefixFlags(1 << 0);
    /// `REP` (0xF3).
    pub const REP: PrefixFlags = PrefixFlags(1 << 1);
    /// `REPE` (0xF3).
    pub const REPE: PrefixFlags = PrefixFlags(1 << 2);
    /// `REPNE` (0xF2).
    pub const REPNE: PrefixFlags = PrefixFlags(1 << 3);
    /// `BND` (0xF2).
    pub const BND: PrefixFlags = PrefixFlags(1 << 4);
    /// `XACQUIRE` (0xF2).
    pub const XACQUIRE: PrefixFlags = PrefixFlags(1 << 5);
    /// `XRELEASE` (0xF3).
    pub const XRELEASE: PrefixFlags = PrefixFlags(1 << 6);
    /// `FS:` segment override (0x64).
    pub const SEG_FS: PrefixFlags = PrefixFlags(1 << 7);
    /// `GS:` segment override (0x65).
    pub const SEG_GS: PrefixFlags = PrefixFlags(1 << 8);

    /// Whether all flags in `other` are set.
    #[inline]
    pub const fn contains(self, other: PrefixFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for PrefixFlags {
    type Output = PrefixFlags;
    #[inline]
    fn bitor(self, rhs: PrefixFlags) -> PrefixFlags {
        PrefixFlags(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for PrefixFlags {
    #[inline]
    fn bitor_assign(&mut self, rhs: PrefixFlags) {
        self.0 |= rhs.0;
    }
}

/// Requested branch form for control-flow instructions.
///
/// The hint expresses a preference; the available form set of the mnemonic
/// is authoritative. Short-only mnemonics (`JCXZ`, `LOOP`, ...) encode
/// rel8 even under a `Near` hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BranchHint {
    /// No preference.
    #[default]
    None,
    /// rel8 form.
    Short,
    /// rel32 form.
    Near,
}

/// Operand-size hint for requests where no register pins the width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SizeHint {
    /// Infer from operands.
    #[default]
    None,
    /// 8-bit.
    Byte,
    /// 16-bit.
    Word,
    /// 32-bit.
    Dword,
    /// 64-bit.
    Qword,
}

/// Memory payload of a request operand. Labels are already folded into
/// `disp` by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReqMem {
    /// Base register, `Register::Rip` for RIP-relative addressing.
    pub base: Option<Register>,
    /// Index register.
    pub index: Option<Register>,
    /// Scale factor: 1, 2, 4, or 8.
    pub scale: u8,
    /// Access size in bytes (0 = infer).
    pub size: u16,
    /// Displacement.
    pub disp: i64,
}

/// One operand slot of a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReqOperand {
    /// Absent slot.
    #[default]
    Unused,
    /// Register, optionally flagged as the is4 (imm8\[7:4\]) operand.
    Reg {
        /// The register.
        reg: Register,
        /// Encode this register in the upper nibble of a trailing imm8.
        is4: bool,
    },
    /// Signed immediate. Control-flow displacements arrive here already
    /// made relative by the core.
    Imm(i64),
    /// Memory operand.
    Mem(ReqMem),
}

impl ReqOperand {
    /// Register constructor without the is4 flag.
    #[inline]
    pub fn reg(reg: Register) -> Self {
        ReqOperand::Reg { reg, is4: false }
    }
}

/// A fully-populated encoding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Request {
    /// Target machine mode.
    pub mode: MachineMode,
    /// Mnemonic to encode.
    pub mnemonic: Mnemonic,
    /// Legacy prefix bits.
    pub prefixes: PrefixFlags,
    /// Branch form preference.
    pub branch_hint: BranchHint,
    /// Operand-size hint.
    pub size_hint: SizeHint,
    /// Number of populated operand slots.
    pub operand_count: u8,
    /// Operand slots.
    pub operands: [ReqOperand; MAX_OPERANDS],
}

impl Request {
    /// An empty request for the given mode and mnemonic.
    pub fn new(mode: MachineMode, mnemonic: Mnemonic) -> Self {
        Self {
            mode,
            mnemonic,
            prefixes: PrefixFlags::NONE,
            branch_hint: BranchHint::None,
            size_hint: SizeHint::None,
            operand_count: 0,
            operands: [ReqOperand::Unused; MAX_OPERANDS],
        }
    }

    fn ops(&self) -> &[ReqOperand] {
        &self.operands[..self.operand_count as usize]
    }
}

// ─── REX / ModR/M / SIB helpers ────────────────────────────────────────

/// Build a REX prefix byte.
#[inline]
fn rex(w: bool, r: bool, x: bool, b: bool) -> u8 {
    let mut val: u8 = 0x40;
    if w {
        val |= 0x08;
    }
    if r {
        val |= 0x04;
    }
    if x {
        val |= 0x02;
    }
    if b {
        val |= 0x01;
    }
    val
}

/// Build a ModR/M byte.
#[inline]
fn modrm(mod_: u8, reg: u8, rm: u8) -> u8 {
    (mod_ << 6) | ((reg & 7) << 3) | (rm & 7)
}

/// Build a SIB byte.
#[inline]
fn sib(scale: u8, index: u8, base: u8) -> u8 {
    let ss = match scale {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        _ => 0,
    };
    (ss << 6) | ((index & 7) << 3) | (base & 7)
}

#[inline]
fn impossible<T>() -> Result<T, Error> {
    Err(Error::ImpossibleInstruction)
}

/// Displacement as little-endian disp32, or impossible if out of range.
#[inline]
fn disp32(disp: i64) -> Result<[u8; 4], Error> {
    match i32::try_from(disp) {
        Ok(v) => Ok(v.to_le_bytes()),
        Err(_) => impossible(),
    }
}

/// Append a little-endian immediate of `size` bits. Values are truncated
/// to the field width.
fn emit_imm(buf: &mut InstrBytes, imm: i64, size: u8) {
    match size {
        8 => buf.push(imm as u8),
        16 => buf.extend_from_slice(&(imm as u16).to_le_bytes()),
        64 => buf.extend_from_slice(&(imm as u64).to_le_bytes()),
        _ => buf.extend_from_slice(&(imm as u32).to_le_bytes()),
    }
}

/// Validate that base/index registers are legal addressing registers for
/// the mode.
fn check_addr_regs(mode: MachineMode, mem: &ReqMem) -> Result<(), Error> {
    let addr_bits = if mode.is_64() { 64 } else { 32 };
    if let Some(base) = mem.base {
        if base != Register::Rip && (!base.is_gp() || base.size_bits() != addr_bits) {
            return impossible();
        }
        if base == Register::Rip && !mode.is_64() {
            return impossible();
        }
    }
    if let Some(index) = mem.index {
        if !index.is_gp() || index.size_bits() != addr_bits {
            return impossible();
        }
        // RSP/ESP cannot be an index (SIB index 0b100 means "none").
        if index.base_code() == 0b100 && !index.is_extended() {
            return impossible();
        }
        if !matches!(mem.scale, 1 | 2 | 4 | 8) {
            return impossible();
        }
    }
    if !mode.is_64() {
        let extended = mem.base.is_some_and(Register::is_extended)
            || mem.index.is_some_and(Register::is_extended);
        if extended {
            return impossible();
        }
    }
    Ok(())
}

/// REX.X / REX.B bits contributed by a memory operand.
#[inline]
fn mem_rex_xb(mem: &ReqMem) -> (bool, bool) {
    let x = mem.index.is_some_and(Register::is_extended);
    let b = mem
        .base
        .is_some_and(|r| r != Register::Rip && r.is_extended());
    (x, b)
}

/// Emit 0x66 / REX for a reg,reg form; `rm` lands in ModR/M.r/m.
fn emit_rr(buf: &mut InstrBytes, mode: MachineMode, opcode: u8, rm: Register, reg: Register) -> Result<(), Error> {
    if !rm.is_gp() || !reg.is_gp() || rm.size_bits() != reg.size_bits() {
        return impossible();
    }
    let size = rm.size_bits();
    if size == 64 && !mode.is_64() {
        return impossible();
    }
    if size == 16 {
        buf.push(0x66);
    }
    let w = size == 64;
    let r = reg.is_extended();
    let b = rm.is_extended();
    let need_rex = w || r || b || rm.requires_rex_for_byte() || reg.requires_rex_for_byte();
    if need_rex {
        // High-byte registers cannot coexist with a REX prefix.
        if !mode.is_64() || rm.is_high_byte() || reg.is_high_byte() {
            return impossible();
        }
        buf.push(rex(w, r, false, b));
    }
    buf.push(opcode);
    buf.push(modrm(0b11, reg.base_code(), rm.base_code()));
    Ok(())
}

/// Emit 0x66 / REX for a reg,mem form.
fn emit_rex_reg_mem(
    buf: &mut InstrBytes,
    mode: MachineMode,
    reg: Register,
    mem: &ReqMem,
) -> Result<(), Error> {
    check_addr_regs(mode, mem)?;
    let size = reg.size_bits();
    if size == 64 && !mode.is_64() {
        return impossible();
    }
    if size == 16 {
        buf.push(0x66);
    }
    let w = size == 64;
    let r = reg.is_extended();
    let (x, b) = mem_rex_xb(mem);
    let need_rex = w || r || x || b || reg.requires_rex_for_byte();
    if need_rex {
        if !mode.is_64() || reg.is_high_byte() {
            return impossible();
        }
        buf.push(rex(w, r, x, b));
    }
    Ok(())
}

/// Emit 0x66 / REX for a /digit,mem form (no register operand).
fn emit_rex_digit_mem(
    buf: &mut InstrBytes,
    mode: MachineMode,
    size: u16,
    mem: &ReqMem,
) -> Result<(), Error> {
    check_addr_regs(mode, mem)?;
    if size == 64 && !mode.is_64() {
        return impossible();
    }
    if size == 16 {
        buf.push(0x66);
    }
    let w = size == 64;
    let (x, b) = mem_rex_xb(mem);
    if w || x || b {
        if !mode.is_64() {
            return impossible();
        }
        buf.push(rex(w, false, x, b));
    }
    Ok(())
}

/// Emit ModR/M + SIB + displacement for a memory operand.
fn emit_mem_modrm(
    buf: &mut InstrBytes,
    mode: MachineMode,
    reg_field: u8,
    mem: &ReqMem,
) -> Result<(), Error> {
    let base = mem.base;
    let index = mem.index;
    let disp = mem.disp;

    // RIP-relative addressing: [rip + disp32] (64-bit only).
    if base == Some(Register::Rip) {
        if !mode.is_64() || index.is_some() {
            return impossible();
        }
        buf.push(modrm(0b00, reg_field, 0b101));
        buf.extend_from_slice(&disp32(disp)?);
        return Ok(());
    }

    // Absolute address / displacement only: [disp32].
    if base.is_none() && index.is_none() {
        if mode.is_64() {
            // In 64-bit mode mod=00 r/m=101 means RIP-relative; absolute
            // addressing goes through a SIB byte with no base.
            buf.push(modrm(0b00, reg_field, 0b100));
            buf.push(sib(1, 0b100, 0b101));
        } else {
            buf.push(modrm(0b00, reg_field, 0b101));
        }
        buf.extend_from_slice(&disp32(disp)?);
        return Ok(());
    }

    // SIB index-only: [index*scale + disp32], mod=00 SIB base=101.
    if base.is_none() {
        let Some(idx) = index else {
            return impossible();
        };
        buf.push(modrm(0b00, reg_field, 0b100));
        buf.push(sib(mem.scale, idx.base_code(), 0b101));
        buf.extend_from_slice(&disp32(disp)?);
        return Ok(());
    }

    let base = base.unwrap_or(Register::Rax);
    let need_sib = index.is_some() || base.base_code() == 0b100;

    let (mod_bits, disp_size) = if disp == 0 && base.base_code() != 0b101 {
        // mod=00, no displacement (RBP/R13 base always needs at least disp8).
        (0b00, 0)
    } else if (-128..=127).contains(&disp) {
        (0b01, 1)
    } else {
        (0b10, 4)
    };

    if need_sib {
        // SIB index 0b100 means "no index".
        let idx_code = index.map_or(0b100, Register::base_code);
        buf.push(modrm(mod_bits, reg_field, 0b100));
        buf.push(sib(mem.scale, idx_code, base.base_code()));
    } else {
        buf.push(modrm(mod_bits, reg_field, base.base_code()));
    }

    match disp_size {
        1 => buf.push(disp as i8 as u8),
        4 => buf.extend_from_slice(&disp32(disp)?),
        _ => {}
    }

    Ok(())
}

// ─── Legacy prefixes ───────────────────────────────────────────────────

/// A single instruction carries at most one prefix from the 0xF2/0xF3
/// group and at most one segment override; conflicting combinations have
/// no encoding.
fn validate_prefixes(prefixes: PrefixFlags) -> Result<(), Error> {
    let f2_f3_group = [
        PrefixFlags::REP,
        PrefixFlags::REPE,
        PrefixFlags::REPNE,
        PrefixFlags::BND,
        PrefixFlags::XACQUIRE,
        PrefixFlags::XRELEASE,
    ];
    let count = f2_f3_group
        .iter()
        .filter(|&&flag| prefixes.contains(flag))
        .count();
    if count > 1 {
        return impossible();
    }
    if prefixes.contains(PrefixFlags::SEG_FS) && prefixes.contains(PrefixFlags::SEG_GS) {
        return impossible();
    }
    Ok(())
}

fn emit_legacy_prefixes(buf: &mut InstrBytes, prefixes: PrefixFlags) {
    if prefixes.contains(PrefixFlags::XACQUIRE)
        || prefixes.contains(PrefixFlags::REPNE)
        || prefixes.contains(PrefixFlags::BND)
    {
        buf.push(0xF2);
    }
    if prefixes.contains(PrefixFlags::XRELEASE)
        || prefixes.contains(PrefixFlags::REP)
        || prefixes.contains(PrefixFlags::REPE)
    {
        buf.push(0xF3);
    }
    if prefixes.contains(PrefixFlags::LOCK) {
        buf.push(0xF0);
    }
    if prefixes.contains(PrefixFlags::SEG_FS) {
        buf.push(0x64);
    }
    if prefixes.contains(PrefixFlags::SEG_GS) {
        buf.push(0x65);
    }
}

// ─── Entry point ───────────────────────────────────────────────────────

/// Encode one request into machine-code bytes.
///
/// # Errors
///
/// [`Error::ImpossibleInstruction`] when the mnemonic is not encodable in
/// the requested mode or the operand combination has no encoding.
pub fn emit(req: &Request) -> Result<InstrBytes, Error> {
    validate_prefixes(req.prefixes)?;

    let mut buf = InstrBytes::new();
    emit_legacy_prefixes(&mut buf, req.prefixes);

    use Mnemonic::*;
    match req.mnemonic {
        Nop => encode_nop(&mut buf, req)?,
        Ret => encode_ret(&mut buf, req)?,
        Int3 => encode_int3(&mut buf, req)?,
        Mov => encode_mov(&mut buf, req)?,
        Lea => encode_lea(&mut buf, req)?,
        Add => encode_group1(&mut buf, req, 0)?,
        Or => encode_group1(&mut buf, req, 1)?,
        And => encode_group1(&mut buf, req, 4)?,
        Sub => encode_group1(&mut buf, req, 5)?,
        Xor => encode_group1(&mut buf, req, 6)?,
        Cmp => encode_group1(&mut buf, req, 7)?,
        Test => encode_test(&mut buf, req)?,
        Inc => encode_inc_dec(&mut buf, req, 0)?,
        Dec => encode_inc_dec(&mut buf, req, 1)?,
        Push => encode_push(&mut buf, req)?,
        Pop => encode_pop(&mut buf, req)?,
        Jmp => encode_jmp(&mut buf, req)?,
        Call => encode_call(&mut buf, req)?,
        Jo => encode_jcc(&mut buf, req, 0x0)?,
        Jno => encode_jcc(&mut buf, req, 0x1)?,
        Jb => encode_jcc(&mut buf, req, 0x2)?,
        Jnb => encode_jcc(&mut buf, req, 0x3)?,
        Jz => encode_jcc(&mut buf, req, 0x4)?,
        Jnz => encode_jcc(&mut buf, req, 0x5)?,
        Jbe => encode_jcc(&mut buf, req, 0x6)?,
        Jnbe => encode_jcc(&mut buf, req, 0x7)?,
        Js => encode_jcc(&mut buf, req, 0x8)?,
        Jns => encode_jcc(&mut buf, req, 0x9)?,
        Jp => encode_jcc(&mut buf, req, 0xA)?,
        Jnp => encode_jcc(&mut buf, req, 0xB)?,
        Jl => encode_jcc(&mut buf, req, 0xC)?,
        Jnl => encode_jcc(&mut buf, req, 0xD)?,
        Jle => encode_jcc(&mut buf, req, 0xE)?,
        Jnle => encode_jcc(&mut buf, req, 0xF)?,
        Jcxz | Jecxz | Jrcxz => encode_jcxz(&mut buf, req)?,
        Loop => encode_rel8_only(&mut buf, req, 0xE2)?,
        Loope => encode_rel8_only(&mut buf, req, 0xE1)?,
        Loopne => encode_rel8_only(&mut buf, req, 0xE0)?,
        Vblendvps => encode_vex_is4(&mut buf, req, 0x4A, true)?,
        Vblendvpd => encode_vex_is4(&mut buf, req, 0x4B, true)?,
        Vpblendvb => encode_vex_is4(&mut buf, req, 0x4C, true)?,
        Vfmaddsubps => encode_vex_is4(&mut buf, req, 0x5C, false)?,
        Vfmaddsubpd => encode_vex_is4(&mut buf, req, 0x5D, false)?,
        Vfmsubaddps => encode_vex_is4(&mut buf, req, 0x5E, false)?,
        Vfmsubaddpd => encode_vex_is4(&mut buf, req, 0x5F, false)?,
        Vfmaddps => encode_vex_is4(&mut buf, req, 0x68, false)?,
        Vfmaddpd => encode_vex_is4(&mut buf, req, 0x69, false)?,
        Vfmaddss => encode_vex_is4(&mut buf, req, 0x6A, false)?,
        Vfmaddsd => encode_vex_is4(&mut buf, req, 0x6B, false)?,
        Vfmsubps => encode_vex_is4(&mut buf, req, 0x6C, false)?,
        Vfmsubpd => encode_vex_is4(&mut buf, req, 0x6D, false)?,
        Vfmsubss => encode_vex_is4(&mut buf, req, 0x6E, false)?,
        Vfmsubsd => encode_vex_is4(&mut buf, req, 0x6F, false)?,
        Vfnmaddps => encode_vex_is4(&mut buf, req, 0x78, false)?,
        Vfnmaddpd => encode_vex_is4(&mut buf, req, 0x79, false)?,
        Vfnmaddss => encode_vex_is4(&mut buf, req, 0x7A, false)?,
        Vfnmaddsd => encode_vex_is4(&mut buf, req, 0x7B, false)?,
        Vfnmsubps => encode_vex_is4(&mut buf, req, 0x7C, false)?,
        Vfnmsubpd => encode_vex_is4(&mut buf, req, 0x7D, false)?,
        Vfnmsubss => encode_vex_is4(&mut buf, req, 0x7E, false)?,
        Vfnmsubsd => encode_vex_is4(&mut buf, req, 0x7F, false)?,
        // XOP-prefixed is4 mnemonics and the AVX-512 mask jumps have no
        // encoder here.
        _ => return impossible(),
    }
    Ok(buf)
}

// ─── Simple opcodes ────────────────────────────────────────────────────

fn encode_nop(buf: &mut InstrBytes, req: &Request) -> Result<(), Error> {
    if req.operand_count != 0 {
        return impossible();
    }
    buf.push(0x90);
    Ok(())
}

fn encode_int3(buf: &mut InstrBytes, req: &Request) -> Result<(), Error> {
    if req.operand_count != 0 {
        return impossible();
    }
    buf.push(0xCC);
    Ok(())
}

fn encode_ret(buf: &mut InstrBytes, req: &Request) -> Result<(), Error> {
    match req.ops() {
        [] => buf.push(0xC3),
        [ReqOperand::Imm(n)] if (0..=65535).contains(n) => {
            buf.push(0xC2);
            buf.extend_from_slice(&(*n as u16).to_le_bytes());
        }
        _ => return impossible(),
    }
    Ok(())
}

// ─── MOV / LEA ─────────────────────────────────────────────────────────

fn encode_mov(buf: &mut InstrBytes, req: &Request) -> Result<(), Error> {
    let mode = req.mode;
    match *req.ops() {
        [ReqOperand::Reg { reg: dst, .. }, ReqOperand::Reg { reg: src, .. }] => {
            let opcode = if dst.size_bits() == 8 { 0x88 } else { 0x89 };
            emit_rr(buf, mode, opcode, dst, src)
        }
        [ReqOperand::Reg { reg: dst, .. }, ReqOperand::Imm(imm)] => {
            encode_mov_reg_imm(buf, mode, dst, imm)
        }
        [ReqOperand::Reg { reg: dst, .. }, ReqOperand::Mem(ref mem)] => {
            if !dst.is_gp() {
                return impossible();
            }
            let opcode = if dst.size_bits() == 8 { 0x8A } else { 0x8B };
            emit_rex_reg_mem(buf, mode, dst, mem)?;
            buf.push(opcode);
            emit_mem_modrm(buf, mode, dst.base_code(), mem)
        }
        [ReqOperand::Mem(ref mem), ReqOperand::Reg { reg: src, .. }] => {
            if !src.is_gp() {
                return impossible();
            }
            let opcode = if src.size_bits() == 8 { 0x88 } else { 0x89 };
            emit_rex_reg_mem(buf, mode, src, mem)?;
            buf.push(opcode);
            emit_mem_modrm(buf, mode, src.base_code(), mem)
        }
        [ReqOperand::Mem(ref mem), ReqOperand::Imm(imm)] => {
            let size = mem_op_size(req, mem);
            // mov r/m64, imm32 sign-extends; larger values need a register.
            if size == 64 && i32::try_from(imm).is_err() {
                return impossible();
            }
            let opcode = if size == 8 { 0xC6 } else { 0xC7 };
            emit_rex_digit_mem(buf, mode, size, mem)?;
            buf.push(opcode);
            emit_mem_modrm(buf, mode, 0, mem)?;
            emit_imm(buf, imm, if size > 32 { 32 } else { size as u8 });
            Ok(())
        }
        _ => impossible(),
    }
}

fn encode_mov_reg_imm(
    buf: &mut InstrBytes,
    mode: MachineMode,
    dst: Register,
    imm: i64,
) -> Result<(), Error> {
    if !dst.is_gp() {
        return impossible();
    }
    let b = dst.is_extended();
    if (b || dst.size_bits() == 64 || dst.requires_rex_for_byte()) && !mode.is_64() {
        return impossible();
    }
    match dst.size_bits() {
        8 => {
            if b || dst.requires_rex_for_byte() {
                buf.push(rex(false, false, false, b));
            }
            buf.push(0xB0 + dst.base_code());
            buf.push(imm as u8);
        }
        16 => {
            buf.push(0x66);
            if b {
                buf.push(rex(false, false, false, true));
            }
            buf.push(0xB8 + dst.base_code());
            buf.extend_from_slice(&(imm as u16).to_le_bytes());
        }
        32 => {
            if b {
                buf.push(rex(false, false, false, true));
            }
            buf.push(0xB8 + dst.base_code());
            buf.extend_from_slice(&(imm as u32).to_le_bytes());
        }
        64 => {
            if imm >= 0 && imm <= i64::from(u32::MAX) {
                // mov r32, imm32 zero-extends to the full register.
                if b {
                    buf.push(rex(false, false, false, true));
                }
                buf.push(0xB8 + dst.base_code());
                buf.extend_from_slice(&(imm as u32).to_le_bytes());
            } else if i32::try_from(imm).is_ok() {
                // mov r/m64, sign-extended imm32.
                buf.push(rex(true, false, false, b));
                buf.push(0xC7);
                buf.push(modrm(0b11, 0, dst.base_code()));
                buf.extend_from_slice(&(imm as i32).to_le_bytes());
            } else {
                // movabs r64, imm64.
                buf.push(rex(true, false, false, b));
                buf.push(0xB8 + dst.base_code());
                buf.extend_from_slice(&(imm as u64).to_le_bytes());
            }
        }
        _ => return impossible(),
    }
    Ok(())
}

fn encode_lea(buf: &mut InstrBytes, req: &Request) -> Result<(), Error> {
    match *req.ops() {
        [ReqOperand::Reg { reg: dst, .. }, ReqOperand::Mem(ref mem)] => {
            if !dst.is_gp() || dst.size_bits() == 8 {
                return impossible();
            }
            emit_rex_reg_mem(buf, req.mode, dst, mem)?;
            buf.push(0x8D);
            emit_mem_modrm(buf, req.mode, dst.base_code(), mem)
        }
        _ => impossible(),
    }
}

// ─── Group-1 ALU / TEST / INC / DEC ────────────────────────────────────

/// Effective operand size in bits for memory-destination forms with no
/// register operand: the request hint wins, then the memory access size,
/// then the 32-bit default.
fn mem_op_size(req: &Request, mem: &ReqMem) -> u16 {
    match req.size_hint {
        SizeHint::Byte => 8,
        SizeHint::Word => 16,
        SizeHint::Dword => 32,
        SizeHint::Qword => 64,
        SizeHint::None => {
            if mem.size != 0 {
                mem.size * 8
            } else {
                32
            }
        }
    }
}

/// add/or/and/sub/xor/cmp. `digit` is the /digit and opcode row selector.
fn encode_group1(buf: &mut InstrBytes, req: &Request, digit: u8) -> Result<(), Error> {
    let mode = req.mode;
    let base = digit * 8;
    match *req.ops() {
        // op r/m, r
        [ReqOperand::Reg { reg: dst, .. }, ReqOperand::Reg { reg: src, .. }] => {
            let opcode = if dst.size_bits() == 8 { base } else { base + 1 };
            emit_rr(buf, mode, opcode, dst, src)
        }
        [ReqOperand::Reg { reg: dst, .. }, ReqOperand::Imm(imm)] => {
            if !dst.is_gp() {
                return impossible();
            }
            encode_group1_rm_imm(buf, mode, digit, dst.size_bits(), RmSlot::Reg(dst), imm)
        }
        [ReqOperand::Reg { reg: dst, .. }, ReqOperand::Mem(ref mem)] => {
            if !dst.is_gp() {
                return impossible();
            }
            let opcode = if dst.size_bits() == 8 { base + 2 } else { base + 3 };
            emit_rex_reg_mem(buf, mode, dst, mem)?;
            buf.push(opcode);
            emit_mem_modrm(buf, mode, dst.base_code(), mem)
        }
        [ReqOperand::Mem(ref mem), ReqOperand::Reg { reg: src, .. }] => {
            if !src.is_gp() {
                return impossible();
            }
            let opcode = if src.size_bits() == 8 { base } else { base + 1 };
            emit_rex_reg_mem(buf, mode, src, mem)?;
            buf.push(opcode);
            emit_mem_modrm(buf, mode, src.base_code(), mem)
        }
        [ReqOperand::Mem(ref mem), ReqOperand::Imm(imm)] => {
            let size = mem_op_size(req, mem);
            encode_group1_rm_imm(buf, mode, digit, size, RmSlot::Mem(*mem), imm)
        }
        _ => impossible(),
    }
}

enum RmSlot {
    Reg(Register),
    Mem(ReqMem),
}

fn encode_group1_rm_imm(
    buf: &mut InstrBytes,
    mode: MachineMode,
    digit: u8,
    size: u16,
    rm: RmSlot,
    imm: i64,
) -> Result<(), Error> {
    // 80 /digit imm8 for byte ops; 83 /digit imm8 (sign-extended) when the
    // immediate fits, else 81 /digit imm16/32.
    let (opcode, imm_bits) = if size == 8 {
        (0x80, 8)
    } else if i8::try_from(imm).is_ok() {
        (0x83, 8)
    } else {
        (0x81, if size == 16 { 16 } else { 32 })
    };
    if size != 8 && size != 16 && i32::try_from(imm).is_err() {
        return impossible();
    }
    match rm {
        RmSlot::Reg(reg) => {
            if size == 16 {
                buf.push(0x66);
            }
            let w = size == 64;
            let b = reg.is_extended();
            if w || b || reg.requires_rex_for_byte() {
                if !mode.is_64() || reg.is_high_byte() {
                    return impossible();
                }
                buf.push(rex(w, false, false, b));
            }
            buf.push(opcode);
            buf.push(modrm(0b11, digit, reg.base_code()));
        }
        RmSlot::Mem(ref mem) => {
            emit_rex_digit_mem(buf, mode, size, mem)?;
            buf.push(opcode);
            emit_mem_modrm(buf, mode, digit, mem)?;
        }
    }
    emit_imm(buf, imm, imm_bits);
    Ok(())
}

fn encode_test(buf: &mut InstrBytes, req: &Request) -> Result<(), Error> {
    let mode = req.mode;
    match *req.ops() {
        [ReqOperand::Reg { reg: dst, .. }, ReqOperand::Reg { reg: src, .. }] => {
            let opcode = if dst.size_bits() == 8 { 0x84 } else { 0x85 };
            emit_rr(buf, mode, opcode, dst, src)
        }
        [ReqOperand::Mem(ref mem), ReqOperand::Reg { reg: src, .. }] => {
            if !src.is_gp() {
                return impossible();
            }
            let opcode = if src.size_bits() == 8 { 0x84 } else { 0x85 };
            emit_rex_reg_mem(buf, mode, src, mem)?;
            buf.push(opcode);
            emit_mem_modrm(buf, mode, src.base_code(), mem)
        }
        [ReqOperand::Reg { reg: dst, .. }, ReqOperand::Imm(imm)] => {
            if !dst.is_gp() {
                return impossible();
            }
            let size = dst.size_bits();
            if size == 16 {
                buf.push(0x66);
            }
            let w = size == 64;
            let b = dst.is_extended();
            if w || b || dst.requires_rex_for_byte() {
                if !mode.is_64() || dst.is_high_byte() {
                    return impossible();
                }
                buf.push(rex(w, false, false, b));
            }
            buf.push(if size == 8 { 0xF6 } else { 0xF7 });
            buf.push(modrm(0b11, 0, dst.base_code()));
            emit_imm(buf, imm, if size > 32 { 32 } else { size as u8 });
            Ok(())
        }
        _ => impossible(),
    }
}

fn encode_inc_dec(buf: &mut InstrBytes, req: &Request, digit: u8) -> Result<(), Error> {
    let mode = req.mode;
    match *req.ops() {
        [ReqOperand::Reg { reg, .. }] => {
            if !reg.is_gp() {
                return impossible();
            }
            let size = reg.size_bits();
            if size == 16 {
                buf.push(0x66);
            }
            let w = size == 64;
            let b = reg.is_extended();
            if w || b || reg.requires_rex_for_byte() {
                if !mode.is_64() || reg.is_high_byte() {
                    return impossible();
                }
                buf.push(rex(w, false, false, b));
            }
            buf.push(if size == 8 { 0xFE } else { 0xFF });
            buf.push(modrm(0b11, digit, reg.base_code()));
            Ok(())
        }
        [ReqOperand::Mem(ref mem)] => {
            let size = mem_op_size(req, mem);
            emit_rex_digit_mem(buf, mode, size, mem)?;
            buf.push(if size == 8 { 0xFE } else { 0xFF });
            emit_mem_modrm(buf, mode, digit, mem)
        }
        _ => impossible(),
    }
}

// ─── PUSH / POP ────────────────────────────────────────────────────────

fn encode_push(buf: &mut InstrBytes, req: &Request) -> Result<(), Error> {
    let mode = req.mode;
    match *req.ops() {
        [ReqOperand::Reg { reg, .. }] => {
            if !reg.is_gp() {
                return impossible();
            }
            let size = reg.size_bits();
            // Stack width is fixed per mode: 64/16 in long mode, 32/16 in
            // protected mode.
            let ok = if mode.is_64() {
                size == 64 || size == 16
            } else {
                size == 32 || size == 16
            };
            if !ok {
                return impossible();
            }
            if size == 16 {
                buf.push(0x66);
            }
            if reg.is_extended() {
                if !mode.is_64() {
                    return impossible();
                }
                buf.push(rex(false, false, false, true));
            }
            buf.push(0x50 + reg.base_code());
            Ok(())
        }
        [ReqOperand::Imm(imm)] => {
            if i8::try_from(imm).is_ok() {
                buf.push(0x6A);
                buf.push(imm as u8);
            } else if i32::try_from(imm).is_ok() {
                buf.push(0x68);
                buf.extend_from_slice(&(imm as i32).to_le_bytes());
            } else {
                return impossible();
            }
            Ok(())
        }
        [ReqOperand::Mem(ref mem)] => {
            // push defaults to the full stack width; REX.W is redundant.
            emit_rex_digit_mem(buf, mode, 0, mem)?;
            buf.push(0xFF);
            emit_mem_modrm(buf, mode, 6, mem)
        }
        _ => impossible(),
    }
}

fn encode_pop(buf: &mut InstrBytes, req: &Request) -> Result<(), Error> {
    let mode = req.mode;
    match *req.ops() {
        [ReqOperand::Reg { reg, .. }] => {
            if !reg.is_gp() {
                return impossible();
            }
            let size = reg.size_bits();
            let ok = if mode.is_64() {
                size == 64 || size == 16
            } else {
                size == 32 || size == 16
            };
            if !ok {
                return impossible();
            }
            if size == 16 {
                buf.push(0x66);
            }
            if reg.is_extended() {
                if !mode.is_64() {
                    return impossible();
                }
                buf.push(rex(false, false, false, true));
            }
            buf.push(0x58 + reg.base_code());
            Ok(())
        }
        [ReqOperand::Mem(ref mem)] => {
            emit_rex_digit_mem(buf, mode, 0, mem)?;
            buf.push(0x8F);
            emit_mem_modrm(buf, mode, 0, mem)
        }
        _ => impossible(),
    }
}

// ─── Branches ──────────────────────────────────────────────────────────

fn rel8(disp: i64) -> Result<u8, Error> {
    match i8::try_from(disp) {
        Ok(v) => Ok(v as u8),
        Err(_) => impossible(),
    }
}

fn rel32(disp: i64) -> Result<[u8; 4], Error> {
    match i32::try_from(disp) {
        Ok(v) => Ok(v.to_le_bytes()),
        Err(_) => impossible(),
    }
}

fn encode_jmp(buf: &mut InstrBytes, req: &Request) -> Result<(), Error> {
    match *req.ops() {
        [ReqOperand::Imm(disp)] => match req.branch_hint {
            BranchHint::Short => {
                buf.push(0xEB);
                buf.push(rel8(disp)?);
                Ok(())
            }
            BranchHint::Near | BranchHint::None => {
                buf.push(0xE9);
                buf.extend_from_slice(&rel32(disp)?);
                Ok(())
            }
        },
        [ReqOperand::Reg { reg, .. }] => encode_branch_reg(buf, req.mode, reg, 4),
        [ReqOperand::Mem(ref mem)] => {
            emit_rex_digit_mem(buf, req.mode, 0, mem)?;
            buf.push(0xFF);
            emit_mem_modrm(buf, req.mode, 4, mem)
        }
        _ => impossible(),
    }
}

fn encode_call(buf: &mut InstrBytes, req: &Request) -> Result<(), Error> {
    match *req.ops() {
        [ReqOperand::Imm(disp)] => {
            // call has no rel8 form.
            if req.branch_hint == BranchHint::Short {
                return impossible();
            }
            buf.push(0xE8);
            buf.extend_from_slice(&rel32(disp)?);
            Ok(())
        }
        [ReqOperand::Reg { reg, .. }] => encode_branch_reg(buf, req.mode, reg, 2),
        [ReqOperand::Mem(ref mem)] => {
            emit_rex_digit_mem(buf, req.mode, 0, mem)?;
            buf.push(0xFF);
            emit_mem_modrm(buf, req.mode, 2, mem)
        }
        _ => impossible(),
    }
}

/// jmp/call through a register: FF /digit. Branch targets default to the
/// full address width; REX.W is redundant.
fn encode_branch_reg(
    buf: &mut InstrBytes,
    mode: MachineMode,
    reg: Register,
    digit: u8,
) -> Result<(), Error> {
    let width = if mode.is_64() { 64 } else { 32 };
    if !reg.is_gp() || reg.size_bits() != width {
        return impossible();
    }
    if reg.is_extended() {
        buf.push(rex(false, false, false, true));
    }
    buf.push(0xFF);
    buf.push(modrm(0b11, digit, reg.base_code()));
    Ok(())
}

fn encode_jcc(buf: &mut InstrBytes, req: &Request, cc: u8) -> Result<(), Error> {
    match *req.ops() {
        [ReqOperand::Imm(disp)] => match req.branch_hint {
            BranchHint::Short => {
                buf.push(0x70 + cc);
                buf.push(rel8(disp)?);
                Ok(())
            }
            BranchHint::Near | BranchHint::None => {
                buf.push(0x0F);
                buf.push(0x80 + cc);
                buf.extend_from_slice(&rel32(disp)?);
                Ok(())
            }
        },
        _ => impossible(),
    }
}

/// JCXZ / JECXZ / JRCXZ: E3 rel8, with 0x67 selecting the narrower count
/// register. The mode-invalid sibling has no encoding.
fn encode_jcxz(buf: &mut InstrBytes, req: &Request) -> Result<(), Error> {
    let [ReqOperand::Imm(disp)] = *req.ops() else {
        return impossible();
    };
    match (req.mode, req.mnemonic) {
        (MachineMode::Amd64, Mnemonic::Jrcxz) => {}
        (MachineMode::Amd64, Mnemonic::Jecxz) | (MachineMode::I386, Mnemonic::Jcxz) => {
            buf.push(0x67);
        }
        (MachineMode::I386, Mnemonic::Jecxz) => {}
        _ => return impossible(),
    }
    buf.push(0xE3);
    buf.push(rel8(disp)?);
    Ok(())
}

/// LOOP / LOOPE / LOOPNE: rel8 only, count register is the mode default.
fn encode_rel8_only(buf: &mut InstrBytes, req: &Request, opcode: u8) -> Result<(), Error> {
    let [ReqOperand::Imm(disp)] = *req.ops() else {
        return impossible();
    };
    buf.push(opcode);
    buf.push(rel8(disp)?);
    Ok(())
}

// ─── VEX is4 (VBLENDV / FMA4) ──────────────────────────────────────────

/// Emit a 3-byte VEX prefix: C4 [R X B mmmmm] [W vvvv L pp].
/// The R/X/B bits are stored inverted.
fn emit_vex3(buf: &mut InstrBytes, r: bool, x: bool, b: bool, mmmmm: u8, w: bool, vvvv: u8, l: bool, pp: u8) {
    let byte1 = (if r { 0 } else { 0x80 })
        | (if x { 0 } else { 0x40 })
        | (if b { 0 } else { 0x20 })
        | (mmmmm & 0x1F);
    let byte2 = (if w { 0x80 } else { 0 })
        | (((!vvvv) & 0x0F) << 3)
        | (if l { 0x04 } else { 0 })
        | (pp & 0x03);
    buf.push(0xC4);
    buf.push(byte1);
    buf.push(byte2);
}

/// Four-operand VEX encodings where one source register lands in
/// imm8\[7:4\] (the is4 field): VBLENDVPS/PD, VPBLENDVB, and the FMA4
/// family. For FMA4, VEX.W selects whether the r/m slot is operand 2 (W0)
/// or operand 3 (W1); the VBLENDV group is W0-only.
fn encode_vex_is4(buf: &mut InstrBytes, req: &Request, opcode: u8, w0_only: bool) -> Result<(), Error> {
    enum Rm {
        Reg(Register),
        Mem(ReqMem),
    }

    let [ReqOperand::Reg { reg: dst, .. }, ReqOperand::Reg { reg: src1, .. }, op2, op3] =
        *req.ops()
    else {
        return impossible();
    };

    let (w, rm, is4_reg) = match (op2, op3) {
        (ReqOperand::Reg { reg: a, is4: false }, ReqOperand::Reg { reg: b, is4: true }) => {
            (false, Rm::Reg(a), b)
        }
        (ReqOperand::Mem(m), ReqOperand::Reg { reg: b, is4: true }) => (false, Rm::Mem(m), b),
        (ReqOperand::Reg { reg: a, is4: true }, ReqOperand::Mem(m)) => {
            if w0_only {
                return impossible();
            }
            (true, Rm::Mem(m), a)
        }
        _ => return impossible(),
    };

    if !dst.is_vector() || !src1.is_vector() || !is4_reg.is_vector() {
        return impossible();
    }
    let l = dst.is_ymm();
    if src1.is_ymm() != l || is4_reg.is_ymm() != l {
        return impossible();
    }
    if let Rm::Reg(a) = rm {
        if !a.is_vector() || a.is_ymm() != l {
            return impossible();
        }
    }
    if !req.mode.is_64() {
        // Without REX-style extension bits, only the low eight registers
        // are reachable.
        let extended = dst.is_extended()
            || src1.is_extended()
            || is4_reg.is_extended()
            || match rm {
                Rm::Reg(a) => a.is_extended(),
                Rm::Mem(ref m) => {
                    let (x, b) = mem_rex_xb(m);
                    x || b
                }
            };
        if extended {
            return impossible();
        }
    }

    let (x, b) = match rm {
        Rm::Reg(a) => (false, a.is_extended()),
        Rm::Mem(ref m) => {
            check_addr_regs(req.mode, m)?;
            mem_rex_xb(m)
        }
    };

    // 0F 3A escape, 0x66 mandatory prefix.
    emit_vex3(buf, dst.is_extended(), x, b, 0b00011, w, src1.full_code(), l, 0b01);
    buf.push(opcode);
    match rm {
        Rm::Reg(a) => buf.push(modrm(0b11, dst.base_code(), a.base_code())),
        Rm::Mem(ref m) => emit_mem_modrm(buf, req.mode, dst.base_code(), m)?,
    }
    buf.push(is4_reg.full_code() << 4);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Register::*;

    fn req(mode: MachineMode, mnemonic: Mnemonic, ops: &[ReqOperand]) -> Request {
        let mut r = Request::new(mode, mnemonic);
        r.operand_count = ops.len() as u8;
        r.operands[..ops.len()].copy_from_slice(ops);
        r
    }

    fn emit64(mnemonic: Mnemonic, ops: &[ReqOperand]) -> InstrBytes {
        emit(&req(MachineMode::Amd64, mnemonic, ops)).unwrap()
    }

    #[test]
    fn nop() {
        assert_eq!(emit64(Mnemonic::Nop, &[]), [0x90u8][..]);
    }

    #[test]
    fn ret_forms() {
        assert_eq!(emit64(Mnemonic::Ret, &[]), [0xC3u8][..]);
        assert_eq!(
            emit64(Mnemonic::Ret, &[ReqOperand::Imm(8)]),
            [0xC2u8, 0x08, 0x00][..]
        );
    }

    #[test]
    fn mov_rr() {
        assert_eq!(
            emit64(Mnemonic::Mov, &[ReqOperand::reg(Rax), ReqOperand::reg(Rbx)]),
            [0x48u8, 0x89, 0xD8][..]
        );
        assert_eq!(
            emit64(Mnemonic::Mov, &[ReqOperand::reg(Eax), ReqOperand::reg(Ebx)]),
            [0x89u8, 0xD8][..]
        );
        assert_eq!(
            emit64(Mnemonic::Mov, &[ReqOperand::reg(Al), ReqOperand::reg(Bl)]),
            [0x88u8, 0xD8][..]
        );
    }

    #[test]
    fn mov_reg_imm_shortest_form() {
        // Fits u32: mov r32, imm32 zero-extends.
        assert_eq!(
            emit64(Mnemonic::Mov, &[ReqOperand::reg(Rax), ReqOperand::Imm(0x12345678)]),
            [0xB8u8, 0x78, 0x56, 0x34, 0x12][..]
        );
        // Negative: sign-extended imm32.
        assert_eq!(
            emit64(Mnemonic::Mov, &[ReqOperand::reg(Rax), ReqOperand::Imm(-1)]),
            [0x48u8, 0xC7, 0xC0, 0xFF, 0xFF, 0xFF, 0xFF][..]
        );
        // Full width: movabs.
        assert_eq!(
            emit64(
                Mnemonic::Mov,
                &[ReqOperand::reg(Rax), ReqOperand::Imm(0x1122334455667788)]
            ),
            [0x48u8, 0xB8, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11][..]
        );
        // Extended register.
        assert_eq!(
            emit64(Mnemonic::Mov, &[ReqOperand::reg(R8d), ReqOperand::Imm(1)]),
            [0x41u8, 0xB8, 0x01, 0x00, 0x00, 0x00][..]
        );
    }

    #[test]
    fn mov_mem_forms() {
        let mem_rbx = ReqMem {
            base: Some(Rbx),
            ..ReqMem::default()
        };
        assert_eq!(
            emit64(Mnemonic::Mov, &[ReqOperand::reg(Rax), ReqOperand::Mem(mem_rbx)]),
            [0x48u8, 0x8B, 0x03][..]
        );
        assert_eq!(
            emit64(Mnemonic::Mov, &[ReqOperand::Mem(mem_rbx), ReqOperand::reg(Rax)]),
            [0x48u8, 0x89, 0x03][..]
        );

        let sib = ReqMem {
            base: Some(Rbx),
            index: Some(Rcx),
            scale: 4,
            disp: 16,
            ..ReqMem::default()
        };
        assert_eq!(
            emit64(Mnemonic::Mov, &[ReqOperand::reg(Rax), ReqOperand::Mem(sib)]),
            [0x48u8, 0x8B, 0x44, 0x8B, 0x10][..]
        );
    }

    #[test]
    fn mov_rip_relative() {
        let mem = ReqMem {
            base: Some(Rip),
            disp: 0x100,
            size: 8,
            ..ReqMem::default()
        };
        assert_eq!(
            emit64(Mnemonic::Mov, &[ReqOperand::reg(Rax), ReqOperand::Mem(mem)]),
            [0x48u8, 0x8B, 0x05, 0x00, 0x01, 0x00, 0x00][..]
        );
    }

    #[test]
    fn mov_abs_memory_uses_sib_in_long_mode() {
        let mem = ReqMem {
            disp: 0x1000,
            size: 4,
            ..ReqMem::default()
        };
        assert_eq!(
            emit64(Mnemonic::Mov, &[ReqOperand::reg(Eax), ReqOperand::Mem(mem)]),
            [0x8Bu8, 0x04, 0x25, 0x00, 0x10, 0x00, 0x00][..]
        );
        // 32-bit mode: plain disp32, no SIB.
        let r = req(
            MachineMode::I386,
            Mnemonic::Mov,
            &[ReqOperand::reg(Eax), ReqOperand::Mem(mem)],
        );
        assert_eq!(emit(&r).unwrap(), [0x8Bu8, 0x05, 0x00, 0x10, 0x00, 0x00][..]);
    }

    #[test]
    fn rbp_base_needs_disp8() {
        let mem = ReqMem {
            base: Some(Rbp),
            ..ReqMem::default()
        };
        assert_eq!(
            emit64(Mnemonic::Mov, &[ReqOperand::reg(Rax), ReqOperand::Mem(mem)]),
            [0x48u8, 0x8B, 0x45, 0x00][..]
        );
    }

    #[test]
    fn rsp_base_needs_sib() {
        let mem = ReqMem {
            base: Some(Rsp),
            disp: 8,
            ..ReqMem::default()
        };
        assert_eq!(
            emit64(Mnemonic::Mov, &[ReqOperand::reg(Rax), ReqOperand::Mem(mem)]),
            [0x48u8, 0x8B, 0x44, 0x24, 0x08][..]
        );
    }

    #[test]
    fn group1_imm_selection() {
        // Sign-extended imm8.
        assert_eq!(
            emit64(Mnemonic::Add, &[ReqOperand::reg(Rax), ReqOperand::Imm(8)]),
            [0x48u8, 0x83, 0xC0, 0x08][..]
        );
        // imm32.
        assert_eq!(
            emit64(Mnemonic::Sub, &[ReqOperand::reg(Eax), ReqOperand::Imm(0x1000)]),
            [0x81u8, 0xE8, 0x00, 0x10, 0x00, 0x00][..]
        );
        // Byte form.
        assert_eq!(
            emit64(Mnemonic::Cmp, &[ReqOperand::reg(Al), ReqOperand::Imm(1)]),
            [0x80u8, 0xF8, 0x01][..]
        );
    }

    #[test]
    fn group1_rr() {
        assert_eq!(
            emit64(Mnemonic::Xor, &[ReqOperand::reg(Eax), ReqOperand::reg(Eax)]),
            [0x31u8, 0xC0][..]
        );
        assert_eq!(
            emit64(Mnemonic::Add, &[ReqOperand::reg(Rax), ReqOperand::reg(Rbx)]),
            [0x48u8, 0x01, 0xD8][..]
        );
    }

    #[test]
    fn push_pop() {
        assert_eq!(emit64(Mnemonic::Push, &[ReqOperand::reg(Rax)]), [0x50u8][..]);
        assert_eq!(
            emit64(Mnemonic::Push, &[ReqOperand::reg(R9)]),
            [0x41u8, 0x51][..]
        );
        assert_eq!(emit64(Mnemonic::Pop, &[ReqOperand::reg(Rbx)]), [0x5Bu8][..]);
        assert_eq!(
            emit64(Mnemonic::Push, &[ReqOperand::Imm(0x10)]),
            [0x6Au8, 0x10][..]
        );
        // 32-bit register push is impossible in long mode.
        assert_eq!(
            emit(&req(MachineMode::Amd64, Mnemonic::Push, &[ReqOperand::reg(Eax)])),
            Err(Error::ImpossibleInstruction)
        );
    }

    #[test]
    fn jmp_short_and_near() {
        let mut r = req(MachineMode::Amd64, Mnemonic::Jmp, &[ReqOperand::Imm(-3)]);
        r.branch_hint = BranchHint::Short;
        assert_eq!(emit(&r).unwrap(), [0xEBu8, 0xFD][..]);

        r.branch_hint = BranchHint::Near;
        assert_eq!(emit(&r).unwrap(), [0xE9u8, 0xFD, 0xFF, 0xFF, 0xFF][..]);
    }

    #[test]
    fn jcc_short_and_near() {
        let mut r = req(MachineMode::Amd64, Mnemonic::Jz, &[ReqOperand::Imm(0x10)]);
        r.branch_hint = BranchHint::Short;
        assert_eq!(emit(&r).unwrap(), [0x74u8, 0x10][..]);

        r.branch_hint = BranchHint::Near;
        assert_eq!(emit(&r).unwrap(), [0x0Fu8, 0x84, 0x10, 0x00, 0x00, 0x00][..]);
    }

    #[test]
    fn call_rel32_only() {
        let r = req(MachineMode::Amd64, Mnemonic::Call, &[ReqOperand::Imm(0x3B)]);
        assert_eq!(emit(&r).unwrap(), [0xE8u8, 0x3B, 0x00, 0x00, 0x00][..]);

        let mut short = r;
        short.branch_hint = BranchHint::Short;
        assert_eq!(emit(&short), Err(Error::ImpossibleInstruction));
    }

    #[test]
    fn jmp_reg_and_mem() {
        assert_eq!(
            emit64(Mnemonic::Jmp, &[ReqOperand::reg(Rax)]),
            [0xFFu8, 0xE0][..]
        );
        assert_eq!(
            emit64(Mnemonic::Call, &[ReqOperand::reg(R11)]),
            [0x41u8, 0xFF, 0xD3][..]
        );
    }

    #[test]
    fn jcxz_family_mode_rules() {
        // JRCXZ in long mode: bare E3.
        let r = req(MachineMode::Amd64, Mnemonic::Jrcxz, &[ReqOperand::Imm(0xE)]);
        assert_eq!(emit(&r).unwrap(), [0xE3u8, 0x0E][..]);

        // JECXZ in long mode: address-size prefix.
        let r = req(MachineMode::Amd64, Mnemonic::Jecxz, &[ReqOperand::Imm(2)]);
        assert_eq!(emit(&r).unwrap(), [0x67u8, 0xE3, 0x02][..]);

        // JCXZ does not exist in long mode.
        let r = req(MachineMode::Amd64, Mnemonic::Jcxz, &[ReqOperand::Imm(2)]);
        assert_eq!(emit(&r), Err(Error::ImpossibleInstruction));

        // JECXZ in protected mode: bare E3; JCXZ needs the prefix.
        let r = req(MachineMode::I386, Mnemonic::Jecxz, &[ReqOperand::Imm(2)]);
        assert_eq!(emit(&r).unwrap(), [0xE3u8, 0x02][..]);
        let r = req(MachineMode::I386, Mnemonic::Jcxz, &[ReqOperand::Imm(2)]);
        assert_eq!(emit(&r).unwrap(), [0x67u8, 0xE3, 0x02][..]);
    }

    #[test]
    fn loop_family() {
        let r = req(MachineMode::Amd64, Mnemonic::Loop, &[ReqOperand::Imm(-2)]);
        assert_eq!(emit(&r).unwrap(), [0xE2u8, 0xFE][..]);
        let r = req(MachineMode::Amd64, Mnemonic::Loopne, &[ReqOperand::Imm(4)]);
        assert_eq!(emit(&r).unwrap(), [0xE0u8, 0x04][..]);
    }

    #[test]
    fn rel8_out_of_range_is_impossible() {
        let mut r = req(MachineMode::Amd64, Mnemonic::Jmp, &[ReqOperand::Imm(0x200)]);
        r.branch_hint = BranchHint::Short;
        assert_eq!(emit(&r), Err(Error::ImpossibleInstruction));

        let r = req(MachineMode::Amd64, Mnemonic::Loop, &[ReqOperand::Imm(0x200)]);
        assert_eq!(emit(&r), Err(Error::ImpossibleInstruction));
    }

    #[test]
    fn vblendvps_reg_form() {
        // vblendvps xmm1, xmm2, xmm3, xmm4
        let bytes = emit64(
            Mnemonic::Vblendvps,
            &[
                ReqOperand::reg(Xmm1),
                ReqOperand::reg(Xmm2),
                ReqOperand::reg(Xmm3),
                ReqOperand::Reg { reg: Xmm4, is4: true },
            ],
        );
        assert_eq!(bytes, [0xC4u8, 0xE3, 0x69, 0x4A, 0xCB, 0x40][..]);
    }

    #[test]
    fn vfmaddps_w_bit_selection() {
        let mem = ReqMem {
            base: Some(Rax),
            size: 16,
            ..ReqMem::default()
        };
        // is4 on operand 3, memory in operand 2: W0.
        let w0 = emit64(
            Mnemonic::Vfmaddps,
            &[
                ReqOperand::reg(Xmm0),
                ReqOperand::reg(Xmm1),
                ReqOperand::Mem(mem),
                ReqOperand::Reg { reg: Xmm2, is4: true },
            ],
        );
        assert_eq!(w0, [0xC4u8, 0xE3, 0x71, 0x68, 0x00, 0x20][..]);

        // is4 on operand 2, memory in operand 3: W1.
        let w1 = emit64(
            Mnemonic::Vfmaddps,
            &[
                ReqOperand::reg(Xmm0),
                ReqOperand::reg(Xmm1),
                ReqOperand::Reg { reg: Xmm2, is4: true },
                ReqOperand::Mem(mem),
            ],
        );
        assert_eq!(w1, [0xC4u8, 0xE3, 0xF1, 0x68, 0x00, 0x20][..]);
    }

    #[test]
    fn vblendv_has_no_w1_form() {
        let mem = ReqMem {
            base: Some(Rax),
            size: 16,
            ..ReqMem::default()
        };
        let r = req(
            MachineMode::Amd64,
            Mnemonic::Vblendvps,
            &[
                ReqOperand::reg(Xmm0),
                ReqOperand::reg(Xmm1),
                ReqOperand::Reg { reg: Xmm2, is4: true },
                ReqOperand::Mem(mem),
            ],
        );
        assert_eq!(emit(&r), Err(Error::ImpossibleInstruction));
    }

    #[test]
    fn xop_mnemonics_are_impossible() {
        let r = req(
            MachineMode::Amd64,
            Mnemonic::Vpperm,
            &[
                ReqOperand::reg(Xmm0),
                ReqOperand::reg(Xmm1),
                ReqOperand::reg(Xmm2),
                ReqOperand::Reg { reg: Xmm3, is4: true },
            ],
        );
        assert_eq!(emit(&r), Err(Error::ImpossibleInstruction));
    }

    #[test]
    fn segment_prefixes() {
        let mut r = req(
            MachineMode::Amd64,
            Mnemonic::Mov,
            &[
                ReqOperand::reg(Rax),
                ReqOperand::Mem(ReqMem {
                    base: Some(Rbx),
                    ..ReqMem::default()
                }),
            ],
        );
        r.prefixes = PrefixFlags::SEG_GS;
        assert_eq!(emit(&r).unwrap(), [0x65u8, 0x48, 0x8B, 0x03][..]);
        r.prefixes = PrefixFlags::SEG_FS;
        assert_eq!(emit(&r).unwrap(), [0x64u8, 0x48, 0x8B, 0x03][..]);
    }

    #[test]
    fn lock_prefix() {
        let mut r = req(
            MachineMode::Amd64,
            Mnemonic::Add,
            &[
                ReqOperand::Mem(ReqMem {
                    base: Some(Rbx),
                    size: 8,
                    ..ReqMem::default()
                }),
                ReqOperand::reg(Rax),
            ],
        );
        r.prefixes = PrefixFlags::LOCK;
        assert_eq!(emit(&r).unwrap(), [0xF0u8, 0x48, 0x01, 0x03][..]);
    }

    #[test]
    fn i386_rejects_long_mode_state() {
        let r = req(
            MachineMode::I386,
            Mnemonic::Mov,
            &[ReqOperand::reg(Rax), ReqOperand::reg(Rbx)],
        );
        assert_eq!(emit(&r), Err(Error::ImpossibleInstruction));

        let r = req(
            MachineMode::I386,
            Mnemonic::Mov,
            &[ReqOperand::reg(R8d), ReqOperand::Imm(1)],
        );
        assert_eq!(emit(&r), Err(Error::ImpossibleInstruction));
    }

    #[test]
    fn index_only_sib() {
        let mem = ReqMem {
            index: Some(Rcx),
            scale: 8,
            disp: 0x40,
            ..ReqMem::default()
        };
        assert_eq!(
            emit64(Mnemonic::Mov, &[ReqOperand::reg(Rax), ReqOperand::Mem(mem)]),
            [0x48u8, 0x8B, 0x04, 0xCD, 0x40, 0x00, 0x00, 0x00][..]
        );
    }

    #[test]
    fn lea_basic() {
        let mem = ReqMem {
            base: Some(Rbx),
            disp: 8,
            ..ReqMem::default()
        };
        assert_eq!(
            emit64(Mnemonic::Lea, &[ReqOperand::reg(Rax), ReqOperand::Mem(mem)]),
            [0x48u8, 0x8D, 0x43, 0x08][..]
        );
    }
}
