//! The context-aware encoding core.
//!
//! Encoding cooperates with a multi-pass layout: operand values depend on
//! where an instruction will live, but the instruction's *size* depends on
//! which operand encoding is chosen, which depends on the value. This module
//! resolves the circularity three ways:
//!
//! - a per-mnemonic table of branch-variant sizes drives short vs. near
//!   selection before any bytes exist,
//! - RIP-relative memory operands demand a re-encode once the instruction
//!   length is known ([`InstrSize::NeedsResize`]),
//! - an unresolved label encodes against a placeholder displacement and
//!   flags [`EncoderContext::needs_extra_pass`] so the layout driver loops.
//!
//! Two entry points: [`encode`] runs without addresses (a probe encode with
//! placeholder displacements, usable for size estimation) and
//! [`encode_with_context`] runs a real layout pass against a
//! [`LabelResolver`].

use crate::error::Error;
use crate::ir::{Attribs, Instruction, MachineMode, MemOperand, Mnemonic, Operand, Register};
use crate::program::{LabelId, LabelResolver};
use crate::x86::{
    self, BranchHint, InstrBytes, PrefixFlags, ReqMem, ReqOperand, Request, SizeHint, MAX_OPERANDS,
};

// NOTE: The probe displacement has to be larger than 0xFFFF so the byte-level
// encoder commits to an imm32/rel32 field, and below the rel32 limit so the
// probe still encodes.
const TEMP_REL32: i64 = 0x123456;

// Probe displacement for mnemonics restricted to rel8.
const TEMP_REL8: i64 = 0x44;

// ─── Relocations ───────────────────────────────────────────────────────

/// How a relocation target is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RelocationKind {
    /// No relocation.
    #[default]
    None,
    /// Absolute address.
    Abs,
    /// 32-bit relative displacement.
    Rel32,
}

/// Which field of the instruction the relocation patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RelocationData {
    /// No relocation.
    #[default]
    None,
    /// The immediate field.
    Immediate,
    /// The memory displacement field.
    Memory,
}

/// Result of one encode: the bytes plus the relocation descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderResult {
    /// The encoded machine-code bytes.
    pub bytes: InstrBytes,
    /// Relocation kind; [`RelocationKind::None`] when nothing to patch.
    pub reloc_kind: RelocationKind,
    /// Which field the relocation patches.
    pub reloc_data: RelocationData,
    /// The relocation's label, when one is attached.
    pub reloc_label: Option<LabelId>,
}

impl EncoderResult {
    /// Encoded byte count.
    #[inline]
    pub fn length(&self) -> u8 {
        self.bytes.len() as u8
    }
}

// ─── Encoder context ───────────────────────────────────────────────────

/// The instruction-size slot of an [`EncoderContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InstrSize {
    /// Not yet known; the first encode of an instruction starts here.
    #[default]
    Unknown,
    /// Concrete size fed back by the re-encode loop.
    Known(u8),
    /// An operand needs the final length; re-encode with [`InstrSize::Known`].
    NeedsResize,
}

impl InstrSize {
    /// The size to compute displacements with: 0 until a size is known.
    #[inline]
    fn value(self) -> i64 {
        match self {
            InstrSize::Known(n) => i64::from(n),
            InstrSize::Unknown | InstrSize::NeedsResize => 0,
        }
    }
}

/// Mutable per-instruction state shared between the encoder and the layout
/// driver.
///
/// The driver owns `va` and resets [`needs_extra_pass`](Self::needs_extra_pass)
/// between passes; the encoder owns `instr_size` for the duration of one
/// [`encode_with_context`] call and only ever *sets* `needs_extra_pass`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderContext {
    /// Virtual address the instruction will live at.
    pub va: i64,
    /// Instruction-size feedback slot for the re-encode protocol.
    pub instr_size: InstrSize,
    /// Set when an internal label reference could not be resolved; the
    /// layout driver must run another pass. Monotonic within a pass.
    pub needs_extra_pass: bool,
}

impl EncoderContext {
    /// A context positioned at `va`.
    pub fn new(va: i64) -> Self {
        Self {
            va,
            instr_size: InstrSize::Unknown,
            needs_extra_pass: false,
        }
    }

    /// Reset the per-pass state; the layout driver calls this at the start
    /// of every pass.
    pub fn begin_pass(&mut self) {
        self.needs_extra_pass = false;
    }
}

// ─── Mnemonic variant table ────────────────────────────────────────────

/// Branch-variant info for one mnemonic: whether it is control flow and the
/// encoded byte length of its rel8 and rel32 forms (−1 = no such form).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EncodeVariants {
    is_control_flow: bool,
    rel8_size: i8,
    rel32_size: i8,
}

impl EncodeVariants {
    const fn can_encode_rel8(self) -> bool {
        self.rel8_size != -1
    }

    const fn can_encode_rel32(self) -> bool {
        self.rel32_size != -1
    }
}

const fn control_flow(rel8_size: i8, rel32_size: i8) -> EncodeVariants {
    EncodeVariants {
        is_control_flow: true,
        rel8_size,
        rel32_size,
    }
}

/// Compile-time branch-variant lookup.
const fn encode_variants(mnemonic: Mnemonic) -> EncodeVariants {
    use Mnemonic::*;
    match mnemonic {
        Jmp => control_flow(2, 5),
        Jb | Jbe | Jl | Jle | Jnb | Jnbe | Jnl | Jnle | Jno | Jnp | Jns | Jnz | Jo | Jp | Js
        | Jz => control_flow(2, 6),
        Jcxz | Jecxz | Jrcxz | Jknzd | Jkzd => control_flow(2, -1),
        Loop | Loope | Loopne => control_flow(2, -1),
        Call => control_flow(-1, 5),
        _ => EncodeVariants {
            is_control_flow: false,
            rel8_size: -1,
            rel32_size: -1,
        },
    }
}

// ─── Pass state ────────────────────────────────────────────────────────

/// Which kind of encode is running. Operand builders query this instead of
/// null-checking a context pointer.
enum Pass<'a> {
    /// No addresses: placeholder displacements, no extra-pass signalling.
    Probe,
    /// A real layout pass against label addresses.
    Layout {
        ctx: &'a mut EncoderContext,
        labels: &'a dyn LabelResolver,
    },
}

impl Pass<'_> {
    #[inline]
    fn is_layout(&self) -> bool {
        matches!(self, Pass::Layout { .. })
    }

    #[inline]
    fn va(&self) -> i64 {
        match self {
            Pass::Probe => 0,
            Pass::Layout { ctx, .. } => ctx.va,
        }
    }

    #[inline]
    fn label_address(&self, label: LabelId) -> Option<i64> {
        match self {
            Pass::Probe => None,
            Pass::Layout { labels, .. } => labels.label_address(label),
        }
    }

    #[inline]
    fn is_external(&self, label: LabelId) -> bool {
        match self {
            Pass::Probe => false,
            Pass::Layout { labels, .. } => labels.is_external(label),
        }
    }

    /// Flag the layout driver for another pass. No-op in a probe encode.
    #[inline]
    fn mark_extra_pass(&mut self) {
        if let Pass::Layout { ctx, .. } = self {
            ctx.needs_extra_pass = true;
        }
    }

    /// The current instruction-size estimate (0 until known).
    #[inline]
    fn instr_size(&self) -> i64 {
        match self {
            Pass::Probe => 0,
            Pass::Layout { ctx, .. } => ctx.instr_size.value(),
        }
    }

    /// Demand a re-encode with the instruction size filled in. Only the
    /// first encode of an instruction (size still unknown) needs this.
    #[inline]
    fn request_size(&mut self) {
        if let Pass::Layout { ctx, .. } = self {
            if ctx.instr_size == InstrSize::Unknown {
                ctx.instr_size = InstrSize::NeedsResize;
            }
        }
    }
}

struct EncoderState<'a> {
    pass: Pass<'a>,
    req: Request,
    operand_index: usize,
    reloc_kind: RelocationKind,
    reloc_data: RelocationData,
    reloc_label: Option<LabelId>,
}

// ─── Relative-address resolution ───────────────────────────────────────

#[inline]
fn relative_to(address: i64, target: i64, instr_size: i64) -> i64 {
    target.wrapping_sub(address.wrapping_add(instr_size))
}

/// Probe displacement for a mnemonic. A handful of mnemonics only accept
/// rel8, so the large rel32 placeholder would not encode.
fn temporary_rel(mnemonic: Mnemonic) -> i64 {
    match mnemonic {
        Mnemonic::Jcxz | Mnemonic::Jecxz | Mnemonic::Jknzd => TEMP_REL8,
        _ => TEMP_REL32,
    }
}

/// Placeholder target address: `va + placeholder`, so the computed delta is
/// the placeholder itself.
fn temporary_target(state: &EncoderState<'_>) -> i64 {
    state.pass.va().wrapping_add(temporary_rel(state.req.mnemonic))
}

/// Choose short vs. near for a control-flow target and compute the
/// displacement. The smallest viable encoding wins; the tie-break is
/// deterministic and monotone in the delta's magnitude.
///
/// A target outside every form the mnemonic offers (a rel8-only branch to
/// a far-away label, say) has no encoding.
fn process_rel_address(
    mnemonic: Mnemonic,
    info: EncodeVariants,
    pass: &Pass<'_>,
    target: i64,
) -> Result<(i64, BranchHint), Error> {
    match pass {
        Pass::Probe => Ok((temporary_rel(mnemonic), BranchHint::Near)),
        Pass::Layout { ctx, .. } => {
            if info.can_encode_rel8() {
                let rel = relative_to(ctx.va, target, i64::from(info.rel8_size));
                if rel.unsigned_abs() <= i8::MAX as u64 {
                    return Ok((rel, BranchHint::Short));
                }
            }
            if info.can_encode_rel32() {
                let rel = relative_to(ctx.va, target, i64::from(info.rel32_size));
                if rel.unsigned_abs() <= i32::MAX as u64 {
                    return Ok((rel, BranchHint::Near));
                }
            }
            Err(Error::ImpossibleInstruction)
        }
    }
}

// ─── Operand builder ───────────────────────────────────────────────────

fn build_imm_operand(state: &mut EncoderState<'_>, value: i64) -> Result<ReqOperand, Error> {
    let mut imm = value;

    // Operand 0 of a control-flow instruction is an absolute target address.
    let info = encode_variants(state.req.mnemonic);
    if state.operand_index == 0 && info.is_control_flow {
        let (rel, branch) = process_rel_address(state.req.mnemonic, info, &state.pass, imm)?;
        imm = rel;
        state.req.branch_hint = branch;
    }

    Ok(ReqOperand::Imm(imm))
}

fn build_label_operand(state: &mut EncoderState<'_>, label: LabelId) -> Result<ReqOperand, Error> {
    // Initially a temporary placeholder; a probe encode keeps it so the
    // byte-level encoder commits to the near form.
    let mut imm = temporary_target(state);

    let mut label_va = None;
    if state.pass.is_layout() && !state.pass.is_external(label) {
        label_va = state.pass.label_address(label);
        if label_va.is_none() {
            state.pass.mark_extra_pass();
        }
    }

    let info = encode_variants(state.req.mnemonic);
    if state.operand_index == 0 && info.is_control_flow {
        let target = label_va.unwrap_or(imm);
        let (rel, branch) = process_rel_address(state.req.mnemonic, info, &state.pass, target)?;
        imm = rel;
        state.req.branch_hint = branch;
    } else {
        if let Some(va) = label_va {
            imm = va;
        }

        // Mark relocatable; only mov takes a label immediate.
        if state.req.mnemonic == Mnemonic::Mov
            && matches!(state.req.operands[0], ReqOperand::Reg { .. })
        {
            state.reloc_kind = RelocationKind::Abs;
            state.reloc_data = RelocationData::Immediate;
            state.reloc_label = Some(label);
        }
    }

    Ok(ReqOperand::Imm(imm))
}

fn build_mem_operand(state: &mut EncoderState<'_>, src: &MemOperand) -> ReqOperand {
    let mut mem = ReqMem {
        base: src.base,
        index: src.index,
        scale: src.scale,
        size: src.size,
        disp: src.disp,
    };

    let address = state.pass.va();

    let mut using_label = false;
    let mut external_label = false;

    if let Some(label) = src.label {
        if state.pass.is_layout() {
            external_label = state.pass.is_external(label);
            if let Some(va) = state.pass.label_address(label) {
                mem.disp = mem.disp.wrapping_add(va);
            } else {
                mem.disp = mem.disp.wrapping_add(TEMP_REL32);
                if !external_label {
                    state.pass.mark_extra_pass();
                }
            }
        } else {
            mem.disp = mem.disp.wrapping_add(TEMP_REL32);
        }
        using_label = true;
    }

    // A bare [label] in 64-bit mode defaults to RIP-relative.
    if state.req.mode.is_64() && mem.base.is_none() && mem.index.is_none() && using_label {
        mem.base = Some(Register::Rip);
    }

    if mem.base.is_none() && mem.index.is_none() {
        // Absolute memory operand, mark relocatable.
        state.reloc_kind = RelocationKind::Abs;
        state.reloc_data = RelocationData::Memory;
        if using_label {
            state.reloc_label = src.label;
        }
    } else if mem.base == Some(Register::Rip) {
        // The displacement is measured from the end of the instruction, so
        // the exact length is an input. Encode with the current estimate
        // and demand a re-encode while it is still unknown.
        let instr_size = state.pass.instr_size();
        state.pass.request_size();

        mem.disp = mem.disp.wrapping_sub(address.wrapping_add(instr_size));

        if external_label {
            state.reloc_kind = RelocationKind::Rel32;
            state.reloc_data = RelocationData::Memory;
            state.reloc_label = src.label;
        }
    }

    // Segment override: only FS and GS survive into the encoding.
    match src.segment {
        Some(Register::Gs) => state.req.prefixes |= PrefixFlags::SEG_GS,
        Some(Register::Fs) => state.req.prefixes |= PrefixFlags::SEG_FS,
        _ => {}
    }

    ReqOperand::Mem(mem)
}

fn build_operand(state: &mut EncoderState<'_>, src: &Operand) -> Result<ReqOperand, Error> {
    match src {
        Operand::None => Ok(ReqOperand::Unused),
        Operand::Reg(reg) => Ok(ReqOperand::reg(*reg)),
        Operand::Imm(value) => build_imm_operand(state, *value),
        Operand::Label(label) => build_label_operand(state, *label),
        Operand::Mem(mem) => Ok(build_mem_operand(state, mem)),
    }
}

// ─── is4 fixup ─────────────────────────────────────────────────────────

/// Mark the is4 register for the four-operand XOP/FMA4-style forms: with a
/// memory operand in slot 3 the register in slot 2 carries the is4 flag,
/// otherwise slot 3 does.
fn fixup_is4_operands(req: &mut Request) {
    use Mnemonic::*;
    match req.mnemonic {
        Vblendvpd | Vblendvps | Vfmaddpd | Vfmaddps | Vfmaddsd | Vfmaddss | Vfmaddsubpd
        | Vfmaddsubps | Vfmsubaddpd | Vfmsubaddps | Vfmsubpd | Vfmsubps | Vfmsubsd | Vfmsubss
        | Vfnmaddpd | Vfnmaddps | Vfnmaddsd | Vfnmaddss | Vfnmsubpd | Vfnmsubps | Vfnmsubsd
        | Vfnmsubss | Vpblendvb | Vpcmov | Vpermil2pd | Vpermil2ps | Vpmacsdd | Vpmacsdqh
        | Vpmacsdql | Vpmacssdd | Vpmacssdqh | Vpmacssdql | Vpmacsswd | Vpmacssww | Vpmacswd
        | Vpmacsww | Vpmadcsswd | Vpmadcswd | Vpperm => {}
        _ => return,
    }

    let reg2 = matches!(req.operands[2], ReqOperand::Reg { .. });
    let mem2 = matches!(req.operands[2], ReqOperand::Mem(_));
    let reg3 = matches!(req.operands[3], ReqOperand::Reg { .. });
    let mem3 = matches!(req.operands[3], ReqOperand::Mem(_));

    if reg2 && mem3 {
        if let ReqOperand::Reg { is4, .. } = &mut req.operands[2] {
            *is4 = true;
        }
    } else if (reg2 && reg3) || (mem2 && reg3) {
        if let ReqOperand::Reg { is4, .. } = &mut req.operands[3] {
            *is4 = true;
        }
    }
}

// ─── Single-shot encode ────────────────────────────────────────────────

/// Translate instruction attributes to request prefix bits.
fn prefix_flags(attribs: Attribs) -> PrefixFlags {
    let mut flags = PrefixFlags::NONE;
    let mut translate = |attrib: Attribs, flag: PrefixFlags| {
        if attribs.contains(attrib) {
            flags |= flag;
        }
    };

    translate(Attribs::LOCK, PrefixFlags::LOCK);
    translate(Attribs::REP, PrefixFlags::REP);
    translate(Attribs::REPE, PrefixFlags::REPE);
    translate(Attribs::REPNE, PrefixFlags::REPNE);
    translate(Attribs::BND, PrefixFlags::BND);
    translate(Attribs::XACQUIRE, PrefixFlags::XACQUIRE);
    translate(Attribs::XRELEASE, PrefixFlags::XRELEASE);

    flags
}

/// Operand-size hint from the attributes; the smallest wins if several are
/// set.
fn size_hint(attribs: Attribs) -> SizeHint {
    if attribs.contains(Attribs::OPERAND_SIZE8) {
        SizeHint::Byte
    } else if attribs.contains(Attribs::OPERAND_SIZE16) {
        SizeHint::Word
    } else if attribs.contains(Attribs::OPERAND_SIZE32) {
        SizeHint::Dword
    } else if attribs.contains(Attribs::OPERAND_SIZE64) {
        SizeHint::Qword
    } else {
        SizeHint::None
    }
}

/// One encode: build the byte-level request operand by operand, run the is4
/// fixup, and invoke the byte-level encoder.
fn encode_one(
    pass: Pass<'_>,
    mode: MachineMode,
    attribs: Attribs,
    mnemonic: Mnemonic,
    operands: &[Operand],
) -> Result<EncoderResult, Error> {
    let mut state = EncoderState {
        pass,
        req: Request::new(mode, mnemonic),
        operand_index: 0,
        reloc_kind: RelocationKind::None,
        reloc_data: RelocationData::None,
        reloc_label: None,
    };

    state.req.prefixes = prefix_flags(attribs);
    state.req.size_hint = size_hint(attribs);

    let count = operands.len().min(MAX_OPERANDS);
    while state.operand_index < count {
        let idx = state.operand_index;
        let built = build_operand(&mut state, &operands[idx])?;
        state.req.operands[idx] = built;
        state.req.operand_count += 1;
        state.operand_index += 1;
    }

    fixup_is4_operands(&mut state.req);

    let bytes = x86::emit(&state.req)?;

    Ok(EncoderResult {
        bytes,
        reloc_kind: state.reloc_kind,
        reloc_data: state.reloc_data,
        reloc_label: state.reloc_label,
    })
}

// ─── Public surface ────────────────────────────────────────────────────

/// Context-free encode: placeholder displacements stand in for label
/// addresses, which makes the output suitable for size estimation but not
/// for execution.
///
/// # Errors
///
/// [`Error::ImpossibleInstruction`] when the byte-level encoder rejects the
/// request.
pub fn encode(
    mode: MachineMode,
    attribs: Attribs,
    mnemonic: Mnemonic,
    operands: &[Operand],
) -> Result<EncoderResult, Error> {
    encode_one(Pass::Probe, mode, attribs, mnemonic, operands)
}

/// Context-driven encode: resolves labels through `labels`, selects the
/// smallest viable branch form for `ctx.va`, and re-encodes until the
/// instruction size converges when a displacement depends on it.
///
/// On return `ctx.instr_size` matches the result's length; unresolved
/// internal labels set `ctx.needs_extra_pass`.
///
/// # Errors
///
/// [`Error::ImpossibleInstruction`] when the byte-level encoder rejects the
/// request, or when a branch target is outside every form the mnemonic
/// offers (a rel8-only branch to a far-away label).
pub fn encode_with_context(
    ctx: &mut EncoderContext,
    labels: &dyn LabelResolver,
    mode: MachineMode,
    attribs: Attribs,
    mnemonic: Mnemonic,
    operands: &[Operand],
) -> Result<EncoderResult, Error> {
    // The operand builder flips this to NeedsResize when an operand needs
    // the final length.
    ctx.instr_size = InstrSize::Unknown;

    let mut res = encode_one(
        Pass::Layout {
            ctx: &mut *ctx,
            labels,
        },
        mode,
        attribs,
        mnemonic,
        operands,
    )?;

    loop {
        let expected = match ctx.instr_size {
            InstrSize::NeedsResize => res.length(),
            _ => break,
        };

        // Encode with the now-known size; the length can change again near
        // the rel8/rel32 limits, so verify the fixed point.
        ctx.instr_size = InstrSize::Known(expected);
        res = encode_one(
            Pass::Layout {
                ctx: &mut *ctx,
                labels,
            },
            mode,
            attribs,
            mnemonic,
            operands,
        )?;

        if res.length() != expected {
            ctx.instr_size = InstrSize::NeedsResize;
        }
    }

    Ok(res)
}

/// Encode a full [`Instruction`]: counts the explicit leading operands and
/// delegates to [`encode_with_context`].
///
/// # Errors
///
/// [`Error::ImpossibleInstruction`] when the byte-level encoder rejects the
/// request or a branch target is out of range for the mnemonic's forms.
pub fn encode_instruction(
    ctx: &mut EncoderContext,
    labels: &dyn LabelResolver,
    mode: MachineMode,
    instr: &Instruction,
) -> Result<EncoderResult, Error> {
    let count = instr.explicit_op_count();
    encode_with_context(
        ctx,
        labels,
        mode,
        instr.attribs,
        instr.mnemonic,
        &instr.operands[..count],
    )
}
