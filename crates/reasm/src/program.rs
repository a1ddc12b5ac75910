//! Label table, instruction stream, and the multi-pass layout driver.
//!
//! The encoder resolves labels through the [`LabelResolver`] trait; a
//! [`Program`] implements it over its own label table and drives the
//! encode/relayout loop: every pass re-encodes the stream top to bottom,
//! re-placing labels as sizes settle, until no label moves and no
//! unresolved reference remains.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::encoder::{self, EncoderContext, RelocationData, RelocationKind};
use crate::error::Error;
use crate::ir::{Instruction, MachineMode};

/// Identifies a label within one [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabelId(pub u32);

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Label property flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabelFlags(u8);

impl LabelFlags {
    /// No flags.
    pub const NONE: LabelFlags = LabelFlags(0);
    /// The label's address is supplied by a later linking stage; it is
    /// never placed by the layout driver and produces relocations instead
    /// of extra passes.
    pub const EXTERNAL: LabelFlags = LabelFlags(1 << 0);

    /// Whether all flags in `other` are set.
    #[inline]
    pub const fn contains(self, other: LabelFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for LabelFlags {
    type Output = LabelFlags;
    #[inline]
    fn bitor(self, rhs: LabelFlags) -> LabelFlags {
        LabelFlags(self.0 | rhs.0)
    }
}

/// Label lookup the encoder performs during a layout pass.
///
/// Addresses may change between passes; the external flag is stable.
pub trait LabelResolver {
    /// The label's virtual address, or `None` while it has not been placed.
    fn label_address(&self, label: LabelId) -> Option<i64>;

    /// Whether the label is resolved by a linking stage rather than the
    /// current assembly.
    fn is_external(&self, label: LabelId) -> bool;
}

#[derive(Debug, Clone)]
struct LabelEntry {
    name: Option<String>,
    flags: LabelFlags,
    address: Option<i64>,
    bound: bool,
}

#[derive(Debug, Clone, Copy)]
enum Node {
    Label(LabelId),
    Instr(Instruction),
}

/// A relocation surfaced by [`Program::assemble`], positioned at the start
/// of the instruction that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationRecord {
    /// Byte offset of the owning instruction within the output.
    pub offset: usize,
    /// How the target is measured.
    pub kind: RelocationKind,
    /// Which field of the instruction is patched.
    pub data: RelocationData,
    /// The label to resolve, when one is attached.
    pub label: Option<LabelId>,
}

/// Final machine code plus the relocation records an embedding linker needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssemblyOutput {
    /// The emitted machine code.
    pub bytes: Vec<u8>,
    /// Relocations in stream order.
    pub relocations: Vec<RelocationRecord>,
}

/// Upper bound on layout passes before giving up.
const MAX_PASSES: usize = 32;

/// An instruction stream with a label table and the multi-pass layout
/// driver.
#[derive(Debug, Clone)]
pub struct Program {
    mode: MachineMode,
    labels: Vec<LabelEntry>,
    nodes: Vec<Node>,
}

impl Program {
    /// An empty program for the given machine mode.
    pub fn new(mode: MachineMode) -> Self {
        Self {
            mode,
            labels: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// The program's machine mode.
    pub fn mode(&self) -> MachineMode {
        self.mode
    }

    /// Create an unnamed label.
    pub fn create_label(&mut self) -> LabelId {
        self.new_label(None, LabelFlags::NONE)
    }

    /// Create a named label.
    pub fn create_named_label(&mut self, name: &str) -> LabelId {
        self.new_label(Some(String::from(name)), LabelFlags::NONE)
    }

    /// Create an external label; its address belongs to the linking stage.
    pub fn create_external_label(&mut self, name: &str) -> LabelId {
        self.new_label(Some(String::from(name)), LabelFlags::EXTERNAL)
    }

    fn new_label(&mut self, name: Option<String>, flags: LabelFlags) -> LabelId {
        let id = LabelId(self.labels.len() as u32);
        self.labels.push(LabelEntry {
            name,
            flags,
            address: None,
            bound: false,
        });
        id
    }

    /// The label's name, if it was created with one.
    pub fn label_name(&self, label: LabelId) -> Option<&str> {
        self.labels
            .get(label.0 as usize)
            .and_then(|entry| entry.name.as_deref())
    }

    /// Bind a label to the current end of the instruction stream.
    pub fn bind(&mut self, label: LabelId) -> Result<(), Error> {
        let entry = self
            .labels
            .get_mut(label.0 as usize)
            .ok_or(Error::UnknownLabel { label })?;
        if entry.flags.contains(LabelFlags::EXTERNAL) {
            return Err(Error::ExternalLabelBound { label });
        }
        if entry.bound {
            return Err(Error::LabelRedefined { label });
        }
        entry.bound = true;
        self.nodes.push(Node::Label(label));
        Ok(())
    }

    /// Append an instruction.
    pub fn push(&mut self, instr: Instruction) {
        self.nodes.push(Node::Instr(instr));
    }

    /// Lay out and encode the whole stream starting at `base`.
    ///
    /// Runs encode passes until no label moves and no unresolved internal
    /// reference remains. A label that is never bound keeps demanding extra
    /// passes and surfaces as [`Error::LayoutDiverged`].
    ///
    /// # Errors
    ///
    /// [`Error::ImpossibleInstruction`] from the encoder, or
    /// [`Error::LayoutDiverged`] when layout does not reach a fixed point
    /// within the pass limit.
    pub fn assemble(&mut self, base: i64) -> Result<AssemblyOutput, Error> {
        let mut ctx = EncoderContext::new(base);

        for _ in 0..MAX_PASSES {
            ctx.begin_pass();
            let mut moved = false;
            let mut out = AssemblyOutput::default();
            let mut va = base;

            for i in 0..self.nodes.len() {
                let node = self.nodes[i];
                match node {
                    Node::Label(label) => {
                        let entry = &mut self.labels[label.0 as usize];
                        if entry.address != Some(va) {
                            entry.address = Some(va);
                            moved = true;
                        }
                    }
                    Node::Instr(instr) => {
                        ctx.va = va;
                        let res =
                            encoder::encode_instruction(&mut ctx, &*self, self.mode, &instr)?;
                        if res.reloc_kind != RelocationKind::None {
                            out.relocations.push(RelocationRecord {
                                offset: (va - base) as usize,
                                kind: res.reloc_kind,
                                data: res.reloc_data,
                                label: res.reloc_label,
                            });
                        }
                        va += i64::from(res.length());
                        out.bytes.extend_from_slice(&res.bytes);
                    }
                }
            }

            if !ctx.needs_extra_pass && !moved {
                return Ok(out);
            }
        }

        Err(Error::LayoutDiverged {
            max_passes: MAX_PASSES,
        })
    }
}

impl LabelResolver for Program {
    fn label_address(&self, label: LabelId) -> Option<i64> {
        self.labels.get(label.0 as usize).and_then(|e| e.address)
    }

    fn is_external(&self, label: LabelId) -> bool {
        self.labels
            .get(label.0 as usize)
            .is_some_and(|e| e.flags.contains(LabelFlags::EXTERNAL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{MemOperand, Mnemonic, Operand, Register};

    #[test]
    fn backward_jump_resolves_in_one_pass() {
        let mut prog = Program::new(MachineMode::Amd64);
        let top = prog.create_label();
        prog.bind(top).unwrap();
        prog.push(Instruction::new(Mnemonic::Nop));
        prog.push(Instruction::with_operands(
            Mnemonic::Jmp,
            &[Operand::Label(top)],
        ));

        let out = prog.assemble(0x1000).unwrap();
        assert_eq!(out.bytes, vec![0x90, 0xEB, 0xFD]);
        assert!(out.relocations.is_empty());
    }

    #[test]
    fn forward_jump_relaxes_to_short() {
        let mut prog = Program::new(MachineMode::Amd64);
        let skip = prog.create_label();
        prog.push(Instruction::with_operands(
            Mnemonic::Jmp,
            &[Operand::Label(skip)],
        ));
        prog.bind(skip).unwrap();
        prog.push(Instruction::new(Mnemonic::Nop));

        let out = prog.assemble(0x1000).unwrap();
        // jmp to the next instruction: delta 0, short form.
        assert_eq!(out.bytes, vec![0xEB, 0x00, 0x90]);
    }

    #[test]
    fn far_forward_jump_stays_near() {
        let mut prog = Program::new(MachineMode::Amd64);
        let end = prog.create_label();
        prog.push(Instruction::with_operands(
            Mnemonic::Jmp,
            &[Operand::Label(end)],
        ));
        // 200 bytes of padding keeps the target out of rel8 range.
        for _ in 0..200 {
            prog.push(Instruction::new(Mnemonic::Nop));
        }
        prog.bind(end).unwrap();
        prog.push(Instruction::new(Mnemonic::Ret));

        let out = prog.assemble(0).unwrap();
        assert_eq!(out.bytes.len(), 5 + 200 + 1);
        assert_eq!(out.bytes[0], 0xE9);
        // Target 205 relative to end of the 5-byte jmp.
        assert_eq!(&out.bytes[1..5], &200i32.to_le_bytes());
    }

    #[test]
    fn external_label_produces_relocation() {
        let mut prog = Program::new(MachineMode::Amd64);
        let sym = prog.create_external_label("puts");
        prog.push(Instruction::with_operands(
            Mnemonic::Mov,
            &[Operand::Reg(Register::Rax), Operand::Label(sym)],
        ));

        let out = prog.assemble(0x1000).unwrap();
        assert_eq!(
            out.relocations,
            vec![RelocationRecord {
                offset: 0,
                kind: RelocationKind::Abs,
                data: RelocationData::Immediate,
                label: Some(sym),
            }]
        );
    }

    #[test]
    fn rip_relative_load_converges() {
        let mut prog = Program::new(MachineMode::Amd64);
        let data = prog.create_label();
        prog.push(Instruction::with_operands(
            Mnemonic::Mov,
            &[
                Operand::Reg(Register::Rax),
                Operand::Mem(MemOperand::label(8, data)),
            ],
        ));
        prog.push(Instruction::new(Mnemonic::Ret));
        prog.bind(data).unwrap();

        let out = prog.assemble(0x1000).unwrap();
        // mov rax, [rip+disp32] is 7 bytes; the data label sits right after
        // the ret, so disp = 0x1008 - (0x1000 + 7) = 1.
        assert_eq!(out.bytes[..7], [0x48, 0x8B, 0x05, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(out.bytes[7], 0xC3);
        assert!(out.relocations.is_empty());
    }

    #[test]
    fn bind_errors() {
        let mut prog = Program::new(MachineMode::Amd64);
        let a = prog.create_label();
        prog.bind(a).unwrap();
        assert_eq!(prog.bind(a), Err(Error::LabelRedefined { label: a }));

        let ext = prog.create_external_label("sym");
        assert_eq!(prog.bind(ext), Err(Error::ExternalLabelBound { label: ext }));

        assert_eq!(
            prog.bind(LabelId(99)),
            Err(Error::UnknownLabel { label: LabelId(99) })
        );
    }

    #[test]
    fn unbound_label_diverges() {
        let mut prog = Program::new(MachineMode::Amd64);
        let nowhere = prog.create_label();
        prog.push(Instruction::with_operands(
            Mnemonic::Jmp,
            &[Operand::Label(nowhere)],
        ));

        assert_eq!(
            prog.assemble(0),
            Err(Error::LayoutDiverged { max_passes: 32 })
        );
    }

    #[test]
    fn label_names() {
        let mut prog = Program::new(MachineMode::Amd64);
        let named = prog.create_named_label("entry");
        let anon = prog.create_label();
        assert_eq!(prog.label_name(named), Some("entry"));
        assert_eq!(prog.label_name(anon), None);
    }
}
