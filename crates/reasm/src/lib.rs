//! # reasm: Context-Aware x86/x86-64 Instruction Encoder
//!
//! `reasm` is a pure Rust, zero-C-dependency instruction encoding core for
//! x86 and x86-64. Given a mnemonic, attributes, and operands it produces
//! machine-code bytes while resolving symbolic label references, selecting
//! the smallest viable branch encoding (short vs. near), and recording
//! relocation metadata when a concrete address cannot yet be baked into the
//! bytes.
//!
//! ## Quick Start
//!
//! ```rust
//! use reasm::{encode, Attribs, MachineMode, Mnemonic, Operand, Register};
//!
//! let res = encode(
//!     MachineMode::Amd64,
//!     Attribs::NONE,
//!     Mnemonic::Mov,
//!     &[Operand::Reg(Register::Rax), Operand::Imm(0x42)],
//! )
//! .unwrap();
//! assert_eq!(res.bytes.as_ref(), &[0xB8, 0x42, 0x00, 0x00, 0x00]);
//! ```
//!
//! Labels resolve through a [`Program`], which drives the multi-pass layout
//! protocol for you:
//!
//! ```rust
//! use reasm::{Instruction, MachineMode, Mnemonic, Operand, Program};
//!
//! let mut prog = Program::new(MachineMode::Amd64);
//! let top = prog.create_label();
//! prog.bind(top).unwrap();
//! prog.push(Instruction::new(Mnemonic::Nop));
//! prog.push(Instruction::with_operands(Mnemonic::Jmp, &[Operand::Label(top)]));
//!
//! let out = prog.assemble(0x1000).unwrap();
//! // The backward jump relaxes to the 2-byte short form.
//! assert_eq!(out.bytes, vec![0x90, 0xEB, 0xFD]);
//! ```
//!
//! ## Features
//!
//! - **Pure Rust**: no C/C++ FFI, no system assembler at runtime.
//! - **Short/near selection**: the smallest viable branch encoding wins,
//!   deterministically.
//! - **Multi-pass protocol**: unresolved labels encode with placeholders
//!   and flag the layout driver for another pass instead of failing.
//! - **RIP-relative re-encode**: `[label]` operands in 64-bit mode converge
//!   on the exact instruction size within a bounded number of inner passes.
//! - **Relocation metadata**: absolute and rel32 relocation descriptors for
//!   an embedding linker.
//! - **`no_std` + `alloc`**: embeddable in firmware, kernels, WASM.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]
// ── Pedantic lint policy ─────────────────────────────────────────────────
// An instruction encoder intentionally performs many narrowing and
// sign-changing casts between integer widths (i64→u8, u8→u32, etc.) and
// uses dense hex literals without separators (0xFFD0, 0x123456). The lints
// below are expected and acceptable in this context.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless,
    clippy::cast_possible_wrap,
    clippy::unreadable_literal,
    clippy::match_same_arms,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::uninlined_format_args,
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::too_many_lines,
    clippy::wildcard_imports,
    clippy::enum_glob_use,
    clippy::similar_names,
    clippy::return_self_not_must_use,
    clippy::too_many_arguments,
    clippy::fn_params_excessive_bools
)]

extern crate alloc;

/// The context-aware encoding core: variant table, operand builder,
/// relative-address resolution, is4 fixup, and the re-encode loop.
pub mod encoder;
/// Error type.
pub mod error;
/// Intermediate representation: machine modes, attributes, registers,
/// mnemonics, operands, instructions.
pub mod ir;
/// Label table, instruction stream, and the multi-pass layout driver.
pub mod program;
/// Byte-level x86 encoder (REX, ModR/M, SIB, VEX, immediates).
pub mod x86;

// Re-exports
pub use encoder::{
    encode, encode_instruction, encode_with_context, EncoderContext, EncoderResult, InstrSize,
    RelocationData, RelocationKind,
};
pub use error::Error;
pub use ir::{
    Attribs, Instruction, MachineMode, MemOperand, Mnemonic, Operand, OperandVisibility, Register,
};
pub use program::{
    AssemblyOutput, LabelFlags, LabelId, LabelResolver, Program, RelocationRecord,
};
pub use x86::{InstrBytes, MAX_INSTR_LEN, MAX_OPERANDS};
