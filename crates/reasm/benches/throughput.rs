//! Performance benchmarks for `reasm`.
//!
//! Measures:
//! - Single instruction encode latency (probe and context-driven)
//! - The RIP-relative re-encode loop
//! - Whole-program multi-pass layout with label-heavy workloads
//!
//! Run with: `cargo bench`

use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use reasm::{
    encode, encode_with_context, Attribs, EncoderContext, Instruction, LabelId, LabelResolver,
    MachineMode, MemOperand, Mnemonic, Operand, Program, Register,
};

#[derive(Default)]
struct Labels {
    addresses: BTreeMap<LabelId, i64>,
}

impl LabelResolver for Labels {
    fn label_address(&self, label: LabelId) -> Option<i64> {
        self.addresses.get(&label).copied()
    }

    fn is_external(&self, _label: LabelId) -> bool {
        false
    }
}

// ─── Single-Instruction Latency ──────────────────────────────────────────────

fn bench_single_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_encode");

    group.bench_function("mov_reg_imm", |b| {
        b.iter(|| {
            encode(
                MachineMode::Amd64,
                Attribs::NONE,
                Mnemonic::Mov,
                black_box(&[Operand::Reg(Register::Rax), Operand::Imm(0x1234)]),
            )
            .unwrap()
        })
    });

    group.bench_function("mov_mem_sib", |b| {
        let mut mem = MemOperand::base(8, Register::Rax);
        mem.index = Some(Register::Rcx);
        mem.scale = 8;
        mem.disp = 0x10;
        b.iter(|| {
            encode(
                MachineMode::Amd64,
                Attribs::NONE,
                Mnemonic::Mov,
                black_box(&[Operand::Mem(mem), Operand::Reg(Register::Rdx)]),
            )
            .unwrap()
        })
    });

    group.bench_function("vblendvps", |b| {
        b.iter(|| {
            encode(
                MachineMode::Amd64,
                Attribs::NONE,
                Mnemonic::Vblendvps,
                black_box(&[
                    Operand::Reg(Register::Xmm1),
                    Operand::Reg(Register::Xmm2),
                    Operand::Reg(Register::Xmm3),
                    Operand::Reg(Register::Xmm4),
                ]),
            )
            .unwrap()
        })
    });

    let mut labels = Labels::default();
    labels.addresses.insert(LabelId(0), 0x1040);

    group.bench_function("jmp_short_with_context", |b| {
        b.iter(|| {
            let mut ctx = EncoderContext::new(0x1000);
            encode_with_context(
                &mut ctx,
                &labels,
                MachineMode::Amd64,
                Attribs::NONE,
                Mnemonic::Jmp,
                black_box(&[Operand::Label(LabelId(0))]),
            )
            .unwrap()
        })
    });

    // Exercises the size re-encode loop every iteration.
    group.bench_function("rip_relative_reencode", |b| {
        b.iter(|| {
            let mut ctx = EncoderContext::new(0x1000);
            encode_with_context(
                &mut ctx,
                &labels,
                MachineMode::Amd64,
                Attribs::NONE,
                Mnemonic::Mov,
                black_box(&[
                    Operand::Reg(Register::Rax),
                    Operand::Mem(MemOperand::label(8, LabelId(0))),
                ]),
            )
            .unwrap()
        })
    });

    group.finish();
}

// ─── Whole-Program Layout ────────────────────────────────────────────────────

/// A chain of counted loops: every block jumps forward and loops backward,
/// which keeps the multi-pass driver busy shrinking branches.
fn build_loop_chain(blocks: usize) -> Program {
    let mut prog = Program::new(MachineMode::Amd64);
    for _ in 0..blocks {
        let top = prog.create_label();
        let done = prog.create_label();
        prog.bind(top).unwrap();
        prog.push(Instruction::with_operands(
            Mnemonic::Add,
            &[Operand::Reg(Register::Rax), Operand::Imm(1)],
        ));
        prog.push(Instruction::with_operands(
            Mnemonic::Jz,
            &[Operand::Label(done)],
        ));
        prog.push(Instruction::with_operands(
            Mnemonic::Jmp,
            &[Operand::Label(top)],
        ));
        prog.bind(done).unwrap();
        prog.push(Instruction::new(Mnemonic::Nop));
    }
    prog
}

fn bench_program_assemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("program_assemble");

    for blocks in [16usize, 128] {
        let instrs = blocks as u64 * 4;
        group.throughput(Throughput::Elements(instrs));
        group.bench_function(format!("loop_chain_{}", blocks), |b| {
            b.iter_batched(
                || build_loop_chain(blocks),
                |mut prog| prog.assemble(black_box(0x40_0000)).unwrap(),
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_encode, bench_program_assemble);
criterion_main!(benches);
