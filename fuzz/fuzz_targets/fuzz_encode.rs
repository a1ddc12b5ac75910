#![no_main]
use libfuzzer_sys::fuzz_target;

use reasm::{encode, Attribs, LabelId, MachineMode, MemOperand, Mnemonic, Operand, Register};

const MNEMONICS: &[Mnemonic] = &[
    Mnemonic::Add,
    Mnemonic::And,
    Mnemonic::Call,
    Mnemonic::Cmp,
    Mnemonic::Dec,
    Mnemonic::Inc,
    Mnemonic::Int3,
    Mnemonic::Jb,
    Mnemonic::Jcxz,
    Mnemonic::Jecxz,
    Mnemonic::Jknzd,
    Mnemonic::Jkzd,
    Mnemonic::Jmp,
    Mnemonic::Jnz,
    Mnemonic::Jrcxz,
    Mnemonic::Jz,
    Mnemonic::Lea,
    Mnemonic::Loop,
    Mnemonic::Loope,
    Mnemonic::Loopne,
    Mnemonic::Mov,
    Mnemonic::Nop,
    Mnemonic::Or,
    Mnemonic::Pop,
    Mnemonic::Push,
    Mnemonic::Ret,
    Mnemonic::Sub,
    Mnemonic::Test,
    Mnemonic::Xor,
    Mnemonic::Vblendvpd,
    Mnemonic::Vblendvps,
    Mnemonic::Vfmaddps,
    Mnemonic::Vfmsubpd,
    Mnemonic::Vfnmaddss,
    Mnemonic::Vpblendvb,
    Mnemonic::Vpcmov,
    Mnemonic::Vpperm,
];

const REGISTERS: &[Register] = &[
    Register::Al,
    Register::Ah,
    Register::Spl,
    Register::R9b,
    Register::Ax,
    Register::Di,
    Register::R10w,
    Register::Eax,
    Register::Esp,
    Register::Ebp,
    Register::R11d,
    Register::Rax,
    Register::Rsp,
    Register::Rbp,
    Register::Rsi,
    Register::R8,
    Register::R13,
    Register::Rip,
    Register::Fs,
    Register::Gs,
    Register::Xmm0,
    Register::Xmm5,
    Register::Xmm13,
    Register::Ymm2,
    Register::Ymm9,
];

const ATTRIBS: &[Attribs] = &[
    Attribs::NONE,
    Attribs::LOCK,
    Attribs::REP,
    Attribs::REPNE,
    Attribs::XACQUIRE,
    Attribs::OPERAND_SIZE8,
    Attribs::OPERAND_SIZE16,
    Attribs::OPERAND_SIZE32,
    Attribs::OPERAND_SIZE64,
];

struct Input<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Input<'_> {
    fn byte(&mut self) -> u8 {
        let b = self.data.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        b
    }

    fn i64(&mut self) -> i64 {
        let mut bytes = [0u8; 8];
        for b in &mut bytes {
            *b = self.byte();
        }
        i64::from_le_bytes(bytes)
    }

    fn reg(&mut self) -> Register {
        REGISTERS[self.byte() as usize % REGISTERS.len()]
    }

    fn operand(&mut self) -> Operand {
        match self.byte() % 5 {
            0 => Operand::None,
            1 => Operand::Reg(self.reg()),
            2 => Operand::Imm(self.i64()),
            3 => Operand::Label(LabelId(u32::from(self.byte()))),
            _ => {
                let selector = self.byte();
                let mut mem = MemOperand {
                    size: u16::from(self.byte() % 33),
                    scale: self.byte(),
                    disp: self.i64(),
                    ..MemOperand::default()
                };
                if selector & 1 != 0 {
                    mem.base = Some(self.reg());
                }
                if selector & 2 != 0 {
                    mem.index = Some(self.reg());
                }
                if selector & 4 != 0 {
                    mem.label = Some(LabelId(u32::from(self.byte())));
                }
                if selector & 8 != 0 {
                    mem.segment = Some(self.reg());
                }
                Operand::Mem(mem)
            }
        }
    }
}

fuzz_target!(|data: &[u8]| {
    let mut input = Input { data, pos: 0 };

    let mode = if input.byte() & 1 == 0 {
        MachineMode::Amd64
    } else {
        MachineMode::I386
    };
    let mnemonic = MNEMONICS[input.byte() as usize % MNEMONICS.len()];

    let mut attribs = Attribs::NONE;
    for _ in 0..2 {
        attribs |= ATTRIBS[input.byte() as usize % ATTRIBS.len()];
    }

    let count = usize::from(input.byte()) % 6;
    let mut operands = [Operand::None; 5];
    for slot in operands.iter_mut().take(count) {
        *slot = input.operand();
    }

    // The probe encoder must never panic; impossible combinations return
    // an error.
    let _ = encode(mode, attribs, mnemonic, &operands[..count]);
});
