//! x86-64 emitter for register-IR bodies.
//!
//! Calling convention (SysV): `rdi` = register file, `rsi` = VM, `rdx` =
//! instance/store. Virtual registers live in the register file in memory
//! and are staged through `rax`/`rcx`; the return value convention writes
//! the single result to register slot 0 and returns the exit code in
//! `rax`. Any opcode outside the supported set aborts compilation.

use coral_asm::op;

use super::CompileError;
use crate::interpreter::regir::{reg_op, RegIrBody};

struct Asm {
    buf: Vec<u8>,
}

impl Asm {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn imm32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn imm64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn disp(reg: u8) -> u32 {
        u32::from(reg) * 8
    }

    /// mov rax, [rdi + 8*reg]
    fn load_rax(&mut self, reg: u8) {
        self.bytes(&[0x48, 0x8B, 0x87]);
        self.imm32(Self::disp(reg));
    }

    /// mov rcx, [rdi + 8*reg]
    fn load_rcx(&mut self, reg: u8) {
        self.bytes(&[0x48, 0x8B, 0x8F]);
        self.imm32(Self::disp(reg));
    }

    /// mov [rdi + 8*reg], rax
    fn store_rax(&mut self, reg: u8) {
        self.bytes(&[0x48, 0x89, 0x87]);
        self.imm32(Self::disp(reg));
    }

    /// setcc al; movzx eax, al
    fn setcc(&mut self, cc: u8) {
        self.bytes(&[0x0F, cc, 0xC0, 0x0F, 0xB6, 0xC0]);
    }

    /// xor eax, eax; ret
    fn epilogue_ok(&mut self) {
        self.bytes(&[0x31, 0xC0, 0xC3]);
    }
}

/// Condition codes for `setcc`/`jcc` second bytes.
mod cc {
    pub const E: u8 = 0x94;
    pub const NE: u8 = 0x95;
    pub const B: u8 = 0x92;
    pub const AE: u8 = 0x93;
    pub const A: u8 = 0x97;
    pub const BE: u8 = 0x96;
    pub const L: u8 = 0x9C;
    pub const GE: u8 = 0x9D;
    pub const LE: u8 = 0x9E;
    pub const G: u8 = 0x9F;
}

pub(super) fn emit(body: &RegIrBody) -> Result<Vec<u8>, CompileError> {
    let code = &body.code;
    let mut asm = Asm::new();
    let mut offsets = vec![0usize; code.len() + 1];
    // (position of a rel32 to patch, target record index)
    let mut fixups: Vec<(usize, usize)> = Vec::new();

    for (ip, i) in code.iter().enumerate() {
        offsets[ip] = asm.buf.len();

        match i.op {
            reg_op::MOV => {
                asm.load_rax(i.rs1);
                asm.store_rax(i.rd);
            }
            reg_op::CONST32 => {
                // mov eax, imm32 zero-extends.
                asm.bytes(&[0xB8]);
                asm.imm32(i.operand);
                asm.store_rax(i.rd);
            }
            reg_op::CONST64 => {
                let v = *body
                    .pool
                    .get(i.operand as usize)
                    .ok_or(CompileError::Unsupported)?;
                asm.bytes(&[0x48, 0xB8]);
                asm.imm64(v);
                asm.store_rax(i.rd);
            }

            reg_op::BR => {
                asm.bytes(&[0xE9]);
                fixups.push((asm.buf.len(), i.operand as usize));
                asm.imm32(0);
            }
            reg_op::BR_IF => {
                asm.load_rax(i.rs1);
                asm.bytes(&[0x85, 0xC0, 0x0F, 0x85]); // test eax,eax; jnz
                fixups.push((asm.buf.len(), i.operand as usize));
                asm.imm32(0);
            }
            reg_op::BR_IF_NOT => {
                asm.load_rax(i.rs1);
                asm.bytes(&[0x85, 0xC0, 0x0F, 0x84]); // test eax,eax; jz
                fixups.push((asm.buf.len(), i.operand as usize));
                asm.imm32(0);
            }

            reg_op::RETURN => {
                asm.load_rax(i.rs1);
                asm.store_rax(0);
                asm.epilogue_ok();
            }
            reg_op::RETURN_VOID => {
                asm.epilogue_ok();
            }

            reg_op::ADDI32 => {
                asm.load_rax(i.rs1);
                asm.bytes(&[0x05]); // add eax, imm32
                asm.imm32(i.operand);
                asm.store_rax(i.rd);
            }
            reg_op::SUBI32 => {
                asm.load_rax(i.rs1);
                asm.bytes(&[0x2D]); // sub eax, imm32
                asm.imm32(i.operand);
                asm.store_rax(i.rd);
            }
            reg_op::LT_S_I32 | reg_op::GE_S_I32 | reg_op::LT_U_I32 => {
                asm.load_rax(i.rs1);
                asm.bytes(&[0x3D]); // cmp eax, imm32
                asm.imm32(i.operand);
                asm.setcc(match i.op {
                    reg_op::LT_S_I32 => cc::L,
                    reg_op::GE_S_I32 => cc::GE,
                    _ => cc::B,
                });
                asm.store_rax(i.rd);
            }

            x if x < 0x100 => {
                emit_scalar(&mut asm, x as u8, i.rd, i.rs1, i.rs2())?;
            }

            _ => return Err(CompileError::Unsupported),
        }
    }
    offsets[code.len()] = asm.buf.len();
    // Backstop epilogue; regular bodies return before reaching it.
    asm.epilogue_ok();

    for (pos, target) in fixups {
        let rel = offsets[target] as i64 - (pos as i64 + 4);
        let rel = i32::try_from(rel).map_err(|_| CompileError::Unsupported)?;
        asm.buf[pos..pos + 4].copy_from_slice(&rel.to_le_bytes());
    }

    Ok(asm.buf)
}

fn emit_scalar(asm: &mut Asm, opcode: u8, rd: u8, rs1: u8, rs2: u8) -> Result<(), CompileError> {
    // Unary tests first.
    match opcode {
        op::I32_EQZ => {
            asm.load_rax(rs1);
            asm.bytes(&[0x85, 0xC0]); // test eax, eax
            asm.setcc(cc::E);
            asm.store_rax(rd);
            return Ok(());
        }
        op::I64_EQZ => {
            asm.load_rax(rs1);
            asm.bytes(&[0x48, 0x85, 0xC0]); // test rax, rax
            asm.setcc(cc::E);
            asm.store_rax(rd);
            return Ok(());
        }
        _ => {}
    }

    asm.load_rax(rs1);
    asm.load_rcx(rs2);

    match opcode {
        // 32-bit ALU; writing eax zero-extends, preserving the slot
        // encoding of i32 values.
        op::I32_ADD => asm.bytes(&[0x01, 0xC8]),
        op::I32_SUB => asm.bytes(&[0x29, 0xC8]),
        op::I32_MUL => asm.bytes(&[0x0F, 0xAF, 0xC1]),
        op::I32_AND => asm.bytes(&[0x21, 0xC8]),
        op::I32_OR => asm.bytes(&[0x09, 0xC8]),
        op::I32_XOR => asm.bytes(&[0x31, 0xC8]),
        // Hardware masks 32-bit shift counts to 5 bits, matching Wasm.
        op::I32_SHL => asm.bytes(&[0xD3, 0xE0]),
        op::I32_SHR_S => asm.bytes(&[0xD3, 0xF8]),
        op::I32_SHR_U => asm.bytes(&[0xD3, 0xE8]),

        op::I64_ADD => asm.bytes(&[0x48, 0x01, 0xC8]),
        op::I64_SUB => asm.bytes(&[0x48, 0x29, 0xC8]),
        op::I64_MUL => asm.bytes(&[0x48, 0x0F, 0xAF, 0xC1]),
        op::I64_AND => asm.bytes(&[0x48, 0x21, 0xC8]),
        op::I64_OR => asm.bytes(&[0x48, 0x09, 0xC8]),
        op::I64_XOR => asm.bytes(&[0x48, 0x31, 0xC8]),
        op::I64_SHL => asm.bytes(&[0x48, 0xD3, 0xE0]),
        op::I64_SHR_S => asm.bytes(&[0x48, 0xD3, 0xF8]),
        op::I64_SHR_U => asm.bytes(&[0x48, 0xD3, 0xE8]),

        op::I32_EQ | op::I32_NE | op::I32_LT_S | op::I32_LT_U | op::I32_GT_S
        | op::I32_GT_U | op::I32_LE_S | op::I32_LE_U | op::I32_GE_S | op::I32_GE_U => {
            asm.bytes(&[0x39, 0xC8]); // cmp eax, ecx
            asm.setcc(cc_of(opcode, op::I32_EQ));
        }
        op::I64_EQ | op::I64_NE | op::I64_LT_S | op::I64_LT_U | op::I64_GT_S
        | op::I64_GT_U | op::I64_LE_S | op::I64_LE_U | op::I64_GE_S | op::I64_GE_U => {
            asm.bytes(&[0x48, 0x39, 0xC8]); // cmp rax, rcx
            asm.setcc(cc_of(opcode, op::I64_EQ));
        }

        _ => return Err(CompileError::Unsupported),
    }

    asm.store_rax(rd);
    Ok(())
}

fn cc_of(opcode: u8, eq_base: u8) -> u8 {
    match opcode - eq_base {
        0 => cc::E,
        1 => cc::NE,
        2 => cc::L,
        3 => cc::B,
        4 => cc::G,
        5 => cc::A,
        6 => cc::LE,
        7 => cc::BE,
        8 => cc::GE,
        _ => cc::AE,
    }
}
