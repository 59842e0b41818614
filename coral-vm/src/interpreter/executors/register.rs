//! Tier 2: interpreter over the register IR.
//!
//! Each call reserves a window in the VM's register arena, seeds the local
//! registers from the frame's operand window, and runs with values in
//! registers. Back edges are counted per call; crossing the threshold
//! compiles the function and unwinds with the internal `JitRestart` signal
//! so the caller re-enters through the native entry.

use std::sync::Arc;

use coral_asm::{op, TrapKind};

use crate::consts::{BACK_EDGE_THRESHOLD, REG_CALL_OVERHEAD};
use crate::error::{ExecResult, VmError};
use crate::interpreter::alu;
use crate::interpreter::executors::ExecCtx;
use crate::interpreter::regir::{reg_op, RegIrBody};
use crate::interpreter::Vm;
use crate::store::{MemAddr, Store};

impl Vm {
    pub(crate) fn execute_reg_ir(
        &mut self,
        store: &mut Store,
        ctx: &ExecCtx,
        body: Arc<RegIrBody>,
    ) -> ExecResult<()> {
        let frame = *self.current_frame()?;
        let total = body.reg_count as usize + REG_CALL_OVERHEAD;
        let base = self.reserve_regs(total)?;
        for i in 0..frame.locals {
            let v = self.slot(frame.fp + i) as u64;
            self.regs_mut()[base + i] = v;
        }

        let outcome = self.reg_loop(store, ctx, &body, base);
        self.release_regs(base);
        outcome
    }

    fn reg_loop(
        &mut self,
        store: &mut Store,
        ctx: &ExecCtx,
        body: &RegIrBody,
        base: usize,
    ) -> ExecResult<()> {
        let inst = ctx.instance;
        let code = &body.code;
        let mem0: Option<MemAddr> = store.instance(inst)?.memories.first().copied();
        let mut ip = 0usize;
        let mut back_edges = 0u32;

        macro_rules! rg {
            ($r:expr) => {
                self.regs()[base + $r as usize]
            };
        }
        macro_rules! set {
            ($r:expr, $v:expr) => {{
                let v = $v;
                self.regs_mut()[base + $r as usize] = v;
            }};
        }

        while ip < code.len() {
            let i = code[ip];
            self.charge_fuel(1)?;

            match i.op {
                reg_op::MOV => {
                    set!(i.rd, rg!(i.rs1));
                    ip += 1;
                }
                reg_op::CONST32 => {
                    set!(i.rd, u64::from(i.operand));
                    ip += 1;
                }
                reg_op::CONST64 => {
                    set!(i.rd, body.pool[i.operand as usize]);
                    ip += 1;
                }

                reg_op::BR => {
                    ip = self.reg_branch(store, ctx, i.operand as usize, ip, &mut back_edges)?;
                }
                reg_op::BR_IF => {
                    if rg!(i.rs1) as u32 != 0 {
                        ip = self.reg_branch(
                            store,
                            ctx,
                            i.operand as usize,
                            ip,
                            &mut back_edges,
                        )?;
                    } else {
                        ip += 1;
                    }
                }
                reg_op::BR_IF_NOT => {
                    if rg!(i.rs1) as u32 == 0 {
                        ip = self.reg_branch(
                            store,
                            ctx,
                            i.operand as usize,
                            ip,
                            &mut back_edges,
                        )?;
                    } else {
                        ip += 1;
                    }
                }
                reg_op::BR_TABLE => {
                    let count = i.operand as usize;
                    let sel = (rg!(i.rs1) as u32 as usize).min(count);
                    let target = code[ip + 1 + sel].operand as usize;
                    ip = self.reg_branch(store, ctx, target, ip, &mut back_edges)?;
                }

                reg_op::RETURN => {
                    let v = rg!(i.rs1);
                    self.push_u64(v)?;
                    return Ok(());
                }
                reg_op::RETURN_VOID => return Ok(()),

                reg_op::CALL => {
                    let addr = store.func_addr(inst, i.operand)?;
                    self.reg_call(store, addr, i.rd, base, ip + 1)?;
                    ip += 1;
                }
                reg_op::CALL_INDIRECT => {
                    let table = code[ip + 1].operand;
                    self.push_u32(rg!(i.rs1) as u32)?;
                    let addr = self.resolve_indirect(store, inst, i.operand, table)?;
                    self.reg_call(store, addr, i.rd, base, ip + 2)?;
                    ip += 2;
                }
                reg_op::TAIL_CALL => {
                    let addr = store.func_addr(inst, i.operand)?;
                    let argc = store.func(addr)?.ty.params.len();
                    for k in 0..argc {
                        let v = rg!(i.rd as usize + k);
                        self.push_u64(v)?;
                    }
                    self.begin_tail_call(store, addr)?;
                    return Ok(());
                }
                reg_op::TAIL_CALL_INDIRECT => {
                    let table = code[ip + 1].operand;
                    self.push_u32(rg!(i.rs1) as u32)?;
                    let addr = self.resolve_indirect(store, inst, i.operand, table)?;
                    let argc = store.func(addr)?.ty.params.len();
                    for k in 0..argc {
                        let v = rg!(i.rd as usize + k);
                        self.push_u64(v)?;
                    }
                    self.begin_tail_call(store, addr)?;
                    return Ok(());
                }

                reg_op::MEMORY_FILL | reg_op::MEMORY_COPY => {
                    for k in 0..3 {
                        let v = rg!(i.rs1 as usize + k);
                        self.push_u64(v)?;
                    }
                    let sub = if i.op == reg_op::MEMORY_FILL {
                        coral_asm::MiscOp::MemoryFill
                    } else {
                        coral_asm::MiscOp::MemoryCopy
                    };
                    self.exec_misc(store, inst, sub, 0, 0)?;
                    ip += 1;
                }

                reg_op::ADDI32 | reg_op::SUBI32 | reg_op::LT_S_I32 | reg_op::GE_S_I32
                | reg_op::LT_U_I32 => {
                    let alu_op = match i.op {
                        reg_op::ADDI32 => op::I32_ADD,
                        reg_op::SUBI32 => op::I32_SUB,
                        reg_op::LT_S_I32 => op::I32_LT_S,
                        reg_op::GE_S_I32 => op::I32_GE_S,
                        _ => op::I32_LT_U,
                    };
                    let v = alu::eval_scalar(alu_op, rg!(i.rs1), u64::from(i.operand))
                        .map_err(VmError::from)?;
                    set!(i.rd, v);
                    ip += 1;
                }

                x if x == u16::from(op::SELECT) => {
                    if rg!(i.rd as usize + 2) as u32 == 0 {
                        set!(i.rd, rg!(i.rd as usize + 1));
                    }
                    ip += 1;
                }

                x if (u16::from(op::I32_LOAD)..=u16::from(op::I64_LOAD32_U)).contains(&x) => {
                    let mem = mem0.ok_or(VmError::MemoryIndexOutOfBounds(0))?;
                    self.push_u64(rg!(i.rs1))?;
                    self.exec_mem(store, mem, x as u8, u64::from(i.operand))?;
                    let v = self.pop_u64()?;
                    set!(i.rd, v);
                    ip += 1;
                }
                x if (u16::from(op::I32_STORE)..=u16::from(op::I64_STORE32)).contains(&x) => {
                    let mem = mem0.ok_or(VmError::MemoryIndexOutOfBounds(0))?;
                    self.push_u64(rg!(i.rs1))?;
                    self.push_u64(rg!(i.rd))?;
                    self.exec_mem(store, mem, x as u8, u64::from(i.operand))?;
                    ip += 1;
                }
                x if x == u16::from(op::MEMORY_SIZE) => {
                    let mem = mem0.ok_or(VmError::MemoryIndexOutOfBounds(0))?;
                    let pages = store.memory(mem)?.size_pages();
                    set!(i.rd, u64::from(pages as u32));
                    ip += 1;
                }
                x if x == u16::from(op::MEMORY_GROW) => {
                    let mem = mem0.ok_or(VmError::MemoryIndexOutOfBounds(0))?;
                    self.push_u32(rg!(i.rs1) as u32)?;
                    self.exec_memory_grow(store, mem)?;
                    let v = self.pop_u64()?;
                    set!(i.rd, v);
                    ip += 1;
                }

                x if x & 0xFF00 == 0xFC00 => {
                    let sub = u32::from(x & 0xFF);
                    if sub > 0x07 {
                        return Err(VmError::Trap(TrapKind::InvalidBytecode));
                    }
                    set!(i.rd, alu::eval_trunc_sat(sub, rg!(i.rs1)));
                    ip += 1;
                }

                x if x < 0x100 => {
                    let opcode = x as u8;
                    let arity = alu::scalar_arity(opcode)
                        .ok_or(VmError::Trap(TrapKind::InvalidBytecode))?;
                    let b = if arity == 2 { rg!(i.rs2()) } else { 0 };
                    let v = alu::eval_scalar(opcode, rg!(i.rs1), b).map_err(VmError::from)?;
                    set!(i.rd, v);
                    ip += 1;
                }

                _ => return Err(VmError::Trap(TrapKind::InvalidBytecode)),
            }
        }

        Err(VmError::Trap(TrapKind::InvalidBytecode))
    }

    /// Take a branch; backward targets bump the per-call counter and may
    /// trigger mid-call compilation.
    fn reg_branch(
        &mut self,
        store: &mut Store,
        ctx: &ExecCtx,
        target: usize,
        from: usize,
        back_edges: &mut u32,
    ) -> ExecResult<usize> {
        if target <= from {
            *back_edges += 1;
            if *back_edges >= BACK_EDGE_THRESHOLD {
                *back_edges = 0;
                if let Some(wasm) = store.funcs[ctx.func].as_wasm_mut() {
                    if wasm.tiers.jit.is_some() {
                        return Err(VmError::JitRestart);
                    }
                    if !wasm.tiers.jit_failed {
                        let reg = wasm.tiers.regir.clone().expect("executing register ir");
                        match crate::interpreter::jit::compile(&reg) {
                            Ok(code) => {
                                tracing::debug!(func = ctx.func, "back-edge jit compile");
                                wasm.tiers.jit = Some(Arc::new(code));
                                return Err(VmError::JitRestart);
                            }
                            Err(_) => wasm.tiers.jit_failed = true,
                        }
                    }
                }
            }
        }
        Ok(target)
    }

    fn reg_call(
        &mut self,
        store: &mut Store,
        addr: usize,
        arg_base: u8,
        base: usize,
        resume: usize,
    ) -> ExecResult<()> {
        let ty = store.func(addr)?.ty.clone();
        let argc = ty.params.len();
        let resc = ty.results.len();
        for k in 0..argc {
            let v = self.regs()[base + arg_base as usize + k];
            self.push_u64(v)?;
        }
        // Register-IR functions carry no catch labels; an escaping
        // exception propagates unchanged.
        self.call_internal(store, addr, resume)?;
        for k in (0..resc).rev() {
            let v = self.pop_u64()?;
            self.regs_mut()[base + arg_base as usize + k] = v;
        }
        Ok(())
    }
}
