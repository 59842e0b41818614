//! Tier 1: interpreter over the pre-decoded IR.
//!
//! Shares the operand/frame/label state with the bytecode tier; labels
//! carry IR-index targets. The first linear memory is resolved once per
//! call, so loads and stores skip the per-instruction lookup in the
//! single-memory common case.

use std::sync::Arc;

use coral_asm::{op, MiscOp, TrapKind};

use crate::error::{ExecResult, VmError};
use crate::interpreter::alu;
use crate::interpreter::executors::ExecCtx;
use crate::interpreter::predecode::{
    fuel_cost, ir_op, IrBody, EXTRA_HAS_ELSE, EXTRA_TYPE_INDEX, EXTRA_VALUE_MASK,
};
use crate::interpreter::Vm;
use crate::state::{Label, LabelTarget};
use crate::store::{InstanceId, MemAddr, Store};

impl Vm {
    pub(crate) fn execute_ir(
        &mut self,
        store: &mut Store,
        ctx: &ExecCtx,
        ir: Arc<IrBody>,
    ) -> ExecResult<()> {
        let frame = *self.current_frame()?;
        let inst = ctx.instance;
        let fp = frame.fp;
        let label_base = frame.label_base;
        // Per-call cached first memory; the pass refused multi-memory.
        let mem0: Option<MemAddr> = store.instance(inst)?.memories.first().copied();

        let code = &ir.code;
        let mut ip = 0usize;

        while ip < code.len() {
            let rec = code[ip];
            self.charge_fuel(fuel_cost(rec.op))?;

            match rec.op {
                x if x == u16::from(op::UNREACHABLE) => return Err(VmError::Unreachable),
                x if x == u16::from(op::NOP) => ip += 1,

                x if x == u16::from(op::BLOCK) => {
                    let (params, arity) = self.ir_block_arity(store, inst, rec.extra, false)?;
                    self.push_label(Label {
                        arity,
                        op_base: self.block_base(params)?,
                        target: LabelTarget::IrBlockEnd(rec.operand as usize),
                        catches: None,
                    })?;
                    ip += 1;
                }
                x if x == u16::from(op::LOOP) => {
                    let (params, arity) = self.ir_block_arity(store, inst, rec.extra, true)?;
                    self.push_label(Label {
                        arity,
                        op_base: self.block_base(params)?,
                        target: LabelTarget::IrLoopStart(rec.operand as usize),
                        catches: None,
                    })?;
                    ip += 1;
                }
                x if x == u16::from(op::IF) => {
                    let cond = self.pop_u32()?;
                    let (params, arity) = self.ir_block_arity(store, inst, rec.extra, false)?;
                    let false_target = code[ip + 1].operand as usize;
                    if cond != 0 {
                        self.push_label(Label {
                            arity,
                            op_base: self.block_base(params)?,
                            target: LabelTarget::IrBlockEnd(rec.operand as usize),
                            catches: None,
                        })?;
                        ip += 2;
                    } else if rec.extra & EXTRA_HAS_ELSE != 0 {
                        self.push_label(Label {
                            arity,
                            op_base: self.block_base(params)?,
                            target: LabelTarget::IrBlockEnd(rec.operand as usize),
                            catches: None,
                        })?;
                        ip = false_target;
                    } else {
                        ip = false_target;
                    }
                }
                x if x == u16::from(op::ELSE) => {
                    // Fall-through end of the then branch.
                    self.pop_label()?;
                    ip = rec.operand as usize;
                }
                x if x == u16::from(op::END) => {
                    if self.label_depth() > label_base {
                        self.pop_label()?;
                        ip += 1;
                    } else {
                        break;
                    }
                }

                x if x == u16::from(op::BR) => {
                    match self.ir_branch(rec.operand, label_base)? {
                        Some(target) => ip = target,
                        None => break,
                    }
                }
                x if x == u16::from(op::BR_IF) => {
                    if self.pop_u32()? != 0 {
                        match self.ir_branch(rec.operand, label_base)? {
                            Some(target) => ip = target,
                            None => break,
                        }
                    } else {
                        ip += 1;
                    }
                }
                x if x == u16::from(op::BR_TABLE) => {
                    let count = rec.operand as usize;
                    let index = (self.pop_u32()? as usize).min(count);
                    let depth = code[ip + 1 + index].operand;
                    match self.ir_branch(depth, label_base)? {
                        Some(target) => ip = target,
                        None => break,
                    }
                }
                x if x == u16::from(op::RETURN) => break,

                x if x == u16::from(op::CALL) => {
                    let addr = store.func_addr(inst, rec.operand)?;
                    self.ir_call(store, addr, ip + 1)?;
                    ip += 1;
                }
                x if x == u16::from(op::CALL_INDIRECT) => {
                    let addr = self.resolve_indirect(
                        store,
                        inst,
                        rec.operand,
                        u32::from(rec.extra),
                    )?;
                    self.ir_call(store, addr, ip + 1)?;
                    ip += 1;
                }
                x if x == u16::from(op::CALL_REF) => {
                    let target = self.pop_u64()?;
                    let addr = self.funcref_target(target)?;
                    self.ir_call(store, addr, ip + 1)?;
                    ip += 1;
                }
                x if x == u16::from(op::RETURN_CALL) => {
                    let addr = store.func_addr(inst, rec.operand)?;
                    self.begin_tail_call(store, addr)?;
                    break;
                }
                x if x == u16::from(op::RETURN_CALL_INDIRECT) => {
                    let addr = self.resolve_indirect(
                        store,
                        inst,
                        rec.operand,
                        u32::from(rec.extra),
                    )?;
                    self.begin_tail_call(store, addr)?;
                    break;
                }
                x if x == u16::from(op::RETURN_CALL_REF) => {
                    let target = self.pop_u64()?;
                    let addr = self.funcref_target(target)?;
                    self.begin_tail_call(store, addr)?;
                    break;
                }

                x if x == u16::from(op::DROP) => {
                    self.pop()?;
                    ip += 1;
                }
                x if x == u16::from(op::SELECT) => {
                    let cond = self.pop_u32()?;
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(if cond != 0 { a } else { b })?;
                    ip += 1;
                }

                x if x == u16::from(op::LOCAL_GET) => {
                    let v = self.slot(fp + rec.operand as usize);
                    self.push(v)?;
                    ip += 1;
                }
                x if x == u16::from(op::LOCAL_SET) => {
                    let v = self.pop()?;
                    self.set_slot(fp + rec.operand as usize, v);
                    ip += 1;
                }
                x if x == u16::from(op::LOCAL_TEE) => {
                    let v = self.peek(0)?;
                    self.set_slot(fp + rec.operand as usize, v);
                    ip += 1;
                }

                x if x == u16::from(op::GLOBAL_GET) => {
                    let addr = store.global_addr(inst, rec.operand)?;
                    self.push(store.globals[addr].value)?;
                    ip += 1;
                }
                x if x == u16::from(op::GLOBAL_SET) => {
                    let addr = store.global_addr(inst, rec.operand)?;
                    store.globals[addr].value = self.pop()?;
                    ip += 1;
                }
                x if x == u16::from(op::TABLE_GET) => {
                    let addr = store.table_addr(inst, rec.operand)?;
                    let i = self.pop_u32()?;
                    let v = store.tables[addr].get(u64::from(i)).map_err(VmError::from)?;
                    self.push_u64(v)?;
                    ip += 1;
                }
                x if x == u16::from(op::TABLE_SET) => {
                    let addr = store.table_addr(inst, rec.operand)?;
                    let v = self.pop_u64()?;
                    let i = self.pop_u32()?;
                    store.tables[addr]
                        .set(u64::from(i), v)
                        .map_err(VmError::from)?;
                    ip += 1;
                }

                x if (u16::from(op::I32_LOAD)..=u16::from(op::I64_STORE32)).contains(&x) => {
                    let mem = mem0.ok_or(VmError::MemoryIndexOutOfBounds(0))?;
                    self.exec_mem(store, mem, rec.op as u8, u64::from(rec.operand))?;
                    ip += 1;
                }
                x if x == u16::from(op::MEMORY_SIZE) => {
                    let mem = mem0.ok_or(VmError::MemoryIndexOutOfBounds(0))?;
                    let pages = store.memory(mem)?.size_pages();
                    self.push_u32(pages as u32)?;
                    ip += 1;
                }
                x if x == u16::from(op::MEMORY_GROW) => {
                    let mem = mem0.ok_or(VmError::MemoryIndexOutOfBounds(0))?;
                    self.exec_memory_grow(store, mem)?;
                    ip += 1;
                }

                x if x == u16::from(op::I32_CONST) || x == u16::from(op::F32_CONST) => {
                    self.push_u32(rec.operand)?;
                    ip += 1;
                }
                x if x == u16::from(op::I64_CONST) || x == u16::from(op::F64_CONST) => {
                    self.push_u64(ir.pool[rec.operand as usize])?;
                    ip += 1;
                }

                x if x == u16::from(op::REF_NULL) => {
                    self.push_u64(0)?;
                    ip += 1;
                }
                x if x == u16::from(op::REF_IS_NULL) => {
                    let v = self.pop_u64()?;
                    self.push_u32(u32::from(v == 0))?;
                    ip += 1;
                }
                x if x == u16::from(op::REF_FUNC) => {
                    let addr = store.func_addr(inst, rec.operand)?;
                    self.push_u64(addr as u64 + 1)?;
                    ip += 1;
                }
                x if x == u16::from(op::REF_EQ) => {
                    let b = self.pop_u64()?;
                    let a = self.pop_u64()?;
                    self.push_u32(u32::from(a == b))?;
                    ip += 1;
                }
                x if x == u16::from(op::REF_AS_NON_NULL) => {
                    let v = self.pop_u64()?;
                    if v == 0 {
                        return Err(VmError::Trap(TrapKind::NullReference));
                    }
                    self.push_u64(v)?;
                    ip += 1;
                }
                x if x == u16::from(op::BR_ON_NULL) => {
                    let v = self.pop_u64()?;
                    if v == 0 {
                        match self.ir_branch(rec.operand, label_base)? {
                            Some(target) => ip = target,
                            None => break,
                        }
                    } else {
                        self.push_u64(v)?;
                        ip += 1;
                    }
                }
                x if x == u16::from(op::BR_ON_NON_NULL) => {
                    let v = self.pop_u64()?;
                    if v != 0 {
                        self.push_u64(v)?;
                        match self.ir_branch(rec.operand, label_base)? {
                            Some(target) => ip = target,
                            None => break,
                        }
                    } else {
                        ip += 1;
                    }
                }

                // Superops.
                ir_op::LOCAL_GET2 => {
                    let a = self.slot(fp + rec.operand as usize);
                    self.push(a)?;
                    let b = self.slot(fp + code[ip + 1].operand as usize);
                    self.push(b)?;
                    ip += 2;
                }
                ir_op::LOCAL_GET_CONST32 => {
                    let a = self.slot(fp + rec.operand as usize);
                    self.push(a)?;
                    self.push_u32(code[ip + 1].operand)?;
                    ip += 2;
                }
                ir_op::LGET2_ADD_I32
                | ir_op::LGET2_SUB_I32
                | ir_op::LGET2_GT_S_I32
                | ir_op::LGET2_LE_S_I32 => {
                    let a = self.slot(fp + rec.operand as usize) as u64;
                    let b = self.slot(fp + code[ip + 1].operand as usize) as u64;
                    let alu_op = match rec.op {
                        ir_op::LGET2_ADD_I32 => op::I32_ADD,
                        ir_op::LGET2_SUB_I32 => op::I32_SUB,
                        ir_op::LGET2_GT_S_I32 => op::I32_GT_S,
                        _ => op::I32_LE_S,
                    };
                    self.push_u64(alu::eval_scalar(alu_op, a, b).map_err(VmError::from)?)?;
                    ip += 3;
                }
                ir_op::LGETC_ADD_I32
                | ir_op::LGETC_SUB_I32
                | ir_op::LGETC_LT_S_I32
                | ir_op::LGETC_GE_S_I32
                | ir_op::LGETC_LT_U_I32 => {
                    let a = self.slot(fp + rec.operand as usize) as u64;
                    let b = u64::from(code[ip + 1].operand);
                    let alu_op = match rec.op {
                        ir_op::LGETC_ADD_I32 => op::I32_ADD,
                        ir_op::LGETC_SUB_I32 => op::I32_SUB,
                        ir_op::LGETC_LT_S_I32 => op::I32_LT_S,
                        ir_op::LGETC_GE_S_I32 => op::I32_GE_S,
                        _ => op::I32_LT_U,
                    };
                    self.push_u64(alu::eval_scalar(alu_op, a, b).map_err(VmError::from)?)?;
                    ip += 3;
                }

                x if x & 0xFF00 == 0xFC00 => {
                    let sub = MiscOp::from_repr(u32::from(x & 0xFF))
                        .ok_or(VmError::Trap(TrapKind::InvalidBytecode))?;
                    self.exec_misc(store, inst, sub, rec.operand, u32::from(rec.extra))?;
                    ip += 1;
                }

                x if x < 0x100 => {
                    let opcode = x as u8;
                    let arity = alu::scalar_arity(opcode)
                        .ok_or(VmError::Trap(TrapKind::InvalidBytecode))?;
                    let b = if arity == 2 { self.pop_u64()? } else { 0 };
                    let a = self.pop_u64()?;
                    self.push_u64(alu::eval_scalar(opcode, a, b).map_err(VmError::from)?)?;
                    ip += 1;
                }

                _ => return Err(VmError::Trap(TrapKind::InvalidBytecode)),
            }
        }

        Ok(())
    }

    /// Resolve a block-type `extra` field to `(params, label arity)`.
    fn ir_block_arity(
        &self,
        store: &Store,
        inst: InstanceId,
        extra: u16,
        is_loop: bool,
    ) -> ExecResult<(usize, usize)> {
        let extra = extra & !EXTRA_HAS_ELSE;
        if extra & EXTRA_TYPE_INDEX != 0 {
            let idx = u32::from(extra & EXTRA_VALUE_MASK);
            let ty = store.instance(inst)?.func_type(idx)?;
            let params = ty.params.len();
            let arity = if is_loop { params } else { ty.results.len() };
            Ok((params, arity))
        } else {
            let literal = usize::from(extra & EXTRA_VALUE_MASK);
            Ok((0, if is_loop { 0 } else { literal }))
        }
    }

    /// IR-tier branch: returns the new ip, or `None` when the branch
    /// targets the function body (return).
    fn ir_branch(&mut self, depth: u32, label_base: usize) -> ExecResult<Option<usize>> {
        let labels_in_frame = self.label_depth() - label_base;
        if depth as usize >= labels_in_frame {
            return Ok(None);
        }
        let idx = self.label_depth() - 1 - depth as usize;
        let label = self.label(idx)?;
        let (arity, op_base, target) = (label.arity, label.op_base, label.target);

        self.shuffle_down(op_base, arity)?;
        self.truncate_labels(idx);
        match target {
            LabelTarget::IrBlockEnd(pos) => Ok(Some(pos)),
            LabelTarget::IrLoopStart(pos) => {
                self.push_label(Label {
                    arity,
                    op_base,
                    target,
                    catches: None,
                })?;
                Ok(Some(pos))
            }
            _ => Err(VmError::Trap(TrapKind::InvalidBytecode)),
        }
    }

    /// A call from IR code. Pre-decoded functions carry no catch labels, so
    /// an escaping exception searches (finding nothing) and propagates.
    fn ir_call(&mut self, store: &mut Store, addr: usize, resume: usize) -> ExecResult<()> {
        match self.call_internal(store, addr, resume) {
            Err(VmError::WasmException) => match self.dispatch_exception(store)? {
                Some(_) => Err(VmError::Trap(TrapKind::InvalidBytecode)),
                None => Err(VmError::WasmException),
            },
            other => other,
        }
    }
}
