//! Tier 0: direct dispatch on raw bytecode.
//!
//! Baseline for the full feature set; the only tier that executes SIMD, GC,
//! atomics, exception handling, and multi-memory. Control flow uses the
//! branch-target side table when available and falls back to forward
//! scanning with identical semantics.

use coral_asm::{op, BlockType, BytecodeReader, TrapKind};

use crate::consts::{MAX_CATCH_CLAUSES, TAIL_CALL_SLOTS};
use crate::error::{ExecResult, VmError};
use crate::interpreter::alu;
use crate::interpreter::branch::scan_forward;
use crate::interpreter::exception::CatchOutcome;
use crate::interpreter::executors::ExecCtx;
use crate::interpreter::{TailCall, Vm};
use crate::state::{CatchClause, CatchKind, Label, LabelTarget};
use crate::store::{FuncAddr, InstanceId, MemAddr, Store};

/// Intra-frame control signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    /// Keep dispatching.
    Continue,
    /// Unwind the current frame (return, tail call, or caught-to-function
    /// exception).
    Return,
}

impl Vm {
    pub(crate) fn execute_bytecode(
        &mut self,
        store: &mut Store,
        ctx: &ExecCtx,
    ) -> ExecResult<()> {
        let body = ctx.body.clone();
        let mut reader = BytecodeReader::new(&body);
        let frame_label_base = self.current_frame()?.label_base;
        let frame_fp = self.current_frame()?.fp;
        let inst = ctx.instance;

        while !reader.is_at_end() {
            let at = reader.pos();
            let opcode = reader.read_u8().map_err(VmError::from)?;
            self.charge_fuel(1)?;
            if !matches!(
                opcode,
                op::GC_PREFIX | op::MISC_PREFIX | op::SIMD_PREFIX | op::ATOMIC_PREFIX
            ) {
                if let Some(profile) = self.profile_mut() {
                    profile.record(u32::from(opcode));
                }
            }

            match opcode {
                op::UNREACHABLE => return Err(VmError::Unreachable),
                op::NOP => {}

                op::BLOCK => {
                    let bt = reader.read_block_type().map_err(VmError::from)?;
                    let (params, results) = self.block_arity(store, inst, bt)?;
                    let (_, end) = self.targets_of(ctx, at, reader.pos())?;
                    self.push_label(Label {
                        arity: results,
                        op_base: self.block_base(params)?,
                        target: LabelTarget::BlockEnd(end),
                        catches: None,
                    })?;
                }

                op::LOOP => {
                    let bt = reader.read_block_type().map_err(VmError::from)?;
                    let (params, _) = self.block_arity(store, inst, bt)?;
                    self.push_label(Label {
                        arity: params,
                        op_base: self.block_base(params)?,
                        target: LabelTarget::LoopStart(reader.pos()),
                        catches: None,
                    })?;
                }

                op::IF => {
                    let bt = reader.read_block_type().map_err(VmError::from)?;
                    let cond = self.pop_u32()?;
                    let (params, results) = self.block_arity(store, inst, bt)?;
                    let (after_else, end) = self.targets_of(ctx, at, reader.pos())?;
                    if cond != 0 {
                        self.push_label(Label {
                            arity: results,
                            op_base: self.block_base(params)?,
                            target: LabelTarget::BlockEnd(end),
                            catches: None,
                        })?;
                    } else if let Some(else_pos) = after_else {
                        self.push_label(Label {
                            arity: results,
                            op_base: self.block_base(params)?,
                            target: LabelTarget::BlockEnd(end),
                            catches: None,
                        })?;
                        reader.set_pos(else_pos);
                    } else {
                        reader.set_pos(end);
                    }
                }

                op::ELSE => {
                    // Fall-through end of a then-branch: leave the if.
                    let label = self.pop_label()?;
                    match label.target {
                        LabelTarget::BlockEnd(end) => reader.set_pos(end),
                        _ => return Err(VmError::Trap(TrapKind::InvalidBytecode)),
                    }
                }

                op::END => {
                    if self.label_depth() > frame_label_base {
                        self.pop_label()?;
                    } else {
                        // Function-level end.
                        break;
                    }
                }

                op::TRY_TABLE => {
                    let bt = reader.read_block_type().map_err(VmError::from)?;
                    let (params, results) = self.block_arity(store, inst, bt)?;
                    let count = reader.read_u32().map_err(VmError::from)? as usize;
                    if count > MAX_CATCH_CLAUSES {
                        return Err(VmError::Trap(TrapKind::InvalidBytecode));
                    }
                    let mut clauses = Vec::with_capacity(count);
                    for _ in 0..count {
                        clauses.push(self.read_catch_clause(store, inst, &mut reader)?);
                    }
                    let (_, end) = self.targets_of(ctx, at, reader.pos())?;
                    self.push_label(Label {
                        arity: results,
                        op_base: self.block_base(params)?,
                        target: LabelTarget::BlockEnd(end),
                        catches: Some(clauses.into_boxed_slice()),
                    })?;
                }

                op::THROW => {
                    let idx = reader.read_u32().map_err(VmError::from)?;
                    let tag = store.tag_addr(inst, idx)?;
                    self.raise_exception(store, tag)?;
                    if let Control::Return = self.handle_exception(store, &mut reader)? {
                        break;
                    }
                }

                op::THROW_REF => {
                    let handle = self.pop_u64()?;
                    self.reraise_exception(handle)?;
                    if let Control::Return = self.handle_exception(store, &mut reader)? {
                        break;
                    }
                }

                op::BR => {
                    let depth = reader.read_u32().map_err(VmError::from)?;
                    if self.branch(depth, frame_label_base, &mut reader)? {
                        break;
                    }
                }

                op::BR_IF => {
                    let depth = reader.read_u32().map_err(VmError::from)?;
                    if self.pop_u32()? != 0
                        && self.branch(depth, frame_label_base, &mut reader)?
                    {
                        break;
                    }
                }

                op::BR_TABLE => {
                    let count = reader.read_u32().map_err(VmError::from)? as usize;
                    let mut depths = Vec::with_capacity(count + 1);
                    for _ in 0..=count {
                        depths.push(reader.read_u32().map_err(VmError::from)?);
                    }
                    let index = (self.pop_u32()? as usize).min(count);
                    if self.branch(depths[index], frame_label_base, &mut reader)? {
                        break;
                    }
                }

                op::RETURN => break,

                op::CALL => {
                    let idx = reader.read_u32().map_err(VmError::from)?;
                    let addr = store.func_addr(inst, idx)?;
                    if let Control::Return = self.call_site(store, addr, &mut reader)? {
                        break;
                    }
                }

                op::CALL_INDIRECT => {
                    let addr = self.indirect_target(store, inst, &mut reader)?;
                    if let Control::Return = self.call_site(store, addr, &mut reader)? {
                        break;
                    }
                }

                op::CALL_REF => {
                    let _type_idx = reader.read_u32().map_err(VmError::from)?;
                    let target = self.pop_u64()?;
                    let addr = self.funcref_target(target)?;
                    if let Control::Return = self.call_site(store, addr, &mut reader)? {
                        break;
                    }
                }

                op::RETURN_CALL => {
                    let idx = reader.read_u32().map_err(VmError::from)?;
                    let addr = store.func_addr(inst, idx)?;
                    if let Control::Return = self.tail_call_site(store, addr, &mut reader)? {
                        break;
                    }
                }

                op::RETURN_CALL_INDIRECT => {
                    let addr = self.indirect_target(store, inst, &mut reader)?;
                    if let Control::Return = self.tail_call_site(store, addr, &mut reader)? {
                        break;
                    }
                }

                op::RETURN_CALL_REF => {
                    let _type_idx = reader.read_u32().map_err(VmError::from)?;
                    let target = self.pop_u64()?;
                    let addr = self.funcref_target(target)?;
                    if let Control::Return = self.tail_call_site(store, addr, &mut reader)? {
                        break;
                    }
                }

                op::DROP => {
                    self.pop()?;
                }

                op::SELECT => self.exec_select()?,
                op::SELECT_T => {
                    let count = reader.read_u32().map_err(VmError::from)?;
                    for _ in 0..count {
                        reader.read_val_type().map_err(VmError::from)?;
                    }
                    self.exec_select()?;
                }

                op::LOCAL_GET => {
                    let idx = reader.read_u32().map_err(VmError::from)? as usize;
                    let v = self.slot(frame_fp + idx);
                    self.push(v)?;
                }
                op::LOCAL_SET => {
                    let idx = reader.read_u32().map_err(VmError::from)? as usize;
                    let v = self.pop()?;
                    self.set_slot(frame_fp + idx, v);
                }
                op::LOCAL_TEE => {
                    let idx = reader.read_u32().map_err(VmError::from)? as usize;
                    let v = self.peek(0)?;
                    self.set_slot(frame_fp + idx, v);
                }

                op::GLOBAL_GET => {
                    let idx = reader.read_u32().map_err(VmError::from)?;
                    let addr = store.global_addr(inst, idx)?;
                    self.push(store.globals[addr].value)?;
                }
                op::GLOBAL_SET => {
                    let idx = reader.read_u32().map_err(VmError::from)?;
                    let addr = store.global_addr(inst, idx)?;
                    store.globals[addr].value = self.pop()?;
                }

                op::TABLE_GET => {
                    let idx = reader.read_u32().map_err(VmError::from)?;
                    let addr = store.table_addr(inst, idx)?;
                    let i = self.pop_u32()?;
                    let v = store.tables[addr].get(u64::from(i)).map_err(VmError::from)?;
                    self.push_u64(v)?;
                }
                op::TABLE_SET => {
                    let idx = reader.read_u32().map_err(VmError::from)?;
                    let addr = store.table_addr(inst, idx)?;
                    let v = self.pop_u64()?;
                    let i = self.pop_u32()?;
                    store.tables[addr]
                        .set(u64::from(i), v)
                        .map_err(VmError::from)?;
                }

                op::I32_LOAD..=op::I64_STORE32 => {
                    let arg = reader.read_memarg().map_err(VmError::from)?;
                    let mem = store.mem_addr(inst, arg.memory)?;
                    self.exec_mem(store, mem, opcode, arg.offset)?;
                }

                op::MEMORY_SIZE => {
                    let idx = reader.read_u32().map_err(VmError::from)?;
                    let mem = store.mem_addr(inst, idx)?;
                    let pages = store.memory(mem)?.size_pages();
                    self.push_u32(pages as u32)?;
                }
                op::MEMORY_GROW => {
                    let idx = reader.read_u32().map_err(VmError::from)?;
                    let mem = store.mem_addr(inst, idx)?;
                    self.exec_memory_grow(store, mem)?;
                }

                op::I32_CONST => {
                    let v = reader.read_i32().map_err(VmError::from)?;
                    self.push_i32(v)?;
                }
                op::I64_CONST => {
                    let v = reader.read_i64().map_err(VmError::from)?;
                    self.push_i64(v)?;
                }
                op::F32_CONST => {
                    let bits = reader.read_f32().map_err(VmError::from)?;
                    self.push_u32(bits)?;
                }
                op::F64_CONST => {
                    let bits = reader.read_f64().map_err(VmError::from)?;
                    self.push_u64(bits)?;
                }

                op::REF_NULL => {
                    reader.read_heap_type().map_err(VmError::from)?;
                    self.push_u64(0)?;
                }
                op::REF_IS_NULL => {
                    let v = self.pop_u64()?;
                    self.push_u32(u32::from(v == 0))?;
                }
                op::REF_FUNC => {
                    let idx = reader.read_u32().map_err(VmError::from)?;
                    let addr = store.func_addr(inst, idx)?;
                    self.push_u64(addr as u64 + 1)?;
                }
                op::REF_EQ => {
                    let b = self.pop_u64()?;
                    let a = self.pop_u64()?;
                    self.push_u32(u32::from(a == b))?;
                }
                op::REF_AS_NON_NULL => {
                    let v = self.pop_u64()?;
                    if v == 0 {
                        return Err(VmError::Trap(TrapKind::NullReference));
                    }
                    self.push_u64(v)?;
                }
                op::BR_ON_NULL => {
                    let depth = reader.read_u32().map_err(VmError::from)?;
                    let v = self.pop_u64()?;
                    if v == 0 {
                        if self.branch(depth, frame_label_base, &mut reader)? {
                            break;
                        }
                    } else {
                        self.push_u64(v)?;
                    }
                }
                op::BR_ON_NON_NULL => {
                    let depth = reader.read_u32().map_err(VmError::from)?;
                    let v = self.pop_u64()?;
                    if v != 0 {
                        self.push_u64(v)?;
                        if self.branch(depth, frame_label_base, &mut reader)? {
                            break;
                        }
                    }
                }

                op::GC_PREFIX => {
                    if let Some(depth) = self.exec_gc(store, inst, &mut reader)? {
                        if self.branch(depth, frame_label_base, &mut reader)? {
                            break;
                        }
                    }
                }
                op::MISC_PREFIX => {
                    self.exec_misc_prefixed(store, inst, &mut reader)?;
                }
                op::SIMD_PREFIX => {
                    self.exec_simd(store, inst, &mut reader)?;
                }
                op::ATOMIC_PREFIX => {
                    self.exec_atomic(store, inst, &mut reader)?;
                }

                _ => {
                    if let Some(arity) = alu::scalar_arity(opcode) {
                        let b = if arity == 2 { self.pop_u64()? } else { 0 };
                        let a = self.pop_u64()?;
                        let v = alu::eval_scalar(opcode, a, b).map_err(VmError::from)?;
                        self.push_u64(v)?;
                    } else {
                        return Err(VmError::Trap(TrapKind::InvalidBytecode));
                    }
                }
            }
        }

        Ok(())
    }

    // --- control helpers ----------------------------------------------

    /// Operand base of a block taking `params` values.
    pub(super) fn block_base(&self, params: usize) -> ExecResult<usize> {
        self.sp().checked_sub(params).ok_or(VmError::StackUnderflow)
    }

    /// Block-type to `(param count, result count)`.
    fn block_arity(
        &self,
        store: &Store,
        inst: InstanceId,
        bt: BlockType,
    ) -> ExecResult<(usize, usize)> {
        Ok(match bt {
            BlockType::Empty => (0, 0),
            BlockType::Value(_) => (0, 1),
            BlockType::TypeIndex(idx) => {
                let ty = store.instance(inst)?.func_type(idx)?;
                (ty.params.len(), ty.results.len())
            }
        })
    }

    /// `(after_else, after_end)` of the construct opened at `at`, from the
    /// side table when present, by forward scan otherwise.
    fn targets_of(
        &self,
        ctx: &ExecCtx,
        at: usize,
        resume: usize,
    ) -> ExecResult<(Option<usize>, usize)> {
        if let Some(table) = &ctx.branch {
            if let Some(end) = table.end_of(at) {
                return Ok((table.else_of(at), end));
            }
        }
        scan_forward(&ctx.body, resume).map_err(VmError::from)
    }

    /// `br depth`. Returns true when the branch targets the function body
    /// (acts as return).
    fn branch(
        &mut self,
        depth: u32,
        frame_label_base: usize,
        reader: &mut BytecodeReader<'_>,
    ) -> ExecResult<bool> {
        let labels_in_frame = self.label_depth() - frame_label_base;
        if depth as usize >= labels_in_frame {
            return Ok(true);
        }
        let idx = self.label_depth() - 1 - depth as usize;
        let label = self.label(idx)?;
        let (arity, op_base, target) = (label.arity, label.op_base, label.target);

        self.shuffle_down(op_base, arity)?;
        self.truncate_labels(idx);
        match target {
            LabelTarget::BlockEnd(pos) => reader.set_pos(pos),
            LabelTarget::LoopStart(pos) => {
                self.push_label(Label {
                    arity,
                    op_base,
                    target,
                    catches: None,
                })?;
                reader.set_pos(pos);
            }
            _ => return Err(VmError::Trap(TrapKind::InvalidBytecode)),
        }
        Ok(false)
    }

    fn goto(&mut self, target: LabelTarget, reader: &mut BytecodeReader<'_>) -> ExecResult<()> {
        match target {
            LabelTarget::BlockEnd(pos) | LabelTarget::LoopStart(pos) => {
                reader.set_pos(pos);
                Ok(())
            }
            _ => Err(VmError::Trap(TrapKind::InvalidBytecode)),
        }
    }

    fn read_catch_clause(
        &self,
        store: &Store,
        inst: InstanceId,
        reader: &mut BytecodeReader<'_>,
    ) -> ExecResult<CatchClause> {
        let kind = reader.read_u8().map_err(VmError::from)?;
        let (kind, has_tag) = match kind {
            0x00 => (CatchKind::Catch, true),
            0x01 => (CatchKind::CatchRef, true),
            0x02 => (CatchKind::CatchAll, false),
            0x03 => (CatchKind::CatchAllRef, false),
            _ => return Err(VmError::Trap(TrapKind::InvalidBytecode)),
        };
        let tag = if has_tag {
            let idx = reader.read_u32().map_err(VmError::from)?;
            Some(store.tag_addr(inst, idx)?)
        } else {
            None
        };
        let depth = reader.read_u32().map_err(VmError::from)?;
        Ok(CatchClause { kind, tag, depth })
    }

    /// Dispatch a pending exception in this frame; branch on catch,
    /// propagate otherwise.
    fn handle_exception(
        &mut self,
        store: &mut Store,
        reader: &mut BytecodeReader<'_>,
    ) -> ExecResult<Control> {
        match self.dispatch_exception(store)? {
            Some(CatchOutcome::Target(target)) => {
                self.goto(target, reader)?;
                Ok(Control::Continue)
            }
            Some(CatchOutcome::Return) => Ok(Control::Return),
            None => Err(VmError::WasmException),
        }
    }

    // --- call helpers -------------------------------------------------

    /// Invoke a callee from this frame, routing an escaping exception
    /// through this frame's catch search.
    fn call_site(
        &mut self,
        store: &mut Store,
        addr: FuncAddr,
        reader: &mut BytecodeReader<'_>,
    ) -> ExecResult<Control> {
        match self.call_internal(store, addr, reader.pos()) {
            Ok(()) => Ok(Control::Continue),
            Err(VmError::WasmException) => self.handle_exception(store, reader),
            Err(other) => Err(other),
        }
    }

    /// `return_call*`: collect the arguments into the tail-call buffer and
    /// unwind; the trampoline re-enters. Wider-than-buffer calls degrade to
    /// a plain call followed by return, which differs only in frame growth.
    fn tail_call_site(
        &mut self,
        store: &mut Store,
        addr: FuncAddr,
        _reader: &mut BytecodeReader<'_>,
    ) -> ExecResult<Control> {
        self.begin_tail_call(store, addr)?;
        Ok(Control::Return)
    }

    /// Reader-free tail-call setup shared with the IR tier.
    pub(super) fn begin_tail_call(
        &mut self,
        store: &mut Store,
        addr: FuncAddr,
    ) -> ExecResult<()> {
        let params = store.func(addr)?.ty.params.len();
        if params > TAIL_CALL_SLOTS {
            // The current frame stays; exceptions skip it, as they would
            // after a true tail call.
            return self.call_internal(store, addr, 0);
        }
        let mut args = [0u128; TAIL_CALL_SLOTS];
        for i in (0..params).rev() {
            args[i] = self.pop()?;
        }
        self.set_tail_call(TailCall {
            func: addr,
            args,
            len: params,
        });
        Ok(())
    }

    /// Resolve a `call_indirect` callee, with the element-wise signature
    /// check against the declared type. Pops the table index operand.
    pub(super) fn resolve_indirect(
        &mut self,
        store: &Store,
        inst: InstanceId,
        type_idx: u32,
        table_idx: u32,
    ) -> ExecResult<FuncAddr> {
        let taddr = store.table_addr(inst, table_idx)?;
        let i = self.pop_u32()?;
        let entry = store.tables[taddr]
            .get(u64::from(i))
            .map_err(|_| VmError::UndefinedElement)?;
        if entry == 0 {
            return Err(VmError::UndefinedElement);
        }
        let addr = (entry - 1) as usize;
        let expected = store.instance(inst)?.func_type(type_idx)?;
        let actual = &store.func(addr)?.ty;
        if !actual.matches(expected) {
            return Err(VmError::MismatchedSignatures);
        }
        Ok(addr)
    }

    fn indirect_target(
        &mut self,
        store: &Store,
        inst: InstanceId,
        reader: &mut BytecodeReader<'_>,
    ) -> ExecResult<FuncAddr> {
        let type_idx = reader.read_u32().map_err(VmError::from)?;
        let table_idx = reader.read_u32().map_err(VmError::from)?;
        self.resolve_indirect(store, inst, type_idx, table_idx)
    }

    pub(super) fn funcref_target(&self, value: u64) -> ExecResult<FuncAddr> {
        if value == 0 {
            return Err(VmError::Trap(TrapKind::NullReference));
        }
        Ok((value - 1) as usize)
    }

    fn exec_select(&mut self) -> ExecResult<()> {
        let cond = self.pop_u32()?;
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(if cond != 0 { a } else { b })
    }

    // --- memory helpers (shared with the IR tier) -----------------------

    /// `memory.grow` with the limits and embedder-ceiling checks; pushes
    /// the old page count or -1.
    pub(super) fn exec_memory_grow(
        &mut self,
        store: &mut Store,
        mem: MemAddr,
    ) -> ExecResult<()> {
        let delta = u64::from(self.pop_u32()?);
        let room = self
            .memory_ceiling()
            .map(|c| c.saturating_sub(store.total_memory_bytes()));
        match store.memory_mut(mem)?.grow(delta, room) {
            Some(old) => self.push_u32(old as u32),
            None => self.push_i32(-1),
        }
    }

    /// Load/store dispatch for `0x28..=0x3E` against a resolved memory.
    pub(super) fn exec_mem(
        &mut self,
        store: &mut Store,
        mem: MemAddr,
        opcode: u8,
        offset: u64,
    ) -> ExecResult<()> {
        match opcode {
            op::I32_LOAD => {
                let addr = u64::from(self.pop_u32()?);
                let v = u32::from_le_bytes(store.memory(mem)?.read(addr, offset)?);
                self.push_u32(v)
            }
            op::I64_LOAD => {
                let addr = u64::from(self.pop_u32()?);
                let v = u64::from_le_bytes(store.memory(mem)?.read(addr, offset)?);
                self.push_u64(v)
            }
            op::F32_LOAD => {
                let addr = u64::from(self.pop_u32()?);
                let v = u32::from_le_bytes(store.memory(mem)?.read(addr, offset)?);
                self.push_u32(v)
            }
            op::F64_LOAD => {
                let addr = u64::from(self.pop_u32()?);
                let v = u64::from_le_bytes(store.memory(mem)?.read(addr, offset)?);
                self.push_u64(v)
            }
            op::I32_LOAD8_S => {
                let addr = u64::from(self.pop_u32()?);
                let [b] = store.memory(mem)?.read(addr, offset)?;
                self.push_i32(i32::from(b as i8))
            }
            op::I32_LOAD8_U => {
                let addr = u64::from(self.pop_u32()?);
                let [b] = store.memory(mem)?.read(addr, offset)?;
                self.push_u32(u32::from(b))
            }
            op::I32_LOAD16_S => {
                let addr = u64::from(self.pop_u32()?);
                let v = i16::from_le_bytes(store.memory(mem)?.read(addr, offset)?);
                self.push_i32(i32::from(v))
            }
            op::I32_LOAD16_U => {
                let addr = u64::from(self.pop_u32()?);
                let v = u16::from_le_bytes(store.memory(mem)?.read(addr, offset)?);
                self.push_u32(u32::from(v))
            }
            op::I64_LOAD8_S => {
                let addr = u64::from(self.pop_u32()?);
                let [b] = store.memory(mem)?.read(addr, offset)?;
                self.push_i64(i64::from(b as i8))
            }
            op::I64_LOAD8_U => {
                let addr = u64::from(self.pop_u32()?);
                let [b] = store.memory(mem)?.read(addr, offset)?;
                self.push_u64(u64::from(b))
            }
            op::I64_LOAD16_S => {
                let addr = u64::from(self.pop_u32()?);
                let v = i16::from_le_bytes(store.memory(mem)?.read(addr, offset)?);
                self.push_i64(i64::from(v))
            }
            op::I64_LOAD16_U => {
                let addr = u64::from(self.pop_u32()?);
                let v = u16::from_le_bytes(store.memory(mem)?.read(addr, offset)?);
                self.push_u64(u64::from(v))
            }
            op::I64_LOAD32_S => {
                let addr = u64::from(self.pop_u32()?);
                let v = i32::from_le_bytes(store.memory(mem)?.read(addr, offset)?);
                self.push_i64(i64::from(v))
            }
            op::I64_LOAD32_U => {
                let addr = u64::from(self.pop_u32()?);
                let v = u32::from_le_bytes(store.memory(mem)?.read(addr, offset)?);
                self.push_u64(u64::from(v))
            }
            op::I32_STORE | op::F32_STORE => {
                let v = self.pop_u32()?;
                let addr = u64::from(self.pop_u32()?);
                store
                    .memory_mut(mem)?
                    .write(addr, offset, v.to_le_bytes())
                    .map_err(VmError::from)
            }
            op::I64_STORE | op::F64_STORE => {
                let v = self.pop_u64()?;
                let addr = u64::from(self.pop_u32()?);
                store
                    .memory_mut(mem)?
                    .write(addr, offset, v.to_le_bytes())
                    .map_err(VmError::from)
            }
            op::I32_STORE8 => {
                let v = self.pop_u32()?;
                let addr = u64::from(self.pop_u32()?);
                store
                    .memory_mut(mem)?
                    .write(addr, offset, [v as u8])
                    .map_err(VmError::from)
            }
            op::I32_STORE16 => {
                let v = self.pop_u32()?;
                let addr = u64::from(self.pop_u32()?);
                store
                    .memory_mut(mem)?
                    .write(addr, offset, (v as u16).to_le_bytes())
                    .map_err(VmError::from)
            }
            op::I64_STORE8 => {
                let v = self.pop_u64()?;
                let addr = u64::from(self.pop_u32()?);
                store
                    .memory_mut(mem)?
                    .write(addr, offset, [v as u8])
                    .map_err(VmError::from)
            }
            op::I64_STORE16 => {
                let v = self.pop_u64()?;
                let addr = u64::from(self.pop_u32()?);
                store
                    .memory_mut(mem)?
                    .write(addr, offset, (v as u16).to_le_bytes())
                    .map_err(VmError::from)
            }
            op::I64_STORE32 => {
                let v = self.pop_u64()?;
                let addr = u64::from(self.pop_u32()?);
                store
                    .memory_mut(mem)?
                    .write(addr, offset, (v as u32).to_le_bytes())
                    .map_err(VmError::from)
            }
            _ => Err(VmError::Trap(TrapKind::InvalidBytecode)),
        }
    }
}
