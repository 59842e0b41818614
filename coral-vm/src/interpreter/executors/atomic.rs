//! Atomic-prefix (`0xFE`) dispatch.
//!
//! Single-threaded semantics: RMW ops execute as plain read-modify-writes,
//! `atomic.fence` is a no-op, `wait` on non-shared memory traps, and on
//! shared memory returns "not-equal" or "timed-out" since no other agent
//! can wake this one. Every access validates natural alignment.

use coral_asm::{op, AtomicOp, BytecodeReader, TrapKind};

use crate::error::{ExecResult, VmError};
use crate::interpreter::Vm;
use crate::profiler::prefixed_key;
use crate::store::{InstanceId, MemAddr, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RmwKind {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Xchg,
    Cmpxchg,
}

/// Atomic wait outcomes per the threads spec.
const WAIT_NOT_EQUAL: u32 = 1;
const WAIT_TIMED_OUT: u32 = 2;

impl Vm {
    pub(super) fn exec_atomic(
        &mut self,
        store: &mut Store,
        inst: InstanceId,
        reader: &mut BytecodeReader<'_>,
    ) -> ExecResult<()> {
        let raw = reader.read_u32().map_err(VmError::from)?;
        let sub = AtomicOp::from_repr(raw).ok_or(VmError::Trap(TrapKind::InvalidBytecode))?;
        if let Some(profile) = self.profile_mut() {
            profile.record(prefixed_key(op::ATOMIC_PREFIX, raw));
        }

        if sub == AtomicOp::AtomicFence {
            reader.read_u8().map_err(VmError::from)?;
            return Ok(());
        }

        let arg = reader.read_memarg().map_err(VmError::from)?;
        let mem = store.mem_addr(inst, arg.memory)?;

        match sub {
            AtomicOp::MemoryAtomicNotify => {
                let _count = self.pop_u32()?;
                let addr = u64::from(self.pop_u32()?);
                let m = store.memory(mem)?;
                m.check_atomic_align(addr, arg.offset, 4)?;
                m.check_range(addr, arg.offset, 4)?;
                // No other agent can be waiting.
                self.push_u32(0)
            }
            AtomicOp::MemoryAtomicWait32 | AtomicOp::MemoryAtomicWait64 => {
                let width = if sub == AtomicOp::MemoryAtomicWait32 { 4 } else { 8 };
                let _timeout = self.pop_i64()?;
                let expected = if width == 4 {
                    u64::from(self.pop_u32()?)
                } else {
                    self.pop_u64()?
                };
                let addr = u64::from(self.pop_u32()?);
                let m = store.memory(mem)?;
                m.check_atomic_align(addr, arg.offset, width)?;
                if !m.is_shared() {
                    return Err(VmError::Trap(TrapKind::ExpectedSharedMemory));
                }
                let current = if width == 4 {
                    u64::from(u32::from_le_bytes(m.read(addr, arg.offset)?))
                } else {
                    u64::from_le_bytes(m.read(addr, arg.offset)?)
                };
                if current != expected {
                    self.push_u32(WAIT_NOT_EQUAL)
                } else {
                    self.push_u32(WAIT_TIMED_OUT)
                }
            }

            AtomicOp::I32AtomicLoad => self.atomic_load(store, mem, arg.offset, 4, false),
            AtomicOp::I64AtomicLoad => self.atomic_load(store, mem, arg.offset, 8, true),
            AtomicOp::I32AtomicLoad8U => self.atomic_load(store, mem, arg.offset, 1, false),
            AtomicOp::I32AtomicLoad16U => self.atomic_load(store, mem, arg.offset, 2, false),
            AtomicOp::I64AtomicLoad8U => self.atomic_load(store, mem, arg.offset, 1, true),
            AtomicOp::I64AtomicLoad16U => self.atomic_load(store, mem, arg.offset, 2, true),
            AtomicOp::I64AtomicLoad32U => self.atomic_load(store, mem, arg.offset, 4, true),

            AtomicOp::I32AtomicStore => self.atomic_store(store, mem, arg.offset, 4),
            AtomicOp::I64AtomicStore => self.atomic_store(store, mem, arg.offset, 8),
            AtomicOp::I32AtomicStore8 | AtomicOp::I64AtomicStore8 => {
                self.atomic_store(store, mem, arg.offset, 1)
            }
            AtomicOp::I32AtomicStore16 | AtomicOp::I64AtomicStore16 => {
                self.atomic_store(store, mem, arg.offset, 2)
            }
            AtomicOp::I64AtomicStore32 => self.atomic_store(store, mem, arg.offset, 4),

            _ => {
                let (kind, width, is64) = rmw_shape(sub)?;
                self.atomic_rmw(store, mem, arg.offset, kind, width, is64)
            }
        }
    }

    fn atomic_load(
        &mut self,
        store: &Store,
        mem: MemAddr,
        offset: u64,
        width: u64,
        is64: bool,
    ) -> ExecResult<()> {
        let addr = u64::from(self.pop_u32()?);
        let m = store.memory(mem)?;
        m.check_atomic_align(addr, offset, width)?;
        let v = read_width(m, addr, offset, width)?;
        if is64 {
            self.push_u64(v)
        } else {
            self.push_u32(v as u32)
        }
    }

    fn atomic_store(
        &mut self,
        store: &mut Store,
        mem: MemAddr,
        offset: u64,
        width: u64,
    ) -> ExecResult<()> {
        let v = self.pop_u64()?;
        let addr = u64::from(self.pop_u32()?);
        let m = store.memory_mut(mem)?;
        m.check_atomic_align(addr, offset, width)?;
        write_width(m, addr, offset, width, v)
    }

    fn atomic_rmw(
        &mut self,
        store: &mut Store,
        mem: MemAddr,
        offset: u64,
        kind: RmwKind,
        width: u64,
        is64: bool,
    ) -> ExecResult<()> {
        let (replacement, operand) = if kind == RmwKind::Cmpxchg {
            let replacement = self.pop_u64()?;
            let expected = self.pop_u64()?;
            (replacement, expected)
        } else {
            (0, self.pop_u64()?)
        };
        let addr = u64::from(self.pop_u32()?);

        let m = store.memory_mut(mem)?;
        m.check_atomic_align(addr, offset, width)?;
        let old = read_width(m, addr, offset, width)?;
        let new = match kind {
            RmwKind::Add => old.wrapping_add(operand),
            RmwKind::Sub => old.wrapping_sub(operand),
            RmwKind::And => old & operand,
            RmwKind::Or => old | operand,
            RmwKind::Xor => old ^ operand,
            RmwKind::Xchg => operand,
            RmwKind::Cmpxchg => {
                if old == trunc_width(operand, width) {
                    replacement
                } else {
                    old
                }
            }
        };
        write_width(m, addr, offset, width, new)?;

        if is64 {
            self.push_u64(old)
        } else {
            self.push_u32(old as u32)
        }
    }
}

fn rmw_shape(sub: AtomicOp) -> ExecResult<(RmwKind, u64, bool)> {
    use AtomicOp::*;
    Ok(match sub {
        I32AtomicRmwAdd => (RmwKind::Add, 4, false),
        I64AtomicRmwAdd => (RmwKind::Add, 8, true),
        I32AtomicRmw8AddU => (RmwKind::Add, 1, false),
        I32AtomicRmw16AddU => (RmwKind::Add, 2, false),
        I64AtomicRmw8AddU => (RmwKind::Add, 1, true),
        I64AtomicRmw16AddU => (RmwKind::Add, 2, true),
        I64AtomicRmw32AddU => (RmwKind::Add, 4, true),
        I32AtomicRmwSub => (RmwKind::Sub, 4, false),
        I64AtomicRmwSub => (RmwKind::Sub, 8, true),
        I32AtomicRmw8SubU => (RmwKind::Sub, 1, false),
        I32AtomicRmw16SubU => (RmwKind::Sub, 2, false),
        I64AtomicRmw8SubU => (RmwKind::Sub, 1, true),
        I64AtomicRmw16SubU => (RmwKind::Sub, 2, true),
        I64AtomicRmw32SubU => (RmwKind::Sub, 4, true),
        I32AtomicRmwAnd => (RmwKind::And, 4, false),
        I64AtomicRmwAnd => (RmwKind::And, 8, true),
        I32AtomicRmw8AndU => (RmwKind::And, 1, false),
        I32AtomicRmw16AndU => (RmwKind::And, 2, false),
        I64AtomicRmw8AndU => (RmwKind::And, 1, true),
        I64AtomicRmw16AndU => (RmwKind::And, 2, true),
        I64AtomicRmw32AndU => (RmwKind::And, 4, true),
        I32AtomicRmwOr => (RmwKind::Or, 4, false),
        I64AtomicRmwOr => (RmwKind::Or, 8, true),
        I32AtomicRmw8OrU => (RmwKind::Or, 1, false),
        I32AtomicRmw16OrU => (RmwKind::Or, 2, false),
        I64AtomicRmw8OrU => (RmwKind::Or, 1, true),
        I64AtomicRmw16OrU => (RmwKind::Or, 2, true),
        I64AtomicRmw32OrU => (RmwKind::Or, 4, true),
        I32AtomicRmwXor => (RmwKind::Xor, 4, false),
        I64AtomicRmwXor => (RmwKind::Xor, 8, true),
        I32AtomicRmw8XorU => (RmwKind::Xor, 1, false),
        I32AtomicRmw16XorU => (RmwKind::Xor, 2, false),
        I64AtomicRmw8XorU => (RmwKind::Xor, 1, true),
        I64AtomicRmw16XorU => (RmwKind::Xor, 2, true),
        I64AtomicRmw32XorU => (RmwKind::Xor, 4, true),
        I32AtomicRmwXchg => (RmwKind::Xchg, 4, false),
        I64AtomicRmwXchg => (RmwKind::Xchg, 8, true),
        I32AtomicRmw8XchgU => (RmwKind::Xchg, 1, false),
        I32AtomicRmw16XchgU => (RmwKind::Xchg, 2, false),
        I64AtomicRmw8XchgU => (RmwKind::Xchg, 1, true),
        I64AtomicRmw16XchgU => (RmwKind::Xchg, 2, true),
        I64AtomicRmw32XchgU => (RmwKind::Xchg, 4, true),
        I32AtomicRmwCmpxchg => (RmwKind::Cmpxchg, 4, false),
        I64AtomicRmwCmpxchg => (RmwKind::Cmpxchg, 8, true),
        I32AtomicRmw8CmpxchgU => (RmwKind::Cmpxchg, 1, false),
        I32AtomicRmw16CmpxchgU => (RmwKind::Cmpxchg, 2, false),
        I64AtomicRmw8CmpxchgU => (RmwKind::Cmpxchg, 1, true),
        I64AtomicRmw16CmpxchgU => (RmwKind::Cmpxchg, 2, true),
        I64AtomicRmw32CmpxchgU => (RmwKind::Cmpxchg, 4, true),
        _ => return Err(VmError::Trap(TrapKind::InvalidBytecode)),
    })
}

fn trunc_width(v: u64, width: u64) -> u64 {
    if width == 8 {
        v
    } else {
        v & ((1u64 << (8 * width)) - 1)
    }
}

fn read_width(
    m: &crate::memory::MemoryInstance,
    addr: u64,
    offset: u64,
    width: u64,
) -> ExecResult<u64> {
    Ok(match width {
        1 => {
            let [b] = m.read(addr, offset)?;
            u64::from(b)
        }
        2 => u64::from(u16::from_le_bytes(m.read(addr, offset)?)),
        4 => u64::from(u32::from_le_bytes(m.read(addr, offset)?)),
        _ => u64::from_le_bytes(m.read(addr, offset)?),
    })
}

fn write_width(
    m: &mut crate::memory::MemoryInstance,
    addr: u64,
    offset: u64,
    width: u64,
    v: u64,
) -> ExecResult<()> {
    match width {
        1 => m.write(addr, offset, [v as u8])?,
        2 => m.write(addr, offset, (v as u16).to_le_bytes())?,
        4 => m.write(addr, offset, (v as u32).to_le_bytes())?,
        _ => m.write(addr, offset, v.to_le_bytes())?,
    }
    Ok(())
}
