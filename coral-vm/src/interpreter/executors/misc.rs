//! Misc-prefix (`0xFC`) dispatch: non-trapping truncation, bulk memory,
//! table ops, and wide 128-bit arithmetic.

use coral_asm::{op, BytecodeReader, MiscOp, TrapKind};

use crate::error::{ExecResult, VmError};
use crate::interpreter::alu;
use crate::interpreter::Vm;
use crate::profiler::prefixed_key;
use crate::store::{InstanceId, Store};

impl Vm {
    /// Bytecode-tier entry: read the sub-opcode and its immediates.
    pub(super) fn exec_misc_prefixed(
        &mut self,
        store: &mut Store,
        inst: InstanceId,
        reader: &mut BytecodeReader<'_>,
    ) -> ExecResult<()> {
        let raw = reader.read_u32().map_err(VmError::from)?;
        let sub = MiscOp::from_repr(raw).ok_or(VmError::Trap(TrapKind::InvalidBytecode))?;
        if let Some(profile) = self.profile_mut() {
            profile.record(prefixed_key(op::MISC_PREFIX, raw));
        }
        let (a, b) = match sub {
            MiscOp::MemoryInit
            | MiscOp::MemoryCopy
            | MiscOp::TableInit
            | MiscOp::TableCopy => (
                reader.read_u32().map_err(VmError::from)?,
                reader.read_u32().map_err(VmError::from)?,
            ),
            MiscOp::DataDrop
            | MiscOp::MemoryFill
            | MiscOp::ElemDrop
            | MiscOp::TableGrow
            | MiscOp::TableSize
            | MiscOp::TableFill => (reader.read_u32().map_err(VmError::from)?, 0),
            _ => (0, 0),
        };
        self.exec_misc(store, inst, sub, a, b)
    }

    /// Shared executor; `a`/`b` are the (up to two) index immediates. The
    /// IR tier passes its record operands here directly.
    pub(super) fn exec_misc(
        &mut self,
        store: &mut Store,
        inst: InstanceId,
        sub: MiscOp,
        a: u32,
        b: u32,
    ) -> ExecResult<()> {
        match sub {
            MiscOp::I32TruncSatF32S
            | MiscOp::I32TruncSatF32U
            | MiscOp::I32TruncSatF64S
            | MiscOp::I32TruncSatF64U
            | MiscOp::I64TruncSatF32S
            | MiscOp::I64TruncSatF32U
            | MiscOp::I64TruncSatF64S
            | MiscOp::I64TruncSatF64U => {
                let v = self.pop_u64()?;
                self.push_u64(alu::eval_trunc_sat(sub as u32, v))
            }

            MiscOp::MemoryInit => {
                // a = data index, b = memory index.
                let mem = store.mem_addr(inst, b)?;
                let seg = store
                    .instance(inst)?
                    .data
                    .get(a as usize)
                    .ok_or(VmError::DataIndexOutOfBounds(a as usize))?;
                let bytes = if seg.dropped {
                    std::sync::Arc::<[u8]>::from(Vec::new())
                } else {
                    seg.bytes.clone()
                };
                let n = u64::from(self.pop_u32()?);
                let src = u64::from(self.pop_u32()?);
                let dst = u64::from(self.pop_u32()?);
                store
                    .memory_mut(mem)?
                    .init(dst, &bytes, src, n)
                    .map_err(VmError::from)
            }

            MiscOp::DataDrop => {
                let seg = store
                    .instance_mut(inst)?
                    .data
                    .get_mut(a as usize)
                    .ok_or(VmError::DataIndexOutOfBounds(a as usize))?;
                seg.dropped = true;
                Ok(())
            }

            MiscOp::MemoryCopy => {
                // a = destination memory, b = source memory.
                let dst_mem = store.mem_addr(inst, a)?;
                let src_mem = store.mem_addr(inst, b)?;
                let n = u64::from(self.pop_u32()?);
                let src = u64::from(self.pop_u32()?);
                let dst = u64::from(self.pop_u32()?);
                if dst_mem == src_mem {
                    store
                        .memory_mut(dst_mem)?
                        .copy_within(dst, src, n)
                        .map_err(VmError::from)
                } else {
                    // Bounds on both sides before any byte moves.
                    let start = store.memory(src_mem)?.check_range(src, 0, n)?;
                    store.memory(dst_mem)?.check_range(dst, 0, n)?;
                    let bytes =
                        store.memory(src_mem)?.as_slice()[start..start + n as usize].to_vec();
                    store
                        .memory_mut(dst_mem)?
                        .init(dst, &bytes, 0, n)
                        .map_err(VmError::from)
                }
            }

            MiscOp::MemoryFill => {
                let mem = store.mem_addr(inst, a)?;
                let n = u64::from(self.pop_u32()?);
                let val = self.pop_u32()? as u8;
                let dst = u64::from(self.pop_u32()?);
                store
                    .memory_mut(mem)?
                    .fill(dst, val, n)
                    .map_err(VmError::from)
            }

            MiscOp::TableInit => {
                // a = element segment, b = table.
                let taddr = store.table_addr(inst, b)?;
                let seg = store
                    .instance(inst)?
                    .elems
                    .get(a as usize)
                    .ok_or(VmError::ElemIndexOutOfBounds(a as usize))?;
                let items = seg.contents().to_vec();
                let n = u64::from(self.pop_u32()?);
                let src = u64::from(self.pop_u32()?);
                let dst = u64::from(self.pop_u32()?);
                let src_end = src
                    .checked_add(n)
                    .ok_or(VmError::Trap(TrapKind::OutOfBoundsTableAccess))?;
                if src_end > items.len() as u64 {
                    return Err(VmError::Trap(TrapKind::OutOfBoundsTableAccess));
                }
                let table = &mut store.tables[taddr];
                let dst_end = dst
                    .checked_add(n)
                    .ok_or(VmError::Trap(TrapKind::OutOfBoundsTableAccess))?;
                if dst_end > table.size() {
                    return Err(VmError::Trap(TrapKind::OutOfBoundsTableAccess));
                }
                table.elems_mut()[dst as usize..dst_end as usize]
                    .copy_from_slice(&items[src as usize..src_end as usize]);
                Ok(())
            }

            MiscOp::ElemDrop => {
                let seg = store
                    .instance_mut(inst)?
                    .elems
                    .get_mut(a as usize)
                    .ok_or(VmError::ElemIndexOutOfBounds(a as usize))?;
                seg.dropped = true;
                Ok(())
            }

            MiscOp::TableCopy => {
                // a = destination table, b = source table.
                let dst_t = store.table_addr(inst, a)?;
                let src_t = store.table_addr(inst, b)?;
                let n = u64::from(self.pop_u32()?);
                let src = u64::from(self.pop_u32()?);
                let dst = u64::from(self.pop_u32()?);
                let src_end = src
                    .checked_add(n)
                    .ok_or(VmError::Trap(TrapKind::OutOfBoundsTableAccess))?;
                let dst_end = dst
                    .checked_add(n)
                    .ok_or(VmError::Trap(TrapKind::OutOfBoundsTableAccess))?;
                if src_end > store.tables[src_t].size() || dst_end > store.tables[dst_t].size()
                {
                    return Err(VmError::Trap(TrapKind::OutOfBoundsTableAccess));
                }
                if dst_t == src_t {
                    store.tables[dst_t]
                        .elems_mut()
                        .copy_within(src as usize..src_end as usize, dst as usize);
                } else {
                    let items =
                        store.tables[src_t].elems()[src as usize..src_end as usize].to_vec();
                    store.tables[dst_t].elems_mut()[dst as usize..dst_end as usize]
                        .copy_from_slice(&items);
                }
                Ok(())
            }

            MiscOp::TableGrow => {
                let taddr = store.table_addr(inst, a)?;
                let delta = u64::from(self.pop_u32()?);
                let init = self.pop_u64()?;
                match store.tables[taddr].grow(delta, init) {
                    Some(old) => self.push_u32(old as u32),
                    None => self.push_i32(-1),
                }
            }

            MiscOp::TableSize => {
                let taddr = store.table_addr(inst, a)?;
                let size = store.tables[taddr].size();
                self.push_u32(size as u32)
            }

            MiscOp::TableFill => {
                let taddr = store.table_addr(inst, a)?;
                let n = u64::from(self.pop_u32()?);
                let value = self.pop_u64()?;
                let dst = u64::from(self.pop_u32()?);
                store.tables[taddr]
                    .fill(dst, value, n)
                    .map_err(VmError::from)
            }

            MiscOp::I64Add128 => {
                let rhs_hi = self.pop_u64()? as u128;
                let rhs_lo = self.pop_u64()? as u128;
                let lhs_hi = self.pop_u64()? as u128;
                let lhs_lo = self.pop_u64()? as u128;
                let sum = ((lhs_hi << 64) | lhs_lo).wrapping_add((rhs_hi << 64) | rhs_lo);
                self.push_u64(sum as u64)?;
                self.push_u64((sum >> 64) as u64)
            }

            MiscOp::I64Sub128 => {
                let rhs_hi = self.pop_u64()? as u128;
                let rhs_lo = self.pop_u64()? as u128;
                let lhs_hi = self.pop_u64()? as u128;
                let lhs_lo = self.pop_u64()? as u128;
                let diff = ((lhs_hi << 64) | lhs_lo).wrapping_sub((rhs_hi << 64) | rhs_lo);
                self.push_u64(diff as u64)?;
                self.push_u64((diff >> 64) as u64)
            }

            MiscOp::I64MulWideS => {
                let b = self.pop_u64()? as i64;
                let a = self.pop_u64()? as i64;
                let p = i128::from(a) * i128::from(b);
                self.push_u64(p as u64)?;
                self.push_u64((p as u128 >> 64) as u64)
            }

            MiscOp::I64MulWideU => {
                let b = self.pop_u64()?;
                let a = self.pop_u64()?;
                let p = u128::from(a) * u128::from(b);
                self.push_u64(p as u64)?;
                self.push_u64((p >> 64) as u64)
            }

            #[allow(unreachable_patterns)]
            _ => Err(VmError::Trap(TrapKind::InvalidBytecode)),
        }
    }
}
