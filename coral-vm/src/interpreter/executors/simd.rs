//! SIMD-prefix (`0xFD`) dispatch: fixed-width 128-bit lane operations,
//! including the relaxed extension pinned to the deterministic semantics of
//! the corresponding non-relaxed ops.

use coral_asm::{op, BytecodeReader, SimdOp, TrapKind};
use coral_types::V128;

use crate::error::{ExecResult, VmError};
use crate::interpreter::alu::{fmax32, fmax64, fmin32, fmin64};
use crate::interpreter::Vm;
use crate::profiler::prefixed_key;
use crate::store::{InstanceId, Store};

/// Lane-wise binary op over a typed view.
macro_rules! binop {
    ($vm:ident, $to:ident, $from:ident, |$a:ident, $b:ident| $expr:expr) => {{
        let rb = $vm.pop_v128()?.$to();
        let ra = $vm.pop_v128()?.$to();
        let mut out = ra;
        for i in 0..out.len() {
            let ($a, $b) = (ra[i], rb[i]);
            out[i] = $expr;
        }
        $vm.push_v128(V128::$from(out))
    }};
}

/// Lane-wise unary op over a typed view.
macro_rules! unop {
    ($vm:ident, $to:ident, $from:ident, |$a:ident| $expr:expr) => {{
        let ra = $vm.pop_v128()?.$to();
        let mut out = ra;
        for i in 0..out.len() {
            let $a = ra[i];
            out[i] = $expr;
        }
        $vm.push_v128(V128::$from(out))
    }};
}

/// Lane-wise comparison producing an all-ones/all-zeroes mask in the
/// unsigned view of the same width.
macro_rules! cmp {
    ($vm:ident, $to:ident, $from_mask:ident, $mask_ty:ty, |$a:ident, $b:ident| $expr:expr) => {{
        let rb = $vm.pop_v128()?.$to();
        let ra = $vm.pop_v128()?.$to();
        let mut out = [0 as $mask_ty; 16 / core::mem::size_of::<$mask_ty>()];
        for i in 0..out.len() {
            let ($a, $b) = (ra[i], rb[i]);
            out[i] = if $expr { !0 } else { 0 };
        }
        $vm.push_v128(V128::$from_mask(out))
    }};
}

/// Lane-wise shift; the scalar shift count is masked by the lane width.
macro_rules! shift {
    ($vm:ident, $to:ident, $from:ident, $bits:expr, |$a:ident, $s:ident| $expr:expr) => {{
        let $s = $vm.pop_u32()? % $bits;
        let ra = $vm.pop_v128()?.$to();
        let mut out = ra;
        for i in 0..out.len() {
            let $a = ra[i];
            out[i] = $expr;
        }
        $vm.push_v128(V128::$from(out))
    }};
}

impl Vm {
    pub(super) fn exec_simd(
        &mut self,
        store: &mut Store,
        inst: InstanceId,
        reader: &mut BytecodeReader<'_>,
    ) -> ExecResult<()> {
        let raw = reader.read_u32().map_err(VmError::from)?;
        let sub = SimdOp::from_repr(raw).ok_or(VmError::Trap(TrapKind::InvalidBytecode))?;
        if let Some(profile) = self.profile_mut() {
            profile.record(prefixed_key(op::SIMD_PREFIX, raw));
        }

        match sub {
            // --- loads and stores -------------------------------------
            SimdOp::V128Load => {
                let arg = reader.read_memarg().map_err(VmError::from)?;
                let mem = store.mem_addr(inst, arg.memory)?;
                let addr = u64::from(self.pop_u32()?);
                let bytes: [u8; 16] = store.memory(mem)?.read(addr, arg.offset)?;
                self.push_v128(V128::from_le_bytes(bytes))
            }
            SimdOp::V128Store => {
                let arg = reader.read_memarg().map_err(VmError::from)?;
                let mem = store.mem_addr(inst, arg.memory)?;
                let v = self.pop_v128()?;
                let addr = u64::from(self.pop_u32()?);
                store
                    .memory_mut(mem)?
                    .write(addr, arg.offset, v.to_le_bytes())
                    .map_err(VmError::from)
            }
            SimdOp::V128Load8x8S | SimdOp::V128Load8x8U => {
                let arg = reader.read_memarg().map_err(VmError::from)?;
                let mem = store.mem_addr(inst, arg.memory)?;
                let addr = u64::from(self.pop_u32()?);
                let bytes: [u8; 8] = store.memory(mem)?.read(addr, arg.offset)?;
                let mut out = [0u16; 8];
                for i in 0..8 {
                    out[i] = if sub == SimdOp::V128Load8x8S {
                        (i16::from(bytes[i] as i8)) as u16
                    } else {
                        u16::from(bytes[i])
                    };
                }
                self.push_v128(V128::from_u16x8(out))
            }
            SimdOp::V128Load16x4S | SimdOp::V128Load16x4U => {
                let arg = reader.read_memarg().map_err(VmError::from)?;
                let mem = store.mem_addr(inst, arg.memory)?;
                let addr = u64::from(self.pop_u32()?);
                let bytes: [u8; 8] = store.memory(mem)?.read(addr, arg.offset)?;
                let mut out = [0u32; 4];
                for i in 0..4 {
                    let lane = u16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]);
                    out[i] = if sub == SimdOp::V128Load16x4S {
                        (i32::from(lane as i16)) as u32
                    } else {
                        u32::from(lane)
                    };
                }
                self.push_v128(V128::from_u32x4(out))
            }
            SimdOp::V128Load32x2S | SimdOp::V128Load32x2U => {
                let arg = reader.read_memarg().map_err(VmError::from)?;
                let mem = store.mem_addr(inst, arg.memory)?;
                let addr = u64::from(self.pop_u32()?);
                let bytes: [u8; 8] = store.memory(mem)?.read(addr, arg.offset)?;
                let mut out = [0u64; 2];
                for i in 0..2 {
                    let lane = u32::from_le_bytes([
                        bytes[4 * i],
                        bytes[4 * i + 1],
                        bytes[4 * i + 2],
                        bytes[4 * i + 3],
                    ]);
                    out[i] = if sub == SimdOp::V128Load32x2S {
                        (i64::from(lane as i32)) as u64
                    } else {
                        u64::from(lane)
                    };
                }
                self.push_v128(V128::from_u64x2(out))
            }
            SimdOp::V128Load8Splat => {
                let arg = reader.read_memarg().map_err(VmError::from)?;
                let mem = store.mem_addr(inst, arg.memory)?;
                let addr = u64::from(self.pop_u32()?);
                let [b]: [u8; 1] = store.memory(mem)?.read(addr, arg.offset)?;
                self.push_v128(V128::from_u8x16([b; 16]))
            }
            SimdOp::V128Load16Splat => {
                let arg = reader.read_memarg().map_err(VmError::from)?;
                let mem = store.mem_addr(inst, arg.memory)?;
                let addr = u64::from(self.pop_u32()?);
                let v = u16::from_le_bytes(store.memory(mem)?.read(addr, arg.offset)?);
                self.push_v128(V128::from_u16x8([v; 8]))
            }
            SimdOp::V128Load32Splat => {
                let arg = reader.read_memarg().map_err(VmError::from)?;
                let mem = store.mem_addr(inst, arg.memory)?;
                let addr = u64::from(self.pop_u32()?);
                let v = u32::from_le_bytes(store.memory(mem)?.read(addr, arg.offset)?);
                self.push_v128(V128::from_u32x4([v; 4]))
            }
            SimdOp::V128Load64Splat => {
                let arg = reader.read_memarg().map_err(VmError::from)?;
                let mem = store.mem_addr(inst, arg.memory)?;
                let addr = u64::from(self.pop_u32()?);
                let v = u64::from_le_bytes(store.memory(mem)?.read(addr, arg.offset)?);
                self.push_v128(V128::from_u64x2([v; 2]))
            }
            SimdOp::V128Load32Zero => {
                let arg = reader.read_memarg().map_err(VmError::from)?;
                let mem = store.mem_addr(inst, arg.memory)?;
                let addr = u64::from(self.pop_u32()?);
                let v = u32::from_le_bytes(store.memory(mem)?.read(addr, arg.offset)?);
                self.push_v128(V128::from_u32x4([v, 0, 0, 0]))
            }
            SimdOp::V128Load64Zero => {
                let arg = reader.read_memarg().map_err(VmError::from)?;
                let mem = store.mem_addr(inst, arg.memory)?;
                let addr = u64::from(self.pop_u32()?);
                let v = u64::from_le_bytes(store.memory(mem)?.read(addr, arg.offset)?);
                self.push_v128(V128::from_u64x2([v, 0]))
            }
            SimdOp::V128Load8Lane
            | SimdOp::V128Load16Lane
            | SimdOp::V128Load32Lane
            | SimdOp::V128Load64Lane => {
                let arg = reader.read_memarg().map_err(VmError::from)?;
                let lane = reader.read_u8().map_err(VmError::from)? as usize;
                let mem = store.mem_addr(inst, arg.memory)?;
                let v = self.pop_v128()?;
                let addr = u64::from(self.pop_u32()?);
                let out = match sub {
                    SimdOp::V128Load8Lane => {
                        let [b]: [u8; 1] = store.memory(mem)?.read(addr, arg.offset)?;
                        let mut lanes = v.to_u8x16();
                        lanes[lane] = b;
                        V128::from_u8x16(lanes)
                    }
                    SimdOp::V128Load16Lane => {
                        let b = u16::from_le_bytes(store.memory(mem)?.read(addr, arg.offset)?);
                        let mut lanes = v.to_u16x8();
                        lanes[lane] = b;
                        V128::from_u16x8(lanes)
                    }
                    SimdOp::V128Load32Lane => {
                        let b = u32::from_le_bytes(store.memory(mem)?.read(addr, arg.offset)?);
                        let mut lanes = v.to_u32x4();
                        lanes[lane] = b;
                        V128::from_u32x4(lanes)
                    }
                    _ => {
                        let b = u64::from_le_bytes(store.memory(mem)?.read(addr, arg.offset)?);
                        let mut lanes = v.to_u64x2();
                        lanes[lane] = b;
                        V128::from_u64x2(lanes)
                    }
                };
                self.push_v128(out)
            }
            SimdOp::V128Store8Lane
            | SimdOp::V128Store16Lane
            | SimdOp::V128Store32Lane
            | SimdOp::V128Store64Lane => {
                let arg = reader.read_memarg().map_err(VmError::from)?;
                let lane = reader.read_u8().map_err(VmError::from)? as usize;
                let mem = store.mem_addr(inst, arg.memory)?;
                let v = self.pop_v128()?;
                let addr = u64::from(self.pop_u32()?);
                let m = store.memory_mut(mem)?;
                match sub {
                    SimdOp::V128Store8Lane => m.write(addr, arg.offset, [v.to_u8x16()[lane]])?,
                    SimdOp::V128Store16Lane => {
                        m.write(addr, arg.offset, v.to_u16x8()[lane].to_le_bytes())?
                    }
                    SimdOp::V128Store32Lane => {
                        m.write(addr, arg.offset, v.to_u32x4()[lane].to_le_bytes())?
                    }
                    _ => m.write(addr, arg.offset, v.to_u64x2()[lane].to_le_bytes())?,
                }
                Ok(())
            }

            // --- constants, shuffles, splats, lanes -------------------
            SimdOp::V128Const => {
                let bytes = reader.read_bytes::<16>().map_err(VmError::from)?;
                self.push_v128(V128::from_le_bytes(bytes))
            }
            SimdOp::I8x16Shuffle => {
                let mask = reader.read_bytes::<16>().map_err(VmError::from)?;
                let b = self.pop_v128()?.to_u8x16();
                let a = self.pop_v128()?.to_u8x16();
                let mut out = [0u8; 16];
                for i in 0..16 {
                    let sel = mask[i] as usize;
                    out[i] = if sel < 16 { a[sel] } else { b[sel - 16] };
                }
                self.push_v128(V128::from_u8x16(out))
            }
            SimdOp::I8x16Swizzle | SimdOp::I8x16RelaxedSwizzle => {
                let idx = self.pop_v128()?.to_u8x16();
                let a = self.pop_v128()?.to_u8x16();
                let mut out = [0u8; 16];
                for i in 0..16 {
                    out[i] = if (idx[i] as usize) < 16 { a[idx[i] as usize] } else { 0 };
                }
                self.push_v128(V128::from_u8x16(out))
            }
            SimdOp::I8x16Splat => {
                let v = self.pop_u32()? as u8;
                self.push_v128(V128::from_u8x16([v; 16]))
            }
            SimdOp::I16x8Splat => {
                let v = self.pop_u32()? as u16;
                self.push_v128(V128::from_u16x8([v; 8]))
            }
            SimdOp::I32x4Splat => {
                let v = self.pop_u32()?;
                self.push_v128(V128::from_u32x4([v; 4]))
            }
            SimdOp::I64x2Splat => {
                let v = self.pop_u64()?;
                self.push_v128(V128::from_u64x2([v; 2]))
            }
            SimdOp::F32x4Splat => {
                let v = self.pop_u32()?;
                self.push_v128(V128::from_u32x4([v; 4]))
            }
            SimdOp::F64x2Splat => {
                let v = self.pop_u64()?;
                self.push_v128(V128::from_u64x2([v; 2]))
            }
            SimdOp::I8x16ExtractLaneS => {
                let lane = reader.read_u8().map_err(VmError::from)? as usize;
                let v = self.pop_v128()?.to_i8x16();
                self.push_i32(i32::from(v[lane]))
            }
            SimdOp::I8x16ExtractLaneU => {
                let lane = reader.read_u8().map_err(VmError::from)? as usize;
                let v = self.pop_v128()?.to_u8x16();
                self.push_u32(u32::from(v[lane]))
            }
            SimdOp::I8x16ReplaceLane => {
                let lane = reader.read_u8().map_err(VmError::from)? as usize;
                let x = self.pop_u32()? as u8;
                let mut v = self.pop_v128()?.to_u8x16();
                v[lane] = x;
                self.push_v128(V128::from_u8x16(v))
            }
            SimdOp::I16x8ExtractLaneS => {
                let lane = reader.read_u8().map_err(VmError::from)? as usize;
                let v = self.pop_v128()?.to_i16x8();
                self.push_i32(i32::from(v[lane]))
            }
            SimdOp::I16x8ExtractLaneU => {
                let lane = reader.read_u8().map_err(VmError::from)? as usize;
                let v = self.pop_v128()?.to_u16x8();
                self.push_u32(u32::from(v[lane]))
            }
            SimdOp::I16x8ReplaceLane => {
                let lane = reader.read_u8().map_err(VmError::from)? as usize;
                let x = self.pop_u32()? as u16;
                let mut v = self.pop_v128()?.to_u16x8();
                v[lane] = x;
                self.push_v128(V128::from_u16x8(v))
            }
            SimdOp::I32x4ExtractLane => {
                let lane = reader.read_u8().map_err(VmError::from)? as usize;
                let v = self.pop_v128()?.to_u32x4();
                self.push_u32(v[lane])
            }
            SimdOp::I32x4ReplaceLane => {
                let lane = reader.read_u8().map_err(VmError::from)? as usize;
                let x = self.pop_u32()?;
                let mut v = self.pop_v128()?.to_u32x4();
                v[lane] = x;
                self.push_v128(V128::from_u32x4(v))
            }
            SimdOp::I64x2ExtractLane => {
                let lane = reader.read_u8().map_err(VmError::from)? as usize;
                let v = self.pop_v128()?.to_u64x2();
                self.push_u64(v[lane])
            }
            SimdOp::I64x2ReplaceLane => {
                let lane = reader.read_u8().map_err(VmError::from)? as usize;
                let x = self.pop_u64()?;
                let mut v = self.pop_v128()?.to_u64x2();
                v[lane] = x;
                self.push_v128(V128::from_u64x2(v))
            }
            SimdOp::F32x4ExtractLane => {
                let lane = reader.read_u8().map_err(VmError::from)? as usize;
                let v = self.pop_v128()?.to_u32x4();
                self.push_u32(v[lane])
            }
            SimdOp::F32x4ReplaceLane => {
                let lane = reader.read_u8().map_err(VmError::from)? as usize;
                let x = self.pop_u32()?;
                let mut v = self.pop_v128()?.to_u32x4();
                v[lane] = x;
                self.push_v128(V128::from_u32x4(v))
            }
            SimdOp::F64x2ExtractLane => {
                let lane = reader.read_u8().map_err(VmError::from)? as usize;
                let v = self.pop_v128()?.to_u64x2();
                self.push_u64(v[lane])
            }
            SimdOp::F64x2ReplaceLane => {
                let lane = reader.read_u8().map_err(VmError::from)? as usize;
                let x = self.pop_u64()?;
                let mut v = self.pop_v128()?.to_u64x2();
                v[lane] = x;
                self.push_v128(V128::from_u64x2(v))
            }

            // --- comparisons ------------------------------------------
            SimdOp::I8x16Eq => cmp!(self, to_u8x16, from_u8x16, u8, |a, b| a == b),
            SimdOp::I8x16Ne => cmp!(self, to_u8x16, from_u8x16, u8, |a, b| a != b),
            SimdOp::I8x16LtS => cmp!(self, to_i8x16, from_u8x16, u8, |a, b| a < b),
            SimdOp::I8x16LtU => cmp!(self, to_u8x16, from_u8x16, u8, |a, b| a < b),
            SimdOp::I8x16GtS => cmp!(self, to_i8x16, from_u8x16, u8, |a, b| a > b),
            SimdOp::I8x16GtU => cmp!(self, to_u8x16, from_u8x16, u8, |a, b| a > b),
            SimdOp::I8x16LeS => cmp!(self, to_i8x16, from_u8x16, u8, |a, b| a <= b),
            SimdOp::I8x16LeU => cmp!(self, to_u8x16, from_u8x16, u8, |a, b| a <= b),
            SimdOp::I8x16GeS => cmp!(self, to_i8x16, from_u8x16, u8, |a, b| a >= b),
            SimdOp::I8x16GeU => cmp!(self, to_u8x16, from_u8x16, u8, |a, b| a >= b),
            SimdOp::I16x8Eq => cmp!(self, to_u16x8, from_u16x8, u16, |a, b| a == b),
            SimdOp::I16x8Ne => cmp!(self, to_u16x8, from_u16x8, u16, |a, b| a != b),
            SimdOp::I16x8LtS => cmp!(self, to_i16x8, from_u16x8, u16, |a, b| a < b),
            SimdOp::I16x8LtU => cmp!(self, to_u16x8, from_u16x8, u16, |a, b| a < b),
            SimdOp::I16x8GtS => cmp!(self, to_i16x8, from_u16x8, u16, |a, b| a > b),
            SimdOp::I16x8GtU => cmp!(self, to_u16x8, from_u16x8, u16, |a, b| a > b),
            SimdOp::I16x8LeS => cmp!(self, to_i16x8, from_u16x8, u16, |a, b| a <= b),
            SimdOp::I16x8LeU => cmp!(self, to_u16x8, from_u16x8, u16, |a, b| a <= b),
            SimdOp::I16x8GeS => cmp!(self, to_i16x8, from_u16x8, u16, |a, b| a >= b),
            SimdOp::I16x8GeU => cmp!(self, to_u16x8, from_u16x8, u16, |a, b| a >= b),
            SimdOp::I32x4Eq => cmp!(self, to_u32x4, from_u32x4, u32, |a, b| a == b),
            SimdOp::I32x4Ne => cmp!(self, to_u32x4, from_u32x4, u32, |a, b| a != b),
            SimdOp::I32x4LtS => cmp!(self, to_i32x4, from_u32x4, u32, |a, b| a < b),
            SimdOp::I32x4LtU => cmp!(self, to_u32x4, from_u32x4, u32, |a, b| a < b),
            SimdOp::I32x4GtS => cmp!(self, to_i32x4, from_u32x4, u32, |a, b| a > b),
            SimdOp::I32x4GtU => cmp!(self, to_u32x4, from_u32x4, u32, |a, b| a > b),
            SimdOp::I32x4LeS => cmp!(self, to_i32x4, from_u32x4, u32, |a, b| a <= b),
            SimdOp::I32x4LeU => cmp!(self, to_u32x4, from_u32x4, u32, |a, b| a <= b),
            SimdOp::I32x4GeS => cmp!(self, to_i32x4, from_u32x4, u32, |a, b| a >= b),
            SimdOp::I32x4GeU => cmp!(self, to_u32x4, from_u32x4, u32, |a, b| a >= b),
            SimdOp::I64x2Eq => cmp!(self, to_u64x2, from_u64x2, u64, |a, b| a == b),
            SimdOp::I64x2Ne => cmp!(self, to_u64x2, from_u64x2, u64, |a, b| a != b),
            SimdOp::I64x2LtS => cmp!(self, to_i64x2, from_u64x2, u64, |a, b| a < b),
            SimdOp::I64x2GtS => cmp!(self, to_i64x2, from_u64x2, u64, |a, b| a > b),
            SimdOp::I64x2LeS => cmp!(self, to_i64x2, from_u64x2, u64, |a, b| a <= b),
            SimdOp::I64x2GeS => cmp!(self, to_i64x2, from_u64x2, u64, |a, b| a >= b),
            SimdOp::F32x4Eq => cmp!(self, to_f32x4, from_u32x4, u32, |a, b| a == b),
            SimdOp::F32x4Ne => cmp!(self, to_f32x4, from_u32x4, u32, |a, b| a != b),
            SimdOp::F32x4Lt => cmp!(self, to_f32x4, from_u32x4, u32, |a, b| a < b),
            SimdOp::F32x4Gt => cmp!(self, to_f32x4, from_u32x4, u32, |a, b| a > b),
            SimdOp::F32x4Le => cmp!(self, to_f32x4, from_u32x4, u32, |a, b| a <= b),
            SimdOp::F32x4Ge => cmp!(self, to_f32x4, from_u32x4, u32, |a, b| a >= b),
            SimdOp::F64x2Eq => cmp!(self, to_f64x2, from_u64x2, u64, |a, b| a == b),
            SimdOp::F64x2Ne => cmp!(self, to_f64x2, from_u64x2, u64, |a, b| a != b),
            SimdOp::F64x2Lt => cmp!(self, to_f64x2, from_u64x2, u64, |a, b| a < b),
            SimdOp::F64x2Gt => cmp!(self, to_f64x2, from_u64x2, u64, |a, b| a > b),
            SimdOp::F64x2Le => cmp!(self, to_f64x2, from_u64x2, u64, |a, b| a <= b),
            SimdOp::F64x2Ge => cmp!(self, to_f64x2, from_u64x2, u64, |a, b| a >= b),

            // --- bitwise ----------------------------------------------
            SimdOp::V128Not => {
                let v = self.pop_v128()?;
                self.push_v128(V128::from_bits(!v.to_bits()))
            }
            SimdOp::V128And => {
                let b = self.pop_v128()?;
                let a = self.pop_v128()?;
                self.push_v128(V128::from_bits(a.to_bits() & b.to_bits()))
            }
            SimdOp::V128AndNot => {
                let b = self.pop_v128()?;
                let a = self.pop_v128()?;
                self.push_v128(V128::from_bits(a.to_bits() & !b.to_bits()))
            }
            SimdOp::V128Or => {
                let b = self.pop_v128()?;
                let a = self.pop_v128()?;
                self.push_v128(V128::from_bits(a.to_bits() | b.to_bits()))
            }
            SimdOp::V128Xor => {
                let b = self.pop_v128()?;
                let a = self.pop_v128()?;
                self.push_v128(V128::from_bits(a.to_bits() ^ b.to_bits()))
            }
            SimdOp::V128Bitselect
            | SimdOp::I8x16RelaxedLaneselect
            | SimdOp::I16x8RelaxedLaneselect
            | SimdOp::I32x4RelaxedLaneselect
            | SimdOp::I64x2RelaxedLaneselect => {
                let c = self.pop_v128()?.to_bits();
                let b = self.pop_v128()?.to_bits();
                let a = self.pop_v128()?.to_bits();
                self.push_v128(V128::from_bits((a & c) | (b & !c)))
            }
            SimdOp::V128AnyTrue => {
                let v = self.pop_v128()?;
                self.push_u32(u32::from(v.to_bits() != 0))
            }

            // --- i8x16 ------------------------------------------------
            SimdOp::I8x16Abs => unop!(self, to_i8x16, from_i8x16, |a| a.wrapping_abs()),
            SimdOp::I8x16Neg => unop!(self, to_i8x16, from_i8x16, |a| a.wrapping_neg()),
            SimdOp::I8x16Popcnt => unop!(self, to_u8x16, from_u8x16, |a| a.count_ones() as u8),
            SimdOp::I8x16AllTrue => {
                let v = self.pop_v128()?.to_u8x16();
                self.push_u32(u32::from(v.iter().all(|&l| l != 0)))
            }
            SimdOp::I8x16Bitmask => {
                let v = self.pop_v128()?.to_u8x16();
                let mut bits = 0u32;
                for (i, l) in v.iter().enumerate() {
                    bits |= u32::from(l >> 7) << i;
                }
                self.push_u32(bits)
            }
            SimdOp::I8x16NarrowI16x8S | SimdOp::I8x16NarrowI16x8U => {
                let b = self.pop_v128()?.to_i16x8();
                let a = self.pop_v128()?.to_i16x8();
                let mut out = [0u8; 16];
                for i in 0..8 {
                    out[i] = narrow8(a[i], sub == SimdOp::I8x16NarrowI16x8S);
                    out[i + 8] = narrow8(b[i], sub == SimdOp::I8x16NarrowI16x8S);
                }
                self.push_v128(V128::from_u8x16(out))
            }
            SimdOp::I8x16Shl => shift!(self, to_u8x16, from_u8x16, 8, |a, s| a << s),
            SimdOp::I8x16ShrS => {
                shift!(self, to_i8x16, from_i8x16, 8, |a, s| a >> s)
            }
            SimdOp::I8x16ShrU => shift!(self, to_u8x16, from_u8x16, 8, |a, s| a >> s),
            SimdOp::I8x16Add => {
                binop!(self, to_u8x16, from_u8x16, |a, b| a.wrapping_add(b))
            }
            SimdOp::I8x16AddSatS => {
                binop!(self, to_i8x16, from_i8x16, |a, b| a.saturating_add(b))
            }
            SimdOp::I8x16AddSatU => {
                binop!(self, to_u8x16, from_u8x16, |a, b| a.saturating_add(b))
            }
            SimdOp::I8x16Sub => {
                binop!(self, to_u8x16, from_u8x16, |a, b| a.wrapping_sub(b))
            }
            SimdOp::I8x16SubSatS => {
                binop!(self, to_i8x16, from_i8x16, |a, b| a.saturating_sub(b))
            }
            SimdOp::I8x16SubSatU => {
                binop!(self, to_u8x16, from_u8x16, |a, b| a.saturating_sub(b))
            }
            SimdOp::I8x16MinS => binop!(self, to_i8x16, from_i8x16, |a, b| a.min(b)),
            SimdOp::I8x16MinU => binop!(self, to_u8x16, from_u8x16, |a, b| a.min(b)),
            SimdOp::I8x16MaxS => binop!(self, to_i8x16, from_i8x16, |a, b| a.max(b)),
            SimdOp::I8x16MaxU => binop!(self, to_u8x16, from_u8x16, |a, b| a.max(b)),
            SimdOp::I8x16AvgrU => binop!(self, to_u8x16, from_u8x16, |a, b| {
                ((u16::from(a) + u16::from(b) + 1) / 2) as u8
            }),

            // --- i16x8 ------------------------------------------------
            SimdOp::I16x8Abs => unop!(self, to_i16x8, from_i16x8, |a| a.wrapping_abs()),
            SimdOp::I16x8Neg => unop!(self, to_i16x8, from_i16x8, |a| a.wrapping_neg()),
            SimdOp::I16x8Q15MulrSatS | SimdOp::I16x8RelaxedQ15MulrS => {
                binop!(self, to_i16x8, from_i16x8, |a, b| q15mulr_sat(a, b))
            }
            SimdOp::I16x8AllTrue => {
                let v = self.pop_v128()?.to_u16x8();
                self.push_u32(u32::from(v.iter().all(|&l| l != 0)))
            }
            SimdOp::I16x8Bitmask => {
                let v = self.pop_v128()?.to_u16x8();
                let mut bits = 0u32;
                for (i, l) in v.iter().enumerate() {
                    bits |= u32::from(l >> 15) << i;
                }
                self.push_u32(bits)
            }
            SimdOp::I16x8NarrowI32x4S | SimdOp::I16x8NarrowI32x4U => {
                let b = self.pop_v128()?.to_i32x4();
                let a = self.pop_v128()?.to_i32x4();
                let mut out = [0u16; 8];
                for i in 0..4 {
                    out[i] = narrow16(a[i], sub == SimdOp::I16x8NarrowI32x4S);
                    out[i + 4] = narrow16(b[i], sub == SimdOp::I16x8NarrowI32x4S);
                }
                self.push_v128(V128::from_u16x8(out))
            }
            SimdOp::I16x8ExtendLowI8x16S => {
                let v = self.pop_v128()?.to_i8x16();
                self.push_v128(V128::from_i16x8(core::array::from_fn(|i| i16::from(v[i]))))
            }
            SimdOp::I16x8ExtendHighI8x16S => {
                let v = self.pop_v128()?.to_i8x16();
                self.push_v128(V128::from_i16x8(core::array::from_fn(|i| {
                    i16::from(v[i + 8])
                })))
            }
            SimdOp::I16x8ExtendLowI8x16U => {
                let v = self.pop_v128()?.to_u8x16();
                self.push_v128(V128::from_u16x8(core::array::from_fn(|i| u16::from(v[i]))))
            }
            SimdOp::I16x8ExtendHighI8x16U => {
                let v = self.pop_v128()?.to_u8x16();
                self.push_v128(V128::from_u16x8(core::array::from_fn(|i| {
                    u16::from(v[i + 8])
                })))
            }
            SimdOp::I16x8Shl => shift!(self, to_u16x8, from_u16x8, 16, |a, s| a << s),
            SimdOp::I16x8ShrS => shift!(self, to_i16x8, from_i16x8, 16, |a, s| a >> s),
            SimdOp::I16x8ShrU => shift!(self, to_u16x8, from_u16x8, 16, |a, s| a >> s),
            SimdOp::I16x8Add => {
                binop!(self, to_u16x8, from_u16x8, |a, b| a.wrapping_add(b))
            }
            SimdOp::I16x8AddSatS => {
                binop!(self, to_i16x8, from_i16x8, |a, b| a.saturating_add(b))
            }
            SimdOp::I16x8AddSatU => {
                binop!(self, to_u16x8, from_u16x8, |a, b| a.saturating_add(b))
            }
            SimdOp::I16x8Sub => {
                binop!(self, to_u16x8, from_u16x8, |a, b| a.wrapping_sub(b))
            }
            SimdOp::I16x8SubSatS => {
                binop!(self, to_i16x8, from_i16x8, |a, b| a.saturating_sub(b))
            }
            SimdOp::I16x8SubSatU => {
                binop!(self, to_u16x8, from_u16x8, |a, b| a.saturating_sub(b))
            }
            SimdOp::I16x8Mul => {
                binop!(self, to_u16x8, from_u16x8, |a, b| a.wrapping_mul(b))
            }
            SimdOp::I16x8MinS => binop!(self, to_i16x8, from_i16x8, |a, b| a.min(b)),
            SimdOp::I16x8MinU => binop!(self, to_u16x8, from_u16x8, |a, b| a.min(b)),
            SimdOp::I16x8MaxS => binop!(self, to_i16x8, from_i16x8, |a, b| a.max(b)),
            SimdOp::I16x8MaxU => binop!(self, to_u16x8, from_u16x8, |a, b| a.max(b)),
            SimdOp::I16x8AvgrU => binop!(self, to_u16x8, from_u16x8, |a, b| {
                ((u32::from(a) + u32::from(b) + 1) / 2) as u16
            }),
            SimdOp::I16x8ExtaddPairwiseI8x16S => {
                let v = self.pop_v128()?.to_i8x16();
                self.push_v128(V128::from_i16x8(core::array::from_fn(|i| {
                    i16::from(v[2 * i]) + i16::from(v[2 * i + 1])
                })))
            }
            SimdOp::I16x8ExtaddPairwiseI8x16U => {
                let v = self.pop_v128()?.to_u8x16();
                self.push_v128(V128::from_u16x8(core::array::from_fn(|i| {
                    u16::from(v[2 * i]) + u16::from(v[2 * i + 1])
                })))
            }
            SimdOp::I16x8ExtmulLowI8x16S
            | SimdOp::I16x8ExtmulHighI8x16S
            | SimdOp::I16x8ExtmulLowI8x16U
            | SimdOp::I16x8ExtmulHighI8x16U => {
                let off = match sub {
                    SimdOp::I16x8ExtmulHighI8x16S | SimdOp::I16x8ExtmulHighI8x16U => 8,
                    _ => 0,
                };
                let signed = matches!(
                    sub,
                    SimdOp::I16x8ExtmulLowI8x16S | SimdOp::I16x8ExtmulHighI8x16S
                );
                let b = self.pop_v128()?;
                let a = self.pop_v128()?;
                let out: [u16; 8] = core::array::from_fn(|i| {
                    if signed {
                        (i16::from(a.to_i8x16()[i + off]) * i16::from(b.to_i8x16()[i + off]))
                            as u16
                    } else {
                        u16::from(a.to_u8x16()[i + off]) * u16::from(b.to_u8x16()[i + off])
                    }
                });
                self.push_v128(V128::from_u16x8(out))
            }
            SimdOp::I16x8RelaxedDotI8x16I7x16S => {
                let b = self.pop_v128()?.to_i8x16();
                let a = self.pop_v128()?.to_i8x16();
                self.push_v128(V128::from_i16x8(core::array::from_fn(|i| {
                    (i16::from(a[2 * i]) * i16::from(b[2 * i]))
                        .wrapping_add(i16::from(a[2 * i + 1]) * i16::from(b[2 * i + 1]))
                })))
            }

            // --- i32x4 ------------------------------------------------
            SimdOp::I32x4Abs => unop!(self, to_i32x4, from_i32x4, |a| a.wrapping_abs()),
            SimdOp::I32x4Neg => unop!(self, to_i32x4, from_i32x4, |a| a.wrapping_neg()),
            SimdOp::I32x4AllTrue => {
                let v = self.pop_v128()?.to_u32x4();
                self.push_u32(u32::from(v.iter().all(|&l| l != 0)))
            }
            SimdOp::I32x4Bitmask => {
                let v = self.pop_v128()?.to_u32x4();
                let mut bits = 0u32;
                for (i, l) in v.iter().enumerate() {
                    bits |= (l >> 31) << i;
                }
                self.push_u32(bits)
            }
            SimdOp::I32x4ExtendLowI16x8S => {
                let v = self.pop_v128()?.to_i16x8();
                self.push_v128(V128::from_i32x4(core::array::from_fn(|i| i32::from(v[i]))))
            }
            SimdOp::I32x4ExtendHighI16x8S => {
                let v = self.pop_v128()?.to_i16x8();
                self.push_v128(V128::from_i32x4(core::array::from_fn(|i| {
                    i32::from(v[i + 4])
                })))
            }
            SimdOp::I32x4ExtendLowI16x8U => {
                let v = self.pop_v128()?.to_u16x8();
                self.push_v128(V128::from_u32x4(core::array::from_fn(|i| u32::from(v[i]))))
            }
            SimdOp::I32x4ExtendHighI16x8U => {
                let v = self.pop_v128()?.to_u16x8();
                self.push_v128(V128::from_u32x4(core::array::from_fn(|i| {
                    u32::from(v[i + 4])
                })))
            }
            SimdOp::I32x4Shl => shift!(self, to_u32x4, from_u32x4, 32, |a, s| a << s),
            SimdOp::I32x4ShrS => shift!(self, to_i32x4, from_i32x4, 32, |a, s| a >> s),
            SimdOp::I32x4ShrU => shift!(self, to_u32x4, from_u32x4, 32, |a, s| a >> s),
            SimdOp::I32x4Add => {
                binop!(self, to_u32x4, from_u32x4, |a, b| a.wrapping_add(b))
            }
            SimdOp::I32x4Sub => {
                binop!(self, to_u32x4, from_u32x4, |a, b| a.wrapping_sub(b))
            }
            SimdOp::I32x4Mul => {
                binop!(self, to_u32x4, from_u32x4, |a, b| a.wrapping_mul(b))
            }
            SimdOp::I32x4MinS => binop!(self, to_i32x4, from_i32x4, |a, b| a.min(b)),
            SimdOp::I32x4MinU => binop!(self, to_u32x4, from_u32x4, |a, b| a.min(b)),
            SimdOp::I32x4MaxS => binop!(self, to_i32x4, from_i32x4, |a, b| a.max(b)),
            SimdOp::I32x4MaxU => binop!(self, to_u32x4, from_u32x4, |a, b| a.max(b)),
            SimdOp::I32x4DotI16x8S => {
                let b = self.pop_v128()?.to_i16x8();
                let a = self.pop_v128()?.to_i16x8();
                self.push_v128(V128::from_i32x4(core::array::from_fn(|i| {
                    i32::from(a[2 * i]) * i32::from(b[2 * i])
                        + i32::from(a[2 * i + 1]) * i32::from(b[2 * i + 1])
                })))
            }
            SimdOp::I32x4ExtaddPairwiseI16x8S => {
                let v = self.pop_v128()?.to_i16x8();
                self.push_v128(V128::from_i32x4(core::array::from_fn(|i| {
                    i32::from(v[2 * i]) + i32::from(v[2 * i + 1])
                })))
            }
            SimdOp::I32x4ExtaddPairwiseI16x8U => {
                let v = self.pop_v128()?.to_u16x8();
                self.push_v128(V128::from_u32x4(core::array::from_fn(|i| {
                    u32::from(v[2 * i]) + u32::from(v[2 * i + 1])
                })))
            }
            SimdOp::I32x4ExtmulLowI16x8S
            | SimdOp::I32x4ExtmulHighI16x8S
            | SimdOp::I32x4ExtmulLowI16x8U
            | SimdOp::I32x4ExtmulHighI16x8U => {
                let off = match sub {
                    SimdOp::I32x4ExtmulHighI16x8S | SimdOp::I32x4ExtmulHighI16x8U => 4,
                    _ => 0,
                };
                let signed = matches!(
                    sub,
                    SimdOp::I32x4ExtmulLowI16x8S | SimdOp::I32x4ExtmulHighI16x8S
                );
                let b = self.pop_v128()?;
                let a = self.pop_v128()?;
                let out: [u32; 4] = core::array::from_fn(|i| {
                    if signed {
                        (i32::from(a.to_i16x8()[i + off]) * i32::from(b.to_i16x8()[i + off]))
                            as u32
                    } else {
                        u32::from(a.to_u16x8()[i + off]) * u32::from(b.to_u16x8()[i + off])
                    }
                });
                self.push_v128(V128::from_u32x4(out))
            }
            SimdOp::I32x4RelaxedDotI8x16I7x16AddS => {
                let c = self.pop_v128()?.to_i32x4();
                let b = self.pop_v128()?.to_i8x16();
                let a = self.pop_v128()?.to_i8x16();
                self.push_v128(V128::from_i32x4(core::array::from_fn(|i| {
                    let dot: i32 = (0..4)
                        .map(|j| i32::from(a[4 * i + j]) * i32::from(b[4 * i + j]))
                        .sum();
                    dot.wrapping_add(c[i])
                })))
            }

            // --- i64x2 ------------------------------------------------
            SimdOp::I64x2Abs => unop!(self, to_i64x2, from_i64x2, |a| a.wrapping_abs()),
            SimdOp::I64x2Neg => unop!(self, to_i64x2, from_i64x2, |a| a.wrapping_neg()),
            SimdOp::I64x2AllTrue => {
                let v = self.pop_v128()?.to_u64x2();
                self.push_u32(u32::from(v.iter().all(|&l| l != 0)))
            }
            SimdOp::I64x2Bitmask => {
                let v = self.pop_v128()?.to_u64x2();
                self.push_u32(((v[0] >> 63) | ((v[1] >> 63) << 1)) as u32)
            }
            SimdOp::I64x2ExtendLowI32x4S => {
                let v = self.pop_v128()?.to_i32x4();
                self.push_v128(V128::from_i64x2([i64::from(v[0]), i64::from(v[1])]))
            }
            SimdOp::I64x2ExtendHighI32x4S => {
                let v = self.pop_v128()?.to_i32x4();
                self.push_v128(V128::from_i64x2([i64::from(v[2]), i64::from(v[3])]))
            }
            SimdOp::I64x2ExtendLowI32x4U => {
                let v = self.pop_v128()?.to_u32x4();
                self.push_v128(V128::from_u64x2([u64::from(v[0]), u64::from(v[1])]))
            }
            SimdOp::I64x2ExtendHighI32x4U => {
                let v = self.pop_v128()?.to_u32x4();
                self.push_v128(V128::from_u64x2([u64::from(v[2]), u64::from(v[3])]))
            }
            SimdOp::I64x2Shl => shift!(self, to_u64x2, from_u64x2, 64, |a, s| a << s),
            SimdOp::I64x2ShrS => shift!(self, to_i64x2, from_i64x2, 64, |a, s| a >> s),
            SimdOp::I64x2ShrU => shift!(self, to_u64x2, from_u64x2, 64, |a, s| a >> s),
            SimdOp::I64x2Add => {
                binop!(self, to_u64x2, from_u64x2, |a, b| a.wrapping_add(b))
            }
            SimdOp::I64x2Sub => {
                binop!(self, to_u64x2, from_u64x2, |a, b| a.wrapping_sub(b))
            }
            SimdOp::I64x2Mul => {
                binop!(self, to_u64x2, from_u64x2, |a, b| a.wrapping_mul(b))
            }
            SimdOp::I64x2ExtmulLowI32x4S
            | SimdOp::I64x2ExtmulHighI32x4S
            | SimdOp::I64x2ExtmulLowI32x4U
            | SimdOp::I64x2ExtmulHighI32x4U => {
                let off = match sub {
                    SimdOp::I64x2ExtmulHighI32x4S | SimdOp::I64x2ExtmulHighI32x4U => 2,
                    _ => 0,
                };
                let signed = matches!(
                    sub,
                    SimdOp::I64x2ExtmulLowI32x4S | SimdOp::I64x2ExtmulHighI32x4S
                );
                let b = self.pop_v128()?;
                let a = self.pop_v128()?;
                let out: [u64; 2] = core::array::from_fn(|i| {
                    if signed {
                        (i64::from(a.to_i32x4()[i + off]) * i64::from(b.to_i32x4()[i + off]))
                            as u64
                    } else {
                        u64::from(a.to_u32x4()[i + off]) * u64::from(b.to_u32x4()[i + off])
                    }
                });
                self.push_v128(V128::from_u64x2(out))
            }

            // --- f32x4 ------------------------------------------------
            SimdOp::F32x4Abs => unop!(self, to_f32x4, from_f32x4, |a| a.abs()),
            SimdOp::F32x4Neg => unop!(self, to_f32x4, from_f32x4, |a| -a),
            SimdOp::F32x4Sqrt => unop!(self, to_f32x4, from_f32x4, |a| a.sqrt()),
            SimdOp::F32x4Ceil => unop!(self, to_f32x4, from_f32x4, |a| a.ceil()),
            SimdOp::F32x4Floor => unop!(self, to_f32x4, from_f32x4, |a| a.floor()),
            SimdOp::F32x4Trunc => unop!(self, to_f32x4, from_f32x4, |a| a.trunc()),
            SimdOp::F32x4Nearest => {
                unop!(self, to_f32x4, from_f32x4, |a| a.round_ties_even())
            }
            SimdOp::F32x4Add => binop!(self, to_f32x4, from_f32x4, |a, b| a + b),
            SimdOp::F32x4Sub => binop!(self, to_f32x4, from_f32x4, |a, b| a - b),
            SimdOp::F32x4Mul => binop!(self, to_f32x4, from_f32x4, |a, b| a * b),
            SimdOp::F32x4Div => binop!(self, to_f32x4, from_f32x4, |a, b| a / b),
            SimdOp::F32x4Min | SimdOp::F32x4RelaxedMin => {
                binop!(self, to_f32x4, from_f32x4, |a, b| fmin32(a, b))
            }
            SimdOp::F32x4Max | SimdOp::F32x4RelaxedMax => {
                binop!(self, to_f32x4, from_f32x4, |a, b| fmax32(a, b))
            }
            SimdOp::F32x4Pmin => {
                binop!(self, to_f32x4, from_f32x4, |a, b| if b < a { b } else { a })
            }
            SimdOp::F32x4Pmax => {
                binop!(self, to_f32x4, from_f32x4, |a, b| if a < b { b } else { a })
            }
            SimdOp::F32x4RelaxedMadd => {
                let c = self.pop_v128()?.to_f32x4();
                let b = self.pop_v128()?.to_f32x4();
                let a = self.pop_v128()?.to_f32x4();
                self.push_v128(V128::from_f32x4(core::array::from_fn(|i| {
                    a[i] * b[i] + c[i]
                })))
            }
            SimdOp::F32x4RelaxedNmadd => {
                let c = self.pop_v128()?.to_f32x4();
                let b = self.pop_v128()?.to_f32x4();
                let a = self.pop_v128()?.to_f32x4();
                self.push_v128(V128::from_f32x4(core::array::from_fn(|i| {
                    -(a[i] * b[i]) + c[i]
                })))
            }

            // --- f64x2 ------------------------------------------------
            SimdOp::F64x2Abs => unop!(self, to_f64x2, from_f64x2, |a| a.abs()),
            SimdOp::F64x2Neg => unop!(self, to_f64x2, from_f64x2, |a| -a),
            SimdOp::F64x2Sqrt => unop!(self, to_f64x2, from_f64x2, |a| a.sqrt()),
            SimdOp::F64x2Ceil => unop!(self, to_f64x2, from_f64x2, |a| a.ceil()),
            SimdOp::F64x2Floor => unop!(self, to_f64x2, from_f64x2, |a| a.floor()),
            SimdOp::F64x2Trunc => unop!(self, to_f64x2, from_f64x2, |a| a.trunc()),
            SimdOp::F64x2Nearest => {
                unop!(self, to_f64x2, from_f64x2, |a| a.round_ties_even())
            }
            SimdOp::F64x2Add => binop!(self, to_f64x2, from_f64x2, |a, b| a + b),
            SimdOp::F64x2Sub => binop!(self, to_f64x2, from_f64x2, |a, b| a - b),
            SimdOp::F64x2Mul => binop!(self, to_f64x2, from_f64x2, |a, b| a * b),
            SimdOp::F64x2Div => binop!(self, to_f64x2, from_f64x2, |a, b| a / b),
            SimdOp::F64x2Min | SimdOp::F64x2RelaxedMin => {
                binop!(self, to_f64x2, from_f64x2, |a, b| fmin64(a, b))
            }
            SimdOp::F64x2Max | SimdOp::F64x2RelaxedMax => {
                binop!(self, to_f64x2, from_f64x2, |a, b| fmax64(a, b))
            }
            SimdOp::F64x2Pmin => {
                binop!(self, to_f64x2, from_f64x2, |a, b| if b < a { b } else { a })
            }
            SimdOp::F64x2Pmax => {
                binop!(self, to_f64x2, from_f64x2, |a, b| if a < b { b } else { a })
            }
            SimdOp::F64x2RelaxedMadd => {
                let c = self.pop_v128()?.to_f64x2();
                let b = self.pop_v128()?.to_f64x2();
                let a = self.pop_v128()?.to_f64x2();
                self.push_v128(V128::from_f64x2(core::array::from_fn(|i| {
                    a[i] * b[i] + c[i]
                })))
            }
            SimdOp::F64x2RelaxedNmadd => {
                let c = self.pop_v128()?.to_f64x2();
                let b = self.pop_v128()?.to_f64x2();
                let a = self.pop_v128()?.to_f64x2();
                self.push_v128(V128::from_f64x2(core::array::from_fn(|i| {
                    -(a[i] * b[i]) + c[i]
                })))
            }

            // --- conversions ------------------------------------------
            SimdOp::I32x4TruncSatF32x4S | SimdOp::I32x4RelaxedTruncF32x4S => {
                let v = self.pop_v128()?.to_f32x4();
                self.push_v128(V128::from_i32x4(core::array::from_fn(|i| {
                    f64::from(v[i]) as i32
                })))
            }
            SimdOp::I32x4TruncSatF32x4U | SimdOp::I32x4RelaxedTruncF32x4U => {
                let v = self.pop_v128()?.to_f32x4();
                self.push_v128(V128::from_u32x4(core::array::from_fn(|i| {
                    f64::from(v[i]) as u32
                })))
            }
            SimdOp::F32x4ConvertI32x4S => {
                let v = self.pop_v128()?.to_i32x4();
                self.push_v128(V128::from_f32x4(core::array::from_fn(|i| v[i] as f32)))
            }
            SimdOp::F32x4ConvertI32x4U => {
                let v = self.pop_v128()?.to_u32x4();
                self.push_v128(V128::from_f32x4(core::array::from_fn(|i| v[i] as f32)))
            }
            SimdOp::I32x4TruncSatF64x2SZero | SimdOp::I32x4RelaxedTruncF64x2SZero => {
                let v = self.pop_v128()?.to_f64x2();
                self.push_v128(V128::from_i32x4([v[0] as i32, v[1] as i32, 0, 0]))
            }
            SimdOp::I32x4TruncSatF64x2UZero | SimdOp::I32x4RelaxedTruncF64x2UZero => {
                let v = self.pop_v128()?.to_f64x2();
                self.push_v128(V128::from_u32x4([v[0] as u32, v[1] as u32, 0, 0]))
            }
            SimdOp::F64x2ConvertLowI32x4S => {
                let v = self.pop_v128()?.to_i32x4();
                self.push_v128(V128::from_f64x2([f64::from(v[0]), f64::from(v[1])]))
            }
            SimdOp::F64x2ConvertLowI32x4U => {
                let v = self.pop_v128()?.to_u32x4();
                self.push_v128(V128::from_f64x2([f64::from(v[0]), f64::from(v[1])]))
            }
            SimdOp::F32x4DemoteF64x2Zero => {
                let v = self.pop_v128()?.to_f64x2();
                self.push_v128(V128::from_f32x4([v[0] as f32, v[1] as f32, 0.0, 0.0]))
            }
            SimdOp::F64x2PromoteLowF32x4 => {
                let v = self.pop_v128()?.to_f32x4();
                self.push_v128(V128::from_f64x2([f64::from(v[0]), f64::from(v[1])]))
            }

            #[allow(unreachable_patterns)]
            _ => Err(VmError::Trap(TrapKind::InvalidBytecode)),
        }
    }
}

fn narrow8(v: i16, signed: bool) -> u8 {
    if signed {
        v.clamp(i16::from(i8::MIN), i16::from(i8::MAX)) as i8 as u8
    } else {
        v.clamp(0, i16::from(u8::MAX)) as u8
    }
}

fn narrow16(v: i32, signed: bool) -> u16 {
    if signed {
        v.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16 as u16
    } else {
        v.clamp(0, i32::from(u16::MAX)) as u16
    }
}

fn q15mulr_sat(a: i16, b: i16) -> i16 {
    let p = (i32::from(a) * i32::from(b) + 0x4000) >> 15;
    p.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}
