//! GC-prefix (`0xFB`) dispatch: structs, arrays, i31, tests and casts.
//!
//! Allocation goes through the store's [`GcHeap`]; before each allocating
//! opcode the heap's collection check may run, with roots scanned
//! conservatively from the operand stack (wide slots), the live register
//! arena, globals, and tables.
//!
//! [`GcHeap`]: crate::heap::GcHeap

use coral_asm::{op, BytecodeReader, GcOp, TrapKind};
use coral_types::{HeapType, StorageType};

use crate::error::{ExecResult, VmError};
use crate::heap::{decode_ref, encode_i31, HeapObject, Ref};
use crate::interpreter::Vm;
use crate::profiler::prefixed_key;
use crate::store::{CompositeType, InstanceId, Store};

/// Upper bound on one array allocation, in elements.
const MAX_ARRAY_LEN: u64 = 1 << 28;

impl Vm {
    /// Returns `Some(depth)` when a `br_on_cast`/`br_on_cast_fail` decides
    /// to branch; the bytecode loop performs the branch itself.
    pub(super) fn exec_gc(
        &mut self,
        store: &mut Store,
        inst: InstanceId,
        reader: &mut BytecodeReader<'_>,
    ) -> ExecResult<Option<u32>> {
        let raw = reader.read_u32().map_err(VmError::from)?;
        let sub = GcOp::from_repr(raw).ok_or(VmError::Trap(TrapKind::InvalidBytecode))?;
        if let Some(profile) = self.profile_mut() {
            profile.record(prefixed_key(op::GC_PREFIX, raw));
        }

        match sub {
            GcOp::StructNew => {
                let tidx = reader.read_u32().map_err(VmError::from)?;
                let fields = struct_fields(store, inst, tidx)?;
                collect_if_due(self, store);
                let mut slots = vec![0u128; fields.len()];
                for i in (0..fields.len()).rev() {
                    slots[i] = store_field(self.pop()?, fields[i]);
                }
                let r = store.heap.alloc(HeapObject {
                    instance: inst,
                    type_idx: tidx,
                    is_array: false,
                    slots: slots.into_boxed_slice(),
                });
                self.push_u64(r)?;
            }
            GcOp::StructNewDefault => {
                let tidx = reader.read_u32().map_err(VmError::from)?;
                let fields = struct_fields(store, inst, tidx)?;
                collect_if_due(self, store);
                let r = store.heap.alloc(HeapObject {
                    instance: inst,
                    type_idx: tidx,
                    is_array: false,
                    slots: vec![0u128; fields.len()].into_boxed_slice(),
                });
                self.push_u64(r)?;
            }
            GcOp::StructGet | GcOp::StructGetS | GcOp::StructGetU => {
                let tidx = reader.read_u32().map_err(VmError::from)?;
                let fidx = reader.read_u32().map_err(VmError::from)? as usize;
                let storage = struct_fields(store, inst, tidx)?
                    .get(fidx)
                    .copied()
                    .ok_or(VmError::Trap(TrapKind::InvalidBytecode))?;
                let obj = self.pop_object(store)?;
                let slot = *store
                    .heap
                    .get(obj)
                    .and_then(|o| o.slots.get(fidx))
                    .ok_or(VmError::Trap(TrapKind::InvalidBytecode))?;
                self.push(load_field(slot, storage, sub == GcOp::StructGetS))?;
            }
            GcOp::StructSet => {
                let tidx = reader.read_u32().map_err(VmError::from)?;
                let fidx = reader.read_u32().map_err(VmError::from)? as usize;
                let storage = struct_fields(store, inst, tidx)?
                    .get(fidx)
                    .copied()
                    .ok_or(VmError::Trap(TrapKind::InvalidBytecode))?;
                let value = self.pop()?;
                let obj = self.pop_object(store)?;
                let slot = store
                    .heap
                    .get_mut(obj)
                    .and_then(|o| o.slots.get_mut(fidx))
                    .ok_or(VmError::Trap(TrapKind::InvalidBytecode))?;
                *slot = store_field(value, storage);
            }

            GcOp::ArrayNew => {
                let tidx = reader.read_u32().map_err(VmError::from)?;
                let storage = array_elem(store, inst, tidx)?;
                // Collect before popping: the init operand may be the only
                // root of a fresh allocation.
                collect_if_due(self, store);
                let n = u64::from(self.pop_u32()?);
                if n > MAX_ARRAY_LEN {
                    return Err(VmError::Trap(TrapKind::AllocationTooLarge));
                }
                let init = store_field(self.pop()?, storage);
                let r = store.heap.alloc(HeapObject {
                    instance: inst,
                    type_idx: tidx,
                    is_array: true,
                    slots: vec![init; n as usize].into_boxed_slice(),
                });
                self.push_u64(r)?;
            }
            GcOp::ArrayNewDefault => {
                let tidx = reader.read_u32().map_err(VmError::from)?;
                array_elem(store, inst, tidx)?;
                let n = u64::from(self.pop_u32()?);
                if n > MAX_ARRAY_LEN {
                    return Err(VmError::Trap(TrapKind::AllocationTooLarge));
                }
                collect_if_due(self, store);
                let r = store.heap.alloc(HeapObject {
                    instance: inst,
                    type_idx: tidx,
                    is_array: true,
                    slots: vec![0u128; n as usize].into_boxed_slice(),
                });
                self.push_u64(r)?;
            }
            GcOp::ArrayNewFixed => {
                let tidx = reader.read_u32().map_err(VmError::from)?;
                let n = reader.read_u32().map_err(VmError::from)? as usize;
                let storage = array_elem(store, inst, tidx)?;
                collect_if_due(self, store);
                let mut slots = vec![0u128; n];
                for i in (0..n).rev() {
                    slots[i] = store_field(self.pop()?, storage);
                }
                let r = store.heap.alloc(HeapObject {
                    instance: inst,
                    type_idx: tidx,
                    is_array: true,
                    slots: slots.into_boxed_slice(),
                });
                self.push_u64(r)?;
            }
            GcOp::ArrayNewData => {
                let tidx = reader.read_u32().map_err(VmError::from)?;
                let didx = reader.read_u32().map_err(VmError::from)? as usize;
                let storage = array_elem(store, inst, tidx)?;
                let width = storage_width(storage);
                let n = u64::from(self.pop_u32()?);
                let src = u64::from(self.pop_u32()?);
                if n > MAX_ARRAY_LEN {
                    return Err(VmError::Trap(TrapKind::AllocationTooLarge));
                }
                let seg = store
                    .instance(inst)?
                    .data
                    .get(didx)
                    .ok_or(VmError::DataIndexOutOfBounds(didx))?;
                let bytes = seg.contents();
                let end = src
                    .checked_add(n.checked_mul(width).ok_or(VmError::OutOfBoundsMemoryAccess)?)
                    .ok_or(VmError::OutOfBoundsMemoryAccess)?;
                if end > bytes.len() as u64 {
                    return Err(VmError::OutOfBoundsMemoryAccess);
                }
                let slots: Vec<u128> = (0..n as usize)
                    .map(|i| {
                        let at = src as usize + i * width as usize;
                        decode_segment_lane(&bytes[at..at + width as usize])
                    })
                    .collect();
                collect_if_due(self, store);
                let r = store.heap.alloc(HeapObject {
                    instance: inst,
                    type_idx: tidx,
                    is_array: true,
                    slots: slots.into_boxed_slice(),
                });
                self.push_u64(r)?;
            }
            GcOp::ArrayNewElem => {
                let tidx = reader.read_u32().map_err(VmError::from)?;
                let eidx = reader.read_u32().map_err(VmError::from)? as usize;
                array_elem(store, inst, tidx)?;
                let n = u64::from(self.pop_u32()?);
                let src = u64::from(self.pop_u32()?);
                if n > MAX_ARRAY_LEN {
                    return Err(VmError::Trap(TrapKind::AllocationTooLarge));
                }
                let seg = store
                    .instance(inst)?
                    .elems
                    .get(eidx)
                    .ok_or(VmError::ElemIndexOutOfBounds(eidx))?;
                let items = seg.contents();
                let end = src.checked_add(n).ok_or(VmError::Trap(TrapKind::OutOfBoundsTableAccess))?;
                if end > items.len() as u64 {
                    return Err(VmError::Trap(TrapKind::OutOfBoundsTableAccess));
                }
                let slots: Vec<u128> = items[src as usize..end as usize]
                    .iter()
                    .map(|&v| u128::from(v))
                    .collect();
                collect_if_due(self, store);
                let r = store.heap.alloc(HeapObject {
                    instance: inst,
                    type_idx: tidx,
                    is_array: true,
                    slots: slots.into_boxed_slice(),
                });
                self.push_u64(r)?;
            }
            GcOp::ArrayGet | GcOp::ArrayGetS | GcOp::ArrayGetU => {
                let tidx = reader.read_u32().map_err(VmError::from)?;
                let storage = array_elem(store, inst, tidx)?;
                let idx = u64::from(self.pop_u32()?);
                let obj = self.pop_object(store)?;
                let slots = &store
                    .heap
                    .get(obj)
                    .ok_or(VmError::Trap(TrapKind::InvalidBytecode))?
                    .slots;
                let slot = *slots
                    .get(idx as usize)
                    .ok_or(VmError::Trap(TrapKind::OutOfBoundsArrayAccess))?;
                self.push(load_field(slot, storage, sub == GcOp::ArrayGetS))?;
            }
            GcOp::ArraySet => {
                let tidx = reader.read_u32().map_err(VmError::from)?;
                let storage = array_elem(store, inst, tidx)?;
                let value = self.pop()?;
                let idx = u64::from(self.pop_u32()?);
                let obj = self.pop_object(store)?;
                let slots = &mut store
                    .heap
                    .get_mut(obj)
                    .ok_or(VmError::Trap(TrapKind::InvalidBytecode))?
                    .slots;
                let slot = slots
                    .get_mut(idx as usize)
                    .ok_or(VmError::Trap(TrapKind::OutOfBoundsArrayAccess))?;
                *slot = store_field(value, storage);
            }
            GcOp::ArrayLen => {
                let obj = self.pop_object(store)?;
                let len = store
                    .heap
                    .get(obj)
                    .ok_or(VmError::Trap(TrapKind::InvalidBytecode))?
                    .slots
                    .len();
                self.push_u32(len as u32)?;
            }
            GcOp::ArrayFill => {
                let tidx = reader.read_u32().map_err(VmError::from)?;
                let storage = array_elem(store, inst, tidx)?;
                let n = u64::from(self.pop_u32()?);
                let value = store_field(self.pop()?, storage);
                let idx = u64::from(self.pop_u32()?);
                let obj = self.pop_object(store)?;
                let slots = &mut store
                    .heap
                    .get_mut(obj)
                    .ok_or(VmError::Trap(TrapKind::InvalidBytecode))?
                    .slots;
                let end = idx.checked_add(n).ok_or(VmError::Trap(TrapKind::OutOfBoundsArrayAccess))?;
                if end > slots.len() as u64 {
                    return Err(VmError::Trap(TrapKind::OutOfBoundsArrayAccess));
                }
                slots[idx as usize..end as usize].fill(value);
            }
            GcOp::ArrayCopy => {
                let _dst_t = reader.read_u32().map_err(VmError::from)?;
                let _src_t = reader.read_u32().map_err(VmError::from)?;
                let n = u64::from(self.pop_u32()?);
                let src_idx = u64::from(self.pop_u32()?);
                let src_obj = self.pop_object(store)?;
                let dst_idx = u64::from(self.pop_u32()?);
                let dst_obj = self.pop_object(store)?;

                let src_len = store
                    .heap
                    .get(src_obj)
                    .ok_or(VmError::Trap(TrapKind::InvalidBytecode))?
                    .slots
                    .len() as u64;
                let dst_len = store
                    .heap
                    .get(dst_obj)
                    .ok_or(VmError::Trap(TrapKind::InvalidBytecode))?
                    .slots
                    .len() as u64;
                let src_end = src_idx.checked_add(n).ok_or(VmError::Trap(TrapKind::OutOfBoundsArrayAccess))?;
                let dst_end = dst_idx.checked_add(n).ok_or(VmError::Trap(TrapKind::OutOfBoundsArrayAccess))?;
                if src_end > src_len || dst_end > dst_len {
                    return Err(VmError::Trap(TrapKind::OutOfBoundsArrayAccess));
                }

                if src_obj == dst_obj {
                    let slots = &mut store.heap.get_mut(dst_obj).unwrap().slots;
                    slots.copy_within(src_idx as usize..src_end as usize, dst_idx as usize);
                } else {
                    let copied: Vec<u128> = store.heap.get(src_obj).unwrap().slots
                        [src_idx as usize..src_end as usize]
                        .to_vec();
                    store.heap.get_mut(dst_obj).unwrap().slots
                        [dst_idx as usize..dst_end as usize]
                        .copy_from_slice(&copied);
                }
            }
            GcOp::ArrayInitData => {
                let tidx = reader.read_u32().map_err(VmError::from)?;
                let didx = reader.read_u32().map_err(VmError::from)? as usize;
                let storage = array_elem(store, inst, tidx)?;
                let width = storage_width(storage);
                let n = u64::from(self.pop_u32()?);
                let src = u64::from(self.pop_u32()?);
                let dst = u64::from(self.pop_u32()?);
                let obj = self.pop_object(store)?;
                let seg = store
                    .instance(inst)?
                    .data
                    .get(didx)
                    .ok_or(VmError::DataIndexOutOfBounds(didx))?;
                let bytes = seg.contents().to_vec();
                let src_end = src
                    .checked_add(n.checked_mul(width).ok_or(VmError::OutOfBoundsMemoryAccess)?)
                    .ok_or(VmError::OutOfBoundsMemoryAccess)?;
                if src_end > bytes.len() as u64 {
                    return Err(VmError::OutOfBoundsMemoryAccess);
                }
                let slots = &mut store
                    .heap
                    .get_mut(obj)
                    .ok_or(VmError::Trap(TrapKind::InvalidBytecode))?
                    .slots;
                let dst_end = dst.checked_add(n).ok_or(VmError::Trap(TrapKind::OutOfBoundsArrayAccess))?;
                if dst_end > slots.len() as u64 {
                    return Err(VmError::Trap(TrapKind::OutOfBoundsArrayAccess));
                }
                for i in 0..n as usize {
                    let at = src as usize + i * width as usize;
                    slots[dst as usize + i] =
                        decode_segment_lane(&bytes[at..at + width as usize]);
                }
            }
            GcOp::ArrayInitElem => {
                let tidx = reader.read_u32().map_err(VmError::from)?;
                let eidx = reader.read_u32().map_err(VmError::from)? as usize;
                array_elem(store, inst, tidx)?;
                let n = u64::from(self.pop_u32()?);
                let src = u64::from(self.pop_u32()?);
                let dst = u64::from(self.pop_u32()?);
                let obj = self.pop_object(store)?;
                let seg = store
                    .instance(inst)?
                    .elems
                    .get(eidx)
                    .ok_or(VmError::ElemIndexOutOfBounds(eidx))?;
                let items = seg.contents().to_vec();
                let src_end = src.checked_add(n).ok_or(VmError::Trap(TrapKind::OutOfBoundsTableAccess))?;
                if src_end > items.len() as u64 {
                    return Err(VmError::Trap(TrapKind::OutOfBoundsTableAccess));
                }
                let slots = &mut store
                    .heap
                    .get_mut(obj)
                    .ok_or(VmError::Trap(TrapKind::InvalidBytecode))?
                    .slots;
                let dst_end = dst.checked_add(n).ok_or(VmError::Trap(TrapKind::OutOfBoundsArrayAccess))?;
                if dst_end > slots.len() as u64 {
                    return Err(VmError::Trap(TrapKind::OutOfBoundsArrayAccess));
                }
                for i in 0..n as usize {
                    slots[dst as usize + i] = u128::from(items[src as usize + i]);
                }
            }

            GcOp::RefTest | GcOp::RefTestNull => {
                let target = reader.read_heap_type().map_err(VmError::from)?;
                let v = self.pop_u64()?;
                let ok = ref_matches(store, inst, v, target, sub == GcOp::RefTestNull)?;
                self.push_u32(u32::from(ok))?;
            }
            GcOp::RefCast | GcOp::RefCastNull => {
                let target = reader.read_heap_type().map_err(VmError::from)?;
                let v = self.pop_u64()?;
                if !ref_matches(store, inst, v, target, sub == GcOp::RefCastNull)? {
                    return Err(VmError::Trap(TrapKind::CastFailure));
                }
                self.push_u64(v)?;
            }
            GcOp::BrOnCast | GcOp::BrOnCastFail => {
                let flags = reader.read_u8().map_err(VmError::from)?;
                let depth = reader.read_u32().map_err(VmError::from)?;
                // The source heap type is read but unused; only the target
                // participates in the runtime check.
                let _source = reader.read_heap_type().map_err(VmError::from)?;
                let target = reader.read_heap_type().map_err(VmError::from)?;
                let null_ok = flags & 0x02 != 0;
                let v = self.peek(0)? as u64;
                let matches = ref_matches(store, inst, v, target, null_ok)?;
                let take = if sub == GcOp::BrOnCast { matches } else { !matches };
                if take {
                    return Ok(Some(depth));
                }
            }

            GcOp::AnyConvertExtern | GcOp::ExternConvertAny => {
                // Identity in this reference encoding.
            }
            GcOp::RefI31 => {
                let v = self.pop_u32()?;
                self.push_u64(encode_i31(v))?;
            }
            GcOp::I31GetS => {
                let v = self.pop_u64()?;
                match decode_ref(v) {
                    Ref::Null => return Err(VmError::Trap(TrapKind::NullReference)),
                    Ref::I31(x) => {
                        // Sign-extend the 31-bit payload.
                        let wide = ((x << 1) as i32) >> 1;
                        self.push_i32(wide)?;
                    }
                    Ref::Object(_) => {
                        return Err(VmError::Trap(TrapKind::InvalidBytecode))
                    }
                }
            }
            GcOp::I31GetU => {
                let v = self.pop_u64()?;
                match decode_ref(v) {
                    Ref::Null => return Err(VmError::Trap(TrapKind::NullReference)),
                    Ref::I31(x) => self.push_u32(x)?,
                    Ref::Object(_) => {
                        return Err(VmError::Trap(TrapKind::InvalidBytecode))
                    }
                }
            }

            #[allow(unreachable_patterns)]
            _ => return Err(VmError::Trap(TrapKind::InvalidBytecode)),
        }

        Ok(None)
    }

    /// Pop a reference that must be a non-null heap object.
    fn pop_object(&mut self, _store: &Store) -> ExecResult<usize> {
        let v = self.pop_u64()?;
        match decode_ref(v) {
            Ref::Null => Err(VmError::Trap(TrapKind::NullReference)),
            Ref::I31(_) => Err(VmError::Trap(TrapKind::InvalidBytecode)),
            Ref::Object(idx) => Ok(idx),
        }
    }
}

fn struct_fields(
    store: &Store,
    inst: InstanceId,
    tidx: u32,
) -> ExecResult<Vec<coral_types::FieldType>> {
    let sub = store
        .instance(inst)?
        .types
        .get(tidx as usize)
        .ok_or(VmError::TypeIndexOutOfBounds(tidx as usize))?;
    match &sub.composite {
        CompositeType::Struct(s) => Ok(s.fields.clone()),
        _ => Err(VmError::Trap(TrapKind::InvalidBytecode)),
    }
}

fn array_elem(
    store: &Store,
    inst: InstanceId,
    tidx: u32,
) -> ExecResult<coral_types::FieldType> {
    let sub = store
        .instance(inst)?
        .types
        .get(tidx as usize)
        .ok_or(VmError::TypeIndexOutOfBounds(tidx as usize))?;
    match &sub.composite {
        CompositeType::Array(a) => Ok(a.elem),
        _ => Err(VmError::Trap(TrapKind::InvalidBytecode)),
    }
}

/// Truncate a popped value into its storage representation.
fn store_field(value: u128, field: coral_types::FieldType) -> u128 {
    match field.storage {
        StorageType::I8 => value & 0xFF,
        StorageType::I16 => value & 0xFFFF,
        StorageType::Val(_) => value,
    }
}

/// Widen a stored slot on access; packed fields extend to i32.
fn load_field(slot: u128, field: coral_types::FieldType, signed: bool) -> u128 {
    match field.storage {
        StorageType::I8 => {
            if signed {
                u128::from(((slot as u8) as i8 as i32) as u32)
            } else {
                slot & 0xFF
            }
        }
        StorageType::I16 => {
            if signed {
                u128::from(((slot as u16) as i16 as i32) as u32)
            } else {
                slot & 0xFFFF
            }
        }
        StorageType::Val(_) => slot,
    }
}

fn storage_width(field: coral_types::FieldType) -> u64 {
    match field.storage {
        StorageType::I8 => 1,
        StorageType::I16 => 2,
        StorageType::Val(ty) => match ty {
            coral_types::ValType::I32 | coral_types::ValType::F32 => 4,
            coral_types::ValType::V128 => 16,
            _ => 8,
        },
    }
}

fn decode_segment_lane(bytes: &[u8]) -> u128 {
    let mut buf = [0u8; 16];
    buf[..bytes.len()].copy_from_slice(bytes);
    u128::from_le_bytes(buf)
}

/// Runtime `ref.test` against a target heap type.
fn ref_matches(
    store: &Store,
    inst: InstanceId,
    value: u64,
    target: HeapType,
    null_ok: bool,
) -> ExecResult<bool> {
    Ok(match decode_ref(value) {
        Ref::Null => null_ok,
        Ref::I31(_) => matches!(target, HeapType::Any | HeapType::Eq | HeapType::I31),
        Ref::Object(idx) => {
            let obj = match store.heap.get(idx) {
                Some(obj) => obj,
                None => return Ok(false),
            };
            match target {
                HeapType::Any | HeapType::Eq => true,
                HeapType::Struct => !obj.is_array,
                HeapType::Array => obj.is_array,
                HeapType::Concrete(t) => {
                    // Type identity is per defining instance; casts across
                    // instances fail (canonicalization is instantiation's
                    // concern).
                    if obj.instance != inst {
                        false
                    } else {
                        let types = &store.instance(inst)?.types;
                        let mut cur = Some(obj.type_idx);
                        let mut found = false;
                        while let Some(c) = cur {
                            if c == t {
                                found = true;
                                break;
                            }
                            cur = types.get(c as usize).and_then(|s| s.supertype);
                        }
                        found
                    }
                }
                _ => false,
            }
        }
    })
}

fn collect_if_due(vm: &Vm, store: &mut Store) {
    if !store.heap.wants_collect() {
        return;
    }
    let Store {
        heap,
        globals,
        tables,
        ..
    } = store;
    let roots = vm
        .op_slots()
        .iter()
        .map(|s| *s as u64)
        .chain(vm.regs()[..vm.reg_top()].iter().copied())
        .chain(globals.iter().map(|g| g.value as u64))
        .chain(tables.iter().flat_map(|t| t.elems().iter().copied()));
    tracing::trace!(live = heap.live(), "gc collection check");
    heap.collect(roots);
}
