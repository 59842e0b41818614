//! GC heap consumed by the GC opcode dispatch.
//!
//! Reference encoding in operand slots: null is 0; a heap object is
//! `(index + 1) << 1` (even, non-zero); an i31 is `(value << 1) | 1`. A
//! single 64-bit slot therefore carries the whole `anyref` hierarchy.
//!
//! Collection is a conservative mark-sweep over the root slots the VM
//! provides (operand stack, register arena, globals): any slot whose value
//! decodes to a live object index pins that object.

use coral_types::TypeIdx;

/// Heap object index.
pub type HeapIdx = usize;

/// Allocations between collection checks.
const COLLECT_INTERVAL: usize = 4096;

/// Encode a heap object index as a reference value.
pub const fn encode_ref(idx: HeapIdx) -> u64 {
    ((idx as u64) + 1) << 1
}

/// Encode an i31 scalar as a reference value.
pub const fn encode_i31(value: u32) -> u64 {
    (((value & 0x7FFF_FFFF) as u64) << 1) | 1
}

/// Decoded reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ref {
    /// Null reference.
    Null,
    /// Unboxed 31-bit scalar.
    I31(u32),
    /// Heap object.
    Object(HeapIdx),
}

/// Decode a reference value.
pub const fn decode_ref(value: u64) -> Ref {
    if value == 0 {
        Ref::Null
    } else if value & 1 != 0 {
        Ref::I31(((value >> 1) & 0x7FFF_FFFF) as u32)
    } else {
        Ref::Object((value >> 1) as usize - 1)
    }
}

/// A struct or array allocation.
///
/// Field slots are 128-bit so v128 fields fit; packed i8/i16 fields store
/// their truncated bits and widen on access. The defining instance id is
/// kept alongside the type index so casts can walk that module's declared
/// subtype chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapObject {
    /// Instance whose type section defines this object's type.
    pub instance: usize,
    /// Concrete type index within that instance.
    pub type_idx: TypeIdx,
    /// Whether this is an array (length-carrying) allocation.
    pub is_array: bool,
    /// Field or element slots.
    pub slots: Box<[u128]>,
}

/// The GC heap: a free-listed object arena.
#[derive(Debug, Default)]
pub struct GcHeap {
    objects: Vec<Option<HeapObject>>,
    free: Vec<HeapIdx>,
    live: usize,
    since_collect: usize,
}

impl GcHeap {
    /// Empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live objects.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Whether an allocation is due for a collection check first.
    pub fn wants_collect(&self) -> bool {
        self.since_collect >= COLLECT_INTERVAL
    }

    /// Allocate an object and return its encoded reference.
    pub fn alloc(&mut self, obj: HeapObject) -> u64 {
        self.since_collect += 1;
        self.live += 1;
        let idx = match self.free.pop() {
            Some(idx) => {
                self.objects[idx] = Some(obj);
                idx
            }
            None => {
                self.objects.push(Some(obj));
                self.objects.len() - 1
            }
        };
        encode_ref(idx)
    }

    /// Shared access to an object.
    pub fn get(&self, idx: HeapIdx) -> Option<&HeapObject> {
        self.objects.get(idx).and_then(Option::as_ref)
    }

    /// Mutable access to an object.
    pub fn get_mut(&mut self, idx: HeapIdx) -> Option<&mut HeapObject> {
        self.objects.get_mut(idx).and_then(Option::as_mut)
    }

    /// Conservative mark-sweep over the given root slots. Slot values that
    /// do not decode to a live index are ignored; object slots are traced
    /// transitively.
    pub fn collect(&mut self, roots: impl Iterator<Item = u64>) {
        self.since_collect = 0;
        let mut marks = vec![false; self.objects.len()];
        let mut work: Vec<HeapIdx> = Vec::new();

        let mut consider = |value: u64, marks: &mut Vec<bool>, work: &mut Vec<HeapIdx>| {
            if let Ref::Object(idx) = decode_ref(value) {
                if idx < marks.len() && !marks[idx] {
                    marks[idx] = true;
                    work.push(idx);
                }
            }
        };

        for root in roots {
            consider(root, &mut marks, &mut work);
        }
        while let Some(idx) = work.pop() {
            let slots = match &self.objects[idx] {
                Some(obj) => obj.slots.clone(),
                None => continue,
            };
            for slot in slots.iter() {
                consider(*slot as u64, &mut marks, &mut work);
            }
        }

        for (idx, slot) in self.objects.iter_mut().enumerate() {
            if slot.is_some() && !marks[idx] {
                *slot = None;
                self.free.push(idx);
                self.live -= 1;
            }
        }
    }

    /// Drop everything; used by `Vm::reset` owners that also reset their
    /// store.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.free.clear();
        self.live = 0;
        self.since_collect = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(slots: &[u128]) -> HeapObject {
        HeapObject {
            instance: 0,
            type_idx: 0,
            is_array: false,
            slots: slots.into(),
        }
    }

    #[test]
    fn encoding_round_trips() {
        assert_eq!(decode_ref(0), Ref::Null);
        assert_eq!(decode_ref(encode_i31(77)), Ref::I31(77));
        assert_eq!(decode_ref(encode_ref(3)), Ref::Object(3));
    }

    #[test]
    fn collect_frees_unreachable_and_traces_slots() {
        let mut heap = GcHeap::new();
        let a = heap.alloc(obj(&[]));
        let b = heap.alloc(obj(&[a as u128]));
        let _c = heap.alloc(obj(&[]));
        assert_eq!(heap.live(), 3);

        // Root only b: a survives through b's slot, c is swept.
        heap.collect([b].into_iter());
        assert_eq!(heap.live(), 2);

        // Freed slots are reused.
        let d = heap.alloc(obj(&[]));
        assert_eq!(heap.live(), 3);
        assert_ne!(d, 0);
    }
}
