//! Test scaffolding: a raw-bytecode assembler and a direct-construction
//! module builder standing in for instantiation.

use coral_asm::{op, AtomicOp, GcOp, MiscOp, SimdOp};
use coral_types::{FuncType, HeapType, Limits, RefType, ValType};

use crate::error::ExecResult;
use crate::interpreter::Vm;
use crate::memory::MemoryInstance;
use crate::store::{
    CompositeType, DataSegment, ElemSegment, Export, Function, GlobalInstance, Store,
    SubType, TableInstance, TagInstance,
};

pub fn leb_u(mut v: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v != 0 {
            out.push(byte | 0x80);
        } else {
            out.push(byte);
            return out;
        }
    }
}

pub fn leb_i(mut v: i64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        let sign = byte & 0x40 != 0;
        if (v == 0 && !sign) || (v == -1 && sign) {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// Raw function-body assembler. `build` appends the terminating `end`.
#[derive(Default, Clone)]
pub struct FuncBody {
    bytes: Vec<u8>,
}

/// Empty block type.
pub const BT_EMPTY: u8 = 0x40;
/// `[] -> [i32]` block type.
pub const BT_I32: u8 = 0x7F;
impl FuncBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn op(mut self, opcode: u8) -> Self {
        self.bytes.push(opcode);
        self
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.bytes.extend(leb_u(u64::from(v)));
        self
    }

    pub fn i32_const(self, v: i32) -> Self {
        let mut s = self.op(op::I32_CONST);
        s.bytes.extend(leb_i(i64::from(v)));
        s
    }

    pub fn i64_const(self, v: i64) -> Self {
        let mut s = self.op(op::I64_CONST);
        s.bytes.extend(leb_i(v));
        s
    }

    pub fn f32_const(self, v: f32) -> Self {
        let mut s = self.op(op::F32_CONST);
        s.bytes.extend(v.to_bits().to_le_bytes());
        s
    }

    pub fn f64_const(self, v: f64) -> Self {
        let mut s = self.op(op::F64_CONST);
        s.bytes.extend(v.to_bits().to_le_bytes());
        s
    }

    pub fn local_get(self, i: u32) -> Self {
        self.op(op::LOCAL_GET).u32(i)
    }

    pub fn local_set(self, i: u32) -> Self {
        self.op(op::LOCAL_SET).u32(i)
    }

    pub fn local_tee(self, i: u32) -> Self {
        self.op(op::LOCAL_TEE).u32(i)
    }

    pub fn global_get(self, i: u32) -> Self {
        self.op(op::GLOBAL_GET).u32(i)
    }

    pub fn global_set(self, i: u32) -> Self {
        self.op(op::GLOBAL_SET).u32(i)
    }

    pub fn block(self, bt: u8) -> Self {
        self.op(op::BLOCK).raw(&[bt])
    }

    /// Block with a type-section signature.
    pub fn block_t(self, type_idx: u32) -> Self {
        let mut s = self.op(op::BLOCK);
        s.bytes.extend(leb_i(i64::from(type_idx)));
        s
    }

    pub fn loop_(self, bt: u8) -> Self {
        self.op(op::LOOP).raw(&[bt])
    }

    pub fn if_(self, bt: u8) -> Self {
        self.op(op::IF).raw(&[bt])
    }

    pub fn else_(self) -> Self {
        self.op(op::ELSE)
    }

    pub fn end(self) -> Self {
        self.op(op::END)
    }

    pub fn br(self, depth: u32) -> Self {
        self.op(op::BR).u32(depth)
    }

    pub fn br_if(self, depth: u32) -> Self {
        self.op(op::BR_IF).u32(depth)
    }

    pub fn br_table(self, depths: &[u32], default: u32) -> Self {
        let mut s = self.op(op::BR_TABLE).u32(depths.len() as u32);
        for d in depths {
            s = s.u32(*d);
        }
        s.u32(default)
    }

    pub fn call(self, f: u32) -> Self {
        self.op(op::CALL).u32(f)
    }

    pub fn call_indirect(self, type_idx: u32, table: u32) -> Self {
        self.op(op::CALL_INDIRECT).u32(type_idx).u32(table)
    }

    pub fn return_call(self, f: u32) -> Self {
        self.op(op::RETURN_CALL).u32(f)
    }

    pub fn load(self, opcode: u8, align: u32, offset: u64) -> Self {
        let mut s = self.op(opcode).u32(align);
        s.bytes.extend(leb_u(offset));
        s
    }

    /// Memarg with an explicit memory index (multi-memory bit 6).
    pub fn load_mem(self, opcode: u8, align: u32, memory: u32, offset: u64) -> Self {
        let mut s = self.op(opcode).u32(align | 0x40).u32(memory);
        s.bytes.extend(leb_u(offset));
        s
    }

    pub fn memory_size(self, mem: u32) -> Self {
        self.op(op::MEMORY_SIZE).u32(mem)
    }

    pub fn memory_grow(self, mem: u32) -> Self {
        self.op(op::MEMORY_GROW).u32(mem)
    }

    pub fn misc(self, sub: MiscOp) -> Self {
        self.op(op::MISC_PREFIX).u32(sub as u32)
    }

    pub fn simd(self, sub: SimdOp) -> Self {
        self.op(op::SIMD_PREFIX).u32(sub as u32)
    }

    pub fn atomic(self, sub: AtomicOp) -> Self {
        self.op(op::ATOMIC_PREFIX).u32(sub as u32)
    }

    pub fn gc(self, sub: GcOp) -> Self {
        self.op(op::GC_PREFIX).u32(sub as u32)
    }

    pub fn v128_const(self, bits: u128) -> Self {
        let mut s = self.simd(SimdOp::V128Const);
        s.bytes.extend(bits.to_le_bytes());
        s
    }

    pub fn throw(self, tag: u32) -> Self {
        self.op(op::THROW).u32(tag)
    }

    /// `try_table` header; clauses are `(kind, tag, label)` triples with
    /// `tag` ignored for the catch-all kinds.
    pub fn try_table(self, bt: u8, clauses: &[(u8, u32, u32)]) -> Self {
        let mut s = self.op(op::TRY_TABLE).raw(&[bt]).u32(clauses.len() as u32);
        for (kind, tag, label) in clauses {
            s = s.raw(&[*kind]);
            if *kind < 2 {
                s = s.u32(*tag);
            }
            s = s.u32(*label);
        }
        s
    }

    pub fn build(mut self) -> Vec<u8> {
        self.bytes.push(op::END);
        self.bytes
    }
}

/// A store with one instance under construction.
pub struct TestModule {
    pub store: Store,
    pub inst: usize,
}

impl TestModule {
    pub fn new() -> Self {
        let mut store = Store::new();
        let inst = store.add_instance();
        Self { store, inst }
    }

    pub fn add_type(&mut self, params: &[ValType], results: &[ValType]) -> u32 {
        let types = &mut self.store.instances[self.inst].types;
        types.push(SubType::final_type(CompositeType::Func(FuncType::new(
            params, results,
        ))));
        (types.len() - 1) as u32
    }

    pub fn push_type(&mut self, sub: SubType) -> u32 {
        let types = &mut self.store.instances[self.inst].types;
        types.push(sub);
        (types.len() - 1) as u32
    }

    pub fn add_func(
        &mut self,
        params: &[ValType],
        results: &[ValType],
        locals: &[ValType],
        body: Vec<u8>,
    ) -> u32 {
        let tidx = self.add_type(params, results);
        let ty = FuncType::new(params, results);
        let addr = self
            .store
            .add_function(Function::wasm(ty, self.inst, tidx, locals.to_vec(), body));
        let inst = &mut self.store.instances[self.inst];
        inst.funcs.push(addr);
        (inst.funcs.len() - 1) as u32
    }

    pub fn add_host(
        &mut self,
        params: &[ValType],
        results: &[ValType],
        f: impl Fn(&mut Vm, &mut Store) -> ExecResult<()> + 'static,
    ) -> u32 {
        let ty = FuncType::new(params, results);
        let addr = self.store.add_function(Function::host(ty, f));
        let inst = &mut self.store.instances[self.inst];
        inst.funcs.push(addr);
        (inst.funcs.len() - 1) as u32
    }

    pub fn export_func(&mut self, name: &str, idx: u32) {
        self.store.instances[self.inst]
            .exports
            .insert(name.to_string(), Export::Func(idx));
    }

    pub fn add_memory(&mut self, min: u64, max: Option<u64>) -> u32 {
        self.install_memory(MemoryInstance::new(Limits::new(min, max)))
    }

    pub fn add_shared_memory(&mut self, min: u64, max: Option<u64>) -> u32 {
        self.install_memory(MemoryInstance::shared(Limits::new(min, max)))
    }

    pub fn install_memory(&mut self, mem: MemoryInstance) -> u32 {
        let addr = self.store.add_memory(mem);
        let inst = &mut self.store.instances[self.inst];
        inst.memories.push(addr);
        (inst.memories.len() - 1) as u32
    }

    /// Table pre-filled with instance-local function references.
    pub fn add_table(&mut self, entries: &[Option<u32>]) -> u32 {
        let mut table = TableInstance::new(
            RefType::nullable(HeapType::Func),
            Limits::new(entries.len() as u64, None),
        );
        for (i, entry) in entries.iter().enumerate() {
            if let Some(f) = entry {
                let addr = self.store.instances[self.inst].funcs[*f as usize];
                table.set(i as u64, addr as u64 + 1).unwrap();
            }
        }
        let addr = self.store.add_table(table);
        let inst = &mut self.store.instances[self.inst];
        inst.tables.push(addr);
        (inst.tables.len() - 1) as u32
    }

    pub fn add_global(&mut self, ty: ValType, mutable: bool, value: u128) -> u32 {
        let addr = self.store.add_global(GlobalInstance::new(ty, mutable, value));
        let inst = &mut self.store.instances[self.inst];
        inst.globals.push(addr);
        (inst.globals.len() - 1) as u32
    }

    pub fn add_tag(&mut self, params: &[ValType]) -> u32 {
        let addr = self.store.add_tag(TagInstance {
            ty: FuncType::new(params, []),
        });
        let inst = &mut self.store.instances[self.inst];
        inst.tags.push(addr);
        (inst.tags.len() - 1) as u32
    }

    pub fn add_data(&mut self, bytes: &[u8]) -> u32 {
        let inst = &mut self.store.instances[self.inst];
        inst.data.push(DataSegment::new(bytes.to_vec()));
        (inst.data.len() - 1) as u32
    }

    pub fn add_elem(&mut self, funcs: &[Option<u32>]) -> u32 {
        let items: Vec<u64> = funcs
            .iter()
            .map(|f| match f {
                Some(i) => self.store.instances[self.inst].funcs[*i as usize] as u64 + 1,
                None => 0,
            })
            .collect();
        let inst = &mut self.store.instances[self.inst];
        inst.elems.push(ElemSegment::new(items));
        (inst.elems.len() - 1) as u32
    }

    /// Invoke by index, collecting `nresults` 64-bit result slots.
    pub fn invoke(
        &mut self,
        vm: &mut Vm,
        func: u32,
        args: &[u64],
        nresults: usize,
    ) -> ExecResult<Vec<u64>> {
        let mut results = vec![0u64; nresults];
        vm.invoke_by_index(&mut self.store, self.inst, func, args, &mut results)?;
        Ok(results)
    }

    /// Single-result convenience.
    pub fn call1(&mut self, vm: &mut Vm, func: u32, args: &[u64]) -> ExecResult<u64> {
        Ok(self.invoke(vm, func, args, 1)?[0])
    }

}
