//! Store and instance model consumed by the execution core.
//!
//! Decoding, validation, and instantiation live outside this crate; the
//! store is populated by direct construction (the embedder or the test
//! helpers play the instantiator). Addresses are plain indices into the
//! store-level object vectors; instances map their module-local index
//! spaces onto those addresses.

use std::rc::Rc;
use std::sync::Arc;

use coral_asm::TrapKind;
use coral_types::{FieldType, FuncType, Limits, RefType, TypeIdx, ValType};
use hashbrown::HashMap;

use crate::error::{ExecResult, VmError};
use crate::heap::GcHeap;
use crate::interpreter::branch::BranchTable;
use crate::interpreter::jit::JitCode;
use crate::interpreter::predecode::IrBody;
use crate::interpreter::regir::RegIrBody;
use crate::interpreter::Vm;
use crate::memory::MemoryInstance;

/// Store-level function address.
pub type FuncAddr = usize;
/// Store-level memory address.
pub type MemAddr = usize;
/// Store-level table address.
pub type TableAddr = usize;
/// Store-level global address.
pub type GlobalAddr = usize;
/// Store-level tag address.
pub type TagAddr = usize;
/// Store-level instance id.
pub type InstanceId = usize;

/// A type-section entry: a composite type with optional declared supertype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubType {
    /// Whether the type is final (no subtypes may declare it as super).
    pub is_final: bool,
    /// Declared supertype, if any.
    pub supertype: Option<TypeIdx>,
    /// The composite shape.
    pub composite: CompositeType,
}

impl SubType {
    /// Final type with no supertype.
    pub fn final_type(composite: CompositeType) -> Self {
        Self {
            is_final: true,
            supertype: None,
            composite,
        }
    }
}

/// Composite shape of a type-section entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositeType {
    /// Function signature.
    Func(FuncType),
    /// Struct shape.
    Struct(StructType),
    /// Array shape.
    Array(ArrayType),
}

impl CompositeType {
    /// The function signature, if this is a func type.
    pub fn as_func(&self) -> Option<&FuncType> {
        match self {
            CompositeType::Func(ty) => Some(ty),
            _ => None,
        }
    }

    /// The struct shape, if this is a struct type.
    pub fn as_struct(&self) -> Option<&StructType> {
        match self {
            CompositeType::Struct(ty) => Some(ty),
            _ => None,
        }
    }

    /// The array shape, if this is an array type.
    pub fn as_array(&self) -> Option<&ArrayType> {
        match self {
            CompositeType::Array(ty) => Some(ty),
            _ => None,
        }
    }
}

/// Struct shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructType {
    /// Field types, in order.
    pub fields: Vec<FieldType>,
}

/// Array shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayType {
    /// Element type.
    pub elem: FieldType,
}

/// A passive or dropped data segment.
#[derive(Debug, Clone)]
pub struct DataSegment {
    /// Segment bytes.
    pub bytes: Arc<[u8]>,
    /// Whether `data.drop` has run. Zero-length accesses still succeed.
    pub dropped: bool,
}

impl DataSegment {
    /// New live segment.
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
            dropped: false,
        }
    }

    /// The readable bytes: empty once dropped.
    pub fn contents(&self) -> &[u8] {
        if self.dropped {
            &[]
        } else {
            &self.bytes
        }
    }
}

/// A passive or dropped element segment holding encoded references.
#[derive(Debug, Clone)]
pub struct ElemSegment {
    /// Encoded reference values (function addresses + 1, or 0 for null).
    pub items: Vec<u64>,
    /// Whether `elem.drop` has run.
    pub dropped: bool,
}

impl ElemSegment {
    /// New live segment from encoded references.
    pub fn new(items: Vec<u64>) -> Self {
        Self {
            items,
            dropped: false,
        }
    }

    /// The readable items: empty once dropped.
    pub fn contents(&self) -> &[u64] {
        if self.dropped {
            &[]
        } else {
            &self.items
        }
    }
}

/// One table.
#[derive(Debug, Clone)]
pub struct TableInstance {
    /// Element reference type.
    pub ty: RefType,
    limits: Limits,
    elems: Vec<u64>,
}

impl TableInstance {
    /// New table filled with null references.
    pub fn new(ty: RefType, limits: Limits) -> Self {
        Self {
            ty,
            limits,
            elems: vec![0; usize::try_from(limits.min).unwrap_or(usize::MAX)],
        }
    }

    /// Current element count.
    pub fn size(&self) -> u64 {
        self.elems.len() as u64
    }

    /// Read an element.
    pub fn get(&self, idx: u64) -> Result<u64, TrapKind> {
        self.elems
            .get(usize::try_from(idx).map_err(|_| TrapKind::OutOfBoundsTableAccess)?)
            .copied()
            .ok_or(TrapKind::OutOfBoundsTableAccess)
    }

    /// Write an element.
    pub fn set(&mut self, idx: u64, value: u64) -> Result<(), TrapKind> {
        let slot = self
            .elems
            .get_mut(usize::try_from(idx).map_err(|_| TrapKind::OutOfBoundsTableAccess)?)
            .ok_or(TrapKind::OutOfBoundsTableAccess)?;
        *slot = value;
        Ok(())
    }

    /// Grow by `delta` elements initialized to `init`. Returns the previous
    /// size, or -1 encoded as `u64::MAX`-free `None` on failure.
    pub fn grow(&mut self, delta: u64, init: u64) -> Option<u64> {
        let old = self.size();
        let new = old.checked_add(delta)?;
        if let Some(max) = self.limits.max {
            if new > max {
                return None;
            }
        }
        let new_len = usize::try_from(new).ok()?;
        self.elems.resize(new_len, init);
        Some(old)
    }

    /// `table.fill`: bounds first, then write.
    pub fn fill(&mut self, dst: u64, value: u64, len: u64) -> Result<(), TrapKind> {
        let end = dst
            .checked_add(len)
            .ok_or(TrapKind::OutOfBoundsTableAccess)?;
        if end > self.size() {
            return Err(TrapKind::OutOfBoundsTableAccess);
        }
        self.elems[dst as usize..end as usize].fill(value);
        Ok(())
    }

    /// Raw elements, for root scans and segment init.
    pub fn elems(&self) -> &[u64] {
        &self.elems
    }

    /// Mutable raw elements.
    pub fn elems_mut(&mut self) -> &mut [u64] {
        &mut self.elems
    }
}

/// One global.
#[derive(Debug, Clone, Copy)]
pub struct GlobalInstance {
    /// Value type.
    pub ty: ValType,
    /// Whether `global.set` is permitted.
    pub mutable: bool,
    /// Current value, in slot encoding.
    pub value: u128,
}

impl GlobalInstance {
    /// New global.
    pub const fn new(ty: ValType, mutable: bool, value: u128) -> Self {
        Self { ty, mutable, value }
    }
}

/// One exception tag. Identity is the store address.
#[derive(Debug, Clone)]
pub struct TagInstance {
    /// Tag signature; results are always empty.
    pub ty: FuncType,
}

/// Host-function callback. Exchanges values with the VM through the operand
/// surface (`push_operand` / `pop_*` / `get_memory`); must not re-enter the
/// VM.
pub type HostFn = dyn Fn(&mut Vm, &mut Store) -> ExecResult<()>;

/// A host function.
#[derive(Clone)]
pub struct HostFunc {
    /// The callback.
    pub callback: Rc<HostFn>,
}

impl core::fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostFunc").finish_non_exhaustive()
    }
}

/// Per-function lazy tier caches. Compute-once; failures latch.
#[derive(Debug, Default)]
pub struct TierState {
    /// Calls so far; drives hot-call promotion.
    pub call_count: u32,
    /// Branch-target side table.
    pub branch: Option<Arc<BranchTable>>,
    /// Latched branch-table failure: fall back to on-demand scanning.
    pub branch_failed: bool,
    /// Pre-decoded IR.
    pub predecoded: Option<Arc<IrBody>>,
    /// Latched pre-decode refusal or failure.
    pub predecode_failed: bool,
    /// Register IR.
    pub regir: Option<Arc<RegIrBody>>,
    /// Latched conversion refusal or failure.
    pub regir_failed: bool,
    /// Native code.
    pub jit: Option<Arc<JitCode>>,
    /// Latched compilation bail-out.
    pub jit_failed: bool,
}

/// A Wasm-defined function.
#[derive(Debug)]
pub struct WasmFunc {
    /// Owning instance.
    pub instance: InstanceId,
    /// Declared type index within that instance.
    pub type_idx: TypeIdx,
    /// Declared locals (parameters excluded).
    pub locals: Vec<ValType>,
    /// Raw body bytecode, ending with `end`.
    pub body: Arc<[u8]>,
    /// Lazy tier caches.
    pub tiers: TierState,
}

/// Function representation.
#[derive(Debug)]
pub enum FuncKind {
    /// Wasm bytecode function.
    Wasm(WasmFunc),
    /// Host callback.
    Host(HostFunc),
}

/// One function in the store.
#[derive(Debug)]
pub struct Function {
    /// Resolved signature.
    pub ty: FuncType,
    /// Representation.
    pub kind: FuncKind,
}

impl Function {
    /// New Wasm function.
    pub fn wasm(
        ty: FuncType,
        instance: InstanceId,
        type_idx: TypeIdx,
        locals: Vec<ValType>,
        body: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            ty,
            kind: FuncKind::Wasm(WasmFunc {
                instance,
                type_idx,
                locals,
                body: body.into(),
                tiers: TierState::default(),
            }),
        }
    }

    /// New host function.
    pub fn host(
        ty: FuncType,
        callback: impl Fn(&mut Vm, &mut Store) -> ExecResult<()> + 'static,
    ) -> Self {
        Self {
            ty,
            kind: FuncKind::Host(HostFunc {
                callback: Rc::new(callback),
            }),
        }
    }

    /// The wasm representation, if any.
    pub fn as_wasm(&self) -> Option<&WasmFunc> {
        match &self.kind {
            FuncKind::Wasm(w) => Some(w),
            FuncKind::Host(_) => None,
        }
    }

    /// Mutable wasm representation, if any.
    pub fn as_wasm_mut(&mut self) -> Option<&mut WasmFunc> {
        match &mut self.kind {
            FuncKind::Wasm(w) => Some(w),
            FuncKind::Host(_) => None,
        }
    }
}

/// An exported definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Export {
    /// Function, by instance-local index.
    Func(u32),
    /// Table.
    Table(u32),
    /// Memory.
    Memory(u32),
    /// Global.
    Global(u32),
    /// Tag.
    Tag(u32),
}

/// One instantiated module: the mapping from module-local index spaces to
/// store addresses, plus the module's type section and passive segments.
#[derive(Debug, Default)]
pub struct Instance {
    /// Type section.
    pub types: Vec<SubType>,
    /// Function address space.
    pub funcs: Vec<FuncAddr>,
    /// Memory address space.
    pub memories: Vec<MemAddr>,
    /// Table address space.
    pub tables: Vec<TableAddr>,
    /// Global address space.
    pub globals: Vec<GlobalAddr>,
    /// Tag address space.
    pub tags: Vec<TagAddr>,
    /// Data segments.
    pub data: Vec<DataSegment>,
    /// Element segments.
    pub elems: Vec<ElemSegment>,
    /// Named exports.
    pub exports: HashMap<String, Export>,
}

impl Instance {
    /// Resolve a module-local function type index to its signature.
    pub fn func_type(&self, type_idx: TypeIdx) -> ExecResult<&FuncType> {
        self.types
            .get(type_idx as usize)
            .and_then(|sub| sub.composite.as_func())
            .ok_or(VmError::TypeIndexOutOfBounds(type_idx as usize))
    }
}

/// The store: all runtime objects shared by the instances that reference
/// them. Mutated only while the mutating instance holds the CPU.
#[derive(Debug, Default)]
pub struct Store {
    /// Functions.
    pub funcs: Vec<Function>,
    /// Linear memories.
    pub memories: Vec<MemoryInstance>,
    /// Tables.
    pub tables: Vec<TableInstance>,
    /// Globals.
    pub globals: Vec<GlobalInstance>,
    /// Exception tags.
    pub tags: Vec<TagInstance>,
    /// Instances.
    pub instances: Vec<Instance>,
    /// GC heap.
    pub heap: GcHeap,
}

impl Store {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an empty instance, returning its id.
    pub fn add_instance(&mut self) -> InstanceId {
        self.instances.push(Instance::default());
        self.instances.len() - 1
    }

    /// Add a function, returning its address.
    pub fn add_function(&mut self, func: Function) -> FuncAddr {
        self.funcs.push(func);
        self.funcs.len() - 1
    }

    /// Add a memory, returning its address.
    pub fn add_memory(&mut self, mem: MemoryInstance) -> MemAddr {
        self.memories.push(mem);
        self.memories.len() - 1
    }

    /// Add a table, returning its address.
    pub fn add_table(&mut self, table: TableInstance) -> TableAddr {
        self.tables.push(table);
        self.tables.len() - 1
    }

    /// Add a global, returning its address.
    pub fn add_global(&mut self, global: GlobalInstance) -> GlobalAddr {
        self.globals.push(global);
        self.globals.len() - 1
    }

    /// Add a tag, returning its address.
    pub fn add_tag(&mut self, tag: TagInstance) -> TagAddr {
        self.tags.push(tag);
        self.tags.len() - 1
    }

    /// The instance with the given id.
    pub fn instance(&self, id: InstanceId) -> ExecResult<&Instance> {
        self.instances.get(id).ok_or(VmError::UndefinedInstance(id))
    }

    /// Mutable instance access.
    pub fn instance_mut(&mut self, id: InstanceId) -> ExecResult<&mut Instance> {
        self.instances
            .get_mut(id)
            .ok_or(VmError::UndefinedInstance(id))
    }

    /// The function at a store address.
    pub fn func(&self, addr: FuncAddr) -> ExecResult<&Function> {
        self.funcs
            .get(addr)
            .ok_or(VmError::FunctionIndexOutOfBounds(addr))
    }

    /// Resolve an instance-local function index to a store address.
    pub fn func_addr(&self, inst: InstanceId, idx: u32) -> ExecResult<FuncAddr> {
        self.instance(inst)?
            .funcs
            .get(idx as usize)
            .copied()
            .ok_or(VmError::FunctionIndexOutOfBounds(idx as usize))
    }

    /// Resolve an instance-local memory index to a store address.
    pub fn mem_addr(&self, inst: InstanceId, idx: u32) -> ExecResult<MemAddr> {
        self.instance(inst)?
            .memories
            .get(idx as usize)
            .copied()
            .ok_or(VmError::MemoryIndexOutOfBounds(idx as usize))
    }

    /// Resolve an instance-local table index to a store address.
    pub fn table_addr(&self, inst: InstanceId, idx: u32) -> ExecResult<TableAddr> {
        self.instance(inst)?
            .tables
            .get(idx as usize)
            .copied()
            .ok_or(VmError::TableIndexOutOfBounds(idx as usize))
    }

    /// Resolve an instance-local global index to a store address.
    pub fn global_addr(&self, inst: InstanceId, idx: u32) -> ExecResult<GlobalAddr> {
        self.instance(inst)?
            .globals
            .get(idx as usize)
            .copied()
            .ok_or(VmError::GlobalIndexOutOfBounds(idx as usize))
    }

    /// Resolve an instance-local tag index to a store address.
    pub fn tag_addr(&self, inst: InstanceId, idx: u32) -> ExecResult<TagAddr> {
        self.instance(inst)?
            .tags
            .get(idx as usize)
            .copied()
            .ok_or(VmError::TagIndexOutOfBounds(idx as usize))
    }

    /// Memory at a store address.
    pub fn memory(&self, addr: MemAddr) -> ExecResult<&MemoryInstance> {
        self.memories
            .get(addr)
            .ok_or(VmError::MemoryIndexOutOfBounds(addr))
    }

    /// Mutable memory at a store address.
    pub fn memory_mut(&mut self, addr: MemAddr) -> ExecResult<&mut MemoryInstance> {
        self.memories
            .get_mut(addr)
            .ok_or(VmError::MemoryIndexOutOfBounds(addr))
    }

    /// Total linear-memory bytes across the store; input to the memory
    /// ceiling check.
    pub fn total_memory_bytes(&self) -> u64 {
        self.memories.iter().map(|m| m.size_bytes() as u64).sum()
    }
}
