//! [`Vm`] implementation: the operand/frame/label state shared by every
//! execution tier, plus the embedder and host-function surfaces.

use coral_types::{Word, V128};

use crate::consts::*;
use crate::error::{ExecResult, VmError};
use crate::memory::MemoryInstance;
use crate::profiler::Profile;
use crate::state::{Frame, Label, PendingException};
use crate::store::{FuncAddr, Store};

pub(crate) mod alu;
pub mod branch;
pub mod exception;
pub mod executors;
pub mod jit;
pub mod predecode;
pub mod regir;

/// Pending tail call recorded by `return_call*`; consumed by the call
/// trampoline after the current frame returns.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TailCall {
    /// Callee store address.
    pub func: FuncAddr,
    /// Collected arguments, in operand-slot encoding.
    pub args: [u128; TAIL_CALL_SLOTS],
    /// Occupied argument slots.
    pub len: usize,
}

/// The virtual machine: fixed-capacity operand/frame/label stacks, the
/// register-stack arena, and the per-invocation bookkeeping every tier
/// shares.
///
/// The store is deliberately not owned: each entry point borrows it for the
/// duration of the call, which keeps cross-instance sharing possible while
/// the stacks stay exclusive to this VM.
#[derive(Debug)]
pub struct Vm {
    ops: Vec<u128>,
    frames: Vec<Frame>,
    labels: Vec<Label>,
    regs: Vec<u64>,
    reg_top: usize,
    current_instance: usize,
    pending_exception: Option<PendingException>,
    exn_snapshots: Vec<PendingException>,
    tail_call: Option<TailCall>,
    fuel: Option<u64>,
    memory_ceiling: Option<u64>,
    profile: Option<Profile>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// New VM with the default stack capacities.
    pub fn new() -> Self {
        Self {
            ops: Vec::with_capacity(OPERAND_STACK_CAPACITY),
            frames: Vec::with_capacity(FRAME_STACK_CAPACITY),
            labels: Vec::with_capacity(LABEL_STACK_CAPACITY),
            regs: vec![0; REG_STACK_CAPACITY],
            reg_top: 0,
            current_instance: 0,
            pending_exception: None,
            exn_snapshots: Vec::new(),
            tail_call: None,
            fuel: None,
            memory_ceiling: None,
            profile: None,
        }
    }

    /// Reset all execution state, keeping the large allocations for reuse.
    pub fn reset(&mut self) {
        self.ops.clear();
        self.frames.clear();
        self.labels.clear();
        self.reg_top = 0;
        self.current_instance = 0;
        self.pending_exception = None;
        self.exn_snapshots.clear();
        self.tail_call = None;
    }

    /// Bound the next invocations to `fuel` instructions, or lift the bound
    /// with `None`. While fuel is set, tier promotion to native code is
    /// disabled so accounting stays exact.
    pub fn set_fuel(&mut self, fuel: Option<u64>) {
        self.fuel = fuel;
    }

    /// Remaining fuel, if metering is active.
    pub fn fuel(&self) -> Option<u64> {
        self.fuel
    }

    /// Cap the total linear-memory bytes `memory.grow` may reach.
    pub fn set_memory_ceiling(&mut self, bytes: Option<u64>) {
        self.memory_ceiling = bytes;
    }

    /// The configured memory ceiling.
    pub fn memory_ceiling(&self) -> Option<u64> {
        self.memory_ceiling
    }

    /// Attach an opcode profile. While attached, every executed opcode is
    /// counted and tier promotion does not occur, so counts reflect
    /// baseline execution.
    pub fn attach_profile(&mut self) {
        self.profile = Some(Profile::default());
    }

    /// Detach and return the collected profile.
    pub fn take_profile(&mut self) -> Option<Profile> {
        self.profile.take()
    }

    /// The attached profile, if any.
    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub(crate) fn profile_mut(&mut self) -> Option<&mut Profile> {
        self.profile.as_mut()
    }

    /// Whether tier promotion is currently allowed.
    pub(crate) fn promotion_enabled(&self) -> bool {
        self.profile.is_none() && self.fuel.is_none()
    }

    /// Instance addressed by host functions during the current call.
    pub fn current_instance(&self) -> usize {
        self.current_instance
    }

    pub(crate) fn set_current_instance(&mut self, id: usize) {
        self.current_instance = id;
    }

    /// Charge `n` instructions of fuel.
    #[inline]
    pub(crate) fn charge_fuel(&mut self, n: u64) -> ExecResult<()> {
        if let Some(fuel) = &mut self.fuel {
            if *fuel < n {
                *fuel = 0;
                return Err(VmError::FuelExhausted);
            }
            *fuel -= n;
        }
        Ok(())
    }

    // --- operand stack ------------------------------------------------

    /// Operand stack height, in slots.
    pub fn sp(&self) -> usize {
        self.ops.len()
    }

    /// Push a raw slot.
    #[inline]
    pub fn push(&mut self, value: u128) -> ExecResult<()> {
        if self.ops.len() == OPERAND_STACK_CAPACITY {
            return Err(VmError::StackOverflow);
        }
        self.ops.push(value);
        Ok(())
    }

    /// Pop a raw slot.
    #[inline]
    pub fn pop(&mut self) -> ExecResult<u128> {
        self.ops.pop().ok_or(VmError::StackUnderflow)
    }

    /// Slot `n` below the top without popping.
    pub fn peek(&self, n: usize) -> ExecResult<u128> {
        let len = self.ops.len();
        if n >= len {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.ops[len - 1 - n])
    }

    /// Push a 64-bit scalar (also the encoding of references).
    #[inline]
    pub fn push_u64(&mut self, value: u64) -> ExecResult<()> {
        self.push(value as u128)
    }

    /// Pop a 64-bit scalar.
    #[inline]
    pub fn pop_u64(&mut self) -> ExecResult<u64> {
        Ok(self.pop()? as u64)
    }

    /// Push a 32-bit scalar, zero-extended into the slot.
    #[inline]
    pub fn push_u32(&mut self, value: u32) -> ExecResult<()> {
        self.push(value as u128)
    }

    /// Pop a 32-bit scalar from the low bits.
    #[inline]
    pub fn pop_u32(&mut self) -> ExecResult<u32> {
        Ok(self.pop()? as u32)
    }

    /// Push a signed 32-bit value.
    #[inline]
    pub fn push_i32(&mut self, value: i32) -> ExecResult<()> {
        self.push_u32(value as u32)
    }

    /// Pop a signed 32-bit value.
    #[inline]
    pub fn pop_i32(&mut self) -> ExecResult<i32> {
        Ok(self.pop_u32()? as i32)
    }

    /// Push a signed 64-bit value.
    #[inline]
    pub fn push_i64(&mut self, value: i64) -> ExecResult<()> {
        self.push_u64(value as u64)
    }

    /// Pop a signed 64-bit value.
    #[inline]
    pub fn pop_i64(&mut self) -> ExecResult<i64> {
        Ok(self.pop_u64()? as i64)
    }

    /// Push an f32 as its bit pattern.
    #[inline]
    pub fn push_f32(&mut self, value: f32) -> ExecResult<()> {
        self.push_u32(value.to_bits())
    }

    /// Pop an f32 from its bit pattern.
    #[inline]
    pub fn pop_f32(&mut self) -> ExecResult<f32> {
        Ok(f32::from_bits(self.pop_u32()?))
    }

    /// Push an f64 as its bit pattern.
    #[inline]
    pub fn push_f64(&mut self, value: f64) -> ExecResult<()> {
        self.push_u64(value.to_bits())
    }

    /// Pop an f64 from its bit pattern.
    #[inline]
    pub fn pop_f64(&mut self) -> ExecResult<f64> {
        Ok(f64::from_bits(self.pop_u64()?))
    }

    /// Push a v128; occupies the full slot.
    #[inline]
    pub fn push_v128(&mut self, value: V128) -> ExecResult<()> {
        self.push(value.to_bits())
    }

    /// Pop a v128.
    #[inline]
    pub fn pop_v128(&mut self) -> ExecResult<V128> {
        Ok(V128::from_bits(self.pop()?))
    }

    /// Host surface: push one 64-bit operand slot.
    pub fn push_operand(&mut self, value: Word) -> ExecResult<()> {
        self.push_u64(value)
    }

    /// Host surface: pop one 64-bit operand slot.
    pub fn pop_operand(&mut self) -> ExecResult<Word> {
        self.pop_u64()
    }

    /// Host surface: the instance-local memory `index` of the current call.
    pub fn get_memory<'s>(
        &self,
        store: &'s mut Store,
        index: u32,
    ) -> ExecResult<&'s mut MemoryInstance> {
        let addr = store.mem_addr(self.current_instance, index)?;
        store.memory_mut(addr)
    }

    /// Read slot `at` (absolute index), for local access.
    #[inline]
    pub(crate) fn slot(&self, at: usize) -> u128 {
        self.ops[at]
    }

    /// Write slot `at` (absolute index).
    #[inline]
    pub(crate) fn set_slot(&mut self, at: usize, value: u128) {
        self.ops[at] = value;
    }

    /// Unwind the operand stack to `height`.
    pub(crate) fn truncate_ops(&mut self, height: usize) {
        self.ops.truncate(height);
    }

    /// Copy the top `arity` slots down to start at `base` and drop
    /// everything above them. This is the return/branch result shuffle.
    pub(crate) fn shuffle_down(&mut self, base: usize, arity: usize) -> ExecResult<()> {
        let len = self.ops.len();
        if arity > len || base > len - arity {
            return Err(VmError::StackUnderflow);
        }
        let src = len - arity;
        self.ops.copy_within(src..len, base);
        self.ops.truncate(base + arity);
        Ok(())
    }

    /// All operand slots, low to high; GC root scan input.
    pub(crate) fn op_slots(&self) -> &[u128] {
        &self.ops
    }

    // --- frame stack --------------------------------------------------

    /// Current frame-stack depth.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn push_frame(&mut self, frame: Frame) -> ExecResult<()> {
        if self.frames.len() == FRAME_STACK_CAPACITY {
            return Err(VmError::StackOverflow);
        }
        self.frames.push(frame);
        Ok(())
    }

    pub(crate) fn pop_frame(&mut self) -> ExecResult<Frame> {
        self.frames.pop().ok_or(VmError::StackUnderflow)
    }

    pub(crate) fn current_frame(&self) -> ExecResult<&Frame> {
        self.frames.last().ok_or(VmError::StackUnderflow)
    }

    // --- label stack --------------------------------------------------

    /// Current label-stack depth.
    pub fn label_depth(&self) -> usize {
        self.labels.len()
    }

    pub(crate) fn push_label(&mut self, label: Label) -> ExecResult<()> {
        if self.labels.len() == LABEL_STACK_CAPACITY {
            return Err(VmError::StackOverflow);
        }
        self.labels.push(label);
        Ok(())
    }

    pub(crate) fn pop_label(&mut self) -> ExecResult<Label> {
        self.labels.pop().ok_or(VmError::StackUnderflow)
    }

    pub(crate) fn label(&self, idx: usize) -> ExecResult<&Label> {
        self.labels.get(idx).ok_or(VmError::StackUnderflow)
    }

    pub(crate) fn truncate_labels(&mut self, height: usize) {
        self.labels.truncate(height);
    }

    // --- register arena -----------------------------------------------

    /// Reserve `count` register slots, zeroed, returning the base index.
    pub(crate) fn reserve_regs(&mut self, count: usize) -> ExecResult<usize> {
        let base = self.reg_top;
        let top = base
            .checked_add(count)
            .ok_or(VmError::OutOfMemory("register stack"))?;
        if top > self.regs.len() {
            return Err(VmError::OutOfMemory("register stack"));
        }
        self.regs[base..top].fill(0);
        self.reg_top = top;
        Ok(base)
    }

    /// Release a reservation made by [`Self::reserve_regs`].
    pub(crate) fn release_regs(&mut self, base: usize) {
        self.reg_top = base;
    }

    pub(crate) fn regs(&self) -> &[u64] {
        &self.regs
    }

    pub(crate) fn regs_mut(&mut self) -> &mut [u64] {
        &mut self.regs
    }

    pub(crate) fn reg_top(&self) -> usize {
        self.reg_top
    }

    // --- exceptions and tail calls --------------------------------------

    pub(crate) fn set_pending_exception(&mut self, exn: PendingException) {
        self.pending_exception = Some(exn);
    }

    pub(crate) fn take_pending_exception(&mut self) -> Option<PendingException> {
        self.pending_exception.take()
    }

    /// The buffered exception of the last uncaught `throw`, if any.
    pub fn pending_exception(&self) -> Option<&PendingException> {
        self.pending_exception.as_ref()
    }

    /// Snapshot the pending exception for an `exnref`; returns the handle.
    pub(crate) fn snapshot_exception(&mut self, exn: PendingException) -> u64 {
        self.exn_snapshots.push(exn);
        self.exn_snapshots.len() as u64
    }

    /// Resolve an `exnref` handle.
    pub(crate) fn exception_snapshot(&self, handle: u64) -> Option<PendingException> {
        let idx = usize::try_from(handle.checked_sub(1)?).ok()?;
        self.exn_snapshots.get(idx).copied()
    }

    pub(crate) fn set_tail_call(&mut self, tc: TailCall) {
        self.tail_call = Some(tc);
    }

    pub(crate) fn tail_call_pending(&self) -> bool {
        self.tail_call.is_some()
    }

    pub(crate) fn take_tail_call(&mut self) -> Option<TailCall> {
        self.tail_call.take()
    }
}
