//! Atomic ops under single-threaded semantics.

use coral_asm::{op, AtomicOp, TrapKind};
use coral_types::ValType;

use super::helpers::{FuncBody, TestModule};
use crate::error::VmError;
use crate::interpreter::Vm;

#[test]
fn rmw_add_returns_the_old_value() {
    let mut m = TestModule::new();
    m.add_memory(1, None);
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .i32_const(8)
            .local_get(0)
            .atomic(AtomicOp::I32AtomicRmwAdd)
            .load_memarg_tail(2, 0)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[5]).unwrap(), 0);
    assert_eq!(m.call1(&mut vm, f, &[7]).unwrap(), 5);
    assert_eq!(m.call1(&mut vm, f, &[0]).unwrap(), 12);
}

#[test]
fn cmpxchg_swaps_only_on_match() {
    let mut m = TestModule::new();
    m.add_memory(1, None);
    // cmpxchg(expected, replacement) at address 0.
    let f = m.add_func(
        &[ValType::I32, ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .i32_const(0)
            .local_get(0)
            .local_get(1)
            .atomic(AtomicOp::I32AtomicRmwCmpxchg)
            .load_memarg_tail(2, 0)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[0, 42]).unwrap(), 0); // stored 42
    assert_eq!(m.call1(&mut vm, f, &[0, 99]).unwrap(), 42); // mismatch, kept
    assert_eq!(m.call1(&mut vm, f, &[42, 7]).unwrap(), 42); // swapped to 7
}

#[test]
fn misaligned_atomic_traps() {
    let mut m = TestModule::new();
    m.add_memory(1, None);
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .local_get(0)
            .atomic(AtomicOp::I32AtomicLoad)
            .load_memarg_tail(2, 0)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[4]).unwrap(), 0);
    assert_eq!(
        m.call1(&mut vm, f, &[2]).unwrap_err(),
        VmError::Trap(TrapKind::UnalignedAtomic)
    );
}

#[test]
fn wait_on_unshared_memory_traps() {
    let mut m = TestModule::new();
    m.add_memory(1, None);
    let f = m.add_func(
        &[],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .i32_const(0)
            .i32_const(0)
            .i64_const(-1)
            .atomic(AtomicOp::MemoryAtomicWait32)
            .load_memarg_tail(2, 0)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(
        m.call1(&mut vm, f, &[]).unwrap_err(),
        VmError::Trap(TrapKind::ExpectedSharedMemory)
    );
}

#[test]
fn wait_on_shared_memory_reports_not_equal_or_timeout() {
    let mut m = TestModule::new();
    m.add_shared_memory(1, Some(1));
    let wait = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .i32_const(0)
            .local_get(0)
            .i64_const(1000)
            .atomic(AtomicOp::MemoryAtomicWait32)
            .load_memarg_tail(2, 0)
            .build(),
    );
    let notify = m.add_func(
        &[],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .i32_const(0)
            .i32_const(5)
            .atomic(AtomicOp::MemoryAtomicNotify)
            .load_memarg_tail(2, 0)
            .build(),
    );
    let mut vm = Vm::new();
    // Memory holds 0: expecting 1 is "not-equal" (1), expecting 0 is
    // "timed-out" (2) because nothing can wake a single thread.
    assert_eq!(m.call1(&mut vm, wait, &[1]).unwrap(), 1);
    assert_eq!(m.call1(&mut vm, wait, &[0]).unwrap(), 2);
    // Nobody is waiting, so notify wakes zero agents.
    assert_eq!(m.call1(&mut vm, notify, &[]).unwrap(), 0);
}

#[test]
fn fence_is_a_no_op() {
    let mut m = TestModule::new();
    let f = m.add_func(
        &[],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .atomic(AtomicOp::AtomicFence)
            .raw(&[0x00])
            .i32_const(3)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[]).unwrap(), 3);
}

#[test]
fn subwidth_rmw_truncates() {
    let mut m = TestModule::new();
    m.add_memory(1, None);
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .i32_const(0)
            .local_get(0)
            .atomic(AtomicOp::I32AtomicRmw8AddU)
            .load_memarg_tail(0, 0)
            .build(),
    );
    let peek = m.add_func(
        &[],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .i32_const(0)
            .load(op::I32_LOAD8_U, 0, 0)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[0xFF], ).unwrap(), 0);
    assert_eq!(m.call1(&mut vm, f, &[2]).unwrap(), 0xFF);
    // 0xFF + 2 wraps in 8 bits.
    assert_eq!(m.call1(&mut vm, peek, &[]).unwrap(), 1);
}

impl FuncBody {
    /// Append the memarg of an already-emitted atomic opcode.
    fn load_memarg_tail(self, align: u32, offset: u64) -> Self {
        let s = self.u32(align);
        let mut s = s;
        s = s.raw(&super::helpers::leb_u(offset));
        s
    }
}
