//! End-to-end scenarios over the public entry points.

use coral_asm::op;
use coral_types::ValType;

use super::helpers::{FuncBody, TestModule, BT_EMPTY};
use crate::error::VmError;
use crate::interpreter::Vm;

fn i32_adder() -> Vec<u8> {
    FuncBody::new()
        .local_get(0)
        .local_get(1)
        .op(op::I32_ADD)
        .build()
}

/// Recursive Fibonacci: fib(n) = n < 2 ? n : fib(n-1) + fib(n-2).
fn fib_body() -> Vec<u8> {
    FuncBody::new()
        .local_get(0)
        .i32_const(2)
        .op(op::I32_LT_S)
        .if_(BT_EMPTY)
        .local_get(0)
        .op(op::RETURN)
        .end()
        .local_get(0)
        .i32_const(1)
        .op(op::I32_SUB)
        .call(0)
        .local_get(0)
        .i32_const(2)
        .op(op::I32_SUB)
        .call(0)
        .op(op::I32_ADD)
        .build()
}

#[test]
fn add_3_4_is_7() {
    let mut m = TestModule::new();
    let f = m.add_func(&[ValType::I32, ValType::I32], &[ValType::I32], &[], i32_adder());
    m.export_func("add", f);

    let mut vm = Vm::new();
    let mut out = [0u64];
    vm.invoke(&mut m.store, m.inst, "add", &[3, 4], &mut out).unwrap();
    assert_eq!(out[0], 7);
}

#[test]
fn fib_10_and_20() {
    let mut m = TestModule::new();
    let f = m.add_func(&[ValType::I32], &[ValType::I32], &[], fib_body());

    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[10]).unwrap(), 55);
    assert_eq!(m.call1(&mut vm, f, &[20]).unwrap(), 6765);
}

#[test]
fn memory_store_then_load() {
    let mut m = TestModule::new();
    m.add_memory(1, None);
    let store_fn = m.add_func(
        &[ValType::I32, ValType::I32],
        &[],
        &[],
        FuncBody::new()
            .local_get(0)
            .local_get(1)
            .load(op::I32_STORE, 2, 0)
            .build(),
    );
    let load_fn = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new().local_get(0).load(op::I32_LOAD, 2, 0).build(),
    );

    let mut vm = Vm::new();
    m.invoke(&mut vm, store_fn, &[0, 42], 0).unwrap();
    assert_eq!(m.call1(&mut vm, load_fn, &[0]).unwrap(), 42);
}

#[test]
fn indirect_dispatch_selects_different_callees() {
    let mut m = TestModule::new();
    let sum = m.add_func(&[ValType::I32, ValType::I32], &[ValType::I32], &[], i32_adder());
    let diff = m.add_func(
        &[ValType::I32, ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .local_get(0)
            .local_get(1)
            .op(op::I32_SUB)
            .build(),
    );
    let third = m.add_func(
        &[ValType::I32, ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .local_get(0)
            .local_get(1)
            .op(op::I32_MUL)
            .build(),
    );
    let table = m.add_table(&[Some(sum), Some(diff), Some(third)]);
    let sig = m.add_type(&[ValType::I32, ValType::I32], &[ValType::I32]);
    // dispatch(which, a, b) = table[which](a, b)
    let dispatch = m.add_func(
        &[ValType::I32, ValType::I32, ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .local_get(1)
            .local_get(2)
            .local_get(0)
            .call_indirect(sig, table)
            .build(),
    );

    let mut vm = Vm::new();
    let a = m.call1(&mut vm, dispatch, &[0, 10, 20]).unwrap();
    let b = m.call1(&mut vm, dispatch, &[1, 10, 20]).unwrap();
    assert_eq!(a, 30);
    assert_eq!(b, (-10i32) as u32 as u64);
    assert_ne!(a, b);
    assert_eq!(m.call1(&mut vm, dispatch, &[2, 10, 20]).unwrap(), 200);
}

#[test]
fn multi_value_swap_orders_results() {
    let mut m = TestModule::new();
    let swap = m.add_func(
        &[ValType::I32, ValType::I32],
        &[ValType::I32, ValType::I32],
        &[],
        FuncBody::new().local_get(1).local_get(0).build(),
    );

    let mut vm = Vm::new();
    let out = m.invoke(&mut vm, swap, &[10, 20], 2).unwrap();
    assert_eq!(out, vec![20, 10]);
}

#[test]
fn thrown_value_caught_by_outer_try_table() {
    let mut m = TestModule::new();
    let tag = m.add_tag(&[ValType::I32]);
    // block $h (result i32)
    //   try_table (catch tag $h) local.get 0; throw tag end
    //   i32.const -1 (unreachable on throw path)
    //   br 0? -- simpler: after catch, value lands at block end.
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .block(super::helpers::BT_I32)
            .try_table(BT_EMPTY, &[(0x00, tag, 0)])
            .local_get(0)
            .throw(tag)
            .end()
            .i32_const(-1)
            .end()
            .build(),
    );

    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[42]).unwrap(), 42);
    assert_eq!(m.call1(&mut vm, f, &[7]).unwrap(), 7);
}

#[test]
fn memory_grow_honors_the_ceiling() {
    let mut m = TestModule::new();
    m.add_memory(1, None);
    let grow = m.add_func(
        &[],
        &[ValType::I32],
        &[],
        FuncBody::new().i32_const(1).memory_grow(0).build(),
    );

    let mut vm = Vm::new();
    vm.set_memory_ceiling(Some(2 * 65536));

    // First grow succeeds: old size 1, new size 2.
    assert_eq!(m.call1(&mut vm, grow, &[]).unwrap(), 1);
    // Second would exceed 2 pages total: -1.
    assert_eq!(
        m.call1(&mut vm, grow, &[]).unwrap(),
        (-1i32) as u32 as u64
    );
}

#[test]
fn unknown_export_is_reported() {
    let mut m = TestModule::new();
    let mut vm = Vm::new();
    let err = vm
        .invoke(&mut m.store, m.inst, "nope", &[], &mut [])
        .unwrap_err();
    assert!(matches!(err, VmError::UnknownExport(name) if name == "nope"));
}
