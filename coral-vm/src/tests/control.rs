//! Structured control flow: blocks, loops, if/else, br_table.

use coral_asm::op;
use coral_types::ValType;

use super::helpers::{FuncBody, TestModule, BT_EMPTY, BT_I32};
use crate::interpreter::Vm;

/// sum(n) = 0 + 1 + ... + n via a classic br_if loop.
fn loop_sum() -> Vec<u8> {
    // locals: 1 = acc, 2 = i
    FuncBody::new()
        .block(BT_EMPTY)
        .loop_(BT_EMPTY)
        // if i > n, exit
        .local_get(2)
        .local_get(0)
        .op(op::I32_GT_S)
        .br_if(1)
        // acc += i; i += 1
        .local_get(1)
        .local_get(2)
        .op(op::I32_ADD)
        .local_set(1)
        .local_get(2)
        .i32_const(1)
        .op(op::I32_ADD)
        .local_set(2)
        .br(0)
        .end()
        .end()
        .local_get(1)
        .build()
}

#[test]
fn loop_accumulates() {
    let mut m = TestModule::new();
    let f = m.add_func(&[ValType::I32], &[ValType::I32], &[ValType::I32, ValType::I32], loop_sum());
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[10]).unwrap(), 55);
    assert_eq!(m.call1(&mut vm, f, &[100]).unwrap(), 5050);
}

#[test]
fn if_else_selects_branch() {
    let mut m = TestModule::new();
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .local_get(0)
            .if_(BT_I32)
            .i32_const(11)
            .else_()
            .i32_const(22)
            .end()
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[1]).unwrap(), 11);
    assert_eq!(m.call1(&mut vm, f, &[0]).unwrap(), 22);
}

#[test]
fn if_without_else_skips_when_false() {
    let mut m = TestModule::new();
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[ValType::I32],
        FuncBody::new()
            .local_get(0)
            .if_(BT_EMPTY)
            .i32_const(99)
            .local_set(1)
            .end()
            .local_get(1)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[1]).unwrap(), 99);
    assert_eq!(m.call1(&mut vm, f, &[0]).unwrap(), 0);
}

#[test]
fn br_table_uses_last_entry_as_default() {
    // Returns 10/20/30 for selector 0/1/anything else.
    let mut m = TestModule::new();
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .block(BT_EMPTY)
            .block(BT_EMPTY)
            .block(BT_EMPTY)
            .local_get(0)
            .br_table(&[0, 1], 2)
            .end()
            .i32_const(10)
            .op(op::RETURN)
            .end()
            .i32_const(20)
            .op(op::RETURN)
            .end()
            .i32_const(30)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[0]).unwrap(), 10);
    assert_eq!(m.call1(&mut vm, f, &[1]).unwrap(), 20);
    assert_eq!(m.call1(&mut vm, f, &[2]).unwrap(), 30);
    assert_eq!(m.call1(&mut vm, f, &[250]).unwrap(), 30);
}

#[test]
fn br_carries_block_results() {
    // block (result i32) i32.const 5 br 0 end
    let mut m = TestModule::new();
    let f = m.add_func(
        &[],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .block(BT_I32)
            .i32_const(5)
            .br(0)
            .end()
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[]).unwrap(), 5);
}

#[test]
fn branch_to_function_level_returns() {
    let mut m = TestModule::new();
    let f = m.add_func(
        &[],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .block(BT_EMPTY)
            .i32_const(77)
            .br(1)
            .end()
            .i32_const(0)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[]).unwrap(), 77);
}

#[test]
fn select_picks_by_condition() {
    let mut m = TestModule::new();
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .i32_const(100)
            .i32_const(200)
            .local_get(0)
            .op(op::SELECT)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[1]).unwrap(), 100);
    assert_eq!(m.call1(&mut vm, f, &[0]).unwrap(), 200);
}

#[test]
fn globals_read_and_write() {
    let mut m = TestModule::new();
    let g = m.add_global(ValType::I64, true, 5);
    let f = m.add_func(
        &[],
        &[ValType::I64],
        &[],
        FuncBody::new()
            .global_get(g)
            .i64_const(10)
            .op(op::I64_MUL)
            .global_set(g)
            .global_get(g)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[]).unwrap(), 50);
    assert_eq!(m.call1(&mut vm, f, &[]).unwrap(), 500);
}
