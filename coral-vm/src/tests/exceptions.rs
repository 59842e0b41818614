//! `try_table` / `throw` / `throw_ref`.

use coral_asm::op;
use coral_types::ValType;

use super::helpers::{FuncBody, TestModule, BT_EMPTY, BT_I32};
use crate::error::VmError;
use crate::interpreter::Vm;

const CATCH: u8 = 0x00;
const CATCH_REF: u8 = 0x01;
const CATCH_ALL: u8 = 0x02;

#[test]
fn payload_values_keep_their_order() {
    let mut m = TestModule::new();
    let tag = m.add_tag(&[ValType::I32, ValType::I32]);
    // Catch (a, b) thrown in order and compute a - b to observe it.
    let block_sig = m.add_type(&[], &[ValType::I32, ValType::I32]);
    let f = m.add_func(
        &[],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .block_t(block_sig)
            .try_table(BT_EMPTY, &[(CATCH, tag, 0)])
            .i32_const(50)
            .i32_const(8)
            .throw(tag)
            .end()
            .i32_const(0)
            .i32_const(0)
            .end()
            .op(op::I32_SUB)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[]).unwrap(), 42);
}

#[test]
fn uncaught_exception_escapes_the_invocation() {
    let mut m = TestModule::new();
    let tag = m.add_tag(&[ValType::I32]);
    let f = m.add_func(
        &[],
        &[],
        &[],
        FuncBody::new().i32_const(9).throw(tag).build(),
    );
    let mut vm = Vm::new();
    assert_eq!(
        m.invoke(&mut vm, f, &[], 0).unwrap_err(),
        VmError::WasmException
    );
    let pending = vm.pending_exception().expect("payload stays buffered");
    assert_eq!(pending.values[0], 9);
}

#[test]
fn exception_propagates_through_caller_frames() {
    let mut m = TestModule::new();
    let tag = m.add_tag(&[ValType::I32]);
    let thrower = m.add_func(
        &[ValType::I32],
        &[],
        &[],
        FuncBody::new().local_get(0).throw(tag).build(),
    );
    // Middle frame without a matching handler.
    let middle = m.add_func(
        &[ValType::I32],
        &[],
        &[],
        FuncBody::new().local_get(0).call(thrower).build(),
    );
    let catcher = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .block(BT_I32)
            .try_table(BT_EMPTY, &[(CATCH, tag, 0)])
            .local_get(0)
            .call(middle)
            .i32_const(-1)
            .op(op::RETURN)
            .end()
            .i32_const(-2)
            .op(op::RETURN)
            .end()
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, catcher, &[123]).unwrap(), 123);
}

#[test]
fn catch_all_matches_any_tag() {
    let mut m = TestModule::new();
    let tag_a = m.add_tag(&[]);
    let tag_b = m.add_tag(&[]);
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .block(BT_EMPTY)
            .try_table(BT_EMPTY, &[(CATCH_ALL, 0, 0)])
            .local_get(0)
            .if_(BT_EMPTY)
            .throw(tag_a)
            .else_()
            .throw(tag_b)
            .end()
            .end()
            .i32_const(0)
            .op(op::RETURN)
            .end()
            .i32_const(1)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[1]).unwrap(), 1);
    assert_eq!(m.call1(&mut vm, f, &[0]).unwrap(), 1);
}

#[test]
fn mismatched_tag_keeps_searching_outward() {
    let mut m = TestModule::new();
    let tag_a = m.add_tag(&[]);
    let tag_b = m.add_tag(&[]);
    // Inner try_table catches only tag_b; outer catches tag_a.
    let f = m.add_func(
        &[],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .block(BT_EMPTY)
            .block(BT_EMPTY)
            .try_table(BT_EMPTY, &[(CATCH, tag_b, 0), (CATCH, tag_a, 1)])
            .throw(tag_a)
            .end()
            .end()
            // tag_b landing: 10.
            .i32_const(10)
            .op(op::RETURN)
            .end()
            // tag_a landing: 20.
            .i32_const(20)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[]).unwrap(), 20);
}

#[test]
fn catch_ref_snapshot_can_be_rethrown() {
    let mut m = TestModule::new();
    let tag = m.add_tag(&[ValType::I32]);
    // The inner try catches by ref, `throw_ref` replays the snapshot, and
    // the outer catch consumes the replayed payload.
    let mid_sig = m.add_type(&[], &[ValType::I32, ValType::EXN_REF]);
    let rethrower = m.add_func(
        &[],
        &[ValType::I32],
        &[],
        FuncBody::new()
            // $outer receives the payload of the final catch.
            .block(BT_I32)
            // $mid receives (payload, exnref) from catch_ref.
            .block_t(mid_sig)
            .try_table(BT_EMPTY, &[(CATCH_REF, tag, 0)])
            .i32_const(42)
            .throw(tag)
            .end()
            .i32_const(-1)
            .op(op::RETURN)
            .end()
            // Stack here: [42, exnref]; rethrow into $outer.
            .try_table(BT_EMPTY, &[(CATCH, tag, 0)])
            .op(op::THROW_REF)
            .end()
            .i32_const(-2)
            .op(op::RETURN)
            .end()
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, rethrower, &[]).unwrap(), 42);
}
