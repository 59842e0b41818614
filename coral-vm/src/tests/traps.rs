//! Trap classification.

use coral_asm::op;
use coral_types::ValType;
use test_case::test_case;

use super::helpers::{FuncBody, TestModule};
use crate::error::VmError;
use crate::interpreter::Vm;

fn binop_i32(opcode: u8) -> Vec<u8> {
    FuncBody::new()
        .local_get(0)
        .local_get(1)
        .op(opcode)
        .build()
}

#[test_case(op::I32_DIV_S; "div_s")]
#[test_case(op::I32_DIV_U; "div_u")]
#[test_case(op::I32_REM_S; "rem_s")]
#[test_case(op::I32_REM_U; "rem_u")]
fn division_by_zero(opcode: u8) {
    let mut m = TestModule::new();
    let f = m.add_func(
        &[ValType::I32, ValType::I32],
        &[ValType::I32],
        &[],
        binop_i32(opcode),
    );
    let mut vm = Vm::new();
    assert_eq!(
        m.call1(&mut vm, f, &[9, 0]).unwrap_err(),
        VmError::DivisionByZero
    );
}

#[test]
fn int_min_divided_by_minus_one_overflows() {
    let mut m = TestModule::new();
    let div = m.add_func(
        &[ValType::I32, ValType::I32],
        &[ValType::I32],
        &[],
        binop_i32(op::I32_DIV_S),
    );
    let rem = m.add_func(
        &[ValType::I32, ValType::I32],
        &[ValType::I32],
        &[],
        binop_i32(op::I32_REM_S),
    );
    let mut vm = Vm::new();
    let min = i32::MIN as u32 as u64;
    let neg1 = (-1i32) as u32 as u64;
    assert_eq!(
        m.call1(&mut vm, div, &[min, neg1]).unwrap_err(),
        VmError::IntegerOverflow
    );
    // rem with -1 divisor returns zero, never overflows.
    assert_eq!(m.call1(&mut vm, rem, &[min, neg1]).unwrap(), 0);
}

#[test]
fn nan_truncation_traps_but_saturating_returns_zero() {
    let mut m = TestModule::new();
    let trapping = m.add_func(
        &[ValType::F32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .local_get(0)
            .op(op::I32_TRUNC_F32_S)
            .build(),
    );
    let saturating = m.add_func(
        &[ValType::F32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .local_get(0)
            .misc(coral_asm::MiscOp::I32TruncSatF32S)
            .build(),
    );
    let mut vm = Vm::new();
    let nan = u64::from(f32::NAN.to_bits());
    assert_eq!(
        m.call1(&mut vm, trapping, &[nan]).unwrap_err(),
        VmError::InvalidConversion
    );
    assert_eq!(m.call1(&mut vm, saturating, &[nan]).unwrap(), 0);

    let big = u64::from(3e9f32.to_bits());
    assert_eq!(
        m.call1(&mut vm, saturating, &[big]).unwrap(),
        i32::MAX as u32 as u64
    );
}

#[test]
fn unreachable_traps() {
    let mut m = TestModule::new();
    let f = m.add_func(&[], &[], &[], FuncBody::new().op(op::UNREACHABLE).build());
    let mut vm = Vm::new();
    assert_eq!(
        m.invoke(&mut vm, f, &[], 0).unwrap_err(),
        VmError::Unreachable
    );
}

#[test]
fn out_of_bounds_load_traps() {
    let mut m = TestModule::new();
    m.add_memory(1, None);
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new().local_get(0).load(op::I32_LOAD, 2, 0).build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[65532]).unwrap(), 0);
    assert_eq!(
        m.call1(&mut vm, f, &[65533]).unwrap_err(),
        VmError::OutOfBoundsMemoryAccess
    );
    // Offset overflow cannot wrap around.
    let g = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .local_get(0)
            .load(op::I32_LOAD, 2, u64::from(u32::MAX))
            .build(),
    );
    assert_eq!(
        m.call1(&mut vm, g, &[8]).unwrap_err(),
        VmError::OutOfBoundsMemoryAccess
    );
}

#[test]
fn call_indirect_checks_null_bounds_and_signature() {
    let mut m = TestModule::new();
    let id64 = m.add_func(
        &[ValType::I64],
        &[ValType::I64],
        &[],
        FuncBody::new().local_get(0).build(),
    );
    let table = m.add_table(&[Some(id64), None]);
    let sig32 = m.add_type(&[ValType::I32], &[ValType::I32]);
    let caller = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .i32_const(1)
            .local_get(0)
            .call_indirect(sig32, table)
            .build(),
    );
    let mut vm = Vm::new();
    // Slot 0 holds an (i64)->(i64) function, caller expects (i32)->(i32).
    assert_eq!(
        m.call1(&mut vm, caller, &[0]).unwrap_err(),
        VmError::MismatchedSignatures
    );
    // Null element.
    assert_eq!(
        m.call1(&mut vm, caller, &[1]).unwrap_err(),
        VmError::UndefinedElement
    );
    // Past the table end.
    assert_eq!(
        m.call1(&mut vm, caller, &[17]).unwrap_err(),
        VmError::UndefinedElement
    );
}

#[test]
fn runaway_recursion_overflows_the_frame_stack() {
    let mut m = TestModule::new();
    // f() = f() with a plain (non-tail) call.
    let f = m.add_func(&[], &[], &[], FuncBody::new().call(0).build());
    let mut vm = Vm::new();
    assert_eq!(
        m.invoke(&mut vm, f, &[], 0).unwrap_err(),
        VmError::StackOverflow
    );
    vm.reset();
    assert_eq!(vm.frame_depth(), 0);
    assert_eq!(vm.sp(), 0);
}

#[test]
fn wide_arithmetic_is_exact() {
    let mut m = TestModule::new();
    // mul_wide_u(a, b) -> (lo, hi)
    let f = m.add_func(
        &[ValType::I64, ValType::I64],
        &[ValType::I64, ValType::I64],
        &[],
        FuncBody::new()
            .local_get(0)
            .local_get(1)
            .misc(coral_asm::MiscOp::I64MulWideU)
            .build(),
    );
    let mut vm = Vm::new();
    let out = m.invoke(&mut vm, f, &[u64::MAX, 3], 2).unwrap();
    let p = u128::from(u64::MAX) * 3;
    assert_eq!(out[0], p as u64);
    assert_eq!(out[1], (p >> 64) as u64);

    // add128 carries across the halves.
    let add = m.add_func(
        &[ValType::I64, ValType::I64, ValType::I64, ValType::I64],
        &[ValType::I64, ValType::I64],
        &[],
        FuncBody::new()
            .local_get(0)
            .local_get(1)
            .local_get(2)
            .local_get(3)
            .misc(coral_asm::MiscOp::I64Add128)
            .build(),
    );
    let out = m.invoke(&mut vm, add, &[u64::MAX, 0, 1, 0], 2).unwrap();
    assert_eq!(out, vec![0, 1]);
}
