//! Fuel metering and the opcode profile.

use coral_asm::op;
use coral_types::ValType;

use super::helpers::{FuncBody, TestModule};
use crate::error::VmError;
use crate::interpreter::Vm;

fn three_op_body() -> Vec<u8> {
    // local.get, local.get, i32.add + the terminating end.
    FuncBody::new()
        .local_get(0)
        .local_get(1)
        .op(op::I32_ADD)
        .build()
}

#[test]
fn zero_fuel_fails_on_the_first_instruction() {
    let mut m = TestModule::new();
    let f = m.add_func(
        &[ValType::I32, ValType::I32],
        &[ValType::I32],
        &[],
        three_op_body(),
    );
    let mut vm = Vm::new();
    vm.set_fuel(Some(0));
    assert_eq!(
        m.call1(&mut vm, f, &[1, 2]).unwrap_err(),
        VmError::FuelExhausted
    );
}

#[test]
fn fuel_counts_instructions_exactly() {
    let mut m = TestModule::new();
    let f = m.add_func(
        &[ValType::I32, ValType::I32],
        &[ValType::I32],
        &[],
        three_op_body(),
    );
    let mut vm = Vm::new();

    // Three real instructions plus the function-level end.
    vm.set_fuel(Some(4));
    assert_eq!(m.call1(&mut vm, f, &[1, 2]).unwrap(), 3);
    assert_eq!(vm.fuel(), Some(0));

    vm.set_fuel(Some(3));
    assert_eq!(
        m.call1(&mut vm, f, &[1, 2]).unwrap_err(),
        VmError::FuelExhausted
    );
}

#[test]
fn fuel_disables_native_promotion() {
    let mut m = TestModule::new();
    let f = m.add_func(
        &[ValType::I32, ValType::I32],
        &[ValType::I32],
        &[],
        three_op_body(),
    );
    let mut vm = Vm::new();
    vm.set_fuel(Some(1_000_000));
    for _ in 0..64 {
        assert_eq!(m.call1(&mut vm, f, &[2, 3]).unwrap(), 5);
    }
    let addr = m.store.instances[m.inst].funcs[f as usize];
    let wasm = m.store.funcs[addr].as_wasm().unwrap();
    assert!(wasm.tiers.jit.is_none());
}

#[test]
fn profile_counts_each_opcode_and_pins_the_baseline() {
    let mut m = TestModule::new();
    let f = m.add_func(
        &[ValType::I32, ValType::I32],
        &[ValType::I32],
        &[],
        three_op_body(),
    );
    let mut vm = Vm::new();
    vm.attach_profile();

    for _ in 0..10 {
        assert_eq!(m.call1(&mut vm, f, &[20, 22]).unwrap(), 42);
    }

    let profile = vm.take_profile().unwrap();
    assert_eq!(profile.count(u32::from(op::LOCAL_GET)), 20);
    assert_eq!(profile.count(u32::from(op::I32_ADD)), 10);
    assert_eq!(profile.count(u32::from(op::END)), 10);
    assert_eq!(profile.total(), 40);

    // Promotion did not occur while the profile was attached.
    let addr = m.store.instances[m.inst].funcs[f as usize];
    let wasm = m.store.funcs[addr].as_wasm().unwrap();
    assert!(wasm.tiers.predecoded.is_none());
    assert!(wasm.tiers.jit.is_none());
}

#[test]
fn fuel_applies_on_warmed_tiers_too() {
    // Warm the caches without fuel, then meter: exhaustion on the first
    // instruction holds on whichever tier runs the call.
    let mut m = TestModule::new();
    let f = m.add_func(
        &[ValType::I32, ValType::I32],
        &[ValType::I32],
        &[],
        three_op_body(),
    );
    let mut vm = Vm::new();
    for _ in 0..4 {
        assert_eq!(m.call1(&mut vm, f, &[1, 2]).unwrap(), 3);
    }

    vm.set_fuel(Some(0));
    assert_eq!(
        m.call1(&mut vm, f, &[1, 2]).unwrap_err(),
        VmError::FuelExhausted
    );

    vm.set_fuel(Some(1000));
    assert_eq!(m.call1(&mut vm, f, &[1, 2]).unwrap(), 3);
    let spent = 1000 - vm.fuel().unwrap();
    assert!(spent > 0 && spent <= 4);
}
