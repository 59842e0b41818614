//! Host-function surface.

use coral_asm::op;
use coral_types::ValType;

use super::helpers::{FuncBody, TestModule};
use crate::interpreter::Vm;

#[test]
fn host_function_exchanges_values_through_the_operand_surface() {
    let mut m = TestModule::new();
    // host_mul3(x) = x * 3, via pop/push.
    let host = m.add_host(&[ValType::I32], &[ValType::I32], |vm, _store| {
        let x = vm.pop_u32()?;
        vm.push_u32(x.wrapping_mul(3))
    });
    let caller = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .local_get(0)
            .call(host)
            .i32_const(1)
            .op(op::I32_ADD)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, caller, &[5]).unwrap(), 16);
    // Host functions are callable directly from the embedder too.
    assert_eq!(m.call1(&mut vm, host, &[7]).unwrap(), 21);
}

#[test]
fn host_function_reaches_linear_memory_of_the_current_instance() {
    let mut m = TestModule::new();
    m.add_memory(1, None);
    let host = m.add_host(&[ValType::I32], &[ValType::I32], |vm, store| {
        let addr = vm.pop_u32()?;
        let mem = vm.get_memory(store, 0)?;
        let byte = mem.read::<1>(u64::from(addr), 0)?[0];
        mem.write(u64::from(addr), 0, [byte.wrapping_add(1)])?;
        vm.push_u32(u32::from(byte))
    });
    let poke = m.add_func(
        &[ValType::I32, ValType::I32],
        &[],
        &[],
        FuncBody::new()
            .local_get(0)
            .local_get(1)
            .load(op::I32_STORE8, 0, 0)
            .build(),
    );
    let mut vm = Vm::new();
    m.invoke(&mut vm, poke, &[40, 9], 0).unwrap();
    assert_eq!(m.call1(&mut vm, host, &[40]).unwrap(), 9);
    assert_eq!(m.call1(&mut vm, host, &[40]).unwrap(), 10);
}

#[test]
fn host_error_propagates_as_the_call_result() {
    let mut m = TestModule::new();
    let host = m.add_host(&[], &[], |_vm, _store| Err(crate::error::VmError::Unreachable));
    let caller = m.add_func(&[], &[], &[], FuncBody::new().call(host).build());
    let mut vm = Vm::new();
    assert!(m.invoke(&mut vm, caller, &[], 0).is_err());
}
