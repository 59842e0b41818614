//! Tier promotion and cross-tier result equivalence.

use coral_asm::op;
use coral_types::ValType;

use super::helpers::{FuncBody, TestModule, BT_EMPTY};
use crate::consts::HOT_CALL_THRESHOLD;
use crate::interpreter::Vm;

fn loop_sum_body() -> Vec<u8> {
    FuncBody::new()
        .block(BT_EMPTY)
        .loop_(BT_EMPTY)
        .local_get(2)
        .local_get(0)
        .op(op::I32_GT_S)
        .br_if(1)
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

fn tier_state(m: &TestModule, f: u32) -> (bool, bool, bool) {
    let addr = m.store.instances[m.inst].funcs[f as usize];
    let wasm = m.store.funcs[addr].as_wasm().unwrap();
    (
        wasm.tiers.predecoded.is_some(),
        wasm.tiers.regir.is_some(),
        wasm.tiers.jit.is_some(),
    )
}

#[test]
fn promotion_is_lazy_and_monotonic() {
    let mut m = TestModule::new();
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[ValType::I32, ValType::I32],
        loop_sum_body(),
    );
    let mut vm = Vm::new();

    // Every call, at whatever tier, must agree.
    for _ in 0..(HOT_CALL_THRESHOLD + 4) {
        assert_eq!(m.call1(&mut vm, f, &[100]).unwrap(), 5050);
    }

    let (pre, reg, jit) = tier_state(&m, f);
    assert!(pre, "pre-decoded after first call");
    assert!(reg, "register ir for an eligible signature");
    if cfg!(all(target_arch = "x86_64", unix)) {
        assert!(jit, "hot-call threshold reached");
    }
}

#[test]
fn simd_functions_stay_on_the_bytecode_tier() {
    let mut m = TestModule::new();
    let f = m.add_func(
        &[],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .v128_const(7)
            .simd(coral_asm::SimdOp::I32x4ExtractLane)
            .raw(&[0])
            .build(),
    );
    let mut vm = Vm::new();
    for _ in 0..(HOT_CALL_THRESHOLD + 4) {
        assert_eq!(m.call1(&mut vm, f, &[]).unwrap(), 7);
    }
    let (pre, reg, jit) = tier_state(&m, f);
    assert!(!pre && !reg && !jit);

    let addr = m.store.instances[m.inst].funcs[f as usize];
    let wasm = m.store.funcs[addr].as_wasm().unwrap();
    assert!(wasm.tiers.predecode_failed, "refusal latches");
}

#[test]
fn multi_value_stays_on_the_ir_tier() {
    let mut m = TestModule::new();
    let f = m.add_func(
        &[ValType::I32, ValType::I32],
        &[ValType::I32, ValType::I32],
        &[],
        FuncBody::new().local_get(1).local_get(0).build(),
    );
    let mut vm = Vm::new();
    for _ in 0..(HOT_CALL_THRESHOLD + 4) {
        assert_eq!(m.invoke(&mut vm, f, &[1, 2], 2).unwrap(), vec![2, 1]);
    }
    let (pre, reg, _) = tier_state(&m, f);
    assert!(pre);
    assert!(!reg, "multi-value conversion is refused");
}

#[test]
fn back_edge_compiles_mid_call_and_restarts() {
    // Enough iterations in a single call to cross the back-edge threshold.
    let mut m = TestModule::new();
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[ValType::I32, ValType::I32],
        loop_sum_body(),
    );
    let mut vm = Vm::new();

    // Two calls: the first builds IR, the second runs register IR and hits
    // the back edge threshold mid-call.
    assert_eq!(m.call1(&mut vm, f, &[10]).unwrap(), 55);
    assert_eq!(m.call1(&mut vm, f, &[5000]).unwrap(), 12_502_500);
    if cfg!(all(target_arch = "x86_64", unix)) {
        let (_, _, jit) = tier_state(&m, f);
        assert!(jit, "back-edge promotion compiled the function");
    }
    // And the now-compiled function still agrees.
    assert_eq!(m.call1(&mut vm, f, &[10]).unwrap(), 55);
}

#[test]
fn self_tail_recursion_does_not_grow_the_frame_stack() {
    // countdown(n, acc): n == 0 ? acc : return_call countdown(n-1, acc+n)
    let mut m = TestModule::new();
    let f = m.add_func(
        &[ValType::I32, ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .local_get(0)
            .op(op::I32_EQZ)
            .if_(BT_EMPTY)
            .local_get(1)
            .op(op::RETURN)
            .end()
            .local_get(0)
            .i32_const(1)
            .op(op::I32_SUB)
            .local_get(1)
            .local_get(0)
            .op(op::I32_ADD)
            .return_call(0)
            .build(),
    );
    let mut vm = Vm::new();
    // Far deeper than the 1024-frame stack could hold without reuse.
    let n = 200_000u64;
    let expected = (n * (n + 1) / 2) as u32;
    assert_eq!(
        m.call1(&mut vm, f, &[n, 0]).unwrap() as u32,
        expected
    );
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn results_agree_between_bytecode_and_promoted_tiers() {
    // Compare a fresh VM+module (first call: bytecode-promotable path)
    // against a hot one for a corpus of inputs.
    let inputs = [0u64, 1, 2, 3, 7, 31, 100, 1000];

    let mut cold_results = Vec::new();
    for &n in &inputs {
        let mut m = TestModule::new();
        let f = m.add_func(
            &[ValType::I32],
            &[ValType::I32],
            &[ValType::I32, ValType::I32],
            loop_sum_body(),
        );
        let mut vm = Vm::new();
        // Profiling pins the baseline tier.
        vm.attach_profile();
        cold_results.push(m.call1(&mut vm, f, &[n]).unwrap());
    }

    let mut m = TestModule::new();
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[ValType::I32, ValType::I32],
        loop_sum_body(),
    );
    let mut vm = Vm::new();
    for _ in 0..(HOT_CALL_THRESHOLD + 2) {
        let _ = m.call1(&mut vm, f, &[3]).unwrap();
    }
    for (&n, &cold) in inputs.iter().zip(&cold_results) {
        assert_eq!(m.call1(&mut vm, f, &[n]).unwrap(), cold);
    }
}
