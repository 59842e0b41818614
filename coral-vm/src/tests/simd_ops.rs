//! Fixed-width SIMD.

use coral_asm::{op, SimdOp};
use coral_types::{ValType, V128};

use super::helpers::{FuncBody, TestModule};
use crate::interpreter::Vm;

fn v128_arg(bits: u128) -> [u64; 2] {
    [bits as u64, (bits >> 64) as u64]
}

fn v128_of(slots: &[u64]) -> V128 {
    V128::from_bits(u128::from(slots[0]) | (u128::from(slots[1]) << 64))
}

#[test]
fn lane_arithmetic_wraps_and_saturates() {
    let mut m = TestModule::new();
    // (v128, v128) -> v128 i8x16.add
    let add = m.add_func(
        &[ValType::V128, ValType::V128],
        &[ValType::V128],
        &[],
        FuncBody::new()
            .local_get(0)
            .local_get(1)
            .simd(SimdOp::I8x16Add)
            .build(),
    );
    let add_sat = m.add_func(
        &[ValType::V128, ValType::V128],
        &[ValType::V128],
        &[],
        FuncBody::new()
            .local_get(0)
            .local_get(1)
            .simd(SimdOp::I8x16AddSatS)
            .build(),
    );

    let mut vm = Vm::new();
    let a = V128::from_i8x16([100; 16]).to_bits();
    let b = V128::from_i8x16([100; 16]).to_bits();
    let mut args = Vec::new();
    args.extend(v128_arg(a));
    args.extend(v128_arg(b));

    let out = m.invoke(&mut vm, add, &args, 2).unwrap();
    assert_eq!(v128_of(&out).to_i8x16(), [(-56i8); 16]);

    let out = m.invoke(&mut vm, add_sat, &args, 2).unwrap();
    assert_eq!(v128_of(&out).to_i8x16(), [127i8; 16]);
}

#[test]
fn splat_extract_replace() {
    let mut m = TestModule::new();
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .local_get(0)
            .simd(SimdOp::I32x4Splat)
            .i32_const(7)
            .simd(SimdOp::I32x4ReplaceLane)
            .raw(&[2])
            .simd(SimdOp::I32x4ExtractLane)
            .raw(&[2])
            .build(),
    );
    let g = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .local_get(0)
            .simd(SimdOp::I32x4Splat)
            .simd(SimdOp::I32x4ExtractLane)
            .raw(&[3])
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[123]).unwrap(), 7);
    assert_eq!(m.call1(&mut vm, g, &[123]).unwrap(), 123);
}

#[test]
fn shuffle_and_swizzle() {
    let mut m = TestModule::new();
    // Reverse the 16 bytes of the first operand.
    let mut body = FuncBody::new()
        .local_get(0)
        .local_get(0)
        .simd(SimdOp::I8x16Shuffle);
    let mask: Vec<u8> = (0..16u8).rev().collect();
    body = body.raw(&mask);
    let rev = m.add_func(&[ValType::V128], &[ValType::V128], &[], body.build());

    let mut vm = Vm::new();
    let input = V128::from_u8x16([
        0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15,
    ]);
    let out = m
        .invoke(&mut vm, rev, &v128_arg(input.to_bits()), 2)
        .unwrap();
    let expect: [u8; 16] = core::array::from_fn(|i| 15 - i as u8);
    assert_eq!(v128_of(&out).to_u8x16(), expect);

    // Swizzle with one out-of-range index zeroing that lane.
    let swz = m.add_func(
        &[ValType::V128, ValType::V128],
        &[ValType::V128],
        &[],
        FuncBody::new()
            .local_get(0)
            .local_get(1)
            .simd(SimdOp::I8x16Swizzle)
            .build(),
    );
    let idx = V128::from_u8x16([1, 0, 255, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]);
    let mut args = Vec::new();
    args.extend(v128_arg(input.to_bits()));
    args.extend(v128_arg(idx.to_bits()));
    let out = m.invoke(&mut vm, swz, &args, 2).unwrap();
    let lanes = v128_of(&out).to_u8x16();
    assert_eq!(lanes[0], 1);
    assert_eq!(lanes[1], 0);
    assert_eq!(lanes[2], 0);
    assert_eq!(lanes[3], 3);
}

#[test]
fn float_min_propagates_nan_but_pmin_does_not() {
    let mut m = TestModule::new();
    let min = m.add_func(
        &[ValType::V128, ValType::V128],
        &[ValType::V128],
        &[],
        FuncBody::new()
            .local_get(0)
            .local_get(1)
            .simd(SimdOp::F32x4Min)
            .build(),
    );
    let pmin = m.add_func(
        &[ValType::V128, ValType::V128],
        &[ValType::V128],
        &[],
        FuncBody::new()
            .local_get(0)
            .local_get(1)
            .simd(SimdOp::F32x4Pmin)
            .build(),
    );
    let mut vm = Vm::new();
    let a = V128::from_f32x4([1.0, f32::NAN, 3.0, -0.0]);
    let b = V128::from_f32x4([2.0, 2.0, f32::NAN, 0.0]);
    let mut args = Vec::new();
    args.extend(v128_arg(a.to_bits()));
    args.extend(v128_arg(b.to_bits()));

    let out = v128_of(&m.invoke(&mut vm, min, &args, 2).unwrap()).to_f32x4();
    assert_eq!(out[0], 1.0);
    assert!(out[1].is_nan());
    assert!(out[2].is_nan());
    assert!(out[3].is_sign_negative());

    // pmin: b < a ? b : a — NaN in b keeps a.
    let out = v128_of(&m.invoke(&mut vm, pmin, &args, 2).unwrap()).to_f32x4();
    assert_eq!(out[0], 1.0);
    assert!(out[1].is_nan()); // a's NaN flows through untouched
    assert_eq!(out[2], 3.0);
}

#[test]
fn bitmask_any_true_all_true() {
    let mut m = TestModule::new();
    let bitmask = m.add_func(
        &[ValType::V128],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .local_get(0)
            .simd(SimdOp::I32x4Bitmask)
            .build(),
    );
    let all_true = m.add_func(
        &[ValType::V128],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .local_get(0)
            .simd(SimdOp::I32x4AllTrue)
            .build(),
    );
    let mut vm = Vm::new();
    let v = V128::from_i32x4([-1, 0, 5, i32::MIN]);
    assert_eq!(
        m.call1(&mut vm, bitmask, &v128_arg(v.to_bits())).unwrap(),
        0b1001
    );
    assert_eq!(
        m.call1(&mut vm, all_true, &v128_arg(v.to_bits())).unwrap(),
        0
    );
    let v = V128::from_i32x4([1, 2, 3, 4]);
    assert_eq!(
        m.call1(&mut vm, all_true, &v128_arg(v.to_bits())).unwrap(),
        1
    );
}

#[test]
fn loads_widen_and_stores_hit_memory() {
    let mut m = TestModule::new();
    m.add_memory(1, None);
    let prep = m.add_func(
        &[],
        &[],
        &[],
        FuncBody::new()
            .i32_const(0)
            .i64_const(0x8081_8283_8485_8687u64 as i64)
            .load(op::I64_STORE, 3, 0)
            .build(),
    );
    // load8x8_s sign-extends each byte to i16.
    let widen = m.add_func(
        &[],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .i32_const(0)
            .simd(SimdOp::V128Load8x8S)
            .raw(&[0x00, 0x00]) // memarg align=0 offset=0
            .simd(SimdOp::I16x8ExtractLaneS)
            .raw(&[7])
            .build(),
    );
    let mut vm = Vm::new();
    m.invoke(&mut vm, prep, &[], 0).unwrap();
    // Byte 7 (little-endian) is 0x80 -> -128.
    assert_eq!(
        m.call1(&mut vm, widen, &[]).unwrap(),
        (-128i32) as u32 as u64
    );
}

#[test]
fn dot_product_and_extmul() {
    let mut m = TestModule::new();
    let dot = m.add_func(
        &[ValType::V128, ValType::V128],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .local_get(0)
            .local_get(1)
            .simd(SimdOp::I32x4DotI16x8S)
            .simd(SimdOp::I32x4ExtractLane)
            .raw(&[0])
            .build(),
    );
    let mut vm = Vm::new();
    let a = V128::from_i16x8([3, -4, 0, 0, 0, 0, 0, 0]);
    let b = V128::from_i16x8([5, 6, 0, 0, 0, 0, 0, 0]);
    let mut args = Vec::new();
    args.extend(v128_arg(a.to_bits()));
    args.extend(v128_arg(b.to_bits()));
    // 3*5 + (-4)*6 = -9
    assert_eq!(
        m.invoke(&mut vm, dot, &args, 1).unwrap()[0],
        (-9i32) as u32 as u64
    );
}

#[test]
fn relaxed_ops_match_their_deterministic_counterparts() {
    let mut m = TestModule::new();
    let relaxed = m.add_func(
        &[ValType::V128, ValType::V128],
        &[ValType::V128],
        &[],
        FuncBody::new()
            .local_get(0)
            .local_get(1)
            .simd(SimdOp::I8x16RelaxedSwizzle)
            .build(),
    );
    let strict = m.add_func(
        &[ValType::V128, ValType::V128],
        &[ValType::V128],
        &[],
        FuncBody::new()
            .local_get(0)
            .local_get(1)
            .simd(SimdOp::I8x16Swizzle)
            .build(),
    );
    let mut vm = Vm::new();
    let a = V128::from_u8x16([9, 8, 7, 6, 5, 4, 3, 2, 1, 0, 11, 12, 13, 14, 15, 16]);
    let idx = V128::from_u8x16([0, 2, 4, 200, 8, 10, 12, 14, 1, 3, 5, 7, 9, 11, 13, 15]);
    let mut args = Vec::new();
    args.extend(v128_arg(a.to_bits()));
    args.extend(v128_arg(idx.to_bits()));
    assert_eq!(
        m.invoke(&mut vm, relaxed, &args, 2).unwrap(),
        m.invoke(&mut vm, strict, &args, 2).unwrap()
    );
}
