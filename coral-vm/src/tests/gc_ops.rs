//! GC structs, arrays, i31, tests and casts.

use coral_asm::GcOp;
use coral_types::{FieldType, HeapType, RefType, StorageType, ValType};

use super::helpers::{FuncBody, TestModule, BT_EMPTY};
use crate::error::VmError;
use crate::interpreter::Vm;
use crate::store::{ArrayType, CompositeType, StructType, SubType};

fn i8_field(mutable: bool) -> FieldType {
    FieldType {
        storage: StorageType::I8,
        mutable,
    }
}

fn i32_field(mutable: bool) -> FieldType {
    FieldType {
        storage: StorageType::Val(ValType::I32),
        mutable,
    }
}

#[test]
fn struct_fields_pack_and_widen() {
    let mut m = TestModule::new();
    let st = m.push_type(SubType::final_type(CompositeType::Struct(StructType {
        fields: vec![i8_field(true), i32_field(true)],
    })));

    // make(x) = struct.new(x, 1000); get_s field0 + get field1
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[ValType::I64],
        FuncBody::new()
            .local_get(0)
            .i32_const(1000)
            .gc(GcOp::StructNew)
            .u32(st)
            .local_set(1) // keep the ref in an i64-ish slot local
            .local_get(1)
            .gc(GcOp::StructGetS)
            .u32(st)
            .u32(0)
            .local_get(1)
            .gc(GcOp::StructGet)
            .u32(st)
            .u32(1)
            .op(coral_asm::op::I32_ADD)
            .build(),
    );

    let mut vm = Vm::new();
    // 0x90 stored in an i8 field reads back sign-extended: -112.
    assert_eq!(
        m.call1(&mut vm, f, &[0x90]).unwrap(),
        ((-112i32 + 1000) as u32) as u64
    );
}

#[test]
fn struct_get_u_zero_extends() {
    let mut m = TestModule::new();
    let st = m.push_type(SubType::final_type(CompositeType::Struct(StructType {
        fields: vec![i8_field(false)],
    })));
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .local_get(0)
            .gc(GcOp::StructNew)
            .u32(st)
            .gc(GcOp::StructGetU)
            .u32(st)
            .u32(0)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[0x190]).unwrap(), 0x90);
}

#[test]
fn arrays_fill_copy_and_report_length() {
    let mut m = TestModule::new();
    let arr = m.push_type(SubType::final_type(CompositeType::Array(ArrayType {
        elem: i32_field(true),
    })));

    // new array of n zeros; fill [1, 3) with 7; return a[0]+a[1]+a[2] + len*100
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[ValType::I64],
        FuncBody::new()
            .i32_const(0)
            .local_get(0)
            .gc(GcOp::ArrayNew)
            .u32(arr)
            .local_set(1)
            // fill
            .local_get(1)
            .i32_const(1)
            .i32_const(7)
            .i32_const(2)
            .gc(GcOp::ArrayFill)
            .u32(arr)
            // sum three
            .local_get(1)
            .i32_const(0)
            .gc(GcOp::ArrayGet)
            .u32(arr)
            .local_get(1)
            .i32_const(1)
            .gc(GcOp::ArrayGet)
            .u32(arr)
            .op(coral_asm::op::I32_ADD)
            .local_get(1)
            .i32_const(2)
            .gc(GcOp::ArrayGet)
            .u32(arr)
            .op(coral_asm::op::I32_ADD)
            .local_get(1)
            .gc(GcOp::ArrayLen)
            .i32_const(100)
            .op(coral_asm::op::I32_MUL)
            .op(coral_asm::op::I32_ADD)
            .build(),
    );
    let mut vm = Vm::new();
    // zeros: [0,7,7,...]; sum = 14; len 5 -> 514.
    assert_eq!(m.call1(&mut vm, f, &[5]).unwrap(), 514);
}

#[test]
fn array_out_of_bounds_traps() {
    let mut m = TestModule::new();
    let arr = m.push_type(SubType::final_type(CompositeType::Array(ArrayType {
        elem: i32_field(true),
    })));
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .i32_const(0)
            .i32_const(4)
            .gc(GcOp::ArrayNew)
            .u32(arr)
            .local_get(0)
            .gc(GcOp::ArrayGet)
            .u32(arr)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[3]).unwrap(), 0);
    assert!(matches!(
        m.call1(&mut vm, f, &[4]).unwrap_err(),
        VmError::Trap(coral_asm::TrapKind::OutOfBoundsArrayAccess)
    ));
}

#[test]
fn array_new_data_decodes_segment_lanes() {
    let mut m = TestModule::new();
    let arr = m.push_type(SubType::final_type(CompositeType::Array(ArrayType {
        elem: i32_field(false),
    })));
    let data = m.add_data(&[1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]);
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .i32_const(0) // segment offset
            .i32_const(3) // length
            .gc(GcOp::ArrayNewData)
            .u32(arr)
            .u32(data)
            .local_get(0)
            .gc(GcOp::ArrayGet)
            .u32(arr)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[0]).unwrap(), 1);
    assert_eq!(m.call1(&mut vm, f, &[2]).unwrap(), 3);
}

#[test]
fn i31_round_trips_and_sign_extends() {
    let mut m = TestModule::new();
    let get_s = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .local_get(0)
            .gc(GcOp::RefI31)
            .gc(GcOp::I31GetS)
            .build(),
    );
    let get_u = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .local_get(0)
            .gc(GcOp::RefI31)
            .gc(GcOp::I31GetU)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, get_s, &[5]).unwrap(), 5);
    // Bit 30 set: negative through get_s, large positive through get_u.
    let v = 0x4000_0000u64;
    assert_eq!(
        m.call1(&mut vm, get_s, &[v]).unwrap(),
        (-(1i32 << 30)) as u32 as u64
    );
    assert_eq!(m.call1(&mut vm, get_u, &[v]).unwrap(), v);
}

#[test]
fn ref_test_and_cast_respect_the_hierarchy() {
    let mut m = TestModule::new();
    let st = m.push_type(SubType::final_type(CompositeType::Struct(StructType {
        fields: vec![],
    })));
    // test_struct(ref) tests a freshly allocated struct against struct,
    // array, and its concrete type.
    let f = m.add_func(
        &[],
        &[ValType::I32],
        &[ValType::I64],
        FuncBody::new()
            .gc(GcOp::StructNewDefault)
            .u32(st)
            .local_set(1)
            .local_get(1)
            .gc(GcOp::RefTest)
            .raw(&[0x6B]) // structref
            .local_get(1)
            .gc(GcOp::RefTest)
            .raw(&[0x6A]) // arrayref
            .i32_const(2)
            .op(coral_asm::op::I32_MUL)
            .op(coral_asm::op::I32_ADD)
            .local_get(1)
            .gc(GcOp::RefTest)
            .raw(&[0x00]) // concrete type 0
            .i32_const(4)
            .op(coral_asm::op::I32_MUL)
            .op(coral_asm::op::I32_ADD)
            .build(),
    );
    let mut vm = Vm::new();
    // struct: 1, array: 0, concrete: 1 -> 1 + 0 + 4 = 5.
    assert_eq!(m.call1(&mut vm, f, &[]).unwrap(), 5);

    // A failed cast traps.
    let bad_cast = m.add_func(
        &[],
        &[],
        &[],
        FuncBody::new()
            .gc(GcOp::StructNewDefault)
            .u32(st)
            .gc(GcOp::RefCast)
            .raw(&[0x6A]) // arrayref
            .op(coral_asm::op::DROP)
            .build(),
    );
    assert!(matches!(
        m.invoke(&mut vm, bad_cast, &[], 0).unwrap_err(),
        VmError::Trap(coral_asm::TrapKind::CastFailure)
    ));
}

#[test]
fn br_on_cast_branches_by_runtime_type() {
    let mut m = TestModule::new();
    let st = m.push_type(SubType::final_type(CompositeType::Struct(StructType {
        fields: vec![],
    })));
    // Returns 1 when the operand is a struct, 0 when it is an i31.
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[ValType::I64],
        FuncBody::new()
            // pick operand: struct or i31
            .local_get(0)
            .if_(BT_EMPTY)
            .gc(GcOp::StructNewDefault)
            .u32(st)
            .local_set(1)
            .else_()
            .i32_const(3)
            .gc(GcOp::RefI31)
            .local_set(1)
            .end()
            .block(BT_EMPTY)
            .local_get(1)
            .gc(GcOp::BrOnCast)
            .raw(&[0x03]) // both nullable
            .u32(0)
            .raw(&[0x6E]) // source: anyref
            .raw(&[0x6B]) // target: structref
            .op(coral_asm::op::DROP)
            .i32_const(0)
            .op(coral_asm::op::RETURN)
            .end()
            .op(coral_asm::op::DROP)
            .i32_const(1)
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[1]).unwrap(), 1);
    assert_eq!(m.call1(&mut vm, f, &[0]).unwrap(), 0);
}

#[test]
fn collector_keeps_operand_stack_roots_alive() {
    // Allocate far past the collection interval. Each iteration makes a
    // struct whose only root is the operand it leaves for `array.new`, so
    // a collection check inside the allocating opcode must scan the
    // operand stack or the element comes back dangling.
    let mut m = TestModule::new();
    let st = m.push_type(SubType::final_type(CompositeType::Struct(StructType {
        fields: vec![i32_field(false)],
    })));
    let arr = m.push_type(SubType::final_type(CompositeType::Array(ArrayType {
        elem: FieldType {
            storage: StorageType::Val(ValType::Ref(RefType::nullable(HeapType::Struct))),
            mutable: false,
        },
    })));

    // For i in 0..n: array.new(struct.new(i), 3), then read element 0's
    // field back and fold the comparison into `ok`.
    let f = m.add_func(
        &[ValType::I32],
        &[ValType::I32],
        &[ValType::I32, ValType::I32],
        FuncBody::new()
            .i32_const(1)
            .local_set(2) // ok = 1
            .block(BT_EMPTY)
            .loop_(BT_EMPTY)
            .local_get(1)
            .local_get(0)
            .op(coral_asm::op::I32_GE_S)
            .br_if(1)
            // struct.new(i): the ref lives only on the operand stack.
            .local_get(1)
            .gc(GcOp::StructNew)
            .u32(st)
            .i32_const(3)
            .gc(GcOp::ArrayNew)
            .u32(arr)
            // Read it back through the array.
            .i32_const(0)
            .gc(GcOp::ArrayGet)
            .u32(arr)
            .gc(GcOp::StructGet)
            .u32(st)
            .u32(0)
            .local_get(1)
            .op(coral_asm::op::I32_EQ)
            .local_get(2)
            .op(coral_asm::op::I32_AND)
            .local_set(2)
            .local_get(1)
            .i32_const(1)
            .op(coral_asm::op::I32_ADD)
            .local_set(1)
            .br(0)
            .end()
            .end()
            .local_get(2)
            .build(),
    );

    let mut vm = Vm::new();
    // 6000 iterations = 12000 allocations, several collection cycles.
    assert_eq!(m.call1(&mut vm, f, &[6000]).unwrap(), 1);
    // The sweeps actually ran: almost everything allocated was garbage.
    assert!(m.store.heap.live() < 4500);
}

#[test]
fn subtype_chain_is_walked_for_concrete_casts() {
    let mut m = TestModule::new();
    // type 0: open struct; type 1: subtype of 0.
    let base = m.push_type(SubType {
        is_final: false,
        supertype: None,
        composite: CompositeType::Struct(StructType { fields: vec![] }),
    });
    let derived = m.push_type(SubType {
        is_final: true,
        supertype: Some(base),
        composite: CompositeType::Struct(StructType {
            fields: vec![i32_field(false)],
        }),
    });
    let f = m.add_func(
        &[],
        &[ValType::I32],
        &[],
        FuncBody::new()
            .i32_const(9)
            .gc(GcOp::StructNew)
            .u32(derived)
            .gc(GcOp::RefTest)
            .raw(&[0x00]) // concrete type 0 = base
            .build(),
    );
    let mut vm = Vm::new();
    assert_eq!(m.call1(&mut vm, f, &[]).unwrap(), 1);
}
