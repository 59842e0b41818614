//! Prefix sub-opcode spaces.
//!
//! Sub-opcodes are encoded as LEB128 u32 after the prefix byte. Each space
//! is an exhaustive enum over the ratified extensions the core supports;
//! `from_repr` rejects anything else.

#![allow(missing_docs)]

use strum::FromRepr;

/// Sub-opcodes of the GC prefix (`0xFB`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u32)]
pub enum GcOp {
    StructNew = 0x00,
    StructNewDefault = 0x01,
    StructGet = 0x02,
    StructGetS = 0x03,
    StructGetU = 0x04,
    StructSet = 0x05,
    ArrayNew = 0x06,
    ArrayNewDefault = 0x07,
    ArrayNewFixed = 0x08,
    ArrayNewData = 0x09,
    ArrayNewElem = 0x0A,
    ArrayGet = 0x0B,
    ArrayGetS = 0x0C,
    ArrayGetU = 0x0D,
    ArraySet = 0x0E,
    ArrayLen = 0x0F,
    ArrayFill = 0x10,
    ArrayCopy = 0x11,
    ArrayInitData = 0x12,
    ArrayInitElem = 0x13,
    RefTest = 0x14,
    RefTestNull = 0x15,
    RefCast = 0x16,
    RefCastNull = 0x17,
    BrOnCast = 0x18,
    BrOnCastFail = 0x19,
    AnyConvertExtern = 0x1A,
    ExternConvertAny = 0x1B,
    RefI31 = 0x1C,
    I31GetS = 0x1D,
    I31GetU = 0x1E,
}

/// Sub-opcodes of the misc prefix (`0xFC`): non-trapping truncation, bulk
/// memory, table ops, and the wide 128-bit arithmetic extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u32)]
pub enum MiscOp {
    I32TruncSatF32S = 0x00,
    I32TruncSatF32U = 0x01,
    I32TruncSatF64S = 0x02,
    I32TruncSatF64U = 0x03,
    I64TruncSatF32S = 0x04,
    I64TruncSatF32U = 0x05,
    I64TruncSatF64S = 0x06,
    I64TruncSatF64U = 0x07,
    MemoryInit = 0x08,
    DataDrop = 0x09,
    MemoryCopy = 0x0A,
    MemoryFill = 0x0B,
    TableInit = 0x0C,
    ElemDrop = 0x0D,
    TableCopy = 0x0E,
    TableGrow = 0x0F,
    TableSize = 0x10,
    TableFill = 0x11,
    I64Add128 = 0x13,
    I64Sub128 = 0x14,
    I64MulWideS = 0x15,
    I64MulWideU = 0x16,
}

/// Sub-opcodes of the SIMD prefix (`0xFD`), fixed-width 128-bit lanes,
/// including the relaxed extension (`0x100` and above).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u32)]
pub enum SimdOp {
    V128Load = 0x00,
    V128Load8x8S = 0x01,
    V128Load8x8U = 0x02,
    V128Load16x4S = 0x03,
    V128Load16x4U = 0x04,
    V128Load32x2S = 0x05,
    V128Load32x2U = 0x06,
    V128Load8Splat = 0x07,
    V128Load16Splat = 0x08,
    V128Load32Splat = 0x09,
    V128Load64Splat = 0x0A,
    V128Store = 0x0B,
    V128Const = 0x0C,
    I8x16Shuffle = 0x0D,
    I8x16Swizzle = 0x0E,
    I8x16Splat = 0x0F,
    I16x8Splat = 0x10,
    I32x4Splat = 0x11,
    I64x2Splat = 0x12,
    F32x4Splat = 0x13,
    F64x2Splat = 0x14,
    I8x16ExtractLaneS = 0x15,
    I8x16ExtractLaneU = 0x16,
    I8x16ReplaceLane = 0x17,
    I16x8ExtractLaneS = 0x18,
    I16x8ExtractLaneU = 0x19,
    I16x8ReplaceLane = 0x1A,
    I32x4ExtractLane = 0x1B,
    I32x4ReplaceLane = 0x1C,
    I64x2ExtractLane = 0x1D,
    I64x2ReplaceLane = 0x1E,
    F32x4ExtractLane = 0x1F,
    F32x4ReplaceLane = 0x20,
    F64x2ExtractLane = 0x21,
    F64x2ReplaceLane = 0x22,
    I8x16Eq = 0x23,
    I8x16Ne = 0x24,
    I8x16LtS = 0x25,
    I8x16LtU = 0x26,
    I8x16GtS = 0x27,
    I8x16GtU = 0x28,
    I8x16LeS = 0x29,
    I8x16LeU = 0x2A,
    I8x16GeS = 0x2B,
    I8x16GeU = 0x2C,
    I16x8Eq = 0x2D,
    I16x8Ne = 0x2E,
    I16x8LtS = 0x2F,
    I16x8LtU = 0x30,
    I16x8GtS = 0x31,
    I16x8GtU = 0x32,
    I16x8LeS = 0x33,
    I16x8LeU = 0x34,
    I16x8GeS = 0x35,
    I16x8GeU = 0x36,
    I32x4Eq = 0x37,
    I32x4Ne = 0x38,
    I32x4LtS = 0x39,
    I32x4LtU = 0x3A,
    I32x4GtS = 0x3B,
    I32x4GtU = 0x3C,
    I32x4LeS = 0x3D,
    I32x4LeU = 0x3E,
    I32x4GeS = 0x3F,
    I32x4GeU = 0x40,
    F32x4Eq = 0x41,
    F32x4Ne = 0x42,
    F32x4Lt = 0x43,
    F32x4Gt = 0x44,
    F32x4Le = 0x45,
    F32x4Ge = 0x46,
    F64x2Eq = 0x47,
    F64x2Ne = 0x48,
    F64x2Lt = 0x49,
    F64x2Gt = 0x4A,
    F64x2Le = 0x4B,
    F64x2Ge = 0x4C,
    V128Not = 0x4D,
    V128And = 0x4E,
    V128AndNot = 0x4F,
    V128Or = 0x50,
    V128Xor = 0x51,
    V128Bitselect = 0x52,
    V128AnyTrue = 0x53,
    V128Load8Lane = 0x54,
    V128Load16Lane = 0x55,
    V128Load32Lane = 0x56,
    V128Load64Lane = 0x57,
    V128Store8Lane = 0x58,
    V128Store16Lane = 0x59,
    V128Store32Lane = 0x5A,
    V128Store64Lane = 0x5B,
    V128Load32Zero = 0x5C,
    V128Load64Zero = 0x5D,
    F32x4DemoteF64x2Zero = 0x5E,
    F64x2PromoteLowF32x4 = 0x5F,
    I8x16Abs = 0x60,
    I8x16Neg = 0x61,
    I8x16Popcnt = 0x62,
    I8x16AllTrue = 0x63,
    I8x16Bitmask = 0x64,
    I8x16NarrowI16x8S = 0x65,
    I8x16NarrowI16x8U = 0x66,
    F32x4Ceil = 0x67,
    F32x4Floor = 0x68,
    F32x4Trunc = 0x69,
    F32x4Nearest = 0x6A,
    I8x16Shl = 0x6B,
    I8x16ShrS = 0x6C,
    I8x16ShrU = 0x6D,
    I8x16Add = 0x6E,
    I8x16AddSatS = 0x6F,
    I8x16AddSatU = 0x70,
    I8x16Sub = 0x71,
    I8x16SubSatS = 0x72,
    I8x16SubSatU = 0x73,
    F64x2Ceil = 0x74,
    F64x2Floor = 0x75,
    I8x16MinS = 0x76,
    I8x16MinU = 0x77,
    I8x16MaxS = 0x78,
    I8x16MaxU = 0x79,
    F64x2Trunc = 0x7A,
    I8x16AvgrU = 0x7B,
    I16x8ExtaddPairwiseI8x16S = 0x7C,
    I16x8ExtaddPairwiseI8x16U = 0x7D,
    I32x4ExtaddPairwiseI16x8S = 0x7E,
    I32x4ExtaddPairwiseI16x8U = 0x7F,
    I16x8Abs = 0x80,
    I16x8Neg = 0x81,
    I16x8Q15MulrSatS = 0x82,
    I16x8AllTrue = 0x83,
    I16x8Bitmask = 0x84,
    I16x8NarrowI32x4S = 0x85,
    I16x8NarrowI32x4U = 0x86,
    I16x8ExtendLowI8x16S = 0x87,
    I16x8ExtendHighI8x16S = 0x88,
    I16x8ExtendLowI8x16U = 0x89,
    I16x8ExtendHighI8x16U = 0x8A,
    I16x8Shl = 0x8B,
    I16x8ShrS = 0x8C,
    I16x8ShrU = 0x8D,
    I16x8Add = 0x8E,
    I16x8AddSatS = 0x8F,
    I16x8AddSatU = 0x90,
    I16x8Sub = 0x91,
    I16x8SubSatS = 0x92,
    I16x8SubSatU = 0x93,
    F64x2Nearest = 0x94,
    I16x8Mul = 0x95,
    I16x8MinS = 0x96,
    I16x8MinU = 0x97,
    I16x8MaxS = 0x98,
    I16x8MaxU = 0x99,
    I16x8AvgrU = 0x9B,
    I16x8ExtmulLowI8x16S = 0x9C,
    I16x8ExtmulHighI8x16S = 0x9D,
    I16x8ExtmulLowI8x16U = 0x9E,
    I16x8ExtmulHighI8x16U = 0x9F,
    I32x4Abs = 0xA0,
    I32x4Neg = 0xA1,
    I32x4AllTrue = 0xA3,
    I32x4Bitmask = 0xA4,
    I32x4ExtendLowI16x8S = 0xA7,
    I32x4ExtendHighI16x8S = 0xA8,
    I32x4ExtendLowI16x8U = 0xA9,
    I32x4ExtendHighI16x8U = 0xAA,
    I32x4Shl = 0xAB,
    I32x4ShrS = 0xAC,
    I32x4ShrU = 0xAD,
    I32x4Add = 0xAE,
    I32x4Sub = 0xB1,
    I32x4Mul = 0xB5,
    I32x4MinS = 0xB6,
    I32x4MinU = 0xB7,
    I32x4MaxS = 0xB8,
    I32x4MaxU = 0xB9,
    I32x4DotI16x8S = 0xBA,
    I32x4ExtmulLowI16x8S = 0xBC,
    I32x4ExtmulHighI16x8S = 0xBD,
    I32x4ExtmulLowI16x8U = 0xBE,
    I32x4ExtmulHighI16x8U = 0xBF,
    I64x2Abs = 0xC0,
    I64x2Neg = 0xC1,
    I64x2AllTrue = 0xC3,
    I64x2Bitmask = 0xC4,
    I64x2ExtendLowI32x4S = 0xC7,
    I64x2ExtendHighI32x4S = 0xC8,
    I64x2ExtendLowI32x4U = 0xC9,
    I64x2ExtendHighI32x4U = 0xCA,
    I64x2Shl = 0xCB,
    I64x2ShrS = 0xCC,
    I64x2ShrU = 0xCD,
    I64x2Add = 0xCE,
    I64x2Sub = 0xD1,
    I64x2Mul = 0xD5,
    I64x2Eq = 0xD6,
    I64x2Ne = 0xD7,
    I64x2LtS = 0xD8,
    I64x2GtS = 0xD9,
    I64x2LeS = 0xDA,
    I64x2GeS = 0xDB,
    I64x2ExtmulLowI32x4S = 0xDC,
    I64x2ExtmulHighI32x4S = 0xDD,
    I64x2ExtmulLowI32x4U = 0xDE,
    I64x2ExtmulHighI32x4U = 0xDF,
    F32x4Abs = 0xE0,
    F32x4Neg = 0xE1,
    F32x4Sqrt = 0xE3,
    F32x4Add = 0xE4,
    F32x4Sub = 0xE5,
    F32x4Mul = 0xE6,
    F32x4Div = 0xE7,
    F32x4Min = 0xE8,
    F32x4Max = 0xE9,
    F32x4Pmin = 0xEA,
    F32x4Pmax = 0xEB,
    F64x2Abs = 0xEC,
    F64x2Neg = 0xED,
    F64x2Sqrt = 0xEF,
    F64x2Add = 0xF0,
    F64x2Sub = 0xF1,
    F64x2Mul = 0xF2,
    F64x2Div = 0xF3,
    F64x2Min = 0xF4,
    F64x2Max = 0xF5,
    F64x2Pmin = 0xF6,
    F64x2Pmax = 0xF7,
    I32x4TruncSatF32x4S = 0xF8,
    I32x4TruncSatF32x4U = 0xF9,
    F32x4ConvertI32x4S = 0xFA,
    F32x4ConvertI32x4U = 0xFB,
    I32x4TruncSatF64x2SZero = 0xFC,
    I32x4TruncSatF64x2UZero = 0xFD,
    F64x2ConvertLowI32x4S = 0xFE,
    F64x2ConvertLowI32x4U = 0xFF,
    I8x16RelaxedSwizzle = 0x100,
    I32x4RelaxedTruncF32x4S = 0x101,
    I32x4RelaxedTruncF32x4U = 0x102,
    I32x4RelaxedTruncF64x2SZero = 0x103,
    I32x4RelaxedTruncF64x2UZero = 0x104,
    F32x4RelaxedMadd = 0x105,
    F32x4RelaxedNmadd = 0x106,
    F64x2RelaxedMadd = 0x107,
    F64x2RelaxedNmadd = 0x108,
    I8x16RelaxedLaneselect = 0x109,
    I16x8RelaxedLaneselect = 0x10A,
    I32x4RelaxedLaneselect = 0x10B,
    I64x2RelaxedLaneselect = 0x10C,
    F32x4RelaxedMin = 0x10D,
    F32x4RelaxedMax = 0x10E,
    F64x2RelaxedMin = 0x10F,
    F64x2RelaxedMax = 0x110,
    I16x8RelaxedQ15MulrS = 0x111,
    I16x8RelaxedDotI8x16I7x16S = 0x112,
    I32x4RelaxedDotI8x16I7x16AddS = 0x113,
}

/// Sub-opcodes of the atomic prefix (`0xFE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u32)]
pub enum AtomicOp {
    MemoryAtomicNotify = 0x00,
    MemoryAtomicWait32 = 0x01,
    MemoryAtomicWait64 = 0x02,
    AtomicFence = 0x03,
    I32AtomicLoad = 0x10,
    I64AtomicLoad = 0x11,
    I32AtomicLoad8U = 0x12,
    I32AtomicLoad16U = 0x13,
    I64AtomicLoad8U = 0x14,
    I64AtomicLoad16U = 0x15,
    I64AtomicLoad32U = 0x16,
    I32AtomicStore = 0x17,
    I64AtomicStore = 0x18,
    I32AtomicStore8 = 0x19,
    I32AtomicStore16 = 0x1A,
    I64AtomicStore8 = 0x1B,
    I64AtomicStore16 = 0x1C,
    I64AtomicStore32 = 0x1D,
    I32AtomicRmwAdd = 0x1E,
    I64AtomicRmwAdd = 0x1F,
    I32AtomicRmw8AddU = 0x20,
    I32AtomicRmw16AddU = 0x21,
    I64AtomicRmw8AddU = 0x22,
    I64AtomicRmw16AddU = 0x23,
    I64AtomicRmw32AddU = 0x24,
    I32AtomicRmwSub = 0x25,
    I64AtomicRmwSub = 0x26,
    I32AtomicRmw8SubU = 0x27,
    I32AtomicRmw16SubU = 0x28,
    I64AtomicRmw8SubU = 0x29,
    I64AtomicRmw16SubU = 0x2A,
    I64AtomicRmw32SubU = 0x2B,
    I32AtomicRmwAnd = 0x2C,
    I64AtomicRmwAnd = 0x2D,
    I32AtomicRmw8AndU = 0x2E,
    I32AtomicRmw16AndU = 0x2F,
    I64AtomicRmw8AndU = 0x30,
    I64AtomicRmw16AndU = 0x31,
    I64AtomicRmw32AndU = 0x32,
    I32AtomicRmwOr = 0x33,
    I64AtomicRmwOr = 0x34,
    I32AtomicRmw8OrU = 0x35,
    I32AtomicRmw16OrU = 0x36,
    I64AtomicRmw8OrU = 0x37,
    I64AtomicRmw16OrU = 0x38,
    I64AtomicRmw32OrU = 0x39,
    I32AtomicRmwXor = 0x3A,
    I64AtomicRmwXor = 0x3B,
    I32AtomicRmw8XorU = 0x3C,
    I32AtomicRmw16XorU = 0x3D,
    I64AtomicRmw8XorU = 0x3E,
    I64AtomicRmw16XorU = 0x3F,
    I64AtomicRmw32XorU = 0x40,
    I32AtomicRmwXchg = 0x41,
    I64AtomicRmwXchg = 0x42,
    I32AtomicRmw8XchgU = 0x43,
    I32AtomicRmw16XchgU = 0x44,
    I64AtomicRmw8XchgU = 0x45,
    I64AtomicRmw16XchgU = 0x46,
    I64AtomicRmw32XchgU = 0x47,
    I32AtomicRmwCmpxchg = 0x48,
    I64AtomicRmwCmpxchg = 0x49,
    I32AtomicRmw8CmpxchgU = 0x4A,
    I32AtomicRmw16CmpxchgU = 0x4B,
    I64AtomicRmw8CmpxchgU = 0x4C,
    I64AtomicRmw16CmpxchgU = 0x4D,
    I64AtomicRmw32CmpxchgU = 0x4E,
}
