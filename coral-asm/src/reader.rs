use bitflags::bitflags;
use coral_types::{HeapType, RefType, ValType};

use crate::{op, TrapKind};

type Result<T> = core::result::Result<T, TrapKind>;

bitflags! {
    /// Flag bits of a memarg alignment field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemArgFlags: u32 {
        /// A memory index immediate follows the offset.
        const MEMORY_INDEX = 0x40;
    }
}

/// Memory-operation immediate: alignment hint, byte offset, memory index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemArg {
    /// Log2 of the alignment hint.
    pub align: u32,
    /// Constant byte offset added to the dynamic address.
    pub offset: u64,
    /// Memory index; 0 unless the multi-memory flag bit was set.
    pub memory: u32,
}

/// Signature of a structured block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// `[] -> []`
    Empty,
    /// `[] -> [t]`
    Value(ValType),
    /// Index into the module function-type table.
    TypeIndex(u32),
}

/// Cursor over a raw function body.
///
/// All reads are bounds-checked; a truncated body surfaces as
/// [`TrapKind::InvalidBytecode`], never as a panic.
#[derive(Debug, Clone)]
pub struct BytecodeReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BytecodeReader<'a> {
    /// New cursor at the start of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// New cursor at `pos`.
    pub fn new_at(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    /// Current byte position.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Move the cursor.
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Whether the cursor has consumed the whole body.
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or(TrapKind::InvalidBytecode)?;
        self.pos += 1;
        Ok(b)
    }

    /// Read a fixed-size byte array.
    pub fn read_bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos.checked_add(N).ok_or(TrapKind::InvalidBytecode)?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(TrapKind::InvalidBytecode)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    /// Read an unsigned LEB128 u32.
    pub fn read_u32(&mut self) -> Result<u32> {
        let mut result: u32 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift == 28 && byte > 0x0F {
                return Err(TrapKind::InvalidBytecode);
            }
            result |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift >= 32 {
                return Err(TrapKind::InvalidBytecode);
            }
        }
    }

    /// Read an unsigned LEB128 u64.
    pub fn read_u64(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift == 63 && byte > 0x01 {
                return Err(TrapKind::InvalidBytecode);
            }
            result |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift >= 64 {
                return Err(TrapKind::InvalidBytecode);
            }
        }
    }

    /// Read a signed LEB128 i32.
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_s64(32)? as i32)
    }

    /// Read a signed LEB128 i64.
    pub fn read_i64(&mut self) -> Result<i64> {
        self.read_s64(64)
    }

    /// Read a signed LEB128 s33 (block types, heap types).
    pub fn read_s33(&mut self) -> Result<i64> {
        self.read_s64(33)
    }

    fn read_s64(&mut self, bits: u32) -> Result<i64> {
        let mut result: i64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            result |= i64::from(byte & 0x7F) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
            if shift >= bits + 7 {
                return Err(TrapKind::InvalidBytecode);
            }
        }
    }

    /// Read a little-endian f32 bit pattern.
    pub fn read_f32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_bytes::<4>()?))
    }

    /// Read a little-endian f64 bit pattern.
    pub fn read_f64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_bytes::<8>()?))
    }

    /// Read a memarg. Bit 6 of the alignment field signals a following
    /// memory-index immediate (multi-memory).
    pub fn read_memarg(&mut self) -> Result<MemArg> {
        let raw = self.read_u32()?;
        let flags = MemArgFlags::from_bits_truncate(raw);
        let align = raw & !MemArgFlags::MEMORY_INDEX.bits();
        let memory = if flags.contains(MemArgFlags::MEMORY_INDEX) {
            self.read_u32()?
        } else {
            0
        };
        let offset = self.read_u64()?;
        Ok(MemArg {
            align,
            offset,
            memory,
        })
    }

    /// Read a heap type from its s33 encoding.
    pub fn read_heap_type(&mut self) -> Result<HeapType> {
        let v = self.read_s33()?;
        if v >= 0 {
            return Ok(HeapType::Concrete(
                u32::try_from(v).map_err(|_| TrapKind::InvalidBytecode)?,
            ));
        }
        heap_type_from_code(v)
    }

    /// Read a value type, including the composite `(ref null? ht)` forms.
    pub fn read_val_type(&mut self) -> Result<ValType> {
        let byte = self.read_u8()?;
        Ok(match byte {
            0x7F => ValType::I32,
            0x7E => ValType::I64,
            0x7D => ValType::F32,
            0x7C => ValType::F64,
            0x7B => ValType::V128,
            0x63 => ValType::Ref(RefType::nullable(self.read_heap_type()?)),
            0x64 => ValType::Ref(RefType::non_nullable(self.read_heap_type()?)),
            other => {
                // Shorthand codes are one-byte signed LEBs: bit 6 is the
                // sign of the 7-bit payload.
                if other & 0xC0 != 0x40 {
                    return Err(TrapKind::InvalidBytecode);
                }
                let code = i64::from(other & 0x7F) - 0x80;
                ValType::Ref(RefType::nullable(heap_type_from_code(code)?))
            }
        })
    }

    /// Read a block type: empty, a single value type, or a type index.
    pub fn read_block_type(&mut self) -> Result<BlockType> {
        // Peek: non-negative s33 values are type indices, which must be
        // re-read as LEB; single-byte codes are value types.
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(TrapKind::InvalidBytecode)?;
        if byte == 0x40 {
            self.pos += 1;
            return Ok(BlockType::Empty);
        }
        // Single-byte codes 0x41..=0x7F are value types; anything else
        // (small positives, multi-byte LEBs) is a type index.
        if (0x41..=0x7F).contains(&byte) {
            return Ok(BlockType::Value(self.read_val_type()?));
        }
        let idx = self.read_s33()?;
        Ok(BlockType::TypeIndex(
            u32::try_from(idx).map_err(|_| TrapKind::InvalidBytecode)?,
        ))
    }
}

fn heap_type_from_code(code: i64) -> Result<HeapType> {
    Ok(match code {
        -0x0C => HeapType::NoExn,
        -0x0D => HeapType::NoFunc,
        -0x0E => HeapType::NoExtern,
        -0x0F => HeapType::None,
        -0x10 => HeapType::Func,
        -0x11 => HeapType::Extern,
        -0x12 => HeapType::Any,
        -0x13 => HeapType::Eq,
        -0x14 => HeapType::I31,
        -0x15 => HeapType::Struct,
        -0x16 => HeapType::Array,
        -0x17 => HeapType::Exn,
        _ => return Err(TrapKind::InvalidBytecode),
    })
}

/// Skip the immediate operands of the instruction whose opcode byte was just
/// read. Used by the branch-table pass and the on-demand forward scanner;
/// must agree byte-for-byte with what the executors consume.
pub fn skip_instruction(reader: &mut BytecodeReader<'_>, opcode: u8) -> Result<()> {
    match opcode {
        op::BLOCK | op::LOOP | op::IF => {
            reader.read_block_type()?;
        }
        op::TRY_TABLE => {
            reader.read_block_type()?;
            let count = reader.read_u32()?;
            for _ in 0..count {
                let kind = reader.read_u8()?;
                match kind {
                    0x00 | 0x01 => {
                        reader.read_u32()?;
                        reader.read_u32()?;
                    }
                    0x02 | 0x03 => {
                        reader.read_u32()?;
                    }
                    _ => return Err(TrapKind::InvalidBytecode),
                }
            }
        }
        op::THROW
        | op::BR
        | op::BR_IF
        | op::CALL
        | op::RETURN_CALL
        | op::CALL_REF
        | op::RETURN_CALL_REF
        | op::LOCAL_GET
        | op::LOCAL_SET
        | op::LOCAL_TEE
        | op::GLOBAL_GET
        | op::GLOBAL_SET
        | op::TABLE_GET
        | op::TABLE_SET
        | op::MEMORY_SIZE
        | op::MEMORY_GROW
        | op::REF_FUNC
        | op::BR_ON_NULL
        | op::BR_ON_NON_NULL => {
            reader.read_u32()?;
        }
        op::BR_TABLE => {
            let count = reader.read_u32()?;
            for _ in 0..=count {
                reader.read_u32()?;
            }
        }
        op::CALL_INDIRECT | op::RETURN_CALL_INDIRECT => {
            reader.read_u32()?;
            reader.read_u32()?;
        }
        op::SELECT_T => {
            let count = reader.read_u32()?;
            for _ in 0..count {
                reader.read_val_type()?;
            }
        }
        op::I32_LOAD..=op::I64_STORE32 => {
            reader.read_memarg()?;
        }
        op::I32_CONST => {
            reader.read_i32()?;
        }
        op::I64_CONST => {
            reader.read_i64()?;
        }
        op::F32_CONST => {
            reader.read_f32()?;
        }
        op::F64_CONST => {
            reader.read_f64()?;
        }
        op::REF_NULL => {
            reader.read_heap_type()?;
        }
        op::GC_PREFIX => {
            skip_gc_immediates(reader)?;
        }
        op::MISC_PREFIX => {
            skip_misc_immediates(reader)?;
        }
        op::SIMD_PREFIX => {
            skip_simd_immediates(reader)?;
        }
        op::ATOMIC_PREFIX => {
            skip_atomic_immediates(reader)?;
        }
        _ => {}
    }
    Ok(())
}

fn skip_gc_immediates(reader: &mut BytecodeReader<'_>) -> Result<()> {
    use crate::GcOp;

    let sub = GcOp::from_repr(reader.read_u32()?).ok_or(TrapKind::InvalidBytecode)?;
    match sub {
        GcOp::StructNew
        | GcOp::StructNewDefault
        | GcOp::ArrayNew
        | GcOp::ArrayNewDefault
        | GcOp::ArrayGet
        | GcOp::ArrayGetS
        | GcOp::ArrayGetU
        | GcOp::ArraySet
        | GcOp::ArrayFill => {
            reader.read_u32()?;
        }
        GcOp::StructGet
        | GcOp::StructGetS
        | GcOp::StructGetU
        | GcOp::StructSet
        | GcOp::ArrayNewFixed
        | GcOp::ArrayNewData
        | GcOp::ArrayNewElem
        | GcOp::ArrayInitData
        | GcOp::ArrayInitElem
        | GcOp::ArrayCopy => {
            reader.read_u32()?;
            reader.read_u32()?;
        }
        GcOp::RefTest | GcOp::RefTestNull | GcOp::RefCast | GcOp::RefCastNull => {
            reader.read_heap_type()?;
        }
        GcOp::BrOnCast | GcOp::BrOnCastFail => {
            reader.read_u8()?;
            reader.read_u32()?;
            reader.read_heap_type()?;
            reader.read_heap_type()?;
        }
        GcOp::ArrayLen
        | GcOp::AnyConvertExtern
        | GcOp::ExternConvertAny
        | GcOp::RefI31
        | GcOp::I31GetS
        | GcOp::I31GetU => {}
    }
    Ok(())
}

fn skip_misc_immediates(reader: &mut BytecodeReader<'_>) -> Result<()> {
    use crate::MiscOp;

    let sub = MiscOp::from_repr(reader.read_u32()?).ok_or(TrapKind::InvalidBytecode)?;
    match sub {
        MiscOp::MemoryInit
        | MiscOp::MemoryCopy
        | MiscOp::TableInit
        | MiscOp::TableCopy => {
            reader.read_u32()?;
            reader.read_u32()?;
        }
        MiscOp::DataDrop
        | MiscOp::MemoryFill
        | MiscOp::ElemDrop
        | MiscOp::TableGrow
        | MiscOp::TableSize
        | MiscOp::TableFill => {
            reader.read_u32()?;
        }
        _ => {}
    }
    Ok(())
}

fn skip_simd_immediates(reader: &mut BytecodeReader<'_>) -> Result<()> {
    use crate::SimdOp;

    let sub = SimdOp::from_repr(reader.read_u32()?).ok_or(TrapKind::InvalidBytecode)?;
    match sub {
        SimdOp::V128Load
        | SimdOp::V128Load8x8S
        | SimdOp::V128Load8x8U
        | SimdOp::V128Load16x4S
        | SimdOp::V128Load16x4U
        | SimdOp::V128Load32x2S
        | SimdOp::V128Load32x2U
        | SimdOp::V128Load8Splat
        | SimdOp::V128Load16Splat
        | SimdOp::V128Load32Splat
        | SimdOp::V128Load64Splat
        | SimdOp::V128Store
        | SimdOp::V128Load32Zero
        | SimdOp::V128Load64Zero => {
            reader.read_memarg()?;
        }
        SimdOp::V128Load8Lane
        | SimdOp::V128Load16Lane
        | SimdOp::V128Load32Lane
        | SimdOp::V128Load64Lane
        | SimdOp::V128Store8Lane
        | SimdOp::V128Store16Lane
        | SimdOp::V128Store32Lane
        | SimdOp::V128Store64Lane => {
            reader.read_memarg()?;
            reader.read_u8()?;
        }
        SimdOp::V128Const | SimdOp::I8x16Shuffle => {
            reader.read_bytes::<16>()?;
        }
        SimdOp::I8x16ExtractLaneS
        | SimdOp::I8x16ExtractLaneU
        | SimdOp::I8x16ReplaceLane
        | SimdOp::I16x8ExtractLaneS
        | SimdOp::I16x8ExtractLaneU
        | SimdOp::I16x8ReplaceLane
        | SimdOp::I32x4ExtractLane
        | SimdOp::I32x4ReplaceLane
        | SimdOp::I64x2ExtractLane
        | SimdOp::I64x2ReplaceLane
        | SimdOp::F32x4ExtractLane
        | SimdOp::F32x4ReplaceLane
        | SimdOp::F64x2ExtractLane
        | SimdOp::F64x2ReplaceLane => {
            reader.read_u8()?;
        }
        _ => {}
    }
    Ok(())
}

fn skip_atomic_immediates(reader: &mut BytecodeReader<'_>) -> Result<()> {
    use crate::AtomicOp;

    let sub = AtomicOp::from_repr(reader.read_u32()?).ok_or(TrapKind::InvalidBytecode)?;
    match sub {
        AtomicOp::AtomicFence => {
            reader.read_u8()?;
        }
        _ => {
            reader.read_memarg()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[0x00], 0)]
    #[case(&[0x7F], 127)]
    #[case(&[0x80, 0x01], 128)]
    #[case(&[0xE5, 0x8E, 0x26], 624485)]
    #[case(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F], u32::MAX)]
    fn unsigned_leb_decodes(#[case] bytes: &[u8], #[case] expected: u32) {
        let mut r = BytecodeReader::new(bytes);
        assert_eq!(r.read_u32().unwrap(), expected);
        assert!(r.is_at_end());
    }

    #[rstest]
    #[case(&[0x00], 0)]
    #[case(&[0x7F], -1)]
    #[case(&[0x3F], 63)]
    #[case(&[0x40], -64)]
    #[case(&[0xC0, 0xBB, 0x78], -123456)]
    fn signed_leb_decodes(#[case] bytes: &[u8], #[case] expected: i32) {
        let mut r = BytecodeReader::new(bytes);
        assert_eq!(r.read_i32().unwrap(), expected);
    }

    #[test]
    fn truncated_input_is_malformed() {
        let mut r = BytecodeReader::new(&[0x80]);
        assert_eq!(r.read_u32(), Err(TrapKind::InvalidBytecode));
    }

    #[test]
    fn memarg_multi_memory_bit() {
        // align=2 with the memory-index bit, memory 3, offset 16.
        let mut r = BytecodeReader::new(&[0x42, 0x03, 0x10]);
        let arg = r.read_memarg().unwrap();
        assert_eq!(arg.align, 2);
        assert_eq!(arg.memory, 3);
        assert_eq!(arg.offset, 16);

        // Plain memarg addresses memory 0.
        let mut r = BytecodeReader::new(&[0x02, 0x10]);
        let arg = r.read_memarg().unwrap();
        assert_eq!(arg.memory, 0);
    }

    #[test]
    fn block_types() {
        let mut r = BytecodeReader::new(&[0x40]);
        assert_eq!(r.read_block_type().unwrap(), BlockType::Empty);

        let mut r = BytecodeReader::new(&[0x7F]);
        assert_eq!(r.read_block_type().unwrap(), BlockType::Value(ValType::I32));

        let mut r = BytecodeReader::new(&[0x05]);
        assert_eq!(r.read_block_type().unwrap(), BlockType::TypeIndex(5));
    }
}
