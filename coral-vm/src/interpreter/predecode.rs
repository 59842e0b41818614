//! Pre-decoded IR: a fixed-width lowering of a function body with
//! pre-resolved branch targets and fused super-instructions.
//!
//! One record per Wasm instruction: `{op: u16, operand: u32, extra: u16}`.
//! Wasm opcodes keep their natural positions; misc-prefix ops live in the
//! `0xFC00` range; superops and the extension slot live above `0x0100`.
//! Superops occupy the slots of the instructions they fuse, so record
//! indices (and every pre-resolved target) stay stable; fusion never
//! crosses a branch target.
//!
//! The pass declines (latched by the caller, falling back to the bytecode
//! tier) functions using SIMD, GC, atomics, exception handling, or a
//! non-zero memory index; those features are the baseline tier's job.

use coral_asm::{op, BlockType, BytecodeReader, MiscOp, TrapKind};

/// Superop and internal opcode ids.
pub mod ir_op {
    /// Extension slot: carries data for the preceding record, never
    /// executed directly.
    pub const EXT: u16 = 0x0100;
    /// `local.get; local.get` (2 slots).
    pub const LOCAL_GET2: u16 = 0x0101;
    /// `local.get; i32.const` (2 slots).
    pub const LOCAL_GET_CONST32: u16 = 0x0102;
    /// `local.get; local.get; i32.add` (3 slots).
    pub const LGET2_ADD_I32: u16 = 0x0103;
    /// `local.get; local.get; i32.sub` (3 slots).
    pub const LGET2_SUB_I32: u16 = 0x0104;
    /// `local.get; local.get; i32.gt_s` (3 slots).
    pub const LGET2_GT_S_I32: u16 = 0x0105;
    /// `local.get; local.get; i32.le_s` (3 slots).
    pub const LGET2_LE_S_I32: u16 = 0x0106;
    /// `local.get; i32.const; i32.add` (3 slots).
    pub const LGETC_ADD_I32: u16 = 0x0107;
    /// `local.get; i32.const; i32.sub` (3 slots).
    pub const LGETC_SUB_I32: u16 = 0x0108;
    /// `local.get; i32.const; i32.lt_s` (3 slots).
    pub const LGETC_LT_S_I32: u16 = 0x0109;
    /// `local.get; i32.const; i32.ge_s` (3 slots).
    pub const LGETC_GE_S_I32: u16 = 0x010A;
    /// `local.get; i32.const; i32.lt_u` (3 slots).
    pub const LGETC_LT_U_I32: u16 = 0x010B;
}

/// Block-type arity is a type index, resolved at execution time.
pub const EXTRA_TYPE_INDEX: u16 = 0x8000;
/// The `if` has an else branch (set on the `if` record).
pub const EXTRA_HAS_ELSE: u16 = 0x4000;
/// Literal arity / type index bits.
pub const EXTRA_VALUE_MASK: u16 = 0x3FFF;

/// Widest literal block arity; anything larger goes through a type index.
pub const MAX_LITERAL_ARITY: u16 = 7;

/// One fixed-width IR record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrInstr {
    /// Opcode (see module docs for the spaces).
    pub op: u16,
    /// Pre-resolved target, immediate, pool index, or depth.
    pub operand: u32,
    /// Arity encoding or secondary immediate.
    pub extra: u16,
}

static_assertions::assert_eq_size!(IrInstr, u64);

/// A pre-decoded function body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IrBody {
    /// Records, one or more slots per source instruction.
    pub code: Vec<IrInstr>,
    /// Constants wider than 32 bits, indexed by record operands.
    pub pool: Vec<u64>,
}

/// Why a body did not pre-decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredecodeError {
    /// Uses features served by the bytecode tier.
    Refused,
    /// Malformed bytecode.
    Malformed,
}

impl From<TrapKind> for PredecodeError {
    fn from(_: TrapKind) -> Self {
        PredecodeError::Malformed
    }
}

type Result<T> = core::result::Result<T, PredecodeError>;

struct CtlEntry {
    /// Record index of the opener; `usize::MAX` for the function body.
    opener: usize,
    /// Opener opcode byte.
    kind: u8,
    /// Extension-slot index still awaiting its false-target patch.
    ext: Option<usize>,
    /// Record indices whose operand patches to the end target.
    fixups: Vec<usize>,
}

/// Lower a function body to the fixed-width IR.
pub fn build(body: &[u8]) -> Result<IrBody> {
    let mut code: Vec<IrInstr> = Vec::new();
    let mut pool: Vec<u64> = Vec::new();
    let mut targets: Vec<usize> = Vec::new();
    let mut reader = BytecodeReader::new(body);
    let mut ctl = vec![CtlEntry {
        opener: usize::MAX,
        kind: 0,
        ext: None,
        fixups: Vec::new(),
    }];

    loop {
        if reader.is_at_end() {
            break;
        }
        let opcode = reader.read_u8()?;
        match opcode {
            op::BLOCK | op::LOOP | op::IF => {
                let extra = encode_block_type(reader.read_block_type()?)?;
                let idx = code.len();
                let operand = if opcode == op::LOOP {
                    // Loop header: the record after the opener.
                    targets.push(idx + 1);
                    (idx + 1) as u32
                } else {
                    0 // end target, patched at the matching end
                };
                code.push(IrInstr {
                    op: u16::from(opcode),
                    operand,
                    extra,
                });
                let ext = if opcode == op::IF {
                    code.push(IrInstr {
                        op: ir_op::EXT,
                        operand: 0,
                        extra: 0,
                    });
                    Some(idx + 1)
                } else {
                    None
                };
                let fixups = if opcode == op::LOOP { Vec::new() } else { vec![idx] };
                ctl.push(CtlEntry {
                    opener: idx,
                    kind: opcode,
                    ext,
                    fixups,
                });
            }

            op::ELSE => {
                let entry = ctl.last_mut().ok_or(PredecodeError::Malformed)?;
                if entry.kind != op::IF {
                    return Err(PredecodeError::Malformed);
                }
                let idx = code.len();
                code.push(IrInstr {
                    op: u16::from(op::ELSE),
                    operand: 0, // end target
                    extra: 0,
                });
                // Mark the if as two-armed and point its false edge just
                // past the else record.
                code[entry.opener].extra |= EXTRA_HAS_ELSE;
                if let Some(ext) = entry.ext.take() {
                    code[ext].operand = (idx + 1) as u32;
                    targets.push(idx + 1);
                }
                entry.fixups.push(idx);
            }

            op::END => {
                let entry = ctl.pop().ok_or(PredecodeError::Malformed)?;
                let idx = code.len();
                code.push(IrInstr {
                    op: u16::from(op::END),
                    operand: 0,
                    extra: 0,
                });
                if entry.opener == usize::MAX {
                    break;
                }
                let end_target = idx + 1;
                targets.push(end_target);
                if entry.kind != op::LOOP {
                    code[entry.opener].operand = end_target as u32;
                }
                if let Some(ext) = entry.ext {
                    // One-armed if: the false edge skips the whole block.
                    code[ext].operand = end_target as u32;
                }
                for fixup in entry.fixups {
                    code[fixup].operand = end_target as u32;
                }
            }

            op::BR | op::BR_IF => {
                let depth = reader.read_u32()?;
                code.push(IrInstr {
                    op: u16::from(opcode),
                    operand: depth,
                    extra: 0,
                });
            }

            op::BR_TABLE => {
                let count = reader.read_u32()?;
                code.push(IrInstr {
                    op: u16::from(op::BR_TABLE),
                    operand: count,
                    extra: 0,
                });
                for _ in 0..=count {
                    let depth = reader.read_u32()?;
                    code.push(IrInstr {
                        op: ir_op::EXT,
                        operand: depth,
                        extra: 0,
                    });
                }
            }

            op::RETURN | op::UNREACHABLE | op::NOP | op::DROP | op::SELECT => {
                code.push(IrInstr {
                    op: u16::from(opcode),
                    operand: 0,
                    extra: 0,
                });
            }

            op::SELECT_T => {
                let count = reader.read_u32()?;
                for _ in 0..count {
                    reader.read_val_type()?;
                }
                code.push(IrInstr {
                    op: u16::from(op::SELECT),
                    operand: 0,
                    extra: 0,
                });
            }

            op::CALL | op::RETURN_CALL | op::CALL_REF | op::RETURN_CALL_REF => {
                let idx = reader.read_u32()?;
                code.push(IrInstr {
                    op: u16::from(opcode),
                    operand: idx,
                    extra: 0,
                });
            }

            op::CALL_INDIRECT | op::RETURN_CALL_INDIRECT => {
                let type_idx = reader.read_u32()?;
                let table_idx = reader.read_u32()?;
                let extra =
                    u16::try_from(table_idx).map_err(|_| PredecodeError::Refused)?;
                code.push(IrInstr {
                    op: u16::from(opcode),
                    operand: type_idx,
                    extra,
                });
            }

            op::LOCAL_GET | op::LOCAL_SET | op::LOCAL_TEE | op::GLOBAL_GET
            | op::GLOBAL_SET | op::TABLE_GET | op::TABLE_SET | op::REF_FUNC
            | op::BR_ON_NULL | op::BR_ON_NON_NULL => {
                let idx = reader.read_u32()?;
                code.push(IrInstr {
                    op: u16::from(opcode),
                    operand: idx,
                    extra: 0,
                });
            }

            op::I32_LOAD..=op::I64_STORE32 => {
                let arg = reader.read_memarg()?;
                if arg.memory != 0 {
                    return Err(PredecodeError::Refused);
                }
                let offset =
                    u32::try_from(arg.offset).map_err(|_| PredecodeError::Refused)?;
                code.push(IrInstr {
                    op: u16::from(opcode),
                    operand: offset,
                    extra: 0,
                });
            }

            op::MEMORY_SIZE | op::MEMORY_GROW => {
                let idx = reader.read_u32()?;
                if idx != 0 {
                    return Err(PredecodeError::Refused);
                }
                code.push(IrInstr {
                    op: u16::from(opcode),
                    operand: 0,
                    extra: 0,
                });
            }

            op::I32_CONST => {
                let v = reader.read_i32()?;
                code.push(IrInstr {
                    op: u16::from(op::I32_CONST),
                    operand: v as u32,
                    extra: 0,
                });
            }
            op::I64_CONST => {
                let v = reader.read_i64()?;
                code.push(pooled(u16::from(op::I64_CONST), v as u64, &mut pool)?);
            }
            op::F32_CONST => {
                let bits = reader.read_f32()?;
                code.push(IrInstr {
                    op: u16::from(op::F32_CONST),
                    operand: bits,
                    extra: 0,
                });
            }
            op::F64_CONST => {
                let bits = reader.read_f64()?;
                code.push(pooled(u16::from(op::F64_CONST), bits, &mut pool)?);
            }

            op::REF_NULL => {
                reader.read_heap_type()?;
                code.push(IrInstr {
                    op: u16::from(op::REF_NULL),
                    operand: 0,
                    extra: 0,
                });
            }
            op::REF_IS_NULL | op::REF_EQ | op::REF_AS_NON_NULL => {
                code.push(IrInstr {
                    op: u16::from(opcode),
                    operand: 0,
                    extra: 0,
                });
            }

            op::MISC_PREFIX => {
                let sub_raw = reader.read_u32()?;
                let sub = MiscOp::from_repr(sub_raw).ok_or(PredecodeError::Malformed)?;
                let (a, b) = match sub {
                    MiscOp::MemoryInit => {
                        let a = reader.read_u32()?;
                        let b = reader.read_u32()?;
                        if b != 0 {
                            return Err(PredecodeError::Refused);
                        }
                        (a, b)
                    }
                    MiscOp::MemoryCopy => {
                        let a = reader.read_u32()?;
                        let b = reader.read_u32()?;
                        if a != 0 || b != 0 {
                            return Err(PredecodeError::Refused);
                        }
                        (a, b)
                    }
                    MiscOp::MemoryFill => {
                        let a = reader.read_u32()?;
                        if a != 0 {
                            return Err(PredecodeError::Refused);
                        }
                        (a, 0)
                    }
                    MiscOp::TableInit | MiscOp::TableCopy => {
                        (reader.read_u32()?, reader.read_u32()?)
                    }
                    MiscOp::DataDrop
                    | MiscOp::ElemDrop
                    | MiscOp::TableGrow
                    | MiscOp::TableSize
                    | MiscOp::TableFill => (reader.read_u32()?, 0),
                    _ => (0, 0),
                };
                let extra = u16::try_from(b).map_err(|_| PredecodeError::Refused)?;
                code.push(IrInstr {
                    op: 0xFC00 | (sub_raw as u16),
                    operand: a,
                    extra,
                });
            }

            // Served by the bytecode tier.
            op::GC_PREFIX | op::SIMD_PREFIX | op::ATOMIC_PREFIX | op::TRY_TABLE
            | op::THROW | op::THROW_REF => return Err(PredecodeError::Refused),

            _ => {
                if crate::interpreter::alu::scalar_arity(opcode).is_none() {
                    return Err(PredecodeError::Malformed);
                }
                code.push(IrInstr {
                    op: u16::from(opcode),
                    operand: 0,
                    extra: 0,
                });
            }
        }
    }

    fuse_superops(&mut code, &targets);
    Ok(IrBody { code, pool })
}

fn pooled(op: u16, value: u64, pool: &mut Vec<u64>) -> Result<IrInstr> {
    let idx = u32::try_from(pool.len()).map_err(|_| PredecodeError::Refused)?;
    pool.push(value);
    Ok(IrInstr {
        op,
        operand: idx,
        extra: 0,
    })
}

fn encode_block_type(bt: BlockType) -> Result<u16> {
    Ok(match bt {
        BlockType::Empty => 0,
        BlockType::Value(_) => 1,
        BlockType::TypeIndex(idx) => {
            let idx = u16::try_from(idx).map_err(|_| PredecodeError::Refused)?;
            if idx > EXTRA_VALUE_MASK {
                return Err(PredecodeError::Refused);
            }
            EXTRA_TYPE_INDEX | idx
        }
    })
}

/// Record slots one instruction occupies (superops span several).
pub(crate) fn slots_of(instr: IrInstr) -> usize {
    match instr.op {
        x if x == u16::from(op::IF) => 2,
        x if x == u16::from(op::BR_TABLE) => instr.operand as usize + 2,
        ir_op::LOCAL_GET2 | ir_op::LOCAL_GET_CONST32 => 2,
        ir_op::LGET2_ADD_I32..=ir_op::LGETC_LT_U_I32 => 3,
        _ => 1,
    }
}

/// Instructions a record represents, for fuel accounting.
pub(crate) fn fuel_cost(op: u16) -> u64 {
    match op {
        ir_op::LOCAL_GET2 | ir_op::LOCAL_GET_CONST32 => 2,
        ir_op::LGET2_ADD_I32..=ir_op::LGETC_LT_U_I32 => 3,
        _ => 1,
    }
}

/// Peephole-fuse the common local/const patterns in place. Interior slots
/// of a fused sequence become extension slots; a slot that is a branch
/// target is never absorbed.
fn fuse_superops(code: &mut [IrInstr], targets: &[usize]) {
    let mut is_target = vec![false; code.len() + 1];
    for &t in targets {
        if t < is_target.len() {
            is_target[t] = true;
        }
    }

    let local_get = u16::from(op::LOCAL_GET);
    let i32_const = u16::from(op::I32_CONST);

    let mut i = 0;
    while i < code.len() {
        if code[i].op == local_get && i + 1 < code.len() && !is_target[i + 1] {
            let l1 = code[i].operand;
            if code[i + 1].op == local_get {
                let l2 = code[i + 1].operand;
                let fused3 = if i + 2 < code.len() && !is_target[i + 2] {
                    match code[i + 2].op {
                        x if x == u16::from(op::I32_ADD) => Some(ir_op::LGET2_ADD_I32),
                        x if x == u16::from(op::I32_SUB) => Some(ir_op::LGET2_SUB_I32),
                        x if x == u16::from(op::I32_GT_S) => Some(ir_op::LGET2_GT_S_I32),
                        x if x == u16::from(op::I32_LE_S) => Some(ir_op::LGET2_LE_S_I32),
                        _ => None,
                    }
                } else {
                    None
                };
                if let Some(f) = fused3 {
                    code[i] = IrInstr { op: f, operand: l1, extra: 0 };
                    code[i + 1] = IrInstr { op: ir_op::EXT, operand: l2, extra: 0 };
                    code[i + 2] = IrInstr { op: ir_op::EXT, operand: 0, extra: 0 };
                    i += 3;
                    continue;
                }
                code[i] = IrInstr { op: ir_op::LOCAL_GET2, operand: l1, extra: 0 };
                code[i + 1] = IrInstr { op: ir_op::EXT, operand: l2, extra: 0 };
                i += 2;
                continue;
            }
            if code[i + 1].op == i32_const {
                let c = code[i + 1].operand;
                let fused3 = if i + 2 < code.len() && !is_target[i + 2] {
                    match code[i + 2].op {
                        x if x == u16::from(op::I32_ADD) => Some(ir_op::LGETC_ADD_I32),
                        x if x == u16::from(op::I32_SUB) => Some(ir_op::LGETC_SUB_I32),
                        x if x == u16::from(op::I32_LT_S) => Some(ir_op::LGETC_LT_S_I32),
                        x if x == u16::from(op::I32_GE_S) => Some(ir_op::LGETC_GE_S_I32),
                        x if x == u16::from(op::I32_LT_U) => Some(ir_op::LGETC_LT_U_I32),
                        _ => None,
                    }
                } else {
                    None
                };
                if let Some(f) = fused3 {
                    code[i] = IrInstr { op: f, operand: l1, extra: 0 };
                    code[i + 1] = IrInstr { op: ir_op::EXT, operand: c, extra: 0 };
                    code[i + 2] = IrInstr { op: ir_op::EXT, operand: 0, extra: 0 };
                    i += 3;
                    continue;
                }
                code[i] = IrInstr {
                    op: ir_op::LOCAL_GET_CONST32,
                    operand: l1,
                    extra: 0,
                };
                code[i + 1] = IrInstr { op: ir_op::EXT, operand: c, extra: 0 };
                i += 2;
                continue;
            }
        }
        i += slots_of(code[i]);
    }
}
