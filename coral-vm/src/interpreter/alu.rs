//! Scalar operator evaluation shared by every tier.
//!
//! All pure numeric opcodes (`0x45 i32.eqz` through `0xC4 i64.extend32_s`)
//! are evaluated here on slot-encoded u64 values. The bytecode and IR tiers
//! pop/push around this table; the register tier reads/writes registers
//! around it. One table means the tiers cannot drift apart.

use coral_asm::{op, TrapKind};

type Result<T> = core::result::Result<T, TrapKind>;

/// Operand count of a pure scalar opcode, or `None` if the opcode is not a
/// pure scalar op.
pub(crate) fn scalar_arity(opcode: u8) -> Option<u8> {
    Some(match opcode {
        op::I32_EQZ | op::I64_EQZ => 1,
        op::I32_EQ..=op::I32_GE_U => 2,
        op::I64_EQ..=op::I64_GE_U => 2,
        op::F32_EQ..=op::F64_GE => 2,
        op::I32_CLZ | op::I32_CTZ | op::I32_POPCNT => 1,
        op::I32_ADD..=op::I32_ROTR => 2,
        op::I64_CLZ | op::I64_CTZ | op::I64_POPCNT => 1,
        op::I64_ADD..=op::I64_ROTR => 2,
        op::F32_ABS..=op::F32_SQRT => 1,
        op::F32_ADD..=op::F32_COPYSIGN => 2,
        op::F64_ABS..=op::F64_SQRT => 1,
        op::F64_ADD..=op::F64_COPYSIGN => 2,
        op::I32_WRAP_I64..=op::F64_REINTERPRET_I64 => 1,
        op::I32_EXTEND8_S..=op::I64_EXTEND32_S => 1,
        _ => return None,
    })
}

/// Evaluate a pure scalar opcode. `b` is ignored for unary operators.
/// Values are in slot encoding: i32/f32 in the low 32 bits, zero-extended.
pub(crate) fn eval_scalar(opcode: u8, a: u64, b: u64) -> Result<u64> {
    let a32 = a as u32;
    let b32 = b as u32;
    let value = match opcode {
        // --- i32 comparisons ---
        op::I32_EQZ => bool_val(a32 == 0),
        op::I32_EQ => bool_val(a32 == b32),
        op::I32_NE => bool_val(a32 != b32),
        op::I32_LT_S => bool_val((a32 as i32) < (b32 as i32)),
        op::I32_LT_U => bool_val(a32 < b32),
        op::I32_GT_S => bool_val((a32 as i32) > (b32 as i32)),
        op::I32_GT_U => bool_val(a32 > b32),
        op::I32_LE_S => bool_val((a32 as i32) <= (b32 as i32)),
        op::I32_LE_U => bool_val(a32 <= b32),
        op::I32_GE_S => bool_val((a32 as i32) >= (b32 as i32)),
        op::I32_GE_U => bool_val(a32 >= b32),

        // --- i64 comparisons ---
        op::I64_EQZ => bool_val(a == 0),
        op::I64_EQ => bool_val(a == b),
        op::I64_NE => bool_val(a != b),
        op::I64_LT_S => bool_val((a as i64) < (b as i64)),
        op::I64_LT_U => bool_val(a < b),
        op::I64_GT_S => bool_val((a as i64) > (b as i64)),
        op::I64_GT_U => bool_val(a > b),
        op::I64_LE_S => bool_val((a as i64) <= (b as i64)),
        op::I64_LE_U => bool_val(a <= b),
        op::I64_GE_S => bool_val((a as i64) >= (b as i64)),
        op::I64_GE_U => bool_val(a >= b),

        // --- f32 comparisons ---
        op::F32_EQ => bool_val(f32_of(a) == f32_of(b)),
        op::F32_NE => bool_val(f32_of(a) != f32_of(b)),
        op::F32_LT => bool_val(f32_of(a) < f32_of(b)),
        op::F32_GT => bool_val(f32_of(a) > f32_of(b)),
        op::F32_LE => bool_val(f32_of(a) <= f32_of(b)),
        op::F32_GE => bool_val(f32_of(a) >= f32_of(b)),

        // --- f64 comparisons ---
        op::F64_EQ => bool_val(f64_of(a) == f64_of(b)),
        op::F64_NE => bool_val(f64_of(a) != f64_of(b)),
        op::F64_LT => bool_val(f64_of(a) < f64_of(b)),
        op::F64_GT => bool_val(f64_of(a) > f64_of(b)),
        op::F64_LE => bool_val(f64_of(a) <= f64_of(b)),
        op::F64_GE => bool_val(f64_of(a) >= f64_of(b)),

        // --- i32 arithmetic ---
        op::I32_CLZ => u64::from(a32.leading_zeros()),
        op::I32_CTZ => u64::from(a32.trailing_zeros()),
        op::I32_POPCNT => u64::from(a32.count_ones()),
        op::I32_ADD => u64::from(a32.wrapping_add(b32)),
        op::I32_SUB => u64::from(a32.wrapping_sub(b32)),
        op::I32_MUL => u64::from(a32.wrapping_mul(b32)),
        op::I32_DIV_S => {
            let (a, b) = (a32 as i32, b32 as i32);
            if b == 0 {
                return Err(TrapKind::DivisionByZero);
            }
            if a == i32::MIN && b == -1 {
                return Err(TrapKind::IntegerOverflow);
            }
            u64::from(a.wrapping_div(b) as u32)
        }
        op::I32_DIV_U => {
            if b32 == 0 {
                return Err(TrapKind::DivisionByZero);
            }
            u64::from(a32 / b32)
        }
        op::I32_REM_S => {
            let (a, b) = (a32 as i32, b32 as i32);
            if b == 0 {
                return Err(TrapKind::DivisionByZero);
            }
            u64::from(a.wrapping_rem(b) as u32)
        }
        op::I32_REM_U => {
            if b32 == 0 {
                return Err(TrapKind::DivisionByZero);
            }
            u64::from(a32 % b32)
        }
        op::I32_AND => u64::from(a32 & b32),
        op::I32_OR => u64::from(a32 | b32),
        op::I32_XOR => u64::from(a32 ^ b32),
        op::I32_SHL => u64::from(a32.wrapping_shl(b32)),
        op::I32_SHR_S => u64::from(((a32 as i32).wrapping_shr(b32)) as u32),
        op::I32_SHR_U => u64::from(a32.wrapping_shr(b32)),
        op::I32_ROTL => u64::from(a32.rotate_left(b32 & 31)),
        op::I32_ROTR => u64::from(a32.rotate_right(b32 & 31)),

        // --- i64 arithmetic ---
        op::I64_CLZ => u64::from(a.leading_zeros()),
        op::I64_CTZ => u64::from(a.trailing_zeros()),
        op::I64_POPCNT => u64::from(a.count_ones()),
        op::I64_ADD => a.wrapping_add(b),
        op::I64_SUB => a.wrapping_sub(b),
        op::I64_MUL => a.wrapping_mul(b),
        op::I64_DIV_S => {
            let (a, b) = (a as i64, b as i64);
            if b == 0 {
                return Err(TrapKind::DivisionByZero);
            }
            if a == i64::MIN && b == -1 {
                return Err(TrapKind::IntegerOverflow);
            }
            a.wrapping_div(b) as u64
        }
        op::I64_DIV_U => {
            if b == 0 {
                return Err(TrapKind::DivisionByZero);
            }
            a / b
        }
        op::I64_REM_S => {
            let (a, b) = (a as i64, b as i64);
            if b == 0 {
                return Err(TrapKind::DivisionByZero);
            }
            a.wrapping_rem(b) as u64
        }
        op::I64_REM_U => {
            if b == 0 {
                return Err(TrapKind::DivisionByZero);
            }
            a % b
        }
        op::I64_AND => a & b,
        op::I64_OR => a | b,
        op::I64_XOR => a ^ b,
        op::I64_SHL => a.wrapping_shl(b as u32),
        op::I64_SHR_S => ((a as i64).wrapping_shr(b as u32)) as u64,
        op::I64_SHR_U => a.wrapping_shr(b as u32),
        op::I64_ROTL => a.rotate_left((b & 63) as u32),
        op::I64_ROTR => a.rotate_right((b & 63) as u32),

        // --- f32 arithmetic ---
        op::F32_ABS => f32_val(f32_of(a).abs()),
        op::F32_NEG => f32_val(-f32_of(a)),
        op::F32_CEIL => f32_val(f32_of(a).ceil()),
        op::F32_FLOOR => f32_val(f32_of(a).floor()),
        op::F32_TRUNC => f32_val(f32_of(a).trunc()),
        op::F32_NEAREST => f32_val(f32_of(a).round_ties_even()),
        op::F32_SQRT => f32_val(f32_of(a).sqrt()),
        op::F32_ADD => f32_val(f32_of(a) + f32_of(b)),
        op::F32_SUB => f32_val(f32_of(a) - f32_of(b)),
        op::F32_MUL => f32_val(f32_of(a) * f32_of(b)),
        op::F32_DIV => f32_val(f32_of(a) / f32_of(b)),
        op::F32_MIN => f32_val(fmin32(f32_of(a), f32_of(b))),
        op::F32_MAX => f32_val(fmax32(f32_of(a), f32_of(b))),
        op::F32_COPYSIGN => f32_val(f32_of(a).copysign(f32_of(b))),

        // --- f64 arithmetic ---
        op::F64_ABS => f64_val(f64_of(a).abs()),
        op::F64_NEG => f64_val(-f64_of(a)),
        op::F64_CEIL => f64_val(f64_of(a).ceil()),
        op::F64_FLOOR => f64_val(f64_of(a).floor()),
        op::F64_TRUNC => f64_val(f64_of(a).trunc()),
        op::F64_NEAREST => f64_val(f64_of(a).round_ties_even()),
        op::F64_SQRT => f64_val(f64_of(a).sqrt()),
        op::F64_ADD => f64_val(f64_of(a) + f64_of(b)),
        op::F64_SUB => f64_val(f64_of(a) - f64_of(b)),
        op::F64_MUL => f64_val(f64_of(a) * f64_of(b)),
        op::F64_DIV => f64_val(f64_of(a) / f64_of(b)),
        op::F64_MIN => f64_val(fmin64(f64_of(a), f64_of(b))),
        op::F64_MAX => f64_val(fmax64(f64_of(a), f64_of(b))),
        op::F64_COPYSIGN => f64_val(f64_of(a).copysign(f64_of(b))),

        // --- conversions ---
        op::I32_WRAP_I64 => u64::from(a as u32),
        op::I32_TRUNC_F32_S => trunc_to_i32(f64::from(f32_of(a)))?,
        op::I32_TRUNC_F32_U => trunc_to_u32(f64::from(f32_of(a)))?,
        op::I32_TRUNC_F64_S => trunc_to_i32(f64_of(a))?,
        op::I32_TRUNC_F64_U => trunc_to_u32(f64_of(a))?,
        op::I64_EXTEND_I32_S => ((a32 as i32) as i64) as u64,
        op::I64_EXTEND_I32_U => u64::from(a32),
        op::I64_TRUNC_F32_S => trunc_to_i64(f64::from(f32_of(a)))?,
        op::I64_TRUNC_F32_U => trunc_to_u64(f64::from(f32_of(a)))?,
        op::I64_TRUNC_F64_S => trunc_to_i64(f64_of(a))?,
        op::I64_TRUNC_F64_U => trunc_to_u64(f64_of(a))?,
        op::F32_CONVERT_I32_S => f32_val((a32 as i32) as f32),
        op::F32_CONVERT_I32_U => f32_val(a32 as f32),
        op::F32_CONVERT_I64_S => f32_val((a as i64) as f32),
        op::F32_CONVERT_I64_U => f32_val(a as f32),
        op::F32_DEMOTE_F64 => f32_val(f64_of(a) as f32),
        op::F64_CONVERT_I32_S => f64_val(f64::from(a32 as i32)),
        op::F64_CONVERT_I32_U => f64_val(f64::from(a32)),
        op::F64_CONVERT_I64_S => f64_val((a as i64) as f64),
        op::F64_CONVERT_I64_U => f64_val(a as f64),
        op::F64_PROMOTE_F32 => f64_val(f64::from(f32_of(a))),

        // Reinterpretations are no-ops in slot encoding.
        op::I32_REINTERPRET_F32 | op::F32_REINTERPRET_I32 => u64::from(a32),
        op::I64_REINTERPRET_F64 | op::F64_REINTERPRET_I64 => a,

        // --- sign extension ---
        op::I32_EXTEND8_S => u64::from(((a as i8) as i32) as u32),
        op::I32_EXTEND16_S => u64::from(((a as i16) as i32) as u32),
        op::I64_EXTEND8_S => ((a as i8) as i64) as u64,
        op::I64_EXTEND16_S => ((a as i16) as i64) as u64,
        op::I64_EXTEND32_S => ((a as i32) as i64) as u64,

        _ => return Err(TrapKind::InvalidBytecode),
    };
    Ok(value)
}

/// Non-trapping truncation (`0xFC 0x00..=0x07`): NaN clamps to zero,
/// out-of-range saturates. Rust `as` casts implement exactly this.
pub(crate) fn eval_trunc_sat(sub: u32, a: u64) -> u64 {
    match sub {
        0x00 => (f64::from(f32_of(a)) as i32) as u32 as u64,
        0x01 => u64::from(f64::from(f32_of(a)) as u32),
        0x02 => (f64_of(a) as i32) as u32 as u64,
        0x03 => u64::from(f64_of(a) as u32),
        0x04 => (f64::from(f32_of(a)) as i64) as u64,
        0x05 => f64::from(f32_of(a)) as u64,
        0x06 => (f64_of(a) as i64) as u64,
        0x07 => f64_of(a) as u64,
        _ => unreachable!("non-trunc-sat sub-opcode"),
    }
}

#[inline]
fn bool_val(v: bool) -> u64 {
    u64::from(v)
}

#[inline]
pub(crate) fn f32_of(slot: u64) -> f32 {
    f32::from_bits(slot as u32)
}

#[inline]
pub(crate) fn f64_of(slot: u64) -> f64 {
    f64::from_bits(slot)
}

#[inline]
pub(crate) fn f32_val(v: f32) -> u64 {
    u64::from(v.to_bits())
}

#[inline]
pub(crate) fn f64_val(v: f64) -> u64 {
    v.to_bits()
}

/// Wasm float min: NaN-propagating, and -0 beats +0.
pub(crate) fn fmin32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == b {
        if a.is_sign_negative() {
            a
        } else {
            b
        }
    } else if a < b {
        a
    } else {
        b
    }
}

/// Wasm float max: NaN-propagating, and +0 beats -0.
pub(crate) fn fmax32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == b {
        if a.is_sign_positive() {
            a
        } else {
            b
        }
    } else if a > b {
        a
    } else {
        b
    }
}

/// See [`fmin32`].
pub(crate) fn fmin64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_negative() {
            a
        } else {
            b
        }
    } else if a < b {
        a
    } else {
        b
    }
}

/// See [`fmax32`].
pub(crate) fn fmax64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_positive() {
            a
        } else {
            b
        }
    } else if a > b {
        a
    } else {
        b
    }
}

fn trunc_to_i32(d: f64) -> Result<u64> {
    if d.is_nan() {
        return Err(TrapKind::InvalidConversion);
    }
    let t = d.trunc();
    if !(-2147483648.0..=2147483647.0).contains(&t) {
        return Err(TrapKind::InvalidConversion);
    }
    Ok((t as i32) as u32 as u64)
}

fn trunc_to_u32(d: f64) -> Result<u64> {
    if d.is_nan() {
        return Err(TrapKind::InvalidConversion);
    }
    let t = d.trunc();
    if t < 0.0 || t > 4294967295.0 {
        return Err(TrapKind::InvalidConversion);
    }
    Ok(u64::from(t as u32))
}

fn trunc_to_i64(d: f64) -> Result<u64> {
    if d.is_nan() {
        return Err(TrapKind::InvalidConversion);
    }
    let t = d.trunc();
    if t < -9223372036854775808.0 || t >= 9223372036854775808.0 {
        return Err(TrapKind::InvalidConversion);
    }
    Ok((t as i64) as u64)
}

fn trunc_to_u64(d: f64) -> Result<u64> {
    if d.is_nan() {
        return Err(TrapKind::InvalidConversion);
    }
    let t = d.trunc();
    if t < 0.0 || t >= 18446744073709551616.0 {
        return Err(TrapKind::InvalidConversion);
    }
    Ok(t as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(op::I32_ADD, 7, 4, 11; "add")]
    #[test_case(op::I32_SUB, 3, 5, 0xFFFF_FFFE; "sub wraps")]
    #[test_case(op::I32_SHR_S, 0x8000_0000, 31, 0xFFFF_FFFF; "shr_s extends")]
    #[test_case(op::I32_ROTL, 0x8000_0001, 1, 3; "rotl")]
    #[test_case(op::I32_LT_S, 0xFFFF_FFFF, 1, 1; "lt_s signed")]
    #[test_case(op::I32_LT_U, 0xFFFF_FFFF, 1, 0; "lt_u unsigned")]
    fn i32_ops(op: u8, a: u64, b: u64, expected: u64) {
        assert_eq!(eval_scalar(op, a, b).unwrap(), expected);
    }

    #[test]
    fn division_traps() {
        assert_eq!(
            eval_scalar(op::I32_DIV_S, 1, 0),
            Err(TrapKind::DivisionByZero)
        );
        assert_eq!(
            eval_scalar(op::I32_DIV_S, 0x8000_0000, 0xFFFF_FFFF),
            Err(TrapKind::IntegerOverflow)
        );
        // INT_MIN % -1 is zero, never an overflow.
        assert_eq!(
            eval_scalar(op::I32_REM_S, 0x8000_0000, 0xFFFF_FFFF).unwrap(),
            0
        );
        assert_eq!(
            eval_scalar(op::I64_DIV_S, i64::MIN as u64, u64::MAX),
            Err(TrapKind::IntegerOverflow)
        );
    }

    #[test]
    fn trapping_truncation() {
        let nan = f32_val(f32::NAN);
        assert_eq!(
            eval_scalar(op::I32_TRUNC_F32_S, nan, 0),
            Err(TrapKind::InvalidConversion)
        );
        let too_big = f32_val(3e9);
        assert_eq!(
            eval_scalar(op::I32_TRUNC_F32_S, too_big, 0),
            Err(TrapKind::InvalidConversion)
        );
        let fine = f32_val(-7.9);
        assert_eq!(eval_scalar(op::I32_TRUNC_F32_S, fine, 0).unwrap(), (-7i32) as u32 as u64);
    }

    #[test]
    fn saturating_truncation() {
        assert_eq!(eval_trunc_sat(0x00, f32_val(f32::NAN)), 0);
        assert_eq!(eval_trunc_sat(0x00, f32_val(3e9)), i32::MAX as u32 as u64);
        assert_eq!(eval_trunc_sat(0x01, f32_val(-5.0)), 0);
        assert_eq!(eval_trunc_sat(0x07, f64_val(1e30)), u64::MAX);
    }

    #[test]
    fn float_min_max_zero_and_nan() {
        assert!(f32_of(eval_scalar(op::F32_MIN, f32_val(0.0), f32_val(-0.0)).unwrap())
            .is_sign_negative());
        assert!(f32_of(eval_scalar(op::F32_MAX, f32_val(-0.0), f32_val(0.0)).unwrap())
            .is_sign_positive());
        assert!(f64_of(eval_scalar(op::F64_MIN, f64_val(1.0), f64_val(f64::NAN)).unwrap())
            .is_nan());
    }
}
