use core::fmt;

/// Opcode-level trap reason.
///
/// Raised by instruction executors and converted into the embedder-facing
/// error taxonomy at the dispatch boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum TrapKind {
    /// Executed `unreachable`.
    Unreachable,
    /// Integer division or remainder by zero.
    DivisionByZero,
    /// Signed division overflow (`INT_MIN / -1`).
    IntegerOverflow,
    /// Trapping float-to-int truncation of NaN, infinity, or an
    /// out-of-range value.
    InvalidConversion,
    /// Linear memory access outside the current bounds.
    OutOfBoundsMemoryAccess,
    /// Table access outside the current bounds.
    OutOfBoundsTableAccess,
    /// `call_indirect` through a null table element, or a table index past
    /// the table end.
    UndefinedElement,
    /// `call_indirect` signature mismatch against the declared type.
    MismatchedSignatures,
    /// Atomic access not aligned to its natural alignment.
    UnalignedAtomic,
    /// `memory.atomic.wait` on a non-shared memory.
    ExpectedSharedMemory,
    /// Null reference where a non-null reference is required.
    NullReference,
    /// `ref.cast` to a type the operand is not a subtype of.
    CastFailure,
    /// GC array access outside the array length.
    OutOfBoundsArrayAccess,
    /// Access to a dropped data or element segment with non-zero length.
    DroppedSegment,
    /// Allocation size outside the representable range.
    AllocationTooLarge,
    /// Malformed or truncated bytecode reached the executor. Validated
    /// modules never produce this.
    InvalidBytecode,
}

impl fmt::Display for TrapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrapKind::Unreachable => "unreachable executed",
            TrapKind::DivisionByZero => "integer division by zero",
            TrapKind::IntegerOverflow => "integer overflow",
            TrapKind::InvalidConversion => "invalid conversion to integer",
            TrapKind::OutOfBoundsMemoryAccess => "out of bounds memory access",
            TrapKind::OutOfBoundsTableAccess => "out of bounds table access",
            TrapKind::UndefinedElement => "undefined table element",
            TrapKind::MismatchedSignatures => "indirect call signature mismatch",
            TrapKind::UnalignedAtomic => "unaligned atomic access",
            TrapKind::ExpectedSharedMemory => "atomic wait on non-shared memory",
            TrapKind::NullReference => "null reference",
            TrapKind::CastFailure => "cast failure",
            TrapKind::OutOfBoundsArrayAccess => "out of bounds array access",
            TrapKind::DroppedSegment => "access to dropped segment",
            TrapKind::AllocationTooLarge => "allocation too large",
            TrapKind::InvalidBytecode => "malformed bytecode",
        };
        f.write_str(s)
    }
}

impl std::error::Error for TrapKind {}
