//! Runtime error taxonomy.

use coral_asm::TrapKind;

/// Result alias used across the execution core.
pub type ExecResult<T> = core::result::Result<T, VmError>;

/// Everything an invocation can fail with, plus the internal [`JitRestart`]
/// signal.
///
/// [`JitRestart`]: VmError::JitRestart
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[must_use]
#[non_exhaustive]
pub enum VmError {
    /// Generic Wasm trap for opcode-level failures without a dedicated kind.
    #[error("trap: {0}")]
    Trap(TrapKind),
    /// Executed `unreachable`.
    #[error("unreachable executed")]
    Unreachable,
    /// Integer division or remainder by zero.
    #[error("integer division by zero")]
    DivisionByZero,
    /// Signed division overflow.
    #[error("integer overflow")]
    IntegerOverflow,
    /// Trapping float-to-int truncation of NaN, infinity, or out-of-range.
    #[error("invalid conversion to integer")]
    InvalidConversion,
    /// Linear memory access outside the current bounds.
    #[error("out of bounds memory access")]
    OutOfBoundsMemoryAccess,
    /// Indirect call through a null or out-of-range table element.
    #[error("undefined element")]
    UndefinedElement,
    /// Indirect call signature mismatch.
    #[error("indirect call signature mismatch")]
    MismatchedSignatures,
    /// VM stack limit exceeded; invariant violation or runaway recursion.
    #[error("stack overflow")]
    StackOverflow,
    /// VM stack underflow; invariant violation, never expected under
    /// validated input.
    #[error("stack underflow")]
    StackUnderflow,
    /// An uncaught user-level exception reached the embedder. The pending
    /// payload stays buffered on the VM.
    #[error("uncaught wasm exception")]
    WasmException,
    /// Cooperative cancellation via the fuel counter.
    #[error("fuel exhausted")]
    FuelExhausted,
    /// Allocator failure during GC, register-file reservation, pre-decoding,
    /// conversion, or code emission.
    #[error("out of memory: {0}")]
    OutOfMemory(&'static str),
    /// Function index outside the instance function space.
    #[error("function index out of bounds: {0}")]
    FunctionIndexOutOfBounds(usize),
    /// Memory index outside the instance memory space.
    #[error("memory index out of bounds: {0}")]
    MemoryIndexOutOfBounds(usize),
    /// Table index outside the instance table space.
    #[error("table index out of bounds: {0}")]
    TableIndexOutOfBounds(usize),
    /// Global index outside the instance global space.
    #[error("global index out of bounds: {0}")]
    GlobalIndexOutOfBounds(usize),
    /// Tag index outside the instance tag space.
    #[error("tag index out of bounds: {0}")]
    TagIndexOutOfBounds(usize),
    /// Type index outside the instance type space.
    #[error("type index out of bounds: {0}")]
    TypeIndexOutOfBounds(usize),
    /// Data segment index outside the instance data space.
    #[error("data segment index out of bounds: {0}")]
    DataIndexOutOfBounds(usize),
    /// Element segment index outside the instance element space.
    #[error("element segment index out of bounds: {0}")]
    ElemIndexOutOfBounds(usize),
    /// Instance id not present in the store.
    #[error("undefined instance: {0}")]
    UndefinedInstance(usize),
    /// `invoke` export lookup failed.
    #[error("unknown export: {0}")]
    UnknownExport(String),
    /// Embedder argument array does not match the callee parameter slots.
    #[error("argument count mismatch: expected {expected} slots, got {actual}")]
    ArgumentCountMismatch {
        /// 64-bit slots the signature requires.
        expected: usize,
        /// Slots provided.
        actual: usize,
    },
    /// Embedder result array does not match the callee result slots.
    #[error("result count mismatch: expected {expected} slots, got {actual}")]
    ResultCountMismatch {
        /// 64-bit slots the signature produces.
        expected: usize,
        /// Slots provided.
        actual: usize,
    },
    /// Internal signal: back-edge compilation produced a ready function; the
    /// enclosing call re-enters through the native entry point. Never
    /// escapes to the embedder.
    #[error("jit restart")]
    JitRestart,
}

impl From<TrapKind> for VmError {
    fn from(kind: TrapKind) -> Self {
        match kind {
            TrapKind::Unreachable => VmError::Unreachable,
            TrapKind::DivisionByZero => VmError::DivisionByZero,
            TrapKind::IntegerOverflow => VmError::IntegerOverflow,
            TrapKind::InvalidConversion => VmError::InvalidConversion,
            TrapKind::OutOfBoundsMemoryAccess => VmError::OutOfBoundsMemoryAccess,
            TrapKind::UndefinedElement => VmError::UndefinedElement,
            TrapKind::MismatchedSignatures => VmError::MismatchedSignatures,
            other => VmError::Trap(other),
        }
    }
}

impl VmError {
    /// Whether this is a Wasm-level trap (as opposed to a VM-resource or
    /// resolution failure).
    pub const fn is_trap(&self) -> bool {
        matches!(
            self,
            VmError::Trap(_)
                | VmError::Unreachable
                | VmError::DivisionByZero
                | VmError::IntegerOverflow
                | VmError::InvalidConversion
                | VmError::OutOfBoundsMemoryAccess
                | VmError::UndefinedElement
                | VmError::MismatchedSignatures
        )
    }
}
