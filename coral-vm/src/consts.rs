//! VM parameters.

/// Operand stack capacity, in 128-bit slots.
pub const OPERAND_STACK_CAPACITY: usize = 4096;

/// Frame stack capacity.
pub const FRAME_STACK_CAPACITY: usize = 1024;

/// Label stack capacity.
pub const LABEL_STACK_CAPACITY: usize = 4096;

/// Register-stack arena size, in 64-bit slots. Every register-IR call
/// reserves `reg_count + REG_CALL_OVERHEAD` slots.
pub const REG_STACK_CAPACITY: usize = 32 * 1024;

/// Extra register slots reserved per call for the cached memory base/size
/// and the VM/instance pointers used by compiled code.
pub const REG_CALL_OVERHEAD: usize = 4;

/// Widest argument list the tail-call buffer holds. Wider tail calls fall
/// back to a plain call, which differs only in frame-stack growth.
pub const TAIL_CALL_SLOTS: usize = 16;

/// Payload slots of the pending-exception buffer.
pub const EXCEPTION_PAYLOAD_SLOTS: usize = 16;

/// Maximum catch clauses on one `try_table` label.
pub const MAX_CATCH_CLAUSES: usize = 8;

/// Calls of one function before the native compiler is attempted.
pub const HOT_CALL_THRESHOLD: u32 = 8;

/// Back edges taken in one register-IR call before the native compiler is
/// attempted mid-call.
pub const BACK_EDGE_THRESHOLD: u32 = 1024;

/// Widest register file the register-IR conversion accepts. Register ids
/// must fit u8 with headroom for the packed second-source encoding.
pub const MAX_REGIR_REGISTERS: usize = 250;

static_assertions::const_assert!(OPERAND_STACK_CAPACITY <= u32::MAX as usize);
static_assertions::const_assert!(MAX_REGIR_REGISTERS < u8::MAX as usize);
