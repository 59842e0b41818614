//! Tier 3: ahead-of-time native compilation of register-IR bodies.
//!
//! The compiler produces one executable page range per function with a
//! C-ABI entry `(registers, vm, store) -> error code`; code 0 is success
//! and the single result, when present, is left in register slot 0. The
//! emitter bails out of compilation entirely (latched by the caller) on
//! any opcode outside its supported set; memory accesses, when added to
//! that set, carry explicit bounds checks rather than relying on
//! guard-page signal recovery.

#![allow(unsafe_code)]

use std::sync::Arc;

use crate::consts::REG_CALL_OVERHEAD;
use crate::error::{ExecResult, VmError};
use crate::interpreter::executors::ExecCtx;
use crate::interpreter::regir::RegIrBody;
use crate::interpreter::Vm;
use crate::store::Store;

mod code;
#[cfg(all(target_arch = "x86_64", unix))]
mod x86_64;

pub use code::CodeBlock;

/// C-ABI entry point of a compiled function.
pub type JitEntry =
    unsafe extern "C" fn(*mut u64, *mut core::ffi::c_void, *mut core::ffi::c_void) -> u64;

/// Error codes compiled functions may return. Zero is success.
pub mod exit_code {
    #![allow(missing_docs)]

    pub const OK: u64 = 0;
    pub const UNREACHABLE: u64 = 1;
    pub const DIVISION_BY_ZERO: u64 = 2;
    pub const INTEGER_OVERFLOW: u64 = 3;
    pub const INVALID_CONVERSION: u64 = 4;
    pub const OUT_OF_BOUNDS: u64 = 5;
}

/// Compiled function: the sealed pages plus the frame shape needed to seed
/// and read back the register file.
#[derive(Debug)]
pub struct JitCode {
    block: CodeBlock,
    /// Registers the function uses.
    pub reg_count: u16,
    /// 0 or 1 results, read from register slot 0 on success.
    pub result_count: u16,
}

impl JitCode {
    /// The native entry point.
    ///
    /// # Safety
    /// The pointer targets a sealed executable mapping built from the
    /// register IR of this function; callers must pass a register file of
    /// at least `reg_count + REG_CALL_OVERHEAD` slots.
    pub unsafe fn entry(&self) -> JitEntry {
        unsafe { core::mem::transmute::<*const u8, JitEntry>(self.block.as_ptr()) }
    }
}

/// Compilation bail-out; the caller latches it so the function stays on
/// the register-IR tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileError {
    /// An opcode outside the supported set.
    Unsupported,
    /// The target architecture has no emitter.
    NoBackend,
    /// Page allocation or sealing failed.
    Alloc,
}

/// Compile a register-IR body to native code.
pub fn compile(body: &RegIrBody) -> Result<JitCode, CompileError> {
    cfg_if::cfg_if! {
        if #[cfg(all(target_arch = "x86_64", unix))] {
            let machine_code = x86_64::emit(body)?;
            let block = CodeBlock::new(&machine_code).map_err(|_| CompileError::Alloc)?;
            Ok(JitCode {
                block,
                reg_count: body.reg_count,
                result_count: body.result_count,
            })
        } else {
            let _ = body;
            Err(CompileError::NoBackend)
        }
    }
}

impl Vm {
    /// Run a call through the native entry point. The register file is
    /// seeded from the frame's operand window exactly as the register-IR
    /// tier does, so a `JitRestart` replay observes the original locals.
    pub(crate) fn execute_jit(
        &mut self,
        store: &mut Store,
        _ctx: &ExecCtx,
        code: Arc<JitCode>,
    ) -> ExecResult<()> {
        let frame = *self.current_frame()?;
        let total = code.reg_count as usize + REG_CALL_OVERHEAD;
        let base = self.reserve_regs(total)?;
        for i in 0..frame.locals {
            let v = self.slot(frame.fp + i) as u64;
            self.regs_mut()[base + i] = v;
        }

        let err = unsafe {
            let regs_ptr = self.regs_mut().as_mut_ptr().add(base);
            let vm_ptr = (self as *mut Vm).cast::<core::ffi::c_void>();
            let store_ptr = (store as *mut Store).cast::<core::ffi::c_void>();
            (code.entry())(regs_ptr, vm_ptr, store_ptr)
        };

        let result0 = self.regs()[base];
        self.release_regs(base);

        match err {
            exit_code::OK => {
                if code.result_count == 1 {
                    self.push_u64(result0)?;
                }
                Ok(())
            }
            exit_code::UNREACHABLE => Err(VmError::Unreachable),
            exit_code::DIVISION_BY_ZERO => Err(VmError::DivisionByZero),
            exit_code::INTEGER_OVERFLOW => Err(VmError::IntegerOverflow),
            exit_code::INVALID_CONVERSION => Err(VmError::InvalidConversion),
            exit_code::OUT_OF_BOUNDS => Err(VmError::OutOfBoundsMemoryAccess),
            _ => Err(VmError::Trap(coral_asm::TrapKind::InvalidBytecode)),
        }
    }
}
