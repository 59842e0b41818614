//! Executable code pages.
//!
//! One page-aligned anonymous mapping per compiled function, written while
//! writable and flipped to execute-with-read before first use (W⊕X). The
//! mapping is released with the owning function object. Targets without an
//! mmap surface never reach this path (the compile driver reports
//! `NoBackend` first) but still link a stub.

#![allow(unsafe_code)]

use crate::error::VmError;

/// A finalized, executable code region.
#[derive(Debug)]
pub struct CodeBlock {
    ptr: *mut u8,
    len: usize,
}

// The block is immutable after construction and only ever executed.
unsafe impl Send for CodeBlock {}
unsafe impl Sync for CodeBlock {}

impl CodeBlock {
    /// Map, copy, and seal a code buffer.
    #[cfg(unix)]
    pub fn new(code: &[u8]) -> Result<Self, VmError> {
        if code.is_empty() {
            return Err(VmError::OutOfMemory("jit code"));
        }
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let len = code.len().div_ceil(page) * page;

        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(VmError::OutOfMemory("jit code"));
        }
        let ptr = ptr.cast::<u8>();

        unsafe {
            core::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len());
            if libc::mprotect(ptr.cast(), len, libc::PROT_READ | libc::PROT_EXEC) != 0 {
                libc::munmap(ptr.cast(), len);
                return Err(VmError::OutOfMemory("jit code"));
            }
        }

        Ok(Self { ptr, len })
    }

    /// No executable-page surface on this target.
    #[cfg(not(unix))]
    pub fn new(_code: &[u8]) -> Result<Self, VmError> {
        Err(VmError::OutOfMemory("jit code"))
    }

    /// Base of the executable region.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty (never true for a built block).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for CodeBlock {
    fn drop(&mut self) {
        #[cfg(unix)]
        unsafe {
            libc::munmap(self.ptr.cast(), self.len);
        }
    }
}
