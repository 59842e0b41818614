//! Linear memory instance.
//!
//! Allocation strategy (guard pages, pooling) is the embedder's concern; the
//! core consumes this plain byte-vector representation with explicit bounds
//! checks everywhere.

use coral_asm::TrapKind;
use coral_types::{Limits, DEFAULT_PAGE_SIZE_LOG2};

type Result<T> = core::result::Result<T, TrapKind>;

/// One linear memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryInstance {
    data: Vec<u8>,
    limits: Limits,
    page_size_log2: u8,
    shared: bool,
}

impl MemoryInstance {
    /// New memory with the default 64 KiB page size.
    pub fn new(limits: Limits) -> Self {
        Self::with_page_size(limits, DEFAULT_PAGE_SIZE_LOG2, false)
    }

    /// New shared memory (threads extension).
    pub fn shared(limits: Limits) -> Self {
        Self::with_page_size(limits, DEFAULT_PAGE_SIZE_LOG2, true)
    }

    /// New memory with a custom page size. The custom-page-sizes extension
    /// admits page sizes of 1 byte and 64 KiB.
    pub fn with_page_size(limits: Limits, page_size_log2: u8, shared: bool) -> Self {
        let page = 1u64 << page_size_log2;
        let bytes = limits.min.saturating_mul(page);
        Self {
            data: vec![0; usize::try_from(bytes).unwrap_or(usize::MAX)],
            limits,
            page_size_log2,
            shared,
        }
    }

    /// Bytes per page of this memory.
    pub const fn page_size(&self) -> u64 {
        1u64 << self.page_size_log2
    }

    /// Current size in pages.
    pub fn size_pages(&self) -> u64 {
        self.data.len() as u64 >> self.page_size_log2
    }

    /// Current size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Whether this memory is shared between agents.
    pub const fn is_shared(&self) -> bool {
        self.shared
    }

    /// Raw contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw contents.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Grow by `delta` pages. Returns the previous size in pages, or `None`
    /// when the limits, the address space, or `extra_ceiling_room` (bytes
    /// still allowed under the embedder memory ceiling) are exceeded.
    pub fn grow(&mut self, delta: u64, ceiling_room: Option<u64>) -> Option<u64> {
        let old_pages = self.size_pages();
        let new_pages = old_pages.checked_add(delta)?;
        if let Some(max) = self.limits.max {
            if new_pages > max {
                return None;
            }
        }
        let delta_bytes = delta.checked_mul(self.page_size())?;
        if let Some(room) = ceiling_room {
            if delta_bytes > room {
                return None;
            }
        }
        let new_bytes = usize::try_from(new_pages.checked_mul(self.page_size())?).ok()?;
        self.data.resize(new_bytes, 0);
        Some(old_pages)
    }

    /// Check that `[addr+offset, addr+offset+len)` is in bounds and return
    /// the effective start address.
    pub fn check_range(&self, addr: u64, offset: u64, len: u64) -> Result<usize> {
        let ea = addr
            .checked_add(offset)
            .ok_or(TrapKind::OutOfBoundsMemoryAccess)?;
        let end = ea
            .checked_add(len)
            .ok_or(TrapKind::OutOfBoundsMemoryAccess)?;
        if end > self.data.len() as u64 {
            return Err(TrapKind::OutOfBoundsMemoryAccess);
        }
        Ok(ea as usize)
    }

    /// Read `N` bytes at `addr + offset`.
    pub fn read<const N: usize>(&self, addr: u64, offset: u64) -> Result<[u8; N]> {
        let ea = self.check_range(addr, offset, N as u64)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[ea..ea + N]);
        Ok(out)
    }

    /// Write `N` bytes at `addr + offset`.
    pub fn write<const N: usize>(&mut self, addr: u64, offset: u64, bytes: [u8; N]) -> Result<()> {
        let ea = self.check_range(addr, offset, N as u64)?;
        self.data[ea..ea + N].copy_from_slice(&bytes);
        Ok(())
    }

    /// `memory.fill`: bounds are checked before any byte is written, so a
    /// failing fill writes nothing.
    pub fn fill(&mut self, dst: u64, val: u8, len: u64) -> Result<()> {
        let start = self.check_range(dst, 0, len)?;
        self.data[start..start + len as usize].fill(val);
        Ok(())
    }

    /// Copy within one memory, overlap-safe. Bounds first, then copy.
    pub fn copy_within(&mut self, dst: u64, src: u64, len: u64) -> Result<()> {
        let d = self.check_range(dst, 0, len)?;
        let s = self.check_range(src, 0, len)?;
        self.data.copy_within(s..s + len as usize, d);
        Ok(())
    }

    /// Initialize from a data segment slice. Bounds on both sides are
    /// checked before any byte moves; `len == 0` always succeeds.
    pub fn init(&mut self, dst: u64, src: &[u8], src_off: u64, len: u64) -> Result<()> {
        let d = self.check_range(dst, 0, len)?;
        let src_end = src_off
            .checked_add(len)
            .ok_or(TrapKind::OutOfBoundsMemoryAccess)?;
        if src_end > src.len() as u64 {
            return Err(TrapKind::OutOfBoundsMemoryAccess);
        }
        self.data[d..d + len as usize]
            .copy_from_slice(&src[src_off as usize..src_end as usize]);
        Ok(())
    }

    /// Alignment check for atomic accesses: the effective address must be a
    /// multiple of the access width.
    pub fn check_atomic_align(&self, addr: u64, offset: u64, width: u64) -> Result<()> {
        let ea = addr
            .checked_add(offset)
            .ok_or(TrapKind::OutOfBoundsMemoryAccess)?;
        if ea % width != 0 {
            return Err(TrapKind::UnalignedAtomic);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_respects_limits_and_ceiling_room() {
        let mut mem = MemoryInstance::new(Limits::new(1, Some(3)));
        assert_eq!(mem.grow(1, None), Some(1));
        assert_eq!(mem.grow(2, None), None);
        assert_eq!(mem.grow(1, Some(0)), None);
        assert_eq!(mem.grow(1, Some(65536)), Some(2));
        assert_eq!(mem.size_pages(), 3);
    }

    #[test]
    fn custom_page_size_grows_in_small_steps() {
        let mut mem = MemoryInstance::with_page_size(Limits::new(10, None), 0, false);
        assert_eq!(mem.size_bytes(), 10);
        assert_eq!(mem.grow(6, None), Some(10));
        assert_eq!(mem.size_bytes(), 16);
    }

    #[test]
    fn failed_fill_writes_nothing() {
        let mut mem = MemoryInstance::with_page_size(Limits::new(8, None), 0, false);
        assert_eq!(
            mem.fill(4, 0xAA, 8),
            Err(TrapKind::OutOfBoundsMemoryAccess)
        );
        assert!(mem.as_slice().iter().all(|&b| b == 0));
        mem.fill(4, 0xAA, 0).unwrap();
    }
}
