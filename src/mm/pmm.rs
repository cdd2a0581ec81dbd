// Physical page handles
// The frame allocator itself lives outside this subsystem; it hands out
// kernel-addressable pages through the `FrameAllocator` capability.

use crate::config::PGSIZE;
use core::ptr::NonNull;

bitflags::bitflags! {
    /// Flags for `FrameAllocator::alloc_page`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// Take the page from the user pool
        const USER = 1 << 0;
        /// Zero the page before returning it
        const ZERO = 1 << 1;
    }
}

/// One page of kernel-addressable memory backing a user page.
///
/// The handle is a plain address: copying it does not duplicate ownership.
/// Whoever installed it in a page directory (or the allocator, once freed)
/// decides its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelPage(NonNull<u8>);

// A page is raw memory shared the same way user pages are shared between the
// threads of one process.
unsafe impl Send for KernelPage {}
unsafe impl Sync for KernelPage {}

impl KernelPage {
    /// Wrap the kernel virtual address of a page.
    ///
    /// # Safety
    /// `ptr` must point to `PGSIZE` writable bytes that stay valid until the
    /// page is returned with `FrameAllocator::free_page` or released by
    /// `PageDirectory::destroy`.
    pub const unsafe fn from_ptr(ptr: NonNull<u8>) -> Self {
        Self(ptr)
    }

    /// Kernel virtual address of the page
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    /// Copy `data` into the page at `offset`.
    pub fn write(self, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= PGSIZE, "write past end of page");
        // Safety: bounds checked above, validity guaranteed by `from_ptr`.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), self.0.as_ptr().add(offset), data.len());
        }
    }

    /// Copy bytes at `offset` out of the page into `buf`.
    pub fn read(self, offset: usize, buf: &mut [u8]) {
        assert!(offset + buf.len() <= PGSIZE, "read past end of page");
        // Safety: bounds checked above, validity guaranteed by `from_ptr`.
        unsafe {
            core::ptr::copy_nonoverlapping(self.0.as_ptr().add(offset), buf.as_mut_ptr(), buf.len());
        }
    }

    /// Fill `len` bytes starting at `offset` with zero.
    pub fn zero(self, offset: usize, len: usize) {
        assert!(offset + len <= PGSIZE, "zero past end of page");
        // Safety: bounds checked above, validity guaranteed by `from_ptr`.
        unsafe {
            core::ptr::write_bytes(self.0.as_ptr().add(offset), 0, len);
        }
    }

    /// Run `f` over the whole page.
    ///
    /// # Safety
    /// No other access to the page may happen while `f` runs, which holds
    /// for a page that has not been installed in a page directory yet.
    pub unsafe fn with_bytes_mut<R>(self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(core::slice::from_raw_parts_mut(self.0.as_ptr(), PGSIZE))
    }

    /// Store a little-endian word at `offset`.
    pub fn write_u32(self, offset: usize, value: u32) {
        self.write(offset, &value.to_le_bytes());
    }

    /// Load a little-endian word from `offset`.
    pub fn read_u32(self, offset: usize) -> u32 {
        let mut word = [0u8; 4];
        self.read(offset, &mut word);
        u32::from_le_bytes(word)
    }
}

/// Physical page allocator capability
pub trait FrameAllocator: Send + Sync {
    /// Allocate one page, `None` when the pool is exhausted
    fn alloc_page(&self, flags: AllocFlags) -> Option<KernelPage>;

    /// Return a page that was never installed in a page directory
    fn free_page(&self, page: KernelPage);
}
