// Memory Management Module
// Page arithmetic for the 32-bit user address space, plus the frame
// allocator and page-directory capabilities the loader builds on.

pub mod paging;
pub mod pmm;
pub mod uaccess;

pub use paging::{install_page, Mmu, PageDirectory};
pub use pmm::{AllocFlags, FrameAllocator, KernelPage};
pub use uaccess::UserMemory;

use crate::config::{PGMASK, PGSIZE, PHYS_BASE};

/// A user virtual address. The user ABI is 32-bit, so addresses are never
/// wider than a machine word of the user program.
pub type UserAddr = u32;

/// Offset of `addr` within its page
#[inline]
pub const fn pg_ofs(addr: UserAddr) -> u32 {
    addr & PGMASK
}

/// Page number of `addr`
#[inline]
pub const fn pg_no(addr: UserAddr) -> u32 {
    addr >> 12
}

/// Start of the page containing `addr`
#[inline]
pub const fn pg_round_down(addr: UserAddr) -> UserAddr {
    addr & !PGMASK
}

/// Rounds `size` up to a whole number of pages, `None` on overflow
#[inline]
pub fn pg_round_up(size: u32) -> Option<u32> {
    size.checked_add(PGMASK).map(|s| s & !PGMASK)
}

/// True if `addr` lies below the kernel's half of the address space
#[inline]
pub const fn is_user_vaddr(addr: UserAddr) -> bool {
    addr < PHYS_BASE
}

/// Number of bytes from `addr` to the end of its page
#[inline]
pub const fn bytes_left_in_page(addr: UserAddr) -> usize {
    PGSIZE - pg_ofs(addr) as usize
}
