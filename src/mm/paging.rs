// Page directory capabilities
// The hardware page-table code is external; a process only ever sees its
// directory through `PageDirectory` and the kernel-only table through `Mmu`.

use super::pmm::KernelPage;
use super::{pg_ofs, pg_round_down, UserAddr};
use alloc::sync::Arc;

/// One user address space
pub trait PageDirectory: Send + Sync {
    /// Kernel page mapped at the page containing `upage`, if any
    fn get_page(&self, upage: UserAddr) -> Option<KernelPage>;

    /// Map `upage` to `kpage`. Returns false if the page table itself could
    /// not be allocated.
    fn set_page(&self, upage: UserAddr, kpage: KernelPage, writable: bool) -> bool;

    /// Load this directory into the MMU for the running thread
    fn activate(&self);

    /// Release the directory and every frame still mapped in it
    fn destroy(&self);
}

/// Address-space factory and kernel-only table
pub trait Mmu: Send + Sync {
    /// Create an empty user address space, `None` when out of memory
    fn create_directory(&self) -> Option<Arc<dyn PageDirectory>>;

    /// Switch the running thread to the kernel-only page table
    fn activate_kernel(&self);
}

/// Map `upage` to `kpage` if `upage` is not mapped yet.
///
/// Returns false if the page was already present or the mapping could not
/// be installed. On failure the caller still owns `kpage`.
pub fn install_page(
    pd: &dyn PageDirectory,
    upage: UserAddr,
    kpage: KernelPage,
    writable: bool,
) -> bool {
    debug_assert_eq!(pg_ofs(upage), 0);
    pd.get_page(upage).is_none() && pd.set_page(upage, kpage, writable)
}

/// Translate a user address into its backing page and the offset inside it
pub fn translate(pd: &dyn PageDirectory, addr: UserAddr) -> Option<(KernelPage, usize)> {
    pd.get_page(pg_round_down(addr))
        .map(|page| (page, pg_ofs(addr) as usize))
}
