//! Filesystem Capability
//!
//! The filesystem implementation is external and not safe for concurrent
//! use: every call through these traits is made with the kernel's global
//! filesystem lock held.

use alloc::sync::Arc;

/// An open file. Dropping the last handle closes it.
pub trait File: Send + Sync {
    /// Read at the current position, returns bytes read (0 at end of file)
    fn read(&self, buf: &mut [u8]) -> usize;

    /// Write at the current position, returns bytes written
    fn write(&self, buf: &[u8]) -> usize;

    /// Move the position to `pos` bytes from the start
    fn seek(&self, pos: u32);

    /// Current position
    fn tell(&self) -> u32;

    /// Length in bytes
    fn length(&self) -> u32;

    /// Forbid writes to the underlying inode while this handle is open
    fn deny_write(&self);

    /// Undo a previous `deny_write`
    fn allow_write(&self);
}

/// Filesystem capability
pub trait FileSystem: Send + Sync {
    /// Create a file of `initial_size` bytes, false if it exists or on error
    fn create(&self, name: &str, initial_size: u32) -> bool;

    /// Delete a file, false if it does not exist
    fn remove(&self, name: &str) -> bool;

    /// Open a file by name
    fn open(&self, name: &str) -> Option<Arc<dyn File>>;
}
