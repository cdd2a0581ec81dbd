//! Per-Process Resource Tables
//!
//! Open files and user-level synchronization objects owned by one process.
//! The tables are plain data: the owning `Process` wraps each one in a
//! `spin::Mutex` and hands out `Arc` clones, so no guard is ever held while
//! a file or a blocking primitive is in use.

use crate::config::FIRST_USER_FD;
use crate::fs::File;
use crate::mm::UserAddr;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// Descriptor of console input
pub const STDIN_FILENO: i32 = 0;
/// Descriptor of console output
pub const STDOUT_FILENO: i32 = 1;

/// Open file entry
#[derive(Clone)]
pub struct FileDescriptor {
    /// Descriptor number, unique within the process
    pub fd: i32,
    /// Name the file was opened with
    pub name: String,
    /// Open handle, closed when the last clone is dropped
    pub file: Arc<dyn File>,
}

impl core::fmt::Debug for FileDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileDescriptor")
            .field("fd", &self.fd)
            .field("name", &self.name)
            .finish()
    }
}

/// File descriptor table for a process
///
/// Descriptors are handed out from a counter starting at `FIRST_USER_FD`
/// and never reused, so 0 and 1 stay reserved for the console.
#[derive(Debug)]
pub struct FdTable {
    entries: Vec<FileDescriptor>,
    next_fd: i32,
}

impl FdTable {
    /// Create a new empty FD table
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_fd: FIRST_USER_FD,
        }
    }

    /// Register an open file and return its descriptor
    pub fn insert(&mut self, name: &str, file: Arc<dyn File>) -> i32 {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.entries.push(FileDescriptor {
            fd,
            name: String::from(name),
            file,
        });
        fd
    }

    /// Get the open file behind `fd`
    pub fn get(&self, fd: i32) -> Option<Arc<dyn File>> {
        self.entries
            .iter()
            .find(|entry| entry.fd == fd)
            .map(|entry| entry.file.clone())
    }

    /// Unregister `fd`; the caller closes the file by dropping the entry
    pub fn remove(&mut self, fd: i32) -> Option<FileDescriptor> {
        let index = self.entries.iter().position(|entry| entry.fd == fd)?;
        Some(self.entries.remove(index))
    }

    /// Take every entry out of the table, oldest first
    pub fn drain(&mut self) -> Vec<FileDescriptor> {
        core::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry mapping opaque user addresses to kernel objects.
///
/// The address is an identity key only and is never dereferenced. Lookups
/// scan in insertion order, so a key registered twice resolves to its
/// oldest entry.
pub struct UserSyncTable<T: ?Sized> {
    entries: Vec<(UserAddr, Arc<T>)>,
}

impl<T: ?Sized> UserSyncTable<T> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, key: UserAddr, object: Arc<T>) {
        self.entries.push((key, object));
    }

    pub fn get(&self, key: UserAddr) -> Option<Arc<T>> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, object)| object.clone())
    }

    /// Drop every record. The wrapped objects are not released or signalled.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: ?Sized> Default for UserSyncTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
