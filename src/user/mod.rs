/// User-mode support module
///
/// This module provides functionality for user-mode execution including:
/// - ELF binary loading and parsing
/// - Process lifecycle (create, wait, exit) and secondary threads
/// - Per-process resource tables
///
/// All state is reached through a `Kernel` context instead of globals: it
/// owns the platform capabilities, the global filesystem lock and the
/// per-thread records.

pub mod elf;
pub mod process;
pub mod tables;
pub mod thread;

pub use elf::{ElfLoader, LoadError, LoadedImage};
pub use process::{ChildStatus, Process, ProcessError, ProcessResult, ThreadRecord};
pub use tables::{FdTable, FileDescriptor, UserSyncTable};
pub use thread::SecondaryThread;

use crate::dev::{Console, Power};
use crate::fs::FileSystem;
use crate::mm::paging::Mmu;
use crate::mm::pmm::FrameAllocator;
use crate::sched::{Scheduler, ThreadId};
use crate::sync::SleepLock;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use spin::Mutex;

/// External collaborators of the user-program subsystem
#[derive(Clone)]
pub struct Platform {
    pub threads: Arc<dyn Scheduler>,
    pub mmu: Arc<dyn Mmu>,
    pub frames: Arc<dyn FrameAllocator>,
    pub fs: Arc<dyn FileSystem>,
    pub console: Arc<dyn Console>,
    pub power: Arc<dyn Power>,
}

/// Kernel context for user programs
pub struct Kernel {
    platform: Platform,
    /// Serializes every filesystem call across all processes
    fs_lock: Arc<dyn SleepLock>,
    /// Records of every kernel thread that has touched this subsystem
    records: Mutex<BTreeMap<ThreadId, Arc<ThreadRecord>>>,
}

impl Kernel {
    /// Create the context. The scheduler must call `activate_process` on
    /// every context switch from now on.
    pub fn new(platform: Platform) -> Arc<Self> {
        let fs_lock = platform.threads.new_lock();
        Arc::new(Self {
            platform,
            fs_lock,
            records: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Global filesystem lock
    pub fn fs_lock(&self) -> &dyn SleepLock {
        &*self.fs_lock
    }

    /// Record of `tid`, if it has one
    pub fn record(&self, tid: ThreadId) -> Option<Arc<ThreadRecord>> {
        self.records.lock().get(&tid).cloned()
    }

    /// Record of the running thread. Kernel-only threads (the boot thread
    /// launching the first program, for one) get theirs on first use.
    pub fn current_record(&self) -> Arc<ThreadRecord> {
        let tid = self.platform.threads.current();
        if let Some(record) = self.record(tid) {
            return record;
        }
        let record = Arc::new(ThreadRecord::new(tid, None, &*self.platform.threads));
        self.records
            .lock()
            .entry(tid)
            .or_insert(record)
            .clone()
    }

    /// Process the running thread belongs to
    pub fn current_process(&self) -> Option<Arc<Process>> {
        let tid = self.platform.threads.current();
        self.record(tid).and_then(|record| record.process())
    }

    /// Number of live thread records
    pub fn thread_count(&self) -> usize {
        self.records.lock().len()
    }

    fn insert_record(&self, record: Arc<ThreadRecord>) {
        self.records.lock().insert(record.tid(), record);
    }

    fn remove_record(&self, tid: ThreadId) {
        self.records.lock().remove(&tid);
    }
}
