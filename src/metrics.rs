/// Kernel metrics collection module
/// Tracks user-program statistics using atomic counters for SMP safety

use core::sync::atomic::{AtomicU64, Ordering};

/// Number of syscall numbers tracked individually
pub const MAX_SYSCALLS: usize = 32;

/// Global user-program metrics
pub struct SystemMetrics {
    /// Per-syscall counters (indexed by syscall number)
    pub syscalls: [AtomicU64; MAX_SYSCALLS],

    /// Syscalls whose number was outside the known table
    pub unknown_syscalls: AtomicU64,

    /// Processes whose main thread was spawned
    pub processes_spawned: AtomicU64,

    /// Processes that failed to load
    pub load_failures: AtomicU64,

    /// Processes fully torn down
    pub processes_exited: AtomicU64,

    /// Secondary threads started
    pub threads_spawned: AtomicU64,

    /// Processes killed for handing the kernel a bad pointer
    pub pointer_faults: AtomicU64,
}

impl SystemMetrics {
    /// Create a new SystemMetrics instance with all counters at zero
    pub const fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self {
            syscalls: [ZERO; MAX_SYSCALLS],
            unknown_syscalls: AtomicU64::new(0),
            processes_spawned: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
            processes_exited: AtomicU64::new(0),
            threads_spawned: AtomicU64::new(0),
            pointer_faults: AtomicU64::new(0),
        }
    }

    /// Increment the counter for a syscall number
    #[inline]
    pub fn inc_syscall(&self, number: u32) {
        match self.syscalls.get(number as usize) {
            Some(counter) => counter.fetch_add(1, Ordering::Relaxed),
            None => self.unknown_syscalls.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Read the counter for a syscall number
    pub fn syscall_count(&self, number: u32) -> u64 {
        self.syscalls
            .get(number as usize)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    #[inline]
    pub fn inc_processes_spawned(&self) {
        self.processes_spawned.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_load_failures(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_processes_exited(&self) {
        self.processes_exited.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_threads_spawned(&self) {
        self.threads_spawned.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_pointer_faults(&self) {
        self.pointer_faults.fetch_add(1, Ordering::Relaxed);
    }
}

/// Global metrics instance
pub static METRICS: SystemMetrics = SystemMetrics::new();
