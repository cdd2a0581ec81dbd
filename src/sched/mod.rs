//! Kernel Thread Capability
//!
//! The preemptive scheduler, context switching and interrupt delivery live
//! outside this crate. User-program code reaches them through `Scheduler`,
//! which every platform provides exactly once.
//!
//! # Context switch hook
//!
//! The scheduler must call `Kernel::activate_process` every time it switches
//! to a thread, so that the incoming thread runs on its process's page
//! directory (or the kernel-only one) and traps land on its kernel stack.

pub mod context;

pub use context::IntrFrame;

use crate::sync::{Semaphore, SleepLock};
use alloc::boxed::Box;
use alloc::sync::Arc;

/// Kernel thread identifier. A process id is the id of its main thread.
pub type ThreadId = u32;

/// Body of a freshly spawned kernel thread. It never returns normally:
/// every path ends in `Scheduler::exit` or `Scheduler::enter_user_mode`.
pub type ThreadEntry = Box<dyn FnOnce() + Send + 'static>;

/// Thread management capability
pub trait Scheduler: Send + Sync {
    /// Id of the running thread
    fn current(&self) -> ThreadId;

    /// Create a kernel thread named `name` running `entry`.
    ///
    /// The new thread may run (and even exit) before this returns.
    /// Returns `None` if no thread could be created.
    fn spawn(&self, name: &str, entry: ThreadEntry) -> Option<ThreadId>;

    /// Terminate the running thread
    fn exit(&self) -> !;

    /// Simulated return from interrupt: restore `frame` and continue in
    /// user mode at `frame.eip` with stack `frame.esp`.
    fn enter_user_mode(&self, frame: &IntrFrame) -> !;

    /// Point the TSS at the running thread's kernel stack
    fn update_kernel_stack(&self);

    /// New counting semaphore with initial `value`
    fn new_semaphore(&self, value: u32) -> Arc<dyn Semaphore>;

    /// New unlocked sleeping lock
    fn new_lock(&self) -> Arc<dyn SleepLock>;
}
