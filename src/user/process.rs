//! Process Management
//!
//! This module implements the process control block and the process
//! lifecycle: creating a process (spawn + load), handing its exit status to
//! the parent, waiting for children, and tearing everything down on exit.
//!
//! # Ownership
//!
//! A `Process` is shared by `Arc` between the records of all of its
//! threads. It owns its page directory, file table, sync-object tables and
//! secondary-thread records. A parent reaches its children only through
//! `ChildStatus` records, so neither side keeps the other alive.
//!
//! # Teardown ordering
//!
//! The page directory handle is taken out of the process before the kernel
//! directory is activated, and only then destroyed. A context switch that
//! runs `activate_process` in between therefore never loads a freed table.

use super::elf::{program_name, ElfLoader, LoadError};
use super::tables::{FdTable, UserSyncTable};
use super::thread::SecondaryThread;
use super::Kernel;
use crate::config::{COMMAND_LINE_MAX, PROCESS_NAME_MAX};
use crate::fs::File;
use crate::metrics::METRICS;
use crate::mm::paging::PageDirectory;
use crate::sched::{IntrFrame, Scheduler, ThreadId};
use crate::sync::{Semaphore, SleepLock, SleepLockGuard};
use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use spin::Mutex;

/// Exit status reported for a process killed by the kernel
pub const KILLED_STATUS: i32 = -1;

/// Process error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    /// The scheduler could not create a thread
    SpawnFailed,

    /// The executable could not be loaded
    LoadFailed(LoadError),

    /// Out of memory
    OutOfMemory,

    /// No unclaimed child with that id
    NoSuchChild,

    /// Child already waited on
    AlreadyWaited,

    /// No secondary thread with that id in this process
    NoSuchThread,

    /// Thread already has a joiner
    AlreadyJoined,

    /// New thread could not set up its stack
    ThreadSetupFailed,

    /// Running thread has no process
    NotUserProcess,
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProcessError::SpawnFailed => write!(f, "thread creation failed"),
            ProcessError::LoadFailed(err) => write!(f, "load failed: {}", err),
            ProcessError::OutOfMemory => write!(f, "out of memory"),
            ProcessError::NoSuchChild => write!(f, "no such child"),
            ProcessError::AlreadyWaited => write!(f, "child already waited on"),
            ProcessError::NoSuchThread => write!(f, "no such thread"),
            ProcessError::AlreadyJoined => write!(f, "thread already joined"),
            ProcessError::ThreadSetupFailed => write!(f, "thread setup failed"),
            ProcessError::NotUserProcess => write!(f, "not a user process"),
        }
    }
}

/// Result type for process operations
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Exit-status handoff between a child process and its parent
pub struct ChildStatus {
    tid: AtomicU32,
    exit_code: AtomicI32,
    /// Set by the first `wait`
    claimed: AtomicBool,
    /// Raised exactly once, when the child process exits
    exited: Arc<dyn Semaphore>,
}

impl ChildStatus {
    fn new(exited: Arc<dyn Semaphore>) -> Self {
        Self {
            tid: AtomicU32::new(0),
            exit_code: AtomicI32::new(KILLED_STATUS),
            claimed: AtomicBool::new(false),
            exited,
        }
    }

    pub fn tid(&self) -> ThreadId {
        self.tid.load(Ordering::SeqCst)
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }
}

/// Per kernel thread bookkeeping
pub struct ThreadRecord {
    tid: ThreadId,
    parent: Option<ThreadId>,
    /// Owning process, `None` for kernel-only threads and after teardown
    process: Mutex<Option<Arc<Process>>>,
    /// One entry per child process spawned by this thread
    children: Mutex<Vec<Arc<ChildStatus>>>,
    /// Raised by a child once it knows whether it loaded
    load_signal: Arc<dyn Semaphore>,
    load_outcome: Mutex<Result<(), LoadError>>,
    exit_code: AtomicI32,
}

impl ThreadRecord {
    pub(crate) fn new(tid: ThreadId, parent: Option<ThreadId>, threads: &dyn Scheduler) -> Self {
        Self {
            tid,
            parent,
            process: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            load_signal: threads.new_semaphore(0),
            load_outcome: Mutex::new(Ok(())),
            exit_code: AtomicI32::new(KILLED_STATUS),
        }
    }

    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    pub fn parent(&self) -> Option<ThreadId> {
        self.parent
    }

    pub fn process(&self) -> Option<Arc<Process>> {
        self.process.lock().clone()
    }

    pub(crate) fn set_process(&self, process: Option<Arc<Process>>) {
        *self.process.lock() = process;
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }

    pub(crate) fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::SeqCst);
    }

    /// Number of children not yet reaped by `wait`
    pub fn child_count(&self) -> usize {
        self.children.lock().len()
    }
}

/// Process Control Block (PCB)
pub struct Process {
    name: String,
    pid: ThreadId,
    page_dir: Mutex<Option<Arc<dyn PageDirectory>>>,
    pub(crate) files: Mutex<FdTable>,
    pub(crate) user_locks: Mutex<UserSyncTable<dyn SleepLock>>,
    pub(crate) user_semas: Mutex<UserSyncTable<dyn Semaphore>>,
    /// Secondary threads; the guard also serializes thread stack placement
    pub(crate) threads: Mutex<Vec<SecondaryThread>>,
    /// Kept open and write-protected while the process lives
    executable: Mutex<Option<Arc<dyn File>>>,
    /// One syscall in flight per process
    pub(crate) syscall_lock: Arc<dyn SleepLock>,
    status: Arc<ChildStatus>,
    exiting: AtomicBool,
}

impl Process {
    fn new(name: &str, pid: ThreadId, syscall_lock: Arc<dyn SleepLock>, status: Arc<ChildStatus>) -> Self {
        Self {
            name: String::from(name),
            pid,
            page_dir: Mutex::new(None),
            files: Mutex::new(FdTable::new()),
            user_locks: Mutex::new(UserSyncTable::new()),
            user_semas: Mutex::new(UserSyncTable::new()),
            threads: Mutex::new(Vec::new()),
            executable: Mutex::new(None),
            syscall_lock,
            status,
            exiting: AtomicBool::new(false),
        }
    }

    /// Process name, the first token of its command line
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process id, the id of the main thread
    pub fn pid(&self) -> ThreadId {
        self.pid
    }

    pub fn page_directory(&self) -> Option<Arc<dyn PageDirectory>> {
        self.page_dir.lock().clone()
    }

    /// True once teardown has started
    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }

    /// Mark the process as exiting. Only the first caller gets `true`; it
    /// owns the exit report and the teardown.
    pub(crate) fn begin_exit(&self) -> bool {
        !self.exiting.swap(true, Ordering::SeqCst)
    }

    pub fn open_file_count(&self) -> usize {
        self.files.lock().len()
    }

    pub fn secondary_thread_count(&self) -> usize {
        self.threads.lock().len()
    }
}

/// Handed to a freshly spawned process thread
struct StartProcess {
    command_line: String,
    name: String,
    parent: Arc<ThreadRecord>,
    status: Arc<ChildStatus>,
}

/// Cut `s` to at most `max` bytes on a character boundary
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

impl Kernel {
    /// Start a new process running `command_line`
    ///
    /// Blocks until the child knows whether its executable loaded.
    ///
    /// # Returns
    /// The new process id, or why it could not be started
    pub fn create_process(self: &Arc<Self>, command_line: &str) -> ProcessResult<ThreadId> {
        let command_line = truncate(command_line, COMMAND_LINE_MAX);
        let name = program_name(command_line)
            .map(|name| truncate(name, PROCESS_NAME_MAX))
            .ok_or(ProcessError::LoadFailed(LoadError::EmptyCommandLine))?;

        let threads = &self.platform.threads;
        let parent = self.current_record();
        let status = Arc::new(ChildStatus::new(threads.new_semaphore(0)));

        let start = StartProcess {
            command_line: String::from(command_line),
            name: String::from(name),
            parent: parent.clone(),
            status: status.clone(),
        };
        let kernel = self.clone();
        let tid = threads
            .spawn(
                name,
                Box::new(move || {
                    kernel.start_process(start);
                }),
            )
            .ok_or(ProcessError::SpawnFailed)?;

        status.tid.store(tid, Ordering::SeqCst);
        parent.children.lock().push(status.clone());
        parent.load_signal.down();

        let outcome = *parent.load_outcome.lock();
        match outcome {
            Ok(()) => {
                log_info!("exec", "started {} as pid {}", name, tid);
                Ok(tid)
            }
            Err(err) => {
                parent
                    .children
                    .lock()
                    .retain(|child| !Arc::ptr_eq(child, &status));
                log_warn!("exec", "{} failed to start: {}", name, err);
                Err(ProcessError::LoadFailed(err))
            }
        }
    }

    /// Body of a new process's main thread
    fn start_process(&self, start: StartProcess) -> ! {
        let threads = self.platform.threads.clone();
        let tid = threads.current();

        let record = Arc::new(ThreadRecord::new(tid, Some(start.parent.tid), &*threads));
        self.insert_record(record.clone());
        start.status.tid.store(tid, Ordering::SeqCst);

        let process = Arc::new(Process::new(
            &start.name,
            tid,
            threads.new_lock(),
            start.status.clone(),
        ));
        record.set_process(Some(process.clone()));

        match self.load_process(&process, &start.command_line) {
            Ok(frame) => {
                METRICS.inc_processes_spawned();
                *start.parent.load_outcome.lock() = Ok(());
                start.parent.load_signal.up();
                drop(process);
                drop(record);
                drop(start);
                threads.enter_user_mode(&frame)
            }
            Err(err) => {
                METRICS.inc_load_failures();
                self.report_exit(&process, KILLED_STATUS);
                record.set_exit_code(KILLED_STATUS);
                process.exiting.store(true, Ordering::SeqCst);
                self.release_address_space(&process);
                record.set_process(None);
                self.remove_record(tid);

                *start.parent.load_outcome.lock() = Err(err);
                start.parent.load_signal.up();
                drop(process);
                drop(record);
                drop(start);
                threads.exit()
            }
        }
    }

    /// Build the address space and load the executable into it
    fn load_process(&self, process: &Process, command_line: &str) -> Result<IntrFrame, LoadError> {
        let pd = self
            .platform
            .mmu
            .create_directory()
            .ok_or(LoadError::OutOfMemory)?;
        *process.page_dir.lock() = Some(pd.clone());
        self.activate_process();

        let image = {
            let _fs = SleepLockGuard::new(self.fs_lock());
            ElfLoader::new(&*self.platform.frames, &*pd).load(&*self.platform.fs, command_line)?
        };
        *process.executable.lock() = Some(image.executable);

        Ok(IntrFrame::user(image.entry, image.esp))
    }

    /// Wait for child `child` of the running thread to exit
    ///
    /// # Returns
    /// The child's exit code. Fails without blocking if `child` is not an
    /// unreaped child of this thread.
    pub fn wait(&self, child: ThreadId) -> ProcessResult<i32> {
        let record = self.current_record();

        let status = {
            let children = record.children.lock();
            let status = children
                .iter()
                .find(|status| status.tid() == child)
                .ok_or(ProcessError::NoSuchChild)?;
            if status.claimed.swap(true, Ordering::SeqCst) {
                return Err(ProcessError::AlreadyWaited);
            }
            status.clone()
        };

        log_debug!("proc", "thread {} waiting for {}", record.tid, child);
        status.exited.down();

        record
            .children
            .lock()
            .retain(|other| !Arc::ptr_eq(other, &status));
        Ok(status.exit_code.load(Ordering::SeqCst))
    }

    /// Tear the running thread's process down and terminate the thread
    ///
    /// The exit code is whatever was last stored in the thread's record.
    /// A thread without a process just terminates.
    pub fn exit_process(&self) -> ! {
        let threads = self.platform.threads.clone();
        let tid = threads.current();

        let record = self.record(tid);
        let process = record.as_ref().and_then(|record| record.process());
        let (record, process) = match (record, process) {
            (Some(record), Some(process)) => (record, process),
            _ => {
                self.remove_record(tid);
                threads.exit()
            }
        };

        process.exiting.store(true, Ordering::SeqCst);
        let code = record.exit_code();

        if self.fs_lock.held_by_current_thread() {
            self.fs_lock.release();
        }

        {
            let _fs = SleepLockGuard::new(self.fs_lock());
            let executable = process.executable.lock().take();
            if let Some(executable) = executable {
                executable.allow_write();
            }
            let files = process.files.lock().drain();
            drop(files);
        }

        process.user_locks.lock().clear();
        process.user_semas.lock().clear();

        // Joiners wake up, find the process exiting and retire.
        let orphans = core::mem::take(&mut *process.threads.lock());
        for thread in orphans.iter().filter(|t| !t.exited && t.waiter.is_some()) {
            thread.exit_signal.up();
        }
        drop(orphans);

        self.release_address_space(&process);
        record.set_process(None);

        if process.syscall_lock.held_by_current_thread() {
            process.syscall_lock.release();
        }

        process.status.exit_code.store(code, Ordering::SeqCst);
        process.status.exited.up();

        METRICS.inc_processes_exited();
        log_info!("proc", "{} (pid {}) exited with {}", process.name, process.pid, code);

        self.remove_record(tid);
        drop(process);
        drop(record);
        threads.exit()
    }

    /// Context-switch hook: load the running thread's page directory, or
    /// the kernel-only one, and refresh the kernel stack used for traps
    pub fn activate_process(&self) {
        let pd = self
            .current_process()
            .and_then(|process| process.page_directory());
        match pd {
            Some(pd) => pd.activate(),
            None => self.platform.mmu.activate_kernel(),
        }
        self.platform.threads.update_kernel_stack();
    }

    /// Print the exit report, record `code` and exit the process
    pub fn terminate(&self, code: i32) -> ! {
        let tid = self.platform.threads.current();
        if let Some(record) = self.record(tid) {
            if let Some(process) = record.process() {
                if !process.begin_exit() {
                    drop(record);
                    self.abandon(process);
                }
                self.report_exit(&process, code);
            }
            record.set_exit_code(code);
        }
        self.exit_process()
    }

    /// Leave a process another thread is already tearing down
    pub(crate) fn abandon(&self, process: Arc<Process>) -> ! {
        if process.syscall_lock.held_by_current_thread() {
            process.syscall_lock.release();
        }
        drop(process);
        self.retire()
    }

    /// `name: exit(code)` on the console
    pub(crate) fn report_exit(&self, process: &Process, code: i32) {
        let line = format!("{}: exit({})\n", process.name, code);
        self.platform.console.putbuf(line.as_bytes());
    }

    /// Unhook and destroy the page directory of `process`
    fn release_address_space(&self, process: &Process) {
        let pd = process.page_dir.lock().take();
        if let Some(pd) = pd {
            self.platform.mmu.activate_kernel();
            pd.destroy();
        }
    }
}
