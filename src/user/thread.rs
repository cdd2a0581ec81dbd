//! Secondary Threads
//!
//! Threads other than a process's main thread. They share the address
//! space and resource tables of their process and each get one private
//! stack page, placed in the highest unmapped page below the main stack.

use super::process::{Process, ProcessError, ProcessResult, ThreadRecord};
use super::Kernel;
use crate::config::{PGSIZE, PHYS_BASE};
use crate::metrics::METRICS;
use crate::mm::paging::install_page;
use crate::mm::pmm::AllocFlags;
use crate::mm::uaccess::UserMemory;
use crate::mm::UserAddr;
use crate::sched::{IntrFrame, ThreadId};
use crate::sync::Semaphore;
use alloc::boxed::Box;
use alloc::format;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

/// Words pushed below the stack top for a new thread: a fake return
/// address, the user function, its argument and two words of padding.
const THREAD_STACK_WORDS: u32 = 5;

/// Record of one non-main thread, owned by its process
pub struct SecondaryThread {
    pub tid: ThreadId,
    /// Position in creation order, starting at 1
    pub seq: usize,
    pub exited: bool,
    /// Thread registered by `join`, at most one
    pub waiter: Option<ThreadId>,
    /// Raised once when the thread exits
    pub exit_signal: Arc<dyn Semaphore>,
}

/// Handed from `create_thread` to the new thread
struct ThreadSetup {
    stub: UserAddr,
    func: UserAddr,
    arg: UserAddr,
    creator: ThreadId,
    process: Arc<Process>,
    ok: AtomicBool,
    done: Arc<dyn Semaphore>,
}

impl Kernel {
    /// Start a secondary thread in the running process
    ///
    /// # Arguments
    /// * `stub` - User entry point, called with `func` and `arg` on the stack
    /// * `func` - User function the stub runs
    /// * `arg` - Argument passed to `func`
    ///
    /// # Returns
    /// The new thread's id once it has its stack
    pub fn create_thread(self: &Arc<Self>, stub: UserAddr, func: UserAddr, arg: UserAddr) -> ProcessResult<ThreadId> {
        let threads = &self.platform.threads;
        let process = self.current_process().ok_or(ProcessError::NotUserProcess)?;

        let setup = Arc::new(ThreadSetup {
            stub,
            func,
            arg,
            creator: threads.current(),
            process,
            ok: AtomicBool::new(false),
            done: threads.new_semaphore(0),
        });

        let name = format!("{}-thread", setup.process.name());
        let kernel = self.clone();
        let handoff = setup.clone();
        let tid = threads
            .spawn(
                &name,
                Box::new(move || {
                    kernel.start_thread(handoff);
                }),
            )
            .ok_or(ProcessError::SpawnFailed)?;

        setup.done.down();
        if setup.ok.load(Ordering::SeqCst) {
            Ok(tid)
        } else {
            Err(ProcessError::ThreadSetupFailed)
        }
    }

    /// Body of a new secondary thread
    fn start_thread(&self, setup: Arc<ThreadSetup>) -> ! {
        let threads = self.platform.threads.clone();
        let tid = threads.current();
        let process = setup.process.clone();

        let record = Arc::new(ThreadRecord::new(tid, Some(setup.creator), &*threads));
        record.set_process(Some(process.clone()));
        self.insert_record(record);
        self.activate_process();

        {
            let mut list = process.threads.lock();
            let seq = list.len() + 1;
            list.push(SecondaryThread {
                tid,
                seq,
                exited: false,
                waiter: None,
                exit_signal: threads.new_semaphore(0),
            });
        }

        match self.thread_frame(&process, &setup) {
            Ok(frame) => {
                METRICS.inc_threads_spawned();
                log_debug!("thread", "{} started thread {} at {:#x}", process.name(), tid, frame.esp);
                setup.ok.store(true, Ordering::SeqCst);
                setup.done.up();
                drop(process);
                drop(setup);
                threads.enter_user_mode(&frame)
            }
            Err(err) => {
                log_warn!("thread", "{} thread setup failed: {}", process.name(), err);
                process.threads.lock().retain(|entry| entry.tid != tid);
                setup.done.up();
                drop(process);
                drop(setup);
                self.retire()
            }
        }
    }

    /// Allocate the thread's stack and lay out its first frame
    fn thread_frame(&self, process: &Process, setup: &ThreadSetup) -> ProcessResult<IntrFrame> {
        let top = self.allocate_thread_stack(process)?;
        let esp = top - THREAD_STACK_WORDS * 4;

        let pd = process.page_directory().ok_or(ProcessError::NotUserProcess)?;
        let mem = UserMemory::new(&*pd);
        let words = [0, setup.func, setup.arg, 0, 0];
        for (i, word) in words.iter().enumerate() {
            if !mem.write_u32(esp + 4 * i as u32, *word) {
                return Err(ProcessError::ThreadSetupFailed);
            }
        }

        Ok(IntrFrame::user(setup.stub, esp))
    }

    /// Map a zeroed stack page in the highest free slot below the main
    /// stack and return the address just above it
    fn allocate_thread_stack(&self, process: &Process) -> ProcessResult<UserAddr> {
        let frames = &self.platform.frames;
        let page = frames
            .alloc_page(AllocFlags::USER | AllocFlags::ZERO)
            .ok_or(ProcessError::OutOfMemory)?;

        // Placement is serialized with the other threads of the process, and
        // with teardown, which empties the list before destroying the pd.
        let list = process.threads.lock();
        let pd = match process.page_directory() {
            Some(pd) if !process.is_exiting() => pd,
            _ => {
                drop(list);
                frames.free_page(page);
                return Err(ProcessError::NotUserProcess);
            }
        };
        let mut upage = PHYS_BASE - PGSIZE as u32;
        while upage >= PGSIZE as u32 {
            if pd.get_page(upage).is_none() {
                if install_page(&*pd, upage, page, true) {
                    return Ok(upage + PGSIZE as u32);
                }
                break;
            }
            upage -= PGSIZE as u32;
        }

        frames.free_page(page);
        Err(ProcessError::OutOfMemory)
    }

    /// Wait for secondary thread `target` of the running process to exit
    ///
    /// Fails without blocking if `target` is not a secondary thread of this
    /// process or someone already joined it.
    pub fn join(&self, target: ThreadId) -> ProcessResult<ThreadId> {
        let process = self.current_process().ok_or(ProcessError::NotUserProcess)?;
        let me = self.platform.threads.current();
        if target == me {
            return Err(ProcessError::NoSuchThread);
        }

        let signal = {
            let mut list = process.threads.lock();
            let entry = list
                .iter_mut()
                .find(|entry| entry.tid == target)
                .ok_or(ProcessError::NoSuchThread)?;
            if entry.waiter.is_some() {
                return Err(ProcessError::AlreadyJoined);
            }
            entry.waiter = Some(me);
            if entry.exited {
                return Ok(target);
            }
            entry.exit_signal.clone()
        };

        // The target needs the syscall lock on its way out.
        let held = process.syscall_lock.held_by_current_thread();
        if held {
            process.syscall_lock.release();
        }
        signal.down();
        if held {
            process.syscall_lock.acquire();
        }
        Ok(target)
    }

    /// Terminate the running thread
    ///
    /// A secondary thread just retires. The main thread waits for its
    /// secondaries and then ends the whole process.
    pub fn exit_thread(&self) -> ! {
        let tid = self.platform.threads.current();
        let process = match self.current_process() {
            Some(process) => process,
            None => self.exit_process(),
        };
        if process.pid() == tid {
            drop(process);
            self.exit_thread_as_main();
        }

        let signal = {
            let mut list = process.threads.lock();
            list.iter_mut().find(|entry| entry.tid == tid).map(|entry| {
                entry.exited = true;
                entry.exit_signal.clone()
            })
        };
        if process.syscall_lock.held_by_current_thread() {
            process.syscall_lock.release();
        }
        if let Some(signal) = signal {
            signal.up();
        }

        log_debug!("thread", "{} thread {} exited", process.name(), tid);
        drop(process);
        self.retire()
    }

    /// `exit_thread` for a process's main thread
    fn exit_thread_as_main(&self) -> ! {
        loop {
            let Some(process) = self.current_process() else {
                self.exit_process()
            };
            // A sibling's exit already ended the process.
            if process.is_exiting() {
                self.abandon(process);
            }
            let pending = process
                .threads
                .lock()
                .iter()
                .find(|entry| !entry.exited && entry.waiter.is_none())
                .map(|entry| entry.tid);
            drop(process);
            match pending {
                Some(tid) => {
                    let _ = self.join(tid);
                }
                None => break,
            }
        }

        let tid = self.platform.threads.current();
        if let Some(record) = self.record(tid) {
            if let Some(process) = record.process() {
                if !process.begin_exit() {
                    drop(record);
                    self.abandon(process);
                }
                log_info!("thread", "{} main thread exiting after its threads", process.name());
                self.report_exit(&process, 0);
            }
            record.set_exit_code(0);
        }
        self.exit_process()
    }

    /// Detach the running thread from its process and terminate it,
    /// leaving the process alive
    pub(crate) fn retire(&self) -> ! {
        let threads = self.platform.threads.clone();
        let tid = threads.current();
        if let Some(record) = self.record(tid) {
            record.set_process(None);
        }
        self.remove_record(tid);
        threads.exit()
    }
}
