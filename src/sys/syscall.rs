//! System Call Dispatcher
//!
//! Entry point for every trap from user mode. The dispatcher takes the
//! calling process's syscall lock, decodes the call from the user stack and
//! routes it to a handler. Every user address is checked against the
//! caller's page directory before it is touched.
//!
//! Calls that end the thread (`exit`, `pt_exit`, a bad pointer) are carried
//! out of the handler as a `Stop` so that nothing borrowed from the process
//! is alive when the thread terminates.

use super::Sysno;
use crate::config::{COMMAND_LINE_MAX, PGSIZE};
use crate::fs::File;
use crate::metrics::METRICS;
use crate::mm::uaccess::UserMemory;
use crate::mm::UserAddr;
use crate::sched::{IntrFrame, ThreadId};
use crate::sync::SleepLockGuard;
use crate::user::process::KILLED_STATUS;
use crate::user::tables::{STDIN_FILENO, STDOUT_FILENO};
use crate::user::{Kernel, Process};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

/// Why a call did not return to user mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    /// Invalid user address; the process dies with status -1
    Fault(UserAddr),
    /// Process exit with the given status, reported on the console
    Exit(i32),
    /// `pt_exit`
    ThreadExit,
    /// The process is gone or going; leave quietly
    Retire,
    Halt,
}

type CallResult = Result<i32, Stop>;

/// Partial sum of 1/k! for k < n, scaled by 10^6 and truncated
pub fn compute_e(n: i32) -> i32 {
    let mut sum = 0.0f64;
    let mut term = 1.0f64;
    for k in 0..n.max(0) {
        sum += term;
        term /= (k + 1) as f64;
        if term == 0.0 {
            break;
        }
    }
    (sum * 1_000_000.0) as i32
}

impl Kernel {
    /// Handle one system call trapped with `frame`
    ///
    /// Returns with `frame.eax` set, or never returns if the call ended the
    /// thread.
    pub fn syscall(self: &Arc<Self>, frame: &mut IntrFrame) {
        if let Err(stop) = self.dispatch(frame) {
            self.stop(stop);
        }
    }

    fn dispatch(self: &Arc<Self>, frame: &mut IntrFrame) -> Result<(), Stop> {
        let process = self.current_process().ok_or(Stop::Retire)?;
        let lock = process.syscall_lock.clone();
        lock.acquire();

        if process.is_exiting() {
            lock.release();
            return Err(Stop::Retire);
        }
        let Some(pd) = process.page_directory() else {
            lock.release();
            return Err(Stop::Retire);
        };
        let mem = UserMemory::new(&*pd);

        let esp = frame.esp;
        let number = mem.read_u32(esp).ok_or(Stop::Fault(esp))?;
        METRICS.inc_syscall(number);
        let sysno = match Sysno::try_from(number) {
            Ok(sysno) => sysno,
            Err(number) => {
                log_warn!("syscall", "{}: unknown system call {}", process.name(), number);
                return Err(Stop::Exit(KILLED_STATUS));
            }
        };

        let mut args = [0u32; 3];
        for (i, arg) in args.iter_mut().enumerate().take(sysno.arg_count()) {
            let addr = esp + 4 * (i as u32 + 1);
            *arg = mem.read_u32(addr).ok_or(Stop::Fault(addr))?;
        }
        log_trace!(
            "syscall",
            "{}: {}{:?}",
            process.pid(),
            sysno.name(),
            &args[..sysno.arg_count()]
        );

        let call = Call {
            kernel: self,
            process: &process,
            mem,
        };
        let ret = call.handle(sysno, args)?;

        // A sibling may have ended the process while this call was blocked.
        if process.is_exiting() {
            lock.release();
            return Err(Stop::Retire);
        }

        frame.eax = ret as u32;
        lock.release();
        Ok(())
    }

    fn stop(&self, stop: Stop) -> ! {
        match stop {
            Stop::Fault(addr) => {
                METRICS.inc_pointer_faults();
                log_warn!("syscall", "bad user address {:#x}", addr);
                self.terminate(KILLED_STATUS)
            }
            Stop::Exit(code) => self.terminate(code),
            Stop::ThreadExit => self.exit_thread(),
            Stop::Retire => self.retire(),
            Stop::Halt => self.platform().power.power_off(),
        }
    }
}

/// One system call in progress, with the caller's syscall lock held
struct Call<'a> {
    kernel: &'a Arc<Kernel>,
    process: &'a Arc<Process>,
    mem: UserMemory<'a>,
}

impl<'a> Call<'a> {
    fn handle(&self, sysno: Sysno, args: [u32; 3]) -> CallResult {
        let [a0, a1, a2] = args;
        match sysno {
            Sysno::Halt => Err(Stop::Halt),
            Sysno::Exit => Err(Stop::Exit(a0 as i32)),
            Sysno::Exec => self.exec(a0),
            Sysno::Wait => self.wait(a0),
            Sysno::Create => self.create(a0, a1),
            Sysno::Remove => self.remove(a0),
            Sysno::Open => self.open(a0),
            Sysno::Filesize => Ok(self.with_file(a0 as i32, |file| file.length() as i32)),
            Sysno::Read => self.read(a0 as i32, a1, a2 as usize),
            Sysno::Write => self.write(a0 as i32, a1, a2 as usize),
            Sysno::Seek => Ok(self.with_file(a0 as i32, |file| {
                file.seek(a1);
                0
            })),
            Sysno::Tell => Ok(self.with_file(a0 as i32, |file| file.tell() as i32)),
            Sysno::Close => Ok(self.close(a0 as i32)),
            Sysno::Practice => Ok((a0 as i32).wrapping_add(1)),
            Sysno::ComputeE => Ok(compute_e(a0 as i32)),
            Sysno::PtCreate => Ok(self.pt_create(a0, a1, a2)),
            Sysno::PtExit => Err(Stop::ThreadExit),
            Sysno::PtJoin => Ok(self
                .kernel
                .join(a0 as ThreadId)
                .map_or(-1, |tid| tid as i32)),
            Sysno::LockInit => Ok(self.lock_init(a0)),
            Sysno::LockAcquire => self.lock_acquire(a0),
            Sysno::LockRelease => self.lock_release(a0),
            Sysno::SemaInit => Ok(self.sema_init(a0, a1 as i32)),
            Sysno::SemaDown => self.sema_down(a0),
            Sysno::SemaUp => self.sema_up(a0),
            Sysno::GetTid => Ok(self.kernel.platform().threads.current() as i32),
        }
    }

    /// Run `f` with the syscall lock dropped, for calls that may block on
    /// another thread of this process
    fn blocking<R>(&self, f: impl FnOnce() -> R) -> R {
        self.process.syscall_lock.release();
        let ret = f();
        self.process.syscall_lock.acquire();
        ret
    }

    /// Copy in a NUL-terminated string; any bad byte is fatal
    fn string(&self, addr: UserAddr, max: usize) -> Result<Vec<u8>, Stop> {
        if addr == 0 {
            return Err(Stop::Fault(addr));
        }
        self.mem.read_cstr(addr, max).ok_or(Stop::Fault(addr))
    }

    fn exec(&self, cmd: UserAddr) -> CallResult {
        let line = self.string(cmd, COMMAND_LINE_MAX)?;
        let Ok(line) = core::str::from_utf8(&line) else {
            return Ok(-1);
        };
        Ok(self
            .kernel
            .create_process(line)
            .map_or(-1, |pid| pid as i32))
    }

    fn wait(&self, pid: u32) -> CallResult {
        let kernel = self.kernel;
        Ok(self
            .blocking(|| kernel.wait(pid as ThreadId))
            .unwrap_or(-1))
    }

    fn create(&self, name: UserAddr, size: u32) -> CallResult {
        let name = self.string(name, PGSIZE)?;
        let Ok(name) = core::str::from_utf8(&name) else {
            return Ok(0);
        };
        let _fs = SleepLockGuard::new(self.kernel.fs_lock());
        Ok(self.kernel.platform().fs.create(name, size) as i32)
    }

    fn remove(&self, name: UserAddr) -> CallResult {
        let name = self.string(name, PGSIZE)?;
        let Ok(name) = core::str::from_utf8(&name) else {
            return Ok(0);
        };
        let _fs = SleepLockGuard::new(self.kernel.fs_lock());
        Ok(self.kernel.platform().fs.remove(name) as i32)
    }

    fn open(&self, name: UserAddr) -> CallResult {
        let name = self.string(name, PGSIZE)?;
        let Ok(name) = core::str::from_utf8(&name) else {
            return Ok(-1);
        };
        let file = {
            let _fs = SleepLockGuard::new(self.kernel.fs_lock());
            self.kernel.platform().fs.open(name)
        };
        Ok(match file {
            Some(file) => self.process.files.lock().insert(name, file),
            None => -1,
        })
    }

    /// Run `f` on open file `fd` under the filesystem lock, -1 if unknown
    fn with_file(&self, fd: i32, f: impl FnOnce(&dyn File) -> i32) -> i32 {
        let Some(file) = self.process.files.lock().get(fd) else {
            return -1;
        };
        let _fs = SleepLockGuard::new(self.kernel.fs_lock());
        f(&*file)
    }

    fn read(&self, fd: i32, buf: UserAddr, len: usize) -> CallResult {
        if !self.mem.check_range(buf, len) {
            return Err(Stop::Fault(buf));
        }

        match fd {
            STDIN_FILENO => {
                let console = &self.kernel.platform().console;
                let mut line = Vec::new();
                while line.len() < len {
                    let c = console.getc();
                    line.push(c);
                    if c == b'\n' {
                        break;
                    }
                }
                if !self.mem.write_bytes(buf, &line) {
                    return Err(Stop::Fault(buf));
                }
                Ok(line.len() as i32)
            }
            STDOUT_FILENO => Ok(-1),
            _ => {
                let Some(file) = self.process.files.lock().get(fd) else {
                    return Ok(-1);
                };
                let mut bounce = vec![0u8; len.min(PGSIZE)];
                let mut done = 0;
                let _fs = SleepLockGuard::new(self.kernel.fs_lock());
                while done < len {
                    let chunk = (len - done).min(PGSIZE);
                    let n = file.read(&mut bounce[..chunk]);
                    let dst = buf + done as u32;
                    if !self.mem.write_bytes(dst, &bounce[..n]) {
                        return Err(Stop::Fault(dst));
                    }
                    done += n;
                    if n < chunk {
                        break;
                    }
                }
                Ok(done as i32)
            }
        }
    }

    fn write(&self, fd: i32, buf: UserAddr, len: usize) -> CallResult {
        if !self.mem.check_range(buf, len) {
            return Err(Stop::Fault(buf));
        }

        match fd {
            STDOUT_FILENO => {
                let mut data = vec![0u8; len];
                if !self.mem.read_bytes(buf, &mut data) {
                    return Err(Stop::Fault(buf));
                }
                self.kernel.platform().console.putbuf(&data);
                Ok(len as i32)
            }
            STDIN_FILENO => Ok(-1),
            _ => {
                let Some(file) = self.process.files.lock().get(fd) else {
                    return Ok(-1);
                };
                let mut bounce = vec![0u8; len.min(PGSIZE)];
                let mut done = 0;
                let _fs = SleepLockGuard::new(self.kernel.fs_lock());
                while done < len {
                    let chunk = (len - done).min(PGSIZE);
                    let src = buf + done as u32;
                    if !self.mem.read_bytes(src, &mut bounce[..chunk]) {
                        return Err(Stop::Fault(src));
                    }
                    let n = file.write(&bounce[..chunk]);
                    done += n;
                    if n < chunk {
                        break;
                    }
                }
                Ok(done as i32)
            }
        }
    }

    fn close(&self, fd: i32) -> i32 {
        let Some(entry) = self.process.files.lock().remove(fd) else {
            return -1;
        };
        let _fs = SleepLockGuard::new(self.kernel.fs_lock());
        drop(entry);
        0
    }

    fn pt_create(&self, stub: UserAddr, func: UserAddr, arg: UserAddr) -> i32 {
        // The new thread may need to see a sibling's exit through.
        match self.blocking(|| self.kernel.create_thread(stub, func, arg)) {
            Ok(tid) => tid as i32,
            Err(err) => {
                log_warn!("syscall", "{}: pt_create failed: {}", self.process.name(), err);
                -1
            }
        }
    }

    fn lock_init(&self, key: UserAddr) -> i32 {
        if key == 0 {
            return 0;
        }
        let lock = self.kernel.platform().threads.new_lock();
        self.process.user_locks.lock().insert(key, lock);
        1
    }

    fn lock_acquire(&self, key: UserAddr) -> CallResult {
        if key == 0 {
            return Err(Stop::Fault(key));
        }
        let Some(lock) = self.process.user_locks.lock().get(key) else {
            return Ok(0);
        };
        if lock.held_by_current_thread() {
            return Ok(0);
        }
        self.blocking(|| lock.acquire());
        Ok(1)
    }

    fn lock_release(&self, key: UserAddr) -> CallResult {
        if key == 0 {
            return Err(Stop::Fault(key));
        }
        let Some(lock) = self.process.user_locks.lock().get(key) else {
            return Ok(0);
        };
        if !lock.held_by_current_thread() {
            return Ok(0);
        }
        lock.release();
        Ok(1)
    }

    fn sema_init(&self, key: UserAddr, value: i32) -> i32 {
        if key == 0 || value < 0 {
            return 0;
        }
        let sema = self.kernel.platform().threads.new_semaphore(value as u32);
        self.process.user_semas.lock().insert(key, sema);
        1
    }

    fn sema_down(&self, key: UserAddr) -> CallResult {
        if key == 0 {
            return Err(Stop::Fault(key));
        }
        let Some(sema) = self.process.user_semas.lock().get(key) else {
            return Ok(0);
        };
        self.blocking(|| sema.down());
        Ok(1)
    }

    fn sema_up(&self, key: UserAddr) -> CallResult {
        if key == 0 {
            return Err(Stop::Fault(key));
        }
        let Some(sema) = self.process.user_semas.lock().get(key) else {
            return Ok(0);
        };
        sema.up();
        Ok(1)
    }
}
