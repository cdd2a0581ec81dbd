//! Hosted platform for the integration tests
//!
//! Kernel threads are std threads and `Scheduler::exit` unwinds out of
//! them. "User mode" runs registered Rust closures which reach the kernel
//! only through system calls whose words they write onto their own user
//! stack, the way a real program would.

#![allow(dead_code, unused_macros)]

use mello_userprog::config::PGSIZE;
use mello_userprog::dev::{Console, Power};
use mello_userprog::fs::{File, FileSystem};
use mello_userprog::mm::{AllocFlags, FrameAllocator, KernelPage, Mmu, PageDirectory, UserMemory};
use mello_userprog::sched::{IntrFrame, Scheduler, ThreadEntry, ThreadId};
use mello_userprog::sync::{Semaphore, SleepLock};
use mello_userprog::sys::Sysno;
use mello_userprog::user::ProcessResult;
use mello_userprog::{Kernel, Platform};
use std::any::Any;
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;

/// Leave a user program with the failing line as its exit code
macro_rules! check {
    ($cond:expr) => {
        if !$cond {
            return line!() as i32;
        }
    };
}

/// Base of the text segment of every installed program
pub const TEXT_BASE: u32 = 0x0804_8000;
/// Zero-filled writable segment every installed program gets
pub const DATA_BASE: u32 = 0x0804_a000;
pub const DATA_SIZE: u32 = 0x3000;
/// Entry point of the user-side thread stub
pub const THREAD_STUB: u32 = 0x0804_8ff0;
/// First "address" handed out for registered thread functions
const FUNC_BASE: u32 = 0x0804_8800;
/// First program entry point
const ENTRY_BASE: u32 = 0x0804_8100;
/// Size of the text segment in generated images
const TEXT_SIZE: u32 = 0x400;

pub const PT_LOAD: u32 = 1;
pub const PT_INTERP: u32 = 3;
pub const PT_NOTE: u32 = 4;
pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

static NEXT_TID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static CURRENT: Cell<ThreadId> = const { Cell::new(0) };
}

/// Id of the running std thread, assigned on first use
pub fn current_tid() -> ThreadId {
    CURRENT.with(|cur| {
        if cur.get() == 0 {
            cur.set(NEXT_TID.fetch_add(1, Ordering::SeqCst));
        }
        cur.get()
    })
}

/// Unwind payload of `Scheduler::exit`
struct ThreadExit;

/// Unwind payload of `Power::power_off`
struct PowerOff;

fn describe(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic".to_string()
    }
}

pub struct HostThreads {
    machine: Weak<Machine>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    failures: Arc<Mutex<Vec<String>>>,
    pub refuse_spawn: AtomicBool,
}

impl Scheduler for HostThreads {
    fn current(&self) -> ThreadId {
        current_tid()
    }

    fn spawn(&self, name: &str, entry: ThreadEntry) -> Option<ThreadId> {
        if self.refuse_spawn.load(Ordering::SeqCst) {
            return None;
        }
        let tid = NEXT_TID.fetch_add(1, Ordering::SeqCst);
        let failures = self.failures.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                CURRENT.with(|cur| cur.set(tid));
                match panic::catch_unwind(AssertUnwindSafe(entry)) {
                    Ok(()) => failures
                        .lock()
                        .unwrap()
                        .push(format!("thread {} returned from its entry", tid)),
                    Err(payload) => {
                        if !payload.is::<ThreadExit>() && !payload.is::<PowerOff>() {
                            let msg = describe(&*payload);
                            failures.lock().unwrap().push(format!("thread {}: {}", tid, msg));
                        }
                    }
                }
            })
            .ok()?;
        self.handles.lock().unwrap().push(handle);
        Some(tid)
    }

    fn exit(&self) -> ! {
        panic::resume_unwind(Box::new(ThreadExit))
    }

    fn enter_user_mode(&self, frame: &IntrFrame) -> ! {
        let machine = self.machine.upgrade().expect("machine is gone");
        machine.run_user(frame)
    }

    fn update_kernel_stack(&self) {}

    fn new_semaphore(&self, value: u32) -> Arc<dyn Semaphore> {
        Arc::new(HostSema {
            value: Mutex::new(value),
            cond: Condvar::new(),
        })
    }

    fn new_lock(&self) -> Arc<dyn SleepLock> {
        Arc::new(HostLock {
            owner: Mutex::new(None),
            cond: Condvar::new(),
        })
    }
}

struct HostSema {
    value: Mutex<u32>,
    cond: Condvar,
}

impl Semaphore for HostSema {
    fn down(&self) {
        let mut value = self.value.lock().unwrap();
        while *value == 0 {
            value = self.cond.wait(value).unwrap();
        }
        *value -= 1;
    }

    fn up(&self) {
        *self.value.lock().unwrap() += 1;
        self.cond.notify_one();
    }
}

struct HostLock {
    owner: Mutex<Option<ThreadId>>,
    cond: Condvar,
}

impl SleepLock for HostLock {
    fn acquire(&self) {
        let me = current_tid();
        let mut owner = self.owner.lock().unwrap();
        while owner.is_some() {
            owner = self.cond.wait(owner).unwrap();
        }
        *owner = Some(me);
    }

    fn release(&self) {
        let me = current_tid();
        let mut owner = self.owner.lock().unwrap();
        if *owner != Some(me) {
            drop(owner);
            panic!("thread {} released a lock it does not hold", me);
        }
        *owner = None;
        self.cond.notify_one();
    }

    fn held_by_current_thread(&self) -> bool {
        *self.owner.lock().unwrap() == Some(current_tid())
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Frames {
    live: AtomicUsize,
    limit: Mutex<Option<usize>>,
    before_alloc: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Frames {
    /// Pages currently handed out
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Refuse allocations once `limit` pages are live
    pub fn set_limit(&self, limit: Option<usize>) {
        *self.limit.lock().unwrap() = limit;
    }

    /// Run `hook` on the allocating thread at the start of the next
    /// allocation
    pub fn before_next_alloc<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.before_alloc.lock().unwrap() = Some(Box::new(hook));
    }
}

impl FrameAllocator for Frames {
    fn alloc_page(&self, flags: AllocFlags) -> Option<KernelPage> {
        let hook = self.before_alloc.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        if let Some(limit) = *self.limit.lock().unwrap() {
            if self.live() >= limit {
                return None;
            }
        }
        let fill = if flags.contains(AllocFlags::ZERO) { 0 } else { 0xCC };
        let raw = Box::into_raw(Box::new([fill; PGSIZE])) as *mut u8;
        self.live.fetch_add(1, Ordering::SeqCst);
        Some(unsafe { KernelPage::from_ptr(NonNull::new(raw).unwrap()) })
    }

    fn free_page(&self, page: KernelPage) {
        drop(unsafe { Box::from_raw(page.as_ptr() as *mut [u8; PGSIZE]) });
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct HostDir {
    pages: Mutex<BTreeMap<u32, KernelPage>>,
    frames: Arc<Frames>,
}

impl PageDirectory for HostDir {
    fn get_page(&self, upage: u32) -> Option<KernelPage> {
        self.pages.lock().unwrap().get(&(upage & !0xFFF)).copied()
    }

    fn set_page(&self, upage: u32, kpage: KernelPage, _writable: bool) -> bool {
        self.pages.lock().unwrap().insert(upage, kpage);
        true
    }

    fn activate(&self) {}

    fn destroy(&self) {
        let pages = std::mem::take(&mut *self.pages.lock().unwrap());
        for page in pages.into_values() {
            self.frames.free_page(page);
        }
    }
}

pub struct HostMmu {
    frames: Arc<Frames>,
    pub directories: AtomicUsize,
}

impl Mmu for HostMmu {
    fn create_directory(&self) -> Option<Arc<dyn PageDirectory>> {
        self.directories.fetch_add(1, Ordering::SeqCst);
        Some(Arc::new(HostDir {
            pages: Mutex::new(BTreeMap::new()),
            frames: self.frames.clone(),
        }))
    }

    fn activate_kernel(&self) {}
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

struct Inode {
    data: Mutex<Vec<u8>>,
    deny_writes: AtomicUsize,
}

#[derive(Default)]
pub struct MemFs {
    files: Mutex<HashMap<String, Arc<Inode>>>,
    open_handles: Arc<AtomicUsize>,
}

impl MemFs {
    /// Create or replace `name` with `data`
    pub fn install(&self, name: &str, data: Vec<u8>) {
        self.files.lock().unwrap().insert(
            name.to_string(),
            Arc::new(Inode {
                data: Mutex::new(data),
                deny_writes: AtomicUsize::new(0),
            }),
        );
    }

    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        let files = self.files.lock().unwrap();
        files.get(name).map(|inode| inode.data.lock().unwrap().clone())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.files.lock().unwrap().contains_key(name)
    }

    /// Handles opened and not yet closed
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// True if some open handle denies writes to `name`
    pub fn write_denied(&self, name: &str) -> bool {
        let files = self.files.lock().unwrap();
        files
            .get(name)
            .map_or(false, |inode| inode.deny_writes.load(Ordering::SeqCst) > 0)
    }
}

impl FileSystem for MemFs {
    fn create(&self, name: &str, initial_size: u32) -> bool {
        if name.is_empty() || self.exists(name) {
            return false;
        }
        self.install(name, vec![0; initial_size as usize]);
        true
    }

    fn remove(&self, name: &str) -> bool {
        self.files.lock().unwrap().remove(name).is_some()
    }

    fn open(&self, name: &str) -> Option<Arc<dyn File>> {
        let inode = self.files.lock().unwrap().get(name).cloned()?;
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Some(Arc::new(OpenFile {
            inode,
            pos: Mutex::new(0),
            denied: AtomicBool::new(false),
            open_handles: self.open_handles.clone(),
        }))
    }
}

struct OpenFile {
    inode: Arc<Inode>,
    pos: Mutex<u32>,
    denied: AtomicBool,
    open_handles: Arc<AtomicUsize>,
}

impl File for OpenFile {
    fn read(&self, buf: &mut [u8]) -> usize {
        let data = self.inode.data.lock().unwrap();
        let mut pos = self.pos.lock().unwrap();
        let start = (*pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        *pos += n as u32;
        n
    }

    fn write(&self, buf: &[u8]) -> usize {
        if self.inode.deny_writes.load(Ordering::SeqCst) > 0 {
            return 0;
        }
        let mut data = self.inode.data.lock().unwrap();
        let mut pos = self.pos.lock().unwrap();
        let start = (*pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        data[start..start + n].copy_from_slice(&buf[..n]);
        *pos += n as u32;
        n
    }

    fn seek(&self, pos: u32) {
        *self.pos.lock().unwrap() = pos;
    }

    fn tell(&self) -> u32 {
        *self.pos.lock().unwrap()
    }

    fn length(&self) -> u32 {
        self.inode.data.lock().unwrap().len() as u32
    }

    fn deny_write(&self) {
        if !self.denied.swap(true, Ordering::SeqCst) {
            self.inode.deny_writes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn allow_write(&self) {
        if self.denied.swap(false, Ordering::SeqCst) {
            self.inode.deny_writes.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        self.allow_write();
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct HostConsole {
    output: Mutex<Vec<u8>>,
    input: Mutex<VecDeque<u8>>,
}

impl HostConsole {
    pub fn feed(&self, keys: &str) {
        self.input.lock().unwrap().extend(keys.bytes());
    }
}

impl Console for HostConsole {
    fn putbuf(&self, buf: &[u8]) {
        self.output.lock().unwrap().extend_from_slice(buf);
    }

    fn getc(&self) -> u8 {
        self.input.lock().unwrap().pop_front().unwrap_or(b'\n')
    }
}

#[derive(Default)]
pub struct HostPower {
    halted: AtomicBool,
}

impl HostPower {
    pub fn halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

impl Power for HostPower {
    fn power_off(&self) -> ! {
        self.halted.store(true, Ordering::SeqCst);
        panic::resume_unwind(Box::new(PowerOff))
    }
}

// ---------------------------------------------------------------------------
// Executable images
// ---------------------------------------------------------------------------

/// One program header of a generated image
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub p_type: u32,
    pub offset: u32,
    pub vaddr: u32,
    pub filesz: u32,
    pub memsz: u32,
    pub flags: u32,
}

impl Segment {
    pub fn text() -> Self {
        Self {
            p_type: PT_LOAD,
            offset: 0,
            vaddr: TEXT_BASE,
            filesz: TEXT_SIZE,
            memsz: TEXT_SIZE,
            flags: PF_R | PF_X,
        }
    }

    pub fn data() -> Self {
        Self {
            p_type: PT_LOAD,
            offset: 0,
            vaddr: DATA_BASE,
            filesz: 0,
            memsz: DATA_SIZE,
            flags: PF_R | PF_W,
        }
    }
}

/// Build an i386 ELF executable with the given program headers
pub fn build_elf(entry: u32, segments: &[Segment]) -> Vec<u8> {
    let mut image = vec![0x90u8; TEXT_SIZE as usize];
    let put16 = |image: &mut Vec<u8>, at: usize, v: u16| image[at..at + 2].copy_from_slice(&v.to_le_bytes());
    let put32 = |image: &mut Vec<u8>, at: usize, v: u32| image[at..at + 4].copy_from_slice(&v.to_le_bytes());

    image[..16].fill(0);
    image[..7].copy_from_slice(&[0x7F, b'E', b'L', b'F', 1, 1, 1]);
    put16(&mut image, 16, 2); // ET_EXEC
    put16(&mut image, 18, 3); // EM_386
    put32(&mut image, 20, 1);
    put32(&mut image, 24, entry);
    put32(&mut image, 28, 52);
    put32(&mut image, 32, 0);
    put32(&mut image, 36, 0);
    put16(&mut image, 40, 52);
    put16(&mut image, 42, 32);
    put16(&mut image, 44, segments.len() as u16);
    put16(&mut image, 46, 40);
    put16(&mut image, 48, 0);
    put16(&mut image, 50, 0);

    for (i, seg) in segments.iter().enumerate() {
        let at = 52 + 32 * i;
        put32(&mut image, at, seg.p_type);
        put32(&mut image, at + 4, seg.offset);
        put32(&mut image, at + 8, seg.vaddr);
        put32(&mut image, at + 12, seg.vaddr);
        put32(&mut image, at + 16, seg.filesz);
        put32(&mut image, at + 20, seg.memsz);
        put32(&mut image, at + 24, seg.flags);
        put32(&mut image, at + 28, 0x1000);
    }
    image
}

/// Image with a text segment and a zero-filled data segment
pub fn standard_image(entry: u32) -> Vec<u8> {
    build_elf(entry, &[Segment::text(), Segment::data()])
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

pub type Program = Arc<dyn Fn(&mut User) -> i32 + Send + Sync>;
pub type ThreadBody = Arc<dyn Fn(&mut User, u32) + Send + Sync>;

pub struct Machine {
    pub threads: Arc<HostThreads>,
    pub mmu: Arc<HostMmu>,
    pub frames: Arc<Frames>,
    pub fs: Arc<MemFs>,
    pub console: Arc<HostConsole>,
    pub power: Arc<HostPower>,
    pub kernel: Arc<Kernel>,
    programs: Mutex<HashMap<u32, Program>>,
    bodies: Mutex<HashMap<u32, ThreadBody>>,
    next_entry: AtomicU32,
    next_func: AtomicU32,
}

impl Machine {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let frames = Arc::new(Frames::default());
            let threads = Arc::new(HostThreads {
                machine: weak.clone(),
                handles: Mutex::new(Vec::new()),
                failures: Arc::new(Mutex::new(Vec::new())),
                refuse_spawn: AtomicBool::new(false),
            });
            let mmu = Arc::new(HostMmu {
                frames: frames.clone(),
                directories: AtomicUsize::new(0),
            });
            let fs = Arc::new(MemFs::default());
            let console = Arc::new(HostConsole::default());
            let power = Arc::new(HostPower::default());
            let kernel = Kernel::new(Platform {
                threads: threads.clone(),
                mmu: mmu.clone(),
                frames: frames.clone(),
                fs: fs.clone(),
                console: console.clone(),
                power: power.clone(),
            });
            Machine {
                threads,
                mmu,
                frames,
                fs,
                console,
                power,
                kernel,
                programs: Mutex::new(HashMap::new()),
                bodies: Mutex::new(HashMap::new()),
                next_entry: AtomicU32::new(ENTRY_BASE),
                next_func: AtomicU32::new(FUNC_BASE),
            }
        })
    }

    /// Install an executable called `name` whose main is `program`
    pub fn install<F>(&self, name: &str, program: F)
    where
        F: Fn(&mut User) -> i32 + Send + Sync + 'static,
    {
        let entry = self.next_entry.fetch_add(16, Ordering::SeqCst);
        self.programs.lock().unwrap().insert(entry, Arc::new(program));
        self.fs.install(name, standard_image(entry));
    }

    /// Register a thread function and return its user "address"
    pub fn thread_fn<F>(&self, body: F) -> u32
    where
        F: Fn(&mut User, u32) + Send + Sync + 'static,
    {
        let func = self.next_func.fetch_add(16, Ordering::SeqCst);
        self.bodies.lock().unwrap().insert(func, Arc::new(body));
        func
    }

    pub fn spawn(&self, command_line: &str) -> ProcessResult<ThreadId> {
        self.kernel.create_process(command_line)
    }

    /// Start `command_line`, wait for it, let every thread finish and
    /// return the exit code (-1 if it never started)
    pub fn run(&self, command_line: &str) -> i32 {
        let code = match self.kernel.create_process(command_line) {
            Ok(pid) => self.kernel.wait(pid).expect("fresh child can be waited on"),
            Err(_) => -1,
        };
        self.settle();
        code
    }

    /// Join every kernel thread and fail on any unexpected panic
    pub fn settle(&self) {
        loop {
            let handles: Vec<_> = std::mem::take(&mut *self.threads.handles.lock().unwrap());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                handle.join().expect("kernel thread wrapper panicked");
            }
        }
        let failures = self.threads.failures.lock().unwrap();
        assert!(failures.is_empty(), "kernel thread failures: {:?}", *failures);
    }

    /// Everything written to the console
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.console.output.lock().unwrap()).into_owned()
    }

    /// Every resource handed to processes has come back
    pub fn assert_clean(&self) {
        assert_eq!(self.frames.live(), 0, "frames leaked");
        assert_eq!(self.fs.open_handles(), 0, "file handles leaked");
        // Only the boot thread's record is left
        assert!(self.kernel.thread_count() <= 1, "thread records leaked");
    }

    fn run_user(self: Arc<Self>, frame: &IntrFrame) -> ! {
        let mut user = User::new(self.kernel.clone(), frame.esp);
        if frame.eip == THREAD_STUB {
            let func = user.peek_u32(frame.esp + 4);
            let arg = user.peek_u32(frame.esp + 8);
            let body = self
                .bodies
                .lock()
                .unwrap()
                .get(&func)
                .cloned()
                .expect("no thread function at that address");
            drop(self);
            body(&mut user, arg);
            user.pt_exit()
        } else {
            let program = self
                .programs
                .lock()
                .unwrap()
                .get(&frame.eip)
                .cloned()
                .expect("no program at that entry point");
            drop(self);
            let code = program(&mut user);
            user.exit(code)
        }
    }
}

// ---------------------------------------------------------------------------
// User mode
// ---------------------------------------------------------------------------

/// The view a running user program has of the machine
pub struct User {
    kernel: Arc<Kernel>,
    /// Stack pointer at entry
    pub sp: u32,
    /// Syscall argument block
    frame_base: u32,
    /// Bump allocator for scratch data below the argument block
    brk: u32,
}

impl User {
    fn new(kernel: Arc<Kernel>, sp: u32) -> Self {
        let frame_base = (sp - 64) & !15;
        Self {
            kernel,
            sp,
            frame_base,
            brk: frame_base,
        }
    }

    fn with_memory<R>(&self, f: impl FnOnce(&UserMemory) -> R) -> Option<R> {
        let pd = self.kernel.current_process()?.page_directory()?;
        let mem = UserMemory::new(&*pd);
        Some(f(&mem))
    }

    pub fn peek_u32(&self, addr: u32) -> u32 {
        self.with_memory(|mem| mem.read_u32(addr))
            .flatten()
            .unwrap_or_else(|| panic!("user read fault at {:#x}", addr))
    }

    pub fn peek(&self, addr: u32, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        let ok = self.with_memory(|mem| mem.read_bytes(addr, &mut buf));
        assert_eq!(ok, Some(true), "user read fault at {:#x}", addr);
        buf
    }

    pub fn poke(&self, addr: u32, data: &[u8]) {
        let ok = self.with_memory(|mem| mem.write_bytes(addr, data));
        assert_eq!(ok, Some(true), "user write fault at {:#x}", addr);
    }

    pub fn poke_u32(&self, addr: u32, value: u32) {
        self.poke(addr, &value.to_le_bytes());
    }

    /// Reserve `len` bytes of scratch stack
    pub fn alloc(&mut self, len: usize) -> u32 {
        self.brk = (self.brk - len as u32) & !3;
        self.brk
    }

    /// Place a NUL-terminated copy of `s` on the stack
    pub fn cstr(&mut self, s: &str) -> u32 {
        let addr = self.alloc(s.len() + 1);
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.poke(addr, &bytes);
        addr
    }

    /// `argv` as found on the initial stack
    pub fn args(&self) -> Vec<String> {
        let argc = self.peek_u32(self.sp + 4);
        let argv = self.peek_u32(self.sp + 8);
        (0..argc)
            .map(|i| {
                let ptr = self.peek_u32(argv + 4 * i);
                let bytes = self
                    .with_memory(|mem| mem.read_cstr(ptr, PGSIZE))
                    .flatten()
                    .expect("argv string");
                String::from_utf8(bytes).expect("utf-8 argument")
            })
            .collect()
    }

    /// Trap with call `number` and `args` written at the argument block
    pub fn syscall(&mut self, number: u32, args: &[u32]) -> i32 {
        let mut bytes = number.to_le_bytes().to_vec();
        for arg in args {
            bytes.extend_from_slice(&arg.to_le_bytes());
        }
        let base = self.frame_base;
        // The process may already be gone; the kernel deals with that.
        let _ = self.with_memory(|mem| mem.write_bytes(base, &bytes));
        self.syscall_at(base)
    }

    /// Trap with an arbitrary stack pointer
    pub fn syscall_at(&mut self, esp: u32) -> i32 {
        let mut frame = IntrFrame::user(0, esp);
        self.kernel.syscall(&mut frame);
        frame.eax as i32
    }

    fn call(&mut self, sysno: Sysno, args: &[u32]) -> i32 {
        self.syscall(sysno as u32, args)
    }

    pub fn halt(&mut self) -> ! {
        self.call(Sysno::Halt, &[]);
        unreachable!("halt returned")
    }

    pub fn exit(&mut self, code: i32) -> ! {
        self.call(Sysno::Exit, &[code as u32]);
        unreachable!("exit returned")
    }

    pub fn exec(&mut self, command_line: &str) -> i32 {
        let cmd = self.cstr(command_line);
        self.call(Sysno::Exec, &[cmd])
    }

    pub fn wait(&mut self, pid: i32) -> i32 {
        self.call(Sysno::Wait, &[pid as u32])
    }

    pub fn create(&mut self, name: &str, size: u32) -> bool {
        let name = self.cstr(name);
        self.call(Sysno::Create, &[name, size]) == 1
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let name = self.cstr(name);
        self.call(Sysno::Remove, &[name]) == 1
    }

    pub fn open(&mut self, name: &str) -> i32 {
        let name = self.cstr(name);
        self.call(Sysno::Open, &[name])
    }

    pub fn filesize(&mut self, fd: i32) -> i32 {
        self.call(Sysno::Filesize, &[fd as u32])
    }

    pub fn read(&mut self, fd: i32, buf: u32, len: u32) -> i32 {
        self.call(Sysno::Read, &[fd as u32, buf, len])
    }

    pub fn write(&mut self, fd: i32, buf: u32, len: u32) -> i32 {
        self.call(Sysno::Write, &[fd as u32, buf, len])
    }

    /// Copy `data` onto the stack and write it to `fd`
    pub fn write_bytes(&mut self, fd: i32, data: &[u8]) -> i32 {
        let buf = self.alloc(data.len());
        self.poke(buf, data);
        self.write(fd, buf, data.len() as u32)
    }

    pub fn print(&mut self, s: &str) -> i32 {
        self.write_bytes(1, s.as_bytes())
    }

    pub fn seek(&mut self, fd: i32, pos: u32) -> i32 {
        self.call(Sysno::Seek, &[fd as u32, pos])
    }

    pub fn tell(&mut self, fd: i32) -> i32 {
        self.call(Sysno::Tell, &[fd as u32])
    }

    pub fn close(&mut self, fd: i32) -> i32 {
        self.call(Sysno::Close, &[fd as u32])
    }

    pub fn practice(&mut self, i: i32) -> i32 {
        self.call(Sysno::Practice, &[i as u32])
    }

    pub fn compute_e(&mut self, n: i32) -> i32 {
        self.call(Sysno::ComputeE, &[n as u32])
    }

    pub fn pt_create(&mut self, func: u32, arg: u32) -> i32 {
        self.call(Sysno::PtCreate, &[THREAD_STUB, func, arg])
    }

    pub fn pt_join(&mut self, tid: i32) -> i32 {
        self.call(Sysno::PtJoin, &[tid as u32])
    }

    pub fn pt_exit(&mut self) -> ! {
        self.call(Sysno::PtExit, &[]);
        unreachable!("pt_exit returned")
    }

    pub fn lock_init(&mut self, key: u32) -> i32 {
        self.call(Sysno::LockInit, &[key])
    }

    pub fn lock_acquire(&mut self, key: u32) -> i32 {
        self.call(Sysno::LockAcquire, &[key])
    }

    pub fn lock_release(&mut self, key: u32) -> i32 {
        self.call(Sysno::LockRelease, &[key])
    }

    pub fn sema_init(&mut self, key: u32, value: i32) -> i32 {
        self.call(Sysno::SemaInit, &[key, value as u32])
    }

    pub fn sema_down(&mut self, key: u32) -> i32 {
        self.call(Sysno::SemaDown, &[key])
    }

    pub fn sema_up(&mut self, key: u32) -> i32 {
        self.call(Sysno::SemaUp, &[key])
    }

    pub fn get_tid(&mut self) -> i32 {
        self.call(Sysno::GetTid, &[])
    }
}
