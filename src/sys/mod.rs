//! System Call Interface
//!
//! User programs enter the kernel with the call number and its arguments in
//! consecutive 32-bit words at the trapped stack pointer. The result goes
//! back in `eax`.
//!
//! # System Calls
//!
//! | No. | Name | Args | Returns |
//! |-----|------|------|---------|
//! | 0 | halt | 0 | never |
//! | 1 | exit | 1 | never |
//! | 2 | exec | 1 | pid, or -1 |
//! | 3 | wait | 1 | exit code, or -1 |
//! | 4 | create | 2 | 1 or 0 |
//! | 5 | remove | 1 | 1 or 0 |
//! | 6 | open | 1 | fd, or -1 |
//! | 7 | filesize | 1 | length, or -1 |
//! | 8 | read | 3 | bytes read, or -1 |
//! | 9 | write | 3 | bytes written, or -1 |
//! | 10 | seek | 2 | 0, or -1 |
//! | 11 | tell | 1 | position, or -1 |
//! | 12 | close | 1 | 0, or -1 |
//! | 13 | practice | 1 | argument + 1 |
//! | 14 | compute_e | 1 | e partial sum × 10^6 |
//! | 15 | pt_create | 3 | tid, or -1 |
//! | 16 | pt_exit | 0 | never |
//! | 17 | pt_join | 1 | tid, or -1 |
//! | 18 | lock_init | 1 | 1 or 0 |
//! | 19 | lock_acquire | 1 | 1 or 0 |
//! | 20 | lock_release | 1 | 1 or 0 |
//! | 21 | sema_init | 2 | 1 or 0 |
//! | 22 | sema_down | 1 | 1 or 0 |
//! | 23 | sema_up | 1 | 1 or 0 |
//! | 24 | get_tid | 0 | caller's tid |
//!
//! A bad pointer anywhere in a call kills the calling process with status
//! -1. An unknown call number does the same.

pub mod syscall;

pub use syscall::compute_e;

/// System call numbers
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sysno {
    Halt = 0,
    Exit = 1,
    Exec = 2,
    Wait = 3,
    Create = 4,
    Remove = 5,
    Open = 6,
    Filesize = 7,
    Read = 8,
    Write = 9,
    Seek = 10,
    Tell = 11,
    Close = 12,
    Practice = 13,
    ComputeE = 14,
    PtCreate = 15,
    PtExit = 16,
    PtJoin = 17,
    LockInit = 18,
    LockAcquire = 19,
    LockRelease = 20,
    SemaInit = 21,
    SemaDown = 22,
    SemaUp = 23,
    GetTid = 24,
}

impl TryFrom<u32> for Sysno {
    type Error = u32;

    fn try_from(number: u32) -> Result<Self, Self::Error> {
        let sysno = match number {
            0 => Sysno::Halt,
            1 => Sysno::Exit,
            2 => Sysno::Exec,
            3 => Sysno::Wait,
            4 => Sysno::Create,
            5 => Sysno::Remove,
            6 => Sysno::Open,
            7 => Sysno::Filesize,
            8 => Sysno::Read,
            9 => Sysno::Write,
            10 => Sysno::Seek,
            11 => Sysno::Tell,
            12 => Sysno::Close,
            13 => Sysno::Practice,
            14 => Sysno::ComputeE,
            15 => Sysno::PtCreate,
            16 => Sysno::PtExit,
            17 => Sysno::PtJoin,
            18 => Sysno::LockInit,
            19 => Sysno::LockAcquire,
            20 => Sysno::LockRelease,
            21 => Sysno::SemaInit,
            22 => Sysno::SemaDown,
            23 => Sysno::SemaUp,
            24 => Sysno::GetTid,
            other => return Err(other),
        };
        Ok(sysno)
    }
}

impl Sysno {
    /// Number of argument words following the call number
    pub const fn arg_count(self) -> usize {
        match self {
            Sysno::Halt | Sysno::PtExit | Sysno::GetTid => 0,
            Sysno::Create | Sysno::Seek | Sysno::SemaInit => 2,
            Sysno::Read | Sysno::Write | Sysno::PtCreate => 3,
            _ => 1,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Sysno::Halt => "halt",
            Sysno::Exit => "exit",
            Sysno::Exec => "exec",
            Sysno::Wait => "wait",
            Sysno::Create => "create",
            Sysno::Remove => "remove",
            Sysno::Open => "open",
            Sysno::Filesize => "filesize",
            Sysno::Read => "read",
            Sysno::Write => "write",
            Sysno::Seek => "seek",
            Sysno::Tell => "tell",
            Sysno::Close => "close",
            Sysno::Practice => "practice",
            Sysno::ComputeE => "compute_e",
            Sysno::PtCreate => "pt_create",
            Sysno::PtExit => "pt_exit",
            Sysno::PtJoin => "pt_join",
            Sysno::LockInit => "lock_init",
            Sysno::LockAcquire => "lock_acquire",
            Sysno::LockRelease => "lock_release",
            Sysno::SemaInit => "sema_init",
            Sysno::SemaDown => "sema_down",
            Sysno::SemaUp => "sema_up",
            Sysno::GetTid => "get_tid",
        }
    }
}
