/// Configuration constants for the MelloOS user-program subsystem

use crate::log::LogLevel;

/// Size of a page and of a physical frame
pub const PGSIZE: usize = 4096;

/// Mask selecting the offset of an address within its page
pub const PGMASK: u32 = (PGSIZE as u32) - 1;

/// Base of kernel virtual memory; everything below is user space.
/// The initial user stack page sits directly beneath it.
pub const PHYS_BASE: u32 = 0xC000_0000;

/// Upper bound on ELF program headers, keeps load time bounded
pub const MAX_PROGRAM_HEADERS: u16 = 1024;

/// First descriptor handed out by `open`; 0 and 1 are the console
pub const FIRST_USER_FD: i32 = 2;

/// Process names are truncated to this many bytes (same as thread names)
pub const PROCESS_NAME_MAX: usize = 15;

/// Longest command line accepted by `create_process` (one page with terminator)
pub const COMMAND_LINE_MAX: usize = PGSIZE - 1;

/// Log level used until someone calls `log::set_log_level`
pub const DEFAULT_LOG_LEVEL: LogLevel = LogLevel::Info;
