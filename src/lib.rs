//! MelloOS user-program subsystem
//!
//! Loads ELF executables into fresh address spaces, runs them as processes
//! with optional secondary threads, and serves their system calls. The
//! scheduler, MMU, frame allocator, filesystem and devices are supplied by
//! the host kernel through the capability traits in `mm`, `sched`, `sync`,
//! `fs` and `dev`, bundled in a `Platform`.
//!
//! # Boot
//!
//! ```rust,ignore
//! let kernel = Kernel::new(platform);
//! let pid = kernel.create_process("shell -v")?;
//! let status = kernel.wait(pid)?;
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

// Macros must be defined before the modules that use them.
#[macro_use]
pub mod log;

pub mod config;
pub mod dev;
pub mod fs;
pub mod metrics;
pub mod mm;
pub mod sched;
pub mod sync;
pub mod sys;
pub mod user;

pub use user::{Kernel, Platform};
