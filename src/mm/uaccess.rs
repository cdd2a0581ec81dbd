// User memory access
// Every pointer handed in by a user program is distrusted: it must be
// non-null, below PHYS_BASE and mapped in the caller's page directory. All
// copies go through `translate`, never through the raw user address.

use super::paging::{translate, PageDirectory};
use super::{bytes_left_in_page, is_user_vaddr, pg_round_down, UserAddr};
use crate::config::PGSIZE;
use alloc::vec::Vec;

/// A view of one process's user address space
#[derive(Clone, Copy)]
pub struct UserMemory<'a> {
    pd: &'a dyn PageDirectory,
}

impl<'a> UserMemory<'a> {
    pub fn new(pd: &'a dyn PageDirectory) -> Self {
        Self { pd }
    }

    /// True if `addr` is a non-null user address backed by a mapped page
    pub fn is_valid(&self, addr: UserAddr) -> bool {
        addr != 0 && is_user_vaddr(addr) && self.pd.get_page(addr).is_some()
    }

    /// Validate every page touched by `[addr, addr + len)`.
    ///
    /// A zero-length range still requires `addr` itself to be valid. A range
    /// that wraps past the top of the address space is rejected.
    pub fn check_range(&self, addr: UserAddr, len: usize) -> bool {
        let last = match u32::try_from(len.saturating_sub(1))
            .ok()
            .and_then(|extra| addr.checked_add(extra))
        {
            Some(last) => last,
            None => return false,
        };
        if !self.is_valid(addr) || !self.is_valid(last) {
            return false;
        }
        let mut page = pg_round_down(addr);
        while page < pg_round_down(last) {
            page += PGSIZE as u32;
            if !self.is_valid(page) {
                return false;
            }
        }
        true
    }

    /// Copy `buf.len()` bytes out of user memory
    pub fn read_bytes(&self, addr: UserAddr, buf: &mut [u8]) -> bool {
        if !self.check_range(addr, buf.len()) {
            return false;
        }
        let mut done = 0;
        while done < buf.len() {
            let cur = addr + done as u32;
            let Some((page, offset)) = translate(self.pd, cur) else {
                return false;
            };
            let chunk = core::cmp::min(buf.len() - done, bytes_left_in_page(cur));
            page.read(offset, &mut buf[done..done + chunk]);
            done += chunk;
        }
        true
    }

    /// Copy `data` into user memory
    pub fn write_bytes(&self, addr: UserAddr, data: &[u8]) -> bool {
        if !self.check_range(addr, data.len()) {
            return false;
        }
        let mut done = 0;
        while done < data.len() {
            let cur = addr + done as u32;
            let Some((page, offset)) = translate(self.pd, cur) else {
                return false;
            };
            let chunk = core::cmp::min(data.len() - done, bytes_left_in_page(cur));
            page.write(offset, &data[done..done + chunk]);
            done += chunk;
        }
        true
    }

    /// Read one little-endian machine word, checking its first and last byte
    pub fn read_u32(&self, addr: UserAddr) -> Option<u32> {
        let mut word = [0u8; 4];
        self.read_bytes(addr, &mut word).then(|| u32::from_le_bytes(word))
    }

    pub fn write_u32(&self, addr: UserAddr, value: u32) -> bool {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    /// Copy a NUL-terminated string of at most `max` bytes (terminator
    /// excluded) out of user memory.
    ///
    /// Returns `None` if the string runs into an invalid page or no
    /// terminator appears within `max + 1` bytes.
    pub fn read_cstr(&self, addr: UserAddr, max: usize) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        let mut cur = addr;
        loop {
            if !self.is_valid(cur) {
                return None;
            }
            let (page, offset) = translate(self.pd, cur)?;
            let mut chunk = [0u8; 256];
            let avail = core::cmp::min(bytes_left_in_page(cur), chunk.len());
            page.read(offset, &mut chunk[..avail]);
            if let Some(nul) = chunk[..avail].iter().position(|&b| b == 0) {
                out.extend_from_slice(&chunk[..nul]);
                return (out.len() <= max).then_some(out);
            }
            out.extend_from_slice(&chunk[..avail]);
            if out.len() > max {
                return None;
            }
            cur = cur.checked_add(avail as u32)?;
        }
    }
}
