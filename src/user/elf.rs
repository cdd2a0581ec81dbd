/// ELF32 Executable Loader
///
/// Loads a statically linked i386 executable into a fresh user address
/// space: validates the headers, maps each PT_LOAD segment page by page and
/// builds the initial user stack holding `argc`/`argv`.
///
/// The caller holds the filesystem lock for the whole load.
use crate::config::{MAX_PROGRAM_HEADERS, PGSIZE, PHYS_BASE};
use crate::fs::{File, FileSystem};
use crate::mm::paging::{install_page, PageDirectory};
use crate::mm::pmm::{AllocFlags, FrameAllocator, KernelPage};
use crate::mm::{is_user_vaddr, pg_ofs, pg_round_down, pg_round_up, UserAddr};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

/// e_ident prefix: magic, 32-bit class, little-endian, version 1
const ELF_IDENT: [u8; 7] = [0x7F, b'E', b'L', b'F', 1, 1, 1];

/// ELF file types
const ET_EXEC: u16 = 2; // Executable file

/// ELF machine types
const EM_386: u16 = 3; // Intel 80386

/// Object file version
const EV_CURRENT: u32 = 1;

/// On-disk sizes of the headers
const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;

/// Program header types
const PT_NULL: u32 = 0; // Ignore
const PT_LOAD: u32 = 1; // Loadable segment
const PT_DYNAMIC: u32 = 2; // Dynamic linking info
const PT_INTERP: u32 = 3; // Name of dynamic loader
const PT_NOTE: u32 = 4; // Auxiliary info
const PT_SHLIB: u32 = 5; // Reserved
const PT_PHDR: u32 = 6; // Program header table
const PT_STACK: u32 = 0x6474_e551; // Stack segment

bitflags::bitflags! {
    /// Program header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        const X = 1;
        const W = 2;
        const R = 4;
    }
}

/// ELF loader error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// Command line holds no program name
    EmptyCommandLine,
    /// Executable does not exist
    NotFound,
    /// Executable header failed validation
    BadHeader,
    /// Program header table points outside the file
    BadProgramHeader,
    /// Segment needs dynamic linking
    UnsupportedSegment(u32),
    /// PT_LOAD segment with impossible geometry
    InvalidSegment,
    /// File ended before the requested bytes
    ShortRead,
    /// Out of memory during loading
    OutOfMemory,
    /// Memory mapping failed
    MappingFailed,
    /// Arguments do not fit in the initial stack page
    ArgumentsTooLong,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoadError::EmptyCommandLine => write!(f, "empty command line"),
            LoadError::NotFound => write!(f, "open failed"),
            LoadError::BadHeader => write!(f, "error loading executable"),
            LoadError::BadProgramHeader => write!(f, "program header out of range"),
            LoadError::UnsupportedSegment(kind) => {
                write!(f, "unsupported segment type {:#x}", kind)
            }
            LoadError::InvalidSegment => write!(f, "invalid segment"),
            LoadError::ShortRead => write!(f, "short read"),
            LoadError::OutOfMemory => write!(f, "out of memory"),
            LoadError::MappingFailed => write!(f, "page mapping failed"),
            LoadError::ArgumentsTooLong => write!(f, "arguments too long"),
        }
    }
}

#[inline]
fn le16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

#[inline]
fn le32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// The fields of the ELF32 header the loader uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Elf32Header {
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u32,
    e_phoff: u32,
    e_phentsize: u16,
    e_phnum: u16,
}

impl Elf32Header {
    /// Parse and validate the header
    fn parse(bytes: &[u8; EHDR_SIZE]) -> Result<Self, LoadError> {
        if bytes[..ELF_IDENT.len()] != ELF_IDENT {
            return Err(LoadError::BadHeader);
        }

        let header = Self {
            e_type: le16(bytes, 16),
            e_machine: le16(bytes, 18),
            e_version: le32(bytes, 20),
            e_entry: le32(bytes, 24),
            e_phoff: le32(bytes, 28),
            e_phentsize: le16(bytes, 42),
            e_phnum: le16(bytes, 44),
        };

        if header.e_type != ET_EXEC
            || header.e_machine != EM_386
            || header.e_version != EV_CURRENT
            || header.e_phentsize as usize != PHDR_SIZE
            || header.e_phnum > MAX_PROGRAM_HEADERS
        {
            return Err(LoadError::BadHeader);
        }

        Ok(header)
    }
}

/// ELF32 Program Header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Elf32ProgramHeader {
    p_type: u32,
    p_offset: u32,
    p_vaddr: u32,
    p_filesz: u32,
    p_memsz: u32,
    p_flags: SegmentFlags,
}

impl Elf32ProgramHeader {
    fn parse(bytes: &[u8; PHDR_SIZE]) -> Self {
        Self {
            p_type: le32(bytes, 0),
            p_offset: le32(bytes, 4),
            p_vaddr: le32(bytes, 8),
            // p_paddr at 12 is unused
            p_filesz: le32(bytes, 16),
            p_memsz: le32(bytes, 20),
            p_flags: SegmentFlags::from_bits_truncate(le32(bytes, 24)),
        }
    }

    /// Check that this PT_LOAD segment can be mapped from a file of
    /// `file_len` bytes
    fn validate(&self, file_len: u32) -> Result<(), LoadError> {
        // p_offset and p_vaddr must have the same page offset
        if pg_ofs(self.p_offset) != pg_ofs(self.p_vaddr) {
            return Err(LoadError::InvalidSegment);
        }
        if self.p_offset > file_len {
            return Err(LoadError::InvalidSegment);
        }
        if self.p_memsz < self.p_filesz || self.p_memsz == 0 {
            return Err(LoadError::InvalidSegment);
        }

        // Region must start and end in user space without wrapping
        let end = self
            .p_vaddr
            .checked_add(self.p_memsz)
            .ok_or(LoadError::InvalidSegment)?;
        if !is_user_vaddr(self.p_vaddr) || !is_user_vaddr(end) {
            return Err(LoadError::InvalidSegment);
        }

        // Page 0 stays unmapped so null dereferences fault
        if (self.p_vaddr as usize) < PGSIZE {
            return Err(LoadError::InvalidSegment);
        }

        Ok(())
    }
}

/// A tokenized command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine<'a> {
    args: Vec<&'a str>,
}

impl<'a> CommandLine<'a> {
    /// Split on spaces; runs of spaces never produce empty arguments
    pub fn parse(line: &'a str) -> Result<Self, LoadError> {
        let args: Vec<&str> = line.split(' ').filter(|arg| !arg.is_empty()).collect();
        if args.is_empty() {
            return Err(LoadError::EmptyCommandLine);
        }
        Ok(Self { args })
    }

    /// Executable path (argv[0])
    pub fn program(&self) -> &'a str {
        self.args[0]
    }

    pub fn args(&self) -> &[&'a str] {
        &self.args
    }

    pub fn argc(&self) -> usize {
        self.args.len()
    }

    /// Bytes taken by the argument strings including terminators
    pub fn total_bytes(&self) -> usize {
        self.args.iter().map(|arg| arg.len() + 1).sum()
    }
}

/// First token of a command line, used to name the new thread
pub fn program_name(line: &str) -> Option<&str> {
    line.split(' ').find(|arg| !arg.is_empty())
}

/// Result of a successful load
pub struct LoadedImage {
    /// Entry point from the ELF header
    pub entry: UserAddr,
    /// Initial stack pointer, pointing at the fake return address
    pub esp: UserAddr,
    /// The executable, kept open and write-protected while the process lives
    pub executable: Arc<dyn File>,
}

/// ELF32 Binary Loader
pub struct ElfLoader<'a> {
    frames: &'a dyn FrameAllocator,
    pd: &'a dyn PageDirectory,
}

impl<'a> ElfLoader<'a> {
    /// Create a loader that maps into `pd`
    pub fn new(frames: &'a dyn FrameAllocator, pd: &'a dyn PageDirectory) -> Self {
        Self { frames, pd }
    }

    /// Load the program named by `command_line` and build its stack
    ///
    /// # Arguments
    /// * `fs` - Filesystem the executable is opened from
    /// * `command_line` - Program path followed by its arguments
    ///
    /// # Returns
    /// Entry point, initial stack pointer and the open executable, or the
    /// first error hit. Pages mapped before a failure stay in the page
    /// directory and are released when it is destroyed.
    pub fn load(&self, fs: &dyn FileSystem, command_line: &str) -> Result<LoadedImage, LoadError> {
        let args = CommandLine::parse(command_line)?;

        let file = match fs.open(args.program()) {
            Some(file) => file,
            None => {
                log_warn!("elf", "load: {}: open failed", args.program());
                return Err(LoadError::NotFound);
            }
        };
        file.deny_write();

        match self.load_image(&*file, &args) {
            Ok((entry, esp)) => {
                log_info!(
                    "elf",
                    "loaded {} entry={:#x} esp={:#x} argc={}",
                    args.program(),
                    entry,
                    esp,
                    args.argc()
                );
                Ok(LoadedImage {
                    entry,
                    esp,
                    executable: file,
                })
            }
            Err(err) => {
                log_warn!("elf", "load: {}: {}", args.program(), err);
                file.allow_write();
                Err(err)
            }
        }
    }

    fn load_image(&self, file: &dyn File, args: &CommandLine) -> Result<(UserAddr, UserAddr), LoadError> {
        let mut raw = [0u8; EHDR_SIZE];
        if file.read(&mut raw) != EHDR_SIZE {
            return Err(LoadError::BadHeader);
        }
        let header = Elf32Header::parse(&raw)?;
        log_debug!(
            "elf",
            "entry={:#x} phnum={}",
            header.e_entry,
            header.e_phnum
        );

        let mut file_ofs = header.e_phoff;
        for _ in 0..header.e_phnum {
            if file_ofs > file.length() {
                return Err(LoadError::BadProgramHeader);
            }
            file.seek(file_ofs);

            let mut raw = [0u8; PHDR_SIZE];
            if file.read(&mut raw) != PHDR_SIZE {
                return Err(LoadError::ShortRead);
            }
            file_ofs = file_ofs
                .checked_add(PHDR_SIZE as u32)
                .ok_or(LoadError::BadProgramHeader)?;

            let phdr = Elf32ProgramHeader::parse(&raw);
            match phdr.p_type {
                PT_LOAD => {
                    phdr.validate(file.length())?;
                    self.load_segment(file, &phdr)?;
                }
                PT_DYNAMIC | PT_INTERP | PT_SHLIB => {
                    return Err(LoadError::UnsupportedSegment(phdr.p_type));
                }
                PT_NULL | PT_NOTE | PT_PHDR | PT_STACK => {}
                _ => {}
            }
        }

        let esp = self.setup_stack(args)?;
        Ok((header.e_entry, esp))
    }

    /// Map one validated PT_LOAD segment.
    ///
    /// Bytes from the start of the first page through the end of the file
    /// image are read from the file; the rest, up to the page-rounded end of
    /// the memory image, is zero-filled.
    fn load_segment(&self, file: &dyn File, phdr: &Elf32ProgramHeader) -> Result<(), LoadError> {
        let writable = phdr.p_flags.contains(SegmentFlags::W);
        let file_page = pg_round_down(phdr.p_offset);
        let mut upage = pg_round_down(phdr.p_vaddr);
        let page_offset = pg_ofs(phdr.p_vaddr);

        let span = pg_round_up(page_offset + phdr.p_memsz).ok_or(LoadError::InvalidSegment)?;
        // An all-zero segment reads nothing from the file
        let mut read_bytes = if phdr.p_filesz > 0 {
            (page_offset + phdr.p_filesz) as usize
        } else {
            0
        };
        let mut zero_bytes = span as usize - read_bytes;

        log_debug!(
            "elf",
            "segment {:#x}-{:#x} {:?}",
            upage,
            upage + span,
            phdr.p_flags
        );

        file.seek(file_page);
        while read_bytes > 0 || zero_bytes > 0 {
            let page_read_bytes = core::cmp::min(read_bytes, PGSIZE);
            let page_zero_bytes = PGSIZE - page_read_bytes;

            let kpage = self
                .frames
                .alloc_page(AllocFlags::USER)
                .ok_or(LoadError::OutOfMemory)?;

            // Safety: the page is not mapped anywhere yet.
            let got = unsafe { kpage.with_bytes_mut(|bytes| file.read(&mut bytes[..page_read_bytes])) };
            if got != page_read_bytes {
                self.frames.free_page(kpage);
                return Err(LoadError::ShortRead);
            }
            kpage.zero(page_read_bytes, page_zero_bytes);

            if !install_page(self.pd, upage, kpage, writable) {
                self.frames.free_page(kpage);
                return Err(LoadError::MappingFailed);
            }

            read_bytes -= page_read_bytes;
            zero_bytes -= page_zero_bytes;
            upage = upage.wrapping_add(PGSIZE as u32);
        }

        Ok(())
    }

    /// Map a zeroed page just below `PHYS_BASE` and lay the arguments out
    /// in it
    fn setup_stack(&self, args: &CommandLine) -> Result<UserAddr, LoadError> {
        let upage = PHYS_BASE - PGSIZE as u32;
        let kpage = self
            .frames
            .alloc_page(AllocFlags::USER | AllocFlags::ZERO)
            .ok_or(LoadError::OutOfMemory)?;

        if !install_page(self.pd, upage, kpage, true) {
            self.frames.free_page(kpage);
            return Err(LoadError::MappingFailed);
        }

        push_arguments(kpage, args)
    }
}

/// Write the initial stack image into `page`, the page mapped just below
/// `PHYS_BASE`, and return the initial stack pointer.
///
/// From `PHYS_BASE` down: the argument strings (argv[0] lowest), padding,
/// `argv[argc] = NULL`, `argv[argc-1]` .. `argv[0]`, `argv`, `argc` on a
/// 16-byte boundary, and a null fake return address where `esp` points.
pub fn push_arguments(page: KernelPage, args: &CommandLine) -> Result<UserAddr, LoadError> {
    const WORD: usize = 4;

    let argc = args.argc();
    let total_bytes = args.total_bytes();
    let block = total_bytes + (argc + 1) * WORD + 2 * WORD;
    // Worst case alignment padding plus the fake return address
    if block + 15 + WORD > PGSIZE {
        return Err(LoadError::ArgumentsTooLong);
    }

    let page_base = PHYS_BASE - PGSIZE as u32;
    let offset_of = |addr: UserAddr| (addr - page_base) as usize;

    let argc_slot = (PHYS_BASE - block as u32) & !0xF;
    let argv_base = argc_slot + 2 * WORD as u32;
    let esp = argc_slot - WORD as u32;

    page.write_u32(offset_of(argc_slot), argc as u32);
    page.write_u32(offset_of(argc_slot + WORD as u32), argv_base);

    let mut string_addr = PHYS_BASE - total_bytes as u32;
    for (i, arg) in args.args().iter().enumerate() {
        page.write(offset_of(string_addr), arg.as_bytes());
        page.write(offset_of(string_addr) + arg.len(), &[0]);
        page.write_u32(offset_of(argv_base + (i * WORD) as u32), string_addr);
        string_addr += arg.len() as u32 + 1;
    }
    page.write_u32(offset_of(argv_base + (argc * WORD) as u32), 0);
    page.write_u32(offset_of(esp), 0);

    Ok(esp)
}
