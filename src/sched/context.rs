//! Trap Frame
//!
//! Register state pushed by the interrupt entry stubs and restored by the
//! interrupt exit path. Handing a freshly built frame to
//! `Scheduler::enter_user_mode` is the only way kernel code starts user
//! code, for new processes and new threads alike.

use x86_64::registers::rflags::RFlags;
use x86_64::structures::gdt::SegmentSelector;
use x86_64::PrivilegeLevel;

/// GDT index of the user code segment
const USER_CODE_INDEX: u16 = 3;
/// GDT index of the user data segment
const USER_DATA_INDEX: u16 = 4;

/// User code selector (RPL 3)
pub const USER_CS: u16 = SegmentSelector::new(USER_CODE_INDEX, PrivilegeLevel::Ring3).0;
/// User data and stack selector (RPL 3)
pub const USER_DS: u16 = SegmentSelector::new(USER_DATA_INDEX, PrivilegeLevel::Ring3).0;

/// Bit 1 of EFLAGS is reserved and always reads as one
const FLAG_MBS: u32 = 1 << 1;

/// x87 control word after FNINIT
pub const FPU_DEFAULT_FCW: u16 = 0x037F;

/// Size of the FSAVE area
pub const FPU_STATE_SIZE: usize = 108;

/// Interrupt stack frame
///
/// The layout must match the order in which the entry stubs push registers.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct IntrFrame {
    /// General registers, in PUSHAD order
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    /// Syscall return value
    pub eax: u32,

    pub gs: u16,
    pub fs: u16,
    pub es: u16,
    pub ds: u16,

    pub vec_no: u32,
    pub error_code: u32,
    pub frame_pointer: u32,

    /// Pushed by the CPU on a privilege change
    pub eip: u32,
    pub cs: u16,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u16,

    /// Saved FPU state
    pub fpu: [u8; FPU_STATE_SIZE],
}

impl IntrFrame {
    /// All-zero frame
    pub const fn zeroed() -> Self {
        Self {
            edi: 0,
            esi: 0,
            ebp: 0,
            esp_dummy: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            gs: 0,
            fs: 0,
            es: 0,
            ds: 0,
            vec_no: 0,
            error_code: 0,
            frame_pointer: 0,
            eip: 0,
            cs: 0,
            eflags: 0,
            esp: 0,
            ss: 0,
            fpu: [0; FPU_STATE_SIZE],
        }
    }

    /// Frame for entering user mode at `eip` with stack `esp`: user
    /// selectors, interrupts enabled, FPU in its reset state.
    pub fn user(eip: u32, esp: u32) -> Self {
        let mut frame = Self::zeroed();
        frame.gs = USER_DS;
        frame.fs = USER_DS;
        frame.es = USER_DS;
        frame.ds = USER_DS;
        frame.ss = USER_DS;
        frame.cs = USER_CS;
        frame.eflags = RFlags::INTERRUPT_FLAG.bits() as u32 | FLAG_MBS;
        frame.eip = eip;
        frame.esp = esp;
        frame.fpu[0..2].copy_from_slice(&FPU_DEFAULT_FCW.to_le_bytes());
        // Empty tag word: all registers free
        frame.fpu[8..10].copy_from_slice(&0xFFFFu16.to_le_bytes());
        frame
    }
}
