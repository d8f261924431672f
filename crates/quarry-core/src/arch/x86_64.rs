//! # x86-64 Adapter
//!
//! Register layout and debugging mechanics for x86-64 hosts.
//!
//! ## Registers
//!
//! The general purpose mirror matches the kernel's `user_regs_struct` and is
//! transported with GETREGS/SETREGS. Floating point state depends on the
//! build flavor:
//!
//! - no `xsave` feature: the legacy 512-byte FP area via GETFPREGS/SETFPREGS
//! - `xsave`: the XSTATE regset; the payload grows with the `avx` (YMM) and
//!   `avx512` (opmask + ZMM) features. The mirror struct is static-asserted
//!   against the expected size for the chosen flavor (520 / 904 / 2704
//!   bytes including the leading flavor word).
//!
//! ## Debug registers
//!
//! Four address slots (DR0–DR3) plus the control register DR7 live in the
//! thread's user area at offset 0x350. Per slot, DR7 holds a local-enable
//! bit, a condition field (00 execute, 01 write, 11 read/write) and a
//! length field (00=1, 01=2, 10=8, 11=4). Hit detection reads DR6, whose
//! low four bits name the slot that fired.

use std::ffi::c_void;
use std::mem;

use crate::breakpoints::{HardwareBreakpoint, WatchKind};
use crate::error::{QuarryError, Result};
use crate::ptrace;
use crate::types::Tid;

/// Byte offset of the debug registers within the user area.
const DR_BASE: u64 = 0x350;
/// Stride between debug registers in the user area.
const DR_SIZE: u64 = 0x8;
/// Number of address slots (DR0–DR3).
const DR_SLOTS: u64 = 4;

/// XSTATE flavor selected at build time: 0 legacy, 1 AVX, 2 AVX-512.
#[cfg(not(feature = "avx"))]
pub const XSAVE_FLAVOR: u64 = 0;
#[cfg(all(feature = "avx", not(feature = "avx512")))]
pub const XSAVE_FLAVOR: u64 = 1;
#[cfg(feature = "avx512")]
pub const XSAVE_FLAVOR: u64 = 2;

/// General purpose register mirror, laid out like the kernel's
/// `user_regs_struct`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)] // the field names are the register names
pub struct GpRegisters
{
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub orig_rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub eflags: u64,
    pub rsp: u64,
    pub ss: u64,
    pub fs_base: u64,
    pub gs_base: u64,
    pub ds: u64,
    pub es: u64,
    pub fs: u64,
    pub gs: u64,
}

const _: () = assert!(mem::size_of::<GpRegisters>() == 216);

impl GpRegisters
{
    /// The instruction pointer.
    pub fn instruction_pointer(&self) -> u64
    {
        self.rip
    }

    /// Redirect execution to `value` on the next resume.
    pub fn set_instruction_pointer(&mut self, value: u64)
    {
        self.rip = value;
    }

    /// The stack pointer.
    pub fn stack_pointer(&self) -> u64
    {
        self.rsp
    }
}

/// Floating point / extended state mirror
///
/// The first word records the XSTATE flavor the struct was compiled for;
/// the payload that follows matches the kernel's XSAVE layout (the legacy
/// FXSAVE region, then, depending on the build flavor, the XSAVE header,
/// the YMM high halves, and the AVX-512 banks).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FpRegisters
{
    /// XSTATE flavor this mirror was built for (see [`XSAVE_FLAVOR`]).
    pub flavor: u64,
    /// FPU control word.
    pub cwd: u16,
    /// FPU status word.
    pub swd: u16,
    /// FPU tag word.
    pub ftw: u16,
    /// Last FPU opcode.
    pub fop: u16,
    /// Last FPU instruction pointer.
    pub fip: u64,
    /// Last FPU data pointer.
    pub fdp: u64,
    /// SSE control and status.
    pub mxcsr: u32,
    /// Valid bits in `mxcsr`.
    pub mxcr_mask: u32,
    /// x87 stack registers ST0–ST7, 16 bytes apart.
    pub st_space: [u32; 32],
    /// XMM registers 0–15.
    pub xmm_space: [u32; 64],
    reserved: [u32; 24],
    /// XSAVE header (XSTATE_BV and friends).
    #[cfg(feature = "avx")]
    pub xsave_header: [u64; 8],
    /// High 128 bits of YMM0–YMM15.
    #[cfg(feature = "avx")]
    pub ymm_high: [[u8; 16]; 16],
    #[cfg(all(feature = "avx", not(feature = "avx512")))]
    padding_avx: [u8; 64],
    #[cfg(feature = "avx512")]
    padding_avx512: [u8; 256],
    /// Opmask registers K0–K7.
    #[cfg(feature = "avx512")]
    pub k_regs: [u64; 8],
    /// High 256 bits of ZMM0–ZMM15.
    #[cfg(feature = "avx512")]
    pub zmm_high: [[u8; 32]; 16],
    /// ZMM16–ZMM31 in full.
    #[cfg(feature = "avx512")]
    pub zmm_full: [[u8; 64]; 16],
    #[cfg(feature = "avx512")]
    padding_tail: [u8; 8],
}

// The kernel fills this area byte for byte; the sizes must match the XSAVE
// layout for the selected flavor or every field after the mismatch is junk.
#[cfg(not(feature = "avx"))]
const _: () = assert!(mem::size_of::<FpRegisters>() == 520);
#[cfg(all(feature = "avx", not(feature = "avx512")))]
const _: () = assert!(mem::size_of::<FpRegisters>() == 904);
#[cfg(feature = "avx512")]
const _: () = assert!(mem::size_of::<FpRegisters>() == 2704);

impl Default for FpRegisters
{
    fn default() -> Self
    {
        let mut fp: FpRegisters = unsafe { mem::zeroed() };
        fp.flavor = XSAVE_FLAVOR;
        fp
    }
}

/// Offset of the kernel-visible payload: everything after the flavor word.
const FP_PAYLOAD_OFFSET: usize = mem::size_of::<u64>();

/// The x86-64 adapter
#[derive(Debug)]
pub enum X86_64 {}

impl super::Sealed for X86_64 {}

fn condition_bits(kind: WatchKind) -> u64
{
    match kind {
        WatchKind::Execute => 0b00,
        WatchKind::Write => 0b01,
        WatchKind::ReadWrite => 0b11,
    }
}

fn length_bits(length: u8) -> u64
{
    match length {
        1 => 0b00,
        2 => 0b01,
        8 => 0b10,
        _ => 0b11, // 4 bytes
    }
}

fn local_enable(slot: u64) -> u64
{
    1 << (2 * slot)
}

fn condition_shift(slot: u64) -> u64
{
    16 + 4 * slot
}

fn length_shift(slot: u64) -> u64
{
    18 + 4 * slot
}

fn slot_offset(slot: u64) -> u64
{
    DR_BASE + slot * DR_SIZE
}

impl super::DebugArch for X86_64
{
    const STEP_OVER_HIT_HW_ON_RESUME: bool = false;

    fn get_regs(tid: Tid, regs: &mut GpRegisters) -> Result<()>
    {
        ptrace::get_regs_area(tid, regs)
    }

    fn set_regs(tid: Tid, regs: &mut GpRegisters) -> Result<()>
    {
        ptrace::set_regs_area(tid, regs)
    }

    #[cfg(feature = "xsave")]
    fn get_fp_regs(tid: Tid, fp: &mut FpRegisters) -> Result<()>
    {
        let base = fp as *mut FpRegisters as *mut u8;
        unsafe {
            ptrace::get_regset(
                tid,
                ptrace::NT_X86_XSTATE,
                base.add(FP_PAYLOAD_OFFSET) as *mut c_void,
                mem::size_of::<FpRegisters>() - FP_PAYLOAD_OFFSET,
            )
        }
    }

    #[cfg(not(feature = "xsave"))]
    fn get_fp_regs(tid: Tid, fp: &mut FpRegisters) -> Result<()>
    {
        let base = fp as *mut FpRegisters as *mut u8;
        let ret = unsafe {
            libc::ptrace(
                libc::PTRACE_GETFPREGS,
                tid.raw(),
                std::ptr::null_mut::<c_void>(),
                base.add(FP_PAYLOAD_OFFSET) as *mut c_void,
            )
        };
        if ret == -1 {
            return Err(QuarryError::Ptrace {
                request: "GETFPREGS",
                tid: tid.raw(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    #[cfg(feature = "xsave")]
    fn set_fp_regs(tid: Tid, fp: &mut FpRegisters) -> Result<()>
    {
        let base = fp as *mut FpRegisters as *mut u8;
        unsafe {
            ptrace::set_regset(
                tid,
                ptrace::NT_X86_XSTATE,
                base.add(FP_PAYLOAD_OFFSET) as *const c_void,
                mem::size_of::<FpRegisters>() - FP_PAYLOAD_OFFSET,
            )
        }
    }

    #[cfg(not(feature = "xsave"))]
    fn set_fp_regs(tid: Tid, fp: &mut FpRegisters) -> Result<()>
    {
        let base = fp as *mut FpRegisters as *mut u8;
        let ret = unsafe {
            libc::ptrace(
                libc::PTRACE_SETFPREGS,
                tid.raw(),
                std::ptr::null_mut::<c_void>(),
                base.add(FP_PAYLOAD_OFFSET) as *mut c_void,
            )
        };
        if ret == -1 {
            return Err(QuarryError::Ptrace {
                request: "SETFPREGS",
                tid: tid.raw(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn install_hw_breakpoint(breakpoint: &mut HardwareBreakpoint) -> Result<()>
    {
        // find a free debug register
        let mut free = None;
        for slot in 0..DR_SLOTS {
            let address = ptrace::peek_user(breakpoint.tid, slot_offset(slot))?;
            if address == 0 {
                free = Some(slot);
                break;
            }
        }
        let slot = free.ok_or_else(|| {
            QuarryError::ResourceExhausted(format!(
                "no free debug register for thread {} (4 slots on x86-64)",
                breakpoint.tid
            ))
        })?;

        let control =
            local_enable(slot) | condition_bits(breakpoint.kind) << condition_shift(slot) | length_bits(breakpoint.length) << length_shift(slot);

        let mut state = ptrace::peek_user(breakpoint.tid, slot_offset(7))?;

        // reset the slot's fields before merging the new control value
        state &= !(0b11 << condition_shift(slot));
        state &= !(0b11 << length_shift(slot));
        state |= control;

        ptrace::poke_user(breakpoint.tid, slot_offset(slot), breakpoint.address.value())?;
        ptrace::poke_user(breakpoint.tid, slot_offset(7), state)?;
        Ok(())
    }

    fn remove_hw_breakpoint(breakpoint: &HardwareBreakpoint) -> Result<()>
    {
        // find the slot holding this address
        let mut occupied = None;
        for slot in 0..DR_SLOTS {
            let address = ptrace::peek_user(breakpoint.tid, slot_offset(slot))?;
            if address == breakpoint.address.value() {
                occupied = Some(slot);
                break;
            }
        }
        let slot = occupied.ok_or(QuarryError::NoBreakpoint(breakpoint.address))?;

        let mut state = ptrace::peek_user(breakpoint.tid, slot_offset(7))?;
        state &= !local_enable(slot);
        state &= !(0b11 << condition_shift(slot));
        state &= !(0b11 << length_shift(slot));

        ptrace::poke_user(breakpoint.tid, slot_offset(7), state)?;
        ptrace::poke_user(breakpoint.tid, slot_offset(slot), 0)?;
        Ok(())
    }

    fn hw_breakpoint_hit(breakpoint: &HardwareBreakpoint) -> bool
    {
        let status = match ptrace::peek_user(breakpoint.tid, slot_offset(6)) {
            Ok(status) => status,
            Err(_) => return false,
        };

        let slot = if status & 0x1 != 0 {
            0
        } else if status & 0x2 != 0 {
            1
        } else if status & 0x4 != 0 {
            2
        } else if status & 0x8 != 0 {
            3
        } else {
            return false;
        };

        match ptrace::peek_user(breakpoint.tid, slot_offset(slot)) {
            Ok(address) => address == breakpoint.address.value(),
            Err(_) => false,
        }
    }

    fn remaining_hw_breakpoint_slots(tid: Tid) -> Result<u32>
    {
        let mut free = 0;
        for slot in 0..DR_SLOTS {
            if ptrace::peek_user(tid, slot_offset(slot))? == 0 {
                free += 1;
            }
        }
        Ok(free)
    }

    fn remaining_hw_watchpoint_slots(tid: Tid) -> Result<u32>
    {
        // breakpoints and watchpoints share the four slots
        Self::remaining_hw_breakpoint_slots(tid)
    }

    fn patch_software_trap(word: u64) -> u64
    {
        // INT3 spliced into the low byte
        (word & !0xff) | 0xcc
    }

    fn is_software_trap(window: u64) -> bool
    {
        window & 0xff == 0xcc
    }

    fn is_call(window: u64) -> bool
    {
        let opcode = (window & 0xff) as u8;
        if opcode == 0xe8 {
            // near call, relative displacement
            return true;
        }
        if opcode == 0xff {
            // FF /2 near indirect, FF /3 far indirect
            let modrm = ((window >> 8) & 0xff) as u8;
            let reg = (modrm >> 3) & 0b111;
            return reg == 2 || reg == 3;
        }
        false
    }

    fn is_ret(window: u64) -> bool
    {
        matches!((window & 0xff) as u8, 0xc3 | 0xc2 | 0xcb | 0xca)
    }

    fn peek_user(tid: Tid, offset: u64) -> Result<u64>
    {
        ptrace::peek_user(tid, offset)
    }

    fn poke_user(tid: Tid, offset: u64, word: u64) -> Result<()>
    {
        ptrace::poke_user(tid, offset, word)
    }
}
