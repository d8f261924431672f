//! # AArch64 Adapter
//!
//! Register layout and debugging mechanics for AArch64 hosts.
//!
//! ## Registers
//!
//! The general purpose mirror matches the kernel's `user_pt_regs` and is
//! transported through the PRSTATUS regset. A trailing
//! `override_syscall_number` word rides outside the regset window: when a
//! caller sets it, the next store additionally writes the syscall-number
//! regset from `x8` and clears the flag. Floating point state is the
//! 32-register FPSIMD bank plus `fpsr`/`fpcr`, transported whole through
//! the FP regset.
//!
//! ## Debug registers
//!
//! Hardware breakpoints and watchpoints live in two separate regsets of up
//! to 16 `(address, control)` slots each; the kernel advertises the real
//! slot counts in the regset's `dbg_info` word. The control word encodes a
//! byte-select mask `(1 << len) - 1`, the condition (execute 0, read 1,
//! write 2, read/write 3), and the fixed enable bits `(2 << 1) | 1`.
//! Execute entries only support length 4, so install coerces them.
//!
//! Hit detection cannot use the stop PC alone: the kernel reports a debug
//! hit as SIGTRAP with `si_code` 4 and the hit address in `si_addr`, and
//! that is what the adapter inspects.

use std::ffi::c_void;
use std::mem;

use crate::breakpoints::{HardwareBreakpoint, WatchKind};
use crate::error::{QuarryError, Result};
use crate::ptrace;
use crate::types::Tid;

/// Maximum debug register slots the regset can describe.
const HW_SLOTS: usize = 16;
/// Offset bit selecting the watch regset in emulated user-area access.
const USER_AREA_WATCH_BIT: u64 = 0x1000;
/// `si_code` the kernel uses for hardware breakpoint/watchpoint traps.
const TRAP_HWBKPT: i32 = 4;

/// General purpose register mirror, laid out like the kernel's
/// `user_pt_regs`, plus the sticky syscall override flag
///
/// The flag is not part of the kernel layout: regset transfers cover only
/// the leading `user_pt_regs` window.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpRegisters
{
    /// X0–X30.
    pub regs: [u64; 31],
    /// Stack pointer.
    pub sp: u64,
    /// Program counter.
    pub pc: u64,
    /// Processor state flags.
    pub pstate: u64,
    /// Sticky flag: when non-zero, the next store also writes the
    /// syscall-number regset from `regs[8]`, then clears this flag.
    pub override_syscall_number: u64,
}

/// The window of [`GpRegisters`] the kernel actually transfers.
const GP_REGSET_LEN: usize = mem::size_of::<GpRegisters>() - mem::size_of::<u64>();

const _: () = assert!(GP_REGSET_LEN == 272);

impl Default for GpRegisters
{
    fn default() -> Self
    {
        unsafe { mem::zeroed() }
    }
}

impl GpRegisters
{
    /// The instruction pointer.
    pub fn instruction_pointer(&self) -> u64
    {
        self.pc
    }

    /// Redirect execution to `value` on the next resume.
    pub fn set_instruction_pointer(&mut self, value: u64)
    {
        self.pc = value;
    }

    /// The stack pointer.
    pub fn stack_pointer(&self) -> u64
    {
        self.sp
    }

    /// Override the in-flight system call number.
    ///
    /// Stores the number in `x8` and arms the sticky flag so the next
    /// register flush rewrites the kernel's syscall-number regset too.
    pub fn set_syscall_number(&mut self, number: u64)
    {
        self.regs[8] = number;
        self.override_syscall_number = 1;
    }
}

/// FPSIMD state mirror, laid out like the kernel's `user_fpsimd_state`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FpRegisters
{
    /// V0–V31, 128 bits each.
    pub vregs: [[u8; 16]; 32],
    /// Floating point status register.
    pub fpsr: u32,
    /// Floating point control register.
    pub fpcr: u32,
    reserved: [u32; 2],
}

const _: () = assert!(mem::size_of::<FpRegisters>() == 528);

impl Default for FpRegisters
{
    fn default() -> Self
    {
        unsafe { mem::zeroed() }
    }
}

/// One debug register slot as the kernel's hwdebug regset describes it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct HwDebugSlot
{
    addr: u64,
    ctrl: u32,
    pad: u32,
}

/// Mirror of the kernel's `user_hwdebug_state`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct HwDebugState
{
    dbg_info: u32,
    pad: u32,
    dbg_regs: [HwDebugSlot; HW_SLOTS],
}

const _: () = assert!(mem::size_of::<HwDebugState>() == 8 + HW_SLOTS * 16);

impl Default for HwDebugState
{
    fn default() -> Self
    {
        unsafe { mem::zeroed() }
    }
}

fn fetch_debug_state(tid: Tid, note: libc::c_int) -> Result<HwDebugState>
{
    let mut state = HwDebugState::default();
    unsafe {
        ptrace::get_regset(
            tid,
            note,
            &mut state as *mut HwDebugState as *mut c_void,
            mem::size_of::<HwDebugState>(),
        )?;
    }
    Ok(state)
}

fn store_debug_state(tid: Tid, note: libc::c_int, state: &HwDebugState) -> Result<()>
{
    unsafe {
        ptrace::set_regset(
            tid,
            note,
            state as *const HwDebugState as *const c_void,
            mem::size_of::<HwDebugState>(),
        )
    }
}

fn condition_bits(kind: WatchKind) -> u32
{
    match kind {
        WatchKind::Execute => 0,
        WatchKind::Write => 2,
        WatchKind::ReadWrite => 3,
    }
}

fn regset_note(kind: WatchKind) -> libc::c_int
{
    if kind == WatchKind::Execute {
        ptrace::NT_ARM_HW_BREAK
    } else {
        ptrace::NT_ARM_HW_WATCH
    }
}

/// The AArch64 adapter
#[derive(Debug)]
pub enum Aarch64 {}

impl super::Sealed for Aarch64 {}

impl super::DebugArch for Aarch64
{
    // A thread stopped on a programmed breakpoint slot refires it instead of
    // stepping; the resume paths lift the slot around the step.
    const STEP_OVER_HIT_HW_ON_RESUME: bool = true;

    fn get_regs(tid: Tid, regs: &mut GpRegisters) -> Result<()>
    {
        regs.override_syscall_number = 0;
        unsafe {
            ptrace::get_regset(
                tid,
                ptrace::NT_PRSTATUS,
                regs as *mut GpRegisters as *mut c_void,
                GP_REGSET_LEN,
            )
        }
    }

    fn set_regs(tid: Tid, regs: &mut GpRegisters) -> Result<()>
    {
        if regs.override_syscall_number != 0 {
            unsafe {
                ptrace::set_regset(
                    tid,
                    ptrace::NT_ARM_SYSTEM_CALL,
                    &regs.regs[8] as *const u64 as *const c_void,
                    mem::size_of::<u64>(),
                )?;
            }
            regs.override_syscall_number = 0;
        }
        unsafe {
            ptrace::set_regset(
                tid,
                ptrace::NT_PRSTATUS,
                regs as *const GpRegisters as *const c_void,
                GP_REGSET_LEN,
            )
        }
    }

    fn get_fp_regs(tid: Tid, fp: &mut FpRegisters) -> Result<()>
    {
        unsafe {
            ptrace::get_regset(
                tid,
                ptrace::NT_PRFPREG,
                fp as *mut FpRegisters as *mut c_void,
                mem::size_of::<FpRegisters>(),
            )
        }
    }

    fn set_fp_regs(tid: Tid, fp: &mut FpRegisters) -> Result<()>
    {
        unsafe {
            ptrace::set_regset(
                tid,
                ptrace::NT_PRFPREG,
                fp as *const FpRegisters as *const c_void,
                mem::size_of::<FpRegisters>(),
            )
        }
    }

    fn install_hw_breakpoint(breakpoint: &mut HardwareBreakpoint) -> Result<()>
    {
        let note = regset_note(breakpoint.kind);
        let mut state = fetch_debug_state(breakpoint.tid, note)?;

        // find a free debug register
        let mut free = None;
        for (index, slot) in state.dbg_regs.iter().enumerate() {
            if slot.addr == 0 {
                free = Some(index);
                break;
            }
        }
        let index = free.ok_or_else(|| {
            QuarryError::ResourceExhausted(format!(
                "no free debug register for thread {} ({} slots)",
                breakpoint.tid, HW_SLOTS
            ))
        })?;

        if breakpoint.kind == WatchKind::Execute {
            // execute slots only compare 4 bytes
            breakpoint.length = 4;
        }

        let length_mask = (1u32 << breakpoint.length) - 1;
        let control = (length_mask << 5) | (condition_bits(breakpoint.kind) << 3) | (2 << 1) | 1;

        state.dbg_regs[index] = HwDebugSlot {
            addr: breakpoint.address.value(),
            ctrl: control,
            pad: 0,
        };

        store_debug_state(breakpoint.tid, note, &state)
    }

    fn remove_hw_breakpoint(breakpoint: &HardwareBreakpoint) -> Result<()>
    {
        let note = regset_note(breakpoint.kind);
        let mut state = fetch_debug_state(breakpoint.tid, note)?;

        let mut occupied = None;
        for (index, slot) in state.dbg_regs.iter().enumerate() {
            if slot.addr == breakpoint.address.value() {
                occupied = Some(index);
                break;
            }
        }
        let index = occupied.ok_or(QuarryError::NoBreakpoint(breakpoint.address))?;

        state.dbg_regs[index] = HwDebugSlot::default();

        store_debug_state(breakpoint.tid, note, &state)
    }

    fn hw_breakpoint_hit(breakpoint: &HardwareBreakpoint) -> bool
    {
        let info = match ptrace::get_siginfo(breakpoint.tid) {
            Ok(info) => info,
            Err(_) => return false,
        };

        if info.si_signo != libc::SIGTRAP || info.si_code != TRAP_HWBKPT {
            return false;
        }

        let fault_address = unsafe { info.si_addr() } as u64;
        fault_address == breakpoint.address.value()
    }

    fn remaining_hw_breakpoint_slots(tid: Tid) -> Result<u32>
    {
        // low byte of dbg_info is the slot count the hardware advertises
        let state = fetch_debug_state(tid, ptrace::NT_ARM_HW_BREAK)?;
        Ok(state.dbg_info & 0xff)
    }

    fn remaining_hw_watchpoint_slots(tid: Tid) -> Result<u32>
    {
        let state = fetch_debug_state(tid, ptrace::NT_ARM_HW_WATCH)?;
        Ok(state.dbg_info & 0xff)
    }

    fn patch_software_trap(word: u64) -> u64
    {
        // BRK #0 replaces the low instruction of the window
        (word & !0xffff_ffff) | 0xd420_0000
    }

    fn is_software_trap(window: u64) -> bool
    {
        window & 0xffff_ffff == 0xd420_0000
    }

    fn is_call(window: u64) -> bool
    {
        let insn = (window & 0xffff_ffff) as u32;
        if insn & 0xfc00_0000 == 0x9400_0000 {
            // BL
            return true;
        }
        // BLR
        insn & 0xffff_fc1f == 0xd63f_0000
    }

    fn is_ret(window: u64) -> bool
    {
        let insn = (window & 0xffff_ffff) as u32;
        insn & 0xffff_fc1f == 0xd65f_0000
    }

    fn peek_user(tid: Tid, offset: u64) -> Result<u64>
    {
        // no PEEKUSER on AArch64; read the requested word out of the debug
        // regset image instead
        let note = if offset & USER_AREA_WATCH_BIT != 0 {
            ptrace::NT_ARM_HW_WATCH
        } else {
            ptrace::NT_ARM_HW_BREAK
        };
        let offset = (offset & !USER_AREA_WATCH_BIT) as usize;
        if offset + mem::size_of::<u64>() > mem::size_of::<HwDebugState>() {
            return Err(QuarryError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("user-area offset 0x{offset:x} outside the debug regset"),
            )));
        }

        let state = fetch_debug_state(tid, note)?;
        let base = &state as *const HwDebugState as *const u8;
        let word = unsafe { (base.add(offset) as *const u64).read_unaligned() };
        Ok(word)
    }

    fn poke_user(tid: Tid, offset: u64, word: u64) -> Result<()>
    {
        let note = if offset & USER_AREA_WATCH_BIT != 0 {
            ptrace::NT_ARM_HW_WATCH
        } else {
            ptrace::NT_ARM_HW_BREAK
        };
        let offset = (offset & !USER_AREA_WATCH_BIT) as usize;
        if offset + mem::size_of::<u64>() > mem::size_of::<HwDebugState>() {
            return Err(QuarryError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("user-area offset 0x{offset:x} outside the debug regset"),
            )));
        }

        let mut state = fetch_debug_state(tid, note)?;
        let base = &mut state as *mut HwDebugState as *mut u8;
        unsafe {
            (base.add(offset) as *mut u64).write_unaligned(word);
        }
        store_debug_state(tid, note, &state)
    }
}
