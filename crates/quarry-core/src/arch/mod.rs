//! # Architecture Adapter
//!
//! Everything the controller needs that differs between x86-64 and AArch64
//! sits behind the sealed [`DebugArch`] trait: register layout and
//! fetch/store, debug register programming and hit detection, the software
//! trap opcode, user-area access, and the call/return recognizer used by
//! step-out.
//!
//! Exactly one adapter is compiled per build; [`Native`] names it. The rest
//! of the crate is written against `Native` and the re-exported register
//! types, so no module outside this one needs `cfg(target_arch)`.

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "aarch64")]
pub use aarch64::{Aarch64 as Native, FpRegisters, GpRegisters};
#[cfg(target_arch = "x86_64")]
pub use x86_64::{FpRegisters, GpRegisters, X86_64 as Native};

use crate::breakpoints::HardwareBreakpoint;
use crate::error::Result;
use crate::types::Tid;

mod sealed
{
    pub trait Sealed {}
}

pub(crate) use sealed::Sealed;

/// Per-architecture debugging contract
///
/// Implemented once per supported architecture; consumers always go through
/// the [`Native`] alias. The trait is sealed: it exists to give the
/// architecture split a single seam, not to be implemented downstream.
pub trait DebugArch: sealed::Sealed
{
    /// Whether resuming a thread that sits on a hit hardware breakpoint
    /// requires lifting the breakpoint around a single-step first.
    ///
    /// True on AArch64, where a thread cannot step off a programmed
    /// breakpoint slot; false on x86-64, where hit detection goes through
    /// DR6 rather than the stop PC.
    const STEP_OVER_HIT_HW_ON_RESUME: bool;

    /// Fetch a thread's general purpose registers into `regs`.
    fn get_regs(tid: Tid, regs: &mut GpRegisters) -> Result<()>;

    /// Store a thread's general purpose registers from `regs`.
    ///
    /// On AArch64 this also honors the sticky syscall-number override: when
    /// the flag is set the syscall-number regset is written first and the
    /// flag cleared.
    fn set_regs(tid: Tid, regs: &mut GpRegisters) -> Result<()>;

    /// Fetch a thread's floating point / vector state into `fp`.
    fn get_fp_regs(tid: Tid, fp: &mut FpRegisters) -> Result<()>;

    /// Store a thread's floating point / vector state from `fp`.
    fn set_fp_regs(tid: Tid, fp: &mut FpRegisters) -> Result<()>;

    /// Program a free debug register slot on the breakpoint's thread.
    ///
    /// Fails with `ResourceExhausted` when every slot is occupied; the
    /// record is mutable because AArch64 coerces execute entries to
    /// length 4.
    fn install_hw_breakpoint(breakpoint: &mut HardwareBreakpoint) -> Result<()>;

    /// Clear the debug register slot holding the breakpoint's address.
    fn remove_hw_breakpoint(breakpoint: &HardwareBreakpoint) -> Result<()>;

    /// True if the thread's current stop was caused by this breakpoint.
    fn hw_breakpoint_hit(breakpoint: &HardwareBreakpoint) -> bool;

    /// Free execute slots remaining on the thread.
    ///
    /// On AArch64 this reports the slot count advertised by the kernel's
    /// debug-info register (execute and data slots are counted separately);
    /// on x86-64 it counts unprogrammed address slots.
    fn remaining_hw_breakpoint_slots(tid: Tid) -> Result<u32>;

    /// Free data (watchpoint) slots remaining on the thread.
    ///
    /// x86-64 shares its 4 slots between breakpoints and watchpoints, so
    /// this reports the same value as the breakpoint query there; callers
    /// must not assume the two pools are independent.
    fn remaining_hw_watchpoint_slots(tid: Tid) -> Result<u32>;

    /// Splice the software trap opcode into an instruction word.
    fn patch_software_trap(word: u64) -> u64;

    /// True if the instruction window starts with the software trap opcode.
    fn is_software_trap(window: u64) -> bool;

    /// Best-effort: true if the window starts with a call instruction.
    ///
    /// Only the common encodings are recognized; anything else counts as a
    /// non-call.
    fn is_call(window: u64) -> bool;

    /// Best-effort: true if the window starts with a return instruction.
    fn is_ret(window: u64) -> bool;

    /// Read one word from the thread's user area.
    ///
    /// Direct PEEKUSER on x86-64. AArch64 has no user-area peek, so the
    /// adapter emulates it over the hardware debug regsets; bit `0x1000` of
    /// the offset selects the watch regset over the break regset.
    fn peek_user(tid: Tid, offset: u64) -> Result<u64>;

    /// Write one word into the thread's user area (see [`DebugArch::peek_user`]).
    fn poke_user(tid: Tid, offset: u64, word: u64) -> Result<()>;
}
