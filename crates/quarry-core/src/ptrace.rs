//! # Kernel Request Layer
//!
//! Typed wrappers over the Linux tracing syscall and its sibling syscalls
//! (`waitpid`, `tgkill`, `kill`).
//!
//! The raw syscall returns a signed word that conflates success values and
//! errors, so every wrapper here lifts the outcome into a `Result`: `errno`
//! is cleared before the PEEK requests (whose success value may legitimately
//! be `-1`) and inspected afterwards, and every other request maps a `-1`
//! return to [`QuarryError::Ptrace`] carrying the request name and errno.
//!
//! All `unsafe` FFI in the crate funnels through this module and the
//! per-architecture adapters, keeping the rest of the code free of raw
//! kernel plumbing.

use std::ffi::c_void;
use std::io;
use std::mem;
use std::ptr;

use crate::error::{QuarryError, Result};
use crate::types::{Pid, ThreadStatus, Tid, WaitStatus};

/// Regset note type for the general purpose registers.
#[cfg(target_arch = "aarch64")]
pub(crate) const NT_PRSTATUS: libc::c_int = 1;
/// Regset note type for the legacy floating point registers.
#[cfg(target_arch = "aarch64")]
pub(crate) const NT_PRFPREG: libc::c_int = 2;
/// Regset note type for the x86 extended state area (XSAVE).
#[cfg(all(target_arch = "x86_64", feature = "xsave"))]
pub(crate) const NT_X86_XSTATE: libc::c_int = 0x202;
/// Regset note type for the AArch64 hardware breakpoint registers.
#[cfg(target_arch = "aarch64")]
pub(crate) const NT_ARM_HW_BREAK: libc::c_int = 0x402;
/// Regset note type for the AArch64 hardware watchpoint registers.
#[cfg(target_arch = "aarch64")]
pub(crate) const NT_ARM_HW_WATCH: libc::c_int = 0x403;
/// Regset note type for overriding the AArch64 system call number.
#[cfg(target_arch = "aarch64")]
pub(crate) const NT_ARM_SYSTEM_CALL: libc::c_int = 0x404;

fn refused(request: &'static str, tid: Tid) -> QuarryError
{
    QuarryError::Ptrace {
        request,
        tid: tid.raw(),
        source: io::Error::last_os_error(),
    }
}

fn clear_errno()
{
    unsafe {
        *libc::__errno_location() = 0;
    }
}

/// Ask the kernel to trace the calling process.
///
/// Called by a forked child before it execs the program to debug; the
/// parent becomes the tracer and reaps the exec stop.
pub fn trace_me() -> Result<()>
{
    let ret = unsafe { libc::ptrace(libc::PTRACE_TRACEME, 0, ptr::null_mut::<c_void>(), ptr::null_mut::<c_void>()) };
    if ret == -1 {
        return Err(refused("TRACEME", Tid(0)));
    }
    Ok(())
}

/// Attach to a running thread. The kernel delivers a stop that the caller
/// must reap with [`wait_thread`] before issuing further requests.
pub(crate) fn attach(tid: Tid) -> Result<()>
{
    let ret = unsafe { libc::ptrace(libc::PTRACE_ATTACH, tid.raw(), ptr::null_mut::<c_void>(), ptr::null_mut::<c_void>()) };
    if ret == -1 {
        return Err(refused("ATTACH", tid));
    }
    Ok(())
}

/// Detach from a thread, letting it run freely (modulo pending signals).
pub(crate) fn detach(tid: Tid) -> Result<()>
{
    let ret = unsafe { libc::ptrace(libc::PTRACE_DETACH, tid.raw(), ptr::null_mut::<c_void>(), ptr::null_mut::<c_void>()) };
    if ret == -1 {
        return Err(refused("DETACH", tid));
    }
    Ok(())
}

/// Resume a stopped thread, optionally stopping again at syscall boundaries,
/// forwarding `signal` to it (0 forwards nothing).
pub(crate) fn resume(tid: Tid, stop_at_syscalls: bool, signal: i32) -> Result<()>
{
    let (request, name) = if stop_at_syscalls {
        (libc::PTRACE_SYSCALL, "SYSCALL")
    } else {
        (libc::PTRACE_CONT, "CONT")
    };
    let ret = unsafe { libc::ptrace(request, tid.raw(), ptr::null_mut::<c_void>(), signal as usize as *mut c_void) };
    if ret == -1 {
        return Err(refused(name, tid));
    }
    Ok(())
}

/// Execute one instruction on a stopped thread, forwarding `signal` (0
/// forwards nothing). The resulting trap must be reaped with [`wait_thread`].
pub(crate) fn single_step(tid: Tid, signal: i32) -> Result<()>
{
    let ret = unsafe { libc::ptrace(libc::PTRACE_SINGLESTEP, tid.raw(), ptr::null_mut::<c_void>(), signal as usize as *mut c_void) };
    if ret == -1 {
        return Err(refused("SINGLESTEP", tid));
    }
    Ok(())
}

/// Enable the trace events the controller relies on: FORK, VFORK, CLONE,
/// EXEC, EXIT, and the SYSGOOD marker that distinguishes syscall traps from
/// real SIGTRAPs.
pub(crate) fn set_options(tid: Tid) -> Result<()>
{
    let options = libc::PTRACE_O_TRACEFORK
        | libc::PTRACE_O_TRACEVFORK
        | libc::PTRACE_O_TRACESYSGOOD
        | libc::PTRACE_O_TRACECLONE
        | libc::PTRACE_O_TRACEEXEC
        | libc::PTRACE_O_TRACEEXIT;
    let ret = unsafe { libc::ptrace(libc::PTRACE_SETOPTIONS, tid.raw(), ptr::null_mut::<c_void>(), options as usize as *mut c_void) };
    if ret == -1 {
        return Err(refused("SETOPTIONS", tid));
    }
    Ok(())
}

/// Read one word of tracee memory.
///
/// The success value of PEEKDATA may itself be `-1`, so errno is cleared
/// before the call and consulted afterwards to tell the two apart.
pub(crate) fn peek_data(pid: Pid, address: u64) -> Result<u64>
{
    clear_errno();
    let word = unsafe { libc::ptrace(libc::PTRACE_PEEKDATA, pid.raw(), address as usize as *mut c_void, ptr::null_mut::<c_void>()) };
    if word == -1 && io::Error::last_os_error().raw_os_error() != Some(0) {
        return Err(refused("PEEKDATA", Tid(pid.raw())));
    }
    Ok(word as u64)
}

/// Write one word of tracee memory.
pub(crate) fn poke_data(pid: Pid, address: u64, word: u64) -> Result<()>
{
    let ret = unsafe { libc::ptrace(libc::PTRACE_POKEDATA, pid.raw(), address as usize as *mut c_void, word as usize as *mut c_void) };
    if ret == -1 {
        return Err(refused("POKEDATA", Tid(pid.raw())));
    }
    Ok(())
}

/// Read one word from a thread's user area (debug registers live there).
#[cfg(target_arch = "x86_64")]
pub(crate) fn peek_user(tid: Tid, offset: u64) -> Result<u64>
{
    clear_errno();
    let word = unsafe { libc::ptrace(libc::PTRACE_PEEKUSER, tid.raw(), offset as usize as *mut c_void, ptr::null_mut::<c_void>()) };
    if word == -1 && io::Error::last_os_error().raw_os_error() != Some(0) {
        return Err(refused("PEEKUSER", tid));
    }
    Ok(word as u64)
}

/// Write one word into a thread's user area.
#[cfg(target_arch = "x86_64")]
pub(crate) fn poke_user(tid: Tid, offset: u64, word: u64) -> Result<()>
{
    let ret = unsafe { libc::ptrace(libc::PTRACE_POKEUSER, tid.raw(), offset as usize as *mut c_void, word as usize as *mut c_void) };
    if ret == -1 {
        return Err(refused("POKEUSER", tid));
    }
    Ok(())
}

/// Fetch the whole general purpose register file in one request.
#[cfg(target_arch = "x86_64")]
pub(crate) fn get_regs_area<T>(tid: Tid, regs: &mut T) -> Result<()>
{
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGS,
            tid.raw(),
            ptr::null_mut::<c_void>(),
            regs as *mut T as *mut c_void,
        )
    };
    if ret == -1 {
        return Err(refused("GETREGS", tid));
    }
    Ok(())
}

/// Store the whole general purpose register file in one request.
#[cfg(target_arch = "x86_64")]
pub(crate) fn set_regs_area<T>(tid: Tid, regs: &T) -> Result<()>
{
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_SETREGS,
            tid.raw(),
            ptr::null_mut::<c_void>(),
            regs as *const T as *mut c_void,
        )
    };
    if ret == -1 {
        return Err(refused("SETREGS", tid));
    }
    Ok(())
}

/// Read a register set identified by an ELF note type into `base..base+len`.
///
/// ## Safety
///
/// `base` must be valid for writes of `len` bytes.
pub(crate) unsafe fn get_regset(tid: Tid, note: libc::c_int, base: *mut c_void, len: usize) -> Result<()>
{
    let mut iov = libc::iovec {
        iov_base: base,
        iov_len: len,
    };
    let ret = libc::ptrace(
        libc::PTRACE_GETREGSET,
        tid.raw(),
        note as usize as *mut c_void,
        &mut iov as *mut libc::iovec as *mut c_void,
    );
    if ret == -1 {
        return Err(refused("GETREGSET", tid));
    }
    Ok(())
}

/// Write a register set identified by an ELF note type from `base..base+len`.
///
/// ## Safety
///
/// `base` must be valid for reads of `len` bytes.
pub(crate) unsafe fn set_regset(tid: Tid, note: libc::c_int, base: *const c_void, len: usize) -> Result<()>
{
    let mut iov = libc::iovec {
        iov_base: base as *mut c_void,
        iov_len: len,
    };
    let ret = libc::ptrace(
        libc::PTRACE_SETREGSET,
        tid.raw(),
        note as usize as *mut c_void,
        &mut iov as *mut libc::iovec as *mut c_void,
    );
    if ret == -1 {
        return Err(refused("SETREGSET", tid));
    }
    Ok(())
}

/// Fetch the signal information describing a thread's current stop.
pub(crate) fn get_siginfo(tid: Tid) -> Result<libc::siginfo_t>
{
    let mut info: libc::siginfo_t = unsafe { mem::zeroed() };
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_GETSIGINFO,
            tid.raw(),
            ptr::null_mut::<c_void>(),
            &mut info as *mut libc::siginfo_t as *mut c_void,
        )
    };
    if ret == -1 {
        return Err(refused("GETSIGINFO", tid));
    }
    Ok(info)
}

/// Fetch the message associated with the current trace event (for clone
/// events this is the new thread's tid).
pub(crate) fn get_event_msg(pid: Pid) -> Result<u64>
{
    let mut message: u64 = 0;
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_GETEVENTMSG,
            pid.raw(),
            ptr::null_mut::<c_void>(),
            &mut message as *mut u64 as *mut c_void,
        )
    };
    if ret == -1 {
        return Err(refused("GETEVENTMSG", Tid(pid.raw())));
    }
    Ok(message)
}

/// Block until the given thread reports a wait status.
pub(crate) fn wait_thread(tid: Tid) -> Result<WaitStatus>
{
    let mut status: libc::c_int = 0;
    let ret = unsafe { libc::waitpid(tid.raw(), &mut status, 0) };
    if ret == -1 {
        return Err(QuarryError::Wait(io::Error::last_os_error()));
    }
    Ok(WaitStatus(status))
}

/// Block until any thread in the tracee's process group reports a status.
pub(crate) fn wait_process_group(pid: Pid) -> Result<ThreadStatus>
{
    let pgid = unsafe { libc::getpgid(pid.raw()) };
    if pgid == -1 {
        return Err(QuarryError::Wait(io::Error::last_os_error()));
    }
    let mut status: libc::c_int = 0;
    let tid = unsafe { libc::waitpid(-pgid, &mut status, 0) };
    if tid == -1 {
        return Err(QuarryError::Wait(io::Error::last_os_error()));
    }
    Ok(ThreadStatus {
        tid: Tid(tid),
        status: WaitStatus(status),
    })
}

/// Reap one already-pending status from the tracee's process group without
/// blocking. Returns `None` once nothing is ready.
pub(crate) fn try_wait_process_group(pid: Pid) -> Option<ThreadStatus>
{
    let pgid = unsafe { libc::getpgid(pid.raw()) };
    if pgid == -1 {
        return None;
    }
    let mut status: libc::c_int = 0;
    let tid = unsafe { libc::waitpid(-pgid, &mut status, libc::WNOHANG) };
    if tid <= 0 {
        return None;
    }
    Some(ThreadStatus {
        tid: Tid(tid),
        status: WaitStatus(status),
    })
}

/// Deliver a signal to one specific thread of the tracee.
pub(crate) fn tgkill(pid: Pid, tid: Tid, signal: i32) -> Result<()>
{
    let ret = unsafe { libc::syscall(libc::SYS_tgkill, pid.raw(), tid.raw(), signal) };
    if ret == -1 {
        return Err(QuarryError::Io(io::Error::last_os_error()));
    }
    Ok(())
}

/// Deliver a signal to the whole tracee process.
pub(crate) fn kill_process(pid: Pid, signal: i32) -> Result<()>
{
    let ret = unsafe { libc::kill(pid.raw(), signal) };
    if ret == -1 {
        return Err(QuarryError::Io(io::Error::last_os_error()));
    }
    Ok(())
}
