//! Process, thread, and wait-status types.

use std::fmt;

/// Process identifier (PID) of the tracee
///
/// The kernel hands out 32-bit signed process ids on Linux. Using a newtype
/// instead of a raw `i32` keeps pids, tids, and signal numbers from being
/// swapped silently at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub i32);

impl Pid
{
    /// Get the raw pid value.
    pub const fn raw(self) -> i32
    {
        self.0
    }

    /// The tid of the process's main thread.
    ///
    /// On Linux the main thread's tid equals the pid. The detach walks rely
    /// on the main thread being processed last.
    pub const fn main_thread(self) -> Tid
    {
        Tid(self.0)
    }
}

impl From<i32> for Pid
{
    fn from(pid: i32) -> Self
    {
        Pid(pid)
    }
}

impl From<u32> for Pid
{
    fn from(pid: u32) -> Self
    {
        Pid(pid as i32)
    }
}

impl fmt::Display for Pid
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Kernel thread identifier (tid)
///
/// Every live thread of the tracee has a unique tid; the tracing syscall
/// addresses individual threads by tid, not pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tid(pub i32);

impl Tid
{
    /// Get the raw tid value.
    pub const fn raw(self) -> i32
    {
        self.0
    }
}

impl From<i32> for Tid
{
    fn from(tid: i32) -> Self
    {
        Tid(tid)
    }
}

impl fmt::Display for Tid
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Raw wait status reported by the kernel for one thread
///
/// This wraps the `int` filled in by `waitpid(2)` and exposes the usual
/// decoding helpers, plus decoding of the ptrace trace events the core
/// enables at attach time (fork, vfork, clone, exec, exit, and
/// syscall-good traps).
///
/// The raw value is kept so callers can apply their own policy to statuses
/// the helpers do not classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaitStatus(pub i32);

impl WaitStatus
{
    /// The exact status produced by a plain SIGSTOP delivery
    /// (`WIFSTOPPED && WSTOPSIG == SIGSTOP`).
    ///
    /// Stepping a thread over a patched instruction can race with a pending
    /// group-stop in multi-threaded tracees; the resume path re-issues one
    /// single-step when it reaps exactly this status.
    pub const SIGSTOP_DELIVERY: WaitStatus = WaitStatus(4991);

    /// Get the raw status word.
    pub const fn raw(self) -> i32
    {
        self.0
    }

    /// True if the thread is in a ptrace-stop or signal-stop.
    pub fn is_stopped(self) -> bool
    {
        libc::WIFSTOPPED(self.0)
    }

    /// The signal that stopped the thread, if it is stopped.
    ///
    /// For syscall traps reported with TRACESYSGOOD the value is
    /// `SIGTRAP | 0x80`; see [`WaitStatus::is_syscall_trap`].
    pub fn stop_signal(self) -> Option<i32>
    {
        if self.is_stopped() {
            Some(libc::WSTOPSIG(self.0))
        } else {
            None
        }
    }

    /// True if this stop is a syscall-entry or syscall-exit trap
    /// (distinguished from a real SIGTRAP by the TRACESYSGOOD marker bit).
    pub fn is_syscall_trap(self) -> bool
    {
        self.stop_signal() == Some(libc::SIGTRAP | 0x80)
    }

    /// True if the thread exited normally.
    pub fn is_exited(self) -> bool
    {
        libc::WIFEXITED(self.0)
    }

    /// The exit status, if the thread exited normally.
    pub fn exit_status(self) -> Option<i32>
    {
        if self.is_exited() {
            Some(libc::WEXITSTATUS(self.0))
        } else {
            None
        }
    }

    /// True if the thread was terminated by a signal.
    pub fn is_signaled(self) -> bool
    {
        libc::WIFSIGNALED(self.0)
    }

    /// The terminating signal, if the thread was killed by one.
    pub fn term_signal(self) -> Option<i32>
    {
        if self.is_signaled() {
            Some(libc::WTERMSIG(self.0))
        } else {
            None
        }
    }

    /// Decode the ptrace event carried in the high bits of a SIGTRAP stop.
    ///
    /// Only meaningful for stops produced while the trace options enabled at
    /// attach time (FORK, VFORK, CLONE, EXEC, EXIT) are in effect. For a
    /// clone event the new thread's tid is retrieved separately with
    /// `event_message`.
    pub fn trace_event(self) -> Option<TraceEvent>
    {
        if self.stop_signal() != Some(libc::SIGTRAP) {
            return None;
        }
        match (self.0 >> 16) & 0xff {
            libc::PTRACE_EVENT_FORK => Some(TraceEvent::Fork),
            libc::PTRACE_EVENT_VFORK => Some(TraceEvent::Vfork),
            libc::PTRACE_EVENT_CLONE => Some(TraceEvent::Clone),
            libc::PTRACE_EVENT_EXEC => Some(TraceEvent::Exec),
            libc::PTRACE_EVENT_EXIT => Some(TraceEvent::Exit),
            _ => None,
        }
    }
}

impl From<i32> for WaitStatus
{
    fn from(status: i32) -> Self
    {
        WaitStatus(status)
    }
}

/// Trace events reported through SIGTRAP stops when event tracing is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent
{
    /// The tracee forked; the child pid is in the event message.
    Fork,
    /// The tracee vforked; the child pid is in the event message.
    Vfork,
    /// The tracee cloned a new thread; the new tid is in the event message.
    Clone,
    /// The tracee executed a new program image.
    Exec,
    /// A tracee thread is about to exit.
    Exit,
}

/// One reaped `(tid, wait status)` pair
///
/// `wait_all_and_update_regs` returns a chain of these, one per thread it
/// reaped during the stop. The chain is transient: it describes a single
/// stop and is never retained across resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadStatus
{
    /// The thread the status belongs to.
    pub tid: Tid,
    /// The raw wait status reaped for it.
    pub status: WaitStatus,
}
