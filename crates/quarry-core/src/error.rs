//! # Error Types
//!
//! General error handling for the debugging core.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use thiserror::Error;

use crate::types::{Address, Tid};

/// Main error type for tracing operations
///
/// This enum represents all the ways an operation on the tracee can fail.
///
/// ## Error Categories
///
/// 1. **Kernel refusals**: `Ptrace`, `Wait`. The tracing syscall or a wait
///    returned `-1`. The surrounding state is left unchanged; the caller
///    decides whether the refusal is fatal.
/// 2. **Not-found errors**: `ThreadNotFound`, `NoBreakpoint`
/// 3. **Resource errors**: `ResourceExhausted` (no free debug register slot)
/// 4. **Duplicates**: `DuplicateHardwareBreakpoint`
/// 5. **Process startup**: `LaunchFailed`
/// 6. **I/O errors**: `Io`
///
/// A call/return window the instruction classifier cannot recognize is *not*
/// an error: the classifier reports it as neither a call nor a return and
/// stepping carries on.
#[derive(Error, Debug)]
pub enum QuarryError
{
    /// The kernel refused a tracing request.
    ///
    /// The raw syscall returned `-1`; `source` carries the `errno` the kernel
    /// set. Typical causes are a tid that exited, a thread that is still
    /// running when a stopped thread was required, or insufficient
    /// permissions (`/proc/sys/kernel/yama/ptrace_scope`).
    #[error("ptrace {request} refused by the kernel for thread {tid}: {source}")]
    Ptrace
    {
        /// The request kind, named after the kernel constant.
        request: &'static str,
        /// The thread the request addressed.
        tid: i32,
        /// The errno reported by the kernel.
        #[source]
        source: std::io::Error,
    },

    /// A wait on the tracee (or one of its threads) failed.
    #[error("wait on tracee failed: {0}")]
    Wait(#[source] std::io::Error),

    /// No live thread with the given tid is registered.
    #[error("no registered thread with tid {0}")]
    ThreadNotFound(Tid),

    /// No breakpoint is registered at the given address.
    #[error("no breakpoint at address {0}")]
    NoBreakpoint(Address),

    /// A hardware breakpoint for this `(tid, address)` pair already exists.
    ///
    /// Each thread owns its own debug register file, so the same address may
    /// be watched on several threads, but only once per thread.
    #[error("hardware breakpoint at {address} already registered for thread {tid}")]
    DuplicateHardwareBreakpoint
    {
        /// The owning thread.
        tid: Tid,
        /// The watched address.
        address: Address,
    },

    /// A required resource has been exhausted.
    ///
    /// In practice this means the per-thread debug register file is full:
    /// x86-64 offers 4 address slots (DR0–DR3); AArch64 offers up to 16,
    /// with the exact count advertised by the kernel's debug-info register.
    /// Existing breakpoints are left intact when this is reported.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Spawning a tracee under `launch` failed before the exec stop.
    #[error("failed to launch tracee: {0}")]
    LaunchFailed(String),

    /// I/O error (for pipe plumbing, invalid offsets, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, QuarryError>`
pub type Result<T> = std::result::Result<T, QuarryError>;
