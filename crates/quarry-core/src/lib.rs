//! # quarry-core
//!
//! Low-level debugging primitives and process control for quarry.
//!
//! This crate is the native engine of a Linux process debugger: it drives
//! the kernel's tracing interface to attach to a target process, manage its
//! threads, install and service breakpoints (software and hardware), step
//! and continue execution, and read/write general purpose and floating
//! point register state on x86-64 and AArch64 hosts.
//!
//! ## What lives where
//!
//! - [`session`]: the execution controller: attach/launch, the fixed
//!   stop/resume protocol, stepping, step-out, the detach paths
//! - [`threads`]: the live/dead thread registry with cached register mirrors
//! - [`breakpoints`]: software and hardware breakpoint bookkeeping
//! - [`arch`]: everything architecture-shaped, behind one sealed trait
//! - [`memory`]: word-granularity tracee memory and user-area access
//! - [`types`], [`error`]: the vocabulary the rest trades in
//!
//! Symbol resolution, DWARF/ELF parsing, memory-map discovery and every
//! user-facing surface are deliberately out of scope; this crate accepts
//! addresses and hands back raw statuses.
//!
//! ## Why unsafe code is needed
//!
//! Driving another process through the tracing syscall means raw FFI:
//! requests take untyped pointers into register mirrors and the tracee's
//! address space. All of it funnels through the kernel request layer and
//! the per-architecture adapters, which wrap each call in a safe,
//! `Result`-returning interface.
//!
//! ## Threading model
//!
//! A [`session::DebugSession`] is not thread-safe and not reentrant. Drive
//! it from one thread; the kernel additionally requires that the thread
//! issuing tracing requests is the one that attached.

#![allow(unsafe_code)]

#[cfg(not(target_os = "linux"))]
compile_error!("quarry-core drives the Linux process-tracing interface and only builds for Linux targets");

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("quarry-core supports x86-64 and AArch64 hosts only");

pub mod arch;
pub mod breakpoints;
pub mod error;
pub mod memory;
pub mod prelude;
mod ptrace;
pub mod session;
pub mod threads;
pub mod types;

pub use breakpoints::{HardwareBreakpoint, SoftwareBreakpoint, WatchKind};
pub use error::{QuarryError, Result};
pub use session::{trace_me, DebugSession};
pub use types::{Address, Pid, ThreadStatus, Tid, TraceEvent, WaitStatus};
