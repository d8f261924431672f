//! # Types
//!
//! Small, strongly typed values used throughout the core.
//!
//! These abstract the raw integers the kernel interface trades in (process
//! ids, thread ids, addresses, wait statuses) so the rest of the crate
//! cannot accidentally mix them up.

pub mod address;
pub mod process;

// Re-export all public types
pub use address::Address;
pub use process::{Pid, ThreadStatus, Tid, TraceEvent, WaitStatus};
