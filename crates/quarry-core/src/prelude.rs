//! Common module for library exports

pub use crate::arch::{DebugArch, FpRegisters, GpRegisters, Native};
pub use crate::breakpoints::{HardwareBreakpoint, SoftwareBreakpoint, WatchKind};
pub use crate::error::{QuarryError, Result};
pub use crate::session::{trace_me, DebugSession};
pub use crate::types::{Address, Pid, ThreadStatus, Tid, TraceEvent, WaitStatus};
