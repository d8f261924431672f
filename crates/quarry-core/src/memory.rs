//! # Tracee Memory Access
//!
//! Word-granularity reads and writes of tracee memory and of the per-thread
//! user area, layered directly on the kernel request wrappers.
//!
//! Data access goes through PEEKDATA/POKEDATA and works with any id
//! belonging to the tracee. User-area access is per-thread and
//! architecture-shaped: x86-64 has native PEEKUSER/POKEUSER; AArch64 has
//! none, so the adapter emulates them over the hardware debug regsets
//! (offset bit `0x1000` selects the watch regset over the break regset).
//!
//! These operations require the addressed thread to be in a ptrace-stop;
//! the kernel refuses them for running threads.

use crate::arch::{DebugArch, Native};
use crate::error::Result;
use crate::ptrace;
use crate::types::{Address, Pid, Tid};

/// Read one word of tracee memory.
pub fn peek_data(pid: Pid, address: Address) -> Result<u64>
{
    ptrace::peek_data(pid, address.value())
}

/// Write one word of tracee memory.
pub fn poke_data(pid: Pid, address: Address, word: u64) -> Result<()>
{
    ptrace::poke_data(pid, address.value(), word)
}

/// Read one word from a thread's user area.
pub fn peek_user(tid: Tid, offset: u64) -> Result<u64>
{
    Native::peek_user(tid, offset)
}

/// Write one word into a thread's user area.
pub fn poke_user(tid: Tid, offset: u64, word: u64) -> Result<()>
{
    Native::poke_user(tid, offset, word)
}
