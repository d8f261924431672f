//! # Execution Controller
//!
//! [`DebugSession`] owns the whole mirror of one tracee (live and dead
//! threads, both breakpoint tables, the syscall-trace flag) and drives the
//! stop/resume protocol against the kernel. It is explicit context: nothing
//! here is global, so several sessions can coexist, one per tracee.
//!
//! ## The stop/resume protocol
//!
//! Within one cycle the order is fixed. Before any resume
//! ([`DebugSession::prepare_for_run`]):
//!
//! 1. flush every cached register mirror back to the kernel,
//! 2. single-step every thread that sits on a software breakpoint address
//!    past it (re-stepping once if the step reaps a bare SIGSTOP delivery;
//!    stepping over a patch can race with a pending group-stop),
//! 3. on AArch64, lift-step-reinstall hardware breakpoints whose slot the
//!    stopped PC sits on,
//! 4. apply every enabled software patch to tracee memory.
//!
//! On stop ([`DebugSession::wait_all_and_update_regs`]): reap the stopping
//! thread, force-stop and reap every sibling, drain whatever else is
//! already pending, refresh all register mirrors, and restore the original
//! bytes under every enabled patch, so user reads of tracee memory see the
//! pristine image whenever the tracee is stopped.
//!
//! ## Threading model
//!
//! The controller is single-threaded and not reentrant; the caller
//! serializes invocations. Concurrency is external: the tracee's threads
//! run in parallel with the controller but are stopped whenever their state
//! is inspected or mutated. Only the wait/step entry points block.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use crate::arch::{DebugArch, FpRegisters, GpRegisters, Native};
use crate::breakpoints::{
    HardwareBreakpoint, HardwareBreakpointTable, SoftwareBreakpoint, SoftwareBreakpointTable, WatchKind,
};
use crate::error::{QuarryError, Result};
use crate::memory;
use crate::ptrace;
use crate::threads::ThreadRegistry;
use crate::types::{Address, Pid, ThreadStatus, Tid, WaitStatus};

pub use crate::ptrace::trace_me;

/// Debugging session for a single tracee process
///
/// Created by [`DebugSession::attach`], [`DebugSession::launch`] or
/// [`DebugSession::adopt_traced_child`]; destroyed by one of the detach
/// paths or by dropping it (dropping does *not* detach; the kernel cleans
/// tracing state up when the tracer exits).
#[derive(Debug)]
pub struct DebugSession
{
    pid: Pid,
    threads: ThreadRegistry,
    sw_breakpoints: SoftwareBreakpointTable,
    hw_breakpoints: HardwareBreakpointTable,
    syscall_tracing: bool,
}

impl DebugSession
{
    fn new(pid: Pid) -> Self
    {
        DebugSession {
            pid,
            threads: ThreadRegistry::new(),
            sw_breakpoints: SoftwareBreakpointTable::new(),
            hw_breakpoints: HardwareBreakpointTable::new(),
            syscall_tracing: false,
        }
    }

    /// Attach to a running process.
    ///
    /// Seizes the main thread, reaps the attach stop, enables the trace
    /// events the controller relies on (fork, vfork, clone, exec, exit, and
    /// syscall-good marking) and registers the main thread. Sibling threads
    /// of an already multi-threaded process are attached individually with
    /// [`DebugSession::attach_existing_thread`]; discovering their tids
    /// (e.g. from `/proc/<pid>/task`) is the caller's business.
    pub fn attach(pid: Pid) -> Result<Self>
    {
        ptrace::attach(pid.main_thread())?;
        Self::adopt_traced_child(pid)
    }

    /// Adopt a child that arranged to be traced before exec.
    ///
    /// For children that called [`trace_me`] (directly or via
    /// [`DebugSession::launch`]): reaps the pending stop, sets the trace
    /// options and registers the main thread.
    pub fn adopt_traced_child(pid: Pid) -> Result<Self>
    {
        let tid = pid.main_thread();
        ptrace::wait_thread(tid)?;

        let mut session = Self::new(pid);
        ptrace::set_options(tid)?;
        session.threads.register(tid);
        Ok(session)
    }

    /// Fork and exec a program under tracing, returning a ready session.
    ///
    /// The child calls [`trace_me`] and execs; the parent reaps the exec
    /// stop, so the returned session sees the fresh image stopped at its
    /// entry, before any user code has run, so breakpoints can be planted
    /// first.
    pub fn launch<P: AsRef<Path>>(program: P, args: &[&str]) -> Result<Self>
    {
        let program = CString::new(program.as_ref().as_os_str().as_bytes())
            .map_err(|_| QuarryError::LaunchFailed("program path contains an interior NUL".into()))?;

        let mut argv_owned = Vec::with_capacity(args.len() + 1);
        argv_owned.push(program.clone());
        for arg in args {
            argv_owned
                .push(CString::new(*arg).map_err(|_| QuarryError::LaunchFailed("argument contains an interior NUL".into()))?);
        }
        let mut argv: Vec<*const libc::c_char> = argv_owned.iter().map(|arg| arg.as_ptr()).collect();
        argv.push(ptr::null());

        match unsafe { libc::fork() } {
            -1 => Err(QuarryError::LaunchFailed(std::io::Error::last_os_error().to_string())),
            0 => {
                // child: only async-signal-safe calls between fork and exec
                let _ = trace_me();
                unsafe {
                    libc::execvp(program.as_ptr(), argv.as_ptr());
                    libc::_exit(127)
                }
            }
            child => Self::adopt_traced_child(Pid(child)),
        }
    }

    /// Attach one additional thread of the traced process.
    ///
    /// Seizes the tid, reaps its stop, applies the trace options and
    /// registers it. Used both for pre-existing siblings at attach time and
    /// for manual control over clone-event children.
    pub fn attach_existing_thread(&mut self, tid: Tid) -> Result<()>
    {
        ptrace::attach(tid)?;
        ptrace::wait_thread(tid)?;
        ptrace::set_options(tid)?;
        self.threads.register(tid);
        Ok(())
    }

    /// The tracee's process id.
    pub fn pid(&self) -> Pid
    {
        self.pid
    }

    /// The live/dead thread registry.
    pub fn threads(&self) -> &ThreadRegistry
    {
        &self.threads
    }

    /// The software breakpoint table, in ascending address order.
    pub fn software_breakpoints(&self) -> &SoftwareBreakpointTable
    {
        &self.sw_breakpoints
    }

    /// The hardware breakpoint table.
    pub fn hardware_breakpoints(&self) -> &HardwareBreakpointTable
    {
        &self.hw_breakpoints
    }

    /// Whether resumes stop at syscall boundaries.
    pub fn syscall_tracing(&self) -> bool
    {
        self.syscall_tracing
    }

    /// Select between plain continues and syscall-stopping continues for
    /// every subsequent resume.
    pub fn set_syscall_tracing(&mut self, enabled: bool)
    {
        self.syscall_tracing = enabled;
    }

    // ------------------------------------------------------------------
    // threads and registers
    // ------------------------------------------------------------------

    /// Register a thread observed via attach or a clone event.
    ///
    /// Idempotent. Fetches the initial register snapshot and returns the
    /// cached mirror for mutation.
    pub fn register_thread(&mut self, tid: Tid) -> &mut GpRegisters
    {
        &mut self.threads.register(tid).regs
    }

    /// Move a thread to the dead list after it exited or detached.
    pub fn unregister_thread(&mut self, tid: Tid)
    {
        self.threads.unregister(tid);
    }

    /// The cached general purpose registers of a thread.
    ///
    /// Authoritative between a stop and the next resume.
    pub fn regs(&self, tid: Tid) -> Result<&GpRegisters>
    {
        self.threads.get(tid).map(|thread| thread.regs()).ok_or(QuarryError::ThreadNotFound(tid))
    }

    /// The cached general purpose registers of a thread, for mutation.
    ///
    /// Changes take effect on the next resume, when all mirrors are flushed.
    pub fn regs_mut(&mut self, tid: Tid) -> Result<&mut GpRegisters>
    {
        self.threads
            .get_mut(tid)
            .map(|thread| &mut thread.regs)
            .ok_or(QuarryError::ThreadNotFound(tid))
    }

    /// Fetch a thread's floating point state from the kernel into the cache
    /// and return it.
    pub fn fetch_fp_regs(&mut self, tid: Tid) -> Result<&FpRegisters>
    {
        let thread = self.threads.get_mut(tid).ok_or(QuarryError::ThreadNotFound(tid))?;
        Native::get_fp_regs(tid, &mut thread.fpregs)?;
        Ok(&*thread.fpregs)
    }

    /// The cached floating point state of a thread, for mutation.
    pub fn fp_regs_mut(&mut self, tid: Tid) -> Result<&mut FpRegisters>
    {
        self.threads
            .get_mut(tid)
            .map(|thread| &mut *thread.fpregs)
            .ok_or(QuarryError::ThreadNotFound(tid))
    }

    /// Write a thread's cached floating point state back to the kernel.
    pub fn flush_fp_regs(&mut self, tid: Tid) -> Result<()>
    {
        let thread = self.threads.get_mut(tid).ok_or(QuarryError::ThreadNotFound(tid))?;
        Native::set_fp_regs(tid, &mut thread.fpregs)
    }

    /// Queue a signal for delivery to a thread on its next resume.
    ///
    /// The pending signal is forwarded (and cleared) by the next
    /// continue-all or single-step of that thread; 0 clears it.
    pub fn set_pending_signal(&mut self, tid: Tid, signal: i32) -> Result<()>
    {
        let thread = self.threads.get_mut(tid).ok_or(QuarryError::ThreadNotFound(tid))?;
        thread.signal_to_forward = signal;
        Ok(())
    }

    // ------------------------------------------------------------------
    // software breakpoints
    // ------------------------------------------------------------------

    /// Register (or re-enable) a software breakpoint.
    ///
    /// Reads the instruction word, splices the trap opcode in and writes it
    /// back immediately. If a record already exists for the address it is
    /// only re-enabled: the original word captured at first registration is
    /// kept, so a breakpoint can never memorize its own trap byte.
    pub fn register_breakpoint(&mut self, address: Address) -> Result<()>
    {
        let original = memory::peek_data(self.pid, address)?;
        let patched = Native::patch_software_trap(original);
        memory::poke_data(self.pid, address, patched)?;

        if self.sw_breakpoints.re_enable(address) {
            return Ok(());
        }

        self.sw_breakpoints.insert(SoftwareBreakpoint {
            address,
            original,
            patched,
            enabled: true,
        });
        Ok(())
    }

    /// Drop the record for a software breakpoint.
    ///
    /// A no-op if no record exists. **The patched bytes are not restored**:
    /// callers that unregister while the patch is live must disable the
    /// breakpoint and go through a stop first (the wait path restores the
    /// original bytes), or restore memory themselves.
    pub fn unregister_breakpoint(&mut self, address: Address)
    {
        self.sw_breakpoints.remove(address);
    }

    /// Mark a software breakpoint active for subsequent resumes.
    ///
    /// Memory is not touched here: patches are applied by the next resume
    /// and reverted by the next stop.
    pub fn enable_breakpoint(&mut self, address: Address) -> Result<()>
    {
        if self.sw_breakpoints.enable(address) {
            Ok(())
        } else {
            Err(QuarryError::NoBreakpoint(address))
        }
    }

    /// Mark a software breakpoint inactive for subsequent resumes.
    pub fn disable_breakpoint(&mut self, address: Address) -> Result<()>
    {
        if self.sw_breakpoints.disable(address) {
            Ok(())
        } else {
            Err(QuarryError::NoBreakpoint(address))
        }
    }

    // ------------------------------------------------------------------
    // hardware breakpoints
    // ------------------------------------------------------------------

    /// Register a hardware breakpoint or watchpoint and program a free
    /// debug register slot on its thread immediately.
    ///
    /// `length` must be 1, 2, 4 or 8; execute entries are coerced to
    /// length 4 on AArch64. Fails with `DuplicateHardwareBreakpoint` when
    /// the `(tid, address)` pair is already registered and with
    /// `ResourceExhausted` when the thread has no free slot; existing
    /// entries stay intact and armed in both cases.
    pub fn register_hw_breakpoint(&mut self, tid: Tid, address: Address, kind: WatchKind, length: u8) -> Result<()>
    {
        if self.hw_breakpoints.contains(tid, address) {
            return Err(QuarryError::DuplicateHardwareBreakpoint { tid, address });
        }

        let mut breakpoint = HardwareBreakpoint {
            address,
            tid,
            kind,
            length,
            enabled: true,
        };
        Native::install_hw_breakpoint(&mut breakpoint)?;

        self.hw_breakpoints.insert(breakpoint);
        Ok(())
    }

    /// Drop a hardware breakpoint, clearing its slot if it was enabled.
    ///
    /// A no-op if no record exists for the pair.
    pub fn unregister_hw_breakpoint(&mut self, tid: Tid, address: Address) -> Result<()>
    {
        if let Some(breakpoint) = self.hw_breakpoints.remove(tid, address) {
            if breakpoint.enabled {
                Native::remove_hw_breakpoint(&breakpoint)?;
            }
        }
        Ok(())
    }

    /// Re-program the slot for a disabled hardware breakpoint.
    pub fn enable_hw_breakpoint(&mut self, tid: Tid, address: Address) -> Result<()>
    {
        let breakpoint = self
            .hw_breakpoints
            .find_mut(tid, address)
            .ok_or(QuarryError::NoBreakpoint(address))?;
        if !breakpoint.enabled {
            Native::install_hw_breakpoint(breakpoint)?;
        }
        breakpoint.enabled = true;
        Ok(())
    }

    /// Clear the slot for a hardware breakpoint without dropping the record.
    pub fn disable_hw_breakpoint(&mut self, tid: Tid, address: Address) -> Result<()>
    {
        let breakpoint = self
            .hw_breakpoints
            .find_mut(tid, address)
            .ok_or(QuarryError::NoBreakpoint(address))?;
        if breakpoint.enabled {
            Native::remove_hw_breakpoint(breakpoint)?;
        }
        breakpoint.enabled = false;
        Ok(())
    }

    /// The address of the hardware breakpoint responsible for a thread's
    /// current stop, if any.
    pub fn hit_hw_breakpoint(&self, tid: Tid) -> Option<Address>
    {
        self.hw_breakpoints
            .entries()
            .iter()
            .find(|breakpoint| breakpoint.tid == tid && Native::hw_breakpoint_hit(breakpoint))
            .map(|breakpoint| breakpoint.address)
    }

    /// Free execute slots remaining on a thread.
    pub fn remaining_hw_breakpoint_count(&self, tid: Tid) -> Result<u32>
    {
        Native::remaining_hw_breakpoint_slots(tid)
    }

    /// Free data (watchpoint) slots remaining on a thread.
    ///
    /// On x86-64 this is the same pool as the breakpoint slots.
    pub fn remaining_hw_watchpoint_count(&self, tid: Tid) -> Result<u32>
    {
        Native::remaining_hw_watchpoint_slots(tid)
    }

    // ------------------------------------------------------------------
    // stop/resume protocol
    // ------------------------------------------------------------------

    /// Make the tracee safe to resume.
    ///
    /// Performs the fixed pre-resume sequence (register flush, breakpoint
    /// step-over with the SIGSTOP-delivery re-step, the AArch64 hardware
    /// lift-step-reinstall pass, patch installation) and returns the last
    /// wait status reaped while stepping threads over breakpoints (zero if
    /// none was).
    pub fn prepare_for_run(&mut self) -> Result<WaitStatus>
    {
        let mut status = WaitStatus::default();

        for thread in self.threads.iter_mut() {
            if let Err(err) = Native::set_regs(thread.tid, &mut thread.regs) {
                tracing::warn!("register flush failed for thread {}: {err}", thread.tid);
            }
        }

        // step every thread parked on a breakpoint address past it while the
        // original bytes are still in place
        for thread in self.threads.iter() {
            let ip = Address::new(thread.regs().instruction_pointer());
            if !self.sw_breakpoints.contains(ip) {
                continue;
            }

            ptrace::single_step(thread.tid(), 0)?;
            status = ptrace::wait_thread(thread.tid())?;

            // a bare SIGSTOP here means the step raced a pending group-stop;
            // one more step reaches the trap we expected
            if status == WaitStatus::SIGSTOP_DELIVERY {
                ptrace::single_step(thread.tid(), 0)?;
                status = ptrace::wait_thread(thread.tid())?;
            }
        }

        if Native::STEP_OVER_HIT_HW_ON_RESUME {
            for thread in self.threads.iter() {
                let tid = thread.tid();
                let hit = self
                    .hw_breakpoints
                    .entries()
                    .iter()
                    .position(|bp| bp.tid == tid && bp.enabled && Native::hw_breakpoint_hit(bp));
                let index = match hit {
                    Some(index) => index,
                    None => continue,
                };

                if let Err(err) = Native::remove_hw_breakpoint(&self.hw_breakpoints.entries()[index]) {
                    tracing::warn!("could not lift hardware breakpoint for thread {tid}: {err}");
                    continue;
                }
                ptrace::single_step(tid, 0)?;
                status = ptrace::wait_thread(tid)?;
                if let Err(err) = Native::install_hw_breakpoint(&mut self.hw_breakpoints.entries_mut()[index]) {
                    tracing::warn!("could not reinstall hardware breakpoint for thread {tid}: {err}");
                }
            }
        }

        // arm every enabled patch
        for breakpoint in self.sw_breakpoints.iter() {
            if breakpoint.enabled {
                if let Err(err) = ptrace::poke_data(self.pid, breakpoint.address.value(), breakpoint.patched) {
                    tracing::warn!("could not arm breakpoint at {}: {err}", breakpoint.address);
                }
            }
        }

        Ok(status)
    }

    /// Resume every live thread, forwarding each thread's pending signal.
    ///
    /// Runs [`DebugSession::prepare_for_run`] first and returns its status.
    /// Threads resume with a syscall-stopping continue when syscall tracing
    /// is enabled, a plain continue otherwise.
    pub fn continue_all(&mut self) -> Result<WaitStatus>
    {
        let status = self.prepare_for_run()?;

        let stop_at_syscalls = self.syscall_tracing;
        for thread in self.threads.iter_mut() {
            if let Err(err) = ptrace::resume(thread.tid, stop_at_syscalls, thread.signal_to_forward) {
                tracing::warn!(
                    "continue failed for thread {} with signal {}: {err}",
                    thread.tid,
                    thread.signal_to_forward
                );
            }
            thread.signal_to_forward = 0;
        }

        Ok(status)
    }

    /// Block until the tracee stops, then bring every thread to a stop and
    /// refresh the whole mirror.
    ///
    /// Waits on the tracee's process group for the first status, force-stops
    /// every sibling that is still running (a targeted SIGSTOP, reaped
    /// per-thread), drains any other statuses that are already pending
    /// without blocking, refreshes every register cache, and restores the
    /// original bytes under every enabled software breakpoint.
    ///
    /// Returns the reaped `(tid, status)` chain, most recently reaped first.
    pub fn wait_all_and_update_regs(&mut self) -> Result<Vec<ThreadStatus>>
    {
        let first = ptrace::wait_process_group(self.pid)?;
        let mut chain = vec![first];

        // every sibling that still has running registers gets stopped and
        // reaped; an up-front register fetch doubling as the "already
        // stopped" probe
        let pid = self.pid;
        for thread in self.threads.iter_mut() {
            if thread.tid == first.tid {
                continue;
            }
            if Native::get_regs(thread.tid, &mut thread.regs).is_ok() {
                continue;
            }
            if let Err(err) = ptrace::tgkill(pid, thread.tid, libc::SIGSTOP) {
                tracing::warn!("could not interrupt thread {}: {err}", thread.tid);
                continue;
            }
            match ptrace::wait_thread(thread.tid) {
                Ok(status) => chain.insert(
                    0,
                    ThreadStatus {
                        tid: thread.tid,
                        status,
                    },
                ),
                Err(err) => tracing::warn!("could not reap thread {}: {err}", thread.tid),
            }
        }

        while let Some(pending) = ptrace::try_wait_process_group(self.pid) {
            chain.insert(0, pending);
        }

        for thread in self.threads.iter_mut() {
            let _ = Native::get_regs(thread.tid, &mut thread.regs);
        }

        // the tracee is stopped: put the pristine bytes back
        for breakpoint in self.sw_breakpoints.iter() {
            if breakpoint.enabled {
                if let Err(err) = ptrace::poke_data(self.pid, breakpoint.address.value(), breakpoint.original) {
                    tracing::warn!("could not restore original bytes at {}: {err}", breakpoint.address);
                }
            }
        }

        Ok(chain)
    }

    /// Execute one instruction on a thread.
    ///
    /// Flushes every register mirror first and forwards (then clears) the
    /// thread's pending signal. On AArch64, a thread stopped on one of its
    /// enabled hardware breakpoints has the slot lifted around the step.
    /// The resulting trap is left for the caller to reap.
    pub fn single_step(&mut self, tid: Tid) -> Result<()>
    {
        let mut signal = 0;
        for thread in self.threads.iter_mut() {
            if let Err(err) = Native::set_regs(thread.tid, &mut thread.regs) {
                tracing::warn!("register flush failed for thread {}: {err}", thread.tid);
            }
            if thread.tid == tid {
                signal = thread.signal_to_forward;
                thread.signal_to_forward = 0;
            }
        }

        if Native::STEP_OVER_HIT_HW_ON_RESUME {
            let hit = self
                .hw_breakpoints
                .entries()
                .iter()
                .position(|bp| bp.tid == tid && bp.enabled && Native::hw_breakpoint_hit(bp));
            if let Some(index) = hit {
                if let Err(err) = Native::remove_hw_breakpoint(&self.hw_breakpoints.entries()[index]) {
                    tracing::warn!("could not lift hardware breakpoint for thread {tid}: {err}");
                }
                let outcome = ptrace::single_step(tid, signal);
                if let Err(err) = Native::install_hw_breakpoint(&mut self.hw_breakpoints.entries_mut()[index]) {
                    tracing::warn!("could not reinstall hardware breakpoint for thread {tid}: {err}");
                }
                return outcome;
            }
        }

        ptrace::single_step(tid, signal)
    }

    /// Step a thread until its PC reaches `address` or the budget runs out.
    ///
    /// `max_steps: None` steps without bound. A step that leaves the PC
    /// unchanged is a hardware-breakpoint retry and does not consume
    /// budget.
    pub fn step_until(&mut self, tid: Tid, address: Address, max_steps: Option<usize>) -> Result<()>
    {
        for thread in self.threads.iter_mut() {
            if let Err(err) = Native::set_regs(thread.tid, &mut thread.regs) {
                tracing::warn!("register flush failed for thread {}: {err}", thread.tid);
            }
        }
        if self.threads.get(tid).is_none() {
            return Err(QuarryError::ThreadNotFound(tid));
        }

        let mut taken = 0;
        loop {
            if let Some(limit) = max_steps {
                if taken >= limit {
                    break;
                }
            }

            ptrace::single_step(tid, 0)?;
            ptrace::wait_thread(tid)?;

            let thread = self.threads.get_mut(tid).ok_or(QuarryError::ThreadNotFound(tid))?;
            let previous = thread.regs().instruction_pointer();
            Native::get_regs(tid, &mut thread.regs)?;
            let current = thread.regs().instruction_pointer();

            if current == address.value() {
                break;
            }
            if current == previous {
                // the step refired a hardware breakpoint; retry for free
                continue;
            }
            taken += 1;
        }

        Ok(())
    }

    /// Step out of the current function (stepping-finish).
    ///
    /// Single-steps the thread while tracking call depth: calls increment a
    /// nesting counter that starts at 1, returns decrement it. When it
    /// reaches zero the thread sits on the function's return instruction
    /// and one final step lands in the caller. The walk ends early, with
    /// the counter frozen, when a step leaves the PC unchanged (a
    /// hardware-breakpoint retry) or lands on a software trap byte; those
    /// stops belong to the caller's breakpoint handling.
    ///
    /// The original bytes under every enabled software breakpoint are
    /// restored on the way out regardless of which path ended the walk.
    /// Recognition of calls and returns is best-effort (common encodings
    /// only), so stepping out of hand-rolled assembly may end early.
    pub fn step_out(&mut self, tid: Tid) -> Result<()>
    {
        self.prepare_for_run()?;
        if self.threads.get(tid).is_none() {
            return Err(QuarryError::ThreadNotFound(tid));
        }

        let outcome = self.step_out_walk(tid);

        for breakpoint in self.sw_breakpoints.iter() {
            if breakpoint.enabled {
                if let Err(err) = ptrace::poke_data(self.pid, breakpoint.address.value(), breakpoint.original) {
                    tracing::warn!("could not restore original bytes at {}: {err}", breakpoint.address);
                }
            }
        }

        outcome
    }

    fn step_out_walk(&mut self, tid: Tid) -> Result<()>
    {
        let pid = self.pid;
        let mut nested_calls: i64 = 1;

        loop {
            ptrace::single_step(tid, 0)?;
            ptrace::wait_thread(tid)?;

            let thread = self.threads.get_mut(tid).ok_or(QuarryError::ThreadNotFound(tid))?;
            let previous = thread.regs().instruction_pointer();
            Native::get_regs(tid, &mut thread.regs)?;
            let current = thread.regs().instruction_pointer();

            let window = memory::peek_data(pid, Address::new(current))?;

            if current == previous || Native::is_software_trap(window) {
                return Ok(());
            }

            if Native::is_call(window) {
                nested_calls += 1;
            } else if Native::is_ret(window) {
                nested_calls -= 1;
            }

            if nested_calls == 0 {
                break;
            }
        }

        // sitting on the return instruction; land after it
        ptrace::single_step(tid, 0)?;
        ptrace::wait_thread(tid)?;
        let thread = self.threads.get_mut(tid).ok_or(QuarryError::ThreadNotFound(tid))?;
        Native::get_regs(tid, &mut thread.regs)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // memory and events
    // ------------------------------------------------------------------

    /// Read one word of tracee memory.
    pub fn peek_data(&self, address: Address) -> Result<u64>
    {
        memory::peek_data(self.pid, address)
    }

    /// Write one word of tracee memory.
    pub fn poke_data(&mut self, address: Address, word: u64) -> Result<()>
    {
        memory::poke_data(self.pid, address, word)
    }

    /// Read one word from a thread's user area.
    pub fn peek_user(&self, tid: Tid, offset: u64) -> Result<u64>
    {
        memory::peek_user(tid, offset)
    }

    /// Write one word into a thread's user area.
    pub fn poke_user(&mut self, tid: Tid, offset: u64, word: u64) -> Result<()>
    {
        memory::poke_user(tid, offset, word)
    }

    /// The message attached to the current trace event (for clone events,
    /// the new thread's tid).
    pub fn event_message(&self) -> Result<u64>
    {
        ptrace::get_event_msg(self.pid)
    }

    /// The signal information describing a thread's current stop.
    pub fn stop_signal_info(&self, tid: Tid) -> Result<libc::siginfo_t>
    {
        ptrace::get_siginfo(tid)
    }

    // ------------------------------------------------------------------
    // teardown
    // ------------------------------------------------------------------

    /// Detach from every thread and kill the tracee.
    ///
    /// Threads are walked head to tail so the main thread goes last. Each
    /// thread that is still running (probed with a register read) is
    /// stopped first; it is then detached and killed, and the process is
    /// reaped at the end. Failures on individual threads are logged and the
    /// walk continues.
    pub fn detach_for_kill(mut self)
    {
        let pid = self.pid;
        for thread in self.threads.iter_mut() {
            // a failing register read means the thread is still running
            if Native::get_regs(thread.tid, &mut thread.regs).is_err() {
                let _ = ptrace::tgkill(pid, thread.tid, libc::SIGSTOP);
                let _ = ptrace::wait_thread(thread.tid);
            }

            if let Err(err) = ptrace::detach(thread.tid) {
                tracing::warn!("detach failed for thread {}: {err}", thread.tid);
            }

            let _ = ptrace::tgkill(pid, thread.tid, libc::SIGKILL);
        }

        let _ = ptrace::wait_thread(pid.main_thread());
    }

    /// Detach from every thread, leaving the tracee frozen for hand-off to
    /// another debugger.
    ///
    /// Every thread gets its (possibly caller-modified) register mirror
    /// written back, stopping it first if the write is refused, then a
    /// SIGSTOP so it cannot run during the other debugger's attach, then a
    /// detach. The main thread is processed last. The session stays usable
    /// for a later [`DebugSession::reattach_from_gdb`].
    pub fn detach_for_migration(&mut self)
    {
        let pid = self.pid;
        for thread in self.threads.iter_mut() {
            // the caller may have modified the mirrors, so the probe doubles
            // as the flush
            if Native::set_regs(thread.tid, &mut thread.regs).is_err() {
                let _ = ptrace::tgkill(pid, thread.tid, libc::SIGSTOP);
                let _ = ptrace::wait_thread(thread.tid);
                if let Err(err) = Native::set_regs(thread.tid, &mut thread.regs) {
                    tracing::warn!("register flush failed for thread {}: {err}", thread.tid);
                }
            }

            // keep the thread frozen across the reattachment window
            let _ = ptrace::tgkill(pid, thread.tid, libc::SIGSTOP);

            if let Err(err) = ptrace::detach(thread.tid) {
                tracing::warn!("detach failed for thread {}: {err}", thread.tid);
            }
        }
    }

    /// Reattach after a migration hand-off ended.
    ///
    /// Attaches every registered thread again (main thread last), reaps the
    /// attach stops and refreshes the register mirrors.
    pub fn reattach_from_gdb(&mut self)
    {
        for thread in self.threads.iter_mut() {
            if let Err(err) = ptrace::attach(thread.tid) {
                tracing::warn!("attach failed for thread {}: {err}", thread.tid);
                continue;
            }
            let _ = ptrace::wait_thread(thread.tid);
            if let Err(err) = Native::get_regs(thread.tid, &mut thread.regs) {
                tracing::warn!("register fetch failed for thread {}: {err}", thread.tid);
            }
        }
    }

    /// Detach from every thread and let the tracee run on.
    ///
    /// Performs the migration detach (which leaves the tracee stopped) and
    /// then delivers a process-wide SIGCONT.
    pub fn detach_and_continue(&mut self)
    {
        self.detach_for_migration();
        let _ = ptrace::kill_process(self.pid, libc::SIGCONT);
    }
}
