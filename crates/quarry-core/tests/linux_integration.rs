//! End-to-end tests against live tracees.
//!
//! Each test spawns one of the example fixture binaries (built by `cargo
//! test` alongside the tests), which prints whatever address the scenario
//! needs and then blocks on stdin until the test releases it. Every fixture
//! moves itself into its own process group, so concurrently running tests
//! never reap each other's children.
//!
//! The tests play the role of the status-handling layer above the core: in
//! particular, after an x86-64 trap they rewind the cached PC onto the
//! breakpoint address before resuming, exactly as a frontend would.

#![cfg(target_os = "linux")]

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;

use quarry_core::prelude::*;

/// Path of a fixture binary built from `examples/`.
fn target_path(name: &str) -> PathBuf
{
    let mut path = std::env::current_exe().expect("test binary path");
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("examples");
    path.push(name);
    path
}

/// A spawned fixture, killed on drop so a failing test never leaks it.
struct TargetProcess
{
    child: Child,
    stdout: BufReader<ChildStdout>,
}

impl TargetProcess
{
    fn spawn(name: &str) -> Self
    {
        let mut child = Command::new(target_path(name))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("spawn fixture");
        let stdout = BufReader::new(child.stdout.take().expect("fixture stdout"));
        TargetProcess { child, stdout }
    }

    fn pid(&self) -> Pid
    {
        Pid::from(self.child.id())
    }

    fn main_tid(&self) -> Tid
    {
        self.pid().main_thread()
    }

    fn read_line(&mut self) -> String
    {
        let mut line = String::new();
        self.stdout.read_line(&mut line).expect("fixture output");
        line.trim().to_string()
    }

    fn read_address(&mut self) -> Address
    {
        let line = self.read_line();
        let raw = u64::from_str_radix(line.trim_start_matches("0x"), 16).expect("address line");
        Address::new(raw)
    }

    /// Unblock the fixture's stdin read.
    fn release(&mut self)
    {
        let stdin = self.child.stdin.as_mut().expect("fixture stdin");
        stdin.write_all(b"go\n").expect("release fixture");
        stdin.flush().expect("release fixture");
    }

    fn is_alive(&self) -> bool
    {
        unsafe { libc::kill(self.child.id() as i32, 0) == 0 }
    }
}

impl Drop for TargetProcess
{
    fn drop(&mut self)
    {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Where execution stopped, as a frontend would compute it: the x86-64 trap
/// reports the instruction after the patch byte, AArch64 reports the
/// breakpoint address itself.
fn breakpoint_hit_address(regs: &GpRegisters) -> Address
{
    #[cfg(target_arch = "x86_64")]
    {
        Address::new(regs.instruction_pointer() - 1)
    }
    #[cfg(target_arch = "aarch64")]
    {
        Address::new(regs.instruction_pointer())
    }
}

#[test]
fn software_breakpoint_stops_repeatedly_then_runs_to_exit()
{
    let _ = quarry_utils::init_logging();

    let mut target = TargetProcess::spawn("breakpoint_loop");
    let entry = target.read_address();
    let tid = target.main_tid();

    let mut session = DebugSession::attach(target.pid()).expect("attach");
    session.register_breakpoint(entry).expect("register breakpoint");
    session.continue_all().expect("continue");
    target.release();

    for round in 0..10 {
        let chain = session.wait_all_and_update_regs().expect("wait");
        let stop = chain.iter().find(|entry| entry.tid == tid).expect("main thread status");
        assert!(stop.status.is_stopped(), "round {round}: unexpected status {stop:?}");
        assert_eq!(stop.status.stop_signal(), Some(libc::SIGTRAP), "round {round}");

        // while stopped, memory shows the pristine instruction
        let word = session.peek_data(entry).expect("peek at breakpoint");
        let record = session.software_breakpoints().find(entry).expect("record");
        assert_eq!(word, record.original, "round {round}: patched bytes visible while stopped");

        assert_eq!(breakpoint_hit_address(session.regs(tid).expect("regs")), entry, "round {round}");
        session.regs_mut(tid).expect("regs").set_instruction_pointer(entry.value());

        if round == 9 {
            session.unregister_breakpoint(entry);
        }
        session.continue_all().expect("continue");
    }

    let chain = session.wait_all_and_update_regs().expect("final wait");
    let exit = chain.iter().find(|entry| entry.tid == tid).expect("exit status");
    assert!(exit.status.is_exited(), "expected clean exit, got {exit:?}");
    assert_eq!(exit.status.exit_status(), Some(0));
}

#[test]
fn software_breakpoint_registration_is_idempotent()
{
    let _ = quarry_utils::init_logging();

    let mut target = TargetProcess::spawn("breakpoint_loop");
    let entry = target.read_address();

    let mut session = DebugSession::attach(target.pid()).expect("attach");
    session.register_breakpoint(entry).expect("first registration");
    session.disable_breakpoint(entry).expect("disable");
    session.register_breakpoint(entry).expect("second registration");

    assert_eq!(session.software_breakpoints().len(), 1);
    assert!(session.software_breakpoints().find(entry).expect("record").enabled);

    // unregister of a never-registered address is a no-op
    session.unregister_breakpoint(entry + 0x10);
    assert_eq!(session.software_breakpoints().len(), 1);

    session.detach_for_kill();
}

#[test]
fn hardware_watchpoint_reports_write()
{
    let _ = quarry_utils::init_logging();

    let mut target = TargetProcess::spawn("watch_target");
    let variable = target.read_address();
    let tid = target.main_tid();

    let mut session = DebugSession::attach(target.pid()).expect("attach");
    session
        .register_hw_breakpoint(tid, variable, WatchKind::Write, 8)
        .expect("register watchpoint");

    session.continue_all().expect("continue");
    target.release();

    let chain = session.wait_all_and_update_regs().expect("wait");
    let stop = chain.iter().find(|entry| entry.tid == tid).expect("main thread status");
    assert_eq!(stop.status.stop_signal(), Some(libc::SIGTRAP));

    let info = session.stop_signal_info(tid).expect("siginfo");
    assert_eq!(info.si_signo, libc::SIGTRAP);
    assert_eq!(info.si_code, 4, "expected TRAP_HWBKPT");

    assert_eq!(session.hit_hw_breakpoint(tid), Some(variable));

    // the write itself went through
    assert_eq!(session.peek_data(variable).expect("peek watched"), 42);

    session.detach_for_kill();
}

#[test]
fn step_out_returns_to_caller_frame()
{
    let _ = quarry_utils::init_logging();

    let mut target = TargetProcess::spawn("call_chain");
    let outer = target.read_address();
    let tid = target.main_tid();

    let mut session = DebugSession::attach(target.pid()).expect("attach");
    session.register_breakpoint(outer).expect("register breakpoint");
    session.continue_all().expect("continue");
    target.release();

    let chain = session.wait_all_and_update_regs().expect("wait");
    let stop = chain.iter().find(|entry| entry.tid == tid).expect("main thread status");
    assert_eq!(stop.status.stop_signal(), Some(libc::SIGTRAP));
    assert_eq!(breakpoint_hit_address(session.regs(tid).expect("regs")), outer);

    session.regs_mut(tid).expect("regs").set_instruction_pointer(outer.value());
    let entry_sp = session.regs(tid).expect("regs").stack_pointer();
    let entry_pc = session.regs(tid).expect("regs").instruction_pointer();

    session.step_out(tid).expect("step out");

    let regs = session.regs(tid).expect("regs");
    assert_ne!(regs.instruction_pointer(), entry_pc, "step-out made no progress");
    // back in the caller: on x86-64 the return address has been popped; on
    // AArch64 it lived in x30, so the stack pointer is merely restored
    #[cfg(target_arch = "x86_64")]
    assert!(
        regs.stack_pointer() > entry_sp,
        "expected the callee frame to be gone: sp {:#x} vs entry {:#x}",
        regs.stack_pointer(),
        entry_sp
    );
    #[cfg(target_arch = "aarch64")]
    assert!(
        regs.stack_pointer() >= entry_sp,
        "expected the callee frame to be gone: sp {:#x} vs entry {:#x}",
        regs.stack_pointer(),
        entry_sp
    );

    session.detach_for_kill();
}

#[test]
fn multithreaded_stop_synchronizes_all_threads()
{
    let _ = quarry_utils::init_logging();

    let mut target = TargetProcess::spawn("spin_threads");
    let tids: Vec<Tid> = target
        .read_line()
        .split_whitespace()
        .map(|raw| Tid(raw.parse().expect("tid line")))
        .collect();
    assert_eq!(tids.len(), 4, "fixture reports four tids");
    assert_eq!(tids[0], target.main_tid());

    let mut session = DebugSession::attach(target.pid()).expect("attach");
    for tid in &tids[1..] {
        session.attach_existing_thread(*tid).expect("attach worker");
    }
    assert_eq!(session.threads().len(), 4);

    session.continue_all().expect("continue");
    std::thread::sleep(Duration::from_millis(100));

    // force a stop; the wait path must then bring every sibling to a stop
    unsafe {
        libc::kill(target.pid().raw(), libc::SIGSTOP);
    }

    let chain = session.wait_all_and_update_regs().expect("wait");
    assert_eq!(chain.len(), 4, "one status per thread: {chain:?}");

    let mut reaped: Vec<i32> = chain.iter().map(|entry| entry.tid.raw()).collect();
    reaped.sort_unstable();
    let mut expected: Vec<i32> = tids.iter().map(|tid| tid.raw()).collect();
    expected.sort_unstable();
    assert_eq!(reaped, expected);

    for entry in &chain {
        assert!(entry.status.is_stopped(), "thread {} not stopped: {entry:?}", entry.tid);
    }
    for tid in &tids {
        let regs = session.regs(*tid).expect("cached regs");
        assert_ne!(regs.instruction_pointer(), 0, "thread {tid} cache not populated");
        assert_ne!(regs.stack_pointer(), 0, "thread {tid} cache not populated");
    }

    session.detach_for_kill();
}

#[test]
fn migration_handoff_and_reattach()
{
    let _ = quarry_utils::init_logging();

    let mut target = TargetProcess::spawn("breakpoint_loop");
    let entry = target.read_address();
    let tid = target.main_tid();

    let mut session = DebugSession::attach(target.pid()).expect("attach");
    session.register_breakpoint(entry).expect("register breakpoint");

    session.detach_for_migration();
    assert!(target.is_alive(), "tracee must survive the handoff");

    // the other debugger's side of the handoff: attach every tid and read
    // its registers
    session.reattach_from_gdb();
    let regs = session.regs(tid).expect("regs after reattach");
    assert_ne!(regs.stack_pointer(), 0);
    assert_ne!(regs.instruction_pointer(), 0);

    session.detach_and_continue();
    std::thread::sleep(Duration::from_millis(50));
    assert!(target.is_alive(), "tracee resumes after SIGCONT");
}

#[cfg(target_arch = "x86_64")]
#[test]
fn debug_slot_exhaustion_leaves_existing_entries_intact()
{
    let _ = quarry_utils::init_logging();

    let mut target = TargetProcess::spawn("breakpoint_loop");
    let _ = target.read_address();
    let tid = target.main_tid();

    let mut session = DebugSession::attach(target.pid()).expect("attach");
    assert_eq!(session.remaining_hw_breakpoint_count(tid).expect("count"), 4);

    let base = 0x7000_0000u64;
    for slot in 0..4u64 {
        session
            .register_hw_breakpoint(tid, Address::new(base + 0x10 * slot), WatchKind::Execute, 1)
            .expect("register within capacity");
    }
    assert_eq!(session.remaining_hw_breakpoint_count(tid).expect("count"), 0);
    // the four slots are shared with watchpoints on x86-64
    assert_eq!(session.remaining_hw_watchpoint_count(tid).expect("count"), 0);

    let err = session
        .register_hw_breakpoint(tid, Address::new(base + 0x100), WatchKind::Execute, 1)
        .expect_err("fifth registration must fail");
    assert!(
        matches!(err, QuarryError::ResourceExhausted(_)),
        "unexpected error: {err}"
    );

    // the first four survive, armed
    assert_eq!(session.hardware_breakpoints().len(), 4);
    for slot in 0..4u64 {
        let record = session
            .hardware_breakpoints()
            .find(tid, Address::new(base + 0x10 * slot))
            .expect("record intact");
        assert!(record.enabled);
    }

    // a duplicate registration is rejected up front
    let err = session
        .register_hw_breakpoint(tid, Address::new(base), WatchKind::Execute, 1)
        .expect_err("duplicate registration must fail");
    assert!(matches!(err, QuarryError::DuplicateHardwareBreakpoint { .. }));

    for slot in 0..4u64 {
        session
            .unregister_hw_breakpoint(tid, Address::new(base + 0x10 * slot))
            .expect("unregister");
    }
    assert_eq!(session.remaining_hw_breakpoint_count(tid).expect("count"), 4);

    session.detach_for_kill();
}

#[test]
fn launch_runs_program_to_exit()
{
    let _ = quarry_utils::init_logging();

    let mut session = DebugSession::launch("/bin/true", &[]).expect("launch");
    let tid = session.pid().main_thread();

    loop {
        session.continue_all().expect("continue");
        let chain = session.wait_all_and_update_regs().expect("wait");
        if let Some(exit) = chain.iter().find(|entry| entry.tid == tid && entry.status.is_exited()) {
            assert_eq!(exit.status.exit_status(), Some(0));
            break;
        }
    }
}

#[test]
fn register_roundtrip_through_the_kernel()
{
    let _ = quarry_utils::init_logging();

    let mut target = TargetProcess::spawn("breakpoint_loop");
    let _ = target.read_address();
    let tid = target.main_tid();

    let mut session = DebugSession::attach(target.pid()).expect("attach");

    // mutate a scratch register in the mirror, flush it via a single step,
    // and read it back from the kernel
    #[cfg(target_arch = "x86_64")]
    {
        session.regs_mut(tid).expect("regs").r15 = 0x1234_5678_9abc_def0;
    }
    #[cfg(target_arch = "aarch64")]
    {
        session.regs_mut(tid).expect("regs").regs[15] = 0x1234_5678_9abc_def0;
    }

    // unblock the fixture's pending read first: a thread parked in a
    // syscall only reports the step trap once it returns to user space
    target.release();
    session.single_step(tid).expect("step");

    // reap the step trap and refresh the mirror
    let chain = session.wait_all_and_update_regs().expect("wait");
    assert!(chain[0].status.is_stopped());

    #[cfg(target_arch = "x86_64")]
    assert_eq!(session.regs(tid).expect("regs").r15, 0x1234_5678_9abc_def0);
    #[cfg(target_arch = "aarch64")]
    assert_eq!(session.regs(tid).expect("regs").regs[15], 0x1234_5678_9abc_def0);

    session.detach_for_kill();
}

#[test]
fn fp_registers_fetch_and_flush()
{
    let _ = quarry_utils::init_logging();

    let mut target = TargetProcess::spawn("breakpoint_loop");
    let _ = target.read_address();
    let tid = target.main_tid();

    let mut session = DebugSession::attach(target.pid()).expect("attach");

    session.fetch_fp_regs(tid).expect("fetch fp state");
    session.flush_fp_regs(tid).expect("flush fp state");

    session.detach_for_kill();
}
