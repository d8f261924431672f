//! Tests for the core value types

use quarry_core::types::{Address, Pid, Tid, TraceEvent, WaitStatus};

#[test]
fn test_address_value_roundtrip()
{
    let addr = Address::from(0x7fff_dead_beef);
    assert_eq!(addr.value(), 0x7fff_dead_beef);
    assert_eq!(u64::from(addr), 0x7fff_dead_beef);
}

#[test]
fn test_address_arithmetic()
{
    let addr = Address::new(0x1000);
    assert_eq!((addr + 0x100).value(), 0x1100);
    assert_eq!((addr - 0x100).value(), 0xf00);
    assert_eq!(addr.checked_add(0x100), Some(Address::new(0x1100)));
    assert_eq!(addr.checked_add(u64::MAX), None);
    assert_eq!(addr.checked_sub(0x2000), None);
}

#[test]
fn test_address_ordering()
{
    assert!(Address::new(0x1000) < Address::new(0x2000));
    assert_eq!(Address::ZERO, Address::new(0));
}

#[test]
fn test_address_display()
{
    assert_eq!(Address::new(0x1234).to_string(), "0x0000000000001234");
}

#[test]
fn test_pid_main_thread()
{
    let pid = Pid::from(4321);
    assert_eq!(pid.main_thread(), Tid(4321));
    assert_eq!(pid.raw(), 4321);
}

#[test]
fn test_pid_from_u32()
{
    let pid = Pid::from(1234u32);
    assert_eq!(pid.raw(), 1234);
}

#[test]
fn test_wait_status_sigstop_delivery_sentinel()
{
    // 4991 is WIFSTOPPED with WSTOPSIG == SIGSTOP
    let status = WaitStatus::SIGSTOP_DELIVERY;
    assert_eq!(status.raw(), 4991);
    assert!(status.is_stopped());
    assert_eq!(status.stop_signal(), Some(libc::SIGSTOP));
    assert!(!status.is_exited());
    assert!(!status.is_signaled());
}

#[test]
fn test_wait_status_exit()
{
    let clean = WaitStatus::from(0);
    assert!(clean.is_exited());
    assert_eq!(clean.exit_status(), Some(0));

    let code_seven = WaitStatus::from(7 << 8);
    assert!(code_seven.is_exited());
    assert_eq!(code_seven.exit_status(), Some(7));
    assert_eq!(code_seven.stop_signal(), None);
}

#[test]
fn test_wait_status_termination_by_signal()
{
    let killed = WaitStatus::from(libc::SIGKILL);
    assert!(killed.is_signaled());
    assert_eq!(killed.term_signal(), Some(libc::SIGKILL));
    assert!(!killed.is_exited());
    assert!(!killed.is_stopped());
}

#[test]
fn test_wait_status_sigtrap_stop()
{
    let trapped = WaitStatus::from((libc::SIGTRAP << 8) | 0x7f);
    assert!(trapped.is_stopped());
    assert_eq!(trapped.stop_signal(), Some(libc::SIGTRAP));
    assert!(!trapped.is_syscall_trap());
    assert_eq!(trapped.trace_event(), None);
}

#[test]
fn test_wait_status_syscall_trap()
{
    let status = WaitStatus::from(((libc::SIGTRAP | 0x80) << 8) | 0x7f);
    assert!(status.is_stopped());
    assert!(status.is_syscall_trap());
}

#[test]
fn test_wait_status_trace_events()
{
    let clone = WaitStatus::from((libc::PTRACE_EVENT_CLONE << 16) | (libc::SIGTRAP << 8) | 0x7f);
    assert_eq!(clone.trace_event(), Some(TraceEvent::Clone));

    let exec = WaitStatus::from((libc::PTRACE_EVENT_EXEC << 16) | (libc::SIGTRAP << 8) | 0x7f);
    assert_eq!(exec.trace_event(), Some(TraceEvent::Exec));

    let exit = WaitStatus::from((libc::PTRACE_EVENT_EXIT << 16) | (libc::SIGTRAP << 8) | 0x7f);
    assert_eq!(exit.trace_event(), Some(TraceEvent::Exit));

    // a plain SIGSTOP stop is not an event
    assert_eq!(WaitStatus::SIGSTOP_DELIVERY.trace_event(), None);
}
