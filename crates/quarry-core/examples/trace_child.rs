//! Minimal end-to-end demo: launch a program under trace, forward its
//! signals, and report every stop until it exits.
//!
//! ```text
//! cargo run --example trace_child -- /bin/ls /tmp
//! ```

use quarry_core::prelude::*;

fn main() -> quarry_core::Result<()>
{
    let _ = quarry_utils::init_logging();

    let mut args = std::env::args().skip(1);
    let program = args.next().unwrap_or_else(|| "/bin/true".to_string());
    let rest: Vec<String> = args.collect();
    let argv: Vec<&str> = rest.iter().map(String::as_str).collect();

    let mut session = DebugSession::launch(&program, &argv)?;
    let main_tid = session.pid().main_thread();
    tracing::info!("launched {program} as pid {}", session.pid());

    loop {
        session.continue_all()?;
        let chain = session.wait_all_and_update_regs()?;

        let mut done = false;
        for entry in &chain {
            if let Some(code) = entry.status.exit_status() {
                tracing::info!("thread {} exited with status {code}", entry.tid);
                done = entry.tid == main_tid || done;
            } else if let Some(event) = entry.status.trace_event() {
                tracing::info!("thread {} reported {event:?}", entry.tid);
            } else if let Some(signal) = entry.status.stop_signal() {
                tracing::info!(
                    "thread {} stopped by signal {signal} at {}",
                    entry.tid,
                    Address::new(session.regs(entry.tid).map(|regs| regs.instruction_pointer()).unwrap_or(0))
                );
                // hand anything that is not our own trap back to the tracee
                if signal != libc::SIGTRAP && signal != libc::SIGSTOP {
                    let _ = session.set_pending_signal(entry.tid, signal);
                }
            }
        }

        if done {
            break;
        }
    }

    Ok(())
}
