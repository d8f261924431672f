//! Tracee fixture: calls a known function in a tight loop.
//!
//! Prints the function's address, waits for a line on stdin, then runs the
//! loop to completion. A debugger on the other end plants a breakpoint at
//! the printed address before releasing the loop.

use std::io::{self, BufRead, Write};

#[inline(never)]
fn tally(value: u64) -> u64
{
    std::hint::black_box(value.wrapping_mul(2_654_435_761).rotate_left(13))
}

fn main()
{
    // own process group, so a tracer can wait on this process alone
    unsafe {
        libc::setpgid(0, 0);
    }

    let entry = tally as fn(u64) -> u64 as usize;
    println!("{entry:#x}");
    io::stdout().flush().expect("flush address");

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).expect("wait for release");

    let mut acc = 0u64;
    for i in 0..100_000u64 {
        acc = acc.wrapping_add(tally(i));
    }
    std::hint::black_box(acc);
}
