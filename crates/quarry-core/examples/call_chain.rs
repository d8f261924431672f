//! Tracee fixture: a three-deep call chain invoked in a loop.
//!
//! Prints the outer function's address, waits for a line on stdin, then
//! keeps calling it. A debugger stops at the outer function's entry and
//! steps out across the nested calls.

use std::io::{self, BufRead, Write};
use std::time::Duration;

#[inline(never)]
fn innermost(value: u64) -> u64
{
    std::hint::black_box(value ^ 0x9e37_79b9_7f4a_7c15)
}

#[inline(never)]
fn middle(value: u64) -> u64
{
    innermost(value.rotate_left(7)).wrapping_add(3)
}

#[inline(never)]
fn outer(value: u64) -> u64
{
    middle(value.wrapping_mul(31)).wrapping_sub(1)
}

fn main()
{
    unsafe {
        libc::setpgid(0, 0);
    }

    let entry = outer as fn(u64) -> u64 as usize;
    println!("{entry:#x}");
    io::stdout().flush().expect("flush address");

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).expect("wait for release");

    let mut i = 0u64;
    loop {
        std::hint::black_box(outer(i));
        i = i.wrapping_add(1);
        std::thread::sleep(Duration::from_millis(1));
    }
}
