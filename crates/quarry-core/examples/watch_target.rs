//! Tracee fixture: writes one 8-byte variable after being released.
//!
//! Prints the variable's address, waits for a line on stdin, stores 42 into
//! it, then idles. A debugger on the other end places a write watchpoint on
//! the printed address and expects exactly one hit.

use std::io::{self, BufRead, Write};
use std::ptr;
use std::time::Duration;

static mut WATCHED: u64 = 0;

fn main()
{
    unsafe {
        libc::setpgid(0, 0);
    }

    let address = unsafe { ptr::addr_of!(WATCHED) } as usize;
    println!("{address:#x}");
    io::stdout().flush().expect("flush address");

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).expect("wait for release");

    unsafe {
        ptr::write_volatile(ptr::addr_of_mut!(WATCHED), 42);
    }

    loop {
        std::thread::sleep(Duration::from_millis(50));
    }
}
