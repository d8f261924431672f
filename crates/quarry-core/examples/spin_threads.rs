//! Tracee fixture: four spinning threads.
//!
//! Spawns three workers, prints all four tids (main first), then every
//! thread busy-spins. A debugger attaches to each printed tid and exercises
//! whole-process stop synchronization.

use std::io::{self, Write};
use std::sync::mpsc;

fn spin() -> !
{
    let mut x = 0u64;
    loop {
        x = std::hint::black_box(x.wrapping_add(1));
    }
}

fn main()
{
    unsafe {
        libc::setpgid(0, 0);
    }

    let (sender, receiver) = mpsc::channel();
    for _ in 0..3 {
        let sender = sender.clone();
        std::thread::spawn(move || {
            sender.send(unsafe { libc::gettid() }).expect("report tid");
            spin();
        });
    }

    let mut tids = vec![unsafe { libc::gettid() }];
    for _ in 0..3 {
        tids.push(receiver.recv().expect("collect tid"));
    }

    let line: Vec<String> = tids.iter().map(|tid| tid.to_string()).collect();
    println!("{}", line.join(" "));
    io::stdout().flush().expect("flush tids");

    spin();
}
