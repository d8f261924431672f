//! # Thread Registry
//!
//! The set of live tracee threads plus a graveyard of detached or exited
//! ones, with the per-thread register mirrors the controller works on.
//!
//! Register caches are authoritative between a stop and the next resume:
//! callers mutate the mirrors while the tracee is stopped and the
//! controller flushes every mirror back to the kernel before any resume.
//!
//! The live list keeps insertion-LIFO head order: new threads go in at the
//! front, so the main thread, registered first, stays at the tail. The
//! detach walks rely on that to process the main thread last. Unregistered
//! threads move to the graveyard rather than being dropped, so status
//! chains referring to them stay meaningful until the registry itself goes
//! away.

use crate::arch::{DebugArch, FpRegisters, GpRegisters, Native};
use crate::types::Tid;

/// One tracee thread and its cached execution state
#[derive(Debug)]
pub struct Thread
{
    pub(crate) tid: Tid,
    pub(crate) regs: GpRegisters,
    pub(crate) fpregs: Box<FpRegisters>,
    /// Signal delivered to the thread on its next resume; 0 means none.
    pub(crate) signal_to_forward: i32,
}

impl Thread
{
    fn new(tid: Tid) -> Self
    {
        Thread {
            tid,
            regs: GpRegisters::default(),
            fpregs: Box::new(FpRegisters::default()),
            signal_to_forward: 0,
        }
    }

    /// The thread's kernel id.
    pub fn tid(&self) -> Tid
    {
        self.tid
    }

    /// The cached general purpose registers.
    pub fn regs(&self) -> &GpRegisters
    {
        &self.regs
    }

    /// The cached floating point state.
    pub fn fp_regs(&self) -> &FpRegisters
    {
        &self.fpregs
    }

    /// The signal queued for forwarding on the next resume (0 = none).
    pub fn pending_signal(&self) -> i32
    {
        self.signal_to_forward
    }
}

/// Registry of live and dead tracee threads
#[derive(Debug, Default)]
pub struct ThreadRegistry
{
    live: Vec<Thread>,
    graveyard: Vec<Thread>,
}

impl ThreadRegistry
{
    /// Create an empty registry.
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Register a thread, fetching its initial register snapshot.
    ///
    /// Idempotent: registering a tid that is already live returns the
    /// existing record untouched. A failed initial fetch leaves a zeroed
    /// mirror behind (the thread may be mid-exit); the next stop refreshes
    /// it.
    pub(crate) fn register(&mut self, tid: Tid) -> &mut Thread
    {
        if let Some(index) = self.live.iter().position(|thread| thread.tid == tid) {
            return &mut self.live[index];
        }

        let mut thread = Thread::new(tid);
        if let Err(err) = Native::get_regs(tid, &mut thread.regs) {
            tracing::warn!("initial register fetch failed for thread {tid}: {err}");
        }

        self.live.insert(0, thread);
        &mut self.live[0]
    }

    /// Move a thread to the graveyard. Unknown tids are ignored.
    pub(crate) fn unregister(&mut self, tid: Tid)
    {
        if let Some(index) = self.live.iter().position(|thread| thread.tid == tid) {
            let thread = self.live.remove(index);
            self.graveyard.push(thread);
        }
    }

    /// Look up a live thread.
    pub fn get(&self, tid: Tid) -> Option<&Thread>
    {
        self.live.iter().find(|thread| thread.tid == tid)
    }

    /// Look up a live thread, mutably.
    pub(crate) fn get_mut(&mut self, tid: Tid) -> Option<&mut Thread>
    {
        self.live.iter_mut().find(|thread| thread.tid == tid)
    }

    /// Iterate the live threads, newest first (main thread last).
    pub fn iter(&self) -> impl Iterator<Item = &Thread>
    {
        self.live.iter()
    }

    /// Iterate the live threads mutably, newest first.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Thread>
    {
        self.live.iter_mut()
    }

    /// Number of live threads.
    pub fn len(&self) -> usize
    {
        self.live.len()
    }

    /// True if no live threads are registered.
    pub fn is_empty(&self) -> bool
    {
        self.live.is_empty()
    }
}
