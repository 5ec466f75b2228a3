//! Sizing of the compiler worker pool of one tier.
//!
//! The pool grows on demand when producers submit requests and nobody is idle to pick them up,
//! and shrinks back newest-first when workers time out waiting for work.  While the process is
//! low on memory, the pool is degraded to a single worker: the floor worker (the one with the
//! lowest live ordinal) keeps running and every other worker exits.

use std::collections::BTreeSet;

/// Process-wide resource queries used for pool decisions.
pub trait ResourceProbe {
    /// Return true if the process is short of memory.
    fn is_low_on_memory(&self) -> bool;
    /// Return true if the process may create another thread.
    fn has_thread_headroom(&self) -> bool;
}

/// Worker counters and spawn/exit decisions of one tier.
///
/// This is plain data.  The owner keeps it behind the tier lock, and every method must be called
/// with that lock held.
#[derive(Debug)]
pub struct WorkerPoolController {
    /// Workers that have been reserved and not yet exited.  Includes workers whose thread is
    /// still being created.
    active: usize,
    /// Active workers not compiling anything.
    idle: usize,
    /// Ordinals of active workers.
    live: BTreeSet<usize>,
    /// Sticky single-worker mode, entered when memory is low and left when it recovers.
    degraded: bool,
    max_workers: usize,
    /// In exhaustive (compile-the-world) mode the pool never degrades.
    exhaustive: bool,
}

impl WorkerPoolController {
    pub fn new(max_workers: usize, exhaustive: bool) -> Self {
        debug_assert!(max_workers > 0);
        Self {
            active: 0,
            idle: 0,
            live: BTreeSet::new(),
            degraded: false,
            max_workers,
            exhaustive,
        }
    }

    pub fn active_workers(&self) -> usize {
        self.active
    }

    pub fn idle_workers(&self) -> usize {
        self.idle
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// The ordinal of the oldest live worker.  This worker never exits because of low memory.
    pub fn floor_worker(&self) -> Option<usize> {
        self.live.first().copied()
    }

    /// Query memory and update the degraded flag.  Returns the new value of the flag.
    pub fn should_degrade(&mut self, probe: &impl ResourceProbe) -> bool {
        if self.exhaustive {
            return false;
        }
        self.degraded = probe.is_low_on_memory();
        self.degraded
    }

    /// Whether a producer that just queued a request with `pending` requests in the queue
    /// should create another worker.
    pub fn should_spawn(&self, pending: usize, probe: &impl ResourceProbe) -> bool {
        if self.active == 0 {
            // Someone has to compile the request, even in degraded mode.
            return true;
        }
        self.idle <= 1
            && pending > 0
            && self.active < self.max_workers
            && !self.degraded
            && probe.has_thread_headroom()
    }

    /// Whether the worker `ordinal` must exit because the pool is degraded.
    pub fn should_exit_for_memory(&self, ordinal: usize) -> bool {
        self.degraded && self.floor_worker() != Some(ordinal)
    }

    /// Whether the worker `ordinal`, which found no work, should exit.  Only the newest worker
    /// leaves, and only while more than two workers are active.
    pub fn should_self_terminate(&self, ordinal: usize, timed_out: bool) -> bool {
        timed_out && self.active > 2 && self.live.last() == Some(&ordinal)
    }

    /// Account for a worker about to be created.  Returns its ordinal, which is the lowest one
    /// not used by a live worker.  The new worker counts as idle.
    pub fn reserve_worker(&mut self) -> usize {
        let ordinal = (0..)
            .find(|i| !self.live.contains(i))
            .unwrap_or(self.live.len());
        self.live.insert(ordinal);
        self.active += 1;
        self.idle += 1;
        debug_assert_eq!(self.active, self.live.len());
        ordinal
    }

    /// Undo [`WorkerPoolController::reserve_worker`] after the thread could not be created.
    pub fn rollback_worker(&mut self, ordinal: usize) {
        self.worker_exited(ordinal);
    }

    /// An idle worker took a request.
    pub fn worker_busy(&mut self) {
        debug_assert!(self.idle > 0);
        self.idle -= 1;
    }

    /// A worker finished a request.
    pub fn worker_idle(&mut self) {
        debug_assert!(self.idle < self.active);
        self.idle += 1;
    }

    /// An idle worker left its loop.
    pub fn worker_exited(&mut self, ordinal: usize) {
        let removed = self.live.remove(&ordinal);
        debug_assert!(removed, "worker {} is not live", ordinal);
        debug_assert!(self.active > 0 && self.idle > 0);
        self.active -= 1;
        self.idle -= 1;
    }
}
