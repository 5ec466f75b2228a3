//! Compilation requests and their life cycle.
//!
//! A request is created by a producer and shared, through `Arc`, by the queue of its tier, the
//! worker compiling it and any producers waiting for it.  All mutable fields are changed only
//! while holding the lock of the tier that owns the request.  They are atomics so that a
//! request can be shared between threads, not because they are updated without the lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Instant;

use atomic::Atomic;
use bytemuck::NoUninit;

use crate::vm::ProgramUnit;

/// Where compiled code is entered.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// From the start of the unit.
    Normal,
    /// On-stack replacement: from the loop back-edge at the given bytecode offset, while the
    /// unit is already running in the fallback mode.
    OnStackReplacement(u32),
}

impl EntryKind {
    pub fn is_osr(&self) -> bool {
        matches!(self, EntryKind::OnStackReplacement(_))
    }
}

/// The state of a request.  The declaration order is the selection order: `WaitingOsr` is
/// chosen before any `Waiting` request, regardless of scores.
#[repr(u8)]
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, NoUninit, strum_macros::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum RequestState {
    WaitingOsr,
    Waiting,
    InProgress,
    /// Terminal.  The request has left the queue and is retired by the last party that holds
    /// on to it.
    Done,
}

assert_eq_size!(RequestState, u8);

impl RequestState {
    pub fn is_pending(&self) -> bool {
        matches!(self, RequestState::WaitingOsr | RequestState::Waiting)
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// A request to compile one entry of one unit.
pub struct CompileRequest<U: ProgramUnit> {
    id: u32,
    unit: U,
    entry: EntryKind,
    created: Instant,
    /// Priority.  Smaller is compiled sooner.
    score: AtomicU32,
    state: Atomic<RequestState>,
    /// Number of producers blocked waiting for this request.
    waiters: AtomicUsize,
    retired: AtomicBool,
}

impl<U: ProgramUnit> CompileRequest<U> {
    pub fn new(id: u32, unit: U, entry: EntryKind, score: u32) -> Self {
        debug_assert!(score > 0);
        let state = if entry.is_osr() {
            RequestState::WaitingOsr
        } else {
            RequestState::Waiting
        };
        CompileRequest {
            id,
            unit,
            entry,
            created: Instant::now(),
            score: AtomicU32::new(score),
            state: Atomic::new(state),
            waiters: AtomicUsize::new(0),
            retired: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn unit(&self) -> &U {
        &self.unit
    }

    pub fn entry(&self) -> EntryKind {
        self.entry
    }

    /// When the request was created.
    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn score(&self) -> u32 {
        self.score.load(Ordering::Relaxed)
    }

    /// Raise the priority to `score` if it is more urgent than the current one.
    pub fn lower_score(&self, score: u32) {
        self.score.fetch_min(score, Ordering::Relaxed);
    }

    pub fn state(&self) -> RequestState {
        self.state.load(Ordering::Relaxed)
    }

    pub fn is_pending(&self) -> bool {
        self.state().is_pending()
    }

    pub fn is_done(&self) -> bool {
        self.state() == RequestState::Done
    }

    /// Called by the worker that took this request from the queue.
    pub fn set_in_progress(&self) {
        let old = self.state.swap(RequestState::InProgress, Ordering::Relaxed);
        debug_assert!(old.is_pending(), "{} was not pending: {:?}", self, old);
    }

    /// Called by the worker that compiled this request.
    pub fn set_done(&self) {
        let old = self.state.swap(RequestState::Done, Ordering::Relaxed);
        debug_assert_eq!(old, RequestState::InProgress, "{}", self);
    }

    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Relaxed)
    }

    pub fn add_waiter(&self) {
        self.waiters.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of waiters left.
    pub fn remove_waiter(&self) -> usize {
        let old = self.waiters.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(old > 0, "{} has no waiters", self);
        old - 1
    }

    /// Return true if the request is done and nobody waits for it any more.  The caller that
    /// sees this first (while holding the tier lock) retires the request.
    pub fn is_unused(&self) -> bool {
        self.is_done() && self.waiters() == 0
    }

    /// Mark the request as retired.  Returns false if it had been retired already.
    pub(crate) fn retire(&self) -> bool {
        debug_assert!(self.is_unused(), "{} is still in use", self);
        !self.retired.swap(true, Ordering::Relaxed)
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Relaxed)
    }
}

impl<U: ProgramUnit> fmt::Display for CompileRequest<U> {
    /// A one-liner, e.g. `  12 % Foo.bar @ 34 (score 120) waiting_osr`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let osr_marker = if self.entry.is_osr() { '%' } else { ' ' };
        write!(f, "{:4} {} {}", self.id, osr_marker, self.unit.name())?;
        if let EntryKind::OnStackReplacement(bci) = self.entry {
            write!(f, " @ {}", bci)?;
        }
        write!(f, " (score {}) {}", self.score(), self.state().name())
    }
}

impl<U: ProgramUnit> fmt::Debug for CompileRequest<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileRequest")
            .field("id", &self.id)
            .field("unit", &self.unit)
            .field("entry", &self.entry)
            .field("score", &self.score())
            .field("state", &self.state())
            .field("waiters", &self.waiters())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::mock_vm::MockUnit;

    #[test]
    fn initial_state_follows_entry() {
        let unit = MockUnit::new("A.a", 10);
        let normal = CompileRequest::new(1, unit.clone(), EntryKind::Normal, 10);
        let osr = CompileRequest::new(2, unit, EntryKind::OnStackReplacement(4), 10);
        assert_eq!(normal.state(), RequestState::Waiting);
        assert_eq!(osr.state(), RequestState::WaitingOsr);
        assert!(RequestState::WaitingOsr < RequestState::Waiting);
    }

    #[test]
    fn lower_score_keeps_minimum() {
        let request = CompileRequest::new(1, MockUnit::new("A.a", 10), EntryKind::Normal, 30);
        request.lower_score(40);
        assert_eq!(request.score(), 30);
        request.lower_score(20);
        assert_eq!(request.score(), 20);
    }

    #[test]
    fn retire_once_after_last_waiter() {
        let request = CompileRequest::new(1, MockUnit::new("A.a", 10), EntryKind::Normal, 10);
        request.add_waiter();
        request.add_waiter();
        request.set_in_progress();
        request.set_done();
        assert!(!request.is_unused());
        assert_eq!(request.remove_waiter(), 1);
        assert!(!request.is_unused());
        assert_eq!(request.remove_waiter(), 0);
        assert!(request.is_unused());
        assert!(request.retire());
        assert!(request.is_retired());
    }

    #[test]
    fn display_one_liner() {
        let request = CompileRequest::new(
            12,
            MockUnit::new("Foo.bar", 100),
            EntryKind::OnStackReplacement(34),
            120,
        );
        assert_eq!(
            request.to_string(),
            "  12 % Foo.bar @ 34 (score 120) waiting_osr"
        );
    }
}
