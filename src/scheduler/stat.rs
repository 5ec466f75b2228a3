//! Statistics and snapshots of the compile queues.

use std::fmt;
use std::time::Duration;

use itertools::Itertools;

use super::request::{CompileRequest, EntryKind, RequestState};
use super::Tier;
use crate::vm::ProgramUnit;

/// Cumulative counters of one tier.  Updated under the tier lock.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TierStat {
    /// Requests inserted into the queue.
    pub requests_total: usize,
    /// Requests that finished and were released by their last user.
    pub requests_retired: usize,
    /// Times the queue was sampled.  Together with the totals below, this gives the average
    /// queue depth and pool size seen by producers.
    pub queue_probes: usize,
    pub queue_depth_total: usize,
    pub threads_total: usize,
    /// Worker threads successfully created.
    pub workers_created: usize,
    /// Worker threads the runtime failed to create.
    pub worker_creation_failures: usize,
    /// Producers woken up before their request was done.
    pub producer_spurious_wakeups: usize,
    /// Workers woken up without finding a request.
    pub consumer_spurious_wakeups: usize,
    /// Times a worker saw a pending global pause.
    pub safepoint_polls: usize,
    pub compilations: usize,
    pub failed_compilations: usize,
    /// Wall-clock time spent in the backend.
    pub compile_time: Duration,
}

impl TierStat {
    /// Sample the queue depth and the number of workers.
    pub fn probe(&mut self, queue_depth: usize, threads: usize) {
        self.queue_probes += 1;
        self.queue_depth_total += queue_depth;
        self.threads_total += threads;
    }

    pub fn average_queue_depth(&self) -> f64 {
        if self.queue_probes == 0 {
            0.0
        } else {
            self.queue_depth_total as f64 / self.queue_probes as f64
        }
    }

    pub fn average_threads(&self) -> f64 {
        if self.queue_probes == 0 {
            0.0
        } else {
            self.threads_total as f64 / self.queue_probes as f64
        }
    }
}

/// A copy of the observable fields of a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestInfo {
    pub id: u32,
    pub unit_name: String,
    pub entry: EntryKind,
    pub score: u32,
    pub state: RequestState,
    pub waiters: usize,
    /// Time since the request was created.
    pub age: Duration,
}

impl RequestInfo {
    pub fn new<U: ProgramUnit>(request: &CompileRequest<U>) -> Self {
        Self {
            id: request.id(),
            unit_name: request.unit().name(),
            entry: request.entry(),
            score: request.score(),
            state: request.state(),
            waiters: request.waiters(),
            age: request.created().elapsed(),
        }
    }
}

impl fmt::Display for RequestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let osr_marker = if self.entry.is_osr() { '%' } else { ' ' };
        write!(f, "{:4} {} {}", self.id, osr_marker, self.unit_name)?;
        if let EntryKind::OnStackReplacement(bci) = self.entry {
            write!(f, " @ {}", bci)?;
        }
        write!(
            f,
            " (score {}, {} waiters, {}ms)",
            self.score,
            self.waiters,
            self.age.as_millis()
        )
    }
}

/// The state of one tier at one point in time.
#[derive(Clone, Debug)]
pub struct TierSnapshot {
    pub tier: Tier,
    pub compiler: &'static str,
    pub active_workers: usize,
    pub idle_workers: usize,
    pub max_workers: usize,
    pub degraded: bool,
    pub compilation_disabled: bool,
    /// Requests being compiled, ordered by score.
    pub in_progress: Vec<RequestInfo>,
    /// Requests waiting to be compiled, OSR requests first, then ordered by score.
    pub waiting: Vec<RequestInfo>,
    pub stat: TierStat,
}

impl TierSnapshot {
    /// Split `requests` into the in-progress and the waiting lists, each ordered by priority
    /// and truncated to `limit` entries.
    pub(crate) fn collect_requests<'a, U: ProgramUnit + 'a>(
        requests: impl Iterator<Item = &'a CompileRequest<U>>,
        limit: usize,
    ) -> (Vec<RequestInfo>, Vec<RequestInfo>) {
        let (in_progress, waiting): (Vec<_>, Vec<_>) = requests
            .map(RequestInfo::new)
            .sorted_by_key(|info| (info.state, info.score, info.id))
            .partition(|info| info.state == RequestState::InProgress);
        let truncate = |mut infos: Vec<RequestInfo>| {
            infos.truncate(limit);
            infos
        };
        (truncate(in_progress), truncate(waiting))
    }
}

impl fmt::Display for TierSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:?} tier ({}): {} workers ({} idle, max {}){}{}",
            self.tier,
            self.compiler,
            self.active_workers,
            self.idle_workers,
            self.max_workers,
            if self.degraded { ", degraded" } else { "" },
            if self.compilation_disabled {
                ", compilation disabled"
            } else {
                ""
            },
        )?;
        writeln!(f, "  in progress:")?;
        for info in self.in_progress.iter() {
            writeln!(f, "  {}", info)?;
        }
        writeln!(f, "  waiting:")?;
        for info in self.waiting.iter() {
            writeln!(f, "  {}", info)?;
        }
        writeln!(
            f,
            "  {} requests, {} retired, {} compiled ({} failed) in {}ms, avg queue depth {:.2}, avg workers {:.2}",
            self.stat.requests_total,
            self.stat.requests_retired,
            self.stat.compilations,
            self.stat.failed_compilations,
            self.stat.compile_time.as_millis(),
            self.stat.average_queue_depth(),
            self.stat.average_threads(),
        )
    }
}

/// Snapshots of all enabled tiers.
#[derive(Clone, Debug, Default)]
pub struct JitSnapshot {
    pub tiers: Vec<TierSnapshot>,
}

impl JitSnapshot {
    pub fn tier(&self, tier: Tier) -> Option<&TierSnapshot> {
        self.tiers.iter().find(|t| t.tier == tier)
    }
}

impl fmt::Display for JitSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for tier in self.tiers.iter() {
            write!(f, "{}", tier)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::mock_vm::MockUnit;

    #[test]
    fn averages() {
        let mut stat = TierStat::default();
        assert_eq!(stat.average_queue_depth(), 0.0);
        stat.probe(3, 1);
        stat.probe(1, 3);
        assert_eq!(stat.average_queue_depth(), 2.0);
        assert_eq!(stat.average_threads(), 2.0);
    }

    #[test]
    fn requests_are_ordered_and_bounded() {
        let requests: Vec<CompileRequest<MockUnit>> = (1..=5)
            .map(|i| {
                CompileRequest::new(
                    i,
                    MockUnit::new(&format!("U.u{}", i), 10),
                    EntryKind::Normal,
                    100 - i,
                )
            })
            .collect();
        requests[0].set_in_progress();
        let osr = CompileRequest::new(
            6,
            MockUnit::new("U.osr", 10),
            EntryKind::OnStackReplacement(2),
            500,
        );

        let (in_progress, waiting) =
            TierSnapshot::collect_requests(requests.iter().chain(std::iter::once(&osr)), 3);
        assert_eq!(in_progress.len(), 1);
        assert_eq!(in_progress[0].id, 1);
        let ids: Vec<u32> = waiting.iter().map(|info| info.id).collect();
        assert_eq!(ids, vec![6, 5, 4]);
    }
}
