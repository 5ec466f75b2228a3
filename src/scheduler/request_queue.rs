use std::collections::VecDeque;
use std::sync::Arc;

use super::request::{CompileRequest, EntryKind};
use crate::vm::ProgramUnit;

/// The requests of one tier that are waiting or being compiled.
///
/// New requests are inserted at the front, so iterating from the back visits requests in
/// insertion order.  The queue is expected to be short (tens of requests), so all lookups are
/// linear scans.  Every method must be called with the tier lock held.
pub struct RequestQueue<U: ProgramUnit> {
    requests: VecDeque<Arc<CompileRequest<U>>>,
}

impl<U: ProgramUnit> Default for RequestQueue<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U: ProgramUnit> RequestQueue<U> {
    pub fn new() -> Self {
        RequestQueue {
            requests: VecDeque::new(),
        }
    }

    /// Find the request for `unit` at `entry`.
    ///
    /// If there is no exact match but there is a `Normal` request for the same unit, that one
    /// is returned instead.  For an OSR lookup, this tells the caller that it may prefer waiting
    /// for the normal compilation over queueing a redundant OSR request.
    pub fn find_duplicate(&self, unit: &U, entry: EntryKind) -> Option<&Arc<CompileRequest<U>>> {
        let mut normal = None;
        for request in self.requests.iter() {
            if request.unit() == unit {
                if request.entry() == entry {
                    return Some(request);
                }
                if request.entry() == EntryKind::Normal {
                    normal = Some(request);
                }
            }
        }
        normal
    }

    /// Choose the next request to compile, or `None` if no request is pending.
    ///
    /// Normally this is the pending request with the smallest `(state, score)`: OSR requests
    /// first, then the smallest score.  Ties go to the most recently inserted request.  If
    /// `in_insertion_order` is true (the `compile_the_world` mode), it is the oldest pending
    /// request instead, so that an exhaustive sweep is compiled first-in first-out.
    pub fn select_next(&self, in_insertion_order: bool) -> Option<&Arc<CompileRequest<U>>> {
        if in_insertion_order {
            return self.requests.iter().rev().find(|r| r.is_pending());
        }
        let mut best: Option<&Arc<CompileRequest<U>>> = None;
        for request in self.requests.iter().filter(|r| r.is_pending()) {
            let better = match best {
                None => true,
                Some(b) => (request.state(), request.score()) < (b.state(), b.score()),
            };
            if better {
                best = Some(request);
            }
        }
        best
    }

    pub fn insert(&mut self, request: Arc<CompileRequest<U>>) {
        debug_assert!(request.is_pending());
        debug_assert!(
            !self.requests.iter().any(|r| Arc::ptr_eq(r, &request)),
            "{} is already queued",
            request
        );
        self.requests.push_front(request);
    }

    /// Remove `request` from the queue.  Returns false if it was not queued.
    pub fn remove(&mut self, request: &Arc<CompileRequest<U>>) -> bool {
        match self.requests.iter().position(|r| Arc::ptr_eq(r, request)) {
            Some(index) => {
                self.requests.remove(index);
                true
            }
            None => false,
        }
    }

    /// The number of requests waiting to be compiled.
    pub fn pending_count(&self) -> usize {
        self.requests.iter().filter(|r| r.is_pending()).count()
    }

    /// The number of requests waiting or being compiled.
    pub fn total_count(&self) -> usize {
        self.requests.len()
    }

    /// Iterate from the most recently inserted request.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CompileRequest<U>>> {
        self.requests.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::request::RequestState;
    use crate::util::test_util::mock_vm::MockUnit;

    fn request(id: u32, unit: &MockUnit, entry: EntryKind, score: u32) -> Arc<CompileRequest<MockUnit>> {
        Arc::new(CompileRequest::new(id, unit.clone(), entry, score))
    }

    #[test]
    fn selects_smallest_score() {
        let a = MockUnit::new("A.a", 10);
        let b = MockUnit::new("B.b", 5);
        let mut queue = RequestQueue::new();
        queue.insert(request(1, &a, EntryKind::Normal, 10));
        queue.insert(request(2, &b, EntryKind::Normal, 5));
        let next = queue.select_next(false).unwrap();
        assert_eq!(next.unit(), &b);
    }

    #[test]
    fn osr_before_any_waiting() {
        let small = MockUnit::new("Small.s", 1);
        let big = MockUnit::new("Big.b", 1000);
        let mut queue = RequestQueue::new();
        queue.insert(request(1, &small, EntryKind::Normal, 1));
        queue.insert(request(2, &big, EntryKind::OnStackReplacement(7), 1000));
        let next = queue.select_next(false).unwrap();
        assert_eq!(next.state(), RequestState::WaitingOsr);
        assert_eq!(next.unit(), &big);
    }

    #[test]
    fn skips_requests_in_progress() {
        let a = MockUnit::new("A.a", 1);
        let b = MockUnit::new("B.b", 2);
        let mut queue = RequestQueue::new();
        let first = request(1, &a, EntryKind::Normal, 1);
        queue.insert(first.clone());
        queue.insert(request(2, &b, EntryKind::Normal, 2));
        first.set_in_progress();
        assert_eq!(queue.select_next(false).unwrap().unit(), &b);
        assert_eq!(queue.pending_count(), 1);
        assert_eq!(queue.total_count(), 2);
    }

    #[test]
    fn insertion_order_mode_is_fifo() {
        let units: Vec<MockUnit> = (0..4).map(|i| MockUnit::new(&format!("U.u{}", i), 100 - i)).collect();
        let mut queue = RequestQueue::new();
        for (i, unit) in units.iter().enumerate() {
            queue.insert(request(i as u32 + 1, unit, EntryKind::Normal, unit.size() as u32));
        }
        for unit in units.iter() {
            let next = queue.select_next(true).unwrap().clone();
            assert_eq!(next.unit(), unit);
            next.set_in_progress();
        }
        assert!(queue.select_next(true).is_none());
    }

    #[test]
    fn empty_queue_has_nothing_to_select() {
        let queue: RequestQueue<MockUnit> = RequestQueue::new();
        assert!(queue.select_next(false).is_none());
        assert!(queue.select_next(true).is_none());
    }

    #[test]
    fn find_duplicate_prefers_exact_match() {
        let a = MockUnit::new("A.a", 10);
        let mut queue = RequestQueue::new();
        let normal = request(1, &a, EntryKind::Normal, 10);
        let osr = request(2, &a, EntryKind::OnStackReplacement(3), 10);
        queue.insert(normal.clone());
        queue.insert(osr.clone());

        let found = queue.find_duplicate(&a, EntryKind::OnStackReplacement(3)).unwrap();
        assert!(Arc::ptr_eq(found, &osr));
        let found = queue.find_duplicate(&a, EntryKind::Normal).unwrap();
        assert!(Arc::ptr_eq(found, &normal));
    }

    #[test]
    fn find_duplicate_falls_back_to_normal_for_osr() {
        let a = MockUnit::new("A.a", 10);
        let b = MockUnit::new("B.b", 10);
        let mut queue = RequestQueue::new();
        let normal = request(1, &a, EntryKind::Normal, 10);
        queue.insert(normal.clone());
        queue.insert(request(2, &b, EntryKind::OnStackReplacement(5), 10));

        let found = queue.find_duplicate(&a, EntryKind::OnStackReplacement(5)).unwrap();
        assert!(Arc::ptr_eq(found, &normal));
        // An OSR request at another offset does not stand in for a normal one.
        assert!(queue.find_duplicate(&b, EntryKind::Normal).is_none());
        assert!(queue.find_duplicate(&b, EntryKind::OnStackReplacement(6)).is_none());
    }

    #[test]
    fn remove_only_the_given_request() {
        let a = MockUnit::new("A.a", 10);
        let mut queue = RequestQueue::new();
        let first = request(1, &a, EntryKind::Normal, 10);
        let second = request(2, &a, EntryKind::OnStackReplacement(1), 10);
        queue.insert(first.clone());
        queue.insert(second.clone());
        assert!(queue.remove(&first));
        assert!(!queue.remove(&first));
        assert_eq!(queue.total_count(), 1);
        assert!(Arc::ptr_eq(queue.iter().next().unwrap(), &second));
    }
}
