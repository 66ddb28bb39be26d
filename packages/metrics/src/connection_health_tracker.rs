use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use super::{HealthCheck, HealthChecker};

/// Shared between an RPC client, which reports the outcome of every request, and the health
/// endpoint. Only network failures are noted: a node rejecting a request is still reachable.
#[derive(Debug, Clone)]
pub struct ConnectionHealthTracker {
    max_consecutive_failures: usize,
    consecutive_failures: Arc<AtomicUsize>,
}

impl ConnectionHealthTracker {
    pub fn new(max_consecutive_failures: usize) -> Self {
        Self {
            max_consecutive_failures,
            consecutive_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn note_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn note_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    pub fn tracker(&self) -> HealthChecker {
        Box::new(self.clone())
    }
}

impl HealthCheck for ConnectionHealthTracker {
    fn healthy(&self) -> bool {
        self.consecutive_failures() < self.max_consecutive_failures
    }

    fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unhealthy_after_too_many_failures_in_a_row() {
        // given
        let tracker = ConnectionHealthTracker::new(2);
        let checker = tracker.tracker();

        // when
        tracker.note_failure();
        let after_one = checker.healthy();
        tracker.note_failure();

        // then
        assert!(after_one);
        assert!(!checker.healthy());
    }

    #[test]
    fn checker_sees_failures_noted_by_any_clone() {
        // given
        let tracker = ConnectionHealthTracker::new(5);
        let checker = tracker.tracker();
        let client_side = tracker.clone();

        // when
        client_side.note_failure();
        client_side.note_failure();

        // then
        assert_eq!(checker.consecutive_failures(), 2);
        assert!(checker.healthy());
    }

    #[test]
    fn success_resets_the_count() {
        let tracker = ConnectionHealthTracker::new(2);

        tracker.note_failure();
        tracker.note_success();
        tracker.note_failure();

        assert!(tracker.healthy());
        assert_eq!(tracker.consecutive_failures(), 1);
    }
}
