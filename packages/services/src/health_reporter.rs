use metrics::HealthChecker;
use serde::Serialize;

/// Connection health of one layer's node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LayerHealth {
    pub healthy: bool,
    pub consecutive_failures: usize,
}

impl LayerHealth {
    fn of(check: &HealthChecker) -> Self {
        Self {
            healthy: check.healthy(),
            consecutive_failures: check.consecutive_failures(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub l1: LayerHealth,
    pub l2: LayerHealth,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }
}

/// Ingestion only needs L1, but the watcher resolves L1 to L2 relays on L2, so both count.
pub struct HealthReporter {
    l1_connection: HealthChecker,
    l2_connection: HealthChecker,
}

impl HealthReporter {
    #[must_use]
    pub fn new(l1_health_check: HealthChecker, l2_health_check: HealthChecker) -> Self {
        Self {
            l1_connection: l1_health_check,
            l2_connection: l2_health_check,
        }
    }

    #[must_use]
    pub fn generate_report(&self) -> HealthReport {
        let l1 = LayerHealth::of(&self.l1_connection);
        let l2 = LayerHealth::of(&self.l2_connection);

        HealthReport {
            healthy: l1.healthy && l2.healthy,
            l1,
            l2,
        }
    }
}

#[cfg(test)]
mod tests {
    use metrics::ConnectionHealthTracker;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn unhealthy_when_either_connection_fails() {
        // given
        let l1 = ConnectionHealthTracker::new(1);
        let l2 = ConnectionHealthTracker::new(1);
        let reporter = HealthReporter::new(l1.tracker(), l2.tracker());

        // when
        l2.note_failure();

        // then
        let report = reporter.generate_report();
        assert!(!report.is_healthy());
        assert!(report.l1.healthy);
    }

    #[test]
    fn reports_failures_per_layer() {
        // given
        let l1 = ConnectionHealthTracker::new(3);
        let l2 = ConnectionHealthTracker::new(3);
        let reporter = HealthReporter::new(l1.tracker(), l2.tracker());

        // when
        l1.note_failure();
        l1.note_failure();

        // then
        assert_eq!(
            reporter.generate_report(),
            HealthReport {
                healthy: true,
                l1: LayerHealth {
                    healthy: true,
                    consecutive_failures: 2,
                },
                l2: LayerHealth {
                    healthy: true,
                    consecutive_failures: 0,
                },
            }
        );
    }
}
