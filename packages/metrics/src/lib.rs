mod connection_health_tracker;
pub use connection_health_tracker::*;

pub type HealthChecker = Box<dyn HealthCheck>;

/// Something the `/health` endpoint can ask about.
pub trait HealthCheck: Send + Sync {
    fn healthy(&self) -> bool;

    /// Failed requests since the last successful one.
    fn consecutive_failures(&self) -> usize {
        0
    }
}

pub use prometheus;
pub use prometheus::{Registry, core::Collector};

pub trait RegistersMetrics {
    fn register_metrics(&self, registry: &Registry) {
        self.metrics().into_iter().for_each(|metric| {
            registry
                .register(metric)
                .expect("app to have correctly named metrics");
        });
    }

    fn metrics(&self) -> Vec<Box<dyn Collector>>;
}

#[cfg(test)]
mod tests {
    use prometheus::IntCounter;

    use super::*;

    struct Counting {
        counter: IntCounter,
    }

    impl RegistersMetrics for Counting {
        fn metrics(&self) -> Vec<Box<dyn Collector>> {
            vec![Box::new(self.counter.clone())]
        }
    }

    #[test]
    fn registered_metrics_are_gathered() {
        // given
        let registry = Registry::new();
        let counting = Counting {
            counter: IntCounter::new("ingested", "ingested things").unwrap(),
        };
        counting.register_metrics(&registry);

        // when
        counting.counter.inc_by(3);

        // then
        let families = registry.gather();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].get_name(), "ingested");
        assert_eq!(families[0].get_metric()[0].get_counter().get_value(), 3.0);
    }
}
