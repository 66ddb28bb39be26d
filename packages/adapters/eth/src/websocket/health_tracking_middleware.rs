use ::metrics::{ConnectionHealthTracker, HealthChecker, RegistersMetrics, prometheus::core::Collector};
use services::{
    message_watcher::port::LogSubscription,
    types::{B256, L1Block, L1Log, L1Transaction, LogFilter, SubscriptionId, TransactionReceipt},
};

use crate::{
    error::{Error, Result},
    metrics::Metrics,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EthApi {
    async fn block_number(&self) -> Result<u64>;
    async fn transaction(&self, hash: B256) -> Result<Option<L1Transaction>>;
    async fn block(&self, number: u64) -> Result<Option<L1Block>>;
    async fn logs(&self, filter: LogFilter) -> Result<Vec<L1Log>>;
    async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription>;
    fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>>;
}

#[cfg(test)]
impl RegistersMetrics for MockEthApi {
    fn metrics(&self) -> Vec<Box<dyn Collector>> {
        vec![]
    }
}

#[derive(Clone)]
pub struct HealthTrackingMiddleware<T> {
    adapter: T,
    metrics: Metrics,
    health_tracker: ConnectionHealthTracker,
}

impl<T> HealthTrackingMiddleware<T> {
    pub fn new(adapter: T, layer: &str, unhealthy_after_n_errors: usize) -> Self {
        Self {
            adapter,
            metrics: Metrics::new(layer),
            health_tracker: ConnectionHealthTracker::new(unhealthy_after_n_errors),
        }
    }

    pub fn connection_health_checker(&self) -> HealthChecker {
        self.health_tracker.tracker()
    }

    fn note_network_status<K>(&self, response: &Result<K>) {
        match response {
            Ok(_val) => {
                self.health_tracker.note_success();
            }
            Err(Error::Network { .. }) => {
                self.metrics.rpc_network_errors.inc();
                self.health_tracker.note_failure();
            }
            _ => {}
        };
    }
}

impl<T: RegistersMetrics> RegistersMetrics for HealthTrackingMiddleware<T> {
    fn metrics(&self) -> Vec<Box<dyn Collector>> {
        self.metrics
            .metrics()
            .into_iter()
            .chain(self.adapter.metrics())
            .collect()
    }
}

#[async_trait::async_trait]
impl<T> EthApi for HealthTrackingMiddleware<T>
where
    T: EthApi + Send + Sync,
{
    async fn block_number(&self) -> Result<u64> {
        let response = self.adapter.block_number().await;
        self.note_network_status(&response);
        response
    }

    async fn transaction(&self, hash: B256) -> Result<Option<L1Transaction>> {
        let response = self.adapter.transaction(hash).await;
        self.note_network_status(&response);
        response
    }

    async fn block(&self, number: u64) -> Result<Option<L1Block>> {
        let response = self.adapter.block(number).await;
        self.note_network_status(&response);
        response
    }

    async fn logs(&self, filter: LogFilter) -> Result<Vec<L1Log>> {
        let response = self.adapter.logs(filter).await;
        self.note_network_status(&response);
        response
    }

    async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription> {
        let response = self.adapter.subscribe_logs(filter).await;
        self.note_network_status(&response);
        response
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let response = self.adapter.unsubscribe(id);
        self.note_network_status(&response);
        response
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        let response = self.adapter.transaction_receipt(hash).await;
        self.note_network_status(&response);
        response
    }
}
