use ::metrics::{HealthChecker, RegistersMetrics, prometheus::core::Collector};
use delegate::delegate;
use services::{
    Result,
    message_watcher::port::LogSubscription,
    types::{B256, L1Block, L1Log, L1Transaction, LogFilter, SubscriptionId, TransactionReceipt},
};
use url::Url;

use self::{
    connection::WsConnection,
    health_tracking_middleware::{EthApi, HealthTrackingMiddleware},
};

mod connection;
mod health_tracking_middleware;

/// A websocket connection to one chain. Serves both the ingestion pipeline and the message
/// watcher.
#[derive(Clone)]
pub struct WebsocketClient {
    inner: HealthTrackingMiddleware<WsConnection>,
}

impl services::sequencer_batch_appended::port::l1::Api for WebsocketClient {
    delegate! {
        to (*self) {
            async fn block_number(&self) -> Result<u64>;
            async fn get_transaction(&self, hash: B256) -> Result<Option<L1Transaction>>;
            async fn get_block(&self, number: u64) -> Result<Option<L1Block>>;
            async fn logs(&self, filter: LogFilter) -> Result<Vec<L1Log>>;
        }
    }
}

impl services::message_watcher::port::Api for WebsocketClient {
    delegate! {
        to (*self) {
            async fn block_number(&self) -> Result<u64>;
            async fn logs(&self, filter: LogFilter) -> Result<Vec<L1Log>>;
            async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription>;
            fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
            async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>>;
        }
    }
}

impl WebsocketClient {
    /// `layer` labels the client's metrics, e.g. `l1` or `l2`.
    pub async fn connect(url: Url, layer: &str, unhealthy_after_n_errors: usize) -> Result<Self> {
        let connection = WsConnection::connect(url).await?;

        Ok(Self {
            inner: HealthTrackingMiddleware::new(connection, layer, unhealthy_after_n_errors),
        })
    }

    #[cfg(test)]
    fn with_connection(connection: WsConnection, unhealthy_after_n_errors: usize) -> Self {
        Self {
            inner: HealthTrackingMiddleware::new(connection, "l1", unhealthy_after_n_errors),
        }
    }

    pub fn connection_health_checker(&self) -> HealthChecker {
        self.inner.connection_health_checker()
    }

    pub(crate) async fn block_number(&self) -> Result<u64> {
        Ok(self.inner.block_number().await?)
    }

    pub(crate) async fn get_transaction(&self, hash: B256) -> Result<Option<L1Transaction>> {
        Ok(self.inner.transaction(hash).await?)
    }

    pub(crate) async fn get_block(&self, number: u64) -> Result<Option<L1Block>> {
        Ok(self.inner.block(number).await?)
    }

    pub(crate) async fn logs(&self, filter: LogFilter) -> Result<Vec<L1Log>> {
        Ok(self.inner.logs(filter).await?)
    }

    pub(crate) async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription> {
        Ok(self.inner.subscribe_logs(filter).await?)
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        Ok(self.inner.unsubscribe(id)?)
    }

    pub(crate) async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>> {
        Ok(self.inner.transaction_receipt(hash).await?)
    }
}

// User responsible for registering any metrics T might have
impl RegistersMetrics for WebsocketClient {
    fn metrics(&self) -> Vec<Box<dyn Collector>> {
        self.inner.metrics()
    }
}
