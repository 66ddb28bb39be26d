use ::metrics::{RegistersMetrics, prometheus::core::Collector};
use alloy::{
    consensus::Transaction as _,
    eips::BlockNumberOrTag,
    network::TransactionResponse,
    providers::{DynProvider, Provider, ProviderBuilder, WsConnect},
    rpc::types::{self, Filter},
};
use futures::StreamExt;
use services::{
    message_watcher::port::LogSubscription,
    types::{
        B256, BlockRange, L1Block, L1Log, L1Transaction, LogFilter, SubscriptionId,
        TransactionReceipt,
    },
};
use tracing::{debug, warn};
use url::Url;

use super::health_tracking_middleware::EthApi;
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct WsConnection {
    provider: DynProvider,
}

impl WsConnection {
    pub async fn connect(url: Url) -> Result<Self> {
        let ws = WsConnect::new(url.to_string());
        let provider = ProviderBuilder::new().connect_ws(ws).await?.erased();

        Ok(Self { provider })
    }

    #[cfg(test)]
    pub(crate) fn with_provider(provider: DynProvider) -> Self {
        Self { provider }
    }
}

impl RegistersMetrics for WsConnection {
    fn metrics(&self) -> Vec<Box<dyn Collector>> {
        vec![]
    }
}

#[async_trait::async_trait]
impl EthApi for WsConnection {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn transaction(&self, hash: B256) -> Result<Option<L1Transaction>> {
        let transaction = self.provider.get_transaction_by_hash(hash).await?;

        Ok(transaction.map(|tx| L1Transaction {
            hash: tx.tx_hash(),
            from: TransactionResponse::from(&tx),
            input: tx.input().clone(),
            block_number: tx.block_number,
        }))
    }

    async fn block(&self, number: u64) -> Result<Option<L1Block>> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await?;

        Ok(block.map(|block| L1Block {
            number: block.header.number,
            hash: block.header.hash,
            timestamp: block.header.timestamp,
        }))
    }

    async fn logs(&self, filter: LogFilter) -> Result<Vec<L1Log>> {
        let logs = self.provider.get_logs(&to_alloy_filter(&filter)).await?;

        logs.into_iter().map(to_l1_log).collect()
    }

    async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription> {
        let subscription = self
            .provider
            .subscribe_logs(&to_alloy_filter(&filter))
            .await?;
        let id = SubscriptionId(*subscription.local_id());

        debug!("subscribed to logs of {} as {id}", filter.address);

        let logs = subscription
            .into_stream()
            .filter_map(|log| {
                let log = if log.removed {
                    None
                } else {
                    to_l1_log(log)
                        .inspect_err(|e| warn!("dropping log from subscription: {e}"))
                        .ok()
                };
                futures::future::ready(log)
            })
            .boxed();

        Ok(LogSubscription { id, logs })
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        // the root provider drops the subscription without a round trip
        Ok(self.provider.root().unsubscribe(id.0)?)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        let Some(receipt) = self.provider.get_transaction_receipt(hash).await? else {
            return Ok(None);
        };

        // pending receipts have no inclusion data yet
        let (Some(block_number), Some(block_hash)) = (receipt.block_number, receipt.block_hash)
        else {
            return Ok(None);
        };

        let logs = receipt
            .inner
            .logs()
            .iter()
            .cloned()
            .map(to_l1_log)
            .collect::<Result<_>>()?;

        Ok(Some(TransactionReceipt {
            transaction_hash: receipt.transaction_hash,
            block_number,
            block_hash,
            succeeded: receipt.status(),
            logs,
        }))
    }
}

fn to_alloy_filter(filter: &LogFilter) -> Filter {
    let alloy_filter = Filter::new()
        .address(filter.address)
        .event_signature(filter.topic);

    match filter.blocks {
        BlockRange::Bounded { from, to } => alloy_filter.from_block(from).to_block(to),
        BlockRange::Live => alloy_filter,
    }
}

fn to_l1_log(log: types::Log) -> Result<L1Log> {
    let missing = |field: &str| Error::Other(format!("log is missing its {field}"));

    Ok(L1Log {
        address: log.inner.address,
        topics: log.inner.data.topics().to_vec(),
        block_number: log.block_number.ok_or_else(|| missing("block number"))?,
        log_index: log.log_index.ok_or_else(|| missing("log index"))?,
        transaction_hash: log.transaction_hash.ok_or_else(|| missing("transaction hash"))?,
        data: log.inner.data.data,
    })
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, Bytes, LogData, address};
    use pretty_assertions::assert_eq;

    use super::*;

    fn rpc_log(block_number: Option<u64>) -> types::Log {
        types::Log {
            inner: alloy::primitives::Log {
                address: address!("4200000000000000000000000000000000000007"),
                data: LogData::new_unchecked(
                    vec![B256::repeat_byte(1), B256::repeat_byte(2)],
                    Bytes::from_static(&[1, 2, 3]),
                ),
            },
            block_hash: Some(B256::repeat_byte(9)),
            block_number,
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(7)),
            transaction_index: Some(0),
            log_index: Some(4),
            removed: false,
        }
    }

    #[test]
    fn converts_mined_logs() {
        let log = to_l1_log(rpc_log(Some(12))).unwrap();

        assert_eq!(
            log,
            L1Log {
                address: address!("4200000000000000000000000000000000000007"),
                topics: vec![B256::repeat_byte(1), B256::repeat_byte(2)],
                data: Bytes::from_static(&[1, 2, 3]),
                block_number: 12,
                log_index: 4,
                transaction_hash: B256::repeat_byte(7),
            }
        );
    }

    #[test]
    fn pending_logs_are_rejected() {
        let err = to_l1_log(rpc_log(None)).unwrap_err();

        assert!(err.to_string().contains("block number"));
    }

    #[test]
    fn bounded_filters_carry_the_block_range() {
        let filter = to_alloy_filter(&LogFilter::new(Address::ZERO, B256::repeat_byte(3), 5..=9));

        assert_eq!(filter.get_from_block(), Some(5));
        assert_eq!(filter.get_to_block(), Some(9));
    }

    #[test]
    fn live_filters_have_no_block_range() {
        let filter = to_alloy_filter(&LogFilter::live(Address::ZERO, B256::repeat_byte(3)));

        assert_eq!(filter.get_from_block(), None);
        assert_eq!(filter.get_to_block(), None);
    }
}
