pub mod service {
    use alloy::{primitives::keccak256, sol_types::SolEvent};
    use futures::StreamExt;
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, info, warn};

    use super::port::{Api, LogSubscription};
    use crate::{
        Error, Result,
        abi::{FailedRelayedMessage, RelayedMessage, SentMessage},
        types::{Address, B256, L1Log, LogFilter, SubscriptionId, TransactionReceipt},
    };

    /// How far back, in blocks, to look for an already relayed message.
    pub const DEFAULT_HORIZON: u64 = 10_000_000;

    /// One side of the bridge: a node connection and the messenger deployed on that chain.
    #[derive(Debug, Clone)]
    pub struct Layer<A> {
        pub api: A,
        pub messenger_address: Address,
    }

    impl<A> Layer<A> {
        pub fn new(api: A, messenger_address: Address) -> Self {
            Self {
                api,
                messenger_address,
            }
        }
    }

    pub struct MessageWatcher<L1, L2> {
        l1: Layer<L1>,
        l2: Layer<L2>,
        horizon: u64,
    }

    impl<L1, L2> MessageWatcher<L1, L2> {
        pub fn new(l1: Layer<L1>, l2: Layer<L2>) -> Self {
            Self {
                l1,
                l2,
                horizon: DEFAULT_HORIZON,
            }
        }

        pub fn with_horizon(mut self, horizon: u64) -> Self {
            self.horizon = horizon;
            self
        }
    }

    impl<L1, L2> MessageWatcher<L1, L2>
    where
        L1: Api,
        L2: Api,
    {
        /// Digests of the messages an L1 transaction sent towards L2.
        pub async fn digests_from_l1_tx(&self, tx_hash: B256) -> Result<Vec<B256>> {
            message_digests_from_tx(&self.l1, tx_hash).await
        }

        /// Digests of the messages an L2 transaction sent towards L1.
        pub async fn digests_from_l2_tx(&self, tx_hash: B256) -> Result<Vec<B256>> {
            message_digests_from_tx(&self.l2, tx_hash).await
        }

        /// Looks for the relay of an L1 message on L2.
        pub async fn l1_to_l2_confirmation(
            &self,
            digest: B256,
            poll_for_pending: bool,
            cancel: &CancellationToken,
        ) -> Result<Option<TransactionReceipt>> {
            resolve_confirmation(&self.l2, digest, self.horizon, poll_for_pending, cancel).await
        }

        /// Looks for the relay of an L2 message on L1.
        pub async fn l2_to_l1_confirmation(
            &self,
            digest: B256,
            poll_for_pending: bool,
            cancel: &CancellationToken,
        ) -> Result<Option<TransactionReceipt>> {
            resolve_confirmation(&self.l1, digest, self.horizon, poll_for_pending, cancel).await
        }
    }

    /// Hashes every message the layer's messenger emitted in `tx_hash`. Unknown transactions have
    /// no messages.
    pub async fn message_digests_from_tx<A: Api>(layer: &Layer<A>, tx_hash: B256) -> Result<Vec<B256>> {
        let Some(receipt) = layer.api.transaction_receipt(tx_hash).await? else {
            return Ok(vec![]);
        };

        receipt
            .logs
            .iter()
            .filter(|log| {
                log.address == layer.messenger_address
                    && log.event_signature() == Some(SentMessage::SIGNATURE_HASH)
            })
            .map(|log| {
                let event = SentMessage::decode_raw_log(log.topics.iter().copied(), &log.data)?;
                Ok(keccak256(&event.message))
            })
            .collect()
    }

    /// Finds the receipt of the transaction that relayed the message with `digest` on `layer`,
    /// successfully or not.
    ///
    /// Searches the last `horizon` blocks first. If nothing is found and `poll_for_pending` is set,
    /// waits for the relay to happen until `cancel` fires.
    pub async fn resolve_confirmation<A: Api>(
        layer: &Layer<A>,
        digest: B256,
        horizon: u64,
        poll_for_pending: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<TransactionReceipt>> {
        let head = layer.api.block_number().await?;
        let from = head.saturating_sub(horizon);

        let mut matches = confirmations_in_range(layer, digest, from, head).await?;

        match matches.len() {
            0 if !poll_for_pending => Ok(None),
            0 => wait_for_confirmation(layer, digest, head, cancel).await.map(Some),
            1 => {
                let confirmation = matches.remove(0);
                receipt_of(layer, &confirmation).await.map(Some)
            }
            n => Err(Error::AmbiguousConfirmation { digest, matches: n }),
        }
    }

    async fn confirmations_in_range<A: Api>(
        layer: &Layer<A>,
        digest: B256,
        from: u64,
        to: u64,
    ) -> Result<Vec<L1Log>> {
        let mut matches = vec![];

        for topic in confirmation_topics() {
            let filter = LogFilter::new(layer.messenger_address, topic, from..=to);
            let logs = layer.api.logs(filter).await?;
            matches.extend(logs.into_iter().filter(|log| confirms(log, digest)));
        }

        Ok(matches)
    }

    async fn wait_for_confirmation<A: Api>(
        layer: &Layer<A>,
        digest: B256,
        searched_up_to: u64,
        cancel: &CancellationToken,
    ) -> Result<TransactionReceipt> {
        let mut subscriptions = Subscriptions::new(&layer.api);
        let mut streams = vec![];
        for topic in confirmation_topics() {
            let LogSubscription { id, logs } = layer
                .api
                .subscribe_logs(LogFilter::live(layer.messenger_address, topic))
                .await?;
            subscriptions.track(id);
            streams.push(logs);
        }

        // Blocks mined between the historical search and the subscriptions going live.
        let head = layer.api.block_number().await?;
        if head > searched_up_to {
            let mut missed = confirmations_in_range(layer, digest, searched_up_to + 1, head).await?;
            if missed.len() > 1 {
                return Err(Error::AmbiguousConfirmation {
                    digest,
                    matches: missed.len(),
                });
            }
            if let Some(confirmation) = missed.pop() {
                drop(subscriptions);
                return receipt_of(layer, &confirmation).await;
            }
        }

        debug!("waiting for the relay of message {digest}");

        let mut logs = futures::stream::select_all(streams);
        let next_match = async {
            while let Some(log) = logs.next().await {
                if confirms(&log, digest) {
                    return Some(log);
                }
            }
            None
        };

        let confirmation = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled(digest)),
            confirmation = next_match => confirmation,
        };

        drop(logs);
        drop(subscriptions);

        let Some(confirmation) = confirmation else {
            return Err(Error::Network(format!(
                "log subscription ended while waiting for the relay of message {digest}"
            )));
        };

        info!(
            "message {digest} relayed in tx {}",
            confirmation.transaction_hash
        );

        receipt_of(layer, &confirmation).await
    }

    async fn receipt_of<A: Api>(layer: &Layer<A>, log: &L1Log) -> Result<TransactionReceipt> {
        layer
            .api
            .transaction_receipt(log.transaction_hash)
            .await?
            .ok_or_else(|| {
                Error::Other(format!(
                    "no receipt for relay tx {} found in block {}",
                    log.transaction_hash, log.block_number
                ))
            })
    }

    fn confirmation_topics() -> [B256; 2] {
        [
            RelayedMessage::SIGNATURE_HASH,
            FailedRelayedMessage::SIGNATURE_HASH,
        ]
    }

    fn confirms(log: &L1Log, digest: B256) -> bool {
        log.data.as_ref() == digest.as_slice()
    }

    /// Cancels the tracked subscriptions when dropped, whichever way the wait ends.
    struct Subscriptions<'a, A: Api> {
        api: &'a A,
        ids: Vec<SubscriptionId>,
    }

    impl<'a, A: Api> Subscriptions<'a, A> {
        fn new(api: &'a A) -> Self {
            Self { api, ids: vec![] }
        }

        fn track(&mut self, id: SubscriptionId) {
            self.ids.push(id);
        }
    }

    impl<A: Api> Drop for Subscriptions<'_, A> {
        fn drop(&mut self) {
            for id in self.ids.drain(..) {
                if let Err(e) = self.api.unsubscribe(id) {
                    warn!("failed to cancel log subscription {id}: {e}");
                }
            }
        }
    }
}

pub mod port {
    use futures::stream::BoxStream;

    use crate::{
        Result,
        types::{B256, L1Log, LogFilter, SubscriptionId, TransactionReceipt},
    };

    pub struct LogSubscription {
        pub id: SubscriptionId,
        pub logs: BoxStream<'static, L1Log>,
    }

    impl std::fmt::Debug for LogSubscription {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("LogSubscription")
                .field("id", &self.id)
                .finish_non_exhaustive()
        }
    }

    #[allow(async_fn_in_trait)]
    #[trait_variant::make(Send)]
    #[cfg_attr(feature = "test-helpers", mockall::automock)]
    pub trait Api: Send + Sync {
        async fn block_number(&self) -> Result<u64>;
        async fn logs(&self, filter: LogFilter) -> Result<Vec<L1Log>>;
        async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription>;
        fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
        async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>>;
    }
}
