use serde::Serialize;
use services::{
    Layer, MessageWatcher,
    message_watcher::port::Api,
    types::{B256, TransactionReceipt},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    L1,
    config::{Config, Direction, RelayStatusArgs},
    errors::Result,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStatus {
    pub message: B256,
    /// Absent while the message waits to be relayed.
    pub relay: Option<Relay>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relay {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub block_hash: B256,
    pub succeeded: bool,
}

impl From<TransactionReceipt> for Relay {
    fn from(receipt: TransactionReceipt) -> Self {
        Self {
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            block_hash: receipt.block_hash,
            succeeded: receipt.succeeded,
        }
    }
}

/// Prints, as JSON, where each message sent by `args.tx_hash` was relayed. Ctrl-C stops a
/// `--wait`.
pub async fn run(config: &Config, l1: L1, l2: L1, args: RelayStatusArgs) -> Result<()> {
    let watcher = MessageWatcher::new(
        Layer::new(l1, config.eth.messenger_address),
        Layer::new(l2, config.l2.messenger_address),
    )
    .with_horizon(config.app.watcher_horizon);

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let statuses = relay_statuses(&watcher, &args, &cancel).await;
    interrupt.abort();

    println!("{}", serde_json::to_string_pretty(&statuses?)?);

    Ok(())
}

pub async fn relay_statuses<A, B>(
    watcher: &MessageWatcher<A, B>,
    args: &RelayStatusArgs,
    cancel: &CancellationToken,
) -> Result<Vec<RelayStatus>>
where
    A: Api,
    B: Api,
{
    let digests = match args.direction {
        Direction::L1ToL2 => watcher.digests_from_l1_tx(args.tx_hash).await?,
        Direction::L2ToL1 => watcher.digests_from_l2_tx(args.tx_hash).await?,
    };

    if digests.is_empty() {
        warn!("transaction {} sent no cross domain messages", args.tx_hash);
    }

    let mut statuses = Vec::with_capacity(digests.len());
    for message in digests {
        let receipt = match args.direction {
            Direction::L1ToL2 => {
                watcher
                    .l1_to_l2_confirmation(message, args.wait, cancel)
                    .await?
            }
            Direction::L2ToL1 => {
                watcher
                    .l2_to_l1_confirmation(message, args.wait, cancel)
                    .await?
            }
        };

        if receipt.is_none() {
            info!("message {message} has not been relayed yet");
        }

        statuses.push(RelayStatus {
            message,
            relay: receipt.map(Relay::from),
        });
    }

    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use services::types::{Bytes, L1Transaction};
    use test_helpers::{MESSENGER_ADDRESS, chain::InMemoryChain, events};

    use super::*;

    fn tx(hash: B256) -> L1Transaction {
        L1Transaction {
            hash,
            from: MESSENGER_ADDRESS,
            input: Bytes::new(),
            block_number: None,
        }
    }

    fn watcher(
        l1: &InMemoryChain,
        l2: &InMemoryChain,
    ) -> MessageWatcher<InMemoryChain, InMemoryChain> {
        MessageWatcher::new(
            Layer::new(l1.clone(), MESSENGER_ADDRESS),
            Layer::new(l2.clone(), MESSENGER_ADDRESS),
        )
    }

    fn args(tx_hash: B256, direction: Direction) -> RelayStatusArgs {
        RelayStatusArgs {
            tx_hash,
            direction,
            wait: false,
        }
    }

    #[tokio::test]
    async fn reports_relayed_and_pending_messages() {
        // given
        let l1 = InMemoryChain::new();
        let l2 = InMemoryChain::new();
        let sending_tx = B256::repeat_byte(1);
        l2.include(
            7,
            70,
            tx(sending_tx),
            vec![
                events::sent_message(MESSENGER_ADDRESS, Bytes::from_static(b"withdraw")),
                events::sent_message(MESSENGER_ADDRESS, Bytes::from_static(b"withdraw more")),
            ],
        );
        let watcher = watcher(&l1, &l2);
        let digests = watcher.digests_from_l2_tx(sending_tx).await.unwrap();

        let relaying_tx = B256::repeat_byte(2);
        l1.include(
            30,
            300,
            tx(relaying_tx),
            vec![events::relayed_message(MESSENGER_ADDRESS, digests[0])],
        );

        // when
        let statuses = relay_statuses(
            &watcher,
            &args(sending_tx, Direction::L2ToL1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        // then
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].message, digests[0]);
        let relay = statuses[0].relay.as_ref().expect("first message to be relayed");
        assert_eq!(relay.transaction_hash, relaying_tx);
        assert_eq!(relay.block_number, 30);
        assert_eq!(
            statuses[1],
            RelayStatus {
                message: digests[1],
                relay: None
            }
        );
    }

    #[tokio::test]
    async fn unknown_transactions_have_nothing_to_report() {
        // given
        let l1 = InMemoryChain::new();
        let l2 = InMemoryChain::new();

        // when
        let statuses = relay_statuses(
            &watcher(&l1, &l2),
            &args(B256::repeat_byte(9), Direction::L1ToL2),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        // then
        assert!(statuses.is_empty());
    }
}
