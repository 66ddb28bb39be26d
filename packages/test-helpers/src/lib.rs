#![deny(unused_crate_dependencies)]

use alloy::primitives::{Address, B256, Bytes, address};
use services::{
    L1Ingestion, SequencerBatchAppendedHandler,
    l1_ingestion::service::Config,
    types::{L1Log, L1Transaction},
};

use crate::{chain::InMemoryChain, storage::InMemoryStorage};

pub const CTC_ADDRESS: Address = address!("5e4e65926ba27467555eb562121fac00d24e9dd2");
pub const MESSENGER_ADDRESS: Address = address!("4200000000000000000000000000000000000007");
pub const SUBMITTER: Address = address!("00000000000000000000000000000000000000aa");
pub const L2_CHAIN_ID: u64 = 10;

/// Packs sequencer batches the way the canonical transaction chain expects them in calldata.
pub mod calldata {
    use alloy::primitives::Bytes;

    #[derive(Debug, Clone, Default)]
    pub struct BatchCalldata {
        contexts: Vec<Context>,
    }

    #[derive(Debug, Clone)]
    struct Context {
        sequenced: Vec<Vec<u8>>,
        queued: u64,
        timestamp: u64,
        block_number: u64,
    }

    impl BatchCalldata {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn context(
            mut self,
            timestamp: u64,
            block_number: u64,
            sequenced: Vec<Vec<u8>>,
            queued: u64,
        ) -> Self {
            self.contexts.push(Context {
                sequenced,
                queued,
                timestamp,
                block_number,
            });
            self
        }

        pub fn num_elements(&self) -> u64 {
            self.contexts
                .iter()
                .map(|c| c.sequenced.len() as u64 + c.queued)
                .sum()
        }

        pub fn num_queued(&self) -> u64 {
            self.contexts.iter().map(|c| c.queued).sum()
        }

        pub fn build(&self) -> Bytes {
            // selector and append parameters, skipped by the decoder
            let mut data = vec![0u8; 12];
            data.extend(be(self.contexts.len() as u64, 3));

            for context in &self.contexts {
                data.extend(be(context.sequenced.len() as u64, 3));
                data.extend(be(context.queued, 3));
                data.extend(be(context.timestamp, 5));
                data.extend(be(context.block_number, 5));
            }

            for tx in self.contexts.iter().flat_map(|c| &c.sequenced) {
                data.extend(be(tx.len() as u64, 3));
                data.extend(tx);
            }

            data.into()
        }
    }

    fn be(value: u64, len: usize) -> Vec<u8> {
        value.to_be_bytes()[8 - len..].to_vec()
    }
}

pub mod events {
    use alloy::{
        primitives::{Address, B256, Bytes, U256},
        sol_types::SolEvent,
    };
    use services::{
        abi::{RelayedMessage, SentMessage, SequencerBatchAppended, TransactionBatchAppended},
        types::L1Log,
    };

    fn log_of(event: &impl SolEvent, address: Address) -> L1Log {
        let encoded = event.encode_log_data();
        L1Log {
            address,
            topics: encoded.topics().to_vec(),
            data: encoded.data,
            block_number: 0,
            log_index: 0,
            transaction_hash: B256::ZERO,
        }
    }

    pub fn sequencer_batch_appended(
        address: Address,
        starting_queue_index: u64,
        num_queue_elements: u64,
        total_elements: u64,
    ) -> L1Log {
        log_of(
            &SequencerBatchAppended {
                _startingQueueIndex: U256::from(starting_queue_index),
                _numQueueElements: U256::from(num_queue_elements),
                _totalElements: U256::from(total_elements),
            },
            address,
        )
    }

    pub fn transaction_batch_appended(
        address: Address,
        batch_index: u64,
        batch_size: u64,
        prev_total_elements: u64,
    ) -> L1Log {
        log_of(
            &TransactionBatchAppended {
                _batchIndex: U256::from(batch_index),
                _batchRoot: B256::from(U256::from(batch_index)),
                _batchSize: U256::from(batch_size),
                _prevTotalElements: U256::from(prev_total_elements),
                _extraData: Bytes::new(),
            },
            address,
        )
    }

    pub fn sent_message(address: Address, message: Bytes) -> L1Log {
        log_of(&SentMessage { message }, address)
    }

    pub fn relayed_message(address: Address, digest: B256) -> L1Log {
        log_of(&RelayedMessage { msgHash: digest }, address)
    }
}

/// An in-memory node: blocks, transactions with their logs, and live log subscriptions.
pub mod chain {
    use std::{
        collections::{BTreeMap, HashMap},
        sync::{Arc, Mutex, MutexGuard},
    };

    use alloy::primitives::{B256, U256};
    use futures::{StreamExt, channel::mpsc};
    use services::{
        Error, Result,
        message_watcher::port::LogSubscription,
        types::{
            L1Block, L1Log, L1Transaction, LogFilter, SubscriptionId, TransactionReceipt,
        },
    };

    #[derive(Default)]
    struct State {
        head: u64,
        blocks: BTreeMap<u64, L1Block>,
        transactions: HashMap<B256, L1Transaction>,
        receipts: HashMap<B256, TransactionReceipt>,
        logs: Vec<L1Log>,
        subscribers: Vec<(SubscriptionId, LogFilter, mpsc::UnboundedSender<L1Log>)>,
        next_subscription: u64,
        unsubscribed: Vec<SubscriptionId>,
        log_queries: usize,
    }

    #[derive(Clone, Default)]
    pub struct InMemoryChain {
        state: Arc<Mutex<State>>,
    }

    impl InMemoryChain {
        pub fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> MutexGuard<'_, State> {
            self.state.lock().expect("chain state lock poisoned")
        }

        pub fn set_head(&self, height: u64) {
            self.state().head = height;
        }

        pub fn head(&self) -> u64 {
            self.state().head
        }

        /// Includes `tx` in block `block_number` together with `logs`. Log positions are assigned
        /// in order, following the logs already in that block.
        pub fn include(
            &self,
            block_number: u64,
            timestamp: u64,
            tx: L1Transaction,
            logs: Vec<L1Log>,
        ) -> Vec<L1Log> {
            let mut state = self.state();

            let block = state
                .blocks
                .entry(block_number)
                .or_insert_with(|| L1Block {
                    number: block_number,
                    hash: B256::from(U256::from(block_number)),
                    timestamp,
                })
                .clone();

            let first_log_index = state
                .logs
                .iter()
                .filter(|log| log.block_number == block_number)
                .count() as u64;

            let logs: Vec<_> = logs
                .into_iter()
                .enumerate()
                .map(|(i, log)| L1Log {
                    block_number,
                    log_index: first_log_index + i as u64,
                    transaction_hash: tx.hash,
                    ..log
                })
                .collect();

            state.receipts.insert(
                tx.hash,
                TransactionReceipt {
                    transaction_hash: tx.hash,
                    block_number,
                    block_hash: block.hash,
                    succeeded: true,
                    logs: logs.clone(),
                },
            );
            state.transactions.insert(
                tx.hash,
                L1Transaction {
                    block_number: Some(block_number),
                    ..tx
                },
            );
            state.logs.extend(logs.iter().cloned());
            state.head = state.head.max(block_number);

            for log in &logs {
                for (_, filter, sender) in &state.subscribers {
                    if filter.matches(log) {
                        let _ = sender.unbounded_send(log.clone());
                    }
                }
            }

            logs
        }

        /// Number of historical log queries served so far.
        pub fn log_queries(&self) -> usize {
            self.state().log_queries
        }

        pub fn active_subscriptions(&self) -> usize {
            self.state().subscribers.len()
        }

        pub fn unsubscribed(&self) -> Vec<SubscriptionId> {
            self.state().unsubscribed.clone()
        }

        fn matching_logs(&self, filter: &LogFilter) -> Vec<L1Log> {
            let mut state = self.state();
            state.log_queries += 1;
            state
                .logs
                .iter()
                .filter(|log| filter.matches(log))
                .cloned()
                .collect()
        }
    }

    impl services::sequencer_batch_appended::port::l1::Api for InMemoryChain {
        async fn block_number(&self) -> Result<u64> {
            Ok(self.head())
        }

        async fn get_transaction(&self, hash: B256) -> Result<Option<L1Transaction>> {
            Ok(self.state().transactions.get(&hash).cloned())
        }

        async fn get_block(&self, number: u64) -> Result<Option<L1Block>> {
            Ok(self.state().blocks.get(&number).cloned())
        }

        async fn logs(&self, filter: LogFilter) -> Result<Vec<L1Log>> {
            Ok(self.matching_logs(&filter))
        }
    }

    impl services::message_watcher::port::Api for InMemoryChain {
        async fn block_number(&self) -> Result<u64> {
            Ok(self.head())
        }

        async fn logs(&self, filter: LogFilter) -> Result<Vec<L1Log>> {
            Ok(self.matching_logs(&filter))
        }

        async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription> {
            let (sender, receiver) = mpsc::unbounded();

            let mut state = self.state();
            state.next_subscription += 1;
            let id = SubscriptionId(B256::from(U256::from(state.next_subscription)));
            state.subscribers.push((id, filter, sender));

            Ok(LogSubscription {
                id,
                logs: receiver.boxed(),
            })
        }

        fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
            let mut state = self.state();
            let before = state.subscribers.len();
            state.subscribers.retain(|(active, _, _)| *active != id);

            if state.subscribers.len() == before {
                return Err(Error::Network(format!("unknown subscription {id}")));
            }

            state.unsubscribed.push(id);
            Ok(())
        }

        async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
            Ok(self.state().receipts.get(&hash).cloned())
        }
    }
}

pub mod storage {
    use std::{
        collections::BTreeMap,
        sync::{Arc, Mutex, MutexGuard},
    };

    use services::{
        Error, Result,
        types::{
            TransactionBatchEntry, TransactionEntry,
            storage::{QueueIndexMapping, WriteSet},
        },
    };

    #[derive(Default)]
    struct State {
        batches: BTreeMap<u64, TransactionBatchEntry>,
        transactions: BTreeMap<u64, TransactionEntry>,
        queue_index_mappings: BTreeMap<u64, u64>,
        highest_synced_l1_block: Option<u64>,
        commits: usize,
        failing: bool,
    }

    /// Keeps everything in maps keyed the same way the database tables are.
    #[derive(Clone, Default)]
    pub struct InMemoryStorage {
        state: Arc<Mutex<State>>,
    }

    impl InMemoryStorage {
        pub fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> MutexGuard<'_, State> {
            self.state.lock().expect("storage state lock poisoned")
        }

        pub fn fail_commits(&self, failing: bool) {
            self.state().failing = failing;
        }

        pub fn batches(&self) -> Vec<TransactionBatchEntry> {
            self.state().batches.values().cloned().collect()
        }

        pub fn transactions(&self) -> Vec<TransactionEntry> {
            self.state().transactions.values().cloned().collect()
        }

        pub fn queue_index_mappings(&self) -> Vec<QueueIndexMapping> {
            self.state()
                .queue_index_mappings
                .iter()
                .map(|(&queue_index, &index)| QueueIndexMapping { queue_index, index })
                .collect()
        }

        pub fn commits(&self) -> usize {
            self.state().commits
        }

        pub fn highest_synced(&self) -> Option<u64> {
            self.state().highest_synced_l1_block
        }
    }

    impl services::sequencer_batch_appended::port::Storage for InMemoryStorage {
        async fn commit(&self, writes: WriteSet) -> Result<()> {
            let mut state = self.state();
            if state.failing {
                return Err(Error::Storage("connection refused".to_string()));
            }

            let (batches, transactions, mappings) = writes.into_parts();
            for batch in batches {
                state.batches.insert(batch.index, batch);
            }
            for tx in transactions {
                state.transactions.insert(tx.index, tx);
            }
            for mapping in mappings {
                state
                    .queue_index_mappings
                    .insert(mapping.queue_index, mapping.index);
            }
            state.commits += 1;

            Ok(())
        }
    }

    impl services::l1_ingestion::port::Storage for InMemoryStorage {
        async fn highest_synced_l1_block(&self) -> Result<Option<u64>> {
            Ok(self.state().highest_synced_l1_block)
        }

        async fn set_highest_synced_l1_block(&self, height: u64) -> Result<()> {
            self.state().highest_synced_l1_block = Some(height);
            Ok(())
        }
    }
}

/// A submitted batch as seen on L1.
#[derive(Debug, Clone)]
pub struct SubmittedBatch {
    pub tx_hash: B256,
    pub block_number: u64,
    pub sequencer_batch_appended: L1Log,
}

pub struct Setup {
    chain: InMemoryChain,
    db: InMemoryStorage,
}

impl Setup {
    pub fn init() -> Self {
        Self {
            chain: InMemoryChain::new(),
            db: InMemoryStorage::new(),
        }
    }

    pub fn chain(&self) -> InMemoryChain {
        self.chain.clone()
    }

    pub fn db(&self) -> InMemoryStorage {
        self.db.clone()
    }

    /// Appends a batch to the canonical transaction chain in `block_number`: one transaction
    /// carrying `calldata` and emitting the `TransactionBatchAppended` and
    /// `SequencerBatchAppended` pair.
    pub fn submit_batch(
        &self,
        block_number: u64,
        batch_index: u64,
        prev_total_elements: u64,
        starting_queue_index: u64,
        calldata: &calldata::BatchCalldata,
    ) -> SubmittedBatch {
        let tx_hash = B256::from(alloy::primitives::U256::from(
            block_number * 1_000 + batch_index,
        ));
        let size = calldata.num_elements();

        let logs = self.chain.include(
            block_number,
            1_700_000_000 + block_number * 12,
            L1Transaction {
                hash: tx_hash,
                from: SUBMITTER,
                input: calldata.build(),
                block_number: None,
            },
            vec![
                events::transaction_batch_appended(
                    CTC_ADDRESS,
                    batch_index,
                    size,
                    prev_total_elements,
                ),
                events::sequencer_batch_appended(
                    CTC_ADDRESS,
                    starting_queue_index,
                    calldata.num_queued(),
                    prev_total_elements + size,
                ),
            ],
        );

        SubmittedBatch {
            tx_hash,
            block_number,
            sequencer_batch_appended: logs[1].clone(),
        }
    }

    /// An L1 transaction that is not a batch submission but sits in the same block.
    pub fn unrelated_tx(&self, block_number: u64, logs: Vec<L1Log>) -> Vec<L1Log> {
        self.chain.include(
            block_number,
            1_700_000_000 + block_number * 12,
            L1Transaction {
                hash: B256::repeat_byte(block_number as u8),
                from: Address::ZERO,
                input: Bytes::new(),
                block_number: None,
            },
            logs,
        )
    }

    pub fn ingestion(
        &self,
        start_block: u64,
        confirmations: u64,
        max_block_range: u64,
    ) -> L1Ingestion<SequencerBatchAppendedHandler, InMemoryChain, InMemoryStorage> {
        L1Ingestion::new(
            SequencerBatchAppendedHandler::new(),
            self.chain(),
            self.db(),
            Config {
                contract: CTC_ADDRESS,
                start_block,
                confirmations,
                max_block_range,
                chain_id: L2_CHAIN_ID,
            },
        )
    }
}
