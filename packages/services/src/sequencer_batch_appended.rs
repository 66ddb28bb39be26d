pub mod service {
    use alloy::sol_types::SolEvent;
    use tracing::{debug, warn};

    use crate::{
        Error, Result,
        abi::{SequencerBatchAppended, TransactionBatchAppended},
        batch_codec::{self, BatchPosition},
        event_handler::{EventHandler, L1Event},
        types::{
            Address, B256, Bytes, L1Log, LogFilter, TransactionBatchEntry, TransactionEntry, U256,
            storage::WriteSet,
        },
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SequencerBatchAppendedArgs {
        pub starting_queue_index: u64,
        pub num_queue_elements: u64,
        pub total_elements: u64,
    }

    /// Context not carried by the `SequencerBatchAppended` log: the containing L1 transaction and
    /// block, and the fields of the companion `TransactionBatchAppended` log.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SequencerBatchAppendedExtraData {
        pub timestamp: u64,
        pub block_number: u64,
        pub submitter: Address,
        pub l1_transaction_hash: B256,
        pub l1_transaction_data: Bytes,

        pub batch_index: u64,
        pub batch_root: B256,
        pub batch_size: u64,
        pub prev_total_elements: u64,
        pub batch_extra_data: Bytes,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ParsedSequencerBatch {
        pub batch_entry: TransactionBatchEntry,
        pub transaction_entries: Vec<TransactionEntry>,
    }

    #[derive(Debug, Clone, Copy, Default)]
    pub struct SequencerBatchAppendedHandler;

    impl SequencerBatchAppendedHandler {
        pub fn new() -> Self {
            Self
        }

        async fn companion_event<L1>(&self, log: &L1Log, l1: &L1) -> Result<TransactionBatchAppended>
        where
            L1: super::port::l1::Api,
        {
            let missing = || Error::MissingCompanionEvent {
                transaction_hash: log.transaction_hash,
                expected_log_index: log.log_index.saturating_sub(1),
            };

            let expected_log_index = log.log_index.checked_sub(1).ok_or_else(missing)?;

            let filter = LogFilter::new(
                log.address,
                TransactionBatchAppended::SIGNATURE_HASH,
                log.block_number..=log.block_number,
            );

            let companion = l1
                .logs(filter)
                .await?
                .into_iter()
                .find(|candidate| {
                    candidate.transaction_hash == log.transaction_hash
                        && candidate.log_index == expected_log_index
                })
                .ok_or_else(missing)?;

            Ok(TransactionBatchAppended::decode_raw_log(
                companion.topics.iter().copied(),
                &companion.data,
            )?)
        }
    }

    impl<L1, Db> EventHandler<L1, Db> for SequencerBatchAppendedHandler
    where
        L1: super::port::l1::Api,
        Db: super::port::Storage,
    {
        type Args = SequencerBatchAppendedArgs;
        type ExtraData = SequencerBatchAppendedExtraData;
        type Parsed = ParsedSequencerBatch;

        fn topic(&self) -> B256 {
            SequencerBatchAppended::SIGNATURE_HASH
        }

        fn decode_args(&self, log: &L1Log) -> Result<Self::Args> {
            let event = SequencerBatchAppended::decode_raw_log(log.topics.iter().copied(), &log.data)?;

            Ok(SequencerBatchAppendedArgs {
                starting_queue_index: to_u64(event._startingQueueIndex, "_startingQueueIndex")?,
                num_queue_elements: to_u64(event._numQueueElements, "_numQueueElements")?,
                total_elements: to_u64(event._totalElements, "_totalElements")?,
            })
        }

        async fn fetch_extra_data(
            &self,
            event: &L1Event<Self::Args>,
            l1: &L1,
        ) -> Result<Self::ExtraData> {
            let log = &event.log;

            let transaction = l1
                .get_transaction(log.transaction_hash)
                .await?
                .ok_or_else(|| {
                    Error::Other(format!("L1 tx {} not found", log.transaction_hash))
                })?;

            let block = l1.get_block(log.block_number).await?.ok_or_else(|| {
                Error::Other(format!("L1 block {} not found", log.block_number))
            })?;

            let companion = self.companion_event(log, l1).await?;

            Ok(SequencerBatchAppendedExtraData {
                timestamp: block.timestamp,
                block_number: block.number,
                submitter: transaction.from,
                l1_transaction_hash: transaction.hash,
                l1_transaction_data: transaction.input,
                batch_index: to_u64(companion._batchIndex, "_batchIndex")?,
                batch_root: companion._batchRoot,
                batch_size: to_u64(companion._batchSize, "_batchSize")?,
                prev_total_elements: to_u64(companion._prevTotalElements, "_prevTotalElements")?,
                batch_extra_data: companion._extraData,
            })
        }

        fn parse_event(
            &self,
            event: &L1Event<Self::Args>,
            extra: Self::ExtraData,
            chain_id: u64,
        ) -> Result<Self::Parsed> {
            let position = BatchPosition {
                prior_element_count: extra.prev_total_elements,
                batch_index: extra.batch_index,
                starting_queue_index: event.args.starting_queue_index,
                batch_size: extra.batch_size,
            };

            let batch = batch_codec::decode_batch(&extra.l1_transaction_data, position, chain_id)?;

            for anomaly in &batch.anomalies {
                warn!(
                    "batch {} context {} goes back in time: timestamp {} -> {}, block {} -> {}",
                    extra.batch_index,
                    anomaly.context_index,
                    anomaly.previous.timestamp,
                    anomaly.current.timestamp,
                    anomaly.previous.block_number,
                    anomaly.current.block_number,
                );
            }

            let undecodable = batch.undecodable_sequencer_transactions();
            if undecodable > 0 {
                debug!(
                    "batch {}: {undecodable} sequencer transactions could not be decoded",
                    extra.batch_index
                );
            }

            if batch.entries.len() as u64 != extra.batch_size {
                warn!(
                    "batch {} announces {} elements but its calldata holds {}",
                    extra.batch_index,
                    extra.batch_size,
                    batch.entries.len()
                );
            }

            Ok(ParsedSequencerBatch {
                batch_entry: TransactionBatchEntry {
                    index: extra.batch_index,
                    root: extra.batch_root,
                    size: extra.batch_size,
                    prev_total_elements: extra.prev_total_elements,
                    extra_data: extra.batch_extra_data,
                    block_number: extra.block_number,
                    timestamp: extra.timestamp,
                    submitter: extra.submitter,
                    l1_transaction_hash: extra.l1_transaction_hash,
                },
                transaction_entries: batch.entries,
            })
        }

        async fn store_event(&self, parsed: Self::Parsed, storage: &Db) -> Result<()> {
            let mut writes = WriteSet::new();

            for entry in &parsed.transaction_entries {
                if let Some(queue_index) = entry.queue_index {
                    writes.put_queue_index_mapping(queue_index, entry.index);
                }
            }

            writes.put_batch_entries([parsed.batch_entry]);
            writes.put_transaction_entries(parsed.transaction_entries);

            storage.commit(writes).await
        }
    }

    fn to_u64(value: U256, field: &str) -> Result<u64> {
        u64::try_from(value).map_err(|_| Error::Other(format!("{field} value {value} exceeds u64")))
    }
}

pub mod port {
    use crate::{Result, types::storage::WriteSet};

    pub mod l1 {
        use crate::{
            Result,
            types::{B256, L1Block, L1Log, L1Transaction, LogFilter},
        };

        #[allow(async_fn_in_trait)]
        #[trait_variant::make(Send)]
        #[cfg_attr(feature = "test-helpers", mockall::automock)]
        pub trait Api: Send + Sync {
            async fn block_number(&self) -> Result<u64>;
            async fn get_transaction(&self, hash: B256) -> Result<Option<L1Transaction>>;
            async fn get_block(&self, number: u64) -> Result<Option<L1Block>>;
            async fn logs(&self, filter: LogFilter) -> Result<Vec<L1Log>>;
        }
    }

    #[allow(async_fn_in_trait)]
    #[trait_variant::make(Send)]
    #[cfg_attr(feature = "test-helpers", mockall::automock)]
    pub trait Storage: Send + Sync {
        /// Persists the whole write set atomically. Entries are keyed by their index, so
        /// committing the same write set twice leaves the store unchanged.
        async fn commit(&self, writes: WriteSet) -> Result<()>;
    }
}

#[cfg(test)]
mod tests {
    use alloy::{primitives::address, sol_types::SolEvent};
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;

    use super::{
        port::{MockStorage, l1::MockApi},
        service::*,
    };
    use crate::{
        Error,
        abi::{SequencerBatchAppended, TransactionBatchAppended},
        event_handler::{EventHandler, handle_event},
        types::{
            Address, B256, Bytes, L1Block, L1Log, L1Transaction, QueueOrigin, U256,
        },
    };

    const CTC: Address = address!("5e4e65926ba27467555eb562121fac00d24e9dd2");
    const CHAIN_ID: u64 = 10;

    fn tx_hash() -> B256 {
        B256::repeat_byte(0xab)
    }

    fn sequencer_batch_appended_log(log_index: u64, starting_queue_index: u64) -> L1Log {
        let event = SequencerBatchAppended {
            _startingQueueIndex: U256::from(starting_queue_index),
            _numQueueElements: U256::from(1),
            _totalElements: U256::from(103),
        };
        let encoded = event.encode_log_data();

        L1Log {
            address: CTC,
            topics: encoded.topics().to_vec(),
            data: encoded.data,
            block_number: 500,
            log_index,
            transaction_hash: tx_hash(),
        }
    }

    fn transaction_batch_appended_log(log_index: u64, transaction_hash: B256) -> L1Log {
        let event = TransactionBatchAppended {
            _batchIndex: U256::from(7),
            _batchRoot: B256::repeat_byte(0x11),
            _batchSize: U256::from(3),
            _prevTotalElements: U256::from(100),
            _extraData: Bytes::from_static(b"extra"),
        };
        let encoded = event.encode_log_data();

        L1Log {
            address: CTC,
            topics: encoded.topics().to_vec(),
            data: encoded.data,
            block_number: 500,
            log_index,
            transaction_hash,
        }
    }

    /// One context with two undecodable sequencer transactions and one queued transaction.
    fn batch_calldata() -> Bytes {
        let mut data = vec![0u8; 12];
        data.extend([0, 0, 1]);
        data.extend([0, 0, 2, 0, 0, 1, 0, 0, 0, 0, 9, 0, 0, 0, 0, 8]);
        data.extend([0, 0, 2, 0xca, 0xfe]);
        data.extend([0, 0, 1, 0x01]);
        data.into()
    }

    fn l1_with(companions: Vec<L1Log>) -> MockApi {
        let mut l1 = MockApi::new();
        l1.expect_get_transaction()
            .with(eq(tx_hash()))
            .return_once(|_| {
                Box::pin(async {
                    Ok(Some(L1Transaction {
                        hash: tx_hash(),
                        from: address!("00000000000000000000000000000000000000aa"),
                        input: batch_calldata(),
                        block_number: Some(500),
                    }))
                })
            });
        l1.expect_get_block().with(eq(500)).return_once(|_| {
            Box::pin(async {
                Ok(Some(L1Block {
                    number: 500,
                    hash: B256::repeat_byte(0x50),
                    timestamp: 1_700_000_000,
                }))
            })
        });
        l1.expect_logs().return_once(move |filter| {
            assert_eq!(filter.topic, TransactionBatchAppended::SIGNATURE_HASH);
            assert_eq!(filter.address, CTC);
            Box::pin(async move { Ok(companions) })
        });
        l1
    }

    #[test]
    fn decodes_args() {
        let handler = SequencerBatchAppendedHandler::new();

        let args = EventHandler::<MockApi, MockStorage>::decode_args(
            &handler,
            &sequencer_batch_appended_log(4, 33),
        )
        .unwrap();

        assert_eq!(
            args,
            SequencerBatchAppendedArgs {
                starting_queue_index: 33,
                num_queue_elements: 1,
                total_elements: 103,
            }
        );
    }

    #[tokio::test]
    async fn stores_batch_entries_and_queue_mappings_in_one_commit() {
        // given
        let l1 = l1_with(vec![
            transaction_batch_appended_log(3, B256::repeat_byte(0xcd)),
            transaction_batch_appended_log(3, tx_hash()),
        ]);

        let mut storage = MockStorage::new();
        storage.expect_commit().times(1).return_once(|writes| {
            let batch = &writes.batch_entries()[0];
            assert_eq!(batch.index, 7);
            assert_eq!(batch.root, B256::repeat_byte(0x11));
            assert_eq!(batch.size, 3);
            assert_eq!(batch.prev_total_elements, 100);
            assert_eq!(batch.extra_data, Bytes::from_static(b"extra"));
            assert_eq!(batch.block_number, 500);
            assert_eq!(batch.timestamp, 1_700_000_000);
            assert_eq!(
                batch.submitter,
                address!("00000000000000000000000000000000000000aa")
            );
            assert_eq!(batch.l1_transaction_hash, tx_hash());

            let entries = writes.transaction_entries();
            let indices: Vec<_> = entries.iter().map(|e| e.index).collect();
            assert_eq!(indices, vec![100, 101, 102]);
            assert_eq!(entries[0].queue_origin, QueueOrigin::Sequencer);
            assert_eq!(entries[0].timestamp, 9);
            assert_eq!(entries[0].block_number, 8);
            assert_eq!(entries[2].queue_origin, QueueOrigin::Queued);
            assert_eq!(entries[2].queue_index, Some(33));

            let mappings: Vec<_> = writes
                .queue_index_mappings()
                .iter()
                .map(|m| (m.queue_index, m.index))
                .collect();
            assert_eq!(mappings, vec![(33, 102)]);

            Box::pin(async { Ok(()) })
        });

        // when
        handle_event(
            &SequencerBatchAppendedHandler::new(),
            sequencer_batch_appended_log(4, 33),
            &l1,
            &storage,
            CHAIN_ID,
        )
        .await
        .unwrap();

        // then
        // expectations are verified by the mocks on drop
    }

    #[tokio::test]
    async fn companion_with_wrong_log_index_is_missing() {
        // given
        let l1 = l1_with(vec![transaction_batch_appended_log(1, tx_hash())]);

        let mut storage = MockStorage::new();
        storage.expect_commit().never();

        // when
        let err = handle_event(
            &SequencerBatchAppendedHandler::new(),
            sequencer_batch_appended_log(4, 33),
            &l1,
            &storage,
            CHAIN_ID,
        )
        .await
        .unwrap_err();

        // then
        let Error::MissingCompanionEvent {
            transaction_hash,
            expected_log_index,
        } = err
        else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(transaction_hash, tx_hash());
        assert_eq!(expected_log_index, 3);
    }

    #[tokio::test]
    async fn companion_from_another_transaction_is_missing() {
        let l1 = l1_with(vec![transaction_batch_appended_log(3, B256::repeat_byte(0xcd))]);

        let mut storage = MockStorage::new();
        storage.expect_commit().never();

        let err = handle_event(
            &SequencerBatchAppendedHandler::new(),
            sequencer_batch_appended_log(4, 33),
            &l1,
            &storage,
            CHAIN_ID,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::MissingCompanionEvent { .. }));
    }

    #[tokio::test]
    async fn malformed_calldata_aborts_the_occurrence() {
        // given
        let mut l1 = MockApi::new();
        l1.expect_get_transaction().return_once(|_| {
            Box::pin(async {
                Ok(Some(L1Transaction {
                    hash: tx_hash(),
                    from: Address::ZERO,
                    input: Bytes::from_static(&[0; 5]),
                    block_number: Some(500),
                }))
            })
        });
        l1.expect_get_block().return_once(|_| {
            Box::pin(async {
                Ok(Some(L1Block {
                    number: 500,
                    hash: B256::ZERO,
                    timestamp: 1,
                }))
            })
        });
        l1.expect_logs().return_once(|_| {
            Box::pin(async { Ok(vec![transaction_batch_appended_log(3, tx_hash())]) })
        });

        let mut storage = MockStorage::new();
        storage.expect_commit().never();

        // when
        let err = handle_event(
            &SequencerBatchAppendedHandler::new(),
            sequencer_batch_appended_log(4, 33),
            &l1,
            &storage,
            CHAIN_ID,
        )
        .await
        .unwrap_err();

        // then
        assert!(matches!(err, Error::MalformedBatch(_)));
    }
}
