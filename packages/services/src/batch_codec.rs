//! Decoding of the packed batch a sequencer posts to the canonical transaction chain.
//!
//! Layout of the calldata, all integers big-endian:
//!
//! ```text
//! [0, 12)             reserved (selector and append parameters)
//! [12, 15)            number of contexts
//! [15, 15 + 16 * n)   contexts: sequenced count (3) | queue count (3) | timestamp (5) | block number (5)
//! ...                 sequencer transactions: length (3) | raw transaction (length)
//! ```

use alloy::{
    consensus::{Transaction as _, TxEnvelope},
    eips::eip2718::Decodable2718,
    primitives::address,
};

use tracing::debug;

use crate::{
    Error, Result,
    types::{
        Address, Bytes, DecodedTransaction, QueueOrigin, TransactionEntry, TransactionSignature,
        U256,
    },
};

pub const SEQUENCER_ENTRYPOINT_ADDRESS: Address =
    address!("4200000000000000000000000000000000000005");
pub const SEQUENCER_GAS_LIMIT: u64 = 8_000_000;

const HEADER_LEN: usize = 12;
const NUM_CONTEXTS_LEN: usize = 3;
const CONTEXTS_OFFSET: usize = HEADER_LEN + NUM_CONTEXTS_LEN;
const CONTEXT_LEN: usize = 16;
const TX_LENGTH_PREFIX_LEN: usize = 3;

/// Where a batch sits in the overall L2 history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPosition {
    /// Number of elements in the chain before this batch. The first entry gets this index.
    pub prior_element_count: u64,
    pub batch_index: u64,
    /// Queue index of the first queued entry in this batch.
    pub starting_queue_index: u64,
    /// Number of elements the batch was appended with. Contexts declaring more are rejected.
    pub batch_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerBatchContext {
    pub sequenced_count: u64,
    pub queue_count: u64,
    pub timestamp: u64,
    pub block_number: u64,
}

/// A context whose timestamp or block number goes backwards compared to the one before it.
/// Reported as is, entries are never reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderingAnomaly {
    pub context_index: u64,
    pub previous: SequencerBatchContext,
    pub current: SequencerBatchContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBatch {
    pub entries: Vec<TransactionEntry>,
    pub num_contexts: u64,
    pub anomalies: Vec<OrderingAnomaly>,
}

impl DecodedBatch {
    pub fn undecodable_sequencer_transactions(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.queue_origin == QueueOrigin::Sequencer && entry.decoded.is_none())
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeFailure {
    #[error("not a signed transaction: {0}")]
    Undecodable(String),
}

pub fn decode_batch(calldata: &[u8], position: BatchPosition, chain_id: u64) -> Result<DecodedBatch> {
    if calldata.len() < HEADER_LEN {
        return Err(Error::MalformedBatch(format!(
            "calldata has {} bytes, less than the {HEADER_LEN} byte header",
            calldata.len()
        )));
    }

    let num_contexts = read_uint(calldata, HEADER_LEN, NUM_CONTEXTS_LEN)?;
    let context_count = usize::try_from(num_contexts)
        .map_err(|_| Error::MalformedBatch(format!("{num_contexts} contexts do not fit in memory")))?;

    let mut next_tx_pointer = CONTEXTS_OFFSET + CONTEXT_LEN * context_count;
    if next_tx_pointer > calldata.len() {
        return Err(Error::MalformedBatch(format!(
            "calldata has {} bytes but declares {num_contexts} contexts ending at byte {next_tx_pointer}",
            calldata.len()
        )));
    }

    let contexts = (0..context_count)
        .map(|i| parse_context(calldata, CONTEXTS_OFFSET + CONTEXT_LEN * i))
        .collect::<Result<Vec<_>>>()?;

    // queued entries take no calldata, so their count is only bounded by the announced size
    let declared_elements = contexts
        .iter()
        .map(|c| c.sequenced_count + c.queue_count)
        .sum::<u64>();
    if declared_elements > position.batch_size {
        return Err(Error::MalformedBatch(format!(
            "contexts declare {declared_elements} elements, the batch was appended with {}",
            position.batch_size
        )));
    }

    let mut entries = Vec::with_capacity(declared_elements as usize);
    let mut anomalies = vec![];
    let mut previous: Option<SequencerBatchContext> = None;
    let mut enqueued_count = 0u64;

    for (context_index, context) in contexts.into_iter().enumerate() {
        if let Some(previous) = previous {
            if context.timestamp < previous.timestamp || context.block_number < previous.block_number {
                anomalies.push(OrderingAnomaly {
                    context_index: context_index as u64,
                    previous,
                    current: context,
                });
            }
        }

        for _ in 0..context.sequenced_count {
            let raw = parse_sequencer_transaction(calldata, next_tx_pointer)?;
            next_tx_pointer += TX_LENGTH_PREFIX_LEN + raw.len();

            let decoded = decode_transaction(raw, chain_id).ok();

            entries.push(TransactionEntry {
                index: element_index(position, entries.len())?,
                batch_index: position.batch_index,
                block_number: context.block_number,
                timestamp: context.timestamp,
                gas_limit: SEQUENCER_GAS_LIMIT,
                target: Some(SEQUENCER_ENTRYPOINT_ADDRESS),
                origin: None,
                data: Bytes::copy_from_slice(raw),
                queue_origin: QueueOrigin::Sequencer,
                value: decoded.as_ref().map_or(U256::ZERO, |tx| tx.value),
                queue_index: None,
                decoded,
                confirmed: true,
            });
        }

        for _ in 0..context.queue_count {
            let queue_index = position
                .starting_queue_index
                .checked_add(enqueued_count)
                .ok_or_else(|| Error::MalformedBatch("queue index overflows u64".to_string()))?;

            // The enqueue record may not be indexed yet, so everything but the queue position is
            // left for later enrichment.
            entries.push(TransactionEntry {
                index: element_index(position, entries.len())?,
                batch_index: position.batch_index,
                block_number: 0,
                timestamp: 0,
                gas_limit: 0,
                target: Some(Address::ZERO),
                origin: Some(Address::ZERO),
                data: Bytes::new(),
                queue_origin: QueueOrigin::Queued,
                value: U256::ZERO,
                queue_index: Some(queue_index),
                decoded: None,
                confirmed: true,
            });

            enqueued_count += 1;
        }

        previous = Some(context);
    }

    Ok(DecodedBatch {
        entries,
        num_contexts,
        anomalies,
    })
}

/// Best effort parse of a raw sequencer transaction. Failing is expected for payloads that are
/// not standard signed transactions.
pub fn decode_transaction(
    raw: &[u8],
    chain_id: u64,
) -> std::result::Result<DecodedTransaction, DecodeFailure> {
    let mut buf = raw;
    let envelope = TxEnvelope::decode_2718(&mut buf)
        .map_err(|e| DecodeFailure::Undecodable(e.to_string()))?;

    if !buf.is_empty() {
        return Err(DecodeFailure::Undecodable(format!(
            "{} trailing bytes after the transaction",
            buf.len()
        )));
    }

    if let Some(found) = envelope.chain_id().filter(|found| *found != chain_id) {
        debug!(
            "transaction {} is signed for chain {found}, expected {chain_id}",
            envelope.tx_hash()
        );
    }

    let signature = envelope.signature();

    Ok(DecodedTransaction {
        nonce: envelope.nonce(),
        gas_price: envelope
            .gas_price()
            .unwrap_or_else(|| envelope.max_fee_per_gas()),
        gas_limit: envelope.gas_limit(),
        value: envelope.value(),
        target: envelope.to(),
        data: envelope.input().clone(),
        signature: TransactionSignature {
            v: u8::from(signature.v()),
            r: signature.r(),
            s: signature.s(),
        },
    })
}

fn element_index(position: BatchPosition, emitted: usize) -> Result<u64> {
    position
        .prior_element_count
        .checked_add(emitted as u64)
        .ok_or_else(|| Error::MalformedBatch("element index overflows u64".to_string()))
}

fn parse_context(calldata: &[u8], offset: usize) -> Result<SequencerBatchContext> {
    Ok(SequencerBatchContext {
        sequenced_count: read_uint(calldata, offset, 3)?,
        queue_count: read_uint(calldata, offset + 3, 3)?,
        timestamp: read_uint(calldata, offset + 6, 5)?,
        block_number: read_uint(calldata, offset + 11, 5)?,
    })
}

fn parse_sequencer_transaction(calldata: &[u8], offset: usize) -> Result<&[u8]> {
    let length = read_uint(calldata, offset, TX_LENGTH_PREFIX_LEN)? as usize;
    let start = offset + TX_LENGTH_PREFIX_LEN;

    calldata.get(start..start + length).ok_or_else(|| {
        Error::MalformedBatch(format!(
            "transaction at byte {offset} declares {length} bytes, only {} remain",
            calldata.len().saturating_sub(start)
        ))
    })
}

fn read_uint(calldata: &[u8], offset: usize, len: usize) -> Result<u64> {
    let bytes = calldata.get(offset..offset + len).ok_or_else(|| {
        Error::MalformedBatch(format!(
            "expected {len} bytes at offset {offset}, calldata has {}",
            calldata.len()
        ))
    })?;

    Ok(bytes
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)))
}
