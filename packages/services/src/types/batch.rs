use super::{Address, B256, Bytes, U256};

/// Summary of one batch appended to the canonical transaction chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionBatchEntry {
    pub index: u64,
    pub root: B256,
    pub size: u64,
    pub prev_total_elements: u64,
    pub extra_data: Bytes,
    pub block_number: u64,
    pub timestamp: u64,
    pub submitter: Address,
    pub l1_transaction_hash: B256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOrigin {
    /// Submitted directly by the sequencer as part of the batch payload.
    Sequencer,
    /// Deposited on L1 through the enqueue path. The batch only references it by queue position.
    Queued,
}

impl QueueOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequencer => "sequencer",
            Self::Queued => "l1",
        }
    }
}

impl std::fmt::Display for QueueOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionSignature {
    /// Recovery parameter, normalized to 0 or 1.
    pub v: u8,
    pub r: U256,
    pub s: U256,
}

/// The sequencer transaction payload parsed as a self-contained signed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub value: U256,
    pub target: Option<Address>,
    pub data: Bytes,
    pub signature: TransactionSignature,
}

/// One element of the L2 transaction history.
///
/// Entries with [`QueueOrigin::Queued`] are placeholders: the batch only tells us their position
/// in the L1 queue, every other field is filled in once the matching enqueue record is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEntry {
    pub index: u64,
    pub batch_index: u64,
    pub block_number: u64,
    pub timestamp: u64,
    pub gas_limit: u64,
    pub target: Option<Address>,
    pub origin: Option<Address>,
    pub data: Bytes,
    pub queue_origin: QueueOrigin,
    pub value: U256,
    pub queue_index: Option<u64>,
    pub decoded: Option<DecodedTransaction>,
    pub confirmed: bool,
}
