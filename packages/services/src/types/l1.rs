use std::ops::RangeInclusive;

use super::{Address, B256, Bytes};

/// A log as returned by a node, reduced to the fields the indexer relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L1Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: B256,
}

impl L1Log {
    pub fn event_signature(&self) -> Option<B256> {
        self.topics.first().copied()
    }
}

/// Logs emitted by `address` with `topic` as their first topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topic: B256,
    pub blocks: BlockRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRange {
    Bounded { from: u64, to: u64 },
    /// Only blocks that arrive after the filter is installed. Used for subscriptions.
    Live,
}

impl BlockRange {
    pub fn bounded(range: RangeInclusive<u64>) -> Self {
        Self::Bounded {
            from: *range.start(),
            to: *range.end(),
        }
    }
}

impl LogFilter {
    pub fn new(address: Address, topic: B256, blocks: RangeInclusive<u64>) -> Self {
        Self {
            address,
            topic,
            blocks: BlockRange::bounded(blocks),
        }
    }

    pub fn live(address: Address, topic: B256) -> Self {
        Self {
            address,
            topic,
            blocks: BlockRange::Live,
        }
    }

    pub fn matches(&self, log: &L1Log) -> bool {
        let in_range = match self.blocks {
            BlockRange::Bounded { from, to } => (from..=to).contains(&log.block_number),
            BlockRange::Live => true,
        };

        in_range && log.address == self.address && log.event_signature() == Some(self.topic)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L1Block {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L1Transaction {
    pub hash: B256,
    pub from: Address,
    pub input: Bytes,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub block_hash: B256,
    pub succeeded: bool,
    pub logs: Vec<L1Log>,
}

/// Client side handle of a log subscription. Needed to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub B256);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
