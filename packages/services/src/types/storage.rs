use super::{TransactionBatchEntry, TransactionEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueIndexMapping {
    pub queue_index: u64,
    pub index: u64,
}

/// Everything one event occurrence writes. Committed as a whole or not at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSet {
    batch_entries: Vec<TransactionBatchEntry>,
    transaction_entries: Vec<TransactionEntry>,
    queue_index_mappings: Vec<QueueIndexMapping>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_batch_entries(&mut self, entries: impl IntoIterator<Item = TransactionBatchEntry>) {
        self.batch_entries.extend(entries);
    }

    pub fn put_transaction_entries(&mut self, entries: impl IntoIterator<Item = TransactionEntry>) {
        self.transaction_entries.extend(entries);
    }

    pub fn put_queue_index_mapping(&mut self, queue_index: u64, index: u64) {
        self.queue_index_mappings
            .push(QueueIndexMapping { queue_index, index });
    }

    pub fn batch_entries(&self) -> &[TransactionBatchEntry] {
        &self.batch_entries
    }

    pub fn transaction_entries(&self) -> &[TransactionEntry] {
        &self.transaction_entries
    }

    pub fn queue_index_mappings(&self) -> &[QueueIndexMapping] {
        &self.queue_index_mappings
    }

    pub fn is_empty(&self) -> bool {
        self.batch_entries.is_empty()
            && self.transaction_entries.is_empty()
            && self.queue_index_mappings.is_empty()
    }

    pub fn into_parts(
        self,
    ) -> (
        Vec<TransactionBatchEntry>,
        Vec<TransactionEntry>,
        Vec<QueueIndexMapping>,
    ) {
        (
            self.batch_entries,
            self.transaction_entries,
            self.queue_index_mappings,
        )
    }
}
