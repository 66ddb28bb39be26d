pub mod abi;
pub mod batch_codec;
pub mod event_handler;
pub mod health_reporter;
pub mod l1_ingestion;
pub mod message_watcher;
pub mod sequencer_batch_appended;
pub mod types;

pub use health_reporter::HealthReporter;
pub use l1_ingestion::service::L1Ingestion;
pub use message_watcher::service::{Layer, MessageWatcher};
pub use sequencer_batch_appended::service::SequencerBatchAppendedHandler;

use types::B256;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Other(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Malformed batch: {0}")]
    MalformedBatch(String),
    #[error(
        "L1 tx {transaction_hash} has no TransactionBatchAppended event at log index {expected_log_index}"
    )]
    MissingCompanionEvent {
        transaction_hash: B256,
        expected_log_index: u64,
    },
    #[error("found {matches} relays of message {digest}, expected at most one")]
    AmbiguousConfirmation { digest: B256, matches: usize },
    #[error("stopped waiting for the relay of message {0}")]
    Cancelled(B256),
    #[error("halted after a fatal error: {0}")]
    Halted(String),
}

impl Error {
    /// Fatal errors come from the data itself. Running the same input again fails the same way.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MalformedBatch(_)
                | Self::MissingCompanionEvent { .. }
                | Self::AmbiguousConfirmation { .. }
                | Self::Halted(_)
        )
    }
}

impl From<alloy::sol_types::Error> for Error {
    fn from(error: alloy::sol_types::Error) -> Self {
        Self::Other(format!("could not decode event: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[allow(async_fn_in_trait)]
#[trait_variant::make(Send)]
pub trait Runner: Send + Sync {
    async fn run(&mut self) -> Result<()>;
}
