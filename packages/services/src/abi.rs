//! Event definitions of the contracts the indexer reads from.

use alloy::sol;

sol! {
    /// The L1 contract holding the canonical ordering of L2 transactions.
    interface ICanonicalTransactionChain {
        event TransactionBatchAppended(
            uint256 indexed _batchIndex,
            bytes32 _batchRoot,
            uint256 _batchSize,
            uint256 _prevTotalElements,
            bytes _extraData
        );

        event SequencerBatchAppended(
            uint256 _startingQueueIndex,
            uint256 _numQueueElements,
            uint256 _totalElements
        );
    }

    /// Deployed on both layers.
    interface ICrossDomainMessenger {
        event SentMessage(bytes message);
        event RelayedMessage(bytes32 msgHash);
        event FailedRelayedMessage(bytes32 msgHash);
    }
}

pub use ICanonicalTransactionChain::{SequencerBatchAppended, TransactionBatchAppended};
pub use ICrossDomainMessenger::{FailedRelayedMessage, RelayedMessage, SentMessage};
