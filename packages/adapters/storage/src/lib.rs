mod mappings;
#[cfg(feature = "test-helpers")]
mod test_instance;

#[cfg(feature = "test-helpers")]
pub use test_instance::*;

pub(crate) mod error;
mod postgres;
pub use postgres::{DbConfig, Postgres};
use services::{Result, types::storage::WriteSet};

impl services::sequencer_batch_appended::port::Storage for Postgres {
    async fn commit(&self, write_set: WriteSet) -> Result<()> {
        self._commit(write_set).await.map_err(Into::into)
    }
}

impl services::l1_ingestion::port::Storage for Postgres {
    async fn highest_synced_l1_block(&self) -> Result<Option<u64>> {
        self._highest_synced_l1_block().await.map_err(Into::into)
    }

    async fn set_highest_synced_l1_block(&self, height: u64) -> Result<()> {
        self._set_highest_synced_l1_block(height)
            .await
            .map_err(Into::into)
    }
}
