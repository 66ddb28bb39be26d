//! The shape shared by every L1 event the indexer understands: fetch whatever the log itself
//! does not carry, turn it into domain records, persist them.

use crate::{
    Result,
    types::{B256, L1Log},
};

/// A raw log together with its typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L1Event<Args> {
    pub log: L1Log,
    pub args: Args,
}

#[allow(async_fn_in_trait)]
#[trait_variant::make(Send)]
pub trait EventHandler<L1, Db>: Send + Sync {
    type Args: Send + Sync;
    type ExtraData: Send;
    type Parsed: Send;

    /// Signature hash of the event this handler is responsible for.
    fn topic(&self) -> B256;

    fn decode_args(&self, log: &L1Log) -> Result<Self::Args>;

    async fn fetch_extra_data(&self, event: &L1Event<Self::Args>, l1: &L1)
    -> Result<Self::ExtraData>;

    fn parse_event(
        &self,
        event: &L1Event<Self::Args>,
        extra: Self::ExtraData,
        chain_id: u64,
    ) -> Result<Self::Parsed>;

    async fn store_event(&self, parsed: Self::Parsed, storage: &Db) -> Result<()>;
}

/// Runs one log through the full pipeline. Stages run strictly one after the other, a failing
/// stage stops the occurrence before anything is written.
pub async fn handle_event<H, L1, Db>(
    handler: &H,
    log: L1Log,
    l1: &L1,
    storage: &Db,
    chain_id: u64,
) -> Result<()>
where
    H: EventHandler<L1, Db>,
    L1: Sync,
    Db: Sync,
{
    let args = handler.decode_args(&log)?;
    let event = L1Event { log, args };

    let extra = handler.fetch_extra_data(&event, l1).await?;
    let parsed = handler.parse_event(&event, extra, chain_id)?;

    handler.store_event(parsed, storage).await
}
