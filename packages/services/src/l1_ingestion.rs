pub mod service {
    use metrics::{
        RegistersMetrics,
        prometheus::{IntCounter, IntGauge, Opts, core::Collector},
    };
    use tracing::{debug, error, info};

    use crate::{
        Error, Result, Runner,
        event_handler::{EventHandler, handle_event},
        types::{Address, LogFilter},
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Config {
        /// Contract whose logs are ingested.
        pub contract: Address,
        /// First block to look at when nothing was synced yet.
        pub start_block: u64,
        /// Blocks a log must be buried under before it is ingested.
        pub confirmations: u64,
        pub max_block_range: u64,
        pub chain_id: u64,
    }

    /// Polls L1 for the logs of one event type and feeds them through its handler, oldest first.
    ///
    /// Transient failures leave the cursor where it was, so the next run replays the range. A
    /// fatal failure halts the runner: every later run fails without touching L1 or storage.
    pub struct L1Ingestion<H, L1, Db> {
        handler: H,
        l1: L1,
        storage: Db,
        config: Config,
        metrics: Metrics,
        halted: Option<String>,
    }

    impl<H, L1, Db> L1Ingestion<H, L1, Db> {
        pub fn new(handler: H, l1: L1, storage: Db, config: Config) -> Self {
            Self {
                handler,
                l1,
                storage,
                config,
                metrics: Metrics::default(),
                halted: None,
            }
        }

        pub fn is_halted(&self) -> bool {
            self.halted.is_some()
        }
    }

    impl<H, L1, Db> L1Ingestion<H, L1, Db>
    where
        H: EventHandler<L1, Db>,
        L1: super::port::l1::Api,
        Db: super::port::Storage,
    {
        async fn next_range(&self) -> Result<Option<(u64, u64)>> {
            let head = self.l1.block_number().await?;
            let Some(confirmed_head) = head.checked_sub(self.config.confirmations) else {
                return Ok(None);
            };

            let from = match self.storage.highest_synced_l1_block().await? {
                Some(synced) => synced + 1,
                None => self.config.start_block,
            };

            if from > confirmed_head {
                return Ok(None);
            }

            let to = confirmed_head.min(from.saturating_add(self.config.max_block_range.max(1) - 1));

            Ok(Some((from, to)))
        }
    }

    impl<H, L1, Db> Runner for L1Ingestion<H, L1, Db>
    where
        H: EventHandler<L1, Db>,
        L1: super::port::l1::Api,
        Db: super::port::Storage,
    {
        async fn run(&mut self) -> Result<()> {
            if let Some(reason) = &self.halted {
                return Err(Error::Halted(reason.clone()));
            }

            let result = self.ingest().await;

            if let Some(e) = result.as_ref().err().filter(|e| e.is_fatal()) {
                error!("halting L1 ingestion: {e}");
                self.halted = Some(e.to_string());
            }

            result
        }
    }

    impl<H, L1, Db> L1Ingestion<H, L1, Db>
    where
        H: EventHandler<L1, Db>,
        L1: super::port::l1::Api,
        Db: super::port::Storage,
    {
        async fn ingest(&self) -> Result<()> {
            let Some((from, to)) = self.next_range().await? else {
                debug!("no new confirmed L1 blocks to ingest");
                return Ok(());
            };

            let topic = <H as EventHandler<L1, Db>>::topic(&self.handler);
            let filter = LogFilter::new(self.config.contract, topic, from..=to);

            let mut logs = self.l1.logs(filter).await?;
            logs.sort_by_key(|log| (log.block_number, log.log_index));

            let num_logs = logs.len();
            for log in logs {
                handle_event(
                    &self.handler,
                    log,
                    &self.l1,
                    &self.storage,
                    self.config.chain_id,
                )
                .await?;
                self.metrics.handled_events.inc();
            }

            self.storage.set_highest_synced_l1_block(to).await?;
            self.metrics.highest_synced_l1_block.set(to as i64);

            info!("ingested {num_logs} events from L1 blocks {from}..={to}");

            Ok(())
        }
    }

    #[derive(Clone)]
    struct Metrics {
        highest_synced_l1_block: IntGauge,
        handled_events: IntCounter,
    }

    impl<H, L1, Db> RegistersMetrics for L1Ingestion<H, L1, Db> {
        fn metrics(&self) -> Vec<Box<dyn Collector>> {
            vec![
                Box::new(self.metrics.highest_synced_l1_block.clone()),
                Box::new(self.metrics.handled_events.clone()),
            ]
        }
    }

    impl Default for Metrics {
        fn default() -> Self {
            let highest_synced_l1_block = IntGauge::with_opts(Opts::new(
                "highest_synced_l1_block",
                "The highest L1 block whose events have been ingested.",
            ))
            .expect("highest_synced_l1_block metric to be correctly configured");

            let handled_events = IntCounter::with_opts(Opts::new(
                "handled_l1_events",
                "Number of L1 events persisted by the ingestion pipeline.",
            ))
            .expect("handled_l1_events metric to be correctly configured");

            Self {
                highest_synced_l1_block,
                handled_events,
            }
        }
    }
}

pub mod port {
    use crate::Result;

    pub use crate::sequencer_batch_appended::port::l1;

    #[allow(async_fn_in_trait)]
    #[trait_variant::make(Send)]
    pub trait Storage: crate::sequencer_batch_appended::port::Storage {
        async fn highest_synced_l1_block(&self) -> Result<Option<u64>>;
        async fn set_highest_synced_l1_block(&self, height: u64) -> Result<()>;
    }
}
