use std::time::Duration;

use metrics::{HealthChecker, RegistersMetrics, prometheus::Registry};
use services::{L1Ingestion, Runner, SequencerBatchAppendedHandler};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

use crate::{
    Database, L1,
    config::{Config, Internal},
    errors::{Result, WithContext},
};

pub fn spawn_l1_ingestion(
    config: &Config,
    l1: L1,
    storage: Database,
    registry: &Registry,
    cancel_token: CancellationToken,
) -> JoinHandle<services::Result<()>> {
    let ingestion = L1Ingestion::new(
        SequencerBatchAppendedHandler::new(),
        l1,
        storage,
        config.ingestion(),
    );

    ingestion.register_metrics(registry);

    schedule_polling(
        config.app.ingestion_interval,
        ingestion,
        "L1 Ingestion",
        cancel_token,
    )
}

pub async fn create_l1_adapter(
    config: &Config,
    internal_config: &Internal,
    registry: &Registry,
) -> Result<(L1, HealthChecker)> {
    create_adapter(
        config.eth.rpc.clone(),
        "l1",
        internal_config.l1_errors_before_unhealthy,
        registry,
    )
    .await
    .with_context(|| "connecting to the L1 node")
}

pub async fn create_l2_adapter(
    config: &Config,
    internal_config: &Internal,
    registry: &Registry,
) -> Result<(L1, HealthChecker)> {
    create_adapter(
        config.l2.rpc.clone(),
        "l2",
        internal_config.l2_errors_before_unhealthy,
        registry,
    )
    .await
    .with_context(|| "connecting to the L2 node")
}

async fn create_adapter(
    rpc: Url,
    layer: &str,
    errors_before_unhealthy: usize,
    registry: &Registry,
) -> Result<(L1, HealthChecker)> {
    let client = L1::connect(rpc, layer, errors_before_unhealthy).await?;

    client.register_metrics(registry);

    let health_check = client.connection_health_checker();

    Ok((client, health_check))
}

/// Runs `runner` every `polling_interval` until cancelled. Transient errors are retried on the
/// next tick; a fatal one stops the runner and cancels `cancel_token` so the process exits.
fn schedule_polling(
    polling_interval: Duration,
    mut runner: impl Runner + 'static,
    name: &'static str,
    cancel_token: CancellationToken,
) -> JoinHandle<services::Result<()>> {
    tokio::spawn(async move {
        loop {
            match runner.run().await {
                Err(e) if e.is_fatal() => {
                    error!("{name} stopped on a fatal error: {e}");
                    cancel_token.cancel();
                    return Err(e);
                }
                Err(e) => error!("{name} encountered an error, retrying: {e}"),
                Ok(()) => {}
            }

            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = tokio::time::sleep(polling_interval) => {}
            }
        }

        info!("{name} stopped");
        Ok(())
    })
}

pub fn setup_logger() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_line_number(true)
        .json()
        .init();
}

pub async fn setup_storage(config: &Config, registry: &Registry) -> Result<Database> {
    let postgres = Database::connect(&config.app.db).await?;
    postgres.migrate().await?;
    postgres.register_metrics(registry);

    Ok(postgres)
}

pub async fn shut_down(
    cancel_token: CancellationToken,
    ingestion_handle: JoinHandle<services::Result<()>>,
    storage: Database,
) -> Result<()> {
    cancel_token.cancel();

    let ingestion = ingestion_handle.await?;

    storage.close().await;

    Ok(ingestion?)
}
