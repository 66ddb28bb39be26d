#![deny(unused_crate_dependencies)]
mod api;
mod config;
mod errors;
mod relay_status;
mod setup;

use api::launch_api_server;
use errors::Result;
use metrics::prometheus::Registry;
use setup::{
    create_l1_adapter, create_l2_adapter, setup_logger, setup_storage, shut_down,
    spawn_l1_ingestion,
};
use tokio_util::sync::CancellationToken;

use crate::config::{Command, Internal};

pub type L1 = eth::WebsocketClient;
pub type Database = storage::Postgres;

#[tokio::main]
async fn main() -> Result<()> {
    setup_logger();

    let (config, command) = config::parse()?;

    let internal_config = Internal::default();
    let metrics_registry = Registry::default();

    let (l1, l1_health_check) =
        create_l1_adapter(&config, &internal_config, &metrics_registry).await?;
    let (l2, l2_health_check) =
        create_l2_adapter(&config, &internal_config, &metrics_registry).await?;

    if let Some(Command::RelayStatus(args)) = command {
        return relay_status::run(&config, l1, l2, args).await;
    }

    let storage = setup_storage(&config, &metrics_registry).await?;

    let cancel_token = CancellationToken::new();

    let ingestion_handle = spawn_l1_ingestion(
        &config,
        l1,
        storage.clone(),
        &metrics_registry,
        cancel_token.clone(),
    );

    tokio::select! {
        served = launch_api_server(&config, metrics_registry, l1_health_check, l2_health_check) => served?,
        _ = cancel_token.cancelled() => {}
    }

    shut_down(cancel_token, ingestion_handle, storage).await
}
