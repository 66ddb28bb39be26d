use std::{net::Ipv4Addr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum, command};
use eth::Address;
use serde::Deserialize;
use services::types::B256;
use storage::DbConfig;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub eth: Eth,
    pub l2: L2,
    pub app: App,
}

impl Config {
    pub fn validate(&self) -> crate::errors::Result<()> {
        if self.eth.max_block_range == 0 {
            return Err(crate::errors::Error::Other(
                "`eth.max_block_range` must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn ingestion(&self) -> services::l1_ingestion::service::Config {
        services::l1_ingestion::service::Config {
            contract: self.eth.canonical_transaction_chain_address,
            start_block: self.eth.start_block,
            confirmations: self.eth.confirmations,
            max_block_range: self.eth.max_block_range,
            chain_id: self.l2.chain_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Eth {
    /// Websocket URL of an L1 node.
    #[serde(deserialize_with = "parse_url")]
    pub rpc: Url,
    /// Contract emitting `SequencerBatchAppended` and `TransactionBatchAppended`.
    pub canonical_transaction_chain_address: Address,
    /// The L1 cross domain messenger.
    pub messenger_address: Address,
    /// First L1 block to ingest on an empty database, usually the contract's deployment block.
    pub start_block: u64,
    /// Number of L1 blocks that need to pass before a batch is ingested
    pub confirmations: u64,
    /// Upper bound on the block span of one `eth_getLogs` call
    pub max_block_range: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct L2 {
    /// Websocket URL of an L2 node.
    #[serde(deserialize_with = "parse_url")]
    pub rpc: Url,
    pub chain_id: u64,
    /// The L2 cross domain messenger.
    pub messenger_address: Address,
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let url_str: String = Deserialize::deserialize(deserializer)?;
    Url::from_str(&url_str).map_err(|e| {
        let msg = format!("Failed to parse URL '{url_str}': {e};");
        serde::de::Error::custom(msg)
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct App {
    /// Port used by the started server
    pub port: u16,
    /// IPv4 address on which the server will listen for connections
    pub host: Ipv4Addr,
    /// Postgres database configuration
    pub db: DbConfig,
    /// How often to look for new L1 batches
    #[serde(deserialize_with = "human_readable_duration")]
    pub ingestion_interval: Duration,
    /// How many blocks back the relay of a message is searched for
    #[serde(default = "default_watcher_horizon")]
    pub watcher_horizon: u64,
}

fn default_watcher_horizon() -> u64 {
    services::message_watcher::service::DEFAULT_HORIZON
}

fn human_readable_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let duration_str: String = Deserialize::deserialize(deserializer)?;
    humantime::parse_duration(&duration_str).map_err(|e| {
        let msg = format!("Failed to parse duration '{duration_str}': {e};");
        serde::de::Error::custom(msg)
    })
}

#[derive(Debug, Clone)]
pub struct Internal {
    pub l1_errors_before_unhealthy: usize,
    pub l2_errors_before_unhealthy: usize,
}

impl Default for Internal {
    fn default() -> Self {
        Self {
            l1_errors_before_unhealthy: 3,
            l2_errors_before_unhealthy: 3,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "rollup-indexer",
    version,
    about,
    propagate_version = true,
    arg_required_else_help(true)
)]
struct Cli {
    #[arg(value_name = "FILE", help = "Path to the configuration file")]
    config_path: PathBuf,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Report whether the messages sent by a transaction were relayed to the other layer.
    RelayStatus(RelayStatusArgs),
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct RelayStatusArgs {
    /// Hash of the transaction that sent the messages
    pub tx_hash: B256,
    #[arg(long, value_enum)]
    pub direction: Direction,
    /// Keep waiting for messages that have not been relayed yet
    #[arg(long)]
    pub wait: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Direction {
    L1ToL2,
    L2ToL1,
}

pub fn parse() -> crate::errors::Result<(Config, Option<Command>)> {
    let cli = Cli::parse();

    let config = config::Config::builder()
        .add_source(config::File::from(cli.config_path))
        .add_source(config::Environment::with_prefix("INDEXER").separator("__"))
        .build()?;

    let config: Config = config.try_deserialize()?;
    config.validate()?;

    Ok((config, cli.command))
}
