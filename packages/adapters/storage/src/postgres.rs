use itertools::Itertools;
use metrics::{RegistersMetrics, prometheus::IntGauge};
#[cfg(any(test, feature = "test-helpers"))]
use services::types::{TransactionBatchEntry, TransactionEntry, storage::QueueIndexMapping};
use services::types::storage::WriteSet;
use sqlx::{
    PgConnection, QueryBuilder,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use tracing::debug;

use super::error::{Error, Result};
use crate::mappings::tables::{self, DbTransactionEntry, TransactionBatch};

/// The maximum number of bind parameters that can be passed to a single postgres query is
/// u16::MAX. Sqlx panics if this limit is exceeded.
const MAX_BIND_PARAMETERS: usize = u16::MAX as usize;

#[derive(Debug, Clone)]
struct Metrics {
    latest_committed_batch_index: IntGauge,
    latest_committed_element_index: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        let latest_committed_batch_index = IntGauge::new(
            "latest_committed_batch_index",
            "Index of the most recent transaction batch written to the database",
        )
        .expect("latest_committed_batch_index gauge to be correctly configured");

        let latest_committed_element_index = IntGauge::new(
            "latest_committed_element_index",
            "Index of the most recent transaction entry written to the database",
        )
        .expect("latest_committed_element_index gauge to be correctly configured");

        Self {
            latest_committed_batch_index,
            latest_committed_element_index,
        }
    }
}

#[derive(Clone)]
pub struct Postgres {
    connection_pool: sqlx::Pool<sqlx::Postgres>,
    metrics: Metrics,
}

impl RegistersMetrics for Postgres {
    fn metrics(&self) -> Vec<Box<dyn metrics::prometheus::core::Collector>> {
        vec![
            Box::new(self.metrics.latest_committed_batch_index.clone()),
            Box::new(self.metrics.latest_committed_element_index.clone()),
        ]
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DbConfig {
    /// The hostname or IP address of the `PostgreSQL` server.
    pub host: String,
    /// The port number on which the `PostgreSQL` server is listening.
    pub port: u16,
    /// The username used to authenticate with the `PostgreSQL` server.
    pub username: String,
    /// The password used to authenticate with the `PostgreSQL` server.
    pub password: String,
    /// The name of the database to connect to on the `PostgreSQL` server.
    pub database: String,
    /// The maximum number of connections allowed in the connection pool.
    pub max_connections: u32,
    /// Whether to use SSL when connecting to the `PostgreSQL` server.
    pub use_ssl: bool,
}

impl Postgres {
    pub async fn connect(opt: &DbConfig) -> services::Result<Self> {
        let ssl_mode = if opt.use_ssl {
            sqlx::postgres::PgSslMode::Require
        } else {
            sqlx::postgres::PgSslMode::Disable
        };

        let options = PgConnectOptions::new()
            .ssl_mode(ssl_mode)
            .username(&opt.username)
            .password(&opt.password)
            .database(&opt.database)
            .host(&opt.host)
            .port(opt.port);

        let connection_pool = PgPoolOptions::new()
            .max_connections(opt.max_connections)
            .connect_with(options)
            .await
            .map_err(Error::from)?;

        Ok(Self {
            connection_pool,
            metrics: Metrics::default(),
        })
    }

    #[cfg(feature = "test-helpers")]
    pub(crate) fn pool(&self) -> sqlx::Pool<sqlx::Postgres> {
        self.connection_pool.clone()
    }

    #[cfg(feature = "test-helpers")]
    pub fn db_name(&self) -> String {
        self.connection_pool
            .connect_options()
            .get_database()
            .expect("database name to be set")
            .to_owned()
    }

    #[cfg(feature = "test-helpers")]
    pub fn port(&self) -> u16 {
        self.connection_pool.connect_options().get_port()
    }

    /// Close only when shutting down the application. Will close the connection pool even if it is
    /// shared.
    pub async fn close(self) {
        self.connection_pool.close().await;
    }

    pub async fn migrate(&self) -> services::Result<()> {
        sqlx::migrate!()
            .run(&self.connection_pool)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    pub(crate) async fn _commit(&self, write_set: WriteSet) -> Result<()> {
        if write_set.is_empty() {
            return Ok(());
        }

        let (batches, entries, mappings) = write_set.into_parts();

        let batches = batches
            .into_iter()
            .map(TransactionBatch::try_from)
            .collect::<Result<Vec<_>>>()?;
        let entries = entries
            .into_iter()
            .map(DbTransactionEntry::try_from)
            .collect::<Result<Vec<_>>>()?;
        let mappings = mappings
            .into_iter()
            .map(|mapping| {
                Ok((
                    tables::to_i64(mapping.queue_index, "queue_index")?,
                    tables::to_i64(mapping.index, "element_index")?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let latest_batch = batches.iter().map(|b| b.batch_index).max();
        let latest_element = entries.iter().map(|e| e.element_index).max();

        let mut tx = self.connection_pool.begin().await?;

        upsert_batches(&mut *tx, batches).await?;
        upsert_transaction_entries(&mut *tx, entries).await?;
        upsert_queue_index_mappings(&mut *tx, mappings).await?;

        tx.commit().await?;

        if let Some(index) = latest_batch {
            debug!("committed transaction batch {index}");
            self.metrics.latest_committed_batch_index.set(index);
        }
        if let Some(index) = latest_element {
            self.metrics.latest_committed_element_index.set(index);
        }

        Ok(())
    }

    #[cfg(any(test, feature = "test-helpers"))]
    pub(crate) async fn _batches(&self) -> Result<Vec<TransactionBatchEntry>> {
        sqlx::query_as::<_, TransactionBatch>(
            "SELECT * FROM transaction_batches ORDER BY batch_index",
        )
        .fetch_all(&self.connection_pool)
        .await?
        .into_iter()
        .map(TransactionBatchEntry::try_from)
        .collect()
    }

    #[cfg(any(test, feature = "test-helpers"))]
    pub(crate) async fn _transaction_entries(&self) -> Result<Vec<TransactionEntry>> {
        sqlx::query_as::<_, DbTransactionEntry>(
            "SELECT * FROM transaction_entries ORDER BY element_index",
        )
        .fetch_all(&self.connection_pool)
        .await?
        .into_iter()
        .map(TransactionEntry::try_from)
        .collect()
    }

    #[cfg(any(test, feature = "test-helpers"))]
    pub(crate) async fn _queue_index_mappings(&self) -> Result<Vec<QueueIndexMapping>> {
        sqlx::query_as::<_, (i64, i64)>(
            "SELECT queue_index, element_index FROM queue_index_mappings ORDER BY queue_index",
        )
        .fetch_all(&self.connection_pool)
        .await?
        .into_iter()
        .map(|(queue_index, index)| {
            Ok(QueueIndexMapping {
                queue_index: tables::to_u64(queue_index, "queue_index")?,
                index: tables::to_u64(index, "element_index")?,
            })
        })
        .collect()
    }

    pub(crate) async fn _highest_synced_l1_block(&self) -> Result<Option<u64>> {
        let height = sqlx::query_scalar::<_, i64>(
            "SELECT highest_synced_block FROM l1_sync_state WHERE id = 0",
        )
        .fetch_optional(&self.connection_pool)
        .await?;

        height
            .map(|h| tables::to_u64(h, "highest_synced_block"))
            .transpose()
    }

    pub(crate) async fn _set_highest_synced_l1_block(&self, height: u64) -> Result<()> {
        let height = tables::to_i64(height, "highest_synced_block")?;

        sqlx::query(
            "INSERT INTO l1_sync_state (id, highest_synced_block) VALUES (0, $1)
             ON CONFLICT (id) DO UPDATE SET highest_synced_block = EXCLUDED.highest_synced_block",
        )
        .bind(height)
        .execute(&self.connection_pool)
        .await?;

        Ok(())
    }
}

async fn upsert_batches(conn: &mut PgConnection, batches: Vec<TransactionBatch>) -> Result<()> {
    const FIELDS_PER_BATCH: usize = 9;
    const MAX_BATCHES_PER_QUERY: usize = MAX_BIND_PARAMETERS / FIELDS_PER_BATCH;

    let queries = batches
        .into_iter()
        .chunks(MAX_BATCHES_PER_QUERY)
        .into_iter()
        .map(|chunk| {
            let mut query_builder = QueryBuilder::new(
                "INSERT INTO transaction_batches (batch_index, root, size, prev_total_elements, extra_data, l1_block_number, l1_timestamp, submitter, l1_transaction_hash)",
            );

            query_builder.push_values(chunk, |mut b, batch| {
                // update the constants above if you add/remove bindings
                b.push_bind(batch.batch_index)
                    .push_bind(batch.root)
                    .push_bind(batch.size)
                    .push_bind(batch.prev_total_elements)
                    .push_bind(batch.extra_data)
                    .push_bind(batch.l1_block_number)
                    .push_bind(batch.l1_timestamp)
                    .push_bind(batch.submitter)
                    .push_bind(batch.l1_transaction_hash);
            });

            query_builder.push(
                " ON CONFLICT (batch_index) DO UPDATE SET
                    root = EXCLUDED.root,
                    size = EXCLUDED.size,
                    prev_total_elements = EXCLUDED.prev_total_elements,
                    extra_data = EXCLUDED.extra_data,
                    l1_block_number = EXCLUDED.l1_block_number,
                    l1_timestamp = EXCLUDED.l1_timestamp,
                    submitter = EXCLUDED.submitter,
                    l1_transaction_hash = EXCLUDED.l1_transaction_hash",
            );

            query_builder
        })
        .collect_vec();

    for mut query in queries {
        query.build().execute(&mut *conn).await?;
    }

    Ok(())
}

async fn upsert_transaction_entries(
    conn: &mut PgConnection,
    entries: Vec<DbTransactionEntry>,
) -> Result<()> {
    const FIELDS_PER_ENTRY: usize = 13;
    const MAX_ENTRIES_PER_QUERY: usize = MAX_BIND_PARAMETERS / FIELDS_PER_ENTRY;

    let queries = entries
        .into_iter()
        .chunks(MAX_ENTRIES_PER_QUERY)
        .into_iter()
        .map(|chunk| {
            let mut query_builder = QueryBuilder::new(
                "INSERT INTO transaction_entries (element_index, batch_index, block_number, l2_timestamp, gas_limit, target, origin, data, queue_origin, value, queue_index, decoded, confirmed)",
            );

            query_builder.push_values(chunk, |mut b, entry| {
                // update the constants above if you add/remove bindings
                b.push_bind(entry.element_index)
                    .push_bind(entry.batch_index)
                    .push_bind(entry.block_number)
                    .push_bind(entry.l2_timestamp)
                    .push_bind(entry.gas_limit)
                    .push_bind(entry.target)
                    .push_bind(entry.origin)
                    .push_bind(entry.data)
                    .push_bind(entry.queue_origin)
                    .push_bind(entry.value)
                    .push_bind(entry.queue_index)
                    .push_bind(entry.decoded)
                    .push_bind(entry.confirmed);
            });

            query_builder.push(
                " ON CONFLICT (element_index) DO UPDATE SET
                    batch_index = EXCLUDED.batch_index,
                    block_number = EXCLUDED.block_number,
                    l2_timestamp = EXCLUDED.l2_timestamp,
                    gas_limit = EXCLUDED.gas_limit,
                    target = EXCLUDED.target,
                    origin = EXCLUDED.origin,
                    data = EXCLUDED.data,
                    queue_origin = EXCLUDED.queue_origin,
                    value = EXCLUDED.value,
                    queue_index = EXCLUDED.queue_index,
                    decoded = EXCLUDED.decoded,
                    confirmed = EXCLUDED.confirmed",
            );

            query_builder
        })
        .collect_vec();

    for mut query in queries {
        query.build().execute(&mut *conn).await?;
    }

    Ok(())
}

async fn upsert_queue_index_mappings(
    conn: &mut PgConnection,
    mappings: Vec<(i64, i64)>,
) -> Result<()> {
    const FIELDS_PER_MAPPING: usize = 2;
    const MAX_MAPPINGS_PER_QUERY: usize = MAX_BIND_PARAMETERS / FIELDS_PER_MAPPING;

    let queries = mappings
        .into_iter()
        .chunks(MAX_MAPPINGS_PER_QUERY)
        .into_iter()
        .map(|chunk| {
            let mut query_builder =
                QueryBuilder::new("INSERT INTO queue_index_mappings (queue_index, element_index)");

            query_builder.push_values(chunk, |mut b, (queue_index, element_index)| {
                b.push_bind(queue_index).push_bind(element_index);
            });

            query_builder
                .push(" ON CONFLICT (queue_index) DO UPDATE SET element_index = EXCLUDED.element_index");

            query_builder
        })
        .collect_vec();

    for mut query in queries {
        query.build().execute(&mut *conn).await?;
    }

    Ok(())
}
