use std::{
    borrow::Cow,
    sync::{Arc, Weak},
};

use delegate::delegate;
use services::types::{
    TransactionBatchEntry, TransactionEntry,
    storage::{QueueIndexMapping, WriteSet},
};
use sqlx::Executor;
use testcontainers::{
    Image,
    core::{ContainerPort, WaitFor},
    runners::AsyncRunner,
};

use super::postgres::{DbConfig, Postgres};

struct PostgresImage {
    username: String,
    password: String,
    initial_db: String,
}

impl Image for PostgresImage {
    fn name(&self) -> &str {
        "postgres"
    }

    fn tag(&self) -> &str {
        "latest"
    }

    fn ready_conditions(&self) -> Vec<WaitFor> {
        vec![WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        )]
    }

    fn expose_ports(&self) -> &[ContainerPort] {
        &const { [ContainerPort::Tcp(5432)] }
    }

    fn env_vars(
        &self,
    ) -> impl IntoIterator<Item = (impl Into<Cow<'_, str>>, impl Into<Cow<'_, str>>)> {
        [
            ("POSTGRES_USER", self.username.as_str()),
            ("POSTGRES_PASSWORD", self.password.as_str()),
            ("POSTGRES_DB", self.initial_db.as_str()),
        ]
    }
}

/// A dockerized Postgres shared by the tests of one binary. Each test gets its own database.
pub struct PostgresProcess {
    username: String,
    password: String,
    initial_db: String,
    container: testcontainers::ContainerAsync<PostgresImage>,
}

impl PostgresProcess {
    pub async fn shared() -> services::Result<Arc<Self>> {
        // Dropped once no test holds it, recreated on the next request.
        static LOCK: tokio::sync::Mutex<Weak<PostgresProcess>> =
            tokio::sync::Mutex::const_new(Weak::new());
        let mut shared_process = LOCK.lock().await;

        let process = if let Some(running_process) = shared_process.upgrade() {
            running_process
        } else {
            let process = Arc::new(Self::start().await?);
            *shared_process = Arc::downgrade(&process);
            process
        };

        Ok(process)
    }

    pub async fn start() -> services::Result<Self> {
        let username = "indexer".to_string();
        let password = "password".to_string();
        let initial_db = "test".to_string();

        let container = PostgresImage {
            username: username.clone(),
            password: password.clone(),
            initial_db: initial_db.clone(),
        }
        .start()
        .await
        .map_err(|e| crate::error::Error::Database(format!("{e}")))?;

        Ok(Self {
            username,
            password,
            initial_db,
            container,
        })
    }

    pub async fn create_random_db(self: &Arc<Self>) -> services::Result<DbWithProcess> {
        let db = self.create_noschema_random_db().await?;

        db.db.migrate().await?;

        Ok(db)
    }

    pub async fn create_noschema_random_db(self: &Arc<Self>) -> services::Result<DbWithProcess> {
        let port = self
            .container
            .get_host_port_ipv4(5432)
            .await
            .map_err(|e| crate::error::Error::Database(format!("{e}")))?;

        let mut config = DbConfig {
            host: "localhost".to_string(),
            port,
            username: self.username.clone(),
            password: self.password.clone(),
            database: self.initial_db.clone(),
            max_connections: 5,
            use_ssl: false,
        };
        let db = Postgres::connect(&config).await?;

        let db_name = format!("test_db_{}", rand::random::<u32>());
        let query = format!("CREATE DATABASE {db_name}");
        db.pool()
            .execute(sqlx::query(&query))
            .await
            .map_err(crate::error::Error::from)?;

        config.database = db_name;

        let db = Postgres::connect(&config).await?;

        Ok(DbWithProcess {
            db,
            _process: self.clone(),
        })
    }
}

#[derive(Clone)]
pub struct DbWithProcess {
    pub db: Postgres,
    _process: Arc<PostgresProcess>,
}

impl DbWithProcess {
    delegate! {
        to self.db {
            pub fn db_name(&self) -> String;
            pub fn port(&self) -> u16;
        }
    }

    pub async fn batches(&self) -> services::Result<Vec<TransactionBatchEntry>> {
        self.db._batches().await.map_err(Into::into)
    }

    pub async fn transactions(&self) -> services::Result<Vec<TransactionEntry>> {
        self.db._transaction_entries().await.map_err(Into::into)
    }

    pub async fn queue_index_mappings(&self) -> services::Result<Vec<QueueIndexMapping>> {
        self.db._queue_index_mappings().await.map_err(Into::into)
    }
}

impl services::sequencer_batch_appended::port::Storage for DbWithProcess {
    async fn commit(&self, writes: WriteSet) -> services::Result<()> {
        self.db._commit(writes).await.map_err(Into::into)
    }
}

impl services::l1_ingestion::port::Storage for DbWithProcess {
    async fn highest_synced_l1_block(&self) -> services::Result<Option<u64>> {
        self.db._highest_synced_l1_block().await.map_err(Into::into)
    }

    async fn set_highest_synced_l1_block(&self, height: u64) -> services::Result<()> {
        self.db
            ._set_highest_synced_l1_block(height)
            .await
            .map_err(Into::into)
    }
}
