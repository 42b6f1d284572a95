//! The storage engine facade used by the rest of the platform.
//!
//! One [`Datastore`] owns one cluster session. It is `Send + Sync`; clone
//! the surrounding `Arc` to share it between tasks.

use crate::connection::{ClusterConnection, ConnectOptions};
use crate::local::LocalCluster;
use crate::metadata::MetadataStore;
use crate::mutation::Mutator;
use crate::prime;
use crate::scan::{RangeScanner, ScanRequest, ScanResults};
use crate::session::{ClusterConnector, Statement};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tabula_common::{Config, Error, Mutation, Result, Row, TableName};
use tracing::info;

/// File holding the embedded cluster inside the data directory
const LOCAL_DB_FILE: &str = "cluster.redb";

pub struct Datastore {
    conn: Arc<ClusterConnection>,
    keyspace: String,
    mutator: Mutator,
    scanner: RangeScanner,
    metadata: MetadataStore,
}

impl Datastore {
    /// Bootstrap a session through `connector` using `config`
    pub async fn connect(connector: &dyn ClusterConnector, config: &Config) -> Result<Self> {
        let options = ConnectOptions::from_config(&config.cluster, &config.retry);
        let conn = ClusterConnection::connect(connector, &options).await?;
        Self::from_connection(conn, &config.cluster.keyspace)
    }

    /// Open the embedded cluster under `config.local.data_dir` and connect
    pub async fn open_local(config: &Config) -> Result<Self> {
        let path = config.local.data_dir.join(LOCAL_DB_FILE);
        let cluster = LocalCluster::open(&path, config.cluster.hosts.iter().cloned())
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        info!("Opened embedded cluster at {}", path.display());
        Self::connect(&cluster.connector(), config).await
    }

    pub fn from_connection(conn: ClusterConnection, keyspace: &str) -> Result<Self> {
        let conn = Arc::new(conn);
        Ok(Self {
            mutator: Mutator::new(conn.clone()),
            scanner: RangeScanner::new(conn.clone()),
            metadata: MetadataStore::new(conn.clone())?,
            keyspace: keyspace.to_string(),
            conn,
        })
    }

    #[must_use]
    pub fn connection(&self) -> &ClusterConnection {
        &self.conn
    }

    #[must_use]
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// Create a table with the canonical layout; no-op if it exists
    pub async fn create_table(&self, name: &str) -> Result<()> {
        let table = TableName::new(name)?;
        info!("Creating table {}", table);
        self.conn
            .execute("create_table", &Statement::CreateTable { table })
            .await?;
        Ok(())
    }

    /// Drop a table; no-op if absent
    pub async fn delete_table(&self, name: &str) -> Result<()> {
        let table = TableName::new(name)?;
        info!("Dropping table {}", table);
        self.conn
            .execute("delete_table", &Statement::DropTable { table })
            .await?;
        Ok(())
    }

    pub async fn put(
        &self,
        table: &str,
        keys: &[Bytes],
        columns: &[String],
        values: &HashMap<Bytes, HashMap<String, Bytes>>,
        ttl: Option<u32>,
    ) -> Result<()> {
        self.mutator.put(table, keys, columns, values, ttl).await
    }

    /// Delete whole rows; `columns` has no effect
    pub async fn delete(
        &self,
        table: &str,
        keys: &[Bytes],
        columns: Option<&[String]>,
    ) -> Result<()> {
        self.mutator.delete(table, keys, columns).await
    }

    pub async fn mutate(&self, mutations: &[Mutation]) -> Result<()> {
        self.mutator.mutate(mutations).await
    }

    pub async fn batch_get(
        &self,
        table: &str,
        keys: &[Bytes],
        columns: &[String],
    ) -> Result<HashMap<Bytes, Row>> {
        self.scanner.batch_get(table, keys, columns).await
    }

    pub async fn scan(&self, request: &ScanRequest) -> Result<ScanResults> {
        self.scanner.scan(request).await
    }

    pub async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        self.metadata.get(key).await
    }

    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.metadata.set(key, value).await
    }

    pub async fn is_valid_version(&self) -> Result<bool> {
        self.metadata.is_valid_version().await
    }

    pub async fn is_primed(&self) -> Result<bool> {
        self.metadata.is_primed().await
    }

    /// Prime the configured keyspace (see [`prime::prime`])
    pub async fn prime(&self, replication_factor: u32) -> Result<()> {
        prime::prime(&self.conn, &self.metadata, &self.keyspace, replication_factor).await
    }

    /// Release the session
    pub async fn close(self) -> Result<()> {
        self.conn.close().await
    }
}
