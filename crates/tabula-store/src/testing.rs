//! Fault injection and fixtures shared by the unit tests.

use crate::connection::{ClusterConnection, ConnectOptions};
use crate::local::{LocalCluster, LocalConnector};
use crate::session::{
    Batch, Cell, ClusterConnector, ClusterResult, ClusterSession, PreparedStatement, Statement,
    StatementTemplate,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tabula_common::{ClusterError, Consistency, TableName};
use tempfile::TempDir;

pub const HOST: &str = "127.0.0.1";

pub fn cluster(dir: &TempDir) -> LocalCluster {
    LocalCluster::open(dir.path().join("cluster.redb"), [HOST]).unwrap()
}

/// Connect options that never sleep long
pub fn options() -> ConnectOptions {
    ConnectOptions {
        hosts: vec![HOST.to_string()],
        retry_delay: Duration::from_millis(1),
        ..ConnectOptions::default()
    }
}

pub async fn connection(cluster: &LocalCluster) -> ClusterConnection {
    ClusterConnection::connect(&cluster.connector(), &options())
        .await
        .unwrap()
}

/// A connection whose statements can be made to fail on demand
pub async fn flaky_connection(dir: &TempDir) -> (ClusterConnection, Arc<FlakySession>) {
    let cluster = cluster(dir);
    let inner = cluster.connector().connect(&[HOST.to_string()], 3).await.unwrap();
    let flaky = Arc::new(FlakySession::new(inner));
    let conn = ClusterConnection::with_session(flaky.clone(), &options());
    (conn, flaky)
}

pub async fn create_table(conn: &ClusterConnection, name: &str) -> TableName {
    let table = TableName::new(name).unwrap();
    conn.execute(
        "create_table",
        &Statement::CreateTable {
            table: table.clone(),
        },
    )
    .await
    .unwrap();
    table
}

/// Session wrapper failing the next N statements (executes and batches)
pub struct FlakySession {
    inner: Arc<dyn ClusterSession>,
    failures: Mutex<(u32, Option<ClusterError>)>,
    attempts: AtomicU32,
    prepares: AtomicU32,
}

impl FlakySession {
    pub fn new(inner: Arc<dyn ClusterSession>) -> Self {
        Self {
            inner,
            failures: Mutex::new((0, None)),
            attempts: AtomicU32::new(0),
            prepares: AtomicU32::new(0),
        }
    }

    /// Fail the next `count` statements and restart the attempt count
    pub fn fail_next(&self, count: u32, error: ClusterError) {
        self.attempts.store(0, Ordering::SeqCst);
        *self.failures.lock() = (count, Some(error));
    }

    /// Statements submitted since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Templates prepared since the last reset
    pub fn prepares(&self) -> u32 {
        self.prepares.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
        self.prepares.store(0, Ordering::SeqCst);
        *self.failures.lock() = (0, None);
    }

    fn injected(&self) -> ClusterResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.failures.lock();
        if failures.0 == 0 {
            return Ok(());
        }
        failures.0 -= 1;
        failures.1.clone().map_or(Ok(()), Err)
    }
}

#[async_trait]
impl ClusterSession for FlakySession {
    async fn execute(
        &self,
        statement: &Statement,
        consistency: Consistency,
    ) -> ClusterResult<Vec<Cell>> {
        self.injected()?;
        self.inner.execute(statement, consistency).await
    }

    async fn prepare(&self, template: &StatementTemplate) -> ClusterResult<PreparedStatement> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        self.inner.prepare(template).await
    }

    async fn batch(&self, batch: &Batch, consistency: Consistency) -> ClusterResult<()> {
        self.injected()?;
        self.inner.batch(batch, consistency).await
    }

    async fn shutdown(&self) -> ClusterResult<()> {
        self.inner.shutdown().await
    }
}

/// Connector refusing the first N connection attempts
pub struct ScriptedConnector {
    inner: LocalConnector,
    refuse: u32,
    calls: AtomicU32,
}

impl ScriptedConnector {
    pub const fn new(inner: LocalConnector, refuse: u32) -> Self {
        Self {
            inner,
            refuse,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterConnector for ScriptedConnector {
    async fn connect(
        &self,
        hosts: &[String],
        protocol_version: u8,
    ) -> ClusterResult<Arc<dyn ClusterSession>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.refuse {
            return Err(ClusterError::NoHostAvailable {
                hosts: hosts.to_vec(),
                reason: "connection refused".to_string(),
            });
        }
        self.inner.connect(hosts, protocol_version).await
    }
}

/// Session whose schema changes never become visible to writes
///
/// `CreateTable` is acknowledged without effect and every `InsertCell`
/// fails with `TableMissing`.
pub struct LaggingSchemaSession {
    inner: Arc<dyn ClusterSession>,
    creates: AtomicU32,
    writes: AtomicU32,
}

impl LaggingSchemaSession {
    pub fn new(inner: Arc<dyn ClusterSession>) -> Self {
        Self {
            inner,
            creates: AtomicU32::new(0),
            writes: AtomicU32::new(0),
        }
    }

    pub fn creates(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterSession for LaggingSchemaSession {
    async fn execute(
        &self,
        statement: &Statement,
        consistency: Consistency,
    ) -> ClusterResult<Vec<Cell>> {
        match statement {
            Statement::CreateTable { .. } => {
                self.creates.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            }
            Statement::InsertCell { table, .. } => {
                self.writes.fetch_add(1, Ordering::SeqCst);
                Err(ClusterError::table_missing(table))
            }
            _ => self.inner.execute(statement, consistency).await,
        }
    }

    async fn prepare(&self, template: &StatementTemplate) -> ClusterResult<PreparedStatement> {
        self.inner.prepare(template).await
    }

    async fn batch(&self, batch: &Batch, consistency: Consistency) -> ClusterResult<()> {
        self.inner.batch(batch, consistency).await
    }

    async fn shutdown(&self) -> ClusterResult<()> {
        self.inner.shutdown().await
    }
}

/// A connection whose table creation never takes effect for writes
pub async fn lagging_schema_connection(
    dir: &TempDir,
) -> (ClusterConnection, Arc<LaggingSchemaSession>) {
    let cluster = cluster(dir);
    let inner = cluster.connector().connect(&[HOST.to_string()], 3).await.unwrap();
    let lagging = Arc::new(LaggingSchemaSession::new(inner));
    let conn = ClusterConnection::with_session(lagging.clone(), &options());
    (conn, lagging)
}
