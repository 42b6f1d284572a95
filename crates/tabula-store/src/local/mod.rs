//! Embedded single-process cluster backed by redb.
//!
//! [`LocalCluster`] persists every logical table in one redb database and
//! orders cells the way a hash-partitioned cluster does: by the token of the
//! row key, then by key, then by column. Hosts are simulated so that
//! consistency levels, unavailability and bootstrap failures behave like a
//! real deployment. Every host holds a full replica.

mod clock;
mod codec;
mod tables;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::token;

use crate::session::{
    Batch, BoundParams, BoundStatement, Cell, ClusterConnector, ClusterResult, ClusterSession,
    PreparedStatement, RangeSelect, ScanBound, Statement, StatementTemplate,
};
use async_trait::async_trait;
use bytes::Bytes;
use codec::StoredCell;
use parking_lot::RwLock;
use redb::{Database, ReadOnlyTable, ReadableTable, Table, WriteTransaction};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tabula_common::{ClusterError, Consistency, TableName};
use tracing::{debug, info};

/// Native protocol versions the embedded cluster accepts
const PROTOCOL_VERSIONS: RangeInclusive<u8> = 1..=5;

/// Error type for the embedded backend
#[derive(Debug, thiserror::Error)]
pub enum LocalError {
    #[error("redb error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt cell: {0}")]
    Corrupt(String),
    #[error("unconfigured table {0}")]
    TableMissing(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("session has been shut down")]
    Closed,
}

impl From<redb::TransactionError> for LocalError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl From<LocalError> for ClusterError {
    fn from(e: LocalError) -> Self {
        match e {
            LocalError::TableMissing(table) => Self::TableMissing { table },
            LocalError::Table(redb::TableError::TableDoesNotExist(physical)) => {
                Self::TableMissing {
                    table: tables::logical_name(&physical).to_string(),
                }
            }
            LocalError::InvalidRequest(msg) => Self::InvalidRequest(msg),
            LocalError::Closed => Self::NoHostAvailable {
                hosts: Vec::new(),
                reason: "session has been shut down".to_string(),
            },
            other => Self::Storage(other.to_string()),
        }
    }
}

pub type LocalResult<T> = Result<T, LocalError>;

type CellsMut<'t> = Table<'t, &'static [u8], &'static [u8]>;
type Cells = ReadOnlyTable<&'static [u8], &'static [u8]>;

/// Embedded cluster: one redb database and a set of simulated hosts
#[derive(Clone)]
pub struct LocalCluster {
    state: Arc<ClusterState>,
}

struct ClusterState {
    db: Database,
    clock: Arc<dyn Clock>,
    hosts: RwLock<BTreeMap<String, bool>>,
    prepared: RwLock<HashMap<u64, StatementTemplate>>,
}

impl LocalCluster {
    /// Open (or create) the cluster database at `path`; every host starts up
    pub fn open<H: Into<String>>(
        path: impl AsRef<Path>,
        hosts: impl IntoIterator<Item = H>,
    ) -> LocalResult<Self> {
        Self::open_with_clock(path, hosts, Arc::new(SystemClock))
    }

    pub fn open_with_clock<H: Into<String>>(
        path: impl AsRef<Path>,
        hosts: impl IntoIterator<Item = H>,
        clock: Arc<dyn Clock>,
    ) -> LocalResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Bookkeeping tables exist up front so read transactions never miss them
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(tables::CATALOG)?;
            let _t = write_txn.open_table(tables::KEYSPACES)?;
        }
        write_txn.commit()?;

        let hosts = hosts.into_iter().map(|h| (h.into(), true)).collect();
        info!("Opened local cluster at {}", path.display());
        Ok(Self {
            state: Arc::new(ClusterState {
                db,
                clock,
                hosts: RwLock::new(hosts),
                prepared: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// Connector handing out sessions against this cluster
    #[must_use]
    pub fn connector(&self) -> LocalConnector {
        LocalConnector {
            cluster: self.clone(),
        }
    }

    /// Mark a host up or down, registering it if unknown
    pub fn set_host_up(&self, host: &str, up: bool) {
        self.state.hosts.write().insert(host.to_string(), up);
    }

    #[must_use]
    pub fn hosts(&self) -> Vec<String> {
        self.state.hosts.read().keys().cloned().collect()
    }

    #[must_use]
    pub fn is_up(&self, host: &str) -> bool {
        self.state.hosts.read().get(host).copied().unwrap_or(false)
    }

    pub fn table_exists(&self, table: &TableName) -> LocalResult<bool> {
        let txn = self.state.db.begin_read()?;
        let catalog = txn.open_table(tables::CATALOG)?;
        Ok(catalog.get(table.as_str())?.is_some())
    }

    pub fn keyspace_replication(&self, keyspace: &str) -> LocalResult<Option<u32>> {
        let txn = self.state.db.begin_read()?;
        let keyspaces = txn.open_table(tables::KEYSPACES)?;
        Ok(keyspaces.get(keyspace)?.map(|v| v.value()))
    }

    fn check_available(&self, consistency: Consistency) -> ClusterResult<()> {
        let hosts = self.state.hosts.read();
        let alive = hosts.values().filter(|up| **up).count();
        if alive == 0 {
            return Err(ClusterError::NoHostAvailable {
                hosts: hosts.keys().cloned().collect(),
                reason: "all hosts are down".to_string(),
            });
        }
        let required = consistency.required_replicas(hosts.len());
        if alive < required {
            return Err(ClusterError::Unavailable {
                consistency,
                required,
                alive,
            });
        }
        Ok(())
    }

    fn now_ms(&self) -> u64 {
        self.state.clock.now_ms()
    }

    // ---- Schema ----

    fn create_keyspace(&self, keyspace: &str, replication_factor: u32) -> LocalResult<()> {
        if replication_factor == 0 {
            return Err(LocalError::InvalidRequest(
                "replication_factor must be greater than zero".to_string(),
            ));
        }
        self.write(|txn| {
            let mut keyspaces = txn.open_table(tables::KEYSPACES)?;
            if keyspaces.get(keyspace)?.is_none() {
                keyspaces.insert(keyspace, replication_factor)?;
            }
            Ok(())
        })
    }

    fn create_table(&self, table: &TableName) -> LocalResult<()> {
        let now = self.now_ms();
        let created = self.write(|txn| {
            let mut catalog = txn.open_table(tables::CATALOG)?;
            if catalog.get(table.as_str())?.is_some() {
                return Ok(false);
            }
            catalog.insert(table.as_str(), now)?;
            let physical = tables::physical_name(table);
            let _t = txn.open_table(tables::cells(&physical))?;
            Ok(true)
        })?;
        if created {
            debug!("Created local table {}", table);
        }
        Ok(())
    }

    fn drop_table(&self, table: &TableName) -> LocalResult<()> {
        self.write(|txn| {
            let mut catalog = txn.open_table(tables::CATALOG)?;
            if catalog.remove(table.as_str())?.is_some() {
                let physical = tables::physical_name(table);
                txn.delete_table(tables::cells(&physical))?;
            }
            Ok(())
        })
    }

    // ---- Reads ----

    fn read_table<R>(
        &self,
        table: &TableName,
        f: impl FnOnce(&Cells) -> LocalResult<R>,
    ) -> LocalResult<R> {
        let txn = self.state.db.begin_read()?;
        {
            let catalog = txn.open_table(tables::CATALOG)?;
            if catalog.get(table.as_str())?.is_none() {
                return Err(LocalError::TableMissing(table.to_string()));
            }
        }
        let physical = tables::physical_name(table);
        let cells = txn.open_table(tables::cells(&physical))?;
        f(&cells)
    }

    fn select_cells(
        &self,
        table: &TableName,
        keys: &[Bytes],
        columns: &[String],
    ) -> LocalResult<Vec<Cell>> {
        let now = self.now_ms();
        let columns: BTreeSet<&String> = columns.iter().collect();
        self.read_table(table, |cells| {
            let mut out = Vec::new();
            let mut seen = BTreeSet::new();
            for key in keys.iter().filter(|k| seen.insert(*k)) {
                for column in &columns {
                    if let Some(value) = read_cell(cells, key, column, now)? {
                        out.push(Cell::new(key.clone(), column.as_str(), value));
                    }
                }
            }
            Ok(out)
        })
    }

    fn select_cell(&self, table: &TableName, key: &Bytes, column: &str) -> LocalResult<Vec<Cell>> {
        let now = self.now_ms();
        self.read_table(table, |cells| {
            Ok(read_cell(cells, key, column, now)?
                .map(|value| Cell::new(key.clone(), column, value))
                .into_iter()
                .collect())
        })
    }

    fn select_range(&self, range: &RangeSelect) -> LocalResult<Vec<Cell>> {
        if range.limit == Some(0) {
            return Err(LocalError::InvalidRequest(
                "LIMIT must be strictly positive".to_string(),
            ));
        }
        let now = self.now_ms();
        let bounds = codec::token_range(
            bound_token(&range.start),
            range.start_inclusive,
            bound_token(&range.end),
            range.end_inclusive,
        );
        self.read_table(&range.table, |cells| {
            let Some((lower, upper)) = bounds else {
                return Ok(Vec::new());
            };
            let window = (
                lower.as_ref().map(Vec::as_slice),
                upper.as_ref().map(Vec::as_slice),
            );
            let mut out = Vec::new();
            for entry in cells.range::<&[u8]>(window)? {
                let (raw_key, raw_value) = entry?;
                let (key, column) = codec::decode_cell_key(raw_key.value())?;
                if range
                    .columns
                    .as_ref()
                    .is_some_and(|wanted| !wanted.contains(&column))
                {
                    continue;
                }
                let cell = StoredCell::decode(raw_value.value())?;
                if !cell.is_live(now) {
                    continue;
                }
                out.push(Cell::new(key, column, cell.value));
                if range.limit.is_some_and(|limit| out.len() >= limit) {
                    break;
                }
            }
            Ok(out)
        })
    }

    // ---- Writes ----

    fn write<R>(&self, f: impl FnOnce(&WriteTransaction) -> LocalResult<R>) -> LocalResult<R> {
        let txn = self.state.db.begin_write()?;
        match f(&txn) {
            Ok(out) => {
                txn.commit()?;
                Ok(out)
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }

    fn insert_cell(
        &self,
        table: &TableName,
        key: &[u8],
        column: &str,
        value: &[u8],
        ttl: u32,
    ) -> LocalResult<()> {
        let now = self.now_ms();
        self.write(|txn| {
            let mut cells = open_cells(txn, table)?;
            put_cell(&mut cells, key, column, value, ttl, now)
        })
    }

    fn delete_rows(&self, table: &TableName, keys: &[Bytes]) -> LocalResult<()> {
        self.write(|txn| {
            let mut cells = open_cells(txn, table)?;
            for key in keys {
                remove_row(&mut cells, key, None)?;
            }
            Ok(())
        })
    }

    fn prepare(&self, template: &StatementTemplate) -> LocalResult<PreparedStatement> {
        if !self.table_exists(template.table())? {
            return Err(LocalError::TableMissing(template.table().to_string()));
        }
        let prepared = PreparedStatement::new(template.clone());
        self.state
            .prepared
            .write()
            .insert(prepared.id(), template.clone());
        Ok(prepared)
    }

    fn apply_batch(&self, batch: &Batch) -> LocalResult<()> {
        let now = self.now_ms();
        self.write(|txn| {
            for statement in batch.iter() {
                self.check_prepared(statement)?;
                let mut cells = open_cells(txn, statement.table())?;
                match &statement.params {
                    BoundParams::Insert {
                        key,
                        column,
                        value,
                        ttl,
                    } => put_cell(&mut cells, key, column, value, *ttl, now)?,
                    BoundParams::DeleteRow { key } => remove_row(&mut cells, key, None)?,
                }
            }
            Ok(())
        })
    }

    fn check_prepared(&self, statement: &BoundStatement) -> LocalResult<()> {
        let prepared = self.state.prepared.read();
        let template = prepared.get(&statement.prepared.id()).ok_or_else(|| {
            LocalError::InvalidRequest(format!(
                "unprepared statement {:016x}",
                statement.prepared.id()
            ))
        })?;
        let matches = matches!(
            (template, &statement.params),
            (StatementTemplate::Insert { .. }, BoundParams::Insert { .. })
                | (StatementTemplate::DeleteRow { .. }, BoundParams::DeleteRow { .. })
        );
        if !matches {
            return Err(LocalError::InvalidRequest(
                "bound values do not match the prepared statement".to_string(),
            ));
        }
        Ok(())
    }
}

fn bound_token(bound: &ScanBound) -> i64 {
    match bound {
        ScanBound::Key(key) => token(key),
        ScanBound::Token(t) => *t,
    }
}

fn open_cells<'t>(txn: &'t WriteTransaction, table: &TableName) -> LocalResult<CellsMut<'t>> {
    {
        let catalog = txn.open_table(tables::CATALOG)?;
        if catalog.get(table.as_str())?.is_none() {
            return Err(LocalError::TableMissing(table.to_string()));
        }
    }
    let physical = tables::physical_name(table);
    Ok(txn.open_table(tables::cells(&physical))?)
}

fn read_cell(cells: &Cells, key: &[u8], column: &str, now: u64) -> LocalResult<Option<Bytes>> {
    let raw_key = codec::cell_key(key, column)?;
    let Some(raw) = cells.get(raw_key.as_slice())? else {
        return Ok(None);
    };
    let cell = StoredCell::decode(raw.value())?;
    Ok(cell.is_live(now).then(|| Bytes::from(cell.value)))
}

fn put_cell(
    cells: &mut CellsMut<'_>,
    key: &[u8],
    column: &str,
    value: &[u8],
    ttl: u32,
    now: u64,
) -> LocalResult<()> {
    remove_row(cells, key, Some(now))?;
    let raw_key = codec::cell_key(key, column)?;
    let raw_value = StoredCell::new(value, ttl, now).encode()?;
    cells.insert(raw_key.as_slice(), raw_value.as_slice())?;
    Ok(())
}

/// Remove the cells of a row; with `expired_at`, only those expired by then
fn remove_row(cells: &mut CellsMut<'_>, key: &[u8], expired_at: Option<u64>) -> LocalResult<()> {
    let prefix = codec::row_prefix(key)?;
    let mut doomed = Vec::new();
    for entry in cells.range(prefix.as_slice()..)? {
        let (raw_key, raw_value) = entry?;
        let raw_key = raw_key.value();
        if !raw_key.starts_with(&prefix) {
            break;
        }
        let remove = match expired_at {
            Some(now) => !StoredCell::decode(raw_value.value())?.is_live(now),
            None => true,
        };
        if remove {
            doomed.push(raw_key.to_vec());
        }
    }
    for raw_key in doomed {
        cells.remove(raw_key.as_slice())?;
    }
    Ok(())
}

/// Hands out [`LocalSession`]s while at least one requested host is up
#[derive(Clone)]
pub struct LocalConnector {
    cluster: LocalCluster,
}

#[async_trait]
impl ClusterConnector for LocalConnector {
    async fn connect(
        &self,
        hosts: &[String],
        protocol_version: u8,
    ) -> ClusterResult<Arc<dyn ClusterSession>> {
        if !PROTOCOL_VERSIONS.contains(&protocol_version) {
            return Err(ClusterError::NoHostAvailable {
                hosts: hosts.to_vec(),
                reason: format!("protocol version {protocol_version} is not supported"),
            });
        }
        if !hosts.iter().any(|h| self.cluster.is_up(h)) {
            return Err(ClusterError::NoHostAvailable {
                hosts: hosts.to_vec(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(Arc::new(LocalSession {
            cluster: self.cluster.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// A session against a [`LocalCluster`]
pub struct LocalSession {
    cluster: LocalCluster,
    closed: AtomicBool,
}

impl LocalSession {
    fn check(&self, consistency: Consistency) -> ClusterResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LocalError::Closed.into());
        }
        self.cluster.check_available(consistency)
    }
}

#[async_trait]
impl ClusterSession for LocalSession {
    async fn execute(
        &self,
        statement: &Statement,
        consistency: Consistency,
    ) -> ClusterResult<Vec<Cell>> {
        self.check(consistency)?;
        let cluster = &self.cluster;
        let cells = match statement {
            Statement::CreateKeyspace {
                keyspace,
                replication_factor,
            } => cluster
                .create_keyspace(keyspace, *replication_factor)
                .map(|()| Vec::new()),
            Statement::CreateTable { table } => cluster.create_table(table).map(|()| Vec::new()),
            Statement::DropTable { table } => cluster.drop_table(table).map(|()| Vec::new()),
            Statement::SelectCells {
                table,
                keys,
                columns,
            } => cluster.select_cells(table, keys, columns),
            Statement::SelectCell { table, key, column } => {
                cluster.select_cell(table, key, column)
            }
            Statement::SelectRange(range) => cluster.select_range(range),
            Statement::DeleteRows { table, keys } => {
                cluster.delete_rows(table, keys).map(|()| Vec::new())
            }
            Statement::InsertCell {
                table,
                key,
                column,
                value,
                ttl,
            } => cluster
                .insert_cell(table, key, column, value, ttl.unwrap_or(0))
                .map(|()| Vec::new()),
        }?;
        Ok(cells)
    }

    async fn prepare(&self, template: &StatementTemplate) -> ClusterResult<PreparedStatement> {
        self.check(Consistency::One)?;
        Ok(self.cluster.prepare(template)?)
    }

    async fn batch(&self, batch: &Batch, consistency: Consistency) -> ClusterResult<()> {
        self.check(consistency)?;
        Ok(self.cluster.apply_batch(batch)?)
    }

    async fn shutdown(&self) -> ClusterResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    const HOSTS: [&str; 3] = ["10.0.0.1", "10.0.0.2", "10.0.0.3"];

    fn table(name: &str) -> TableName {
        TableName::new(name).unwrap()
    }

    fn open(dir: &tempfile::TempDir) -> LocalCluster {
        LocalCluster::open(dir.path().join("cluster.redb"), HOSTS).unwrap()
    }

    async fn session(cluster: &LocalCluster) -> Arc<dyn ClusterSession> {
        cluster
            .connector()
            .connect(&[HOSTS[0].to_string()], 3)
            .await
            .unwrap()
    }

    fn insert(t: &str, key: &str, column: &str, value: &str, ttl: Option<u32>) -> Statement {
        Statement::InsertCell {
            table: table(t),
            key: Bytes::copy_from_slice(key.as_bytes()),
            column: column.to_string(),
            value: Bytes::copy_from_slice(value.as_bytes()),
            ttl,
        }
    }

    fn select(t: &str, keys: &[&str], columns: &[&str]) -> Statement {
        Statement::SelectCells {
            table: table(t),
            keys: keys
                .iter()
                .map(|k| Bytes::copy_from_slice(k.as_bytes()))
                .collect(),
            columns: columns.iter().map(ToString::to_string).collect(),
        }
    }

    #[tokio::test]
    async fn test_create_insert_select() {
        let dir = tempdir().unwrap();
        let cluster = open(&dir);
        let session = session(&cluster).await;
        let q = Consistency::Quorum;

        session
            .execute(&Statement::CreateTable { table: table("t") }, q)
            .await
            .unwrap();
        session
            .execute(&Statement::CreateTable { table: table("t") }, q)
            .await
            .unwrap();
        session.execute(&insert("t", "k", "a", "1", None), q).await.unwrap();
        session.execute(&insert("t", "k", "b", "", None), q).await.unwrap();
        session.execute(&insert("t", "k", "a", "2", None), q).await.unwrap();

        let cells = session
            .execute(&select("t", &["k", "k", "missing"], &["a", "b", "c"]), q)
            .await
            .unwrap();
        assert_eq!(
            cells,
            vec![Cell::new("k", "a", "2"), Cell::new("k", "b", Bytes::new())]
        );
    }

    #[tokio::test]
    async fn test_missing_table() {
        let dir = tempdir().unwrap();
        let cluster = open(&dir);
        let session = session(&cluster).await;
        let q = Consistency::Quorum;

        let err = session.execute(&select("nope", &["k"], &["c"]), q).await.unwrap_err();
        assert_eq!(err, ClusterError::TableMissing { table: "nope".into() });
        let err = session.execute(&insert("nope", "k", "c", "v", None), q).await.unwrap_err();
        assert!(err.is_table_missing());
        let err = session
            .prepare(&StatementTemplate::Insert { table: table("nope") })
            .await
            .unwrap_err();
        assert!(err.is_table_missing());

        // Dropping an absent table is not an error
        session
            .execute(&Statement::DropTable { table: table("nope") }, q)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_drop_table_discards_cells() {
        let dir = tempdir().unwrap();
        let cluster = open(&dir);
        let session = session(&cluster).await;
        let q = Consistency::Quorum;

        session.execute(&Statement::CreateTable { table: table("t") }, q).await.unwrap();
        session.execute(&insert("t", "k", "c", "v", None), q).await.unwrap();
        session.execute(&Statement::DropTable { table: table("t") }, q).await.unwrap();
        assert!(!cluster.table_exists(&table("t")).unwrap());

        session.execute(&Statement::CreateTable { table: table("t") }, q).await.unwrap();
        let cells = session.execute(&select("t", &["k"], &["c"]), q).await.unwrap();
        assert!(cells.is_empty());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cluster =
            LocalCluster::open_with_clock(dir.path().join("c.redb"), HOSTS, clock.clone()).unwrap();
        let session = session(&cluster).await;
        let q = Consistency::Quorum;

        session.execute(&Statement::CreateTable { table: table("t") }, q).await.unwrap();
        session.execute(&insert("t", "k", "c", "v", Some(2)), q).await.unwrap();
        clock.advance(Duration::from_millis(1_999));
        assert_eq!(session.execute(&select("t", &["k"], &["c"]), q).await.unwrap().len(), 1);
        clock.advance(Duration::from_millis(1));
        assert!(session.execute(&select("t", &["k"], &["c"]), q).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_range_follows_token_order() {
        let dir = tempdir().unwrap();
        let cluster = open(&dir);
        let session = session(&cluster).await;
        let q = Consistency::Quorum;

        session.execute(&Statement::CreateTable { table: table("t") }, q).await.unwrap();
        let keys = ["apple", "banana", "cherry", "damson", "elder"];
        for key in keys {
            session.execute(&insert("t", key, "a", key, None), q).await.unwrap();
            session.execute(&insert("t", key, "z", key, None), q).await.unwrap();
        }

        let range = |columns: Option<Vec<String>>, limit| {
            Statement::SelectRange(RangeSelect {
                table: table("t"),
                columns,
                start: ScanBound::MIN,
                end: ScanBound::MAX,
                start_inclusive: true,
                end_inclusive: true,
                limit,
            })
        };

        let cells = session.execute(&range(None, None), q).await.unwrap();
        assert_eq!(cells.len(), 10);
        let tokens: Vec<i64> = cells.iter().map(|c| token(&c.key)).collect();
        assert!(tokens.windows(2).all(|w| w[0] <= w[1]));

        let only_a = session
            .execute(&range(Some(vec!["a".to_string()]), Some(3)), q)
            .await
            .unwrap();
        assert_eq!(only_a.len(), 3);
        assert!(only_a.iter().all(|c| c.column == "a"));

        // Exclusive start at a key skips every cell of that key
        let first = cells[0].key.clone();
        let after_first = session
            .execute(
                &Statement::SelectRange(RangeSelect {
                    table: table("t"),
                    columns: None,
                    start: ScanBound::Key(first.clone()),
                    end: ScanBound::MAX,
                    start_inclusive: false,
                    end_inclusive: true,
                    limit: None,
                }),
                q,
            )
            .await
            .unwrap();
        assert_eq!(after_first.len(), 8);
        assert!(after_first.iter().all(|c| c.key != first));
    }

    #[tokio::test]
    async fn test_delete_rows_removes_every_column() {
        let dir = tempdir().unwrap();
        let cluster = open(&dir);
        let session = session(&cluster).await;
        let q = Consistency::Quorum;

        session.execute(&Statement::CreateTable { table: table("t") }, q).await.unwrap();
        for column in ["a", "b", "c"] {
            session.execute(&insert("t", "k", column, "v", None), q).await.unwrap();
        }
        session.execute(&insert("t", "other", "a", "v", None), q).await.unwrap();
        session
            .execute(
                &Statement::DeleteRows {
                    table: table("t"),
                    keys: vec![Bytes::from("k")],
                },
                q,
            )
            .await
            .unwrap();

        let cells = session
            .execute(&select("t", &["k", "other"], &["a", "b", "c"]), q)
            .await
            .unwrap();
        assert_eq!(cells, vec![Cell::new("other", "a", "v")]);
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let dir = tempdir().unwrap();
        let cluster = open(&dir);
        let session = session(&cluster).await;
        let q = Consistency::Quorum;

        for name in ["a", "b"] {
            session.execute(&Statement::CreateTable { table: table(name) }, q).await.unwrap();
        }
        let insert_a = session
            .prepare(&StatementTemplate::Insert { table: table("a") })
            .await
            .unwrap();
        let insert_b = session
            .prepare(&StatementTemplate::Insert { table: table("b") })
            .await
            .unwrap();
        session.execute(&Statement::DropTable { table: table("b") }, q).await.unwrap();

        let mut batch = Batch::new();
        batch.add(insert_a.bind_insert("k".into(), "c".into(), "v".into(), None));
        batch.add(insert_b.bind_insert("k".into(), "c".into(), "v".into(), None));
        let err = session.batch(&batch, q).await.unwrap_err();
        assert!(err.is_table_missing());

        let cells = session.execute(&select("a", &["k"], &["c"]), q).await.unwrap();
        assert!(cells.is_empty());
    }

    #[tokio::test]
    async fn test_unprepared_statement_rejected() {
        let dir = tempdir().unwrap();
        let cluster = open(&dir);
        let session = session(&cluster).await;
        let q = Consistency::Quorum;
        session.execute(&Statement::CreateTable { table: table("t") }, q).await.unwrap();

        let never_prepared = PreparedStatement::new(StatementTemplate::DeleteRow { table: table("t") });
        let mut batch = Batch::new();
        batch.add(never_prepared.bind_delete("k".into()));
        let err = session.batch(&batch, q).await.unwrap_err();
        assert!(matches!(err, ClusterError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_consistency_against_live_hosts() {
        let dir = tempdir().unwrap();
        let cluster = open(&dir);
        let session = session(&cluster).await;
        let create = Statement::CreateTable { table: table("t") };

        cluster.set_host_up(HOSTS[1], false);
        session.execute(&create, Consistency::Quorum).await.unwrap();

        cluster.set_host_up(HOSTS[2], false);
        let err = session.execute(&create, Consistency::Quorum).await.unwrap_err();
        assert_eq!(
            err,
            ClusterError::Unavailable {
                consistency: Consistency::Quorum,
                required: 2,
                alive: 1,
            }
        );
        assert!(err.is_transient());
        session.execute(&create, Consistency::One).await.unwrap();

        cluster.set_host_up(HOSTS[0], false);
        let err = session.execute(&create, Consistency::One).await.unwrap_err();
        assert!(matches!(err, ClusterError::NoHostAvailable { .. }));
    }

    #[tokio::test]
    async fn test_connect_requires_live_host() {
        let dir = tempdir().unwrap();
        let cluster = open(&dir);
        let connector = cluster.connector();
        let hosts = vec![HOSTS[0].to_string()];

        cluster.set_host_up(HOSTS[0], false);
        let err = connector.connect(&hosts, 3).await.err().unwrap();
        assert!(matches!(err, ClusterError::NoHostAvailable { .. }));

        cluster.set_host_up(HOSTS[0], true);
        assert!(connector.connect(&hosts, 3).await.is_ok());
        assert!(connector.connect(&hosts, 9).await.is_err());
    }

    #[tokio::test]
    async fn test_keyspace_and_shutdown() {
        let dir = tempdir().unwrap();
        let cluster = open(&dir);
        let session = session(&cluster).await;
        let create = Statement::CreateKeyspace {
            keyspace: "Keyspace1".into(),
            replication_factor: 3,
        };
        session.execute(&create, Consistency::Quorum).await.unwrap();
        assert_eq!(cluster.keyspace_replication("Keyspace1").unwrap(), Some(3));

        session.shutdown().await.unwrap();
        assert!(session.execute(&create, Consistency::Quorum).await.is_err());
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempdir().unwrap();
        let q = Consistency::Quorum;
        {
            let cluster = open(&dir);
            let session = session(&cluster).await;
            session.execute(&Statement::CreateTable { table: table("t") }, q).await.unwrap();
            session.execute(&insert("t", "k", "c", "v", None), q).await.unwrap();
        }
        let cluster = open(&dir);
        let session = session(&cluster).await;
        let cells = session.execute(&select("t", &["k"], &["c"]), q).await.unwrap();
        assert_eq!(cells, vec![Cell::new("k", "c", "v")]);
    }
}
