//! The boundary between the engine and a cluster client driver.
//!
//! The engine never speaks the cluster's wire protocol itself. It builds
//! typed [`Statement`]s, prepares [`StatementTemplate`]s and submits
//! [`Batch`]es through a [`ClusterSession`], which a driver (or the embedded
//! [`crate::local`] backend) implements.

use crate::layout::ColumnLayout;
use crate::retry::StatementClass;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tabula_common::{ClusterError, Consistency, TableName};
use xxhash_rust::xxh64::xxh64;

/// Result type at the driver boundary
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// One `(key, column, value)` triple as stored by the cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cell {
    pub key: Bytes,
    pub column: String,
    pub value: Bytes,
}

impl Cell {
    pub fn new(key: impl Into<Bytes>, column: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            column: column.into(),
            value: value.into(),
        }
    }
}

/// One end of a token-range scan
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanBound {
    /// Bound at the token of this row key
    Key(Bytes),
    /// Bound directly in token space
    Token(i64),
}

impl ScanBound {
    /// Lowest token on the ring
    pub const MIN: Self = Self::Token(i64::MIN);
    /// Highest token on the ring
    pub const MAX: Self = Self::Token(i64::MAX);

    pub fn key(key: impl Into<Bytes>) -> Self {
        Self::Key(key.into())
    }
}

/// A token-bounded read over one table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeSelect {
    pub table: TableName,
    /// Restrict to these columns; `None` returns every column
    pub columns: Option<Vec<String>>,
    pub start: ScanBound,
    pub end: ScanBound,
    pub start_inclusive: bool,
    pub end_inclusive: bool,
    /// Maximum number of cells returned
    pub limit: Option<usize>,
}

/// A statement executed directly (without preparation)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Statement {
    CreateKeyspace {
        keyspace: String,
        replication_factor: u32,
    },
    CreateTable {
        table: TableName,
    },
    DropTable {
        table: TableName,
    },
    /// Cells of the given keys restricted to the given columns
    SelectCells {
        table: TableName,
        keys: Vec<Bytes>,
        columns: Vec<String>,
    },
    /// A single cell
    SelectCell {
        table: TableName,
        key: Bytes,
        column: String,
    },
    SelectRange(RangeSelect),
    /// Whole-row delete of every key
    DeleteRows {
        table: TableName,
        keys: Vec<Bytes>,
    },
    InsertCell {
        table: TableName,
        key: Bytes,
        column: String,
        value: Bytes,
        ttl: Option<u32>,
    },
}

impl Statement {
    /// Table the statement targets, if any
    #[must_use]
    pub const fn table(&self) -> Option<&TableName> {
        match self {
            Self::CreateKeyspace { .. } => None,
            Self::CreateTable { table }
            | Self::DropTable { table }
            | Self::SelectCells { table, .. }
            | Self::SelectCell { table, .. }
            | Self::DeleteRows { table, .. }
            | Self::InsertCell { table, .. }
            | Self::SelectRange(RangeSelect { table, .. }) => Some(table),
        }
    }

    #[must_use]
    pub const fn class(&self) -> StatementClass {
        match self {
            Self::CreateKeyspace { .. } => StatementClass::CreateKeyspace,
            Self::CreateTable { .. } => StatementClass::CreateTable,
            Self::DropTable { .. } => StatementClass::DropTable,
            Self::SelectCells { .. } | Self::SelectCell { .. } => StatementClass::PointRead,
            Self::SelectRange(_) => StatementClass::RangeRead,
            Self::DeleteRows { .. } => StatementClass::Delete,
            Self::InsertCell { .. } => StatementClass::UniformWrite,
        }
    }

    /// Canonical statement text
    #[must_use]
    pub fn cql(&self) -> String {
        match self {
            Self::CreateKeyspace {
                keyspace,
                replication_factor,
            } => ColumnLayout::create_keyspace(keyspace, *replication_factor),
            Self::CreateTable { table } => ColumnLayout::create_table(table),
            Self::DropTable { table } => ColumnLayout::drop_table(table),
            Self::SelectCells { table, .. } => ColumnLayout::select_cells(table),
            Self::SelectCell { table, .. } => ColumnLayout::select_cell(table),
            Self::SelectRange(range) => ColumnLayout::select_range(
                &range.table,
                &range.start,
                &range.end,
                range.start_inclusive,
                range.end_inclusive,
                range.columns.is_some(),
                range.limit,
            ),
            Self::DeleteRows { table, .. } => ColumnLayout::delete_rows(table),
            Self::InsertCell { table, ttl, .. } => ColumnLayout::insert_cell(table, *ttl),
        }
    }
}

/// A statement shape that can be prepared once and bound many times
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StatementTemplate {
    /// Single-cell insert, TTL bound per execution
    Insert { table: TableName },
    /// Whole-row delete of one key
    DeleteRow { table: TableName },
}

impl StatementTemplate {
    #[must_use]
    pub const fn table(&self) -> &TableName {
        match self {
            Self::Insert { table } | Self::DeleteRow { table } => table,
        }
    }

    #[must_use]
    pub fn cql(&self) -> String {
        match self {
            Self::Insert { table } => ColumnLayout::insert(table),
            Self::DeleteRow { table } => ColumnLayout::delete_row(table),
        }
    }
}

/// A template the cluster has accepted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedStatement {
    id: u64,
    template: StatementTemplate,
}

impl PreparedStatement {
    /// Identify a template by the hash of its statement text
    #[must_use]
    pub fn new(template: StatementTemplate) -> Self {
        let id = xxh64(template.cql().as_bytes(), 0);
        Self { id, template }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn template(&self) -> &StatementTemplate {
        &self.template
    }

    /// Bind insert parameters; `None` disables expiry
    #[must_use]
    pub fn bind_insert(
        &self,
        key: Bytes,
        column: String,
        value: Bytes,
        ttl: Option<u32>,
    ) -> BoundStatement {
        BoundStatement {
            prepared: self.clone(),
            params: BoundParams::Insert {
                key,
                column,
                value,
                ttl: ttl.unwrap_or(0),
            },
        }
    }

    #[must_use]
    pub fn bind_delete(&self, key: Bytes) -> BoundStatement {
        BoundStatement {
            prepared: self.clone(),
            params: BoundParams::DeleteRow { key },
        }
    }
}

/// Values bound to a prepared statement
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoundParams {
    Insert {
        key: Bytes,
        column: String,
        value: Bytes,
        /// Seconds until expiry, 0 for none
        ttl: u32,
    },
    DeleteRow {
        key: Bytes,
    },
}

/// A prepared statement with its parameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundStatement {
    pub prepared: PreparedStatement,
    pub params: BoundParams,
}

impl BoundStatement {
    #[must_use]
    pub const fn table(&self) -> &TableName {
        self.prepared.template().table()
    }

    #[must_use]
    pub const fn is_insert(&self) -> bool {
        matches!(self.params, BoundParams::Insert { .. })
    }
}

/// A logged batch, applied atomically by the cluster
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    statements: Vec<BoundStatement>,
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, statement: BoundStatement) {
        self.statements.push(statement);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoundStatement> {
        self.statements.iter()
    }

    /// Inserts through a single prepared statement form a uniform write;
    /// anything else is a mixed batch
    #[must_use]
    pub fn class(&self) -> StatementClass {
        let mut statements = self.statements.iter();
        let Some(first) = statements.next() else {
            return StatementClass::UniformWrite;
        };
        let uniform = first.is_insert()
            && statements.all(|s| s.is_insert() && s.prepared.id() == first.prepared.id());
        if uniform {
            StatementClass::UniformWrite
        } else {
            StatementClass::MixedBatch
        }
    }

    /// Table of the first statement, for diagnostics
    #[must_use]
    pub fn first_table(&self) -> Option<&TableName> {
        self.statements.first().map(BoundStatement::table)
    }
}

/// An open session against the cluster
///
/// Sessions accept concurrent statements; the engine adds no locking.
#[async_trait]
pub trait ClusterSession: Send + Sync {
    /// Execute a statement and collect the cells it returns
    async fn execute(
        &self,
        statement: &Statement,
        consistency: Consistency,
    ) -> ClusterResult<Vec<Cell>>;

    async fn prepare(&self, template: &StatementTemplate) -> ClusterResult<PreparedStatement>;

    /// Apply every statement of the batch atomically
    async fn batch(&self, batch: &Batch, consistency: Consistency) -> ClusterResult<()>;

    /// Release every resource held by the session
    async fn shutdown(&self) -> ClusterResult<()>;
}

/// Opens sessions; one call is one connection attempt
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(
        &self,
        hosts: &[String],
        protocol_version: u8,
    ) -> ClusterResult<Arc<dyn ClusterSession>>;
}
