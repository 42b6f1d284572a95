//! Token-ordered range scans and multi-key reads.
//!
//! The cluster returns a flat stream of `(key, column, value)` cells ordered
//! by the token of the key. Scans regroup that stream into entities; the
//! order of the result is token order, not key order.

use crate::connection::ClusterConnection;
pub use crate::session::ScanBound;
use crate::session::{Cell, RangeSelect, Statement};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tabula_common::{Entity, Error, Result, Row, TableName};
use tracing::debug;

/// Parameters of a range scan
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanRequest {
    table: String,
    columns: Vec<String>,
    start: ScanBound,
    end: ScanBound,
    start_inclusive: bool,
    end_inclusive: bool,
    limit: Option<usize>,
    offset: usize,
    keys_only: bool,
}

impl ScanRequest {
    /// Scan the whole ring of `table` for the given columns
    pub fn new<C: Into<String>>(table: impl Into<String>, columns: impl IntoIterator<Item = C>) -> Self {
        Self {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            start: ScanBound::MIN,
            end: ScanBound::MAX,
            start_inclusive: true,
            end_inclusive: true,
            limit: None,
            offset: 0,
            keys_only: false,
        }
    }

    #[must_use]
    pub fn start(mut self, bound: ScanBound) -> Self {
        self.start = bound;
        self
    }

    #[must_use]
    pub fn end(mut self, bound: ScanBound) -> Self {
        self.end = bound;
        self
    }

    #[must_use]
    pub const fn start_inclusive(mut self, inclusive: bool) -> Self {
        self.start_inclusive = inclusive;
        self
    }

    #[must_use]
    pub const fn end_inclusive(mut self, inclusive: bool) -> Self {
        self.end_inclusive = inclusive;
        self
    }

    /// Fetch at most `limit × columns` cells
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Drop this many grouped results, after grouping
    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub const fn keys_only(mut self, keys_only: bool) -> Self {
        self.keys_only = keys_only;
        self
    }

    fn empty_results(&self) -> ScanResults {
        if self.keys_only {
            ScanResults::Keys(Vec::new())
        } else {
            ScanResults::Entities(Vec::new())
        }
    }
}

/// Results of a range scan, in token order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanResults {
    Keys(Vec<Bytes>),
    Entities(Vec<Entity>),
}

impl ScanResults {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Keys(keys) => keys.len(),
            Self::Entities(entities) => entities.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row keys in result order
    #[must_use]
    pub fn keys(&self) -> Vec<&Bytes> {
        match self {
            Self::Keys(keys) => keys.iter().collect(),
            Self::Entities(entities) => entities.iter().map(Entity::key).collect(),
        }
    }

    #[must_use]
    pub fn into_entities(self) -> Option<Vec<Entity>> {
        match self {
            Self::Entities(entities) => Some(entities),
            Self::Keys(_) => None,
        }
    }
}

/// Reads entity-shaped results out of the flat cell stream
pub struct RangeScanner {
    conn: Arc<ClusterConnection>,
}

impl RangeScanner {
    #[must_use]
    pub const fn new(conn: Arc<ClusterConnection>) -> Self {
        Self { conn }
    }

    /// Scan a token range
    ///
    /// A row can hold fewer of the requested columns than asked for, so the
    /// cell limit is only an upper bound and the scan may yield more than
    /// `limit` entities. The offset is applied client-side.
    pub async fn scan(&self, request: &ScanRequest) -> Result<ScanResults> {
        let table = TableName::new(request.table.as_str())?;
        if request.columns.is_empty() {
            return Err(Error::argument("scan requires at least one column"));
        }
        if request.limit == Some(0) {
            return Ok(request.empty_results());
        }

        let cell_limit = request
            .limit
            .map(|limit| limit.saturating_mul(request.columns.len()));
        let statement = Statement::SelectRange(RangeSelect {
            table,
            columns: Some(request.columns.clone()),
            start: request.start.clone(),
            end: request.end.clone(),
            start_inclusive: request.start_inclusive,
            end_inclusive: request.end_inclusive,
            limit: cell_limit,
        });
        let cells = self.conn.execute("scan", &statement).await?;
        debug!("Scan of {} returned {} cells", request.table, cells.len());

        Ok(if request.keys_only {
            ScanResults::Keys(distinct_keys(cells).into_iter().skip(request.offset).collect())
        } else {
            ScanResults::Entities(group_cells(cells).into_iter().skip(request.offset).collect())
        })
    }

    /// Fetch the given columns of several rows
    ///
    /// Every requested key is present in the result; rows without live
    /// columns map to an empty [`Row`].
    pub async fn batch_get(
        &self,
        table: &str,
        keys: &[Bytes],
        columns: &[String],
    ) -> Result<HashMap<Bytes, Row>> {
        let table = TableName::new(table)?;
        let mut rows: HashMap<Bytes, Row> =
            keys.iter().map(|key| (key.clone(), Row::new())).collect();
        if keys.is_empty() || columns.is_empty() {
            return Ok(rows);
        }

        let statement = Statement::SelectCells {
            table,
            keys: keys.to_vec(),
            columns: columns.to_vec(),
        };
        for cell in self.conn.execute("batch_get", &statement).await? {
            rows.entry(cell.key).or_default().insert(cell.column, cell.value);
        }
        Ok(rows)
    }
}

/// Group contiguous cells of the same key, in first-seen order
fn group_cells(cells: Vec<Cell>) -> Vec<Entity> {
    let mut groups: Vec<(Bytes, Row)> = Vec::new();
    for cell in cells {
        match groups.last_mut() {
            Some((key, row)) if *key == cell.key => {
                row.insert(cell.column, cell.value);
            }
            _ => {
                let mut row = Row::new();
                row.insert(cell.column, cell.value);
                groups.push((cell.key, row));
            }
        }
    }
    groups
        .into_iter()
        .map(|(key, row)| Entity::new(key, row))
        .collect()
}

fn distinct_keys(cells: Vec<Cell>) -> Vec<Bytes> {
    let mut keys: Vec<Bytes> = Vec::new();
    for cell in cells {
        if keys.last() != Some(&cell.key) {
            keys.push(cell.key);
        }
    }
    keys
}
