//! Single-table writes and atomic multi-table mutation batches.

use crate::connection::ClusterConnection;
use crate::retry::RetryPolicy;
use crate::session::{Batch, PreparedStatement, Statement, StatementTemplate};
use bytes::Bytes;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tabula_common::{Error, MAX_TTL_SECS, Mutation, MutationKind, Result, TableName};
use tracing::debug;

/// Writes rows through prepared statements and logged batches
pub struct Mutator {
    conn: Arc<ClusterConnection>,
}

impl Mutator {
    #[must_use]
    pub const fn new(conn: Arc<ClusterConnection>) -> Self {
        Self { conn }
    }

    /// Insert or overwrite `values[key][column]` for every key and column
    ///
    /// Every declared `(key, column)` pair must have a value; the shape is
    /// checked before anything is sent. With `ttl`, the cells expire after
    /// that many seconds.
    pub async fn put(
        &self,
        table: &str,
        keys: &[Bytes],
        columns: &[String],
        values: &HashMap<Bytes, HashMap<String, Bytes>>,
        ttl: Option<u32>,
    ) -> Result<()> {
        let table = TableName::new(table)?;
        validate_ttl(ttl)?;
        let mut cells = Vec::with_capacity(keys.len() * columns.len());
        for key in keys {
            let row = values
                .get(key)
                .ok_or_else(|| Error::argument(format!("no values supplied for key {key:?}")))?;
            for column in columns {
                let value = row.get(column).ok_or_else(|| {
                    Error::argument(format!("no value supplied for {key:?}/{column}"))
                })?;
                cells.push((key, column, value));
            }
        }
        if cells.is_empty() {
            return Ok(());
        }

        let insert = self
            .conn
            .prepare("put", &StatementTemplate::Insert { table })
            .await?;
        let mut batch = Batch::new();
        for (key, column, value) in cells {
            batch.add(insert.bind_insert(key.clone(), column.clone(), value.clone(), ttl));
        }
        self.conn
            .batch("put", &batch, self.conn.retry_policy())
            .await
    }

    /// Remove whole rows
    ///
    /// `columns` is accepted for callers that name the columns they meant to
    /// remove; it has no effect, every column of each row is deleted.
    pub async fn delete(
        &self,
        table: &str,
        keys: &[Bytes],
        _columns: Option<&[String]>,
    ) -> Result<()> {
        let table = TableName::new(table)?;
        if keys.is_empty() {
            return Ok(());
        }
        self.conn
            .execute(
                "delete",
                &Statement::DeleteRows {
                    table,
                    keys: keys.to_vec(),
                },
            )
            .await
            .map(drop)
    }

    /// Apply puts and deletes across tables as one atomic batch
    ///
    /// One statement is prepared per (table, kind) for the duration of the
    /// call. The batch is submitted once with no retry: replaying a mix of
    /// inserts and deletes after a partial failure is not safe, so a
    /// transient failure is returned for the caller to resubmit.
    pub async fn mutate(&self, mutations: &[Mutation]) -> Result<()> {
        let mut validated = Vec::with_capacity(mutations.len());
        for mutation in mutations {
            let table = TableName::new(mutation.table())?;
            if let Mutation::Put { ttl, .. } = mutation {
                validate_ttl(*ttl)?;
            }
            // A put without columns contributes no statement
            if matches!(mutation, Mutation::Put { values, .. } if values.is_empty()) {
                continue;
            }
            validated.push((table, mutation));
        }

        let mut prepared: HashMap<(TableName, MutationKind), PreparedStatement> = HashMap::new();
        let mut batch = Batch::new();
        for (table, mutation) in validated {
            let statement = match prepared.entry((table, mutation.kind())) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let (table, kind) = entry.key().clone();
                    let template = match kind {
                        MutationKind::Put => StatementTemplate::Insert { table },
                        MutationKind::Delete => StatementTemplate::DeleteRow { table },
                    };
                    let statement = self.conn.prepare("mutate", &template).await?;
                    entry.insert(statement)
                }
            };
            match mutation {
                Mutation::Put {
                    key, values, ttl, ..
                } => {
                    for (column, value) in values {
                        batch.add(statement.bind_insert(
                            key.clone(),
                            column.clone(),
                            value.clone(),
                            *ttl,
                        ));
                    }
                }
                Mutation::Delete { key, .. } => batch.add(statement.bind_delete(key.clone())),
            }
        }
        if batch.is_empty() {
            return Ok(());
        }

        debug!(
            "Mutating {} row(s) with {} prepared statement(s)",
            mutations.len(),
            prepared.len()
        );
        self.conn
            .batch("mutate", &batch, RetryPolicy::FALLTHROUGH)
            .await
    }
}

fn validate_ttl(ttl: Option<u32>) -> Result<()> {
    match ttl {
        Some(secs) if secs == 0 || secs > MAX_TTL_SECS => Err(Error::argument(format!(
            "ttl must be between 1 and {MAX_TTL_SECS} seconds, got {secs}"
        ))),
        _ => Ok(()),
    }
}
