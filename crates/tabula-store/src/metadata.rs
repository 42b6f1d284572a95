//! Process-wide schema metadata in a reserved table.
//!
//! Entries are stored as single cells whose row key and column name are
//! both the metadata key. The reserved table is created on the first write
//! that finds it missing.

use crate::connection::ClusterConnection;
use crate::session::Statement;
use bytes::Bytes;
use std::sync::Arc;
use tabula_common::{ClusterError, Error, Result, TableName};
use tracing::{error, info};

/// Reserved table holding metadata entries
pub const METADATA_TABLE: &str = "DATASTORE_METADATA__";

/// Key of the data-layout version entry
pub const VERSION_INFO_KEY: &str = "version";

/// Key of the flag set once priming has completed
pub const PRIMED_KEY: &str = "primed";

/// Data-layout version this build reads and writes
pub const EXPECTED_DATA_VERSION: f64 = 1.0;

/// Result of a single metadata write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The reserved table has not been created yet
    TableMissing,
}

pub struct MetadataStore {
    conn: Arc<ClusterConnection>,
    table: TableName,
}

impl MetadataStore {
    pub fn new(conn: Arc<ClusterConnection>) -> Result<Self> {
        Ok(Self {
            conn,
            table: TableName::new(METADATA_TABLE)?,
        })
    }

    /// Name of the reserved table
    #[must_use]
    pub const fn table(&self) -> &TableName {
        &self.table
    }

    /// Read an entry; an absent key is `None`
    ///
    /// Reading before the reserved table exists is a request error
    /// (see [`Error::is_table_missing`]).
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let statement = Statement::SelectCell {
            table: self.table.clone(),
            key: Bytes::copy_from_slice(key.as_bytes()),
            column: key.to_string(),
        };
        let cells = self.conn.execute("get_metadata", &statement).await?;
        Ok(cells
            .into_iter()
            .next()
            .map(|cell| String::from_utf8_lossy(&cell.value).into_owned()))
    }

    /// Write an entry once, reporting a missing table instead of failing
    pub async fn write(&self, key: &str, value: &str) -> Result<WriteOutcome> {
        let statement = Statement::InsertCell {
            table: self.table.clone(),
            key: Bytes::copy_from_slice(key.as_bytes()),
            column: key.to_string(),
            value: Bytes::copy_from_slice(value.as_bytes()),
            ttl: None,
        };
        match self.conn.execute("set_metadata", &statement).await {
            Ok(_) => Ok(WriteOutcome::Written),
            Err(e) if e.is_table_missing() => Ok(WriteOutcome::TableMissing),
            Err(e) => Err(e),
        }
    }

    /// Create the reserved table if absent
    pub async fn ensure_exists(&self) -> Result<()> {
        self.conn
            .execute(
                "create_table",
                &Statement::CreateTable {
                    table: self.table.clone(),
                },
            )
            .await?;
        Ok(())
    }

    /// Write an entry, creating the reserved table and retrying once if needed
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.write(key, value).await? == WriteOutcome::Written {
            return Ok(());
        }

        info!("Metadata table {} missing, creating it", self.table);
        self.ensure_exists().await?;
        match self.write(key, value).await? {
            WriteOutcome::Written => Ok(()),
            WriteOutcome::TableMissing => {
                let err = Error::Connection {
                    operation: "set_metadata",
                    table: Some(self.table.to_string()),
                    source: ClusterError::table_missing(&self.table),
                };
                error!(
                    operation = "set_metadata",
                    table = self.table.as_str(),
                    "Unable to write metadata {}: {}",
                    key,
                    err
                );
                Err(err)
            }
        }
    }

    /// Whether the stored data-layout version equals [`EXPECTED_DATA_VERSION`]
    ///
    /// A missing table, a missing entry and an unparsable value all read as
    /// `false`.
    #[allow(clippy::float_cmp)]
    pub async fn is_valid_version(&self) -> Result<bool> {
        let Some(stored) = self.get_or_missing(VERSION_INFO_KEY).await? else {
            return Ok(false);
        };
        Ok(stored
            .trim()
            .parse::<f64>()
            .is_ok_and(|version| version == EXPECTED_DATA_VERSION))
    }

    /// Whether priming has completed
    pub async fn is_primed(&self) -> Result<bool> {
        Ok(self.get_or_missing(PRIMED_KEY).await?.as_deref() == Some("true"))
    }

    async fn get_or_missing(&self, key: &str) -> Result<Option<String>> {
        match self.get(key).await {
            Err(e) if e.is_table_missing() => Ok(None),
            other => other,
        }
    }
}

/// Stored text of [`EXPECTED_DATA_VERSION`]
#[must_use]
pub fn expected_version_text() -> String {
    format!("{EXPECTED_DATA_VERSION:.1}")
}
