//! Core type definitions for Tabula
//!
//! This module defines the entity model shared by every component: table
//! names, rows and their columns, keyed entities, mutations and the
//! consistency levels statements are executed at.

use bytes::Bytes;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Opaque binary row key, unique within a table
pub type RowKey = Bytes;

/// Longest table name the cluster accepts
pub const MAX_TABLE_NAME_LEN: usize = 48;

/// Longest TTL the cluster accepts (20 years, in seconds)
pub const MAX_TTL_SECS: u32 = 630_720_000;

/// Name of a logical table
///
/// Names are quoted verbatim when rendered into statements, so only the
/// characters the cluster allows in quoted identifiers are accepted.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct TableName(String);

impl TableName {
    /// Create a new table name (validates identifier rules)
    pub fn new(name: impl Into<String>) -> Result<Self, TableNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Get the table name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> Result<(), TableNameError> {
        if name.is_empty() {
            return Err(TableNameError::Empty);
        }
        if name.len() > MAX_TABLE_NAME_LEN {
            return Err(TableNameError::TooLong(name.len()));
        }
        if let Some(c) = name.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
            return Err(TableNameError::InvalidChar(c));
        }
        Ok(())
    }
}

impl fmt::Debug for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableName({:?})", self.0)
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors that can occur when creating a table name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableNameError {
    #[error("table name cannot be empty")]
    Empty,
    #[error("table name is {0} characters, at most 48 are allowed")]
    TooLong(usize),
    #[error("table name contains invalid character: {0:?}")]
    InvalidChar(char),
}

/// The live columns of a single row
///
/// Column order is the cluster's clustering order (by name).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Row {
    columns: BTreeMap<String, Bytes>,
}

impl Row {
    /// Create an empty row
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a column, if present
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Bytes> {
        self.columns.get(column)
    }

    /// Set a column, returning the previous value
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Bytes>) -> Option<Bytes> {
        self.columns.insert(column.into(), value.into())
    }

    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    /// Column names in clustering order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// (column, value) pairs in clustering order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.columns.iter().map(|(c, v)| (c.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    #[must_use]
    pub fn into_columns(self) -> BTreeMap<String, Bytes> {
        self.columns
    }
}

impl From<BTreeMap<String, Bytes>> for Row {
    fn from(columns: BTreeMap<String, Bytes>) -> Self {
        Self { columns }
    }
}

impl<C: Into<String>, V: Into<Bytes>> FromIterator<(C, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (C, V)>>(iter: I) -> Self {
        Self {
            columns: iter
                .into_iter()
                .map(|(c, v)| (c.into(), v.into()))
                .collect(),
        }
    }
}

/// A row together with its key, as produced by range scans
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entity {
    key: RowKey,
    row: Row,
}

impl Entity {
    #[must_use]
    pub fn new(key: impl Into<RowKey>, row: Row) -> Self {
        Self {
            key: key.into(),
            row,
        }
    }

    #[must_use]
    pub fn key(&self) -> &RowKey {
        &self.key
    }

    #[must_use]
    pub fn row(&self) -> &Row {
        &self.row
    }

    /// Shorthand for `self.row().get(column)`
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Bytes> {
        self.row.get(column)
    }

    #[must_use]
    pub fn into_parts(self) -> (RowKey, Row) {
        (self.key, self.row)
    }
}

/// Kind of a mutation, used to group statements in a batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum MutationKind {
    #[display("put")]
    Put,
    #[display("delete")]
    Delete,
}

/// A single operation inside an atomic batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    /// Insert or overwrite the given columns of a row
    Put {
        table: String,
        key: RowKey,
        values: BTreeMap<String, Bytes>,
        ttl: Option<u32>,
    },
    /// Remove an entire row
    Delete { table: String, key: RowKey },
}

impl Mutation {
    pub fn put(
        table: impl Into<String>,
        key: impl Into<RowKey>,
        values: impl IntoIterator<Item = (String, Bytes)>,
    ) -> Self {
        Self::Put {
            table: table.into(),
            key: key.into(),
            values: values.into_iter().collect(),
            ttl: None,
        }
    }

    pub fn delete(table: impl Into<String>, key: impl Into<RowKey>) -> Self {
        Self::Delete {
            table: table.into(),
            key: key.into(),
        }
    }

    /// Expire the written cells after `secs` seconds (no effect on deletes)
    #[must_use]
    pub fn with_ttl(mut self, secs: u32) -> Self {
        if let Self::Put { ttl, .. } = &mut self {
            *ttl = Some(secs);
        }
        self
    }

    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Put { table, .. } | Self::Delete { table, .. } => table,
        }
    }

    #[must_use]
    pub fn key(&self) -> &RowKey {
        match self {
            Self::Put { key, .. } | Self::Delete { key, .. } => key,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> MutationKind {
        match self {
            Self::Put { .. } => MutationKind::Put,
            Self::Delete { .. } => MutationKind::Delete,
        }
    }
}

/// Number of replicas that must acknowledge a statement
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    #[default]
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
}

impl Consistency {
    /// Replica acknowledgements required with `replication_factor` replicas
    #[must_use]
    pub const fn required_replicas(self, replication_factor: usize) -> usize {
        match self {
            Self::Any | Self::One | Self::LocalOne => 1,
            Self::Two => 2,
            Self::Three => 3,
            Self::Quorum | Self::LocalQuorum | Self::EachQuorum => replication_factor / 2 + 1,
            Self::All => replication_factor,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Any => "ANY",
            Self::One => "ONE",
            Self::Two => "TWO",
            Self::Three => "THREE",
            Self::Quorum => "QUORUM",
            Self::All => "ALL",
            Self::LocalQuorum => "LOCAL_QUORUM",
            Self::EachQuorum => "EACH_QUORUM",
            Self::LocalOne => "LOCAL_ONE",
        }
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Consistency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "ANY" => Ok(Self::Any),
            "ONE" => Ok(Self::One),
            "TWO" => Ok(Self::Two),
            "THREE" => Ok(Self::Three),
            "QUORUM" => Ok(Self::Quorum),
            "ALL" => Ok(Self::All),
            "LOCAL_QUORUM" => Ok(Self::LocalQuorum),
            "EACH_QUORUM" => Ok(Self::EachQuorum),
            "LOCAL_ONE" => Ok(Self::LocalOne),
            _ => Err(format!("unknown consistency level: {s}")),
        }
    }
}
