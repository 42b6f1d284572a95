//! Error types for Tabula
//!
//! Two layers are defined here. [`ClusterError`] is the rich, tagged cause
//! reported at the cluster-client boundary. [`Error`] is what engine
//! operations return: callers only ever need to distinguish argument misuse
//! from connection failures, while the original cause stays attached for
//! diagnostics.

use crate::types::{Consistency, TableName, TableNameError};
use std::time::Duration;
use thiserror::Error;

/// Common result type for Tabula operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which replica acknowledgement timed out
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    Read,
    Write,
}

/// Failure causes observed at the cluster-client boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("no host available among {hosts:?}: {reason}")]
    NoHostAvailable { hosts: Vec<String>, reason: String },

    #[error("not enough replicas for {consistency}: required {required}, alive {alive}")]
    Unavailable {
        consistency: Consistency,
        required: usize,
        alive: usize,
    },

    #[error("read timeout at {consistency}: received {received} of {required} responses")]
    ReadTimeout {
        consistency: Consistency,
        received: usize,
        required: usize,
        data_present: bool,
    },

    #[error("write timeout at {consistency} ({write_type}): received {received} of {required} acks")]
    WriteTimeout {
        consistency: Consistency,
        received: usize,
        required: usize,
        write_type: String,
    },

    #[error("coordination failure: {0}")]
    CoordinationFailure(String),

    #[error("client-side timeout after {0:?}")]
    OperationTimedOut(Duration),

    #[error("unconfigured table {table}")]
    TableMissing { table: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ClusterError {
    /// Transient failures may succeed when the statement is re-executed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. }
                | Self::ReadTimeout { .. }
                | Self::WriteTimeout { .. }
                | Self::CoordinationFailure(_)
                | Self::OperationTimedOut(_)
        )
    }

    /// Failures reported to callers as [`Error::Connection`]
    ///
    /// Every transient cause, plus losing all hosts after bootstrap: an
    /// outage is worth resubmitting once the cluster is back.
    #[must_use]
    pub const fn is_connection_failure(&self) -> bool {
        self.is_transient() || matches!(self, Self::NoHostAvailable { .. })
    }

    /// The replica timeout this failure represents, if any
    #[must_use]
    pub const fn timeout_kind(&self) -> Option<TimeoutKind> {
        match self {
            Self::ReadTimeout { .. } => Some(TimeoutKind::Read),
            Self::WriteTimeout { .. } => Some(TimeoutKind::Write),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_table_missing(&self) -> bool {
        matches!(self, Self::TableMissing { .. })
    }

    pub fn table_missing(table: &TableName) -> Self {
        Self::TableMissing {
            table: table.as_str().to_string(),
        }
    }
}

/// Common error type for Tabula
#[derive(Debug, Error)]
pub enum Error {
    /// Caller misuse; detected before any I/O
    #[error("invalid argument: {0}")]
    Argument(String),

    /// Transient cluster failure, after any retry budget was exhausted
    #[error("connection error during {operation}{}: {source}", fmt_table(.table.as_ref()))]
    Connection {
        operation: &'static str,
        table: Option<String>,
        #[source]
        source: ClusterError,
    },

    /// The cluster rejected the statement outright
    #[error("request rejected during {operation}{}: {source}", fmt_table(.table.as_ref()))]
    Request {
        operation: &'static str,
        table: Option<String>,
        #[source]
        source: ClusterError,
    },

    /// The cluster could not be reached within the bootstrap budget
    #[error("could not connect to cluster after {attempts} attempts: {source}")]
    Bootstrap {
        attempts: u32,
        #[source]
        source: ClusterError,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn fmt_table(table: Option<&String>) -> String {
    table.map(|t| format!(" on {t}")).unwrap_or_default()
}

impl From<TableNameError> for Error {
    fn from(e: TableNameError) -> Self {
        Self::Argument(e.to_string())
    }
}

impl Error {
    /// Create an argument error
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    /// Attach operation context to a cluster failure
    ///
    /// Transient causes and host outages become [`Error::Connection`],
    /// everything else [`Error::Request`].
    pub fn from_cluster(
        operation: &'static str,
        table: Option<&TableName>,
        source: ClusterError,
    ) -> Self {
        let table = table.map(|t| t.as_str().to_string());
        if source.is_connection_failure() {
            Self::Connection {
                operation,
                table,
                source,
            }
        } else {
            Self::Request {
                operation,
                table,
                source,
            }
        }
    }

    /// Check if this is a retryable error
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    #[must_use]
    pub const fn is_argument(&self) -> bool {
        matches!(self, Self::Argument(_))
    }

    /// Check if the failure was caused by a table that does not exist
    #[must_use]
    pub fn is_table_missing(&self) -> bool {
        self.cluster_cause().is_some_and(ClusterError::is_table_missing)
    }

    /// The underlying cluster failure, if any
    #[must_use]
    pub const fn cluster_cause(&self) -> Option<&ClusterError> {
        match self {
            Self::Connection { source, .. }
            | Self::Request { source, .. }
            | Self::Bootstrap { source, .. } => Some(source),
            _ => None,
        }
    }
}
