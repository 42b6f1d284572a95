//! Cluster connection lifecycle and statement dispatch.
//!
//! [`ClusterConnection`] bootstraps a session with a bounded number of
//! attempts, holds the default consistency level, and runs every statement
//! through the applicable [`RetryPolicy`] before mapping failures onto the
//! public error taxonomy.

use crate::retry::{RetryDecision, RetryPolicy, StatementClass};
use crate::session::{
    Batch, Cell, ClusterConnector, ClusterResult, ClusterSession, PreparedStatement, Statement,
    StatementTemplate,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tabula_common::config::{ClusterConfig, RetryConfig};
use tabula_common::{ClusterError, Consistency, Error, Result, TableName};
use tracing::{debug, error, info, warn};

/// Parameters for establishing a [`ClusterConnection`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Contact points
    pub hosts: Vec<String>,
    pub protocol_version: u8,
    /// Reconnection attempts after the first failed one
    pub connect_retries: u32,
    /// Fixed delay between connection attempts
    pub retry_delay: Duration,
    /// Consistency level for every statement unless overridden
    pub consistency: Consistency,
    /// Client-side timeout of a single request
    pub request_timeout: Duration,
    /// Policy applied to idempotent statements
    pub retry_policy: RetryPolicy,
}

impl ConnectOptions {
    #[must_use]
    pub fn from_config(cluster: &ClusterConfig, retry: &RetryConfig) -> Self {
        Self {
            hosts: cluster.hosts.clone(),
            protocol_version: cluster.protocol_version,
            connect_retries: cluster.connect_attempts,
            retry_delay: cluster.connect_retry_delay(),
            consistency: cluster.consistency,
            request_timeout: cluster.request_timeout(),
            retry_policy: RetryPolicy::IDEMPOTENT.with_max_attempts(retry.max_attempts),
        }
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::from_config(&ClusterConfig::default(), &RetryConfig::default())
    }
}

/// An established session plus the defaults statements run with
pub struct ClusterConnection {
    session: Arc<dyn ClusterSession>,
    hosts: Vec<String>,
    consistency: Consistency,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl ClusterConnection {
    /// Connect to the cluster, retrying while no host is available
    ///
    /// Any other failure, or running out of attempts, is fatal.
    pub async fn connect(
        connector: &dyn ClusterConnector,
        options: &ConnectOptions,
    ) -> Result<Self> {
        let total = options.connect_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match connector
                .connect(&options.hosts, options.protocol_version)
                .await
            {
                Ok(session) => {
                    info!(
                        "Connected to cluster {:?} after {} attempt(s)",
                        options.hosts, attempt
                    );
                    return Ok(Self::with_session(session, options));
                }
                Err(e @ ClusterError::NoHostAvailable { .. }) if attempt < total => {
                    warn!(
                        "Cluster not reachable (attempt {}/{}): {}",
                        attempt, total, e
                    );
                    tokio::time::sleep(options.retry_delay).await;
                }
                Err(e) => {
                    error!("Unable to connect to cluster {:?}: {}", options.hosts, e);
                    return Err(Error::Bootstrap {
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }

    /// Wrap an already open session
    #[must_use]
    pub fn with_session(session: Arc<dyn ClusterSession>, options: &ConnectOptions) -> Self {
        Self {
            session,
            hosts: options.hosts.clone(),
            consistency: options.consistency,
            request_timeout: options.request_timeout,
            retry_policy: options.retry_policy,
        }
    }

    /// Default consistency level
    #[must_use]
    pub const fn consistency(&self) -> Consistency {
        self.consistency
    }

    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    #[must_use]
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Execute a statement under the idempotent policy
    ///
    /// The policy only retries statement classes it applies to.
    pub async fn execute(&self, operation: &'static str, statement: &Statement) -> Result<Vec<Cell>> {
        debug!("{}: {}", operation, statement.cql());
        self.run(
            operation,
            statement.table(),
            statement.class(),
            self.retry_policy,
            || self.session.execute(statement, self.consistency),
        )
        .await
    }

    pub async fn prepare(
        &self,
        operation: &'static str,
        template: &StatementTemplate,
    ) -> Result<PreparedStatement> {
        debug!("{}: prepare {}", operation, template.cql());
        self.run(
            operation,
            Some(template.table()),
            StatementClass::PointRead,
            RetryPolicy::FALLTHROUGH,
            || self.session.prepare(template),
        )
        .await
    }

    /// Submit an atomic batch at the default consistency level
    pub async fn batch(
        &self,
        operation: &'static str,
        batch: &Batch,
        policy: RetryPolicy,
    ) -> Result<()> {
        debug!("{}: batch of {} statement(s)", operation, batch.len());
        self.run(
            operation,
            batch.first_table(),
            batch.class(),
            policy,
            || self.session.batch(batch, self.consistency),
        )
        .await
    }

    /// Shut the session down; the connection must not be used afterwards
    pub async fn close(&self) -> Result<()> {
        self.session
            .shutdown()
            .await
            .map_err(|e| self.fail("close", None, e))?;
        info!("Closed cluster session to {:?}", self.hosts);
        Ok(())
    }

    async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        table: Option<&TableName>,
        class: StatementClass,
        policy: RetryPolicy,
        mut attempt_once: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClusterResult<T>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = tokio::time::timeout(self.request_timeout, attempt_once())
                .await
                .unwrap_or(Err(ClusterError::OperationTimedOut(self.request_timeout)));
            let cause = match outcome {
                Ok(value) => return Ok(value),
                Err(cause) => cause,
            };
            match policy.on_failure(class, &cause, attempt) {
                RetryDecision::Retry => {
                    attempt += 1;
                    warn!(
                        "Retrying {} (retry {}/{}): {}",
                        operation,
                        attempt,
                        policy.max_attempts(),
                        cause
                    );
                }
                RetryDecision::Rethrow => return Err(self.fail(operation, table, cause)),
            }
        }
    }

    fn fail(&self, operation: &'static str, table: Option<&TableName>, cause: ClusterError) -> Error {
        let err = Error::from_cluster(operation, table, cause);
        let table_name = table.map_or("-", TableName::as_str);
        if err.is_retryable() {
            error!(operation, table = table_name, "Exception during {}: {}", operation, err);
        } else {
            debug!(operation, table = table_name, "{}", err);
        }
        err
    }
}
