//! Retry policies for statements that time out at the replicas.
//!
//! A policy is plain data: how many retries it allows and which statement
//! classes it may be attached to. Retries are immediate; only connection
//! bootstrap waits between attempts.

use tabula_common::{ClusterError, TimeoutKind};

/// Retries allowed by the idempotent policy
pub const BASIC_RETRY_COUNT: u32 = 5;

/// Shape of a statement, as far as re-execution safety is concerned
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatementClass {
    /// Point or multi-key read
    PointRead,
    /// Token-range read
    RangeRead,
    /// Whole-row delete
    Delete,
    /// Batch of inserts only, all with the same shape
    UniformWrite,
    /// Batch that may mix inserts and deletes across tables
    MixedBatch,
    CreateTable,
    DropTable,
    CreateKeyspace,
}

/// Outcome of consulting a policy after a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-execute the statement at the same consistency level
    Retry,
    /// Surface the failure to the caller
    Rethrow,
}

/// A retry policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    applies_to: &'static [StatementClass],
}

impl RetryPolicy {
    /// Retries statements whose re-execution re-asserts the same state
    ///
    /// Mixed batches are excluded: a partially applied batch of inserts and
    /// deletes is not safe to replay.
    pub const IDEMPOTENT: Self = Self {
        max_attempts: BASIC_RETRY_COUNT,
        applies_to: &[
            StatementClass::PointRead,
            StatementClass::RangeRead,
            StatementClass::Delete,
            StatementClass::UniformWrite,
            StatementClass::DropTable,
        ],
    };

    /// Never retries
    pub const FALLTHROUGH: Self = Self {
        max_attempts: 0,
        applies_to: &[],
    };

    /// Same statement classes with a different retry budget
    #[must_use]
    pub const fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            applies_to: self.applies_to,
        }
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Check if the policy may be attached to statements of this class
    #[must_use]
    pub fn applies_to(&self, class: StatementClass) -> bool {
        self.applies_to.contains(&class)
    }

    /// Decide what to do after the `attempt`-th failed retry (0 = first failure)
    #[must_use]
    pub const fn decide(&self, _kind: TimeoutKind, attempt: u32) -> RetryDecision {
        if attempt < self.max_attempts {
            RetryDecision::Retry
        } else {
            RetryDecision::Rethrow
        }
    }

    /// Decide for a concrete failure of a statement of the given class
    ///
    /// Only replica timeouts are consulted; every other cause is rethrown.
    #[must_use]
    pub fn on_failure(
        &self,
        class: StatementClass,
        cause: &ClusterError,
        attempt: u32,
    ) -> RetryDecision {
        if !self.applies_to(class) {
            return RetryDecision::Rethrow;
        }
        match cause.timeout_kind() {
            Some(kind) => self.decide(kind, attempt),
            None => RetryDecision::Rethrow,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::IDEMPOTENT
    }
}
