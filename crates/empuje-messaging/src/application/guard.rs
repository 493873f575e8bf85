//! Idempotency guard.
//!
//! Gates effect application so each message is applied at most once despite
//! bus redelivery. The processed mark is committed in the same store
//! transaction as the effect; a store failure fails closed.

use std::sync::Arc;

use chrono::Duration;
use empuje_core::clock::Clock;
use empuje_core::error::SyncError;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::ports::{CommitOutcome, FederationStore, Mutation, ProcessedMark};

/// Which half of a two-sided effect a key guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The donor's stock decrease.
    Debit,
    /// The receiver's stock increase.
    Credit,
}

impl Side {
    /// Discriminator appended to the message id.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }
}

/// Deduplication key of a whole message.
#[must_use]
pub fn message_key(message_id: Uuid) -> String {
    message_id.to_string()
}

/// Deduplication key of one side of a two-sided message.
#[must_use]
pub fn side_key(message_id: Uuid, side: Side) -> String {
    format!("{message_id}:{}", side.as_str())
}

/// Guards effect application with durable processed marks.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn FederationStore>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl IdempotencyGuard {
    /// Creates a guard whose marks are kept for `retention`.
    ///
    /// `retention` must be at least the bus's maximum redelivery window.
    #[must_use]
    pub fn new(store: Arc<dyn FederationStore>, clock: Arc<dyn Clock>, retention: Duration) -> Self {
        Self {
            store,
            clock,
            retention,
        }
    }

    /// Returns `false` if `key` was already processed.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Infrastructure` if the store cannot be read; the
    /// caller must not apply or acknowledge.
    pub async fn should_process(&self, key: &str) -> Result<bool, SyncError> {
        let processed = self.store.is_processed(key).await?;
        if processed {
            debug!(key, "message already processed");
        }
        Ok(!processed)
    }

    /// Applies `mutations` and marks `key` processed, atomically.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Infrastructure` if the transaction fails; neither
    /// the mark nor the mutations are then applied.
    pub async fn commit(
        &self,
        key: String,
        message_id: Uuid,
        topic: &str,
        mutations: &[Mutation],
    ) -> Result<CommitOutcome, SyncError> {
        let mark = ProcessedMark {
            key,
            message_id,
            topic: topic.to_owned(),
            processed_at: self.clock.now(),
        };
        let outcome = self.store.commit(&mark, mutations).await?;
        if outcome == CommitOutcome::AlreadyProcessed {
            debug!(key = %mark.key, "concurrent delivery committed first");
        }
        Ok(outcome)
    }

    /// Drops marks older than the retention window.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Infrastructure` if the store rejects the purge.
    pub async fn purge_expired(&self) -> Result<u64, SyncError> {
        let cutoff = self.clock.now() - self.retention;
        let purged = self.store.purge_processed_before(cutoff).await?;
        if purged > 0 {
            info!(purged, %cutoff, "purged expired processed-message marks");
        }
        Ok(purged)
    }

    /// The configured retention window.
    #[must_use]
    pub fn retention(&self) -> Duration {
        self.retention
    }
}

impl std::fmt::Debug for IdempotencyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyGuard")
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}
