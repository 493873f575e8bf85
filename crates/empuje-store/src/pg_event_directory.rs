//! `PostgreSQL` implementation of the `HostedEventDirectory` port.

use async_trait::async_trait;
use sqlx::PgPool;

use empuje_core::error::SyncError;
use empuje_federation::ports::HostedEventDirectory;
use empuje_federation::records::HostedEvent;

/// Reads the local event service's `events` table.
#[derive(Debug, Clone)]
pub struct PgHostedEventDirectory {
    pool: PgPool,
}

impl PgHostedEventDirectory {
    /// Creates a new `PgHostedEventDirectory`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HostedEventDirectory for PgHostedEventDirectory {
    async fn hosted_event(&self, event_id: &str) -> Result<Option<HostedEvent>, SyncError> {
        let row: Option<(bool,)> = sqlx::query_as("SELECT is_active FROM events WHERE id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SyncError::Infrastructure(e.to_string()))?;

        Ok(row.map(|(active,)| HostedEvent {
            event_id: event_id.to_owned(),
            active,
        }))
    }
}
