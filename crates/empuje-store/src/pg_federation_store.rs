//! `PostgreSQL` implementation of the `FederationStore` trait.
//!
//! A commit inserts the processed mark first; if another transaction already
//! holds the key the insert affects no row and the whole commit is rolled
//! back. Mutations run in the same transaction, so a message's mark and its
//! effects become visible together.
//!
//! Request and event states follow the transitions of [`RecordState`]; each
//! write takes an advisory lock on the record id before reading the state it
//! transitions from.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use tracing::debug;

use empuje_core::error::SyncError;
use empuje_core::registry::OrganizationId;
use empuje_federation::category::DonationCategory;
use empuje_federation::messages::{
    DonationOffer, DonationRequest, EventAdhesion, ExternalEventAnnouncement,
};
use empuje_federation::ports::{
    CommitOutcome, FederationStore, Mutation, ProcessedMark, StockDelta,
};
use empuje_federation::records::{
    ExternalEvent, FederatedOffer, FederatedRequest, Participant, RecordState, StockChange,
};

fn infrastructure(err: sqlx::Error) -> SyncError {
    SyncError::Infrastructure(err.to_string())
}

fn parse_state(label: &str) -> Result<RecordState, SyncError> {
    RecordState::parse(label)
        .ok_or_else(|| SyncError::Infrastructure(format!("unknown record state `{label}`")))
}

type RequestRow = (
    String,
    String,
    Option<Json<DonationRequest>>,
    Option<DateTime<Utc>>,
);

type EventRow = (
    String,
    String,
    Option<Json<ExternalEventAnnouncement>>,
    Option<DateTime<Utc>>,
);

fn request_from_row(
    (request_id, state, body, cancelled_at): RequestRow,
) -> Result<FederatedRequest, SyncError> {
    Ok(FederatedRequest {
        request_id,
        state: parse_state(&state)?,
        request: body.map(|Json(request)| request),
        cancelled_at,
    })
}

fn event_from_row(
    (event_id, state, body, cancelled_at): EventRow,
) -> Result<ExternalEvent, SyncError> {
    Ok(ExternalEvent {
        event_id,
        state: parse_state(&state)?,
        announcement: body.map(|Json(announcement)| announcement),
        cancelled_at,
    })
}

/// PostgreSQL-backed federation store.
#[derive(Debug, Clone)]
pub struct PgFederationStore {
    pool: PgPool,
}

impl PgFederationStore {
    /// Creates a new `PgFederationStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Serializes writers of one record and returns its current state.
///
/// The lock is transaction-scoped, so the state computed from this read
/// stays valid until the commit.
async fn lock_record_state(
    conn: &mut PgConnection,
    table: &'static str,
    key_column: &'static str,
    id: &str,
) -> Result<Option<RecordState>, SyncError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("{table}:{id}"))
        .execute(&mut *conn)
        .await
        .map_err(infrastructure)?;

    let row: Option<(String,)> =
        sqlx::query_as(&format!("SELECT state FROM {table} WHERE {key_column} = $1"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(infrastructure)?;
    row.map(|(state,)| parse_state(&state)).transpose()
}

async fn apply(
    conn: &mut PgConnection,
    mutation: &Mutation,
    at: DateTime<Utc>,
) -> Result<Option<StockChange>, SyncError> {
    match mutation {
        Mutation::UpsertOffer(offer) => {
            sqlx::query(
                "INSERT INTO federated_offers (offer_id, donor_organization_id, body, received_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (offer_id) DO UPDATE
                    SET donor_organization_id = EXCLUDED.donor_organization_id,
                        body = EXCLUDED.body,
                        received_at = EXCLUDED.received_at",
            )
            .bind(&offer.offer_id)
            .bind(offer.donor_organization_id.as_str())
            .bind(Json(offer))
            .bind(at)
            .execute(&mut *conn)
            .await
            .map_err(infrastructure)?;
        }
        Mutation::UpsertRequest(request) => {
            let current =
                lock_record_state(conn, "federated_requests", "request_id", &request.request_id)
                    .await?;
            sqlx::query(
                "INSERT INTO federated_requests (request_id, state, organization_id, body)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (request_id) DO UPDATE
                    SET state = EXCLUDED.state,
                        organization_id = EXCLUDED.organization_id,
                        body = EXCLUDED.body",
            )
            .bind(&request.request_id)
            .bind(RecordState::on_created(current).as_str())
            .bind(request.organization_id.as_str())
            .bind(Json(request))
            .execute(&mut *conn)
            .await
            .map_err(infrastructure)?;
        }
        Mutation::CancelRequest {
            request_id,
            cancelled_at,
        } => {
            let current =
                lock_record_state(conn, "federated_requests", "request_id", request_id).await?;
            sqlx::query(
                "INSERT INTO federated_requests (request_id, state, cancelled_at)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (request_id) DO UPDATE
                    SET state = EXCLUDED.state,
                        cancelled_at = COALESCE(federated_requests.cancelled_at, EXCLUDED.cancelled_at)",
            )
            .bind(request_id)
            .bind(RecordState::on_cancelled(current).as_str())
            .bind(cancelled_at)
            .execute(&mut *conn)
            .await
            .map_err(infrastructure)?;
        }
        Mutation::MarkRequestMatched { request_id } => {
            let current =
                lock_record_state(conn, "federated_requests", "request_id", request_id).await?;
            if let Some(current) = current {
                let next = current.on_matched();
                if next != current {
                    sqlx::query("UPDATE federated_requests SET state = $2 WHERE request_id = $1")
                        .bind(request_id)
                        .bind(next.as_str())
                        .execute(&mut *conn)
                        .await
                        .map_err(infrastructure)?;
                }
            }
        }
        Mutation::UpsertExternalEvent(announcement) => {
            let current =
                lock_record_state(conn, "external_events", "event_id", &announcement.event_id)
                    .await?;
            sqlx::query(
                "INSERT INTO external_events (event_id, state, organization_id, body)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (event_id) DO UPDATE
                    SET state = EXCLUDED.state,
                        organization_id = EXCLUDED.organization_id,
                        body = EXCLUDED.body",
            )
            .bind(&announcement.event_id)
            .bind(RecordState::on_created(current).as_str())
            .bind(announcement.organization_id.as_str())
            .bind(Json(announcement))
            .execute(&mut *conn)
            .await
            .map_err(infrastructure)?;
        }
        Mutation::CancelEvent {
            event_id,
            cancelled_at,
        } => {
            let current = lock_record_state(conn, "external_events", "event_id", event_id).await?;
            sqlx::query(
                "INSERT INTO external_events (event_id, state, cancelled_at)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (event_id) DO UPDATE
                    SET state = EXCLUDED.state,
                        cancelled_at = COALESCE(external_events.cancelled_at, EXCLUDED.cancelled_at)",
            )
            .bind(event_id)
            .bind(RecordState::on_cancelled(current).as_str())
            .bind(cancelled_at)
            .execute(&mut *conn)
            .await
            .map_err(infrastructure)?;
        }
        Mutation::UpsertParticipant(adhesion) => {
            sqlx::query(
                "INSERT INTO event_participants (event_id, volunteer_id, body, registered_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (event_id, volunteer_id) DO UPDATE
                    SET body = EXCLUDED.body, registered_at = EXCLUDED.registered_at",
            )
            .bind(&adhesion.event_id)
            .bind(&adhesion.volunteer_id)
            .bind(Json(adhesion))
            .bind(at)
            .execute(&mut *conn)
            .await
            .map_err(infrastructure)?;
        }
        Mutation::AdjustStock {
            organization_id,
            category,
            description,
            delta,
        } => {
            return adjust_stock(conn, organization_id, category, description, *delta, at)
                .await
                .map(Some)
                .map_err(infrastructure);
        }
    }
    Ok(None)
}

async fn adjust_stock(
    conn: &mut PgConnection,
    organization_id: &OrganizationId,
    category: &DonationCategory,
    description: &str,
    delta: StockDelta,
    at: DateTime<Utc>,
) -> Result<StockChange, sqlx::Error> {
    sqlx::query(
        "INSERT INTO stock_ledger (organization_id, category, last_description, quantity, updated_at)
         VALUES ($1, $2, $3, 0, $4)
         ON CONFLICT (organization_id, category) DO NOTHING",
    )
    .bind(organization_id.as_str())
    .bind(category.as_str())
    .bind(description)
    .bind(at)
    .execute(&mut *conn)
    .await?;

    let (before,): (i64,) = sqlx::query_as(
        "SELECT quantity FROM stock_ledger
          WHERE organization_id = $1 AND category = $2
            FOR UPDATE",
    )
    .bind(organization_id.as_str())
    .bind(category.as_str())
    .fetch_one(&mut *conn)
    .await?;

    let after = match delta {
        StockDelta::Debit(quantity) => (before - i64::from(quantity.units())).max(0),
        StockDelta::Credit(quantity) => before + i64::from(quantity.units()),
    };

    sqlx::query(
        "UPDATE stock_ledger
            SET quantity = $3, last_description = $4, updated_at = $5
          WHERE organization_id = $1 AND category = $2",
    )
    .bind(organization_id.as_str())
    .bind(category.as_str())
    .bind(after)
    .bind(description)
    .bind(at)
    .execute(&mut *conn)
    .await?;

    Ok(StockChange {
        organization_id: organization_id.clone(),
        category: category.clone(),
        before,
        after,
    })
}

#[async_trait]
impl FederationStore for PgFederationStore {
    async fn is_processed(&self, key: &str) -> Result<bool, SyncError> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM processed_messages WHERE message_key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(infrastructure)?;
        Ok(row.is_some())
    }

    async fn commit(
        &self,
        mark: &ProcessedMark,
        mutations: &[Mutation],
    ) -> Result<CommitOutcome, SyncError> {
        let mut tx = self.pool.begin().await.map_err(infrastructure)?;

        let inserted = sqlx::query(
            "INSERT INTO processed_messages (message_key, message_id, topic, processed_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (message_key) DO NOTHING",
        )
        .bind(&mark.key)
        .bind(mark.message_id)
        .bind(&mark.topic)
        .bind(mark.processed_at)
        .execute(&mut *tx)
        .await
        .map_err(infrastructure)?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await.map_err(infrastructure)?;
            debug!(key = %mark.key, "processed mark already present");
            return Ok(CommitOutcome::AlreadyProcessed);
        }

        let mut changes = Vec::new();
        for mutation in mutations {
            if let Some(change) = apply(&mut tx, mutation, mark.processed_at).await? {
                changes.push(change);
            }
        }

        tx.commit().await.map_err(infrastructure)?;
        debug!(key = %mark.key, mutations = mutations.len(), "message committed");
        Ok(CommitOutcome::Applied(changes))
    }

    async fn purge_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, SyncError> {
        let result = sqlx::query("DELETE FROM processed_messages WHERE processed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(infrastructure)?;
        Ok(result.rows_affected())
    }

    async fn find_request(&self, request_id: &str) -> Result<Option<FederatedRequest>, SyncError> {
        let row: Option<RequestRow> = sqlx::query_as(
            "SELECT request_id, state, body, cancelled_at
               FROM federated_requests
              WHERE request_id = $1",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(infrastructure)?;

        row.map(request_from_row).transpose()
    }

    async fn list_requests(&self) -> Result<Vec<FederatedRequest>, SyncError> {
        let rows: Vec<RequestRow> = sqlx::query_as(
            "SELECT request_id, state, body, cancelled_at
               FROM federated_requests
              ORDER BY request_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;

        rows.into_iter().map(request_from_row).collect()
    }

    async fn find_event(&self, event_id: &str) -> Result<Option<ExternalEvent>, SyncError> {
        let row: Option<EventRow> = sqlx::query_as(
            "SELECT event_id, state, body, cancelled_at
               FROM external_events
              WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(infrastructure)?;

        row.map(event_from_row).transpose()
    }

    async fn list_events(&self) -> Result<Vec<ExternalEvent>, SyncError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT event_id, state, body, cancelled_at
               FROM external_events
              ORDER BY event_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;

        rows.into_iter().map(event_from_row).collect()
    }

    async fn list_offers(&self) -> Result<Vec<FederatedOffer>, SyncError> {
        let rows: Vec<(Json<DonationOffer>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT body, received_at FROM federated_offers ORDER BY offer_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;

        Ok(rows
            .into_iter()
            .map(|(Json(offer), received_at)| FederatedOffer { offer, received_at })
            .collect())
    }

    async fn participants(&self, event_id: &str) -> Result<Vec<Participant>, SyncError> {
        let rows: Vec<(Json<EventAdhesion>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT body, registered_at
               FROM event_participants
              WHERE event_id = $1
              ORDER BY volunteer_id",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;

        Ok(rows
            .into_iter()
            .map(|(Json(adhesion), registered_at)| Participant {
                adhesion,
                registered_at,
            })
            .collect())
    }

    async fn stock_level(
        &self,
        organization_id: &OrganizationId,
        category: &DonationCategory,
    ) -> Result<Option<i64>, SyncError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT quantity FROM stock_ledger WHERE organization_id = $1 AND category = $2",
        )
        .bind(organization_id.as_str())
        .bind(category.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(infrastructure)?;
        Ok(row.map(|(quantity,)| quantity))
    }
}
