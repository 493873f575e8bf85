//! Store ports for the federation view.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use empuje_core::error::SyncError;
use empuje_core::registry::OrganizationId;
use uuid::Uuid;

use crate::category::DonationCategory;
use crate::messages::{
    DonationOffer, DonationRequest, EventAdhesion, ExternalEventAnnouncement, Quantity,
};
use crate::records::{
    ExternalEvent, FederatedOffer, FederatedRequest, HostedEvent, Participant, StockChange,
};

/// Direction of a ledger adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDelta {
    /// Remove units; the resulting level is clamped at zero.
    Debit(Quantity),
    /// Add units, creating the ledger entry if absent.
    Credit(Quantity),
}

/// A single state change applied while processing one message.
///
/// Every variant is keyed by the natural id of the record it touches and is
/// applied as an upsert, so concurrent redeliveries converge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Insert or replace an offer, keyed by `offer_id`.
    UpsertOffer(DonationOffer),
    /// Materialize a request. Never reopens a cancelled request; a request
    /// with a tombstone is materialized as cancelled.
    UpsertRequest(DonationRequest),
    /// Record a tombstone for `request_id` and cancel the request if present.
    CancelRequest {
        /// The cancelled request.
        request_id: String,
        /// When the cancellation was issued.
        cancelled_at: DateTime<Utc>,
    },
    /// Move an open request to matched.
    MarkRequestMatched {
        /// The matched request.
        request_id: String,
    },
    /// Materialize an external event, with the same tombstone rule as
    /// requests.
    UpsertExternalEvent(ExternalEventAnnouncement),
    /// Record a tombstone for `event_id` and cancel the event if present.
    CancelEvent {
        /// The cancelled event.
        event_id: String,
        /// When the cancellation was issued.
        cancelled_at: DateTime<Utc>,
    },
    /// Register a volunteer, keyed by `(event_id, volunteer_id)`.
    UpsertParticipant(EventAdhesion),
    /// Adjust an organization's stock of a category.
    AdjustStock {
        /// Owner of the ledger entry.
        organization_id: OrganizationId,
        /// Category of the ledger entry.
        category: DonationCategory,
        /// Description of the goods moved.
        description: String,
        /// Direction and amount.
        delta: StockDelta,
    },
}

/// Marks a message (or one side of it) as processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedMark {
    /// Deduplication key: the message id, optionally suffixed by a side.
    pub key: String,
    /// The message being marked.
    pub message_id: Uuid,
    /// Topic the message was consumed from.
    pub topic: String,
    /// When processing completed.
    pub processed_at: DateTime<Utc>,
}

/// Result of an atomic commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The mark and every mutation were applied.
    Applied(Vec<StockChange>),
    /// A concurrent delivery committed the same key first; nothing applied.
    AlreadyProcessed,
}

/// Durable store behind the idempotency guard and the federation view.
#[async_trait]
pub trait FederationStore: Send + Sync {
    /// Returns `true` if `key` has been marked processed.
    async fn is_processed(&self, key: &str) -> Result<bool, SyncError>;

    /// Applies the mark and all mutations in one transaction.
    ///
    /// If the key is already marked, nothing is applied and
    /// `CommitOutcome::AlreadyProcessed` is returned.
    async fn commit(
        &self,
        mark: &ProcessedMark,
        mutations: &[Mutation],
    ) -> Result<CommitOutcome, SyncError>;

    /// Removes marks recorded before `cutoff`; returns how many were removed.
    async fn purge_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, SyncError>;

    /// Loads a request (or its tombstone).
    async fn find_request(&self, request_id: &str) -> Result<Option<FederatedRequest>, SyncError>;

    /// Lists all materialized requests, tombstones included.
    async fn list_requests(&self) -> Result<Vec<FederatedRequest>, SyncError>;

    /// Loads an external event (or its tombstone).
    async fn find_event(&self, event_id: &str) -> Result<Option<ExternalEvent>, SyncError>;

    /// Lists all external events, tombstones included.
    async fn list_events(&self) -> Result<Vec<ExternalEvent>, SyncError>;

    /// Lists all foreign offers.
    async fn list_offers(&self) -> Result<Vec<FederatedOffer>, SyncError>;

    /// Lists the volunteers registered on a hosted event.
    async fn participants(&self, event_id: &str) -> Result<Vec<Participant>, SyncError>;

    /// Current stock of `category` held by `organization_id`, if any entry
    /// exists.
    async fn stock_level(
        &self,
        organization_id: &OrganizationId,
        category: &DonationCategory,
    ) -> Result<Option<i64>, SyncError>;
}

/// Narrow view onto the local event service.
#[async_trait]
pub trait HostedEventDirectory: Send + Sync {
    /// Looks up an event this organization hosts.
    async fn hosted_event(&self, event_id: &str) -> Result<Option<HostedEvent>, SyncError>;
}
