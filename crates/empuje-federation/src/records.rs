//! Materialized records of the federation view.
//!
//! Requests and external events share one lifecycle. A cancellation is
//! remembered as a tombstone even when the record it cancels has not arrived
//! yet, and a tombstone always wins over a later-arriving creation.
//!
//! ```text
//!   (absent) --create--> OPEN --match--> MATCHED
//!      |                   |                |
//!   cancel              cancel           cancel
//!      v                   v                v
//!  PENDING_ARRIVAL --create--> CANCELLED <---
//! ```

use chrono::{DateTime, Utc};
use empuje_core::registry::OrganizationId;
use serde::{Deserialize, Serialize};

use crate::category::DonationCategory;
use crate::messages::{DonationOffer, DonationRequest, EventAdhesion, ExternalEventAnnouncement};

/// Lifecycle state of a materialized request or external event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordState {
    /// Only a tombstone has been observed.
    PendingArrival,
    /// Created and live. Rendered as ACTIVE for events.
    Open,
    /// A transfer has been applied against the request. Requests only.
    Matched,
    /// Terminal.
    Cancelled,
}

impl RecordState {
    /// State after a creation message is applied to `current`.
    #[must_use]
    pub fn on_created(current: Option<Self>) -> Self {
        match current {
            None => Self::Open,
            Some(Self::PendingArrival) => Self::Cancelled,
            Some(state) => state,
        }
    }

    /// State after a cancellation message is applied to `current`.
    #[must_use]
    pub fn on_cancelled(current: Option<Self>) -> Self {
        match current {
            None | Some(Self::PendingArrival) => Self::PendingArrival,
            Some(Self::Open | Self::Matched | Self::Cancelled) => Self::Cancelled,
        }
    }

    /// State after a transfer has been applied against the request.
    #[must_use]
    pub fn on_matched(self) -> Self {
        match self {
            Self::Open => Self::Matched,
            other => other,
        }
    }

    /// Returns `true` when the record was cancelled, or a cancellation for it
    /// has been observed.
    #[must_use]
    pub fn is_tombstoned(self) -> bool {
        matches!(self, Self::Cancelled | Self::PendingArrival)
    }

    /// Database / API label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingArrival => "PENDING_ARRIVAL",
            Self::Open => "OPEN",
            Self::Matched => "MATCHED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parses a label produced by [`RecordState::as_str`].
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "PENDING_ARRIVAL" => Some(Self::PendingArrival),
            "OPEN" => Some(Self::Open),
            "MATCHED" => Some(Self::Matched),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A foreign donation offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedOffer {
    /// The offer as last received.
    pub offer: DonationOffer,
    /// When this node materialized it.
    pub received_at: DateTime<Utc>,
}

/// A donation request in the federation view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedRequest {
    /// Request identifier.
    pub request_id: String,
    /// Lifecycle state.
    pub state: RecordState,
    /// The request body; `None` while only a tombstone exists.
    pub request: Option<DonationRequest>,
    /// When a cancellation was observed.
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// A foreign volunteer event in the federation view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalEvent {
    /// Event identifier.
    pub event_id: String,
    /// Lifecycle state.
    pub state: RecordState,
    /// The announcement; `None` while only a tombstone exists.
    pub announcement: Option<ExternalEventAnnouncement>,
    /// When a cancellation was observed.
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// A volunteer registered on one of this organization's events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// The adhesion as last received.
    pub adhesion: EventAdhesion,
    /// When this node registered it.
    pub registered_at: DateTime<Utc>,
}

/// A stock movement reported by the store after applying a ledger mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    /// Owner of the ledger entry.
    pub organization_id: OrganizationId,
    /// Category of the ledger entry.
    pub category: DonationCategory,
    /// Units before the change.
    pub before: i64,
    /// Units after the change.
    pub after: i64,
}

impl StockChange {
    /// Returns `true` if a debit of `requested` units was cut short at zero.
    #[must_use]
    pub fn was_clamped(&self, requested: u32) -> bool {
        self.before - self.after < i64::from(requested)
    }
}

/// An event hosted by this organization, as reported by the local event
/// service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedEvent {
    /// Event identifier.
    pub event_id: String,
    /// Whether the event is still accepting volunteers.
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_of_unseen_record_opens_it() {
        assert_eq!(RecordState::on_created(None), RecordState::Open);
    }

    #[test]
    fn test_cancellation_before_creation_leaves_tombstone() {
        assert_eq!(RecordState::on_cancelled(None), RecordState::PendingArrival);
    }

    #[test]
    fn test_creation_after_tombstone_is_cancelled() {
        let state = RecordState::on_created(Some(RecordState::on_cancelled(None)));

        assert_eq!(state, RecordState::Cancelled);
    }

    #[test]
    fn test_cancel_dominates_create_in_either_order() {
        let create_first = RecordState::on_cancelled(Some(RecordState::on_created(None)));
        let cancel_first = RecordState::on_created(Some(RecordState::on_cancelled(None)));

        assert_eq!(create_first, RecordState::Cancelled);
        assert_eq!(cancel_first, RecordState::Cancelled);
    }

    #[test]
    fn test_cancelled_is_terminal() {
        let cancelled = RecordState::Cancelled;

        assert_eq!(RecordState::on_created(Some(cancelled)), cancelled);
        assert_eq!(RecordState::on_cancelled(Some(cancelled)), cancelled);
        assert_eq!(cancelled.on_matched(), cancelled);
    }

    #[test]
    fn test_matched_request_can_still_be_cancelled() {
        let matched = RecordState::Open.on_matched();

        assert_eq!(matched, RecordState::Matched);
        assert_eq!(RecordState::on_cancelled(Some(matched)), RecordState::Cancelled);
    }

    #[test]
    fn test_labels_round_trip() {
        for state in [
            RecordState::PendingArrival,
            RecordState::Open,
            RecordState::Matched,
            RecordState::Cancelled,
        ] {
            assert_eq!(RecordState::parse(state.as_str()), Some(state));
        }
    }

    #[test]
    fn test_stock_change_detects_clamped_debit() {
        let change = StockChange {
            organization_id: OrganizationId::new("org-A"),
            category: DonationCategory::Alimentos,
            before: 5,
            after: 0,
        };

        assert!(change.was_clamped(8));
        assert!(!change.was_clamped(5));
    }
}
