//! Query handlers for the federation view.
//!
//! Read-only views over what this node has materialized from the bus.

use chrono::{DateTime, Utc};
use empuje_core::error::SyncError;
use empuje_core::registry::{OrganizationId, OrganizationRegistry};
use serde::Serialize;

use crate::domain::category::DonationCategory;
use crate::domain::messages::{DonationLine, Quantity};
use crate::domain::ports::{FederationStore, HostedEventDirectory};
use crate::domain::records::{ExternalEvent, FederatedOffer, FederatedRequest, RecordState};

/// Read-only view of a foreign donation offer.
#[derive(Debug, Serialize)]
pub struct OfferView {
    /// Offer identifier.
    pub offer_id: String,
    /// The donor.
    pub donor_organization_id: OrganizationId,
    /// Category offered.
    pub category: DonationCategory,
    /// Description.
    pub description: String,
    /// Units offered.
    pub quantity: Quantity,
    /// When this node received it.
    pub received_at: DateTime<Utc>,
}

impl From<FederatedOffer> for OfferView {
    fn from(record: FederatedOffer) -> Self {
        Self {
            offer_id: record.offer.offer_id,
            donor_organization_id: record.offer.donor_organization_id,
            category: record.offer.category,
            description: record.offer.description,
            quantity: record.offer.quantity,
            received_at: record.received_at,
        }
    }
}

/// Read-only view of a donation request.
#[derive(Debug, Serialize)]
pub struct RequestView {
    /// Request identifier.
    pub request_id: String,
    /// Lifecycle state.
    pub state: RecordState,
    /// The requester; absent while only a tombstone is known.
    pub organization_id: Option<OrganizationId>,
    /// Requested goods.
    pub donations: Vec<DonationLine>,
    /// When a cancellation was observed.
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl From<FederatedRequest> for RequestView {
    fn from(record: FederatedRequest) -> Self {
        let (organization_id, donations) = match record.request {
            Some(request) => (Some(request.organization_id), request.donations),
            None => (None, Vec::new()),
        };
        Self {
            request_id: record.request_id,
            state: record.state,
            organization_id,
            donations,
            cancelled_at: record.cancelled_at,
        }
    }
}

/// Read-only view of a foreign volunteer event.
#[derive(Debug, Serialize)]
pub struct ExternalEventView {
    /// Event identifier.
    pub event_id: String,
    /// `ACTIVE` or `CANCELLED`.
    pub state: &'static str,
    /// The host.
    pub organization_id: OrganizationId,
    /// Event name.
    pub event_name: String,
    /// Description.
    pub description: String,
    /// When the event takes place.
    pub event_date_time: DateTime<Utc>,
}

impl ExternalEventView {
    /// Tombstones without an announcement have nothing to show.
    fn from_record(record: ExternalEvent) -> Option<Self> {
        let announcement = record.announcement?;
        let state = if record.state.is_tombstoned() {
            "CANCELLED"
        } else {
            "ACTIVE"
        };
        Some(Self {
            event_id: record.event_id,
            state,
            organization_id: announcement.organization_id,
            event_name: announcement.event_name,
            description: announcement.description,
            event_date_time: announcement.event_date_time,
        })
    }
}

/// Read-only view of a volunteer registered on a hosted event.
#[derive(Debug, Serialize)]
pub struct ParticipantView {
    /// Volunteer identifier within their organization.
    pub volunteer_id: String,
    /// The volunteer's organization.
    pub volunteer_organization_id: OrganizationId,
    /// First name.
    pub name: String,
    /// Last name.
    pub last_name: String,
    /// Contact phone.
    pub phone: String,
    /// Contact email.
    pub email: String,
    /// When this node registered the volunteer.
    pub registered_at: DateTime<Utc>,
}

/// This organization's stock of one category.
#[derive(Debug, Serialize)]
pub struct StockView {
    /// This organization.
    pub organization_id: OrganizationId,
    /// The category.
    pub category: DonationCategory,
    /// Units on hand; zero when no ledger entry exists.
    pub quantity: i64,
}

/// Lists foreign donation offers.
///
/// # Errors
///
/// Returns `SyncError::Infrastructure` if the store cannot be read.
pub async fn list_offers(store: &dyn FederationStore) -> Result<Vec<OfferView>, SyncError> {
    let offers = store.list_offers().await?;
    Ok(offers.into_iter().map(OfferView::from).collect())
}

/// Retrieves a donation request, or its tombstone, by id.
///
/// # Errors
///
/// Returns `SyncError::NotFound` if nothing is known about the request.
/// Returns `SyncError::Infrastructure` if the store cannot be read.
pub async fn get_request_by_id(
    request_id: &str,
    store: &dyn FederationStore,
) -> Result<RequestView, SyncError> {
    store
        .find_request(request_id)
        .await?
        .map(RequestView::from)
        .ok_or_else(|| SyncError::NotFound(format!("request {request_id}")))
}

/// Lists every known donation request.
///
/// # Errors
///
/// Returns `SyncError::Infrastructure` if the store cannot be read.
pub async fn list_requests(store: &dyn FederationStore) -> Result<Vec<RequestView>, SyncError> {
    let requests = store.list_requests().await?;
    Ok(requests.into_iter().map(RequestView::from).collect())
}

/// Lists foreign events, optionally only the active ones.
///
/// # Errors
///
/// Returns `SyncError::Infrastructure` if the store cannot be read.
pub async fn list_events(
    active_only: bool,
    store: &dyn FederationStore,
) -> Result<Vec<ExternalEventView>, SyncError> {
    let events = store.list_events().await?;
    Ok(events
        .into_iter()
        .filter_map(ExternalEventView::from_record)
        .filter(|view| !active_only || view.state == "ACTIVE")
        .collect())
}

/// Lists the volunteers registered on one of this organization's events.
///
/// # Errors
///
/// Returns `SyncError::NotFound` if the event is not hosted here.
/// Returns `SyncError::Infrastructure` if a store cannot be read.
pub async fn list_participants(
    event_id: &str,
    store: &dyn FederationStore,
    directory: &dyn HostedEventDirectory,
) -> Result<Vec<ParticipantView>, SyncError> {
    if directory.hosted_event(event_id).await?.is_none() {
        return Err(SyncError::NotFound(format!("hosted event {event_id}")));
    }
    let participants = store.participants(event_id).await?;
    Ok(participants
        .into_iter()
        .map(|p| ParticipantView {
            volunteer_id: p.adhesion.volunteer_id,
            volunteer_organization_id: p.adhesion.volunteer_organization_id,
            name: p.adhesion.volunteer_name,
            last_name: p.adhesion.volunteer_last_name,
            phone: p.adhesion.volunteer_phone,
            email: p.adhesion.volunteer_email,
            registered_at: p.registered_at,
        })
        .collect())
}

/// Reads this organization's stock of `category`.
///
/// # Errors
///
/// Returns `SyncError::Infrastructure` if the store cannot be read.
pub async fn get_stock_level(
    category: DonationCategory,
    registry: &OrganizationRegistry,
    store: &dyn FederationStore,
) -> Result<StockView, SyncError> {
    let organization_id = registry.own_organization_id().clone();
    let quantity = store
        .stock_level(&organization_id, &category)
        .await?
        .unwrap_or(0);
    Ok(StockView {
        organization_id,
        category,
        quantity,
    })
}

#[cfg(test)]
mod tests {
    use empuje_test_support::{
        InMemoryFederationStore, StaticEventDirectory, fixed_now,
    };
    use uuid::Uuid;

    use super::*;
    use crate::domain::messages::{DonationRequest, EventAdhesion, ExternalEventAnnouncement};
    use crate::domain::ports::{Mutation, ProcessedMark};

    fn mark() -> ProcessedMark {
        let message_id = Uuid::new_v4();
        ProcessedMark {
            key: message_id.to_string(),
            message_id,
            topic: "test".into(),
            processed_at: fixed_now(),
        }
    }

    fn announcement(event_id: &str) -> ExternalEventAnnouncement {
        ExternalEventAnnouncement {
            organization_id: OrganizationId::new("org-A"),
            event_id: event_id.into(),
            event_name: "Colecta".into(),
            description: "Abrigos".into(),
            event_date_time: fixed_now(),
            timestamp: fixed_now(),
        }
    }

    #[tokio::test]
    async fn test_get_request_by_id_returns_not_found_for_unknown_id() {
        // Arrange
        let store = InMemoryFederationStore::new();

        // Act
        let result = get_request_by_id("r404", &store).await;

        // Assert
        assert!(matches!(result, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_tombstone_is_visible_as_pending_arrival() {
        // Arrange
        let store = InMemoryFederationStore::new();
        store
            .commit(
                &mark(),
                &[Mutation::CancelRequest {
                    request_id: "r1".into(),
                    cancelled_at: fixed_now(),
                }],
            )
            .await
            .unwrap();

        // Act
        let view = get_request_by_id("r1", &store).await.unwrap();

        // Assert
        assert_eq!(view.state, RecordState::PendingArrival);
        assert_eq!(view.organization_id, None);
        assert_eq!(view.cancelled_at, Some(fixed_now()));
    }

    #[tokio::test]
    async fn test_list_requests_includes_body() {
        // Arrange
        let store = InMemoryFederationStore::new();
        let request = DonationRequest {
            organization_id: OrganizationId::new("org-A"),
            request_id: "r1".into(),
            donations: vec![],
            timestamp: fixed_now(),
        };
        store
            .commit(&mark(), &[Mutation::UpsertRequest(request)])
            .await
            .unwrap();

        // Act
        let views = list_requests(&store).await.unwrap();

        // Assert
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].state, RecordState::Open);
        assert_eq!(views[0].organization_id, Some(OrganizationId::new("org-A")));
    }

    #[tokio::test]
    async fn test_list_events_hides_tombstones_and_filters_cancelled() {
        // Arrange
        let store = InMemoryFederationStore::new();
        store
            .commit(&mark(), &[Mutation::UpsertExternalEvent(announcement("e1"))])
            .await
            .unwrap();
        store
            .commit(&mark(), &[Mutation::UpsertExternalEvent(announcement("e2"))])
            .await
            .unwrap();
        store
            .commit(
                &mark(),
                &[
                    Mutation::CancelEvent {
                        event_id: "e2".into(),
                        cancelled_at: fixed_now(),
                    },
                    Mutation::CancelEvent {
                        event_id: "e3".into(),
                        cancelled_at: fixed_now(),
                    },
                ],
            )
            .await
            .unwrap();

        // Act
        let all = list_events(false, &store).await.unwrap();
        let active = list_events(true, &store).await.unwrap();

        // Assert
        assert_eq!(all.len(), 2);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].event_id, "e1");
    }

    #[tokio::test]
    async fn test_participants_of_unhosted_event_is_not_found() {
        // Arrange
        let store = InMemoryFederationStore::new();
        let directory = StaticEventDirectory::new();

        // Act
        let result = list_participants("e1", &store, &directory).await;

        // Assert
        assert!(matches!(result, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_participants_are_listed_for_hosted_event() {
        // Arrange
        let store = InMemoryFederationStore::new();
        let directory = StaticEventDirectory::new().with_event("e7", true);
        store
            .commit(
                &mark(),
                &[Mutation::UpsertParticipant(EventAdhesion {
                    event_id: "e7".into(),
                    volunteer_organization_id: OrganizationId::new("org-A"),
                    volunteer_id: "v1".into(),
                    volunteer_name: "Ana".into(),
                    volunteer_last_name: "Pérez".into(),
                    volunteer_phone: "555-0101".into(),
                    volunteer_email: "ana@example.org".into(),
                    timestamp: fixed_now(),
                })],
            )
            .await
            .unwrap();

        // Act
        let participants = list_participants("e7", &store, &directory).await.unwrap();

        // Assert
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].email, "ana@example.org");
        assert_eq!(participants[0].registered_at, fixed_now());
    }

    #[tokio::test]
    async fn test_stock_level_defaults_to_zero() {
        // Arrange
        let store = InMemoryFederationStore::new();
        let registry = OrganizationRegistry::new(OrganizationId::new("org-A"));

        // Act
        let view = get_stock_level(DonationCategory::Juguetes, &registry, &store)
            .await
            .unwrap();

        // Assert
        assert_eq!(view.quantity, 0);
        assert_eq!(view.organization_id, OrganizationId::new("org-A"));
    }
}
