//! Routes that publish federation messages on behalf of this organization.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Json, Router, routing::post};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use empuje_core::registry::OrganizationId;
use empuje_messaging::application::publishers::PublishReceipt;
use empuje_messaging::domain::category::DonationCategory;
use empuje_messaging::domain::commands;
use empuje_messaging::domain::messages::{DonationLine, Quantity};

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /donation-offers.
#[derive(Debug, Deserialize)]
pub struct DonationOfferRequest {
    /// Offer id; generated when absent.
    pub offer_id: Option<String>,
    /// Donor; defaults to this organization.
    pub donor_organization_id: Option<OrganizationId>,
    /// Category offered.
    pub category: DonationCategory,
    /// Description of the goods.
    pub description: String,
    /// Units offered.
    pub quantity: Quantity,
}

/// Request body for POST /donation-requests.
#[derive(Debug, Deserialize)]
pub struct DonationRequestRequest {
    /// Request id; generated when absent.
    pub request_id: Option<String>,
    /// Requester; defaults to this organization.
    pub organization_id: Option<OrganizationId>,
    /// Goods requested.
    pub donations: Vec<DonationLine>,
}

/// Request body for POST /donation-transfers/{target_organization_id}.
#[derive(Debug, Deserialize)]
pub struct DonationTransferRequest {
    /// The request being fulfilled.
    pub request_id: String,
    /// Donor; defaults to this organization.
    pub donor_organization_id: Option<OrganizationId>,
    /// Category transferred.
    pub category: DonationCategory,
    /// Description of the goods.
    pub description: String,
    /// Units transferred.
    pub quantity: Quantity,
}

/// Request body for POST /events.
#[derive(Debug, Deserialize)]
pub struct EventAnnouncementRequest {
    /// Event id assigned by the local event service.
    pub event_id: String,
    /// Event name.
    pub event_name: String,
    /// Event description.
    #[serde(default)]
    pub description: String,
    /// When the event takes place.
    pub event_date_time: DateTime<Utc>,
}

/// Request body for POST /event-adhesions/{organizer_organization_id}.
#[derive(Debug, Deserialize)]
pub struct EventAdhesionRequest {
    /// The event to join.
    pub event_id: String,
    /// Volunteer identifier within this organization.
    pub volunteer_id: String,
    /// First name.
    pub volunteer_name: String,
    /// Last name.
    pub volunteer_last_name: String,
    /// Contact phone.
    #[serde(default)]
    pub volunteer_phone: String,
    /// Contact email.
    pub volunteer_email: String,
}

type Accepted = (StatusCode, Json<PublishReceipt>);

fn accepted(receipt: PublishReceipt) -> Accepted {
    (StatusCode::ACCEPTED, Json(receipt))
}

/// POST /donation-offers
#[instrument(skip(state, request))]
async fn publish_donation_offer(
    State(state): State<AppState>,
    Json(request): Json<DonationOfferRequest>,
) -> Result<Accepted, ApiError> {
    let command = commands::PublishDonationOffer {
        correlation_id: Uuid::new_v4(),
        offer_id: request.offer_id,
        donor_organization_id: request.donor_organization_id,
        category: request.category,
        description: request.description,
        quantity: request.quantity,
    };

    info!(correlation_id = %command.correlation_id, "handling publish_donation_offer command");

    Ok(accepted(state.publisher.publish_offer(&command)?))
}

/// POST /donation-requests
#[instrument(skip(state, request))]
async fn publish_donation_request(
    State(state): State<AppState>,
    Json(request): Json<DonationRequestRequest>,
) -> Result<Accepted, ApiError> {
    let command = commands::PublishDonationRequest {
        correlation_id: Uuid::new_v4(),
        request_id: request.request_id,
        organization_id: request.organization_id,
        donations: request.donations,
    };

    info!(correlation_id = %command.correlation_id, "handling publish_donation_request command");

    Ok(accepted(state.publisher.publish_request(&command)?))
}

/// POST /donation-requests/{request_id}/cancellation
#[instrument(skip(state), fields(request_id = %request_id))]
async fn cancel_donation_request(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Accepted, ApiError> {
    let command = commands::CancelDonationRequest {
        correlation_id: Uuid::new_v4(),
        request_id,
        organization_id: None,
    };

    info!(correlation_id = %command.correlation_id, "handling cancel_donation_request command");

    Ok(accepted(
        state.publisher.publish_request_cancellation(&command)?,
    ))
}

/// POST /donation-transfers/{target_organization_id}
#[instrument(skip(state, request), fields(target = %target, request_id = %request.request_id))]
async fn publish_donation_transfer(
    State(state): State<AppState>,
    Path(target): Path<String>,
    Json(request): Json<DonationTransferRequest>,
) -> Result<Accepted, ApiError> {
    let command = commands::PublishDonationTransfer {
        correlation_id: Uuid::new_v4(),
        target_organization_id: OrganizationId::new(target),
        request_id: request.request_id,
        donor_organization_id: request.donor_organization_id,
        category: request.category,
        description: request.description,
        quantity: request.quantity,
    };

    info!(correlation_id = %command.correlation_id, "handling publish_donation_transfer command");

    Ok(accepted(state.publisher.publish_transfer(&command)?))
}

/// POST /events
#[instrument(skip(state, request), fields(event_id = %request.event_id))]
async fn announce_event(
    State(state): State<AppState>,
    Json(request): Json<EventAnnouncementRequest>,
) -> Result<Accepted, ApiError> {
    let command = commands::AnnounceEvent {
        correlation_id: Uuid::new_v4(),
        event_id: request.event_id,
        event_name: request.event_name,
        description: request.description,
        event_date_time: request.event_date_time,
    };

    info!(correlation_id = %command.correlation_id, "handling announce_event command");

    Ok(accepted(state.publisher.publish_event(&command)?))
}

/// POST /events/{event_id}/cancellation
#[instrument(skip(state), fields(event_id = %event_id))]
async fn cancel_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Accepted, ApiError> {
    let command = commands::CancelEvent {
        correlation_id: Uuid::new_v4(),
        event_id,
    };

    info!(correlation_id = %command.correlation_id, "handling cancel_event command");

    Ok(accepted(state.publisher.publish_event_cancellation(&command)?))
}

/// POST /event-adhesions/{organizer_organization_id}
#[instrument(skip(state, request), fields(organizer = %organizer, event_id = %request.event_id))]
async fn join_event(
    State(state): State<AppState>,
    Path(organizer): Path<String>,
    Json(request): Json<EventAdhesionRequest>,
) -> Result<Accepted, ApiError> {
    let command = commands::JoinEvent {
        correlation_id: Uuid::new_v4(),
        organizer_organization_id: OrganizationId::new(organizer),
        event_id: request.event_id,
        volunteer_id: request.volunteer_id,
        volunteer_name: request.volunteer_name,
        volunteer_last_name: request.volunteer_last_name,
        volunteer_phone: request.volunteer_phone,
        volunteer_email: request.volunteer_email,
    };

    info!(correlation_id = %command.correlation_id, "handling join_event command");

    Ok(accepted(state.publisher.publish_adhesion(&command)?))
}

/// Returns the router for the messaging trigger surface.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/donation-offers", post(publish_donation_offer))
        .route("/donation-requests", post(publish_donation_request))
        .route(
            "/donation-requests/{request_id}/cancellation",
            post(cancel_donation_request),
        )
        .route(
            "/donation-transfers/{target_organization_id}",
            post(publish_donation_transfer),
        )
        .route("/events", post(announce_event))
        .route("/events/{event_id}/cancellation", post(cancel_event))
        .route(
            "/event-adhesions/{organizer_organization_id}",
            post(join_event),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use empuje_core::bus::MessageBus;
    use empuje_core::clock::Clock;
    use empuje_core::registry::OrganizationRegistry;
    use empuje_messaging::application::publishers::FederationPublisher;
    use empuje_test_support::{
        FixedClock, InMemoryFederationStore, RecordingBus, StaticEventDirectory, fixed_now,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    fn app_state_with(bus: Arc<dyn MessageBus>) -> AppState {
        let registry = OrganizationRegistry::new(OrganizationId::new("org-A"));
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(fixed_now()));
        let publisher = FederationPublisher::new(bus, registry.clone(), clock);
        AppState::new(
            registry,
            publisher,
            Arc::new(InMemoryFederationStore::new()),
            Arc::new(StaticEventDirectory::new()),
        )
    }

    fn test_app() -> Router {
        router().with_state(app_state_with(Arc::new(RecordingBus::new())))
    }

    async fn post(app: Router, uri: &str, body: &Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_publish_donation_offer_returns_202_with_receipt() {
        // Arrange
        let app = test_app();
        let body = serde_json::json!({
            "category": "ROPA",
            "description": "camperas",
            "quantity": "5"
        });

        // Act
        let (status, json) = post(app, "/donation-offers", &body).await;

        // Assert
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["topic"], "oferta-donaciones");
        assert_eq!(json["partition_key"], "org-A");
        assert!(json["offer_id"].is_string());
        Uuid::parse_str(json["message_id"].as_str().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_publish_donation_request_without_lines_returns_400() {
        // Arrange
        let app = test_app();
        let body = serde_json::json!({ "donations": [] });

        // Act
        let (status, json) = post(app, "/donation-requests", &body).await;

        // Assert
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_publish_donation_request_keys_by_requester() {
        // Arrange
        let app = test_app();
        let body = serde_json::json!({
            "request_id": "req-7",
            "donations": [{ "category": "ALIMENTOS", "description": "arroz", "quantity": "10" }]
        });

        // Act
        let (status, json) = post(app, "/donation-requests", &body).await;

        // Assert
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["topic"], "solicitud-donaciones");
        assert_eq!(json["partition_key"], "org-A");
        assert_eq!(json["request_id"], "req-7");
    }

    #[tokio::test]
    async fn test_cancel_donation_request_uses_path_id() {
        // Arrange
        let app = test_app();

        // Act
        let (status, json) = post(
            app,
            "/donation-requests/req-7/cancellation",
            &serde_json::json!({}),
        )
        .await;

        // Assert
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["topic"], "baja-solicitud-donaciones");
        assert_eq!(json["partition_key"], "org-A");
        assert_eq!(json["request_id"], "req-7");
    }

    #[tokio::test]
    async fn test_publish_donation_transfer_targets_receiver_topic() {
        // Arrange
        let app = test_app();
        let body = serde_json::json!({
            "request_id": "req-7",
            "category": "ALIMENTOS",
            "description": "arroz",
            "quantity": 4
        });

        // Act
        let (status, json) = post(app, "/donation-transfers/org-B", &body).await;

        // Assert
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["topic"], "transferencia-donaciones/org-B");
        assert_eq!(json["partition_key"], "req-7");
    }

    #[tokio::test]
    async fn test_transfer_to_own_organization_returns_400() {
        // Arrange
        let app = test_app();
        let body = serde_json::json!({
            "request_id": "req-7",
            "category": "ALIMENTOS",
            "description": "arroz",
            "quantity": "4"
        });

        // Act
        let (status, json) = post(app, "/donation-transfers/org-A", &body).await;

        // Assert
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_announce_event_returns_422_for_missing_fields() {
        // Arrange
        let app = test_app();

        // Act
        let (status, _) = post(app, "/events", &serde_json::json!({ "event_id": "ev-1" })).await;

        // Assert: Axum returns 422 for deserialization failures.
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_join_event_publishes_on_organizer_topic() {
        // Arrange
        let app = test_app();
        let body = serde_json::json!({
            "event_id": "ev-1",
            "volunteer_id": "vol-1",
            "volunteer_name": "Ana",
            "volunteer_last_name": "Diaz",
            "volunteer_email": "ana@example.org"
        });

        // Act
        let (status, json) = post(app, "/event-adhesions/org-B", &body).await;

        // Assert
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["topic"], "adhesion-evento/org-B");
        assert_eq!(json["partition_key"], "ev-1");
    }

    #[tokio::test]
    async fn test_cancel_event_is_keyed_by_host() {
        // Arrange
        let app = test_app();

        // Act
        let (status, json) =
            post(app, "/events/ev-1/cancellation", &serde_json::json!({})).await;

        // Assert
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["topic"], "baja-evento-solidario");
        assert_eq!(json["partition_key"], "org-A");
    }
}
