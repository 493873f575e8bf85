//! Read-only routes over the federation view.

use axum::extract::{Path, Query, State};
use axum::{Json, Router, routing::get};
use serde::Deserialize;
use tracing::instrument;

use empuje_messaging::application::query_handlers::{
    self, ExternalEventView, OfferView, ParticipantView, RequestView, StockView,
};
use empuje_messaging::domain::category::DonationCategory;

use crate::error::ApiError;
use crate::state::AppState;

/// Query string for GET /events.
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Only list events that are still active.
    #[serde(default)]
    pub active_only: bool,
}

/// GET /offers
#[instrument(skip(state))]
async fn list_offers(State(state): State<AppState>) -> Result<Json<Vec<OfferView>>, ApiError> {
    Ok(Json(query_handlers::list_offers(&*state.store).await?))
}

/// GET /requests
#[instrument(skip(state))]
async fn list_requests(
    State(state): State<AppState>,
) -> Result<Json<Vec<RequestView>>, ApiError> {
    Ok(Json(query_handlers::list_requests(&*state.store).await?))
}

/// GET /requests/{request_id}
#[instrument(skip(state))]
async fn get_request(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<RequestView>, ApiError> {
    let view = query_handlers::get_request_by_id(&request_id, &*state.store).await?;
    Ok(Json(view))
}

/// GET /events
#[instrument(skip(state))]
async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<ExternalEventView>>, ApiError> {
    let views = query_handlers::list_events(query.active_only, &*state.store).await?;
    Ok(Json(views))
}

/// GET /hosted-events/{event_id}/participants
#[instrument(skip(state))]
async fn list_participants(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<Vec<ParticipantView>>, ApiError> {
    let views =
        query_handlers::list_participants(&event_id, &*state.store, &*state.directory).await?;
    Ok(Json(views))
}

/// GET /stock/{category}
#[instrument(skip(state))]
async fn get_stock(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<StockView>, ApiError> {
    let view = query_handlers::get_stock_level(
        DonationCategory::from(category),
        &state.registry,
        &*state.store,
    )
    .await?;
    Ok(Json(view))
}

/// Returns the router for the federation view.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/offers", get(list_offers))
        .route("/requests", get(list_requests))
        .route("/requests/{request_id}", get(get_request))
        .route("/events", get(list_events))
        .route(
            "/hosted-events/{event_id}/participants",
            get(list_participants),
        )
        .route("/stock/{category}", get(get_stock))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use empuje_core::clock::Clock;
    use empuje_core::registry::{OrganizationId, OrganizationRegistry};
    use empuje_messaging::application::publishers::FederationPublisher;
    use empuje_messaging::domain::messages::{
        DonationLine, DonationRequest, ExternalEventAnnouncement, Quantity,
    };
    use empuje_messaging::domain::ports::{
        FederationStore, Mutation, ProcessedMark, StockDelta,
    };
    use empuje_test_support::{
        FailingFederationStore, FixedClock, InMemoryFederationStore, RecordingBus,
        StaticEventDirectory, fixed_now,
    };
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app_state_with(store: Arc<dyn FederationStore>) -> AppState {
        let registry = OrganizationRegistry::new(OrganizationId::new("org-A"));
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(fixed_now()));
        let publisher =
            FederationPublisher::new(Arc::new(RecordingBus::new()), registry.clone(), clock);
        AppState::new(
            registry,
            publisher,
            store,
            Arc::new(StaticEventDirectory::new().with_event("ev-local", true)),
        )
    }

    async fn seeded_store(mutations: &[Mutation]) -> Arc<InMemoryFederationStore> {
        let store = Arc::new(InMemoryFederationStore::new());
        let mark = ProcessedMark {
            key: Uuid::new_v4().to_string(),
            message_id: Uuid::new_v4(),
            topic: "seed".to_string(),
            processed_at: fixed_now(),
        };
        store.commit(&mark, mutations).await.unwrap();
        store
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body_bytes).unwrap())
    }

    fn request(request_id: &str) -> DonationRequest {
        DonationRequest {
            organization_id: OrganizationId::new("org-B"),
            request_id: request_id.to_string(),
            donations: vec![DonationLine {
                category: DonationCategory::Alimentos,
                description: "arroz".to_string(),
                quantity: Quantity::new(10),
            }],
            timestamp: fixed_now(),
        }
    }

    fn announcement(event_id: &str) -> ExternalEventAnnouncement {
        ExternalEventAnnouncement {
            organization_id: OrganizationId::new("org-B"),
            event_id: event_id.to_string(),
            event_name: "Colecta".to_string(),
            description: String::new(),
            event_date_time: fixed_now(),
            timestamp: fixed_now(),
        }
    }

    #[tokio::test]
    async fn test_get_request_returns_200_with_state() {
        // Arrange
        let store = seeded_store(&[Mutation::UpsertRequest(request("req-1"))]).await;
        let app = router().with_state(app_state_with(store));

        // Act
        let (status, json) = get(app, "/requests/req-1").await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["request_id"], "req-1");
        assert_eq!(json["state"], "OPEN");
        assert_eq!(json["organization_id"], "org-B");
    }

    #[tokio::test]
    async fn test_get_unknown_request_returns_404() {
        // Arrange
        let app = router().with_state(app_state_with(Arc::new(InMemoryFederationStore::new())));

        // Act
        let (status, json) = get(app, "/requests/req-404").await;

        // Assert
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "not_found");
    }

    #[tokio::test]
    async fn test_list_events_filters_cancelled_when_active_only() {
        // Arrange
        let store = seeded_store(&[
            Mutation::UpsertExternalEvent(announcement("ev-1")),
            Mutation::UpsertExternalEvent(announcement("ev-2")),
            Mutation::CancelEvent {
                event_id: "ev-2".to_string(),
                cancelled_at: fixed_now(),
            },
        ])
        .await;
        let state = app_state_with(store);

        // Act
        let (_, all) = get(router().with_state(state.clone()), "/events").await;
        let (status, active) = get(router().with_state(state), "/events?active_only=true").await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        assert_eq!(all.as_array().unwrap().len(), 2);
        let active = active.as_array().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0]["event_id"], "ev-1");
        assert_eq!(active[0]["state"], "ACTIVE");
    }

    #[tokio::test]
    async fn test_participants_of_unhosted_event_returns_404() {
        // Arrange
        let app = router().with_state(app_state_with(Arc::new(InMemoryFederationStore::new())));

        // Act
        let (status, _) = get(app, "/hosted-events/ev-foreign/participants").await;

        // Assert
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_participants_of_hosted_event_returns_empty_list() {
        // Arrange
        let app = router().with_state(app_state_with(Arc::new(InMemoryFederationStore::new())));

        // Act
        let (status, json) = get(app, "/hosted-events/ev-local/participants").await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        assert!(json.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stock_reports_own_ledger_entry() {
        // Arrange
        let store = seeded_store(&[Mutation::AdjustStock {
            organization_id: OrganizationId::new("org-A"),
            category: DonationCategory::Ropa,
            description: "camperas".to_string(),
            delta: StockDelta::Credit(Quantity::new(12)),
        }])
        .await;
        let app = router().with_state(app_state_with(store));

        // Act
        let (status, json) = get(app, "/stock/ropa").await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["organization_id"], "org-A");
        assert_eq!(json["category"], "ROPA");
        assert_eq!(json["quantity"], 12);
    }

    #[tokio::test]
    async fn test_list_offers_returns_500_when_store_fails() {
        // Arrange
        let app = router().with_state(app_state_with(Arc::new(FailingFederationStore)));

        // Act
        let (status, json) = get(app, "/offers").await;

        // Assert
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "infrastructure_error");
    }
}
