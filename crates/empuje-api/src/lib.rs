//! Empuje API — the HTTP trigger surface and consumer workers of one
//! federation node.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod workers;

use axum::Router;

use crate::state::AppState;

/// Builds the full route tree over `state`.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1/messaging", routes::messaging::router())
        .nest("/api/v1/federation", routes::federation::router())
        .with_state(state)
}
