//! Shared application state.

use std::sync::Arc;

use empuje_core::registry::OrganizationRegistry;
use empuje_messaging::domain::ports::{FederationStore, HostedEventDirectory};
use empuje_messaging::application::publishers::FederationPublisher;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// This node's organization.
    pub registry: OrganizationRegistry,
    /// Publishes federation messages.
    pub publisher: FederationPublisher,
    /// The federation view.
    pub store: Arc<dyn FederationStore>,
    /// The local event service.
    pub directory: Arc<dyn HostedEventDirectory>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("organization_id", self.registry.own_organization_id())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        registry: OrganizationRegistry,
        publisher: FederationPublisher,
        store: Arc<dyn FederationStore>,
        directory: Arc<dyn HostedEventDirectory>,
    ) -> Self {
        Self {
            registry,
            publisher,
            store,
            directory,
        }
    }
}
