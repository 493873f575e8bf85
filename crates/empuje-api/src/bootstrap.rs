//! Wiring of one federation node.

use std::sync::Arc;

use empuje_core::bus::MessageBus;
use empuje_core::clock::Clock;
use empuje_core::registry::OrganizationRegistry;
use empuje_messaging::application::consumers::FederationConsumers;
use empuje_messaging::application::dispatcher::{DeliveryDispatcher, DispatcherSettings};
use empuje_messaging::application::guard::IdempotencyGuard;
use empuje_messaging::application::publishers::FederationPublisher;
use empuje_messaging::domain::ports::{FederationStore, HostedEventDirectory};

use crate::state::AppState;

/// External dependencies of a node.
#[derive(Clone)]
pub struct NodeParts {
    /// This node's organization.
    pub registry: OrganizationRegistry,
    /// Transport shared with the rest of the federation.
    pub bus: Arc<dyn MessageBus>,
    /// The federation view.
    pub store: Arc<dyn FederationStore>,
    /// The local event service.
    pub directory: Arc<dyn HostedEventDirectory>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// How long processed marks are kept.
    pub retention: chrono::Duration,
    /// Consumer timing and retry bounds.
    pub dispatcher: DispatcherSettings,
}

/// A wired node: HTTP state, the consumer dispatcher and the guard the
/// retention sweeper purges.
#[derive(Clone)]
pub struct Node {
    /// State for the HTTP routes.
    pub state: AppState,
    /// Dispatcher shared by every consumer worker.
    pub dispatcher: DeliveryDispatcher,
    /// Idempotency guard over the node's store.
    pub guard: IdempotencyGuard,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("state", &self.state)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Connects publishers, consumers and queries to the given parts.
    #[must_use]
    pub fn assemble(parts: NodeParts) -> Self {
        let guard = IdempotencyGuard::new(
            Arc::clone(&parts.store),
            Arc::clone(&parts.clock),
            parts.retention,
        );
        let consumers = FederationConsumers::new(
            parts.registry.clone(),
            guard.clone(),
            Arc::clone(&parts.store),
            Arc::clone(&parts.directory),
        );
        let dispatcher = DeliveryDispatcher::new(
            Arc::new(consumers),
            Arc::clone(&parts.bus),
            Arc::clone(&parts.clock),
            parts.dispatcher,
        );
        let publisher = FederationPublisher::new(
            Arc::clone(&parts.bus),
            parts.registry.clone(),
            Arc::clone(&parts.clock),
        );
        let state = AppState::new(parts.registry, publisher, parts.store, parts.directory);
        Self {
            state,
            dispatcher,
            guard,
        }
    }
}
