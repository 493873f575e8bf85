//! Admission of foreign event announcements.

use empuje_core::registry::OrganizationRegistry;

use crate::messages::ExternalEventAnnouncement;
use crate::records::ExternalEvent;

/// Outcome of running an announcement through the [`FederationFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Foreign and not cancelled: materialize as active.
    Admit,
    /// Announced by this node; it looped back through the shared topic.
    SelfOriginated,
    /// A cancellation for the event was already observed. The record is
    /// materialized directly as cancelled and never shown as active.
    Cancelled,
}

/// Decides whether an incoming announcement enters the external-event
/// catalog.
#[derive(Debug, Clone)]
pub struct FederationFilter {
    registry: OrganizationRegistry,
}

impl FederationFilter {
    /// Creates a filter for this node's organization.
    #[must_use]
    pub fn new(registry: OrganizationRegistry) -> Self {
        Self { registry }
    }

    /// Classifies `announcement` given the currently materialized record for
    /// its event id, if any.
    #[must_use]
    pub fn evaluate(
        &self,
        announcement: &ExternalEventAnnouncement,
        existing: Option<&ExternalEvent>,
    ) -> FilterDecision {
        if self.registry.is_own(&announcement.organization_id) {
            return FilterDecision::SelfOriginated;
        }
        if existing.is_some_and(|event| event.state.is_tombstoned()) {
            return FilterDecision::Cancelled;
        }
        FilterDecision::Admit
    }
}
