//! Test event directory.

use std::collections::HashMap;

use async_trait::async_trait;
use empuje_core::error::SyncError;
use empuje_federation::ports::HostedEventDirectory;
use empuje_federation::records::HostedEvent;

/// A hosted-event directory backed by a fixed table.
#[derive(Debug, Default, Clone)]
pub struct StaticEventDirectory {
    events: HashMap<String, bool>,
}

impl StaticEventDirectory {
    /// An empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hosted event.
    #[must_use]
    pub fn with_event(mut self, event_id: &str, active: bool) -> Self {
        self.events.insert(event_id.to_owned(), active);
        self
    }
}

#[async_trait]
impl HostedEventDirectory for StaticEventDirectory {
    async fn hosted_event(&self, event_id: &str) -> Result<Option<HostedEvent>, SyncError> {
        Ok(self.events.get(event_id).map(|active| HostedEvent {
            event_id: event_id.to_owned(),
            active: *active,
        }))
    }
}
