//! Test buses — mock `MessageBus` implementations for tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use empuje_core::bus::{
    BusError, BusSubscription, MessageBus, OutboundRecord, RecordPosition, SubscriptionSpec,
};

/// A bus that records every sent record and accepts it at offset = send
/// order. Does not support subscriptions.
#[derive(Debug, Default)]
pub struct RecordingBus {
    sent: Mutex<Vec<OutboundRecord>>,
}

impl RecordingBus {
    /// An empty recording bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all records sent so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn sent(&self) -> Vec<OutboundRecord> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn send(&self, record: OutboundRecord) -> Result<RecordPosition, BusError> {
        let mut sent = self.sent.lock().unwrap();
        let position = RecordPosition {
            topic: record.topic.clone(),
            partition: 0,
            offset: sent.len() as u64,
        };
        sent.push(record);
        Ok(position)
    }

    async fn subscribe(
        &self,
        _spec: SubscriptionSpec,
    ) -> Result<Box<dyn BusSubscription>, BusError> {
        Err(BusError::InvalidSubscription(
            "recording bus does not deliver".into(),
        ))
    }

    async fn prune(&self, _older_than: Duration) -> Result<u64, BusError> {
        Ok(0)
    }
}

/// A bus that is always unreachable.
#[derive(Debug)]
pub struct FailingBus;

#[async_trait]
impl MessageBus for FailingBus {
    async fn send(&self, _record: OutboundRecord) -> Result<RecordPosition, BusError> {
        Err(BusError::Unavailable("broker unreachable".into()))
    }

    async fn subscribe(
        &self,
        _spec: SubscriptionSpec,
    ) -> Result<Box<dyn BusSubscription>, BusError> {
        Err(BusError::Unavailable("broker unreachable".into()))
    }

    async fn prune(&self, _older_than: Duration) -> Result<u64, BusError> {
        Err(BusError::Unavailable("broker unreachable".into()))
    }
}
