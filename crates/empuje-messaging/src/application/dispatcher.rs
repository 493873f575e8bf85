//! Delivery dispatcher: the consumer worker loop.
//!
//! Pulls deliveries from one subscription, runs them through the consumers
//! under a processing timeout and settles each one according to the error's
//! disposition:
//!
//! | outcome                         | settlement                          |
//! |---------------------------------|-------------------------------------|
//! | handled / rejected              | ack                                 |
//! | infrastructure error, timeout   | nack with backoff                   |
//! | deferred, below attempt bound   | nack with backoff                   |
//! | deferred at bound, decode error | publish to dead-letter topic, ack   |

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use empuje_core::bus::{BusError, BusSubscription, Delivery, MessageBus, OutboundRecord};
use empuje_core::clock::Clock;
use empuje_core::error::{Disposition, SyncError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::application::consumers::{FederationConsumers, HandleOutcome};
use crate::domain::topics::DEAD_LETTER_TOPIC;

/// Tuning for a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    /// Upper bound on effect application for one delivery.
    pub processing_timeout: Duration,
    /// Deliveries of a deferred message beyond this count are dead-lettered.
    pub max_attempts: u32,
    /// Backoff before the second delivery; doubled on every further attempt.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            processing_timeout: Duration::from_secs(10),
            max_attempts: 5,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(60),
        }
    }
}

/// Record published to the dead-letter topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Topic the message was consumed from.
    pub original_topic: String,
    /// Partition it was consumed from.
    pub partition: u32,
    /// Offset within the partition.
    pub offset: u64,
    /// Partition key of the original record.
    pub partition_key: String,
    /// Original payload, lossily decoded as UTF-8.
    pub payload: String,
    /// Why processing gave up.
    pub reason: String,
    /// Delivery attempts made.
    pub attempts: u32,
    /// When the message was dead-lettered.
    pub failed_at: DateTime<Utc>,
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Acknowledged after being handled or rejected.
    Acknowledged,
    /// Released for redelivery after the delay.
    Redeliver(Duration),
    /// Published to the dead-letter topic, then acknowledged.
    DeadLettered,
}

/// Runs deliveries through the consumers and settles them.
#[derive(Clone)]
pub struct DeliveryDispatcher {
    consumers: Arc<FederationConsumers>,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
    settings: DispatcherSettings,
}

impl std::fmt::Debug for DeliveryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryDispatcher")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DeliveryDispatcher {
    /// Creates a dispatcher publishing dead letters on `bus`.
    #[must_use]
    pub fn new(
        consumers: Arc<FederationConsumers>,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            consumers,
            bus,
            clock,
            settings,
        }
    }

    /// Consumes `subscription` until the bus closes or `shutdown` flips to
    /// `true`. Shutdown is observed between deliveries; a delivery in flight
    /// is always settled first.
    ///
    /// # Errors
    ///
    /// Never returns an error for a single failed delivery; transport errors
    /// are logged and retried. Returns `BusError` only when the subscription
    /// cannot be read at all after shutdown was not requested.
    pub async fn run(
        &self,
        mut subscription: Box<dyn BusSubscription>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BusError> {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = subscription.next_delivery() => next,
            };
            let delivery = match next {
                Ok(Some(delivery)) => delivery,
                Ok(None) | Err(BusError::Closed) => break,
                Err(err) => {
                    warn!(error = %err, "failed to receive delivery");
                    tokio::time::sleep(self.settings.backoff_base).await;
                    continue;
                }
            };

            let settled = match self.dispatch(&delivery).await {
                Settlement::Acknowledged | Settlement::DeadLettered => {
                    subscription.ack(&delivery).await
                }
                Settlement::Redeliver(delay) => subscription.nack(&delivery, delay).await,
            };
            if let Err(err) = settled {
                warn!(
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %err,
                    "failed to settle delivery; it will be redelivered"
                );
            }
        }
        info!("dispatcher stopped");
        Ok(())
    }

    /// Handles one delivery and decides how to settle it.
    pub async fn dispatch(&self, delivery: &Delivery) -> Settlement {
        let handled = tokio::time::timeout(
            self.settings.processing_timeout,
            self.consumers.handle(delivery),
        )
        .await;

        let err = match handled {
            Ok(Ok(outcome)) => {
                if outcome != HandleOutcome::Applied {
                    debug!(
                        topic = %delivery.topic,
                        offset = delivery.offset,
                        ?outcome,
                        "delivery settled without effect"
                    );
                }
                return Settlement::Acknowledged;
            }
            Ok(Err(err)) => err,
            Err(_) => {
                warn!(
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    timeout_ms = self.settings.processing_timeout.as_millis(),
                    "processing timed out"
                );
                return Settlement::Redeliver(self.backoff(delivery.attempt));
            }
        };

        match err.disposition() {
            Disposition::Acknowledge => {
                warn!(
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %err,
                    "message rejected"
                );
                Settlement::Acknowledged
            }
            Disposition::Retry
                if err.is_bounded_retry() && delivery.attempt >= self.settings.max_attempts =>
            {
                self.dead_letter(delivery, &err).await
            }
            Disposition::Retry => {
                warn!(
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    attempt = delivery.attempt,
                    error = %err,
                    "processing failed; scheduling redelivery"
                );
                Settlement::Redeliver(self.backoff(delivery.attempt))
            }
            Disposition::DeadLetter => self.dead_letter(delivery, &err).await,
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, err: &SyncError) -> Settlement {
        let letter = DeadLetter {
            original_topic: delivery.topic.clone(),
            partition: delivery.partition,
            offset: delivery.offset,
            partition_key: delivery.key.clone(),
            payload: String::from_utf8_lossy(&delivery.payload).into_owned(),
            reason: err.to_string(),
            attempts: delivery.attempt,
            failed_at: self.clock.now(),
        };
        let payload = match serde_json::to_vec(&letter) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "failed to serialize dead letter");
                return Settlement::Redeliver(self.backoff(delivery.attempt));
            }
        };
        let record = OutboundRecord {
            topic: DEAD_LETTER_TOPIC.to_owned(),
            key: delivery.key.clone(),
            payload,
        };
        match self.bus.send(record).await {
            Ok(position) => {
                warn!(
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    dead_letter_offset = position.offset,
                    reason = %letter.reason,
                    "message dead-lettered"
                );
                Settlement::DeadLettered
            }
            Err(e) => {
                error!(
                    topic = %delivery.topic,
                    offset = delivery.offset,
                    error = %e,
                    "dead-letter publish failed; scheduling redelivery"
                );
                Settlement::Redeliver(self.backoff(delivery.attempt))
            }
        }
    }

    /// Exponential backoff for the delivery following `attempt`, with up to
    /// 50% random jitter added.
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .settings
            .backoff_base
            .saturating_mul(1 << exponent)
            .min(self.settings.backoff_cap);
        let jitter_ceiling = u64::try_from(delay.as_millis() / 2).unwrap_or(u64::MAX);
        let jitter = rand::rng().random_range(0..=jitter_ceiling);
        delay.saturating_add(Duration::from_millis(jitter))
    }
}
