//! Publishers for federation messages.
//!
//! Each operation validates a local intent, wraps it in an envelope with a
//! fresh message id, encodes and routes it, then hands the record to the bus
//! on a background task. The caller gets a receipt as soon as the record has
//! been handed off; transport failures are only logged.

use std::sync::Arc;

use empuje_core::bus::{MessageBus, OutboundRecord};
use empuje_core::clock::Clock;
use empuje_core::error::SyncError;
use empuje_core::registry::{OrganizationId, OrganizationRegistry};
use serde::Serialize;
use tracing::{Instrument, Span, info, instrument, warn};
use uuid::Uuid;

use crate::domain::codec;
use crate::domain::commands::{
    AnnounceEvent, CancelDonationRequest, CancelEvent, JoinEvent, PublishDonationOffer,
    PublishDonationRequest, PublishDonationTransfer,
};
use crate::domain::messages::{
    DonationOffer, DonationRequest, DonationTransfer, Envelope, EventAdhesion, EventCancellation,
    ExternalEventAnnouncement, Message, RequestCancellation,
};
use crate::domain::topics;

/// Returned once a message has been handed to the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReceipt {
    /// The id of the published message.
    pub message_id: Uuid,
    /// Topic the message was sent to.
    pub topic: String,
    /// Partition key used.
    pub partition_key: String,
    /// Generated or supplied offer id, for offers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<String>,
    /// Generated or supplied request id, for requests and their cancellations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Publishes every federation message type on behalf of this organization.
#[derive(Clone)]
pub struct FederationPublisher {
    bus: Arc<dyn MessageBus>,
    registry: OrganizationRegistry,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FederationPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationPublisher")
            .field("organization_id", self.registry.own_organization_id())
            .finish_non_exhaustive()
    }
}

fn generated_id() -> String {
    Uuid::now_v7().to_string()
}

impl FederationPublisher {
    /// Creates a publisher sending through `bus` as the organization in
    /// `registry`.
    #[must_use]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        registry: OrganizationRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bus,
            registry,
            clock,
        }
    }

    fn own(&self) -> OrganizationId {
        self.registry.own_organization_id().clone()
    }

    /// Encodes, routes and hands off one message.
    fn publish(
        &self,
        message: Message,
        target: Option<&OrganizationId>,
    ) -> Result<PublishReceipt, SyncError> {
        let envelope = Envelope::new(self.own(), self.clock.now(), message);
        let route = topics::route(&envelope.message, target)
            .map_err(|e| SyncError::Validation(e.to_string()))?;
        let payload = codec::encode(&envelope)?;

        let message_id = envelope.message_id;
        let message_type = envelope.message_type();
        let record = OutboundRecord {
            topic: route.topic.clone(),
            key: route.partition_key.clone(),
            payload,
        };
        let bus = Arc::clone(&self.bus);
        tokio::spawn(
            async move {
                match bus.send(record).await {
                    Ok(position) => info!(
                        %message_id,
                        %message_type,
                        topic = %position.topic,
                        partition = position.partition,
                        offset = position.offset,
                        "message published"
                    ),
                    Err(err) => warn!(
                        %message_id,
                        %message_type,
                        error = %err,
                        "message publish failed"
                    ),
                }
            }
            .instrument(Span::current()),
        );

        Ok(PublishReceipt {
            message_id,
            topic: route.topic,
            partition_key: route.partition_key,
            offer_id: None,
            request_id: None,
        })
    }

    /// Publishes a donation offer.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Validation` if the intent is invalid or cannot be
    /// encoded.
    #[instrument(skip(self, command), fields(correlation_id = %command.correlation_id))]
    pub fn publish_offer(
        &self,
        command: &PublishDonationOffer,
    ) -> Result<PublishReceipt, SyncError> {
        command.validate()?;
        let offer_id = command.offer_id.clone().unwrap_or_else(generated_id);
        let offer = DonationOffer {
            offer_id: offer_id.clone(),
            donor_organization_id: command
                .donor_organization_id
                .clone()
                .unwrap_or_else(|| self.own()),
            category: command.category.clone(),
            description: command.description.clone(),
            quantity: command.quantity,
            timestamp: self.clock.now(),
        };
        let receipt = self.publish(Message::DonationOffer(offer), None)?;
        Ok(PublishReceipt {
            offer_id: Some(offer_id),
            ..receipt
        })
    }

    /// Publishes a donation request.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Validation` if the intent is invalid or cannot be
    /// encoded.
    #[instrument(skip(self, command), fields(correlation_id = %command.correlation_id))]
    pub fn publish_request(
        &self,
        command: &PublishDonationRequest,
    ) -> Result<PublishReceipt, SyncError> {
        command.validate()?;
        let request_id = command.request_id.clone().unwrap_or_else(generated_id);
        let request = DonationRequest {
            organization_id: command
                .organization_id
                .clone()
                .unwrap_or_else(|| self.own()),
            request_id: request_id.clone(),
            donations: command.donations.clone(),
            timestamp: self.clock.now(),
        };
        let receipt = self.publish(Message::DonationRequest(request), None)?;
        Ok(PublishReceipt {
            request_id: Some(request_id),
            ..receipt
        })
    }

    /// Publishes the cancellation of a donation request.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Validation` if the intent is invalid.
    #[instrument(
        skip(self, command),
        fields(correlation_id = %command.correlation_id, request_id = %command.request_id)
    )]
    pub fn publish_request_cancellation(
        &self,
        command: &CancelDonationRequest,
    ) -> Result<PublishReceipt, SyncError> {
        command.validate()?;
        let cancellation = RequestCancellation {
            organization_id: command
                .organization_id
                .clone()
                .unwrap_or_else(|| self.own()),
            request_id: command.request_id.clone(),
            timestamp: self.clock.now(),
        };
        let receipt = self.publish(Message::RequestCancellation(cancellation), None)?;
        Ok(PublishReceipt {
            request_id: Some(command.request_id.clone()),
            ..receipt
        })
    }

    /// Publishes a transfer addressed to the requesting organization.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Validation` if the intent is invalid.
    #[instrument(
        skip(self, command),
        fields(
            correlation_id = %command.correlation_id,
            request_id = %command.request_id,
            target = %command.target_organization_id
        )
    )]
    pub fn publish_transfer(
        &self,
        command: &PublishDonationTransfer,
    ) -> Result<PublishReceipt, SyncError> {
        command.validate()?;
        let transfer = DonationTransfer {
            request_id: command.request_id.clone(),
            donor_organization_id: command
                .donor_organization_id
                .clone()
                .unwrap_or_else(|| self.own()),
            donation_category: command.category.clone(),
            donation_description: command.description.clone(),
            quantity: command.quantity,
            timestamp: self.clock.now(),
        };
        if transfer.donor_organization_id == command.target_organization_id {
            return Err(SyncError::Validation(
                "donor and receiving organization must differ".into(),
            ));
        }
        let receipt = self.publish(
            Message::DonationTransfer(transfer),
            Some(&command.target_organization_id),
        )?;
        Ok(PublishReceipt {
            request_id: Some(command.request_id.clone()),
            ..receipt
        })
    }

    /// Announces one of this organization's events.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Validation` if the intent is invalid.
    #[instrument(
        skip(self, command),
        fields(correlation_id = %command.correlation_id, event_id = %command.event_id)
    )]
    pub fn publish_event(&self, command: &AnnounceEvent) -> Result<PublishReceipt, SyncError> {
        command.validate()?;
        let announcement = ExternalEventAnnouncement {
            organization_id: self.own(),
            event_id: command.event_id.clone(),
            event_name: command.event_name.clone(),
            description: command.description.clone(),
            event_date_time: command.event_date_time,
            timestamp: self.clock.now(),
        };
        self.publish(Message::ExternalEvent(announcement), None)
    }

    /// Withdraws one of this organization's events.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Validation` if the intent is invalid.
    #[instrument(
        skip(self, command),
        fields(correlation_id = %command.correlation_id, event_id = %command.event_id)
    )]
    pub fn publish_event_cancellation(
        &self,
        command: &CancelEvent,
    ) -> Result<PublishReceipt, SyncError> {
        command.validate()?;
        let cancellation = EventCancellation {
            organization_id: self.own(),
            event_id: command.event_id.clone(),
            timestamp: self.clock.now(),
        };
        self.publish(Message::EventCancellation(cancellation), None)
    }

    /// Signs a local volunteer up for another organization's event.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Validation` if the intent is invalid.
    #[instrument(
        skip(self, command),
        fields(
            correlation_id = %command.correlation_id,
            event_id = %command.event_id,
            organizer = %command.organizer_organization_id
        )
    )]
    pub fn publish_adhesion(&self, command: &JoinEvent) -> Result<PublishReceipt, SyncError> {
        command.validate()?;
        let adhesion = EventAdhesion {
            event_id: command.event_id.clone(),
            volunteer_organization_id: self.own(),
            volunteer_id: command.volunteer_id.clone(),
            volunteer_name: command.volunteer_name.clone(),
            volunteer_last_name: command.volunteer_last_name.clone(),
            volunteer_phone: command.volunteer_phone.clone(),
            volunteer_email: command.volunteer_email.clone(),
            timestamp: self.clock.now(),
        };
        self.publish(
            Message::EventAdhesion(adhesion),
            Some(&command.organizer_organization_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use empuje_test_support::{FailingBus, FixedClock, RecordingBus, fixed_now};

    use super::*;
    use crate::domain::category::DonationCategory;
    use crate::domain::messages::{DonationLine, Quantity};

    fn publisher(bus: Arc<dyn MessageBus>) -> FederationPublisher {
        FederationPublisher::new(
            bus,
            OrganizationRegistry::new(OrganizationId::new("org-A")),
            Arc::new(FixedClock(fixed_now())),
        )
    }

    async fn wait_for_sent(bus: &RecordingBus, count: usize) -> Vec<OutboundRecord> {
        for _ in 0..100 {
            let sent = bus.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} records to be sent");
    }

    #[tokio::test]
    async fn test_publish_request_generates_id_and_routes_by_requester() {
        // Arrange
        let bus = Arc::new(RecordingBus::new());
        let publisher = publisher(bus.clone());
        let command = PublishDonationRequest {
            correlation_id: Uuid::new_v4(),
            request_id: None,
            organization_id: None,
            donations: vec![DonationLine {
                category: DonationCategory::Alimentos,
                description: "Arroz".into(),
                quantity: Quantity::new(50),
            }],
        };

        // Act
        let receipt = publisher.publish_request(&command).unwrap();

        // Assert
        assert_eq!(receipt.topic, "solicitud-donaciones");
        assert_eq!(receipt.partition_key, "org-A");
        let request_id = receipt.request_id.clone().unwrap();
        let sent = wait_for_sent(&bus, 1).await;
        let envelope = codec::decode(&sent[0].payload).unwrap();
        assert_eq!(envelope.message_id, receipt.message_id);
        match envelope.message {
            Message::DonationRequest(request) => {
                assert_eq!(request.request_id, request_id);
                assert_eq!(request.organization_id, OrganizationId::new("org-A"));
                assert_eq!(request.timestamp, fixed_now());
            }
            other => panic!("expected DonationRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_transfer_targets_receiver_topic_keyed_by_request() {
        // Arrange
        let bus = Arc::new(RecordingBus::new());
        let publisher = publisher(bus.clone());
        let command = PublishDonationTransfer {
            correlation_id: Uuid::new_v4(),
            target_organization_id: OrganizationId::new("org-B"),
            request_id: "r1".into(),
            donor_organization_id: None,
            category: DonationCategory::Ropa,
            description: "Camperas".into(),
            quantity: Quantity::new(12),
        };

        // Act
        let receipt = publisher.publish_transfer(&command).unwrap();

        // Assert
        assert_eq!(receipt.topic, "transferencia-donaciones/org-B");
        assert_eq!(receipt.partition_key, "r1");
        let sent = wait_for_sent(&bus, 1).await;
        assert_eq!(sent[0].key, "r1");
    }

    #[tokio::test]
    async fn test_publish_transfer_to_self_is_invalid() {
        // Arrange
        let bus = Arc::new(RecordingBus::new());
        let publisher = publisher(bus.clone());
        let command = PublishDonationTransfer {
            correlation_id: Uuid::new_v4(),
            target_organization_id: OrganizationId::new("org-A"),
            request_id: "r1".into(),
            donor_organization_id: None,
            category: DonationCategory::Ropa,
            description: "Camperas".into(),
            quantity: Quantity::new(12),
        };

        // Act
        let result = publisher.publish_transfer(&command);

        // Assert
        assert!(matches!(result, Err(SyncError::Validation(_))));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(bus.sent().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_offer_is_not_published() {
        // Arrange
        let bus = Arc::new(RecordingBus::new());
        let publisher = publisher(bus.clone());
        let command = PublishDonationOffer {
            correlation_id: Uuid::new_v4(),
            offer_id: None,
            donor_organization_id: None,
            category: DonationCategory::Juguetes,
            description: "  ".into(),
            quantity: Quantity::new(3),
        };

        // Act
        let result = publisher.publish_offer(&command);

        // Assert
        assert!(matches!(result, Err(SyncError::Validation(_))));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(bus.sent().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_fail_the_caller() {
        // Arrange
        let publisher = publisher(Arc::new(FailingBus));
        let command = CancelEvent {
            correlation_id: Uuid::new_v4(),
            event_id: "e1".into(),
        };

        // Act
        let result = publisher.publish_event_cancellation(&command);

        // Assert
        let receipt = result.unwrap();
        assert_eq!(receipt.topic, "baja-evento-solidario");
        assert_eq!(receipt.partition_key, "org-A");
    }

    #[tokio::test]
    async fn test_adhesion_is_sent_as_this_organization_to_the_organizer() {
        // Arrange
        let bus = Arc::new(RecordingBus::new());
        let publisher = publisher(bus.clone());
        let command = JoinEvent {
            correlation_id: Uuid::new_v4(),
            organizer_organization_id: OrganizationId::new("org-C"),
            event_id: "e7".into(),
            volunteer_id: "v1".into(),
            volunteer_name: "Ana".into(),
            volunteer_last_name: "Pérez".into(),
            volunteer_phone: "555-0101".into(),
            volunteer_email: "ana@example.org".into(),
        };

        // Act
        let receipt = publisher.publish_adhesion(&command).unwrap();

        // Assert
        assert_eq!(receipt.topic, "adhesion-evento/org-C");
        let sent = wait_for_sent(&bus, 1).await;
        match codec::decode(&sent[0].payload).unwrap().message {
            Message::EventAdhesion(adhesion) => {
                assert_eq!(adhesion.volunteer_organization_id, OrganizationId::new("org-A"));
            }
            other => panic!("expected EventAdhesion, got {other:?}"),
        }
    }
}
