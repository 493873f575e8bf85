//! Federation consumers.
//!
//! One entry point handles every delivery: decode, check the type against
//! the topic, skip duplicates, validate, then commit the effect together with
//! the processed mark. Errors are returned as `SyncError` and mapped to an
//! acknowledgment policy by the dispatcher.

use std::sync::Arc;

use empuje_core::bus::Delivery;
use empuje_core::error::SyncError;
use empuje_core::registry::{OrganizationId, OrganizationRegistry};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::application::guard::{IdempotencyGuard, message_key};
use crate::application::reconciler::{InventoryReconciler, LegOutcome};
use crate::domain::codec;
use crate::domain::federation::{FederationFilter, FilterDecision};
use crate::domain::messages::{
    DonationOffer, DonationRequest, DonationTransfer, Envelope, EventAdhesion, EventCancellation,
    ExternalEventAnnouncement, Message, RequestCancellation,
};
use crate::domain::ports::{CommitOutcome, FederationStore, HostedEventDirectory, Mutation};
use crate::domain::topics;

/// How a delivery was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The effect was committed.
    Applied,
    /// The message had already been processed.
    Duplicate,
    /// The federation filter kept the message out of the catalog.
    Filtered,
    /// The message does not concern this node.
    Ignored,
}

/// Applies federation messages to the local view.
#[derive(Clone)]
pub struct FederationConsumers {
    registry: OrganizationRegistry,
    guard: IdempotencyGuard,
    filter: FederationFilter,
    reconciler: InventoryReconciler,
    store: Arc<dyn FederationStore>,
    directory: Arc<dyn HostedEventDirectory>,
}

impl std::fmt::Debug for FederationConsumers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationConsumers")
            .field("organization_id", self.registry.own_organization_id())
            .finish_non_exhaustive()
    }
}

impl FederationConsumers {
    /// Wires the consumers for the organization in `registry`.
    #[must_use]
    pub fn new(
        registry: OrganizationRegistry,
        guard: IdempotencyGuard,
        store: Arc<dyn FederationStore>,
        directory: Arc<dyn HostedEventDirectory>,
    ) -> Self {
        Self {
            filter: FederationFilter::new(registry.clone()),
            reconciler: InventoryReconciler::new(guard.clone(), registry.clone()),
            registry,
            guard,
            store,
            directory,
        }
    }

    /// Handles one delivery.
    ///
    /// # Errors
    ///
    /// - `SyncError::Decode` if the payload is malformed or its type does not
    ///   belong on the topic.
    /// - `SyncError::Rejected` if a business rule refuses the message.
    /// - `SyncError::Deferred` if a referenced record has not arrived yet.
    /// - `SyncError::Infrastructure` if the store is unavailable.
    #[instrument(
        skip(self, delivery),
        fields(topic = %delivery.topic, partition = delivery.partition, offset = delivery.offset)
    )]
    pub async fn handle(&self, delivery: &Delivery) -> Result<HandleOutcome, SyncError> {
        let envelope = codec::decode(&delivery.payload)?;
        let carried = topics::message_type_of(&delivery.topic);
        if carried != Some(envelope.message_type()) {
            return Err(SyncError::Decode(format!(
                "{} is not carried by topic {}",
                envelope.message_type(),
                delivery.topic
            )));
        }
        debug!(message_id = %envelope.message_id, message_type = %envelope.message_type(), "message received");

        let Envelope {
            message_id,
            message,
            ..
        } = envelope;
        let topic = delivery.topic.as_str();
        match message {
            Message::DonationOffer(offer) => self.on_offer(message_id, topic, offer).await,
            Message::DonationRequest(request) => self.on_request(message_id, topic, request).await,
            Message::RequestCancellation(cancellation) => {
                self.on_request_cancellation(message_id, topic, cancellation)
                    .await
            }
            Message::DonationTransfer(transfer) => {
                self.on_transfer(message_id, topic, &transfer).await
            }
            Message::ExternalEvent(announcement) => {
                self.on_event(message_id, topic, announcement).await
            }
            Message::EventCancellation(cancellation) => {
                self.on_event_cancellation(message_id, topic, cancellation)
                    .await
            }
            Message::EventAdhesion(adhesion) => self.on_adhesion(message_id, topic, adhesion).await,
        }
    }

    /// Commits single-sided mutations under the message key.
    async fn commit(
        &self,
        message_id: Uuid,
        topic: &str,
        mutations: &[Mutation],
    ) -> Result<HandleOutcome, SyncError> {
        let outcome = self
            .guard
            .commit(message_key(message_id), message_id, topic, mutations)
            .await?;
        Ok(match outcome {
            CommitOutcome::Applied(_) => HandleOutcome::Applied,
            CommitOutcome::AlreadyProcessed => HandleOutcome::Duplicate,
        })
    }

    async fn is_duplicate(&self, message_id: Uuid) -> Result<bool, SyncError> {
        Ok(!self.guard.should_process(&message_key(message_id)).await?)
    }

    async fn on_offer(
        &self,
        message_id: Uuid,
        topic: &str,
        offer: DonationOffer,
    ) -> Result<HandleOutcome, SyncError> {
        if self.is_duplicate(message_id).await? {
            return Ok(HandleOutcome::Duplicate);
        }
        let offer_id = offer.offer_id.clone();
        let outcome = self
            .commit(message_id, topic, &[Mutation::UpsertOffer(offer)])
            .await?;
        info!(%message_id, %offer_id, "donation offer materialized");
        Ok(outcome)
    }

    async fn on_request(
        &self,
        message_id: Uuid,
        topic: &str,
        request: DonationRequest,
    ) -> Result<HandleOutcome, SyncError> {
        if self.is_duplicate(message_id).await? {
            return Ok(HandleOutcome::Duplicate);
        }
        let request_id = request.request_id.clone();
        let outcome = self
            .commit(message_id, topic, &[Mutation::UpsertRequest(request)])
            .await?;
        info!(%message_id, %request_id, "donation request materialized");
        Ok(outcome)
    }

    async fn on_request_cancellation(
        &self,
        message_id: Uuid,
        topic: &str,
        cancellation: RequestCancellation,
    ) -> Result<HandleOutcome, SyncError> {
        if self.is_duplicate(message_id).await? {
            return Ok(HandleOutcome::Duplicate);
        }
        let existing = self.store.find_request(&cancellation.request_id).await?;
        let owner = existing
            .as_ref()
            .and_then(|record| record.request.as_ref())
            .map(|request| &request.organization_id);
        if owner.is_some_and(|owner| *owner != cancellation.organization_id) {
            return Err(SyncError::Rejected(format!(
                "request {} cannot be cancelled by {}",
                cancellation.request_id, cancellation.organization_id
            )));
        }
        let outcome = self
            .commit(
                message_id,
                topic,
                &[Mutation::CancelRequest {
                    request_id: cancellation.request_id.clone(),
                    cancelled_at: cancellation.timestamp,
                }],
            )
            .await?;
        info!(
            %message_id,
            request_id = %cancellation.request_id,
            materialized = existing.is_some(),
            "donation request cancelled"
        );
        Ok(outcome)
    }

    async fn on_transfer(
        &self,
        message_id: Uuid,
        topic: &str,
        transfer: &DonationTransfer,
    ) -> Result<HandleOutcome, SyncError> {
        let Some((_, receiver)) = topics::parse_target(topic) else {
            return Err(SyncError::Decode(format!(
                "transfer topic {topic} names no receiver"
            )));
        };
        if transfer.donor_organization_id == receiver {
            return Err(SyncError::Rejected(format!(
                "transfer {message_id} has the same donor and receiver"
            )));
        }
        let legs = self
            .reconciler
            .owned_legs(&transfer.donor_organization_id, &receiver);
        if legs.is_empty() {
            debug!(%message_id, %receiver, "transfer between other organizations");
            return Ok(HandleOutcome::Ignored);
        }
        let legs = self.reconciler.pending_legs(message_id, legs).await?;
        if legs.is_empty() {
            return Ok(HandleOutcome::Duplicate);
        }

        match self.store.find_request(&transfer.request_id).await? {
            None => {
                return Err(SyncError::Deferred(format!(
                    "request {} has not been observed yet",
                    transfer.request_id
                )));
            }
            Some(record) if record.state.is_tombstoned() => {
                return Err(SyncError::Rejected(format!(
                    "request {} is cancelled",
                    transfer.request_id
                )));
            }
            Some(record) => {
                check_requester(record.request.as_ref(), &receiver, &transfer.request_id)?;
            }
        }

        let mut outcome = HandleOutcome::Duplicate;
        for leg in &legs {
            if let LegOutcome::Applied(_) = self
                .reconciler
                .apply_leg(message_id, topic, leg, transfer)
                .await?
            {
                outcome = HandleOutcome::Applied;
            }
        }
        Ok(outcome)
    }

    async fn on_event(
        &self,
        message_id: Uuid,
        topic: &str,
        announcement: ExternalEventAnnouncement,
    ) -> Result<HandleOutcome, SyncError> {
        if self.is_duplicate(message_id).await? {
            return Ok(HandleOutcome::Duplicate);
        }
        let existing = self.store.find_event(&announcement.event_id).await?;
        match self.filter.evaluate(&announcement, existing.as_ref()) {
            FilterDecision::SelfOriginated => {
                debug!(%message_id, event_id = %announcement.event_id, "own event announcement filtered");
                let outcome = self.commit(message_id, topic, &[]).await?;
                Ok(match outcome {
                    HandleOutcome::Applied => HandleOutcome::Filtered,
                    other => other,
                })
            }
            decision => {
                let event_id = announcement.event_id.clone();
                let outcome = self
                    .commit(
                        message_id,
                        topic,
                        &[Mutation::UpsertExternalEvent(announcement)],
                    )
                    .await?;
                info!(
                    %message_id,
                    %event_id,
                    cancelled = decision == FilterDecision::Cancelled,
                    "external event materialized"
                );
                Ok(outcome)
            }
        }
    }

    async fn on_event_cancellation(
        &self,
        message_id: Uuid,
        topic: &str,
        cancellation: EventCancellation,
    ) -> Result<HandleOutcome, SyncError> {
        if self.is_duplicate(message_id).await? {
            return Ok(HandleOutcome::Duplicate);
        }
        let existing = self.store.find_event(&cancellation.event_id).await?;
        let host = existing
            .as_ref()
            .and_then(|record| record.announcement.as_ref())
            .map(|announcement| &announcement.organization_id);
        if host.is_some_and(|host| *host != cancellation.organization_id) {
            return Err(SyncError::Rejected(format!(
                "event {} cannot be cancelled by {}",
                cancellation.event_id, cancellation.organization_id
            )));
        }
        let outcome = self
            .commit(
                message_id,
                topic,
                &[Mutation::CancelEvent {
                    event_id: cancellation.event_id.clone(),
                    cancelled_at: cancellation.timestamp,
                }],
            )
            .await?;
        info!(%message_id, event_id = %cancellation.event_id, "event cancelled");
        Ok(outcome)
    }

    async fn on_adhesion(
        &self,
        message_id: Uuid,
        topic: &str,
        adhesion: EventAdhesion,
    ) -> Result<HandleOutcome, SyncError> {
        let organizer = topics::parse_target(topic).map(|(_, organizer)| organizer);
        if !organizer.is_some_and(|organizer| self.registry.is_own(&organizer)) {
            debug!(%message_id, %topic, "adhesion addressed to another organization");
            return Ok(HandleOutcome::Ignored);
        }
        if self.is_duplicate(message_id).await? {
            return Ok(HandleOutcome::Duplicate);
        }

        let hosted = self.directory.hosted_event(&adhesion.event_id).await?;
        match hosted {
            None => {
                return Err(SyncError::Rejected(format!(
                    "event {} is not hosted here",
                    adhesion.event_id
                )));
            }
            Some(event) if !event.active => {
                return Err(SyncError::Rejected(format!(
                    "event {} is no longer active",
                    adhesion.event_id
                )));
            }
            Some(_) => {}
        }
        let tombstoned = self
            .store
            .find_event(&adhesion.event_id)
            .await?
            .is_some_and(|record| record.state.is_tombstoned());
        if tombstoned {
            return Err(SyncError::Rejected(format!(
                "event {} is cancelled",
                adhesion.event_id
            )));
        }

        let event_id = adhesion.event_id.clone();
        let volunteer_id = adhesion.volunteer_id.clone();
        let outcome = self
            .commit(message_id, topic, &[Mutation::UpsertParticipant(adhesion)])
            .await?;
        info!(%message_id, %event_id, %volunteer_id, "volunteer registered");
        Ok(outcome)
    }
}

/// A transfer must be addressed to the organization that made the request.
fn check_requester(
    request: Option<&DonationRequest>,
    receiver: &OrganizationId,
    request_id: &str,
) -> Result<(), SyncError> {
    match request {
        Some(request) if request.organization_id != *receiver => {
            warn!(
                %request_id,
                requester = %request.organization_id,
                %receiver,
                "transfer addressed to a non-requesting organization"
            );
            Err(SyncError::Rejected(format!(
                "request {request_id} belongs to {}, not {receiver}",
                request.organization_id
            )))
        }
        _ => Ok(()),
    }
}
