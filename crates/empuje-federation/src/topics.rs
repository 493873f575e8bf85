//! Topic routing.
//!
//! Maps a message to the topic it is published on and the partition key that
//! orders it. Keys are the natural owning id of a conversation, so every
//! message about the same request or event lands on one partition.

use empuje_core::bus::TopicPattern;
use empuje_core::registry::OrganizationId;
use thiserror::Error;

use crate::messages::{Message, MessageType};

/// Topic for donation offers.
pub const DONATION_OFFERS_TOPIC: &str = "oferta-donaciones";
/// Topic for donation requests.
pub const DONATION_REQUESTS_TOPIC: &str = "solicitud-donaciones";
/// Topic for donation request cancellations.
pub const REQUEST_CANCELLATIONS_TOPIC: &str = "baja-solicitud-donaciones";
/// Topic for event cancellations.
pub const EVENT_CANCELLATIONS_TOPIC: &str = "baja-evento-solidario";
/// Topic for event announcements.
pub const EVENTS_TOPIC: &str = "eventos-solidarios";
/// Prefix of the per-receiver transfer topics.
pub const TRANSFERS_TOPIC_PREFIX: &str = "transferencia-donaciones/";
/// Prefix of the per-organizer adhesion topics.
pub const ADHESIONS_TOPIC_PREFIX: &str = "adhesion-evento/";
/// Topic receiving messages that could not be processed.
pub const DEAD_LETTER_TOPIC: &str = "mensajes-descartados";

/// Errors raised while routing a message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    /// A per-target message type was routed without its target organization.
    #[error("{0} requires a target organization")]
    MissingTarget(MessageType),
}

/// A resolved destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Topic name.
    pub topic: String,
    /// Partition key.
    pub partition_key: String,
}

/// Resolves the topic and partition key for `message`.
///
/// `target` is the receiving organization of a transfer or the organizer of
/// an adhesion; it is ignored for fixed-topic types.
///
/// # Errors
///
/// Returns `RoutingError::MissingTarget` when a per-target type is routed
/// without a target.
pub fn route(message: &Message, target: Option<&OrganizationId>) -> Result<Route, RoutingError> {
    let fixed = |topic: &str, key: &str| Route {
        topic: topic.to_owned(),
        partition_key: key.to_owned(),
    };
    let route = match message {
        Message::DonationOffer(offer) => {
            fixed(DONATION_OFFERS_TOPIC, offer.donor_organization_id.as_str())
        }
        Message::DonationRequest(request) => {
            fixed(DONATION_REQUESTS_TOPIC, request.organization_id.as_str())
        }
        Message::RequestCancellation(cancellation) => fixed(
            REQUEST_CANCELLATIONS_TOPIC,
            cancellation.organization_id.as_str(),
        ),
        Message::ExternalEvent(event) => fixed(EVENTS_TOPIC, event.organization_id.as_str()),
        Message::EventCancellation(cancellation) => fixed(
            EVENT_CANCELLATIONS_TOPIC,
            cancellation.organization_id.as_str(),
        ),
        Message::DonationTransfer(transfer) => {
            let target = target.ok_or(RoutingError::MissingTarget(MessageType::DonationTransfer))?;
            Route {
                topic: transfer_topic(target),
                partition_key: transfer.request_id.clone(),
            }
        }
        Message::EventAdhesion(adhesion) => {
            let target = target.ok_or(RoutingError::MissingTarget(MessageType::EventAdhesion))?;
            Route {
                topic: adhesion_topic(target),
                partition_key: adhesion.event_id.clone(),
            }
        }
    };
    Ok(route)
}

/// The transfer topic addressed to `receiver`.
#[must_use]
pub fn transfer_topic(receiver: &OrganizationId) -> String {
    format!("{TRANSFERS_TOPIC_PREFIX}{receiver}")
}

/// The adhesion topic addressed to `organizer`.
#[must_use]
pub fn adhesion_topic(organizer: &OrganizationId) -> String {
    format!("{ADHESIONS_TOPIC_PREFIX}{organizer}")
}

/// The message type carried by `topic`, if it is a federation topic.
#[must_use]
pub fn message_type_of(topic: &str) -> Option<MessageType> {
    match topic {
        DONATION_OFFERS_TOPIC => Some(MessageType::DonationOffer),
        DONATION_REQUESTS_TOPIC => Some(MessageType::DonationRequest),
        REQUEST_CANCELLATIONS_TOPIC => Some(MessageType::RequestCancellation),
        EVENTS_TOPIC => Some(MessageType::ExternalEvent),
        EVENT_CANCELLATIONS_TOPIC => Some(MessageType::EventCancellation),
        _ => parse_target(topic).map(|(message_type, _)| message_type),
    }
}

/// Recovers the implicit target of a per-target topic.
///
/// Returns `None` for fixed topics and for per-target topics with an empty
/// target segment.
#[must_use]
pub fn parse_target(topic: &str) -> Option<(MessageType, OrganizationId)> {
    let (message_type, target) = if let Some(target) = topic.strip_prefix(TRANSFERS_TOPIC_PREFIX) {
        (MessageType::DonationTransfer, target)
    } else if let Some(target) = topic.strip_prefix(ADHESIONS_TOPIC_PREFIX) {
        (MessageType::EventAdhesion, target)
    } else {
        return None;
    };
    if target.trim().is_empty() {
        return None;
    }
    Some((message_type, OrganizationId::new(target)))
}

/// Topics a node of organization `own` consumes.
///
/// Every node watches all transfer topics because the donor side of a
/// transfer is applied by the donor's node, which is not the addressee.
/// Adhesions are only consumed by their organizer.
#[must_use]
pub fn subscription_patterns(own: &OrganizationId) -> Vec<TopicPattern> {
    vec![
        TopicPattern::Exact(DONATION_OFFERS_TOPIC.to_owned()),
        TopicPattern::Exact(DONATION_REQUESTS_TOPIC.to_owned()),
        TopicPattern::Exact(REQUEST_CANCELLATIONS_TOPIC.to_owned()),
        TopicPattern::Exact(EVENTS_TOPIC.to_owned()),
        TopicPattern::Exact(EVENT_CANCELLATIONS_TOPIC.to_owned()),
        TopicPattern::Prefix(TRANSFERS_TOPIC_PREFIX.to_owned()),
        TopicPattern::Exact(adhesion_topic(own)),
    ]
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::category::DonationCategory;
    use crate::messages::{
        DonationOffer, DonationTransfer, EventAdhesion, EventCancellation, Quantity,
    };

    fn transfer(request_id: &str) -> Message {
        Message::DonationTransfer(DonationTransfer {
            request_id: request_id.into(),
            donor_organization_id: OrganizationId::new("org-A"),
            donation_category: DonationCategory::Alimentos,
            donation_description: "Arroz".into(),
            quantity: Quantity::new(10),
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn test_offer_is_keyed_by_donor() {
        let message = Message::DonationOffer(DonationOffer {
            offer_id: "o1".into(),
            donor_organization_id: OrganizationId::new("org-A"),
            category: DonationCategory::Ropa,
            description: "Camperas".into(),
            quantity: Quantity::new(3),
            timestamp: Utc::now(),
        });

        let route = route(&message, None).unwrap();

        assert_eq!(route.topic, "oferta-donaciones");
        assert_eq!(route.partition_key, "org-A");
    }

    #[test]
    fn test_fixed_topic_ignores_target() {
        let message = Message::EventCancellation(EventCancellation {
            organization_id: OrganizationId::new("org-A"),
            event_id: "e1".into(),
            timestamp: Utc::now(),
        });

        let route = route(&message, Some(&OrganizationId::new("org-Z"))).unwrap();

        assert_eq!(route.topic, "baja-evento-solidario");
        assert_eq!(route.partition_key, "org-A");
    }

    #[test]
    fn test_transfer_topic_is_parameterized_by_receiver_and_keyed_by_request() {
        let route = route(&transfer("r1"), Some(&OrganizationId::new("org-B"))).unwrap();

        assert_eq!(route.topic, "transferencia-donaciones/org-B");
        assert_eq!(route.partition_key, "r1");
    }

    #[test]
    fn test_transfers_for_same_request_share_a_partition_key() {
        let target = OrganizationId::new("org-B");

        let first = route(&transfer("r1"), Some(&target)).unwrap();
        let second = route(&transfer("r1"), Some(&target)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_adhesion_topic_is_parameterized_by_organizer_and_keyed_by_event() {
        let message = Message::EventAdhesion(EventAdhesion {
            event_id: "e7".into(),
            volunteer_organization_id: OrganizationId::new("org-A"),
            volunteer_id: "v1".into(),
            volunteer_name: "Ana".into(),
            volunteer_last_name: "Pérez".into(),
            volunteer_phone: "555-0101".into(),
            volunteer_email: "ana@example.org".into(),
            timestamp: Utc::now(),
        });

        let route = route(&message, Some(&OrganizationId::new("org-C"))).unwrap();

        assert_eq!(route.topic, "adhesion-evento/org-C");
        assert_eq!(route.partition_key, "e7");
    }

    #[test]
    fn test_per_target_type_without_target_is_an_error() {
        let result = route(&transfer("r1"), None);

        assert_eq!(
            result,
            Err(RoutingError::MissingTarget(MessageType::DonationTransfer))
        );
    }

    #[test]
    fn test_parse_target_recovers_receiver() {
        let parsed = parse_target("transferencia-donaciones/org-B");

        assert_eq!(
            parsed,
            Some((MessageType::DonationTransfer, OrganizationId::new("org-B")))
        );
        assert_eq!(parse_target("transferencia-donaciones/"), None);
        assert_eq!(parse_target("oferta-donaciones"), None);
    }

    #[test]
    fn test_message_type_of_known_and_unknown_topics() {
        assert_eq!(
            message_type_of("solicitud-donaciones"),
            Some(MessageType::DonationRequest)
        );
        assert_eq!(
            message_type_of("adhesion-evento/org-A"),
            Some(MessageType::EventAdhesion)
        );
        assert_eq!(message_type_of("otro-topico"), None);
    }

    #[test]
    fn test_subscriptions_cover_own_adhesions_only() {
        let patterns = subscription_patterns(&OrganizationId::new("org-A"));

        assert!(patterns.iter().any(|p| p.matches("adhesion-evento/org-A")));
        assert!(!patterns.iter().any(|p| p.matches("adhesion-evento/org-B")));
        assert!(patterns.iter().any(|p| p.matches("transferencia-donaciones/org-B")));
    }
}
