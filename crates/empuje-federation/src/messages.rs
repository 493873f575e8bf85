//! Message contracts exchanged between organizations.
//!
//! Field names are part of the wire contract; renaming one breaks every peer
//! still running the previous release.

use std::fmt;

use chrono::{DateTime, Utc};
use empuje_core::registry::OrganizationId;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::category::DonationCategory;

/// A non-negative amount of donated units.
///
/// Encoded as a decimal string on the wire (`"50"`); a bare JSON integer is
/// accepted on input as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(u32);

impl Quantity {
    /// Wraps a unit count.
    #[must_use]
    pub fn new(units: u32) -> Self {
        Self(units)
    }

    /// The unit count.
    #[must_use]
    pub fn units(self) -> u32 {
        self.0
    }

    /// Returns `true` for a zero quantity.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

struct QuantityVisitor;

impl Visitor<'_> for QuantityVisitor {
    type Value = Quantity;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative integer quantity, optionally string-encoded")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Quantity, E> {
        v.trim()
            .parse::<u32>()
            .map(Quantity)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quantity, E> {
        u32::try_from(v)
            .map(Quantity)
            .map_err(|_| E::invalid_value(de::Unexpected::Unsigned(v), &self))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quantity, E> {
        u32::try_from(v)
            .map(Quantity)
            .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(QuantityVisitor)
    }
}

/// Stock a donor organization makes available to the federation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationOffer {
    /// Offer identifier, unique per donor.
    pub offer_id: String,
    /// The organization offering the goods.
    pub donor_organization_id: OrganizationId,
    /// Category of the goods.
    pub category: DonationCategory,
    /// Free-text description (e.g. "Arroz").
    pub description: String,
    /// Units offered.
    pub quantity: Quantity,
    /// When the offer was made.
    pub timestamp: DateTime<Utc>,
}

/// One line of a donation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationLine {
    /// Category of the goods.
    pub category: DonationCategory,
    /// Free-text description.
    pub description: String,
    /// Units requested.
    pub quantity: Quantity,
}

/// A request for donations broadcast to the federation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationRequest {
    /// The requesting organization.
    pub organization_id: OrganizationId,
    /// Request identifier.
    pub request_id: String,
    /// Goods requested.
    pub donations: Vec<DonationLine>,
    /// When the request was made.
    pub timestamp: DateTime<Utc>,
}

/// Donor-to-receiver stock movement fulfilling a request.
///
/// The receiving organization is not part of the payload; it is carried by
/// the topic name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationTransfer {
    /// The request being fulfilled.
    pub request_id: String,
    /// The organization giving the goods.
    pub donor_organization_id: OrganizationId,
    /// Category of the goods.
    pub donation_category: DonationCategory,
    /// Free-text description.
    pub donation_description: String,
    /// Units transferred.
    pub quantity: Quantity,
    /// When the transfer was made.
    pub timestamp: DateTime<Utc>,
}

/// Withdraws a previously published donation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCancellation {
    /// The requesting organization.
    pub organization_id: OrganizationId,
    /// The request being withdrawn.
    pub request_id: String,
    /// When the request was withdrawn.
    pub timestamp: DateTime<Utc>,
}

/// Announces a volunteer event hosted by an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalEventAnnouncement {
    /// The hosting organization.
    pub organization_id: OrganizationId,
    /// Event identifier.
    pub event_id: String,
    /// Event name.
    pub event_name: String,
    /// Event description.
    pub description: String,
    /// When the event takes place.
    pub event_date_time: DateTime<Utc>,
    /// When the announcement was made.
    pub timestamp: DateTime<Utc>,
}

/// Withdraws a previously announced event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCancellation {
    /// The hosting organization.
    pub organization_id: OrganizationId,
    /// The event being withdrawn.
    pub event_id: String,
    /// When the event was withdrawn.
    pub timestamp: DateTime<Utc>,
}

/// A volunteer from one organization joining another organization's event.
///
/// The organizer is not part of the payload; it is carried by the topic name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAdhesion {
    /// The event being joined.
    pub event_id: String,
    /// The volunteer's own organization.
    pub volunteer_organization_id: OrganizationId,
    /// Volunteer identifier within their organization.
    pub volunteer_id: String,
    /// First name.
    pub volunteer_name: String,
    /// Last name.
    pub volunteer_last_name: String,
    /// Contact phone.
    pub volunteer_phone: String,
    /// Contact email.
    pub volunteer_email: String,
    /// When the volunteer joined.
    pub timestamp: DateTime<Utc>,
}

/// Discriminator of a message on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// [`DonationOffer`].
    DonationOffer,
    /// [`DonationRequest`].
    DonationRequest,
    /// [`DonationTransfer`].
    DonationTransfer,
    /// [`RequestCancellation`].
    RequestCancellation,
    /// [`ExternalEventAnnouncement`].
    ExternalEvent,
    /// [`EventCancellation`].
    EventCancellation,
    /// [`EventAdhesion`].
    EventAdhesion,
}

impl MessageType {
    /// The wire name of the type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DonationOffer => "donation_offer",
            Self::DonationRequest => "donation_request",
            Self::DonationTransfer => "donation_transfer",
            Self::RequestCancellation => "request_cancellation",
            Self::ExternalEvent => "external_event",
            Self::EventCancellation => "event_cancellation",
            Self::EventAdhesion => "event_adhesion",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A donation offer.
    DonationOffer(DonationOffer),
    /// A donation request.
    DonationRequest(DonationRequest),
    /// A donation transfer.
    DonationTransfer(DonationTransfer),
    /// A request cancellation.
    RequestCancellation(RequestCancellation),
    /// An external event announcement.
    ExternalEvent(ExternalEventAnnouncement),
    /// An event cancellation.
    EventCancellation(EventCancellation),
    /// An event participation adhesion.
    EventAdhesion(EventAdhesion),
}

impl Message {
    /// The wire discriminator of this payload.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::DonationOffer(_) => MessageType::DonationOffer,
            Self::DonationRequest(_) => MessageType::DonationRequest,
            Self::DonationTransfer(_) => MessageType::DonationTransfer,
            Self::RequestCancellation(_) => MessageType::RequestCancellation,
            Self::ExternalEvent(_) => MessageType::ExternalEvent,
            Self::EventCancellation(_) => MessageType::EventCancellation,
            Self::EventAdhesion(_) => MessageType::EventAdhesion,
        }
    }
}

/// A message together with its delivery metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Unique message identifier; the deduplication key.
    pub message_id: Uuid,
    /// The sending organization.
    pub organization_id: OrganizationId,
    /// When the message was produced.
    pub timestamp: DateTime<Utc>,
    /// The payload.
    pub message: Message,
}

impl Envelope {
    /// Wraps a payload with a fresh, time-ordered message identifier.
    #[must_use]
    pub fn new(organization_id: OrganizationId, timestamp: DateTime<Utc>, message: Message) -> Self {
        Self {
            message_id: Uuid::now_v7(),
            organization_id,
            timestamp,
            message,
        }
    }

    /// The wire discriminator of the payload.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.message.message_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_serializes_as_string() {
        let json = serde_json::to_string(&Quantity::new(50)).unwrap();

        assert_eq!(json, "\"50\"");
    }

    #[test]
    fn test_quantity_accepts_string_and_integer() {
        let from_string: Quantity = serde_json::from_str("\"50\"").unwrap();
        let from_integer: Quantity = serde_json::from_str("50").unwrap();

        assert_eq!(from_string, Quantity::new(50));
        assert_eq!(from_integer, Quantity::new(50));
    }

    #[test]
    fn test_quantity_rejects_non_numeric_and_negative_values() {
        assert!(serde_json::from_str::<Quantity>("\"cincuenta\"").is_err());
        assert!(serde_json::from_str::<Quantity>("-3").is_err());
        assert!(serde_json::from_str::<Quantity>("\"-3\"").is_err());
    }

    #[test]
    fn test_envelopes_get_distinct_message_ids() {
        let message = Message::EventCancellation(EventCancellation {
            organization_id: OrganizationId::new("org-A"),
            event_id: "e1".into(),
            timestamp: Utc::now(),
        });

        let first = Envelope::new(OrganizationId::new("org-A"), Utc::now(), message.clone());
        let second = Envelope::new(OrganizationId::new("org-A"), Utc::now(), message);

        assert_ne!(first.message_id, second.message_id);
        assert_eq!(first.message_type(), MessageType::EventCancellation);
    }
}
