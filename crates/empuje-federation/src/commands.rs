//! Local intents that publish federation messages.

use chrono::{DateTime, Utc};
use empuje_core::error::SyncError;
use empuje_core::registry::OrganizationId;
use uuid::Uuid;

use crate::category::DonationCategory;
use crate::messages::{DonationLine, Quantity};

fn require(field: &str, value: &str) -> Result<(), SyncError> {
    if value.trim().is_empty() {
        return Err(SyncError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_positive(field: &str, quantity: Quantity) -> Result<(), SyncError> {
    if quantity.is_zero() {
        return Err(SyncError::Validation(format!("{field} must be positive")));
    }
    Ok(())
}

/// Offer stock to the federation.
#[derive(Debug, Clone)]
pub struct PublishDonationOffer {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Offer id; generated when absent.
    pub offer_id: Option<String>,
    /// Donor; defaults to this organization.
    pub donor_organization_id: Option<OrganizationId>,
    /// Category offered.
    pub category: DonationCategory,
    /// Description.
    pub description: String,
    /// Units offered.
    pub quantity: Quantity,
}

impl PublishDonationOffer {
    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Validation` for an empty description or a zero
    /// quantity.
    pub fn validate(&self) -> Result<(), SyncError> {
        require("description", &self.description)?;
        require_positive("quantity", self.quantity)
    }
}

/// Ask the federation for donations.
#[derive(Debug, Clone)]
pub struct PublishDonationRequest {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Request id; generated when absent.
    pub request_id: Option<String>,
    /// Requester; defaults to this organization.
    pub organization_id: Option<OrganizationId>,
    /// Goods requested.
    pub donations: Vec<DonationLine>,
}

impl PublishDonationRequest {
    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Validation` when no donation line is given or a
    /// line has an empty description or zero quantity.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.donations.is_empty() {
            return Err(SyncError::Validation(
                "at least one donation line is required".into(),
            ));
        }
        for line in &self.donations {
            require("description", &line.description)?;
            require_positive("quantity", line.quantity)?;
        }
        Ok(())
    }
}

/// Withdraw a donation request.
#[derive(Debug, Clone)]
pub struct CancelDonationRequest {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The request to withdraw.
    pub request_id: String,
    /// Requester; defaults to this organization.
    pub organization_id: Option<OrganizationId>,
}

impl CancelDonationRequest {
    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Validation` for an empty request id.
    pub fn validate(&self) -> Result<(), SyncError> {
        require("request_id", &self.request_id)
    }
}

/// Send goods to the organization that requested them.
#[derive(Debug, Clone)]
pub struct PublishDonationTransfer {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The receiving organization.
    pub target_organization_id: OrganizationId,
    /// The request being fulfilled.
    pub request_id: String,
    /// Donor; defaults to this organization.
    pub donor_organization_id: Option<OrganizationId>,
    /// Category transferred.
    pub category: DonationCategory,
    /// Description.
    pub description: String,
    /// Units transferred.
    pub quantity: Quantity,
}

impl PublishDonationTransfer {
    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Validation` for an empty target or request id, an
    /// empty description or a zero quantity.
    pub fn validate(&self) -> Result<(), SyncError> {
        require("target_organization_id", self.target_organization_id.as_str())?;
        require("request_id", &self.request_id)?;
        require("description", &self.description)?;
        require_positive("quantity", self.quantity)
    }
}

/// Announce a volunteer event to the federation.
#[derive(Debug, Clone)]
pub struct AnnounceEvent {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Event id (owned by the local event service).
    pub event_id: String,
    /// Event name.
    pub event_name: String,
    /// Event description.
    pub description: String,
    /// When the event takes place.
    pub event_date_time: DateTime<Utc>,
}

impl AnnounceEvent {
    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Validation` for an empty event id or name.
    pub fn validate(&self) -> Result<(), SyncError> {
        require("event_id", &self.event_id)?;
        require("event_name", &self.event_name)
    }
}

/// Withdraw an announced event.
#[derive(Debug, Clone)]
pub struct CancelEvent {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The event to withdraw.
    pub event_id: String,
}

impl CancelEvent {
    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Validation` for an empty event id.
    pub fn validate(&self) -> Result<(), SyncError> {
        require("event_id", &self.event_id)
    }
}

/// Sign a local volunteer up for another organization's event.
#[derive(Debug, Clone)]
pub struct JoinEvent {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The organization hosting the event.
    pub organizer_organization_id: OrganizationId,
    /// The event to join.
    pub event_id: String,
    /// Volunteer identifier within this organization.
    pub volunteer_id: String,
    /// First name.
    pub volunteer_name: String,
    /// Last name.
    pub volunteer_last_name: String,
    /// Contact phone.
    pub volunteer_phone: String,
    /// Contact email.
    pub volunteer_email: String,
}

impl JoinEvent {
    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Validation` for an empty organizer, event id,
    /// volunteer id or email.
    pub fn validate(&self) -> Result<(), SyncError> {
        require("organizer_organization_id", self.organizer_organization_id.as_str())?;
        require("event_id", &self.event_id)?;
        require("volunteer_id", &self.volunteer_id)?;
        require("volunteer_email", &self.volunteer_email)
    }
}
