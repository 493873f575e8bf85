//! Inventory reconciler.
//!
//! A transfer moves stock from a donor to a receiver. Each node applies only
//! the side it owns: the donor's node debits, the receiver's node credits.
//! Each side is guarded by its own key (`{message_id}:debit` or
//! `{message_id}:credit`) so a redelivered transfer never books a side twice.
//!
//! Debits clamp at zero. Donor inventories are informational in the
//! federation, so an overdrawn debit is logged and applied rather than
//! rejected.

use empuje_core::error::SyncError;
use empuje_core::registry::{OrganizationId, OrganizationRegistry};
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::guard::{IdempotencyGuard, Side, side_key};
use crate::domain::messages::DonationTransfer;
use crate::domain::ports::{CommitOutcome, Mutation, StockDelta};
use crate::domain::records::StockChange;

/// One side of a transfer that this node is responsible for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLeg {
    /// Debit or credit.
    pub side: Side,
    /// Organization whose ledger the side touches.
    pub organization_id: OrganizationId,
}

/// What happened to one leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegOutcome {
    /// The ledger was adjusted.
    Applied(StockChange),
    /// A previous delivery already applied this leg.
    Duplicate,
}

/// Applies the sides of a transfer owned by this node.
#[derive(Debug, Clone)]
pub struct InventoryReconciler {
    guard: IdempotencyGuard,
    registry: OrganizationRegistry,
}

impl InventoryReconciler {
    /// Creates a reconciler for the organization in `registry`.
    #[must_use]
    pub fn new(guard: IdempotencyGuard, registry: OrganizationRegistry) -> Self {
        Self { guard, registry }
    }

    /// The legs of a transfer from `donor` to `receiver` that this node
    /// applies. Empty when this node is neither party.
    #[must_use]
    pub fn owned_legs(&self, donor: &OrganizationId, receiver: &OrganizationId) -> Vec<TransferLeg> {
        let mut legs = Vec::with_capacity(2);
        if self.registry.is_own(donor) {
            legs.push(TransferLeg {
                side: Side::Debit,
                organization_id: donor.clone(),
            });
        }
        if self.registry.is_own(receiver) {
            legs.push(TransferLeg {
                side: Side::Credit,
                organization_id: receiver.clone(),
            });
        }
        legs
    }

    /// Filters `legs` down to those not yet applied for `message_id`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Infrastructure` if the guard's store is
    /// unavailable.
    pub async fn pending_legs(
        &self,
        message_id: Uuid,
        legs: Vec<TransferLeg>,
    ) -> Result<Vec<TransferLeg>, SyncError> {
        let mut pending = Vec::with_capacity(legs.len());
        for leg in legs {
            if self.guard.should_process(&side_key(message_id, leg.side)).await? {
                pending.push(leg);
            }
        }
        Ok(pending)
    }

    /// Applies one leg and marks it processed in the same transaction.
    ///
    /// The request the transfer fulfils is moved to matched as part of the
    /// same commit.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Infrastructure` if the commit fails; nothing is
    /// then applied.
    pub async fn apply_leg(
        &self,
        message_id: Uuid,
        topic: &str,
        leg: &TransferLeg,
        transfer: &DonationTransfer,
    ) -> Result<LegOutcome, SyncError> {
        let delta = match leg.side {
            Side::Debit => StockDelta::Debit(transfer.quantity),
            Side::Credit => StockDelta::Credit(transfer.quantity),
        };
        let mutations = [
            Mutation::AdjustStock {
                organization_id: leg.organization_id.clone(),
                category: transfer.donation_category.clone(),
                description: transfer.donation_description.clone(),
                delta,
            },
            Mutation::MarkRequestMatched {
                request_id: transfer.request_id.clone(),
            },
        ];
        let outcome = self
            .guard
            .commit(side_key(message_id, leg.side), message_id, topic, &mutations)
            .await?;

        let CommitOutcome::Applied(changes) = outcome else {
            return Ok(LegOutcome::Duplicate);
        };
        let Some(change) = changes.into_iter().next() else {
            return Err(SyncError::Infrastructure(
                "store did not report the stock change".into(),
            ));
        };
        if leg.side == Side::Debit && change.was_clamped(transfer.quantity.units()) {
            warn!(
                %message_id,
                request_id = %transfer.request_id,
                category = %change.category,
                requested = transfer.quantity.units(),
                before = change.before,
                "debit exceeds donor stock; clamped at zero"
            );
        }
        info!(
            %message_id,
            request_id = %transfer.request_id,
            side = leg.side.as_str(),
            organization_id = %change.organization_id,
            category = %change.category,
            before = change.before,
            after = change.after,
            "transfer leg applied"
        );
        Ok(LegOutcome::Applied(change))
    }
}
