//! Test stores — mock `FederationStore` implementations for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use empuje_core::error::SyncError;
use empuje_core::registry::OrganizationId;
use empuje_federation::category::DonationCategory;
use empuje_federation::ports::{
    CommitOutcome, FederationStore, Mutation, ProcessedMark, StockDelta,
};
use empuje_federation::records::{
    ExternalEvent, FederatedOffer, FederatedRequest, Participant, RecordState, StockChange,
};

#[derive(Debug, Default)]
struct State {
    processed: HashMap<String, DateTime<Utc>>,
    offers: BTreeMap<String, FederatedOffer>,
    requests: BTreeMap<String, FederatedRequest>,
    events: BTreeMap<String, ExternalEvent>,
    participants: BTreeMap<(String, String), Participant>,
    stock: HashMap<(OrganizationId, String), i64>,
}

impl State {
    fn apply(&mut self, mutation: &Mutation, at: DateTime<Utc>) -> Option<StockChange> {
        match mutation {
            Mutation::UpsertOffer(offer) => {
                self.offers.insert(
                    offer.offer_id.clone(),
                    FederatedOffer {
                        offer: offer.clone(),
                        received_at: at,
                    },
                );
            }
            Mutation::UpsertRequest(request) => {
                let existing = self.requests.get(&request.request_id);
                let record = FederatedRequest {
                    request_id: request.request_id.clone(),
                    state: RecordState::on_created(existing.map(|r| r.state)),
                    request: Some(request.clone()),
                    cancelled_at: existing.and_then(|r| r.cancelled_at),
                };
                self.requests.insert(request.request_id.clone(), record);
            }
            Mutation::CancelRequest {
                request_id,
                cancelled_at,
            } => {
                let existing = self.requests.get(request_id);
                let record = FederatedRequest {
                    request_id: request_id.clone(),
                    state: RecordState::on_cancelled(existing.map(|r| r.state)),
                    request: existing.and_then(|r| r.request.clone()),
                    cancelled_at: existing.and_then(|r| r.cancelled_at).or(Some(*cancelled_at)),
                };
                self.requests.insert(request_id.clone(), record);
            }
            Mutation::MarkRequestMatched { request_id } => {
                if let Some(record) = self.requests.get_mut(request_id) {
                    record.state = record.state.on_matched();
                }
            }
            Mutation::UpsertExternalEvent(announcement) => {
                let existing = self.events.get(&announcement.event_id);
                let record = ExternalEvent {
                    event_id: announcement.event_id.clone(),
                    state: RecordState::on_created(existing.map(|e| e.state)),
                    announcement: Some(announcement.clone()),
                    cancelled_at: existing.and_then(|e| e.cancelled_at),
                };
                self.events.insert(announcement.event_id.clone(), record);
            }
            Mutation::CancelEvent {
                event_id,
                cancelled_at,
            } => {
                let existing = self.events.get(event_id);
                let record = ExternalEvent {
                    event_id: event_id.clone(),
                    state: RecordState::on_cancelled(existing.map(|e| e.state)),
                    announcement: existing.and_then(|e| e.announcement.clone()),
                    cancelled_at: existing.and_then(|e| e.cancelled_at).or(Some(*cancelled_at)),
                };
                self.events.insert(event_id.clone(), record);
            }
            Mutation::UpsertParticipant(adhesion) => {
                self.participants.insert(
                    (adhesion.event_id.clone(), adhesion.volunteer_id.clone()),
                    Participant {
                        adhesion: adhesion.clone(),
                        registered_at: at,
                    },
                );
            }
            Mutation::AdjustStock {
                organization_id,
                category,
                delta,
                ..
            } => {
                let entry = self
                    .stock
                    .entry((organization_id.clone(), category.as_str().to_owned()))
                    .or_insert(0);
                let before = *entry;
                let after = match delta {
                    StockDelta::Debit(quantity) => (before - i64::from(quantity.units())).max(0),
                    StockDelta::Credit(quantity) => before + i64::from(quantity.units()),
                };
                *entry = after;
                return Some(StockChange {
                    organization_id: organization_id.clone(),
                    category: category.clone(),
                    before,
                    after,
                });
            }
        }
        None
    }
}

/// A federation store held in process memory.
///
/// Applies mutations with the same semantics as the Postgres store, under a
/// single lock.
#[derive(Debug, Default)]
pub struct InMemoryFederationStore {
    state: Mutex<State>,
}

impl InMemoryFederationStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an organization's stock of a category.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn seed_stock(&self, organization_id: &OrganizationId, category: &DonationCategory, units: i64) {
        self.state
            .lock()
            .unwrap()
            .stock
            .insert((organization_id.clone(), category.as_str().to_owned()), units);
    }

    /// Number of processed marks currently held.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn processed_count(&self) -> usize {
        self.state.lock().unwrap().processed.len()
    }
}

#[async_trait]
impl FederationStore for InMemoryFederationStore {
    async fn is_processed(&self, key: &str) -> Result<bool, SyncError> {
        Ok(self.state.lock().unwrap().processed.contains_key(key))
    }

    async fn commit(
        &self,
        mark: &ProcessedMark,
        mutations: &[Mutation],
    ) -> Result<CommitOutcome, SyncError> {
        let mut state = self.state.lock().unwrap();
        if state.processed.contains_key(&mark.key) {
            return Ok(CommitOutcome::AlreadyProcessed);
        }
        let changes = mutations
            .iter()
            .filter_map(|mutation| state.apply(mutation, mark.processed_at))
            .collect();
        state.processed.insert(mark.key.clone(), mark.processed_at);
        Ok(CommitOutcome::Applied(changes))
    }

    async fn purge_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, SyncError> {
        let mut state = self.state.lock().unwrap();
        let before = state.processed.len();
        state.processed.retain(|_, at| *at >= cutoff);
        Ok((before - state.processed.len()) as u64)
    }

    async fn find_request(&self, request_id: &str) -> Result<Option<FederatedRequest>, SyncError> {
        Ok(self.state.lock().unwrap().requests.get(request_id).cloned())
    }

    async fn list_requests(&self) -> Result<Vec<FederatedRequest>, SyncError> {
        Ok(self.state.lock().unwrap().requests.values().cloned().collect())
    }

    async fn find_event(&self, event_id: &str) -> Result<Option<ExternalEvent>, SyncError> {
        Ok(self.state.lock().unwrap().events.get(event_id).cloned())
    }

    async fn list_events(&self) -> Result<Vec<ExternalEvent>, SyncError> {
        Ok(self.state.lock().unwrap().events.values().cloned().collect())
    }

    async fn list_offers(&self) -> Result<Vec<FederatedOffer>, SyncError> {
        Ok(self.state.lock().unwrap().offers.values().cloned().collect())
    }

    async fn participants(&self, event_id: &str) -> Result<Vec<Participant>, SyncError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .participants
            .iter()
            .filter(|((event, _), _)| event == event_id)
            .map(|(_, participant)| participant.clone())
            .collect())
    }

    async fn stock_level(
        &self,
        organization_id: &OrganizationId,
        category: &DonationCategory,
    ) -> Result<Option<i64>, SyncError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .stock
            .get(&(organization_id.clone(), category.as_str().to_owned()))
            .copied())
    }
}

/// A federation store that always returns an infrastructure error.
#[derive(Debug)]
pub struct FailingFederationStore;

fn unavailable<T>() -> Result<T, SyncError> {
    Err(SyncError::Infrastructure("connection refused".into()))
}

#[async_trait]
impl FederationStore for FailingFederationStore {
    async fn is_processed(&self, _key: &str) -> Result<bool, SyncError> {
        unavailable()
    }

    async fn commit(
        &self,
        _mark: &ProcessedMark,
        _mutations: &[Mutation],
    ) -> Result<CommitOutcome, SyncError> {
        unavailable()
    }

    async fn purge_processed_before(&self, _cutoff: DateTime<Utc>) -> Result<u64, SyncError> {
        unavailable()
    }

    async fn find_request(&self, _request_id: &str) -> Result<Option<FederatedRequest>, SyncError> {
        unavailable()
    }

    async fn list_requests(&self) -> Result<Vec<FederatedRequest>, SyncError> {
        unavailable()
    }

    async fn find_event(&self, _event_id: &str) -> Result<Option<ExternalEvent>, SyncError> {
        unavailable()
    }

    async fn list_events(&self) -> Result<Vec<ExternalEvent>, SyncError> {
        unavailable()
    }

    async fn list_offers(&self) -> Result<Vec<FederatedOffer>, SyncError> {
        unavailable()
    }

    async fn participants(&self, _event_id: &str) -> Result<Vec<Participant>, SyncError> {
        unavailable()
    }

    async fn stock_level(
        &self,
        _organization_id: &OrganizationId,
        _category: &DonationCategory,
    ) -> Result<Option<i64>, SyncError> {
        unavailable()
    }
}
