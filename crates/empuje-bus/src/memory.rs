//! In-process partitioned log.
//!
//! Each topic is split into a fixed number of partitions. Records are
//! appended to the partition chosen by [`partition_for`] and retained until
//! [`MessageBus::prune`] removes them. Consumer groups track one committed
//! offset per partition; a group starts from the earliest retained record of
//! any partition it has not consumed before.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use empuje_core::bus::{
    BusError, BusSubscription, Delivery, MessageBus, OutboundRecord, RecordPosition,
    SubscriptionSpec,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::{DEFAULT_PARTITIONS, partition_for};

type PartitionId = (String, u32);

#[derive(Debug, Clone)]
struct StoredRecord {
    key: String,
    payload: Vec<u8>,
    appended_at: Instant,
}

/// Retained records of one partition; `base` is the offset of the first.
#[derive(Debug, Clone, Default)]
struct PartitionLog {
    base: u64,
    records: VecDeque<StoredRecord>,
}

impl PartitionLog {
    fn next_offset(&self) -> u64 {
        self.base + self.records.len() as u64
    }

    /// The record at `offset`, or the first retained one after it.
    fn head_from(&self, offset: u64) -> Option<(u64, &StoredRecord)> {
        let offset = offset.max(self.base);
        let index = usize::try_from(offset - self.base).ok()?;
        self.records.get(index).map(|record| (offset, record))
    }

    fn prune_before(&mut self, cutoff: Instant) -> u64 {
        let mut pruned = 0;
        while self
            .records
            .front()
            .is_some_and(|record| record.appended_at < cutoff)
        {
            self.records.pop_front();
            self.base += 1;
            pruned += 1;
        }
        pruned
    }
}

#[derive(Debug, Default)]
struct GroupState {
    committed: HashMap<PartitionId, u64>,
    in_flight: HashMap<PartitionId, u64>,
    attempts: HashMap<PartitionId, u32>,
    not_before: HashMap<PartitionId, Instant>,
}

#[derive(Debug, Default)]
struct LogState {
    topics: BTreeMap<String, Vec<PartitionLog>>,
    groups: HashMap<String, GroupState>,
    closed: bool,
}

/// Next delivery for a member, or the earliest instant one may become due.
enum Poll {
    Ready(Delivery),
    WaitUntil(Instant),
    Idle,
}

impl LogState {
    fn poll(&mut self, spec: &SubscriptionSpec, now: Instant) -> Poll {
        let group = self.groups.entry(spec.group_id.clone()).or_default();
        let mut wake_at: Option<Instant> = None;
        for (topic, partitions) in &self.topics {
            for (index, log) in (0_u32..).zip(partitions) {
                if !spec.owns(topic, index) {
                    continue;
                }
                let id = (topic.clone(), index);
                if group.in_flight.contains_key(&id) {
                    continue;
                }
                let committed = group.committed.get(&id).copied().unwrap_or(0);
                let Some((next, record)) = log.head_from(committed) else {
                    continue;
                };
                if let Some(due) = group.not_before.get(&id).copied() {
                    if due > now {
                        wake_at = Some(wake_at.map_or(due, |at| at.min(due)));
                        continue;
                    }
                }
                let attempt = group.attempts.entry(id.clone()).or_insert(0);
                *attempt += 1;
                let delivery = Delivery {
                    topic: topic.clone(),
                    partition: index,
                    offset: next,
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                    attempt: *attempt,
                };
                group.in_flight.insert(id, next);
                return Poll::Ready(delivery);
            }
        }
        wake_at.map_or(Poll::Idle, Poll::WaitUntil)
    }
}

/// A partitioned, at-least-once log held in process memory.
///
/// Cloning yields another handle onto the same log.
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    partitions: u32,
    state: Arc<Mutex<LogState>>,
    changes: Arc<watch::Sender<u64>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

fn lock(state: &Mutex<LogState>) -> Result<MutexGuard<'_, LogState>, BusError> {
    state
        .lock()
        .map_err(|_| BusError::Unavailable("bus state poisoned".into()))
}

impl InMemoryBus {
    /// Creates a bus with `partitions` partitions per topic.
    #[must_use]
    pub fn new(partitions: u32) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            partitions: partitions.max(1),
            state: Arc::new(Mutex::new(LogState::default())),
            changes: Arc::new(changes),
        }
    }

    /// Every record appended to `topic`, in partition then offset order.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Unavailable` if the bus state is poisoned.
    pub fn records(&self, topic: &str) -> Result<Vec<(RecordPosition, OutboundRecord)>, BusError> {
        let state = lock(&self.state)?;
        let Some(partitions) = state.topics.get(topic) else {
            return Ok(Vec::new());
        };
        Ok((0_u32..)
            .zip(partitions)
            .flat_map(|(partition, log)| {
                (log.base..).zip(&log.records).map(move |(offset, record)| {
                    (
                        RecordPosition {
                            topic: topic.to_owned(),
                            partition,
                            offset,
                        },
                        OutboundRecord {
                            topic: topic.to_owned(),
                            key: record.key.clone(),
                            payload: record.payload.clone(),
                        },
                    )
                })
            })
            .collect())
    }

    /// Closes the bus. Pending `next_delivery` calls return `None` and
    /// further sends fail with `BusError::Closed`.
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
        self.changes.send_modify(|version| *version += 1);
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn send(&self, record: OutboundRecord) -> Result<RecordPosition, BusError> {
        let partition = partition_for(&record.key, self.partitions);
        let position = {
            let mut state = lock(&self.state)?;
            if state.closed {
                return Err(BusError::Closed);
            }
            let partitions = state
                .topics
                .entry(record.topic.clone())
                .or_insert_with(|| vec![PartitionLog::default(); self.partitions as usize]);
            let log = &mut partitions[partition as usize];
            let offset = log.next_offset();
            log.records.push_back(StoredRecord {
                key: record.key,
                payload: record.payload,
                appended_at: Instant::now(),
            });
            RecordPosition {
                topic: record.topic,
                partition,
                offset,
            }
        };
        debug!(topic = %position.topic, partition, offset = position.offset, "record appended");
        self.notify();
        Ok(position)
    }

    async fn subscribe(
        &self,
        spec: SubscriptionSpec,
    ) -> Result<Box<dyn BusSubscription>, BusError> {
        spec.validate()?;
        Ok(Box::new(MemorySubscription {
            spec,
            bus: self.clone(),
            changes: self.changes.subscribe(),
        }))
    }

    async fn prune(&self, older_than: Duration) -> Result<u64, BusError> {
        let Some(cutoff) = Instant::now().checked_sub(older_than) else {
            return Ok(0);
        };
        let mut state = lock(&self.state)?;
        let pruned: u64 = state
            .topics
            .values_mut()
            .flat_map(|partitions| partitions.iter_mut())
            .map(|log| log.prune_before(cutoff))
            .sum();
        debug!(pruned, "bus records pruned");
        Ok(pruned)
    }
}

/// One consumer-group member's view of an [`InMemoryBus`].
#[derive(Debug)]
pub struct MemorySubscription {
    spec: SubscriptionSpec,
    bus: InMemoryBus,
    changes: watch::Receiver<u64>,
}

impl MemorySubscription {
    fn settle(
        &self,
        delivery: &Delivery,
        apply: impl FnOnce(&mut GroupState, PartitionId),
    ) -> Result<(), BusError> {
        {
            let mut state = lock(&self.bus.state)?;
            let group = state.groups.entry(self.spec.group_id.clone()).or_default();
            let id = (delivery.topic.clone(), delivery.partition);
            if group.in_flight.get(&id) != Some(&delivery.offset) {
                return Err(BusError::UnknownDelivery {
                    topic: delivery.topic.clone(),
                    partition: delivery.partition,
                    offset: delivery.offset,
                });
            }
            group.in_flight.remove(&id);
            apply(group, id);
        }
        self.bus.notify();
        Ok(())
    }
}

#[async_trait]
impl BusSubscription for MemorySubscription {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, BusError> {
        loop {
            self.changes.borrow_and_update();
            let poll = {
                let mut state = lock(&self.bus.state)?;
                if state.closed {
                    return Ok(None);
                }
                state.poll(&self.spec, Instant::now())
            };
            match poll {
                Poll::Ready(delivery) => return Ok(Some(delivery)),
                Poll::WaitUntil(at) => {
                    tokio::select! {
                        changed = self.changes.changed() => {
                            if changed.is_err() {
                                return Ok(None);
                            }
                        }
                        () = tokio::time::sleep_until(at) => {}
                    }
                }
                Poll::Idle => {
                    if self.changes.changed().await.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BusError> {
        let next = delivery.offset + 1;
        self.settle(delivery, |group, id| {
            group.attempts.remove(&id);
            group.not_before.remove(&id);
            group.committed.insert(id, next);
        })
    }

    async fn nack(&mut self, delivery: &Delivery, delay: Duration) -> Result<(), BusError> {
        let due = Instant::now() + delay;
        self.settle(delivery, |group, id| {
            group.not_before.insert(id, due);
        })
    }
}
