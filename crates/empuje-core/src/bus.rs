//! Message bus port.
//!
//! The federation only assumes an at-least-once, partitioned log: records
//! with the same key land on the same partition and are delivered in append
//! order within it, and a record is redelivered until its consumer group
//! acknowledges it.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::SyncError;

/// Errors raised by bus adapters.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus has been shut down.
    #[error("bus closed")]
    Closed,

    /// The bus backend could not be reached.
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    /// The subscription request is malformed.
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    /// An acknowledgment referred to a delivery this subscription does not hold.
    #[error("unknown delivery {topic}[{partition}]@{offset}")]
    UnknownDelivery {
        /// Topic of the delivery.
        topic: String,
        /// Partition of the delivery.
        partition: u32,
        /// Offset of the delivery.
        offset: u64,
    },
}

impl From<BusError> for SyncError {
    fn from(err: BusError) -> Self {
        Self::Infrastructure(err.to_string())
    }
}

/// A record handed to the bus for appending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    /// Destination topic.
    pub topic: String,
    /// Partition key; records sharing a key are strictly ordered.
    pub key: String,
    /// Serialized message.
    pub payload: Vec<u8>,
}

/// Where an appended record ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPosition {
    /// Topic the record was appended to.
    pub topic: String,
    /// Partition index.
    pub partition: u32,
    /// Offset within the partition.
    pub offset: u64,
}

/// A record delivered to a consumer-group member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Topic the record was read from.
    pub topic: String,
    /// Partition index.
    pub partition: u32,
    /// Offset within the partition.
    pub offset: u64,
    /// Partition key the producer used.
    pub key: String,
    /// Serialized message.
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
}

/// Topic selector for a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicPattern {
    /// A single, fixed topic.
    Exact(String),
    /// Every topic whose name starts with the prefix.
    Prefix(String),
}

impl TopicPattern {
    /// Returns `true` if `topic` is selected by this pattern.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Exact(name) => name == topic,
            Self::Prefix(prefix) => topic.starts_with(prefix.as_str()),
        }
    }
}

/// Describes one consumer-group member's subscription.
///
/// Partitions are assigned statically: member `m` of `n` owns every
/// partition `p` with `p % n == m`, on every matching topic. Members of the
/// same group therefore never process the same partition concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Consumer-group identity shared by all members of one deployment.
    pub group_id: String,
    /// Topics this member consumes.
    pub patterns: Vec<TopicPattern>,
    /// Index of this member within the group.
    pub member: u32,
    /// Total number of members in the group.
    pub members: u32,
}

impl SubscriptionSpec {
    /// Checks the member index against the group size.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidSubscription` for an empty group id, an empty
    /// pattern list, a zero-sized group or an out-of-range member index.
    pub fn validate(&self) -> Result<(), BusError> {
        if self.group_id.trim().is_empty() {
            return Err(BusError::InvalidSubscription("group id is empty".into()));
        }
        if self.patterns.is_empty() {
            return Err(BusError::InvalidSubscription("no topic patterns".into()));
        }
        if self.members == 0 || self.member >= self.members {
            return Err(BusError::InvalidSubscription(format!(
                "member {} out of range for group of {}",
                self.member, self.members
            )));
        }
        Ok(())
    }

    /// Returns `true` if this member consumes `partition` of `topic`.
    #[must_use]
    pub fn owns(&self, topic: &str, partition: u32) -> bool {
        self.members > 0
            && partition % self.members == self.member
            && self.patterns.iter().any(|p| p.matches(topic))
    }
}

/// Producer side of the bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Appends a record and returns its position once the bus has accepted it.
    async fn send(&self, record: OutboundRecord) -> Result<RecordPosition, BusError>;

    /// Joins a consumer group.
    async fn subscribe(
        &self,
        spec: SubscriptionSpec,
    ) -> Result<Box<dyn BusSubscription>, BusError>;

    /// Deletes records appended more than `older_than` ago and returns how
    /// many were removed. Offsets are never reused after pruning.
    async fn prune(&self, older_than: Duration) -> Result<u64, BusError>;
}

/// Consumer side of the bus: one group member's view of its partitions.
///
/// At most one delivery per partition is outstanding at a time; the next
/// record of that partition is only handed out after the outstanding one is
/// acknowledged.
#[async_trait]
pub trait BusSubscription: Send {
    /// Waits for the next delivery. Returns `Ok(None)` once the bus is closed.
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, BusError>;

    /// Commits the delivery's offset for the group.
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BusError>;

    /// Releases the delivery for redelivery after `delay`.
    async fn nack(&mut self, delivery: &Delivery, delay: Duration) -> Result<(), BusError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(member: u32, members: u32) -> SubscriptionSpec {
        SubscriptionSpec {
            group_id: "group".into(),
            patterns: vec![
                TopicPattern::Exact("oferta-donaciones".into()),
                TopicPattern::Prefix("transferencia-donaciones/".into()),
            ],
            member,
            members,
        }
    }

    #[test]
    fn test_prefix_pattern_matches_parameterized_topics() {
        let pattern = TopicPattern::Prefix("transferencia-donaciones/".into());

        assert!(pattern.matches("transferencia-donaciones/org-B"));
        assert!(!pattern.matches("oferta-donaciones"));
    }

    #[test]
    fn test_members_split_partitions_without_overlap() {
        let a = spec(0, 2);
        let b = spec(1, 2);

        for partition in 0..6 {
            assert_ne!(
                a.owns("oferta-donaciones", partition),
                b.owns("oferta-donaciones", partition)
            );
        }
    }

    #[test]
    fn test_member_does_not_own_unsubscribed_topic() {
        assert!(!spec(0, 1).owns("eventos-solidarios", 0));
    }

    #[test]
    fn test_validate_rejects_out_of_range_member() {
        let result = spec(2, 2).validate();

        assert!(matches!(result, Err(BusError::InvalidSubscription(_))));
    }

    #[test]
    fn test_bus_errors_are_infrastructure_failures() {
        let err: SyncError = BusError::Closed.into();

        assert!(matches!(err, SyncError::Infrastructure(_)));
    }
}
