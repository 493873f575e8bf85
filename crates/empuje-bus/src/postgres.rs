//! `PostgreSQL`-backed partitioned log.
//!
//! Records live in `bus_records`, one row per `(topic, partition, offset)`.
//! Offsets are allocated under a transaction-scoped advisory lock on the
//! partition, so appends to one partition are serialized and gap-free.
//! Consumer groups keep their committed offset, attempt count and
//! redelivery deadline per partition in `bus_consumer_offsets`.
//!
//! Pruning may leave gaps below a group's committed offset, so a partition's
//! head is the lowest remaining offset at or above it. The newest record of
//! every partition is never pruned, which keeps offset allocation monotonic.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use empuje_core::bus::{
    BusError, BusSubscription, Delivery, MessageBus, OutboundRecord, RecordPosition,
    SubscriptionSpec, TopicPattern,
};
use sqlx::PgPool;
use tracing::debug;

use crate::partition_for;
use crate::schema::{CREATE_BUS_CONSUMER_OFFSETS_TABLE, CREATE_BUS_RECORDS_TABLE};

/// How many due records one poll considers.
const POLL_BATCH: i64 = 64;

fn unavailable(err: sqlx::Error) -> BusError {
    BusError::Unavailable(err.to_string())
}

fn db_partition(partition: u32) -> i32 {
    i32::try_from(partition).unwrap_or(i32::MAX)
}

fn db_offset(offset: u64) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}

/// A partitioned, at-least-once log stored in `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PgBus {
    pool: PgPool,
    partitions: u32,
    poll_interval: Duration,
}

impl PgBus {
    /// Creates a bus over `pool` with `partitions` partitions per topic.
    #[must_use]
    pub fn new(pool: PgPool, partitions: u32) -> Self {
        Self {
            pool,
            partitions: partitions.max(1),
            poll_interval: Duration::from_millis(200),
        }
    }

    /// Sets how long an idle subscription waits between polls.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Creates the bus tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Unavailable` if the statements fail.
    pub async fn ensure_schema(&self) -> Result<(), BusError> {
        sqlx::raw_sql(CREATE_BUS_RECORDS_TABLE)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        sqlx::raw_sql(CREATE_BUS_CONSUMER_OFFSETS_TABLE)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl MessageBus for PgBus {
    async fn send(&self, record: OutboundRecord) -> Result<RecordPosition, BusError> {
        if self.pool.is_closed() {
            return Err(BusError::Closed);
        }
        let partition = partition_for(&record.key, self.partitions);
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), $2)")
            .bind(&record.topic)
            .bind(db_partition(partition))
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        let (offset,): (i64,) = sqlx::query_as(
            "INSERT INTO bus_records (topic, partition, record_offset, record_key, payload)
             SELECT $1, $2, COALESCE(MAX(record_offset) + 1, 0), $3, $4
               FROM bus_records
              WHERE topic = $1 AND partition = $2
             RETURNING record_offset",
        )
        .bind(&record.topic)
        .bind(db_partition(partition))
        .bind(&record.key)
        .bind(&record.payload)
        .fetch_one(&mut *tx)
        .await
        .map_err(unavailable)?;

        tx.commit().await.map_err(unavailable)?;

        let offset = u64::try_from(offset).unwrap_or(0);
        debug!(topic = %record.topic, partition, offset, "record appended");
        Ok(RecordPosition {
            topic: record.topic,
            partition,
            offset,
        })
    }

    async fn subscribe(
        &self,
        spec: SubscriptionSpec,
    ) -> Result<Box<dyn BusSubscription>, BusError> {
        spec.validate()?;
        let mut exact_topics = Vec::new();
        let mut topic_prefixes = Vec::new();
        for pattern in &spec.patterns {
            match pattern {
                TopicPattern::Exact(topic) => exact_topics.push(topic.clone()),
                TopicPattern::Prefix(prefix) => topic_prefixes.push(prefix.clone()),
            }
        }
        Ok(Box::new(PgSubscription {
            spec,
            exact_topics,
            topic_prefixes,
            pool: self.pool.clone(),
            poll_interval: self.poll_interval,
            in_flight: HashSet::new(),
        }))
    }

    async fn prune(&self, older_than: Duration) -> Result<u64, BusError> {
        let result = sqlx::query(
            "DELETE FROM bus_records r
              WHERE r.appended_at < NOW() - make_interval(secs => $1)
                AND r.record_offset < (SELECT MAX(m.record_offset)
                                         FROM bus_records m
                                        WHERE m.topic = r.topic AND m.partition = r.partition)",
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        let pruned = result.rows_affected();
        debug!(pruned, "bus records pruned");
        Ok(pruned)
    }
}

/// One consumer-group member's view of a [`PgBus`].
///
/// Partitions are owned by exactly one member, so the set of outstanding
/// deliveries is tracked locally.
#[derive(Debug)]
pub struct PgSubscription {
    spec: SubscriptionSpec,
    exact_topics: Vec<String>,
    topic_prefixes: Vec<String>,
    pool: PgPool,
    poll_interval: Duration,
    in_flight: HashSet<(String, u32)>,
}

type DueRow = (String, i32, i64, String, Vec<u8>, i32);

impl PgSubscription {
    async fn poll(&mut self) -> Result<Option<Delivery>, BusError> {
        let rows: Vec<DueRow> = sqlx::query_as(
            "SELECT topic, partition, record_offset, record_key, payload, attempts
               FROM (SELECT DISTINCT ON (r.topic, r.partition)
                            r.topic, r.partition, r.record_offset, r.record_key, r.payload,
                            COALESCE(o.attempts, 0) AS attempts, r.appended_at
                       FROM bus_records r
                       LEFT JOIN bus_consumer_offsets o
                         ON o.group_id = $1 AND o.topic = r.topic AND o.partition = r.partition
                      WHERE r.record_offset >= COALESCE(o.next_offset, 0)
                        AND (o.not_before IS NULL OR o.not_before <= NOW())
                        AND r.partition % $3 = $2
                        AND (r.topic = ANY($5::text[])
                             OR EXISTS (SELECT 1 FROM unnest($6::text[]) AS p(prefix)
                                         WHERE starts_with(r.topic, p.prefix)))
                      ORDER BY r.topic, r.partition, r.record_offset) heads
              ORDER BY appended_at
              LIMIT $4",
        )
        .bind(&self.spec.group_id)
        .bind(db_partition(self.spec.member))
        .bind(db_partition(self.spec.members))
        .bind(POLL_BATCH)
        .bind(&self.exact_topics)
        .bind(&self.topic_prefixes)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        for (topic, partition, offset, key, payload, attempts) in rows {
            let partition = u32::try_from(partition).unwrap_or(0);
            let id = (topic, partition);
            if !self.spec.owns(&id.0, partition) || self.in_flight.contains(&id) {
                continue;
            }
            self.in_flight.insert(id.clone());
            return Ok(Some(Delivery {
                topic: id.0,
                partition,
                offset: u64::try_from(offset).unwrap_or(0),
                key,
                payload,
                attempt: u32::try_from(attempts).unwrap_or(0) + 1,
            }));
        }
        Ok(None)
    }

    fn release(&mut self, delivery: &Delivery) -> Result<(), BusError> {
        if self
            .in_flight
            .remove(&(delivery.topic.clone(), delivery.partition))
        {
            Ok(())
        } else {
            Err(BusError::UnknownDelivery {
                topic: delivery.topic.clone(),
                partition: delivery.partition,
                offset: delivery.offset,
            })
        }
    }
}

#[async_trait]
impl BusSubscription for PgSubscription {
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, BusError> {
        loop {
            if self.pool.is_closed() {
                return Ok(None);
            }
            if let Some(delivery) = self.poll().await? {
                return Ok(Some(delivery));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BusError> {
        self.release(delivery)?;
        sqlx::query(
            "INSERT INTO bus_consumer_offsets (group_id, topic, partition, next_offset, attempts, not_before)
             VALUES ($1, $2, $3, $4, 0, NULL)
             ON CONFLICT (group_id, topic, partition) DO UPDATE
                SET next_offset = EXCLUDED.next_offset, attempts = 0, not_before = NULL
              WHERE bus_consumer_offsets.next_offset < EXCLUDED.next_offset",
        )
        .bind(&self.spec.group_id)
        .bind(&delivery.topic)
        .bind(db_partition(delivery.partition))
        .bind(db_offset(delivery.offset + 1))
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn nack(&mut self, delivery: &Delivery, delay: Duration) -> Result<(), BusError> {
        self.release(delivery)?;
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        sqlx::query(
            "INSERT INTO bus_consumer_offsets (group_id, topic, partition, next_offset, attempts, not_before)
             VALUES ($1, $2, $3, $4, 1, NOW() + make_interval(secs => $5::float8 / 1000.0))
             ON CONFLICT (group_id, topic, partition) DO UPDATE
                SET attempts = bus_consumer_offsets.attempts + 1,
                    not_before = EXCLUDED.not_before",
        )
        .bind(&self.spec.group_id)
        .bind(&delivery.topic)
        .bind(db_partition(delivery.partition))
        .bind(db_offset(delivery.offset))
        .bind(delay_ms)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }
}
