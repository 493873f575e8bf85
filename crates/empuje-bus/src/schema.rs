//! Bus database schema.
//!
//! The bus may live in its own database, so its tables are created by
//! [`PgBus::ensure_schema`](crate::PgBus::ensure_schema) rather than by the
//! workspace migrations.

/// SQL to create the partitioned record log.
pub const CREATE_BUS_RECORDS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS bus_records (
    topic         TEXT        NOT NULL,
    partition     INTEGER     NOT NULL,
    record_offset BIGINT      NOT NULL,
    record_key    TEXT        NOT NULL,
    payload       BYTEA       NOT NULL,
    appended_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (topic, partition, record_offset)
);

CREATE INDEX IF NOT EXISTS idx_bus_records_appended_at
    ON bus_records (appended_at);
";

/// SQL to create the consumer-group offset table.
pub const CREATE_BUS_CONSUMER_OFFSETS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS bus_consumer_offsets (
    group_id    TEXT        NOT NULL,
    topic       TEXT        NOT NULL,
    partition   INTEGER     NOT NULL,
    next_offset BIGINT      NOT NULL,
    attempts    INTEGER     NOT NULL DEFAULT 0,
    not_before  TIMESTAMPTZ,
    PRIMARY KEY (group_id, topic, partition)
);
";
