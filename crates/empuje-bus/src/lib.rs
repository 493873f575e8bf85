//! Empuje Bus — adapters for the federation's partitioned message log.
//!
//! `InMemoryBus` keeps every topic in process memory and serves tests and
//! single-process deployments. `PgBus` stores the log and consumer-group
//! offsets in `PostgreSQL`, so several processes can share one bus.

pub mod memory;
pub mod postgres;
pub mod schema;

pub use memory::InMemoryBus;
pub use postgres::PgBus;

use sha2::{Digest, Sha256};

/// Partition count used when none is configured.
pub const DEFAULT_PARTITIONS: u32 = 6;

/// Maps a partition key to a partition index.
///
/// Uses the first four bytes of the key's SHA-256 digest, so the mapping is
/// identical across processes, platforms and releases. A partition count of
/// zero is treated as one.
#[must_use]
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    prefix % partitions.max(1)
}
