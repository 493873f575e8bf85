//! Empuje Messaging — inter-organization synchronization.
//!
//! Publishes federation messages, consumes them idempotently, reconciles the
//! two sides of donation transfers and admits foreign volunteer events into
//! the local federation view.

pub mod application;

pub use empuje_federation as domain;
