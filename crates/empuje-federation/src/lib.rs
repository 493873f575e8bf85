//! Empuje Federation — the domain model shared by every organization.
//!
//! Message contracts and their canonical codec, topic routing rules, the
//! lifecycle of materialized records, the federation filter and the store
//! ports. Publishing and consuming live in `empuje-messaging`.

pub mod category;
pub mod codec;
pub mod commands;
pub mod federation;
pub mod messages;
pub mod ports;
pub mod records;
pub mod topics;
