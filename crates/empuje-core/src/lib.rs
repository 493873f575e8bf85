//! Empuje Core — shared abstractions for the federation synchronization layer.
//!
//! This crate defines the ports that every other crate depends on: the
//! message bus, the clock, the organization registry and the error taxonomy.
//! It contains no infrastructure code.

pub mod bus;
pub mod clock;
pub mod error;
pub mod registry;
