//! Application layer: publishing, consuming and querying the federation view.

pub mod consumers;
pub mod dispatcher;
pub mod guard;
pub mod publishers;
pub mod query_handlers;
pub mod reconciler;
