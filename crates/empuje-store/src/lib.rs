//! `PostgreSQL` implementations of the federation store ports.

pub mod pg_event_directory;
pub mod pg_federation_store;
pub mod schema;

pub use pg_event_directory::PgHostedEventDirectory;
pub use pg_federation_store::PgFederationStore;
