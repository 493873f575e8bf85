//! Shared test doubles for the Empuje federation workspace.

mod bus;
mod clock;
mod directory;
mod store;

pub use bus::{FailingBus, RecordingBus};
pub use clock::{FixedClock, fixed_now};
pub use directory::StaticEventDirectory;
pub use store::{FailingFederationStore, InMemoryFederationStore};
