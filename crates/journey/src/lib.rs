//! Journey tracking — the persistent per-(sequence, customer) execution
//! record, its status state machine, and step condition evaluation.

pub mod conditions;
pub mod state_machine;
pub mod store;
pub mod types;

pub use conditions::matches;
pub use state_machine::JourneyStateMachine;
pub use store::JourneyStore;
pub use types::{CustomerJourney, JourneyStatus, SequenceRef};
