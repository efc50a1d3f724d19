//! Durable step scheduler — claims persisted schedule entries when they
//! come due, executes the journey's current step, and schedules the next.

pub mod backoff;
pub mod executor;
pub mod worker;

pub use executor::{StepExecutor, StepOutcome};
pub use worker::SchedulerWorker;
