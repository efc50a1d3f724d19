//! Journey storage contract.
//!
//! Keyed by (sequence, customer). The engine guarantees a single writer
//! per journey id (the scheduler's in-flight guard), so `update` may write
//! the whole record; `insert` is where the one-non-terminal-journey-per-pair
//! invariant is enforced.

use async_trait::async_trait;
use uuid::Uuid;

use reach_core::error::EngineResult;

use crate::types::{CustomerJourney, SequenceRef};

#[async_trait]
pub trait JourneyStore: Send + Sync {
    /// Insert a new journey. Fails with `DuplicateJourney` when a
    /// non-terminal journey already exists for the (sequence, customer)
    /// pair; the existing journey is left untouched.
    async fn insert(&self, journey: &CustomerJourney) -> EngineResult<()>;

    async fn get(&self, id: Uuid) -> EngineResult<Option<CustomerJourney>>;

    /// The current (most recent) journey for a pair, if any.
    async fn find(
        &self,
        sequence: &SequenceRef,
        customer_id: &str,
    ) -> EngineResult<Option<CustomerJourney>>;

    /// Write back a journey after mutation. Implementations release the
    /// (sequence, customer) uniqueness slot when the record is terminal.
    async fn update(&self, journey: &CustomerJourney) -> EngineResult<()>;

    /// Every non-terminal journey — the recovery scan after a restart.
    async fn list_non_terminal(&self) -> EngineResult<Vec<CustomerJourney>>;

    /// Non-terminal journeys belonging to one sequence (used when a paused
    /// campaign is resumed).
    async fn list_non_terminal_for_sequence(
        &self,
        sequence: &SequenceRef,
    ) -> EngineResult<Vec<CustomerJourney>>;
}
