//! The durable "due work" contract.
//!
//! A pending "fire step N of journey J at time T" is a persisted row, not
//! an in-process timer: the worker polls for due entries and claims them
//! atomically, and a restart loses nothing because entries are re-read
//! from storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reach_core::error::EngineResult;
use reach_journey::SequenceRef;

/// One unit of pending scheduled work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub journey_id: Uuid,
    pub sequence: SequenceRef,
    pub customer_id: String,
    /// Order of the step to execute when this entry fires.
    pub step_order: u32,
    pub fire_at: DateTime<Utc>,
    /// Dispatch attempts already made for this step.
    pub attempt: u32,
}

impl ScheduleEntry {
    pub fn new(
        journey_id: Uuid,
        sequence: SequenceRef,
        customer_id: impl Into<String>,
        step_order: u32,
        fire_at: DateTime<Utc>,
    ) -> Self {
        Self {
            journey_id,
            sequence,
            customer_id: customer_id.into(),
            step_order,
            fire_at,
            attempt: 0,
        }
    }
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Persist a pending entry.
    async fn enqueue(&self, entry: &ScheduleEntry) -> EngineResult<()>;

    /// Atomically claim up to `limit` entries due at or before `now`.
    /// A claimed entry is removed from the store; two concurrent workers
    /// can never both claim the same entry.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<ScheduleEntry>>;

    /// Drop all pending entries for a journey (unsubscribe/pause).
    /// Returns the number removed.
    async fn cancel_journey(&self, journey_id: Uuid) -> EngineResult<usize>;

    /// Whether the journey has any pending entry (recovery scan).
    async fn has_pending(&self, journey_id: Uuid) -> EngineResult<bool>;
}
