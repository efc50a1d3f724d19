use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reach_core::error::{EngineError, EngineResult};

/// Which sequence a journey progresses through: an event/manual campaign
/// (hour-delayed steps) or a standalone drip campaign (day-delayed steps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum SequenceRef {
    Campaign(Uuid),
    Drip(Uuid),
}

impl SequenceRef {
    pub fn id(&self) -> Uuid {
        match self {
            SequenceRef::Campaign(id) | SequenceRef::Drip(id) => *id,
        }
    }

    /// Stable key component for (sequence, customer) uniqueness indexes.
    pub fn key(&self) -> String {
        match self {
            SequenceRef::Campaign(id) => format!("campaign:{id}"),
            SequenceRef::Drip(id) => format!("drip:{id}"),
        }
    }
}

/// Runtime status of a journey.
///
/// `Completed` and `Unsubscribed` are terminal: no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JourneyStatus {
    Active,
    Completed,
    Paused,
    Unsubscribed,
}

impl JourneyStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JourneyStatus::Completed | JourneyStatus::Unsubscribed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JourneyStatus::Active => "active",
            JourneyStatus::Completed => "completed",
            JourneyStatus::Paused => "paused",
            JourneyStatus::Unsubscribed => "unsubscribed",
        }
    }
}

/// The mutable execution record of one customer progressing through one
/// sequence.
///
/// Invariants: at most one non-terminal journey exists per
/// (sequence, customer) pair; `completed_steps` never holds a step id
/// twice; `current_step` only increases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerJourney {
    pub id: Uuid,
    pub sequence: SequenceRef,
    pub customer_id: String,
    /// Order of the next step to execute within the owning sequence.
    pub current_step: u32,
    pub status: JourneyStatus,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Step ids already handled (dispatched or deliberately skipped).
    /// Used for idempotence against replayed delivery confirmations.
    pub completed_steps: Vec<Uuid>,
    /// Trigger context plus variables accumulated along the way.
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl CustomerJourney {
    pub fn new(
        sequence: SequenceRef,
        customer_id: impl Into<String>,
        first_step: u32,
        data: serde_json::Map<String, serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            customer_id: customer_id.into(),
            current_step: first_step,
            status: JourneyStatus::Active,
            started_at: now,
            last_activity: now,
            completed_steps: Vec::new(),
            data,
        }
    }

    /// Record a handled step (dispatched or skipped) and move
    /// `current_step` past it. Idempotent: a replay for an already-recorded
    /// step id neither duplicates the entry nor rewinds progress.
    pub fn record_step(&mut self, step_id: Uuid, step_order: u32, now: DateTime<Utc>) {
        if !self.completed_steps.contains(&step_id) {
            self.completed_steps.push(step_id);
        }
        // current_step only increases.
        self.current_step = self.current_step.max(step_order + 1);
        self.last_activity = now;
    }

    /// Attempt a status transition, enforcing the journey state machine.
    pub fn transition(&mut self, to: JourneyStatus, now: DateTime<Utc>) -> EngineResult<()> {
        if !crate::state_machine::can_transition(self.status, to) {
            return Err(EngineError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.status = to;
        self.last_activity = now;
        Ok(())
    }
}
