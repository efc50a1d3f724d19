//! Journey lifecycle guard — the finite set of valid status transitions.
//!
//! `active → completed`, `active ⇄ paused`, `{active, paused} → unsubscribed`.
//! Nothing leaves `completed` or `unsubscribed`.

use serde::{Deserialize, Serialize};

use reach_core::error::{EngineError, EngineResult};

use crate::types::JourneyStatus;

/// Returns `true` if `from → to` is a permitted transition.
pub fn can_transition(from: JourneyStatus, to: JourneyStatus) -> bool {
    use JourneyStatus::*;
    matches!(
        (from, to),
        (Active, Completed)
            | (Active, Paused)
            | (Paused, Active)
            | (Active, Unsubscribed)
            | (Paused, Unsubscribed)
    )
}

/// Stateful wrapper used where a transition sequence is validated
/// independently of a stored journey record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyStateMachine {
    pub state: JourneyStatus,
}

impl JourneyStateMachine {
    pub fn new() -> Self {
        Self {
            state: JourneyStatus::Active,
        }
    }

    pub fn transition(&mut self, to: JourneyStatus) -> EngineResult<()> {
        if can_transition(self.state, to) {
            self.state = to;
            Ok(())
        } else {
            Err(EngineError::InvalidTransition {
                from: self.state.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }
}

impl Default for JourneyStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
