//! Engine event sink — trait for emitting orchestration events.
//!
//! Components accept an `Arc<dyn EventSink>` to emit journey and dispatch
//! events toward whatever pipeline the host wires up (analytics export,
//! webhooks). The engine itself only depends on the trait.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineEventType {
    CampaignCreated,
    CampaignStarted,
    CampaignPaused,
    JourneyStarted,
    JourneyPaused,
    JourneyResumed,
    JourneyUnsubscribed,
    JourneyCompleted,
    StepDispatched,
    StepSkipped,
    StepRetried,
    StepFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub event_id: Uuid,
    pub event_type: EngineEventType,
    pub campaign_id: Option<Uuid>,
    pub journey_id: Option<Uuid>,
    pub customer_id: Option<String>,
    pub step_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// No-op sink for modules that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: EngineEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().expect("event sink mutex poisoned").clone()
    }

    pub fn count_type(&self, event_type: EngineEventType) -> usize {
        self.events
            .lock()
            .expect("event sink mutex poisoned")
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().expect("event sink mutex poisoned").push(event);
    }
}

/// Convenience builder for `EngineEvent` with minimal boilerplate.
pub fn make_event(
    event_type: EngineEventType,
    campaign_id: Option<Uuid>,
    journey_id: Option<Uuid>,
    customer_id: Option<String>,
    step_id: Option<Uuid>,
) -> EngineEvent {
    EngineEvent {
        event_id: Uuid::new_v4(),
        event_type,
        campaign_id,
        journey_id,
        customer_id,
        step_id,
        timestamp: Utc::now(),
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
