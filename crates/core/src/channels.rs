//! Delivery-channel contracts consumed by the step scheduler.
//!
//! The engine never talks to a provider directly; it dispatches through
//! these traits so the transactional email sender and the in-app message
//! sender stay external collaborators. Every send carries a stable
//! idempotency key (`journeyId:stepId`) so a retried dispatch cannot be
//! delivered twice downstream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Provider acknowledgement for an accepted dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub provider_message_id: String,
    pub accepted_at: DateTime<Utc>,
}

#[async_trait]
pub trait EmailChannel: Send + Sync {
    async fn send(
        &self,
        to_address: &str,
        subject: &str,
        body: &str,
        variables: &HashMap<String, String>,
        idempotency_key: &str,
    ) -> EngineResult<DispatchReceipt>;
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send(
        &self,
        customer_id: &str,
        subject: &str,
        body: &str,
        idempotency_key: &str,
    ) -> EngineResult<DispatchReceipt>;
}

/// Both outbound channels bundled for injection into the scheduler.
#[derive(Clone)]
pub struct DeliveryChannels {
    pub email: Arc<dyn EmailChannel>,
    pub message: Arc<dyn MessageChannel>,
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Accepts every send and delivers nothing. For wiring paths that need a
/// channel but must not reach customers (dry runs, disabled channels).
pub struct NoopChannel;

#[async_trait]
impl EmailChannel for NoopChannel {
    async fn send(
        &self,
        _to_address: &str,
        _subject: &str,
        _body: &str,
        _variables: &HashMap<String, String>,
        _idempotency_key: &str,
    ) -> EngineResult<DispatchReceipt> {
        Ok(DispatchReceipt {
            provider_message_id: format!("noop-{}", uuid::Uuid::new_v4()),
            accepted_at: Utc::now(),
        })
    }
}

#[async_trait]
impl MessageChannel for NoopChannel {
    async fn send(
        &self,
        _customer_id: &str,
        _subject: &str,
        _body: &str,
        _idempotency_key: &str,
    ) -> EngineResult<DispatchReceipt> {
        Ok(DispatchReceipt {
            provider_message_id: format!("noop-{}", uuid::Uuid::new_v4()),
            accepted_at: Utc::now(),
        })
    }
}

/// One recorded dispatch from a `CaptureChannel`.
#[derive(Debug, Clone)]
pub struct CapturedDispatch {
    pub channel: &'static str,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub idempotency_key: String,
}

/// In-memory channel that records every dispatch, for tests. Can be
/// scripted to fail the first N sends to exercise the retry path.
#[derive(Default)]
pub struct CaptureChannel {
    dispatches: Mutex<Vec<CapturedDispatch>>,
    fail_remaining: AtomicU32,
}

impl CaptureChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` sends return `DispatchFailure`.
    pub fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn dispatches(&self) -> Vec<CapturedDispatch> {
        self.dispatches.lock().expect("channel mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.dispatches.lock().expect("channel mutex poisoned").len()
    }

    fn record(
        &self,
        channel: &'static str,
        recipient: &str,
        subject: &str,
        body: &str,
        idempotency_key: &str,
    ) -> EngineResult<DispatchReceipt> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EngineError::DispatchFailure(
                "scripted channel failure".to_string(),
            ));
        }

        self.dispatches
            .lock()
            .expect("channel mutex poisoned")
            .push(CapturedDispatch {
                channel,
                recipient: recipient.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
                idempotency_key: idempotency_key.to_string(),
            });

        Ok(DispatchReceipt {
            provider_message_id: format!("capture-{}", uuid::Uuid::new_v4()),
            accepted_at: Utc::now(),
        })
    }
}

#[async_trait]
impl EmailChannel for CaptureChannel {
    async fn send(
        &self,
        to_address: &str,
        subject: &str,
        body: &str,
        _variables: &HashMap<String, String>,
        idempotency_key: &str,
    ) -> EngineResult<DispatchReceipt> {
        self.record("email", to_address, subject, body, idempotency_key)
    }
}

#[async_trait]
impl MessageChannel for CaptureChannel {
    async fn send(
        &self,
        customer_id: &str,
        subject: &str,
        body: &str,
        idempotency_key: &str,
    ) -> EngineResult<DispatchReceipt> {
        self.record("message", customer_id, subject, body, idempotency_key)
    }
}

/// Convenience: a channel pair backed by a single capture channel.
pub fn capture_channels() -> (Arc<CaptureChannel>, DeliveryChannels) {
    let capture = CaptureChannel::new();
    let channels = DeliveryChannels {
        email: capture.clone(),
        message: capture.clone(),
    };
    (capture, channels)
}
