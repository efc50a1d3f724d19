//! In-app messaging channel — delivers to a per-customer inbox the host
//! application drains when the customer next opens the app.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use reach_core::channels::{DispatchReceipt, MessageChannel};
use reach_core::error::EngineResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InAppMessage {
    pub id: Uuid,
    pub customer_id: String,
    pub subject: String,
    pub body: String,
    pub idempotency_key: String,
    pub delivered_at: DateTime<Utc>,
    pub read: bool,
}

/// In-app message channel backed by per-customer inboxes.
pub struct InAppMessageChannel {
    inboxes: DashMap<String, Vec<InAppMessage>>,
}

impl InAppMessageChannel {
    pub fn new() -> Self {
        Self {
            inboxes: DashMap::new(),
        }
    }

    /// Unread messages for a customer, oldest first.
    pub fn inbox(&self, customer_id: &str) -> Vec<InAppMessage> {
        self.inboxes
            .get(customer_id)
            .map(|msgs| msgs.iter().filter(|m| !m.read).cloned().collect())
            .unwrap_or_default()
    }

    pub fn mark_read(&self, customer_id: &str, message_id: Uuid) -> bool {
        if let Some(mut msgs) = self.inboxes.get_mut(customer_id) {
            if let Some(msg) = msgs.iter_mut().find(|m| m.id == message_id) {
                msg.read = true;
                return true;
            }
        }
        false
    }
}

impl Default for InAppMessageChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageChannel for InAppMessageChannel {
    async fn send(
        &self,
        customer_id: &str,
        subject: &str,
        body: &str,
        idempotency_key: &str,
    ) -> EngineResult<DispatchReceipt> {
        let mut inbox = self.inboxes.entry(customer_id.to_string()).or_default();

        // Retried sends carry the same key; deliver at most once.
        if let Some(existing) = inbox.iter().find(|m| m.idempotency_key == idempotency_key) {
            debug!(customer_id, key = %idempotency_key, "Duplicate in-app send suppressed");
            return Ok(DispatchReceipt {
                provider_message_id: existing.id.to_string(),
                accepted_at: existing.delivered_at,
            });
        }

        metrics::counter!("channels.in_app_sent").increment(1);

        let message = InAppMessage {
            id: Uuid::new_v4(),
            customer_id: customer_id.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            idempotency_key: idempotency_key.to_string(),
            delivered_at: Utc::now(),
            read: false,
        };
        let receipt = DispatchReceipt {
            provider_message_id: message.id.to_string(),
            accepted_at: message.delivered_at,
        };
        inbox.push(message);
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inbox_delivery_and_read() {
        let channel = InAppMessageChannel::new();
        channel
            .send("cust-1", "Welcome", "Hello there", "j1:s1")
            .await
            .unwrap();

        let inbox = channel.inbox("cust-1");
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].subject, "Welcome");

        assert!(channel.mark_read("cust-1", inbox[0].id));
        assert!(channel.inbox("cust-1").is_empty());
    }

    #[tokio::test]
    async fn test_idempotent_redelivery() {
        let channel = InAppMessageChannel::new();
        let first = channel
            .send("cust-1", "Welcome", "Hello", "j1:s1")
            .await
            .unwrap();
        let second = channel
            .send("cust-1", "Welcome", "Hello", "j1:s1")
            .await
            .unwrap();

        assert_eq!(first.provider_message_id, second.provider_message_id);
        assert_eq!(channel.inbox("cust-1").len(), 1);
    }
}
