use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reach_audience::Audience;
use reach_core::error::{EngineError, EngineResult};

/// A reusable multi-step outreach definition.
///
/// Immutable once active except for status transitions and stat increments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub campaign_type: CampaignType,
    pub status: CampaignStatus,
    pub trigger: Trigger,
    pub steps: Vec<Step>,
    pub audience: Audience,
    pub stats: CampaignStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    Email,
    Message,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

impl CampaignStatus {
    pub fn can_transition(self, to: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, to),
            (Draft, Active) | (Active, Paused) | (Paused, Active) | (Active, Completed) | (Paused, Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
        }
    }
}

/// What causes a customer to enter the campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub trigger_type: TriggerType,
    /// Extra delay between the trigger event and step 0, in hours.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_hours: Option<u32>,
    /// Field/value checks the trigger payload must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<serde_json::Map<String, serde_json::Value>>,
    /// Only for `Scheduled` triggers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl Trigger {
    pub fn manual() -> Self {
        Self {
            trigger_type: TriggerType::Manual,
            delay_hours: None,
            conditions: None,
            scheduled_at: None,
        }
    }

    pub fn event(trigger_type: TriggerType) -> Self {
        Self {
            trigger_type,
            delay_hours: None,
            conditions: None,
            scheduled_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Purchase,
    Signup,
    AbandonedCart,
    Manual,
    Scheduled,
}

/// One unit of content + delay + optional condition within a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    /// Unique, strictly increasing position within the campaign.
    pub order: u32,
    pub step_type: StepType,
    /// Hours since the previous step fired (or since the trigger for step 0).
    pub delay_hours: u32,
    pub content: StepContent,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// Field/value equality checks against the journey's data bag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Email,
    Message,
}

/// Drafted content for a step: a template reference plus the subject and
/// body text produced for it (both may carry `{{variable}}` placeholders).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepContent {
    pub template_id: String,
    pub subject: String,
    pub body: String,
}

/// A standalone day-delayed sequence started explicitly per customer,
/// independent of event triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DripCampaign {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub steps: Vec<DripStep>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DripStep {
    pub id: Uuid,
    pub order: u32,
    pub step_type: StepType,
    /// Days since the previous step fired (or since the start for step 0).
    pub delay_days: u32,
    pub content: StepContent,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Send/engagement counters rolled up on the owning campaign. Updated only
/// through single-field atomic increments on the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignStats {
    pub total_sent: u64,
    pub total_delivered: u64,
    pub total_opened: u64,
    pub total_clicked: u64,
    pub total_converted: u64,
    pub revenue: f64,
}

/// Runtime view of a step, uniform across campaign and drip sequences so
/// the scheduler executes both through one code path.
#[derive(Debug, Clone)]
pub struct SequenceStep {
    pub id: Uuid,
    pub order: u32,
    pub step_type: StepType,
    pub delay: Duration,
    pub content: StepContent,
    pub variables: HashMap<String, String>,
    pub conditions: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Campaign {
    pub fn new(
        name: impl Into<String>,
        campaign_type: CampaignType,
        trigger: Trigger,
        steps: Vec<Step>,
        audience: Audience,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            campaign_type,
            status: CampaignStatus::Draft,
            trigger,
            steps,
            audience,
            stats: CampaignStats::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Step orders must be unique and strictly increasing.
    pub fn validate(&self) -> EngineResult<()> {
        if self.steps.is_empty() {
            return Err(EngineError::Validation(format!(
                "campaign '{}' has no steps",
                self.name
            )));
        }
        for pair in self.steps.windows(2) {
            if pair[1].order <= pair[0].order {
                return Err(EngineError::Validation(format!(
                    "campaign '{}' step orders must be strictly increasing (found {} after {})",
                    self.name, pair[1].order, pair[0].order
                )));
            }
        }
        Ok(())
    }

    pub fn step_at(&self, order: u32) -> Option<SequenceStep> {
        self.steps.iter().find(|s| s.order == order).map(|s| SequenceStep {
            id: s.id,
            order: s.order,
            step_type: s.step_type,
            delay: Duration::hours(i64::from(s.delay_hours)),
            content: s.content.clone(),
            variables: s.variables.clone(),
            conditions: s.conditions.clone(),
        })
    }

    /// The first step order strictly greater than `order`, if any.
    pub fn next_order_after(&self, order: u32) -> Option<u32> {
        self.steps
            .iter()
            .map(|s| s.order)
            .filter(|o| *o > order)
            .min()
    }

    pub fn first_order(&self) -> Option<u32> {
        self.steps.iter().map(|s| s.order).min()
    }
}

impl DripCampaign {
    pub fn new(name: impl Into<String>, description: impl Into<String>, steps: Vec<DripStep>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            steps,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.steps.is_empty() {
            return Err(EngineError::Validation(format!(
                "drip campaign '{}' has no steps",
                self.name
            )));
        }
        for pair in self.steps.windows(2) {
            if pair[1].order <= pair[0].order {
                return Err(EngineError::Validation(format!(
                    "drip campaign '{}' step orders must be strictly increasing",
                    self.name
                )));
            }
        }
        Ok(())
    }

    pub fn step_at(&self, order: u32) -> Option<SequenceStep> {
        self.steps.iter().find(|s| s.order == order).map(|s| SequenceStep {
            id: s.id,
            order: s.order,
            step_type: s.step_type,
            delay: Duration::days(i64::from(s.delay_days)),
            content: s.content.clone(),
            variables: s.variables.clone(),
            conditions: s.conditions.clone(),
        })
    }

    pub fn next_order_after(&self, order: u32) -> Option<u32> {
        self.steps
            .iter()
            .map(|s| s.order)
            .filter(|o| *o > order)
            .min()
    }

    pub fn first_order(&self) -> Option<u32> {
        self.steps.iter().map(|s| s.order).min()
    }
}
