//! Campaign registry storage contract.
//!
//! Stat updates are single-field atomic increments: implementations must
//! never rehydrate a whole `CampaignStats` record in application memory to
//! apply a counter bump, so concurrent step completions for the same
//! campaign cannot lose updates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reach_core::error::EngineResult;

use crate::types::{Campaign, CampaignStats, CampaignStatus, DripCampaign};

/// One counter inside `CampaignStats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatField {
    Sent,
    Delivered,
    Opened,
    Clicked,
    Converted,
}

impl StatField {
    pub fn as_str(self) -> &'static str {
        match self {
            StatField::Sent => "total_sent",
            StatField::Delivered => "total_delivered",
            StatField::Opened => "total_opened",
            StatField::Clicked => "total_clicked",
            StatField::Converted => "total_converted",
        }
    }
}

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert_campaign(&self, campaign: &Campaign) -> EngineResult<()>;

    async fn get_campaign(&self, id: Uuid) -> EngineResult<Option<Campaign>>;

    async fn list_campaigns(&self) -> EngineResult<Vec<Campaign>>;

    /// Persist a status transition. Validity is checked by the caller
    /// against `CampaignStatus::can_transition`.
    async fn update_campaign_status(&self, id: Uuid, status: CampaignStatus) -> EngineResult<()>;

    async fn insert_drip_campaign(&self, drip: &DripCampaign) -> EngineResult<()>;

    async fn get_drip_campaign(&self, id: Uuid) -> EngineResult<Option<DripCampaign>>;

    async fn set_drip_active(&self, id: Uuid, is_active: bool) -> EngineResult<()>;

    /// Atomic counter bump for one stats field.
    async fn increment_stat(&self, id: Uuid, field: StatField, delta: u64) -> EngineResult<()>;

    /// Atomic revenue accumulation (conversion attribution).
    async fn add_revenue(&self, id: Uuid, amount: f64) -> EngineResult<()>;

    async fn get_stats(&self, id: Uuid) -> EngineResult<Option<CampaignStats>>;
}
