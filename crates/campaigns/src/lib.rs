//! Campaign and drip-campaign definitions, stats aggregation contract, and
//! the campaign registry storage trait.

pub mod store;
pub mod templates;
pub mod types;

pub use store::{CampaignStore, StatField};
pub use types::{
    Campaign, CampaignStats, CampaignStatus, CampaignType, DripCampaign, DripStep, SequenceStep,
    Step, StepContent, StepType, Trigger, TriggerType,
};
