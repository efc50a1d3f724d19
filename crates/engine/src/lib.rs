//! Campaign orchestration control surface.
//!
//! `CampaignService` is constructed once at process start with every
//! collaborator injected, so tests substitute fake channels, stores, and
//! clocks freely. All operations are synchronous request/response; step
//! execution happens asynchronously afterward via the scheduler.

pub mod service;

pub use service::{CampaignService, EngagementKind};
