//! REST handlers for campaign, drip, and journey control operations.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use reach_audience::Audience;
use reach_campaigns::{Campaign, CampaignStats, CampaignType, DripCampaign, DripStep, Step, Trigger};
use reach_core::error::EngineError;
use reach_engine::{CampaignService, EngagementKind};
use reach_journey::{CustomerJourney, SequenceRef};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CampaignService>,
    pub node_id: String,
    pub start_time: Instant,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn map_error(err: EngineError) -> ApiError {
    let (status, code) = match &err {
        EngineError::CampaignNotFound(_)
        | EngineError::DripCampaignNotFound(_)
        | EngineError::JourneyNotFound(_)
        | EngineError::ExperimentNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        EngineError::DuplicateJourney { .. } => (StatusCode::CONFLICT, "duplicate_journey"),
        EngineError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
        EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        EngineError::AudienceResolutionFailure(_) => {
            (StatusCode::BAD_GATEWAY, "audience_resolution_failed")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(error = %err, "Request failed");
        metrics::counter!("api.errors").increment(1);
    }
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message: err.to_string(),
        }),
    )
}

// ─── Campaigns ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub campaign_type: CampaignType,
    pub trigger: Trigger,
    pub steps: Vec<Step>,
    pub audience: Audience,
}

/// POST /v1/campaigns
pub async fn create_campaign(
    State(state): State<AppState>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<Json<Campaign>, ApiError> {
    let campaign = Campaign::new(req.name, req.campaign_type, req.trigger, req.steps, req.audience);
    state
        .service
        .create_campaign(campaign)
        .await
        .map(Json)
        .map_err(map_error)
}

/// GET /v1/campaigns
pub async fn list_campaigns(
    State(state): State<AppState>,
) -> Result<Json<Vec<Campaign>>, ApiError> {
    state
        .service
        .list_campaigns()
        .await
        .map(Json)
        .map_err(map_error)
}

/// GET /v1/campaigns/:id
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    state
        .service
        .get_campaign(id)
        .await
        .map(Json)
        .map_err(map_error)
}

/// POST /v1/campaigns/:id/start
pub async fn start_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    state
        .service
        .start_campaign(id)
        .await
        .map(Json)
        .map_err(map_error)
}

/// POST /v1/campaigns/:id/pause
pub async fn pause_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, ApiError> {
    state
        .service
        .pause_campaign(id)
        .await
        .map(Json)
        .map_err(map_error)
}

/// GET /v1/campaigns/:id/stats
pub async fn get_campaign_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignStats>, ApiError> {
    state
        .service
        .get_campaign_stats(id)
        .await
        .map(Json)
        .map_err(map_error)
}

#[derive(Deserialize)]
pub struct ExecuteRequest {
    pub customer_id: String,
    #[serde(default)]
    pub trigger_data: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
pub struct ExecuteResponse {
    /// `None` when the trigger conditions rejected the event.
    pub journey_id: Option<Uuid>,
}

/// POST /v1/campaigns/:id/execute
pub async fn execute_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    state
        .service
        .execute_campaign_for_customer(id, &req.customer_id, req.trigger_data)
        .await
        .map(|journey_id| Json(ExecuteResponse { journey_id }))
        .map_err(map_error)
}

/// GET /v1/campaigns/:id/journeys/:customer_id
pub async fn get_campaign_journey(
    State(state): State<AppState>,
    Path((id, customer_id)): Path<(Uuid, String)>,
) -> Result<Json<CustomerJourney>, ApiError> {
    state
        .service
        .get_journey(SequenceRef::Campaign(id), &customer_id)
        .await
        .map(Json)
        .map_err(map_error)
}

// ─── Drip campaigns ────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateDripRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<DripStep>,
}

/// POST /v1/drips
pub async fn create_drip(
    State(state): State<AppState>,
    Json(req): Json<CreateDripRequest>,
) -> Result<Json<DripCampaign>, ApiError> {
    let drip = DripCampaign::new(req.name, req.description, req.steps);
    state
        .service
        .create_drip_campaign(drip)
        .await
        .map(Json)
        .map_err(map_error)
}

#[derive(Deserialize)]
pub struct StartDripRequest {
    pub customer_id: String,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
pub struct StartDripResponse {
    pub journey_id: Uuid,
}

/// POST /v1/drips/:id/start
pub async fn start_drip(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StartDripRequest>,
) -> Result<Json<StartDripResponse>, ApiError> {
    state
        .service
        .start_drip_campaign(id, &req.customer_id, req.data)
        .await
        .map(|journey_id| Json(StartDripResponse { journey_id }))
        .map_err(map_error)
}

// ─── Journeys ──────────────────────────────────────────────────────────────

/// POST /v1/journeys/:id/pause
pub async fn pause_journey(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .pause_journey(id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(map_error)
}

/// POST /v1/journeys/:id/resume
pub async fn resume_journey(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .resume_journey(id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(map_error)
}

/// POST /v1/journeys/:id/unsubscribe
pub async fn unsubscribe_journey(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .unsubscribe_journey(id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(map_error)
}

// ─── Engagement ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct EngagementRequest {
    pub customer_id: String,
    #[serde(default)]
    pub step_id: Option<Uuid>,
    pub kind: EngagementKind,
    #[serde(default)]
    pub revenue: Option<f64>,
}

/// POST /v1/campaigns/:id/engagement
pub async fn record_engagement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<EngagementRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .record_engagement(id, &req.customer_id, req.step_id, req.kind, req.revenue)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(map_error)
}

// ─── Probes ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.start_time.elapsed().as_secs() > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
