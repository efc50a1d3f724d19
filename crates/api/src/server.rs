//! HTTP server wiring the REST routes to the campaign service.

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use reach_core::config::ApiConfig;
use reach_engine::CampaignService;

use crate::rest::{self, AppState};

pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiConfig, service: Arc<CampaignService>, node_id: String) -> Self {
        Self {
            config,
            state: AppState {
                service,
                node_id,
                start_time: Instant::now(),
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/v1/campaigns", post(rest::create_campaign).get(rest::list_campaigns))
            .route("/v1/campaigns/:id", get(rest::get_campaign))
            .route("/v1/campaigns/:id/start", post(rest::start_campaign))
            .route("/v1/campaigns/:id/pause", post(rest::pause_campaign))
            .route("/v1/campaigns/:id/stats", get(rest::get_campaign_stats))
            .route("/v1/campaigns/:id/execute", post(rest::execute_campaign))
            .route(
                "/v1/campaigns/:id/engagement",
                post(rest::record_engagement),
            )
            .route(
                "/v1/campaigns/:id/journeys/:customer_id",
                get(rest::get_campaign_journey),
            )
            .route("/v1/drips", post(rest::create_drip))
            .route("/v1/drips/:id/start", post(rest::start_drip))
            .route("/v1/journeys/:id/pause", post(rest::pause_journey))
            .route("/v1/journeys/:id/resume", post(rest::resume_journey))
            .route(
                "/v1/journeys/:id/unsubscribe",
                post(rest::unsubscribe_journey),
            )
            .route("/health", get(rest::health_check))
            .route("/ready", get(rest::readiness))
            .route("/live", get(rest::liveness))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until shutdown.
    pub async fn start(&self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.http_port);
        info!(addr = %addr, "HTTP control API listening");
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}
