//! ReachFlow — campaign orchestration engine for marketplace outreach.
//!
//! Main entry point: initializes storage, delivery channels, the durable
//! step scheduler, and the HTTP control API.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use reach_api::ApiServer;
use reach_audience::{AudienceResolver, InMemoryCustomerStore};
use reach_channels::{InAppMessageChannel, SendGridConfig, SendGridEmailChannel};
use reach_core::channels::DeliveryChannels;
use reach_core::clock::SystemClock;
use reach_core::config::AppConfig;
use reach_core::events::noop_sink;
use reach_engine::CampaignService;
use reach_experiments::ExperimentRegistry;
use reach_scheduler::{SchedulerWorker, StepExecutor};
use reach_store::RedisStore;

#[derive(Parser, Debug)]
#[command(name = "reachflow")]
#[command(about = "Campaign orchestration engine for marketplace outreach")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "REACHFLOW__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "REACHFLOW__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Redis URL (overrides config)
    #[arg(long, env = "REACHFLOW__REDIS__URL")]
    redis_url: Option<String>,

    /// Skip the scheduler worker (API-only mode)
    #[arg(long, default_value_t = false)]
    api_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reachflow=info,reach_scheduler=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("ReachFlow starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(url) = cli.redis_url {
        config.redis.url = url;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        tick_ms = config.scheduler.tick_interval_ms,
        "Configuration loaded"
    );

    // Prometheus exporter for the metrics facade.
    let metrics_addr: std::net::SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
    {
        error!(error = %e, "Failed to start metrics exporter");
    }

    // Durable store: campaigns, journeys, and the pending step schedule.
    let store = Arc::new(RedisStore::connect(&config.redis).await.map_err(|e| {
        error!(error = %e, "Redis connection required");
        anyhow::anyhow!(e.to_string())
    })?);

    // Customer store: in-memory development backend. Deployments swap in
    // the CDP-backed implementation of the same contract.
    let customers = Arc::new(InMemoryCustomerStore::new());
    let resolver = AudienceResolver::new(customers.clone());

    let channels = DeliveryChannels {
        email: Arc::new(SendGridEmailChannel::new(SendGridConfig::default())),
        message: Arc::new(InAppMessageChannel::new()),
    };

    let experiments = Arc::new(ExperimentRegistry::new());
    let events = noop_sink();
    let clock = Arc::new(SystemClock);

    let service = Arc::new(CampaignService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        experiments.clone(),
        resolver,
        events.clone(),
        clock.clone(),
    ));

    if !cli.api_only {
        let executor = Arc::new(StepExecutor::new(
            store.clone(),
            store.clone(),
            store.clone(),
            experiments,
            customers,
            channels,
            events,
            clock,
            config.scheduler.clone(),
        ));
        let worker = Arc::new(SchedulerWorker::new(
            executor,
            store.clone(),
            store.clone(),
            config.scheduler.clone(),
        ));

        // Restart recovery before the first tick: re-derive due entries
        // from persisted journey state.
        match worker.recover().await {
            Ok(restored) => info!(restored, "Schedule recovery complete"),
            Err(e) => error!(error = %e, "Schedule recovery failed"),
        }

        tokio::spawn(async move {
            worker.run().await;
        });
        info!("Scheduler worker running");
    } else {
        info!("Running in API-only mode (no scheduler worker)");
    }

    let api_server = ApiServer::new(config.api.clone(), service, config.node_id.clone());

    info!("ReachFlow is ready");

    api_server.start().await?;

    Ok(())
}
