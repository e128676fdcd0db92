//! Engage server: event-driven engagement rule matching over HTTP.
//!
//! Wires the rule catalog, frequency store, matcher, delivery log and
//! analytics, then serves the REST API and Prometheus metrics.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, ValueEnum};
use engage_analytics::{AnalyticsAggregator, DeliveryRecorder, InMemoryDeliveryStore};
use engage_api::{ApiServer, AppState};
use engage_cache::{LocalFrequencyStore, RedisFrequencyStore};
use engage_core::catalog::RuleCatalog;
use engage_core::config::{AppConfig, FrequencyBackend};
use engage_core::store::{DeliveryStore, FrequencyStore};
use engage_engine::{EngagementEngine, RuleMatcher};
use engage_frequency::{FrequencyLimiter, LimiterSettings};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Memory,
    Redis,
}

impl From<BackendArg> for FrequencyBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Memory => FrequencyBackend::Memory,
            BackendArg::Redis => FrequencyBackend::Redis,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "engage-server")]
#[command(about = "Event-driven engagement rule engine")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "ENGAGE__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "ENGAGE__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Prometheus exporter port (overrides config)
    #[arg(long, env = "ENGAGE__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// Engagement rules JSON file (overrides config)
    #[arg(long, env = "ENGAGE__RULES__PATH")]
    rules: Option<PathBuf>,

    /// Frequency counter backend (overrides config)
    #[arg(long, value_enum)]
    frequency_backend: Option<BackendArg>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "engage_server=info,engage_engine=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Engage server starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }
    if let Some(path) = cli.rules {
        config.rules.path = path.to_string_lossy().into_owned();
    }
    if let Some(backend) = cli.frequency_backend {
        config.frequency.backend = backend.into();
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        backend = ?config.frequency.backend,
        rules_path = %config.rules.path,
        "Configuration loaded"
    );

    // Frequency counters
    let frequency_store: Arc<dyn FrequencyStore> = match config.frequency.backend {
        FrequencyBackend::Redis => Arc::new(
            RedisFrequencyStore::new(&config.redis)
                .await
                .context("Redis frequency backend selected but unreachable")?,
        ),
        FrequencyBackend::Memory => {
            let local = Arc::new(LocalFrequencyStore::new());
            spawn_eviction(
                local.clone(),
                Duration::from_secs(config.frequency.eviction_interval_secs),
            );
            local
        }
    };
    let limiter = Arc::new(FrequencyLimiter::new(
        frequency_store,
        LimiterSettings::from(&config.frequency),
    ));

    // Rule catalog
    let catalog = Arc::new(RuleCatalog::new());
    if !config.rules.path.is_empty() {
        let path = PathBuf::from(&config.rules.path);
        match catalog.load_from_path(&path).await {
            Ok(report) => info!(
                loaded = report.loaded,
                rejected = report.rejected.len(),
                "Engagement rules loaded"
            ),
            Err(e) => error!(error = %e, path = %path.display(), "Failed to load engagement rules"),
        }
        if config.rules.refresh_interval_secs > 0 {
            catalog.clone().spawn_refresh(
                path,
                Duration::from_secs(config.rules.refresh_interval_secs),
            );
        }
    } else {
        info!("No rules file configured, waiting for PUT /v1/rules");
    }

    // Matching, delivery log and analytics
    let deliveries: Arc<dyn DeliveryStore> = Arc::new(InMemoryDeliveryStore::new());
    let matcher = Arc::new(RuleMatcher::new(catalog.clone(), limiter));
    let recorder = Arc::new(DeliveryRecorder::new(deliveries.clone()));
    let engine = Arc::new(EngagementEngine::new(matcher, recorder));
    let aggregator = Arc::new(AnalyticsAggregator::new(deliveries, catalog.clone()));

    let ready = Arc::new(AtomicBool::new(false));
    let state = AppState {
        engine,
        aggregator,
        catalog,
        analytics: config.analytics.clone(),
        node_id: config.node_id.clone(),
        start_time: Instant::now(),
        ready: ready.clone(),
    };
    let api_server = ApiServer::new(config.clone(), state);

    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    ready.store(true, Ordering::Release);
    info!("Engage server is ready to serve traffic");

    // Blocks until shutdown
    api_server.start_http().await?;

    Ok(())
}

/// Drop counters whose period bucket has ended.
fn spawn_eviction(store: Arc<LocalFrequencyStore>, interval: Duration) {
    if interval.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let evicted = store.evict_expired(Utc::now());
            if evicted > 0 {
                info!(evicted, remaining = store.len(), "Evicted expired frequency counters");
            }
        }
    });
}
