mod ancillary;
mod api;
mod config;
mod db;
mod error;
mod ingest;
mod market;
mod scheduler;
mod source;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::IngestHealth;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::EventStore;
use crate::error::Result;
use crate::ingest::Ingestor;
use crate::scheduler::{run_checkpoints, PollTimer, RetryPolicy, RetryScheduler};
use crate::source::BitqueryClient;
use crate::types::EventKind;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let cfg = Arc::new(cfg);

    // --- Database setup ---
    let store = EventStore::open(&cfg.db_path).await?;
    let counts = store.counts().await?;
    info!(
        questions = counts.questions,
        conditions = counts.conditions,
        token_pairs = counts.token_pairs,
        trades = counts.trades,
        "Database ready at {}",
        cfg.db_path
    );

    // --- Event source ---
    let source = Arc::new(BitqueryClient::new(&cfg)?);
    if cfg.bitquery_api_key.is_none() {
        warn!("BITQUERY_API_KEY is not set: ingestion jobs will fail until it is provided");
    }

    // --- Scheduler + ingestion ---
    let health = Arc::new(IngestHealth::new());
    let latency = Arc::new(LatencyStats::new());
    let scheduler = RetryScheduler::new(
        RetryPolicy {
            max_retries: cfg.job_max_retries,
            initial_backoff: cfg.initial_backoff(),
        },
        latency.clone(),
    );
    let ingestor = Ingestor::new(
        source.clone(),
        store.clone(),
        scheduler.clone(),
        health.clone(),
        cfg.clone(),
    );

    ingestor.enqueue_sync_cycle();
    info!("Initial sync cycle queued");

    for kind in EventKind::ALL {
        let period = cfg.poll_interval(kind);
        let timer = PollTimer::new(format!("sync-{kind}"), period, scheduler.clone(), ingestor.kind_job(kind));
        tokio::spawn(timer.run());
        info!(kind = %kind, period_secs = period.as_secs(), "poll timer started");
    }

    tokio::spawn(run_checkpoints(
        store.clone(),
        Duration::from_secs(cfg.checkpoint_interval_secs.max(1)),
    ));

    // --- HTTP API server ---
    let app = router(ApiState {
        store,
        ingestor,
        source,
        health,
        latency,
        quote_symbol: Arc::from(cfg.quote_symbol.as_str()),
    });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
