use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::health::{IngestHealth, KindStatus};
use crate::api::latency::{LatencyStats, LatencySummary};
use crate::db::{EventStore, StoreCounts};
use crate::error::AppError;
use crate::ingest::Ingestor;
use crate::market::{self, MarketDetail, MarketSummary};
use crate::scheduler::SchedulerStats;
use crate::source::{BalanceRecord, EventSource};

pub struct ApiState<S: EventSource> {
    pub store: EventStore,
    pub ingestor: Ingestor<S>,
    pub source: Arc<S>,
    pub health: Arc<IngestHealth>,
    pub latency: Arc<LatencyStats>,
    pub quote_symbol: Arc<str>,
}

impl<S: EventSource> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ingestor: self.ingestor.clone(),
            source: Arc::clone(&self.source),
            health: Arc::clone(&self.health),
            latency: Arc::clone(&self.latency),
            quote_symbol: Arc::clone(&self.quote_symbol),
        }
    }
}

pub fn router<S: EventSource>(state: ApiState<S>) -> Router {
    Router::new()
        .route("/markets", get(get_markets::<S>))
        .route("/markets/:question_id", get(get_market::<S>))
        .route("/markets/:question_id/holders", get(get_holders::<S>))
        .route("/markets/:question_id/sync", post(post_market_sync::<S>))
        .route("/sync", post(post_sync::<S>))
        .route("/admin/reset", post(post_reset::<S>))
        .route("/health", get(get_health::<S>))
        .route("/stats/latency", get(get_stats_latency::<S>))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct MarketsQuery {
    /// Only markets whose token pair has been registered.
    pub registered: Option<bool>,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct MarketQuery {
    /// Cap on returned trades (newest first).
    pub trades: Option<usize>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct AcceptedResponse {
    pub success: bool,
    pub queued: usize,
}

#[derive(Serialize)]
pub struct ResetResponse {
    pub success: bool,
    pub counts: StoreCounts,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub started_at: DateTime<Utc>,
    pub counts: StoreCounts,
    pub scheduler: SchedulerStats,
    pub kinds: BTreeMap<String, KindStatus>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_markets<S: EventSource>(
    State(state): State<ApiState<S>>,
    Query(params): Query<MarketsQuery>,
) -> Result<Json<Vec<MarketSummary>>, AppError> {
    let markets = market::list_markets(&state.store, &state.quote_symbol).await?;
    let markets = markets
        .into_iter()
        .filter(|m| !params.registered.unwrap_or(false) || m.token_pair.is_some())
        .take(params.limit.unwrap_or(usize::MAX))
        .collect();
    Ok(Json(markets))
}

async fn get_market<S: EventSource>(
    State(state): State<ApiState<S>>,
    Path(question_id): Path<String>,
    Query(params): Query<MarketQuery>,
) -> Result<Json<MarketDetail>, AppError> {
    let mut detail = market::get_market(&state.store, &question_id, &state.quote_symbol).await?;
    if let Some(n) = params.trades {
        detail.trades.truncate(n);
    }
    Ok(Json(detail))
}

async fn get_holders<S: EventSource>(
    State(state): State<ApiState<S>>,
    Path(question_id): Path<String>,
) -> Result<Json<Vec<BalanceRecord>>, AppError> {
    let balances = market::holders(&state.store, state.source.as_ref(), &question_id).await?;
    Ok(Json(balances))
}

async fn post_market_sync<S: EventSource>(
    State(state): State<ApiState<S>>,
    Path(question_id): Path<String>,
) -> (StatusCode, Json<AcceptedResponse>) {
    state.ingestor.sync_market(&question_id);
    info!(question_id = %question_id, "on-demand market sync queued");
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            success: true,
            queued: 3,
        }),
    )
}

async fn post_sync<S: EventSource>(State(state): State<ApiState<S>>) -> (StatusCode, Json<AcceptedResponse>) {
    state.ingestor.enqueue_sync_cycle();
    info!("full sync cycle queued");
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            success: true,
            queued: 4,
        }),
    )
}

async fn post_reset<S: EventSource>(State(state): State<ApiState<S>>) -> Result<Json<ResetResponse>, AppError> {
    state.ingestor.reset().await?;
    let counts = state.store.counts().await?;
    Ok(Json(ResetResponse { success: true, counts }))
}

async fn get_health<S: EventSource>(State(state): State<ApiState<S>>) -> Result<Json<HealthResponse>, AppError> {
    let counts = state.store.counts().await?;
    let scheduler = state.ingestor.scheduler().snapshot();
    let kinds = state
        .health
        .all()
        .into_iter()
        .map(|(kind, status)| (kind.to_string(), status))
        .collect();
    let status = if state.health.is_healthy() { "ok" } else { "degraded" };
    Ok(Json(HealthResponse {
        status,
        started_at: state.health.started_at(),
        counts,
        scheduler,
        kinds,
    }))
}

async fn get_stats_latency<S: EventSource>(State(state): State<ApiState<S>>) -> Json<LatencySummary> {
    Json(state.latency.summary())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::Config;
    use crate::db::store::tests::{condition, question, token_pair, trade};
    use crate::scheduler::{RetryPolicy, RetryScheduler};
    use crate::source::testing::MockSource;

    async fn state() -> ApiState<MockSource> {
        let store = EventStore::in_memory().await.unwrap();
        let source = Arc::new(MockSource::new());
        let health = Arc::new(IngestHealth::new());
        let latency = Arc::new(LatencyStats::new());
        let scheduler = RetryScheduler::new(
            RetryPolicy {
                max_retries: 0,
                initial_backoff: Duration::from_millis(10),
            },
            latency.clone(),
        );
        let ingestor = Ingestor::new(
            source.clone(),
            store.clone(),
            scheduler,
            health.clone(),
            Arc::new(Config::default()),
        );
        ApiState {
            store,
            ingestor,
            source,
            health,
            latency,
            quote_symbol: Arc::from("USDC"),
        }
    }

    async fn seed(store: &EventStore) {
        store.insert_question(&question("q1", 0)).await.unwrap();
        store.insert_question(&question("q2", 5)).await.unwrap();
        store.insert_condition(&condition("c1", "q1")).await.unwrap();
        store.insert_token_pair(&token_pair("c1", "100", "200")).await.unwrap();
        for (i, secs) in [30, 40, 50].iter().enumerate() {
            let hash = format!("h{i}");
            store.insert_trade(&trade(&hash, "0", "200", "500000", "1000000", *secs)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn markets_can_be_limited_to_registered_pairs() {
        let st = state().await;
        seed(&st.store).await;

        let Json(all) = get_markets(State(st.clone()), Query(MarketsQuery { registered: None, limit: None }))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let Json(registered) = get_markets(
            State(st.clone()),
            Query(MarketsQuery { registered: Some(true), limit: None }),
        )
        .await
        .unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].question_id, "q1");
        assert_eq!(registered[0].trade_count, 3);
    }

    #[tokio::test]
    async fn market_detail_truncates_trades() {
        let st = state().await;
        seed(&st.store).await;

        let Json(detail) = get_market(State(st), Path("Q1".to_string()), Query(MarketQuery { trades: Some(2) }))
            .await
            .unwrap();
        assert_eq!(detail.trades.len(), 2);
        assert_eq!(detail.summary.trade_count, 3);
        assert_eq!(detail.trades[0].order_hash, "h2");
    }

    #[tokio::test]
    async fn unknown_market_is_404() {
        let st = state().await;
        let err = get_market(State(st), Path("nope".to_string()), Query(MarketQuery { trades: None }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn reset_reports_empty_counts() {
        let st = state().await;
        seed(&st.store).await;

        let Json(resp) = post_reset(State(st.clone())).await.unwrap();
        assert!(resp.success);
        assert_eq!(resp.counts.questions, 0);
        assert_eq!(resp.counts.trades, 0);
        st.ingestor.scheduler().wait_idle().await;
    }

    #[tokio::test]
    async fn health_reports_counts_and_kinds() {
        let st = state().await;
        seed(&st.store).await;
        let (status, _) = post_sync(State(st.clone())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        st.ingestor.scheduler().wait_idle().await;

        let Json(h) = get_health(State(st)).await.unwrap();
        assert_eq!(h.status, "ok");
        assert_eq!(h.counts.questions, 2);
        assert_eq!(h.scheduler.completed, 4);
        assert_eq!(h.kinds.len(), 4);
        assert!(h.kinds.contains_key("trade"));
    }
}
