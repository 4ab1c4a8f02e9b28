//! Ingestion jobs: fetch one kind of event, parse it, write it idempotently.
//!
//! Periodic jobs read a trailing `sync_window_hours` window. On-demand jobs
//! target a single market over `on_demand_window_hours` and look up their
//! parent rows in the store when they run, not when they are queued.

pub mod parse;

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::api::health::IngestHealth;
use crate::config::Config;
use crate::db::EventStore;
use crate::error::Result;
use crate::market::matcher::{is_quote_currency, normalize_id};
use crate::scheduler::{job, JobFn, RetryScheduler};
use crate::source::{ArgumentFilter, EventQuery, EventSource, RawEvent};
use crate::types::{EventKind, IngestReport};

pub struct Ingestor<S: EventSource> {
    source: Arc<S>,
    store: EventStore,
    scheduler: RetryScheduler,
    health: Arc<IngestHealth>,
    cfg: Arc<Config>,
}

impl<S: EventSource> Clone for Ingestor<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            store: self.store.clone(),
            scheduler: self.scheduler.clone(),
            health: Arc::clone(&self.health),
            cfg: Arc::clone(&self.cfg),
        }
    }
}

impl<S: EventSource> Ingestor<S> {
    pub fn new(
        source: Arc<S>,
        store: EventStore,
        scheduler: RetryScheduler,
        health: Arc<IngestHealth>,
        cfg: Arc<Config>,
    ) -> Self {
        Self {
            source,
            store,
            scheduler,
            health,
            cfg,
        }
    }

    pub fn scheduler(&self) -> &RetryScheduler {
        &self.scheduler
    }

    fn contract(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::QuestionInitialized => &self.cfg.uma_adapter_address,
            EventKind::ConditionPreparation => &self.cfg.conditional_tokens_address,
            EventKind::TokenRegistered | EventKind::OrderFilled => &self.cfg.exchange_address,
        }
    }

    fn query(&self, kind: EventKind, window_hours: i64) -> EventQuery {
        let limit = match kind {
            EventKind::OrderFilled => self.cfg.trade_batch_limit,
            _ => self.cfg.batch_limit,
        };
        EventQuery {
            kind,
            contract: self.contract(kind).to_string(),
            since: Utc::now() - Duration::hours(window_hours),
            limit,
        }
    }

    // -----------------------------------------------------------------------
    // Job bodies
    // -----------------------------------------------------------------------

    /// Periodic job for one kind over the trailing sync window.
    pub async fn sync_kind(&self, kind: EventKind) -> Result<IngestReport> {
        let query = self.query(kind, self.cfg.sync_window_hours);
        let fetched = self.source.fetch_events(&query).await;
        self.finish(kind, fetched, "periodic").await
    }

    /// Condition for one question.
    pub async fn sync_condition_for_question(&self, question_id: &str) -> Result<IngestReport> {
        let kind = EventKind::ConditionPreparation;
        let query = self.query(kind, self.cfg.on_demand_window_hours);
        let filter = ArgumentFilter::new("questionId", normalize_id(question_id));
        let fetched = self.source.fetch_events_by_argument(&query, &filter).await;
        self.finish(kind, fetched, "on-demand").await
    }

    /// Token pair for a question's condition. A no-op until the condition is stored.
    pub async fn sync_token_pair_for_question(&self, question_id: &str) -> Result<IngestReport> {
        let kind = EventKind::TokenRegistered;
        let Some(condition) = self.store.condition_for_question(&normalize_id(question_id)).await? else {
            debug!(question_id, "no condition stored yet; token lookup skipped");
            return Ok(IngestReport::default());
        };
        let query = self.query(kind, self.cfg.on_demand_window_hours);
        let filter = ArgumentFilter::new("conditionId", condition.condition_id);
        let fetched = self.source.fetch_events_by_argument(&query, &filter).await;
        self.finish(kind, fetched, "on-demand").await
    }

    /// Trades for a question's token pair. A no-op until the pair is stored.
    pub async fn sync_trades_for_question(&self, question_id: &str) -> Result<IngestReport> {
        let kind = EventKind::OrderFilled;
        let pair = match self.store.condition_for_question(&normalize_id(question_id)).await? {
            Some(condition) => self.store.token_pair_for_condition(&condition.condition_id).await?,
            None => None,
        };
        let Some(pair) = pair else {
            debug!(question_id, "no token pair stored yet; trade lookup skipped");
            return Ok(IngestReport::default());
        };
        let values: Vec<String> = [pair.token0, pair.token1]
            .into_iter()
            .filter(|t| !is_quote_currency(t))
            .collect();
        if values.is_empty() {
            return Ok(IngestReport::default());
        }
        let filter = ArgumentFilter {
            names: vec!["makerAssetId".to_string(), "takerAssetId".to_string()],
            values,
        };
        let query = self.query(kind, self.cfg.on_demand_window_hours);
        let fetched = self.source.fetch_events_by_argument(&query, &filter).await;
        self.finish(kind, fetched, "on-demand").await
    }

    /// Record health for a fetch outcome and store the events.
    async fn finish(
        &self,
        kind: EventKind,
        fetched: Result<Vec<RawEvent>>,
        mode: &'static str,
    ) -> Result<IngestReport> {
        let outcome = match fetched {
            Ok(events) => self.ingest(kind, &events).await,
            Err(e) => Err(e),
        };
        match &outcome {
            Ok(report) => {
                self.health.record_success(kind, report);
                info!(
                    kind = %kind,
                    mode,
                    fetched = report.fetched,
                    inserted = report.inserted,
                    duplicates = report.duplicates,
                    skipped = report.skipped,
                    "ingest complete"
                );
            }
            Err(e) => {
                self.health.record_failure(kind, &e.to_string());
                warn!(kind = %kind, mode, "ingest failed: {e}");
            }
        }
        outcome
    }

    /// Parse and insert a batch. Unparseable events are counted, never fatal.
    pub async fn ingest(&self, kind: EventKind, events: &[RawEvent]) -> Result<IngestReport> {
        let mut report = IngestReport {
            fetched: events.len(),
            ..Default::default()
        };
        for ev in events {
            let inserted = match kind {
                EventKind::QuestionInitialized => match parse::question(ev) {
                    Ok(r) => Ok(self.store.insert_question(&r).await?),
                    Err(skip) => Err(skip),
                },
                EventKind::ConditionPreparation => match parse::condition(ev) {
                    Ok(r) => Ok(self.store.insert_condition(&r).await?),
                    Err(skip) => Err(skip),
                },
                EventKind::TokenRegistered => match parse::token_pair(ev) {
                    Ok(r) => Ok(self.store.insert_token_pair(&r).await?),
                    Err(skip) => Err(skip),
                },
                EventKind::OrderFilled => match parse::trade(ev) {
                    Ok(r) => Ok(self.store.insert_trade(&r).await?),
                    Err(skip) => Err(skip),
                },
            };
            match inserted {
                Ok(true) => report.inserted += 1,
                Ok(false) => report.duplicates += 1,
                Err(skip) => {
                    report.skipped += 1;
                    debug!(kind = %kind, tx = %ev.transaction.hash, reason = %skip, "event skipped");
                }
            }
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Periodic job for `kind`, suitable for the scheduler or a `PollTimer`.
    pub fn kind_job(&self, kind: EventKind) -> JobFn {
        let this = self.clone();
        job(move || {
            let this = this.clone();
            async move { this.sync_kind(kind).await.map(|_| ()) }
        })
    }

    pub fn enqueue_kind(&self, kind: EventKind) {
        self.scheduler.enqueue(format!("sync-{kind}"), self.kind_job(kind));
    }

    /// Queue all four periodic jobs in dependency order.
    pub fn enqueue_sync_cycle(&self) {
        for kind in EventKind::ALL {
            self.enqueue_kind(kind);
        }
    }

    /// Queue the on-demand chain for one market: condition, then token pair, then trades.
    pub fn sync_market(&self, question_id: &str) {
        let qid = normalize_id(question_id);

        let this = self.clone();
        let q = qid.clone();
        self.scheduler.enqueue(
            format!("market-{qid}-condition"),
            job(move || {
                let (this, q) = (this.clone(), q.clone());
                async move { this.sync_condition_for_question(&q).await.map(|_| ()) }
            }),
        );

        let this = self.clone();
        let q = qid.clone();
        self.scheduler.enqueue(
            format!("market-{qid}-token"),
            job(move || {
                let (this, q) = (this.clone(), q.clone());
                async move { this.sync_token_pair_for_question(&q).await.map(|_| ()) }
            }),
        );

        let this = self.clone();
        let q = qid.clone();
        self.scheduler.enqueue(
            format!("market-{qid}-trades"),
            job(move || {
                let (this, q) = (this.clone(), q.clone());
                async move { this.sync_trades_for_question(&q).await.map(|_| ()) }
            }),
        );
    }

    /// Empty the store with the job lane held, then queue a fresh cycle.
    pub async fn reset(&self) -> Result<()> {
        let store = self.store.clone();
        self.scheduler.run_exclusive(store.reset()).await?;
        self.enqueue_sync_cycle();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::latency::LatencyStats;
    use crate::error::AppError;
    use crate::market;
    use crate::scheduler::RetryPolicy;
    use crate::source::testing::{addr, big, bytes, raw_event, MockSource};
    use crate::source::ArgValue;

    fn hex(text: &str) -> String {
        let mut out = String::from("0x");
        for b in text.as_bytes() {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }

    async fn ingestor(source: Arc<MockSource>) -> Ingestor<MockSource> {
        let store = EventStore::in_memory().await.unwrap();
        let scheduler = RetryScheduler::new(
            RetryPolicy {
                max_retries: 3,
                initial_backoff: std::time::Duration::from_secs(1),
            },
            Arc::new(LatencyStats::new()),
        );
        Ingestor::new(
            source,
            store,
            scheduler,
            Arc::new(IngestHealth::new()),
            Arc::new(Config::default()),
        )
    }

    fn question_event(qid: &str, text: &str) -> RawEvent {
        raw_event(
            60,
            1,
            &[
                ("questionID", bytes(qid)),
                ("creator", addr("0xcreator")),
                ("ancillaryData", bytes(&hex(text))),
            ],
        )
    }

    fn condition_event(cid: &str, qid: &str) -> RawEvent {
        raw_event(
            50,
            2,
            &[
                ("conditionId", bytes(cid)),
                ("questionId", bytes(qid)),
                ("oracle", addr("0xadapter")),
                ("outcomeSlotCount", ArgValue::Integer(2)),
            ],
        )
    }

    fn token_event(cid: &str, t0: &str, t1: &str) -> RawEvent {
        raw_event(40, 3, &[("conditionId", bytes(cid)), ("token0", big(t0)), ("token1", big(t1))])
    }

    fn trade_event(hash: &str, minutes_ago: i64, block: i64, quote_amt: &str, token_amt: &str) -> RawEvent {
        raw_event(
            minutes_ago,
            block,
            &[
                ("orderHash", bytes(hash)),
                ("maker", addr("0xm")),
                ("taker", addr("0xt")),
                ("makerAssetId", big("0")),
                ("takerAssetId", big("200")),
                ("makerAmountFilled", big(quote_amt)),
                ("takerAmountFilled", big(token_amt)),
                ("fee", big("0")),
            ],
        )
    }

    #[tokio::test]
    async fn incomplete_events_are_counted_not_fatal() {
        let source = Arc::new(MockSource::new());
        source.push(EventKind::TokenRegistered, token_event("0xc1", "100", "200"));
        source.push(EventKind::TokenRegistered, raw_event(10, 4, &[("conditionId", bytes("0xc2")), ("token0", big("1"))]));
        let ing = ingestor(source).await;

        let report = ing.sync_kind(EventKind::TokenRegistered).await.unwrap();
        assert_eq!(report, IngestReport { fetched: 2, inserted: 1, duplicates: 0, skipped: 1 });
    }

    #[tokio::test]
    async fn redelivered_events_are_duplicates() {
        let source = Arc::new(MockSource::new());
        source.push(EventKind::QuestionInitialized, question_event("0xq1", "title: A"));
        let ing = ingestor(source).await;

        ing.sync_kind(EventKind::QuestionInitialized).await.unwrap();
        let second = ing.sync_kind(EventKind::QuestionInitialized).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(ing.store.counts().await.unwrap().questions, 1);
    }

    #[tokio::test]
    async fn events_outside_the_window_are_not_requested() {
        let source = Arc::new(MockSource::new());
        // 100 hours ago: outside the 72h periodic window, inside the 144h on-demand one.
        source.push(EventKind::ConditionPreparation, raw_event(100 * 60, 2, &[("conditionId", bytes("0xc1")), ("questionId", bytes("0xq1"))]));
        let ing = ingestor(source).await;

        assert_eq!(ing.sync_kind(EventKind::ConditionPreparation).await.unwrap().fetched, 0);
        assert_eq!(ing.sync_condition_for_question("0xQ1").await.unwrap().inserted, 1);
    }

    #[tokio::test]
    async fn source_failure_is_recorded_and_propagated() {
        let source = Arc::new(MockSource::new());
        source.fail_next(AppError::Upstream("502 bad gateway".into()));
        let ing = ingestor(source).await;

        assert!(ing.sync_kind(EventKind::OrderFilled).await.is_err());
        let status = ing.health.status(EventKind::OrderFilled).unwrap();
        assert_eq!(status.failures, 1);
        assert!(status.last_error.unwrap().contains("502"));
    }

    #[tokio::test]
    async fn end_to_end_cycle_assembles_priced_market() {
        let source = Arc::new(MockSource::new());
        source.push(
            EventKind::QuestionInitialized,
            question_event("Q1", "title: Will X happen?, description: Test, market_id: M1, p1: No, p2: Yes"),
        );
        source.push(EventKind::ConditionPreparation, condition_event("C1", "Q1"));
        source.push(EventKind::TokenRegistered, token_event("C1", "100", "200"));
        source.push(EventKind::OrderFilled, trade_event("0xh1", 30, 10, "400000", "1000000"));
        source.push(EventKind::OrderFilled, trade_event("0xh2", 20, 11, "550000", "1000000"));
        let ing = ingestor(source).await;

        ing.enqueue_sync_cycle();
        ing.scheduler().wait_idle().await;
        assert_eq!(ing.scheduler().snapshot().completed, 4);

        let m = market::get_market(&ing.store, "Q1", "USDC").await.unwrap();
        assert_eq!(m.summary.ancillary.title, "Will X happen?");
        assert_eq!(m.summary.condition_id.as_deref(), Some("c1"));
        assert_eq!(m.summary.trade_count, 2);
        let yes = m.summary.prices.yes.unwrap();
        assert_eq!(yes.token_id, "200");
        assert_eq!(yes.formatted, "0.5500 USDC");
        assert_eq!(yes.cents, "55.0%");
        assert!(m.summary.prices.no.is_none());
        assert!(ing.health.is_healthy());
    }

    #[tokio::test]
    async fn on_demand_chain_walks_the_relationships() {
        let source = Arc::new(MockSource::new());
        source.push(EventKind::ConditionPreparation, condition_event("0xc1", "0xq1"));
        source.push(EventKind::TokenRegistered, token_event("0xc1", "100", "200"));
        source.push(EventKind::OrderFilled, trade_event("0xh1", 30, 10, "400000", "1000000"));
        let ing = ingestor(source.clone()).await;

        ing.sync_market("0xQ1");
        ing.scheduler().wait_idle().await;

        let counts = ing.store.counts().await.unwrap();
        assert_eq!((counts.conditions, counts.token_pairs, counts.trades), (1, 1, 1));

        let requests = source.requests.lock().unwrap().clone();
        let filters: Vec<ArgumentFilter> = requests.into_iter().filter_map(|(_, f)| f).collect();
        assert_eq!(filters[0], ArgumentFilter::new("questionId", "0xq1"));
        assert_eq!(filters[1], ArgumentFilter::new("conditionId", "0xc1"));
        assert_eq!(filters[2].values, vec!["100".to_string(), "200".to_string()]);
    }

    #[tokio::test]
    async fn on_demand_steps_without_parents_are_no_ops() {
        let source = Arc::new(MockSource::new());
        let ing = ingestor(source.clone()).await;

        assert_eq!(ing.sync_token_pair_for_question("0xq9").await.unwrap(), IngestReport::default());
        assert_eq!(ing.sync_trades_for_question("0xq9").await.unwrap(), IngestReport::default());
        assert!(source.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_clears_store_and_requeues_cycle() {
        let source = Arc::new(MockSource::new());
        source.push(EventKind::QuestionInitialized, question_event("0xq1", "title: A"));
        let ing = ingestor(source).await;
        ing.enqueue_sync_cycle();
        ing.scheduler().wait_idle().await;

        ing.reset().await.unwrap();
        ing.scheduler().wait_idle().await;

        // The fresh cycle re-ingests the same source data.
        assert_eq!(ing.store.counts().await.unwrap().questions, 1);
        assert_eq!(ing.scheduler().snapshot().completed, 8);
    }
}
