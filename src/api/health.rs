//! Shared ingestion health for the /health endpoint.
//! Written by ingestion jobs, read by the API.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::types::{EventKind, IngestReport};

/// Latest outcome of one event kind's ingestion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KindStatus {
    pub runs: u64,
    pub failures: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_report: Option<IngestReport>,
    pub last_error: Option<String>,
}

pub struct IngestHealth {
    started_at: DateTime<Utc>,
    kinds: DashMap<EventKind, KindStatus>,
}

impl IngestHealth {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            kinds: DashMap::new(),
        }
    }

    pub fn record_success(&self, kind: EventKind, report: &IngestReport) {
        let now = Utc::now();
        let mut entry = self.kinds.entry(kind).or_default();
        entry.runs += 1;
        entry.last_run_at = Some(now);
        entry.last_success_at = Some(now);
        entry.last_report = Some(report.clone());
        entry.last_error = None;
    }

    pub fn record_failure(&self, kind: EventKind, error: &str) {
        let mut entry = self.kinds.entry(kind).or_default();
        entry.runs += 1;
        entry.failures += 1;
        entry.last_run_at = Some(Utc::now());
        entry.last_error = Some(error.to_string());
    }

    pub fn status(&self, kind: EventKind) -> Option<KindStatus> {
        self.kinds.get(&kind).map(|s| s.clone())
    }

    /// Status per kind in dependency order; kinds that never ran are omitted.
    pub fn all(&self) -> Vec<(EventKind, KindStatus)> {
        EventKind::ALL
            .iter()
            .filter_map(|k| self.status(*k).map(|s| (*k, s)))
            .collect()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// True once every kind has succeeded at least once and none is failing.
    pub fn is_healthy(&self) -> bool {
        EventKind::ALL.iter().all(|k| {
            self.kinds
                .get(k)
                .is_some_and(|s| s.last_success_at.is_some() && s.last_error.is_none())
        })
    }
}

impl Default for IngestHealth {
    fn default() -> Self {
        Self::new()
    }
}
