//! In-memory histogram of ingestion job durations.
//! Every scheduler attempt is recorded, successful or not.

use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

/// Values stored in milliseconds; tracks 1ms to 1h.
pub struct LatencyStats {
    inner: Mutex<Histogram<u64>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

impl LatencyStats {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, 3_600_000, 3).expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record_ms(&self, ms: u64) {
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.saturating_record(ms.max(1));
        }
    }

    pub fn record(&self, d: Duration) {
        let ms = d.as_millis().min(u128::from(u64::MAX)) as u64;
        self.record_ms(ms);
    }

    pub fn summary(&self) -> LatencySummary {
        let Ok(h) = self.inner.lock() else {
            return LatencySummary::default();
        };
        if h.len() == 0 {
            return LatencySummary::default();
        }
        LatencySummary {
            count: h.len(),
            p50_ms: Some(h.value_at_quantile(0.5)),
            p95_ms: Some(h.value_at_quantile(0.95)),
            p99_ms: Some(h.value_at_quantile(0.99)),
            max_ms: Some(h.max()),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let s = LatencyStats::new().summary();
        assert_eq!(s, LatencySummary::default());
    }

    #[test]
    fn records_job_durations() {
        let stats = LatencyStats::new();
        for ms in [10, 20, 30, 40, 1000] {
            stats.record(Duration::from_millis(ms));
        }
        // Sub-millisecond jobs still count.
        stats.record(Duration::from_micros(200));
        let s = stats.summary();
        assert_eq!(s.count, 6);
        assert!(s.p50_ms.unwrap() >= 10 && s.p50_ms.unwrap() <= 40);
        assert!(s.max_ms.unwrap() >= 1000);
    }
}
