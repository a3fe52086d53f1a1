//! Engine metrics and the time-windowed error history.
//!
//! `EngineMetrics` holds plain counters; the engine keeps it behind a lock.
//! `ErrorTracker` is the bounded failure history consulted by health checks.

use crate::error::{ErrorKind, SearchError, Severity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, warn};

/// Search and crawl counters for the whole engine.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub searches_started: u64,
    pub searches_completed: u64,
    pub searches_failed: u64,
    pub results_returned: u64,
    pub pages_crawled: u64,
    pub pages_skipped: u64,
    pub research_runs: u64,
    latency_total_ms: u64,
    latency_samples: u64,
    start_time: Option<Instant>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn record_search_start(&mut self) {
        self.searches_started += 1;
    }

    /// Record a finished search with its latency and result count.
    pub fn record_search_complete(&mut self, latency: Duration, results: usize) {
        self.searches_completed += 1;
        self.results_returned += results as u64;
        self.latency_total_ms += latency.as_millis() as u64;
        self.latency_samples += 1;
    }

    pub fn record_search_failed(&mut self) {
        self.searches_failed += 1;
    }

    pub fn record_crawl(&mut self, extracted: bool) {
        if extracted {
            self.pages_crawled += 1;
        } else {
            self.pages_skipped += 1;
        }
    }

    pub fn record_research(&mut self) {
        self.research_runs += 1;
    }

    /// Mean latency of completed searches in milliseconds.
    pub fn avg_latency_ms(&self) -> f64 {
        if self.latency_samples == 0 {
            0.0
        } else {
            self.latency_total_ms as f64 / self.latency_samples as f64
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|s| s.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            searches_started: self.searches_started,
            searches_completed: self.searches_completed,
            searches_failed: self.searches_failed,
            results_returned: self.results_returned,
            pages_crawled: self.pages_crawled,
            pages_skipped: self.pages_skipped,
            research_runs: self.research_runs,
            avg_latency_ms: self.avg_latency_ms(),
            uptime_secs: self.uptime_secs(),
        }
    }
}

/// Immutable snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub searches_started: u64,
    pub searches_completed: u64,
    pub searches_failed: u64,
    pub results_returned: u64,
    pub pages_crawled: u64,
    pub pages_skipped: u64,
    pub research_runs: u64,
    pub avg_latency_ms: f64,
    pub uptime_secs: u64,
}

// ---------------------------------------------------------------------------
// Error history
// ---------------------------------------------------------------------------

/// One recorded failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub provider: Option<String>,
    pub message: String,
    #[serde(skip)]
    recorded: Option<Instant>,
}

/// Bounded, time-windowed history of failures.
#[derive(Debug)]
pub struct ErrorTracker {
    records: VecDeque<ErrorRecord>,
    capacity: usize,
    window: Duration,
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new(1000, Duration::from_secs(3600))
    }
}

impl ErrorTracker {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            window,
        }
    }

    /// Record a failure and log it with its classification.
    pub fn record(&mut self, err: &SearchError) {
        let classification = err.classify();
        let provider = err.provider().map(str::to_string);
        match classification.severity {
            Severity::High | Severity::Critical => error!(
                kind = %classification.kind,
                severity = ?classification.severity,
                action = ?classification.action,
                provider = provider.as_deref().unwrap_or("-"),
                error = %err,
                "Search failure"
            ),
            _ => warn!(
                kind = %classification.kind,
                severity = ?classification.severity,
                action = ?classification.action,
                provider = provider.as_deref().unwrap_or("-"),
                error = %err,
                "Search failure"
            ),
        }

        self.prune();
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(ErrorRecord {
            at: Utc::now(),
            kind: classification.kind,
            severity: classification.severity,
            provider,
            message: err.to_string(),
            recorded: Some(Instant::now()),
        });
    }

    fn in_window(&self, record: &ErrorRecord) -> bool {
        record
            .recorded
            .is_some_and(|at| at.elapsed() < self.window)
    }

    fn prune(&mut self) {
        while let Some(front) = self.records.front() {
            if self.in_window(front) {
                break;
            }
            self.records.pop_front();
        }
    }

    /// Failures recorded within the window, oldest first.
    pub fn recent(&self) -> Vec<ErrorRecord> {
        self.records
            .iter()
            .filter(|r| self.in_window(r))
            .cloned()
            .collect()
    }

    pub fn recent_count(&self) -> usize {
        self.records.iter().filter(|r| self.in_window(r)).count()
    }

    pub fn counts_by_kind(&self) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for record in self.records.iter().filter(|r| self.in_window(r)) {
            *counts.entry(record.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout() -> SearchError {
        SearchError::Timeout {
            provider: "free".into(),
            timeout_secs: 30,
        }
    }

    #[test]
    fn test_metrics_default() {
        let m = EngineMetrics::new();
        assert_eq!(m.searches_started, 0);
        assert_eq!(m.avg_latency_ms(), 0.0);
    }

    #[test]
    fn test_search_lifecycle() {
        let mut m = EngineMetrics::new();
        m.record_search_start();
        m.record_search_start();
        m.record_search_complete(Duration::from_millis(100), 3);
        m.record_search_complete(Duration::from_millis(300), 2);
        m.record_search_failed();

        let snap = m.snapshot();
        assert_eq!(snap.searches_started, 2);
        assert_eq!(snap.searches_completed, 2);
        assert_eq!(snap.searches_failed, 1);
        assert_eq!(snap.results_returned, 5);
        assert!((snap.avg_latency_ms - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_crawl_counters() {
        let mut m = EngineMetrics::new();
        m.record_crawl(true);
        m.record_crawl(false);
        m.record_crawl(false);
        assert_eq!(m.pages_crawled, 1);
        assert_eq!(m.pages_skipped, 2);
    }

    #[test]
    fn test_noop_when_default() {
        let m = EngineMetrics::default();
        assert_eq!(m.uptime_secs(), 0);
    }

    #[test]
    fn test_tracker_bounded() {
        let mut t = ErrorTracker::new(3, Duration::from_secs(3600));
        for _ in 0..5 {
            t.record(&timeout());
        }
        assert_eq!(t.len(), 3);
        assert_eq!(t.counts_by_kind().get(&ErrorKind::Timeout), Some(&3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_window() {
        let mut t = ErrorTracker::new(100, Duration::from_secs(60));
        t.record(&timeout());
        tokio::time::advance(Duration::from_secs(61)).await;
        t.record(&SearchError::Auth {
            provider: "metered".into(),
        });
        assert_eq!(t.recent_count(), 1);
        let recent = t.recent();
        assert_eq!(recent[0].kind, ErrorKind::Auth);
        assert_eq!(recent[0].provider.as_deref(), Some("metered"));
        // The expired record was pruned on insert.
        assert_eq!(t.len(), 1);
    }
}
