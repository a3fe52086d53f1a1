//! Scriptable provider for tests and demos.

use super::SearchProvider;
use crate::error::SearchError;
use crate::types::{ProviderKind, Query, SearchResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Title facets that keep generated results from looking like near-duplicates.
const FACETS: &[&str] = &[
    "overview", "history", "guide", "analysis", "research", "news", "statistics", "review",
    "tutorial", "questions",
];

/// A provider whose behavior is scripted up front.
///
/// Queued outcomes are returned first, in order. After the queue drains the
/// provider either fails with its `always_failing` error or answers with
/// fixed results (if set) or `generated` synthetic results for the query.
pub struct MockSearchProvider {
    name: String,
    kind: ProviderKind,
    generated: usize,
    fixed: Option<Vec<SearchResult>>,
    queue: Mutex<VecDeque<Result<Vec<SearchResult>, SearchError>>>,
    failure: Option<SearchError>,
    delay: Option<Duration>,
    healthy: AtomicBool,
    cost: f64,
    calls: Arc<AtomicUsize>,
}

impl MockSearchProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ProviderKind::Mock,
            generated: 0,
            fixed: None,
            queue: Mutex::new(VecDeque::new()),
            failure: None,
            delay: None,
            healthy: AtomicBool::new(true),
            cost: 0.0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer every query with `count` synthetic results.
    pub fn with_results(mut self, count: usize) -> Self {
        self.generated = count;
        self
    }

    /// Answer every query with exactly these results.
    pub fn with_fixed_results(mut self, results: Vec<SearchResult>) -> Self {
        self.fixed = Some(results);
        self
    }

    /// Fail every call (after the queue drains) with `error`.
    pub fn always_failing(mut self, error: SearchError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Fail the next `n` calls with `error`, then behave normally.
    pub fn failing_times(self, n: usize, error: SearchError) -> Self {
        {
            let mut queue = self.queue.lock();
            for _ in 0..n {
                queue.push_back(Err(error.clone()));
            }
        }
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// Queue one outcome to be returned by the next call.
    pub fn queue(&self, outcome: Result<Vec<SearchResult>, SearchError>) {
        self.queue.lock().push_back(outcome);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Shared counter of `search` invocations.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    fn generate(&self, query: &Query) -> Vec<SearchResult> {
        let slug = query.normalized_text().replace(' ', "-");
        (0..self.generated)
            .map(|i| {
                SearchResult::new(
                    format!("https://www.example{i}.org/{slug}"),
                    format!(
                        "{} {}: item{}",
                        query.text(),
                        FACETS[i % FACETS.len()],
                        i + 1
                    ),
                    &self.name,
                    self.kind,
                )
                .with_snippet(format!(
                    "About {}: synthetic result number {} from {}.",
                    query.text(),
                    i + 1,
                    self.name
                ))
                .with_relevance(1.0 - i as f64 * 0.1)
            })
            .collect()
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn search(&self, query: &Query) -> Result<Vec<SearchResult>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(outcome) = self.queue.lock().pop_front() {
            return outcome;
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        Ok(match &self.fixed {
            Some(results) => results.clone(),
            None => self.generate(query),
        })
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn cost_per_call(&self) -> f64 {
        self.cost
    }
}
