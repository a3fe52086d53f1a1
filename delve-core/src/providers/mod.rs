//! Search provider abstraction.
//!
//! Every backend implements [`SearchProvider`]. The engine never calls a
//! provider directly: each one is wrapped in a [`ManagedProvider`] that owns
//! its cache namespace, token bucket, concurrency bound, quota and health
//! counters, and the wrappers live in a name-keyed [`ProviderRegistry`].
//!
//! Concrete network providers live in the `delve-providers` crate; this
//! module ships the local heuristic provider and a scriptable mock.

pub mod failover;
pub mod local;
pub mod mock;
pub mod rate_limiter;

use crate::cache::ResponseCache;
use crate::config::ProviderConfig;
use crate::error::SearchError;
use crate::types::{ProviderKind, Query, SearchResult, SearchSession};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use failover::{
    CircuitBreaker, CircuitBreakerState, CircuitState, CircuitStatus, ExecutionOutcome,
    FanOutOutcome, FaultTolerantExecutor, RetryPolicy,
};
pub use local::LocalHeuristicProvider;
pub use mock::MockSearchProvider;
pub use rate_limiter::{RateLimitConfig, TokenBucketLimiter, parse_retry_after};

/// Consecutive failures after which a managed provider disables itself.
pub const DISABLE_AFTER_FAILURES: u32 = 5;

/// A pluggable search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Unique provider name, used as registry key and cache namespace.
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Run a query. Errors must be typed at the call site.
    async fn search(&self, query: &Query) -> Result<Vec<SearchResult>, SearchError>;

    /// Cheap liveness probe.
    async fn health_check(&self) -> bool {
        true
    }

    /// Monetary cost of one call.
    fn cost_per_call(&self) -> f64 {
        0.0
    }

    /// Whether this provider is willing to answer `query`.
    fn can_handle(&self, _query: &Query) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// ManagedProvider
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ProviderStats {
    requests: u64,
    successes: u64,
    failures: u64,
    consecutive_failures: u32,
    disabled: bool,
    total_latency_ms: u64,
    cost_spent: f64,
    quota_day: NaiveDate,
    quota_used: u64,
}

impl ProviderStats {
    fn new() -> Self {
        Self {
            requests: 0,
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
            disabled: false,
            total_latency_ms: 0,
            cost_spent: 0.0,
            quota_day: Utc::now().date_naive(),
            quota_used: 0,
        }
    }

    fn roll_quota_day(&mut self) {
        let today = Utc::now().date_naive();
        if today != self.quota_day {
            self.quota_day = today;
            self.quota_used = 0;
        }
    }
}

/// Point-in-time view of a provider's health counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatsSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub disabled: bool,
    pub cost_spent: f64,
    pub quota_used: u64,
    pub daily_quota: Option<u64>,
}

/// A provider plus everything the engine needs to call it safely.
pub struct ManagedProvider {
    inner: Arc<dyn SearchProvider>,
    name: String,
    cache: Arc<ResponseCache>,
    limiter: TokenBucketLimiter,
    semaphore: Semaphore,
    timeout: Duration,
    retry_attempts: Option<u32>,
    daily_quota: Option<u64>,
    stats: Mutex<ProviderStats>,
}

impl ManagedProvider {
    pub fn new(
        inner: Arc<dyn SearchProvider>,
        config: &ProviderConfig,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            name: inner.name().to_string(),
            inner,
            cache,
            limiter: TokenBucketLimiter::new(config.rate_limit()),
            semaphore: Semaphore::new(config.max_concurrent.max(1)),
            timeout: Duration::from_secs(config.timeout_s.max(1)),
            retry_attempts: config.retry_attempts,
            daily_quota: config.daily_quota,
            stats: Mutex::new(ProviderStats::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }

    pub fn cost_per_call(&self) -> f64 {
        self.inner.cost_per_call()
    }

    /// Per-provider override of the retry attempt count.
    pub fn retry_attempts(&self) -> Option<u32> {
        self.retry_attempts
    }

    pub fn inner(&self) -> &Arc<dyn SearchProvider> {
        &self.inner
    }

    fn quota_exhausted(stats: &mut ProviderStats, quota: Option<u64>) -> bool {
        stats.roll_quota_day();
        quota.is_some_and(|q| stats.quota_used >= q)
    }

    /// Not disabled and still within its daily budget.
    pub fn is_available(&self) -> bool {
        let mut stats = self.stats.lock();
        !stats.disabled && !Self::quota_exhausted(&mut stats, self.daily_quota)
    }

    pub fn can_handle(&self, query: &Query) -> bool {
        self.is_available() && self.inner.can_handle(query)
    }

    /// Run a query through cache, token bucket and concurrency bound.
    pub async fn search(
        &self,
        query: &Query,
        session: &SearchSession,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let key = query.cache_key();
        if let Some(hit) = self.cache.get(&self.name, &key) {
            debug!(provider = %self.name, "Cache hit");
            session.record_cache_hit();
            session.record_provider(&self.name);
            return Ok(hit);
        }
        if self.cache.is_enabled() {
            session.record_cache_miss();
        }

        {
            let mut stats = self.stats.lock();
            if stats.disabled || Self::quota_exhausted(&mut stats, self.daily_quota) {
                return Err(SearchError::ProviderUnavailable {
                    provider: self.name.clone(),
                });
            }
            stats.quota_used += 1;
        }

        self.limiter.acquire().await;
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SearchError::ProviderUnavailable {
                provider: self.name.clone(),
            })?;

        session.record_provider(&self.name);
        let start = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, self.inner.search(query)).await {
            Ok(result) => result,
            Err(_) => Err(SearchError::Timeout {
                provider: self.name.clone(),
                timeout_secs: self.timeout.as_secs(),
            }),
        };
        let latency = start.elapsed();

        match outcome {
            Ok(results) => {
                self.record_success(latency);
                debug!(
                    provider = %self.name,
                    results = results.len(),
                    latency_ms = latency.as_millis() as u64,
                    "Provider search succeeded"
                );
                self.cache.put(&self.name, &key, results.clone());
                Ok(results)
            }
            Err(err) => {
                self.record_failure(latency);
                Err(err)
            }
        }
    }

    fn record_success(&self, latency: Duration) {
        let mut stats = self.stats.lock();
        stats.requests += 1;
        stats.successes += 1;
        stats.consecutive_failures = 0;
        stats.total_latency_ms += latency.as_millis() as u64;
        stats.cost_spent += self.inner.cost_per_call();
    }

    fn record_failure(&self, latency: Duration) {
        let mut stats = self.stats.lock();
        stats.requests += 1;
        stats.failures += 1;
        stats.consecutive_failures += 1;
        stats.total_latency_ms += latency.as_millis() as u64;
        if stats.consecutive_failures >= DISABLE_AFTER_FAILURES && !stats.disabled {
            stats.disabled = true;
            warn!(
                provider = %self.name,
                failures = stats.consecutive_failures,
                "Provider disabled after consecutive failures"
            );
        }
    }

    /// Re-enable the provider and clear its failure streak.
    pub fn reset(&self) {
        let mut stats = self.stats.lock();
        if stats.disabled {
            info!(provider = %self.name, "Provider re-enabled");
        }
        stats.disabled = false;
        stats.consecutive_failures = 0;
    }

    /// Probe the backend; a healthy probe re-enables a disabled provider.
    pub async fn health_check(&self) -> bool {
        let healthy = self.inner.health_check().await;
        if healthy {
            self.reset();
        }
        healthy
    }

    pub fn stats(&self) -> ProviderStatsSnapshot {
        let mut stats = self.stats.lock();
        stats.roll_quota_day();
        let success_rate = if stats.requests == 0 {
            1.0
        } else {
            stats.successes as f64 / stats.requests as f64
        };
        let avg_latency_ms = if stats.requests == 0 {
            0.0
        } else {
            stats.total_latency_ms as f64 / stats.requests as f64
        };
        ProviderStatsSnapshot {
            requests: stats.requests,
            successes: stats.successes,
            failures: stats.failures,
            consecutive_failures: stats.consecutive_failures,
            success_rate,
            avg_latency_ms,
            disabled: stats.disabled,
            cost_spent: stats.cost_spent,
            quota_used: stats.quota_used,
            daily_quota: self.daily_quota,
        }
    }
}

impl std::fmt::Debug for ManagedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProvider")
            .field("name", &self.name)
            .field("kind", &self.inner.kind())
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Registry of managed providers, keyed by name in insertion order.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<ManagedProvider>>,
    index: HashMap<String, usize>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a managed provider. Names must be unique.
    pub fn register(&mut self, provider: ManagedProvider) -> Result<(), SearchError> {
        let name = provider.name().to_string();
        if self.index.contains_key(&name) {
            return Err(SearchError::Validation {
                message: format!("provider '{name}' is already registered"),
            });
        }
        self.index.insert(name, self.providers.len());
        self.providers.push(Arc::new(provider));
        Ok(())
    }

    /// Wrap and register a raw provider.
    pub fn register_provider(
        &mut self,
        provider: Arc<dyn SearchProvider>,
        config: &ProviderConfig,
        cache: Arc<ResponseCache>,
    ) -> Result<(), SearchError> {
        self.register(ManagedProvider::new(provider, config, cache))
    }

    pub fn get(&self, name: &str) -> Option<Arc<ManagedProvider>> {
        self.index.get(name).map(|&i| Arc::clone(&self.providers[i]))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Provider names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ManagedProvider>> {
        self.providers.iter()
    }

    /// Providers currently able to answer `query`, in registration order.
    pub fn available_for(&self, query: &Query) -> Vec<Arc<ManagedProvider>> {
        self.providers
            .iter()
            .filter(|p| p.can_handle(query))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
