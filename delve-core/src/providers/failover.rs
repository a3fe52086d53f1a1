//! Fault-tolerant provider execution.
//!
//! Provides resilient search by:
//! - Retrying transient failures with exponential backoff and jitter
//! - Failing fast on providers whose circuit breaker is open
//! - Walking a static fallback chain once the primary is exhausted
//! - Fanning a query out to several providers concurrently

use super::{ManagedProvider, ProviderRegistry};
use crate::config::{ResilienceConfig, RetryConfig};
use crate::error::SearchError;
use crate::metrics::ErrorTracker;
use crate::types::{Query, SearchResult, SearchSession};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Circuit Breaker
// ---------------------------------------------------------------------------

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    /// Normal operation: calls are permitted.
    Closed,
    /// Too many failures: calls are blocked.
    Open { since: Instant },
    /// Recovery probe: calls are permitted until a verdict is reached.
    HalfOpen,
}

/// Serializable name of a circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl From<CircuitState> for CircuitStatus {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => CircuitStatus::Closed,
            CircuitState::Open { .. } => CircuitStatus::Open,
            CircuitState::HalfOpen => CircuitStatus::HalfOpen,
        }
    }
}

/// Snapshot of a breaker for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerState {
    pub status: CircuitStatus,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_transition_at: DateTime<Utc>,
}

/// A circuit breaker that trips after consecutive failures and recovers
/// after a timeout plus a run of successful probes.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    failure_threshold: u32,
    success_threshold: u32,
    recovery_timeout: Duration,
    last_failure_at: Option<DateTime<Utc>>,
    last_transition_at: DateTime<Utc>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, success_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            recovery_timeout,
            last_failure_at: None,
            last_transition_at: Utc::now(),
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(
            config.failure_threshold,
            config.success_threshold,
            config.recovery_timeout(),
        )
    }

    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.last_transition_at = Utc::now();
    }

    /// Whether a call is currently permitted.
    pub fn is_call_permitted(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open { since } => {
                if since.elapsed() >= self.recovery_timeout {
                    debug!("Circuit breaker transitioning to half-open");
                    self.success_count = 0;
                    self.transition(CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&mut self) {
        self.failure_count = 0;
        if self.state == CircuitState::HalfOpen {
            self.success_count += 1;
            if self.success_count >= self.success_threshold {
                debug!("Circuit breaker closing after successful probes");
                self.success_count = 0;
                self.transition(CircuitState::Closed);
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&mut self) {
        self.last_failure_at = Some(Utc::now());
        match self.state {
            CircuitState::HalfOpen => {
                warn!("Circuit breaker re-opening after failed probe");
                self.success_count = 0;
                self.failure_count = self.failure_threshold;
                self.transition(CircuitState::Open {
                    since: Instant::now(),
                });
            }
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.failure_threshold {
                    warn!(
                        failures = self.failure_count,
                        threshold = self.failure_threshold,
                        "Circuit breaker opening"
                    );
                    self.transition(CircuitState::Open {
                        since: Instant::now(),
                    });
                }
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        CircuitBreakerState {
            status: self.state.into(),
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_failure_at: self.last_failure_at,
            last_transition_at: self.last_transition_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry Policy
// ---------------------------------------------------------------------------

/// Exponential backoff policy for transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            exponential_base: config.exponential_base,
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(&self, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self.clone()
        }
    }

    /// Whether to retry after `attempt` (1-based) failed with `err`.
    pub fn should_retry(&self, attempt: u32, err: &SearchError) -> bool {
        attempt < self.max_attempts && err.is_retryable()
    }

    /// Backoff before the retry that follows `attempt` (1-based):
    /// `base * exponential_base^(attempt-1)`, capped, then jittered ±25%.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let raw = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let secs = if self.jitter {
            capped * rand::thread_rng().gen_range(0.75..=1.25)
        } else {
            capped
        };
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Backoff that also honors a rate limiter's retry-after.
    pub fn delay_for_error(&self, attempt: u32, err: &SearchError) -> Duration {
        let delay = self.delay_for(attempt);
        match err {
            SearchError::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => delay.max(Duration::from_secs(*secs)),
            _ => delay,
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// A successful provider call.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Provider that answered.
    pub provider: String,
    pub results: Vec<SearchResult>,
    /// Calls made across the whole chain, including failures.
    pub attempts: u32,
    /// Whether a fallback provider answered instead of the primary.
    pub used_fallback: bool,
}

/// Result of a concurrent fan-out.
#[derive(Debug, Default)]
pub struct FanOutOutcome {
    pub results: BTreeMap<String, Vec<SearchResult>>,
    pub errors: BTreeMap<String, SearchError>,
    pub attempts: u32,
}

/// Runs provider calls with retries, breakers, timeouts and fallback.
pub struct FaultTolerantExecutor {
    registry: Arc<ProviderRegistry>,
    resilience: ResilienceConfig,
    retry: RetryPolicy,
    fallback_chain: Vec<String>,
    call_timeout: Duration,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    errors: Arc<Mutex<ErrorTracker>>,
}

impl FaultTolerantExecutor {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        resilience: ResilienceConfig,
        fallback_chain: Vec<String>,
        call_timeout: Duration,
        errors: Arc<Mutex<ErrorTracker>>,
    ) -> Self {
        Self {
            retry: RetryPolicy::from(&resilience.retry),
            registry,
            resilience,
            fallback_chain,
            call_timeout,
            breakers: Mutex::new(HashMap::new()),
            errors,
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn fallback_chain(&self) -> &[String] {
        &self.fallback_chain
    }

    fn with_breaker<T>(&self, name: &str, f: impl FnOnce(&mut CircuitBreaker) -> T) -> T {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::from_config(&self.resilience));
        f(breaker)
    }

    /// Breaker snapshot for every registered provider.
    pub fn breaker_states(&self) -> BTreeMap<String, CircuitBreakerState> {
        self.registry
            .names()
            .into_iter()
            .map(|name| {
                let state = self.with_breaker(&name, |b| b.snapshot());
                (name, state)
            })
            .collect()
    }

    pub fn breaker_state(&self, name: &str) -> CircuitBreakerState {
        self.with_breaker(name, |b| b.snapshot())
    }

    /// Primary first, then configured fallbacks that are registered.
    fn chain_for(&self, primary: &str) -> Vec<String> {
        let mut chain = vec![primary.to_string()];
        for name in &self.fallback_chain {
            if !chain.contains(name) && self.registry.contains(name) {
                chain.push(name.clone());
            }
        }
        chain
    }

    fn record_error(&self, err: &SearchError, session: &SearchSession) {
        self.errors.lock().record(err);
        session.record_error(err.to_string());
    }

    /// Call one provider with retries. Returns the outcome and the number
    /// of calls made.
    async fn run_with_retry(
        &self,
        provider: &ManagedProvider,
        query: &Query,
        session: &SearchSession,
    ) -> (Result<Vec<SearchResult>, SearchError>, u32) {
        let name = provider.name().to_string();
        let policy = match provider.retry_attempts() {
            Some(n) => self.retry.with_max_attempts(n),
            None => self.retry.clone(),
        };

        let mut attempt = 0u32;
        loop {
            if !self.with_breaker(&name, |b| b.is_call_permitted()) {
                debug!(provider = %name, "Skipping provider, circuit open");
                let err = SearchError::CircuitOpen {
                    provider: name.clone(),
                };
                self.record_error(&err, session);
                return (Err(err), attempt);
            }

            attempt += 1;
            let outcome =
                match tokio::time::timeout(self.call_timeout, provider.search(query, session))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(SearchError::Timeout {
                        provider: name.clone(),
                        timeout_secs: self.call_timeout.as_secs(),
                    }),
                };

            match outcome {
                Ok(results) => {
                    self.with_breaker(&name, |b| b.record_success());
                    return (Ok(results), attempt);
                }
                Err(err) => {
                    self.record_error(&err, session);
                    if policy.should_retry(attempt, &err) {
                        let delay = policy.delay_for_error(attempt, &err);
                        warn!(
                            provider = %name,
                            attempt,
                            max = policy.max_attempts,
                            backoff_ms = delay.as_millis() as u64,
                            error = %err,
                            "Retrying after transient error"
                        );
                        session.record_retry();
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    if counts_against_breaker(&err) {
                        self.with_breaker(&name, |b| b.record_failure());
                    }
                    return (Err(err), attempt);
                }
            }
        }
    }

    /// Run `query` on `primary`, then along the fallback chain.
    ///
    /// Validation errors abort immediately. When every provider fails the
    /// error is [`SearchError::Exhausted`] wrapping the primary's failure.
    pub async fn execute(
        &self,
        primary: &str,
        query: &Query,
        session: &SearchSession,
    ) -> Result<ExecutionOutcome, SearchError> {
        if !self.registry.contains(primary) {
            return Err(SearchError::ProviderNotFound {
                name: primary.to_string(),
            });
        }

        let chain = self.chain_for(primary);
        let mut tried = Vec::with_capacity(chain.len());
        let mut attempts = 0u32;
        let mut first_error: Option<SearchError> = None;

        for (idx, name) in chain.iter().enumerate() {
            let Some(provider) = self.registry.get(name) else {
                continue;
            };
            if idx > 0 {
                info!(from = %chain[idx - 1], to = %name, "Falling back to next provider");
                session.record_fallback();
            }
            tried.push(name.clone());

            if !provider.can_handle(query) {
                let err = SearchError::ProviderUnavailable {
                    provider: name.clone(),
                };
                self.record_error(&err, session);
                first_error.get_or_insert(err);
                continue;
            }

            let (outcome, calls) = self.run_with_retry(&provider, query, session).await;
            attempts += calls;
            match outcome {
                Ok(results) => {
                    return Ok(ExecutionOutcome {
                        provider: name.clone(),
                        results,
                        attempts,
                        used_fallback: idx > 0,
                    });
                }
                Err(err @ SearchError::Validation { .. }) => return Err(err),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        let source = first_error.unwrap_or_else(|| SearchError::System {
            message: "no provider in the chain could be called".to_string(),
        });
        let err = SearchError::Exhausted {
            provider: tried.last().cloned().unwrap_or_else(|| primary.to_string()),
            query: query.text().to_string(),
            attempts,
            chain: tried,
            source: Box::new(source),
        };
        self.errors.lock().record(&err);
        Err(err)
    }

    /// Run `query` on every named provider concurrently, each with its own
    /// retries and breaker. No fallback is applied.
    pub async fn execute_each(
        &self,
        names: &[String],
        query: &Query,
        session: &SearchSession,
    ) -> FanOutOutcome {
        let calls = names.iter().map(|name| async move {
            let Some(provider) = self.registry.get(name) else {
                return (
                    name.clone(),
                    Err(SearchError::ProviderNotFound { name: name.clone() }),
                    0,
                );
            };
            if !provider.can_handle(query) {
                return (
                    name.clone(),
                    Err(SearchError::ProviderUnavailable {
                        provider: name.clone(),
                    }),
                    0,
                );
            }
            let (outcome, attempts) = self.run_with_retry(&provider, query, session).await;
            (name.clone(), outcome, attempts)
        });

        let mut fan_out = FanOutOutcome::default();
        for (name, outcome, attempts) in join_all(calls).await {
            fan_out.attempts += attempts;
            match outcome {
                Ok(results) => {
                    fan_out.results.insert(name, results);
                }
                Err(err) => {
                    fan_out.errors.insert(name, err);
                }
            }
        }
        fan_out
    }
}

/// Whether an exhausted retry sequence should count toward the breaker.
fn counts_against_breaker(err: &SearchError) -> bool {
    !matches!(
        err,
        SearchError::Validation { .. }
            | SearchError::CircuitOpen { .. }
            | SearchError::ProviderUnavailable { .. }
            | SearchError::Cancelled
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
