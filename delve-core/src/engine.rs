//! The engine facade.
//!
//! [`SearchEngine`] is built once with [`SearchEngineBuilder`] and owns the
//! shared handles (registry, cache, executor, crawler, metrics, events) that
//! every search, crawl and research run goes through.

use crate::cache::ResponseCache;
use crate::config::EngineConfig;
use crate::crawler::{ContentExtractor, CrawlOutcome, Crawler, ExternalExtractor, PageFetcher};
use crate::error::{ConfigError, DelveError, SearchError};
use crate::events::{EngineEvent, EventBus};
use crate::llm::ModelClient;
use crate::metrics::{EngineMetrics, ErrorRecord, ErrorTracker, MetricsSnapshot};
use crate::providers::{
    CircuitStatus, FaultTolerantExecutor, LocalHeuristicProvider, ProviderRegistry,
    SearchProvider,
};
use crate::ranking::ResultConsolidator;
use crate::research::{DeepResearchAgent, ResearchPlan, ResearchReport, SearchBackend};
use crate::types::{Query, SearchResult, SearchSession};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Name the engine registers its local corpus provider under.
pub const LOCAL_PROVIDER: &str = "local";

const ERROR_HISTORY_CAPACITY: usize = 1000;
const ERROR_WINDOW: Duration = Duration::from_secs(3600);
/// Recent errors at or above which the engine reports itself degraded.
const DEGRADED_ERROR_COUNT: usize = 10;

// ---------------------------------------------------------------------------
// Search pipeline
// ---------------------------------------------------------------------------

/// Executor plus consolidation: one query in, one ranked list out.
pub struct SearchPipeline {
    executor: Arc<FaultTolerantExecutor>,
    consolidator: ResultConsolidator,
    primary: String,
}

impl SearchPipeline {
    pub fn new(
        executor: Arc<FaultTolerantExecutor>,
        consolidator: ResultConsolidator,
        primary: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            consolidator,
            primary: primary.into(),
        }
    }

    pub fn executor(&self) -> &Arc<FaultTolerantExecutor> {
        &self.executor
    }

    /// Fan-out modes query every available provider at once. When every one
    /// of them fails the run ends with [`SearchError::Exhausted`]; the
    /// primary chain is only walked when no provider was available at all.
    /// Other modes go straight down the primary chain.
    pub async fn run(
        &self,
        query: &Query,
        session: &SearchSession,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let per_provider = if query.mode().fans_out() {
            let names: Vec<String> = self
                .executor
                .registry()
                .available_for(query)
                .iter()
                .map(|p| p.name().to_string())
                .collect();
            let mut fan_out = self.executor.execute_each(&names, query, session).await;
            for (name, err) in &fan_out.errors {
                session.record_warning(format!("{name}: {err}"));
            }
            if !fan_out.results.is_empty() {
                fan_out.results
            } else if let Some((provider, source)) = fan_out
                .errors
                .remove_entry(&self.primary)
                .or_else(|| fan_out.errors.pop_first())
            {
                debug!(query = %query.text(), "Every fanned-out provider failed");
                return Err(SearchError::Exhausted {
                    provider,
                    query: query.text().to_string(),
                    attempts: fan_out.attempts,
                    chain: names,
                    source: Box::new(source),
                });
            } else {
                debug!(query = %query.text(), "No provider available, using primary chain");
                self.primary_chain(query, session).await?
            }
        } else {
            self.primary_chain(query, session).await?
        };

        Ok(self.consolidator.consolidate(query, per_provider))
    }

    async fn primary_chain(
        &self,
        query: &Query,
        session: &SearchSession,
    ) -> Result<BTreeMap<String, Vec<SearchResult>>, SearchError> {
        let outcome = self.executor.execute(&self.primary, query, session).await?;
        if outcome.used_fallback {
            session.record_warning(format!(
                "primary provider {} failed, answered by {}",
                self.primary, outcome.provider
            ));
        }
        Ok(BTreeMap::from([(outcome.provider, outcome.results)]))
    }
}

#[async_trait]
impl SearchBackend for SearchPipeline {
    async fn search(&self, query: &Query) -> Result<Vec<SearchResult>, SearchError> {
        let session = SearchSession::new(query.text());
        let outcome = self.run(query, &session).await;
        match &outcome {
            Ok(results) => {
                session.set_result_count(results.len());
                session.complete();
            }
            Err(err) => session.fail(err.to_string()),
        }
        outcome
    }
}

impl std::fmt::Debug for SearchPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchPipeline")
            .field("primary", &self.primary)
            .field("fallback_chain", &self.executor.fallback_chain())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub available: bool,
    pub success_rate: f64,
    pub consecutive_failures: u32,
    pub circuit: CircuitStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub providers: BTreeMap<String, ProviderHealth>,
    pub cache_hit_rate: f64,
    pub avg_latency_ms: f64,
    pub recent_errors: Vec<ErrorRecord>,
}

/// Unhealthy with no usable provider; degraded when any provider is down,
/// any circuit is not closed, or errors are piling up.
fn overall_status(
    providers: &BTreeMap<String, ProviderHealth>,
    recent_errors: usize,
) -> HealthStatus {
    let usable = providers
        .values()
        .filter(|p| p.available && p.circuit != CircuitStatus::Open)
        .count();
    if usable == 0 {
        return HealthStatus::Unhealthy;
    }
    let impaired = providers
        .values()
        .any(|p| !p.available || p.circuit != CircuitStatus::Closed);
    if impaired || recent_errors >= DEGRADED_ERROR_COUNT {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SearchEngine {
    config: EngineConfig,
    registry: Arc<ProviderRegistry>,
    cache: Arc<ResponseCache>,
    pipeline: Arc<SearchPipeline>,
    crawler: Arc<Crawler>,
    corpus: Option<Arc<LocalHeuristicProvider>>,
    model: Option<Arc<dyn ModelClient>>,
    events: EventBus,
    metrics: Mutex<EngineMetrics>,
    errors: Arc<Mutex<ErrorTracker>>,
}

impl SearchEngine {
    pub fn builder(config: EngineConfig) -> SearchEngineBuilder {
        SearchEngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.lock().snapshot()
    }

    /// The local corpus, when the `local` provider is enabled.
    pub fn corpus(&self) -> Option<&Arc<LocalHeuristicProvider>> {
        self.corpus.as_ref()
    }

    /// Run a query in a fresh session.
    pub async fn search(&self, query: &Query) -> Result<Vec<SearchResult>, SearchError> {
        let session = SearchSession::new(query.text());
        self.search_with_session(query, &session).await
    }

    /// Run a query, recording provenance and counters in `session`. The
    /// session is closed when this returns.
    pub async fn search_with_session(
        &self,
        query: &Query,
        session: &SearchSession,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let started = Instant::now();
        self.metrics.lock().record_search_start();
        self.events.publish(EngineEvent::SearchStarted {
            session_id: session.id(),
            query: query.text().to_string(),
            mode: query.mode(),
        });

        match self.pipeline.run(query, session).await {
            Ok(results) => {
                let elapsed = started.elapsed();
                session.set_result_count(results.len());
                let providers = session.snapshot().providers_used;
                session.complete();
                self.metrics
                    .lock()
                    .record_search_complete(elapsed, results.len());
                info!(
                    query = %query.text(),
                    mode = %query.mode(),
                    results = results.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Search completed"
                );
                self.events.publish(EngineEvent::SearchCompleted {
                    session_id: session.id(),
                    results: results.len(),
                    providers,
                    duration_ms: elapsed.as_millis() as u64,
                });
                Ok(results)
            }
            Err(err) => {
                self.search_failed(session, &err);
                Err(err)
            }
        }
    }

    /// Like [`search`](Self::search) with a ceiling on total wall time.
    pub async fn search_with_timeout(
        &self,
        query: &Query,
        limit: Duration,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let session = SearchSession::new(query.text());
        match tokio::time::timeout(limit, self.search_with_session(query, &session)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let err = SearchError::Timeout {
                    provider: "engine".to_string(),
                    timeout_secs: limit.as_secs(),
                };
                self.errors.lock().record(&err);
                self.search_failed(&session, &err);
                Err(err)
            }
        }
    }

    fn search_failed(&self, session: &SearchSession, err: &SearchError) {
        session.fail(err.to_string());
        self.metrics.lock().record_search_failed();
        warn!(session = %session.id(), error = %err, "Search failed");
        self.events.publish(EngineEvent::SearchFailed {
            session_id: session.id(),
            error: err.to_string(),
        });
    }

    /// Run a research plan to completion.
    pub async fn research(&self, plan: &ResearchPlan) -> Result<ResearchReport, DelveError> {
        self.research_with_cancel(plan, &CancellationToken::new())
            .await
    }

    /// Build a plan for `topic` from the configured research defaults and run it.
    pub async fn research_topic(&self, topic: &str) -> Result<ResearchReport, DelveError> {
        let plan = ResearchPlan::builder(topic)
            .defaults(&self.config.research)
            .build()?;
        self.research(&plan).await
    }

    /// Run a research plan, stopping at the next phase boundary once
    /// `cancel` fires.
    pub async fn research_with_cancel(
        &self,
        plan: &ResearchPlan,
        cancel: &CancellationToken,
    ) -> Result<ResearchReport, DelveError> {
        self.metrics.lock().record_research();
        let backend: Arc<dyn SearchBackend> = self.pipeline.clone();
        let mut agent =
            DeepResearchAgent::new(backend, Arc::clone(&self.crawler), self.events.clone());
        if let Some(model) = &self.model {
            agent = agent.with_model(Arc::clone(model));
        }
        if let Some(corpus) = &self.corpus {
            agent = agent.with_corpus(Arc::clone(corpus));
        }
        Ok(agent.run(plan, cancel).await?)
    }

    /// Fetch and extract one page.
    pub async fn crawl(&self, url: &str) -> CrawlOutcome {
        let outcome = self.crawler.crawl(url).await;
        self.after_crawl(&outcome);
        outcome
    }

    /// Fetch and extract many pages concurrently, keeping input order.
    pub async fn crawl_many(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Vec<CrawlOutcome> {
        let outcomes = self.crawler.crawl_many(urls, cancel).await;
        for outcome in &outcomes {
            self.after_crawl(outcome);
        }
        outcomes
    }

    /// Breadth-first walk of `start`'s host within the crawl policy limits.
    pub async fn crawl_site(&self, start: &str, cancel: &CancellationToken) -> Vec<CrawlOutcome> {
        let outcomes = self.crawler.crawl_site(start, cancel).await;
        for outcome in &outcomes {
            self.after_crawl(outcome);
        }
        outcomes
    }

    fn after_crawl(&self, outcome: &CrawlOutcome) {
        self.metrics.lock().record_crawl(outcome.is_extracted());
        match outcome {
            CrawlOutcome::Extracted(content) => {
                if let Some(corpus) = &self.corpus {
                    corpus.index(content);
                }
            }
            CrawlOutcome::Skipped { url, reason } => {
                debug!(url = %url, reason = %reason, "Crawl skipped");
            }
            CrawlOutcome::Failed { url, error } => {
                self.errors.lock().record(error);
                debug!(url = %url, error = %error, "Crawl failed");
            }
        }
    }

    /// Probe disabled providers, then report provider, cache and error
    /// health.
    pub async fn health_check(&self) -> HealthReport {
        let breakers = self.pipeline.executor().breaker_states();
        let mut providers = BTreeMap::new();
        for provider in self.registry.iter() {
            if !provider.is_available() && provider.health_check().await {
                info!(provider = %provider.name(), "Provider recovered on health probe");
            }
            let stats = provider.stats();
            let circuit = breakers
                .get(provider.name())
                .map(|b| b.status)
                .unwrap_or(CircuitStatus::Closed);
            providers.insert(
                provider.name().to_string(),
                ProviderHealth {
                    available: provider.is_available(),
                    success_rate: stats.success_rate,
                    consecutive_failures: stats.consecutive_failures,
                    circuit,
                },
            );
        }

        let recent_errors = self.errors.lock().recent();
        let status = overall_status(&providers, recent_errors.len());
        debug!(%status, providers = providers.len(), "Health check");
        HealthReport {
            status,
            providers,
            cache_hit_rate: self.cache.metrics().hit_rate(),
            avg_latency_ms: self.metrics.lock().avg_latency_ms(),
            recent_errors,
        }
    }
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("providers", &self.registry.names())
            .field("pipeline", &self.pipeline)
            .field("local_corpus", &self.corpus.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`SearchEngine`] from configuration plus injected parts.
pub struct SearchEngineBuilder {
    config: EngineConfig,
    registry: Option<ProviderRegistry>,
    cache: Option<Arc<ResponseCache>>,
    providers: Vec<Arc<dyn SearchProvider>>,
    fetcher: Option<Arc<dyn PageFetcher>>,
    external: Vec<Arc<dyn ExternalExtractor>>,
    model: Option<Arc<dyn ModelClient>>,
    events: Option<EventBus>,
    consolidator: ResultConsolidator,
}

impl SearchEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: None,
            cache: None,
            providers: Vec::new(),
            fetcher: None,
            external: Vec::new(),
            model: None,
            events: None,
            consolidator: ResultConsolidator::default(),
        }
    }

    /// Start from a prebuilt registry. Pass the cache it was built with
    /// through [`cache`](Self::cache) so health reports see its metrics.
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Register a provider using its `[providers.<name>]` settings.
    pub fn provider(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Replace the HTTP page fetcher.
    pub fn fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Append an external stage to the extraction cascade.
    pub fn external_extractor(mut self, extractor: Arc<dyn ExternalExtractor>) -> Self {
        self.external.push(extractor);
        self
    }

    pub fn model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn consolidator(mut self, consolidator: ResultConsolidator) -> Self {
        self.consolidator = consolidator;
        self
    }

    pub fn build(self) -> Result<SearchEngine, DelveError> {
        self.config.ensure_valid()?;
        let config = self.config;

        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(ResponseCache::new(&config.cache)));
        let mut registry = self.registry.unwrap_or_default();
        for provider in self.providers {
            if !config.provider(provider.name()).enabled {
                debug!(provider = %provider.name(), "Provider disabled by config");
                continue;
            }
            let settings = config.provider(provider.name());
            registry.register_provider(provider, &settings, Arc::clone(&cache))?;
        }

        let wants_local = config
            .providers
            .get(LOCAL_PROVIDER)
            .is_some_and(|p| p.enabled);
        let corpus = if wants_local && !registry.contains(LOCAL_PROVIDER) {
            let corpus = Arc::new(LocalHeuristicProvider::new(LOCAL_PROVIDER));
            let provider: Arc<dyn SearchProvider> = corpus.clone();
            registry.register_provider(
                provider,
                &config.provider(LOCAL_PROVIDER),
                Arc::clone(&cache),
            )?;
            Some(corpus)
        } else {
            None
        };

        if !registry.contains(&config.search.primary_provider) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "primary provider '{}' is not registered",
                    config.search.primary_provider
                ),
            }
            .into());
        }
        for name in &config.search.fallback_chain {
            if !registry.contains(name) {
                warn!(provider = %name, "Fallback provider is not registered, skipping");
            }
        }

        let registry = Arc::new(registry);
        let errors = Arc::new(Mutex::new(ErrorTracker::new(
            ERROR_HISTORY_CAPACITY,
            ERROR_WINDOW,
        )));
        let executor = Arc::new(FaultTolerantExecutor::new(
            Arc::clone(&registry),
            config.resilience.clone(),
            config.search.fallback_chain.clone(),
            config.search.call_timeout(),
            Arc::clone(&errors),
        ));
        let pipeline = Arc::new(SearchPipeline::new(
            executor,
            self.consolidator,
            config.search.primary_provider.clone(),
        ));

        let mut extractor = ContentExtractor::new();
        for stage in self.external {
            extractor = extractor.with_external(stage);
        }
        let crawler = match self.fetcher {
            Some(fetcher) => Crawler::new(config.crawler.clone(), fetcher, extractor)?,
            None => Crawler::with_http(config.crawler.clone(), extractor)?,
        };

        info!(
            providers = ?registry.names(),
            primary = %config.search.primary_provider,
            cache = cache.is_enabled(),
            "Search engine ready"
        );

        Ok(SearchEngine {
            registry,
            cache,
            pipeline,
            crawler: Arc::new(crawler),
            corpus,
            model: self.model,
            events: self.events.unwrap_or_default(),
            metrics: Mutex::new(EngineMetrics::new()),
            errors,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::crawler::FetchedPage;
    use crate::providers::MockSearchProvider;
    use crate::types::{ProviderKind, SearchMode};
    use std::sync::atomic::Ordering;

    struct StaticFetcher;

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, SearchError> {
            if url.ends_with("/robots.txt") {
                return Ok(FetchedPage {
                    url: url.to_string(),
                    status: 404,
                    content_type: None,
                    body: String::new(),
                    truncated: false,
                });
            }
            Ok(FetchedPage {
                url: url.to_string(),
                status: 200,
                content_type: Some("text/html; charset=utf-8".to_string()),
                body: "<html><head><title>Duck flyways</title></head><body><article>\
                       <p>Mallards migrate south along the Mississippi flyway every autumn. \
                       Biologists follow them with lightweight satellite tags.</p>\
                       <p>Stopover wetlands give the birds a place to rest and feed. \
                       Drained marshes force longer flights between safe water.</p>\
                       <p>Warmer springs pull the return migration earlier each decade. \
                       Banding records show the shift across the whole continent.</p>\
                       </article></body></html>"
                    .to_string(),
                truncated: false,
            })
        }
    }

    fn config(primary: &str, fallback: &[&str]) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.providers.remove("duckduckgo");
        config.providers.remove("metered");
        for name in std::iter::once(&primary).chain(fallback) {
            config
                .providers
                .entry(name.to_string())
                .or_insert_with(|| ProviderConfig {
                    rate_limit_rps: 0.0,
                    retry_attempts: Some(1),
                    ..Default::default()
                });
        }
        config.search.primary_provider = primary.to_string();
        config.search.fallback_chain = fallback.iter().map(|s| s.to_string()).collect();
        config.resilience.retry.jitter = false;
        config
    }

    fn engine(config: EngineConfig, providers: Vec<MockSearchProvider>) -> SearchEngine {
        let mut builder = SearchEngine::builder(config).fetcher(Arc::new(StaticFetcher));
        for provider in providers {
            builder = builder.provider(Arc::new(provider));
        }
        builder.build().unwrap()
    }

    fn query(text: &str, mode: SearchMode, max_results: usize) -> Query {
        Query::builder(text)
            .mode(mode)
            .max_results(max_results)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_build_requires_registered_primary() {
        let err = SearchEngine::builder(config("missing", &[]))
            .fetcher(Arc::new(StaticFetcher))
            .build()
            .unwrap_err();
        assert!(matches!(err, DelveError::Config(_)));
    }

    #[tokio::test]
    async fn test_build_registers_local_corpus() {
        let engine = engine(
            config("primary", &["local"]),
            vec![MockSearchProvider::new("primary").with_results(2)],
        );
        assert_eq!(engine.registry().names(), vec!["primary", "local"]);
        assert!(engine.corpus().is_some());
    }

    #[tokio::test]
    async fn test_lightning_search_caps_and_sorts() {
        let engine = engine(
            config("primary", &[]),
            vec![MockSearchProvider::new("primary").with_results(5)],
        );
        let results = engine
            .search(&query("duck migration", SearchMode::Lightning, 3))
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(
            results
                .windows(2)
                .all(|w| w[0].relevance_score >= w[1].relevance_score)
        );

        let metrics = engine.metrics();
        assert_eq!(metrics.searches_completed, 1);
        assert_eq!(metrics.results_returned, 3);
    }

    #[tokio::test]
    async fn test_deep_mode_fans_out_to_every_provider() {
        let alpha = MockSearchProvider::new("alpha").with_fixed_results(vec![
            SearchResult::new("https://alpha.org/ducks", "Ducks", "alpha", ProviderKind::Mock),
        ]);
        let beta = MockSearchProvider::new("beta").with_fixed_results(vec![
            SearchResult::new("https://beta.org/geese", "Geese", "beta", ProviderKind::Mock),
        ]);
        let engine = engine(config("alpha", &["beta"]), vec![alpha, beta]);

        let session = SearchSession::new("waterfowl");
        let results = engine
            .search_with_session(&query("waterfowl", SearchMode::Deep, 10), &session)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        let record = session.snapshot();
        assert!(record.providers_used.contains(&"alpha".to_string()));
        assert!(record.providers_used.contains(&"beta".to_string()));
    }

    #[tokio::test]
    async fn test_deep_mode_total_failure_calls_each_provider_once() {
        let alpha = MockSearchProvider::new("alpha").always_failing(SearchError::Auth {
            provider: "alpha".into(),
        });
        let beta = MockSearchProvider::new("beta").always_failing(SearchError::Auth {
            provider: "beta".into(),
        });
        let alpha_calls = alpha.call_counter();
        let beta_calls = beta.call_counter();
        let mut config = config("alpha", &["beta"]);
        config.providers.remove(LOCAL_PROVIDER);
        let engine = engine(config, vec![alpha, beta]);

        let session = SearchSession::new("waterfowl");
        let err = engine
            .search_with_session(&query("waterfowl", SearchMode::Deep, 10), &session)
            .await
            .unwrap_err();

        match err {
            SearchError::Exhausted {
                provider,
                query,
                chain,
                source,
                ..
            } => {
                assert_eq!(provider, "alpha");
                assert_eq!(query, "waterfowl");
                assert_eq!(chain, vec!["alpha", "beta"]);
                assert!(matches!(*source, SearchError::Auth { .. }));
            }
            other => panic!("expected exhausted chain, got {other:?}"),
        }
        assert_eq!(alpha_calls.load(Ordering::SeqCst), 1);
        assert_eq!(beta_calls.load(Ordering::SeqCst), 1);
        assert!(session.snapshot().warnings.len() >= 2);
    }

    #[tokio::test]
    async fn test_standard_mode_falls_back() {
        let failing = MockSearchProvider::new("primary").always_failing(SearchError::Auth {
            provider: "primary".into(),
        });
        let backup = MockSearchProvider::new("backup").with_results(2);
        let engine = engine(config("primary", &["backup"]), vec![failing, backup]);

        let session = SearchSession::new("ducks");
        let results = engine
            .search_with_session(&query("ducks", SearchMode::Standard, 10), &session)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.provider_name == "backup"));
        assert!(!session.snapshot().warnings.is_empty());
    }

    #[tokio::test]
    async fn test_total_failure_publishes_event() {
        let failing = MockSearchProvider::new("primary").always_failing(SearchError::Auth {
            provider: "primary".into(),
        });
        let engine = engine(config("primary", &[]), vec![failing]);
        let mut rx = engine.subscribe();

        let err = engine
            .search(&query("ducks", SearchMode::Standard, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Exhausted { .. }));

        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineEvent::SearchStarted { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineEvent::SearchFailed { .. }
        ));
        assert_eq!(engine.metrics().searches_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_with_timeout() {
        let slow = MockSearchProvider::new("primary")
            .with_results(1)
            .with_delay(Duration::from_secs(20));
        let engine = engine(config("primary", &[]), vec![slow]);
        let err = engine
            .search_with_timeout(&query("ducks", SearchMode::Lightning, 5), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Timeout { timeout_secs: 2, .. }));
    }

    #[tokio::test]
    async fn test_crawl_indexes_local_corpus() {
        let engine = engine(
            config("primary", &["local"]),
            vec![MockSearchProvider::new("primary").with_results(1)],
        );
        let outcome = engine.crawl("https://birds.example.org/flyways").await;
        assert!(outcome.is_extracted());
        assert_eq!(engine.corpus().map(|c| c.len()), Some(1));
        assert_eq!(engine.metrics().pages_crawled, 1);
    }

    #[tokio::test]
    async fn test_crawl_site_without_links_stops_at_start_page() {
        let engine = engine(
            config("primary", &[]),
            vec![MockSearchProvider::new("primary").with_results(1)],
        );
        let outcomes = engine
            .crawl_site("https://birds.example.org/flyways", &CancellationToken::new())
            .await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_extracted());
        assert_eq!(engine.metrics().pages_crawled, 1);
    }

    #[tokio::test]
    async fn test_health_report() {
        let engine = engine(
            config("primary", &[]),
            vec![MockSearchProvider::new("primary").with_results(1)],
        );
        let report = engine.health_check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        let primary = &report.providers["primary"];
        assert!(primary.available);
        assert_eq!(primary.circuit, CircuitStatus::Closed);
        assert!(report.recent_errors.is_empty());
    }

    #[test]
    fn test_overall_status() {
        let healthy = ProviderHealth {
            available: true,
            success_rate: 1.0,
            consecutive_failures: 0,
            circuit: CircuitStatus::Closed,
        };
        let down = ProviderHealth {
            available: false,
            success_rate: 0.0,
            consecutive_failures: 5,
            circuit: CircuitStatus::Open,
        };

        let mut providers = BTreeMap::from([("a".to_string(), healthy.clone())]);
        assert_eq!(overall_status(&providers, 0), HealthStatus::Healthy);
        assert_eq!(
            overall_status(&providers, DEGRADED_ERROR_COUNT),
            HealthStatus::Degraded
        );
        providers.insert("b".to_string(), down.clone());
        assert_eq!(overall_status(&providers, 0), HealthStatus::Degraded);
        let only_down = BTreeMap::from([("b".to_string(), down)]);
        assert_eq!(overall_status(&only_down, 0), HealthStatus::Unhealthy);
    }
}
