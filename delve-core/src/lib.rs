//! # Delve Core
//!
//! Core library for the Delve search and research engine.
//! Provides the query/result model, the provider abstraction with caching,
//! rate limiting and fault tolerance, the crawler and extraction cascade,
//! result ranking, the deep research agent, and the [`SearchEngine`] facade.

pub mod cache;
pub mod config;
pub mod crawler;
pub mod engine;
pub mod error;
pub mod events;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod providers;
pub mod ranking;
pub mod research;
pub mod text;
pub mod types;

// Re-export commonly used types at the crate root.
pub use cache::{CacheConfig, CacheMetrics, ResponseCache};
pub use config::{EngineConfig, ProviderConfig, load_config};
pub use crawler::{CrawlOutcome, CrawlPolicy, Crawler, PageFetcher};
pub use engine::{HealthReport, HealthStatus, SearchEngine, SearchEngineBuilder, SearchPipeline};
pub use error::{ConfigError, DelveError, ResearchError, Result, SearchError};
pub use events::{EngineEvent, EventBus, EventPublisher};
pub use llm::{MockModelClient, ModelClient};
pub use providers::{ProviderRegistry, SearchProvider};
pub use research::{
    OutputFormat, ResearchDepth, ResearchFinding, ResearchPhase, ResearchPlan, ResearchReport,
    VerificationStatus,
};
pub use types::{
    ContentKind, ExtractedContent, ProviderKind, Query, SearchMode, SearchResult, SearchSession,
};
