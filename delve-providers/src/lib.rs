//! # Delve Providers
//!
//! Network-backed implementations of the Delve core traits.
//! Provides the free DuckDuckGo chain, the metered JSON search API, the
//! external extraction services, and factories that build them from an
//! [`EngineConfig`].

pub mod free;
pub mod http;
pub mod metered;
pub mod reader;

pub use free::FreeSearchProvider;
pub use metered::MeteredApiProvider;
pub use reader::{ManagedCrawlExtractor, ReaderServiceExtractor};

use anyhow::Context;
use delve_core::cache::ResponseCache;
use delve_core::config::EngineConfig;
use delve_core::crawler::ExternalExtractor;
use delve_core::engine::LOCAL_PROVIDER;
use delve_core::providers::{ProviderRegistry, SearchProvider};
use std::sync::Arc;

/// Section names that configure the free DuckDuckGo chain.
pub const FREE_PROVIDERS: &[&str] = &["duckduckgo", "free"];

/// Default section name of the metered API.
pub const METERED_PROVIDER: &str = "metered";

/// Build every enabled search provider in `config.providers`.
///
/// Free sections get the DuckDuckGo chain, sections with an `api_endpoint`
/// get a metered API provider. The `local` provider belongs to the engine
/// and extractor sections are left to [`build_extractors`]. A metered
/// provider without a key is skipped with a warning.
pub fn build_registry(
    config: &EngineConfig,
    cache: Arc<ResponseCache>,
) -> anyhow::Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    for (name, settings) in &config.providers {
        if !settings.enabled
            || name == LOCAL_PROVIDER
            || name == reader::READER_SERVICE
            || name == reader::MANAGED_CRAWL
        {
            continue;
        }

        let provider: Arc<dyn SearchProvider> = if FREE_PROVIDERS.contains(&name.as_str()) {
            Arc::new(
                FreeSearchProvider::new(name.as_str(), settings.timeout())
                    .with_context(|| format!("building provider '{name}'"))?,
            )
        } else if settings.api_endpoint.is_some() || name == METERED_PROVIDER {
            let metered = MeteredApiProvider::from_config(name, settings)
                .with_context(|| format!("building provider '{name}'"))?;
            if !metered.has_key() {
                tracing::warn!(provider = %name, "No API key configured, skipping provider");
                continue;
            }
            Arc::new(metered)
        } else {
            tracing::warn!(provider = %name, "Unknown provider section without api_endpoint");
            continue;
        };

        registry
            .register_provider(provider, settings, Arc::clone(&cache))
            .with_context(|| format!("registering provider '{name}'"))?;
    }
    Ok(registry)
}

/// Build the enabled external extraction stages, reader service first.
pub fn build_extractors(
    config: &EngineConfig,
) -> anyhow::Result<Vec<Arc<dyn ExternalExtractor>>> {
    let mut stages: Vec<Arc<dyn ExternalExtractor>> = Vec::new();
    if let Some(settings) = config
        .providers
        .get(reader::READER_SERVICE)
        .filter(|s| s.enabled)
    {
        stages.push(Arc::new(
            ReaderServiceExtractor::from_config(settings).context("building reader service")?,
        ));
    }
    if let Some(settings) = config
        .providers
        .get(reader::MANAGED_CRAWL)
        .filter(|s| s.enabled)
    {
        match ManagedCrawlExtractor::from_config(settings) {
            Ok(stage) => stages.push(Arc::new(stage)),
            Err(e) => tracing::warn!(error = %e, "Managed crawl extractor disabled"),
        }
    }
    Ok(stages)
}
