//! Configuration system for Delve.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! explicit config file -> environment. The user config lives at
//! `~/.config/delve/config.toml` (platform equivalent via `directories`).

use crate::cache::CacheConfig;
use crate::crawler::CrawlPolicy;
use crate::error::ConfigError;
use crate::providers::RateLimitConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for the search engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-provider settings keyed by provider name.
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub crawler: CrawlPolicy,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub research: ResearchDefaults,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            search: SearchConfig::default(),
            cache: CacheConfig::default(),
            crawler: CrawlPolicy::default(),
            resilience: ResilienceConfig::default(),
            research: ResearchDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    let mut providers = BTreeMap::new();
    providers.insert(
        "duckduckgo".to_string(),
        ProviderConfig {
            rate_limit_rps: 1.0,
            burst_size: 2,
            ..Default::default()
        },
    );
    providers.insert(
        "metered".to_string(),
        ProviderConfig {
            enabled: false,
            api_key_env: Some("DELVE_METERED_API_KEY".to_string()),
            cost_per_call: 0.005,
            rate_limit_rps: 5.0,
            burst_size: 10,
            ..Default::default()
        },
    );
    providers.insert(
        "local".to_string(),
        ProviderConfig {
            rate_limit_rps: 0.0,
            retry_attempts: Some(1),
            ..Default::default()
        },
    );
    providers
}

impl EngineConfig {
    /// Settings for a provider, or defaults when it has no section.
    pub fn provider(&self, name: &str) -> ProviderConfig {
        self.providers.get(name).cloned().unwrap_or_default()
    }

    /// Validate every section; returns human-readable violations.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (name, provider) in &self.providers {
            errors.extend(provider.validate(name));
        }
        errors.extend(self.search.validate());
        for name in std::iter::once(&self.search.primary_provider)
            .chain(self.search.fallback_chain.iter())
        {
            if !self.providers.contains_key(name) {
                errors.push(format!("search: provider '{name}' has no [providers] section"));
            }
        }
        errors.extend(self.cache.validate());
        errors.extend(self.crawler.validate());
        errors.extend(self.resilience.validate());
        errors.extend(self.research.validate());
        errors
    }

    /// Like [`validate`](Self::validate) but as a `Result`.
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid {
                message: errors.join("; "),
            })
        }
    }
}

/// Settings for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Sustained request rate; 0 disables rate limiting.
    #[serde(default)]
    pub rate_limit_rps: f64,
    #[serde(default = "default_burst")]
    pub burst_size: u32,
    /// Overrides `resilience.retry.max_attempts` for this provider.
    #[serde(default)]
    pub retry_attempts: Option<u32>,
    /// Inline API key. Prefer `api_key_env`.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_endpoint: Option<String>,
    #[serde(default)]
    pub cost_per_call: f64,
    /// Maximum calls per UTC day.
    #[serde(default)]
    pub daily_quota: Option<u64>,
}

fn default_true() -> bool {
    true
}
fn default_timeout_s() -> u64 {
    30
}
fn default_max_concurrent() -> usize {
    5
}
fn default_burst() -> u32 {
    5
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_s: 30,
            max_concurrent: 5,
            rate_limit_rps: 0.0,
            burst_size: 5,
            retry_attempts: None,
            api_key: None,
            api_key_env: None,
            api_endpoint: None,
            cost_per_call: 0.0,
            daily_quota: None,
        }
    }
}

impl ProviderConfig {
    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_second: self.rate_limit_rps,
            burst_size: self.burst_size,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }

    /// The inline key, or the value of `api_key_env` if set.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }
        self.api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
    }

    pub fn validate(&self, name: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.timeout_s == 0 {
            errors.push(format!("providers.{name}.timeout_s must be > 0"));
        }
        if self.max_concurrent == 0 {
            errors.push(format!("providers.{name}.max_concurrent must be > 0"));
        }
        if !self.rate_limit_rps.is_finite() {
            errors.push(format!("providers.{name}.rate_limit_rps must be finite"));
        }
        if self.rate_limit_rps > 0.0 && self.burst_size == 0 {
            errors.push(format!("providers.{name}.burst_size must be > 0"));
        }
        if self.cost_per_call < 0.0 {
            errors.push(format!("providers.{name}.cost_per_call must be >= 0"));
        }
        if self.retry_attempts == Some(0) {
            errors.push(format!("providers.{name}.retry_attempts must be >= 1"));
        }
        errors
    }
}

/// Provider selection for searches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_primary")]
    pub primary_provider: String,
    /// Providers tried in order once the primary is exhausted.
    #[serde(default = "default_fallback_chain")]
    pub fallback_chain: Vec<String>,
    /// Hard ceiling for a single provider call, in seconds.
    #[serde(default = "default_timeout_s")]
    pub call_timeout_s: u64,
}

fn default_primary() -> String {
    "duckduckgo".to_string()
}
fn default_fallback_chain() -> Vec<String> {
    vec!["local".to_string()]
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            primary_provider: default_primary(),
            fallback_chain: default_fallback_chain(),
            call_timeout_s: 30,
        }
    }
}

impl SearchConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_s)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.primary_provider.trim().is_empty() {
            errors.push("search.primary_provider must not be empty".to_string());
        }
        if self.call_timeout_s == 0 {
            errors.push("search.call_timeout_s must be > 0".to_string());
        }
        errors
    }
}

/// Circuit breaker and retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_recovery_timeout_s")]
    pub recovery_timeout_s: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_success_threshold() -> u32 {
    2
}
fn default_recovery_timeout_s() -> u64 {
    60
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout_s: 60,
            retry: RetryConfig::default(),
        }
    }
}

impl ResilienceConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_s)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.failure_threshold == 0 {
            errors.push("resilience.failure_threshold must be > 0".to_string());
        }
        if self.success_threshold == 0 {
            errors.push("resilience.success_threshold must be > 0".to_string());
        }
        errors.extend(self.retry.validate());
        errors
    }
}

/// Configuration for retry behavior on transient provider errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per provider, including the first (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds (default: 500).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay in milliseconds (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier applied per attempt (default: 2.0).
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
    /// Apply ±25% random jitter to delays (default: true).
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_exponential_base() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_attempts == 0 {
            errors.push("resilience.retry.max_attempts must be >= 1".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            errors.push("resilience.retry.max_delay_ms must be >= base_delay_ms".to_string());
        }
        if !(self.exponential_base.is_finite() && self.exponential_base >= 1.0) {
            errors.push("resilience.retry.exponential_base must be >= 1.0".to_string());
        }
        errors
    }
}

/// Defaults applied to research plans built from a bare topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchDefaults {
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
    #[serde(default = "default_time_limit_minutes")]
    pub time_limit_minutes: u64,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    #[serde(default = "default_true")]
    pub verify: bool,
}

fn default_max_sources() -> usize {
    20
}
fn default_time_limit_minutes() -> u64 {
    10
}
fn default_quality_threshold() -> f64 {
    0.3
}

impl Default for ResearchDefaults {
    fn default() -> Self {
        Self {
            max_sources: 20,
            time_limit_minutes: 10,
            quality_threshold: 0.3,
            verify: true,
        }
    }
}

impl ResearchDefaults {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_sources == 0 {
            errors.push("research.max_sources must be > 0".to_string());
        }
        if self.time_limit_minutes == 0 {
            errors.push("research.time_limit_minutes must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            errors.push("research.quality_threshold must be within [0, 1]".to_string());
        }
        errors
    }
}

/// Logging output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    /// Directory for daily-rolling JSON logs; disabled when unset.
    #[serde(default)]
    pub json_log_dir: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json_log_dir: None,
        }
    }
}

/// Path of the user-level config file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "delve", "delve")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (`DELVE_SEARCH__PRIMARY_PROVIDER`, ...)
/// 2. Explicit config file (must exist when given)
/// 3. User config (`~/.config/delve/config.toml`)
/// 4. Built-in defaults
pub fn load_config(explicit: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("DELVE_").split("__"));

    figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}
