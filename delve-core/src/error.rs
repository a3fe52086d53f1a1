//! Error types for the Delve search core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering provider calls, crawling, configuration, and research. Every
//! [`SearchError`] can be classified into an [`ErrorKind`] with a
//! [`Severity`] and a suggested [`RecoveryAction`]; the classification drives
//! both the retry policy and observability logging.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level error type for the Delve core library.
#[derive(Debug, thiserror::Error)]
pub enum DelveError {
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Research error: {0}")]
    Research(#[from] ResearchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from provider calls, fetching, and extraction.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    #[error("Network error from {provider}: {message}")]
    Network { provider: String, message: String },

    #[error("{provider} timed out after {timeout_secs}s")]
    Timeout { provider: String, timeout_secs: u64 },

    #[error("Rate limited by {provider}{}", retry_hint(.retry_after_secs))]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Authentication failed for provider {provider}")]
    Auth { provider: String },

    #[error("Failed to parse response from {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    #[error("Invalid input: {message}")]
    Validation { message: String },

    #[error("Provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("Circuit open for provider {provider}")]
    CircuitOpen { provider: String },

    #[error("Provider {provider} is unavailable")]
    ProviderUnavailable { provider: String },

    #[error("Provider not found: {name}")]
    ProviderNotFound { name: String },

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Internal error: {message}")]
    System { message: String },

    #[error(
        "All providers failed for query '{query}' (last provider {provider}, {attempts} attempts, chain: {}): {source}",
        .chain.join(" -> ")
    )]
    Exhausted {
        provider: String,
        query: String,
        attempts: u32,
        chain: Vec<String>,
        #[source]
        source: Box<SearchError>,
    },
}

fn retry_hint(retry_after_secs: &Option<u64>) -> String {
    match retry_after_secs {
        Some(secs) => format!(", retry after {secs}s"),
        None => String::new(),
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },

    #[error("Logging initialization failed: {message}")]
    Logging { message: String },
}

/// Errors from the deep research agent.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("Invalid research plan: {}", .violations.join("; "))]
    InvalidPlan { violations: Vec<String> },

    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Research was cancelled during {phase}")]
    Cancelled { phase: String },

    #[error("Research time budget of {budget_secs}s exceeded during {phase}")]
    TimeBudgetExceeded { budget_secs: u64, phase: String },

    #[error("Research discovery failed: {0}")]
    Discovery(#[from] SearchError),
}

/// A type alias for results using the top-level `DelveError`.
pub type Result<T> = std::result::Result<T, DelveError>;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Broad category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimit,
    Auth,
    Parsing,
    Validation,
    Provider,
    System,
    Unknown,
}

impl ErrorKind {
    /// Whether failures of this kind are worth retrying.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimit | ErrorKind::Provider
        )
    }

    pub fn severity(self) -> Severity {
        match self {
            ErrorKind::Validation | ErrorKind::Parsing => Severity::Low,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimit => Severity::Medium,
            ErrorKind::Provider | ErrorKind::Unknown => Severity::High,
            ErrorKind::Auth | ErrorKind::System => Severity::Critical,
        }
    }

    pub fn recovery_action(self) -> RecoveryAction {
        match self {
            ErrorKind::Network | ErrorKind::Timeout => RecoveryAction::RetryWithBackoff,
            ErrorKind::RateLimit => RecoveryAction::WaitAndRetry,
            ErrorKind::Auth => RecoveryAction::RefreshCredentials,
            ErrorKind::Parsing => RecoveryAction::FallbackParser,
            ErrorKind::Provider => RecoveryAction::SwitchProvider,
            ErrorKind::Validation | ErrorKind::System | ErrorKind::Unknown => {
                RecoveryAction::Escalate
            }
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Auth => "auth",
            ErrorKind::Parsing => "parsing",
            ErrorKind::Validation => "validation",
            ErrorKind::Provider => "provider",
            ErrorKind::System => "system",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// How bad a failure is for the overall system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Suggested reaction to a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    RetryWithBackoff,
    WaitAndRetry,
    RefreshCredentials,
    FallbackParser,
    SwitchProvider,
    Escalate,
}

/// Full classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub action: RecoveryAction,
}

impl From<ErrorKind> for ErrorClassification {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            action: kind.recovery_action(),
        }
    }
}

impl SearchError {
    /// The kind of this error, determined by its variant.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SearchError::Network { .. } => ErrorKind::Network,
            SearchError::Timeout { .. } => ErrorKind::Timeout,
            SearchError::RateLimited { .. } => ErrorKind::RateLimit,
            SearchError::Auth { .. } => ErrorKind::Auth,
            SearchError::Parse { .. } => ErrorKind::Parsing,
            SearchError::Validation { .. } => ErrorKind::Validation,
            SearchError::Provider { .. }
            | SearchError::CircuitOpen { .. }
            | SearchError::ProviderUnavailable { .. } => ErrorKind::Provider,
            SearchError::ProviderNotFound { .. } | SearchError::Cancelled => ErrorKind::System,
            SearchError::System { message } => classify_message(message),
            SearchError::Exhausted { source, .. } => source.kind(),
        }
    }

    pub fn classify(&self) -> ErrorClassification {
        let mut classification = ErrorClassification::from(self.kind());
        if let SearchError::Exhausted { .. } = self {
            classification.severity = Severity::High.max(classification.severity);
            classification.action = RecoveryAction::Escalate;
        }
        classification
    }

    /// Whether retrying the same call could succeed.
    ///
    /// Breaker rejections are not retried against the same provider; they
    /// move the executor on to the next provider instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            SearchError::CircuitOpen { .. }
            | SearchError::ProviderUnavailable { .. }
            | SearchError::Exhausted { .. }
            | SearchError::Cancelled => false,
            other => other.kind().is_retryable(),
        }
    }

    /// Provider name attached to the error, if any.
    pub fn provider(&self) -> Option<&str> {
        match self {
            SearchError::Network { provider, .. }
            | SearchError::Timeout { provider, .. }
            | SearchError::RateLimited { provider, .. }
            | SearchError::Auth { provider }
            | SearchError::Provider { provider, .. }
            | SearchError::CircuitOpen { provider }
            | SearchError::ProviderUnavailable { provider }
            | SearchError::Exhausted { provider, .. } => Some(provider),
            SearchError::Parse { source_name, .. } => Some(source_name),
            _ => None,
        }
    }

    /// Build an error from an untyped message (e.g. a string crossing an
    /// FFI or subprocess boundary) using keyword classification.
    pub fn from_untyped(provider: impl Into<String>, message: impl Into<String>) -> Self {
        let provider = provider.into();
        let message = message.into();
        match classify_message(&message) {
            ErrorKind::Network => SearchError::Network { provider, message },
            ErrorKind::Timeout => SearchError::Timeout {
                provider,
                timeout_secs: 0,
            },
            ErrorKind::RateLimit => SearchError::RateLimited {
                provider,
                retry_after_secs: None,
            },
            ErrorKind::Auth => SearchError::Auth { provider },
            ErrorKind::Parsing => SearchError::Parse {
                source_name: provider,
                message,
            },
            ErrorKind::Validation => SearchError::Validation { message },
            ErrorKind::Provider => SearchError::Provider { provider, message },
            ErrorKind::System | ErrorKind::Unknown => SearchError::System { message },
        }
    }
}

/// Keyword-based classification for messages that arrive without a type.
pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["timed out", "timeout", "deadline"]) {
        ErrorKind::Timeout
    } else if has(&["rate limit", "too many requests", "429", "quota"]) {
        ErrorKind::RateLimit
    } else if has(&["unauthorized", "forbidden", "401", "403", "api key", "credential"]) {
        ErrorKind::Auth
    } else if has(&[
        "connection",
        "dns",
        "network",
        "unreachable",
        "reset by peer",
        "broken pipe",
    ]) {
        ErrorKind::Network
    } else if has(&["parse", "invalid json", "unexpected token", "decode", "malformed"]) {
        ErrorKind::Parsing
    } else if has(&["invalid", "validation", "must be", "required"]) {
        ErrorKind::Validation
    } else if has(&["500", "502", "503", "service unavailable", "bad gateway"]) {
        ErrorKind::Provider
    } else if has(&["out of memory", "panic", "internal"]) {
        ErrorKind::System
    } else {
        ErrorKind::Unknown
    }
}
