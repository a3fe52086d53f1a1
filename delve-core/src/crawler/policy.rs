//! Crawl policy: what may be fetched, how fast, and what is kept.

use crate::types::domain_matches;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits and filters applied to every crawled URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlPolicy {
    /// Concurrent fetches across the crawler (default: 5).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Per-fetch timeout in seconds (default: 30).
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    /// Extracted text shorter than this is skipped (default: 100 chars).
    #[serde(default = "default_min_content_length")]
    pub min_content_length: usize,
    /// Bodies longer than this are truncated (default: 1,000,000 bytes).
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    /// Link depth for site crawls (default: 3).
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Page budget for site crawls (default: 50).
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
    #[serde(default)]
    pub blocked_mime_types: Vec<String>,
    /// When non-empty, only these domains (and subdomains) are crawled.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub blocked_domains: Vec<String>,
    /// Regexes matched against the full URL.
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub respect_robots_txt: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_max_concurrent() -> usize {
    5
}
fn default_timeout_s() -> u64 {
    30
}
fn default_min_content_length() -> usize {
    100
}
fn default_max_content_length() -> usize {
    1_000_000
}
fn default_max_depth() -> u32 {
    3
}
fn default_max_pages() -> usize {
    50
}
fn default_allowed_mime_types() -> Vec<String> {
    vec![
        "text/html".to_string(),
        "application/xhtml+xml".to_string(),
        "text/plain".to_string(),
    ]
}
fn default_true() -> bool {
    true
}
fn default_user_agent() -> String {
    "DelveBot/1.0".to_string()
}

impl Default for CrawlPolicy {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            timeout_s: default_timeout_s(),
            min_content_length: default_min_content_length(),
            max_content_length: default_max_content_length(),
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
            allowed_mime_types: default_allowed_mime_types(),
            blocked_mime_types: Vec::new(),
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            blocked_patterns: Vec::new(),
            respect_robots_txt: true,
            user_agent: default_user_agent(),
        }
    }
}

impl CrawlPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_concurrent == 0 {
            errors.push("crawler.max_concurrent must be > 0".to_string());
        }
        if self.timeout_s == 0 {
            errors.push("crawler.timeout_s must be > 0".to_string());
        }
        if self.max_content_length == 0 {
            errors.push("crawler.max_content_length must be > 0".to_string());
        }
        if self.min_content_length > self.max_content_length {
            errors.push(
                "crawler.min_content_length must not exceed max_content_length".to_string(),
            );
        }
        if self.max_depth == 0 {
            errors.push("crawler.max_depth must be > 0".to_string());
        }
        if self.user_agent.trim().is_empty() {
            errors.push("crawler.user_agent must not be empty".to_string());
        }
        for pattern in &self.blocked_patterns {
            if let Err(e) = Regex::new(pattern) {
                errors.push(format!("crawler.blocked_patterns: invalid regex {pattern:?}: {e}"));
            }
        }
        errors
    }

    /// Compile the blocked patterns, skipping invalid ones.
    pub fn compiled_patterns(&self) -> Vec<Regex> {
        self.blocked_patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    }

    pub fn domain_permitted(&self, host: &str) -> Result<(), SkipReason> {
        if self.blocked_domains.iter().any(|d| domain_matches(host, d)) {
            return Err(SkipReason::BlockedDomain(host.to_string()));
        }
        if !self.allowed_domains.is_empty()
            && !self.allowed_domains.iter().any(|d| domain_matches(host, d))
        {
            return Err(SkipReason::DomainNotAllowed(host.to_string()));
        }
        Ok(())
    }

    /// Check a `Content-Type` header value. A missing header is accepted.
    pub fn mime_permitted(&self, content_type: Option<&str>) -> Result<(), SkipReason> {
        let Some(raw) = content_type else {
            return Ok(());
        };
        let mime = raw
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        let matches = |list: &[String]| list.iter().any(|m| m.eq_ignore_ascii_case(&mime));
        if matches(&self.blocked_mime_types) {
            return Err(SkipReason::MimeType(mime));
        }
        if !self.allowed_mime_types.is_empty() && !matches(&self.allowed_mime_types) {
            return Err(SkipReason::MimeType(mime));
        }
        Ok(())
    }
}

/// Why a URL was not crawled. Skips are not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    InvalidUrl(String),
    UnsupportedScheme(String),
    BlockedDomain(String),
    DomainNotAllowed(String),
    BlockedPattern(String),
    RobotsDisallowed,
    MimeType(String),
    TooShort { length: usize, minimum: usize },
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::InvalidUrl(e) => write!(f, "invalid url: {e}"),
            SkipReason::UnsupportedScheme(s) => write!(f, "unsupported scheme {s}"),
            SkipReason::BlockedDomain(d) => write!(f, "domain {d} is blocked"),
            SkipReason::DomainNotAllowed(d) => write!(f, "domain {d} is not in the allow list"),
            SkipReason::BlockedPattern(p) => write!(f, "matches blocked pattern {p}"),
            SkipReason::RobotsDisallowed => write!(f, "disallowed by robots.txt"),
            SkipReason::MimeType(m) => write!(f, "mime type {m} not permitted"),
            SkipReason::TooShort { length, minimum } => {
                write!(f, "content too short ({length} < {minimum} chars)")
            }
            SkipReason::Cancelled => write!(f, "cancelled before start"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = CrawlPolicy::default();
        assert_eq!(p.max_concurrent, 5);
        assert_eq!(p.timeout(), Duration::from_secs(30));
        assert_eq!(p.min_content_length, 100);
        assert_eq!(p.max_content_length, 1_000_000);
        assert_eq!(p.max_depth, 3);
        assert_eq!(p.user_agent, "DelveBot/1.0");
        assert!(p.validate().is_empty());
    }

    #[test]
    fn test_validate_flags_bad_regex() {
        let p = CrawlPolicy {
            blocked_patterns: vec!["(unclosed".into(), r"\.pdf$".into()],
            max_concurrent: 0,
            ..Default::default()
        };
        let errors = p.validate();
        assert_eq!(errors.len(), 2);
        assert_eq!(p.compiled_patterns().len(), 1);
    }

    #[test]
    fn test_domain_filters() {
        let p = CrawlPolicy {
            blocked_domains: vec!["spam.com".into()],
            ..Default::default()
        };
        assert!(p.domain_permitted("example.com").is_ok());
        assert_eq!(
            p.domain_permitted("ads.spam.com"),
            Err(SkipReason::BlockedDomain("ads.spam.com".into()))
        );

        let p = CrawlPolicy {
            allowed_domains: vec!["example.org".into()],
            ..Default::default()
        };
        assert!(p.domain_permitted("docs.example.org").is_ok());
        assert!(p.domain_permitted("other.net").is_err());
    }

    #[test]
    fn test_mime_filters() {
        let p = CrawlPolicy::default();
        assert!(p.mime_permitted(Some("text/html; charset=utf-8")).is_ok());
        assert!(p.mime_permitted(None).is_ok());
        assert_eq!(
            p.mime_permitted(Some("application/pdf")),
            Err(SkipReason::MimeType("application/pdf".into()))
        );
    }

    #[test]
    fn test_deserialize_partial() {
        let p: CrawlPolicy = toml::from_str("max_concurrent = 2\nrespect_robots_txt = false").unwrap();
        assert_eq!(p.max_concurrent, 2);
        assert!(!p.respect_robots_txt);
        assert_eq!(p.max_content_length, 1_000_000);
    }
}
