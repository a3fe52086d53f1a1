//! Research source tracking.
//!
//! Collects discovered URLs across rounds (deduplicated by normalized URL and
//! capped at the plan's source budget) and the extractions made from them.

use crate::ranking::{normalize_url, url_authority};
use crate::types::{ContentKind, ExtractedContent, SearchResult, UrlParts, domain_matches};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use uuid::Uuid;

/// A source discovered during research.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSource {
    pub id: Uuid,
    pub url: String,
    pub title: String,
    pub domain: String,
    /// Provider that first reported this source.
    pub provider: String,
    pub kind: ContentKind,
    /// Domain-heuristic reliability (0.0-1.0).
    pub authority: f64,
    pub relevance: f64,
    pub discovered_round: u32,
    pub discovered_at: DateTime<Utc>,
    /// Quality of the extraction, once the page has been extracted.
    pub quality: Option<f64>,
}

/// Tracks every source and extraction for one research run.
#[derive(Debug)]
pub struct SourceTracker {
    max_sources: usize,
    include_domains: Vec<String>,
    exclude_domains: Vec<String>,
    sources: Vec<ResearchSource>,
    seen: HashSet<String>,
    extractions: Vec<ExtractedContent>,
    attempted: HashSet<String>,
}

impl SourceTracker {
    pub fn new(max_sources: usize) -> Self {
        Self {
            max_sources,
            include_domains: Vec::new(),
            exclude_domains: Vec::new(),
            sources: Vec::new(),
            seen: HashSet::new(),
            extractions: Vec::new(),
            attempted: HashSet::new(),
        }
    }

    /// Restrict sources by domain; include rules win only when non-empty.
    pub fn with_domain_filters(mut self, include: &[String], exclude: &[String]) -> Self {
        self.include_domains = include.to_vec();
        self.exclude_domains = exclude.to_vec();
        self
    }

    /// Record a search result as a source. Returns false when it is a
    /// duplicate, filtered out, or the source budget is spent.
    pub fn add_result(&mut self, result: &SearchResult, round: u32) -> bool {
        if self.is_full() || !self.domain_allowed(&UrlParts::parse(&result.url).host) {
            return false;
        }
        let key = normalize_url(&result.url);
        if !self.seen.insert(key) {
            return false;
        }
        self.sources.push(ResearchSource {
            id: Uuid::new_v4(),
            url: result.url.clone(),
            title: result.title.clone(),
            domain: result.domain.clone(),
            provider: result.provider_name.clone(),
            kind: result.content_kind,
            authority: url_authority(&result.url).max(result.authority_score),
            relevance: result.relevance_score,
            discovered_round: round,
            discovered_at: Utc::now(),
            quality: None,
        });
        true
    }

    fn domain_allowed(&self, host: &str) -> bool {
        if self.exclude_domains.iter().any(|p| domain_matches(host, p)) {
            return false;
        }
        self.include_domains.is_empty()
            || self.include_domains.iter().any(|p| domain_matches(host, p))
    }

    pub fn is_full(&self) -> bool {
        self.sources.len() >= self.max_sources
    }

    /// URLs not yet handed to the crawler. Marks them as attempted.
    pub fn take_pending(&mut self) -> Vec<String> {
        let mut pending = Vec::new();
        for source in &self.sources {
            if self.attempted.insert(normalize_url(&source.url)) {
                pending.push(source.url.clone());
            }
        }
        pending
    }

    /// Record an extraction and stamp its quality on the matching source.
    pub fn add_extraction(&mut self, content: ExtractedContent) {
        let key = normalize_url(&content.url);
        if let Some(source) = self
            .sources
            .iter_mut()
            .find(|s| normalize_url(&s.url) == key)
        {
            source.quality = Some(content.quality_score);
            if source.title.trim().is_empty() {
                source.title = content.title.clone();
            }
        }
        self.extractions.push(content);
    }

    pub fn sources(&self) -> &[ResearchSource] {
        &self.sources
    }

    pub fn extractions(&self) -> &[ExtractedContent] {
        &self.extractions
    }

    /// Source record for an extracted URL.
    pub fn source_for(&self, url: &str) -> Option<&ResearchSource> {
        let key = normalize_url(url);
        self.sources.iter().find(|s| normalize_url(&s.url) == key)
    }

    /// Content kinds of the sources that were successfully extracted.
    pub fn extracted_kinds(&self) -> BTreeSet<ContentKind> {
        let kinds: HashMap<String, ContentKind> = self
            .sources
            .iter()
            .map(|s| (normalize_url(&s.url), s.kind))
            .collect();
        self.extractions
            .iter()
            .filter_map(|e| kinds.get(&normalize_url(&e.url)).copied())
            .collect()
    }

    /// Distinct domains among extracted sources.
    pub fn extracted_domains(&self) -> BTreeSet<String> {
        self.extractions
            .iter()
            .filter_map(|e| self.source_for(&e.url).map(|s| s.domain.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderKind;

    fn result(url: &str) -> SearchResult {
        SearchResult::new(url, "Title", "mock", ProviderKind::Mock)
    }

    #[test]
    fn test_dedup_by_normalized_url() {
        let mut tracker = SourceTracker::new(10);
        assert!(tracker.add_result(&result("https://a.com/x?utm_source=feed"), 1));
        assert!(!tracker.add_result(&result("https://a.com/x"), 2));
        assert!(tracker.add_result(&result("https://b.com/y"), 2));
        assert_eq!(tracker.sources().len(), 2);
        assert_eq!(tracker.sources()[1].discovered_round, 2);
    }

    #[test]
    fn test_source_budget() {
        let mut tracker = SourceTracker::new(2);
        assert!(tracker.add_result(&result("https://a.com/1"), 1));
        assert!(tracker.add_result(&result("https://a.com/2"), 1));
        assert!(tracker.is_full());
        assert!(!tracker.add_result(&result("https://a.com/3"), 1));
    }

    #[test]
    fn test_domain_filters() {
        let mut tracker = SourceTracker::new(10)
            .with_domain_filters(&["example.org".to_string()], &["spam.example.org".to_string()]);
        assert!(tracker.add_result(&result("https://www.example.org/a"), 1));
        assert!(!tracker.add_result(&result("https://other.com/a"), 1));
        assert!(!tracker.add_result(&result("https://spam.example.org/a"), 1));
    }

    #[test]
    fn test_pending_is_handed_out_once() {
        let mut tracker = SourceTracker::new(10);
        tracker.add_result(&result("https://a.com/1"), 1);
        assert_eq!(tracker.take_pending(), vec!["https://a.com/1".to_string()]);
        tracker.add_result(&result("https://a.com/2"), 2);
        assert_eq!(tracker.take_pending(), vec!["https://a.com/2".to_string()]);
        assert!(tracker.take_pending().is_empty());
    }
}
