//! Core type definitions for the Delve engine.
//!
//! Defines the data model shared by every component: queries, search
//! results, per-query sessions and extracted page content.

use crate::error::SearchError;
use crate::text;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Smallest accepted query length in characters (after trimming).
pub const MIN_QUERY_CHARS: usize = 2;
/// Hard upper bound for `max_results`.
pub const MAX_RESULTS_LIMIT: usize = 100;
/// Hard upper bound for crawl depth.
pub const MAX_DEPTH_LIMIT: u32 = 10;

/// How much effort a search should spend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Single provider, freshest results.
    Lightning,
    #[default]
    Standard,
    Deep,
    Exhaustive,
}

impl SearchMode {
    /// Whether this mode queries every available provider concurrently.
    pub fn fans_out(self) -> bool {
        matches!(self, SearchMode::Deep | SearchMode::Exhaustive)
    }
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchMode::Lightning => write!(f, "lightning"),
            SearchMode::Standard => write!(f, "standard"),
            SearchMode::Deep => write!(f, "deep"),
            SearchMode::Exhaustive => write!(f, "exhaustive"),
        }
    }
}

/// The kind of content a result represents.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Web,
    News,
    Academic,
    Images,
    Videos,
    Social,
    Code,
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContentKind::Web => "web",
            ContentKind::News => "news",
            ContentKind::Academic => "academic",
            ContentKind::Images => "images",
            ContentKind::Videos => "videos",
            ContentKind::Social => "social",
            ContentKind::Code => "code",
        };
        f.write_str(s)
    }
}

/// Publication-date filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    #[default]
    Any,
    Day,
    Week,
    Month,
    Year,
}

impl TimeRange {
    /// Maximum accepted age, or `None` for no limit.
    pub fn max_age(self) -> Option<chrono::Duration> {
        match self {
            TimeRange::Any => None,
            TimeRange::Day => Some(chrono::Duration::days(1)),
            TimeRange::Week => Some(chrono::Duration::weeks(1)),
            TimeRange::Month => Some(chrono::Duration::days(30)),
            TimeRange::Year => Some(chrono::Duration::days(365)),
        }
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TimeRange::Any => "any",
            TimeRange::Day => "day",
            TimeRange::Week => "week",
            TimeRange::Month => "month",
            TimeRange::Year => "year",
        };
        f.write_str(s)
    }
}

/// Which family of provider produced a result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Zero-cost chained web search.
    #[default]
    FreeChain,
    /// Paid API with a per-call cost.
    Metered,
    /// Term-overlap search over previously extracted pages.
    LocalHeuristic,
    /// A page produced by the crawler/extractor.
    Extractor,
    Mock,
}

impl ProviderKind {
    /// Trust weight used by deduplication and ranking.
    pub fn trust_weight(self) -> f64 {
        match self {
            ProviderKind::FreeChain => 0.7,
            ProviderKind::Metered => 0.9,
            ProviderKind::LocalHeuristic => 0.5,
            ProviderKind::Extractor => 0.8,
            ProviderKind::Mock => 0.5,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderKind::FreeChain => "free_chain",
            ProviderKind::Metered => "metered",
            ProviderKind::LocalHeuristic => "local_heuristic",
            ProviderKind::Extractor => "extractor",
            ProviderKind::Mock => "mock",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// A validated, immutable search request.
///
/// Construct with [`Query::builder`]; `build()` trims and validates the text
/// and clamps numeric limits into range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    text: String,
    mode: SearchMode,
    content_kinds: BTreeSet<ContentKind>,
    max_results: usize,
    max_depth: u32,
    language: String,
    region: String,
    time_range: TimeRange,
    include_images: bool,
    include_videos: bool,
    safe_search: bool,
    excluded_domains: BTreeSet<String>,
    preferred_domains: BTreeSet<String>,
    context: BTreeMap<String, serde_json::Value>,
}

impl Query {
    pub fn builder(text: impl Into<String>) -> QueryBuilder {
        QueryBuilder::new(text)
    }

    /// Shorthand for a default query over `text`.
    pub fn new(text: impl Into<String>) -> Result<Self, SearchError> {
        Self::builder(text).build()
    }

    /// Builder pre-filled with everything except the text; used to derive
    /// sibling queries (e.g. expanded research queries) from this one.
    pub fn derive(&self, text: impl Into<String>) -> QueryBuilder {
        QueryBuilder {
            text: text.into(),
            mode: self.mode,
            content_kinds: self.content_kinds.clone(),
            max_results: self.max_results,
            max_depth: self.max_depth,
            language: self.language.clone(),
            region: self.region.clone(),
            time_range: self.time_range,
            include_images: self.include_images,
            include_videos: self.include_videos,
            safe_search: self.safe_search,
            excluded_domains: self.excluded_domains.clone(),
            preferred_domains: self.preferred_domains.clone(),
            context: self.context.clone(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    pub fn content_kinds(&self) -> &BTreeSet<ContentKind> {
        &self.content_kinds
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    pub fn include_images(&self) -> bool {
        self.include_images
    }

    pub fn include_videos(&self) -> bool {
        self.include_videos
    }

    pub fn safe_search(&self) -> bool {
        self.safe_search
    }

    pub fn excluded_domains(&self) -> &BTreeSet<String> {
        &self.excluded_domains
    }

    pub fn preferred_domains(&self) -> &BTreeSet<String> {
        &self.preferred_domains
    }

    pub fn context(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.context
    }

    /// Lower-cased, whitespace-compacted text.
    pub fn normalized_text(&self) -> String {
        text::compact_ws(&self.text.to_lowercase())
    }

    /// Stable cache key: SHA-256 over the fields that change a provider's
    /// answer, hex encoded.
    pub fn cache_key(&self) -> String {
        let kinds = self
            .content_kinds
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let material = format!(
            "{}|{}|{}|{}|{}|{}",
            self.normalized_text(),
            kinds,
            self.max_results,
            self.time_range,
            self.language,
            self.region
        );
        let digest = Sha256::digest(material.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Whether `domain` (or a parent of it) is excluded.
    pub fn is_excluded(&self, domain: &str) -> bool {
        self.excluded_domains
            .iter()
            .any(|d| domain_matches(domain, d))
    }

    /// Whether `domain` (or a parent of it) is preferred.
    pub fn is_preferred(&self, domain: &str) -> bool {
        self.preferred_domains
            .iter()
            .any(|d| domain_matches(domain, d))
    }
}

/// Suffix match on label boundaries: `news.example.com` matches `example.com`.
pub fn domain_matches(domain: &str, pattern: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_lowercase();
    let pattern = pattern.trim_start_matches("*.").trim_end_matches('.').to_lowercase();
    if pattern.is_empty() {
        return false;
    }
    domain == pattern || domain.ends_with(&format!(".{pattern}"))
}

/// Builder for [`Query`].
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    text: String,
    mode: SearchMode,
    content_kinds: BTreeSet<ContentKind>,
    max_results: usize,
    max_depth: u32,
    language: String,
    region: String,
    time_range: TimeRange,
    include_images: bool,
    include_videos: bool,
    safe_search: bool,
    excluded_domains: BTreeSet<String>,
    preferred_domains: BTreeSet<String>,
    context: BTreeMap<String, serde_json::Value>,
}

impl QueryBuilder {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: SearchMode::default(),
            content_kinds: BTreeSet::new(),
            max_results: 10,
            max_depth: 3,
            language: "en".into(),
            region: "us".into(),
            time_range: TimeRange::default(),
            include_images: false,
            include_videos: false,
            safe_search: true,
            excluded_domains: BTreeSet::new(),
            preferred_domains: BTreeSet::new(),
            context: BTreeMap::new(),
        }
    }

    pub fn mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Add a requested content kind.
    pub fn content_kind(mut self, kind: ContentKind) -> Self {
        self.content_kinds.insert(kind);
        self
    }

    /// Replace the requested content kinds.
    pub fn content_kinds(mut self, kinds: impl IntoIterator<Item = ContentKind>) -> Self {
        self.content_kinds = kinds.into_iter().collect();
        self
    }

    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn time_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = time_range;
        self
    }

    pub fn include_images(mut self, yes: bool) -> Self {
        self.include_images = yes;
        self
    }

    pub fn include_videos(mut self, yes: bool) -> Self {
        self.include_videos = yes;
        self
    }

    pub fn safe_search(mut self, yes: bool) -> Self {
        self.safe_search = yes;
        self
    }

    pub fn exclude_domain(mut self, domain: impl Into<String>) -> Self {
        self.excluded_domains.insert(domain.into().to_lowercase());
        self
    }

    pub fn prefer_domain(mut self, domain: impl Into<String>) -> Self {
        self.preferred_domains.insert(domain.into().to_lowercase());
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Validate and freeze the query.
    pub fn build(self) -> Result<Query, SearchError> {
        let text = text::compact_ws(self.text.trim());
        if text.chars().count() < MIN_QUERY_CHARS {
            return Err(SearchError::Validation {
                message: format!(
                    "query text must be at least {MIN_QUERY_CHARS} characters, got {:?}",
                    text
                ),
            });
        }

        let mut content_kinds = self.content_kinds;
        if content_kinds.is_empty() {
            content_kinds.insert(ContentKind::Web);
        }

        Ok(Query {
            text,
            mode: self.mode,
            content_kinds,
            max_results: self.max_results.clamp(1, MAX_RESULTS_LIMIT),
            max_depth: self.max_depth.clamp(1, MAX_DEPTH_LIMIT),
            language: self.language,
            region: self.region,
            time_range: self.time_range,
            include_images: self.include_images,
            include_videos: self.include_videos,
            safe_search: self.safe_search,
            excluded_domains: self.excluded_domains,
            preferred_domains: self.preferred_domains,
            context: self.context,
        })
    }
}

// ---------------------------------------------------------------------------
// SearchResult
// ---------------------------------------------------------------------------

/// A single result returned by a provider or produced by the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub snippet: String,
    pub provider: ProviderKind,
    pub provider_name: String,
    #[serde(default)]
    pub content_kind: ContentKind,
    #[serde(default)]
    pub relevance_score: f64,
    #[serde(default)]
    pub trust_score: f64,
    #[serde(default)]
    pub freshness_score: f64,
    #[serde(default)]
    pub authority_score: f64,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub subdomain: Option<String>,
    #[serde(default)]
    pub tld: String,
    #[serde(default)]
    pub is_secure: bool,
    #[serde(default)]
    pub word_count: usize,
    #[serde(default)]
    pub reading_time_minutes: u32,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub headings: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub retrieved_at: DateTime<Utc>,
}

impl SearchResult {
    /// Create a result; URL-derived fields are computed immediately and the
    /// trust score starts at the provider kind's weight.
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        provider_name: impl Into<String>,
        provider: ProviderKind,
    ) -> Self {
        let url = url.into();
        let parts = UrlParts::parse(&url);
        Self {
            url,
            title: title.into(),
            content: String::new(),
            snippet: String::new(),
            provider,
            provider_name: provider_name.into(),
            content_kind: ContentKind::Web,
            relevance_score: 0.0,
            trust_score: provider.trust_weight(),
            freshness_score: 0.0,
            authority_score: 0.0,
            domain: parts.domain,
            subdomain: parts.subdomain,
            tld: parts.tld,
            is_secure: parts.is_secure,
            word_count: 0,
            reading_time_minutes: 1,
            published_at: None,
            modified_at: None,
            links: Vec::new(),
            images: Vec::new(),
            headings: Vec::new(),
            keywords: Vec::new(),
            metadata: BTreeMap::new(),
            retrieved_at: Utc::now(),
        }
    }

    /// Set the full content, recomputing word count and reading time.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self.word_count = self.content.split_whitespace().count();
        self.reading_time_minutes = reading_time_minutes(self.word_count);
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_kind(mut self, kind: ContentKind) -> Self {
        self.content_kind = kind;
        self
    }

    pub fn with_relevance(mut self, score: f64) -> Self {
        self.relevance_score = clamp_unit(score);
        self
    }

    pub fn with_published(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The snippet if present, otherwise the start of the content.
    pub fn preview(&self) -> &str {
        if self.snippet.is_empty() {
            text::prefix_chars(&self.content, 200)
        } else {
            &self.snippet
        }
    }
}

/// `words / 200` minutes, never less than one.
pub fn reading_time_minutes(word_count: usize) -> u32 {
    u32::try_from(word_count / 200).unwrap_or(u32::MAX).max(1)
}

/// Clamp a score into `[0, 1]`, mapping NaN to 0.
pub fn clamp_unit(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Second-level labels under which registrations happen one label deeper.
const SECOND_LEVEL: &[&str] = &["co", "com", "ac", "gov", "edu", "org", "net", "ne", "or"];

/// Components of a URL used for scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlParts {
    pub host: String,
    pub domain: String,
    pub subdomain: Option<String>,
    pub tld: String,
    pub is_secure: bool,
}

impl UrlParts {
    /// Parse a URL; unparseable input yields empty parts.
    pub fn parse(raw: &str) -> Self {
        let Ok(parsed) = url::Url::parse(raw) else {
            return Self::default();
        };
        let is_secure = parsed.scheme() == "https";
        let host = parsed.host_str().unwrap_or_default().to_lowercase();
        let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
        if labels.len() < 2 {
            return Self {
                domain: host.clone(),
                tld: host.clone(),
                host,
                subdomain: None,
                is_secure,
            };
        }

        let tld = labels[labels.len() - 1].to_string();
        let second = labels[labels.len() - 2];
        let registrable_len =
            if tld.len() == 2 && SECOND_LEVEL.contains(&second) && labels.len() >= 3 {
                3
            } else {
                2
            };
        let split = labels.len() - registrable_len;
        let domain = labels[split..].join(".");
        let subdomain = (split > 0).then(|| labels[..split].join("."));

        Self {
            host,
            domain,
            subdomain,
            tld,
            is_secure,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Lifecycle status of a search session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Serializable record of one top-level query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub providers_used: Vec<String>,
    pub result_count: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub retries: u32,
    pub fallbacks: u32,
}

/// Shared, append-only handle to a session record.
///
/// Clones share the same record. Once the session is closed every further
/// write is ignored.
#[derive(Debug, Clone)]
pub struct SearchSession {
    inner: Arc<Mutex<SessionRecord>>,
}

impl SearchSession {
    pub fn new(query: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionRecord {
                id: Uuid::new_v4(),
                query: query.to_string(),
                started_at: Utc::now(),
                finished_at: None,
                status: SessionStatus::Running,
                providers_used: Vec::new(),
                result_count: 0,
                errors: Vec::new(),
                warnings: Vec::new(),
                cache_hits: 0,
                cache_misses: 0,
                retries: 0,
                fallbacks: 0,
            })),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.lock().id
    }

    fn write(&self, f: impl FnOnce(&mut SessionRecord)) {
        let mut record = self.inner.lock();
        if record.status == SessionStatus::Running {
            f(&mut record);
        }
    }

    pub fn record_provider(&self, name: &str) {
        self.write(|r| {
            if !r.providers_used.iter().any(|p| p == name) {
                r.providers_used.push(name.to_string());
            }
        });
    }

    pub fn record_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.write(|r| r.errors.push(error));
    }

    pub fn record_warning(&self, warning: impl Into<String>) {
        let warning = warning.into();
        self.write(|r| r.warnings.push(warning));
    }

    pub fn record_cache_hit(&self) {
        self.write(|r| r.cache_hits += 1);
    }

    pub fn record_cache_miss(&self) {
        self.write(|r| r.cache_misses += 1);
    }

    pub fn record_retry(&self) {
        self.write(|r| r.retries += 1);
    }

    pub fn record_fallback(&self) {
        self.write(|r| r.fallbacks += 1);
    }

    pub fn set_result_count(&self, count: usize) {
        self.write(|r| r.result_count = count);
    }

    fn close(&self, status: SessionStatus) {
        let mut record = self.inner.lock();
        if record.status == SessionStatus::Running {
            record.status = status;
            record.finished_at = Some(Utc::now());
        }
    }

    /// Close as completed. Closing an already-closed session is a no-op.
    pub fn complete(&self) {
        self.close(SessionStatus::Completed);
    }

    pub fn fail(&self, error: impl Into<String>) {
        self.record_error(error);
        self.close(SessionStatus::Failed);
    }

    pub fn cancel(&self) {
        self.close(SessionStatus::Cancelled);
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().status
    }

    pub fn is_closed(&self) -> bool {
        self.status() != SessionStatus::Running
    }

    /// Elapsed time, up to close if closed.
    pub fn duration(&self) -> Duration {
        let record = self.inner.lock();
        let end = record.finished_at.unwrap_or_else(Utc::now);
        (end - record.started_at).to_std().unwrap_or_default()
    }

    /// A copy of the current record.
    pub fn snapshot(&self) -> SessionRecord {
        self.inner.lock().clone()
    }
}

// ---------------------------------------------------------------------------
// ExtractedContent
// ---------------------------------------------------------------------------

/// Which extraction stage produced a page's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Readability,
    Structural,
    ReaderService,
    ManagedCrawl,
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExtractionMethod::Readability => "readability",
            ExtractionMethod::Structural => "structural",
            ExtractionMethod::ReaderService => "reader_service",
            ExtractionMethod::ManagedCrawl => "managed_crawl",
        };
        f.write_str(s)
    }
}

/// Clean content extracted from one crawled page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub url: String,
    pub title: String,
    pub raw_text: String,
    pub text: String,
    pub summary: String,
    pub language: String,
    pub word_count: usize,
    pub headings: Vec<String>,
    pub links: Vec<String>,
    pub images: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub method: ExtractionMethod,
    pub quality_score: f64,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractedContent {
    /// Convert into a search result attributed to the extractor.
    pub fn to_result(&self) -> SearchResult {
        let mut result = SearchResult::new(
            &self.url,
            &self.title,
            self.method.to_string(),
            ProviderKind::Extractor,
        )
        .with_content(&self.text)
        .with_snippet(&self.summary);
        result.headings = self.headings.clone();
        result.links = self.links.clone();
        result.images = self.images.clone();
        result.keywords = text::top_keywords(&self.text, 10);
        for (key, value) in &self.metadata {
            result
                .metadata
                .insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        if let Some(published) = self
            .metadata
            .get("published")
            .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
        {
            result.published_at = Some(published.with_timezone(&Utc));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_builder_trims_and_clamps() {
        let q = Query::builder("  duck   migration ")
            .max_results(500)
            .max_depth(0)
            .build()
            .unwrap();
        assert_eq!(q.text(), "duck migration");
        assert_eq!(q.max_results(), MAX_RESULTS_LIMIT);
        assert_eq!(q.max_depth(), 1);
        assert!(q.content_kinds().contains(&ContentKind::Web));
    }

    #[test]
    fn test_query_rejects_short_text() {
        let err = Query::new(" a ").unwrap_err();
        assert!(matches!(err, SearchError::Validation { .. }));
        assert!(Query::new("").is_err());
    }

    #[test]
    fn test_cache_key_stable_and_sensitive() {
        let a = Query::builder("Duck Migration").max_results(5).build().unwrap();
        let b = Query::builder("duck   migration").max_results(5).build().unwrap();
        let c = Query::builder("duck migration").max_results(6).build().unwrap();
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
        assert_eq!(a.cache_key().len(), 64);
    }

    #[test]
    fn test_derive_keeps_settings() {
        let base = Query::builder("duck migration")
            .mode(SearchMode::Deep)
            .max_results(7)
            .exclude_domain("Spam.com")
            .build()
            .unwrap();
        let derived = base.derive("goose migration").build().unwrap();
        assert_eq!(derived.mode(), SearchMode::Deep);
        assert_eq!(derived.max_results(), 7);
        assert!(derived.is_excluded("ads.spam.com"));
    }

    #[test]
    fn test_domain_matches_label_boundary() {
        assert!(domain_matches("news.example.com", "example.com"));
        assert!(domain_matches("example.com", "example.com"));
        assert!(!domain_matches("badexample.com", "example.com"));
    }

    #[test]
    fn test_url_parts() {
        let p = UrlParts::parse("https://www.research.example.co.uk/path");
        assert_eq!(p.domain, "example.co.uk");
        assert_eq!(p.subdomain.as_deref(), Some("www.research"));
        assert_eq!(p.tld, "uk");
        assert!(p.is_secure);

        let p = UrlParts::parse("http://example.org");
        assert_eq!(p.domain, "example.org");
        assert_eq!(p.subdomain, None);
        assert!(!p.is_secure);

        assert_eq!(UrlParts::parse("not a url"), UrlParts::default());
    }

    #[test]
    fn test_result_derived_fields() {
        let words = vec!["word"; 450].join(" ");
        let r = SearchResult::new("https://blog.example.com/a", "A", "mock", ProviderKind::Mock)
            .with_content(words)
            .with_relevance(1.7);
        assert_eq!(r.domain, "example.com");
        assert_eq!(r.word_count, 450);
        assert_eq!(r.reading_time_minutes, 2);
        assert_eq!(r.relevance_score, 1.0);
        assert_eq!(r.trust_score, 0.5);
    }

    #[test]
    fn test_reading_time_floor() {
        assert_eq!(reading_time_minutes(0), 1);
        assert_eq!(reading_time_minutes(199), 1);
        assert_eq!(reading_time_minutes(400), 2);
    }

    #[test]
    fn test_session_ignores_writes_after_close() {
        let session = SearchSession::new("duck migration");
        session.record_provider("free");
        session.record_provider("free");
        session.record_cache_miss();
        session.complete();
        session.record_error("late");
        session.fail("later");
        let record = session.snapshot();
        assert_eq!(record.status, SessionStatus::Completed);
        assert_eq!(record.providers_used, vec!["free"]);
        assert_eq!(record.cache_misses, 1);
        assert!(record.errors.is_empty());
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn test_extracted_content_to_result() {
        let mut metadata = BTreeMap::new();
        metadata.insert("published".to_string(), "2024-03-01T00:00:00Z".to_string());
        let content = ExtractedContent {
            url: "https://example.com/ducks".into(),
            title: "Ducks".into(),
            raw_text: "Ducks migrate.".into(),
            text: "Ducks migrate south every autumn.".into(),
            summary: "Ducks migrate south.".into(),
            language: "en".into(),
            word_count: 5,
            headings: vec!["Ducks".into()],
            links: vec![],
            images: vec![],
            metadata,
            method: ExtractionMethod::Readability,
            quality_score: 0.6,
            extracted_at: Utc::now(),
        };
        let result = content.to_result();
        assert_eq!(result.provider, ProviderKind::Extractor);
        assert_eq!(result.provider_name, "readability");
        assert_eq!(result.snippet, "Ducks migrate south.");
        assert!(result.published_at.is_some());
    }
}
