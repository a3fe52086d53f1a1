//! Policy-bound page crawling.
//!
//! Every crawled URL ends in a [`CrawlOutcome`]. Policy violations (blocked
//! domains, robots.txt, MIME type, thin content) are `Skipped`, not errors.
//! Fetches share one semaphore sized to `max_concurrent`; cancellation
//! abandons tasks still waiting for a permit while in-flight fetches run to
//! completion under their own timeout.

pub mod external;
pub mod extract;
pub mod fetch;
pub mod policy;
pub mod robots;

pub use external::{ExternalDocument, ExternalExtractor};
pub use extract::{ContentExtractor, MIN_QUALITY, PageMetadata, quality_score};
pub use fetch::{FetchedPage, HttpFetcher, PageFetcher, map_reqwest_error};
pub use policy::{CrawlPolicy, SkipReason};
pub use robots::{ROBOTS_TTL, RobotsCache, RobotsRules};

use crate::error::{ConfigError, DelveError, SearchError};
use crate::ranking::normalize::normalize_url;
use crate::types::ExtractedContent;
use futures::future::join_all;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Result of crawling one URL.
#[derive(Debug, Clone)]
pub enum CrawlOutcome {
    Extracted(ExtractedContent),
    Skipped { url: String, reason: SkipReason },
    Failed { url: String, error: SearchError },
}

impl CrawlOutcome {
    pub fn url(&self) -> &str {
        match self {
            CrawlOutcome::Extracted(c) => &c.url,
            CrawlOutcome::Skipped { url, .. } | CrawlOutcome::Failed { url, .. } => url,
        }
    }

    pub fn content(&self) -> Option<&ExtractedContent> {
        match self {
            CrawlOutcome::Extracted(c) => Some(c),
            _ => None,
        }
    }

    pub fn into_content(self) -> Option<ExtractedContent> {
        match self {
            CrawlOutcome::Extracted(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_extracted(&self) -> bool {
        matches!(self, CrawlOutcome::Extracted(_))
    }
}

fn status_error(host: &str, status: u16) -> SearchError {
    match status {
        401 | 403 => SearchError::Auth {
            provider: host.to_string(),
        },
        429 => SearchError::RateLimited {
            provider: host.to_string(),
            retry_after_secs: None,
        },
        _ => SearchError::Provider {
            provider: host.to_string(),
            message: format!("HTTP {status}"),
        },
    }
}

/// Truncate to at most `max` bytes on a char boundary.
fn truncate_bytes(body: &mut String, max: usize) -> bool {
    if body.len() <= max {
        return false;
    }
    let mut cut = max;
    while cut > 0 && !body.is_char_boundary(cut) {
        cut -= 1;
    }
    body.truncate(cut);
    true
}

pub struct Crawler {
    policy: CrawlPolicy,
    patterns: Vec<Regex>,
    fetcher: Arc<dyn PageFetcher>,
    robots: RobotsCache,
    extractor: ContentExtractor,
    semaphore: Arc<Semaphore>,
}

impl Crawler {
    pub fn new(
        policy: CrawlPolicy,
        fetcher: Arc<dyn PageFetcher>,
        extractor: ContentExtractor,
    ) -> Result<Self, ConfigError> {
        let violations = policy.validate();
        if !violations.is_empty() {
            return Err(ConfigError::Invalid {
                message: violations.join("; "),
            });
        }
        Ok(Self {
            patterns: policy.compiled_patterns(),
            semaphore: Arc::new(Semaphore::new(policy.max_concurrent)),
            policy,
            fetcher,
            robots: RobotsCache::default(),
            extractor,
        })
    }

    /// Crawler backed by [`HttpFetcher`].
    pub fn with_http(policy: CrawlPolicy, extractor: ContentExtractor) -> Result<Self, DelveError> {
        let fetcher = HttpFetcher::new(
            &policy.user_agent,
            policy.timeout(),
            policy.max_content_length,
        )?;
        Ok(Self::new(policy, Arc::new(fetcher), extractor)?)
    }

    pub fn policy(&self) -> &CrawlPolicy {
        &self.policy
    }

    pub fn robots_hosts(&self) -> usize {
        self.robots.len()
    }

    /// Static URL checks that need no network access.
    pub fn check_url(&self, raw: &str) -> Result<Url, SkipReason> {
        let url = Url::parse(raw.trim()).map_err(|e| SkipReason::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SkipReason::UnsupportedScheme(url.scheme().to_string()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| SkipReason::InvalidUrl(format!("{raw} has no host")))?
            .to_lowercase();
        self.policy.domain_permitted(&host)?;
        if let Some(pattern) = self.patterns.iter().find(|p| p.is_match(url.as_str())) {
            return Err(SkipReason::BlockedPattern(pattern.as_str().to_string()));
        }
        Ok(url)
    }

    /// Crawl a single URL.
    pub async fn crawl(&self, url: &str) -> CrawlOutcome {
        match self.semaphore.acquire().await {
            Ok(_permit) => self.process(url).await,
            Err(_) => CrawlOutcome::Failed {
                url: url.to_string(),
                error: SearchError::System {
                    message: "crawler semaphore closed".to_string(),
                },
            },
        }
    }

    /// Crawl many URLs concurrently. Outcomes keep input order. Tasks that
    /// have not started when `cancel` fires are skipped.
    pub async fn crawl_many(&self, urls: &[String], cancel: &CancellationToken) -> Vec<CrawlOutcome> {
        let tasks = urls.iter().map(|url| async move {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return CrawlOutcome::Skipped {
                        url: url.clone(),
                        reason: SkipReason::Cancelled,
                    };
                }
                permit = self.semaphore.acquire() => permit,
            };
            match permit {
                Ok(_permit) => self.process(url).await,
                Err(_) => CrawlOutcome::Failed {
                    url: url.clone(),
                    error: SearchError::System {
                        message: "crawler semaphore closed".to_string(),
                    },
                },
            }
        });
        let outcomes = join_all(tasks).await;

        let extracted = outcomes.iter().filter(|o| o.is_extracted()).count();
        info!(
            requested = urls.len(),
            extracted,
            cancelled = cancel.is_cancelled(),
            "Crawl batch finished"
        );
        outcomes
    }

    /// Breadth-first crawl of `start`'s host, bounded by `max_depth` link
    /// hops and `max_pages` outcomes.
    pub async fn crawl_site(&self, start: &str, cancel: &CancellationToken) -> Vec<CrawlOutcome> {
        let host = match self.check_url(start) {
            Ok(url) => url.host_str().unwrap_or_default().to_lowercase(),
            Err(reason) => {
                return vec![CrawlOutcome::Skipped {
                    url: start.to_string(),
                    reason,
                }];
            }
        };

        let mut outcomes = Vec::new();
        let mut seen: HashSet<String> = HashSet::from([normalize_url(start)]);
        let mut frontier: VecDeque<String> = VecDeque::from([start.to_string()]);
        let mut depth = 0u32;

        while !frontier.is_empty() && !cancel.is_cancelled() {
            let budget = self.policy.max_pages.saturating_sub(outcomes.len());
            if budget == 0 {
                break;
            }
            let level: Vec<String> = frontier.drain(..).take(budget).collect();
            debug!(host = %host, depth, pages = level.len(), "Crawling site level");
            let batch = self.crawl_many(&level, cancel).await;

            if depth < self.policy.max_depth {
                for content in batch.iter().filter_map(CrawlOutcome::content) {
                    for link in &content.links {
                        let same_host = Url::parse(link)
                            .ok()
                            .and_then(|u| u.host_str().map(str::to_lowercase))
                            .is_some_and(|h| h == host);
                        if same_host && seen.insert(normalize_url(link)) {
                            frontier.push_back(link.clone());
                        }
                    }
                }
            }
            outcomes.extend(batch);
            depth += 1;
            if depth > self.policy.max_depth {
                break;
            }
        }
        outcomes
    }

    async fn process(&self, url: &str) -> CrawlOutcome {
        let skipped = |reason: SkipReason| {
            debug!(url, reason = %reason, "Skipping URL");
            CrawlOutcome::Skipped {
                url: url.to_string(),
                reason,
            }
        };

        let parsed = match self.check_url(url) {
            Ok(parsed) => parsed,
            Err(reason) => return skipped(reason),
        };
        let host = parsed.host_str().unwrap_or_default().to_string();

        if self.policy.respect_robots_txt
            && !self
                .robots
                .is_allowed(self.fetcher.as_ref(), &parsed, &self.policy.user_agent)
                .await
        {
            return skipped(SkipReason::RobotsDisallowed);
        }

        let timeout = self.policy.timeout();
        let page = match tokio::time::timeout(timeout, self.fetcher.fetch(parsed.as_str())).await {
            Ok(Ok(page)) => page,
            Ok(Err(error)) => {
                warn!(url, error = %error, "Fetch failed");
                return CrawlOutcome::Failed {
                    url: url.to_string(),
                    error,
                };
            }
            Err(_) => {
                warn!(url, timeout_secs = timeout.as_secs(), "Fetch timed out");
                return CrawlOutcome::Failed {
                    url: url.to_string(),
                    error: SearchError::Timeout {
                        provider: host,
                        timeout_secs: timeout.as_secs(),
                    },
                };
            }
        };

        if !page.is_success() {
            return CrawlOutcome::Failed {
                url: url.to_string(),
                error: status_error(&host, page.status),
            };
        }
        if let Err(reason) = self.policy.mime_permitted(page.content_type.as_deref()) {
            return skipped(reason);
        }

        let FetchedPage { url: final_url, mut body, .. } = page;
        if truncate_bytes(&mut body, self.policy.max_content_length) {
            debug!(url, max = self.policy.max_content_length, "Body truncated");
        }

        match self.extractor.extract(&final_url, &body).await {
            Ok(content) => {
                let length = content.text.chars().count();
                if length < self.policy.min_content_length {
                    return skipped(SkipReason::TooShort {
                        length,
                        minimum: self.policy.min_content_length,
                    });
                }
                debug!(
                    url,
                    method = %content.method,
                    quality = content.quality_score,
                    words = content.word_count,
                    "Page extracted"
                );
                CrawlOutcome::Extracted(content)
            }
            Err(error) => CrawlOutcome::Failed {
                url: url.to_string(),
                error,
            },
        }
    }
}

impl std::fmt::Debug for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler")
            .field("policy", &self.policy)
            .field("extractor", &self.extractor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExtractionMethod;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct SiteFetcher {
        pages: HashMap<String, (u16, &'static str, String)>,
        delay: Option<Duration>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SiteFetcher {
        fn page(mut self, url: &str, status: u16, content_type: &'static str, body: String) -> Self {
            self.pages
                .insert(url.to_string(), (status, content_type, body));
            self
        }
    }

    #[async_trait]
    impl PageFetcher for SiteFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let (status, content_type, body) = self
                .pages
                .get(url)
                .cloned()
                .unwrap_or((404, "text/html", String::new()));
            Ok(FetchedPage {
                url: url.to_string(),
                status,
                content_type: Some(content_type.to_string()),
                body,
                truncated: false,
            })
        }
    }

    fn article(title: &str, links: &[&str]) -> String {
        let para = "Mallard ducks migrate south each autumn, following ancient flyways. \
                    Researchers track them with satellite tags across the whole continent.";
        let anchors: String = links
            .iter()
            .map(|l| format!(r#"<a href="{l}">next</a> "#))
            .collect();
        format!(
            "<html><head><title>{title}</title></head><body><article>\
             <p>{para}</p><p>{para}</p><p>{para}</p></article>{anchors}</body></html>"
        )
    }

    fn policy() -> CrawlPolicy {
        CrawlPolicy {
            respect_robots_txt: false,
            ..Default::default()
        }
    }

    fn crawler(policy: CrawlPolicy, fetcher: SiteFetcher) -> (Crawler, Arc<SiteFetcher>) {
        let fetcher = Arc::new(fetcher);
        let crawler = Crawler::new(policy, fetcher.clone(), ContentExtractor::new()).unwrap();
        (crawler, fetcher)
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let bad = CrawlPolicy {
            max_concurrent: 0,
            ..Default::default()
        };
        let err = Crawler::new(bad, Arc::new(SiteFetcher::default()), ContentExtractor::new())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_check_url() {
        let (crawler, _) = crawler(
            CrawlPolicy {
                blocked_domains: vec!["spam.com".into()],
                blocked_patterns: vec![r"\.zip$".into()],
                ..policy()
            },
            SiteFetcher::default(),
        );
        assert!(crawler.check_url("https://example.com/a").is_ok());
        assert!(matches!(
            crawler.check_url("ftp://example.com/a"),
            Err(SkipReason::UnsupportedScheme(_))
        ));
        assert!(matches!(
            crawler.check_url("not a url"),
            Err(SkipReason::InvalidUrl(_))
        ));
        assert!(matches!(
            crawler.check_url("https://www.spam.com/"),
            Err(SkipReason::BlockedDomain(_))
        ));
        assert!(matches!(
            crawler.check_url("https://example.com/file.zip"),
            Err(SkipReason::BlockedPattern(_))
        ));
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        let mut body = "héllo".to_string();
        assert!(truncate_bytes(&mut body, 2));
        assert_eq!(body, "h");
        let mut short = "abc".to_string();
        assert!(!truncate_bytes(&mut short, 10));
    }

    #[tokio::test]
    async fn test_crawl_extracts_article() {
        let url = "https://birds.example.com/ducks";
        let (crawler, _) = crawler(
            policy(),
            SiteFetcher::default().page(url, 200, "text/html; charset=utf-8", article("Ducks", &[])),
        );
        let outcome = crawler.crawl(url).await;
        let content = outcome.content().expect("extracted");
        assert_eq!(content.title, "Ducks");
        assert_eq!(content.method, ExtractionMethod::Readability);
    }

    #[tokio::test]
    async fn test_blocked_domain_skipped_without_fetch() {
        let (crawler, fetcher) = crawler(
            CrawlPolicy {
                blocked_domains: vec!["example.com".into()],
                ..policy()
            },
            SiteFetcher::default(),
        );
        let outcome = crawler.crawl("https://example.com/").await;
        assert!(matches!(
            outcome,
            CrawlOutcome::Skipped {
                reason: SkipReason::BlockedDomain(_),
                ..
            }
        ));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_robots_disallow_skips() {
        let (crawler, _) = crawler(
            CrawlPolicy::default(),
            SiteFetcher::default()
                .page(
                    "https://example.com/robots.txt",
                    200,
                    "text/plain",
                    "User-agent: *\nDisallow: /private/\n".to_string(),
                )
                .page("https://example.com/private/x", 200, "text/html", article("X", &[])),
        );
        let outcome = crawler.crawl("https://example.com/private/x").await;
        assert!(matches!(
            outcome,
            CrawlOutcome::Skipped {
                reason: SkipReason::RobotsDisallowed,
                ..
            }
        ));
        assert_eq!(crawler.robots_hosts(), 1);
    }

    #[tokio::test]
    async fn test_http_error_status_fails() {
        let (crawler, _) = crawler(
            policy(),
            SiteFetcher::default().page("https://example.com/", 503, "text/html", String::new()),
        );
        match crawler.crawl("https://example.com/").await {
            CrawlOutcome::Failed { error, .. } => {
                assert!(matches!(error, SearchError::Provider { .. }));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mime_and_short_content_skipped() {
        let (crawler, _) = crawler(
            policy(),
            SiteFetcher::default()
                .page("https://example.com/doc.pdf", 200, "application/pdf", "%PDF".into())
                .page(
                    "https://example.com/thin",
                    200,
                    "text/html",
                    "<html><body><p>Too little here to keep.</p></body></html>".into(),
                ),
        );
        assert!(matches!(
            crawler.crawl("https://example.com/doc.pdf").await,
            CrawlOutcome::Skipped {
                reason: SkipReason::MimeType(_),
                ..
            }
        ));
        assert!(matches!(
            crawler.crawl("https://example.com/thin").await,
            CrawlOutcome::Skipped {
                reason: SkipReason::TooShort { minimum: 100, .. },
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_crawl_many_bounds_concurrency_and_keeps_order() {
        let mut fetcher = SiteFetcher {
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let urls: Vec<String> = (0..8).map(|i| format!("https://site{i}.example.com/")).collect();
        for (i, url) in urls.iter().enumerate() {
            fetcher = fetcher.page(url, 200, "text/html", article(&format!("Page {i}"), &[]));
        }
        let (crawler, fetcher) = crawler(
            CrawlPolicy {
                max_concurrent: 3,
                ..policy()
            },
            fetcher,
        );

        let outcomes = crawler.crawl_many(&urls, &CancellationToken::new()).await;
        assert_eq!(outcomes.len(), 8);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.content().unwrap().title, format!("Page {i}"));
        }
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_cancelled_batch_skips_queued_tasks() {
        let (crawler, fetcher) = crawler(policy(), SiteFetcher::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let urls = vec!["https://a.example.com/".to_string(), "https://b.example.com/".to_string()];
        let outcomes = crawler.crawl_many(&urls, &cancel).await;
        assert!(outcomes.iter().all(|o| matches!(
            o,
            CrawlOutcome::Skipped {
                reason: SkipReason::Cancelled,
                ..
            }
        )));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_crawl_site_follows_same_host_links_to_depth() {
        let fetcher = SiteFetcher::default()
            .page(
                "https://docs.example.com/",
                200,
                "text/html",
                article("Root", &["/a", "/b", "https://other.example.org/x"]),
            )
            .page("https://docs.example.com/a", 200, "text/html", article("A", &["/deep"]))
            .page("https://docs.example.com/b", 200, "text/html", article("B", &["/"]))
            .page("https://docs.example.com/deep", 200, "text/html", article("Deep", &[]));
        let (crawler, _) = crawler(
            CrawlPolicy {
                max_depth: 1,
                ..policy()
            },
            fetcher,
        );

        let outcomes = crawler
            .crawl_site("https://docs.example.com/", &CancellationToken::new())
            .await;
        let titles: Vec<&str> = outcomes
            .iter()
            .filter_map(|o| o.content().map(|c| c.title.as_str()))
            .collect();
        assert_eq!(titles, vec!["Root", "A", "B"]);
    }
}
