//! Zero-cost search through DuckDuckGo.
//!
//! The provider chains two free endpoints: the instant-answer JSON API,
//! which is fast but sparse, and the HTML result page, which is parsed with
//! `scraper` whenever the first stage leaves the query short of results.

use crate::http;
use async_trait::async_trait;
use delve_core::crawler::map_reqwest_error;
use delve_core::error::SearchError;
use delve_core::providers::SearchProvider;
use delve_core::types::{ContentKind, ProviderKind, Query, SearchResult};
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

pub const INSTANT_ANSWER_ENDPOINT: &str = "https://api.duckduckgo.com/";
pub const HTML_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

/// Search through DuckDuckGo's free endpoints. No API key required.
pub struct FreeSearchProvider {
    name: String,
    client: reqwest::Client,
    timeout: Duration,
    instant_endpoint: String,
    html_endpoint: String,
}

impl FreeSearchProvider {
    pub fn new(name: impl Into<String>, timeout: Duration) -> Result<Self, SearchError> {
        Ok(Self {
            name: name.into(),
            client: http::client(timeout)?,
            timeout,
            instant_endpoint: INSTANT_ANSWER_ENDPOINT.to_string(),
            html_endpoint: HTML_ENDPOINT.to_string(),
        })
    }

    /// Point both stages at other hosts (mirrors, test servers).
    pub fn with_endpoints(mut self, instant: impl Into<String>, html: impl Into<String>) -> Self {
        self.instant_endpoint = instant.into();
        self.html_endpoint = html.into();
        self
    }

    async fn instant_answers(&self, query: &Query) -> Result<Vec<SearchResult>, SearchError> {
        let url = format!(
            "{}?q={}&format=json&no_html=1&skip_disambig=1",
            self.instant_endpoint,
            urlencoding::encode(query.text())
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&self.name, &e, self.timeout))?;
        http::check_status(&self.name, &response)?;

        let body: serde_json::Value = response.json().await.map_err(|e| SearchError::Parse {
            source_name: self.name.clone(),
            message: format!("instant answer body: {e}"),
        })?;
        Ok(parse_instant_answer(&self.name, &body, query.max_results()))
    }

    async fn html_results(&self, query: &Query) -> Result<Vec<SearchResult>, SearchError> {
        let mut params = vec![
            ("q", query.text().to_string()),
            ("kl", format!("{}-{}", query.region(), query.language())),
        ];
        if !query.safe_search() {
            params.push(("kp", "-2".to_string()));
        }
        let response = self
            .client
            .post(&self.html_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&self.name, &e, self.timeout))?;
        http::check_status(&self.name, &response)?;

        let body = response.text().await.map_err(|e| SearchError::Parse {
            source_name: self.name.clone(),
            message: format!("result page body: {e}"),
        })?;
        Ok(parse_html_results(&self.name, &body, query.max_results()))
    }
}

#[async_trait]
impl SearchProvider for FreeSearchProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::FreeChain
    }

    async fn search(&self, query: &Query) -> Result<Vec<SearchResult>, SearchError> {
        let limit = query.max_results();
        let mut results = match self.instant_answers(query).await {
            Ok(results) => results,
            Err(e) => {
                debug!(
                    provider = %self.name,
                    error = %e,
                    "Instant answers failed, trying result page"
                );
                Vec::new()
            }
        };
        if results.len() >= limit {
            results.truncate(limit);
            return Ok(results);
        }

        match self.html_results(query).await {
            Ok(page) => {
                let mut seen: HashSet<String> = results.iter().map(|r| r.url.clone()).collect();
                results.extend(page.into_iter().filter(|r| seen.insert(r.url.clone())));
            }
            Err(e) if results.is_empty() => return Err(e),
            Err(e) => {
                debug!(
                    provider = %self.name,
                    error = %e,
                    "Result page failed, keeping instant answers"
                );
            }
        }
        results.truncate(limit);
        Ok(results)
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(&self.instant_endpoint)
            .query(&[("q", "health"), ("format", "json")])
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    fn can_handle(&self, query: &Query) -> bool {
        query
            .content_kinds()
            .iter()
            .any(|k| matches!(k, ContentKind::Web | ContentKind::News))
    }
}

/// Results from an instant-answer payload: the abstract first, then
/// direct results, then related topics (nested groups flattened).
pub fn parse_instant_answer(
    provider: &str,
    body: &serde_json::Value,
    limit: usize,
) -> Vec<SearchResult> {
    let mut results = Vec::new();

    let abstract_text = str_field(body, "AbstractText");
    let abstract_url = str_field(body, "AbstractURL");
    if !abstract_text.is_empty() && !abstract_url.is_empty() {
        let heading = str_field(body, "Heading");
        let title = if heading.is_empty() {
            str_field(body, "AbstractSource")
        } else {
            heading
        };
        results.push(
            SearchResult::new(abstract_url, title, provider, ProviderKind::FreeChain)
                .with_snippet(abstract_text)
                .with_content(abstract_text),
        );
    }

    let mut topics = Vec::new();
    for key in ["Results", "RelatedTopics"] {
        if let Some(items) = body.get(key).and_then(|v| v.as_array()) {
            flatten_topics(items, &mut topics);
        }
    }
    for topic in topics {
        let text = str_field(topic, "Text");
        let url = str_field(topic, "FirstURL");
        if text.is_empty() || url.is_empty() || results.iter().any(|r| r.url == url) {
            continue;
        }
        let title = text.split(" - ").next().unwrap_or(text);
        results.push(
            SearchResult::new(url, title, provider, ProviderKind::FreeChain).with_snippet(text),
        );
    }

    results.truncate(limit);
    rank_by_position(results)
}

fn flatten_topics<'a>(items: &'a [serde_json::Value], out: &mut Vec<&'a serde_json::Value>) {
    for item in items {
        match item.get("Topics").and_then(|v| v.as_array()) {
            Some(nested) => flatten_topics(nested, out),
            None => out.push(item),
        }
    }
}

fn str_field<'a>(value: &'a serde_json::Value, key: &str) -> &'a str {
    value.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

/// Organic results from the HTML result page. Ads are skipped and
/// redirect links are resolved to their targets.
pub fn parse_html_results(provider: &str, html: &str, limit: usize) -> Vec<SearchResult> {
    let (Ok(result_sel), Ok(link_sel), Ok(snippet_sel)) = (
        Selector::parse("div.result"),
        Selector::parse("a.result__a"),
        Selector::parse(".result__snippet"),
    ) else {
        return Vec::new();
    };

    let doc = Html::parse_document(html);
    let mut results: Vec<SearchResult> = Vec::new();
    for block in doc.select(&result_sel) {
        if block.value().classes().any(|c| c == "result--ad") {
            continue;
        }
        let Some(link) = block.select(&link_sel).next() else {
            continue;
        };
        let Some(url) = link.value().attr("href").and_then(resolve_link) else {
            continue;
        };
        if results.iter().any(|r| r.url == url) {
            continue;
        }
        let title = http::element_text(link);
        if title.is_empty() {
            continue;
        }
        let snippet = block
            .select(&snippet_sel)
            .next()
            .map(http::element_text)
            .unwrap_or_default();
        results.push(
            SearchResult::new(url, title, provider, ProviderKind::FreeChain).with_snippet(snippet),
        );
        if results.len() >= limit {
            break;
        }
    }
    rank_by_position(results)
}

/// Target of a result link. Redirect links carry it in `uddg`.
fn resolve_link(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let parsed = url::Url::parse(&absolute).ok()?;
    let is_redirect = parsed
        .host_str()
        .is_some_and(|h| h.ends_with("duckduckgo.com"))
        && parsed.path().starts_with("/l/");
    if is_redirect {
        return parsed
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned())
            .filter(|target| target.starts_with("http://") || target.starts_with("https://"));
    }
    matches!(parsed.scheme(), "http" | "https").then_some(absolute)
}

/// Provider-side relevance decays with result position.
fn rank_by_position(results: Vec<SearchResult>) -> Vec<SearchResult> {
    results
        .into_iter()
        .enumerate()
        .map(|(i, r)| r.with_relevance(1.0 - i as f64 * 0.05))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const RESULT_PAGE: &str = r#"
        <html><body>
        <div class="result result--ad">
            <a class="result__a" href="https://ads.example.com/buy">Buy decoys</a>
        </div>
        <div class="result results_links web-result">
            <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.audubon.org%2Fmigration&amp;rut=abc">Bird <b>Migration</b> Explained</a>
            <a class="result__snippet">How and why ducks migrate each year.</a>
        </div>
        <div class="result results_links web-result">
            <a class="result__a" href="https://en.wikipedia.org/wiki/Mallard">Mallard - Wikipedia</a>
            <a class="result__snippet">The mallard is a dabbling duck.</a>
        </div>
        <div class="result results_links web-result">
            <a class="result__a" href="javascript:void(0)">Broken</a>
        </div>
        </body></html>"#;

    #[test]
    fn test_parse_html_results() {
        let results = parse_html_results("duckduckgo", RESULT_PAGE, 10);
        let urls: Vec<&str> = results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://www.audubon.org/migration",
                "https://en.wikipedia.org/wiki/Mallard"
            ]
        );
        assert_eq!(results[0].title, "Bird Migration Explained");
        assert_eq!(results[0].snippet, "How and why ducks migrate each year.");
        assert_eq!(results[0].provider, ProviderKind::FreeChain);
        assert!(results[0].relevance_score > results[1].relevance_score);
    }

    #[test]
    fn test_parse_html_results_respects_limit() {
        assert_eq!(parse_html_results("duckduckgo", RESULT_PAGE, 1).len(), 1);
    }

    #[test]
    fn test_parse_instant_answer() {
        let body = json!({
            "Heading": "Mallard",
            "AbstractText": "The mallard is a dabbling duck that breeds throughout the Americas.",
            "AbstractURL": "https://en.wikipedia.org/wiki/Mallard",
            "AbstractSource": "Wikipedia",
            "Results": [],
            "RelatedTopics": [
                {"Text": "Duck migration - Seasonal movement of ducks", "FirstURL": "https://duckduckgo.com/Duck_migration"},
                {"Name": "Flyways", "Topics": [
                    {"Text": "Mississippi Flyway - A bird migration route", "FirstURL": "https://duckduckgo.com/Mississippi_Flyway"}
                ]},
                {"Text": "", "FirstURL": "https://duckduckgo.com/empty"}
            ]
        });
        let results = parse_instant_answer("duckduckgo", &body, 10);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].title, "Mallard");
        assert!(results[0].content.contains("dabbling duck"));
        assert_eq!(results[1].title, "Duck migration");
        assert_eq!(results[2].url, "https://duckduckgo.com/Mississippi_Flyway");
    }

    #[test]
    fn test_parse_empty_instant_answer() {
        let body = json!({"AbstractText": "", "RelatedTopics": []});
        assert!(parse_instant_answer("duckduckgo", &body, 10).is_empty());
    }

    #[test]
    fn test_resolve_link() {
        assert_eq!(
            resolve_link("//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.org%2Fa&rut=x"),
            Some("https://example.org/a".to_string())
        );
        assert_eq!(
            resolve_link("https://example.org/b"),
            Some("https://example.org/b".to_string())
        );
        assert_eq!(resolve_link("javascript:void(0)"), None);
    }

    #[test]
    fn test_can_handle_web_only() {
        let provider = FreeSearchProvider::new("duckduckgo", Duration::from_secs(5)).unwrap();
        let web = Query::new("ducks").unwrap();
        let images = Query::builder("ducks")
            .content_kinds([ContentKind::Images])
            .build()
            .unwrap();
        assert!(provider.can_handle(&web));
        assert!(!provider.can_handle(&images));
    }

    #[tokio::test]
    async fn test_unreachable_endpoints_fail_typed() {
        let provider = FreeSearchProvider::new("duckduckgo", Duration::from_secs(2))
            .unwrap()
            .with_endpoints("http://127.0.0.1:9/instant", "http://127.0.0.1:9/html");
        let err = provider
            .search(&Query::new("ducks").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SearchError::Network { .. } | SearchError::Timeout { .. }
        ));
    }
}
