//! Metered JSON search API.
//!
//! A bearer-authenticated POST endpoint that returns ranked results as JSON.
//! Every call is billed at the configured `cost_per_call`.

use crate::http;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use delve_core::config::ProviderConfig;
use delve_core::crawler::map_reqwest_error;
use delve_core::error::SearchError;
use delve_core::providers::SearchProvider;
use delve_core::types::{ContentKind, ProviderKind, Query, SearchResult, TimeRange};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Request body sent to the API.
#[derive(Debug, Serialize, PartialEq)]
pub struct MeteredRequest<'a> {
    pub query: &'a str,
    pub max_results: usize,
    pub language: &'a str,
    pub region: &'a str,
    pub safe_search: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    pub content_kinds: Vec<ContentKind>,
    pub include_images: bool,
}

impl<'a> MeteredRequest<'a> {
    pub fn from_query(query: &'a Query) -> Self {
        Self {
            query: query.text(),
            max_results: query.max_results(),
            language: query.language(),
            region: query.region(),
            safe_search: query.safe_search(),
            time_range: (query.time_range() != TimeRange::Any).then_some(query.time_range()),
            content_kinds: query.content_kinds().iter().copied().collect(),
            include_images: query.include_images(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MeteredResponse {
    #[serde(default)]
    pub results: Vec<MeteredHit>,
}

#[derive(Debug, Deserialize)]
pub struct MeteredHit {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub kind: Option<ContentKind>,
}

impl MeteredResponse {
    pub fn into_results(self, provider: &str) -> Vec<SearchResult> {
        let total = self.results.len().max(1) as f64;
        self.results
            .into_iter()
            .enumerate()
            .filter(|(_, hit)| !hit.url.is_empty())
            .map(|(i, hit)| {
                let title = if hit.title.is_empty() {
                    hit.url.clone()
                } else {
                    hit.title
                };
                let mut result = SearchResult::new(hit.url, title, provider, ProviderKind::Metered)
                    .with_snippet(hit.snippet)
                    .with_relevance(hit.score.unwrap_or(1.0 - i as f64 / total));
                if let Some(content) = hit.content {
                    result = result.with_content(content);
                }
                if let Some(at) = hit.published_at {
                    result = result.with_published(at);
                }
                if let Some(kind) = hit.kind {
                    result = result.with_kind(kind);
                }
                result
            })
            .collect()
    }
}

/// Paid search API behind a bearer key.
pub struct MeteredApiProvider {
    name: String,
    endpoint: String,
    api_key: Option<String>,
    cost_per_call: f64,
    client: reqwest::Client,
    timeout: Duration,
}

impl MeteredApiProvider {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        cost_per_call: f64,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            api_key,
            cost_per_call: cost_per_call.max(0.0),
            client: http::client(timeout)?,
            timeout,
        })
    }

    /// Build from a `[providers.<name>]` section. The endpoint is required;
    /// the key is resolved from `api_key` or `api_key_env`.
    pub fn from_config(name: &str, config: &ProviderConfig) -> Result<Self, SearchError> {
        let endpoint = config
            .api_endpoint
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| SearchError::Validation {
                message: format!("providers.{name}.api_endpoint is required"),
            })?;
        Self::new(
            name,
            endpoint,
            config.resolve_api_key(),
            config.cost_per_call,
            config.timeout(),
        )
    }

    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl SearchProvider for MeteredApiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Metered
    }

    async fn search(&self, query: &Query) -> Result<Vec<SearchResult>, SearchError> {
        let Some(key) = &self.api_key else {
            return Err(SearchError::Auth {
                provider: self.name.clone(),
            });
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(key)
            .json(&MeteredRequest::from_query(query))
            .send()
            .await
            .map_err(|e| map_reqwest_error(&self.name, &e, self.timeout))?;
        http::check_status(&self.name, &response)?;

        let body: MeteredResponse = response.json().await.map_err(|e| SearchError::Parse {
            source_name: self.name.clone(),
            message: e.to_string(),
        })?;
        let mut results = body.into_results(&self.name);
        results.truncate(query.max_results());
        debug!(provider = %self.name, results = results.len(), "Metered search finished");
        Ok(results)
    }

    async fn health_check(&self) -> bool {
        self.api_key.is_some()
    }

    fn cost_per_call(&self) -> f64 {
        self.cost_per_call
    }

    fn can_handle(&self, _query: &Query) -> bool {
        self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_from_query() {
        let query = Query::builder("duck migration")
            .max_results(5)
            .time_range(TimeRange::Week)
            .build()
            .unwrap();
        let body = serde_json::to_value(MeteredRequest::from_query(&query)).unwrap();
        assert_eq!(body["query"], "duck migration");
        assert_eq!(body["max_results"], 5);
        assert_eq!(body["time_range"], "week");
        assert_eq!(body["content_kinds"], json!(["web"]));
    }

    #[test]
    fn test_any_time_range_is_omitted() {
        let query = Query::new("ducks").unwrap();
        let body = serde_json::to_value(MeteredRequest::from_query(&query)).unwrap();
        assert!(body.get("time_range").is_none());
    }

    #[test]
    fn test_response_into_results() {
        let response: MeteredResponse = serde_json::from_value(json!({
            "results": [
                {
                    "url": "https://www.fws.gov/birds/flyways",
                    "title": "Migratory Bird Flyways",
                    "snippet": "Four flyways cross North America.",
                    "score": 0.92,
                    "published_at": "2024-03-01T00:00:00Z"
                },
                {"url": "https://example.org/ducks", "content": "Ducks fly south in autumn."},
                {"url": "", "title": "dropped"}
            ]
        }))
        .unwrap();
        let results = response.into_results("metered");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].provider, ProviderKind::Metered);
        assert_eq!(results[0].relevance_score, 0.92);
        assert!(results[0].published_at.is_some());
        assert_eq!(results[1].title, "https://example.org/ducks");
        assert_eq!(results[1].word_count, 5);
    }

    #[test]
    fn test_from_config_requires_endpoint() {
        let config = ProviderConfig::default();
        let err = MeteredApiProvider::from_config("metered", &config)
            .err()
            .unwrap();
        assert!(matches!(err, SearchError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_missing_key_is_auth_error() {
        let provider = MeteredApiProvider::new(
            "metered",
            "http://127.0.0.1:9/search",
            None,
            0.01,
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(!provider.can_handle(&Query::new("ducks").unwrap()));
        let err = provider
            .search(&Query::new("ducks").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Auth { .. }));
        assert_eq!(provider.cost_per_call(), 0.01);
    }
}
