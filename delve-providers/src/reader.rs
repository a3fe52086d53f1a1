//! External extraction services for the tail of the extraction cascade.
//!
//! - [`ReaderServiceExtractor`]: a reader proxy that is asked for
//!   `<endpoint><url>` and answers with plain text headed by `Key: value`
//!   lines (`Title:`, `URL Source:`, `Published Time:`).
//! - [`ManagedCrawlExtractor`]: a hosted crawl API that takes a JSON job and
//!   returns markdown plus page metadata.

use crate::http;
use async_trait::async_trait;
use delve_core::config::ProviderConfig;
use delve_core::crawler::{ExternalDocument, ExternalExtractor, map_reqwest_error};
use delve_core::error::SearchError;
use delve_core::types::ExtractionMethod;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub const READER_SERVICE: &str = "reader_service";
pub const MANAGED_CRAWL: &str = "managed_crawl";

// ---------------------------------------------------------------------------
// Reader service
// ---------------------------------------------------------------------------

pub struct ReaderServiceExtractor {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl ReaderServiceExtractor {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            client: http::client(timeout)?,
            timeout,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, SearchError> {
        let endpoint = required_endpoint(READER_SERVICE, config)?;
        Self::new(endpoint, config.resolve_api_key(), config.timeout())
    }
}

#[async_trait]
impl ExternalExtractor for ReaderServiceExtractor {
    fn name(&self) -> &str {
        READER_SERVICE
    }

    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::ReaderService
    }

    async fn extract(&self, url: &str) -> Result<ExternalDocument, SearchError> {
        let mut request = self
            .client
            .get(format!("{}{}", self.endpoint, url))
            .header(reqwest::header::ACCEPT, "text/plain");
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(READER_SERVICE, &e, self.timeout))?;
        http::check_status(READER_SERVICE, &response)?;
        let body = response.text().await.map_err(|e| SearchError::Parse {
            source_name: READER_SERVICE.to_string(),
            message: e.to_string(),
        })?;
        Ok(parse_reader_text(&body))
    }
}

/// Split the `Key: value` header block from the body. The body may be
/// introduced by a `Markdown Content:` line.
pub fn parse_reader_text(body: &str) -> ExternalDocument {
    let mut doc = ExternalDocument::default();
    let mut lines = body.lines().peekable();

    while let Some(line) = lines.peek() {
        let Some((key, value)) = line.split_once(':') else {
            break;
        };
        let key = key.trim();
        if key.is_empty() || key.split_whitespace().count() > 3 || key.contains('/') {
            break;
        }
        let value = value.trim();
        match key.to_ascii_lowercase().as_str() {
            "title" => doc.title = Some(value.to_string()).filter(|t| !t.is_empty()),
            "published time" => {
                doc.metadata
                    .insert("published".to_string(), value.to_string());
            }
            "description" => {
                doc.metadata
                    .insert("description".to_string(), value.to_string());
            }
            "url source" | "markdown content" => {}
            _ => break,
        }
        lines.next();
    }

    let text: Vec<&str> = lines.collect();
    doc.text = text.join("\n").trim().to_string();
    doc.links = markdown_links(&doc.text);
    doc
}

/// `[label](http...)` targets, in order, without duplicates.
fn markdown_links(text: &str) -> Vec<String> {
    let mut links = Vec::new();
    for part in text.split("](").skip(1) {
        let Some(end) = part.find(')') else {
            continue;
        };
        let target = &part[..end];
        if (target.starts_with("http://") || target.starts_with("https://"))
            && !links.iter().any(|l| l == target)
        {
            links.push(target.to_string());
        }
    }
    links
}

// ---------------------------------------------------------------------------
// Managed crawl
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ManagedCrawlResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub data: Option<ManagedCrawlData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ManagedCrawlData {
    #[serde(default)]
    pub markdown: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl ManagedCrawlResponse {
    pub fn into_document(self) -> Result<ExternalDocument, SearchError> {
        let data = match (self.success, self.data) {
            (true, Some(data)) => data,
            (_, _) => {
                return Err(SearchError::Provider {
                    provider: MANAGED_CRAWL.to_string(),
                    message: self
                        .error
                        .unwrap_or_else(|| "crawl job returned no data".to_string()),
                });
            }
        };

        let field = |key: &str| {
            data.metadata
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let mut metadata = BTreeMap::new();
        for (ours, theirs) in [
            ("description", "description"),
            ("author", "author"),
            ("published", "publishedTime"),
            ("language", "language"),
        ] {
            if let Some(value) = field(theirs) {
                metadata.insert(ours.to_string(), value);
            }
        }
        Ok(ExternalDocument {
            title: field("title"),
            text: data.markdown.trim().to_string(),
            metadata,
            links: data.links,
            images: data.images,
        })
    }
}

pub struct ManagedCrawlExtractor {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl ManagedCrawlExtractor {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            client: http::client(timeout)?,
            timeout,
        })
    }

    /// Needs both an endpoint and a key.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, SearchError> {
        let endpoint = required_endpoint(MANAGED_CRAWL, config)?;
        let key = config.resolve_api_key().ok_or_else(|| SearchError::Auth {
            provider: MANAGED_CRAWL.to_string(),
        })?;
        Self::new(endpoint, key, config.timeout())
    }
}

#[async_trait]
impl ExternalExtractor for ManagedCrawlExtractor {
    fn name(&self) -> &str {
        MANAGED_CRAWL
    }

    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::ManagedCrawl
    }

    async fn extract(&self, url: &str) -> Result<ExternalDocument, SearchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "url": url,
                "formats": ["markdown", "links"],
                "onlyMainContent": true,
            }))
            .send()
            .await
            .map_err(|e| map_reqwest_error(MANAGED_CRAWL, &e, self.timeout))?;
        http::check_status(MANAGED_CRAWL, &response)?;
        let body: ManagedCrawlResponse =
            response.json().await.map_err(|e| SearchError::Parse {
                source_name: MANAGED_CRAWL.to_string(),
                message: e.to_string(),
            })?;
        body.into_document()
    }
}

fn required_endpoint(name: &str, config: &ProviderConfig) -> Result<String, SearchError> {
    config
        .api_endpoint
        .clone()
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| SearchError::Validation {
            message: format!("providers.{name}.api_endpoint is required"),
        })
}
