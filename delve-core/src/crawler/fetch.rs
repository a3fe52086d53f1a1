//! Page fetching.

use crate::error::SearchError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Raw response for one URL.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    /// Whether the body was cut at the size limit.
    pub truncated: bool,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport used by the crawler for pages and robots.txt.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url`, returning any HTTP status as a page. Only transport
    /// failures are errors.
    async fn fetch(&self, url: &str) -> Result<FetchedPage, SearchError>;
}

/// Map a reqwest failure to a typed search error.
pub fn map_reqwest_error(source: &str, err: &reqwest::Error, timeout: Duration) -> SearchError {
    if err.is_timeout() {
        SearchError::Timeout {
            provider: source.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    } else if err.is_decode() || err.is_body() {
        SearchError::Parse {
            source_name: source.to_string(),
            message: err.to_string(),
        }
    } else if err.is_builder() {
        SearchError::Validation {
            message: err.to_string(),
        }
    } else {
        SearchError::Network {
            provider: source.to_string(),
            message: err.to_string(),
        }
    }
}

/// Production fetcher on reqwest.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| SearchError::System {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            timeout,
            max_bytes: max_bytes.max(1),
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, SearchError> {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string());

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&host, &e, self.timeout))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut bytes: Vec<u8> = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| map_reqwest_error(&host, &e, self.timeout))?
        {
            let room = self.max_bytes - bytes.len();
            if chunk.len() >= room {
                bytes.extend_from_slice(&chunk[..room]);
                if chunk.len() > room {
                    truncated = true;
                    break;
                }
            } else {
                bytes.extend_from_slice(&chunk);
            }
        }
        if truncated {
            debug!(url, max_bytes = self.max_bytes, "Response body truncated");
        }

        Ok(FetchedPage {
            url: final_url,
            status,
            content_type,
            body: String::from_utf8_lossy(&bytes).into_owned(),
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_success() {
        let page = FetchedPage {
            url: "https://a.com".into(),
            status: 204,
            content_type: None,
            body: String::new(),
            truncated: false,
        };
        assert!(page.is_success());
        assert!(!FetchedPage { status: 404, ..page }.is_success());
    }

    #[test]
    fn test_http_fetcher_builds() {
        assert!(HttpFetcher::new("DelveBot/1.0", Duration::from_secs(5), 1024).is_ok());
    }
}
