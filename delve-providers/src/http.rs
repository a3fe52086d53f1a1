//! Shared HTTP plumbing for the network providers.

use delve_core::error::SearchError;
use delve_core::providers::parse_retry_after;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::time::Duration;

pub const USER_AGENT: &str = concat!("Delve/", env!("CARGO_PKG_VERSION"));

/// Build a client with the crate's user agent and a hard timeout.
pub fn client(timeout: Duration) -> Result<reqwest::Client, SearchError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| SearchError::System {
            message: format!("Failed to create HTTP client: {e}"),
        })
}

/// Typed error for a non-success status, or `None` on 2xx.
pub fn status_error(
    provider: &str,
    status: StatusCode,
    headers: &HeaderMap,
) -> Option<SearchError> {
    if status.is_success() {
        return None;
    }
    let err = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SearchError::Auth {
            provider: provider.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => SearchError::RateLimited {
            provider: provider.to_string(),
            retry_after_secs: parse_retry_after(headers).map(|d| d.as_secs().max(1)),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => SearchError::Network {
            provider: provider.to_string(),
            message: format!("HTTP {status}"),
        },
        _ => SearchError::Provider {
            provider: provider.to_string(),
            message: format!("HTTP {status}"),
        },
    };
    Some(err)
}

/// Fail with a typed error unless the response is 2xx.
pub fn check_status(provider: &str, response: &reqwest::Response) -> Result<(), SearchError> {
    match status_error(provider, response.status(), response.headers()) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Whitespace-collapsed text of an element.
pub(crate) fn element_text(element: scraper::ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, RETRY_AFTER};

    #[test]
    fn test_success_is_not_an_error() {
        assert!(status_error("p", StatusCode::OK, &HeaderMap::new()).is_none());
    }

    #[test]
    fn test_auth_statuses() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            let err = status_error("p", status, &HeaderMap::new()).unwrap();
            assert!(matches!(err, SearchError::Auth { .. }));
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_rate_limit_reads_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        let err = status_error("p", StatusCode::TOO_MANY_REQUESTS, &headers).unwrap();
        match err {
            SearchError::RateLimited {
                retry_after_secs, ..
            } => assert_eq!(retry_after_secs, Some(7)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_server_error_is_retryable_provider_error() {
        let err = status_error("p", StatusCode::BAD_GATEWAY, &HeaderMap::new()).unwrap();
        assert!(matches!(err, SearchError::Provider { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_element_text_collapses_whitespace() {
        let html = scraper::Html::parse_fragment("<p>  Mallard \n <b>ducks</b>   fly </p>");
        let sel = scraper::Selector::parse("p").unwrap();
        let p = html.select(&sel).next().unwrap();
        assert_eq!(element_text(p), "Mallard ducks fly");
    }
}
