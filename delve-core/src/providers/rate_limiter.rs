//! Client-side token bucket rate limiter for provider requests.
//!
//! Tokens replenish continuously at `requests_per_second` up to
//! `burst_size`. Callers either wait asynchronously for a token or ask how
//! long they would have to wait.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for a provider's rate limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Sustained request rate (<= 0 = unlimited).
    pub requests_per_second: f64,
    /// Bucket capacity; the largest burst allowed after idling.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 0.0,
            burst_size: 1,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket shared by all callers of one provider.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    config: RateLimitConfig,
    bucket: Mutex<Bucket>,
}

impl TokenBucketLimiter {
    /// Create a new limiter with a full bucket.
    pub fn new(config: RateLimitConfig) -> Self {
        let config = RateLimitConfig {
            burst_size: config.burst_size.max(1),
            ..config
        };
        Self {
            bucket: Mutex::new(Bucket {
                tokens: f64::from(config.burst_size),
                last_refill: Instant::now(),
            }),
            config,
        }
    }

    /// Unlimited limiter.
    pub fn unlimited() -> Self {
        Self::new(RateLimitConfig::default())
    }

    /// Check if any limit is configured.
    pub fn has_limits(&self) -> bool {
        self.config.requests_per_second > 0.0
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        let capacity = f64::from(self.config.burst_size);
        bucket.tokens = (bucket.tokens + elapsed * self.config.requests_per_second).min(capacity);
        bucket.last_refill = now;
    }

    /// Take a token if one is available.
    ///
    /// Returns `None` when the request may proceed now, or `Some(delay)`
    /// indicating how long until a token will be available.
    pub fn try_acquire(&self) -> Option<Duration> {
        if !self.has_limits() {
            return None;
        }
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            let missing = 1.0 - bucket.tokens;
            Some(Duration::from_secs_f64(
                missing / self.config.requests_per_second,
            ))
        }
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        while let Some(wait) = self.try_acquire() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently in the bucket.
    pub fn available(&self) -> f64 {
        if !self.has_limits() {
            return f64::INFINITY;
        }
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());
        bucket.tokens
    }
}

/// Parse the Retry-After header from an HTTP 429 response.
///
/// Supports both seconds (numeric) and HTTP-date formats. Returns the
/// delay as a Duration.
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let value = headers
        .get(reqwest::header::RETRY_AFTER)
        .or_else(|| headers.get("x-ratelimit-reset"))
        .and_then(|v| v.to_str().ok())?
        .trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    // Fractional seconds (e.g., "0.5s")
    if let Some(secs) = value
        .strip_suffix('s')
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|s| s.is_finite() && *s >= 0.0)
    {
        return Some(Duration::from_secs_f64(secs));
    }

    if let Ok(at) = chrono::DateTime::parse_from_rfc2822(value) {
        let delta = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
        return Some(delta.to_std().unwrap_or_default());
    }

    // Fall back to a conservative 5 second delay
    Some(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn test_limiter_no_limits() {
        let limiter = TokenBucketLimiter::unlimited();
        for _ in 0..1000 {
            assert!(limiter.try_acquire().is_none());
        }
        assert!(!limiter.has_limits());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_wait() {
        let limiter = TokenBucketLimiter::new(RateLimitConfig {
            requests_per_second: 2.0,
            burst_size: 3,
        });
        assert!(limiter.try_acquire().is_none());
        assert!(limiter.try_acquire().is_none());
        assert!(limiter.try_acquire().is_none());

        let wait = limiter.try_acquire().unwrap();
        assert!((wait.as_secs_f64() - 0.5).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_caps_at_burst() {
        let limiter = TokenBucketLimiter::new(RateLimitConfig {
            requests_per_second: 10.0,
            burst_size: 2,
        });
        assert!(limiter.try_acquire().is_none());
        assert!(limiter.try_acquire().is_none());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!((limiter.available() - 2.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_sleeps_for_token() {
        let limiter = TokenBucketLimiter::new(RateLimitConfig {
            requests_per_second: 1.0,
            burst_size: 1,
        });
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1990), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(2100), "{elapsed:?}");
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("30"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_parse_retry_after_fractional() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("1.5s"));
        assert_eq!(
            parse_retry_after(&headers),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_parse_retry_after_past_date() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_missing() {
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }
}
