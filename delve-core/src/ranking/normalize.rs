//! URL normalization used for exact-duplicate detection.

use url::Url;

/// Query parameters dropped in addition to every `utm_*` parameter.
pub const TRACKING_PARAMS: &[&str] = &[
    "gclid", "fbclid", "msclkid", "dclid", "yclid", "mc_cid", "mc_eid", "_ga", "igshid", "ref_src",
];

pub fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Normalize a URL: lower-case scheme and host, drop the fragment and
/// tracking parameters, and sort the remaining query parameters.
///
/// Idempotent. Input that does not parse as a URL is trimmed and lower-cased.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_lowercase();
    };
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs.iter());
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_strips_tracking_and_fragment() {
        assert_eq!(
            normalize_url("HTTPS://Example.COM/Path?utm_source=x&b=2&gclid=abc&a=1#section"),
            "https://example.com/Path?a=1&b=2"
        );
    }

    #[test]
    fn test_equivalent_urls_collapse() {
        let a = normalize_url("https://example.com/a?utm_medium=email");
        let b = normalize_url("https://example.com/a");
        let c = normalize_url("https://example.com/a#top");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn test_param_order_irrelevant() {
        assert_eq!(
            normalize_url("https://example.com/?z=1&y=2"),
            normalize_url("https://example.com/?y=2&z=1")
        );
    }

    #[test]
    fn test_idempotent() {
        for raw in [
            "https://Example.com/a b?q=duck%20migration&fbclid=1",
            "http://example.com:80/x/?a=&b=%2F",
            "not a url",
        ] {
            let once = normalize_url(raw);
            assert_eq!(normalize_url(&once), once);
        }
    }

    #[test]
    fn test_tracking_param_detection() {
        assert!(is_tracking_param("UTM_Campaign"));
        assert!(is_tracking_param("fbclid"));
        assert!(!is_tracking_param("q"));
    }
}
