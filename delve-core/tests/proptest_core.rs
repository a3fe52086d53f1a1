//! Property-based tests for core components using proptest.

use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};

use delve_core::error::SearchError;
use delve_core::providers::RetryPolicy;
use delve_core::ranking::{ResultConsolidator, normalize_url};
use delve_core::research::{MAX_EXPANDED_QUERIES, QueryExpander, ResearchDepth, ResearchPlan};
use delve_core::text;
use delve_core::types::{ProviderKind, Query, SearchResult, clamp_unit};

fn url_strategy() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["http", "https", "HTTPS"]),
        "[a-zA-Z]{3,10}",
        prop::sample::select(vec!["com", "org", "gov", "edu", "io"]),
        "[a-z0-9/]{0,12}",
        prop::collection::vec(
            (
                prop::sample::select(vec!["a", "b", "q", "utm_source", "gclid", "page"]),
                "[a-z0-9]{1,5}",
            ),
            0..4,
        ),
        prop::option::of("[a-z]{1,6}"),
    )
        .prop_map(|(scheme, host, tld, path, params, fragment)| {
            let mut url = format!("{scheme}://{host}.{tld}/{path}");
            if !params.is_empty() {
                let query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
                url.push('?');
                url.push_str(&query.join("&"));
            }
            if let Some(fragment) = fragment {
                url.push('#');
                url.push_str(&fragment);
            }
            url
        })
}

fn result_set(urls: Vec<String>, provider: &str) -> Vec<SearchResult> {
    urls.into_iter()
        .enumerate()
        .map(|(i, url)| {
            SearchResult::new(
                url,
                format!("Duck migration report number {i} item{i}"),
                provider,
                ProviderKind::Mock,
            )
            .with_relevance((i % 7) as f64 / 7.0)
        })
        .collect()
}

// --- URL normalization properties ---

proptest! {
    #[test]
    fn normalize_is_idempotent(url in url_strategy()) {
        let once = normalize_url(&url);
        prop_assert_eq!(normalize_url(&once), once);
    }

    #[test]
    fn normalize_drops_tracking_and_fragment(url in url_strategy()) {
        let normalized = normalize_url(&url);
        prop_assert!(!normalized.contains("utm_source"));
        prop_assert!(!normalized.contains("gclid"));
        prop_assert!(!normalized.contains('#'));
    }
}

// --- Consolidation invariants ---

proptest! {
    #[test]
    fn consolidated_results_are_capped_sorted_and_unique(
        first in prop::collection::vec(url_strategy(), 0..25),
        second in prop::collection::vec(url_strategy(), 0..25),
        max_results in 1usize..30,
    ) {
        let query = Query::builder("duck migration")
            .max_results(max_results)
            .build()
            .unwrap();
        let per_provider = BTreeMap::from([
            ("alpha".to_string(), result_set(first, "alpha")),
            ("beta".to_string(), result_set(second, "beta")),
        ]);
        let ranked = ResultConsolidator::default().consolidate(&query, per_provider);

        prop_assert!(ranked.len() <= max_results);
        prop_assert!(ranked
            .windows(2)
            .all(|w| w[0].relevance_score >= w[1].relevance_score));
        let unique: HashSet<String> = ranked.iter().map(|r| normalize_url(&r.url)).collect();
        prop_assert_eq!(unique.len(), ranked.len());
        for result in &ranked {
            prop_assert!((0.0..=1.0).contains(&result.relevance_score));
        }
    }

    #[test]
    fn consolidation_is_deterministic(
        urls in prop::collection::vec(url_strategy(), 1..20),
    ) {
        let query = Query::new("duck migration").unwrap();
        let consolidator = ResultConsolidator::default();
        let run = || {
            consolidator
                .consolidate_one(&query, "alpha", result_set(urls.clone(), "alpha"))
                .into_iter()
                .map(|r| r.url)
                .collect::<Vec<_>>()
        };
        prop_assert_eq!(run(), run());
    }
}

// --- Scores, retries and text helpers ---

proptest! {
    #[test]
    fn clamp_unit_stays_in_range(score in prop::num::f64::ANY) {
        let clamped = clamp_unit(score);
        prop_assert!((0.0..=1.0).contains(&clamped));
    }

    #[test]
    fn retry_stops_at_max_attempts(max_attempts in 1u32..10, attempt in 1u32..20) {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        }
        .with_max_attempts(max_attempts);
        let retryable = SearchError::Network {
            provider: "p".into(),
            message: "reset".into(),
        };
        let fatal = SearchError::Validation {
            message: "bad query".into(),
        };
        prop_assert_eq!(policy.should_retry(attempt, &retryable), attempt < max_attempts);
        prop_assert!(!policy.should_retry(attempt, &fatal));
    }

    #[test]
    fn retry_delay_never_exceeds_cap(attempt in 1u32..40) {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        prop_assert!(policy.delay_for(attempt) <= policy.max_delay);
    }

    #[test]
    fn jaccard_is_symmetric_and_bounded(a in "[a-z ]{0,60}", b in "[a-z ]{0,60}") {
        let (x, y) = (text::term_set(&a), text::term_set(&b));
        let ab = text::jaccard(&x, &y);
        prop_assert_eq!(ab, text::jaccard(&y, &x));
        prop_assert!((0.0..=1.0).contains(&ab));
    }

    #[test]
    fn query_text_is_never_empty(raw in "\\PC{0,20}") {
        if let Ok(query) = Query::new(raw) {
            prop_assert!(!query.text().trim().is_empty());
        }
    }
}

fn topic_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<String>(),
        "\\PC{2,40}",
        (
            "[a-zA-Z\u{130}\u{23a}\u{df}\u{1e9e} ]{1,12}",
            prop::sample::select(vec![" vs ", " VS. ", " Versus ", " vs", "vs "]),
            "[a-zA-Z\u{130}\u{23a}\u{df}\u{1e9e} ]{0,12}",
        )
            .prop_map(|(left, sep, right)| format!("{left}{sep}{right}")),
    ]
}

proptest! {
    #[test]
    fn expansion_is_bounded_for_any_topic(
        topic in topic_strategy(),
        context in prop::collection::vec("\\PC{0,80}", 0..4),
    ) {
        let expander = QueryExpander::new();
        for depth in [
            ResearchDepth::Quick,
            ResearchDepth::Standard,
            ResearchDepth::Deep,
            ResearchDepth::Exhaustive,
        ] {
            let Ok(plan) = ResearchPlan::builder(topic.clone()).depth(depth).build() else {
                continue;
            };
            let first = expander.expand(&plan, 1, &[]);
            prop_assert!(!first.is_empty());
            prop_assert!(first.len() <= MAX_EXPANDED_QUERIES);
            for round in 2..=3 {
                let later = expander.expand(&plan, round, &context);
                prop_assert!(later.len() <= MAX_EXPANDED_QUERIES);
            }
        }
    }
}
