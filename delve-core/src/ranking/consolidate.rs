//! Merge per-provider result sets into one ranked list.

use super::dedup::Deduplicator;
use super::scorer::RankingScorer;
use crate::types::{Query, SearchResult};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ResultConsolidator {
    dedup: Deduplicator,
    scorer: RankingScorer,
}

impl ResultConsolidator {
    pub fn new(dedup: Deduplicator, scorer: RankingScorer) -> Self {
        Self { dedup, scorer }
    }

    pub fn scorer(&self) -> &RankingScorer {
        &self.scorer
    }

    /// Merge results keyed by provider name (iterated in name order), stamp
    /// provenance, drop excluded domains, then dedup and rank.
    pub fn consolidate(
        &self,
        query: &Query,
        per_provider: BTreeMap<String, Vec<SearchResult>>,
    ) -> Vec<SearchResult> {
        let providers_total = per_provider.len();
        let mut merged = Vec::new();
        let mut excluded = 0usize;
        for (provider, results) in per_provider {
            for mut result in results {
                if query.is_excluded(&result.domain) {
                    excluded += 1;
                    continue;
                }
                result
                    .metadata
                    .insert("provider".to_string(), Value::String(provider.clone()));
                result
                    .metadata
                    .insert("providers_total".to_string(), Value::from(providers_total));
                merged.push(result);
            }
        }

        let mut unique = self.dedup.dedup(merged);
        let providers: BTreeSet<&str> = unique
            .iter()
            .filter_map(|r| r.metadata.get("provider").and_then(Value::as_str))
            .collect();
        let diversity = if unique.is_empty() {
            0.0
        } else {
            providers.len() as f64 / unique.len() as f64
        };
        for result in &mut unique {
            result
                .metadata
                .insert("provider_diversity".to_string(), Value::from(diversity));
        }

        debug!(
            providers = providers_total,
            excluded,
            unique = unique.len(),
            "Consolidating results"
        );
        self.scorer.rank(query, unique)
    }

    /// Single-provider convenience wrapper.
    pub fn consolidate_one(
        &self,
        query: &Query,
        provider: &str,
        results: Vec<SearchResult>,
    ) -> Vec<SearchResult> {
        self.consolidate(query, BTreeMap::from([(provider.to_string(), results)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::normalize::normalize_url;
    use crate::types::ProviderKind;
    use std::collections::HashSet;

    fn results(provider: &str, entries: &[(&str, &str)]) -> Vec<SearchResult> {
        entries
            .iter()
            .map(|(url, title)| SearchResult::new(*url, *title, provider, ProviderKind::FreeChain))
            .collect()
    }

    #[test]
    fn test_merges_dedups_and_stamps_provenance() {
        let query = Query::builder("duck migration")
            .exclude_domain("spam.com")
            .build()
            .unwrap();
        let per_provider = BTreeMap::from([
            (
                "beta".to_string(),
                results(
                    "beta",
                    &[
                        ("https://a.org/x?utm_source=feed", "Duck migration along flyways"),
                        ("https://spam.com/ad", "Cheap pills"),
                    ],
                ),
            ),
            (
                "alpha".to_string(),
                results(
                    "alpha",
                    &[
                        ("https://a.org/x", "Duck migration along flyways"),
                        ("https://b.org/y", "Wetland habitat loss in autumn"),
                    ],
                ),
            ),
        ]);
        let out = ResultConsolidator::default().consolidate(&query, per_provider);

        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.domain != "spam.com"));
        let urls: HashSet<String> = out.iter().map(|r| normalize_url(&r.url)).collect();
        assert_eq!(urls.len(), out.len());
        for r in &out {
            assert_eq!(r.metadata["providers_total"], Value::from(2));
            assert_eq!(r.metadata["provider_diversity"], Value::from(0.5));
        }
        assert!(out.windows(2).all(|w| w[0].relevance_score >= w[1].relevance_score));
    }

    #[test]
    fn test_respects_max_results() {
        let query = Query::builder("duck migration").max_results(2).build().unwrap();
        let entries = [
            ("https://s0.net/p", "Duck migration north"),
            ("https://s1.net/p", "Goose flight paths"),
            ("https://s2.net/p", "Swan nesting season"),
            ("https://s3.net/p", "Heron feeding habits"),
            ("https://s4.net/p", "Teal wintering grounds"),
        ];
        let out = ResultConsolidator::default().consolidate_one(&query, "only", results("only", &entries));
        assert_eq!(out.len(), 2);
    }
}
