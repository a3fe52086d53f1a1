//! Exact and near-duplicate removal.
//!
//! Pass one groups results by normalized URL. Pass two compares token
//! signatures (title plus the start of the content) and treats a Jaccard
//! similarity above the threshold as a duplicate. In both passes the member
//! with the higher [`result_quality`] survives, in the position of the first
//! member seen.

use super::normalize::normalize_url;
use crate::text::{self, jaccard, prefix_chars};
use crate::types::SearchResult;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub const NEAR_DUPLICATE_THRESHOLD: f64 = 0.85;

/// Characters of content included in a near-duplicate signature.
pub const SIGNATURE_CONTENT_CHARS: usize = 200;

/// How complete a result's fields are, in `[0, 1]`.
pub fn content_completeness(result: &SearchResult) -> f64 {
    let mut score = 0.0;
    if !result.title.trim().is_empty() {
        score += 0.2;
    }
    if !result.snippet.trim().is_empty() {
        score += 0.15;
    }
    score += 0.35 * (result.word_count as f64 / 300.0).min(1.0);
    if result.published_at.is_some() {
        score += 0.1;
    }
    if !result.keywords.is_empty() || !result.headings.is_empty() {
        score += 0.1;
    }
    if !result.images.is_empty() || !result.links.is_empty() {
        score += 0.1;
    }
    score.min(1.0)
}

/// Quality used to pick the surviving duplicate: completeness blended with
/// the provider's trust weight.
pub fn result_quality(result: &SearchResult) -> f64 {
    0.6 * content_completeness(result) + 0.4 * result.trust_score
}

fn signature(result: &SearchResult) -> HashSet<String> {
    let body = if result.content.is_empty() {
        &result.snippet
    } else {
        &result.content
    };
    text::term_set(&format!(
        "{} {}",
        result.title,
        prefix_chars(body, SIGNATURE_CONTENT_CHARS)
    ))
}

/// Record that `dropped` was merged into `kept`.
fn merge_provenance(kept: &mut SearchResult, dropped: &SearchResult) {
    if dropped.provider_name == kept.provider_name {
        return;
    }
    let entry = kept
        .metadata
        .entry("also_reported_by".to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Value::Array(names) = entry {
        let name = Value::String(dropped.provider_name.clone());
        if !names.contains(&name) {
            names.push(name);
        }
    }
}

/// Keep `candidate` in `slot` if it is better, carrying provenance over.
fn keep_better(slot: &mut SearchResult, mut candidate: SearchResult) {
    if result_quality(&candidate) > result_quality(slot) {
        if let Some(previous) = slot.metadata.get("also_reported_by").cloned() {
            candidate
                .metadata
                .insert("also_reported_by".to_string(), previous);
        }
        merge_provenance(&mut candidate, slot);
        *slot = candidate;
    } else {
        merge_provenance(slot, &candidate);
    }
}

/// Counts from one dedup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    pub input: usize,
    pub exact_duplicates: usize,
    pub near_duplicates: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Deduplicator {
    threshold: f64,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(NEAR_DUPLICATE_THRESHOLD)
    }
}

impl Deduplicator {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn dedup(&self, results: Vec<SearchResult>) -> Vec<SearchResult> {
        self.dedup_with_stats(results).0
    }

    pub fn dedup_with_stats(&self, results: Vec<SearchResult>) -> (Vec<SearchResult>, DedupStats) {
        let mut stats = DedupStats {
            input: results.len(),
            ..Default::default()
        };

        let mut by_url: HashMap<String, usize> = HashMap::new();
        let mut unique: Vec<SearchResult> = Vec::with_capacity(results.len());
        for result in results {
            let key = normalize_url(&result.url);
            match by_url.get(&key) {
                Some(&idx) => {
                    stats.exact_duplicates += 1;
                    keep_better(&mut unique[idx], result);
                }
                None => {
                    by_url.insert(key, unique.len());
                    unique.push(result);
                }
            }
        }

        let mut kept: Vec<(SearchResult, HashSet<String>)> = Vec::with_capacity(unique.len());
        for result in unique {
            let sig = signature(&result);
            let twin = (!sig.is_empty())
                .then(|| {
                    kept.iter()
                        .position(|(_, other)| jaccard(&sig, other) > self.threshold)
                })
                .flatten();
            match twin {
                Some(idx) => {
                    stats.near_duplicates += 1;
                    let (slot, slot_sig) = &mut kept[idx];
                    let replace = result_quality(&result) > result_quality(slot);
                    keep_better(slot, result);
                    if replace {
                        *slot_sig = sig;
                    }
                }
                None => kept.push((result, sig)),
            }
        }

        debug!(
            input = stats.input,
            exact = stats.exact_duplicates,
            near = stats.near_duplicates,
            "Deduplicated results"
        );
        (kept.into_iter().map(|(r, _)| r).collect(), stats)
    }
}
