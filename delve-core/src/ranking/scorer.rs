//! Multi-factor result ranking.
//!
//! Each result gets nine sub-scores in `[0, 1]` that are combined with
//! [`RankingWeights`]. Ranking is a pure function of the query, the results
//! and the reference time, so identical inputs always rank identically.

use super::dedup::content_completeness;
use crate::text::{self, containment};
use crate::types::{Query, SearchMode, SearchResult, UrlParts, clamp_unit, domain_matches};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Domains with well-known editorial standards.
const HIGH_AUTHORITY: &[(&str, f64)] = &[
    ("wikipedia.org", 0.9),
    ("arxiv.org", 0.9),
    ("nature.com", 0.9),
    ("science.org", 0.9),
    ("nih.gov", 0.95),
    ("who.int", 0.9),
    ("reuters.com", 0.85),
    ("apnews.com", 0.85),
    ("bbc.co.uk", 0.85),
    ("github.com", 0.75),
    ("stackoverflow.com", 0.75),
    ("mozilla.org", 0.8),
    ("rust-lang.org", 0.8),
];

/// Domains seen more often than this are penalized for diversity.
pub const DIVERSITY_FREE_OCCURRENCES: usize = 2;

/// Weights for the final score. They sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankingWeights {
    pub relevance: f64,
    pub authority: f64,
    pub freshness: f64,
    pub diversity: f64,
    pub popularity: f64,
    pub quality: f64,
    pub metadata: f64,
    pub trust: f64,
    pub engagement: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            relevance: 0.25,
            authority: 0.20,
            freshness: 0.15,
            diversity: 0.10,
            popularity: 0.10,
            quality: 0.10,
            metadata: 0.05,
            trust: 0.03,
            engagement: 0.02,
        }
    }
}

impl RankingWeights {
    pub fn total(&self) -> f64 {
        self.relevance
            + self.authority
            + self.freshness
            + self.diversity
            + self.popularity
            + self.quality
            + self.metadata
            + self.trust
            + self.engagement
    }
}

/// Per-factor scores for one result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub relevance: f64,
    pub authority: f64,
    pub freshness: f64,
    pub diversity: f64,
    pub popularity: f64,
    pub quality: f64,
    pub metadata: f64,
    pub trust: f64,
    pub engagement: f64,
}

impl ScoreBreakdown {
    pub fn combine(&self, w: &RankingWeights) -> f64 {
        clamp_unit(
            w.relevance * self.relevance
                + w.authority * self.authority
                + w.freshness * self.freshness
                + w.diversity * self.diversity
                + w.popularity * self.popularity
                + w.quality * self.quality
                + w.metadata * self.metadata
                + w.trust * self.trust
                + w.engagement * self.engagement,
        )
    }
}

#[derive(Debug, Clone)]
pub struct RankingScorer {
    weights: RankingWeights,
    now: Option<DateTime<Utc>>,
}

impl Default for RankingScorer {
    fn default() -> Self {
        Self::new(RankingWeights::default())
    }
}

impl RankingScorer {
    pub fn new(weights: RankingWeights) -> Self {
        Self { weights, now: None }
    }

    /// Pin the reference time used for freshness.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn weights(&self) -> &RankingWeights {
        &self.weights
    }

    /// Score every result, sort descending (URL ascending on ties) and
    /// truncate to the query's `max_results`.
    pub fn rank(&self, query: &Query, results: Vec<SearchResult>) -> Vec<SearchResult> {
        let now = self.now.unwrap_or_else(Utc::now);
        let query_terms = text::term_set(query.text());
        let mut domain_counts: HashMap<String, usize> = HashMap::new();
        for r in &results {
            *domain_counts.entry(r.domain.clone()).or_insert(0) += 1;
        }

        let mut scored: Vec<SearchResult> = results
            .into_iter()
            .map(|mut r| {
                let count = domain_counts.get(&r.domain).copied().unwrap_or(1);
                let breakdown = self.breakdown(query, &query_terms, &r, count, now);
                r.relevance_score = breakdown.combine(&self.weights);
                r
            })
            .collect();

        scored.sort_by(|a, b| {
            b.relevance_score
                .total_cmp(&a.relevance_score)
                .then_with(|| a.url.cmp(&b.url))
        });
        scored.truncate(query.max_results());
        scored
    }

    /// All sub-scores for one result.
    pub fn breakdown(
        &self,
        query: &Query,
        query_terms: &HashSet<String>,
        result: &SearchResult,
        domain_occurrences: usize,
        now: DateTime<Utc>,
    ) -> ScoreBreakdown {
        ScoreBreakdown {
            relevance: relevance(query, query_terms, result),
            authority: authority(query, result),
            freshness: freshness(query, result, now),
            diversity: diversity(domain_occurrences),
            popularity: popularity(result),
            quality: content_completeness(result),
            metadata: metadata_completeness(result),
            trust: clamp_unit(result.trust_score),
            engagement: engagement(result),
        }
    }
}

/// Term and phrase match in title and body, weighted by how early the first
/// match appears, blended with semantic overlap and provider relevance.
pub fn relevance(query: &Query, query_terms: &HashSet<String>, result: &SearchResult) -> f64 {
    if query_terms.is_empty() {
        return clamp_unit(result.relevance_score);
    }
    let title_terms = text::term_set(&result.title);
    let body = if result.content.is_empty() {
        result.snippet.to_lowercase()
    } else {
        format!("{} {}", result.snippet, result.content).to_lowercase()
    };
    let body_terms = text::term_set(&body);

    let title_cov = containment(query_terms, &title_terms);
    let body_cov = containment(query_terms, &body_terms);
    let position = query_terms
        .iter()
        .filter_map(|t| body.find(t.as_str()))
        .min()
        .map(|idx| 1.0 - idx as f64 / body.len().max(1) as f64)
        .unwrap_or(0.0);

    let phrase = query.normalized_text();
    let phrase_hit = if result.title.to_lowercase().contains(&phrase) {
        1.0
    } else if body.contains(&phrase) {
        0.7
    } else {
        0.0
    };
    let textual = 0.45 * title_cov + 0.35 * body_cov * (0.7 + 0.3 * position) + 0.2 * phrase_hit;

    let mut concepts: HashSet<String> = result.keywords.iter().map(|k| k.to_lowercase()).collect();
    for heading in &result.headings {
        concepts.extend(text::terms(heading));
    }
    let semantic = containment(query_terms, &concepts);

    let lexical = 0.85 * textual + 0.15 * semantic;
    if result.relevance_score > 0.0 {
        clamp_unit(0.7 * lexical + 0.3 * result.relevance_score)
    } else {
        clamp_unit(lexical)
    }
}

fn tld_authority(tld: &str) -> f64 {
    match tld {
        "gov" | "edu" | "mil" => 0.9,
        "int" => 0.85,
        "org" => 0.7,
        "com" | "net" => 0.6,
        "io" | "dev" => 0.55,
        _ => 0.5,
    }
}

/// Reputation of a host from known domains and TLD heuristics.
pub fn domain_authority(host: &str, domain: &str, tld: &str) -> f64 {
    let known = HIGH_AUTHORITY
        .iter()
        .filter(|(d, _)| domain_matches(host, d))
        .map(|(_, score)| *score)
        .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))));
    if let Some(score) = known {
        return score;
    }
    // Government and academic second-level registrations (gov.uk, ac.jp).
    let dotted = format!(".{domain}");
    if [".gov.", ".ac.", ".edu."].iter().any(|m| dotted.contains(m)) {
        return 0.9;
    }
    tld_authority(tld)
}

/// [`domain_authority`] for a raw URL, with the HTTPS bonus.
pub fn url_authority(url: &str) -> f64 {
    let parts = UrlParts::parse(url);
    let mut score = domain_authority(&parts.host, &parts.domain, &parts.tld);
    if parts.is_secure {
        score += 0.05;
    }
    clamp_unit(score)
}

/// Domain reputation heuristics, boosted for the query's preferred domains.
pub fn authority(query: &Query, result: &SearchResult) -> f64 {
    let host = match &result.subdomain {
        Some(sub) => format!("{sub}.{}", result.domain),
        None => result.domain.clone(),
    };
    let mut score = domain_authority(&host, &result.domain, &result.tld);
    if result.is_secure {
        score += 0.05;
    }
    if query.is_preferred(&result.domain) || query.is_preferred(&host) {
        score += 0.2;
    }
    clamp_unit(score.max(result.authority_score))
}

/// Age-based decay. Items outside the query's time range score zero; items
/// without a date are neutral.
pub fn freshness(query: &Query, result: &SearchResult, now: DateTime<Utc>) -> f64 {
    let Some(published) = result.published_at.or(result.modified_at) else {
        return 0.5;
    };
    let age = now.signed_duration_since(published);
    if let Some(max_age) = query.time_range().max_age() {
        if age > max_age {
            return 0.0;
        }
    }
    let age_hours = age.num_minutes().max(0) as f64 / 60.0;
    match query.mode() {
        SearchMode::Lightning => {
            if age_hours <= 24.0 {
                1.0
            } else {
                (-(age_hours - 24.0) / 72.0).exp()
            }
        }
        _ => {
            let years = age_hours / (24.0 * 365.0);
            clamp_unit(1.0 - years / 5.0)
        }
    }
}

/// Full marks up to two results per domain, then `2 / n`.
pub fn diversity(domain_occurrences: usize) -> f64 {
    if domain_occurrences <= DIVERSITY_FREE_OCCURRENCES {
        1.0
    } else {
        DIVERSITY_FREE_OCCURRENCES as f64 / domain_occurrences as f64
    }
}

/// Provider-supplied popularity, else derived from the provider's position.
pub fn popularity(result: &SearchResult) -> f64 {
    if let Some(p) = result.metadata.get("popularity").and_then(|v| v.as_f64()) {
        return clamp_unit(p);
    }
    match result.metadata.get("position").and_then(|v| v.as_u64()) {
        Some(position) if position > 0 => clamp_unit(1.0 / (position as f64).sqrt()),
        _ => 0.5,
    }
}

/// Fraction of optional descriptive fields present.
pub fn metadata_completeness(result: &SearchResult) -> f64 {
    let present = [
        result.published_at.is_some(),
        !result.snippet.is_empty(),
        !result.keywords.is_empty(),
        !result.headings.is_empty(),
        !result.images.is_empty(),
        result.metadata.contains_key("author"),
    ];
    present.iter().filter(|p| **p).count() as f64 / present.len() as f64
}

/// Provider engagement signal, else a reading-time heuristic.
pub fn engagement(result: &SearchResult) -> f64 {
    if let Some(e) = result.metadata.get("engagement").and_then(|v| v.as_f64()) {
        return clamp_unit(e);
    }
    match (result.word_count, result.reading_time_minutes) {
        (0, _) => 0.3,
        (_, 2..=15) => 1.0,
        (_, 0..=1) => 0.6,
        _ => 0.4,
    }
}
