//! Claim extraction and cross-source verification.
//!
//! Candidate claims are assertive sentences pulled from each extracted page.
//! Every claim is compared against the best-matching sentence of every other
//! source: a close match with the same polarity supports it, a close match
//! with opposite polarity (one side negated) conflicts with it.

use crate::ranking::normalize_url;
use crate::text::{containment, jaccard, split_sentences, term_set, words};
use crate::types::{ExtractedContent, clamp_unit};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Claims taken from a single source.
pub const MAX_CLAIMS_PER_SOURCE: usize = 5;
/// Support ratio above which a claim counts as verified.
pub const VERIFIED_RATIO: f64 = 0.7;
/// Support ratio below which a claim counts as conflicting.
pub const CONFLICTING_RATIO: f64 = 0.3;

const MIN_CLAIM_CHARS: usize = 30;
const MAX_CLAIM_CHARS: usize = 400;
/// Term overlap needed for another source's sentence to address a claim.
const ADDRESS_OVERLAP: f64 = 0.5;
/// Claims at least this similar (and of equal polarity) are merged.
const MERGE_SIMILARITY: f64 = 0.85;

const ASSERTION_MARKERS: &[&str] = &[
    " is ",
    " are ",
    " was ",
    " were ",
    " has ",
    " have ",
    "according to",
    "research shows",
    "studies show",
    "study shows",
    "found that",
    "shows that",
    "suggests that",
    "demonstrated",
    "reported",
    "confirmed",
    "estimated",
];

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "neither", "nor", "without", "lack", "lacks", "cannot", "doesn",
    "don", "isn", "aren", "wasn", "weren", "won", "didn", "hasn", "haven",
];

/// Outcome of cross-checking a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Not checked, not addressed by any other source, or evidence is mixed.
    Unverified,
    Verified,
    Conflicting,
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VerificationStatus::Unverified => "unverified",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Conflicting => "conflicting",
        };
        f.write_str(s)
    }
}

/// A single claim surfaced by research. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchFinding {
    pub id: Uuid,
    pub content: String,
    pub source_url: String,
    pub source_title: String,
    pub confidence: f64,
    pub relevance: f64,
    pub factuality: f64,
    pub source_authority: f64,
    pub status: VerificationStatus,
    pub supporting_evidence: Vec<String>,
    pub conflicting_evidence: Vec<String>,
    /// Round in which the finding was produced.
    pub round: u32,
}

impl ResearchFinding {
    /// Sort key used for summaries and report ordering.
    pub fn weight(&self) -> f64 {
        self.confidence * self.relevance
    }
}

/// An extracted page together with the scores of the source it came from.
#[derive(Debug, Clone, Copy)]
pub struct SourceDocument<'a> {
    pub content: &'a ExtractedContent,
    pub authority: f64,
    pub relevance: f64,
}

/// Extracts claims and cross-checks them between sources.
#[derive(Debug, Clone)]
pub struct ClaimVerifier {
    enabled: bool,
}

impl ClaimVerifier {
    /// With `enabled == false` claims are still extracted but every finding
    /// is left unverified.
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Findings for the claims in `fresh`, checked against `corpus`
    /// (which should include `fresh`).
    pub fn verify(
        &self,
        topic: &str,
        fresh: &[SourceDocument<'_>],
        corpus: &[SourceDocument<'_>],
        round: u32,
    ) -> Vec<ResearchFinding> {
        let topic_terms = term_set(topic);
        let corpus_sentences: Vec<(String, Vec<String>)> = corpus
            .iter()
            .map(|doc| {
                (
                    normalize_url(&doc.content.url),
                    split_sentences(&doc.content.text),
                )
            })
            .collect();

        let mut findings = Vec::new();
        for doc in fresh {
            let own_key = normalize_url(&doc.content.url);
            for claim in extract_claims(&doc.content.text) {
                let claim_terms = term_set(&claim);
                let negated = is_negated(&claim);

                let mut supporting = Vec::new();
                let mut conflicting = Vec::new();
                if self.enabled {
                    for ((key, sentences), other) in corpus_sentences.iter().zip(corpus) {
                        if *key == own_key {
                            continue;
                        }
                        let Some(best) = best_match(&claim_terms, sentences) else {
                            continue;
                        };
                        let evidence = format!("{}: {}", other.content.url, best);
                        if is_negated(best) == negated {
                            supporting.push(evidence);
                        } else {
                            conflicting.push(evidence);
                        }
                    }
                }

                let (status, factuality) =
                    match support_ratio(supporting.len(), conflicting.len()) {
                        None => (VerificationStatus::Unverified, 0.5),
                        Some(ratio) if ratio > VERIFIED_RATIO => {
                            (VerificationStatus::Verified, ratio)
                        }
                        Some(ratio) if ratio < CONFLICTING_RATIO => {
                            (VerificationStatus::Conflicting, ratio)
                        }
                        Some(ratio) => (VerificationStatus::Unverified, ratio),
                    };

                let relevance =
                    clamp_unit(0.7 * containment(&topic_terms, &claim_terms) + 0.3 * doc.relevance);
                let confidence = clamp_unit(
                    0.4 * doc.authority + 0.3 * doc.content.quality_score + 0.3 * factuality,
                );

                findings.push(ResearchFinding {
                    id: Uuid::new_v4(),
                    content: claim,
                    source_url: doc.content.url.clone(),
                    source_title: doc.content.title.clone(),
                    confidence,
                    relevance,
                    factuality,
                    source_authority: clamp_unit(doc.authority),
                    status,
                    supporting_evidence: supporting,
                    conflicting_evidence: conflicting,
                    round,
                });
            }
        }

        tracing::debug!(
            sources = fresh.len(),
            findings = findings.len(),
            verify = self.enabled,
            "Claims extracted"
        );
        merge_findings(findings)
    }
}

/// Supporting sources over all sources that address the claim; `None` when none do.
pub fn support_ratio(supporting: usize, conflicting: usize) -> Option<f64> {
    let addressed = supporting + conflicting;
    (addressed > 0).then(|| supporting as f64 / addressed as f64)
}

/// Append `new` findings that are not near-duplicates of `existing` ones.
pub fn append_distinct(existing: &mut Vec<ResearchFinding>, new: Vec<ResearchFinding>) {
    for finding in new {
        let terms = term_set(&finding.content);
        let negated = is_negated(&finding.content);
        let duplicate = existing.iter().any(|f| {
            is_negated(&f.content) == negated
                && jaccard(&terms, &term_set(&f.content)) > MERGE_SIMILARITY
        });
        if !duplicate {
            existing.push(finding);
        }
    }
}

/// Assertive sentences of a reasonable length, at most five.
pub fn extract_claims(text: &str) -> Vec<String> {
    split_sentences(text)
        .into_iter()
        .filter(|s| {
            let len = s.chars().count();
            (MIN_CLAIM_CHARS..=MAX_CLAIM_CHARS).contains(&len) && !s.ends_with('?')
        })
        .filter(|s| {
            let padded = format!(" {} ", s.to_lowercase());
            ASSERTION_MARKERS.iter().any(|m| padded.contains(m))
        })
        .take(MAX_CLAIMS_PER_SOURCE)
        .collect()
}

/// Whether a sentence contains a negation word.
pub fn is_negated(sentence: &str) -> bool {
    words(sentence).iter().any(|w| NEGATIONS.contains(&w.as_str()))
}

fn best_match<'s>(claim_terms: &HashSet<String>, sentences: &'s [String]) -> Option<&'s str> {
    let mut best: Option<(&str, f64)> = None;
    for sentence in sentences {
        let overlap = jaccard(claim_terms, &term_set(sentence));
        if overlap >= ADDRESS_OVERLAP && best.is_none_or(|(_, b)| overlap > b) {
            best = Some((sentence.as_str(), overlap));
        }
    }
    best.map(|(s, _)| s)
}

/// Collapse near-identical claims of equal polarity, keeping the more
/// confident one and carrying over the other's source as support.
fn merge_findings(findings: Vec<ResearchFinding>) -> Vec<ResearchFinding> {
    let mut merged: Vec<(HashSet<String>, bool, ResearchFinding)> = Vec::new();
    for finding in findings {
        let terms = term_set(&finding.content);
        let negated = is_negated(&finding.content);
        let existing = merged
            .iter_mut()
            .find(|(t, n, _)| *n == negated && jaccard(t, &terms) > MERGE_SIMILARITY);
        match existing {
            Some((_, _, kept)) => {
                let (mut winner, loser) = if finding.confidence > kept.confidence {
                    (finding, kept.clone())
                } else {
                    (kept.clone(), finding)
                };
                if normalize_url(&loser.source_url) != normalize_url(&winner.source_url) {
                    let note = format!("{}: {}", loser.source_url, loser.content);
                    let known = winner
                        .supporting_evidence
                        .iter()
                        .any(|e| e.starts_with(&loser.source_url));
                    if !known {
                        winner.supporting_evidence.push(note);
                    }
                }
                *kept = winner;
            }
            None => merged.push((terms, negated, finding)),
        }
    }
    merged.into_iter().map(|(_, _, f)| f).collect()
}
