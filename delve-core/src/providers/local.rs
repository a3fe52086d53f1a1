//! Local heuristic provider.
//!
//! Answers queries from pages the engine has already extracted, using plain
//! term overlap. It needs no network, which makes it the last link of the
//! fallback chain.

use super::SearchProvider;
use crate::error::SearchError;
use crate::text;
use crate::types::{ExtractedContent, ProviderKind, Query, SearchResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

const DEFAULT_CAPACITY: usize = 5000;

struct Document {
    result: SearchResult,
    title_terms: HashSet<String>,
    body_terms: HashSet<String>,
}

/// Term-overlap search over an in-memory corpus.
pub struct LocalHeuristicProvider {
    name: String,
    capacity: usize,
    corpus: RwLock<VecDeque<Document>>,
}

impl Default for LocalHeuristicProvider {
    fn default() -> Self {
        Self::new("local")
    }
}

impl LocalHeuristicProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            corpus: RwLock::new(VecDeque::new()),
        }
    }

    /// Add an extracted page to the corpus.
    pub fn index(&self, content: &ExtractedContent) {
        let mut result = content.to_result();
        result.provider = ProviderKind::LocalHeuristic;
        result.provider_name = self.name.clone();
        result.trust_score = ProviderKind::LocalHeuristic.trust_weight();
        self.index_result(result);
    }

    /// Add a result to the corpus, replacing any entry with the same URL.
    /// The oldest document is dropped once the corpus is full.
    pub fn index_result(&self, result: SearchResult) {
        let doc = Document {
            title_terms: text::term_set(&result.title),
            body_terms: text::term_set(&format!("{} {}", result.snippet, result.content)),
            result,
        };
        let mut corpus = self.corpus.write();
        corpus.retain(|d| d.result.url != doc.result.url);
        if corpus.len() >= self.capacity {
            corpus.pop_front();
        }
        corpus.push_back(doc);
    }

    pub fn len(&self) -> usize {
        self.corpus.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn score(query_terms: &HashSet<String>, doc: &Document) -> f64 {
        let title = text::containment(query_terms, &doc.title_terms);
        let body = text::containment(query_terms, &doc.body_terms);
        0.6 * title + 0.4 * body
    }
}

#[async_trait]
impl SearchProvider for LocalHeuristicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::LocalHeuristic
    }

    async fn search(&self, query: &Query) -> Result<Vec<SearchResult>, SearchError> {
        let query_terms = text::term_set(query.text());
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let corpus = self.corpus.read();
        let mut scored: Vec<(f64, &Document)> = corpus
            .iter()
            .map(|d| (Self::score(&query_terms, d), d))
            .filter(|(s, _)| *s > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.result.url.cmp(&b.1.result.url))
        });

        let results: Vec<SearchResult> = scored
            .into_iter()
            .take(query.max_results())
            .map(|(score, d)| {
                let mut r = d.result.clone();
                r.relevance_score = score;
                r
            })
            .collect();
        debug!(provider = %self.name, hits = results.len(), "Local corpus search");
        Ok(results)
    }
}
