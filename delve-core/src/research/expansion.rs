//! Query expansion for the planning phase.
//!
//! Turns a research plan into the list of search queries for one round.
//! Deeper plans get synonym and related-concept variants; exhaustive plans
//! also get question forms. Later rounds refine with keywords mined from
//! what earlier rounds found.

use super::plan::{ResearchDepth, ResearchPlan};
use crate::text::{compact_ws, top_keywords, words};
use std::collections::HashSet;

/// Upper bound on queries issued per round.
pub const MAX_EXPANDED_QUERIES: usize = 20;

const SYNONYMS: &[(&str, &[&str])] = &[
    ("best", &["top", "leading"]),
    ("benefits", &["advantages", "pros"]),
    ("problems", &["issues", "challenges"]),
    ("effects", &["impact", "consequences"]),
    ("impact", &["effects", "influence"]),
    ("cost", &["price", "expense"]),
    ("history", &["origins", "evolution"]),
    ("future", &["outlook", "trends"]),
    ("guide", &["tutorial", "overview"]),
    ("fast", &["quick", "rapid"]),
    ("cheap", &["affordable", "low cost"]),
    ("risks", &["dangers", "hazards"]),
    ("causes", &["reasons", "drivers"]),
    ("migration", &["movement", "relocation"]),
];

const RELATED: &[(&str, &[&str])] = &[
    ("ai", &["machine learning", "neural networks"]),
    ("climate", &["global warming", "carbon emissions"]),
    ("health", &["medicine", "public health"]),
    ("economy", &["inflation", "gdp"]),
    ("energy", &["renewables", "power grid"]),
    ("security", &["vulnerabilities", "encryption"]),
    ("rust", &["memory safety", "cargo"]),
    ("birds", &["ornithology", "flyways"]),
    ("duck", &["waterfowl", "flyways"]),
    ("education", &["learning outcomes", "pedagogy"]),
    ("finance", &["markets", "investment"]),
    ("space", &["astronomy", "spaceflight"]),
];

const QUESTION_FORMS: &[&str] = &[
    "what is {}",
    "how does {} work",
    "why is {} important",
    "latest research on {}",
];

/// Keywords mined from context per refinement round.
const REFINEMENT_KEYWORDS: usize = 5;

/// Builds the per-round query list.
#[derive(Debug, Clone, Default)]
pub struct QueryExpander;

impl QueryExpander {
    pub fn new() -> Self {
        Self
    }

    /// Queries for `round` (1-based). `context` is text accumulated by
    /// earlier rounds (logs, extracted pages) and only matters after round 1.
    pub fn expand(&self, plan: &ResearchPlan, round: u32, context: &[String]) -> Vec<String> {
        let mut out = Expansion::default();
        let topic = compact_ws(&plan.topic);

        out.push(&topic);
        if let Some(question) = &plan.research_question {
            out.push(question);
        }
        for sub_topic in &plan.sub_topics {
            out.push(sub_topic);
        }
        for part in comparative_parts(&topic) {
            out.push(&part);
        }
        for keyword in &plan.keywords {
            out.push(&format!("{topic} {keyword}"));
        }

        if matches!(plan.depth, ResearchDepth::Deep | ResearchDepth::Exhaustive) {
            for variant in synonym_variants(&topic) {
                out.push(&variant);
            }
            for concept in related_concepts(&topic) {
                out.push(&format!("{topic} {concept}"));
            }
        }

        if plan.depth == ResearchDepth::Exhaustive {
            for form in QUESTION_FORMS {
                out.push(&form.replace("{}", &topic));
            }
        }

        if round > 1 && !context.is_empty() {
            let topic_words: HashSet<String> = words(&topic).into_iter().collect();
            let joined = context.join("\n");
            let refinements: Vec<String> = top_keywords(&joined, REFINEMENT_KEYWORDS * 2)
                .into_iter()
                .filter(|kw| !topic_words.contains(kw))
                .take(REFINEMENT_KEYWORDS)
                .collect();
            for keyword in refinements {
                out.push(&format!("{topic} {keyword}"));
            }
        }

        out.queries
    }
}

#[derive(Default)]
struct Expansion {
    queries: Vec<String>,
    seen: HashSet<String>,
}

impl Expansion {
    fn push(&mut self, query: &str) {
        if self.queries.len() >= MAX_EXPANDED_QUERIES {
            return;
        }
        let query = compact_ws(query);
        if query.chars().count() < 2 {
            return;
        }
        if self.seen.insert(query.to_lowercase()) {
            self.queries.push(query);
        }
    }
}

/// `"a vs b"` yields `["a", "b"]`.
fn comparative_parts(topic: &str) -> Vec<String> {
    for sep in [" vs. ", " vs ", " versus "] {
        if let Some(idx) = find_ascii_ignore_case(topic, sep) {
            let left = topic[..idx].trim();
            let right = topic[idx + sep.len()..].trim();
            return [left, right]
                .into_iter()
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }
    }
    Vec::new()
}

/// Byte offset of the ASCII `needle` in `haystack`, ignoring ASCII case.
/// Offsets always index the original string, so slicing on them is safe.
fn find_ascii_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    let needle = needle.as_bytes();
    let last = bytes.len().checked_sub(needle.len())?;
    (0..=last).find(|&i| {
        haystack.is_char_boundary(i) && bytes[i..i + needle.len()].eq_ignore_ascii_case(needle)
    })
}

fn synonym_variants(topic: &str) -> Vec<String> {
    let tokens: Vec<&str> = topic.split_whitespace().collect();
    let mut variants = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        let lower = token.to_lowercase();
        let Some((_, synonyms)) = SYNONYMS.iter().find(|(word, _)| *word == lower) else {
            continue;
        };
        for synonym in *synonyms {
            let mut replaced = tokens.clone();
            replaced[i] = *synonym;
            variants.push(replaced.join(" "));
        }
    }
    variants
}

fn related_concepts(topic: &str) -> Vec<&'static str> {
    let topic_words: HashSet<String> = words(topic).into_iter().collect();
    RELATED
        .iter()
        .filter(|(key, _)| topic_words.contains(*key))
        .flat_map(|(_, concepts)| concepts.iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(depth: ResearchDepth) -> ResearchPlan {
        ResearchPlan::builder("duck migration")
            .depth(depth)
            .research_question("Why do ducks migrate?")
            .build()
            .unwrap()
    }

    #[test]
    fn test_standard_round_one() {
        let queries = QueryExpander::new().expand(&plan(ResearchDepth::Standard), 1, &[]);
        assert_eq!(queries, vec!["duck migration", "Why do ducks migrate?"]);
    }

    #[test]
    fn test_deep_adds_synonyms_and_related() {
        let queries = QueryExpander::new().expand(&plan(ResearchDepth::Deep), 1, &[]);
        assert!(queries.contains(&"duck movement".to_string()));
        assert!(queries.contains(&"duck relocation".to_string()));
        assert!(queries.contains(&"duck migration waterfowl".to_string()));
        assert!(!queries.iter().any(|q| q.starts_with("what is")));
    }

    #[test]
    fn test_exhaustive_adds_question_forms() {
        let queries = QueryExpander::new().expand(&plan(ResearchDepth::Exhaustive), 1, &[]);
        assert!(queries.contains(&"what is duck migration".to_string()));
        assert!(queries.contains(&"how does duck migration work".to_string()));
    }

    #[test]
    fn test_refinement_from_context() {
        let context = vec![
            "Flyways guide ducks. Flyways span continents. Wetlands matter.".to_string(),
        ];
        let queries = QueryExpander::new().expand(&plan(ResearchDepth::Standard), 2, &context);
        assert!(queries.contains(&"duck migration flyways".to_string()));
        // Round one ignores context.
        let first = QueryExpander::new().expand(&plan(ResearchDepth::Standard), 1, &context);
        assert!(!first.contains(&"duck migration flyways".to_string()));
    }

    #[test]
    fn test_dedup_and_cap() {
        let mut builder = ResearchPlan::builder("Rust").depth(ResearchDepth::Exhaustive);
        builder = builder.sub_topic("rust").sub_topic("RUST ");
        for i in 0..30 {
            builder = builder.keyword(format!("k{i}"));
        }
        let queries = QueryExpander::new().expand(&builder.build().unwrap(), 1, &[]);
        assert_eq!(queries.len(), MAX_EXPANDED_QUERIES);
        assert_eq!(queries.iter().filter(|q| q.eq_ignore_ascii_case("rust")).count(), 1);
    }

    #[test]
    fn test_comparative_split() {
        assert_eq!(
            comparative_parts("tokio vs async-std"),
            vec!["tokio".to_string(), "async-std".to_string()]
        );
        assert!(comparative_parts("tokio runtime").is_empty());
        assert_eq!(
            comparative_parts("Tokio VERSUS smol"),
            vec!["Tokio".to_string(), "smol".to_string()]
        );
    }

    #[test]
    fn test_comparative_split_non_ascii() {
        // Lower-casing these letters changes their byte length.
        assert_eq!(
            comparative_parts("İİİİİ vs x"),
            vec!["İİİİİ".to_string(), "x".to_string()]
        );
        assert_eq!(
            comparative_parts("Ⱥpfel VS. Birnen"),
            vec!["Ⱥpfel".to_string(), "Birnen".to_string()]
        );

        let plan = ResearchPlan::builder("İİİİİ vs x")
            .depth(ResearchDepth::Exhaustive)
            .build()
            .unwrap();
        let queries = QueryExpander::new().expand(&plan, 1, &[]);
        assert!(queries.iter().any(|q| q == "İİİİİ vs x"));
        assert!(queries.len() <= MAX_EXPANDED_QUERIES);
    }
}
