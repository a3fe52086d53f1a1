//! Research plans: the input contract of the research agent.

use super::session::ResearchPhase;
use crate::config::ResearchDefaults;
use crate::error::ResearchError;
use crate::types::{ContentKind, MAX_DEPTH_LIMIT, SearchMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

/// Upper bound on sources a single plan may request.
pub const MAX_SOURCES_LIMIT: usize = 500;

/// How thoroughly to research a topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchDepth {
    Quick,
    #[default]
    Standard,
    Deep,
    Exhaustive,
}

impl ResearchDepth {
    /// Rounds run when the plan does not set `max_depth` explicitly.
    pub fn default_rounds(self) -> u32 {
        match self {
            ResearchDepth::Quick => 1,
            ResearchDepth::Standard => 2,
            ResearchDepth::Deep => 3,
            ResearchDepth::Exhaustive => 4,
        }
    }

    /// Search mode used for discovery queries.
    pub fn search_mode(self) -> SearchMode {
        match self {
            ResearchDepth::Quick | ResearchDepth::Standard => SearchMode::Standard,
            ResearchDepth::Deep => SearchMode::Deep,
            ResearchDepth::Exhaustive => SearchMode::Exhaustive,
        }
    }
}

impl std::fmt::Display for ResearchDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResearchDepth::Quick => "quick",
            ResearchDepth::Standard => "standard",
            ResearchDepth::Deep => "deep",
            ResearchDepth::Exhaustive => "exhaustive",
        };
        f.write_str(s)
    }
}

/// The phases of one research round, in order, ending with synthesis.
pub fn standard_phases() -> Vec<ResearchPhase> {
    vec![
        ResearchPhase::Planning,
        ResearchPhase::Discovery,
        ResearchPhase::Extraction,
        ResearchPhase::Verification,
        ResearchPhase::Synthesis,
    ]
}

/// Read-only description of one research run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub id: Uuid,
    pub topic: String,
    pub research_question: Option<String>,
    pub depth: ResearchDepth,
    pub phases: Vec<ResearchPhase>,
    /// Maximum number of rounds.
    pub max_depth: u32,
    pub max_sources: usize,
    pub time_limit_secs: u64,
    pub content_kinds: BTreeSet<ContentKind>,
    pub quality_threshold: f64,
    pub verify: bool,
    #[serde(default)]
    pub sub_topics: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// When non-empty, only sources on these domains are kept.
    #[serde(default)]
    pub include_domains: Vec<String>,
    #[serde(default)]
    pub exclude_domains: Vec<String>,
}

impl ResearchPlan {
    pub fn builder(topic: impl Into<String>) -> ResearchPlanBuilder {
        ResearchPlanBuilder::new(topic)
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.time_limit_secs)
    }

    /// Every rule the plan breaks; empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();
        if self.topic.trim().chars().count() < 2 {
            violations.push("topic must be at least 2 characters".to_string());
        }
        if self.max_depth == 0 || self.max_depth > MAX_DEPTH_LIMIT {
            violations.push(format!("max_depth must be within 1..={MAX_DEPTH_LIMIT}"));
        }
        if self.max_sources == 0 || self.max_sources > MAX_SOURCES_LIMIT {
            violations.push(format!("max_sources must be within 1..={MAX_SOURCES_LIMIT}"));
        }
        if self.time_limit_secs == 0 {
            violations.push("time limit must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            violations.push("quality_threshold must be within [0, 1]".to_string());
        }
        if self.content_kinds.is_empty() {
            violations.push("at least one content kind is required".to_string());
        }
        if self.phases != standard_phases() {
            violations.push(
                "phases must be planning, discovery, extraction, verification, synthesis"
                    .to_string(),
            );
        }
        for domain in &self.include_domains {
            if self.exclude_domains.iter().any(|d| d.eq_ignore_ascii_case(domain)) {
                violations.push(format!("domain '{domain}' is both included and excluded"));
            }
        }
        violations
    }

    pub fn ensure_valid(&self) -> Result<(), ResearchError> {
        let violations = self.validate();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ResearchError::InvalidPlan { violations })
        }
    }
}

/// Builder for [`ResearchPlan`].
#[derive(Debug, Clone)]
pub struct ResearchPlanBuilder {
    topic: String,
    research_question: Option<String>,
    depth: ResearchDepth,
    max_depth: Option<u32>,
    max_sources: usize,
    time_limit_secs: u64,
    content_kinds: BTreeSet<ContentKind>,
    quality_threshold: f64,
    verify: bool,
    sub_topics: Vec<String>,
    keywords: Vec<String>,
    include_domains: Vec<String>,
    exclude_domains: Vec<String>,
}

impl ResearchPlanBuilder {
    pub fn new(topic: impl Into<String>) -> Self {
        let mut builder = Self {
            topic: topic.into(),
            research_question: None,
            depth: ResearchDepth::default(),
            max_depth: None,
            max_sources: 0,
            time_limit_secs: 0,
            content_kinds: BTreeSet::new(),
            quality_threshold: 0.0,
            verify: true,
            sub_topics: Vec::new(),
            keywords: Vec::new(),
            include_domains: Vec::new(),
            exclude_domains: Vec::new(),
        };
        builder = builder.defaults(&ResearchDefaults::default());
        builder
    }

    /// Apply configured defaults for sources, time, quality and verification.
    pub fn defaults(mut self, defaults: &ResearchDefaults) -> Self {
        self.max_sources = defaults.max_sources;
        self.time_limit_secs = defaults.time_limit_minutes.saturating_mul(60);
        self.quality_threshold = defaults.quality_threshold;
        self.verify = defaults.verify;
        self
    }

    pub fn research_question(mut self, question: impl Into<String>) -> Self {
        self.research_question = Some(question.into());
        self
    }

    pub fn depth(mut self, depth: ResearchDepth) -> Self {
        self.depth = depth;
        self
    }

    pub fn max_depth(mut self, rounds: u32) -> Self {
        self.max_depth = Some(rounds);
        self
    }

    pub fn max_sources(mut self, n: usize) -> Self {
        self.max_sources = n;
        self
    }

    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit_secs = limit.as_secs();
        self
    }

    pub fn content_kind(mut self, kind: ContentKind) -> Self {
        self.content_kinds.insert(kind);
        self
    }

    pub fn quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    pub fn verify(mut self, yes: bool) -> Self {
        self.verify = yes;
        self
    }

    pub fn sub_topic(mut self, sub_topic: impl Into<String>) -> Self {
        self.sub_topics.push(sub_topic.into());
        self
    }

    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    pub fn include_domain(mut self, domain: impl Into<String>) -> Self {
        self.include_domains.push(domain.into());
        self
    }

    pub fn exclude_domain(mut self, domain: impl Into<String>) -> Self {
        self.exclude_domains.push(domain.into());
        self
    }

    pub fn build(self) -> Result<ResearchPlan, ResearchError> {
        let mut content_kinds = self.content_kinds;
        if content_kinds.is_empty() {
            content_kinds.insert(ContentKind::Web);
        }
        let plan = ResearchPlan {
            id: Uuid::new_v4(),
            topic: self.topic.trim().to_string(),
            research_question: self.research_question.filter(|q| !q.trim().is_empty()),
            depth: self.depth,
            phases: standard_phases(),
            max_depth: self.max_depth.unwrap_or_else(|| self.depth.default_rounds()),
            max_sources: self.max_sources,
            time_limit_secs: self.time_limit_secs,
            content_kinds,
            quality_threshold: self.quality_threshold,
            verify: self.verify,
            sub_topics: self.sub_topics,
            keywords: self.keywords,
            include_domains: self.include_domains,
            exclude_domains: self.exclude_domains,
        };
        plan.ensure_valid()?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let plan = ResearchPlan::builder("  duck migration ").build().unwrap();
        assert_eq!(plan.topic, "duck migration");
        assert_eq!(plan.depth, ResearchDepth::Standard);
        assert_eq!(plan.max_depth, 2);
        assert_eq!(plan.max_sources, 20);
        assert_eq!(plan.time_limit(), Duration::from_secs(600));
        assert!(plan.verify);
        assert!(plan.content_kinds.contains(&ContentKind::Web));
        assert_eq!(plan.phases, standard_phases());
    }

    #[test]
    fn test_depth_sets_rounds_unless_overridden() {
        let deep = ResearchPlan::builder("topic").depth(ResearchDepth::Deep).build().unwrap();
        assert_eq!(deep.max_depth, 3);
        let pinned = ResearchPlan::builder("topic")
            .depth(ResearchDepth::Exhaustive)
            .max_depth(1)
            .build()
            .unwrap();
        assert_eq!(pinned.max_depth, 1);
    }

    #[test]
    fn test_invalid_plan_lists_every_violation() {
        let err = ResearchPlan::builder("x")
            .max_depth(0)
            .max_sources(0)
            .quality_threshold(1.5)
            .include_domain("a.com")
            .exclude_domain("a.com")
            .build()
            .unwrap_err();
        match err {
            ResearchError::InvalidPlan { violations } => assert_eq!(violations.len(), 5),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_tampered_phase_list_is_invalid() {
        let mut plan = ResearchPlan::builder("topic").build().unwrap();
        plan.phases.retain(|p| *p != ResearchPhase::Verification);
        assert_eq!(plan.validate().len(), 1);
    }
}
