//! Research synthesis: summary, analysis, scores, limitations and
//! recommendations built from the accumulated findings.

use super::plan::ResearchPlan;
use super::sources::SourceTracker;
use super::verification::{ResearchFinding, VerificationStatus};
use crate::llm::ModelClient;
use crate::types::clamp_unit;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Findings quoted in the executive summary.
pub const SUMMARY_FINDINGS: usize = 5;

const MIN_DISTINCT_DOMAINS: usize = 3;
const LOW_CONFIDENCE: f64 = 0.5;
const LOW_AUTHORITY: f64 = 0.6;

/// Everything synthesis contributes to the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub executive_summary: String,
    pub detailed_analysis: String,
    pub confidence_score: f64,
    pub completeness_score: f64,
    pub limitations: Vec<String>,
    pub recommendations: Vec<String>,
    /// Problems hit while synthesizing (for example a failed model call).
    pub warnings: Vec<String>,
}

/// Builds a [`Synthesis`], optionally phrasing the summary with a model.
#[derive(Clone, Default)]
pub struct ResearchSynthesizer {
    model: Option<Arc<dyn ModelClient>>,
}

impl std::fmt::Debug for ResearchSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchSynthesizer")
            .field("model", &self.model.as_ref().map(|m| m.name().to_string()))
            .finish()
    }
}

impl ResearchSynthesizer {
    pub fn new(model: Option<Arc<dyn ModelClient>>) -> Self {
        Self { model }
    }

    pub async fn synthesize(
        &self,
        plan: &ResearchPlan,
        findings: &[ResearchFinding],
        tracker: &SourceTracker,
    ) -> Synthesis {
        let ranked = ranked_findings(findings);
        let mut warnings = Vec::new();

        let heuristic = heuristic_summary(plan, &ranked, tracker.extractions().len());
        let executive_summary = match (&self.model, ranked.is_empty()) {
            (Some(model), false) => {
                let prompt = summary_prompt(plan, &ranked);
                match model.complete(&prompt).await {
                    Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
                    Ok(_) => {
                        warnings
                            .push(format!("model '{}' returned an empty summary", model.name()));
                        heuristic
                    }
                    Err(e) => {
                        tracing::warn!(model = model.name(), error = %e, "Summary model failed");
                        warnings.push(format!("model '{}' failed: {e}", model.name()));
                        heuristic
                    }
                }
            }
            _ => heuristic,
        };

        Synthesis {
            executive_summary,
            detailed_analysis: detailed_analysis(plan, &ranked, tracker),
            confidence_score: confidence_score(findings),
            completeness_score: completeness_score(plan, findings, tracker),
            limitations: limitations(findings, tracker),
            recommendations: recommendations(plan, findings, tracker),
            warnings,
        }
    }
}

/// Findings ordered by `confidence * relevance`, best first.
pub fn ranked_findings(findings: &[ResearchFinding]) -> Vec<ResearchFinding> {
    let mut ranked = findings.to_vec();
    ranked.sort_by(|a, b| {
        b.weight()
            .total_cmp(&a.weight())
            .then_with(|| a.source_url.cmp(&b.source_url))
            .then_with(|| a.content.cmp(&b.content))
    });
    ranked
}

fn summary_prompt(plan: &ResearchPlan, ranked: &[ResearchFinding]) -> String {
    let mut prompt = format!(
        "Write a one-paragraph executive summary about \"{}\" using only these findings:\n",
        plan.topic
    );
    for finding in ranked.iter().take(SUMMARY_FINDINGS) {
        prompt.push_str(&format!("- {} ({})\n", finding.content, finding.status));
    }
    prompt
}

pub fn heuristic_summary(plan: &ResearchPlan, ranked: &[ResearchFinding], sources: usize) -> String {
    if ranked.is_empty() {
        return format!(
            "No findings could be established for \"{}\" from {sources} analysed sources.",
            plan.topic
        );
    }
    let mut out = format!(
        "Research on \"{}\" analysed {sources} sources and produced {} findings.",
        plan.topic,
        ranked.len()
    );
    for finding in ranked.iter().take(SUMMARY_FINDINGS) {
        out.push(' ');
        out.push_str(&finding.content);
    }
    out
}

/// Markdown analysis grouped by verification status.
pub fn detailed_analysis(
    plan: &ResearchPlan,
    ranked: &[ResearchFinding],
    tracker: &SourceTracker,
) -> String {
    let mut out = format!("## Overview\n\nTopic: {}\n", plan.topic);
    if let Some(question) = &plan.research_question {
        out.push_str(&format!("Question: {question}\n"));
    }
    out.push_str(&format!(
        "Sources discovered: {} | extracted: {} | findings: {}\n",
        tracker.sources().len(),
        tracker.extractions().len(),
        ranked.len()
    ));

    let sections = [
        (VerificationStatus::Verified, "Verified findings"),
        (VerificationStatus::Conflicting, "Contested findings"),
        (VerificationStatus::Unverified, "Unverified findings"),
    ];
    for (status, heading) in sections {
        let group: Vec<&ResearchFinding> = ranked.iter().filter(|f| f.status == status).collect();
        if group.is_empty() {
            continue;
        }
        out.push_str(&format!("\n## {heading}\n\n"));
        for finding in group {
            out.push_str(&format!(
                "- {} (confidence {:.0}%, source: {})\n",
                finding.content,
                finding.confidence * 100.0,
                finding.source_url
            ));
            for evidence in &finding.conflicting_evidence {
                out.push_str(&format!("  - disputed by {evidence}\n"));
            }
        }
    }

    let domains: Vec<String> = tracker.extracted_domains().into_iter().collect();
    let kinds: Vec<String> = tracker
        .extracted_kinds()
        .iter()
        .map(|k| k.to_string())
        .collect();
    out.push_str("\n## Source landscape\n\n");
    out.push_str(&format!(
        "Domains: {}\nContent kinds: {}\n",
        join_or_none(&domains),
        join_or_none(&kinds),
    ));
    out
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// Authority-weighted average of finding confidence.
pub fn confidence_score(findings: &[ResearchFinding]) -> f64 {
    if findings.is_empty() {
        return 0.0;
    }
    let total_weight: f64 = findings.iter().map(|f| f.source_authority).sum();
    if total_weight <= 0.0 {
        return average_confidence(findings);
    }
    let weighted: f64 = findings
        .iter()
        .map(|f| f.source_authority * f.confidence)
        .sum();
    clamp_unit(weighted / total_weight)
}

pub fn average_confidence(findings: &[ResearchFinding]) -> f64 {
    if findings.is_empty() {
        return 0.0;
    }
    findings.iter().map(|f| f.confidence).sum::<f64>() / findings.len() as f64
}

pub fn verified_ratio(findings: &[ResearchFinding]) -> f64 {
    if findings.is_empty() {
        return 0.0;
    }
    let verified = findings
        .iter()
        .filter(|f| f.status == VerificationStatus::Verified)
        .count();
    verified as f64 / findings.len() as f64
}

/// 0.3 source coverage + 0.4 average confidence + 0.2 content-kind
/// diversity + 0.1 verified ratio.
pub fn completeness_score(
    plan: &ResearchPlan,
    findings: &[ResearchFinding],
    tracker: &SourceTracker,
) -> f64 {
    let coverage = (tracker.extractions().len() as f64 / plan.max_sources.max(1) as f64).min(1.0);
    let kinds = (tracker.extracted_kinds().len() as f64
        / plan.content_kinds.len().max(1) as f64)
        .min(1.0);
    clamp_unit(
        0.3 * coverage
            + 0.4 * average_confidence(findings)
            + 0.2 * kinds
            + 0.1 * verified_ratio(findings),
    )
}

pub fn limitations(findings: &[ResearchFinding], tracker: &SourceTracker) -> Vec<String> {
    let mut out = Vec::new();
    let domains = tracker.extracted_domains().len();
    if domains < MIN_DISTINCT_DOMAINS {
        out.push(format!(
            "Low source diversity: only {domains} distinct domains were analysed."
        ));
    }
    if findings.is_empty() {
        out.push("No verifiable claims were found in the analysed sources.".to_string());
    } else {
        let avg = average_confidence(findings);
        if avg < LOW_CONFIDENCE {
            out.push(format!(
                "Low average finding confidence ({:.0}%).",
                avg * 100.0
            ));
        }
    }
    if tracker.extracted_kinds().len() < 2 {
        out.push(
            "Insufficient content-kind variety: sources cover a single kind of content."
                .to_string(),
        );
    }
    let contested = findings
        .iter()
        .filter(|f| f.status == VerificationStatus::Conflicting)
        .count();
    if contested > 0 {
        out.push(format!("{contested} findings are contested between sources."));
    }
    out
}

pub fn recommendations(
    plan: &ResearchPlan,
    findings: &[ResearchFinding],
    tracker: &SourceTracker,
) -> Vec<String> {
    let mut out = Vec::new();
    if tracker.extractions().len() * 2 < plan.max_sources {
        out.push("Expand the source base with additional queries or providers.".to_string());
    }
    if !plan.verify || verified_ratio(findings) < 0.5 {
        out.push("Add independent verification for unverified claims.".to_string());
    }
    let sources = tracker.sources();
    let avg_authority = if sources.is_empty() {
        0.0
    } else {
        sources.iter().map(|s| s.authority).sum::<f64>() / sources.len() as f64
    };
    if avg_authority < LOW_AUTHORITY {
        out.push(
            "Include higher-authority sources such as government, academic or established publishers."
                .to_string(),
        );
    }
    out
}
