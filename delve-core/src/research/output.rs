//! The final research report and its markdown renderings.

use super::plan::ResearchPlan;
use super::session::PhaseTransition;
use super::sources::ResearchSource;
use super::verification::{ResearchFinding, VerificationStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rendering style for [`ResearchReport::render`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Executive summary with headline scores.
    Summary,
    /// Full report with sections and citations.
    #[default]
    DetailedReport,
    /// Source list annotated with the findings each source produced.
    AnnotatedBibliography,
}

/// Final, immutable artifact of one research run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub plan: ResearchPlan,
    pub executive_summary: String,
    /// Ordered by `confidence * relevance`, best first.
    pub findings: Vec<ResearchFinding>,
    pub detailed_analysis: String,
    pub sources: Vec<ResearchSource>,
    pub methodology: String,
    pub limitations: Vec<String>,
    pub confidence_score: f64,
    pub completeness_score: f64,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub recommendations: Vec<String>,
    pub rounds_completed: u32,
    pub phase_history: Vec<PhaseTransition>,
    pub warnings: Vec<String>,
}

impl ResearchReport {
    pub fn verified_findings(&self) -> impl Iterator<Item = &ResearchFinding> {
        self.findings
            .iter()
            .filter(|f| f.status == VerificationStatus::Verified)
    }

    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Summary => self.render_summary(),
            OutputFormat::DetailedReport => self.render_detailed(),
            OutputFormat::AnnotatedBibliography => self.render_bibliography(),
        }
    }

    fn render_summary(&self) -> String {
        let mut out = format!("# Research Summary: {}\n\n", self.plan.topic);
        out.push_str(&self.executive_summary);
        out.push_str(&format!(
            "\n\n**Confidence:** {:.0}% | **Completeness:** {:.0}% | **Sources:** {} | **Findings:** {}\n",
            self.confidence_score * 100.0,
            self.completeness_score * 100.0,
            self.sources.len(),
            self.findings.len(),
        ));
        out
    }

    fn render_detailed(&self) -> String {
        let mut out = format!("# Research Report: {}\n\n", self.plan.topic);

        out.push_str("## Executive Summary\n\n");
        out.push_str(&self.executive_summary);
        out.push_str("\n\n## Key Findings\n\n");
        for (i, finding) in self.findings.iter().enumerate() {
            out.push_str(&format!(
                "{}. {} [{}] (confidence: {:.0}%)\n",
                i + 1,
                finding.content,
                finding.status,
                finding.confidence * 100.0
            ));
        }

        out.push_str("\n# Analysis\n\n");
        out.push_str(&self.detailed_analysis);

        out.push_str("\n## Methodology\n\n");
        out.push_str(&self.methodology);
        out.push('\n');

        if !self.limitations.is_empty() {
            out.push_str("\n## Limitations\n\n");
            for limitation in &self.limitations {
                out.push_str(&format!("- {limitation}\n"));
            }
        }
        if !self.recommendations.is_empty() {
            out.push_str("\n## Recommendations\n\n");
            for recommendation in &self.recommendations {
                out.push_str(&format!("- {recommendation}\n"));
            }
        }

        out.push_str("\n## Sources\n\n");
        for source in &self.sources {
            out.push_str(&format!(
                "- **{}** (authority: {:.0}%)\n  {}\n",
                source.title,
                source.authority * 100.0,
                source.url,
            ));
        }

        out.push_str(&format!(
            "\n---\n**Overall Confidence:** {:.0}% | **Completeness:** {:.0}% | **Rounds:** {} | **Duration:** {:.1}s\n",
            self.confidence_score * 100.0,
            self.completeness_score * 100.0,
            self.rounds_completed,
            self.duration.as_secs_f64(),
        ));
        out
    }

    fn render_bibliography(&self) -> String {
        let mut out = "# Annotated Bibliography\n\n".to_string();
        for source in &self.sources {
            out.push_str(&format!("## {}\n", source.title));
            out.push_str(&format!("**URL:** {}\n", source.url));
            out.push_str(&format!(
                "**Kind:** {} | **Authority:** {:.0}%",
                source.kind,
                source.authority * 100.0,
            ));
            if let Some(quality) = source.quality {
                out.push_str(&format!(" | **Extraction quality:** {:.0}%", quality * 100.0));
            }
            out.push('\n');

            let claims: Vec<&ResearchFinding> = self
                .findings
                .iter()
                .filter(|f| f.source_url == source.url)
                .collect();
            if !claims.is_empty() {
                out.push_str("**Key claims:**\n");
                for claim in claims {
                    let tag = match claim.status {
                        VerificationStatus::Verified => " [verified]",
                        VerificationStatus::Conflicting => " [contested]",
                        VerificationStatus::Unverified => "",
                    };
                    out.push_str(&format!("  - {}{}\n", claim.content, tag));
                }
            }
            out.push('\n');
        }
        out
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentKind;
    use chrono::Utc;
    use uuid::Uuid;

    fn make_report() -> ResearchReport {
        let plan = ResearchPlan::builder("duck migration").build().unwrap();
        ResearchReport {
            plan,
            executive_summary: "Ducks fly south.".into(),
            findings: vec![ResearchFinding {
                id: Uuid::new_v4(),
                content: "Mallards migrate along flyways.".into(),
                source_url: "https://birds.org/a".into(),
                source_title: "Birds".into(),
                confidence: 0.85,
                relevance: 0.9,
                factuality: 1.0,
                source_authority: 0.8,
                status: VerificationStatus::Verified,
                supporting_evidence: vec![],
                conflicting_evidence: vec![],
                round: 1,
            }],
            detailed_analysis: "## Overview\n".into(),
            sources: vec![ResearchSource {
                id: Uuid::new_v4(),
                url: "https://birds.org/a".into(),
                title: "Birds".into(),
                domain: "birds.org".into(),
                provider: "mock".into(),
                kind: ContentKind::Web,
                authority: 0.8,
                relevance: 0.7,
                discovered_round: 1,
                discovered_at: Utc::now(),
                quality: Some(0.6),
            }],
            methodology: "Two rounds.".into(),
            limitations: vec!["Low source diversity".into()],
            confidence_score: 0.85,
            completeness_score: 0.5,
            duration: Duration::from_millis(1500),
            recommendations: vec!["Expand the source base".into()],
            rounds_completed: 1,
            phase_history: vec![],
            warnings: vec![],
        }
    }

    #[test]
    fn test_render_summary() {
        let report = make_report().render(OutputFormat::Summary);
        assert!(report.contains("Ducks fly south."));
        assert!(report.contains("85%"));
    }

    #[test]
    fn test_render_detailed() {
        let report = make_report().render(OutputFormat::DetailedReport);
        assert!(report.contains("Key Findings"));
        assert!(report.contains("Mallards migrate along flyways. [verified]"));
        assert!(report.contains("## Limitations"));
        assert!(report.contains("**Duration:** 1.5s"));
    }

    #[test]
    fn test_render_bibliography() {
        let report = make_report().render(OutputFormat::AnnotatedBibliography);
        assert!(report.contains("**URL:** https://birds.org/a"));
        assert!(report.contains("Mallards migrate along flyways. [verified]"));
    }

    #[test]
    fn test_json_duration_in_millis() {
        let json = serde_json::to_value(make_report()).unwrap();
        assert_eq!(json["duration"], 1500);
        let back: ResearchReport = serde_json::from_value(json).unwrap();
        assert_eq!(back.duration, Duration::from_millis(1500));
    }
}
