//! The deep research agent.
//!
//! Drives rounds of planning, discovery, extraction and verification until
//! the plan's depth is reached or a round discovers nothing new, then
//! synthesizes the report. Cancellation and the time budget are checked at
//! every phase boundary.

use super::expansion::QueryExpander;
use super::output::ResearchReport;
use super::plan::ResearchPlan;
use super::session::{ResearchPhase, ResearchSession};
use super::sources::SourceTracker;
use super::synthesis::{ResearchSynthesizer, ranked_findings};
use super::verification::{ClaimVerifier, ResearchFinding, SourceDocument, append_distinct};
use crate::crawler::{CrawlOutcome, Crawler};
use crate::error::{ResearchError, SearchError};
use crate::events::{EngineEvent, EventBus};
use crate::llm::ModelClient;
use crate::providers::LocalHeuristicProvider;
use crate::ranking::url_authority;
use crate::types::{MAX_RESULTS_LIMIT, Query, SearchResult};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the agent searches through. Implemented by the engine's pipeline;
/// tests substitute scripted backends.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &Query) -> Result<Vec<SearchResult>, SearchError>;
}

/// Mutable state of one run.
struct RunState {
    session: ResearchSession,
    tracker: SourceTracker,
    findings: Vec<ResearchFinding>,
    started: Instant,
}

pub struct DeepResearchAgent {
    backend: Arc<dyn SearchBackend>,
    crawler: Arc<Crawler>,
    events: EventBus,
    expander: QueryExpander,
    synthesizer: ResearchSynthesizer,
    corpus: Option<Arc<LocalHeuristicProvider>>,
}

impl std::fmt::Debug for DeepResearchAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepResearchAgent")
            .field("synthesizer", &self.synthesizer)
            .field("indexes_corpus", &self.corpus.is_some())
            .finish()
    }
}

impl DeepResearchAgent {
    pub fn new(backend: Arc<dyn SearchBackend>, crawler: Arc<Crawler>, events: EventBus) -> Self {
        Self {
            backend,
            crawler,
            events,
            expander: QueryExpander::new(),
            synthesizer: ResearchSynthesizer::default(),
            corpus: None,
        }
    }

    /// Phrase executive summaries with `model`.
    pub fn with_model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.synthesizer = ResearchSynthesizer::new(Some(model));
        self
    }

    /// Index every accepted extraction into the local corpus.
    pub fn with_corpus(mut self, corpus: Arc<LocalHeuristicProvider>) -> Self {
        self.corpus = Some(corpus);
        self
    }

    /// Execute `plan`, returning the final report.
    pub async fn run(
        &self,
        plan: &ResearchPlan,
        cancel: &CancellationToken,
    ) -> Result<ResearchReport, ResearchError> {
        plan.ensure_valid()?;
        let mut state = RunState {
            session: ResearchSession::new(plan.id),
            tracker: SourceTracker::new(plan.max_sources)
                .with_domain_filters(&plan.include_domains, &plan.exclude_domains),
            findings: Vec::new(),
            started: Instant::now(),
        };

        info!(
            plan_id = %plan.id,
            topic = %plan.topic,
            depth = %plan.depth,
            max_depth = plan.max_depth,
            "Research started"
        );
        self.events.publish(EngineEvent::ResearchStarted {
            plan_id: plan.id,
            topic: plan.topic.clone(),
            max_depth: plan.max_depth,
        });

        match self.execute(plan, &mut state, cancel).await {
            Ok(report) => {
                info!(
                    plan_id = %plan.id,
                    rounds = report.rounds_completed,
                    findings = report.findings.len(),
                    sources = report.sources.len(),
                    confidence = report.confidence_score,
                    "Research completed"
                );
                self.events.publish(EngineEvent::ResearchCompleted {
                    plan_id: plan.id,
                    findings: report.findings.len(),
                    sources: report.sources.len(),
                    confidence: report.confidence_score,
                    completeness: report.completeness_score,
                    duration_ms: millis(&report.duration),
                });
                Ok(report)
            }
            Err(e) => {
                if matches!(e, ResearchError::Cancelled { .. }) {
                    state.session.cancel();
                } else {
                    state.session.fail(e.to_string());
                }
                warn!(
                    plan_id = %plan.id,
                    phase = %state.session.phase,
                    error = %e,
                    "Research failed"
                );
                self.events.publish(EngineEvent::ResearchFailed {
                    plan_id: plan.id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        plan: &ResearchPlan,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<ResearchReport, ResearchError> {
        loop {
            self.checkpoint(plan, state, cancel)?;
            let from = state.session.phase;
            state.session.begin_round()?;
            let round = state.session.current_depth;
            if round > 1 {
                self.announce(&state.session, from, ResearchPhase::Planning);
            }

            // Planning
            let context: Vec<String> = state
                .tracker
                .extractions()
                .iter()
                .map(|c| format!("{}\n{}", c.title, c.text))
                .collect();
            let queries: Vec<String> = self
                .expander
                .expand(plan, round, &context)
                .into_iter()
                .filter(|q| {
                    !state
                        .session
                        .queries
                        .iter()
                        .any(|issued| issued.eq_ignore_ascii_case(q))
                })
                .collect();
            debug!(round, queries = queries.len(), "Research round planned");

            self.advance(plan, state, cancel, ResearchPhase::Discovery)?;
            let new_sources = self.discover(plan, state, &queries, round).await?;
            if new_sources == 0 {
                info!(round, "No new sources discovered; ending research early");
                state.session.log(format!("round {round}: no new sources"));
                self.advance(plan, state, cancel, ResearchPhase::Synthesis)?;
                break;
            }

            self.advance(plan, state, cancel, ResearchPhase::Extraction)?;
            let before = state.tracker.extractions().len();
            self.extract(plan, state, cancel).await;
            let extracted = state.tracker.extractions().len() - before;

            self.advance(plan, state, cancel, ResearchPhase::Verification)?;
            let findings_before = state.findings.len();
            self.verify(plan, state, before, round);

            self.events.publish(EngineEvent::ResearchRoundCompleted {
                plan_id: plan.id,
                round,
                new_sources,
                extracted,
                findings: state.findings.len() - findings_before,
            });
            info!(
                round,
                new_sources,
                extracted,
                findings = state.findings.len(),
                "Research round completed"
            );

            if round >= plan.max_depth || (state.tracker.is_full() && extracted == 0) {
                self.advance(plan, state, cancel, ResearchPhase::Synthesis)?;
                break;
            }
        }

        let synthesis = self
            .synthesizer
            .synthesize(plan, &state.findings, &state.tracker)
            .await;
        for warning in &synthesis.warnings {
            state.session.warn(warning.clone());
        }
        let from = state.session.phase;
        state.session.transition(ResearchPhase::Complete)?;
        self.announce(&state.session, from, ResearchPhase::Complete);

        let methodology = format!(
            "{} research round(s) at {} depth; {} queries issued; {} sources discovered, {} extracted (quality threshold {:.2}); claim verification {}.",
            state.session.current_depth,
            plan.depth,
            state.session.queries.len(),
            state.tracker.sources().len(),
            state.tracker.extractions().len(),
            plan.quality_threshold,
            if plan.verify { "enabled" } else { "disabled" },
        );

        Ok(ResearchReport {
            plan: plan.clone(),
            executive_summary: synthesis.executive_summary,
            findings: ranked_findings(&state.findings),
            detailed_analysis: synthesis.detailed_analysis,
            sources: state.tracker.sources().to_vec(),
            methodology,
            limitations: synthesis.limitations,
            confidence_score: synthesis.confidence_score,
            completeness_score: synthesis.completeness_score,
            duration: state.started.elapsed(),
            recommendations: synthesis.recommendations,
            rounds_completed: state.session.current_depth,
            phase_history: state.session.history.clone(),
            warnings: state.session.warnings.clone(),
        })
    }

    /// Cancellation and time-budget check.
    fn checkpoint(
        &self,
        plan: &ResearchPlan,
        state: &RunState,
        cancel: &CancellationToken,
    ) -> Result<(), ResearchError> {
        let phase = state.session.phase.to_string();
        if cancel.is_cancelled() {
            return Err(ResearchError::Cancelled { phase });
        }
        if state.started.elapsed() >= plan.time_limit() {
            return Err(ResearchError::TimeBudgetExceeded {
                budget_secs: plan.time_limit_secs,
                phase,
            });
        }
        Ok(())
    }

    /// Checkpoint, then move to `next` and publish the change.
    fn advance(
        &self,
        plan: &ResearchPlan,
        state: &mut RunState,
        cancel: &CancellationToken,
        next: ResearchPhase,
    ) -> Result<(), ResearchError> {
        self.checkpoint(plan, state, cancel)?;
        let from = state.session.phase;
        state.session.transition(next)?;
        self.announce(&state.session, from, next);
        Ok(())
    }

    fn announce(&self, session: &ResearchSession, from: ResearchPhase, to: ResearchPhase) {
        debug!(
            plan_id = %session.plan_id,
            round = session.current_depth,
            %from,
            %to,
            "Research phase changed"
        );
        self.events.publish(EngineEvent::ResearchPhaseChanged {
            plan_id: session.plan_id,
            round: session.current_depth,
            from,
            to,
        });
    }

    /// Run every query concurrently and collect new sources. Returns the
    /// number of sources added.
    async fn discover(
        &self,
        plan: &ResearchPlan,
        state: &mut RunState,
        queries: &[String],
        round: u32,
    ) -> Result<usize, ResearchError> {
        let per_query = plan.max_sources.clamp(1, MAX_RESULTS_LIMIT);
        let mode = plan.depth.search_mode();
        let searches = queries.iter().map(|text| {
            let backend = Arc::clone(&self.backend);
            async move {
                let mut builder = Query::builder(text.as_str())
                    .mode(mode)
                    .max_results(per_query)
                    .content_kinds(plan.content_kinds.iter().copied());
                for domain in &plan.exclude_domains {
                    builder = builder.exclude_domain(domain.as_str());
                }
                let query = builder.build()?;
                backend.search(&query).await
            }
        });
        let outcomes = join_all(searches).await;

        let mut added = 0;
        let mut first_error = None;
        let mut failures = 0;
        for (text, outcome) in queries.iter().zip(outcomes) {
            state.session.queries.push(text.clone());
            match outcome {
                Ok(results) => {
                    for result in &results {
                        if state.tracker.add_result(result, round) {
                            added += 1;
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(query = %text, error = %e, "Discovery query failed");
                    state.session.warn(format!("query '{text}' failed: {e}"));
                    first_error.get_or_insert(e);
                }
            }
        }

        if failures > 0 && failures == queries.len() && state.tracker.sources().is_empty() {
            if let Some(e) = first_error {
                return Err(ResearchError::Discovery(e));
            }
        }
        debug!(round, added, failures, "Discovery finished");
        Ok(added)
    }

    /// Crawl pending sources, keeping extractions that meet the plan's
    /// quality threshold.
    async fn extract(
        &self,
        plan: &ResearchPlan,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) {
        let pending = state.tracker.take_pending();
        let outcomes = self.crawler.crawl_many(&pending, cancel).await;
        for outcome in outcomes {
            match outcome {
                CrawlOutcome::Extracted(content) => {
                    if content.quality_score < plan.quality_threshold {
                        state.session.warn(format!(
                            "{}: extraction quality {:.2} below threshold {:.2}",
                            content.url, content.quality_score, plan.quality_threshold
                        ));
                        continue;
                    }
                    if let Some(corpus) = &self.corpus {
                        corpus.index(&content);
                    }
                    state.tracker.add_extraction(content);
                }
                CrawlOutcome::Skipped { url, reason } => {
                    state.session.warn(format!("skipped {url}: {reason}"));
                }
                CrawlOutcome::Failed { url, error } => {
                    state.session.warn(format!("failed to crawl {url}: {error}"));
                }
            }
        }
    }

    /// Verify claims from extractions made this round against everything
    /// extracted so far.
    fn verify(&self, plan: &ResearchPlan, state: &mut RunState, fresh_from: usize, round: u32) {
        let docs: Vec<SourceDocument<'_>> = state
            .tracker
            .extractions()
            .iter()
            .map(|content| {
                let source = state.tracker.source_for(&content.url);
                SourceDocument {
                    content,
                    authority: source
                        .map(|s| s.authority)
                        .unwrap_or_else(|| url_authority(&content.url)),
                    relevance: source.map(|s| s.relevance).unwrap_or(0.5),
                }
            })
            .collect();
        let fresh = &docs[fresh_from.min(docs.len())..];
        let new = ClaimVerifier::new(plan.verify).verify(&plan.topic, fresh, &docs, round);
        append_distinct(&mut state.findings, new);
    }
}

fn millis(d: &std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
