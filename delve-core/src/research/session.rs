//! Research session state machine.
//!
//! Tracks the phase of one research run, the round counter, and the
//! bookkeeping (logs, warnings, issued queries) that later rounds feed on.

use crate::error::ResearchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current phase of a research session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    /// Expanding the topic into queries.
    Planning,
    /// Running queries and collecting source URLs.
    Discovery,
    /// Crawling and extracting discovered sources.
    Extraction,
    /// Cross-checking claims between sources.
    Verification,
    /// Building the final report.
    Synthesis,
    /// Report produced.
    Complete,
    /// Session failed.
    Failed,
    /// Session cancelled by the caller.
    Cancelled,
}

impl ResearchPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ResearchPhase::Complete | ResearchPhase::Failed | ResearchPhase::Cancelled
        )
    }

    /// Whether the state machine permits `self -> next`.
    pub fn can_transition_to(self, next: ResearchPhase) -> bool {
        use ResearchPhase::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Failed | Cancelled) => true,
            (Planning, Discovery)
            | (Discovery, Extraction)
            | (Discovery, Synthesis)
            | (Extraction, Verification)
            | (Verification, Planning)
            | (Verification, Synthesis)
            | (Synthesis, Complete) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResearchPhase::Planning => "planning",
            ResearchPhase::Discovery => "discovery",
            ResearchPhase::Extraction => "extraction",
            ResearchPhase::Verification => "verification",
            ResearchPhase::Synthesis => "synthesis",
            ResearchPhase::Complete => "complete",
            ResearchPhase::Failed => "failed",
            ResearchPhase::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One recorded phase change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: ResearchPhase,
    pub to: ResearchPhase,
    pub round: u32,
    pub at: DateTime<Utc>,
}

/// Mutable state of one research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSession {
    /// Id of the plan being executed.
    pub plan_id: Uuid,
    pub phase: ResearchPhase,
    /// Rounds started so far (1-based once planning begins).
    pub current_depth: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<PhaseTransition>,
    /// Free-form progress notes; later rounds mine them for refinement terms.
    pub logs: Vec<String>,
    pub warnings: Vec<String>,
    /// Every query issued during discovery, across rounds.
    pub queries: Vec<String>,
    /// Overall progress (0.0-1.0).
    pub progress: f64,
    pub error: Option<String>,
}

impl ResearchSession {
    /// A session in the planning phase that has not started a round yet.
    pub fn new(plan_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            plan_id,
            phase: ResearchPhase::Planning,
            current_depth: 0,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
            logs: Vec::new(),
            warnings: Vec::new(),
            queries: Vec::new(),
            progress: 0.0,
            error: None,
        }
    }

    /// Begin a new round. The first round starts from the initial planning
    /// state; later rounds must come from verification.
    pub fn begin_round(&mut self) -> Result<(), ResearchError> {
        if self.current_depth > 0 {
            self.transition(ResearchPhase::Planning)?;
        } else if self.phase != ResearchPhase::Planning {
            return Err(self.invalid(ResearchPhase::Planning));
        }
        self.current_depth += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, next: ResearchPhase) -> Result<(), ResearchError> {
        if !self.phase.can_transition_to(next) {
            return Err(self.invalid(next));
        }
        self.history.push(PhaseTransition {
            from: self.phase,
            to: next,
            round: self.current_depth,
            at: Utc::now(),
        });
        self.phase = next;
        self.updated_at = Utc::now();
        self.update_progress();
        Ok(())
    }

    /// Mark the session as failed. Terminal sessions are left untouched.
    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        if self.transition(ResearchPhase::Failed).is_ok() {
            self.error = Some(error);
        }
    }

    pub fn cancel(&mut self) {
        let _ = self.transition(ResearchPhase::Cancelled);
    }

    pub fn log(&mut self, entry: impl Into<String>) {
        self.logs.push(entry.into());
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn is_active(&self) -> bool {
        !self.phase.is_terminal()
    }

    fn invalid(&self, next: ResearchPhase) -> ResearchError {
        ResearchError::InvalidTransition {
            from: self.phase.to_string(),
            to: next.to_string(),
        }
    }

    fn update_progress(&mut self) {
        self.progress = match self.phase {
            ResearchPhase::Planning => 0.05,
            ResearchPhase::Discovery => 0.2,
            ResearchPhase::Extraction => 0.45,
            ResearchPhase::Verification => 0.7,
            ResearchPhase::Synthesis => 0.9,
            ResearchPhase::Complete => 1.0,
            ResearchPhase::Failed | ResearchPhase::Cancelled => self.progress,
        };
    }
}
