//! Deep research: a multi-round, multi-phase research pipeline.
//!
//! Each round runs:
//! 1. **Planning**: expand the topic into search queries
//! 2. **Discovery**: run the queries and collect new source URLs
//! 3. **Extraction**: crawl the sources and keep readable content
//! 4. **Verification**: cross-check claims between sources
//!
//! Rounds repeat up to the plan's depth, then **Synthesis** builds the
//! [`ResearchReport`].

pub mod agent;
pub mod expansion;
pub mod output;
pub mod plan;
pub mod session;
pub mod sources;
pub mod synthesis;
pub mod verification;

pub use agent::{DeepResearchAgent, SearchBackend};
pub use expansion::{MAX_EXPANDED_QUERIES, QueryExpander};
pub use output::{OutputFormat, ResearchReport};
pub use plan::{ResearchDepth, ResearchPlan, ResearchPlanBuilder, standard_phases};
pub use session::{PhaseTransition, ResearchPhase, ResearchSession};
pub use sources::{ResearchSource, SourceTracker};
pub use synthesis::{ResearchSynthesizer, Synthesis};
pub use verification::{ClaimVerifier, ResearchFinding, VerificationStatus};
