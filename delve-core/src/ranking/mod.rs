//! Deduplication, ranking and consolidation of search results.

pub mod consolidate;
pub mod dedup;
pub mod normalize;
pub mod scorer;

pub use consolidate::ResultConsolidator;
pub use dedup::{
    DedupStats, Deduplicator, NEAR_DUPLICATE_THRESHOLD, content_completeness, result_quality,
};
pub use normalize::{TRACKING_PARAMS, is_tracking_param, normalize_url};
pub use scorer::{RankingScorer, RankingWeights, ScoreBreakdown, domain_authority, url_authority};
