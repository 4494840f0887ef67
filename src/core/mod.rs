//! Core components of the live feed.
//!
//! Sources produce raw events; the normalizer enriches them with geo,
//! window rates and reputation; the pipeline scores, persists and fans
//! them out to live subscribers.

pub mod broadcaster;
pub mod event;
pub mod geo;
pub mod normalizer;
pub mod pipeline;
pub mod rate_estimator;
pub mod reputation;
pub mod scorer;
pub mod source;
pub mod stats;
pub mod store;

pub use broadcaster::Broadcaster;
pub use event::{CanonicalEvent, EventOut, RawEvent, ScoredEvent};
pub use normalizer::Normalizer;
pub use pipeline::{Pipeline, PipelineError, PipelineState, RunningPipeline};
pub use rate_estimator::RateEstimator;
pub use reputation::ReputationLookup;
pub use scorer::{LogisticScorer, Scorer};
pub use source::{build_source, Source, SourceStatus};
pub use stats::PipelineStats;
pub use store::{build_store, Store};
