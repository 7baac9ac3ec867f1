//! Core data model and shared contracts for the REAPER signal pipeline.

pub mod config;
pub mod error;
pub mod events;
pub mod scored;
pub mod signal;
pub mod threshold;

pub use config::Config;
pub use error::ValidationError;
pub use events::{EventBus, PipelineEvent};
pub use scored::{clamp_score, ActionResult, ScoredSignal};
pub use signal::{DataMap, SenseType, Signal, SignalSpec};
pub use threshold::{FeedbackStats, Metrics, StaticThreshold, ThresholdSource};
