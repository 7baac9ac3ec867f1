//! Adaptive feedback loop.
//!
//! Operators label scored signals as true positives, false positives or
//! false negatives. The labels are appended to a durable log, aggregated
//! into precision / recall / F1, and used to grid-search the action
//! threshold the processors read through [`reaper_core::ThresholdSource`].

pub mod error;
pub mod feedback_loop;
pub mod labels;
pub mod objective;
pub mod record;
pub mod stats;
pub mod store;

pub use error::FeedbackError;
pub use feedback_loop::{FeedbackLoop, SchedulerHandle};
pub use labels::LabelImport;
pub use objective::{
    search_threshold, Confusion, CostWeightedObjective, F1Objective, ThresholdChoice,
    ThresholdObjective,
};
pub use record::{FeedbackRecord, OutcomeLabel};
pub use stats::LabelCounts;
pub use store::{FeedbackStore, InMemoryFeedbackStore, JsonlFeedbackStore, PersistedThreshold};
