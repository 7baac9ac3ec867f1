//! Reference plugins shipped with REAPER.

pub mod keyword_scorer;
pub mod log_action;

pub use keyword_scorer::KeywordScorer;
pub use log_action::LogAction;
