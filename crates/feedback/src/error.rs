//! Feedback loop error types.

use thiserror::Error;

use reaper_core::ValidationError;

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("insufficient feedback: {samples} samples, need more than {required}")]
    InsufficientData { samples: usize, required: usize },

    #[error("feedback store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("feedback serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("feedback store corrupt: {0}")]
    Corrupt(String),
}

impl FeedbackError {
    /// Persistence failures the loop cannot recover from on its own.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FeedbackError::Io(_) | FeedbackError::Corrupt(_))
    }
}
