//! Registry and facade error types.

use thiserror::Error;

use reaper_core::ValidationError;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin already registered: {0}")]
    DuplicateName(String),

    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
