use thiserror::Error;

/// Malformed data-model values. Returned at construction time, never later:
/// a value that exists has already passed these checks.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("signal source must not be empty")]
    EmptySource,

    #[error("score {0} is outside [0.0, 1.0]")]
    ScoreOutOfRange(f64),

    #[error("score is not a finite number")]
    ScoreNotFinite,

    #[error("action_type must not be empty")]
    EmptyActionType,

    #[error("failed action result requires a non-empty error message")]
    MissingError,

    #[error("successful action result must not carry an error message")]
    UnexpectedError,

    #[error("invalid outcome label: {0}")]
    InvalidLabel(String),

    #[error("invalid sense type: {0}")]
    InvalidSenseType(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
