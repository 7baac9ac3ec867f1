//! Queue and processor error types.

use thiserror::Error;

use crate::processor::ProcessorState;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue at capacity ({capacity})")]
    Backpressure { capacity: usize },

    #[error("timed out waiting for a signal")]
    Timeout,

    #[error("queue is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("cannot go from {from} to {to}")]
    InvalidTransition {
        from: ProcessorState,
        to: ProcessorState,
    },

    #[error("fatal processor error: {0}")]
    Fatal(String),
}
