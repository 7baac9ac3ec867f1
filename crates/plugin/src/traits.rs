//! Plugin contract: one trait per extension point kind, plus the
//! [`Plugin`] bundle that advertises which of them a plugin implements.

use async_trait::async_trait;
use uuid::Uuid;
use reaper_core::{ActionResult, ScoredSignal, SenseType, Signal, ValidationError};

use crate::extension::ExtensionPoint;

/// Errors a plugin callback may return. The dispatcher isolates these:
/// they are logged and the plugin's contribution is dropped.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("plugin does not implement {0}")]
    Unsupported(ExtensionPoint),

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Detects signals for one or more senses.
///
/// `source` always comes from the caller; detectors must not invent one.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, sense: SenseType, source: &str) -> Result<Vec<Signal>, HandlerError>;
}

/// One signal a bulk call could not handle.
#[derive(Debug)]
pub struct ItemFailure {
    pub signal_id: Uuid,
    pub error: HandlerError,
}

/// Output of a bulk call: the items that succeeded plus the signals that
/// failed individually. A failure of the whole call is an `Err` instead.
#[derive(Debug)]
pub struct BatchItems<T> {
    pub items: Vec<T>,
    pub failures: Vec<ItemFailure>,
}

impl<T> Default for BatchItems<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> From<Vec<T>> for BatchItems<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            items,
            failures: Vec::new(),
        }
    }
}

/// Assigns a priority score to a signal.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, signal: &Signal) -> Result<ScoredSignal, HandlerError>;

    /// Score many signals in one call. Override when the backend supports
    /// bulk scoring. The default scores one at a time; a signal that fails
    /// is reported in `failures` and the rest of the batch carries on.
    async fn score_batch(&self, signals: &[Signal]) -> Result<BatchItems<ScoredSignal>, HandlerError> {
        let mut out = BatchItems::default();
        for signal in signals {
            match self.score(signal).await {
                Ok(s) => out.items.push(s),
                Err(error) => out.failures.push(ItemFailure {
                    signal_id: signal.id(),
                    error,
                }),
            }
        }
        Ok(out)
    }
}

/// Responds to a scored signal.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, scored: &ScoredSignal) -> Result<ActionResult, HandlerError>;

    /// Bulk variant of [`execute`](Self::execute). The default executes one
    /// at a time and reports each failure per signal.
    async fn execute_batch(
        &self,
        scored: &[ScoredSignal],
    ) -> Result<BatchItems<ActionResult>, HandlerError> {
        let mut out = BatchItems::default();
        for s in scored {
            match self.execute(s).await {
                Ok(r) => out.items.push(r),
                Err(error) => out.failures.push(ItemFailure {
                    signal_id: s.signal().id(),
                    error,
                }),
            }
        }
        Ok(out)
    }
}

/// A registrable plugin bundle.
///
/// Each method is a capability probe: return `Some(self)` for the
/// extension points the plugin implements. The registry probes once, at
/// registration time, and a bundle may implement any subset (including
/// none).
///
/// ```ignore
/// struct Keywords;
///
/// impl Plugin for Keywords {
///     fn scorer(&self) -> Option<&dyn Scorer> {
///         Some(self)
///     }
/// }
/// ```
pub trait Plugin: Send + Sync + 'static {
    fn detector(&self, _sense: SenseType) -> Option<&dyn Detector> {
        None
    }

    fn scorer(&self) -> Option<&dyn Scorer> {
        None
    }

    fn action_handler(&self) -> Option<&dyn ActionHandler> {
        None
    }
}
