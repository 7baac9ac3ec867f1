//! Observability events produced by processors and the feedback loop.
//!
//! Events fan out over a [`tokio::sync::broadcast`] channel. Emitting never
//! blocks and never fails the emitter: with no subscribers the event is
//! simply dropped, and a lagging subscriber loses the oldest events.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::scored::{ActionResult, ScoredSignal};
use crate::signal::Signal;
use crate::threshold::FeedbackStats;

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// One signal went through scoring and (where it met the threshold) action.
    SignalProcessed {
        signal: Signal,
        scored: Vec<ScoredSignal>,
        actions: Vec<ActionResult>,
    },
    /// A batch processor flushed one accumulated batch.
    BatchProcessed {
        batch_size: usize,
        scored: usize,
        actions: usize,
    },
    /// A failure that was isolated (`fatal == false`) or that stopped a
    /// processor (`fatal == true`).
    ErrorOccurred {
        context: String,
        error: String,
        fatal: bool,
    },
    /// The feedback loop replaced the action threshold.
    ThresholdAdjusted {
        old: f64,
        new: f64,
        stats: FeedbackStats,
    },
}

impl PipelineEvent {
    pub fn error(context: impl Into<String>, error: impl ToString) -> Self {
        PipelineEvent::ErrorOccurred {
            context: context.into(),
            error: error.to_string(),
            fatal: false,
        }
    }

    pub fn fatal(context: impl Into<String>, error: impl ToString) -> Self {
        PipelineEvent::ErrorOccurred {
            context: context.into(),
            error: error.to_string(),
            fatal: true,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::SignalProcessed { .. } => "signal_processed",
            PipelineEvent::BatchProcessed { .. } => "batch_processed",
            PipelineEvent::ErrorOccurred { .. } => "error_occurred",
            PipelineEvent::ThresholdAdjusted { .. } => "threshold_adjusted",
        }
    }
}

/// Cloneable handle for emitting and subscribing to [`PipelineEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: PipelineEvent) {
        tracing::trace!(event = event.name(), "emitting pipeline event");
        // Err only means nobody is listening.
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
