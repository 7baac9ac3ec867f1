//! One-signal-at-a-time consumer.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, warn};

use reaper_core::config::RealtimeConfig;
use reaper_core::{EventBus, PipelineEvent, ThresholdSource};
use reaper_plugin::Pipeline;

use super::{
    emit_action_failures, report_stage_failures, shutdown_requested, state_matches, Control,
    Processor, ProcessorState, ProcessorStats,
};
use crate::error::{ProcessorError, QueueError};
use crate::signal_queue::SignalQueue;

struct Shared {
    queue: Arc<SignalQueue>,
    pipeline: Pipeline,
    threshold: Arc<dyn ThresholdSource>,
    events: EventBus,
    config: RealtimeConfig,
    control: Control,
}

/// Dequeues one signal at a time and pushes it through score then act.
#[derive(Clone)]
pub struct RealtimeProcessor {
    shared: Arc<Shared>,
}

impl RealtimeProcessor {
    pub fn new(
        queue: Arc<SignalQueue>,
        pipeline: Pipeline,
        threshold: Arc<dyn ThresholdSource>,
        events: EventBus,
        config: RealtimeConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                pipeline,
                threshold,
                events,
                config,
                control: Control::new("realtime"),
            }),
        }
    }
}

#[async_trait]
impl Processor for RealtimeProcessor {
    fn name(&self) -> &'static str {
        "realtime"
    }

    fn start(&self) -> Result<(), ProcessorError> {
        let shared = self.shared.clone();
        self.shared
            .control
            .start(move || tokio::spawn(run(shared)))
    }

    fn pause(&self) -> Result<(), ProcessorError> {
        self.shared.control.pause()
    }

    fn resume(&self) -> Result<(), ProcessorError> {
        self.shared.control.resume()
    }

    async fn stop(&self) -> Result<(), ProcessorError> {
        self.shared.control.stop().await
    }

    fn state(&self) -> ProcessorState {
        self.shared.control.state()
    }

    fn stats(&self) -> ProcessorStats {
        self.shared.control.stats.snapshot()
    }

    fn subscribe_state(&self) -> watch::Receiver<ProcessorState> {
        self.shared.control.subscribe_state()
    }
}

async fn run(shared: Arc<Shared>) {
    let control = &shared.control;
    let mut state = control.subscribe_state();
    let mut shutdown = control.shutdown_receiver();

    loop {
        if !control.wait_while_paused(&mut state, &mut shutdown).await {
            break;
        }

        let next = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            // Paused while waiting: go back and park.
            _ = state_matches(&mut state, |s| s == ProcessorState::Paused) => continue,
            next = shared.queue.dequeue(shared.config.poll_interval) => next,
        };

        match next {
            Ok(signal) => {
                let threshold = shared.threshold.current_threshold();
                let outcome = shared.pipeline.process(&signal, threshold).await;
                control.stats.record(1, &outcome.actions);
                emit_action_failures(&shared.events, &outcome.actions);
                report_stage_failures(&control.stats, &shared.events, &outcome.failures);
                if outcome.scored.is_empty() {
                    debug!(signal_id = %signal.id(), "no scorer produced a result");
                }
                shared.events.emit(PipelineEvent::SignalProcessed {
                    signal,
                    scored: outcome.scored,
                    actions: outcome.actions,
                });
            }
            Err(QueueError::Timeout) => {}
            Err(QueueError::Closed) => {
                control.fatal(&shared.events, "realtime.dequeue", QueueError::Closed);
                break;
            }
            Err(e @ QueueError::Backpressure { .. }) => {
                // Not produced by dequeue; count it and keep consuming.
                warn!(error = %e, "unexpected queue error");
                control.stats.record_failure();
                shared.events.emit(PipelineEvent::error("realtime.dequeue", e));
            }
        }
    }

    control.finished();
}
