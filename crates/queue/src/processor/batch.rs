//! Count/time-bounded batch consumer.
//!
//! Signals accumulate in a [`SignalBatcher`] until `size` signals are
//! buffered or `interval` has passed since the first one arrived. The
//! whole batch then goes through the pipeline's bulk score and act calls.

use std::sync::Arc;

use async_trait::async_trait;
use reaper_core::config::BatchConfig;
use reaper_core::{EventBus, PipelineEvent, Signal, ThresholdSource};
use reaper_plugin::Pipeline;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{
    emit_action_failures, report_stage_failures, shutdown_requested, state_matches, Control,
    Processor, ProcessorState, ProcessorStats,
};
use crate::batcher::SignalBatcher;
use crate::error::{ProcessorError, QueueError};
use crate::signal_queue::SignalQueue;

struct Shared {
    queue: Arc<SignalQueue>,
    pipeline: Pipeline,
    threshold: Arc<dyn ThresholdSource>,
    events: EventBus,
    config: BatchConfig,
    control: Control,
}

#[derive(Clone)]
pub struct BatchProcessor {
    shared: Arc<Shared>,
}

impl BatchProcessor {
    pub fn new(
        queue: Arc<SignalQueue>,
        pipeline: Pipeline,
        threshold: Arc<dyn ThresholdSource>,
        events: EventBus,
        config: BatchConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                pipeline,
                threshold,
                events,
                config,
                control: Control::new("batch"),
            }),
        }
    }

    /// Flush whatever has accumulated without waiting for a trigger.
    pub fn trigger_now(&self) -> Result<(), ProcessorError> {
        match self.shared.control.state() {
            ProcessorState::Stopped => Err(ProcessorError::InvalidTransition {
                from: ProcessorState::Stopped,
                to: ProcessorState::Running,
            }),
            _ => {
                self.shared.control.trigger.notify_one();
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Processor for BatchProcessor {
    fn name(&self) -> &'static str {
        "batch"
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

    /// Flushes the current accumulation before returning.
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
    let mut batcher = SignalBatcher::new(shared.config.size, shared.config.interval);

    loop {
        if !control.wait_while_paused(&mut state, &mut shutdown).await {
            break;
        }

        // With an open batch, wait no longer than its time trigger.
        let deadline = batcher
            .deadline()
            .unwrap_or_else(|| Instant::now() + shared.config.interval);
        let wait = deadline.saturating_duration_since(Instant::now());

        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = state_matches(&mut state, |s| s == ProcessorState::Paused) => continue,
            _ = control.trigger.notified() => {
                debug!(buffered = batcher.len(), "manual flush requested");
                flush(&shared, batcher.take()).await;
                continue;
            }
            next = shared.queue.dequeue(wait) => match next {
                Ok(signal) => {
                    batcher.push(signal);
                    // Top up from whatever is already queued.
                    batcher.extend(shared.queue.drain_up_to(batcher.remaining()));
                }
                Err(QueueError::Timeout) => {}
                Err(QueueError::Closed) => {
                    flush(&shared, batcher.take()).await;
                    control.fatal(&shared.events, "batch.dequeue", QueueError::Closed);
                    control.finished();
                    return;
                }
                Err(e) => {
                    control.stats.record_failure();
                    shared.events.emit(PipelineEvent::error("batch.dequeue", e));
                }
            },
        }

        if let Some(batch) = batcher.take_if_due() {
            flush(&shared, batch).await;
        }
    }

    if !batcher.is_empty() {
        info!(buffered = batcher.len(), "draining accumulated batch before stop");
        flush(&shared, batcher.take()).await;
    }
    control.finished();
}

async fn flush(shared: &Shared, batch: Vec<Signal>) {
    if batch.is_empty() {
        return;
    }
    let threshold = shared.threshold.current_threshold();
    let outcome = shared.pipeline.process_batch(&batch, threshold).await;

    let control = &shared.control;
    control.stats.record(outcome.batch_size, &outcome.actions);
    control.stats.record_batch();
    emit_action_failures(&shared.events, &outcome.actions);
    report_stage_failures(&control.stats, &shared.events, &outcome.failures);

    info!(
        batch_size = outcome.batch_size,
        scored = outcome.scored.len(),
        actions = outcome.actions.len(),
        failures = outcome.failures.len(),
        threshold,
        "batch processed"
    );
    shared.events.emit(PipelineEvent::BatchProcessed {
        batch_size: outcome.batch_size,
        scored: outcome.scored.len(),
        actions: outcome.actions.len(),
    });
}
