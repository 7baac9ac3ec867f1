//! Queue consumers.
//!
//! Both processors share one lifecycle:
//! `Stopped -> Running -> (Paused <-> Running) -> Stopped`.
//! The consumption loop runs on its own tokio task; `stop()` asks it to
//! finish the current unit of work and waits for it to exit.

mod batch;
mod realtime;

pub use batch::BatchProcessor;
pub use realtime::RealtimeProcessor;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info};

use reaper_core::{ActionResult, EventBus, PipelineEvent};
use reaper_plugin::StageFailure;

use crate::error::ProcessorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorState {
    Stopped,
    Running,
    Paused,
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcessorState::Stopped => "stopped",
            ProcessorState::Running => "running",
            ProcessorState::Paused => "paused",
        })
    }
}

/// Counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub processed: u64,
    pub actions: u64,
    pub failures: u64,
    pub batches: u64,
}

/// Common control surface of the realtime and batch processors.
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Spawn the consumption loop. Only valid from `Stopped`.
    fn start(&self) -> Result<(), ProcessorError>;

    fn pause(&self) -> Result<(), ProcessorError>;

    fn resume(&self) -> Result<(), ProcessorError>;

    /// Finish the in-flight unit of work and stop. Idempotent.
    async fn stop(&self) -> Result<(), ProcessorError>;

    fn state(&self) -> ProcessorState;

    fn stats(&self) -> ProcessorStats;

    /// Watch state changes, including the fatal transition to `Stopped`.
    fn subscribe_state(&self) -> watch::Receiver<ProcessorState>;
}

#[derive(Default)]
pub(crate) struct StatsCounters {
    processed: AtomicU64,
    actions: AtomicU64,
    failures: AtomicU64,
    batches: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record(&self, processed: usize, actions: &[ActionResult]) {
        self.processed.fetch_add(processed as u64, Ordering::Relaxed);
        self.actions.fetch_add(actions.len() as u64, Ordering::Relaxed);
        let failed = actions.iter().filter(|a| !a.is_success()).count();
        self.failures.fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ProcessorStats {
        ProcessorStats {
            processed: self.processed.load(Ordering::Relaxed),
            actions: self.actions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }
}

/// State machine, shutdown flag and task handle shared by both processors.
pub(crate) struct Control {
    name: &'static str,
    state: watch::Sender<ProcessorState>,
    shutdown: watch::Sender<bool>,
    pub(crate) trigger: Notify,
    pub(crate) stats: StatsCounters,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Control {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            state: watch::Sender::new(ProcessorState::Stopped),
            shutdown: watch::Sender::new(false),
            trigger: Notify::new(),
            stats: StatsCounters::default(),
            task: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ProcessorState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ProcessorState> {
        self.state.subscribe()
    }

    pub(crate) fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    fn transition(&self, from: ProcessorState, to: ProcessorState) -> Result<(), ProcessorError> {
        let mut current = from;
        let changed = self.state.send_if_modified(|state| {
            current = *state;
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            info!(processor = self.name, from = %from, to = %to, "processor state changed");
            Ok(())
        } else {
            Err(ProcessorError::InvalidTransition { from: current, to })
        }
    }

    /// `Stopped -> Running`, then spawn the loop built by `spawn`.
    pub(crate) fn start<F>(&self, spawn: F) -> Result<(), ProcessorError>
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        self.transition(ProcessorState::Stopped, ProcessorState::Running)?;
        self.shutdown.send_replace(false);
        *task = Some(spawn());
        Ok(())
    }

    pub(crate) fn pause(&self) -> Result<(), ProcessorError> {
        self.transition(ProcessorState::Running, ProcessorState::Paused)
    }

    pub(crate) fn resume(&self) -> Result<(), ProcessorError> {
        self.transition(ProcessorState::Paused, ProcessorState::Running)
    }

    pub(crate) async fn stop(&self) -> Result<(), ProcessorError> {
        // Flag and handle change together under the task lock, so a
        // concurrent start() cannot clear the flag for a loop we then miss.
        let handle = {
            let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
            self.shutdown.send_replace(true);
            task.take()
        };
        if let Some(handle) = handle {
            info!(processor = self.name, "stopping processor");
            if let Err(e) = handle.await {
                error!(processor = self.name, error = %e, "processor task ended abnormally");
                self.state.send_replace(ProcessorState::Stopped);
                return Err(ProcessorError::Fatal(e.to_string()));
            }
        }
        self.state.send_replace(ProcessorState::Stopped);
        Ok(())
    }

    /// Called by the loop on its way out.
    pub(crate) fn finished(&self) {
        self.state.send_replace(ProcessorState::Stopped);
        info!(processor = self.name, stats = ?self.stats.snapshot(), "processor stopped");
    }

    /// Catastrophic failure: emit a fatal event and let the loop exit.
    pub(crate) fn fatal(&self, events: &EventBus, context: &str, err: impl fmt::Display) {
        error!(processor = self.name, context, error = %err, "fatal processor error");
        events.emit(PipelineEvent::fatal(context, err));
    }

    /// Park while paused. Returns `false` if shutdown was requested.
    pub(crate) async fn wait_while_paused(
        &self,
        state: &mut watch::Receiver<ProcessorState>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        if *shutdown.borrow() {
            return false;
        }
        if *state.borrow() != ProcessorState::Paused {
            return true;
        }
        tokio::select! {
            _ = shutdown_requested(shutdown) => false,
            _ = state_matches(state, |s| s != ProcessorState::Paused) => true,
        }
    }
}

/// Resolves once `stop()` has been called.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Resolves once the state satisfies `pred`.
pub(crate) async fn state_matches(
    state: &mut watch::Receiver<ProcessorState>,
    pred: impl Fn(ProcessorState) -> bool,
) {
    let _ = state.wait_for(|s| pred(*s)).await;
}

/// One non-fatal `ErrorOccurred` per failed action result.
pub(crate) fn emit_action_failures(events: &EventBus, actions: &[ActionResult]) {
    for failed in actions.iter().filter(|a| !a.is_success()) {
        events.emit(PipelineEvent::error(
            format!("action:{}", failed.action_type()),
            failed.error().unwrap_or("action failed"),
        ));
    }
}

/// Count each failed scorer or action handler and emit a non-fatal
/// `ErrorOccurred` for it.
pub(crate) fn report_stage_failures(
    stats: &StatsCounters,
    events: &EventBus,
    failures: &[StageFailure],
) {
    for failure in failures {
        stats.record_failure();
        events.emit(PipelineEvent::error(failure.context(), &failure.error));
    }
}
