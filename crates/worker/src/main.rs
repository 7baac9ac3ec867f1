//! reaper-worker: runs the signal pipeline over JSON signals read from stdin.
//!
//! Each stdin line is one JSON-encoded signal. Signals are queued and
//! consumed by the realtime or batch processor; scored signals at or above
//! the feedback-driven threshold are handed to the action plugins.
//!
//! Operator verdicts reach the feedback loop through `--labels`, a JSON
//! lines file imported once at startup; see [`reaper_feedback::labels`].
//!
//! Shuts down on EOF or Ctrl-C. The batch processor flushes what it has
//! accumulated before exiting.

use std::fs::File;
use std::io::BufReader as StdBufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use reaper_core::config::{self, Config};
use reaper_core::events::DEFAULT_EVENT_CAPACITY;
use reaper_core::{EventBus, PipelineEvent, Signal, ThresholdSource};
use reaper_feedback::{FeedbackLoop, JsonlFeedbackStore};
use reaper_plugin::{HookRegistry, Pipeline};
use reaper_plugins::{KeywordScorer, LogAction};
use reaper_queue::{
    BatchProcessor, Enqueued, Processor, ProcessorState, QueueError, RealtimeProcessor, SignalQueue,
};

const DRAIN_POLL: Duration = Duration::from_millis(50);

enum Shutdown {
    Eof,
    Interrupted,
    ProcessorStopped,
}

// ── CLI ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Realtime,
    Batch,
}

/// REAPER worker: score and act on signals streamed through stdin.
#[derive(Parser, Debug)]
#[command(name = "reaper-worker", version, about)]
struct Cli {
    /// Consumption strategy.
    #[arg(long, value_enum, env = "REAPER_MODE", default_value = "realtime")]
    mode: Mode,

    /// Overrides REAPER_DATA_DIR.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON lines of operator labels to record before processing starts.
    #[arg(long, env = "REAPER_LABELS")]
    labels: Option<PathBuf>,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    config::load_dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(dir) = cli.data_dir.clone() {
        config.storage.data_dir = dir;
    }
    config.validate()?;
    config.log_summary();

    let events = EventBus::new(DEFAULT_EVENT_CAPACITY);
    let logger = tokio::spawn(log_events(events.subscribe()));

    let registry = Arc::new(HookRegistry::new());
    registry.register_plugin("keyword_scorer", KeywordScorer::new())?;
    registry.register_plugin("log_action", LogAction::new())?;
    let pipeline = Pipeline::with_timeout(registry, config.dispatch.timeout);

    let store = Arc::new(JsonlFeedbackStore::open(&config.storage.feedback_dir())?);
    let feedback = Arc::new(FeedbackLoop::open(store, config.feedback.clone(), events.clone())?);
    if let Some(path) = &cli.labels {
        let file = File::open(path)
            .with_context(|| format!("failed to open labels file {}", path.display()))?;
        feedback.import_labels(StdBufReader::new(file))?;
    }
    let scheduler = feedback.spawn_scheduler();
    let threshold: Arc<dyn ThresholdSource> = feedback.clone();

    let queue = Arc::new(SignalQueue::new(&config.queue));
    let processor: Arc<dyn Processor> = match cli.mode {
        Mode::Realtime => Arc::new(RealtimeProcessor::new(
            queue.clone(),
            pipeline,
            threshold,
            events.clone(),
            config.realtime.clone(),
        )),
        Mode::Batch => Arc::new(BatchProcessor::new(
            queue.clone(),
            pipeline,
            threshold,
            events.clone(),
            config.batch.clone(),
        )),
    };
    processor.start()?;
    info!(mode = processor.name(), threshold = feedback.threshold(), "reaper worker started");

    let mut state = processor.subscribe_state();
    let reason = tokio::select! {
        produced = produce(&queue) => {
            info!(enqueued = produced, "stdin closed, draining queue");
            Shutdown::Eof
        }
        _ = tokio::signal::ctrl_c() => Shutdown::Interrupted,
        _ = state.wait_for(|s| *s == ProcessorState::Stopped) => Shutdown::ProcessorStopped,
    };
    let reason = match reason {
        Shutdown::Eof => tokio::select! {
            _ = drained(&queue) => Shutdown::Eof,
            _ = tokio::signal::ctrl_c() => Shutdown::Interrupted,
            _ = state.wait_for(|s| *s == ProcessorState::Stopped) => Shutdown::ProcessorStopped,
        },
        other => other,
    };
    match reason {
        Shutdown::Eof => info!("queue drained, shutting down"),
        Shutdown::Interrupted => info!("interrupt received, shutting down"),
        Shutdown::ProcessorStopped => error!("processor stopped unexpectedly"),
    }

    // The consumer must stop before the queue closes, otherwise it reports
    // the closed queue as fatal.
    processor.stop().await?;
    scheduler.shutdown().await;
    let dropped = queue.clear();
    queue.close();
    if dropped > 0 {
        warn!(dropped, "signals still queued at shutdown were discarded");
    }

    let stats = processor.stats();
    info!(
        processed = stats.processed,
        actions = stats.actions,
        failures = stats.failures,
        batches = stats.batches,
        "reaper worker stopped"
    );

    logger.abort();
    Ok(())
}

async fn drained(queue: &SignalQueue) {
    while !queue.is_empty() {
        tokio::time::sleep(DRAIN_POLL).await;
    }
}

/// Read signals from stdin until EOF. Returns how many were enqueued.
async fn produce(queue: &SignalQueue) -> usize {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut enqueued = 0;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let signal: Signal = match serde_json::from_str(&line) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(error = %e, "skipping malformed signal line");
                continue;
            }
        };

        let signal_id = signal.id();
        match queue.enqueue(signal).await {
            Ok(Enqueued::Accepted) => enqueued += 1,
            Ok(Enqueued::Displaced(evicted)) => {
                enqueued += 1;
                warn!(%signal_id, evicted = %evicted.id(), "queue full, oldest signal dropped");
            }
            Err(e @ (QueueError::Backpressure { .. } | QueueError::Timeout)) => {
                warn!(%signal_id, error = %e, "signal rejected");
            }
            Err(QueueError::Closed) => break,
        }
    }
    enqueued
}

async fn log_events(mut rx: broadcast::Receiver<PipelineEvent>) {
    loop {
        match rx.recv().await {
            Ok(PipelineEvent::SignalProcessed { signal, scored, actions }) => {
                debug!(
                    signal_id = %signal.id(),
                    scored = scored.len(),
                    actions = actions.len(),
                    "signal processed"
                );
            }
            Ok(PipelineEvent::BatchProcessed { batch_size, scored, actions }) => {
                debug!(batch_size, scored, actions, "batch processed");
            }
            Ok(PipelineEvent::ErrorOccurred { context, error, fatal: true }) => {
                error!(%context, %error, "fatal pipeline error");
            }
            Ok(PipelineEvent::ErrorOccurred { context, error, fatal: false }) => {
                warn!(%context, %error, "pipeline error");
            }
            Ok(PipelineEvent::ThresholdAdjusted { old, new, stats }) => {
                info!(
                    old,
                    new,
                    samples = stats.sample_count,
                    f1 = stats.metrics.as_ref().map(|m| m.f1),
                    "action threshold adjusted"
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event logger lagging");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
