//! The adaptive feedback loop.
//!
//! Labeled outcomes go to the store first and then into an in-memory
//! cache. The persisted log is the source of truth: on open the cache and
//! the threshold are rebuilt from it. Threshold reads are a single atomic
//! load, so recalculation never blocks signal processing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use reaper_core::config::FeedbackConfig;
use reaper_core::{
    EventBus, FeedbackStats, PipelineEvent, ScoredSignal, ThresholdSource, ValidationError,
};

use crate::error::FeedbackError;
use crate::objective::{search_threshold, F1Objective, ThresholdObjective};
use crate::record::{FeedbackRecord, OutcomeLabel};
use crate::stats::LabelCounts;
use crate::store::{FeedbackStore, PersistedThreshold};

/// Two thresholds closer than this are the same value.
const THRESHOLD_EPSILON: f64 = 1e-9;

#[derive(Default)]
struct LoopState {
    records: Vec<FeedbackRecord>,
    counts: LabelCounts,
}

pub struct FeedbackLoop {
    store: Arc<dyn FeedbackStore>,
    config: FeedbackConfig,
    objective: Arc<dyn ThresholdObjective>,
    events: EventBus,
    state: Mutex<LoopState>,
    /// Held from snapshot to swap so an older snapshot never overwrites a
    /// newer result.
    recalc: Mutex<()>,
    threshold: AtomicU64,
}

impl FeedbackLoop {
    /// Open with the default F1 objective.
    pub fn open(
        store: Arc<dyn FeedbackStore>,
        config: FeedbackConfig,
        events: EventBus,
    ) -> Result<Self, FeedbackError> {
        Self::open_with_objective(store, config, events, Arc::new(F1Objective))
    }

    /// Reload the full log, rebuild the counts and recompute the threshold.
    ///
    /// A persisted threshold that disagrees with the recomputed one is
    /// logged and replaced; with insufficient history the configured
    /// initial threshold applies.
    pub fn open_with_objective(
        store: Arc<dyn FeedbackStore>,
        config: FeedbackConfig,
        events: EventBus,
        objective: Arc<dyn ThresholdObjective>,
    ) -> Result<Self, FeedbackError> {
        validate(&config)?;

        let records = store.load_records()?;
        let counts = LabelCounts::from_records(&records);
        let threshold = if counts.is_sufficient(config.min_samples) {
            search_threshold(window(&records, config.window), config.buckets, objective.as_ref())
                .map_or(config.initial_threshold, |c| c.threshold)
        } else {
            config.initial_threshold
        };

        match store.load_threshold()? {
            Some(persisted) if (persisted.threshold - threshold).abs() > THRESHOLD_EPSILON => {
                warn!(
                    persisted = persisted.threshold,
                    persisted_samples = persisted.sample_count,
                    recomputed = threshold,
                    samples = counts.total(),
                    "persisted threshold disagrees with feedback log, using recomputed value"
                );
                store.save_threshold(&PersistedThreshold {
                    threshold,
                    sample_count: counts.total(),
                    updated_at: Utc::now(),
                })?;
            }
            Some(_) => {}
            None if counts.is_sufficient(config.min_samples) => {
                store.save_threshold(&PersistedThreshold {
                    threshold,
                    sample_count: counts.total(),
                    updated_at: Utc::now(),
                })?;
            }
            None => {}
        }

        info!(
            samples = counts.total(),
            min_samples = config.min_samples,
            threshold,
            objective = objective.name(),
            "feedback loop opened"
        );

        Ok(Self {
            store,
            config,
            objective,
            events,
            state: Mutex::new(LoopState { records, counts }),
            recalc: Mutex::new(()),
            threshold: AtomicU64::new(threshold.to_bits()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    /// Label a scored signal.
    pub fn record_outcome(
        &self,
        scored: &ScoredSignal,
        label: OutcomeLabel,
    ) -> Result<FeedbackRecord, FeedbackError> {
        let record = FeedbackRecord::new(scored, label);
        self.record(record.clone())?;
        Ok(record)
    }

    /// Label a scored signal from operator text such as `"tp"` or
    /// `"false_positive"`. Unknown labels fail with a validation error.
    pub fn record_labeled(
        &self,
        scored: &ScoredSignal,
        label: &str,
    ) -> Result<FeedbackRecord, FeedbackError> {
        let label: OutcomeLabel = label.parse()?;
        self.record_outcome(scored, label)
    }

    /// Append a prepared record. Triggers a recalculation when this record
    /// takes the sample count past the minimum.
    pub fn record(&self, record: FeedbackRecord) -> Result<(), FeedbackError> {
        // Store first: a failed append must not leave the cache ahead of the
        // log. The store serializes its own writers, so the cache lock is
        // only taken once the write has landed.
        self.store.append(&record)?;
        let crossed = {
            let mut state = self.lock();
            let before = state.counts.is_sufficient(self.config.min_samples);
            state.counts.add(record.label);
            debug!(
                signal_id = %record.signal_id,
                label = %record.label,
                score = record.score,
                samples = state.counts.total(),
                "feedback recorded"
            );
            state.records.push(record);
            !before && state.counts.is_sufficient(self.config.min_samples)
        };

        if crossed && self.config.auto_recalculate {
            info!(
                min_samples = self.config.min_samples,
                "feedback crossed minimum sample count, recalculating threshold"
            );
            self.recalculate_threshold()?;
        }
        Ok(())
    }

    /// Counts and, once sufficient, precision / recall / F1 over every record.
    pub fn stats(&self) -> FeedbackStats {
        self.lock().counts.to_stats(self.config.min_samples)
    }

    /// Whether `signal_id` already carries `label`.
    pub fn contains_label(&self, signal_id: Uuid, label: OutcomeLabel) -> bool {
        self.lock()
            .records
            .iter()
            .any(|r| r.signal_id == signal_id && r.label == label)
    }

    pub fn sample_count(&self) -> usize {
        self.lock().counts.total()
    }

    pub fn threshold(&self) -> f64 {
        f64::from_bits(self.threshold.load(Ordering::Acquire))
    }

    /// Grid-search a new threshold over the configured window of records.
    ///
    /// Works on a snapshot taken under the cache lock; the search itself
    /// runs without it. Concurrent recalculations run one at a time. Emits
    /// `ThresholdAdjusted` when the value changes; records that cannot
    /// separate anything leave the threshold where it is.
    pub fn recalculate_threshold(&self) -> Result<f64, FeedbackError> {
        let _recalc = self.recalc.lock().unwrap_or_else(PoisonError::into_inner);
        let (snapshot, stats) = {
            let state = self.lock();
            let stats = state.counts.to_stats(self.config.min_samples);
            if !stats.is_sufficient() {
                return Err(FeedbackError::InsufficientData {
                    samples: stats.sample_count,
                    required: self.config.min_samples,
                });
            }
            (window(&state.records, self.config.window).to_vec(), stats)
        };

        let Some(choice) =
            search_threshold(&snapshot, self.config.buckets, self.objective.as_ref())
        else {
            debug!(
                threshold = self.threshold(),
                samples = stats.sample_count,
                "records do not separate, threshold kept"
            );
            return Ok(self.threshold());
        };

        self.store.save_threshold(&PersistedThreshold {
            threshold: choice.threshold,
            sample_count: stats.sample_count,
            updated_at: Utc::now(),
        })?;

        let old = f64::from_bits(
            self.threshold
                .swap(choice.threshold.to_bits(), Ordering::AcqRel),
        );
        if (old - choice.threshold).abs() > THRESHOLD_EPSILON {
            info!(
                old,
                new = choice.threshold,
                objective = self.objective.name(),
                value = choice.objective,
                samples = stats.sample_count,
                window = snapshot.len(),
                "threshold adjusted"
            );
            self.events.emit(PipelineEvent::ThresholdAdjusted {
                old,
                new: choice.threshold,
                stats,
            });
        } else {
            debug!(threshold = old, "threshold unchanged after recalculation");
        }
        Ok(choice.threshold)
    }

    /// Recalculate every `recalc_interval` until the handle is shut down.
    pub fn spawn_scheduler(self: &Arc<Self>) -> SchedulerHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let this = Arc::clone(self);
        let period = self.config.recalc_interval;

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval = ?period, "threshold scheduler started");
            loop {
                tokio::select! {
                    _ = stop.wait_for(|s| *s) => break,
                    _ = ticker.tick() => match this.recalculate_threshold() {
                        Ok(threshold) => debug!(threshold, "scheduled recalculation done"),
                        Err(FeedbackError::InsufficientData { samples, required }) => {
                            debug!(samples, required, "scheduled recalculation skipped");
                        }
                        Err(e) => {
                            warn!(error = %e, fatal = e.is_fatal(), "scheduled recalculation failed");
                            this.events.emit(PipelineEvent::ErrorOccurred {
                                context: "feedback.recalculate".into(),
                                error: e.to_string(),
                                fatal: e.is_fatal(),
                            });
                        }
                    },
                }
            }
            info!("threshold scheduler stopped");
        });

        SchedulerHandle { shutdown, task }
    }
}

impl ThresholdSource for FeedbackLoop {
    fn current_threshold(&self) -> f64 {
        self.threshold()
    }
}

/// Stops a scheduler started by [`FeedbackLoop::spawn_scheduler`].
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "threshold scheduler ended abnormally");
        }
    }
}

fn window(records: &[FeedbackRecord], size: usize) -> &[FeedbackRecord] {
    if size == 0 || size >= records.len() {
        records
    } else {
        &records[records.len() - size..]
    }
}

fn validate(config: &FeedbackConfig) -> Result<(), ValidationError> {
    if config.buckets == 0 {
        return Err(ValidationError::InvalidConfig(
            "feedback buckets must be greater than zero".into(),
        ));
    }
    if !(0.0..=1.0).contains(&config.initial_threshold) {
        return Err(ValidationError::InvalidConfig(format!(
            "initial threshold {} is outside [0.0, 1.0]",
            config.initial_threshold
        )));
    }
    Ok(())
}
