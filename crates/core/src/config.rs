use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub queue: QueueConfig,
    pub dispatch: DispatchConfig,
    pub realtime: RealtimeConfig,
    pub batch: BatchConfig,
    pub feedback: FeedbackConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `REAPER_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("REAPER_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            queue: QueueConfig::from_env_profiled(p),
            dispatch: DispatchConfig::from_env_profiled(p),
            realtime: RealtimeConfig::from_env_profiled(p),
            batch: BatchConfig::from_env_profiled(p),
            feedback: FeedbackConfig::from_env_profiled(p),
            storage: StorageConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |msg: &str| Err(ValidationError::InvalidConfig(msg.to_string()));
        if self.queue.capacity == 0 {
            return invalid("queue capacity must be at least 1");
        }
        if self.batch.size == 0 {
            return invalid("batch size must be at least 1");
        }
        if self.batch.interval.is_zero() {
            return invalid("batch interval must be non-zero");
        }
        if self.feedback.buckets == 0 {
            return invalid("feedback buckets must be at least 1");
        }
        let t = self.feedback.initial_threshold;
        if !t.is_finite() || !(0.0..=1.0).contains(&t) {
            return invalid("action threshold must be within [0.0, 1.0]");
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  queue:      capacity={}, overflow={}", self.queue.capacity, self.queue.overflow);
        tracing::info!("  dispatch:   timeout={:?}", self.dispatch.timeout);
        tracing::info!("  realtime:   poll={:?}", self.realtime.poll_interval);
        tracing::info!("  batch:      size={}, interval={:?}", self.batch.size, self.batch.interval);
        tracing::info!(
            "  feedback:   min_samples={}, buckets={}, window={}, recalc={:?}, threshold={}",
            self.feedback.min_samples,
            self.feedback.buckets,
            self.feedback.window,
            self.feedback.recalc_interval,
            self.feedback.initial_threshold
        );
        tracing::info!("  storage:    data_dir={}", self.storage.data_dir.display());
    }
}

// ── Queue ─────────────────────────────────────────────────────

/// What a full queue does with a new signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Fail the enqueue with a backpressure error.
    #[default]
    Reject,
    /// Evict the oldest queued signal and hand it back to the producer.
    DropOldest,
    /// Wait for space, up to `enqueue_timeout`.
    Block,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OverflowPolicy::Reject => "reject",
            OverflowPolicy::DropOldest => "drop_oldest",
            OverflowPolicy::Block => "block",
        })
    }
}

impl FromStr for OverflowPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "reject" | "reject_new" => Ok(OverflowPolicy::Reject),
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            "block" | "block_producer" => Ok(OverflowPolicy::Block),
            other => Err(ValidationError::InvalidConfig(format!(
                "unknown overflow policy: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
    /// How long a producer waits for space under [`OverflowPolicy::Block`].
    pub enqueue_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            overflow: OverflowPolicy::Reject,
            enqueue_timeout: Duration::from_secs(5),
        }
    }
}

impl QueueConfig {
    fn from_env_profiled(p: &str) -> Self {
        let overflow = profiled_env_opt(p, "REAPER_QUEUE_OVERFLOW")
            .and_then(|v| match v.parse() {
                Ok(policy) => Some(policy),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring REAPER_QUEUE_OVERFLOW");
                    None
                }
            })
            .unwrap_or_default();
        Self {
            capacity: profiled_env_parse(p, "REAPER_QUEUE_CAPACITY", 1000),
            overflow,
            enqueue_timeout: Duration::from_millis(profiled_env_parse(
                p,
                "REAPER_QUEUE_ENQUEUE_TIMEOUT_MS",
                5000,
            )),
        }
    }
}

// ── Dispatch ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Deadline for one dispatch call; handlers still running are failures.
    pub timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl DispatchConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            timeout: Duration::from_millis(profiled_env_parse(p, "REAPER_DISPATCH_TIMEOUT_MS", 30_000)),
        }
    }
}

// ── Processors ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Bounded wait for each dequeue.
    pub poll_interval: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl RealtimeConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            poll_interval: Duration::from_millis(profiled_env_parse(p, "REAPER_REALTIME_POLL_MS", 1000)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Flush once this many signals are accumulated.
    pub size: usize,
    /// Flush once this long has passed since the first signal of the batch.
    pub interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 50,
            interval: Duration::from_secs(60),
        }
    }
}

impl BatchConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            size: profiled_env_parse(p, "REAPER_BATCH_SIZE", 50),
            interval: Duration::from_secs(profiled_env_parse(p, "REAPER_BATCH_INTERVAL_SECS", 60)),
        }
    }
}

// ── Feedback ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Metrics are reported only once the sample count exceeds this.
    pub min_samples: usize,
    /// Scheduled recalculation cadence.
    pub recalc_interval: Duration,
    /// Most recent records considered by the threshold search (0 = all).
    pub window: usize,
    /// Number of score buckets in the threshold grid search.
    pub buckets: usize,
    /// Threshold used until enough feedback exists.
    pub initial_threshold: f64,
    /// Recalculate as soon as a recorded outcome crosses `min_samples`.
    pub auto_recalculate: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            min_samples: 100,
            recalc_interval: Duration::from_secs(86_400),
            window: 0,
            buckets: 100,
            initial_threshold: 0.5,
            auto_recalculate: true,
        }
    }
}

impl FeedbackConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            min_samples: profiled_env_parse(p, "REAPER_FEEDBACK_MIN_SAMPLES", 100),
            recalc_interval: Duration::from_secs(profiled_env_parse(
                p,
                "REAPER_FEEDBACK_RECALC_INTERVAL_SECS",
                86_400,
            )),
            window: profiled_env_parse(p, "REAPER_FEEDBACK_WINDOW", 0),
            buckets: profiled_env_parse(p, "REAPER_FEEDBACK_BUCKETS", 100),
            initial_threshold: profiled_env_parse(p, "REAPER_ACTION_THRESHOLD", 0.5),
            auto_recalculate: profiled_env_or(p, "REAPER_FEEDBACK_AUTO_RECALC", "true") == "true",
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            data_dir: PathBuf::from(profiled_env_or(p, "REAPER_DATA_DIR", "data")),
        }
    }

    pub fn feedback_dir(&self) -> PathBuf {
        self.data_dir.join("feedback")
    }
}
