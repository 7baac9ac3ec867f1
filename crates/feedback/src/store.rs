//! Durable storage for the feedback log and the current threshold.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::FeedbackError;
use crate::record::FeedbackRecord;

/// The persisted threshold scalar, with enough context to explain it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedThreshold {
    pub threshold: f64,
    pub sample_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// Storage behind the feedback loop. The log is append-only: records are
/// never rewritten or deleted.
pub trait FeedbackStore: Send + Sync {
    fn append(&self, record: &FeedbackRecord) -> Result<(), FeedbackError>;

    /// Every record, oldest first.
    fn load_records(&self) -> Result<Vec<FeedbackRecord>, FeedbackError>;

    fn save_threshold(&self, threshold: &PersistedThreshold) -> Result<(), FeedbackError>;

    fn load_threshold(&self) -> Result<Option<PersistedThreshold>, FeedbackError>;
}

/// `feedback.jsonl` (one record per line) plus `threshold.json`.
pub struct JsonlFeedbackStore {
    log_path: PathBuf,
    threshold_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlFeedbackStore {
    pub const LOG_FILE: &'static str = "feedback.jsonl";
    pub const THRESHOLD_FILE: &'static str = "threshold.json";

    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: &Path) -> Result<Self, FeedbackError> {
        fs::create_dir_all(dir)?;
        info!(path = %dir.display(), "feedback store initialized");
        Ok(Self {
            log_path: dir.join(Self::LOG_FILE),
            threshold_path: dir.join(Self::THRESHOLD_FILE),
            write_lock: Mutex::new(()),
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn threshold_path(&self) -> &Path {
        &self.threshold_path
    }
}

impl FeedbackStore for JsonlFeedbackStore {
    fn append(&self, record: &FeedbackRecord) -> Result<(), FeedbackError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.log_path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    fn load_records(&self) -> Result<Vec<FeedbackRecord>, FeedbackError> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.log_path)?;
        let mut records = Vec::new();
        for (i, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FeedbackRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        file = %self.log_path.display(),
                        line = i + 1,
                        error = %e,
                        "skipping corrupt feedback line"
                    );
                }
            }
        }
        Ok(records)
    }

    fn save_threshold(&self, threshold: &PersistedThreshold) -> Result<(), FeedbackError> {
        let json = serde_json::to_string_pretty(threshold)?;
        let tmp = self.threshold_path.with_extension("json.tmp");
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.threshold_path)?;
        Ok(())
    }

    fn load_threshold(&self) -> Result<Option<PersistedThreshold>, FeedbackError> {
        if !self.threshold_path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&self.threshold_path)?;
        match serde_json::from_str(&data) {
            Ok(t) => Ok(Some(t)),
            Err(e) => {
                // Only a hint; the log is the source of truth.
                warn!(
                    file = %self.threshold_path.display(),
                    error = %e,
                    "ignoring unreadable persisted threshold"
                );
                Ok(None)
            }
        }
    }
}

/// Volatile store for tests and embedding.
#[derive(Default)]
pub struct InMemoryFeedbackStore {
    records: Mutex<Vec<FeedbackRecord>>,
    threshold: Mutex<Option<PersistedThreshold>>,
}

impl InMemoryFeedbackStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeedbackStore for InMemoryFeedbackStore {
    fn append(&self, record: &FeedbackRecord) -> Result<(), FeedbackError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    fn load_records(&self) -> Result<Vec<FeedbackRecord>, FeedbackError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save_threshold(&self, threshold: &PersistedThreshold) -> Result<(), FeedbackError> {
        *self.threshold.lock().unwrap_or_else(PoisonError::into_inner) = Some(threshold.clone());
        Ok(())
    }

    fn load_threshold(&self) -> Result<Option<PersistedThreshold>, FeedbackError> {
        Ok(self
            .threshold
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reaper_core::SenseType;
    use tempfile::TempDir;
    use uuid::Uuid;

    use crate::record::OutcomeLabel;

    fn record(score: f64, label: OutcomeLabel) -> FeedbackRecord {
        FeedbackRecord::from_parts(Uuid::new_v4(), "feed-A", SenseType::Sight, score, label).unwrap()
    }

    #[test]
    fn jsonl_appends_and_reloads_in_order() {
        let tmp = TempDir::new().unwrap();
        let store = JsonlFeedbackStore::open(tmp.path()).unwrap();
        let a = record(0.9, OutcomeLabel::TruePositive);
        let b = record(0.1, OutcomeLabel::FalseNegative);
        store.append(&a).unwrap();
        store.append(&b).unwrap();

        let loaded = store.load_records().unwrap();
        assert_eq!(loaded, vec![a, b]);
    }

    #[test]
    fn missing_files_load_empty() {
        let tmp = TempDir::new().unwrap();
        let store = JsonlFeedbackStore::open(&tmp.path().join("nested")).unwrap();
        assert!(store.load_records().unwrap().is_empty());
        assert!(store.load_threshold().unwrap().is_none());
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let store = JsonlFeedbackStore::open(tmp.path()).unwrap();
        let good = record(0.5, OutcomeLabel::FalsePositive);
        store.append(&good).unwrap();

        let mut file = OpenOptions::new().append(true).open(store.log_path()).unwrap();
        // Torn write followed by an out-of-range score.
        writeln!(file, "{{\"id\": \"trunc").unwrap();
        let mut bad = serde_json::to_value(&good).unwrap();
        bad["score"] = serde_json::json!(3.0);
        writeln!(file, "{bad}").unwrap();

        let loaded = store.load_records().unwrap();
        assert_eq!(loaded, vec![good]);
    }

    #[test]
    fn threshold_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = JsonlFeedbackStore::open(tmp.path()).unwrap();
        let t = PersistedThreshold {
            threshold: 0.37,
            sample_count: 120,
            updated_at: Utc::now(),
        };
        store.save_threshold(&t).unwrap();
        assert_eq!(store.load_threshold().unwrap(), Some(t));
    }

    #[test]
    fn unreadable_threshold_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let store = JsonlFeedbackStore::open(tmp.path()).unwrap();
        fs::write(store.threshold_path(), "not json").unwrap();
        assert!(store.load_threshold().unwrap().is_none());
    }

    #[test]
    fn in_memory_store() {
        let store = InMemoryFeedbackStore::new();
        store.append(&record(0.3, OutcomeLabel::TruePositive)).unwrap();
        assert_eq!(store.load_records().unwrap().len(), 1);
        assert!(store.load_threshold().unwrap().is_none());
    }
}
