//! Bulk label import.
//!
//! Operators hand labels to the worker as JSON lines, one verdict per
//! line:
//!
//! ```text
//! {"signal_id":"…","source":"feed-A","sense_type":"sight","score":0.82,"label":"tp"}
//! ```
//!
//! `label` accepts anything [`OutcomeLabel`] parses. A verdict already in
//! the log (same signal, same label) is skipped, so importing the same file
//! twice records it once.

use std::io::BufRead;

use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use reaper_core::SenseType;

use crate::error::FeedbackError;
use crate::feedback_loop::FeedbackLoop;
use crate::record::{FeedbackRecord, OutcomeLabel};

#[derive(Debug, Deserialize)]
struct LabelLine {
    signal_id: Uuid,
    source: String,
    sense_type: SenseType,
    score: f64,
    label: String,
}

impl LabelLine {
    fn into_record(self) -> Result<FeedbackRecord, FeedbackError> {
        let label: OutcomeLabel = self.label.parse()?;
        Ok(FeedbackRecord::from_parts(
            self.signal_id,
            self.source,
            self.sense_type,
            self.score,
            label,
        )?)
    }
}

/// Tally of one import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelImport {
    pub recorded: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

impl FeedbackLoop {
    /// Record every label line read from `reader`.
    ///
    /// Malformed or invalid lines are logged and counted as rejected. Only
    /// read and store failures abort the import.
    pub fn import_labels<R: BufRead>(&self, reader: R) -> Result<LabelImport, FeedbackError> {
        let mut tally = LabelImport::default();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed = serde_json::from_str::<LabelLine>(&line)
                .map_err(FeedbackError::from)
                .and_then(LabelLine::into_record);
            let record = match parsed {
                Ok(record) => record,
                Err(e) => {
                    warn!(line = index + 1, error = %e, "skipping invalid label line");
                    tally.rejected += 1;
                    continue;
                }
            };
            if self.contains_label(record.signal_id, record.label) {
                tally.duplicates += 1;
                continue;
            }
            self.record(record)?;
            tally.recorded += 1;
        }
        info!(
            recorded = tally.recorded,
            duplicates = tally.duplicates,
            rejected = tally.rejected,
            "labels imported"
        );
        Ok(tally)
    }
}
