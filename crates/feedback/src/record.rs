//! Labeled outcomes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reaper_core::{ScoredSignal, SenseType, ValidationError};

/// Operator verdict on one scored signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeLabel {
    /// Flagged and it mattered.
    TruePositive,
    /// Flagged but it did not matter.
    FalsePositive,
    /// Not flagged but it should have been.
    FalseNegative,
}

impl OutcomeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeLabel::TruePositive => "true_positive",
            OutcomeLabel::FalsePositive => "false_positive",
            OutcomeLabel::FalseNegative => "false_negative",
        }
    }

    /// Whether the signal actually deserved action.
    pub fn is_actual_positive(&self) -> bool {
        matches!(self, OutcomeLabel::TruePositive | OutcomeLabel::FalseNegative)
    }
}

impl fmt::Display for OutcomeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeLabel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "true_positive" | "tp" => Ok(OutcomeLabel::TruePositive),
            "false_positive" | "fp" => Ok(OutcomeLabel::FalsePositive),
            "false_negative" | "fn" => Ok(OutcomeLabel::FalseNegative),
            _ => Err(ValidationError::InvalidLabel(s.to_string())),
        }
    }
}

/// One line of the feedback log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFeedbackRecord")]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub source: String,
    pub sense_type: SenseType,
    pub score: f64,
    pub label: OutcomeLabel,
    pub recorded_at: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn new(scored: &ScoredSignal, label: OutcomeLabel) -> Self {
        let signal = scored.signal();
        Self {
            id: Uuid::new_v4(),
            signal_id: signal.id(),
            source: signal.source().to_string(),
            sense_type: signal.sense_type(),
            score: scored.score(),
            label,
            recorded_at: Utc::now(),
        }
    }

    /// Build a record for a signal that is no longer held in memory.
    pub fn from_parts(
        signal_id: Uuid,
        source: impl Into<String>,
        sense_type: SenseType,
        score: f64,
        label: OutcomeLabel,
    ) -> Result<Self, ValidationError> {
        RawFeedbackRecord {
            id: Uuid::new_v4(),
            signal_id,
            source: source.into(),
            sense_type,
            score,
            label,
            recorded_at: Utc::now(),
        }
        .try_into()
    }

    pub fn with_recorded_at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = recorded_at;
        self
    }
}

#[derive(Deserialize)]
struct RawFeedbackRecord {
    id: Uuid,
    signal_id: Uuid,
    source: String,
    sense_type: SenseType,
    score: f64,
    label: OutcomeLabel,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<RawFeedbackRecord> for FeedbackRecord {
    type Error = ValidationError;

    fn try_from(raw: RawFeedbackRecord) -> Result<Self, Self::Error> {
        if raw.source.trim().is_empty() {
            return Err(ValidationError::EmptySource);
        }
        if !raw.score.is_finite() {
            return Err(ValidationError::ScoreNotFinite);
        }
        if !(0.0..=1.0).contains(&raw.score) {
            return Err(ValidationError::ScoreOutOfRange(raw.score));
        }
        Ok(Self {
            id: raw.id,
            signal_id: raw.signal_id,
            source: raw.source,
            sense_type: raw.sense_type,
            score: raw.score,
            label: raw.label,
            recorded_at: raw.recorded_at,
        })
    }
}
