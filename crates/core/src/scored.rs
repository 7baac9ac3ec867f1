//! Scored signals and action outcomes.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::signal::{DataMap, Signal};

/// Clamp a raw score into `[0.0, 1.0]`.
///
/// Scorers that accumulate unbounded points call this explicitly before
/// building a [`ScoredSignal`]; construction itself never clamps.
/// `NaN` maps to `0.0`.
pub fn clamp_score(raw: f64) -> f64 {
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}

fn check_score(score: f64) -> Result<f64, ValidationError> {
    if !score.is_finite() {
        return Err(ValidationError::ScoreNotFinite);
    }
    if !(0.0..=1.0).contains(&score) {
        return Err(ValidationError::ScoreOutOfRange(score));
    }
    Ok(score)
}

/// A [`Signal`] plus one scorer's priority evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawScoredSignal")]
pub struct ScoredSignal {
    signal: Signal,
    score: f64,
    analysis: DataMap,
    tags: IndexSet<String>,
}

impl ScoredSignal {
    /// Wrap `signal` with `score`. Fails if the score is outside `[0.0, 1.0]`.
    pub fn new(signal: Signal, score: f64) -> Result<Self, ValidationError> {
        Ok(Self {
            signal,
            score: check_score(score)?,
            analysis: DataMap::new(),
            tags: IndexSet::new(),
        })
    }

    /// Attach the scorer's analysis, replacing any previous one.
    pub fn with_analysis(mut self, analysis: DataMap) -> Self {
        self.analysis = analysis;
        self
    }

    /// Add tags in order. Repeated tags keep their first position.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// The evaluated signal.
    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    /// Priority in `[0.0, 1.0]`.
    pub fn score(&self) -> f64 {
        self.score
    }

    /// Scorer-specific explanation of the score.
    pub fn analysis(&self) -> &DataMap {
        &self.analysis
    }

    /// Tags in the order they were first added.
    pub fn tags(&self) -> &IndexSet<String> {
        &self.tags
    }

    /// Exact, case-sensitive tag lookup.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Whether this evaluation reaches `threshold` (inclusive).
    pub fn meets(&self, threshold: f64) -> bool {
        self.score >= threshold
    }

    /// Drop the evaluation and keep the signal.
    pub fn into_signal(self) -> Signal {
        self.signal
    }
}

#[derive(Deserialize)]
struct RawScoredSignal {
    signal: Signal,
    score: f64,
    #[serde(default)]
    analysis: DataMap,
    #[serde(default)]
    tags: IndexSet<String>,
}

impl TryFrom<RawScoredSignal> for ScoredSignal {
    type Error = ValidationError;

    fn try_from(raw: RawScoredSignal) -> Result<Self, Self::Error> {
        Ok(ScoredSignal::new(raw.signal, raw.score)?
            .with_analysis(raw.analysis)
            .with_tags(raw.tags))
    }
}

/// Outcome of one action plugin responding to a [`ScoredSignal`].
///
/// Exactly one branch is meaningful: a success carries `result_data`, a
/// failure carries a non-empty `error` and empty `result_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawActionResult")]
pub struct ActionResult {
    signal: ScoredSignal,
    action_type: String,
    success: bool,
    result_data: DataMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ActionResult {
    /// A successful action. Fails on a blank `action_type`.
    pub fn success(
        signal: ScoredSignal,
        action_type: impl Into<String>,
        result_data: DataMap,
    ) -> Result<Self, ValidationError> {
        let action_type = action_type.into();
        if action_type.trim().is_empty() {
            return Err(ValidationError::EmptyActionType);
        }
        Ok(Self {
            signal,
            action_type,
            success: true,
            result_data,
            error: None,
        })
    }

    /// A failed action carrying its error message. Fails on a blank
    /// `action_type` or `error`.
    pub fn failure(
        signal: ScoredSignal,
        action_type: impl Into<String>,
        error: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let action_type = action_type.into();
        if action_type.trim().is_empty() {
            return Err(ValidationError::EmptyActionType);
        }
        let error = error.into();
        if error.trim().is_empty() {
            return Err(ValidationError::MissingError);
        }
        Ok(Self {
            signal,
            action_type,
            success: false,
            result_data: DataMap::new(),
            error: Some(error),
        })
    }

    /// The scored signal the action responded to.
    pub fn signal(&self) -> &ScoredSignal {
        &self.signal
    }

    /// Kind of action taken, such as `"log"`.
    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    /// Whether the action completed.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Handler output. Empty for failures.
    pub fn result_data(&self) -> &DataMap {
        &self.result_data
    }

    /// Why the action failed. `None` exactly when it succeeded.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[derive(Deserialize)]
struct RawActionResult {
    signal: ScoredSignal,
    action_type: String,
    success: bool,
    #[serde(default)]
    result_data: DataMap,
    #[serde(default)]
    error: Option<String>,
}

impl TryFrom<RawActionResult> for ActionResult {
    type Error = ValidationError;

    fn try_from(raw: RawActionResult) -> Result<Self, Self::Error> {
        if raw.success {
            if raw.error.is_some() {
                return Err(ValidationError::UnexpectedError);
            }
            ActionResult::success(raw.signal, raw.action_type, raw.result_data)
        } else {
            ActionResult::failure(raw.signal, raw.action_type, raw.error.unwrap_or_default())
        }
    }
}
