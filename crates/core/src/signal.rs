//! Raw detected evidence: [`SenseType`] and [`Signal`].
//!
//! Signals are created by detection plugins and never mutated after they
//! are handed to the pipeline. Every later stage wraps a signal in a new
//! value ([`ScoredSignal`](crate::ScoredSignal),
//! [`ActionResult`](crate::ActionResult)) instead of editing it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ValidationError;

/// Open key → value mapping used for raw data, metadata and analysis.
pub type DataMap = IndexMap<String, Value>;

/// Which sense produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenseType {
    Sight,
    Hearing,
    Touch,
    Taste,
    Smell,
    Action,
}

impl SenseType {
    /// All six variants.
    pub const ALL: [SenseType; 6] = [
        SenseType::Sight,
        SenseType::Hearing,
        SenseType::Touch,
        SenseType::Taste,
        SenseType::Smell,
        SenseType::Action,
    ];

    /// Senses that have a detection extension point. `Action` is the
    /// response stage and is never detected.
    pub const DETECTABLE: [SenseType; 5] = [
        SenseType::Sight,
        SenseType::Hearing,
        SenseType::Touch,
        SenseType::Taste,
        SenseType::Smell,
    ];

    /// Lowercase wire name, as serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            SenseType::Sight => "sight",
            SenseType::Hearing => "hearing",
            SenseType::Touch => "touch",
            SenseType::Taste => "taste",
            SenseType::Smell => "smell",
            SenseType::Action => "action",
        }
    }

    /// Whether detectors can be registered for this sense. `Action` is the
    /// only sense that cannot.
    pub fn is_detectable(&self) -> bool {
        !matches!(self, SenseType::Action)
    }
}

impl fmt::Display for SenseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SenseType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        SenseType::ALL
            .into_iter()
            .find(|sense| sense.as_str() == lowered)
            .ok_or_else(|| ValidationError::InvalidSenseType(s.to_string()))
    }
}

/// One unit of detected evidence.
///
/// `source` is always supplied by the caller of a detection plugin and is
/// guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSignal")]
pub struct Signal {
    id: Uuid,
    sense_type: SenseType,
    source: String,
    timestamp: DateTime<Utc>,
    raw_data: DataMap,
    metadata: DataMap,
}

impl Signal {
    /// Create a signal stamped with the current UTC time.
    pub fn new(sense_type: SenseType, source: impl Into<String>) -> Result<Self, ValidationError> {
        let source = source.into();
        if source.trim().is_empty() {
            return Err(ValidationError::EmptySource);
        }
        Ok(Self {
            id: Uuid::new_v4(),
            sense_type,
            source,
            timestamp: Utc::now(),
            raw_data: DataMap::new(),
            metadata: DataMap::new(),
        })
    }

    /// Create many signals sharing one timestamp.
    ///
    /// Useful when a detector captures a burst of evidence at a single
    /// instant. If `shared_timestamp` is `None` the current time is read once.
    pub fn create_batch(
        specs: impl IntoIterator<Item = SignalSpec>,
        shared_timestamp: Option<DateTime<Utc>>,
    ) -> Result<Vec<Self>, ValidationError> {
        let ts = shared_timestamp.unwrap_or_else(Utc::now);
        specs
            .into_iter()
            .map(|spec| {
                Ok(Signal::new(spec.sense_type, spec.source)?
                    .with_timestamp(ts)
                    .with_raw_data(spec.raw_data)
                    .with_metadata(spec.metadata))
            })
            .collect()
    }

    /// Replace the creation timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Replace the whole raw-data map.
    pub fn with_raw_data(mut self, raw_data: DataMap) -> Self {
        self.raw_data = raw_data;
        self
    }

    /// Replace the whole metadata map.
    pub fn with_metadata(mut self, metadata: DataMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Insert one raw-data entry while the signal is still being built.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.raw_data.insert(key.into(), value.into());
        self
    }

    /// Unique id, assigned at creation and kept across serialization.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The sense that produced this signal.
    pub fn sense_type(&self) -> SenseType {
        self.sense_type
    }

    /// Where the evidence came from. Never empty.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// When the signal was created, in UTC.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The evidence itself, in insertion order.
    pub fn raw_data(&self) -> &DataMap {
        &self.raw_data
    }

    /// Context about the evidence, such as detector version or location.
    pub fn metadata(&self) -> &DataMap {
        &self.metadata
    }
}

/// Input for [`Signal::create_batch`].
#[derive(Debug, Clone)]
pub struct SignalSpec {
    pub sense_type: SenseType,
    pub source: String,
    pub raw_data: DataMap,
    pub metadata: DataMap,
}

impl SignalSpec {
    /// Empty raw data and metadata. Validation happens in
    /// [`Signal::create_batch`].
    pub fn new(sense_type: SenseType, source: impl Into<String>) -> Self {
        Self {
            sense_type,
            source: source.into(),
            raw_data: DataMap::new(),
            metadata: DataMap::new(),
        }
    }
}

/// Wire shape of a [`Signal`]; validated on the way in.
#[derive(Deserialize)]
struct RawSignal {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    sense_type: SenseType,
    source: String,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    raw_data: DataMap,
    #[serde(default)]
    metadata: DataMap,
}

impl TryFrom<RawSignal> for Signal {
    type Error = ValidationError;

    fn try_from(raw: RawSignal) -> Result<Self, Self::Error> {
        let mut signal = Signal::new(raw.sense_type, raw.source)?
            .with_timestamp(raw.timestamp)
            .with_raw_data(raw.raw_data)
            .with_metadata(raw.metadata);
        signal.id = raw.id;
        Ok(signal)
    }
}
