//! Keyword-matching scorer.
//!
//! Each keyword tier found anywhere in the signal's `raw_data` text adds
//! a fixed amount: high +0.3, medium +0.2, low +0.1, capped at 1.0.
//! Matching is a case-insensitive substring test.

use async_trait::async_trait;
use serde_json::{json, Value};

use reaper_core::{clamp_score, DataMap, ScoredSignal, Signal};
use reaper_plugin::{HandlerError, Plugin, Scorer};

pub const DEFAULT_HIGH: [&str; 5] = ["urgent", "critical", "blocker", "emergency", "broken"];
pub const DEFAULT_MEDIUM: [&str; 5] = ["bug", "issue", "problem", "error", "failure"];
pub const DEFAULT_LOW: [&str; 5] = ["todo", "improvement", "enhancement", "minor", "question"];

/// Tag thresholds.
const HIGH_TAG_AT: f64 = 0.7;
const MEDIUM_TAG_AT: f64 = 0.4;

#[derive(Debug, Clone)]
pub struct KeywordScorer {
    high: Vec<String>,
    medium: Vec<String>,
    low: Vec<String>,
}

impl Default for KeywordScorer {
    fn default() -> Self {
        Self {
            high: owned(&DEFAULT_HIGH),
            medium: owned(&DEFAULT_MEDIUM),
            low: owned(&DEFAULT_LOW),
        }
    }
}

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl KeywordScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Custom tiers. An empty tier falls back to its default list.
    pub fn with_keywords(high: Vec<String>, medium: Vec<String>, low: Vec<String>) -> Self {
        let defaults = Self::default();
        Self {
            high: if high.is_empty() { defaults.high } else { high },
            medium: if medium.is_empty() { defaults.medium } else { medium },
            low: if low.is_empty() { defaults.low } else { low },
        }
    }

    pub fn high(&self) -> &[String] {
        &self.high
    }

    pub fn medium(&self) -> &[String] {
        &self.medium
    }

    pub fn low(&self) -> &[String] {
        &self.low
    }

    /// Score and analysis for `signal`, without building a [`ScoredSignal`].
    pub fn evaluate(&self, signal: &Signal) -> (f64, DataMap) {
        let text = extract_text(signal);
        let matches = |tier: &[String]| -> Vec<String> {
            tier.iter()
                .filter(|kw| text.contains(&kw.to_lowercase()))
                .cloned()
                .collect()
        };
        let high = matches(&self.high);
        let medium = matches(&self.medium);
        let low = matches(&self.low);

        // Sum in tenths so one high keyword is exactly 0.3.
        let tenths = high.len() * 3 + medium.len() * 2 + low.len();
        let score = clamp_score(tenths as f64 / 10.0);
        let total = high.len() + medium.len() + low.len();

        let mut analysis = DataMap::new();
        analysis.insert("method".into(), json!("keyword_matching"));
        analysis.insert("high_priority_matches".into(), json!(high));
        analysis.insert("medium_priority_matches".into(), json!(medium));
        analysis.insert("low_priority_matches".into(), json!(low));
        analysis.insert("total_matches".into(), json!(total));
        (score, analysis)
    }
}

/// Lowercased text of every string value, with arrays and objects
/// rendered as JSON. Numbers, booleans and nulls contribute nothing.
fn extract_text(signal: &Signal) -> String {
    signal
        .raw_data()
        .values()
        .filter_map(|value| match value {
            Value::String(s) => Some(s.to_lowercase()),
            Value::Array(_) | Value::Object(_) => Some(value.to_string().to_lowercase()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn priority_tag(score: f64) -> &'static str {
    if score >= HIGH_TAG_AT {
        "high_priority"
    } else if score >= MEDIUM_TAG_AT {
        "medium_priority"
    } else {
        "low_priority"
    }
}

#[async_trait]
impl Scorer for KeywordScorer {
    async fn score(&self, signal: &Signal) -> Result<ScoredSignal, HandlerError> {
        let (score, analysis) = self.evaluate(signal);
        let no_keywords = analysis
            .get("total_matches")
            .and_then(Value::as_u64)
            .is_some_and(|n| n == 0);

        let mut tags = vec![priority_tag(score)];
        if no_keywords {
            tags.push("no_keywords");
        }

        Ok(ScoredSignal::new(signal.clone(), score)?
            .with_analysis(analysis)
            .with_tags(tags))
    }
}

impl Plugin for KeywordScorer {
    fn scorer(&self) -> Option<&dyn Scorer> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reaper_core::SenseType;

    fn signal(data: Value) -> Signal {
        let mut s = Signal::new(SenseType::Sight, "test").unwrap();
        if let Value::Object(map) = data {
            for (k, v) in map {
                s = s.with_field(k, v);
            }
        }
        s
    }

    async fn score(data: Value) -> ScoredSignal {
        KeywordScorer::new().score(&signal(data)).await.unwrap()
    }

    #[tokio::test]
    async fn one_high_keyword() {
        let scored = score(json!({"text": "This is urgent and needs attention"})).await;
        assert_eq!(scored.score(), 0.3);
        assert_eq!(scored.analysis()["high_priority_matches"], json!(["urgent"]));
        assert!(scored.has_tag("low_priority"));
        assert!(!scored.has_tag("no_keywords"));
    }

    #[tokio::test]
    async fn one_medium_keyword() {
        let scored = score(json!({"text": "Found a bug in the system"})).await;
        assert_eq!(scored.score(), 0.2);
        assert!(scored.has_tag("low_priority"));
    }

    #[tokio::test]
    async fn two_low_keywords() {
        let scored = score(json!({"text": "This is a minor enhancement"})).await;
        assert_eq!(scored.score(), 0.2);
        assert_eq!(scored.analysis()["low_priority_matches"], json!(["enhancement", "minor"]));
    }

    #[tokio::test]
    async fn mixed_tiers_reach_high_tag() {
        let scored = score(json!({"title": "URGENT", "body": "critical bug"})).await;
        // 0.3 + 0.3 + 0.2
        assert_eq!(scored.score(), 0.8);
        assert!(scored.has_tag("high_priority"));
        assert_eq!(scored.analysis()["total_matches"], json!(3));
    }

    #[tokio::test]
    async fn score_is_capped() {
        let scored =
            score(json!({"text": "urgent critical blocker emergency broken bug"})).await;
        assert_eq!(scored.score(), 1.0);
    }

    #[tokio::test]
    async fn medium_tag_at_point_four() {
        let scored = score(json!({"text": "bug and error"})).await;
        assert_eq!(scored.score(), 0.4);
        assert!(scored.has_tag("medium_priority"));
    }

    #[tokio::test]
    async fn nested_values_are_searched() {
        let scored = score(json!({"labels": ["Blocker", "ui"], "meta": {"note": "todo"}})).await;
        assert_eq!(scored.score(), 0.4);
    }

    #[tokio::test]
    async fn nothing_matched() {
        let scored = score(json!({"text": "all quiet", "count": 5})).await;
        assert_eq!(scored.score(), 0.0);
        let tags: Vec<&str> = scored.tags().iter().map(String::as_str).collect();
        assert_eq!(tags, vec!["low_priority", "no_keywords"]);
        assert_eq!(scored.analysis()["method"], json!("keyword_matching"));
    }

    #[test]
    fn empty_custom_tier_falls_back() {
        let scorer = KeywordScorer::with_keywords(vec!["custom_high".into()], vec![], vec![]);
        assert_eq!(scorer.high(), ["custom_high".to_string()]);
        assert!(scorer.medium().iter().any(|k| k == "bug"));
        assert!(scorer.low().iter().any(|k| k == "todo"));
    }
}
