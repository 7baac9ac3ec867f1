//! End-to-end scenarios through the pipeline facade with mock plugins.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reaper_core::{ActionResult, DataMap, ScoredSignal, SenseType, Signal};
use reaper_plugin::{
    ActionHandler, Detector, ExtensionPoint, HandlerError, HookRegistry, Pipeline, Plugin, Scorer,
};
use serde_json::json;

/// Emits `count` signals tagged with their position.
struct FeedDetector {
    count: usize,
}

#[async_trait]
impl Detector for FeedDetector {
    async fn detect(&self, sense: SenseType, source: &str) -> Result<Vec<Signal>, HandlerError> {
        (0..self.count)
            .map(|i| Ok(Signal::new(sense, source)?.with_field("index", json!(i))))
            .collect()
    }
}

impl Plugin for FeedDetector {
    fn detector(&self, sense: SenseType) -> Option<&dyn Detector> {
        (sense == SenseType::Sight).then_some(self as &dyn Detector)
    }
}

struct BrokenDetector;

#[async_trait]
impl Detector for BrokenDetector {
    async fn detect(&self, _sense: SenseType, _source: &str) -> Result<Vec<Signal>, HandlerError> {
        Err(HandlerError::Unavailable("feed offline".into()))
    }
}

impl Plugin for BrokenDetector {
    fn detector(&self, _sense: SenseType) -> Option<&dyn Detector> {
        Some(self)
    }
}

/// Scores by the `index` field: [0.2, 0.6, 0.9].
struct IndexScorer;

#[async_trait]
impl Scorer for IndexScorer {
    async fn score(&self, signal: &Signal) -> Result<ScoredSignal, HandlerError> {
        let scores = [0.2, 0.6, 0.9];
        let idx = signal
            .raw_data()
            .get("index")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| HandlerError::failed("missing index"))? as usize;
        Ok(ScoredSignal::new(signal.clone(), scores[idx % scores.len()])?)
    }
}

impl Plugin for IndexScorer {
    fn scorer(&self) -> Option<&dyn Scorer> {
        Some(self)
    }
}

#[derive(Default)]
struct RecordingAction {
    calls: AtomicUsize,
    seen: Mutex<Vec<f64>>,
}

#[async_trait]
impl ActionHandler for RecordingAction {
    async fn execute(&self, scored: &ScoredSignal) -> Result<ActionResult, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(scored.score());
        Ok(ActionResult::success(scored.clone(), "record", DataMap::new())?)
    }
}

/// Shares one counter between the registry's copy and the test.
struct SharedAction(Arc<RecordingAction>);

#[async_trait]
impl ActionHandler for SharedAction {
    async fn execute(&self, scored: &ScoredSignal) -> Result<ActionResult, HandlerError> {
        self.0.execute(scored).await
    }
}

impl Plugin for SharedAction {
    fn action_handler(&self) -> Option<&dyn ActionHandler> {
        Some(self)
    }
}

fn pipeline_with_action() -> (Pipeline, Arc<RecordingAction>) {
    let registry = Arc::new(HookRegistry::new());
    registry
        .register_plugin("feed", FeedDetector { count: 3 })
        .unwrap();
    registry.register_plugin("index-scorer", IndexScorer).unwrap();
    let action = Arc::new(RecordingAction::default());
    registry
        .register_plugin("recorder", SharedAction(action.clone()))
        .unwrap();
    (Pipeline::new(registry), action)
}

#[tokio::test]
async fn feed_scenario_acts_on_two_of_three() {
    let (pipeline, action) = pipeline_with_action();

    let signals = pipeline.detect_sight("feed-A").await.unwrap();
    assert_eq!(signals.len(), 3);
    assert!(signals.iter().all(|s| s.source() == "feed-A"));

    let mut scores = Vec::new();
    for signal in &signals {
        let outcome = pipeline.process(signal, 0.5).await;
        scores.extend(outcome.scored.iter().map(ScoredSignal::score));
    }

    assert_eq!(scores, vec![0.2, 0.6, 0.9]);
    assert_eq!(action.calls.load(Ordering::SeqCst), 2);
    assert_eq!(*action.seen.lock().unwrap(), vec![0.6, 0.9]);
}

#[tokio::test]
async fn feed_scenario_in_one_batch() {
    let (pipeline, action) = pipeline_with_action();

    let signals = pipeline.detect_sight("feed-A").await.unwrap();
    let outcome = pipeline.process_batch(&signals, 0.5).await;

    assert_eq!(outcome.batch_size, 3);
    assert_eq!(outcome.scored.len(), 3);
    assert_eq!(outcome.actions.len(), 2);
    assert!(outcome.actions.iter().all(ActionResult::is_success));
    assert_eq!(action.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn surviving_detector_contributes_in_order() {
    let registry = Arc::new(HookRegistry::new());
    registry.register_plugin("broken", BrokenDetector).unwrap();
    registry
        .register_plugin("feed", FeedDetector { count: 2 })
        .unwrap();
    let pipeline = Pipeline::new(registry);

    let signals = pipeline.detect_sight("feed-A").await.unwrap();
    let indices: Vec<u64> = signals
        .iter()
        .filter_map(|s| s.raw_data().get("index").and_then(|v| v.as_u64()))
        .collect();
    assert_eq!(indices, vec![0, 1]);

    // The broken detector serves every sense, so it alone answers hearing.
    assert!(pipeline.detect_hearing("feed-A").await.unwrap().is_empty());
}

#[tokio::test]
async fn unregistered_plugin_is_no_longer_dispatched() {
    let (pipeline, action) = pipeline_with_action();
    let registry = pipeline.registry().clone();
    assert_eq!(registry.count_for(ExtensionPoint::Act), 1);

    registry.unregister("recorder").unwrap();
    assert_eq!(registry.count_for(ExtensionPoint::Act), 0);

    let signal = Signal::new(SenseType::Sight, "feed-A")
        .unwrap()
        .with_field("index", json!(2));
    let outcome = pipeline.process(&signal, 0.5).await;
    assert_eq!(outcome.scored.len(), 1);
    assert!(outcome.actions.is_empty());
    assert_eq!(action.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn listing_is_idempotent() {
    let (pipeline, _) = pipeline_with_action();
    let first = pipeline.registry().list();
    let second = pipeline.registry().list();
    assert_eq!(first, second);
    assert_eq!(first, vec!["feed", "index-scorer", "recorder"]);
}

#[tokio::test]
async fn scorer_failure_is_reported_in_outcome() {
    let (pipeline, action) = pipeline_with_action();

    let unindexed = Signal::new(SenseType::Sight, "feed-A").unwrap();
    let outcome = pipeline.process(&unindexed, 0.5).await;

    assert!(outcome.scored.is_empty());
    assert!(outcome.actions.is_empty());
    assert_eq!(outcome.failures.len(), 1);
    let failure = &outcome.failures[0];
    assert_eq!(failure.stage, ExtensionPoint::Score);
    assert_eq!(failure.plugin, "index-scorer");
    assert_eq!(failure.signal_id, Some(unindexed.id()));
    assert!(failure.error.contains("missing index"));
    assert_eq!(failure.context(), "score:index-scorer");
    assert_eq!(action.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn batch_reports_each_failed_signal_and_keeps_the_rest() {
    let (pipeline, action) = pipeline_with_action();

    let good = Signal::new(SenseType::Sight, "feed-A")
        .unwrap()
        .with_field("index", json!(2));
    let bad = Signal::new(SenseType::Sight, "feed-A").unwrap();
    let outcome = pipeline.process_batch(&[good, bad.clone()], 0.5).await;

    assert_eq!(outcome.batch_size, 2);
    assert_eq!(outcome.scored.len(), 1);
    assert_eq!(outcome.actions.len(), 1);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].signal_id, Some(bad.id()));
    assert_eq!(outcome.failures[0].plugin, "index-scorer");
    assert_eq!(action.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn clean_run_has_no_failures() {
    let (pipeline, _) = pipeline_with_action();
    let signals = pipeline.detect_sight("feed-A").await.unwrap();
    assert!(pipeline.process_batch(&signals, 0.5).await.failures.is_empty());
    assert!(pipeline.process(&signals[0], 0.5).await.failures.is_empty());
}
