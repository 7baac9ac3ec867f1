//! Pipeline facade: one method per semantic operation.
//!
//! The facade holds nothing but the dispatcher (and through it the
//! registry), so it is cheap to clone and safe to share across tasks.
//! When several scorers are registered every one of their outputs is
//! returned; combining them is left to the caller.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use reaper_core::{ActionResult, ScoredSignal, SenseType, Signal};

use crate::dispatcher::{Dispatcher, HandlerOutcome};
use crate::error::PluginError;
use crate::extension::ExtensionPoint;
use crate::registry::HookRegistry;
use crate::traits::{BatchItems, HandlerError};

/// A scorer or action handler that failed while processing.
#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    pub stage: ExtensionPoint,
    pub plugin: String,
    /// The signal that failed, when the failure was per signal rather
    /// than the whole call.
    pub signal_id: Option<Uuid>,
    pub error: String,
}

impl StageFailure {
    /// `"<stage>:<plugin>"`, used as the error event context.
    pub fn context(&self) -> String {
        format!("{}:{}", self.stage, self.plugin)
    }
}

/// What happened to one signal in [`Pipeline::process`].
#[derive(Debug, Clone, Default)]
pub struct SignalOutcome {
    /// Every scorer output, in registration order.
    pub scored: Vec<ScoredSignal>,
    /// Action results for the scored signals that met the threshold.
    pub actions: Vec<ActionResult>,
    /// Handlers that failed along the way.
    pub failures: Vec<StageFailure>,
}

impl SignalOutcome {
    /// Scored outputs at or above `threshold`.
    pub fn triggered(&self, threshold: f64) -> impl Iterator<Item = &ScoredSignal> {
        self.scored.iter().filter(move |s| s.meets(threshold))
    }
}

/// What happened to one batch in [`Pipeline::process_batch`].
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub batch_size: usize,
    pub scored: Vec<ScoredSignal>,
    pub actions: Vec<ActionResult>,
    pub failures: Vec<StageFailure>,
}

#[derive(Clone)]
pub struct Pipeline {
    dispatcher: Dispatcher,
}

impl Pipeline {
    /// Facade over `registry` with the default dispatch timeout.
    pub fn new(registry: Arc<HookRegistry>) -> Self {
        Self {
            dispatcher: Dispatcher::new(registry),
        }
    }

    /// Facade whose dispatch calls each get `timeout` overall.
    pub fn with_timeout(registry: Arc<HookRegistry>, timeout: Duration) -> Self {
        Self {
            dispatcher: Dispatcher::with_timeout(registry, timeout),
        }
    }

    pub fn registry(&self) -> &Arc<HookRegistry> {
        self.dispatcher.registry()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run every detector registered for `sense` against `source`.
    ///
    /// Fails fast on an empty source or a non-detection sense. Zero
    /// detectors, or all of them failing, yields an empty list.
    pub async fn detect(&self, sense: SenseType, source: &str) -> Result<Vec<Signal>, PluginError> {
        if source.trim().is_empty() {
            return Err(PluginError::Argument("detection source must not be empty".into()));
        }
        let point = ExtensionPoint::detect(sense)?;
        let source: Arc<str> = Arc::from(source);

        let batches = self
            .dispatcher
            .dispatch(point, move |plugin| {
                let source = Arc::clone(&source);
                async move {
                    match plugin.detector(sense) {
                        Some(detector) => detector.detect(sense, &source).await,
                        None => Err(HandlerError::Unsupported(point)),
                    }
                }
            })
            .await;

        let signals: Vec<Signal> = batches.into_iter().flatten().collect();
        debug!(sense = %sense, count = signals.len(), "detection complete");
        Ok(signals)
    }

    pub async fn detect_sight(&self, source: &str) -> Result<Vec<Signal>, PluginError> {
        self.detect(SenseType::Sight, source).await
    }

    pub async fn detect_hearing(&self, source: &str) -> Result<Vec<Signal>, PluginError> {
        self.detect(SenseType::Hearing, source).await
    }

    pub async fn detect_touch(&self, source: &str) -> Result<Vec<Signal>, PluginError> {
        self.detect(SenseType::Touch, source).await
    }

    pub async fn detect_taste(&self, source: &str) -> Result<Vec<Signal>, PluginError> {
        self.detect(SenseType::Taste, source).await
    }

    pub async fn detect_smell(&self, source: &str) -> Result<Vec<Signal>, PluginError> {
        self.detect(SenseType::Smell, source).await
    }

    /// One [`ScoredSignal`] per registered scorer, in registration order.
    pub async fn score(&self, signal: &Signal) -> Vec<ScoredSignal> {
        self.score_reporting(signal).await.0
    }

    /// Bulk scoring through each scorer's `score_batch`. Output is grouped
    /// by scorer in registration order.
    pub async fn score_batch(&self, signals: &[Signal]) -> Vec<ScoredSignal> {
        self.score_batch_reporting(signals).await.0
    }

    /// One [`ActionResult`] per registered action handler.
    pub async fn act(&self, scored: &ScoredSignal) -> Vec<ActionResult> {
        self.act_reporting(scored).await.0
    }

    /// Bulk action through each handler's `execute_batch`.
    pub async fn act_batch(&self, scored: &[ScoredSignal]) -> Vec<ActionResult> {
        self.act_batch_reporting(scored).await.0
    }

    /// Score `signal`, then act on every scorer output that meets `threshold`.
    pub async fn process(&self, signal: &Signal, threshold: f64) -> SignalOutcome {
        let (scored, mut failures) = self.score_reporting(signal).await;
        let mut actions = Vec::new();
        for s in scored.iter().filter(|s| s.meets(threshold)) {
            let (results, failed) = self.act_reporting(s).await;
            actions.extend(results);
            failures.extend(failed);
        }
        debug!(
            signal_id = %signal.id(),
            scored = scored.len(),
            actions = actions.len(),
            failures = failures.len(),
            threshold,
            "signal processed"
        );
        SignalOutcome {
            scored,
            actions,
            failures,
        }
    }

    /// Bulk variant of [`process`](Self::process).
    pub async fn process_batch(&self, signals: &[Signal], threshold: f64) -> BatchOutcome {
        let (scored, mut failures) = self.score_batch_reporting(signals).await;
        let triggered: Vec<ScoredSignal> = scored
            .iter()
            .filter(|s| s.meets(threshold))
            .cloned()
            .collect();
        let (actions, failed) = self.act_batch_reporting(&triggered).await;
        failures.extend(failed);
        BatchOutcome {
            batch_size: signals.len(),
            scored,
            actions,
            failures,
        }
    }

    async fn score_reporting(&self, signal: &Signal) -> (Vec<ScoredSignal>, Vec<StageFailure>) {
        let signal_id = signal.id();
        let signal = Arc::new(signal.clone());
        let outcomes = self
            .dispatcher
            .dispatch_outcomes(ExtensionPoint::Score, move |plugin| {
                let signal = Arc::clone(&signal);
                async move {
                    match plugin.scorer() {
                        Some(scorer) => scorer.score(&signal).await,
                        None => Err(HandlerError::Unsupported(ExtensionPoint::Score)),
                    }
                }
            })
            .await;
        split(ExtensionPoint::Score, Some(signal_id), outcomes)
    }

    async fn act_reporting(&self, scored: &ScoredSignal) -> (Vec<ActionResult>, Vec<StageFailure>) {
        let signal_id = scored.signal().id();
        let scored = Arc::new(scored.clone());
        let outcomes = self
            .dispatcher
            .dispatch_outcomes(ExtensionPoint::Act, move |plugin| {
                let scored = Arc::clone(&scored);
                async move {
                    match plugin.action_handler() {
                        Some(handler) => handler.execute(&scored).await,
                        None => Err(HandlerError::Unsupported(ExtensionPoint::Act)),
                    }
                }
            })
            .await;
        split(ExtensionPoint::Act, Some(signal_id), outcomes)
    }

    async fn score_batch_reporting(
        &self,
        signals: &[Signal],
    ) -> (Vec<ScoredSignal>, Vec<StageFailure>) {
        if signals.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let signals: Arc<[Signal]> = Arc::from(signals);
        let outcomes = self
            .dispatcher
            .dispatch_outcomes(ExtensionPoint::Score, move |plugin| {
                let signals = Arc::clone(&signals);
                async move {
                    match plugin.scorer() {
                        Some(scorer) => scorer.score_batch(&signals).await,
                        None => Err(HandlerError::Unsupported(ExtensionPoint::Score)),
                    }
                }
            })
            .await;
        split_batches(ExtensionPoint::Score, outcomes)
    }

    async fn act_batch_reporting(
        &self,
        scored: &[ScoredSignal],
    ) -> (Vec<ActionResult>, Vec<StageFailure>) {
        if scored.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let scored: Arc<[ScoredSignal]> = Arc::from(scored);
        let outcomes = self
            .dispatcher
            .dispatch_outcomes(ExtensionPoint::Act, move |plugin| {
                let scored = Arc::clone(&scored);
                async move {
                    match plugin.action_handler() {
                        Some(handler) => handler.execute_batch(&scored).await,
                        None => Err(HandlerError::Unsupported(ExtensionPoint::Act)),
                    }
                }
            })
            .await;
        split_batches(ExtensionPoint::Act, outcomes)
    }
}

fn failure(
    stage: ExtensionPoint,
    plugin: &str,
    signal_id: Option<Uuid>,
    error: &dyn std::fmt::Display,
) -> StageFailure {
    warn!(
        extension_point = %stage,
        plugin,
        signal_id = ?signal_id,
        error = %error,
        "handler failed, contribution dropped"
    );
    StageFailure {
        stage,
        plugin: plugin.to_string(),
        signal_id,
        error: error.to_string(),
    }
}

/// Successes in registration order, failures attributed to their plugin.
fn split<T>(
    stage: ExtensionPoint,
    signal_id: Option<Uuid>,
    outcomes: Vec<HandlerOutcome<T>>,
) -> (Vec<T>, Vec<StageFailure>) {
    let mut values = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(value) => values.push(value),
            Err(e) => failures.push(failure(stage, &outcome.plugin, signal_id, &e)),
        }
    }
    (values, failures)
}

/// Like [`split`], also unpacking each handler's per-signal failures.
fn split_batches<T>(
    stage: ExtensionPoint,
    outcomes: Vec<HandlerOutcome<BatchItems<T>>>,
) -> (Vec<T>, Vec<StageFailure>) {
    let mut values = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(batch) => {
                values.extend(batch.items);
                failures.extend(batch.failures.into_iter().map(|item| {
                    failure(stage, &outcome.plugin, Some(item.signal_id), &item.error)
                }));
            }
            Err(e) => failures.push(failure(stage, &outcome.plugin, None, &e)),
        }
    }
    (values, failures)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_source_fails_fast() {
        let pipeline = Pipeline::new(Arc::new(HookRegistry::new()));
        assert!(matches!(
            pipeline.detect(SenseType::Sight, "").await,
            Err(PluginError::Argument(_))
        ));
        assert!(matches!(
            pipeline.detect_hearing("   ").await,
            Err(PluginError::Argument(_))
        ));
    }

    #[tokio::test]
    async fn action_sense_is_not_detectable() {
        let pipeline = Pipeline::new(Arc::new(HookRegistry::new()));
        assert!(matches!(
            pipeline.detect(SenseType::Action, "feed-A").await,
            Err(PluginError::Argument(_))
        ));
    }

    #[tokio::test]
    async fn nothing_registered_yields_empty_results() {
        let pipeline = Pipeline::new(Arc::new(HookRegistry::new()));
        let signal = Signal::new(SenseType::Smell, "feed-A").unwrap();

        assert!(pipeline.detect_smell("feed-A").await.unwrap().is_empty());
        assert!(pipeline.score(&signal).await.is_empty());
        let outcome = pipeline.process(&signal, 0.5).await;
        assert!(outcome.scored.is_empty());
        assert!(outcome.actions.is_empty());
        assert_eq!(pipeline.process_batch(&[signal], 0.5).await.batch_size, 1);
    }
}
