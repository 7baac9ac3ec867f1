//! Fans one extension-point call out to every capable plugin.
//!
//! Handlers run as independent tokio tasks under a single shared deadline.
//! A handler that errors, panics or overruns the deadline is isolated: its
//! failure is logged and its contribution omitted. Results always come
//! back in registration order, whatever order the tasks finish in.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinError;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::extension::{DispatchMode, ExtensionPoint};
use crate::registry::{HookRegistry, RegisteredPlugin};
use crate::traits::{HandlerError, Plugin};

/// Default overall timeout for one dispatch call.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a single handler contributed nothing.
#[derive(Debug, thiserror::Error)]
pub enum HandlerFailure {
    #[error(transparent)]
    Error(#[from] HandlerError),

    #[error("handler exceeded the dispatch timeout of {0:?}")]
    TimedOut(Duration),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// One handler's outcome for one dispatch call.
#[derive(Debug)]
pub struct HandlerOutcome<T> {
    pub plugin: String,
    pub result: Result<T, HandlerFailure>,
}

impl<T> HandlerOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HookRegistry>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<HookRegistry>) -> Self {
        Self::with_timeout(registry, DEFAULT_DISPATCH_TIMEOUT)
    }

    pub fn with_timeout(registry: Arc<HookRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Invoke every handler for `point` and return only the successes,
    /// in registration order. Failures are logged and dropped.
    pub async fn dispatch<T, F, Fut>(&self, point: ExtensionPoint, call: F) -> Vec<T>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn Plugin>) -> Fut,
        Fut: Future<Output = Result<T, HandlerError>> + Send + 'static,
    {
        self.dispatch_outcomes(point, call)
            .await
            .into_iter()
            .filter_map(|outcome| match outcome.result {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(
                        extension_point = %point,
                        plugin = %outcome.plugin,
                        error = %e,
                        "handler failed, contribution dropped"
                    );
                    None
                }
            })
            .collect()
    }

    /// Per-handler outcomes using the dispatcher's configured timeout.
    pub async fn dispatch_outcomes<T, F, Fut>(
        &self,
        point: ExtensionPoint,
        call: F,
    ) -> Vec<HandlerOutcome<T>>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn Plugin>) -> Fut,
        Fut: Future<Output = Result<T, HandlerError>> + Send + 'static,
    {
        self.dispatch_outcomes_with(point, point.dispatch_mode(), self.timeout, call)
            .await
    }

    /// Per-handler outcomes with an explicit mode and caller-supplied timeout.
    pub async fn dispatch_outcomes_with<T, F, Fut>(
        &self,
        point: ExtensionPoint,
        mode: DispatchMode,
        timeout: Duration,
        call: F,
    ) -> Vec<HandlerOutcome<T>>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn Plugin>) -> Fut,
        Fut: Future<Output = Result<T, HandlerError>> + Send + 'static,
    {
        let handlers = self.registry.handlers_for(point);
        if handlers.is_empty() {
            debug!(extension_point = %point, "no handlers registered");
            return Vec::new();
        }

        debug!(
            extension_point = %point,
            handlers = handlers.len(),
            ?mode,
            "dispatching"
        );

        let deadline = Instant::now() + timeout;
        match mode {
            DispatchMode::CollectAll => {
                let calls = handlers
                    .into_iter()
                    .map(|entry| run_handler(entry, &call, deadline, timeout));
                join_all(calls).await
            }
            DispatchMode::FirstSuccess => {
                let mut outcomes = Vec::new();
                for entry in handlers {
                    let outcome = run_handler(entry, &call, deadline, timeout).await;
                    let done = outcome.is_success();
                    outcomes.push(outcome);
                    if done {
                        break;
                    }
                }
                outcomes
            }
        }
    }
}

fn run_handler<T, F, Fut>(
    entry: RegisteredPlugin,
    call: &F,
    deadline: Instant,
    timeout: Duration,
) -> impl Future<Output = HandlerOutcome<T>>
where
    T: Send + 'static,
    F: Fn(Arc<dyn Plugin>) -> Fut,
    Fut: Future<Output = Result<T, HandlerError>> + Send + 'static,
{
    // Spawn eagerly so CollectAll handlers run in parallel.
    let handle = tokio::spawn(call(Arc::clone(&entry.plugin)));
    let abort = handle.abort_handle();
    async move {
        let result = match timeout_at(deadline, handle).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(HandlerFailure::Error(e)),
            Ok(Err(join_err)) => Err(HandlerFailure::Panicked(join_error_message(join_err))),
            Err(_) => {
                abort.abort();
                Err(HandlerFailure::TimedOut(timeout))
            }
        };
        HandlerOutcome {
            plugin: entry.name,
            result,
        }
    }
}

fn join_error_message(err: JoinError) -> String {
    if err.is_panic() {
        panic_message(err.into_panic())
    } else {
        err.to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::future::{BoxFuture, FutureExt};
    use reaper_core::{ScoredSignal, SenseType, Signal};

    use crate::traits::Scorer;

    enum Behavior {
        Score(f64),
        Fail,
        Panic,
        Sleep(Duration, f64),
    }

    struct MockScorer {
        behavior: Behavior,
        calls: Arc<AtomicUsize>,
    }

    impl MockScorer {
        fn new(behavior: Behavior) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    behavior,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl Scorer for MockScorer {
        async fn score(&self, signal: &Signal) -> Result<ScoredSignal, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Score(s) => Ok(ScoredSignal::new(signal.clone(), s)?),
                Behavior::Fail => Err(HandlerError::failed("scorer down")),
                Behavior::Panic => panic!("scorer exploded"),
                Behavior::Sleep(d, s) => {
                    tokio::time::sleep(d).await;
                    Ok(ScoredSignal::new(signal.clone(), s)?)
                }
            }
        }
    }

    impl Plugin for MockScorer {
        fn scorer(&self) -> Option<&dyn Scorer> {
            Some(self)
        }
    }

    fn score_call(
        signal: Signal,
    ) -> impl Fn(Arc<dyn Plugin>) -> BoxFuture<'static, Result<ScoredSignal, HandlerError>> {
        let signal = Arc::new(signal);
        move |plugin: Arc<dyn Plugin>| -> BoxFuture<'static, Result<ScoredSignal, HandlerError>> {
            let signal = Arc::clone(&signal);
            async move {
                match plugin.scorer() {
                    Some(scorer) => scorer.score(&signal).await,
                    None => Err(HandlerError::Unsupported(ExtensionPoint::Score)),
                }
            }
            .boxed()
        }
    }

    fn signal() -> Signal {
        Signal::new(SenseType::Sight, "feed-A").unwrap()
    }

    #[tokio::test]
    async fn empty_registry_returns_empty() {
        let dispatcher = Dispatcher::new(Arc::new(HookRegistry::new()));
        let results = dispatcher.dispatch(ExtensionPoint::Score, score_call(signal())).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn failing_handler_is_isolated() {
        let registry = Arc::new(HookRegistry::new());
        let (bad, bad_calls) = MockScorer::new(Behavior::Fail);
        let (good, good_calls) = MockScorer::new(Behavior::Score(0.4));
        registry.register_plugin("bad", bad).unwrap();
        registry.register_plugin("good", good).unwrap();

        let dispatcher = Dispatcher::new(registry);
        let results = dispatcher.dispatch(ExtensionPoint::Score, score_call(signal())).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score(), 0.4);
        assert_eq!(bad_calls.load(Ordering::SeqCst), 1);
        assert_eq!(good_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_handler_is_isolated() {
        let registry = Arc::new(HookRegistry::new());
        let (boom, _) = MockScorer::new(Behavior::Panic);
        let (good, _) = MockScorer::new(Behavior::Score(0.7));
        registry.register_plugin("boom", boom).unwrap();
        registry.register_plugin("good", good).unwrap();

        let dispatcher = Dispatcher::new(registry);
        let outcomes = dispatcher
            .dispatch_outcomes(ExtensionPoint::Score, score_call(signal()))
            .await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].plugin, "boom");
        match &outcomes[0].result {
            Err(HandlerFailure::Panicked(msg)) => assert!(msg.contains("exploded")),
            other => panic!("expected panic failure, got {other:?}"),
        }
        assert!(outcomes[1].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let registry = Arc::new(HookRegistry::new());
        let (slow, _) = MockScorer::new(Behavior::Sleep(Duration::from_secs(10), 0.9));
        let (fast, _) = MockScorer::new(Behavior::Score(0.1));
        registry.register_plugin("slow", slow).unwrap();
        registry.register_plugin("fast", fast).unwrap();

        let dispatcher = Dispatcher::with_timeout(registry, Duration::from_secs(1));
        let outcomes = dispatcher
            .dispatch_outcomes(ExtensionPoint::Score, score_call(signal()))
            .await;

        assert!(matches!(
            outcomes[0].result,
            Err(HandlerFailure::TimedOut(d)) if d == Duration::from_secs(1)
        ));
        assert!(outcomes[1].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn results_follow_registration_order_not_completion_order() {
        let registry = Arc::new(HookRegistry::new());
        let (first, _) = MockScorer::new(Behavior::Sleep(Duration::from_millis(300), 0.1));
        let (second, _) = MockScorer::new(Behavior::Sleep(Duration::from_millis(100), 0.2));
        let (third, _) = MockScorer::new(Behavior::Score(0.3));
        registry.register_plugin("first", first).unwrap();
        registry.register_plugin("second", second).unwrap();
        registry.register_plugin("third", third).unwrap();

        let dispatcher = Dispatcher::new(registry);
        let scores: Vec<f64> = dispatcher
            .dispatch(ExtensionPoint::Score, score_call(signal()))
            .await
            .iter()
            .map(ScoredSignal::score)
            .collect();
        assert_eq!(scores, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn first_success_stops_early() {
        let registry = Arc::new(HookRegistry::new());
        let (bad, _) = MockScorer::new(Behavior::Fail);
        let (good, _) = MockScorer::new(Behavior::Score(0.5));
        let (unused, unused_calls) = MockScorer::new(Behavior::Score(0.9));
        registry.register_plugin("bad", bad).unwrap();
        registry.register_plugin("good", good).unwrap();
        registry.register_plugin("unused", unused).unwrap();

        let dispatcher = Dispatcher::new(registry);
        let outcomes = dispatcher
            .dispatch_outcomes_with(
                ExtensionPoint::Score,
                DispatchMode::FirstSuccess,
                Duration::from_secs(5),
                score_call(signal()),
            )
            .await;

        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].is_success());
        assert!(outcomes[1].is_success());
        assert_eq!(unused_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn only_capable_plugins_are_invoked() {
        struct Inert;
        impl Plugin for Inert {}

        let registry = Arc::new(HookRegistry::new());
        registry.register_plugin("inert", Inert).unwrap();
        let (good, _) = MockScorer::new(Behavior::Score(0.2));
        registry.register_plugin("good", good).unwrap();

        let dispatcher = Dispatcher::new(registry);
        let outcomes = dispatcher
            .dispatch_outcomes(ExtensionPoint::Score, score_call(signal()))
            .await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].plugin, "good");
    }
}
