//! Action handler that records scored signals in the log.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use reaper_core::{ActionResult, DataMap, ScoredSignal};
use reaper_plugin::{ActionHandler, HandlerError, Plugin};

pub const ACTION_TYPE: &str = "log";

#[derive(Debug, Clone, Default)]
pub struct LogAction;

impl LogAction {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ActionHandler for LogAction {
    async fn execute(&self, scored: &ScoredSignal) -> Result<ActionResult, HandlerError> {
        let signal = scored.signal();
        info!(
            signal_id = %signal.id(),
            sense = %signal.sense_type(),
            source = signal.source(),
            score = scored.score(),
            tags = ?scored.tags(),
            "signal actioned"
        );

        let mut data = DataMap::new();
        data.insert("logged".into(), json!(true));
        data.insert("signal_id".into(), json!(signal.id().to_string()));
        Ok(ActionResult::success(scored.clone(), ACTION_TYPE, data)?)
    }
}

impl Plugin for LogAction {
    fn action_handler(&self) -> Option<&dyn ActionHandler> {
        Some(self)
    }
}
