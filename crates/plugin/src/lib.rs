//! Plugin hooks for the REAPER pipeline.
//!
//! This crate provides:
//! - `Detector`, `Scorer` and `ActionHandler` traits, one per extension point kind
//! - `Plugin` bundles that expose any subset of those capabilities
//! - `HookRegistry` mapping plugin names to bundles in registration order
//! - `Dispatcher` that fans a call out to every capable plugin with failure isolation
//! - `Pipeline`, the stateless facade exposing detect / score / act

pub mod dispatcher;
pub mod error;
pub mod extension;
pub mod pipeline;
pub mod registry;
pub mod traits;

pub use dispatcher::{Dispatcher, HandlerFailure, HandlerOutcome};
pub use error::PluginError;
pub use extension::{DispatchMode, ExtensionPoint};
pub use pipeline::{BatchOutcome, Pipeline, SignalOutcome, StageFailure};
pub use registry::{HookRegistry, PluginInfo};
pub use traits::{ActionHandler, BatchItems, Detector, HandlerError, ItemFailure, Plugin, Scorer};
