//! Named extension points.

use std::fmt;

use reaper_core::SenseType;

use crate::error::PluginError;
use crate::traits::Plugin;

/// How the dispatcher combines handlers for one extension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Invoke every handler; return every success in registration order.
    CollectAll,
    /// Invoke handlers in registration order and stop at the first success.
    /// Reserved: no built-in extension point uses it.
    FirstSuccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionPoint {
    /// Detection for one sense. Never constructed for `SenseType::Action`.
    Detect(SenseType),
    Score,
    Act,
}

impl ExtensionPoint {
    pub const ALL: [ExtensionPoint; 7] = [
        ExtensionPoint::Detect(SenseType::Sight),
        ExtensionPoint::Detect(SenseType::Hearing),
        ExtensionPoint::Detect(SenseType::Touch),
        ExtensionPoint::Detect(SenseType::Taste),
        ExtensionPoint::Detect(SenseType::Smell),
        ExtensionPoint::Score,
        ExtensionPoint::Act,
    ];

    /// The detection extension point for `sense`.
    pub fn detect(sense: SenseType) -> Result<Self, PluginError> {
        if sense.is_detectable() {
            Ok(ExtensionPoint::Detect(sense))
        } else {
            Err(PluginError::Argument(format!("{sense} is not a detection sense")))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExtensionPoint::Detect(SenseType::Sight) => "detect.sight",
            ExtensionPoint::Detect(SenseType::Hearing) => "detect.hearing",
            ExtensionPoint::Detect(SenseType::Touch) => "detect.touch",
            ExtensionPoint::Detect(SenseType::Taste) => "detect.taste",
            ExtensionPoint::Detect(SenseType::Smell) => "detect.smell",
            ExtensionPoint::Detect(SenseType::Action) => "detect.action",
            ExtensionPoint::Score => "score",
            ExtensionPoint::Act => "act",
        }
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        DispatchMode::CollectAll
    }

    /// Capability probe against a plugin bundle.
    pub fn is_supported_by(&self, plugin: &dyn Plugin) -> bool {
        match self {
            ExtensionPoint::Detect(sense) => plugin.detector(*sense).is_some(),
            ExtensionPoint::Score => plugin.scorer().is_some(),
            ExtensionPoint::Act => plugin.action_handler().is_some(),
        }
    }
}

impl fmt::Display for ExtensionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
