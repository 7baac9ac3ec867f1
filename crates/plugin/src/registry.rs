//! Hook registry: plugin name → bundle, in registration order.
//!
//! Each pipeline owns its own registry instance, so several pipelines
//! (and tests) can coexist in one process. Uses `std::sync::RwLock` with
//! short critical sections; dispatch works on a cloned snapshot and never
//! holds the lock across an await.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::info;

use crate::error::PluginError;
use crate::extension::ExtensionPoint;
use crate::traits::Plugin;

/// A registered bundle with the capabilities probed at registration.
#[derive(Clone)]
pub(crate) struct RegisteredPlugin {
    pub(crate) name: String,
    pub(crate) plugin: Arc<dyn Plugin>,
    pub(crate) capabilities: Vec<ExtensionPoint>,
}

/// Public view of one registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: String,
    pub capabilities: Vec<ExtensionPoint>,
}

#[derive(Default)]
pub struct HookRegistry {
    entries: RwLock<Vec<RegisteredPlugin>>,
}

impl HookRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<RegisteredPlugin>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<RegisteredPlugin>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a bundle under a unique name.
    ///
    /// Partial implementations are fine: a bundle with no capabilities at
    /// all is accepted and simply never dispatched to.
    pub fn register(&self, name: impl Into<String>, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PluginError::Argument("plugin name must not be empty".into()));
        }

        let capabilities: Vec<ExtensionPoint> = ExtensionPoint::ALL
            .into_iter()
            .filter(|point| point.is_supported_by(plugin.as_ref()))
            .collect();

        let mut entries = self.write();
        if entries.iter().any(|e| e.name == name) {
            return Err(PluginError::DuplicateName(name));
        }

        info!(
            plugin = %name,
            capabilities = ?capabilities.iter().map(|c| c.name()).collect::<Vec<_>>(),
            "plugin registered"
        );
        entries.push(RegisteredPlugin {
            name,
            plugin,
            capabilities,
        });
        Ok(())
    }

    /// Convenience wrapper for owned plugin values.
    pub fn register_plugin<P: Plugin>(&self, name: impl Into<String>, plugin: P) -> Result<(), PluginError> {
        self.register(name, Arc::new(plugin))
    }

    /// Remove the bundle registered as `name`. Dispatches already under way
    /// keep their snapshot and still call it.
    pub fn unregister(&self, name: &str) -> Result<(), PluginError> {
        let mut entries = self.write();
        let idx = entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        entries.remove(idx);
        info!(plugin = %name, "plugin unregistered");
        Ok(())
    }

    /// Plugin names in registration order.
    pub fn list(&self) -> Vec<String> {
        self.read().iter().map(|e| e.name.clone()).collect()
    }

    /// Names plus probed capabilities, in registration order.
    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.read()
            .iter()
            .map(|e| PluginInfo {
                name: e.name.clone(),
                capabilities: e.capabilities.clone(),
            })
            .collect()
    }

    /// Whether a bundle is registered as `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.read().iter().any(|e| e.name == name)
    }

    /// Number of registered bundles, whatever their capabilities.
    pub fn plugin_count(&self) -> usize {
        self.read().len()
    }

    /// Number of plugins currently able to service `point`.
    pub fn count_for(&self, point: ExtensionPoint) -> usize {
        self.read()
            .iter()
            .filter(|e| e.capabilities.contains(&point))
            .count()
    }

    /// Snapshot of the plugins servicing `point`, in registration order.
    pub(crate) fn handlers_for(&self, point: ExtensionPoint) -> Vec<RegisteredPlugin> {
        self.read()
            .iter()
            .filter(|e| e.capabilities.contains(&point))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reaper_core::{ScoredSignal, SenseType, Signal};

    use crate::traits::{Detector, HandlerError, Scorer};

    struct Empty;
    impl Plugin for Empty {}

    struct SightOnly;

    #[async_trait]
    impl Detector for SightOnly {
        async fn detect(&self, sense: SenseType, source: &str) -> Result<Vec<Signal>, HandlerError> {
            Ok(vec![Signal::new(sense, source)?])
        }
    }

    impl Plugin for SightOnly {
        fn detector(&self, sense: SenseType) -> Option<&dyn Detector> {
            (sense == SenseType::Sight).then_some(self as &dyn Detector)
        }
    }

    struct Both;

    #[async_trait]
    impl Detector for Both {
        async fn detect(&self, sense: SenseType, source: &str) -> Result<Vec<Signal>, HandlerError> {
            Ok(vec![Signal::new(sense, source)?])
        }
    }

    #[async_trait]
    impl Scorer for Both {
        async fn score(&self, signal: &Signal) -> Result<ScoredSignal, HandlerError> {
            Ok(ScoredSignal::new(signal.clone(), 0.5)?)
        }
    }

    impl Plugin for Both {
        fn detector(&self, _sense: SenseType) -> Option<&dyn Detector> {
            Some(self)
        }
        fn scorer(&self) -> Option<&dyn Scorer> {
            Some(self)
        }
    }

    #[test]
    fn register_and_list_in_order() {
        let registry = HookRegistry::new();
        registry.register_plugin("b", Empty).unwrap();
        registry.register_plugin("a", Empty).unwrap();
        registry.register_plugin("c", Empty).unwrap();
        assert_eq!(registry.list(), vec!["b", "a", "c"]);
        assert_eq!(registry.list(), registry.list());
        assert_eq!(registry.plugin_count(), 3);
    }

    #[test]
    fn duplicate_name_rejected() {
        let registry = HookRegistry::new();
        registry.register_plugin("dup", Empty).unwrap();
        let err = registry.register_plugin("dup", SightOnly).unwrap_err();
        assert!(matches!(err, PluginError::DuplicateName(ref n) if n == "dup"));
        assert_eq!(registry.plugin_count(), 1);
    }

    #[test]
    fn empty_name_rejected() {
        let registry = HookRegistry::new();
        assert!(matches!(
            registry.register_plugin("", Empty),
            Err(PluginError::Argument(_))
        ));
    }

    #[test]
    fn unregister_unknown_fails() {
        let registry = HookRegistry::new();
        assert!(matches!(
            registry.unregister("ghost"),
            Err(PluginError::NotFound(_))
        ));
    }

    #[test]
    fn unregister_removes_and_keeps_order() {
        let registry = HookRegistry::new();
        registry.register_plugin("one", Empty).unwrap();
        registry.register_plugin("two", Empty).unwrap();
        registry.register_plugin("three", Empty).unwrap();
        registry.unregister("two").unwrap();
        assert_eq!(registry.list(), vec!["one", "three"]);
        assert!(!registry.contains("two"));
        // Name is free again.
        registry.register_plugin("two", Empty).unwrap();
        assert_eq!(registry.list(), vec!["one", "three", "two"]);
    }

    #[test]
    fn capabilities_are_probed() {
        let registry = HookRegistry::new();
        registry.register_plugin("empty", Empty).unwrap();
        registry.register_plugin("sight", SightOnly).unwrap();
        registry.register_plugin("both", Both).unwrap();

        assert_eq!(registry.count_for(ExtensionPoint::Detect(SenseType::Sight)), 2);
        assert_eq!(registry.count_for(ExtensionPoint::Detect(SenseType::Smell)), 1);
        assert_eq!(registry.count_for(ExtensionPoint::Score), 1);
        assert_eq!(registry.count_for(ExtensionPoint::Act), 0);

        let infos = registry.list_plugins();
        assert!(infos[0].capabilities.is_empty());
        assert_eq!(infos[1].capabilities, vec![ExtensionPoint::Detect(SenseType::Sight)]);
        assert_eq!(infos[2].capabilities.len(), 6);
    }
}
