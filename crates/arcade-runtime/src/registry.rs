//! Behavior factory lookup.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use arcade_core::TemplateKey;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::behavior::SessionBehavior;

/// Builds a fresh behavior for one session.
pub type BehaviorFactory = Arc<dyn Fn() -> Box<dyn SessionBehavior> + Send + Sync>;

/// Maps template keys to behavior factories.
///
/// The orchestrator only reads from it, once per `start`.
pub trait Registry: Send + Sync {
    /// Factory registered under `key`.
    fn resolve_factory(&self, key: &TemplateKey) -> Option<BehaviorFactory>;

    /// Every registered key.
    fn list_keys(&self) -> BTreeSet<TemplateKey>;
}

/// In-memory [`Registry`].
#[derive(Default)]
pub struct BehaviorRegistry {
    factories: RwLock<HashMap<TemplateKey, BehaviorFactory>>,
}

impl BehaviorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `key`. Returns `true` if it replaced an
    /// existing factory.
    pub fn register<F, B>(&self, key: TemplateKey, factory: F) -> bool
    where
        F: Fn() -> B + Send + Sync + 'static,
        B: SessionBehavior + 'static,
    {
        let factory: BehaviorFactory = Arc::new(move || Box::new(factory()));
        let replaced = self.factories.write().insert(key.clone(), factory).is_some();
        if replaced {
            warn!(key = %key, "behavior already registered, replacing");
        } else {
            debug!(key = %key, "behavior registered");
        }
        replaced
    }

    /// Remove the factory under `key`.
    pub fn unregister(&self, key: &TemplateKey) -> bool {
        self.factories.write().remove(key).is_some()
    }

    /// Whether `key` has a factory.
    pub fn is_registered(&self, key: &TemplateKey) -> bool {
        self.factories.read().contains_key(key)
    }

    /// Number of registered factories.
    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }

    /// Drop every factory.
    pub fn clear(&self) {
        self.factories.write().clear();
    }
}

impl Registry for BehaviorRegistry {
    fn resolve_factory(&self, key: &TemplateKey) -> Option<BehaviorFactory> {
        self.factories.read().get(key).cloned()
    }

    fn list_keys(&self) -> BTreeSet<TemplateKey> {
        self.factories.read().keys().cloned().collect()
    }
}

impl std::fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorRegistry")
            .field("keys", &self.list_keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{BehaviorError, SessionContext};
    use arcade_core::logging::test_utils::capture_logs;

    struct Named(&'static str);

    impl SessionBehavior for Named {
        fn source_template(&self) -> &str {
            self.0
        }
        fn init(&mut self, _ctx: &SessionContext) -> Result<(), BehaviorError> {
            Ok(())
        }
        fn tick(&mut self, _ctx: &SessionContext) {}
        fn close(&mut self, _ctx: &SessionContext) -> Result<(), BehaviorError> {
            Ok(())
        }
    }

    fn key(s: &str) -> TemplateKey {
        s.parse().unwrap()
    }

    #[test]
    fn resolve_builds_fresh_behavior() {
        let registry = BehaviorRegistry::new();
        assert!(!registry.register(key("duel"), || Named("duel-map")));
        let factory = registry.resolve_factory(&key("arcade:duel")).unwrap();
        assert_eq!(factory().source_template(), "duel-map");
        assert!(registry.resolve_factory(&key("ctf")).is_none());
    }

    #[test]
    fn duplicate_register_warns_and_replaces() {
        let (logs, _guard) = capture_logs();
        let registry = BehaviorRegistry::new();
        let _ = registry.register(key("duel"), || Named("old"));
        assert!(registry.register(key("duel"), || Named("new")));
        assert!(logs.has_message("behavior already registered, replacing"));
        let factory = registry.resolve_factory(&key("duel")).unwrap();
        assert_eq!(factory().source_template(), "new");
    }

    #[test]
    fn unregister_and_clear() {
        let registry = BehaviorRegistry::new();
        let _ = registry.register(key("duel"), || Named("duel"));
        let _ = registry.register(key("spleef"), || Named("spleef"));
        assert_eq!(registry.len(), 2);
        assert!(registry.unregister(&key("duel")));
        assert!(!registry.is_registered(&key("duel")));
        assert_eq!(registry.list_keys(), BTreeSet::from([key("spleef")]));
        registry.clear();
        assert!(registry.is_empty());
    }
}
