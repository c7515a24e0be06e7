//! Context lifecycle.

use crate::context::ExecutionContext;
use rhizome_plinth_core::{ContextId, HostCallbacks, LoadError, PluginDescriptor, RuntimeError};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tracing::info;

/// Live contexts keyed by id.
///
/// Ids come from a counter starting at 1 and are never handed out twice,
/// even when creation fails after the id was drawn.
pub struct ContextRegistry {
    next_id: u64,
    contexts: HashMap<ContextId, Rc<ExecutionContext>>,
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            contexts: HashMap::new(),
        }
    }

    /// Load a plugin into a new context.
    pub fn create(
        &mut self,
        descriptor: &PluginDescriptor,
        host: Arc<dyn HostCallbacks>,
    ) -> Result<ContextId, LoadError> {
        let id = ContextId::new(self.next_id);
        self.next_id += 1;

        let context = ExecutionContext::new(id, descriptor, host)?;
        self.contexts.insert(id, Rc::new(context));
        info!(
            context_id = %id,
            plugin = %descriptor.id,
            kind = %descriptor.kind,
            trust = %descriptor.trust,
            "context created"
        );
        Ok(id)
    }

    /// Drop a context. Returns whether it existed.
    ///
    /// Work already running against the context keeps its own handle and
    /// finishes; nothing new can reach it.
    pub fn remove(&mut self, id: ContextId) -> bool {
        let removed = self.contexts.remove(&id).is_some();
        if removed {
            info!(context_id = %id, "context deleted");
        }
        removed
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.contexts.contains_key(&id)
    }

    pub fn get(&self, id: ContextId) -> Result<Rc<ExecutionContext>, RuntimeError> {
        self.contexts
            .get(&id)
            .cloned()
            .ok_or(RuntimeError::UnknownContext(id))
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use rhizome_plinth_core::DispatchError;
    use serde_json::Value;

    struct NullHost;

    impl HostCallbacks for NullHost {
        fn dispatch(&self, _: ContextId, _: Vec<Value>) -> BoxFuture<'static, Result<(), DispatchError>> {
            Box::pin(async { Ok(()) })
        }
        fn log(&self, _: ContextId, _: Vec<Value>) {}
        fn quest(&self, _: ContextId, _: Vec<Value>) {}
    }

    fn plugin(source: &str) -> PluginDescriptor {
        PluginDescriptor::new("counter", source)
    }

    #[test]
    fn test_ids_are_monotonic_and_never_reused() {
        let mut registry = ContextRegistry::new();
        let good = "function update() end";

        let first = registry.create(&plugin(good), Arc::new(NullHost)).unwrap();
        assert_eq!(first, ContextId::new(1));
        assert!(registry.create(&plugin("not lua ("), Arc::new(NullHost)).is_err());
        assert!(registry.remove(first));

        let second = registry.create(&plugin(good), Arc::new(NullHost)).unwrap();
        assert_eq!(second, ContextId::new(3));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = ContextRegistry::new();
        let id = registry
            .create(&plugin("function update() end"), Arc::new(NullHost))
            .unwrap();

        assert!(registry.contains(id));
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(!registry.contains(id));
        assert!(registry.is_empty());
        assert!(matches!(registry.get(id), Err(RuntimeError::UnknownContext(missing)) if missing == id));
    }

    #[test]
    fn test_failed_load_creates_nothing() {
        let mut registry = ContextRegistry::new();
        let err = registry
            .create(&plugin("local nothing = true"), Arc::new(NullHost))
            .unwrap_err();
        assert_eq!(err, LoadError::MissingEntryPoint("counter".into()));
        assert!(registry.is_empty());
    }
}
