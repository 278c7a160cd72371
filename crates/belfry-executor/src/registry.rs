use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::handler::JobHandler;

/// Name → handler lookup table, shared across the worker pool.
///
/// Cheaply cloneable via Arc; registration normally happens once at startup
/// before the engine starts, but late registration is safe.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn JobHandler>) {
        let name = handler.name().to_string();
        debug!(handler = %name, "handler registered");
        self.handlers.insert(name, handler);
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Used by the job-creation path to fail fast on unknown handler names.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerContext;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        async fn run(&self, _ctx: HandlerContext) -> Result<(), belfry_core::BelfryError> {
            Ok(())
        }
    }

    #[test]
    fn register_and_lookup() {
        let registry = HandlerRegistry::new();
        assert!(!registry.contains("noop"));

        registry.register(Arc::new(Noop));
        assert!(registry.contains("noop"));
        assert!(registry.lookup("noop").is_some());
        assert!(registry.lookup("ghost").is_none());
    }
}
