//! Stage registry and built-in stages
//!
//! The registry is an explicit value constructed at startup and passed by
//! handle into the loader - no process-wide singleton - so tests can build
//! isolated registries. It is read-only after startup by convention: the
//! loader only reads, and nothing registers after the pipeline is bound.

pub mod builtin;

use crate::pipeline::{RunError, StageView};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BuiltinFuture = Pin<Box<dyn Future<Output = Result<Value, RunError>> + Send>>;

/// Handler for a registered stage: resolved arguments, current data, and
/// the run view with service handles. Returns the next data value.
pub type BuiltinHandler = Arc<dyn Fn(Vec<Value>, Value, StageView) -> BuiltinFuture + Send + Sync>;

/// A registered stage plus its invocation metadata.
pub struct StageDefinition {
    pub name: String,
    pub handler: BuiltinHandler,
    /// Fail fast with a precondition error when no task is bound.
    pub requires_task: bool,
    /// Whether parenthesized argument text is accepted in configuration.
    pub accepts_args: bool,
}

impl StageDefinition {
    pub fn new(name: impl Into<String>, handler: BuiltinHandler) -> Self {
        Self {
            name: name.into(),
            handler,
            requires_task: false,
            accepts_args: false,
        }
    }

    pub fn requiring_task(mut self) -> Self {
        self.requires_task = true;
        self
    }

    pub fn accepting_args(mut self) -> Self {
        self.accepts_args = true;
        self
    }
}

/// Name -> stage definition lookup.
#[derive(Default)]
pub struct StageRegistry {
    stages: HashMap<String, Arc<StageDefinition>>,
}

impl StageRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in stages.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        builtin::register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, definition: StageDefinition) {
        self.stages
            .insert(definition.name.clone(), Arc::new(definition));
    }

    pub fn get(&self, name: &str) -> Option<Arc<StageDefinition>> {
        self.stages.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    /// Registered stage names, sorted for stable error messages.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stages.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_contents() {
        let registry = StageRegistry::builtin();
        assert_eq!(
            registry.names(),
            vec![
                "action", "addTags", "agent", "json", "log", "prompt", "removeTags"
            ]
        );
    }

    #[test]
    fn test_builtin_metadata() {
        let registry = StageRegistry::builtin();

        let add_tags = registry.get("addTags").unwrap();
        assert!(add_tags.requires_task);
        assert!(add_tags.accepts_args);

        let json = registry.get("json").unwrap();
        assert!(!json.requires_task);
        assert!(!json.accepts_args);

        let prompt = registry.get("prompt").unwrap();
        assert!(!prompt.requires_task);
        assert!(prompt.accepts_args);
    }

    #[test]
    fn test_isolated_registries() {
        let mut custom = StageRegistry::new();
        assert!(!custom.contains("json"));

        custom.register(StageDefinition::new(
            "noop",
            Arc::new(|_args, data, _view| Box::pin(async move { Ok(data) })),
        ));
        assert!(custom.contains("noop"));
        assert!(!StageRegistry::builtin().contains("noop"));
    }
}
