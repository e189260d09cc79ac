//! Built-in stages
//!
//! Registered once at startup: JSON extraction, data logging, tag mutation
//! (requires a bound task), prompt and agent-file invocation, and named
//! action execution.

pub mod action;
pub mod agent;
pub mod json;
pub mod log;
pub mod prompt;
pub mod tags;

use super::StageRegistry;

/// Register all built-in stages.
pub fn register_builtins(registry: &mut StageRegistry) {
    registry.register(json::definition());
    registry.register(log::definition());
    registry.register(tags::add_tags_definition());
    registry.register(tags::remove_tags_definition());
    registry.register(prompt::definition());
    registry.register(agent::definition());
    registry.register(action::definition());
}
