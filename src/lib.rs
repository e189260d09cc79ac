//! ccrun - event-triggered automation engine
//!
//! External signals (a streaming HTTP feed, a cron schedule, or an inbound
//! webhook call) each spawn one run of a fixed, ordered sequence of
//! processing stages. Stages transform data, invoke an external LLM agent,
//! execute named actions against a task-tracking service, and manipulate a
//! per-run context (current value, scratch state, append-only history,
//! bound task reference).
//!
//! # Overview
//!
//! The crate is organized around four pieces:
//! - [`trigger`] - trigger sources that normalize external signals into
//!   [`event::Event`]s and invoke a callback once per signal
//! - [`pipeline`] - the engine that threads a mutable run context through
//!   the bound stage sequence, plus the stage-list loader
//! - [`stage`] - the stage registry and the built-in stages
//! - [`rewrite`] - the `@{...}` / `@[...]` marker rewriter used when
//!   composing agent prompts
//!
//! The task-tracking service ([`task`]) and the LLM agent ([`agent`]) are
//! external collaborators reached through trait seams so tests can inject
//! mocks.
//!
//! # Quick start
//!
//! ```rust
//! use ccrun::pipeline::{Engine, Services, Stage, TaskScope};
//! use ccrun::event::{Event, TriggerType};
//! use std::sync::Arc;
//!
//! # async fn demo(services: Services) -> Result<(), ccrun::pipeline::RunError> {
//! let double = Stage::transform("double", |data, next, _view| {
//!     Box::pin(async move {
//!         let n = data.as_i64().unwrap_or(0);
//!         next.advance(serde_json::json!(n * 2));
//!         Ok(())
//!     })
//! });
//!
//! let engine = Engine::new(vec![double], services, TaskScope::Run);
//! let event = Event::new(serde_json::json!(21), TriggerType::Webhook, "demo");
//! let outcome = engine.execute(event).await?;
//! assert_eq!(outcome.history.last(), Some(&serde_json::json!(42)));
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod event;
pub mod observability;
pub mod pipeline;
pub mod rewrite;
pub mod stage;
pub mod task;
pub mod testing;
pub mod trigger;
pub mod watcher;

pub use config::{Config, ConfigError, TriggerConfig, TriggerKind};
pub use event::{Event, TriggerType};
pub use pipeline::{Engine, RunError, RunOutcome, Services, TaskScope};
pub use rewrite::{rewrite_markers, RewriteOptions};
pub use stage::StageRegistry;
pub use trigger::{create_trigger, TriggerError, TriggerSource};
pub use watcher::Watcher;
