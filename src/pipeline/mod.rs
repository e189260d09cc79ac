//! Pipeline execution: engine, run context, stage-list loading
//!
//! A pipeline is an ordered, immutable (post-load) sequence of stages. For
//! each incoming event the engine threads a mutable run context through the
//! stages sequentially, recording every advanced value in an append-only
//! history.

mod args;
mod context;
mod engine;
mod loader;

pub use args::{parse_args, resolve_args, ArgExpr, ArgParseError};
pub use context::StageContext;
pub(crate) use context::wrap_agent_output;
pub use engine::{
    BuilderFn, Continuation, Engine, RunError, RunOutcome, RunState, Services, SharedRunState,
    Stage, StageFuture, StageHandler, StageView, TransformFn,
};
pub use loader::{load_pipeline, StageLoadError};

pub use crate::config::TaskScope;
