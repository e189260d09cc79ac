//! The pipeline engine
//!
//! Executes the bound stage sequence against one event. Two stage shapes
//! are dispatched through a single interface:
//!
//! - **Transform** stages receive `(data, continuation, view)` and must
//!   call `continuation.advance(new_data)` to move the run forward.
//! - **Context-builder** stages receive `(ctx, continuation)`, read and
//!   write `ctx` directly, and call the zero-argument
//!   `continuation.proceed()`.
//!
//! Both share one halting rule: a stage that never calls its continuation
//! stops the run after that stage - a supported filter/terminate outcome,
//! not an error. Calling the continuation more than once is a fatal defect
//! and aborts the run. A stage that returns an error aborts the run; the
//! engine never retries and never swallows the error - it propagates to
//! the trigger dispatch point, which logs it and keeps listening.

use crate::agent::{AgentInvoker, AgentRunError, CancelSignal};
use crate::config::TaskScope;
use crate::event::Event;
use crate::pipeline::context::StageContext;
use crate::task::{Task, TaskApi, TaskClientError};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Errors that abort a single run. The trigger source stays up.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("stage '{stage}' failed: {message}")]
    Stage { stage: String, message: String },

    #[error("stage '{stage}' requires a bound task; create one with task() first")]
    TaskPrecondition { stage: String },

    #[error("stage '{stage}' called its continuation {calls} times; at most one call is allowed")]
    ContinuationReused { stage: String, calls: usize },

    #[error("invalid stage arguments: {0}")]
    InvalidArguments(String),

    #[error("task service call failed: {0}")]
    Task(#[from] TaskClientError),

    #[error("agent invocation failed: {0}")]
    Agent(#[from] AgentRunError),
}

impl RunError {
    pub fn stage<S: Into<String>, M: Into<String>>(stage: S, message: M) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// External collaborators and run-wide settings handed to every stage.
#[derive(Clone)]
pub struct Services {
    pub tasks: Arc<dyn TaskApi>,
    pub agent: Arc<dyn AgentInvoker>,
    /// Cooperative cancellation observed by in-flight agent calls.
    pub cancel: CancelSignal,
    /// Directory stage files and marker filenames resolve against.
    pub base_dir: PathBuf,
}

impl Services {
    pub fn new(tasks: Arc<dyn TaskApi>, agent: Arc<dyn AgentInvoker>) -> Self {
        Self {
            tasks,
            agent,
            cancel: CancelSignal::none(),
            base_dir: PathBuf::from("."),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }
}

/// Per-run task binding. Once a task id is bound it is never cleared
/// implicitly; only `bind` (a task-creation stage) sets it.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    task_id: Option<i64>,
    task: Option<Task>,
}

impl RunState {
    pub fn task_id(&self) -> Option<i64> {
        self.task_id
    }

    pub fn task(&self) -> Option<&Task> {
        self.task.as_ref()
    }

    /// Bind a freshly created task to this run.
    pub fn bind(&mut self, task: Task) {
        self.task_id = Some(task.id);
        self.task = Some(task);
    }

    /// Update the cached snapshot of the bound task.
    pub fn refresh(&mut self, task: Task) {
        self.task = Some(task);
    }
}

pub type SharedRunState = Arc<Mutex<RunState>>;

/// What a transform stage sees: the run so far, the task binding, and
/// handles to the external collaborators.
#[derive(Clone)]
pub struct StageView {
    pub history: Vec<Value>,
    pub task_id: Option<i64>,
    pub task: Option<Task>,
    services: Services,
    run: SharedRunState,
}

impl StageView {
    pub fn services(&self) -> &Services {
        &self.services
    }

    pub(crate) fn run_state(&self) -> &SharedRunState {
        &self.run
    }
}

/// The explicit continuation handle. The engine inspects the call count
/// after the stage future resolves: zero calls halts the run, one call
/// advances it, more than one is a fatal defect.
#[derive(Clone)]
pub struct Continuation {
    inner: Arc<ContinuationInner>,
}

struct ContinuationInner {
    calls: AtomicUsize,
    value: StdMutex<Option<Value>>,
}

impl Continuation {
    fn new() -> Self {
        Self {
            inner: Arc::new(ContinuationInner {
                calls: AtomicUsize::new(0),
                value: StdMutex::new(None),
            }),
        }
    }

    /// Advance the run with a new data value (transform stages).
    pub fn advance(&self, data: Value) {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let mut slot = self
            .inner
            .value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(data);
    }

    /// Advance the run keeping the context's current data
    /// (context-builder stages).
    pub fn proceed(&self) {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn outcome(&self) -> Advance {
        match self.inner.calls.load(Ordering::SeqCst) {
            0 => Advance::Halted,
            1 => {
                let mut slot = self
                    .inner
                    .value
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                match slot.take() {
                    Some(value) => Advance::Value(value),
                    None => Advance::Proceed,
                }
            }
            calls => Advance::Reused(calls),
        }
    }
}

enum Advance {
    Halted,
    Value(Value),
    Proceed,
    Reused(usize),
}

pub type StageFuture = Pin<Box<dyn Future<Output = Result<(), RunError>> + Send>>;
pub type TransformFn = dyn Fn(Value, Continuation, StageView) -> StageFuture + Send + Sync;
pub type BuilderFn = dyn Fn(StageContext, Continuation) -> StageFuture + Send + Sync;

/// The two stage-invocation shapes, resolved at load time.
#[derive(Clone)]
pub enum StageHandler {
    Transform(Arc<TransformFn>),
    Builder(Arc<BuilderFn>),
}

/// One bound pipeline step.
#[derive(Clone)]
pub struct Stage {
    pub name: String,
    pub handler: StageHandler,
    /// Checked by the engine before the handler runs; stages flagged here
    /// fail fast with a precondition error when no task is bound.
    pub requires_task: bool,
}

impl Stage {
    pub fn transform<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, Continuation, StageView) -> StageFuture + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            handler: StageHandler::Transform(Arc::new(handler)),
            requires_task: false,
        }
    }

    pub fn builder<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StageContext, Continuation) -> StageFuture + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            handler: StageHandler::Builder(Arc::new(handler)),
            requires_task: false,
        }
    }

    pub fn requiring_task(mut self) -> Self {
        self.requires_task = true;
        self
    }
}

impl fmt::Debug for StageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageHandler::Transform(_) => f.write_str("Transform(..)"),
            StageHandler::Builder(_) => f.write_str("Builder(..)"),
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("handler", &self.handler)
            .field("requires_task", &self.requires_task)
            .finish()
    }
}

/// Result of one run that was not aborted by an error.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    /// Data snapshots; index 0 is the original event payload.
    pub history: Vec<Value>,
    pub completed_stages: usize,
    /// Name of the stage that declined to advance, when the run halted.
    pub halted_at: Option<String>,
}

impl RunOutcome {
    pub fn completed(&self) -> bool {
        self.halted_at.is_none()
    }
}

/// Executes the bound stage sequence against events.
pub struct Engine {
    stages: Vec<Stage>,
    services: Services,
    scope: TaskScope,
    /// Present only under `TaskScope::Pipeline`: one binding shared by
    /// every run of this engine instance.
    shared_run: Option<SharedRunState>,
}

impl Engine {
    pub fn new(stages: Vec<Stage>, services: Services, scope: TaskScope) -> Self {
        let shared_run = match scope {
            TaskScope::Pipeline => Some(Arc::new(Mutex::new(RunState::default()))),
            TaskScope::Run => None,
        };
        Self {
            stages,
            services,
            scope,
            shared_run,
        }
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn task_scope(&self) -> TaskScope {
        self.scope
    }

    fn run_state(&self) -> SharedRunState {
        match &self.shared_run {
            Some(shared) => shared.clone(),
            None => Arc::new(Mutex::new(RunState::default())),
        }
    }

    async fn view(&self, history: &[Value], run: &SharedRunState) -> StageView {
        let state = run.lock().await;
        StageView {
            history: history.to_vec(),
            task_id: state.task_id(),
            task: state.task().cloned(),
            services: self.services.clone(),
            run: run.clone(),
        }
    }

    /// Execute every stage in order against one event.
    pub async fn execute(&self, event: Event) -> Result<RunOutcome, RunError> {
        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            trigger = %event.trigger_name,
            source = %event.source,
            "run started"
        );

        let run = self.run_state();
        let mut data = event.payload;
        let mut history = vec![data.clone()];

        for (index, stage) in self.stages.iter().enumerate() {
            if stage.requires_task {
                let state = run.lock().await;
                if state.task_id().is_none() {
                    return Err(RunError::TaskPrecondition {
                        stage: stage.name.clone(),
                    });
                }
            }

            let next = Continuation::new();
            let mut builder_ctx = None;

            match &stage.handler {
                StageHandler::Transform(handler) => {
                    let view = self.view(&history, &run).await;
                    handler(data.clone(), next.clone(), view).await?;
                }
                StageHandler::Builder(handler) => {
                    let ctx = StageContext::new(
                        data.clone(),
                        history.clone(),
                        run.clone(),
                        self.services.clone(),
                    );
                    handler(ctx.clone(), next.clone()).await?;
                    builder_ctx = Some(ctx);
                }
            }

            match next.outcome() {
                Advance::Halted => {
                    info!(
                        %run_id,
                        stage = %stage.name,
                        completed_stages = index,
                        "stage did not advance; run halted"
                    );
                    return Ok(RunOutcome {
                        run_id,
                        history,
                        completed_stages: index,
                        halted_at: Some(stage.name.clone()),
                    });
                }
                Advance::Value(value) => data = value,
                Advance::Proceed => {
                    if let Some(ctx) = &builder_ctx {
                        data = ctx.data();
                    }
                }
                Advance::Reused(calls) => {
                    return Err(RunError::ContinuationReused {
                        stage: stage.name.clone(),
                        calls,
                    });
                }
            }

            history.push(data.clone());
        }

        info!(%run_id, stages = self.stages.len(), "run completed");
        Ok(RunOutcome {
            run_id,
            history,
            completed_stages: self.stages.len(),
            halted_at: None,
        })
    }
}
