//! Per-run context handed to context-builder stages
//!
//! Exposes the current data value, a scratch state map local to the run,
//! the history so far, and helper operations that reach the external
//! collaborators: task creation and tag mutation against the task service,
//! prompt/agent-file invocation against the LLM agent, named action
//! execution, JSON extraction, and logging.
//!
//! Task bindings live in an explicit [`RunState`](super::RunState) record
//! shared with the engine, so a binding made here is visible to every
//! later stage of the same run (and, under pipeline scoping, to later
//! runs).

use super::engine::{RunError, Services, SharedRunState};
use crate::agent::{run_agent, AgentRunOptions};
use crate::stage::builtin::json::extract_json;
use crate::task::{NewTask, Task};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use tracing::info;

/// Mutable context for one stage invocation (context-builder shape).
#[derive(Clone)]
pub struct StageContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    data: StdMutex<Value>,
    state: StdMutex<Map<String, Value>>,
    history: Vec<Value>,
    run: SharedRunState,
    services: Services,
}

impl StageContext {
    pub(crate) fn new(
        data: Value,
        history: Vec<Value>,
        run: SharedRunState,
        services: Services,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                data: StdMutex::new(data),
                state: StdMutex::new(Map::new()),
                history,
                run,
                services,
            }),
        }
    }

    /// Current data value.
    pub fn data(&self) -> Value {
        self.inner
            .data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the current data value.
    pub fn set_data(&self, value: Value) {
        let mut data = self
            .inner
            .data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *data = value;
    }

    /// Read a scratch-state entry. State is local to one run and never
    /// persisted beyond it.
    pub fn state_get(&self, key: &str) -> Option<Value> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    /// Write a scratch-state entry.
    pub fn state_set(&self, key: impl Into<String>, value: Value) {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.insert(key.into(), value);
    }

    /// Data snapshots recorded before this stage; index 0 is the original
    /// event payload.
    pub fn history(&self) -> &[Value] {
        &self.inner.history
    }

    pub async fn task_id(&self) -> Option<i64> {
        self.inner.run.lock().await.task_id()
    }

    /// Cached snapshot of the bound task, if any.
    pub async fn task_snapshot(&self) -> Option<Task> {
        self.inner.run.lock().await.task().cloned()
    }

    /// Create a task in the task service and bind it to this run.
    pub async fn task(
        &self,
        name: &str,
        description: Option<&str>,
        tags: Option<Vec<String>>,
        icon: Option<&str>,
    ) -> Result<Task, RunError> {
        let project_path = std::env::current_dir()
            .ok()
            .map(|dir| dir.display().to_string());
        let new_task = NewTask {
            name: name.to_string(),
            description: description.map(str::to_string),
            tags,
            icon: icon.map(str::to_string),
            project_path,
        };

        let task = self.inner.services.tasks.create_task(new_task).await?;
        info!(task_id = task.id, task_name = %task.name, "task created and bound");
        self.inner.run.lock().await.bind(task.clone());
        Ok(task)
    }

    /// Run the agent with an inline prompt. Returns
    /// `{"output": <response>, "input": <current data>}` when the agent
    /// produced text, or the current data unchanged otherwise.
    pub async fn prompt(&self, prompt: impl Into<String>) -> Result<Value, RunError> {
        let options = AgentRunOptions {
            prompt: Some(prompt.into()),
            task_id: self.task_id().await,
            base_dir: Some(self.inner.services.base_dir.clone()),
            ..Default::default()
        };
        let response = run_agent(
            self.inner.services.agent.as_ref(),
            options,
            self.inner.services.cancel.clone(),
        )
        .await?;
        Ok(wrap_agent_output(response, self.data()))
    }

    /// Run the agent with a prompt file, optionally passing user input.
    pub async fn agent(
        &self,
        file: impl AsRef<Path>,
        input: Option<Value>,
    ) -> Result<Value, RunError> {
        let file = file.as_ref();
        let path = if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.inner.services.base_dir.join(file)
        };

        let user_input = input.map(|value| match value {
            Value::String(s) => s,
            other => other.to_string(),
        });

        let options = AgentRunOptions {
            file_path: Some(path),
            user_input,
            task_id: self.task_id().await,
            base_dir: Some(self.inner.services.base_dir.clone()),
            ..Default::default()
        };
        let response = run_agent(
            self.inner.services.agent.as_ref(),
            options,
            self.inner.services.cancel.clone(),
        )
        .await?;
        Ok(wrap_agent_output(response, self.data()))
    }

    /// Execute a named action against the task service. Without an
    /// explicit input, the current data is sent.
    pub async fn action(
        &self,
        action_id: &str,
        input: Option<Value>,
        settings: Option<Value>,
    ) -> Result<Value, RunError> {
        let input = input.unwrap_or_else(|| self.data());
        let task_id = self.task_id().await;
        let result = self
            .inner
            .services
            .tasks
            .execute_action(action_id, input, settings, task_id)
            .await?;
        Ok(result)
    }

    /// Extract JSON from the current data (see the `json` built-in stage
    /// for the selection order). Unparsable input comes back unchanged;
    /// this never fails.
    pub fn json(&self) -> Value {
        extract_json(&self.data())
    }

    /// Log the current data value.
    pub fn log(&self) {
        let data = self.data();
        let rendered = serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string());
        info!(data = %rendered, "pipeline data");
    }

    /// Add tags to the bound task. Fails with a precondition error when no
    /// task is bound, before any external call.
    pub async fn add_tags(&self, tags: &[&str]) -> Result<(), RunError> {
        self.mutate_tags("addTags", tags, TagOp::Add).await
    }

    /// Remove tags from the bound task; same precondition as `add_tags`.
    pub async fn remove_tags(&self, tags: &[&str]) -> Result<(), RunError> {
        self.mutate_tags("removeTags", tags, TagOp::Remove).await
    }

    async fn mutate_tags(&self, stage: &str, tags: &[&str], op: TagOp) -> Result<(), RunError> {
        let task_id = self
            .task_id()
            .await
            .ok_or_else(|| RunError::TaskPrecondition {
                stage: stage.to_string(),
            })?;

        if tags.is_empty() {
            return Err(RunError::InvalidArguments(format!(
                "{stage} requires at least one tag"
            )));
        }

        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        let tasks = &self.inner.services.tasks;
        match op {
            TagOp::Add => tasks.add_tags(task_id, &tags).await?,
            TagOp::Remove => tasks.remove_tags(task_id, &tags).await?,
        };

        // Keep the cached snapshot current.
        let task = tasks.get_task(task_id).await?;
        self.inner.run.lock().await.refresh(task);
        Ok(())
    }
}

enum TagOp {
    Add,
    Remove,
}

/// Wrap an agent response as `{"output", "input"}`, or pass the input
/// through when the agent produced no text.
pub(crate) fn wrap_agent_output(response: Option<String>, input: Value) -> Value {
    match response {
        Some(output) => serde_json::json!({ "output": output, "input": input }),
        None => input,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RunState;
    use crate::testing::mocks::{MockAgentInvoker, MockTaskApi};
    use serde_json::json;
    use tokio::sync::Mutex;

    fn context_with(tasks: Arc<MockTaskApi>, agent: Arc<MockAgentInvoker>) -> StageContext {
        let services = Services::new(tasks, agent);
        StageContext::new(
            json!({"n": 1}),
            vec![json!({"n": 1})],
            Arc::new(Mutex::new(RunState::default())),
            services,
        )
    }

    #[tokio::test]
    async fn test_task_creation_binds_run_state() {
        let tasks = Arc::new(MockTaskApi::new());
        let ctx = context_with(tasks, Arc::new(MockAgentInvoker::with_response("ok")));

        assert_eq!(ctx.task_id().await, None);
        let task = ctx.task("review", Some("look closely"), None, None).await.unwrap();
        assert_eq!(ctx.task_id().await, Some(task.id));
        assert_eq!(ctx.task_snapshot().await.map(|t| t.name), Some("review".to_string()));
    }

    #[tokio::test]
    async fn test_add_tags_without_task_is_precondition_error() {
        let ctx = context_with(
            Arc::new(MockTaskApi::new()),
            Arc::new(MockAgentInvoker::with_response("ok")),
        );

        let err = ctx.add_tags(&["urgent"]).await.unwrap_err();
        assert!(matches!(err, RunError::TaskPrecondition { .. }));
    }

    #[tokio::test]
    async fn test_add_tags_refreshes_snapshot() {
        let tasks = Arc::new(MockTaskApi::new());
        let ctx = context_with(tasks.clone(), Arc::new(MockAgentInvoker::with_response("ok")));

        ctx.task("tagged", None, None, None).await.unwrap();
        ctx.add_tags(&["urgent", "bug"]).await.unwrap();

        let snapshot = ctx.task_snapshot().await.unwrap();
        assert!(snapshot.tags.contains(&"urgent".to_string()));
        assert!(snapshot.tags.contains(&"bug".to_string()));
    }

    #[tokio::test]
    async fn test_prompt_wraps_output_with_input() {
        let ctx = context_with(
            Arc::new(MockTaskApi::new()),
            Arc::new(MockAgentInvoker::with_response("the answer")),
        );

        let result = ctx.prompt("ask something").await.unwrap();
        assert_eq!(result["output"], json!("the answer"));
        assert_eq!(result["input"], json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_prompt_passes_data_through_when_agent_silent() {
        let ctx = context_with(
            Arc::new(MockTaskApi::new()),
            Arc::new(MockAgentInvoker::silent()),
        );

        let result = ctx.prompt("ask something").await.unwrap();
        assert_eq!(result, json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_scratch_state_is_local() {
        let ctx = context_with(
            Arc::new(MockTaskApi::new()),
            Arc::new(MockAgentInvoker::with_response("ok")),
        );

        assert_eq!(ctx.state_get("seen"), None);
        ctx.state_set("seen", json!(true));
        assert_eq!(ctx.state_get("seen"), Some(json!(true)));
    }

    #[test]
    fn test_wrap_agent_output() {
        assert_eq!(
            wrap_agent_output(Some("hi".to_string()), json!(1)),
            json!({"output": "hi", "input": 1})
        );
        assert_eq!(wrap_agent_output(None, json!(1)), json!(1));
    }
}
