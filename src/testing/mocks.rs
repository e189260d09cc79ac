//! Mock implementations for testing
//!
//! In-memory `TaskApi` and `AgentInvoker` implementations that capture
//! calls, so pipeline behavior can be asserted without a task service or
//! an agent process.

use crate::agent::{AgentCallError, AgentInvoker, AgentRequest, CancelSignal};
use crate::task::{ActionInfo, NewTask, Task, TaskApi, TaskClientError, TaskUpdate};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// In-memory task service.
#[derive(Default)]
pub struct MockTaskApi {
    next_id: AtomicI64,
    tasks: Mutex<HashMap<i64, Task>>,
    active: Mutex<Option<i64>>,
    pub executed_actions: Mutex<Vec<(String, Value, Option<i64>)>>,
    /// When set, every call fails with this message.
    fail_with: Option<String>,
}

impl MockTaskApi {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            next_id: AtomicI64::new(1),
            fail_with: Some(message.into()),
            ..Default::default()
        }
    }

    pub async fn task_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn recorded_actions(&self) -> Vec<(String, Value, Option<i64>)> {
        self.executed_actions.lock().await.clone()
    }

    fn check_failure(&self) -> Result<(), TaskClientError> {
        match &self.fail_with {
            Some(message) => Err(TaskClientError::Api {
                status: 500,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn require_task(&self, id: i64) -> Result<Task, TaskClientError> {
        self.tasks
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(TaskClientError::Api {
                status: 404,
                message: format!("task {id} not found"),
            })
    }
}

#[async_trait]
impl TaskApi for MockTaskApi {
    async fn create_task(&self, new_task: NewTask) -> Result<Task, TaskClientError> {
        self.check_failure()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let task = Task {
            id,
            name: new_task.name,
            description: new_task.description,
            tags: new_task.tags.unwrap_or_default(),
        };
        self.tasks.lock().await.insert(id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: i64) -> Result<Task, TaskClientError> {
        self.check_failure()?;
        self.require_task(id).await
    }

    async fn update_task(&self, id: i64, update: TaskUpdate) -> Result<Task, TaskClientError> {
        self.check_failure()?;
        let mut tasks = self.tasks.lock().await;
        let task = tasks.get_mut(&id).ok_or(TaskClientError::Api {
            status: 404,
            message: format!("task {id} not found"),
        })?;
        if let Some(name) = update.name {
            task.name = name;
        }
        if let Some(description) = update.description {
            task.description = Some(description);
        }
        Ok(task.clone())
    }

    async fn set_tags(&self, id: i64, tags: &[String]) -> Result<Task, TaskClientError> {
        self.check_failure()?;
        let mut tasks = self.tasks.lock().await;
        let task = tasks.get_mut(&id).ok_or(TaskClientError::Api {
            status: 404,
            message: format!("task {id} not found"),
        })?;
        task.tags = tags.to_vec();
        Ok(task.clone())
    }

    async fn add_tags(&self, id: i64, tags: &[String]) -> Result<Task, TaskClientError> {
        self.check_failure()?;
        let mut tasks = self.tasks.lock().await;
        let task = tasks.get_mut(&id).ok_or(TaskClientError::Api {
            status: 404,
            message: format!("task {id} not found"),
        })?;
        for tag in tags {
            if !task.tags.contains(tag) {
                task.tags.push(tag.clone());
            }
        }
        Ok(task.clone())
    }

    async fn remove_tags(&self, id: i64, tags: &[String]) -> Result<Task, TaskClientError> {
        self.check_failure()?;
        let mut tasks = self.tasks.lock().await;
        let task = tasks.get_mut(&id).ok_or(TaskClientError::Api {
            status: 404,
            message: format!("task {id} not found"),
        })?;
        task.tags.retain(|tag| !tags.contains(tag));
        Ok(task.clone())
    }

    async fn get_active_task(&self) -> Result<Option<Task>, TaskClientError> {
        self.check_failure()?;
        let active = *self.active.lock().await;
        match active {
            Some(id) => Ok(Some(self.require_task(id).await?)),
            None => Ok(None),
        }
    }

    async fn set_active_task(&self, id: i64) -> Result<(), TaskClientError> {
        self.check_failure()?;
        self.require_task(id).await?;
        *self.active.lock().await = Some(id);
        Ok(())
    }

    async fn clear_active_task(&self) -> Result<(), TaskClientError> {
        self.check_failure()?;
        *self.active.lock().await = None;
        Ok(())
    }

    async fn list_actions(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<ActionInfo>, TaskClientError> {
        self.check_failure()?;
        let all = vec![ActionInfo {
            id: "echo".to_string(),
            name: Some("Echo".to_string()),
            category: Some("test".to_string()),
            description: None,
        }];
        Ok(match category {
            Some(category) => all
                .into_iter()
                .filter(|a| a.category.as_deref() == Some(category))
                .collect(),
            None => all,
        })
    }

    async fn get_action(&self, id: &str) -> Result<ActionInfo, TaskClientError> {
        self.check_failure()?;
        Ok(ActionInfo {
            id: id.to_string(),
            name: None,
            category: None,
            description: None,
        })
    }

    async fn execute_action(
        &self,
        id: &str,
        input: Value,
        _settings: Option<Value>,
        task_id: Option<i64>,
    ) -> Result<Value, TaskClientError> {
        self.check_failure()?;
        self.executed_actions
            .lock()
            .await
            .push((id.to_string(), input.clone(), task_id));
        Ok(json!({ "action": id, "echoed": input }))
    }
}

/// Scripted agent invoker.
#[derive(Default)]
pub struct MockAgentInvoker {
    response: Option<String>,
    /// When set, `invoke` fails with this error.
    fail_with: Option<AgentCallError>,
    /// Artificial latency, for cancellation tests.
    delay: Option<Duration>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockAgentInvoker {
    /// Always responds with the given text.
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
            ..Default::default()
        }
    }

    /// Produces no text output (the pass-through case).
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn failing(error: AgentCallError) -> Self {
        Self {
            fail_with: Some(error),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Prompts received so far, in order.
    pub async fn recorded_prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl AgentInvoker for MockAgentInvoker {
    fn name(&self) -> &str {
        "mock"
    }

    async fn invoke(
        &self,
        request: AgentRequest,
        cancel: CancelSignal,
    ) -> Result<Option<String>, AgentCallError> {
        self.prompts.lock().await.push(request.prompt);

        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(AgentCallError::Cancelled),
            }
        }

        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        Ok(self.response.clone())
    }
}
