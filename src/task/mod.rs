//! Task-tracking service collaborator
//!
//! The task service owns and persists tasks; the engine only holds a
//! read-through cache of the bound task inside a run. All operations are
//! plain request/response; writes are never retried by the core.
//!
//! [`TaskApi`] is the seam the engine depends on; [`TaskClient`] is the
//! HTTP implementation. Tests inject mocks through the trait.

mod client;

pub use client::{TaskClient, TaskClientConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A work item tracked by the external task service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Fields for creating a task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewTask {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
}

impl NewTask {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Partial update applied to an existing task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// A named side-effecting action exposed by the task service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Task service errors.
#[derive(Debug, Clone, Error)]
pub enum TaskClientError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Task service error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Request/response contract with the task service.
#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn create_task(&self, new_task: NewTask) -> Result<Task, TaskClientError>;
    async fn get_task(&self, id: i64) -> Result<Task, TaskClientError>;
    async fn update_task(&self, id: i64, update: TaskUpdate) -> Result<Task, TaskClientError>;

    async fn set_tags(&self, id: i64, tags: &[String]) -> Result<Task, TaskClientError>;
    async fn add_tags(&self, id: i64, tags: &[String]) -> Result<Task, TaskClientError>;
    async fn remove_tags(&self, id: i64, tags: &[String]) -> Result<Task, TaskClientError>;

    async fn get_active_task(&self) -> Result<Option<Task>, TaskClientError>;
    async fn set_active_task(&self, id: i64) -> Result<(), TaskClientError>;
    async fn clear_active_task(&self) -> Result<(), TaskClientError>;

    async fn list_actions(&self, category: Option<&str>)
        -> Result<Vec<ActionInfo>, TaskClientError>;
    async fn get_action(&self, id: &str) -> Result<ActionInfo, TaskClientError>;
    async fn execute_action(
        &self,
        id: &str,
        input: Value,
        settings: Option<Value>,
        task_id: Option<i64>,
    ) -> Result<Value, TaskClientError>;
}
