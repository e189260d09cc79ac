//! HTTP implementation of the task service contract

use super::{ActionInfo, NewTask, Task, TaskApi, TaskClientError, TaskUpdate};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;

/// Task client configuration.
#[derive(Debug, Clone)]
pub struct TaskClientConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for TaskClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Reqwest-backed task service client.
pub struct TaskClient {
    config: TaskClientConfig,
    client: Client,
}

impl TaskClient {
    pub fn new(config: TaskClientConfig) -> Result<Self, TaskClientError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TaskClientError::Network(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, TaskClientError> {
        Self::new(TaskClientConfig {
            base_url: base_url.into(),
            ..Default::default()
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<T, TaskClientError> {
        let url = format!("{}{endpoint}", self.config.base_url);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TaskClientError::Network(e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| TaskClientError::InvalidResponse(e.to_string()))?;

        if !status.is_success() {
            let message = payload
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(TaskClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_value(payload).map_err(|e| TaskClientError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl TaskApi for TaskClient {
    async fn create_task(&self, new_task: NewTask) -> Result<Task, TaskClientError> {
        let body = serde_json::to_value(&new_task)
            .map_err(|e| TaskClientError::InvalidResponse(e.to_string()))?;
        self.request(Method::POST, "/api/tasks", Some(body)).await
    }

    async fn get_task(&self, id: i64) -> Result<Task, TaskClientError> {
        self.request(Method::GET, &format!("/api/tasks/{id}"), None)
            .await
    }

    async fn update_task(&self, id: i64, update: TaskUpdate) -> Result<Task, TaskClientError> {
        let body = serde_json::to_value(&update)
            .map_err(|e| TaskClientError::InvalidResponse(e.to_string()))?;
        self.request(Method::PUT, &format!("/api/tasks/{id}"), Some(body))
            .await
    }

    async fn set_tags(&self, id: i64, tags: &[String]) -> Result<Task, TaskClientError> {
        self.request(
            Method::PUT,
            &format!("/api/tasks/{id}/tags"),
            Some(json!({ "tags": tags })),
        )
        .await
    }

    async fn add_tags(&self, id: i64, tags: &[String]) -> Result<Task, TaskClientError> {
        self.request(
            Method::POST,
            &format!("/api/tasks/{id}/tags/add"),
            Some(json!({ "tags": tags })),
        )
        .await
    }

    async fn remove_tags(&self, id: i64, tags: &[String]) -> Result<Task, TaskClientError> {
        self.request(
            Method::POST,
            &format!("/api/tasks/{id}/tags/remove"),
            Some(json!({ "tags": tags })),
        )
        .await
    }

    async fn get_active_task(&self) -> Result<Option<Task>, TaskClientError> {
        match self
            .request::<Task>(Method::GET, "/api/active-task", None)
            .await
        {
            Ok(task) => Ok(Some(task)),
            Err(TaskClientError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set_active_task(&self, id: i64) -> Result<(), TaskClientError> {
        self.request::<Value>(Method::POST, "/api/active-task", Some(json!({ "taskId": id })))
            .await
            .map(|_| ())
    }

    async fn clear_active_task(&self) -> Result<(), TaskClientError> {
        self.request::<Value>(Method::DELETE, "/api/active-task", None)
            .await
            .map(|_| ())
    }

    async fn list_actions(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<ActionInfo>, TaskClientError> {
        let endpoint = match category {
            Some(category) => format!(
                "/api/actions-info?category={}",
                urlencode(category)
            ),
            None => "/api/actions-info".to_string(),
        };
        self.request(Method::GET, &endpoint, None).await
    }

    async fn get_action(&self, id: &str) -> Result<ActionInfo, TaskClientError> {
        self.request(Method::GET, &format!("/api/actions/{id}"), None)
            .await
    }

    async fn execute_action(
        &self,
        id: &str,
        input: Value,
        settings: Option<Value>,
        task_id: Option<i64>,
    ) -> Result<Value, TaskClientError> {
        let mut body = json!({ "input": input });
        if let Some(settings) = settings {
            body["settings"] = settings;
        }
        if let Some(task_id) = task_id {
            body["taskId"] = json!(task_id);
        }
        self.request(
            Method::POST,
            &format!("/api/actions/{id}/execute"),
            Some(body),
        )
        .await
    }
}

/// Minimal percent-encoding for query values.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
