//! HTTP adapter for the agent service
//!
//! Posts the composed prompt and consumes the newline-delimited stream of
//! response chunks, collecting assistant text. Cancellation is cooperative:
//! the read loop races each chunk against the cancel signal and drops the
//! connection when it fires.

use super::{AgentCallError, AgentInvoker, AgentRequest, CancelSignal};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Agent service adapter configuration.
#[derive(Debug, Clone)]
pub struct HttpAgentInvokerConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for HttpAgentInvokerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8790".to_string(),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Reqwest-backed agent invoker.
pub struct HttpAgentInvoker {
    config: HttpAgentInvokerConfig,
    client: Client,
}

impl HttpAgentInvoker {
    pub fn new(config: HttpAgentInvokerConfig) -> Result<Self, AgentCallError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AgentCallError::Network(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[derive(Debug, Serialize)]
struct RunRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_id: Option<i64>,
}

/// One streamed chunk. Unknown chunk types are skipped so the adapter
/// tolerates protocol additions.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RunChunk {
    Text { text: String },
    ToolUse { name: String },
    ToolResult {},
    Done {},
    #[serde(other)]
    Unknown,
}

#[async_trait]
impl AgentInvoker for HttpAgentInvoker {
    fn name(&self) -> &str {
        "http"
    }

    async fn invoke(
        &self,
        request: AgentRequest,
        cancel: CancelSignal,
    ) -> Result<Option<String>, AgentCallError> {
        let body = RunRequest {
            prompt: &request.prompt,
            task_id: request.task_id,
        };

        let send = self
            .client
            .post(format!("{}/v1/runs", self.config.base_url))
            .json(&body)
            .send();

        let response = tokio::select! {
            response = send => response.map_err(|e| AgentCallError::Network(e.to_string()))?,
            _ = cancel.cancelled() => return Err(AgentCallError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentCallError::Api(format!(
                "agent service error: {status} - {error_text}"
            )));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut collected = String::new();

        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                _ = cancel.cancelled() => return Err(AgentCallError::Cancelled),
            };

            let Some(chunk) = chunk else { break };
            let bytes = chunk.map_err(|e| AgentCallError::Network(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                consume_line(line.trim(), &mut collected);
            }
        }

        // Trailing line without a newline.
        let rest = buffer.trim();
        if !rest.is_empty() {
            consume_line(rest, &mut collected);
        }

        if collected.is_empty() {
            Ok(None)
        } else {
            Ok(Some(collected))
        }
    }
}

fn consume_line(line: &str, collected: &mut String) {
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<RunChunk>(line) {
        Ok(RunChunk::Text { text }) => collected.push_str(&text),
        Ok(RunChunk::ToolUse { name }) => debug!(tool = %name, "agent tool use"),
        Ok(RunChunk::ToolResult {}) | Ok(RunChunk::Done {}) | Ok(RunChunk::Unknown) => {}
        Err(e) => warn!(error = %e, "skipping malformed agent chunk"),
    }
}
