//! LLM agent collaborator
//!
//! The agent is external: the core hands it a composed prompt and collects
//! the streamed response text. Calls are cancellable - an interrupt signal
//! flips a [`CancelSignal`] that in-flight invocations observe
//! cooperatively.

mod http;
mod runner;

pub use http::{HttpAgentInvoker, HttpAgentInvokerConfig};
pub use runner::{run_agent, AgentRunError, AgentRunOptions};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

/// One agent invocation: the composed prompt plus the task binding the
/// response should be attributed to.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub task_id: Option<i64>,
}

/// Agent invocation errors.
#[derive(Debug, Clone, Error)]
pub enum AgentCallError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Agent API error: {0}")]
    Api(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invocation cancelled")]
    Cancelled,
}

/// Prompt in, streamed response out, cancellable.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Adapter name, for logs.
    fn name(&self) -> &str;

    /// Run the agent to completion, collecting any streamed text. `None`
    /// means the agent produced no textual output.
    async fn invoke(
        &self,
        request: AgentRequest,
        cancel: CancelSignal,
    ) -> Result<Option<String>, AgentCallError>;
}

/// Sender half of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Request cooperative cancellation of every associated signal.
    pub fn cancel(&self) {
        // Receivers observe the value; a closed channel also counts as
        // cancelled, so send errors are irrelevant.
        let _ = self.tx.send(true);
    }
}

/// Receiver half: cloneable, observed inside long-running calls.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
    // Keeps a never-fired channel open for `none()` signals.
    _keepalive: Option<std::sync::Arc<watch::Sender<bool>>>,
}

impl CancelSignal {
    /// A signal that never fires, for contexts without an interrupt source.
    pub fn none() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(std::sync::Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. If the handle is dropped
    /// without cancelling, this treats the run as cancelled too - a closed
    /// pair means the controlling process is gone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Create a connected cancellation pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle { tx },
        CancelSignal {
            rx,
            _keepalive: None,
        },
    )
}
