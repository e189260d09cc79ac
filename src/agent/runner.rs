//! Prompt composition and agent dispatch
//!
//! Mirrors what both the built-in `prompt`/`agent` stages and the
//! single-shot `ccrun` binary do before handing text to the invoker:
//! read the prompt file if one is given, wrap user input, rewrite markers,
//! and append the task-id note so sub-invocations stay attributed.

use super::{AgentCallError, AgentInvoker, AgentRequest, CancelSignal};
use crate::rewrite::{rewrite_markers, RewriteOptions};
use std::path::PathBuf;
use thiserror::Error;

/// What to run: an inline prompt, or a prompt file with optional user input.
#[derive(Debug, Clone, Default)]
pub struct AgentRunOptions {
    pub prompt: Option<String>,
    pub file_path: Option<PathBuf>,
    pub user_input: Option<String>,
    pub task_id: Option<i64>,
    /// Fallback directory for resolving relative marker filenames.
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum AgentRunError {
    #[error("No prompt provided")]
    NoPrompt,
    #[error("Failed to read prompt file {path}: {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Call(#[from] AgentCallError),
}

/// Compose the prompt and run the agent to completion.
///
/// Returns the collected response text, or `None` when the agent produced
/// no text output.
pub async fn run_agent(
    invoker: &dyn AgentInvoker,
    options: AgentRunOptions,
    cancel: CancelSignal,
) -> Result<Option<String>, AgentRunError> {
    let mut prompt = match &options.file_path {
        Some(path) => {
            let contents = tokio::fs::read_to_string(path).await.map_err(|source| {
                AgentRunError::FileRead {
                    path: path.display().to_string(),
                    source,
                }
            })?;
            match &options.user_input {
                Some(input) => format!("{contents}\n\n<userInput>{input}</userInput>"),
                None => contents,
            }
        }
        None => options.prompt.clone().ok_or(AgentRunError::NoPrompt)?,
    };

    let rewrite_options = RewriteOptions {
        task_id: options.task_id.map(|id| id.to_string()),
        current_file: options.file_path.clone(),
        base_dir: options.base_dir.clone(),
    };
    prompt = rewrite_markers(&prompt, &rewrite_options);

    if let Some(id) = options.task_id {
        prompt.push_str(&format!(
            "\n\n--\n\nNote: the current taskId is {id}. \
             Pass it along to any action you execute against the task service."
        ));
    }

    let request = AgentRequest {
        prompt,
        task_id: options.task_id,
    };
    Ok(invoker.invoke(request, cancel).await?)
}
