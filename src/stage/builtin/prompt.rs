//! Prompt-invocation stage: `prompt('...')`
//!
//! Runs the agent with an inline prompt. When the agent returns text, the
//! stage advances with `{"output": <response>, "input": <data>}`;
//! otherwise the data passes through unchanged.

use crate::agent::{run_agent, AgentRunOptions};
use crate::pipeline::{wrap_agent_output, RunError, StageView};
use crate::stage::StageDefinition;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub fn definition() -> StageDefinition {
    StageDefinition::new(
        "prompt",
        Arc::new(|args, data, view| Box::pin(run_prompt(args, data, view))),
    )
    .accepting_args()
}

async fn run_prompt(args: Vec<Value>, data: Value, view: StageView) -> Result<Value, RunError> {
    if args.len() != 1 {
        return Err(RunError::InvalidArguments(
            "prompt requires exactly one argument".to_string(),
        ));
    }
    let Value::String(prompt) = &args[0] else {
        return Err(RunError::InvalidArguments(
            "prompt argument must be a string".to_string(),
        ));
    };

    info!(prompt = %truncate(prompt, 50), "running prompt stage");

    let services = view.services();
    let options = AgentRunOptions {
        prompt: Some(prompt.clone()),
        task_id: view.task_id,
        base_dir: Some(services.base_dir.clone()),
        ..Default::default()
    };
    let response = run_agent(services.agent.as_ref(), options, services.cancel.clone()).await?;
    Ok(wrap_agent_output(response, data))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
