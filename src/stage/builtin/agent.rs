//! Agent-file invocation stage: `agent('file.md' [, input])`
//!
//! Reads the prompt from a file (resolved against the configuration
//! directory), optionally appending user input, and runs the agent. The
//! response is wrapped the same way as the `prompt` stage.

use crate::agent::{run_agent, AgentRunOptions};
use crate::pipeline::{wrap_agent_output, RunError, StageView};
use crate::stage::StageDefinition;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub fn definition() -> StageDefinition {
    StageDefinition::new(
        "agent",
        Arc::new(|args, data, view| Box::pin(run_agent_file(args, data, view))),
    )
    .accepting_args()
}

async fn run_agent_file(args: Vec<Value>, data: Value, view: StageView) -> Result<Value, RunError> {
    if args.is_empty() || args.len() > 2 {
        return Err(RunError::InvalidArguments(
            "agent requires a file path and at most one input argument".to_string(),
        ));
    }
    let Value::String(file) = &args[0] else {
        return Err(RunError::InvalidArguments(
            "agent file path must be a string".to_string(),
        ));
    };

    let user_input = args.get(1).map(|value| match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });

    info!(file = %file, has_input = user_input.is_some(), "running agent stage");

    let services = view.services();
    let path = Path::new(file);
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        services.base_dir.join(path)
    };

    let options = AgentRunOptions {
        file_path: Some(resolved),
        user_input,
        task_id: view.task_id,
        base_dir: Some(services.base_dir.clone()),
        ..Default::default()
    };
    let response = run_agent(services.agent.as_ref(), options, services.cancel.clone()).await?;
    Ok(wrap_agent_output(response, data))
}
