//! Action-execution stage: `action('id' [, input [, settings]])`
//!
//! Executes a named action against the task service. Without an explicit
//! input argument the current data is sent. The stage advances with the
//! action's result.

use crate::pipeline::{RunError, StageView};
use crate::stage::StageDefinition;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub fn definition() -> StageDefinition {
    StageDefinition::new(
        "action",
        Arc::new(|args, data, view| Box::pin(run_action(args, data, view))),
    )
    .accepting_args()
}

async fn run_action(args: Vec<Value>, data: Value, view: StageView) -> Result<Value, RunError> {
    if args.is_empty() || args.len() > 3 {
        return Err(RunError::InvalidArguments(
            "action requires an action id and at most input and settings arguments".to_string(),
        ));
    }

    let action_id = match &args[0] {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let input = args.get(1).cloned().unwrap_or_else(|| data.clone());
    let settings = args.get(2).cloned();

    info!(action_id = %action_id, "executing action");

    let result = view
        .services()
        .tasks
        .execute_action(&action_id, input, settings, view.task_id)
        .await?;

    info!(action_id = %action_id, "action completed");
    Ok(result)
}
