//! Tag-mutation stages: `addTags(...)` and `removeTags(...)`
//!
//! Both require an already-bound task. The engine enforces the
//! precondition before the handler runs; the handlers check again so the
//! invariant holds for direct invocation too. The cached task snapshot is
//! refreshed after every successful mutation.

use crate::pipeline::{RunError, StageView};
use crate::stage::StageDefinition;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Copy)]
enum TagOp {
    Add,
    Remove,
}

impl TagOp {
    fn stage_name(self) -> &'static str {
        match self {
            TagOp::Add => "addTags",
            TagOp::Remove => "removeTags",
        }
    }
}

pub fn add_tags_definition() -> StageDefinition {
    definition_for(TagOp::Add)
}

pub fn remove_tags_definition() -> StageDefinition {
    definition_for(TagOp::Remove)
}

fn definition_for(op: TagOp) -> StageDefinition {
    StageDefinition::new(
        op.stage_name(),
        Arc::new(move |args, data, view| Box::pin(mutate_tags(op, args, data, view))),
    )
    .requiring_task()
    .accepting_args()
}

async fn mutate_tags(
    op: TagOp,
    args: Vec<Value>,
    data: Value,
    view: StageView,
) -> Result<Value, RunError> {
    let stage = op.stage_name();

    let task_id = view.task_id.ok_or_else(|| RunError::TaskPrecondition {
        stage: stage.to_string(),
    })?;

    if args.is_empty() {
        return Err(RunError::InvalidArguments(format!(
            "{stage} requires at least one tag argument"
        )));
    }

    let tags: Vec<String> = args.iter().map(value_to_tag).collect();
    info!(task_id, tags = %tags.join(", "), stage, "mutating task tags");

    let tasks = &view.services().tasks;
    match op {
        TagOp::Add => tasks.add_tags(task_id, &tags).await?,
        TagOp::Remove => tasks.remove_tags(task_id, &tags).await?,
    };

    // Keep the run's cached snapshot current.
    let task = tasks.get_task(task_id).await?;
    view.run_state().lock().await.refresh(task);

    // Tag mutation passes data through unchanged.
    Ok(data)
}

fn value_to_tag(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_to_tag_stringifies_non_strings() {
        assert_eq!(value_to_tag(&Value::String("urgent".to_string())), "urgent");
        assert_eq!(value_to_tag(&serde_json::json!(7)), "7");
        assert_eq!(value_to_tag(&serde_json::json!(true)), "true");
    }
}
