//! Stage-list loading
//!
//! Resolves the ordered `run` configuration entries into bound [`Stage`]s.
//! Supported entry forms:
//!
//! - a registered stage name: `json`, `log`
//! - a registered stage name with argument text: `addTags('urgent')`
//! - an inline marker literal: `@{file.md}`, `@{"summarize *data"}`
//! - `ccrun(...)` / `cc(...)` sugar, desugared to the marker literal form
//!
//! Everything here fails before start: an entry that resolves to no
//! registered stage, malformed argument text, or a marker literal the
//! rewriter grammar rejects is a [`StageLoadError`].

use super::args::{parse_args, resolve_args, ArgExpr, ArgParseError};
use super::engine::{RunError, Stage, StageHandler, StageView};
use super::wrap_agent_output;
use crate::agent::{run_agent, AgentRunOptions};
use crate::stage::{StageDefinition, StageRegistry};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Errors resolving the stage list. All are fatal before start.
#[derive(Debug, Error)]
pub enum StageLoadError {
    #[error("unknown stage '{name}' (registered: {registered})")]
    UnknownStage { name: String, registered: String },

    #[error("stage '{name}' does not accept arguments")]
    UnexpectedArguments { name: String },

    #[error("invalid arguments for stage '{name}': {source}")]
    InvalidArguments {
        name: String,
        #[source]
        source: ArgParseError,
    },

    #[error("invalid marker literal '{entry}': {reason}")]
    InvalidMarker { entry: String, reason: String },
}

static CALL_SYNTAX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\w+)\s*\((.*)\)$").expect("call pattern is valid"));

/// Resolve configuration entries into bound stages.
pub fn load_pipeline(
    entries: &[String],
    registry: &StageRegistry,
) -> Result<Vec<Stage>, StageLoadError> {
    entries
        .iter()
        .map(|entry| load_entry(entry.trim(), registry))
        .collect()
}

fn load_entry(entry: &str, registry: &StageRegistry) -> Result<Stage, StageLoadError> {
    // Inline marker literal.
    if entry.starts_with("@{") && entry.ends_with('}') {
        let content = &entry[2..entry.len() - 1];
        return command_stage(entry, content);
    }

    if let Some(caps) = CALL_SYNTAX.captures(entry) {
        let name = &caps[1];
        let arg_text = caps[2].trim().to_string();

        if let Some(definition) = registry.get(name) {
            return stage_with_args(definition, name, &arg_text);
        }

        // `ccrun(...)` / `cc(...)` invoke the single-shot entry point with
        // the content as marker text.
        if name == "ccrun" || name == "cc" {
            return command_stage(entry, &arg_text);
        }

        return Err(unknown_stage(name, registry));
    }

    match registry.get(entry) {
        Some(definition) => stage_with_args(definition, entry, ""),
        None => Err(unknown_stage(entry, registry)),
    }
}

fn unknown_stage(name: &str, registry: &StageRegistry) -> StageLoadError {
    StageLoadError::UnknownStage {
        name: name.to_string(),
        registered: registry.names().join(", "),
    }
}

fn stage_with_args(
    definition: Arc<StageDefinition>,
    name: &str,
    arg_text: &str,
) -> Result<Stage, StageLoadError> {
    if !arg_text.is_empty() && !definition.accepts_args {
        return Err(StageLoadError::UnexpectedArguments {
            name: name.to_string(),
        });
    }

    let args = parse_args(arg_text).map_err(|source| StageLoadError::InvalidArguments {
        name: name.to_string(),
        source,
    })?;

    Ok(builtin_stage(definition, args))
}

/// Wrap a registry definition into a transform stage that resolves its
/// arguments against the live run and always advances with the handler's
/// result.
fn builtin_stage(definition: Arc<StageDefinition>, args: Vec<ArgExpr>) -> Stage {
    let name = definition.name.clone();
    let requires_task = definition.requires_task;

    Stage {
        name,
        requires_task,
        handler: StageHandler::Transform(Arc::new(move |data, next, view| {
            let definition = definition.clone();
            let args = args.clone();
            Box::pin(async move {
                let resolved = resolve_args(&args, &data, view.run_state()).await;
                let output = (definition.handler)(resolved, data, view).await?;
                next.advance(output);
                Ok(())
            })
        })),
    }
}

/// A parsed marker-literal stage: run the single-shot agent entry point in
/// file or direct-prompt mode, substituting `*data` with the current data.
#[derive(Debug, Clone)]
struct CommandSpec {
    file: Option<String>,
    parts: Vec<String>,
}

static COMMAND_PARTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[^\s"]+|"([^"]*)""#).expect("command parts pattern is valid"));

static FILE_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.\w+$").expect("file pattern is valid"));

impl CommandSpec {
    fn parse(content: &str) -> Result<Self, String> {
        let content = content.trim();
        if content.is_empty() {
            return Err("marker content is empty".to_string());
        }

        let mut parts = Vec::new();
        for caps in COMMAND_PARTS.captures_iter(content) {
            let part = caps
                .get(1)
                .map(|m| m.as_str())
                .unwrap_or_else(|| &caps[0]);
            parts.push(part.to_string());
        }
        if parts.is_empty() {
            return Err("marker content has no tokens".to_string());
        }

        if FILE_LIKE.is_match(&parts[0]) {
            Ok(Self {
                file: Some(parts[0].clone()),
                parts: parts[1..].to_vec(),
            })
        } else {
            Ok(Self { file: None, parts })
        }
    }

    async fn execute(&self, data: &Value, view: &StageView) -> Result<Value, RunError> {
        let processed: Vec<String> = self
            .parts
            .iter()
            .map(|part| substitute_data(part, data))
            .collect();
        let joined = processed.join(" ");

        let services = view.services();
        let options = match &self.file {
            Some(file) => {
                let path = std::path::Path::new(file);
                let resolved = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    services.base_dir.join(path)
                };
                AgentRunOptions {
                    file_path: Some(resolved),
                    user_input: (!joined.is_empty()).then_some(joined),
                    task_id: view.task_id,
                    base_dir: Some(services.base_dir.clone()),
                    ..Default::default()
                }
            }
            None => AgentRunOptions {
                prompt: Some(joined),
                task_id: view.task_id,
                base_dir: Some(services.base_dir.clone()),
                ..Default::default()
            },
        };

        let response =
            run_agent(services.agent.as_ref(), options, services.cancel.clone()).await?;
        Ok(wrap_agent_output(response, data.clone()))
    }
}

fn command_stage(entry: &str, content: &str) -> Result<Stage, StageLoadError> {
    let spec = CommandSpec::parse(content).map_err(|reason| StageLoadError::InvalidMarker {
        entry: entry.to_string(),
        reason,
    })?;

    let name = match &spec.file {
        Some(file) => format!("marker:{file}"),
        None => "marker".to_string(),
    };

    Ok(Stage::transform(name, move |data, next, view| {
        let spec = spec.clone();
        Box::pin(async move {
            let output = spec.execute(&data, &view).await?;
            next.advance(output);
            Ok(())
        })
    }))
}

/// Replace `*data` with the current data: the raw string when data is a
/// string, its JSON encoding otherwise.
fn substitute_data(part: &str, data: &Value) -> String {
    let rendered = match data {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if part == "*data" {
        rendered
    } else {
        part.replace("*data", &rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_load_builtin_names() {
        let registry = StageRegistry::builtin();
        let stages = load_pipeline(
            &["json".to_string(), "log".to_string()],
            &registry,
        )
        .unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].name, "json");
        assert!(!stages[0].requires_task);
    }

    #[test]
    fn test_load_builtin_with_args() {
        let registry = StageRegistry::builtin();
        let stages =
            load_pipeline(&["addTags('urgent', 'bug')".to_string()], &registry).unwrap();
        assert_eq!(stages[0].name, "addTags");
        assert!(stages[0].requires_task);
    }

    #[test]
    fn test_unknown_stage_is_load_error() {
        let registry = StageRegistry::builtin();
        let err = load_pipeline(&["stages/custom.js".to_string()], &registry).unwrap_err();
        assert!(matches!(err, StageLoadError::UnknownStage { .. }));
    }

    #[test]
    fn test_args_on_argless_stage_rejected() {
        let registry = StageRegistry::builtin();
        let err = load_pipeline(&["json('nope')".to_string()], &registry).unwrap_err();
        assert!(matches!(err, StageLoadError::UnexpectedArguments { .. }));
    }

    #[test]
    fn test_host_code_in_args_rejected_at_load() {
        let registry = StageRegistry::builtin();
        let err =
            load_pipeline(&["addTags(require('fs'))".to_string()], &registry).unwrap_err();
        assert!(matches!(err, StageLoadError::InvalidArguments { .. }));
    }

    #[test]
    fn test_marker_literal_file_mode() {
        let registry = StageRegistry::builtin();
        let stages = load_pipeline(&["@{process.md *data}".to_string()], &registry).unwrap();
        assert_eq!(stages[0].name, "marker:process.md");
    }

    #[test]
    fn test_marker_literal_direct_mode_and_sugar() {
        let registry = StageRegistry::builtin();
        let stages = load_pipeline(
            &[
                "@{\"summarize *data\"}".to_string(),
                "ccrun(report.md)".to_string(),
            ],
            &registry,
        )
        .unwrap();
        assert_eq!(stages[0].name, "marker");
        assert_eq!(stages[1].name, "marker:report.md");
    }

    #[test]
    fn test_empty_marker_is_load_error() {
        let registry = StageRegistry::builtin();
        let err = load_pipeline(&["@{}".to_string()], &registry).unwrap_err();
        assert!(matches!(err, StageLoadError::InvalidMarker { .. }));
    }

    #[test]
    fn test_command_spec_parsing() {
        let spec = CommandSpec::parse("process.md *data").unwrap();
        assert_eq!(spec.file.as_deref(), Some("process.md"));
        assert_eq!(spec.parts, vec!["*data".to_string()]);

        let spec = CommandSpec::parse(r#"summarize "two words" now"#).unwrap();
        assert!(spec.file.is_none());
        assert_eq!(spec.parts, vec!["summarize", "two words", "now"]);
    }

    #[test]
    fn test_substitute_data() {
        assert_eq!(substitute_data("*data", &json!("plain")), "plain");
        assert_eq!(
            substitute_data("*data", &json!({"a": 1})),
            r#"{"a":1}"#
        );
        assert_eq!(
            substitute_data("prefix-*data", &json!("x")),
            "prefix-x"
        );
        assert_eq!(substitute_data("literal", &json!("x")), "literal");
    }
}
