//! Typed stage-argument expressions
//!
//! Configuration entries like `addTags('urgent', data.category)` carry
//! argument text. That text is parsed once at load time into a fixed
//! expression list - literals plus read-only `data` / `context` references
//! - and resolved against the live run at invocation time. Configuration
//! text is never evaluated as code; an identifier outside this grammar is
//! a load error.

use super::engine::SharedRunState;
use serde_json::Value;
use thiserror::Error;

/// One parsed argument expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgExpr {
    /// A literal string, number, boolean, or null.
    Literal(Value),
    /// `data`, or `data.path.to.field` (array indices allowed as segments).
    DataRef(Vec<String>),
    /// `context.taskId` - the run's bound task id.
    TaskIdRef,
    /// `context.task` - the cached task snapshot.
    TaskRef,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ArgParseError {
    #[error("unterminated string literal in '{0}'")]
    UnterminatedString(String),
    #[error("empty argument at position {0}")]
    EmptyArgument(usize),
    #[error(
        "unsupported expression '{0}'; expected a quoted string, number, boolean, null, \
         'data[.path]', 'context.taskId', or 'context.task'"
    )]
    Unsupported(String),
}

/// Parse comma-separated argument text into expressions.
pub fn parse_args(text: &str) -> Result<Vec<ArgExpr>, ArgParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let tokens = split_top_level(trimmed)?;
    let mut args = Vec::with_capacity(tokens.len());
    for (position, token) in tokens.iter().enumerate() {
        let token = token.trim();
        if token.is_empty() {
            return Err(ArgParseError::EmptyArgument(position));
        }
        args.push(parse_token(token)?);
    }
    Ok(args)
}

/// Split on commas outside string literals.
fn split_top_level(text: &str) -> Result<Vec<String>, ArgParseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in text.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                    current.push(c);
                } else if c == ',' {
                    tokens.push(std::mem::take(&mut current));
                } else {
                    current.push(c);
                }
            }
        }
    }

    if quote.is_some() {
        return Err(ArgParseError::UnterminatedString(text.to_string()));
    }
    tokens.push(current);
    Ok(tokens)
}

fn parse_token(token: &str) -> Result<ArgExpr, ArgParseError> {
    if let Some(literal) = parse_string_literal(token)? {
        return Ok(ArgExpr::Literal(Value::String(literal)));
    }

    match token {
        "true" => return Ok(ArgExpr::Literal(Value::Bool(true))),
        "false" => return Ok(ArgExpr::Literal(Value::Bool(false))),
        "null" => return Ok(ArgExpr::Literal(Value::Null)),
        "data" => return Ok(ArgExpr::DataRef(Vec::new())),
        "context.taskId" => return Ok(ArgExpr::TaskIdRef),
        "context.task" => return Ok(ArgExpr::TaskRef),
        _ => {}
    }

    if let Some(path) = token.strip_prefix("data.") {
        if !path.is_empty() && path.split('.').all(is_path_segment) {
            return Ok(ArgExpr::DataRef(
                path.split('.').map(str::to_string).collect(),
            ));
        }
        return Err(ArgParseError::Unsupported(token.to_string()));
    }

    // Numbers parse the way JSON numbers do.
    if let Ok(value) = serde_json::from_str::<Value>(token) {
        if value.is_number() {
            return Ok(ArgExpr::Literal(value));
        }
    }

    Err(ArgParseError::Unsupported(token.to_string()))
}

fn is_path_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A quoted token becomes its unescaped interior; anything else is `None`.
fn parse_string_literal(token: &str) -> Result<Option<String>, ArgParseError> {
    let mut chars = token.chars();
    let Some(quote @ ('\'' | '"')) = chars.next() else {
        return Ok(None);
    };

    let mut out = String::new();
    let mut escaped = false;
    let mut closed = false;
    for c in chars {
        if closed {
            // Trailing characters after the closing quote.
            return Err(ArgParseError::Unsupported(token.to_string()));
        }
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            closed = true;
        } else {
            out.push(c);
        }
    }

    if !closed {
        return Err(ArgParseError::UnterminatedString(token.to_string()));
    }
    Ok(Some(out))
}

/// Resolve parsed expressions against the current data value and run state.
pub async fn resolve_args(args: &[ArgExpr], data: &Value, run: &SharedRunState) -> Vec<Value> {
    let mut resolved = Vec::with_capacity(args.len());
    for arg in args {
        let value = match arg {
            ArgExpr::Literal(value) => value.clone(),
            ArgExpr::DataRef(path) => walk_path(data, path),
            ArgExpr::TaskIdRef => {
                let state = run.lock().await;
                state
                    .task_id()
                    .map(|id| Value::Number(id.into()))
                    .unwrap_or(Value::Null)
            }
            ArgExpr::TaskRef => {
                let state = run.lock().await;
                state
                    .task()
                    .and_then(|task| serde_json::to_value(task).ok())
                    .unwrap_or(Value::Null)
            }
        };
        resolved.push(value);
    }
    resolved
}

fn walk_path(data: &Value, path: &[String]) -> Value {
    let mut current = data;
    for segment in path {
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(value) => value,
                None => return Value::Null,
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(value) => value,
                None => return Value::Null,
            },
            _ => return Value::Null,
        };
    }
    current.clone()
}
