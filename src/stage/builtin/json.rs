//! JSON-extraction stage
//!
//! Agent output is noisy: the JSON we want is usually inside a fenced code
//! block surrounded by prose. Selection order, which decides between
//! competing candidate fragments:
//!
//! 1. fenced blocks (```json or bare ```), in order of appearance - first
//!    one whose trimmed interior parses wins
//! 2. the first greedy `{...}` match
//! 3. the first greedy `[...]` match
//! 4. the first quoted-string match
//! 5. the entire trimmed text
//!
//! If nothing parses, the input passes through unchanged. This stage never
//! fails.

use crate::stage::StageDefinition;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub fn definition() -> StageDefinition {
    StageDefinition::new(
        "json",
        Arc::new(|_args, data, _view| Box::pin(async move { Ok(extract_json(&data)) })),
    )
}

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```(?:json)?\s*\n([\s\S]*?)\n```").expect("fenced block pattern is valid")
});

static OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[\s\S]*\}").expect("object pattern is valid"));

static ARRAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[\s\S]*\]").expect("array pattern is valid"));

static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"]*)"(\s|$)"#).expect("quoted pattern is valid"));

/// Extract the first parseable JSON fragment from `input`, or return it
/// unchanged.
pub fn extract_json(input: &Value) -> Value {
    let text = match input {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("output") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return input.clone(),
        },
        _ => return input.clone(),
    };

    // Fenced blocks take priority, in order of appearance.
    for caps in FENCED_BLOCK.captures_iter(&text) {
        if let Ok(value) = serde_json::from_str::<Value>(caps[1].trim()) {
            return value;
        }
        debug!("fenced block did not parse; trying next");
    }

    // Raw fragments, in fixed order: object, array, quoted string.
    if let Some(m) = OBJECT.find(&text) {
        if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
            return value;
        }
    }
    if let Some(m) = ARRAY.find(&text) {
        if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
            return value;
        }
    }
    if let Some(caps) = QUOTED.captures(&text) {
        if let Ok(value) = serde_json::from_str::<Value>(&caps[1]) {
            return value;
        }
    }

    // Whole text as a last resort.
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return value;
    }

    debug!("no parseable JSON found; passing input through");
    input.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tagged_fenced_block() {
        let input = json!("```json\n{\"a\":1}\n```");
        assert_eq!(extract_json(&input), json!({"a": 1}));
    }

    #[test]
    fn test_untagged_fenced_block() {
        let input = json!("Here you go:\n```\n[1, 2, 3]\n```\nDone.");
        assert_eq!(extract_json(&input), json!([1, 2, 3]));
    }

    #[test]
    fn test_first_parseable_block_wins() {
        let input = json!("```\nnot json at all\n```\n```json\n{\"b\":2}\n```");
        assert_eq!(extract_json(&input), json!({"b": 2}));
    }

    #[test]
    fn test_output_field_is_scanned() {
        let input = json!({"output": "```json\n{\"c\":3}\n```", "input": "x"});
        assert_eq!(extract_json(&input), json!({"c": 3}));
    }

    #[test]
    fn test_raw_object_fallback() {
        let input = json!("The result is {\"d\": 4} as requested");
        assert_eq!(extract_json(&input), json!({"d": 4}));
    }

    #[test]
    fn test_raw_array_fallback() {
        let input = json!("Items: [\"x\", \"y\"] found");
        assert_eq!(extract_json(&input), json!(["x", "y"]));
    }

    #[test]
    fn test_whole_text_parse() {
        let input = json!("  \"just a string\"  ");
        assert_eq!(extract_json(&input), json!("just a string"));
    }

    #[test]
    fn test_no_json_passes_through() {
        let input = json!("no json here");
        assert_eq!(extract_json(&input), input);
    }

    #[test]
    fn test_non_string_without_output_passes_through() {
        let input = json!({"k": 1});
        assert_eq!(extract_json(&input), input);
        let input = json!(42);
        assert_eq!(extract_json(&input), input);
    }

    #[test]
    fn test_object_beats_array_when_both_present() {
        let input = json!("{\"first\": true} and then [1, 2]");
        assert_eq!(extract_json(&input), json!({"first": true}));
    }

    #[test]
    fn test_greedy_object_match() {
        // Greedy matching spans from the first `{` to the last `}`.
        let input = json!("{\"a\": {\"nested\": 1}}");
        assert_eq!(extract_json(&input), json!({"a": {"nested": 1}}));
    }
}
