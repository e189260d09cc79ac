//! Marker rewriting for agent prompts
//!
//! Two inline marker syntaxes are rewritten into literal `Bash(...)`
//! invocation strings before a prompt is sent to the agent:
//!
//! `@{...}` markers (sub-invocations of the single-shot `ccrun` entry point):
//! - `@{"command"}` or `@{'command'}` -> `Bash(ccrun 'command' [--taskId x])`
//! - `@{filename}` -> `Bash(ccrun -f filename [--taskId x])`
//! - `@{filename "user input"}` -> `Bash(ccrun -f filename 'user input' [--taskId x])`
//!
//! `@[...]` markers (direct execution):
//! - `@[script.ts --arg v]` -> `Bash(npx tsx /abs/script.ts --arg v)`
//! - `@[script.js --arg v]` -> `Bash(node /abs/script.js --arg v)`
//! - `@[script.py --arg v]` -> `Bash(python3 /abs/script.py --arg v)`
//! - `@[echo "hello"]` -> `Bash(echo "hello")`
//!
//! Bracket markers are processed first, then brace markers against the
//! remaining text. Malformed markers (missing closer, mismatched quotes)
//! pass through byte-for-byte unchanged; this function never fails.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::path::{Path, PathBuf};

/// Options controlling a rewrite pass.
#[derive(Debug, Clone, Default)]
pub struct RewriteOptions {
    /// Task id appended to `ccrun` sub-invocations as `--taskId <id>`.
    pub task_id: Option<String>,
    /// Absolute path of the file the text came from; relative marker
    /// filenames resolve against its directory.
    pub current_file: Option<PathBuf>,
    /// Fallback resolution directory when no current file is known.
    /// With neither set, filenames are emitted as written.
    pub base_dir: Option<PathBuf>,
}

// One alternation per quote/shape combination; `regex` has no
// backreferences, so each quote character gets its own branch.
static BRACE_MARK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"@\{(?:"#,
        r#""((?:\\.|[^"\\])*)""#,              // 1: double-quoted direct command
        r#"|'((?:\\.|[^'\\])*)'"#,             // 2: single-quoted direct command
        r#"|([^}\s"']+)\s+"((?:\\.|[^"\\])*)""#, // 3,4: filename + double-quoted input
        r#"|([^}\s"']+)\s+'((?:\\.|[^'\\])*)'"#, // 5,6: filename + single-quoted input
        r#"|([^}\s"']+)"#,                     // 7: bare filename
        r#")\}"#,
    ))
    .expect("brace marker pattern is valid")
});

static BRACKET_MARK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@\[([^\]]+)\]").expect("bracket marker pattern is valid"));

static EXTENSION_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.\w+$").expect("extension pattern is valid"));

/// Rewrite all `@[...]` and `@{...}` markers in `text`.
pub fn rewrite_markers(text: &str, options: &RewriteOptions) -> String {
    let text = rewrite_brackets(text, options);
    rewrite_braces(&text, options)
}

fn rewrite_braces(text: &str, options: &RewriteOptions) -> String {
    BRACE_MARK
        .replace_all(text, |caps: &Captures<'_>| {
            let task_suffix = options
                .task_id
                .as_deref()
                .map(|id| format!(" --taskId {id}"))
                .unwrap_or_default();

            if let Some(direct) = caps.get(1).or_else(|| caps.get(2)) {
                // Direct command shape.
                let command = unescape_quotes(direct.as_str());
                format!("Bash(ccrun '{}'{task_suffix})", escape_for_shell(&command))
            } else if let (Some(filename), Some(input)) = (
                caps.get(3).or_else(|| caps.get(5)),
                caps.get(4).or_else(|| caps.get(6)),
            ) {
                // Filename + user input shape.
                let input = unescape_quotes(input.as_str());
                let path = resolve_file_path(filename.as_str(), options);
                format!(
                    "Bash(ccrun -f {path} '{}'{task_suffix})",
                    escape_for_shell(&input)
                )
            } else if let Some(filename) = caps.get(7) {
                // Bare filename shape.
                let path = resolve_file_path(filename.as_str(), options);
                format!("Bash(ccrun -f {path}{task_suffix})")
            } else {
                // Unreachable given the pattern; keep the match intact.
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn rewrite_brackets(text: &str, options: &RewriteOptions) -> String {
    BRACKET_MARK
        .replace_all(text, |caps: &Captures<'_>| {
            let trimmed = caps[1].trim();
            let (first, rest) = match trimmed.find(' ') {
                Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
                None => (trimmed, ""),
            };

            if !EXTENSION_LIKE.is_match(first) {
                // Not a file: the whole content is a literal command.
                return format!("Bash({trimmed})");
            }

            let path = resolve_file_path(first, options);
            let args = if rest.is_empty() {
                String::new()
            } else {
                format!(" {rest}")
            };

            let extension = Path::new(first)
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase)
                .unwrap_or_default();

            match interpreter_for(&extension) {
                Some(interpreter) => format!("Bash({interpreter} {path}{args})"),
                None => format!("Bash({path}{args})"),
            }
        })
        .into_owned()
}

/// Fixed extension -> interpreter table; unknown extensions execute the
/// resolved path directly.
fn interpreter_for(extension: &str) -> Option<&'static str> {
    match extension {
        "ts" => Some("npx tsx"),
        "js" => Some("node"),
        "py" => Some("python3"),
        _ => None,
    }
}

/// Remove backslash escapes from quote characters.
fn unescape_quotes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && matches!(chars.peek(), Some('"') | Some('\'')) {
            // Drop the backslash, keep the quote.
            continue;
        }
        out.push(c);
    }
    out
}

/// Escape single quotes for embedding in a single-quoted shell string:
/// each `'` becomes `'\''` (close, escaped quote, reopen).
fn escape_for_shell(s: &str) -> String {
    s.replace('\'', "'\\''")
}

fn resolve_file_path(filename: &str, options: &RewriteOptions) -> String {
    let path = Path::new(filename);
    if path.is_absolute() {
        return filename.to_string();
    }

    if let Some(current) = &options.current_file {
        if let Some(dir) = current.parent() {
            return dir.join(path).to_string_lossy().into_owned();
        }
    }

    if let Some(base) = &options.base_dir {
        return base.join(path).to_string_lossy().into_owned();
    }

    filename.to_string()
}
