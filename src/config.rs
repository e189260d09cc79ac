//! Configuration for the watcher: trigger definition, stage list, and
//! external service endpoints
//!
//! Loaded from a TOML file. Validation catches what can be caught without
//! touching the network: required fields, a parseable stream URL, a sane
//! webhook path. Schedule expressions are validated by the schedule trigger
//! itself at `start()`, before any timer is armed.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub trigger: TriggerConfig,
    /// Ordered stage list; each entry is a registered stage name, a stage
    /// name with parenthesized argument text, or an inline marker literal.
    #[serde(default)]
    pub run: Vec<String>,
    #[serde(default)]
    pub tasks: TaskServiceConfig,
    #[serde(default)]
    pub agent: AgentServiceConfig,
    /// Whether a bound task id is scoped to one run or shared by every run
    /// of this pipeline instance.
    #[serde(default)]
    pub task_scope: TaskScope,
    /// Directory the config file was loaded from; stage files and marker
    /// filenames resolve relative to it. Not part of the file itself.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Trigger definition: common metadata plus the type-specific section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: TriggerKind,
}

/// Type-specific trigger settings, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TriggerKind {
    /// Long-lived outbound connection to a streaming HTTP feed.
    Stream { url: String },
    /// Cron-style recurring schedule.
    Schedule { expression: String },
    /// Inbound HTTP listener.
    Webhook {
        port: u16,
        #[serde(default = "default_webhook_path")]
        path: String,
        /// Optional bearer secret; when set, requests without a matching
        /// `Authorization` header are rejected with 401.
        #[serde(default)]
        auth: Option<String>,
    },
}

fn default_webhook_path() -> String {
    "/webhook".to_string()
}

/// Task-binding isolation policy (see DESIGN.md).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskScope {
    /// Each event's run gets a fresh, isolated task binding.
    #[default]
    Run,
    /// One binding shared across all runs of this pipeline instance.
    Pipeline,
}

/// Task-tracking service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskServiceConfig {
    #[serde(default = "default_tasks_base_url")]
    pub base_url: String,
}

fn default_tasks_base_url() -> String {
    "http://localhost:3001".to_string()
}

impl Default for TaskServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_tasks_base_url(),
        }
    }
}

/// LLM agent service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentServiceConfig {
    #[serde(default = "default_agent_base_url")]
    pub base_url: String,
    /// Per-invocation timeout; agent runs stream for a while.
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_agent_base_url() -> String {
    "http://localhost:8790".to_string()
}

fn default_agent_timeout_secs() -> u64 {
    600
}

impl Default for AgentServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_agent_base_url(),
            timeout_secs: default_agent_timeout_secs(),
        }
    }
}

/// Configuration loading errors. All of these are fatal before start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.validate()?;
        Ok(config)
    }

    /// Validate field-level constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trigger.name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "trigger.name must not be empty".to_string(),
            ));
        }

        match &self.trigger.kind {
            TriggerKind::Stream { url } => {
                url::Url::parse(url).map_err(|e| {
                    ConfigError::InvalidConfig(format!("invalid stream url '{url}': {e}"))
                })?;
            }
            TriggerKind::Schedule { expression } => {
                if expression.trim().is_empty() {
                    return Err(ConfigError::InvalidConfig(
                        "schedule expression must not be empty".to_string(),
                    ));
                }
            }
            TriggerKind::Webhook { path, .. } => {
                if !path.starts_with('/') {
                    return Err(ConfigError::InvalidConfig(format!(
                        "webhook path '{path}' must start with '/'"
                    )));
                }
            }
        }

        if self.run.iter().any(|entry| entry.trim().is_empty()) {
            return Err(ConfigError::InvalidConfig(
                "run entries must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a test configuration for unit testing.
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
run = ["json", "log"]

[trigger]
name = "test-webhook"
type = "webhook"
port = 8787
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
