//! Trigger sources
//!
//! A trigger converts an external asynchronous signal into a normalized
//! [`Event`] and invokes a registered callback once per signal. `start`
//! begins delivery; `stop` deterministically releases the underlying
//! connection or listener but does not cancel runs already dispatched.

mod schedule;
mod stream;
mod webhook;

pub use schedule::ScheduleTrigger;
pub use stream::StreamTrigger;
pub use webhook::WebhookTrigger;

use crate::config::{TriggerConfig, TriggerKind};
use crate::event::Event;
use crate::pipeline::RunError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;

/// Invoked once per signal. Errors are the dispatch point's to log; the
/// trigger keeps listening either way.
pub type TriggerCallback =
    Arc<dyn Fn(Event) -> BoxFuture<'static, Result<(), RunError>> + Send + Sync>;

/// Errors raised by `start()`. All are fatal for the trigger - nothing is
/// armed or bound when `start` fails.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid schedule expression '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("invalid stream endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("failed to bind webhook listener on port {port}: {reason}")]
    BindFailed { port: u16, reason: String },

    #[error("trigger already started")]
    AlreadyStarted,
}

/// Converts external signals into events.
#[async_trait]
pub trait TriggerSource: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str>;

    /// Begin signal delivery. Returns an error before anything is armed
    /// when the configuration is unusable (e.g. a bad cron expression).
    async fn start(&mut self, callback: TriggerCallback) -> Result<(), TriggerError>;

    /// Release the underlying connection/listener. Runs already dispatched
    /// keep going.
    async fn stop(&mut self);
}

/// Build the trigger described by configuration.
pub fn create_trigger(config: &TriggerConfig) -> Box<dyn TriggerSource> {
    match &config.kind {
        TriggerKind::Stream { url } => Box::new(StreamTrigger::new(
            config.name.clone(),
            config.description.clone(),
            url.clone(),
        )),
        TriggerKind::Schedule { expression } => Box::new(ScheduleTrigger::new(
            config.name.clone(),
            config.description.clone(),
            expression.clone(),
        )),
        TriggerKind::Webhook { port, path, auth } => Box::new(WebhookTrigger::new(
            config.name.clone(),
            config.description.clone(),
            *port,
            path.clone(),
            auth.clone(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_maps_config_kinds() {
        let stream = TriggerConfig {
            name: "feed".to_string(),
            description: None,
            kind: TriggerKind::Stream {
                url: "http://localhost:1234/events".to_string(),
            },
        };
        assert_eq!(create_trigger(&stream).name(), "feed");

        let schedule = TriggerConfig {
            name: "nightly".to_string(),
            description: Some("runs at 3am".to_string()),
            kind: TriggerKind::Schedule {
                expression: "0 0 3 * * *".to_string(),
            },
        };
        let trigger = create_trigger(&schedule);
        assert_eq!(trigger.name(), "nightly");
        assert_eq!(trigger.description(), Some("runs at 3am"));
    }
}
