//! Normalized events produced by trigger sources
//!
//! Every external signal - a stream record, an elapsed schedule period, an
//! inbound webhook request - is converted into one [`Event`] before it
//! reaches the pipeline. Events are immutable and consumed by exactly one
//! run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which kind of trigger source produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Stream,
    Schedule,
    Webhook,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerType::Stream => write!(f, "stream"),
            TriggerType::Schedule => write!(f, "schedule"),
            TriggerType::Webhook => write!(f, "webhook"),
        }
    }
}

/// A normalized signal: raw payload plus source metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Raw payload as delivered by the source.
    pub payload: Value,
    /// Kind of trigger that produced this event.
    pub source: TriggerType,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Name of the trigger instance (from configuration).
    pub trigger_name: String,
}

impl Event {
    pub fn new(payload: Value, source: TriggerType, trigger_name: impl Into<String>) -> Self {
        Self {
            payload,
            source,
            timestamp: Utc::now(),
            trigger_name: trigger_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_carries_payload_and_source() {
        let event = Event::new(json!({"k": 1}), TriggerType::Stream, "feed");
        assert_eq!(event.payload, json!({"k": 1}));
        assert_eq!(event.source, TriggerType::Stream);
        assert_eq!(event.trigger_name, "feed");
    }

    #[test]
    fn test_trigger_type_serialization() {
        assert_eq!(
            serde_json::to_string(&TriggerType::Webhook).unwrap(),
            "\"webhook\""
        );
        assert_eq!(
            serde_json::to_string(&TriggerType::Schedule).unwrap(),
            "\"schedule\""
        );
    }
}
