//! Schedule trigger
//!
//! Validates the cron expression synchronously at `start()` - an invalid
//! expression errors before any timer is armed. Each elapsed period
//! synthesizes an event and awaits the callback serially, so invocations
//! never overlap faster than the schedule's own resolution.

use super::{TriggerCallback, TriggerError, TriggerSource};
use crate::event::{Event, TriggerType};
use async_trait::async_trait;
use chrono::Utc;
use cron::Schedule;
use serde_json::json;
use std::str::FromStr;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct ScheduleTrigger {
    name: String,
    description: Option<String>,
    expression: String,
    worker: Option<JoinHandle<()>>,
}

impl ScheduleTrigger {
    pub fn new(name: String, description: Option<String>, expression: String) -> Self {
        Self {
            name,
            description,
            expression,
            worker: None,
        }
    }
}

#[async_trait]
impl TriggerSource for ScheduleTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    async fn start(&mut self, callback: TriggerCallback) -> Result<(), TriggerError> {
        if self.worker.is_some() {
            return Err(TriggerError::AlreadyStarted);
        }

        let schedule =
            Schedule::from_str(&self.expression).map_err(|e| TriggerError::InvalidSchedule {
                expression: self.expression.clone(),
                reason: e.to_string(),
            })?;

        info!(
            trigger = %self.name,
            expression = %self.expression,
            "starting schedule trigger"
        );

        let name = self.name.clone();
        self.worker = Some(tokio::spawn(run_schedule(name, schedule, callback)));
        Ok(())
    }

    async fn stop(&mut self) {
        info!(trigger = %self.name, "stopping schedule trigger");
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn run_schedule(name: String, schedule: Schedule, callback: TriggerCallback) {
    loop {
        let now = Utc::now();
        let Some(next) = schedule.after(&now).next() else {
            info!(trigger = %name, "schedule has no further occurrences");
            return;
        };

        let delay = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(delay).await;

        let fired_at = Utc::now();
        let payload = json!({
            "timestamp": fired_at.to_rfc3339(),
            "trigger": "schedule",
            "name": name,
        });
        info!(trigger = %name, timestamp = %fired_at.to_rfc3339(), "schedule fired");

        let event = Event::new(payload, TriggerType::Schedule, name.as_str());
        // Awaited serially: the next period is not armed until this run's
        // dispatch returns, so invocations cannot overlap.
        if let Err(e) = callback(event).await {
            error!(trigger = %name, error = %e, "run failed");
        }
    }
}
