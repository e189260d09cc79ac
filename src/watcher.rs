//! Watcher: trigger + pipeline wired together
//!
//! The programmatic entry point mirroring the configuration-driven flow:
//! describe a trigger, append stages, start. Each delivered event executes
//! the pipeline on its own run; run failures are logged at this dispatch
//! point and the trigger keeps listening.

use crate::config::{TaskScope, TriggerConfig};
use crate::event::Event;
use crate::pipeline::{Engine, Services, Stage};
use crate::trigger::{create_trigger, TriggerCallback, TriggerError, TriggerSource};
use std::sync::Arc;
use tracing::{error, info};

/// Builder/runner for one trigger-driven pipeline.
pub struct Watcher {
    trigger_config: TriggerConfig,
    stages: Vec<Stage>,
    services: Services,
    scope: TaskScope,
    trigger: Option<Box<dyn TriggerSource>>,
    active_runs: Arc<std::sync::atomic::AtomicUsize>,
}

impl Watcher {
    pub fn new(trigger_config: TriggerConfig, services: Services) -> Self {
        Self {
            trigger_config,
            stages: Vec::new(),
            services,
            scope: TaskScope::default(),
            trigger: None,
            active_runs: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        }
    }

    /// Task-binding isolation policy for this pipeline.
    pub fn task_scope(mut self, scope: TaskScope) -> Self {
        self.scope = scope;
        self
    }

    /// Append one stage.
    pub fn then(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Append a batch of already-loaded stages.
    pub fn stages(mut self, stages: Vec<Stage>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Bind the pipeline and start the trigger.
    pub async fn start(&mut self) -> Result<(), TriggerError> {
        if self.trigger.is_some() {
            return Err(TriggerError::AlreadyStarted);
        }

        let engine = Arc::new(Engine::new(
            std::mem::take(&mut self.stages),
            self.services.clone(),
            self.scope,
        ));

        let active_runs = self.active_runs.clone();
        let callback: TriggerCallback = Arc::new(move |event: Event| {
            let engine = engine.clone();
            let active_runs = active_runs.clone();
            Box::pin(async move {
                active_runs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let result = engine.execute(event).await;
                active_runs.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                result.map(|_| ())
            })
        });

        let mut trigger = create_trigger(&self.trigger_config);
        info!(trigger = %trigger.name(), "starting watcher");
        if let Some(description) = trigger.description() {
            info!(description = %description, "trigger description");
        }

        if let Err(e) = trigger.start(callback).await {
            error!(trigger = %trigger.name(), error = %e, "trigger failed to start");
            return Err(e);
        }

        self.trigger = Some(trigger);
        Ok(())
    }

    /// Stop the trigger. Runs already dispatched keep going.
    pub async fn stop(&mut self) {
        if let Some(mut trigger) = self.trigger.take() {
            info!(trigger = %trigger.name(), "stopping watcher");
            trigger.stop().await;
        }
    }

    /// Wait for dispatched runs to finish, up to a deadline. Returns the
    /// number of runs still in flight when it gives up.
    pub async fn drain(&self, deadline: std::time::Duration) -> usize {
        let started = tokio::time::Instant::now();
        loop {
            let remaining = self.active_runs.load(std::sync::atomic::Ordering::SeqCst);
            if remaining == 0 || started.elapsed() >= deadline {
                return remaining;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriggerKind;
    use crate::testing::mocks::{MockAgentInvoker, MockTaskApi};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn schedule_config(expression: &str) -> TriggerConfig {
        TriggerConfig {
            name: "tick".to_string(),
            description: None,
            kind: TriggerKind::Schedule {
                expression: expression.to_string(),
            },
        }
    }

    fn test_services() -> Services {
        Services::new(
            Arc::new(MockTaskApi::new()),
            Arc::new(MockAgentInvoker::silent()),
        )
    }

    #[tokio::test]
    async fn test_schedule_watcher_runs_pipeline() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counted = runs.clone();
        let count_stage = Stage::transform("count", move |data, next, _view| {
            let counted = counted.clone();
            Box::pin(async move {
                counted.fetch_add(1, Ordering::SeqCst);
                next.advance(data);
                Ok(())
            })
        });

        let mut watcher = Watcher::new(schedule_config("* * * * * *"), test_services())
            .then(count_stage);

        watcher.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        watcher.stop().await;

        assert!(runs.load(Ordering::SeqCst) >= 1, "pipeline should have run");
    }

    #[tokio::test]
    async fn test_invalid_schedule_fails_start() {
        let mut watcher = Watcher::new(schedule_config("bogus"), test_services())
            .then(Stage::transform("noop", |data, next, _view| {
                Box::pin(async move {
                    next.advance(data);
                    Ok(())
                })
            }));

        let err = watcher.start().await.unwrap_err();
        assert!(matches!(err, TriggerError::InvalidSchedule { .. }));
    }

    #[tokio::test]
    async fn test_run_failures_do_not_stop_the_trigger() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counted = runs.clone();
        let failing = Stage::transform("boom", move |_data, _next, _view| {
            let counted = counted.clone();
            Box::pin(async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Err(crate::pipeline::RunError::stage("boom", "always fails"))
            })
        });

        let mut watcher =
            Watcher::new(schedule_config("* * * * * *"), test_services()).then(failing);

        watcher.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        watcher.stop().await;

        // The trigger kept dispatching despite every run failing.
        assert!(
            runs.load(Ordering::SeqCst) >= 2,
            "trigger should keep listening after failed runs"
        );
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let mut watcher = Watcher::new(schedule_config("* * * * * *"), test_services());
        watcher.start().await.unwrap();
        let err = watcher.start().await.unwrap_err();
        assert!(matches!(err, TriggerError::AlreadyStarted));
        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start_is_a_noop() {
        let mut watcher = Watcher::new(schedule_config("* * * * * *"), test_services());
        watcher.stop().await;
        assert_eq!(watcher.drain(Duration::from_millis(10)).await, 0);
    }
}
