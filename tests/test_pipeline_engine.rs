//! End-to-end pipeline behavior through the public API: stage loading,
//! history invariants, task preconditions, and agent-backed stages.

use ccrun::config::TaskScope;
use ccrun::event::{Event, TriggerType};
use ccrun::pipeline::{load_pipeline, Engine, RunError, Services, Stage};
use ccrun::stage::StageRegistry;
use ccrun::task::TaskApi;
use ccrun::testing::mocks::{MockAgentInvoker, MockTaskApi};
use serde_json::{json, Value};
use std::sync::Arc;

fn services(tasks: Arc<MockTaskApi>, agent: Arc<MockAgentInvoker>) -> Services {
    Services::new(tasks, agent)
}

fn event(payload: Value) -> Event {
    Event::new(payload, TriggerType::Webhook, "test")
}

fn entries(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_full_run_history_invariant() {
    let registry = StageRegistry::builtin();
    let stages = load_pipeline(&entries(&["json", "log"]), &registry).unwrap();
    let engine = Engine::new(
        stages,
        services(
            Arc::new(MockTaskApi::new()),
            Arc::new(MockAgentInvoker::silent()),
        ),
        TaskScope::Run,
    );

    let payload = json!("```json\n{\"a\":1}\n```");
    let outcome = engine.execute(event(payload.clone())).await.unwrap();

    // N stages completed: history holds N+1 entries, starting with the
    // original payload.
    assert_eq!(outcome.completed_stages, 2);
    assert_eq!(outcome.history.len(), 3);
    assert_eq!(outcome.history[0], payload);
    assert_eq!(outcome.history[1], json!({"a": 1}));
    assert_eq!(outcome.history[2], json!({"a": 1}));
}

#[tokio::test]
async fn test_json_stage_passes_unparsable_input_through() {
    let registry = StageRegistry::builtin();
    let stages = load_pipeline(&entries(&["json"]), &registry).unwrap();
    let engine = Engine::new(
        stages,
        services(
            Arc::new(MockTaskApi::new()),
            Arc::new(MockAgentInvoker::silent()),
        ),
        TaskScope::Run,
    );

    let outcome = engine.execute(event(json!("no json here"))).await.unwrap();
    assert_eq!(outcome.history[1], json!("no json here"));
}

#[tokio::test]
async fn test_add_tags_without_bound_task_aborts_run() {
    let tasks = Arc::new(MockTaskApi::new());
    let registry = StageRegistry::builtin();
    let stages = load_pipeline(&entries(&["addTags('urgent')", "log"]), &registry).unwrap();
    let engine = Engine::new(
        stages,
        services(tasks.clone(), Arc::new(MockAgentInvoker::silent())),
        TaskScope::Run,
    );

    let err = engine.execute(event(json!({}))).await.unwrap_err();
    assert!(matches!(err, RunError::TaskPrecondition { .. }));
    // Precondition fails fast: no external call was made.
    assert_eq!(tasks.task_count().await, 0);
}

#[tokio::test]
async fn test_task_creation_then_tag_mutation() {
    let tasks = Arc::new(MockTaskApi::new());
    let registry = StageRegistry::builtin();

    let bind = Stage::builder("bind", |ctx, next| {
        Box::pin(async move {
            ctx.task("triage", Some("incoming"), None, None).await?;
            next.proceed();
            Ok(())
        })
    });
    let mut stages = vec![bind];
    stages.extend(load_pipeline(&entries(&["addTags('urgent', 'new')"]), &registry).unwrap());

    let engine = Engine::new(
        stages,
        services(tasks.clone(), Arc::new(MockAgentInvoker::silent())),
        TaskScope::Run,
    );

    let outcome = engine.execute(event(json!({"issue": 1}))).await.unwrap();
    assert!(outcome.completed());

    let task = tasks.get_task(1).await.unwrap();
    assert_eq!(task.tags, vec!["urgent".to_string(), "new".to_string()]);
    // Tag mutation passes data through unchanged.
    assert_eq!(outcome.history[2], json!({"issue": 1}));
}

#[tokio::test]
async fn test_prompt_stage_wraps_agent_response() {
    let agent = Arc::new(MockAgentInvoker::with_response("summary text"));
    let registry = StageRegistry::builtin();
    let stages = load_pipeline(&entries(&["prompt('summarize this')"]), &registry).unwrap();
    let engine = Engine::new(
        stages,
        services(Arc::new(MockTaskApi::new()), agent.clone()),
        TaskScope::Run,
    );

    let payload = json!({"text": "long document"});
    let outcome = engine.execute(event(payload.clone())).await.unwrap();

    assert_eq!(
        outcome.history[1],
        json!({"output": "summary text", "input": payload})
    );
    let prompts = agent.recorded_prompts().await;
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("summarize this"));
}

#[tokio::test]
async fn test_marker_stage_substitutes_data() {
    let agent = Arc::new(MockAgentInvoker::with_response("handled"));
    let registry = StageRegistry::builtin();
    let stages = load_pipeline(&entries(&[r#"@{"process *data"}"#]), &registry).unwrap();
    let engine = Engine::new(
        stages,
        services(Arc::new(MockTaskApi::new()), agent.clone()),
        TaskScope::Run,
    );

    let outcome = engine.execute(event(json!({"id": 9}))).await.unwrap();

    let prompts = agent.recorded_prompts().await;
    assert_eq!(prompts[0], r#"process {"id":9}"#);
    assert_eq!(
        outcome.history[1],
        json!({"output": "handled", "input": {"id": 9}})
    );
}

#[tokio::test]
async fn test_action_stage_receives_task_binding() {
    let tasks = Arc::new(MockTaskApi::new());
    let registry = StageRegistry::builtin();

    let bind = Stage::builder("bind", |ctx, next| {
        Box::pin(async move {
            ctx.task("deploy", None, None, None).await?;
            next.proceed();
            Ok(())
        })
    });
    let mut stages = vec![bind];
    stages.extend(load_pipeline(&entries(&["action('notify')"]), &registry).unwrap());

    let engine = Engine::new(
        stages,
        services(tasks.clone(), Arc::new(MockAgentInvoker::silent())),
        TaskScope::Run,
    );

    engine.execute(event(json!({"env": "prod"}))).await.unwrap();

    let actions = tasks.recorded_actions().await;
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].0, "notify");
    assert_eq!(actions[0].1, json!({"env": "prod"}));
    assert_eq!(actions[0].2, Some(1));
}

#[tokio::test]
async fn test_agent_failure_aborts_run() {
    let agent = Arc::new(MockAgentInvoker::failing(
        ccrun::agent::AgentCallError::Api("model overloaded".to_string()),
    ));
    let registry = StageRegistry::builtin();
    let stages = load_pipeline(&entries(&["prompt('x')"]), &registry).unwrap();
    let engine = Engine::new(
        stages,
        services(Arc::new(MockTaskApi::new()), agent),
        TaskScope::Run,
    );

    let err = engine.execute(event(json!({}))).await.unwrap_err();
    assert!(matches!(err, RunError::Agent(_)));
}
