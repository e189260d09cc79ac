//! TaskClient HTTP contract tests against a mock task service.

use ccrun::task::{NewTask, TaskApi, TaskClient, TaskClientError, TaskUpdate};
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> TaskClient {
    TaskClient::with_base_url(server.uri()).unwrap()
}

#[tokio::test]
async fn test_create_task_posts_fields_and_parses_task() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tasks"))
        .and(body_json(json!({
            "name": "triage",
            "description": "incoming",
            "tags": ["new"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 42,
            "name": "triage",
            "description": "incoming",
            "tags": ["new"]
        })))
        .mount(&server)
        .await;

    let task = client(&server)
        .create_task(NewTask {
            name: "triage".to_string(),
            description: Some("incoming".to_string()),
            tags: Some(vec!["new".to_string()]),
            icon: None,
            project_path: None,
        })
        .await
        .unwrap();

    assert_eq!(task.id, 42);
    assert_eq!(task.name, "triage");
    assert_eq!(task.tags, vec!["new".to_string()]);
}

#[tokio::test]
async fn test_add_and_remove_tags_hit_tag_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tasks/7/tags/add"))
        .and(body_json(json!({"tags": ["urgent"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7, "name": "t", "tags": ["urgent"]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/tasks/7/tags/remove"))
        .and(body_json(json!({"tags": ["urgent"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7, "name": "t", "tags": []
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    let tags = vec!["urgent".to_string()];

    let task = client.add_tags(7, &tags).await.unwrap();
    assert_eq!(task.tags, vec!["urgent".to_string()]);

    let task = client.remove_tags(7, &tags).await.unwrap();
    assert!(task.tags.is_empty());
}

#[tokio::test]
async fn test_update_task_sends_only_set_fields() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/tasks/3"))
        .and(body_json(json!({"name": "renamed"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 3, "name": "renamed", "tags": []
        })))
        .mount(&server)
        .await;

    let task = client(&server)
        .update_task(
            3,
            TaskUpdate {
                name: Some("renamed".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(task.name, "renamed");
}

#[tokio::test]
async fn test_execute_action_includes_task_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/actions/notify/execute"))
        .and(body_json(json!({
            "input": {"env": "prod"},
            "taskId": 42
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"delivered": true})))
        .mount(&server)
        .await;

    let result = client(&server)
        .execute_action("notify", json!({"env": "prod"}), None, Some(42))
        .await
        .unwrap();
    assert_eq!(result, json!({"delivered": true}));
}

#[tokio::test]
async fn test_list_actions_with_category_filter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/actions-info"))
        .and(query_param("category", "deploy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "ship", "category": "deploy"}
        ])))
        .mount(&server)
        .await;

    let actions = client(&server).list_actions(Some("deploy")).await.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].id, "ship");
}

#[tokio::test]
async fn test_api_error_message_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tasks/99"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"error": "task not found"})),
        )
        .mount(&server)
        .await;

    let err = client(&server).get_task(99).await.unwrap_err();
    match err {
        TaskClientError::Api { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "task not found");
        }
        other => panic!("expected Api error, got {other}"),
    }
}

#[tokio::test]
async fn test_get_active_task_maps_404_to_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/active-task"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "none"})))
        .mount(&server)
        .await;

    let active = client(&server).get_active_task().await.unwrap();
    assert!(active.is_none());
}

#[tokio::test]
async fn test_writes_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tasks"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "db down"})))
        .expect(1)
        .mount(&server)
        .await;

    let result = client(&server).create_task(NewTask::named("t")).await;
    assert!(result.is_err());
    // wiremock verifies on drop that exactly one request arrived.
}
