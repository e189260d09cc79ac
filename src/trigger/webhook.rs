//! Webhook trigger
//!
//! Binds one inbound HTTP listener. Only `POST` to the exact configured
//! path is handled; anything else is a 404. With a bearer secret
//! configured, a missing or mismatched `Authorization` header is a 401 and
//! the callback is never invoked. The body is parsed as JSON - an
//! unparsable body is wrapped as `{"body": <raw text>}` instead of
//! failing - and merged with request metadata (method, path, headers)
//! into the event payload. A failed run returns 500 after logging; the
//! stage error itself is not surfaced to the caller.

use super::{TriggerCallback, TriggerError, TriggerSource};
use crate::event::{Event, TriggerType};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use warp::http::{HeaderMap, Method, StatusCode};
use warp::Filter;

pub struct WebhookTrigger {
    name: String,
    description: Option<String>,
    port: u16,
    path: String,
    auth: Option<String>,
    bound_addr: Option<SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

#[derive(Debug, Serialize)]
struct WebhookResponse {
    success: bool,
    message: String,
}

impl WebhookTrigger {
    pub fn new(
        name: String,
        description: Option<String>,
        port: u16,
        path: String,
        auth: Option<String>,
    ) -> Self {
        Self {
            name,
            description,
            port,
            path,
            auth,
            bound_addr: None,
            shutdown: None,
            server: None,
        }
    }

    /// Address the listener actually bound to (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound_addr
    }
}

#[async_trait]
impl TriggerSource for WebhookTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    async fn start(&mut self, callback: TriggerCallback) -> Result<(), TriggerError> {
        if self.server.is_some() {
            return Err(TriggerError::AlreadyStarted);
        }

        let name = self.name.clone();
        let expected_path = self.path.clone();
        let auth = self.auth.clone();

        let filter = warp::any()
            .and(warp::method())
            .and(warp::path::full())
            .and(warp::header::headers_cloned())
            .and(warp::body::bytes())
            .and_then(move |method, path, headers, body| {
                let name = name.clone();
                let expected_path = expected_path.clone();
                let auth = auth.clone();
                let callback = callback.clone();
                async move {
                    Ok::<_, Infallible>(
                        handle_request(
                            &name,
                            &expected_path,
                            auth.as_deref(),
                            method,
                            path,
                            headers,
                            body,
                            &callback,
                        )
                        .await,
                    )
                }
            });

        let (tx, rx) = oneshot::channel::<()>();
        let (addr, server) = warp::serve(filter)
            .try_bind_with_graceful_shutdown(([0, 0, 0, 0], self.port), async {
                rx.await.ok();
            })
            .map_err(|e| TriggerError::BindFailed {
                port: self.port,
                reason: e.to_string(),
            })?;

        info!(
            trigger = %self.name,
            addr = %addr,
            path = %self.path,
            "webhook listener bound"
        );

        self.bound_addr = Some(addr);
        self.shutdown = Some(tx);
        self.server = Some(tokio::spawn(server));
        Ok(())
    }

    async fn stop(&mut self) {
        info!(trigger = %self.name, "stopping webhook trigger");
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(server) = self.server.take() {
            // Graceful shutdown: in-flight requests finish, dispatched runs
            // keep going on their own tasks.
            let _ = server.await;
        }
        self.bound_addr = None;
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_request(
    name: &str,
    expected_path: &str,
    auth: Option<&str>,
    method: Method,
    path: warp::path::FullPath,
    headers: HeaderMap,
    body: bytes::Bytes,
    callback: &TriggerCallback,
) -> warp::reply::WithStatus<warp::reply::Json> {
    if method != Method::POST || path.as_str() != expected_path {
        return reply(StatusCode::NOT_FOUND, false, "not found");
    }

    if let Some(secret) = auth {
        let expected = format!("Bearer {secret}");
        let authorized = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .map(|value| value == expected)
            .unwrap_or(false);
        if !authorized {
            warn!(trigger = %name, "webhook request rejected: bad or missing bearer token");
            return reply(StatusCode::UNAUTHORIZED, false, "unauthorized");
        }
    }

    let payload = build_payload(&path, &headers, &body);
    let event = Event::new(payload, TriggerType::Webhook, name);

    match callback(event).await {
        Ok(()) => reply(StatusCode::OK, true, "event processed"),
        Err(e) => {
            error!(trigger = %name, error = %e, "run failed");
            reply(StatusCode::INTERNAL_SERVER_ERROR, false, "internal error")
        }
    }
}

/// Merge request metadata with the parsed body. An unparsable or
/// non-object body lands under a `body` key.
fn build_payload(path: &warp::path::FullPath, headers: &HeaderMap, body: &bytes::Bytes) -> Value {
    let mut payload = Map::new();
    payload.insert("method".to_string(), json!("POST"));
    payload.insert("path".to_string(), json!(path.as_str()));

    let mut header_map = Map::new();
    for (key, value) in headers {
        if let Ok(value) = value.to_str() {
            header_map.insert(key.as_str().to_string(), json!(value));
        }
    }
    payload.insert("headers".to_string(), Value::Object(header_map));

    let raw = String::from_utf8_lossy(body);
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(fields)) => payload.extend(fields),
        Ok(other) => {
            payload.insert("body".to_string(), other);
        }
        Err(_) => {
            // Downgraded, not fatal: the raw text is still delivered.
            payload.insert("body".to_string(), json!(raw.as_ref()));
        }
    }

    Value::Object(payload)
}

fn reply(
    status: StatusCode,
    success: bool,
    message: &str,
) -> warp::reply::WithStatus<warp::reply::Json> {
    let body = WebhookResponse {
        success,
        message: message.to_string(),
    };
    warp::reply::with_status(warp::reply::json(&body), status)
}
