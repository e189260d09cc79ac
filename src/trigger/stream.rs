//! Streaming-feed trigger
//!
//! Opens one long-lived outbound connection and incrementally buffers the
//! body, splitting on line boundaries. Lines prefixed `data: ` are parsed
//! as JSON; each successfully parsed record invokes the callback on its
//! own task, so near-simultaneous records may overlap. Parse failures are
//! logged and skipped. A connection-level failure is terminal for this
//! source - there is no automatic reconnect.

use super::{TriggerCallback, TriggerError, TriggerSource};
use crate::event::{Event, TriggerType};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub struct StreamTrigger {
    name: String,
    description: Option<String>,
    url: String,
    reader: Option<JoinHandle<()>>,
}

impl StreamTrigger {
    pub fn new(name: String, description: Option<String>, url: String) -> Self {
        Self {
            name,
            description,
            url,
            reader: None,
        }
    }
}

#[async_trait]
impl TriggerSource for StreamTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    async fn start(&mut self, callback: TriggerCallback) -> Result<(), TriggerError> {
        if self.reader.is_some() {
            return Err(TriggerError::AlreadyStarted);
        }

        let url = url::Url::parse(&self.url).map_err(|e| TriggerError::InvalidEndpoint {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        info!(trigger = %self.name, url = %url, "starting stream trigger");

        let name = self.name.clone();
        self.reader = Some(tokio::spawn(read_stream(name, url, callback)));
        Ok(())
    }

    async fn stop(&mut self) {
        info!(trigger = %self.name, "stopping stream trigger");
        if let Some(reader) = self.reader.take() {
            // Dispatched runs live on their own tasks; only the reader dies.
            reader.abort();
        }
    }
}

async fn read_stream(name: String, url: url::Url, callback: TriggerCallback) {
    let client = Client::new();
    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(e) => {
            error!(trigger = %name, error = %e, "failed to connect to stream");
            return;
        }
    };

    if !response.status().is_success() {
        error!(
            trigger = %name,
            status = %response.status(),
            "stream endpoint refused connection"
        );
        return;
    }

    info!(trigger = %name, "stream connection established");

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                // Terminal for this source; no reconnect.
                error!(trigger = %name, error = %e, "stream connection error");
                return;
            }
        };

        buffer.push_str(&String::from_utf8_lossy(&bytes));

        // Process complete lines, keeping the trailing partial line.
        while let Some(newline) = buffer.find('\n') {
            let line: String = buffer.drain(..=newline).collect();
            dispatch_line(&name, line.trim_end_matches('\n'), &callback);
        }
    }

    info!(trigger = %name, "stream connection closed");
}

fn dispatch_line(name: &str, line: &str, callback: &TriggerCallback) {
    let Some(rest) = line.strip_prefix("data: ") else {
        return;
    };
    let message = rest.trim();
    if message.is_empty() {
        return;
    }

    let payload: serde_json::Value = match serde_json::from_str(message) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(trigger = %name, error = %e, record = %message, "skipping unparsable stream record");
            return;
        }
    };

    let event = Event::new(payload, TriggerType::Stream, name);
    let callback = callback.clone();
    let trigger = name.to_string();
    // Each record runs independently; records do not batch or queue behind
    // one another.
    tokio::spawn(async move {
        if let Err(e) = callback(event).await {
            error!(trigger = %trigger, error = %e, "run failed");
        }
    });
}
