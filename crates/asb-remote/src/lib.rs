// SPDX-License-Identifier: MIT OR Apache-2.0
//! asb-remote
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! A2A client for Agent Switchboard.
//!
//! [`RemoteClient::send`] posts a request-as-message to a remote agent
//! endpoint and consumes the server-sent event stream it answers with. The
//! stream is finite and not restartable; the consumer iterates to
//! completion. Between successive events an idle-timeout countdown runs;
//! if the remote goes silent for longer than the configured window the
//! stream yields [`RemoteError::IdleTimeout`] and ends. This is the sole
//! liveness guarantee against a silently dead remote.

use asb_core::{A2aState, Request};
use eventsource_stream::Eventsource;
use futures::prelude::*;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

/// Errors from remote interactions.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Transport-level failure.
    #[error("a2a transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("a2a endpoint returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: StatusCode,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The event stream broke mid-flight.
    #[error("a2a stream error: {0}")]
    Stream(String),

    /// No event arrived within the idle window.
    #[error("a2a stream idle for {secs}s, giving up")]
    IdleTimeout {
        /// The configured idle window in seconds.
        secs: u64,
    },

    /// A payload could not be decoded.
    #[error("a2a payload error: {0}")]
    Parse(String),
}

/// One event from a remote task stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum A2aEvent {
    /// The remote agent accepted the request and created a task.
    TaskCreated {
        /// Remote task identifier.
        #[serde(rename = "taskId")]
        task_id: String,
        /// Remote conversation context identifier.
        #[serde(rename = "contextId")]
        context_id: String,
    },
    /// The task changed state.
    StatusUpdate {
        /// New task state.
        state: A2aState,
        /// Optional message from the remote agent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// The task produced an artifact.
    ArtifactUpdate {
        /// Artifact name.
        name: String,
        /// Artifact payload.
        data: Value,
    },
}

/// Terminal task snapshot returned by `GET {endpoint}/tasks/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSnapshot {
    /// Remote task identifier.
    pub id: String,
    /// Terminal state.
    pub state: A2aState,
    /// Artifacts produced over the task's lifetime.
    #[serde(default)]
    pub artifacts: Vec<TaskArtifact>,
}

/// One artifact in a [`TaskSnapshot`].
#[derive(Debug, Clone, Deserialize)]
pub struct TaskArtifact {
    /// Artifact name.
    pub name: String,
    /// Artifact payload.
    pub data: Value,
}

/// The request-as-message body posted to the remote endpoint.
#[derive(Debug, Serialize)]
struct MessagePayload<'a> {
    message: RequestMessage<'a>,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    request_id: &'a str,
    service: &'a str,
    from: &'a str,
    to: &'a str,
    scope: &'a str,
    #[serde(rename = "type")]
    kind: String,
    priority: String,
    body: &'a str,
}

impl<'a> From<&'a Request> for MessagePayload<'a> {
    fn from(req: &'a Request) -> Self {
        Self {
            message: RequestMessage {
                request_id: req.id.as_str(),
                service: &req.service,
                from: &req.from,
                to: &req.to,
                scope: &req.scope,
                kind: req.kind.to_string(),
                priority: req.priority.to_string(),
                body: &req.body,
            },
        }
    }
}

/// A2A client with one cached HTTP client per endpoint.
///
/// Endpoints that fail are [`invalidate`](Self::invalidate)d so the next
/// dispatch starts from a fresh connection pool.
pub struct RemoteClient {
    clients: Mutex<HashMap<String, reqwest::Client>>,
    idle_timeout: Duration,
}

impl RemoteClient {
    /// Create a client with the given idle window between stream events.
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    fn client_for(&self, endpoint: &str) -> reqwest::Client {
        let mut clients = self.clients.lock().expect("client cache lock poisoned");
        clients
            .entry(endpoint.to_string())
            .or_insert_with(reqwest::Client::new)
            .clone()
    }

    /// Drop the cached client for an endpoint.
    pub fn invalidate(&self, endpoint: &str) {
        let mut clients = self.clients.lock().expect("client cache lock poisoned");
        clients.remove(endpoint);
    }

    /// Send a request to a remote agent and stream its task events.
    pub async fn send(&self, endpoint: &str, request: &Request) -> Result<EventStream, RemoteError> {
        let client = self.client_for(endpoint);
        let payload = MessagePayload::from(request);

        let resp = client
            .post(endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RemoteError::UnexpectedStatus { status, body });
        }

        let (tx, rx) = mpsc::channel::<Result<A2aEvent, RemoteError>>(16);
        let stream = resp.bytes_stream().map_err(RemoteError::Http);
        tokio::spawn(consume_sse(stream, tx, self.idle_timeout));
        Ok(EventStream { rx })
    }

    /// Fetch the terminal snapshot of a remote task.
    pub async fn get_task(
        &self,
        endpoint: &str,
        task_id: &str,
    ) -> Result<TaskSnapshot, RemoteError> {
        let client = self.client_for(endpoint);
        let url = format!("{}/tasks/{task_id}", endpoint.trim_end_matches('/'));

        let resp = client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RemoteError::UnexpectedStatus { status, body });
        }
        resp.json::<TaskSnapshot>()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))
    }
}

/// Pump the SSE byte stream into decoded events, enforcing the idle window.
async fn consume_sse<S>(
    stream: S,
    tx: mpsc::Sender<Result<A2aEvent, RemoteError>>,
    idle: Duration,
) where
    S: Stream<Item = Result<bytes::Bytes, RemoteError>> + Unpin,
{
    let mut stream = stream.eventsource();

    loop {
        let sse = match timeout(idle, stream.next()).await {
            Ok(Some(Ok(sse))) => sse,
            Ok(Some(Err(e))) => {
                let _ = tx.send(Err(RemoteError::Stream(e.to_string()))).await;
                return;
            }
            // Remote closed the stream; the consumer decides whether it
            // saw a terminal event.
            Ok(None) => return,
            Err(_) => {
                let _ = tx
                    .send(Err(RemoteError::IdleTimeout {
                        secs: idle.as_secs(),
                    }))
                    .await;
                return;
            }
        };

        let event: A2aEvent = match serde_json::from_str(&sse.data) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, data = %sse.data, "skipping undecodable a2a event");
                continue;
            }
        };

        if tx.send(Ok(event)).await.is_err() {
            // Consumer hung up (cancellation); stop reading.
            return;
        }
    }
}

/// Finite, non-restartable stream of task events.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<Result<A2aEvent, RemoteError>>,
}

impl Stream for EventStream {
    type Item = Result<A2aEvent, RemoteError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a2a_events_decode_from_wire_json() {
        let created: A2aEvent = serde_json::from_str(
            r#"{"type":"task-created","taskId":"t-1","contextId":"c-1"}"#,
        )
        .unwrap();
        assert_eq!(
            created,
            A2aEvent::TaskCreated {
                task_id: "t-1".into(),
                context_id: "c-1".into(),
            }
        );

        let update: A2aEvent =
            serde_json::from_str(r#"{"type":"status-update","state":"working"}"#).unwrap();
        assert_eq!(
            update,
            A2aEvent::StatusUpdate {
                state: A2aState::Working,
                message: None,
            }
        );

        let artifact: A2aEvent = serde_json::from_str(
            r#"{"type":"artifact-update","name":"contract-update","data":{"v":2}}"#,
        )
        .unwrap();
        assert!(matches!(artifact, A2aEvent::ArtifactUpdate { name, .. } if name == "contract-update"));
    }

    #[test]
    fn message_payload_carries_the_request_fields() {
        let req = test_request();
        let payload = MessagePayload::from(&req);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["message"]["request_id"], "req-1");
        assert_eq!(json["message"]["service"], "billing");
        assert_eq!(json["message"]["priority"], "high");
        assert_eq!(json["message"]["type"], "task");
    }

    fn test_request() -> Request {
        use asb_core::{Priority, RequestKind, RequestStatus};
        Request {
            id: asb_core::RequestId::from("req-1"),
            title: None,
            from: "orchestrator".into(),
            to: "billing".into(),
            scope: "billing".into(),
            service: "billing".into(),
            kind: RequestKind::Task,
            priority: Priority::High,
            status: RequestStatus::Pending,
            created: chrono::Utc::now(),
            updated: chrono::Utc::now(),
            attempts: 0,
            depends_on: Vec::new(),
            directive: None,
            related_contract: None,
            command: None,
            command_args: None,
            originated_from: None,
            extra: Vec::new(),
            body: "do the thing".into(),
            path: std::path::PathBuf::from("req-1.md"),
        }
    }
}
