// SPDX-License-Identifier: MIT OR Apache-2.0
//! The hub event taxonomy.
//!
//! Every lifecycle observation the hub makes is one [`HubEvent`]. Events are
//! delivered in-process through the bus and, via the bridge, as JSON
//! [`WireMessage`]s to the external façade.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{FieldParseError, RequestId};

/// A timestamped hub event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HubEvent {
    /// When the event was emitted.
    pub ts: DateTime<Utc>,

    /// The event payload.
    #[serde(flatten)]
    pub kind: HubEventKind,
}

impl HubEvent {
    /// Wrap a payload with the current timestamp.
    #[must_use]
    pub fn now(kind: HubEventKind) -> Self {
        Self {
            ts: Utc::now(),
            kind,
        }
    }
}

/// The payload discriminator for [`HubEvent`].
///
/// Serialized with `#[serde(tag = "type")]`; the tag strings are the wire
/// event names consumed by the façade.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type")]
pub enum HubEventKind {
    /// A worker took ownership of a request.
    #[serde(rename = "request:claimed")]
    RequestClaimed {
        /// The claimed request.
        request_id: RequestId,
        /// Service the request was routed to.
        service: String,
    },

    /// A request finished successfully and was archived.
    #[serde(rename = "request:completed")]
    RequestCompleted {
        /// The completed request.
        request_id: RequestId,
        /// Service that executed it.
        service: String,
        /// Wall-clock execution time in milliseconds.
        duration_ms: u64,
    },

    /// A request attempt failed.
    #[serde(rename = "request:failed")]
    RequestFailed {
        /// The failed request.
        request_id: RequestId,
        /// Service that executed it.
        service: String,
        /// Error summary.
        error: String,
        /// Whether a later tick will re-pick the request.
        will_retry: bool,
    },

    /// A remote task reported a state change.
    #[serde(rename = "a2a:status-update")]
    A2aStatusUpdate {
        /// The request the remote task belongs to.
        request_id: RequestId,
        /// Remote task state.
        state: A2aState,
        /// Optional human-readable message from the remote agent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A remote task produced an artifact.
    #[serde(rename = "a2a:artifact-update")]
    A2aArtifactUpdate {
        /// The request the remote task belongs to.
        request_id: RequestId,
        /// Artifact name.
        name: String,
        /// Artifact payload.
        data: serde_json::Value,
    },

    /// A streamed chunk of agent output.
    #[serde(rename = "session:output")]
    SessionOutput {
        /// The request producing output.
        request_id: RequestId,
        /// The chunk.
        chunk: OutputChunk,
    },

    /// An execution session opened for a request.
    #[serde(rename = "session:start")]
    SessionStart {
        /// The request being executed.
        request_id: RequestId,
        /// Service executing it.
        service: String,
    },

    /// An execution session finished cleanly.
    #[serde(rename = "session:complete")]
    SessionComplete {
        /// The request that was executed.
        request_id: RequestId,
    },

    /// An execution session ended in an error.
    #[serde(rename = "session:error")]
    SessionError {
        /// The request that was executing.
        request_id: RequestId,
        /// Error summary.
        error: String,
    },

    /// The scheduler finished a tick.
    #[serde(rename = "scheduler:tick")]
    SchedulerTick {
        /// Number of requests admitted this tick.
        processed: usize,
    },

    /// The git collaborator pulled inbound mutations.
    #[serde(rename = "sync:pull")]
    SyncPull {
        /// Whether the pull succeeded.
        ok: bool,
    },

    /// The git collaborator pushed outbound mutations.
    #[serde(rename = "sync:push")]
    SyncPush {
        /// Whether the push succeeded.
        ok: bool,
    },

    /// A service appeared in the registry.
    #[serde(rename = "service:added")]
    ServiceAdded {
        /// The new service name.
        service: String,
    },

    /// A service disappeared from the registry.
    #[serde(rename = "service:removed")]
    ServiceRemoved {
        /// The removed service name.
        service: String,
    },
}

impl HubEventKind {
    /// The wire event name (the serde tag) for this payload.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestClaimed { .. } => "request:claimed",
            Self::RequestCompleted { .. } => "request:completed",
            Self::RequestFailed { .. } => "request:failed",
            Self::A2aStatusUpdate { .. } => "a2a:status-update",
            Self::A2aArtifactUpdate { .. } => "a2a:artifact-update",
            Self::SessionOutput { .. } => "session:output",
            Self::SessionStart { .. } => "session:start",
            Self::SessionComplete { .. } => "session:complete",
            Self::SessionError { .. } => "session:error",
            Self::SchedulerTick { .. } => "scheduler:tick",
            Self::SyncPull { .. } => "sync:pull",
            Self::SyncPush { .. } => "sync:push",
            Self::ServiceAdded { .. } => "service:added",
            Self::ServiceRemoved { .. } => "service:removed",
        }
    }
}

/// State of a remote A2A task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum A2aState {
    /// Accepted by the remote agent, not yet started.
    Submitted,
    /// The remote agent is working on the task.
    Working,
    /// The remote agent is waiting for input; the hub treats this as stalled.
    InputRequired,
    /// The remote agent requires authentication; the hub treats this as stalled.
    AuthRequired,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed,
    /// Canceled remotely.
    Canceled,
    /// Declined by the remote agent before doing any work.
    Rejected,
}

impl A2aState {
    /// Returns `true` for states that end the stream.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Canceled | Self::Rejected
        )
    }
}

impl fmt::Display for A2aState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Submitted => "submitted",
            Self::Working => "working",
            Self::InputRequired => "input-required",
            Self::AuthRequired => "auth-required",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Rejected => "rejected",
        })
    }
}

impl FromStr for A2aState {
    type Err = FieldParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(Self::Submitted),
            "working" => Ok(Self::Working),
            "input-required" => Ok(Self::InputRequired),
            "auth-required" => Ok(Self::AuthRequired),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            "rejected" => Ok(Self::Rejected),
            other => Err(FieldParseError {
                field: "state",
                value: other.to_string(),
            }),
        }
    }
}

/// One streamed chunk of agent output.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputChunk {
    /// Assistant text.
    Text {
        /// The text fragment.
        text: String,
    },
    /// A tool invocation by the agent.
    ToolUse {
        /// Tool name.
        tool_name: String,
        /// JSON input passed to the tool.
        input: serde_json::Value,
    },
    /// Result returned from a tool invocation.
    ToolResult {
        /// Tool name.
        tool_name: String,
        /// JSON output from the tool.
        output: serde_json::Value,
        /// Whether the tool reported an error.
        is_error: bool,
    },
    /// Extended reasoning text.
    Thinking {
        /// The reasoning fragment.
        text: String,
    },
    /// Out-of-band status from the agent process.
    Status {
        /// Status message.
        message: String,
    },
}

impl OutputChunk {
    /// Render the chunk as a session-log line.
    #[must_use]
    pub fn to_log_line(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::ToolUse { tool_name, input } => format!("[tool_use] {tool_name} {input}"),
            Self::ToolResult {
                tool_name,
                output,
                is_error,
            } => {
                if *is_error {
                    format!("[tool_result!] {tool_name} {output}")
                } else {
                    format!("[tool_result] {tool_name} {output}")
                }
            }
            Self::Thinking { text } => format!("[thinking] {text}"),
            Self::Status { message } => format!("[status] {message}"),
        }
    }
}

/// The JSON shape the bridge forwards to the external façade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// The wire event name.
    #[serde(rename = "type")]
    pub kind: String,

    /// The event payload minus its tag.
    pub data: serde_json::Value,

    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
}

impl WireMessage {
    /// Encode a hub event into its wire shape.
    ///
    /// The `type` tag is lifted out of the payload object so the façade
    /// sees `{type, data, timestamp}`.
    #[must_use]
    pub fn from_event(event: &HubEvent) -> Self {
        let mut data = serde_json::to_value(&event.kind).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = data.as_object_mut() {
            obj.remove("type");
        }
        Self {
            kind: event.kind.name().to_string(),
            data,
            timestamp: event.ts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_serde_tags() {
        let ev = HubEventKind::RequestClaimed {
            request_id: RequestId::from("req-1"),
            service: "billing".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], ev.name());
    }

    #[test]
    fn all_fourteen_kinds_have_distinct_names() {
        use std::collections::BTreeSet;
        let kinds = [
            "request:claimed",
            "request:completed",
            "request:failed",
            "a2a:status-update",
            "a2a:artifact-update",
            "session:output",
            "session:start",
            "session:complete",
            "session:error",
            "scheduler:tick",
            "sync:pull",
            "sync:push",
            "service:added",
            "service:removed",
        ];
        let set: BTreeSet<_> = kinds.iter().collect();
        assert_eq!(set.len(), 14);
    }

    #[test]
    fn wire_message_lifts_the_tag() {
        let ev = HubEvent::now(HubEventKind::SchedulerTick { processed: 3 });
        let wire = WireMessage::from_event(&ev);
        assert_eq!(wire.kind, "scheduler:tick");
        assert_eq!(wire.data["processed"], 3);
        assert!(wire.data.get("type").is_none());
    }

    #[test]
    fn a2a_state_round_trips() {
        for s in [
            A2aState::Submitted,
            A2aState::Working,
            A2aState::InputRequired,
            A2aState::AuthRequired,
            A2aState::Completed,
            A2aState::Failed,
            A2aState::Canceled,
            A2aState::Rejected,
        ] {
            let text = s.to_string();
            assert_eq!(text.parse::<A2aState>().unwrap(), s);
        }
    }

    #[test]
    fn terminal_a2a_states() {
        assert!(A2aState::Completed.is_terminal());
        assert!(A2aState::Rejected.is_terminal());
        assert!(!A2aState::Working.is_terminal());
        assert!(!A2aState::Submitted.is_terminal());
    }

    #[test]
    fn output_chunk_log_lines() {
        let chunk = OutputChunk::Status {
            message: "compacting".into(),
        };
        assert_eq!(chunk.to_log_line(), "[status] compacting");
        let chunk = OutputChunk::Text {
            text: "hello".into(),
        };
        assert_eq!(chunk.to_log_line(), "hello");
    }
}
