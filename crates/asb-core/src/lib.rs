// SPDX-License-Identifier: MIT OR Apache-2.0
//! asb-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for Agent Switchboard.
//!
//! Everything the hub schedules, dispatches, and audits is expressed in the
//! types of this crate: the request model, service policies from the
//! registry, the hub event taxonomy, and the usage counters reported by
//! agent invocations. If you only take one dependency, take this one.

/// Hub event taxonomy and the wire-message bridge shape.
pub mod event;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub use event::{A2aState, HubEvent, HubEventKind, OutputChunk, WireMessage};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Stable opaque identifier of a request.
///
/// Unique within the union of inbox and archive; the hub treats it as an
/// opaque key and never parses structure out of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Wrap a raw id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Request model
// ---------------------------------------------------------------------------

/// Scheduling priority of a request.
///
/// The derived `Ord` sorts `Critical` first, which is also the dispatch
/// order: candidates are admitted highest-priority first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Processed before all others.
    Critical,
    /// Elevated priority.
    High,
    /// Default priority.
    Medium,
    /// Lowest priority.
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        })
    }
}

impl FromStr for Priority {
    type Err = FieldParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(FieldParseError::new("priority", other)),
        }
    }
}

/// Lifecycle status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum RequestStatus {
    /// Waiting to be picked up.
    Pending,
    /// Explicitly approved; required before dispatch under hybrid maintainers.
    Approved,
    /// Declined; terminal.
    Rejected,
    /// Currently being executed by a worker.
    InProgress,
    /// Finished successfully; terminal.
    Completed,
    /// Finished unsuccessfully after exhausting retries; terminal.
    Failed,
}

impl RequestStatus {
    /// Returns `true` for the statuses that belong in the archive.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }

    /// Returns `true` if a transition from `self` to `to` is legal.
    ///
    /// The machine: pending/approved admit to in-progress; in-progress
    /// resolves to completed, failed, or back to pending (retry and
    /// startup recovery); pending may be approved or rejected externally.
    /// Terminal statuses never transition.
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Approved)
                | (Self::Pending, Self::Rejected)
                | (Self::Pending, Self::InProgress)
                | (Self::Approved, Self::InProgress)
                | (Self::Approved, Self::Rejected)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
                | (Self::InProgress, Self::Pending)
        )
    }

    /// The header-field spelling of this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = FieldParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "in-progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(FieldParseError::new("status", other)),
        }
    }
}

/// What kind of work a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// An implementation task for an agent.
    Task,
    /// A question to be answered by an agent.
    Question,
    /// An allowlisted hub command; carries `command` / `command_args`.
    Command,
    /// Anything else, including escalations.
    Other,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Task => "task",
            Self::Question => "question",
            Self::Command => "command",
            Self::Other => "other",
        })
    }
}

impl FromStr for RequestKind {
    type Err = FieldParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(Self::Task),
            "question" => Ok(Self::Question),
            "command" => Ok(Self::Command),
            "other" => Ok(Self::Other),
            other => Err(FieldParseError::new("type", other)),
        }
    }
}

/// A single unit of schedulable work, anchored to a file on disk.
///
/// The file is the source of truth; this struct is a read-through
/// projection of its header and body. Unknown header fields survive in
/// `extra` so a rewrite reproduces them verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Request {
    /// Stable opaque identifier.
    pub id: RequestId,

    /// Title from the `# Request:` heading, if present.
    pub title: Option<String>,

    /// Author of the request.
    pub from: String,

    /// Addressee of the request.
    pub to: String,

    /// Contract scope the request concerns.
    pub scope: String,

    /// Routing key: the inbox (service) this request was found in.
    pub service: String,

    /// What kind of work is being asked for.
    pub kind: RequestKind,

    /// Scheduling priority.
    pub priority: Priority,

    /// Current lifecycle status.
    pub status: RequestStatus,

    /// Creation timestamp, set by the original writer.
    pub created: DateTime<Utc>,

    /// Last-update timestamp, bumped on every rewrite.
    pub updated: DateTime<Utc>,

    /// Number of execution attempts started so far.
    #[serde(default)]
    pub attempts: u32,

    /// Ids of requests that must be archived as completed first.
    #[serde(default)]
    pub depends_on: Vec<RequestId>,

    /// Advisory directive grouping, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directive: Option<String>,

    /// Related contract identifier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_contract: Option<String>,

    /// Command name; present iff `kind` is [`RequestKind::Command`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments for `command`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_args: Option<String>,

    /// For escalations: the request this one was synthesized from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originated_from: Option<RequestId>,

    /// Unknown header fields, in original order, preserved on rewrite.
    #[serde(default)]
    pub extra: Vec<(String, String)>,

    /// Free-form markdown body.
    pub body: String,

    /// Where the file currently lives.
    pub path: PathBuf,
}

impl Request {
    /// Returns `true` if this request is eligible to start an execution
    /// attempt (dependency and maintainer gates still apply).
    #[must_use]
    pub fn is_dispatchable(&self) -> bool {
        matches!(self.status, RequestStatus::Pending | RequestStatus::Approved)
    }
}

// ---------------------------------------------------------------------------
// Service policy
// ---------------------------------------------------------------------------

/// Who maintains a service, and therefore how the hub treats its inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Maintainer {
    /// Fully agent-maintained; the hub dispatches freely.
    Ai,
    /// Human-maintained; the hub never runs these.
    Human,
    /// Agent-executed but human-gated; requires explicit approval.
    Hybrid,
    /// Owned by another system entirely; skipped.
    External,
}

impl FromStr for Maintainer {
    type Err = FieldParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai" => Ok(Self::Ai),
            "human" => Ok(Self::Human),
            "hybrid" => Ok(Self::Hybrid),
            "external" => Ok(Self::External),
            other => Err(FieldParseError::new("maintainer", other)),
        }
    }
}

/// Per-service policy loaded from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ServicePolicy {
    /// Maintainer class; gates admission.
    pub maintainer: Maintainer,

    /// Remote A2A endpoint; presence routes requests to the remote client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a2a_url: Option<String>,

    /// Working directory for local agent invocations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Directives
// ---------------------------------------------------------------------------

/// Phase of an (advisory) directive grouping several requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DirectivePhase {
    /// Scoping and planning.
    Planning,
    /// Inter-service negotiation.
    Negotiating,
    /// Implementation underway.
    Implementing,
    /// Verification underway.
    Testing,
    /// All member requests done.
    Completed,
    /// Abandoned or exhausted.
    Failed,
}

// ---------------------------------------------------------------------------
// Invocation results
// ---------------------------------------------------------------------------

/// Best-effort normalized token counters reported by an agent invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TokenUsage {
    /// Input (prompt) tokens consumed.
    pub input_tokens: Option<u64>,
    /// Output (completion) tokens produced.
    pub output_tokens: Option<u64>,
}

/// Outcome of one agent invocation, local or remote.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InvokeOutcome {
    /// Whether the invocation finished successfully.
    pub success: bool,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,

    /// Estimated cost in US dollars, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,

    /// Number of agent turns, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u32>,

    /// Normalized token usage, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,

    /// Model that served the invocation, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Error summary when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// History records
// ---------------------------------------------------------------------------

/// One audit line: a single status transition of a single request.
///
/// Serialized as one JSON object per line into the per-(date, actor)
/// history files.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TransitionRecord {
    /// When the transition happened.
    pub ts: DateTime<Utc>,

    /// The request that transitioned.
    pub request_id: RequestId,

    /// Status before the transition.
    pub from_status: RequestStatus,

    /// Status after the transition.
    pub to_status: RequestStatus,

    /// Who drove the transition (a service name, or `hub`).
    pub actor: String,

    /// Free-form detail (error summary, recovery note, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// Execution duration, for terminal transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Estimated cost, for terminal transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,

    /// Agent turns, for terminal transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turns: Option<u32>,

    /// Token usage, for terminal transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,

    /// Model used, for terminal transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl TransitionRecord {
    /// Minimal record with just the transition triple.
    pub fn new(
        request_id: RequestId,
        from_status: RequestStatus,
        to_status: RequestStatus,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            ts: Utc::now(),
            request_id,
            from_status,
            to_status,
            actor: actor.into(),
            detail: None,
            duration_ms: None,
            cost_usd: None,
            turns: None,
            token_usage: None,
            model: None,
        }
    }

    /// Attach a free-form detail string.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach the counters from an invocation outcome.
    #[must_use]
    pub fn with_outcome(mut self, outcome: &InvokeOutcome) -> Self {
        self.duration_ms = Some(outcome.duration_ms);
        self.cost_usd = outcome.cost_usd;
        self.turns = outcome.num_turns;
        self.token_usage = outcome.token_usage.clone();
        self.model = outcome.model.clone();
        self
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A header field carried a value outside its closed vocabulary.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid value '{value}' for field '{field}'")]
pub struct FieldParseError {
    /// The header field name.
    pub field: &'static str,
    /// The offending value.
    pub value: String,
}

impl FieldParseError {
    fn new(field: &'static str, value: &str) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}
