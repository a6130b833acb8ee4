//! Envelope - キューメッセージの中身
//!
//! Envelope は routing metadata + header + request を運ぶ。
//! Continuation（再開用のメッセージ）も完全にシリアライズ可能な形で持つので、
//! プロセス境界をまたいでもクロージャは一切使わない。

use serde::{Deserialize, Serialize};

use super::ids::{JoinId, QueueId, RequestId};

/// A message ready to be posted to a queue to resume a suspended request.
///
/// `content` is an already encoded envelope, so whoever resumes the request
/// does not need to know its agent's types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    pub queue: QueueId,
    pub content: String,
}

/// Routing metadata of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub request_id: RequestId,

    /// Fork that spawned this request. Its own leaf record is
    /// `join.leaf_of(request_id)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinId>,

    /// Set on callees spawned by `Call`: where to deliver the return value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<Continuation>,
}

impl RequestMetadata {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            join: None,
            caller: None,
        }
    }

    pub fn with_join(mut self, join: JoinId) -> Self {
        self.join = Some(join);
        self
    }

    pub fn with_caller(mut self, caller: Continuation) -> Self {
        self.caller = Some(caller);
        self
    }
}

/// The unit stored in a queue message.
///
/// `callee_return_result` is populated only on the message resuming a
/// `Call` continuation and is consumed by the first transition that runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<H, R> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RequestMetadata>,

    pub header: H,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callee_return_result: Option<serde_json::Value>,

    pub request: R,
}

impl<H, R> Envelope<H, R> {
    pub fn new(header: H, request: R) -> Self {
        Self {
            metadata: None,
            header,
            callee_return_result: None,
            request,
        }
    }

    pub fn with_metadata(mut self, metadata: RequestMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn request_id(&self) -> Option<RequestId> {
        self.metadata.as_ref().map(|m| m.request_id)
    }
}

/// Wire form of a stateful request, tagged with the agent that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub agent: String,
    pub state: serde_json::Value,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Envelope as read from and written to queues.
pub type WireEnvelope = Envelope<serde_json::Value, AgentRequest>;
