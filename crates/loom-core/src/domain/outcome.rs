//! Outcome model: what happened to one processed message, and what the
//! scheduler does with the message afterwards.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ids::{MessageId, QueueId, RequestId};

/// Queue action applied to a processed message. Exactly one per message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestAction {
    /// No further processing: terminal success, suspension, or unrecoverable.
    Delete,

    /// Extend the lease only, content unchanged.
    PostponeFor(Duration),

    /// Persist new content and extend the lease.
    PostponeAndReplace(String, Duration),
}

impl RequestAction {
    pub fn kind(&self) -> &'static str {
        match self {
            RequestAction::Delete => "delete",
            RequestAction::PostponeFor(_) => "postpone",
            RequestAction::PostponeAndReplace(..) => "postpone_and_replace",
        }
    }
}

/// Classification of a processed message.
///
/// We serialize as SCREAMING_SNAKE_CASE so sinks can index on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestOutcome {
    /// Handler ran to completion (any step, including suspension).
    Processed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        returned: Option<serde_json::Value>,
    },

    /// Handler refused this message type.
    Rejected { reason: String },

    /// Handler failed; `detail` carries the full error chain.
    ExceptionThrown { detail: String },

    /// Payload could not be parsed; the message was discarded.
    DeserializationError { detail: String },
}

impl RequestOutcome {
    pub fn processed() -> Self {
        RequestOutcome::Processed { returned: None }
    }

    pub fn returned(value: serde_json::Value) -> Self {
        RequestOutcome::Processed {
            returned: Some(value),
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, RequestOutcome::Processed { .. })
    }
}

/// One entry handed to the outcome sink per processed message.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeReport {
    pub queue: QueueId,
    pub message_id: MessageId,
    pub request_id: Option<RequestId>,
    pub agent: Option<String>,
    pub outcome: RequestOutcome,
    pub action: &'static str,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_kind_serializes_as_tag() {
        let v = serde_json::to_value(RequestOutcome::Rejected {
            reason: "nope".into(),
        })
        .unwrap();
        assert_eq!(v["kind"], "REJECTED");
        assert_eq!(v["reason"], "nope");

        let v = serde_json::to_value(RequestOutcome::processed()).unwrap();
        assert_eq!(v, serde_json::json!({"kind": "PROCESSED"}));
    }

    #[test]
    fn only_processed_is_success() {
        assert!(!RequestOutcome::returned(serde_json::json!(1)).is_failure());
        assert!(RequestOutcome::DeserializationError { detail: "x".into() }.is_failure());
        assert!(RequestOutcome::ExceptionThrown { detail: "x".into() }.is_failure());
    }
}
