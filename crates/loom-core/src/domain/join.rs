//! Join Record: fork/join bookkeeping for one fork (or one fork child).
//!
//! Design:
//! - A fork record lists every child in `children_statuses` (all Pending at creation).
//! - Every fork child also owns a leaf record whose `parent` is the fork.
//! - Completion of a record with a parent bubbles into the parent's child slot.
//! - Invariant: `status` goes Pending -> Completed exactly once. Once Completed,
//!   subscribe resolves immediately and never appends.
//!
//! All methods here are pure state transitions. Persistence and retries live in
//! `ports::join_store`, side effects (re-enqueueing subscribers) in the coordinator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::envelope::Continuation;
use super::ids::{JoinId, RequestId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinStatus {
    Pending,
    Completed,
}

/// Which condition a subscriber waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinCondition {
    /// Every child Completed.
    All,
    /// At least one child Completed.
    Any,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("request {child} is not a child of this join")]
    UnknownChild { child: RequestId },
}

/// One record per fork, plus one leaf record per fork child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinEntry {
    pub status: JoinStatus,

    #[serde(default)]
    pub when_all_subscribers: Vec<Continuation>,

    #[serde(default)]
    pub when_any_subscribers: Vec<Continuation>,

    #[serde(default)]
    pub children_statuses: BTreeMap<RequestId, JoinStatus>,

    /// Return values of completed children, keyed like `children_statuses`.
    #[serde(default)]
    pub children_results: BTreeMap<RequestId, serde_json::Value>,

    /// Return value of the request owning a leaf record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<JoinId>,
}

/// Result of subscribing to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    /// Condition already holds: the caller proceeds now, nothing was stored.
    Resolved,
    /// Continuation stored; it will be re-enqueued when the condition holds.
    Queued,
}

/// What a completion changed in one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    /// Subscribers to re-enqueue, each exactly once.
    pub resumed: Vec<Continuation>,
    /// The record itself moved Pending -> Completed in this update.
    pub completed_now: bool,
}

impl JoinEntry {
    /// Fork record with every child Pending.
    pub fn fork(children: impl IntoIterator<Item = RequestId>) -> Self {
        Self {
            status: JoinStatus::Pending,
            when_all_subscribers: Vec::new(),
            when_any_subscribers: Vec::new(),
            children_statuses: children
                .into_iter()
                .map(|c| (c, JoinStatus::Pending))
                .collect(),
            children_results: BTreeMap::new(),
            result: None,
            parent: None,
        }
    }

    /// Leaf record of a fork child.
    pub fn leaf(parent: JoinId) -> Self {
        let mut entry = Self::fork(std::iter::empty());
        entry.parent = Some(parent);
        entry
    }

    pub fn is_completed(&self) -> bool {
        self.status == JoinStatus::Completed
    }

    pub fn any_child_completed(&self) -> bool {
        self.children_statuses
            .values()
            .any(|s| *s == JoinStatus::Completed)
    }

    pub fn is_satisfied(&self, condition: JoinCondition) -> bool {
        match condition {
            JoinCondition::All => self.is_completed(),
            JoinCondition::Any => self.is_completed() || self.any_child_completed(),
        }
    }

    /// Register interest, or resolve immediately if the condition already holds.
    pub fn subscribe(&mut self, condition: JoinCondition, continuation: Continuation) -> Subscription {
        if self.is_satisfied(condition) {
            return Subscription::Resolved;
        }
        match condition {
            JoinCondition::All => self.when_all_subscribers.push(continuation),
            JoinCondition::Any => self.when_any_subscribers.push(continuation),
        }
        Subscription::Queued
    }

    /// Mark one child slot Completed.
    ///
    /// Repeated completions of the same child are no-ops, so replaying a
    /// completion after a crash is safe.
    pub fn complete_child(
        &mut self,
        child: RequestId,
        result: Option<serde_json::Value>,
    ) -> Result<Completion, JoinError> {
        let was_any_completed = self.any_child_completed();
        let slot = self
            .children_statuses
            .get_mut(&child)
            .ok_or(JoinError::UnknownChild { child })?;
        if *slot == JoinStatus::Completed {
            return Ok(Completion::default());
        }
        *slot = JoinStatus::Completed;
        if let Some(result) = result {
            self.children_results.insert(child, result);
        }

        let mut completion = Completion::default();
        if !was_any_completed {
            completion
                .resumed
                .extend(self.when_any_subscribers.drain(..));
        }
        let all_done = self
            .children_statuses
            .values()
            .all(|s| *s == JoinStatus::Completed);
        if all_done {
            completion.resumed.extend(self.finish());
            completion.completed_now = true;
        }
        Ok(completion)
    }

    /// Complete the record itself (leaf records, when their request returns).
    pub fn complete(&mut self, result: Option<serde_json::Value>) -> Completion {
        if self.is_completed() {
            return Completion::default();
        }
        self.result = result;
        Completion {
            resumed: self.finish(),
            completed_now: true,
        }
    }

    fn finish(&mut self) -> Vec<Continuation> {
        self.status = JoinStatus::Completed;
        let mut resumed: Vec<Continuation> = self.when_all_subscribers.drain(..).collect();
        resumed.extend(self.when_any_subscribers.drain(..));
        resumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::QueueId;
    use rstest::rstest;

    fn cont(tag: &str) -> Continuation {
        Continuation {
            queue: QueueId::new("q"),
            content: tag.to_string(),
        }
    }

    fn two_children() -> (JoinEntry, RequestId, RequestId) {
        let a = RequestId::generate();
        let b = RequestId::generate();
        (JoinEntry::fork([a, b]), a, b)
    }

    #[test]
    fn fork_starts_all_pending() {
        let (entry, a, b) = two_children();
        assert_eq!(entry.children_statuses.len(), 2);
        assert_eq!(entry.children_statuses[&a], JoinStatus::Pending);
        assert_eq!(entry.children_statuses[&b], JoinStatus::Pending);
        assert_eq!(entry.status, JoinStatus::Pending);
        assert!(entry.parent.is_none());
    }

    #[test]
    fn when_all_resumes_once_after_last_child() {
        let (mut entry, a, b) = two_children();
        assert_eq!(entry.subscribe(JoinCondition::All, cont("w")), Subscription::Queued);

        let first = entry.complete_child(a, None).unwrap();
        assert!(first.resumed.is_empty());
        assert!(!first.completed_now);

        let second = entry.complete_child(b, None).unwrap();
        assert_eq!(second.resumed, vec![cont("w")]);
        assert!(second.completed_now);
        assert!(entry.when_all_subscribers.is_empty());

        // replayed completion changes nothing
        let replay = entry.complete_child(b, None).unwrap();
        assert_eq!(replay, Completion::default());
    }

    #[test]
    fn when_any_resumes_on_first_child_only() {
        let (mut entry, a, b) = two_children();
        entry.subscribe(JoinCondition::Any, cont("any"));

        let first = entry.complete_child(b, Some(serde_json::json!(7))).unwrap();
        assert_eq!(first.resumed, vec![cont("any")]);
        assert_eq!(entry.children_results[&b], 7);

        let second = entry.complete_child(a, None).unwrap();
        assert!(second.resumed.is_empty());
        assert!(second.completed_now);
    }

    #[rstest]
    #[case(JoinCondition::All)]
    #[case(JoinCondition::Any)]
    fn late_subscribe_resolves_without_appending(#[case] condition: JoinCondition) {
        let (mut entry, a, b) = two_children();
        entry.complete_child(a, None).unwrap();
        entry.complete_child(b, None).unwrap();

        assert_eq!(entry.subscribe(condition, cont("late")), Subscription::Resolved);
        assert!(entry.when_all_subscribers.is_empty());
        assert!(entry.when_any_subscribers.is_empty());
    }

    #[test]
    fn any_subscribe_after_first_child_resolves() {
        let (mut entry, a, _) = two_children();
        entry.complete_child(a, None).unwrap();
        assert_eq!(entry.subscribe(JoinCondition::Any, cont("x")), Subscription::Resolved);
        assert_eq!(entry.subscribe(JoinCondition::All, cont("y")), Subscription::Queued);
    }

    #[test]
    fn unknown_child_is_rejected() {
        let (mut entry, _, _) = two_children();
        let stranger = RequestId::generate();
        assert_eq!(
            entry.complete_child(stranger, None),
            Err(JoinError::UnknownChild { child: stranger })
        );
    }

    #[test]
    fn leaf_completes_once() {
        let parent = JoinId::new(ulid::Ulid::new(), chrono::Utc::now());
        let mut leaf = JoinEntry::leaf(parent);
        let done = leaf.complete(Some(serde_json::json!("r")));
        assert!(done.completed_now);
        assert_eq!(leaf.result, Some(serde_json::json!("r")));
        assert!(!leaf.complete(None).completed_now);
        assert_eq!(leaf.result, Some(serde_json::json!("r")));
    }
}
