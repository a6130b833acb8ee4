//! Snapshots of in-memory backends, for assertions and host summaries.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Ready for checkout now.
    pub visible: usize,
    /// Checked out, lease still running.
    pub leased: usize,
    /// Posted with a delay that has not elapsed yet.
    pub delayed: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.visible + self.leased + self.delayed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCounts {
    pub records: usize,
    pub completed: usize,
    /// Records with a non-empty `children_statuses` (fork records).
    pub forks: usize,
    /// Records with a parent (leaf records of fork children).
    pub with_parent: usize,
    /// Subscribers still waiting across all records.
    pub waiting_subscribers: usize,
}
