//! JoinCoordinator - fork / join / 完了伝播
//!
//! # Record の形
//! - fork ごとに 1 つの fork record（`children_statuses` に子 request id → Pending）
//! - 子ごとに 1 つの leaf record（key は `fork.leaf_of(child)`、`parent = fork`）
//!
//! 子の `Return` は自分の leaf を完了させ、leaf が完了していれば parent の slot を
//! 完了させる。parent を持つ record が完了するたびに上へ伝播する。
//!
//! すべての更新は `update_entry`（楽観的並行性制御）経由。ロックは使わない。

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::domain::{
    Completion, Continuation, JoinCondition, JoinEntry, JoinId, RequestId, RetryPolicy,
    Subscription,
};
use crate::error::LoomError;
use crate::ports::{update_entry, JoinStore, QueueDirectory};

#[derive(Clone)]
pub struct JoinCoordinator {
    store: Arc<dyn JoinStore>,
    queues: QueueDirectory,
    retry: RetryPolicy,
}

impl JoinCoordinator {
    pub fn new(store: Arc<dyn JoinStore>, queues: QueueDirectory, retry: RetryPolicy) -> Self {
        Self {
            store,
            queues,
            retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn JoinStore> {
        &self.store
    }

    /// Insert the fork record and one leaf record per child.
    ///
    /// Ids are freshly generated, so `AlreadyExists` here is fatal.
    pub async fn fork(&self, join_id: JoinId, children: &[RequestId]) -> Result<(), LoomError> {
        if children.is_empty() {
            return Err(LoomError::EmptyFork);
        }
        self.store
            .add(&join_id, JoinEntry::fork(children.iter().copied()))
            .await?;
        for child in children {
            self.store
                .add(&join_id.leaf_of(*child), JoinEntry::leaf(join_id))
                .await?;
        }
        debug!(join_id = %join_id, children = children.len(), "fork recorded");
        Ok(())
    }

    /// Register `continuation` on the record, or report that the condition
    /// already holds. A resolved subscription writes nothing.
    pub async fn subscribe(
        &self,
        join_id: JoinId,
        condition: JoinCondition,
        continuation: Continuation,
    ) -> Result<Subscription, LoomError> {
        let (_, subscription) = update_entry(self.store.as_ref(), &join_id, &self.retry, |entry| {
            Ok(entry.subscribe(condition, continuation.clone()))
        })
        .await?;
        debug!(join_id = %join_id, ?condition, ?subscription, "join subscription");
        Ok(subscription)
    }

    /// Record that `child` of the fork `join_id` returned `result`, then
    /// propagate upward while completed records have a parent.
    ///
    /// Safe to replay: completing an already completed slot is a no-op and
    /// propagation is re-attempted from any completed record.
    pub async fn complete(
        &self,
        join_id: JoinId,
        child: RequestId,
        result: Value,
    ) -> Result<(), LoomError> {
        let leaf = join_id.leaf_of(child);
        let (mut entry, completion) =
            update_entry(self.store.as_ref(), &leaf, &self.retry, |entry| {
                Ok(entry.complete(Some(result.clone())))
            })
            .await?;
        self.resume(&leaf, completion).await?;

        let mut current = leaf;
        while let (true, Some(parent)) = (entry.is_completed(), entry.parent) {
            let slot = current.slot();
            let carried = entry.result.clone();
            let (parent_entry, completion) =
                update_entry(self.store.as_ref(), &parent, &self.retry, |entry| {
                    entry.complete_child(slot, carried.clone())
                })
                .await?;
            self.resume(&parent, completion).await?;
            current = parent;
            entry = parent_entry;
        }
        Ok(())
    }

    async fn resume(&self, join_id: &JoinId, completion: Completion) -> Result<(), LoomError> {
        if completion.completed_now {
            debug!(join_id = %join_id, "join record completed");
        }
        for continuation in &completion.resumed {
            self.queues.post(continuation).await?;
        }
        if !completion.resumed.is_empty() {
            debug!(join_id = %join_id, resumed = completion.resumed.len(), "resumed subscribers");
        }
        Ok(())
    }
}
