//! TransitionContext - transition 関数に渡される読み取り専用の文脈

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::{JoinId, QueueId, RequestId, RequestMetadata};
use crate::error::{AgentError, LoomError};
use crate::ports::{JoinStore, Lease};

pub struct TransitionContext<H, I> {
    header: H,
    input: I,
    metadata: RequestMetadata,
    queue: QueueId,
    callee_return_result: Option<Value>,
    join_store: Arc<dyn JoinStore>,
    lease: Option<Lease>,
}

impl<H, I> TransitionContext<H, I> {
    pub fn new(
        header: H,
        input: I,
        metadata: RequestMetadata,
        queue: QueueId,
        callee_return_result: Option<Value>,
        join_store: Arc<dyn JoinStore>,
    ) -> Self {
        Self {
            header,
            input,
            metadata,
            queue,
            callee_return_result,
            join_store,
            lease: None,
        }
    }

    pub fn with_lease(mut self, lease: Lease) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Push this request's message visibility out to `lease` from now, for
    /// transitions that may outlive the lease taken at checkout. A no-op when
    /// the transition is not running on a checked-out message.
    pub async fn extend_lease(&self, lease: Duration) -> Result<(), LoomError> {
        if let Some(held) = &self.lease {
            held.extend(lease).await?;
        }
        Ok(())
    }

    pub fn header(&self) -> &H {
        &self.header
    }

    pub fn input(&self) -> &I {
        &self.input
    }

    pub fn metadata(&self) -> &RequestMetadata {
        &self.metadata
    }

    pub fn request_id(&self) -> RequestId {
        self.metadata.request_id
    }

    /// Queue this request lives on.
    pub fn queue(&self) -> &QueueId {
        &self.queue
    }

    /// Return value of the last `Call`, present only on the message that
    /// resumes the caller at its return state.
    pub fn callee_result<T: DeserializeOwned>(&self) -> Result<Option<T>, AgentError> {
        self.callee_return_result
            .as_ref()
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(AgentError::from)
    }

    /// Like `callee_result`, but a missing value is an error.
    pub fn expect_callee_result<T: DeserializeOwned>(&self) -> Result<T, AgentError> {
        self.callee_result()?
            .ok_or_else(|| AgentError::new("resumed without a callee return value"))
    }

    /// Return values of the fork's children that have completed so far.
    pub async fn join_results(
        &self,
        join_id: JoinId,
    ) -> Result<BTreeMap<RequestId, Value>, LoomError> {
        Ok(self.join_store.get(&join_id).await?.value.children_results)
    }

    /// Typed variant of `join_results`, ordered by child request id.
    pub async fn join_results_as<T: DeserializeOwned>(
        &self,
        join_id: JoinId,
    ) -> Result<Vec<T>, AgentError> {
        self.join_results(join_id)
            .await?
            .into_values()
            .map(|v| serde_json::from_value(v).map_err(AgentError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JoinEntry;
    use crate::impls::InMemoryJoinStore;

    fn ctx(callee: Option<Value>, store: Arc<dyn JoinStore>) -> TransitionContext<String, u32> {
        TransitionContext::new(
            "tenant-a".to_string(),
            7,
            RequestMetadata::new(RequestId::generate()),
            QueueId::new("q"),
            callee,
            store,
        )
    }

    #[test]
    fn callee_result_decodes_when_present() {
        let store: Arc<dyn JoinStore> = Arc::new(InMemoryJoinStore::new());
        let with = ctx(Some(serde_json::json!(42)), store.clone());
        assert_eq!(with.callee_result::<u64>().unwrap(), Some(42));
        assert_eq!(*with.input(), 7);
        assert_eq!(with.header(), "tenant-a");
        assert_eq!(with.queue().as_str(), "q");
        assert_eq!(with.request_id(), with.metadata().request_id);
        assert!(with.metadata().join.is_none());

        let without = ctx(None, store);
        assert_eq!(without.callee_result::<u64>().unwrap(), None);
        assert!(without.expect_callee_result::<u64>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn extend_lease_moves_the_message_deadline() {
        use crate::impls::InMemoryQueue;
        use crate::ports::{QueueError, QueuePort};

        let queue = Arc::new(InMemoryQueue::new(QueueId::new("q")));
        queue.post("m".into()).await.unwrap();
        let msg = queue
            .try_get_message_batch(1, Duration::from_secs(1))
            .await
            .unwrap()
            .remove(0);
        let store: Arc<dyn JoinStore> = Arc::new(InMemoryJoinStore::new());

        let unleased = ctx(None, store.clone());
        unleased.extend_lease(Duration::from_secs(5)).await.unwrap();

        let leased = ctx(None, store).with_lease(Lease::new(queue.clone(), msg));
        leased.extend_lease(Duration::from_secs(5)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(queue.try_get_message_batch(1, Duration::from_secs(1)).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(queue.try_get_message_batch(1, Duration::from_secs(1)).await.unwrap().len(), 1);
        let err = leased.extend_lease(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, LoomError::Queue(QueueError::LeaseLost { .. })));
    }

    #[tokio::test]
    async fn join_results_reads_children_results() {
        let store = InMemoryJoinStore::new();
        let join_id = JoinId::new(ulid::Ulid::new(), chrono::Utc::now());
        let (a, b) = (RequestId::generate(), RequestId::generate());
        let mut entry = JoinEntry::fork([a, b]);
        entry.complete_child(a, Some(serde_json::json!(3))).unwrap();
        entry.complete_child(b, Some(serde_json::json!(4))).unwrap();
        store.add(&join_id, entry).await.unwrap();

        let ctx = ctx(None, Arc::new(store));
        let mut values: Vec<i64> = ctx.join_results_as(join_id).await.unwrap();
        values.sort();
        assert_eq!(values, vec![3, 4]);
    }
}
