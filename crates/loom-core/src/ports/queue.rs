//! QueuePort - at-least-once メッセージキューの抽象化
//!
//! # 設計原則
//! - メッセージの「所有」はロックではなく lease（visibility timeout）
//! - lease 中は他の checkout から見えない
//! - lease が切れた後の update/delete は `LeaseLost` になりうる。
//!   呼び出し側は「他の誰かが所有している」とみなしてログを出して諦める
//! - content は文字列（クラウドキューと同じ）。パースは呼び出し側の責務

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::domain::{Continuation, MessageId, QueueId};
use crate::error::LoomError;

/// Opaque lease token handed out with every checkout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receipt(String);

impl Receipt {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A checked-out message. Owned by the worker until its lease expires.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: MessageId,
    pub receipt: Receipt,
    pub content: String,
    pub insertion_time: DateTime<Utc>,
    pub dequeue_count: u32,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("lease on {message_id} lost: another consumer owns it or it was deleted")]
    LeaseLost { message_id: MessageId },

    #[error("backend: {0}")]
    Backend(String),
}

#[async_trait]
pub trait QueuePort: Send + Sync {
    fn id(&self) -> &QueueId;

    /// Enqueue, visible immediately.
    async fn post(&self, content: String) -> Result<MessageId, QueueError>;

    /// Enqueue, visible after `delay`.
    async fn post_in(&self, content: String, delay: Duration) -> Result<MessageId, QueueError>;

    /// Check out up to `batch_size` visible messages, each leased for `lease`.
    /// An empty vector means the queue has nothing visible right now.
    async fn try_get_message_batch(
        &self,
        batch_size: usize,
        lease: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Replace content and reset the lease to `lease` from now.
    async fn update(
        &self,
        message: &QueueMessage,
        content: String,
        lease: Duration,
    ) -> Result<(), QueueError>;

    /// Reset the lease to `lease` from now, content unchanged.
    async fn update_visibility(
        &self,
        message: &QueueMessage,
        lease: Duration,
    ) -> Result<(), QueueError>;

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError>;

    fn insertion_time(&self, message: &QueueMessage) -> DateTime<Utc> {
        message.insertion_time
    }
}

/// A checked-out message together with the queue that leased it.
///
/// Handed to the request's transition so a long-running one can push its
/// own visibility timeout out before it expires.
#[derive(Clone)]
pub struct Lease {
    queue: Arc<dyn QueuePort>,
    message: QueueMessage,
}

impl Lease {
    pub fn new(queue: Arc<dyn QueuePort>, message: QueueMessage) -> Self {
        Self { queue, message }
    }

    pub fn queue_id(&self) -> &QueueId {
        self.queue.id()
    }

    pub fn message(&self) -> &QueueMessage {
        &self.message
    }

    /// Keep the message invisible for `lease` from now. `LeaseLost` once
    /// another consumer has checked it out or it is gone.
    pub async fn extend(&self, lease: Duration) -> Result<(), QueueError> {
        self.queue.update_visibility(&self.message, lease).await
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("queue", self.queue.id())
            .field("message_id", &self.message.id)
            .field("dequeue_count", &self.message.dequeue_count)
            .finish()
    }
}

/// Typed view over message content.
pub trait QueuePortExt: QueuePort {
    fn try_get_content<T: DeserializeOwned>(
        &self,
        message: &QueueMessage,
    ) -> Result<T, serde_json::Error> {
        serde_json::from_str(&message.content)
    }
}

impl<Q: QueuePort + ?Sized> QueuePortExt for Q {}

/// All queues the engine may post to, by id.
///
/// Continuations name their target queue, so resuming a caller that lives on
/// another queue goes through here.
#[derive(Clone, Default)]
pub struct QueueDirectory {
    queues: HashMap<QueueId, Arc<dyn QueuePort>>,
}

impl QueueDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, queue: Arc<dyn QueuePort>) {
        self.queues.insert(queue.id().clone(), queue);
    }

    pub fn get(&self, id: &QueueId) -> Result<&Arc<dyn QueuePort>, LoomError> {
        self.queues
            .get(id)
            .ok_or_else(|| LoomError::UnknownQueue(id.to_string()))
    }

    pub async fn post(&self, continuation: &Continuation) -> Result<MessageId, LoomError> {
        let queue = self.get(&continuation.queue)?;
        Ok(queue.post(continuation.content.clone()).await?)
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
