//! InMemoryQueue - 開発・テスト用のキュー
//!
//! # 学習ポイント
//! - visibility timeout を tokio::time::Instant で表現（テストで time::pause が効く）
//! - checkout ごとに新しい receipt を発行。古い receipt での操作は LeaseLost
//! - ロックは各操作の中で完結（ロック跨ぎ await しない）

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::domain::{MessageId, QueueId};
use crate::observability::QueueCounts;
use crate::ports::{QueueError, QueueMessage, QueuePort, Receipt};

/// Stand-in for "never" when a delay does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + delay`, saturating at `FAR_FUTURE` from now.
fn deadline(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE)
}

#[derive(Debug)]
struct Slot {
    content: String,
    visible_at: Instant,
    /// Receipt of the current (or last) checkout; None if never checked out.
    receipt: Option<Receipt>,
    insertion_time: DateTime<Utc>,
    dequeue_count: u32,
}

struct InMemoryQueueState {
    /// MessageId は monotonic ULID なので、BTreeMap の順序 ≒ 投入順
    messages: BTreeMap<MessageId, Slot>,
    ids: ulid::Generator,
    next_receipt: u64,
}

impl InMemoryQueueState {
    fn allocate_id(&mut self) -> MessageId {
        let ulid = self.ids.generate().unwrap_or_else(|_| ulid::Ulid::new());
        MessageId::from_ulid(ulid)
    }

    fn allocate_receipt(&mut self) -> Receipt {
        self.next_receipt += 1;
        Receipt::new(format!("r{}", self.next_receipt))
    }

    /// The slot if `message` still holds its lease.
    fn owned_slot(&mut self, message: &QueueMessage) -> Result<&mut Slot, QueueError> {
        let lost = QueueError::LeaseLost {
            message_id: message.id,
        };
        match self.messages.get_mut(&message.id) {
            Some(slot) if slot.receipt.as_ref() == Some(&message.receipt) => Ok(slot),
            _ => Err(lost),
        }
    }
}

pub struct InMemoryQueue {
    id: QueueId,
    state: Arc<Mutex<InMemoryQueueState>>,
}

impl InMemoryQueue {
    pub fn new(id: QueueId) -> Self {
        Self {
            id,
            state: Arc::new(Mutex::new(InMemoryQueueState {
                messages: BTreeMap::new(),
                ids: ulid::Generator::new(),
                next_receipt: 0,
            })),
        }
    }

    pub async fn counts(&self) -> QueueCounts {
        let state = self.state.lock().await;
        let now = Instant::now();
        let mut counts = QueueCounts::default();
        for slot in state.messages.values() {
            if slot.visible_at <= now {
                counts.visible += 1;
            } else if slot.receipt.is_some() {
                counts.leased += 1;
            } else {
                counts.delayed += 1;
            }
        }
        counts
    }

    /// Every stored content, visible or not, in insertion order.
    pub async fn contents(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.messages.values().map(|s| s.content.clone()).collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.messages.is_empty()
    }

    async fn enqueue(&self, content: String, delay: Duration) -> MessageId {
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        state.messages.insert(
            id,
            Slot {
                content,
                visible_at: deadline(Instant::now(), delay),
                receipt: None,
                insertion_time: Utc::now(),
                dequeue_count: 0,
            },
        );
        id
    }
}

#[async_trait]
impl QueuePort for InMemoryQueue {
    fn id(&self) -> &QueueId {
        &self.id
    }

    async fn post(&self, content: String) -> Result<MessageId, QueueError> {
        Ok(self.enqueue(content, Duration::ZERO).await)
    }

    async fn post_in(&self, content: String, delay: Duration) -> Result<MessageId, QueueError> {
        Ok(self.enqueue(content, delay).await)
    }

    async fn try_get_message_batch(
        &self,
        batch_size: usize,
        lease: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let ready: Vec<MessageId> = state
            .messages
            .iter()
            .filter(|(_, slot)| slot.visible_at <= now)
            .map(|(id, _)| *id)
            .take(batch_size)
            .collect();

        let mut batch = Vec::with_capacity(ready.len());
        for id in ready {
            let receipt = state.allocate_receipt();
            let Some(slot) = state.messages.get_mut(&id) else {
                continue;
            };
            slot.visible_at = deadline(now, lease);
            slot.receipt = Some(receipt.clone());
            slot.dequeue_count += 1;
            batch.push(QueueMessage {
                id,
                receipt,
                content: slot.content.clone(),
                insertion_time: slot.insertion_time,
                dequeue_count: slot.dequeue_count,
            });
        }
        Ok(batch)
    }

    async fn update(
        &self,
        message: &QueueMessage,
        content: String,
        lease: Duration,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let slot = state.owned_slot(message)?;
        slot.content = content;
        slot.visible_at = deadline(Instant::now(), lease);
        Ok(())
    }

    async fn update_visibility(
        &self,
        message: &QueueMessage,
        lease: Duration,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let slot = state.owned_slot(message)?;
        slot.visible_at = deadline(Instant::now(), lease);
        Ok(())
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.owned_slot(message)?;
        state.messages.remove(&message.id);
        Ok(())
    }
}
