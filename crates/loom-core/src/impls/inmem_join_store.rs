//! InMemoryJoinStore - テスト用の Join Store
//!
//! 本番実装と同じ compare-and-swap セマンティクスを守る:
//! record ごとに version を持ち、replace は期待 version が一致したときだけ成功する。
//!
//! `inject_conflicts` / `inject_throttles` で次の N 回の replace を失敗させられるので、
//! `update_entry` のリトライ経路をテストできる。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{JoinEntry, JoinId};
use crate::observability::JoinCounts;
use crate::ports::{ETag, JoinStore, JoinStoreError, Versioned};

#[derive(Debug)]
struct Record {
    entry: JoinEntry,
    version: u64,
}

impl Record {
    fn etag(&self) -> ETag {
        ETag::new(format!("v{}", self.version))
    }
}

#[derive(Debug, Default)]
struct Faults {
    conflicts: u32,
    throttles: u32,
}

#[derive(Debug, Default)]
struct InMemoryJoinStoreState {
    records: HashMap<JoinId, Record>,
    faults: Faults,
}

#[derive(Clone, Default)]
pub struct InMemoryJoinStore {
    state: Arc<Mutex<InMemoryJoinStoreState>>,
}

impl InMemoryJoinStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` replace calls with `Conflict`.
    pub async fn inject_conflicts(&self, n: u32) {
        self.state.lock().await.faults.conflicts = n;
    }

    /// Fail the next `n` replace calls with `Throttled`.
    pub async fn inject_throttles(&self, n: u32) {
        self.state.lock().await.faults.throttles = n;
    }

    pub async fn counts(&self) -> JoinCounts {
        let state = self.state.lock().await;
        let mut counts = JoinCounts::default();
        for record in state.records.values() {
            let entry = &record.entry;
            counts.records += 1;
            if entry.is_completed() {
                counts.completed += 1;
            }
            if !entry.children_statuses.is_empty() {
                counts.forks += 1;
            }
            if entry.parent.is_some() {
                counts.with_parent += 1;
            }
            counts.waiting_subscribers +=
                entry.when_all_subscribers.len() + entry.when_any_subscribers.len();
        }
        counts
    }

    pub async fn snapshot(&self) -> HashMap<JoinId, JoinEntry> {
        let state = self.state.lock().await;
        state
            .records
            .iter()
            .map(|(id, r)| (*id, r.entry.clone()))
            .collect()
    }
}

#[async_trait]
impl JoinStore for InMemoryJoinStore {
    async fn add(&self, id: &JoinId, entry: JoinEntry) -> Result<(), JoinStoreError> {
        let mut state = self.state.lock().await;
        if state.records.contains_key(id) {
            return Err(JoinStoreError::AlreadyExists(*id));
        }
        state.records.insert(*id, Record { entry, version: 1 });
        Ok(())
    }

    async fn get(&self, id: &JoinId) -> Result<Versioned<JoinEntry>, JoinStoreError> {
        let state = self.state.lock().await;
        let record = state.records.get(id).ok_or(JoinStoreError::NotFound(*id))?;
        Ok(Versioned {
            value: record.entry.clone(),
            etag: record.etag(),
        })
    }

    async fn replace(
        &self,
        id: &JoinId,
        entry: JoinEntry,
        expected: &ETag,
    ) -> Result<ETag, JoinStoreError> {
        let mut state = self.state.lock().await;
        if state.faults.throttles > 0 {
            state.faults.throttles -= 1;
            return Err(JoinStoreError::Throttled(*id));
        }
        if state.faults.conflicts > 0 {
            state.faults.conflicts -= 1;
            return Err(JoinStoreError::Conflict(*id));
        }

        let record = state
            .records
            .get_mut(id)
            .ok_or(JoinStoreError::NotFound(*id))?;
        if record.etag() != *expected {
            return Err(JoinStoreError::Conflict(*id));
        }
        record.entry = entry;
        record.version += 1;
        Ok(record.etag())
    }
}
