//! JoinStore port - Join Record の永続化
//!
//! # 設計原則
//! - ロックではなく楽観的並行性制御（record ごとの ETag で compare-and-swap）
//! - 異なる record への更新は完全に並列に進む
//! - Conflict / Throttled はリトライ可能。合計 timeout を超えたら致命的
//! - 存在しない record の get は protocol violation（致命的）

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::domain::{JoinEntry, JoinError, JoinId, RetryPolicy};
use crate::error::LoomError;

/// Version tag of a stored record. Changes on every successful write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ETag(String);

impl ETag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A value read together with the tag it was stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub etag: ETag,
}

#[derive(Debug, Error)]
pub enum JoinStoreError {
    #[error("join record {0} already exists")]
    AlreadyExists(JoinId),

    #[error("join record {0} not found")]
    NotFound(JoinId),

    #[error("join record {0} was modified concurrently")]
    Conflict(JoinId),

    #[error("backend throttled a request on {0}")]
    Throttled(JoinId),

    #[error("gave up updating {join_id} after {attempts} attempts in {elapsed:?}")]
    Timeout {
        join_id: JoinId,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("backend: {0}")]
    Backend(String),
}

impl JoinStoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, JoinStoreError::Conflict(_) | JoinStoreError::Throttled(_))
    }
}

#[async_trait]
pub trait JoinStore: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the id is taken.
    async fn add(&self, id: &JoinId, entry: JoinEntry) -> Result<(), JoinStoreError>;

    /// Point read. Fails with `NotFound` if absent.
    async fn get(&self, id: &JoinId) -> Result<Versioned<JoinEntry>, JoinStoreError>;

    /// Write `entry` only if the stored tag still equals `expected`.
    /// Fails with `Conflict` otherwise.
    async fn replace(
        &self,
        id: &JoinId,
        entry: JoinEntry,
        expected: &ETag,
    ) -> Result<ETag, JoinStoreError>;
}

/// Optimistic read-modify-write.
///
/// Reads the record, applies `transform`, writes back conditioned on the tag
/// read. Conflicts and throttling are retried per `policy` until its timeout;
/// then `JoinStoreError::Timeout` is returned. An error from `transform` aborts
/// immediately. A transform that leaves the record unchanged skips the write.
///
/// `transform` may run several times; only the output of the committed run is
/// returned.
pub async fn update_entry<T, F>(
    store: &dyn JoinStore,
    id: &JoinId,
    policy: &RetryPolicy,
    mut transform: F,
) -> Result<(JoinEntry, T), LoomError>
where
    F: FnMut(&mut JoinEntry) -> Result<T, JoinError> + Send,
    T: Send,
{
    let started = tokio::time::Instant::now();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let conflict = match store.get(id).await {
            Ok(Versioned { value, etag }) => {
                let mut entry = value.clone();
                let out = transform(&mut entry).map_err(|source| LoomError::Join {
                    join_id: *id,
                    source,
                })?;
                if entry == value {
                    return Ok((entry, out));
                }
                match store.replace(id, entry.clone(), &etag).await {
                    Ok(_) => return Ok((entry, out)),
                    Err(e) if e.is_retryable() => e,
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) if e.is_retryable() => e,
            Err(e) => return Err(e.into()),
        };

        let elapsed = started.elapsed();
        if !policy.allows_retry(elapsed, attempts) {
            return Err(JoinStoreError::Timeout {
                join_id: *id,
                attempts,
                elapsed,
            }
            .into());
        }
        debug!(join_id = %id, attempts, reason = %conflict, "retrying join record update");
        tokio::time::sleep(policy.next_delay(attempts)).await;
    }
}
