//! WorkerPool - 同時処理数の上限
//!
//! # 設計
//! - Semaphore の permit = ワーカースロット
//! - acquire は `replacement_timeout` まで待つ。待ちきれなければ
//!   「前の保持者がハングして permit が戻ってこない」とみなし、permit を 1 つ補充して再試行
//! - キャンセルされたら `LoopCancelled` で抜ける

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// The dispatcher was asked to stop. Not an error for the outer driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("scheduler loop cancelled")]
pub struct LoopCancelled;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
    replacement_timeout: Duration,
}

impl WorkerPool {
    pub fn new(size: usize, replacement_timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            replacement_timeout,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free slot. Dropping the returned permit frees it.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, LoopCancelled> {
        loop {
            let acquire = self.permits.clone().acquire_owned();
            tokio::select! {
                _ = cancel.cancelled() => return Err(LoopCancelled),
                res = tokio::time::timeout(self.replacement_timeout, acquire) => match res {
                    Ok(Ok(permit)) => return Ok(permit),
                    Ok(Err(_closed)) => return Err(LoopCancelled),
                    Err(_elapsed) => {
                        warn!(
                            timeout_ms = self.replacement_timeout.as_millis() as u64,
                            pool_size = self.size,
                            "no worker slot freed in time, assuming one is lost and replacing it"
                        );
                        self.permits.add_permits(1);
                    }
                },
            }
        }
    }
}
