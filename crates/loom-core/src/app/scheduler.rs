//! QueueScheduler - 優先度付きマルチキューのディスパッチループ
//!
//! # ループ
//! 1. heartbeat の時間なら heartbeat を出す
//! 2. processors を優先度順にスキャンし、最初に空でない batch を checkout
//!    （lease = batch_size × max_process_time）
//! 3. 各メッセージを WorkerPool のスロットを取ってから別タスクで処理
//! 4. どのキューも空なら idle_sleep だけ眠る
//!
//! キャンセルは CancellationToken。スロット待ちと idle sleep で観測し、
//! `LoopCancelled` で抜けたあと処理中のタスクを待ってから終了する。
//! checkout 済みでまだ始めていないメッセージは lease を 0 に戻して手放す。
//!
//! # 失敗の扱い
//! - envelope / agent の型に合わない（poison）→ DeserializationError、常に Delete
//! - Protocol 違反（空の fork、存在しない join record など）→ 常に Delete
//! - それ以外の handler エラー → ExceptionPolicy に従う
//!
//! 優先度の高いキューが低いキューを飢えさせうる（公平性は保証しない）。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::options::{ExceptionPolicy, Options};
use super::processor::{HandlerResult, QueueProcessor};
use super::worker_pool::{LoopCancelled, WorkerPool};
use crate::domain::{OutcomeReport, QueueId, RequestAction, RequestOutcome};
use crate::error::{ErrorKind, LoomError};
use crate::ports::{Lease, OutcomeSink, QueueError, QueueMessage, QueuePort};
use crate::typed::EnvelopeCodec;

pub struct QueueScheduler {
    processors: Vec<QueueProcessor>,
    options: Options,
    pool: WorkerPool,
    worker: MessageWorker,
    cancel: CancellationToken,
}

impl QueueScheduler {
    /// `processors` are served in priority order, first is highest.
    pub fn new(
        processors: Vec<QueueProcessor>,
        options: Options,
        sink: Arc<dyn OutcomeSink>,
    ) -> Self {
        let pool = WorkerPool::new(
            options.concurrent_request_workers,
            options.worker_replacement_timeout(),
        );
        let worker = MessageWorker {
            sink,
            codec: EnvelopeCodec,
            exception_policy: options.exception_policy,
        };
        Self {
            processors,
            options,
            pool,
            worker,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn queue_ids(&self) -> Vec<QueueId> {
        self.processors.iter().map(|p| p.id().clone()).collect()
    }

    pub fn spawn(self) -> SchedulerHandle {
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run());
        SchedulerHandle { cancel, task }
    }

    /// Run until cancelled, then wait for in-flight messages.
    pub async fn run(self) {
        let queues = self.queue_ids();
        info!(
            queues = ?queues,
            workers = self.pool.size(),
            "scheduler started"
        );

        let mut tasks = JoinSet::new();
        if let Err(LoopCancelled) = self.dispatch(&mut tasks).await {
            info!(in_flight = tasks.len(), "scheduler cancelled, draining in-flight requests");
        }
        while let Some(res) = tasks.join_next().await {
            if let Err(err) = res {
                error!(?err, "message task failed");
            }
        }
        info!("scheduler stopped");
    }

    async fn dispatch(&self, tasks: &mut JoinSet<()>) -> Result<(), LoopCancelled> {
        let mut next_heartbeat = Instant::now() + self.options.heartbeat_interval();
        loop {
            if self.cancel.is_cancelled() {
                return Err(LoopCancelled);
            }
            if Instant::now() >= next_heartbeat {
                self.heartbeat(tasks.len()).await;
                next_heartbeat = Instant::now() + self.options.heartbeat_interval();
            }
            while let Some(res) = tasks.try_join_next() {
                if let Err(err) = res {
                    error!(?err, "message task failed");
                }
            }

            match self.checkout().await {
                Some((processor, batch)) => {
                    let mut batch = batch.into_iter();
                    while let Some(message) = batch.next() {
                        let permit = match self.pool.acquire(&self.cancel).await {
                            Ok(permit) => permit,
                            Err(LoopCancelled) => {
                                release(processor, std::iter::once(message).chain(batch)).await;
                                return Err(LoopCancelled);
                            }
                        };
                        let worker = self.worker.clone();
                        let processor = processor.clone();
                        tasks.spawn(async move {
                            let _permit = permit;
                            worker.process(&processor, message).await;
                        });
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(LoopCancelled),
                        _ = tokio::time::sleep(self.options.idle_sleep()) => {}
                    }
                }
            }
        }
    }

    /// First non-empty batch in priority order.
    async fn checkout(&self) -> Option<(&QueueProcessor, Vec<QueueMessage>)> {
        for processor in &self.processors {
            let lease = processor.batch_lease();
            match processor
                .queue
                .try_get_message_batch(processor.message_batch_size, lease)
                .await
            {
                Ok(batch) if !batch.is_empty() => {
                    debug!(
                        queue = %processor.id(),
                        messages = batch.len(),
                        lease_ms = lease.as_millis() as u64,
                        "checked out batch"
                    );
                    return Some((processor, batch));
                }
                Ok(_) => {}
                Err(err) => error!(queue = %processor.id(), ?err, "checkout failed"),
            }
        }
        None
    }

    async fn heartbeat(&self, in_flight: usize) {
        let queues = self.queue_ids();
        info!(
            queues = ?queues,
            in_flight,
            free_workers = self.pool.available(),
            "heartbeat"
        );
        self.worker.sink.heartbeat(&queues).await;
    }
}

/// Handle to a spawned scheduler.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Cancel the loop and wait until in-flight messages are done.
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        self.cancel.cancel();
        self.task.await
    }
}

/// Per-message processing, shared by all worker tasks.
#[derive(Clone)]
struct MessageWorker {
    sink: Arc<dyn OutcomeSink>,
    codec: EnvelopeCodec,
    exception_policy: ExceptionPolicy,
}

impl MessageWorker {
    async fn process(&self, processor: &QueueProcessor, message: QueueMessage) {
        let started = Instant::now();
        let queue = processor.id().clone();

        let (request_id, agent, outcome, action) = match self.codec.decode(&message.content) {
            Err(err) => (
                None,
                None,
                RequestOutcome::DeserializationError {
                    detail: err.to_string(),
                },
                RequestAction::Delete,
            ),
            Ok(envelope) => {
                let request_id = envelope.request_id();
                let agent = Some(envelope.request.agent.clone());
                let lease = Lease::new(processor.queue.clone(), message.clone());
                match processor.handler.handle(&lease, envelope).await {
                    Ok(HandlerResult::Processed(step)) => (
                        request_id,
                        agent,
                        RequestOutcome::Processed {
                            returned: step.returned,
                        },
                        step.action,
                    ),
                    Ok(HandlerResult::Rejected(reason)) => (
                        request_id,
                        agent,
                        RequestOutcome::Rejected { reason },
                        RequestAction::Delete,
                    ),
                    Err(err) => {
                        debug!(
                            queue = %queue,
                            message_id = %message.id,
                            kind = ?err.kind(),
                            "handler returned an error"
                        );
                        let (outcome, action) = self.on_error(&err);
                        (request_id, agent, outcome, action)
                    }
                }
            }
        };

        let action_kind = action.kind();
        if let Err(err) = apply(processor.queue.as_ref(), &message, action).await {
            match err {
                QueueError::LeaseLost { .. } => warn!(
                    queue = %queue,
                    message_id = %message.id,
                    action = action_kind,
                    "lease lost before the action was applied, abandoning message"
                ),
                other => error!(
                    queue = %queue,
                    message_id = %message.id,
                    action = action_kind,
                    err = ?other,
                    "failed to apply request action"
                ),
            }
        }

        self.sink
            .record(OutcomeReport {
                queue,
                message_id: message.id,
                request_id,
                agent,
                outcome,
                action: action_kind,
                elapsed: started.elapsed(),
            })
            .await;
    }

    /// Poison and protocol violations are dropped whatever the policy says.
    fn on_error(&self, err: &LoomError) -> (RequestOutcome, RequestAction) {
        let detail = error_detail(err);
        if let LoomError::Decode { .. } = err {
            return (
                RequestOutcome::DeserializationError { detail },
                RequestAction::Delete,
            );
        }
        let action = match (err.kind(), self.exception_policy) {
            (ErrorKind::Protocol, _) | (_, ExceptionPolicy::Delete) => RequestAction::Delete,
            (_, ExceptionPolicy::RetryAfterMs(ms)) => {
                RequestAction::PostponeFor(Duration::from_millis(ms))
            }
        };
        (RequestOutcome::ExceptionThrown { detail }, action)
    }
}

/// Hand checked-out messages that were never started back to the queue.
async fn release(processor: &QueueProcessor, messages: impl Iterator<Item = QueueMessage>) {
    let mut released = 0usize;
    for message in messages {
        match processor.queue.update_visibility(&message, Duration::ZERO).await {
            Ok(()) => released += 1,
            Err(err) => warn!(
                queue = %processor.id(),
                message_id = %message.id,
                ?err,
                "could not release unstarted message"
            ),
        }
    }
    if released > 0 {
        info!(queue = %processor.id(), released, "released unstarted messages");
    }
}

async fn apply(
    queue: &dyn QueuePort,
    message: &QueueMessage,
    action: RequestAction,
) -> Result<(), QueueError> {
    match action {
        RequestAction::Delete => queue.delete(message).await,
        RequestAction::PostponeFor(lease) => queue.update_visibility(message, lease).await,
        RequestAction::PostponeAndReplace(content, lease) => {
            queue.update(message, content, lease).await
        }
    }
}

/// Error message followed by its source chain. A source whose message the
/// wrapper already printed is not repeated.
fn error_detail(err: &dyn std::error::Error) -> String {
    let mut detail = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !detail.ends_with(&text) {
            detail.push_str(": ");
            detail.push_str(&text);
        }
        source = cause.source();
    }
    detail
}
