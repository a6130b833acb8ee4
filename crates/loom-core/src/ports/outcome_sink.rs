//! OutcomeSink port - メッセージ処理結果の記録
//!
//! 1 メッセージにつき 1 つの OutcomeReport が届く。
//! スケジューラは sink の失敗で止まらない（sink は Result を返さない）。

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::domain::{OutcomeReport, QueueId, RequestOutcome};

#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn record(&self, report: OutcomeReport);

    /// Called by the scheduler once per heartbeat interval.
    async fn heartbeat(&self, _queues: &[QueueId]) {}
}

/// Default sink: one structured log event per outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingOutcomeSink;

#[async_trait]
impl OutcomeSink for TracingOutcomeSink {
    async fn record(&self, report: OutcomeReport) {
        let request_id = report
            .request_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        let agent = report.agent.as_deref().unwrap_or("-");
        let elapsed_ms = report.elapsed.as_millis() as u64;
        match &report.outcome {
            RequestOutcome::Processed { returned } => debug!(
                queue = %report.queue,
                message_id = %report.message_id,
                %request_id,
                agent,
                action = report.action,
                elapsed_ms,
                returned = ?returned,
                "request processed"
            ),
            RequestOutcome::Rejected { reason } => warn!(
                queue = %report.queue,
                message_id = %report.message_id,
                %request_id,
                agent,
                reason = %reason,
                "request rejected"
            ),
            RequestOutcome::DeserializationError { detail } => warn!(
                queue = %report.queue,
                message_id = %report.message_id,
                detail = %detail,
                "poison message discarded"
            ),
            RequestOutcome::ExceptionThrown { detail } => error!(
                queue = %report.queue,
                message_id = %report.message_id,
                %request_id,
                agent,
                action = report.action,
                detail = %detail,
                "request handler failed"
            ),
        }
    }

    async fn heartbeat(&self, queues: &[QueueId]) {
        info!(queues = queues.len(), "scheduler heartbeat");
    }
}
