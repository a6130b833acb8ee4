//! CollectingOutcomeSink - 結果をメモリに貯める sink（テスト・ホスト用）

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::domain::{OutcomeReport, QueueId, RequestOutcome};
use crate::ports::OutcomeSink;

#[derive(Clone, Default)]
pub struct CollectingOutcomeSink {
    reports: Arc<Mutex<Vec<OutcomeReport>>>,
    changed: Arc<Notify>,
    heartbeats: Arc<AtomicUsize>,
}

impl CollectingOutcomeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reports(&self) -> Vec<OutcomeReport> {
        self.reports.lock().await.clone()
    }

    /// Values carried by `Processed` outcomes of terminal `Return` steps.
    pub async fn returned_values(&self) -> Vec<serde_json::Value> {
        self.reports
            .lock()
            .await
            .iter()
            .filter_map(|r| match &r.outcome {
                RequestOutcome::Processed { returned } => returned.clone(),
                _ => None,
            })
            .collect()
    }

    pub fn heartbeats(&self) -> usize {
        self.heartbeats.load(Ordering::Relaxed)
    }

    /// Wait until `done` holds for the collected reports.
    pub async fn wait_until(&self, mut done: impl FnMut(&[OutcomeReport]) -> bool) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if done(&self.reports.lock().await) {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl OutcomeSink for CollectingOutcomeSink {
    async fn record(&self, report: OutcomeReport) {
        self.reports.lock().await.push(report);
        self.changed.notify_waiters();
    }

    async fn heartbeat(&self, _queues: &[QueueId]) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;
    use std::time::Duration;

    fn report(outcome: RequestOutcome) -> OutcomeReport {
        OutcomeReport {
            queue: QueueId::new("q"),
            message_id: MessageId::generate(),
            request_id: None,
            agent: None,
            outcome,
            action: "delete",
            elapsed: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn wait_until_wakes_on_record() {
        let sink = CollectingOutcomeSink::new();
        let waiter = {
            let sink = sink.clone();
            tokio::spawn(async move { sink.wait_until(|r| r.len() == 2).await })
        };

        sink.record(report(RequestOutcome::processed())).await;
        sink.record(report(RequestOutcome::returned(serde_json::json!(5)))).await;

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sink.returned_values().await, vec![serde_json::json!(5)]);
    }
}
