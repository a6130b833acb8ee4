//! Shared wiring for the end-to-end scenarios: in-memory queues and join
//! store, a collecting sink, and the real scheduler.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use loom_core::app::{AppBuilder, LoomClient, Options, SchedulerHandle};
use loom_core::domain::{OutcomeReport, QueueId, RequestId, RequestOutcome};
use loom_core::impls::{CollectingOutcomeSink, InMemoryJoinStore, InMemoryQueue};
use loom_core::LoomError;
use serde_json::Value;

pub struct Harness {
    pub queues: Vec<Arc<InMemoryQueue>>,
    pub store: InMemoryJoinStore,
    pub sink: CollectingOutcomeSink,
    pub client: LoomClient,
    pub handle: SchedulerHandle,
}

pub fn options() -> Options {
    Options {
        idle_sleep_ms: 1,
        max_transition_time_ms: 10,
        ..Options::default()
    }
}

/// Serve `queue_names` (in priority order) with the agents added by `register`.
pub fn start(
    queue_names: &[&str],
    options: Options,
    register: impl FnOnce(AppBuilder) -> Result<AppBuilder, LoomError>,
) -> Harness {
    start_serving(queue_names, Duration::from_secs(5), 8, options, register)
}

/// Like `start`, with every queue checked out `batch_size` at a time and
/// leased for `batch_size * max_process_time`.
pub fn start_serving(
    queue_names: &[&str],
    max_process_time: Duration,
    batch_size: usize,
    options: Options,
    register: impl FnOnce(AppBuilder) -> Result<AppBuilder, LoomError>,
) -> Harness {
    let queues: Vec<Arc<InMemoryQueue>> = queue_names
        .iter()
        .map(|name| Arc::new(InMemoryQueue::new(QueueId::new(*name))))
        .collect();
    let store = InMemoryJoinStore::new();
    let sink = CollectingOutcomeSink::new();

    let mut builder = register(AppBuilder::new()).expect("agents register");
    for queue in &queues {
        builder = builder.serve(queue.clone(), max_process_time, batch_size);
    }
    let app = builder
        .join_store(Arc::new(store.clone()))
        .outcome_sink(Arc::new(sink.clone()))
        .options(options)
        .build()
        .expect("app builds");

    let client = app.client();
    Harness {
        queues,
        store,
        sink,
        client,
        handle: app.spawn(),
    }
}

fn returned_value(reports: &[OutcomeReport], request_id: RequestId) -> Option<Value> {
    reports.iter().find_map(|r| match &r.outcome {
        RequestOutcome::Processed {
            returned: Some(value),
        } if r.request_id == Some(request_id) => Some(value.clone()),
        _ => None,
    })
}

/// Wait for the terminal `Return` of `request_id` and hand back its value.
pub async fn wait_for_return(sink: &CollectingOutcomeSink, request_id: RequestId) -> Value {
    tokio::time::timeout(
        Duration::from_secs(30),
        sink.wait_until(|reports| returned_value(reports, request_id).is_some()),
    )
    .await
    .expect("request finished in time");
    returned_value(&sink.reports().await, request_id).expect("value recorded")
}

/// Wait until every queue is empty: nothing visible, leased or delayed.
pub async fn wait_until_drained(queues: &[Arc<InMemoryQueue>]) {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let mut total = 0;
            for queue in queues {
                total += queue.counts().await.total();
            }
            if total == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queues drained in time");
}
