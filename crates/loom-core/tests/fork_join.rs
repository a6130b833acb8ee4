mod common;

use std::time::Duration;

use async_trait::async_trait;
use loom_core::domain::{JoinId, QueueId, RequestOutcome, Step};
use loom_core::typed::{Agent, AgentContext, AgentStep};
use loom_core::AgentError;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Simple fork: Start forks two children returning 1, joins, returns the sum.
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
enum SumState {
    Start,
    Child,
    Join(JoinId),
    Sum(JoinId),
}

struct ForkSum;

#[async_trait]
impl Agent for ForkSum {
    const NAME: &'static str = "test.fork_sum.v1";
    type Header = ();
    type State = SumState;
    type Input = ();
    type Output = u64;

    async fn transition(
        &self,
        ctx: &AgentContext<Self>,
        state: SumState,
    ) -> Result<AgentStep<Self>, AgentError> {
        Ok(match state {
            SumState::Start => {
                Step::fork_and_goto(vec![SumState::Child, SumState::Child], SumState::Join)
            }
            SumState::Child => Step::Return(1),
            SumState::Join(id) => Step::WhenAll(id, SumState::Sum(id)),
            SumState::Sum(id) => {
                let values: Vec<u64> = ctx.join_results_as(id).await?;
                Step::Return(values.iter().sum())
            }
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simple_fork_join_sums_children() {
    let h = common::start(&["work"], common::options(), |b| b.register(ForkSum));
    let root = h
        .client
        .start::<ForkSum>(&QueueId::new("work"), &(), &SumState::Start, &())
        .await
        .unwrap();

    let result = common::wait_for_return(&h.sink, root).await;
    assert_eq!(result, serde_json::json!(2));
    common::wait_until_drained(&h.queues).await;
    h.handle.shutdown().await.unwrap();

    let counts = h.store.counts().await;
    assert_eq!(counts.records, 3);
    assert_eq!(counts.completed, 3);
    assert_eq!(counts.forks, 1);
    assert_eq!(counts.waiting_subscribers, 0);

    let fork = h
        .store
        .snapshot()
        .await
        .into_values()
        .find(|e| !e.children_statuses.is_empty())
        .unwrap();
    assert_eq!(fork.children_statuses.len(), 2);
    assert_eq!(fork.children_results.len(), 2);
}

// ---------------------------------------------------------------------------
// Nested fork: Fork1 -> (Fork2 | Leaf), Fork2 -> (Leaf | Leaf).
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
enum NestedState {
    Fork1,
    Fork2,
    Leaf,
    WaitForFork2(JoinId),
    DoneFork2(JoinId),
    WaitForFork1(JoinId),
    DoneFork1(JoinId),
}

struct Nested;

#[async_trait]
impl Agent for Nested {
    const NAME: &'static str = "test.nested.v1";
    type Header = ();
    type State = NestedState;
    type Input = ();
    type Output = u64;

    async fn transition(
        &self,
        ctx: &AgentContext<Self>,
        state: NestedState,
    ) -> Result<AgentStep<Self>, AgentError> {
        use NestedState::*;
        Ok(match state {
            Fork1 => Step::fork_and_goto(vec![Fork2, Leaf], WaitForFork1),
            Fork2 => Step::fork_and_goto(vec![Leaf, Leaf], WaitForFork2),
            Leaf => Step::Return(1),
            WaitForFork2(id) => Step::WhenAll(id, DoneFork2(id)),
            WaitForFork1(id) => Step::WhenAll(id, DoneFork1(id)),
            DoneFork2(id) | DoneFork1(id) => {
                let values: Vec<u64> = ctx.join_results_as(id).await?;
                Step::Return(values.iter().sum())
            }
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn nested_fork_propagates_through_both_records() {
    let h = common::start(&["work"], common::options(), |b| b.register(Nested));
    let root = h
        .client
        .start::<Nested>(&QueueId::new("work"), &(), &NestedState::Fork1, &())
        .await
        .unwrap();

    let result = common::wait_for_return(&h.sink, root).await;
    assert_eq!(result, serde_json::json!(3));
    common::wait_until_drained(&h.queues).await;
    h.handle.shutdown().await.unwrap();

    // one record per fork plus one leaf per forked child (2 + 2 + 2); the
    // root request is nobody's child and gets no leaf of its own
    let counts = h.store.counts().await;
    assert_eq!(counts.records, 6);
    assert_eq!(counts.forks, 2);
    assert_eq!(counts.with_parent, 4);
    assert_eq!(counts.completed, 6);
}

// ---------------------------------------------------------------------------
// WhenAny: resumes once, on the first child to finish.
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
enum RaceState {
    Start,
    Runner(u64),
    Finish(u64),
    Wait(JoinId),
    First(JoinId),
}

struct Race;

#[async_trait]
impl Agent for Race {
    const NAME: &'static str = "test.race.v1";
    type Header = ();
    type State = RaceState;
    type Input = ();
    type Output = u64;

    async fn transition(
        &self,
        ctx: &AgentContext<Self>,
        state: RaceState,
    ) -> Result<AgentStep<Self>, AgentError> {
        use RaceState::*;
        Ok(match state {
            Start => Step::fork_and_goto(vec![Runner(400), Runner(0), Runner(800)], Wait),
            Runner(ms) => Step::SleepAndGoto(Duration::from_millis(ms), Finish(ms)),
            Finish(ms) => Step::Return(ms),
            Wait(id) => Step::WhenAny(id, First(id)),
            First(id) => {
                let values: Vec<u64> = ctx.join_results_as(id).await?;
                Step::Return(values.into_iter().min().unwrap_or(u64::MAX))
            }
        })
    }
}

#[tokio::test(start_paused = true)]
async fn when_any_resumes_once_on_first_child() {
    let h = common::start(&["work"], common::options(), |b| b.register(Race));
    let root = h
        .client
        .start::<Race>(&QueueId::new("work"), &(), &RaceState::Start, &())
        .await
        .unwrap();

    let result = common::wait_for_return(&h.sink, root).await;
    assert_eq!(result, serde_json::json!(0));

    // the slower runners still complete the fork, without a second wake-up
    common::wait_until_drained(&h.queues).await;
    h.handle.shutdown().await.unwrap();

    let root_returns = h
        .sink
        .reports()
        .await
        .iter()
        .filter(|r| {
            r.request_id == Some(root)
                && matches!(r.outcome, RequestOutcome::Processed { returned: Some(_) })
        })
        .count();
    assert_eq!(root_returns, 1);

    let counts = h.store.counts().await;
    assert_eq!(counts.records, 4);
    assert_eq!(counts.completed, 4);
}
