use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use loom_core::AgentError;
use loom_core::app::{AppBuilder, Options};
use loom_core::domain::{
    CallRequest, JoinId, OutcomeReport, QueueId, RequestId, RequestOutcome, Step,
};
use loom_core::impls::{CollectingOutcomeSink, InMemoryJoinStore, InMemoryQueue};
use loom_core::ports::{OutcomeSink, QueuePort, TracingOutcomeSink};
use loom_core::typed::{Agent, AgentContext, AgentStep};

// ---------------------------------------------------------------------------
// fork/join: 1..=n を子に分けて合計する
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
enum SumState {
    Split,
    Leaf(u64),
    Wait(JoinId),
    Collect(JoinId),
}

struct ForkSum;

#[async_trait]
impl Agent for ForkSum {
    const NAME: &'static str = "demo.fork_sum.v1";
    type Header = ();
    type State = SumState;
    type Input = u64;
    type Output = u64;

    async fn transition(
        &self,
        ctx: &AgentContext<Self>,
        state: SumState,
    ) -> Result<AgentStep<Self>, AgentError> {
        Ok(match state {
            SumState::Split => {
                let children = (1..=*ctx.input()).map(SumState::Leaf).collect();
                Step::fork_and_goto(children, SumState::Wait)
            }
            SumState::Leaf(v) => Step::Return(v),
            SumState::Wait(id) => Step::WhenAll(id, SumState::Collect(id)),
            SumState::Collect(id) => {
                let values: Vec<u64> = ctx.join_results_as(id).await?;
                Step::Return(values.iter().sum())
            }
        })
    }
}

// ---------------------------------------------------------------------------
// call/return: Hofstadter F / M を 2 つのキューで相互呼び出し
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
enum SeqState {
    Start,
    GotPrev,
    GotOther,
}

struct Female;
struct Male;

fn hofstadter<Same, Other>(
    ctx: &AgentContext<Same>,
    state: SeqState,
    base: u64,
    queues: (&'static str, &'static str),
) -> Result<Step<SeqState, u64>, AgentError>
where
    Same: Agent<Input = u64, Header = ()>,
    Other: Agent,
{
    let n = *ctx.input();
    let (same_queue, other_queue) = queues;
    Ok(match state {
        SeqState::Start if n == 0 => Step::Return(base),
        SeqState::Start => Step::call(
            move |_| {
                CallRequest::new(
                    QueueId::new(same_queue),
                    Same::NAME,
                    &SeqState::Start,
                    &(n - 1),
                )
            },
            SeqState::GotPrev,
        ),
        SeqState::GotPrev => {
            let prev: u64 = ctx.expect_callee_result()?;
            Step::call(
                move |_| {
                    CallRequest::new(
                        QueueId::new(other_queue),
                        Other::NAME,
                        &SeqState::Start,
                        &prev,
                    )
                },
                SeqState::GotOther,
            )
        }
        SeqState::GotOther => {
            let other: u64 = ctx.expect_callee_result()?;
            let value = n
                .checked_sub(other)
                .ok_or_else(|| AgentError::new(format!("{n} - {other} underflows")))?;
            Step::Return(value)
        }
    })
}

#[async_trait]
impl Agent for Female {
    const NAME: &'static str = "demo.hofstadter.female.v1";
    type Header = ();
    type State = SeqState;
    type Input = u64;
    type Output = u64;

    async fn transition(
        &self,
        ctx: &AgentContext<Self>,
        state: SeqState,
    ) -> Result<AgentStep<Self>, AgentError> {
        hofstadter::<Female, Male>(ctx, state, 1, ("female", "male"))
    }
}

#[async_trait]
impl Agent for Male {
    const NAME: &'static str = "demo.hofstadter.male.v1";
    type Header = ();
    type State = SeqState;
    type Input = u64;
    type Output = u64;

    async fn transition(
        &self,
        ctx: &AgentContext<Self>,
        state: SeqState,
    ) -> Result<AgentStep<Self>, AgentError> {
        hofstadter::<Male, Female>(ctx, state, 0, ("male", "female"))
    }
}

/// ログを出しつつ、完了待ちのために結果も溜める
struct DemoSink {
    log: TracingOutcomeSink,
    collected: CollectingOutcomeSink,
}

#[async_trait]
impl OutcomeSink for DemoSink {
    async fn record(&self, report: OutcomeReport) {
        self.log.record(report.clone()).await;
        self.collected.record(report).await;
    }

    async fn heartbeat(&self, queues: &[QueueId]) {
        self.log.heartbeat(queues).await;
    }
}

fn returned(reports: &[OutcomeReport], id: RequestId) -> Option<serde_json::Value> {
    reports.iter().find_map(|r| match &r.outcome {
        RequestOutcome::Processed {
            returned: Some(value),
        } if r.request_id == Some(id) => Some(value.clone()),
        _ => None,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // (A) 設定: 引数に JSON ファイルがあれば読み、LOOM_* 環境変数で上書き
    let options = match std::env::args().nth(1) {
        Some(path) => Options::from_path(path)?,
        None => Options::default(),
    }
    .with_env_overrides()?;

    // (B) in-memory アダプタで組み立て（優先度: sum > female > male）
    let sum_queue = Arc::new(InMemoryQueue::new(QueueId::new("sum")));
    let female_queue = Arc::new(InMemoryQueue::new(QueueId::new("female")));
    let male_queue = Arc::new(InMemoryQueue::new(QueueId::new("male")));
    let store = InMemoryJoinStore::new();
    let collected = CollectingOutcomeSink::new();
    let sink = DemoSink {
        log: TracingOutcomeSink,
        collected: collected.clone(),
    };

    let app = AppBuilder::new()
        .register(ForkSum)?
        .register(Female)?
        .register(Male)?
        .expect_agents(&[ForkSum::NAME, Female::NAME, Male::NAME])
        .serve(sum_queue.clone(), Duration::from_secs(30), 16)
        .serve(female_queue.clone(), Duration::from_secs(30), 16)
        .serve(male_queue.clone(), Duration::from_secs(30), 16)
        .join_store(Arc::new(store.clone()))
        .outcome_sink(Arc::new(sink))
        .options(options)
        .build()?;
    let client = app.client();
    let handle = app.spawn();

    // (C) root request を投入
    let sum = client
        .start::<ForkSum>(&QueueId::new("sum"), &(), &SumState::Split, &10)
        .await?;
    let mut sequence = Vec::new();
    for n in 0..=8u64 {
        let f = client
            .start::<Female>(&QueueId::new("female"), &(), &SeqState::Start, &n)
            .await?;
        sequence.push((n, f));
    }
    let mut pending: Vec<RequestId> = sequence.iter().map(|(_, id)| *id).collect();
    pending.push(sum);

    // (D) 全部返ってくるか Ctrl-C まで待つ
    let all_returned = |reports: &[OutcomeReport]| {
        pending.iter().all(|id| returned(reports, *id).is_some())
    };
    tokio::select! {
        _ = collected.wait_until(all_returned) => {
            let reports = collected.reports().await;
            if let Some(v) = returned(&reports, sum) {
                println!("sum(1..=10) = {v}");
            }
            for (n, id) in &sequence {
                if let Some(v) = returned(&reports, *id) {
                    println!("F({n}) = {v}");
                }
            }
        }
        _ = tokio::signal::ctrl_c() => warn!("interrupted, shutting down"),
    }

    // (E) graceful shutdown: 処理中のメッセージを待ってから止める
    handle.shutdown().await?;

    for queue in [&sum_queue, &female_queue, &male_queue] {
        println!("queue {}: {:?}", queue.id(), queue.counts().await);
    }
    println!("joins: {:?}", store.counts().await);
    info!("done");
    Ok(())
}
