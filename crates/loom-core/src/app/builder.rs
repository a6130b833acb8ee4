//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;
use std::time::Duration;

use super::client::LoomClient;
use super::options::Options;
use super::processor::{AgentDispatcher, QueueProcessor};
use super::scheduler::{QueueScheduler, SchedulerHandle};
use crate::engine::{JoinCoordinator, TransitionEngine};
use crate::error::LoomError;
use crate::ports::{
    IdGenerator, JoinStore, OutcomeSink, QueueDirectory, QueuePort, SystemClock,
    TracingOutcomeSink, UlidGenerator,
};
use crate::typed::{Agent, AgentRegistry};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .register(MyAgent)?
///     .expect_agents(&["my_namespace.my_agent.v1"])
///     .serve(queue, Duration::from_secs(30), 16)
///     .join_store(store)
///     .build()?;
/// let client = app.client();
/// let handle = app.spawn();
/// ```
///
/// # Fail-fast 設計
/// - expect_agents() で期待される agent 名を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
pub struct AppBuilder {
    registry: AgentRegistry,
    expected_agents: Option<Vec<String>>,
    served: Vec<ServedQueue>,
    remote: Vec<Arc<dyn QueuePort>>,
    join_store: Option<Arc<dyn JoinStore>>,
    ids: Option<Arc<dyn IdGenerator>>,
    sink: Option<Arc<dyn OutcomeSink>>,
    options: Options,
}

struct ServedQueue {
    queue: Arc<dyn QueuePort>,
    max_process_time: Duration,
    message_batch_size: usize,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing agents: {0:?}. These agents were expected but not registered.")]
    MissingAgents(Vec<String>),

    #[error("no queue to serve; call serve() at least once")]
    NoQueues,

    #[error("queue {0} was added twice")]
    DuplicateQueue(String),

    #[error("no join store configured")]
    MissingJoinStore,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            registry: AgentRegistry::new(),
            expected_agents: None,
            served: Vec::new(),
            remote: Vec::new(),
            join_store: None,
            ids: None,
            sink: None,
            options: Options::default(),
        }
    }

    /// Agent を登録
    pub fn register<A: Agent>(mut self, agent: A) -> Result<Self, LoomError> {
        self.registry.register(agent)?;
        Ok(self)
    }

    /// 期待される agent 名のリストを設定
    pub fn expect_agents(mut self, names: &[&str]) -> Self {
        self.expected_agents = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// Serve `queue` with the registered agents. Call order is priority
    /// order: the first queue served is the highest priority.
    pub fn serve(
        mut self,
        queue: Arc<dyn QueuePort>,
        max_process_time: Duration,
        message_batch_size: usize,
    ) -> Self {
        self.served.push(ServedQueue {
            queue,
            max_process_time,
            message_batch_size,
        });
        self
    }

    /// A queue this process posts to (call targets) but does not serve.
    pub fn remote_queue(mut self, queue: Arc<dyn QueuePort>) -> Self {
        self.remote.push(queue);
        self
    }

    pub fn join_store(mut self, store: Arc<dyn JoinStore>) -> Self {
        self.join_store = Some(store);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Defaults to `TracingOutcomeSink`.
    pub fn outcome_sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// AppBuilder を構築して App を生成
    ///
    /// # 検証
    /// - expect_agents() の agent が全て登録されているか
    /// - serve() されたキューが 1 つ以上あるか、重複がないか
    /// - join store が設定されているか
    pub fn build(self) -> Result<App, BuildError> {
        if let Some(expected) = &self.expected_agents {
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| !self.registry.contains(name))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingAgents(missing));
            }
        }
        if self.served.is_empty() {
            return Err(BuildError::NoQueues);
        }
        let join_store = self.join_store.ok_or(BuildError::MissingJoinStore)?;

        let mut queues = QueueDirectory::new();
        let all = self
            .served
            .iter()
            .map(|s| &s.queue)
            .chain(self.remote.iter());
        for queue in all {
            if queues.get(queue.id()).is_ok() {
                return Err(BuildError::DuplicateQueue(queue.id().to_string()));
            }
            queues.insert(queue.clone());
        }

        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(SystemClock)));
        let coordinator =
            JoinCoordinator::new(join_store, queues.clone(), self.options.join_retry());
        let engine = TransitionEngine::new(
            coordinator,
            queues.clone(),
            ids.clone(),
            self.options.max_transition_time(),
        );
        let registry = Arc::new(self.registry);
        let dispatcher = Arc::new(AgentDispatcher::new(registry.clone(), engine));

        let processors = self
            .served
            .into_iter()
            .map(|s| {
                QueueProcessor::new(s.queue, dispatcher.clone())
                    .with_max_process_time(s.max_process_time)
                    .with_batch_size(s.message_batch_size)
            })
            .collect();
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(TracingOutcomeSink));

        Ok(App {
            registry,
            client: LoomClient::new(queues, ids),
            scheduler: QueueScheduler::new(processors, self.options, sink),
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// App は組み上がったランタイム
pub struct App {
    registry: Arc<AgentRegistry>,
    client: LoomClient,
    scheduler: QueueScheduler,
}

impl App {
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn client(&self) -> LoomClient {
        self.client.clone()
    }

    pub fn scheduler(self) -> QueueScheduler {
        self.scheduler
    }

    pub fn spawn(self) -> SchedulerHandle {
        self.scheduler.spawn()
    }
}
