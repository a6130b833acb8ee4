//! App - アプリケーション層
//!
//! ports / engine / typed を組み合わせて、キューを回すランタイムを作ります。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: 構築とワイヤリング（fail-fast 検証）
//! - **QueueScheduler**: 優先度付きマルチキューのディスパッチループ
//! - **QueueProcessor**: キューごとの handler・lease 設定
//! - **WorkerPool**: 同時処理数の上限
//! - **Options**: チューニング（JSON + 環境変数）
//! - **LoomClient**: root request の投入

pub mod builder;
pub mod client;
pub mod options;
pub mod processor;
pub mod scheduler;
pub mod worker_pool;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::client::LoomClient;
pub use self::options::{ExceptionPolicy, Options};
pub use self::processor::{AgentDispatcher, HandlerResult, QueueProcessor, RequestHandler};
pub use self::scheduler::{QueueScheduler, SchedulerHandle};
pub use self::worker_pool::{LoopCancelled, WorkerPool};
