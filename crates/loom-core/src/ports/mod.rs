//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。具体的なキュー / ストアのバックエンドは
//! このクレートの外（開発・テスト用の in-memory 実装だけ `impls` にある）。
//!
//! - QueuePort: at-least-once キュー（lease / visibility timeout）
//! - JoinStore: Join Record の楽観的並行性ストア
//! - OutcomeSink: 処理結果の記録先
//! - Clock / IdGenerator: テスト容易性のための抽象

pub mod clock;
pub mod id_generator;
pub mod join_store;
pub mod outcome_sink;
pub mod queue;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::join_store::{ETag, JoinStore, JoinStoreError, Versioned, update_entry};
pub use self::outcome_sink::{OutcomeSink, TracingOutcomeSink};
pub use self::queue::{
    Lease, QueueDirectory, QueueError, QueueMessage, QueuePort, QueuePortExt, Receipt,
};
