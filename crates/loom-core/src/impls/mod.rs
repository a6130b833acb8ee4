//! Impls - 実装（開発用・テスト用）
//!
//! ports の in-memory 実装。本番バックエンド（クラウドキュー、テーブルストレージ）は
//! 同じ trait を別クレートで実装する。
//!
//! # 含まれる実装
//! - **InMemoryQueue**: visibility timeout と receipt を守るキュー
//! - **InMemoryJoinStore**: version 付き map（CAS + fault injection）
//! - **CollectingOutcomeSink**: 結果を貯めて待ち合わせできる sink

pub mod collecting_sink;
pub mod inmem_join_store;
pub mod inmem_queue;

pub use self::collecting_sink::CollectingOutcomeSink;
pub use self::inmem_join_store::InMemoryJoinStore;
pub use self::inmem_queue::InMemoryQueue;
