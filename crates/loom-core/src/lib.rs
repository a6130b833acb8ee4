//! loom-core
//!
//! Durable, queue-backed execution of resumable state machines ("agents").
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, envelope, join record, step, outcome, retry）
//! - **ports**: 抽象化レイヤー（QueuePort, JoinStore, OutcomeSink, Clock, IdGenerator）
//! - **engine**: 実行エンジン（TransitionEngine, JoinCoordinator, TransitionContext）
//! - **typed**: 型付き Agent API（Agent trait, AgentRegistry, EnvelopeCodec）
//! - **app**: ランタイム（AppBuilder, QueueScheduler, WorkerPool, Options）
//! - **impls**: 実装（InMemoryQueue, InMemoryJoinStore など開発・テスト用）
//! - **observability**: in-memory バックエンドのスナップショット
//! - **error**: エラー型

pub mod app;
pub mod domain;
pub mod engine;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod typed;

pub use crate::error::{AgentError, ErrorKind, LoomError};
