//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID + Phantom type
//! - `Id<T>` は ULID を包むジェネリック型。`T` はマーカー（実行時コストなし）
//! - `RequestId` と `MessageId` は混同できない
//! - serde では ULID 文字列として透過的にシリアライズされる（JSON の map key に使える）
//!
//! `JoinId` だけは別構造: guid + 作成時刻。Join Store の主キーとして使う。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// Display で使うプレフィックス（例: "req-", "msg-"）
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Fresh id from the thread-local ULID generator.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Request のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Request {}

impl IdMarker for Request {
    fn prefix() -> &'static str {
        "req-"
    }
}

/// Queue message のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Message {}

impl IdMarker for Message {
    fn prefix() -> &'static str {
        "msg-"
    }
}

/// Correlation id of one logical request (stable across state transitions).
pub type RequestId = Id<Request>;

/// Identifier assigned by a queue backend to one stored message.
pub type MessageId = Id<Message>;

/// Name of a queue, used for routing continuations between queues.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueId(String);

impl QueueId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Primary key of a Join Record.
///
/// Immutable once created. Equality covers both fields, so two ids sharing a
/// guid but created at different times are distinct keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JoinId {
    pub guid: Ulid,
    pub timestamp: DateTime<Utc>,
}

impl JoinId {
    pub fn new(guid: Ulid, timestamp: DateTime<Utc>) -> Self {
        Self { guid, timestamp }
    }

    /// Leaf records of fork children reuse the child's request id as guid.
    pub fn for_request(request_id: RequestId, timestamp: DateTime<Utc>) -> Self {
        Self::new(request_id.as_ulid(), timestamp)
    }

    /// Id of the leaf record tracking `child` of this fork.
    pub fn leaf_of(&self, child: RequestId) -> JoinId {
        Self::for_request(child, self.timestamp)
    }

    /// The request id whose slot this record occupies in a parent record.
    pub fn slot(&self) -> RequestId {
        RequestId::from_ulid(self.guid)
    }
}

impl fmt::Display for JoinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "join-{}@{}", self.guid, self.timestamp.timestamp_millis())
    }
}
