//! Typed - 型付き Agent API
//!
//! agent 名の typo を型で排除し、State / Input / Output の対応を静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Agent` trait - 型安全
//! - **内部（Dyn）**: `DynAgent` trait - object-safe, type erasure

pub mod agent;
pub mod codec;
pub mod handler;
pub mod registry;

pub use self::agent::{Agent, AgentContext, AgentStep};
pub use self::codec::EnvelopeCodec;
pub use self::handler::{DynAgent, TypedAgent};
pub use self::registry::AgentRegistry;
