//! DynAgent - Agent の型消去
//!
//! # 学習ポイント
//! - Object-safe trait (DynAgent)
//! - Type erasure パターン (TypedAgent<A> → DynAgent)
//! - JSON の State / Input / Header をここで型に戻す

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::agent::{Agent, AgentContext};
use crate::engine::{CurrentRequest, StepOutcome, TransitionEngine};
use crate::error::LoomError;

/// DynAgent は object-safe な Agent の抽象化
///
/// `HashMap<String, Arc<dyn DynAgent>>` に格納して、
/// wire 上の `agent` タグで引く。
#[async_trait]
pub trait DynAgent: Send + Sync {
    fn name(&self) -> &str;

    /// Decode the request, run one transition and persist its step.
    async fn step(
        &self,
        engine: &TransitionEngine,
        current: &CurrentRequest,
    ) -> Result<StepOutcome, LoomError>;
}

pub struct TypedAgent<A: Agent> {
    agent: A,
    _marker: PhantomData<fn() -> A>,
}

impl<A: Agent> TypedAgent<A> {
    pub fn new(agent: A) -> Self {
        Self {
            agent,
            _marker: PhantomData,
        }
    }
}

/// A part that does not decode makes the whole message poison.
fn decode<A: Agent, T: DeserializeOwned>(
    part: &'static str,
    value: &Value,
) -> Result<T, LoomError> {
    serde_json::from_value(value.clone()).map_err(|source| LoomError::Decode {
        agent: A::NAME.to_string(),
        part,
        source,
    })
}

#[async_trait]
impl<A: Agent> DynAgent for TypedAgent<A> {
    fn name(&self) -> &str {
        A::NAME
    }

    async fn step(
        &self,
        engine: &TransitionEngine,
        current: &CurrentRequest,
    ) -> Result<StepOutcome, LoomError> {
        let envelope = current.envelope();
        let state: A::State = decode::<A, _>("state", &envelope.request.state)?;
        let mut ctx: AgentContext<A> = AgentContext::<A>::new(
            decode::<A, _>("header", &envelope.header)?,
            decode::<A, _>("input", &envelope.request.input)?,
            current.metadata().clone(),
            current.queue().clone(),
            envelope.callee_return_result.clone(),
            engine.join_store().clone(),
        );
        if let Some(lease) = current.lease() {
            ctx = ctx.with_lease(lease.clone());
        }
        let step = self.agent.transition(&ctx, state).await?;
        engine.execute(current, step).await
    }
}
