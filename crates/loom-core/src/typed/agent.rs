//! Agent trait - 型付き状態機械の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const NAME`)
//! - Associated Types で State / Input / Output を 1 つの型にまとめる
//! - transition は 1 step だけ計算する。永続化はエンジンの仕事

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::Step;
use crate::engine::TransitionContext;
use crate::error::AgentError;

/// Agent は名前と transition 関数の組
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// enum CountdownState { Tick(u32) }
///
/// struct Countdown;
///
/// #[async_trait]
/// impl Agent for Countdown {
///     const NAME: &'static str = "demo.countdown.v1";
///     type Header = ();
///     type State = CountdownState;
///     type Input = ();
///     type Output = &'static str;
///
///     async fn transition(
///         &self,
///         _ctx: &AgentContext<Self>,
///         state: CountdownState,
///     ) -> Result<AgentStep<Self>, AgentError> {
///         Ok(match state {
///             CountdownState::Tick(0) => Step::Return("liftoff"),
///             CountdownState::Tick(n) => Step::SleepAndGoto(Duration::from_secs(1), CountdownState::Tick(n - 1)),
///         })
///     }
/// }
/// ```
///
/// # Trait Bounds
/// - State / Input / Header はキューに載るので `Serialize + DeserializeOwned`
/// - `Send + Sync + 'static`: registry の `Arc<dyn DynAgent>` に入れるため
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    /// Routing tag carried in every request of this agent.
    ///
    /// # 命名規約
    /// - `{namespace}.{agent}.v{major}`
    const NAME: &'static str;

    type Header: Serialize + DeserializeOwned + Send + Sync + 'static;
    type State: Serialize + DeserializeOwned + Send + 'static;
    type Input: Serialize + DeserializeOwned + Send + Sync + 'static;
    type Output: Serialize + Send + 'static;

    async fn transition(
        &self,
        ctx: &AgentContext<Self>,
        state: Self::State,
    ) -> Result<AgentStep<Self>, AgentError>;
}

pub type AgentContext<A> = TransitionContext<<A as Agent>::Header, <A as Agent>::Input>;

pub type AgentStep<A> = Step<<A as Agent>::State, <A as Agent>::Output>;
