//! AgentRegistry - Agent の登録と管理
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権（全ワーカーで同じ registry を共有）

use std::collections::HashMap;
use std::sync::Arc;

use super::agent::Agent;
use super::handler::{DynAgent, TypedAgent};
use crate::error::LoomError;

/// AgentRegistry は Agent を名前で管理
///
/// # 使用例
/// ```ignore
/// let mut registry = AgentRegistry::new();
/// registry.register(MyAgent)?;
///
/// let agent = registry.get("my_namespace.my_agent.v1")?;
/// ```
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn DynAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `agent` under `A::NAME`. A second agent with the same name
    /// is refused.
    pub fn register<A: Agent>(&mut self, agent: A) -> Result<(), LoomError> {
        let name = A::NAME.to_string();
        if self.agents.contains_key(&name) {
            return Err(LoomError::DuplicateAgent(name));
        }
        self.agents.insert(name, Arc::new(TypedAgent::new(agent)));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DynAgent>, LoomError> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| LoomError::UnknownAgent(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Step;
    use crate::error::AgentError;
    use crate::typed::agent::{AgentContext, AgentStep};
    use async_trait::async_trait;

    struct Ping;
    struct Pong;

    #[async_trait]
    impl Agent for Ping {
        const NAME: &'static str = "test.ping.v1";
        type Header = ();
        type State = ();
        type Input = ();
        type Output = ();

        async fn transition(
            &self,
            _ctx: &AgentContext<Self>,
            _state: (),
        ) -> Result<AgentStep<Self>, AgentError> {
            Ok(Step::Return(()))
        }
    }

    #[async_trait]
    impl Agent for Pong {
        const NAME: &'static str = "test.pong.v1";
        type Header = ();
        type State = ();
        type Input = ();
        type Output = ();

        async fn transition(
            &self,
            _ctx: &AgentContext<Self>,
            _state: (),
        ) -> Result<AgentStep<Self>, AgentError> {
            Ok(Step::Return(()))
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = AgentRegistry::new();
        registry.register(Ping).unwrap();

        let agent = registry.get(Ping::NAME).unwrap();
        assert_eq!(agent.name(), Ping::NAME);
    }

    #[test]
    fn double_registration_is_refused() {
        let mut registry = AgentRegistry::new();
        registry.register(Ping).unwrap();
        let result = registry.register(Ping);
        assert!(matches!(result, Err(LoomError::DuplicateAgent(name)) if name == Ping::NAME));
    }

    #[test]
    fn unknown_name_is_an_error() {
        let registry = AgentRegistry::new();
        assert!(matches!(
            registry.get("nobody"),
            Err(LoomError::UnknownAgent(name)) if name == "nobody"
        ));
    }

    #[test]
    fn registered_names_are_sorted() {
        let mut registry = AgentRegistry::new();
        registry.register(Pong).unwrap();
        registry.register(Ping).unwrap();
        assert_eq!(
            registry.registered_names(),
            vec![Ping::NAME.to_string(), Pong::NAME.to_string()]
        );
        assert!(registry.contains(Pong::NAME));
    }
}
