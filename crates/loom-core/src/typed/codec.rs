//! EnvelopeCodec - キュー content と Envelope の相互変換
//!
//! # デコードフロー
//! 1. content 文字列を `WireEnvelope` にパース
//! 2. 失敗したら poison message（スケジューラが削除して DeserializationError を報告）
//! 3. 成功したら `agent` タグで registry を引く
//!
//! State / Input の型付きデコードは `TypedAgent` 側で行う。
//! ここでは envelope の形だけを検査する。

use serde::Serialize;

use super::agent::Agent;
use crate::domain::{AgentRequest, Envelope, RequestId, RequestMetadata, WireEnvelope};
use crate::error::LoomError;

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    pub fn decode(&self, content: &str) -> Result<WireEnvelope, serde_json::Error> {
        serde_json::from_str(content)
    }

    pub fn encode(&self, envelope: &WireEnvelope) -> Result<String, serde_json::Error> {
        serde_json::to_string(envelope)
    }

    /// Queue content that starts a new root request of agent `A`.
    pub fn start<A: Agent>(
        &self,
        request_id: RequestId,
        header: &A::Header,
        state: &A::State,
        input: &A::Input,
    ) -> Result<String, LoomError> {
        let envelope = Envelope::new(
            to_value(header)?,
            AgentRequest {
                agent: A::NAME.to_string(),
                state: to_value(state)?,
                input: to_value(input)?,
            },
        )
        .with_metadata(RequestMetadata::new(request_id));
        Ok(self.encode(&envelope)?)
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, LoomError> {
    Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Step;
    use crate::error::AgentError;
    use crate::typed::agent::{AgentContext, AgentStep};
    use async_trait::async_trait;
    use rstest::rstest;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    enum GreetState {
        Hello,
    }

    struct Greeter;

    #[async_trait]
    impl Agent for Greeter {
        const NAME: &'static str = "test.greeter.v1";
        type Header = String;
        type State = GreetState;
        type Input = String;
        type Output = String;

        async fn transition(
            &self,
            ctx: &AgentContext<Self>,
            _state: GreetState,
        ) -> Result<AgentStep<Self>, AgentError> {
            Ok(Step::Return(format!("hello {}", ctx.input())))
        }
    }

    #[test]
    fn start_produces_a_routable_envelope() {
        let codec = EnvelopeCodec;
        let id = RequestId::generate();
        let content = codec
            .start::<Greeter>(id, &"h".to_string(), &GreetState::Hello, &"bob".to_string())
            .unwrap();

        let env = codec.decode(&content).unwrap();
        assert_eq!(env.request.agent, Greeter::NAME);
        assert_eq!(env.request.state, serde_json::json!("Hello"));
        assert_eq!(env.request_id(), Some(id));
        assert_eq!(env.header, serde_json::json!("h"));
    }

    #[rstest]
    #[case::not_json("this is not json")]
    #[case::missing_request(r#"{"header": null}"#)]
    #[case::missing_agent(r#"{"header": null, "request": {"state": 1}}"#)]
    #[case::bad_metadata(r#"{"metadata": {"request_id": 5}, "header": null, "request": {"agent": "a", "state": 1}}"#)]
    fn poison_content_is_rejected(#[case] content: &str) {
        assert!(EnvelopeCodec.decode(content).is_err());
    }
}
