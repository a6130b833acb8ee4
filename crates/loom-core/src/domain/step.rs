//! Step: the next move of a state machine, returned by every transition.
//!
//! A closed union. The transition engine interprets it; agents never touch
//! queues or the join store directly.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::envelope::AgentRequest;
use super::ids::{JoinId, QueueId, RequestId};

/// Builds the JoinId-dependent state an agent moves to after forking.
pub type JoinStateBuilder<S> = Box<dyn FnOnce(JoinId) -> S + Send>;

/// Builds the callee request from the correlation id the engine allocated for it.
pub type CallBuilder = Box<dyn FnOnce(RequestId) -> serde_json::Result<CallRequest> + Send>;

pub enum Step<S, O> {
    /// Persist `S` as the new current state.
    Goto(S),

    /// Do nothing until the duration elapsed, state unchanged.
    Sleep(Duration),

    /// Sleep, then resume at the given state.
    SleepAndGoto(Duration, S),

    /// Spawn one child per state, then move to `join_state(join_id)`.
    ForkAndGoto {
        children: Vec<S>,
        join_state: JoinStateBuilder<S>,
    },

    /// Continue at `S` once every child of the join completed.
    WhenAll(JoinId, S),

    /// Continue at `S` once any child of the join completed.
    WhenAny(JoinId, S),

    /// Spawn a callee and suspend until it returns; resume at `return_state`.
    Call {
        request: CallBuilder,
        return_state: S,
    },

    /// Terminal.
    Return(O),
}

impl<S, O> Step<S, O> {
    pub fn fork_and_goto(
        children: Vec<S>,
        join_state: impl FnOnce(JoinId) -> S + Send + 'static,
    ) -> Self {
        Step::ForkAndGoto {
            children,
            join_state: Box::new(join_state),
        }
    }

    pub fn call(
        request: impl FnOnce(RequestId) -> serde_json::Result<CallRequest> + Send + 'static,
        return_state: S,
    ) -> Self {
        Step::Call {
            request: Box::new(request),
            return_state,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Step::Goto(_) => "goto",
            Step::Sleep(_) => "sleep",
            Step::SleepAndGoto(..) => "sleep_and_goto",
            Step::ForkAndGoto { .. } => "fork_and_goto",
            Step::WhenAll(..) => "when_all",
            Step::WhenAny(..) => "when_any",
            Step::Call { .. } => "call",
            Step::Return(_) => "return",
        }
    }
}

impl<S, O> fmt::Debug for Step<S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Sleep(d) => write!(f, "Sleep({d:?})"),
            Step::SleepAndGoto(d, _) => write!(f, "SleepAndGoto({d:?}, ..)"),
            Step::ForkAndGoto { children, .. } => {
                write!(f, "ForkAndGoto({} children)", children.len())
            }
            Step::WhenAll(id, _) => write!(f, "WhenAll({id})"),
            Step::WhenAny(id, _) => write!(f, "WhenAny({id})"),
            other => f.write_str(other.kind()),
        }
    }
}

/// Callee of a `Call`: which queue to post to and the wire request.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub queue: QueueId,
    pub request: AgentRequest,
}

impl CallRequest {
    pub fn new<S: Serialize, I: Serialize>(
        queue: QueueId,
        agent: &str,
        state: &S,
        input: &I,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            queue,
            request: AgentRequest {
                agent: agent.to_string(),
                state: serde_json::to_value(state)?,
                input: serde_json::to_value(input)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_does_not_need_state_debug() {
        struct Opaque;
        let step: Step<Opaque, ()> = Step::fork_and_goto(vec![Opaque, Opaque], |_| Opaque);
        assert_eq!(format!("{step:?}"), "ForkAndGoto(2 children)");
        assert_eq!(step.kind(), "fork_and_goto");
    }

    #[test]
    fn call_request_serializes_state_and_input() {
        let req = CallRequest::new(QueueId::new("q"), "fib", &"Start", &10).unwrap();
        assert_eq!(req.request.agent, "fib");
        assert_eq!(req.request.state, serde_json::json!("Start"));
        assert_eq!(req.request.input, serde_json::json!(10));
    }
}
