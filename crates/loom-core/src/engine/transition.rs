//! TransitionEngine - Step を永続化して RequestAction に落とす
//!
//! # 永続化の順序
//! 外から観測できる副作用（子の投入、親の起床、caller の再開）より先に
//! 自分の状態を失わないようにする。クラッシュ後の再実行は at-least-once で安全。
//!
//! | Step | 副作用 | RequestAction |
//! |---|---|---|
//! | Goto | - | PostponeAndReplace(next, 0) |
//! | Sleep | - | PostponeFor(d + max_transition_time) |
//! | SleepAndGoto | - | PostponeAndReplace(next, d + max_transition_time) |
//! | ForkAndGoto | record 作成 → 子を投入 | PostponeAndReplace(join_state, 0) |
//! | WhenAll/WhenAny | subscribe | 解決済みなら PostponeAndReplace(next, 0)、未解決なら Delete |
//! | Call | callee を投入（caller の continuation 付き） | Delete |
//! | Return | join 完了伝播 / caller 再開 | Delete |

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::domain::step::{CallBuilder, JoinStateBuilder};
use crate::domain::{
    AgentRequest, Continuation, Envelope, JoinCondition, JoinId, QueueId, RequestAction, RequestId,
    RequestMetadata, Step, Subscription, WireEnvelope,
};
use crate::engine::coordinator::JoinCoordinator;
use crate::error::LoomError;
use crate::ports::{IdGenerator, JoinStore, Lease, QueueDirectory};

/// Result of executing one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub action: RequestAction,
    /// Set by `Return`.
    pub returned: Option<Value>,
    pub step: &'static str,
}

/// The request being advanced: where it lives and its envelope as read.
///
/// Metadata is always present; a root request posted without metadata is
/// assigned a fresh request id before the transition runs.
#[derive(Debug, Clone)]
pub struct CurrentRequest {
    queue: QueueId,
    metadata: RequestMetadata,
    envelope: WireEnvelope,
    lease: Option<Lease>,
}

impl CurrentRequest {
    pub fn new(queue: QueueId, mut envelope: WireEnvelope, ids: &dyn IdGenerator) -> Self {
        let metadata = envelope
            .metadata
            .take()
            .unwrap_or_else(|| RequestMetadata::new(ids.generate_request_id()));
        envelope.metadata = Some(metadata.clone());
        Self {
            queue,
            metadata,
            envelope,
            lease: None,
        }
    }

    /// Attach the lease of the message this request was read from.
    pub fn with_lease(mut self, lease: Lease) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    pub fn queue(&self) -> &QueueId {
        &self.queue
    }

    pub fn envelope(&self) -> &WireEnvelope {
        &self.envelope
    }

    pub fn metadata(&self) -> &RequestMetadata {
        &self.metadata
    }

    /// Queue content for this same request at `state`.
    ///
    /// A consumed callee result is not carried forward.
    fn content_at<S: Serialize>(&self, state: &S) -> Result<String, LoomError> {
        self.same_agent_content(self.metadata.clone(), state)
    }

    fn continuation_at<S: Serialize>(&self, state: &S) -> Result<Continuation, LoomError> {
        Ok(Continuation {
            queue: self.queue.clone(),
            content: self.content_at(state)?,
        })
    }

    fn child_content<S: Serialize>(
        &self,
        child: RequestId,
        join_id: JoinId,
        state: &S,
    ) -> Result<String, LoomError> {
        self.same_agent_content(RequestMetadata::new(child).with_join(join_id), state)
    }

    /// This agent's header and input at `state`, under `metadata`.
    fn same_agent_content<S: Serialize>(
        &self,
        metadata: RequestMetadata,
        state: &S,
    ) -> Result<String, LoomError> {
        let envelope = Envelope::new(
            self.envelope.header.clone(),
            AgentRequest {
                agent: self.envelope.request.agent.clone(),
                state: serde_json::to_value(state)?,
                input: self.envelope.request.input.clone(),
            },
        )
        .with_metadata(metadata);
        Ok(serde_json::to_string(&envelope)?)
    }
}

#[derive(Clone)]
pub struct TransitionEngine {
    coordinator: JoinCoordinator,
    queues: QueueDirectory,
    ids: Arc<dyn IdGenerator>,
    max_transition_time: Duration,
}

impl TransitionEngine {
    pub fn new(
        coordinator: JoinCoordinator,
        queues: QueueDirectory,
        ids: Arc<dyn IdGenerator>,
        max_transition_time: Duration,
    ) -> Self {
        Self {
            coordinator,
            queues,
            ids,
            max_transition_time,
        }
    }

    pub fn join_store(&self) -> &Arc<dyn JoinStore> {
        self.coordinator.store()
    }

    pub fn ids(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    /// Persist `step` for `current` and decide what happens to its message.
    pub async fn execute<S, O>(
        &self,
        current: &CurrentRequest,
        step: Step<S, O>,
    ) -> Result<StepOutcome, LoomError>
    where
        S: Serialize,
        O: Serialize,
    {
        let kind = step.kind();
        let request_id = current.metadata().request_id;
        debug!(request_id = %request_id, queue = %current.queue, step = ?step, "executing step");

        let (action, returned) = match step {
            Step::Goto(next) => (
                RequestAction::PostponeAndReplace(current.content_at(&next)?, Duration::ZERO),
                None,
            ),
            Step::Sleep(d) => (
                RequestAction::PostponeFor(d.saturating_add(self.max_transition_time)),
                None,
            ),
            Step::SleepAndGoto(d, next) => (
                RequestAction::PostponeAndReplace(
                    current.content_at(&next)?,
                    d.saturating_add(self.max_transition_time),
                ),
                None,
            ),
            Step::ForkAndGoto {
                children,
                join_state,
            } => (self.fork(current, children, join_state).await?, None),
            Step::WhenAll(join_id, next) => {
                let continuation = current.continuation_at(&next)?;
                (self.wait(join_id, JoinCondition::All, continuation).await?, None)
            }
            Step::WhenAny(join_id, next) => {
                let continuation = current.continuation_at(&next)?;
                (self.wait(join_id, JoinCondition::Any, continuation).await?, None)
            }
            Step::Call {
                request,
                return_state,
            } => {
                let caller = current.continuation_at(&return_state)?;
                (self.call(current, request, caller).await?, None)
            }
            Step::Return(output) => {
                let value = serde_json::to_value(&output)?;
                self.finish(current, value.clone()).await?;
                (RequestAction::Delete, Some(value))
            }
        };

        Ok(StepOutcome {
            action,
            returned,
            step: kind,
        })
    }

    async fn fork<S: Serialize>(
        &self,
        current: &CurrentRequest,
        children: Vec<S>,
        join_state: JoinStateBuilder<S>,
    ) -> Result<RequestAction, LoomError> {
        if children.is_empty() {
            return Err(LoomError::EmptyFork);
        }
        let join_id = self.ids.generate_join_id();
        let child_ids: Vec<RequestId> = children
            .iter()
            .map(|_| self.ids.generate_request_id())
            .collect();

        // Encode everything up front so a bad state fails before any write.
        let contents = children
            .iter()
            .zip(&child_ids)
            .map(|(state, id)| current.child_content(*id, join_id, state))
            .collect::<Result<Vec<_>, _>>()?;
        let next = current.content_at(&join_state(join_id))?;

        self.coordinator.fork(join_id, &child_ids).await?;
        let queue = self.queues.get(&current.queue)?;
        for content in contents {
            queue.post(content).await?;
        }
        debug!(join_id = %join_id, children = child_ids.len(), "forked");
        Ok(RequestAction::PostponeAndReplace(next, Duration::ZERO))
    }

    async fn wait(
        &self,
        join_id: JoinId,
        condition: JoinCondition,
        continuation: Continuation,
    ) -> Result<RequestAction, LoomError> {
        let content = continuation.content.clone();
        match self
            .coordinator
            .subscribe(join_id, condition, continuation)
            .await?
        {
            Subscription::Resolved => Ok(RequestAction::PostponeAndReplace(content, Duration::ZERO)),
            Subscription::Queued => Ok(RequestAction::Delete),
        }
    }

    async fn call(
        &self,
        current: &CurrentRequest,
        request: CallBuilder,
        caller: Continuation,
    ) -> Result<RequestAction, LoomError> {
        let callee_id = self.ids.generate_request_id();
        let call = request(callee_id)?;

        let envelope = Envelope::new(current.envelope.header.clone(), call.request)
            .with_metadata(RequestMetadata::new(callee_id).with_caller(caller));
        let queue = self.queues.get(&call.queue)?;
        queue.post(serde_json::to_string(&envelope)?).await?;
        debug!(callee = %callee_id, queue = %call.queue, agent = %envelope.request.agent, "called");
        Ok(RequestAction::Delete)
    }

    /// Terminal step: complete the join slot and resume the caller, if any.
    async fn finish(&self, current: &CurrentRequest, value: Value) -> Result<(), LoomError> {
        let metadata = current.metadata();
        if let Some(join_id) = metadata.join {
            self.coordinator
                .complete(join_id, metadata.request_id, value.clone())
                .await?;
        }
        if let Some(caller) = &metadata.caller {
            let mut resumed: WireEnvelope = serde_json::from_str(&caller.content)?;
            resumed.callee_return_result = Some(value);
            let queue = self.queues.get(&caller.queue)?;
            queue.post(serde_json::to_string(&resumed)?).await?;
            debug!(request_id = %metadata.request_id, caller_queue = %caller.queue, "returned to caller");
        }
        Ok(())
    }
}
