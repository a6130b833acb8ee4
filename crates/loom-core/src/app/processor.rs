//! QueueProcessor - 1 つのキューとその handler の静的な設定
//!
//! # フロー
//! スケジューラ → EnvelopeCodec::decode → RequestHandler::handle → HandlerResult → RequestAction
//!
//! `AgentDispatcher` が標準の handler。`agent` タグで AgentRegistry を引き、
//! TransitionEngine で 1 step 進める。未登録の agent は Rejected。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::{QueueId, WireEnvelope};
use crate::engine::{CurrentRequest, StepOutcome, TransitionEngine};
use crate::error::LoomError;
use crate::ports::{Lease, QueuePort};
use crate::typed::AgentRegistry;

/// Declared result of handling one message.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerResult {
    Processed(StepOutcome),
    /// The handler refuses this message; it is deleted.
    Rejected(String),
}

/// Maps a decoded request to an outcome. An `Err` is reported as
/// `ExceptionThrown`, or as `DeserializationError` for `LoomError::Decode`.
///
/// `lease` is the checked-out message the envelope came from; a slow handler
/// extends it rather than letting the message be redelivered.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(
        &self,
        lease: &Lease,
        envelope: WireEnvelope,
    ) -> Result<HandlerResult, LoomError>;
}

/// Routes requests to registered agents and runs one transition each.
pub struct AgentDispatcher {
    registry: Arc<AgentRegistry>,
    engine: TransitionEngine,
}

impl AgentDispatcher {
    pub fn new(registry: Arc<AgentRegistry>, engine: TransitionEngine) -> Self {
        Self { registry, engine }
    }
}

#[async_trait]
impl RequestHandler for AgentDispatcher {
    async fn handle(
        &self,
        lease: &Lease,
        envelope: WireEnvelope,
    ) -> Result<HandlerResult, LoomError> {
        let queue = lease.queue_id();
        let agent = match self.registry.get(&envelope.request.agent) {
            Ok(agent) => agent,
            Err(err) => {
                warn!(queue = %queue, agent = %envelope.request.agent, "no agent for request");
                return Ok(HandlerResult::Rejected(err.to_string()));
            }
        };
        let current = CurrentRequest::new(queue.clone(), envelope, self.engine.ids())
            .with_lease(lease.clone());
        let outcome = agent.step(&self.engine, &current).await?;
        Ok(HandlerResult::Processed(outcome))
    }
}

/// One queue served by the scheduler.
#[derive(Clone)]
pub struct QueueProcessor {
    pub queue: Arc<dyn QueuePort>,
    pub handler: Arc<dyn RequestHandler>,
    /// Expected worst-case handling time of one message.
    pub max_process_time: Duration,
    /// Messages checked out per poll.
    pub message_batch_size: usize,
}

impl QueueProcessor {
    pub fn new(queue: Arc<dyn QueuePort>, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            queue,
            handler,
            max_process_time: Duration::from_secs(60),
            message_batch_size: 16,
        }
    }

    pub fn with_max_process_time(mut self, max_process_time: Duration) -> Self {
        self.max_process_time = max_process_time;
        self
    }

    pub fn with_batch_size(mut self, message_batch_size: usize) -> Self {
        self.message_batch_size = message_batch_size.max(1);
        self
    }

    pub fn id(&self) -> &QueueId {
        self.queue.id()
    }

    /// Lease for a checked-out batch, assuming every message in it is
    /// handled one after another by a single worker.
    pub fn batch_lease(&self) -> Duration {
        self.max_process_time
            .saturating_mul(self.message_batch_size.try_into().unwrap_or(u32::MAX))
    }
}
