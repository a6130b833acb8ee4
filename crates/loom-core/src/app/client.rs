//! LoomClient - ホストから root request を投入する入口

use std::sync::Arc;

use crate::domain::{QueueId, RequestId};
use crate::error::LoomError;
use crate::ports::{IdGenerator, QueueDirectory};
use crate::typed::{Agent, EnvelopeCodec};

#[derive(Clone)]
pub struct LoomClient {
    queues: QueueDirectory,
    ids: Arc<dyn IdGenerator>,
    codec: EnvelopeCodec,
}

impl LoomClient {
    pub fn new(queues: QueueDirectory, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            queues,
            ids,
            codec: EnvelopeCodec,
        }
    }

    /// Post a new request of agent `A` at `state` onto `queue`.
    pub async fn start<A: Agent>(
        &self,
        queue: &QueueId,
        header: &A::Header,
        state: &A::State,
        input: &A::Input,
    ) -> Result<RequestId, LoomError> {
        let request_id = self.ids.generate_request_id();
        let content = self.codec.start::<A>(request_id, header, state, input)?;
        self.queues.get(queue)?.post(content).await?;
        Ok(request_id)
    }
}
