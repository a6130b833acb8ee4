//! Domain model (IDs, envelopes, join records, steps, outcomes).
//!
//! I/O を含まない純粋な型だけを置く。永続化は ports、実行は engine / app。

pub mod envelope;
pub mod ids;
pub mod join;
pub mod outcome;
pub mod retry;
pub mod step;

pub use envelope::{AgentRequest, Continuation, Envelope, RequestMetadata, WireEnvelope};
pub use ids::{JoinId, MessageId, QueueId, RequestId};
pub use join::{Completion, JoinCondition, JoinEntry, JoinError, JoinStatus, Subscription};
pub use outcome::{OutcomeReport, RequestAction, RequestOutcome};
pub use retry::RetryPolicy;
pub use step::{CallRequest, Step};
