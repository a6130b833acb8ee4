use thiserror::Error;

use crate::domain::{JoinError, JoinId};
use crate::ports::join_store::JoinStoreError;
use crate::ports::queue::QueueError;

/// Operational classification of an error.
///
/// - Transient: retrying later may succeed
/// - Permanent: the request itself is bad (poison, rejected, agent failure)
/// - Infrastructure: a backend misbehaved or timed out
/// - Protocol: a bug in the calling agent or the engine; never retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
    Protocol,
}

/// Error returned by user transition functions.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AgentError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AgentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl AgentError {
    /// Classification of the engine error this wraps, if it wraps one.
    fn engine_kind(&self) -> Option<ErrorKind> {
        self.source
            .as_deref()?
            .downcast_ref::<LoomError>()
            .map(LoomError::kind)
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::with_source("json", err)
    }
}

impl From<LoomError> for AgentError {
    fn from(err: LoomError) -> Self {
        AgentError::with_source("engine", err)
    }
}

#[derive(Debug, Error)]
pub enum LoomError {
    #[error("queue: {0}")]
    Queue(#[from] QueueError),

    #[error("join store: {0}")]
    JoinStore(#[from] JoinStoreError),

    #[error("join record {join_id}: {source}")]
    Join {
        join_id: JoinId,
        #[source]
        source: JoinError,
    },

    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),

    /// The request's header, state or input does not fit the agent's types.
    #[error("cannot decode {part} for agent={agent}")]
    Decode {
        agent: String,
        part: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("no agent registered under name={0}")]
    UnknownAgent(String),

    #[error("duplicate agent for name={0}")]
    DuplicateAgent(String),

    #[error("no queue registered under id={0}")]
    UnknownQueue(String),

    #[error("ForkAndGoto requires at least one child state")]
    EmptyFork,

    #[error("agent: {0}")]
    Agent(#[from] AgentError),

    #[error("config: {0}")]
    Config(String),
}

impl LoomError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoomError::Queue(QueueError::LeaseLost { .. }) => ErrorKind::Transient,
            LoomError::Queue(_) => ErrorKind::Infrastructure,
            LoomError::JoinStore(e) if e.is_retryable() => ErrorKind::Transient,
            LoomError::JoinStore(JoinStoreError::Timeout { .. }) => ErrorKind::Infrastructure,
            LoomError::JoinStore(JoinStoreError::Backend(_)) => ErrorKind::Infrastructure,
            LoomError::JoinStore(_) => ErrorKind::Protocol,
            LoomError::Join { .. }
            | LoomError::EmptyFork
            | LoomError::UnknownQueue(_)
            | LoomError::DuplicateAgent(_) => ErrorKind::Protocol,
            LoomError::Agent(e) => e.engine_kind().unwrap_or(ErrorKind::Permanent),
            LoomError::Codec(_) | LoomError::Decode { .. } | LoomError::UnknownAgent(_) => {
                ErrorKind::Permanent
            }
            LoomError::Config(_) => ErrorKind::Permanent,
        }
    }
}
