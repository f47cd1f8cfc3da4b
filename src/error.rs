use thiserror::Error;

/// Errors surfaced by the orchestrator to callers and recorded on sessions.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("no slot available ({leased}/{max} leased)")]
    Exhausted { leased: usize, max: usize },

    #[error("join failed: {0}")]
    JoinFailed(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("drain timed out after {secs}s; sub-loops were force-cancelled")]
    DrainTimeout { secs: u64 },

    #[error("sub-loop failed: {0}")]
    LoopFailed(String),

    #[error("session {0} not found")]
    NotFound(String),

    #[error("session {session_id} is not terminal (status: {status})")]
    NotTerminal { session_id: String, status: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("meeting already has a live session ({session_id})")]
    Duplicate { session_id: String },

    #[error("waiting queue is full ({0} requests)")]
    QueueFull(usize),

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("unknown slot '{0}'")]
    UnknownSlot(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;
