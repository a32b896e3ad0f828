//! Domain-level error taxonomy for Automend.

/// Automend domain errors.
#[derive(Debug, thiserror::Error)]
pub enum AutomendError {
    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    #[error("malformed diff: {0}")]
    MalformedDiff(String),

    #[error("baseline test run is passing; nothing to repair")]
    NothingToRepair,

    #[error("proposal source error: {0}")]
    Proposal(String),

    #[error("execution environment unavailable: {0}")]
    EnvironmentUnavailable(String),

    #[error("rollback failed, working tree may be dirty: {0}")]
    RollbackFailed(String),

    #[error("submission sink error: {0}")]
    Submission(String),

    #[error("session cancelled by caller")]
    Cancelled,

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Automend domain operations.
pub type Result<T> = std::result::Result<T, AutomendError>;
