use thiserror::Error;

/// Failure taxonomy for lifecycle operations. Everything here is rejected
/// synchronously with no partial write; delivery failures are not errors at
/// this level (they are per-session, logged, and never roll back state).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input, e.g. an empty text message. Never persisted.
    #[error("invalid {0}")]
    Validation(&'static str),

    /// Not a member, lacks the required permission, or a blocked pair.
    #[error("not authorized: {0}")]
    Authorization(&'static str),

    /// Slow mode has not yet elapsed; carries the remaining-seconds hint.
    #[error("slow mode active, retry in {remaining_seconds}s")]
    RateLimited { remaining_seconds: i64 },

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Persistence failure: aborts the whole operation, retryable.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
