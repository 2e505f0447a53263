//! The error taxonomy of the orchestration core. Every stage failure is
//! mapped into one of these kinds before the job is terminated; no error is
//! allowed to cross more than one stage boundary unmapped.

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("invalid video url: {0}")]
    ValidationFailure(String),

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("fetch failed permanently: {0}")]
    PermanentFetch(String),

    #[error("transcode failed: {0}")]
    TranscodeFailure(String),

    #[error("object store failure: {0}")]
    StorageFailure(String),

    #[error("system overloaded: {0}")]
    SystemOverload(String),
}

impl StageError {
    /// Whether retrying this kind of failure is meaningful at all.
    /// `RecoveryLoop` itself does not discriminate by kind — it bounds
    /// retries purely by attempt count — so this accessor only serves
    /// callers (tests, diagnostics) that want to reason about intent.
    pub fn is_retry_eligible(&self) -> bool {
        !matches!(
            self,
            StageError::ValidationFailure(_) | StageError::SystemOverload(_)
        )
    }
}

/// Errors internal to the `JobStore`. These are logged and swallowed at the
/// call site rather than propagated into stage logic.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job already exists")]
    AlreadyExists,
    #[error("job not found")]
    NotFound,
    #[error("store backend error: {0}")]
    Backend(#[from] sqlx::Error),
}
