use thiserror::Error;

/// Failures on the audit path. Both are recoverable by editing or resubmitting.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuditError {
    /// A required form field is missing; no request was sent.
    #[error("{0}")]
    Validation(String),

    /// The generative-text call failed or returned unusable content.
    #[error("{0}")]
    Service(String),
}

/// History persistence failures. These are logged and never shown to the user.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history store unavailable: {0}")]
    Unavailable(String),
}
