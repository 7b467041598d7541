use thiserror::Error;

/// Errors from the subprocess speech-to-text layer.
///
/// A failed chunk is dropped with a warning; the session keeps running and
/// the user-visible effect is a gap in the transcript.
#[derive(Error, Debug)]
pub enum TranscribeError {
    #[error("transcriber unavailable: {0}")]
    Unavailable(String),

    #[error("transcription timed out after {0}s")]
    Timeout(u64),

    #[error("transcriber exited with failure: {0}")]
    Failed(String),

    #[error("invalid audio payload: {0}")]
    AudioFormat(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the LLM completion client.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("llm api error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("llm request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("llm response was not valid json: {0}")]
    Parse(String),

    #[error("llm request timed out after {0}s")]
    Timeout(u64),
}

/// Errors from the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Transient store failures are retried by the enclosing transaction;
    /// everything else surfaces to the caller immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Io(_)) => true,
            StoreError::Database(sqlx::Error::PoolTimedOut) => true,
            StoreError::Database(sqlx::Error::PoolClosed) => false,
            StoreError::Database(sqlx::Error::Database(e)) => {
                // Deadlocks and lock timeouts on the MySQL-wire backend
                e.code()
                    .map(|c| c == "1213" || c == "1205" || c == "40001")
                    .unwrap_or(false)
            }
            _ => false,
        }
    }
}

/// Errors from external task-platform adapters. Never blocks persistence.
#[derive(Error, Debug)]
pub enum IntegrationError {
    /// Retried with backoff (429, 5xx, connection failures).
    #[error("transient integration failure: {0}")]
    Transient(String),

    /// Reported immediately (auth failures, invalid payloads).
    #[error("permanent integration failure: {0}")]
    Permanent(String),
}
