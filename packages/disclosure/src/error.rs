//! Typed errors for the disclosure core.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling. Each variant maps to one
//! recovery policy: input errors surface to the caller, model errors are
//! retried once then substituted with a documented empty value, extraction
//! errors fail the enclosing stage, config errors are fatal at startup.

use thiserror::Error;

/// Result type for disclosure core operations.
pub type Result<T> = std::result::Result<T, DisclosureError>;

/// Errors that can occur in the structuring and comparison pipelines.
#[derive(Debug, Error)]
pub enum DisclosureError {
    /// Malformed input from the caller (bad upload, unsupported type, size overflow).
    /// Never retried.
    #[error("invalid input: {0}")]
    Input(String),

    /// A pipeline stage failed irrecoverably (e.g. corrupt PDF).
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// An LLM or embedding call failed or returned malformed output.
    /// Recovered locally with a single retry before substitution.
    #[error("model error: {0}")]
    Model(String),

    /// Per-request deadline exceeded. Treated as a model error by callers.
    #[error("deadline exceeded: {0}")]
    Timeout(String),

    /// Missing or invalid settings at startup. Fatal to the process.
    #[error("config error: {0}")]
    Config(String),

    /// Lock acquisition timed out.
    #[error("lock contention: {0}")]
    Concurrency(String),

    /// The document's retention deadline has passed.
    #[error("document expired: {0}")]
    RetentionExpired(String),

    /// Record not found in a store.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage I/O failed.
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization failed.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Operation was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<openai_client::OpenAIError> for DisclosureError {
    fn from(err: openai_client::OpenAIError) -> Self {
        use openai_client::OpenAIError;
        match err {
            OpenAIError::Config(msg) => DisclosureError::Config(msg),
            OpenAIError::Timeout(secs) => {
                DisclosureError::Timeout(format!("model call exceeded {secs:.0}s"))
            }
            other => DisclosureError::Model(other.to_string()),
        }
    }
}

impl DisclosureError {
    /// Whether this error falls under the model-error recovery policy
    /// (single retry, then substitute a documented empty value).
    pub fn is_model_error(&self) -> bool {
        matches!(self, DisclosureError::Model(_) | DisclosureError::Timeout(_))
    }
}
