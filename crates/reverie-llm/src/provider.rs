//! LLM Provider trait

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// LLM error types
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl From<LlmError> for reverie_core::Error {
    fn from(e: LlmError) -> Self {
        reverie_core::Error::Inference(e.to_string())
    }
}

/// A single text-completion backend.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Model identifier sent to the backend.
    fn model(&self) -> &str;

    /// One-shot, non-streaming completion.
    async fn complete(&self, prompt: &str, max_tokens: u32) -> LlmResult<String>;
}

/// Map a non-success HTTP status to the matching error.
pub(crate) fn status_error(status: reqwest::StatusCode, body: String) -> LlmError {
    match status.as_u16() {
        401 | 403 => LlmError::AuthFailed(body),
        429 => LlmError::RateLimited { retry_after_ms: 60_000 },
        _ => LlmError::RequestFailed(format!("{}: {}", status, body)),
    }
}
