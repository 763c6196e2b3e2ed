use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("Path not found: {0}")]
    PathNotFound(String),
    #[error("Path unreadable: {0}")]
    PathUnreadable(String),
    #[error("Invalid regex pattern: {0}")]
    RegexInvalid(#[from] regex::Error),
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Token limit exceeded: {0}")]
    TokenLimit(String),
    #[error("Reducer mismatch: {0}")]
    ReducerMismatch(String),
    #[error("Reducer artifact not found at {0}")]
    ArtifactNotFound(String),
    #[error("Reducer artifact incompatible: {0}")]
    ArtifactIncompatible(String),
    #[error("Not implemented: {0}")]
    NotImplemented(String),
    #[error("Store error: {0}")]
    Store(String),
    #[error("Store inconsistency: {0}")]
    Inconsistency(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Run cancelled")]
    Cancelled,
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Internal service error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Transient failures that the embedding retry loop may re-attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Timeout(_)) || self.is_transient_transport()
    }

    fn is_transient_transport(&self) -> bool {
        match self {
            Self::OpenAI(OpenAIError::Reqwest(_)) => true,
            Self::OpenAI(OpenAIError::ApiError(api)) => {
                // 429 and 5xx surface as API errors; anything else is permanent.
                let message = api.message.to_ascii_lowercase();
                message.contains("rate limit")
                    || message.contains("overloaded")
                    || message.contains("server error")
                    || message.contains("timeout")
            }
            _ => false,
        }
    }
}
