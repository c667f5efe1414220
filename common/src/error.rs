use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InputInvalid(String),
    #[error("Transient provider error: {0}")]
    ProviderTransient(String),
    #[error("Permanent provider error: {0}")]
    ProviderPermanent(String),
    #[error("Catalog busy: {0}")]
    StoreBusy(String),
    #[error("Catalog error: {0}")]
    StoreFailed(#[from] surrealdb::Error),
    #[error("Search store error: {0}")]
    SearchFailed(String),
    #[error("Validation error: {0}")]
    ValidationFailed(String),
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),
    #[error("Cancelled")]
    Cancelled,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Machine-readable error kind, reported alongside the free-text message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputInvalid(_) => "input_invalid",
            Self::ProviderTransient(_) => "provider_transient",
            Self::ProviderPermanent(_) => "provider_permanent",
            Self::StoreBusy(_) => "store_busy",
            Self::StoreFailed(_) => "store_failed",
            Self::SearchFailed(_) => "search_failed",
            Self::ValidationFailed(_) => "validation_failed",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
            Self::Cancelled => "cancelled",
            Self::NotFound(_) => "not_found",
            Self::LLMParsing(_) => "provider_permanent",
            Self::Join(_) | Self::Io(_) | Self::Serde(_) | Self::Anyhow(_) => "internal",
            Self::InternalError(_) => "internal",
        }
    }

    /// Whether a caller holding retry budget may try again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProviderTransient(_) | Self::StoreBusy(_) | Self::DeadlineExceeded(_)
        )
    }
}

/// Classify provider failures: 4xx responses are permanent, everything else
/// (5xx, timeouts, connection resets, stream hiccups) is worth retrying.
impl From<OpenAIError> for AppError {
    fn from(err: OpenAIError) -> Self {
        match &err {
            // A parsed error body is a 4xx unless the provider says otherwise;
            // rate limits and overload responses are worth retrying.
            OpenAIError::ApiError(api) => {
                let text = api.to_string().to_ascii_lowercase();
                if text.contains("rate limit")
                    || text.contains("rate_limit")
                    || text.contains("overloaded")
                    || text.contains("server_error")
                {
                    Self::ProviderTransient(err.to_string())
                } else {
                    Self::ProviderPermanent(err.to_string())
                }
            }
            OpenAIError::InvalidArgument(_) | OpenAIError::JSONDeserialize(_) => {
                Self::ProviderPermanent(err.to_string())
            }
            // Transport-level failures (5xx, resets, timeouts) all arrive
            // here; the per-attempt deadline is enforced by the caller.
            _ => Self::ProviderTransient(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        classify_reqwest(&err, message)
    }
}

fn classify_reqwest(err: &reqwest::Error, message: String) -> AppError {
    if err.is_timeout() {
        return AppError::DeadlineExceeded(message);
    }
    match err.status() {
        Some(status) if status.is_client_error() => AppError::ProviderPermanent(message),
        _ => AppError::ProviderTransient(message),
    }
}
