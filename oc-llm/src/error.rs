use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    /// Malformed canonical request. Raised before any network activity.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Wire payload did not match the provider schema, or an unknown
    /// streaming event discriminant was received.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    /// Non-2xx status, connection failure or read failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
