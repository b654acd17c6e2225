//! Unified error type for the weather service.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Bad parameter: {0}")]
    BadParameter(String),

    #[error("Location not found: {0}")]
    NotFound(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    #[error("Empty result: {0}")]
    EmptyResult(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a refresh failing with this error may fall back to a cached value.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::UpstreamUnavailable(_) | Error::DecodeFailure(_) | Error::EmptyResult(_)
        )
    }
}
