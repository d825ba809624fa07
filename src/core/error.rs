//! Error kinds surfaced to the user.
//!
//! None of these end a session: the API turns each of them into a visible message.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AppError {
    /// Bad credential, model identifier or generation parameters.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The hosted inference provider failed, timed out or sent a malformed stream.
    #[error("inference provider error: {0}")]
    Upstream(String),

    /// Unsupported or corrupt uploaded file.
    #[error("unsupported input: {0}")]
    InputFormat(String),

    #[error("session {0} does not exist")]
    UnknownSession(Uuid),

    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("no file has been uploaded in this session")]
    NoUpload,
}

impl AppError {
    /// Stable identifier used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "configuration",
            AppError::Upstream(_) => "upstream",
            AppError::InputFormat(_) => "input_format",
            AppError::UnknownSession(_) => "unknown_session",
            AppError::EmptyPrompt => "empty_prompt",
            AppError::NoUpload => "no_upload",
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::Upstream(format!("request timed out: {e}"))
        } else {
            AppError::Upstream(e.to_string())
        }
    }
}

impl From<csv::Error> for AppError {
    fn from(e: csv::Error) -> Self {
        AppError::InputFormat(e.to_string())
    }
}
