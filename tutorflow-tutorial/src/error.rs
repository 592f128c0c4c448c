//! Error types for the tutorial pipeline.

use thiserror::Error;
use tutorflow_core::error::FlowError;

/// Result type for pipeline collaborators.
pub type Result<T> = std::result::Result<T, TutorialError>;

/// Errors raised by collaborators and pipeline nodes.
#[derive(Error, Debug)]
pub enum TutorialError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Reasoning service returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Could not parse model response: {0}")]
    Parse(String),

    #[error("No source files matched in {0}")]
    NoFiles(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TutorialError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}

impl From<TutorialError> for FlowError {
    fn from(err: TutorialError) -> Self {
        FlowError::Generic(eyre::Report::new(err))
    }
}
