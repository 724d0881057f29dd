//! Error taxonomy.
//!
//! Each layer has its own enum; [`StageError`] is what the session and the
//! root controller hand back. Only [`StageError::user_message`] turns any of
//! this into display text.

use thiserror::Error;

/// Failure to turn text or bytes into an [`ImageArtifact`](crate::io::ImageArtifact).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed data URL: {0}")]
    MalformedDataUrl(&'static str),
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("failed to read image file: {0}")]
    Io(#[from] std::io::Error),
}

/// A compositor, analyzer or editor call that did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// The service could not be reached or answered with a transport error.
    #[error("network error: {0}")]
    Network(String),
    /// The model answered but refused or produced nothing usable.
    #[error("{0}")]
    Model(String),
    /// An input image could not be prepared for the request.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CollaboratorError {
    pub fn message(&self) -> &str {
        match self {
            CollaboratorError::Network(m)
            | CollaboratorError::Model(m)
            | CollaboratorError::InvalidInput(m) => m,
        }
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    /// A request was attempted before all of its inputs were available.
    /// Carries the name of the missing input.
    #[error("incomplete selection: missing {0}")]
    IncompleteSelection(&'static str),
    /// A collaborator returned image text that could not be decoded.
    #[error("malformed artifact: {0}")]
    MalformedArtifact(#[from] CodecError),
    #[error("collaborator failure: {0}")]
    CollaboratorFailure(#[from] CollaboratorError),
    /// Another request is already in flight.
    #[error("a request is already in progress")]
    Busy,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StageError {
    /// Single line of text for the status area. Structured errors stay
    /// structured until this point.
    pub fn user_message(&self) -> String {
        match self {
            StageError::IncompleteSelection(what) => {
                format!("Please select a product and upload a scene first ({what} missing).")
            }
            StageError::MalformedArtifact(_) => {
                "The generated image could not be read. Please try again.".to_string()
            }
            StageError::CollaboratorFailure(e) => format!("Generation failed: {}", e.message()),
            StageError::Busy => "Please wait for the current request to finish.".to_string(),
            StageError::Config(msg) => format!("Configuration error: {msg}"),
            StageError::Io(e) => format!("File error: {e}"),
        }
    }
}

pub type StageResult<T> = Result<T, StageError>;
