//! Error types for Skyris voice

use thiserror::Error;

use crate::voice::{CaptureError, SessionError};

/// Result type alias for Skyris voice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Skyris voice
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone acquisition failed
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Classified session failure
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The session runtime has exited
    #[error("speech session is no longer running")]
    SessionClosed,

    /// WAV packaging error
    #[error("packaging error: {0}")]
    Packaging(String),

    /// AI backend error
    #[error("backend error: {0}")]
    Backend(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
