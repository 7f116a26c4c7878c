//! Error types for pcmbridge.

use thiserror::Error;

/// Result type alias using pcmbridge's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pcmbridge.
#[derive(Error, Debug)]
pub enum Error {
    // Streaming session errors
    #[error("Audio is playing")]
    AlreadyPlaying,

    #[error("Audio is not playing")]
    NotPlaying,

    #[error("Stream format not initialized")]
    NotInitialized,

    // File player errors
    #[error("Player is null")]
    PlayerIsNull,

    #[error("Player is playing")]
    PlayerIsPlaying,

    // Audio errors
    #[error("Audio decode error: {0}")]
    AudioDecode(String),

    #[error("Audio output error: {0}")]
    AudioOutput(String),

    // Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Unknown(String),
}

impl Error {
    /// Wrap any displayable cause as [`Error::Unknown`], keeping its message.
    pub fn unknown(cause: impl std::fmt::Display) -> Self {
        Self::Unknown(cause.to_string())
    }

    /// Returns true if this error is a failed session precondition.
    pub const fn is_session_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyPlaying | Self::NotPlaying | Self::PlayerIsNull | Self::PlayerIsPlaying
        )
    }

    /// Wire code reported to the controlling side.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AlreadyPlaying => "ERR_ALREADY_PLAYING",
            Self::NotPlaying => "ERR_NOT_PLAYING",
            Self::PlayerIsNull => "ERR_PLAYER_IS_NULL",
            Self::PlayerIsPlaying => "ERR_PLAYER_IS_PLAYING",
            _ => "ERR_UNKNOWN",
        }
    }

    /// Collapse device-level failures into [`Error::Unknown`] at a control boundary.
    ///
    /// Precondition errors pass through untouched.
    pub fn at_boundary(self) -> Self {
        match self {
            Self::AudioDecode(msg) | Self::AudioOutput(msg) => Self::Unknown(msg),
            Self::Io(e) => Self::Unknown(e.to_string()),
            other => other,
        }
    }
}
