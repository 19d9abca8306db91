//! Error types for the hazard decision pipeline

use thiserror::Error;

/// Result type alias for the pipeline
pub type Result<T> = std::result::Result<T, TrackGuardError>;

/// Errors that can occur while running the pipeline
#[derive(Error, Debug)]
pub enum TrackGuardError {
    #[error("Frame source failed: {0}")]
    FrameSource(String),

    #[error("Detector failed: {0}")]
    Detector(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Track store error: {0}")]
    Tracking(String),

    #[error("Alert log error: {0}")]
    AlertLog(String),

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl TrackGuardError {
    pub fn frame_source<S: Into<String>>(msg: S) -> Self {
        Self::FrameSource(msg.into())
    }

    pub fn detector<S: Into<String>>(msg: S) -> Self {
        Self::Detector(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn alert_log<S: Into<String>>(msg: S) -> Self {
        Self::AlertLog(msg.into())
    }

    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }

    /// Errors that end a run, as opposed to per-batch detector failures
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Detector(_))
    }
}

impl From<anyhow::Error> for TrackGuardError {
    fn from(err: anyhow::Error) -> Self {
        Self::Tracking(err.to_string())
    }
}
