//! Error types for the playback session manager

use thiserror::Error;

/// Result type alias for playback operations
pub type Result<T> = std::result::Result<T, Error>;

/// Playback error types
#[derive(Error, Debug)]
pub enum Error {
    // Source errors
    #[error("no playable sources available")]
    NoPlayableSource,

    #[error("unknown source id: {0}")]
    UnknownSource(String),

    #[error("no URL available for quality {quality}")]
    NoQualityUrl { quality: String },

    // Entitlement errors
    #[error("entitlement resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("entitlement resolution returned no source")]
    EmptyResolution,

    // Engine errors
    #[error("engine construction failed: {0}")]
    EngineConstruction(String),

    #[error("engine load failed for {url}: {message}")]
    EngineLoad { url: String, message: String },

    #[error("no engine attached")]
    NoEngine,

    /// Produced by [`MediaSink`](crate::engine::MediaSink) implementations
    #[error("media sink error: {0}")]
    Sink(String),

    // Session errors
    #[error("invalid session state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("session is torn down")]
    SessionTornDown,

    #[error("no source selected")]
    NoSourceSelected,

    // Progress errors
    /// Produced by [`WatchHistoryStore`](crate::progress::WatchHistoryStore)
    /// implementations
    #[error("watch history error: {0}")]
    WatchHistory(String),

    // Presentation errors
    #[error("presentation mode change failed: {0}")]
    Presentation(String),

    // Network errors
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl Error {
    /// Returns true if this error is recoverable without user action
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::WatchHistory(_) | Error::Presentation(_)
        )
    }

    /// Returns the error code for diagnostics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::NoPlayableSource => "NO_SOURCE",
            Error::UnknownSource(_) => "UNKNOWN_SOURCE",
            Error::NoQualityUrl { .. } => "NO_QUALITY_URL",
            Error::ResolutionFailed(_) => "RESOLUTION_FAILED",
            Error::EmptyResolution => "EMPTY_RESOLUTION",
            Error::EngineConstruction(_) => "ENGINE_CONSTRUCT",
            Error::EngineLoad { .. } => "ENGINE_LOAD",
            Error::NoEngine => "NO_ENGINE",
            Error::Sink(_) => "SINK",
            Error::InvalidStateTransition { .. } => "INVALID_STATE",
            Error::SessionTornDown => "TORN_DOWN",
            Error::NoSourceSelected => "NO_SOURCE_SELECTED",
            Error::WatchHistory(_) => "WATCH_HISTORY",
            Error::Presentation(_) => "PRESENTATION",
            Error::Network(_) => "NETWORK",
        }
    }
}
