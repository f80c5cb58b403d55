//! Error taxonomy for the engine.
//!
//! Only initialization and loading surface errors to callers. Configuration
//! values that are out of range are clamped or ignored, and decode failures
//! degrade to silence inside the streaming core.

/// The engine, its output or its backend could not be brought up.
///
/// Fatal for the engine instance: callers must not go on to `start`.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// The audio output refused to initialize.
    #[error("audio output failed to initialize: {0}")]
    Hardware(String),
    /// The backend's mixing engine rejected its settings.
    #[error("mixing engine rejected configuration: {0}")]
    EngineInitFailed(String),
    /// The engine configuration itself is unusable.
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

impl InitError {
    /// Numeric result code of the classic C interface (`-1` for every failure).
    pub fn code(&self) -> i8 {
        -1
    }
}

/// Track data could not be turned into a playable track.
///
/// Non-fatal: the backend is left with nothing loaded and every playback
/// operation degrades to a no-op.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Zero-length input.
    #[error("track data is empty")]
    Empty,
    /// No registered loader recognized the data.
    #[error("unrecognized track format")]
    UnrecognizedFormat,
    /// The format was recognized but the data is inconsistent.
    #[error("malformed track: {0}")]
    Malformed(String),
    /// The track needs more voices than the mixer allows.
    #[error("track uses {channels} channels, mixer allows {max}")]
    TooManyChannels { channels: usize, max: usize },
    /// The backend was used before `init`.
    #[error("backend is not initialized")]
    NotInitialized,
    /// The data ended before a required structure.
    #[error(transparent)]
    Read(#[from] ReadError),
}

/// One decode cycle failed; the streaming core substitutes silence.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The codec reported a status that is neither data nor a request for input.
    #[error("codec error: {0}")]
    Codec(String),
    /// The codec kept failing without producing data.
    #[error("decoder made no progress after {0} attempts")]
    Stalled(usize),
}

/// Bounds violation on a [`crate::reader::StreamReader`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    /// Fewer bytes remained than were requested.
    #[error("short read: wanted {wanted} bytes, {got} available")]
    ShortRead { wanted: usize, got: usize },
    /// A seek target fell outside `0..=len`.
    #[error("seek to {offset} is outside 0..={len}")]
    OutOfBounds { offset: i64, len: u64 },
}
