use serde::{Deserialize, Serialize};

/// Controller-level playback state.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// No transfer running; the output is idle.
    #[default]
    Stopped,
    /// Buffers are being streamed and the backend is decoding.
    Playing,
    /// Buffers keep streaming but every period is silence.
    Paused,
}

impl PlaybackState {
    /// `true` while the output is streaming (playing or paused).
    pub fn is_streaming(self) -> bool {
        !matches!(self, PlaybackState::Stopped)
    }
}

/// Codec backend selected when the engine is initialized.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Tracker modules (ProTracker MOD family).
    #[default]
    Tracker,
    /// MPEG audio layer I/II/III.
    Mp3,
}

impl BackendKind {
    /// Short label used in logs and status payloads.
    pub fn label(self) -> &'static str {
        match self {
            BackendKind::Tracker => "tracker",
            BackendKind::Mp3 => "mp3",
        }
    }
}

/// One voice's telemetry sample, as exposed for visualization.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoiceReadout {
    /// Voice index (starting from zero).
    pub voice: u8,
    /// Playback frequency in Hz, zero when the voice is silent.
    pub frequency: u32,
    /// Channel volume in the 0..=256 range.
    pub volume: u32,
    /// Measured output level in the 0..=65535 range.
    pub real_volume: u32,
}

/// Point-in-time engine status.
///
/// Counters are best-effort snapshots of values updated from the output
/// completion context and may move immediately after the call returns.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineStatus {
    /// Controller state.
    pub state: PlaybackState,
    /// Active backend.
    pub backend: BackendKind,
    /// `true` when a track is loaded.
    pub loaded: bool,
    /// Song title of the loaded track, if any.
    pub title: Option<String>,
    /// Backend-specific track type description.
    pub mod_type: Option<String>,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Left/right volume as last set (0..=255).
    pub volume: (u8, u8),
    /// Index of the buffer currently bound to the output (0 or 1).
    pub live_buffer: u8,
    /// Completed output periods since the last start.
    pub periods: u64,
    /// Periods replaced by silence because no filled buffer was ready.
    pub underruns: u64,
    /// Periods replaced by silence because the backend failed to decode.
    pub decode_failures: u64,
    /// Total track length in milliseconds, when the backend knows it.
    pub duration_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_is_not_streaming() {
        assert!(!PlaybackState::Stopped.is_streaming());
        assert!(PlaybackState::Playing.is_streaming());
        assert!(PlaybackState::Paused.is_streaming());
    }

    #[test]
    fn backend_kind_labels() {
        assert_eq!(BackendKind::Tracker.label(), "tracker");
        assert_eq!(BackendKind::Mp3.label(), "mp3");
    }
}
