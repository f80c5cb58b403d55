//! Per-voice readouts for visualizers.

use modstream_types::VoiceReadout;

use crate::registry::SharedBackend;

/// Cloneable read-only handle onto the engine's backend.
///
/// Every read takes the backend lock briefly, so polling from a UI thread
/// competes with the decoder for at most one accessor call at a time.
#[derive(Clone)]
pub struct VoiceTelemetry {
    backend: SharedBackend,
}

impl VoiceTelemetry {
    pub(crate) fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Playback frequency of `voice` in Hz; 0 when silent or unknown.
    pub fn voice_frequency(&self, voice: u8) -> u32 {
        self.backend.lock().voice_frequency(voice)
    }

    pub fn voice_volume(&self, voice: u8) -> u32 {
        self.backend.lock().voice_volume(voice)
    }

    /// Measured output level of `voice` (0..=65535).
    pub fn real_voice_volume(&self, voice: u8) -> u32 {
        self.backend.lock().real_voice_volume(voice)
    }

    /// Read the first `voices` voices under a single lock.
    pub fn snapshot(&self, voices: u8) -> Vec<VoiceReadout> {
        let backend = self.backend.lock();
        (0..voices)
            .map(|voice| VoiceReadout {
                voice,
                frequency: backend.voice_frequency(voice),
                volume: backend.voice_volume(voice),
                real_volume: backend.real_voice_volume(voice),
            })
            .collect()
    }
}
