//! Codec backends: the decoders that feed the streaming core.
//!
//! A backend owns at most one loaded track and produces interleaved `i16`
//! PCM on demand. Every operation tolerates the "nothing loaded" state,
//! degrading to a no-op (or silence for [`CodecBackend::decode_into`]).

use std::sync::Arc;

use modstream_types::BackendKind;

use crate::error::{DecodeError, InitError, LoadError};

pub mod mp3;
pub mod tracker;

pub use self::mp3::Mp3Backend;
pub use self::tracker::TrackerBackend;

/// Capability set every decoder exposes to the engine.
pub trait CodecBackend: Send {
    fn kind(&self) -> BackendKind;

    /// One-time setup. `stereo` selects the channel layout of decoded output.
    fn init(&mut self, stereo: bool) -> Result<(), InitError>;

    /// Tear the backend down; unloads any track first.
    fn end(&mut self);

    /// Parse `data` into a track, replacing any track already loaded.
    ///
    /// On failure nothing stays loaded.
    fn load(&mut self, data: Arc<[u8]>) -> Result<(), LoadError>;

    fn unload(&mut self);

    fn is_loaded(&self) -> bool;

    fn start(&mut self);

    /// Halt and rewind to the start of the track.
    fn stop(&mut self);

    /// Mirror of the controller's pause flag.
    fn set_paused(&mut self, paused: bool);

    /// Decode rate in Hz.
    fn set_frequency(&mut self, hz: u32);

    /// Volume on the backend's own scale (`0..=max_volume()`).
    fn set_volume(&mut self, volume: u8);

    fn max_volume(&self) -> u8;

    /// Interleaved channels written by [`CodecBackend::decode_into`] (1 or 2).
    fn output_channels(&self) -> usize;

    /// Fill `out` completely with interleaved PCM.
    fn decode_into(&mut self, out: &mut [i16]) -> Result<(), DecodeError>;

    fn song_title(&self) -> Option<&str>;

    fn mod_type(&self) -> Option<&str>;

    /// Total track length, when known.
    fn duration_ms(&self) -> Option<u64> {
        None
    }

    /// Playback frequency of `voice` in Hz.
    fn voice_frequency(&self, _voice: u8) -> u32 {
        0
    }

    /// Channel volume of `voice`, 0..=256.
    fn voice_volume(&self, _voice: u8) -> u32 {
        0
    }

    /// Measured output level of `voice`, 0..=65535.
    fn real_voice_volume(&self, _voice: u8) -> u32 {
        0
    }
}
