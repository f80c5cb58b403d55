//! Tracker-module backend.
//!
//! In stereo the voices are hard-panned Amiga style (L R R L).

use std::sync::Arc;

use modstream_types::BackendKind;

use crate::backend::CodecBackend;
use crate::error::{DecodeError, InitError, LoadError};
use crate::reader::StreamReader;
use crate::tracker::loader::{self, ModuleLoader};
use crate::tracker::mixer::MixerSettings;
use crate::tracker::player::{MAX_VOLUME, Player};
use crate::tracker::load_module;

/// Polyphony ceiling for loaded modules.
pub const MAX_CHANNELS: usize = 128;
const DEFAULT_RATE: u32 = 48_000;

pub struct TrackerBackend {
    loaders: Vec<Box<dyn ModuleLoader>>,
    settings: Option<MixerSettings>,
    max_voices: usize,
    rate: u32,
    volume: u8,
    paused: bool,
    player: Option<Player>,
    title: Option<String>,
    mod_type: Option<String>,
}

impl TrackerBackend {
    pub fn new(max_voices: usize) -> Self {
        Self {
            loaders: Vec::new(),
            settings: None,
            max_voices: max_voices.min(MAX_CHANNELS),
            rate: DEFAULT_RATE,
            volume: MAX_VOLUME,
            paused: false,
            player: None,
            title: None,
            mod_type: None,
        }
    }

    /// Current `(order, row)` of the loaded module.
    pub fn position(&self) -> Option<(usize, usize)> {
        self.player.as_ref().map(Player::position)
    }
}

impl Default for TrackerBackend {
    fn default() -> Self {
        Self::new(MAX_CHANNELS)
    }
}

impl CodecBackend for TrackerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Tracker
    }

    fn init(&mut self, stereo: bool) -> Result<(), InitError> {
        let settings = MixerSettings {
            rate: self.rate,
            stereo,
            max_voices: self.max_voices,
        };
        settings.validate()?;
        self.loaders = loader::all_loaders();
        self.settings = Some(settings);
        tracing::info!(
            rate_hz = settings.rate,
            stereo,
            voices = settings.max_voices,
            loaders = self.loaders.len(),
            "tracker engine ready"
        );
        Ok(())
    }

    fn end(&mut self) {
        self.unload();
        self.loaders.clear();
        self.settings = None;
    }

    fn load(&mut self, data: Arc<[u8]>) -> Result<(), LoadError> {
        self.unload();
        let settings = self.settings.ok_or(LoadError::NotInitialized)?;
        let mut reader = StreamReader::new(data);
        let module = load_module(&self.loaders, &mut reader, self.max_voices)?;

        self.title = Some(module.title.clone());
        self.mod_type = Some(module.kind.clone());
        tracing::info!(
            title = %module.title,
            kind = %module.kind,
            channels = module.channels,
            orders = module.orders.len(),
            "module loaded"
        );
        let mut player = Player::new(module, settings);
        player.wrap = true;
        player.set_volume(self.volume);
        player.set_paused(self.paused);
        self.player = Some(player);
        Ok(())
    }

    fn unload(&mut self) {
        self.player = None;
        self.title = None;
        self.mod_type = None;
    }

    fn is_loaded(&self) -> bool {
        self.player.is_some()
    }

    fn start(&mut self) {
        if let Some(player) = &mut self.player {
            player.start();
        }
    }

    fn stop(&mut self) {
        if let Some(player) = &mut self.player {
            player.stop();
        }
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        if let Some(player) = &mut self.player {
            player.set_paused(paused);
        }
    }

    fn set_frequency(&mut self, hz: u32) {
        self.rate = hz;
        if let Some(settings) = &mut self.settings {
            settings.rate = hz;
        }
        if let Some(player) = &mut self.player {
            player.set_rate(hz);
        }
    }

    fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(MAX_VOLUME);
        if let Some(player) = &mut self.player {
            player.set_volume(self.volume);
        }
    }

    fn max_volume(&self) -> u8 {
        MAX_VOLUME
    }

    fn output_channels(&self) -> usize {
        self.settings.map_or(2, |s| s.channels())
    }

    fn decode_into(&mut self, out: &mut [i16]) -> Result<(), DecodeError> {
        match &mut self.player {
            Some(player) => player.render(out),
            None => out.fill(0),
        }
        Ok(())
    }

    fn song_title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    fn mod_type(&self) -> Option<&str> {
        self.mod_type.as_deref()
    }

    fn voice_frequency(&self, voice: u8) -> u32 {
        self.player
            .as_ref()
            .map_or(0, |p| p.voice_frequency(usize::from(voice)))
    }

    fn voice_volume(&self, voice: u8) -> u32 {
        self.player
            .as_ref()
            .map_or(0, |p| p.voice_volume(usize::from(voice)))
    }

    fn real_voice_volume(&self, voice: u8) -> u32 {
        self.player
            .as_ref()
            .map_or(0, |p| p.real_voice_volume(usize::from(voice)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ModFixture;

    fn ready(stereo: bool) -> TrackerBackend {
        let mut backend = TrackerBackend::default();
        backend.set_frequency(8_000);
        backend.init(stereo).unwrap();
        backend
    }

    fn fixture() -> Arc<[u8]> {
        Arc::from(
            ModFixture::new()
                .title("tracker title")
                .cell(0, 0, 0, 1, 428, 0xF, 0x01)
                .build(),
        )
    }

    #[test]
    fn init_rejects_bad_mix_rate() {
        let mut backend = TrackerBackend::default();
        backend.set_frequency(1_000);
        assert!(matches!(backend.init(true), Err(InitError::EngineInitFailed(_))));
    }

    #[test]
    fn load_before_init_fails() {
        let mut backend = TrackerBackend::default();
        assert!(matches!(backend.load(fixture()), Err(LoadError::NotInitialized)));
    }

    #[test]
    fn metadata_roundtrip() {
        let mut backend = ready(true);
        backend.load(fixture()).unwrap();
        assert_eq!(backend.song_title(), Some("tracker title"));
        assert_eq!(backend.mod_type(), Some("Protracker"));
        backend.unload();
        assert_eq!(backend.song_title(), None);
        assert_eq!(backend.mod_type(), None);
        assert!(!backend.is_loaded());
    }

    #[test]
    fn failed_load_leaves_nothing_loaded() {
        let mut backend = ready(true);
        backend.load(fixture()).unwrap();
        assert!(backend.load(Arc::from(vec![1u8; 10])).is_err());
        assert!(!backend.is_loaded());
        assert_eq!(backend.song_title(), None);
    }

    #[test]
    fn unloaded_backend_is_inert() {
        let mut backend = ready(true);
        backend.start();
        backend.stop();
        backend.unload();
        let mut out = [7i16; 8];
        backend.decode_into(&mut out).unwrap();
        assert_eq!(out, [0; 8]);
        assert_eq!(backend.voice_frequency(0), 0);
    }

    #[test]
    fn wraps_forever_once_loaded() {
        let mut backend = ready(true);
        backend.load(fixture()).unwrap();
        backend.start();
        let mut out = vec![0i16; 160 * 2];
        for _ in 0..200 {
            backend.decode_into(&mut out).unwrap();
        }
        assert!(out.iter().any(|&s| s != 0));
        assert_eq!(backend.position().map(|p| p.0), Some(0));
    }

    #[test]
    fn stop_rewinds() {
        let mut backend = ready(true);
        backend.load(fixture()).unwrap();
        backend.start();
        let mut out = vec![0i16; 160 * 2 * 5];
        backend.decode_into(&mut out).unwrap();
        assert_eq!(backend.position(), Some((0, 5)));
        backend.stop();
        assert_eq!(backend.position(), Some((0, 0)));
    }

    #[test]
    fn mono_reports_one_channel() {
        let backend = ready(false);
        assert_eq!(backend.output_channels(), 1);
        assert_eq!(ready(true).output_channels(), 2);
    }

    #[test]
    fn volume_is_capped_to_engine_range() {
        let mut backend = ready(true);
        backend.set_volume(255);
        assert_eq!(backend.volume, MAX_VOLUME);
        assert_eq!(backend.max_volume(), 128);
    }
}
