//! Playback controller.
//!
//! [`Engine`] owns everything one music engine instance needs: the output,
//! the bound codec backend, and the streaming core. Controls follow a
//! fire-and-forget style: invalid frequencies are ignored and volumes are
//! clamped, only init and load report errors.
//!
//! State machine:
//!
//! ```text
//! Stopped --start--> Playing --pause--> Paused --pause--> Playing
//!    ^                  |                  |
//!    +------stop--------+-------stop-------+
//! ```

use std::sync::Arc;

use modstream_types::{BackendKind, EngineStatus, PlaybackState};

use crate::backend::CodecBackend;
use crate::buffer::BalanceGains;
use crate::config::{EngineConfig, SUPPORTED_RATES};
use crate::error::{InitError, LoadError};
use crate::output::AudioOutput;
use crate::registry::{self, SharedBackend};
use crate::stream::Streamer;
use crate::telemetry::VoiceTelemetry;

pub struct Engine {
    config: EngineConfig,
    output: Arc<dyn AudioOutput>,
    backend: SharedBackend,
    kind: BackendKind,
    streamer: Streamer,
    state: PlaybackState,
    frequency: u32,
    volume: (u8, u8),
}

impl Engine {
    /// Bring up `output` and the backend named by `config.backend`.
    pub fn init(config: EngineConfig, output: Arc<dyn AudioOutput>) -> Result<Self, InitError> {
        let backend = registry::create_backend(config.backend, &config);
        Self::with_backend(config, output, backend)
    }

    /// Like [`Engine::init`] with a caller-supplied backend.
    pub fn with_backend(
        config: EngineConfig,
        output: Arc<dyn AudioOutput>,
        mut backend: Box<dyn CodecBackend>,
    ) -> Result<Self, InitError> {
        config.validate()?;
        output.init()?;
        output.set_sample_rate(config.frequency);
        backend.init(config.stereo)?;
        backend.set_frequency(config.backend_rate(config.frequency));

        let kind = backend.kind();
        let backend = registry::share(backend);
        let streamer = Streamer::new(&config, output.clone(), backend.clone());
        let mut engine = Self {
            frequency: config.frequency,
            volume: config.volume,
            config,
            output,
            backend,
            kind,
            streamer,
            state: PlaybackState::Stopped,
        };
        let (left, right) = engine.volume;
        engine.set_volume(i16::from(left), i16::from(right));
        tracing::info!(
            backend = kind.label(),
            rate_hz = engine.frequency,
            stereo = engine.config.stereo,
            period_bytes = engine.config.period_bytes,
            mode = ?engine.config.streaming,
            "engine initialized"
        );
        Ok(engine)
    }

    /// Unload the track and shut the backend down.
    pub fn end(mut self) {
        self.stop();
        let mut backend = self.backend.lock();
        backend.unload();
        backend.end();
        tracing::info!("engine shut down");
    }

    /// Load a track from memory, replacing any loaded one.
    ///
    /// While streaming, the new track starts at once and keeps the current
    /// pause state. On error nothing is loaded and streaming (if any)
    /// continues with silence.
    pub fn set_track(&mut self, data: impl Into<Arc<[u8]>>) -> Result<(), LoadError> {
        let data = data.into();
        let bytes = data.len();
        let mut backend = self.backend.lock();
        backend.load(data)?;
        backend.set_paused(self.state == PlaybackState::Paused);
        if self.state.is_streaming() {
            backend.start();
        }
        tracing::info!(
            bytes,
            title = backend.song_title().unwrap_or_default(),
            kind = backend.mod_type().unwrap_or_default(),
            hot_swap = self.state.is_streaming(),
            "track loaded"
        );
        Ok(())
    }

    /// Stop playback and drop the loaded track.
    pub fn unload(&mut self) {
        self.stop();
        self.backend.lock().unload();
    }

    /// Begin streaming. No-op unless stopped.
    pub fn start(&mut self) {
        if self.state != PlaybackState::Stopped {
            return;
        }
        {
            let mut backend = self.backend.lock();
            backend.set_paused(false);
            backend.start();
        }
        if let Err(e) = self.streamer.start(false) {
            tracing::error!("failed to start streaming: {e}");
            self.backend.lock().stop();
            return;
        }
        self.state = PlaybackState::Playing;
    }

    /// Stop streaming and rewind the track. No-op when stopped.
    pub fn stop(&mut self) {
        if self.state == PlaybackState::Stopped {
            return;
        }
        self.streamer.stop();
        self.backend.lock().stop();
        self.state = PlaybackState::Stopped;
    }

    /// Toggle between playing and paused. No-op when stopped.
    pub fn pause(&mut self) {
        let paused = match self.state {
            PlaybackState::Stopped => return,
            PlaybackState::Playing => true,
            PlaybackState::Paused => false,
        };
        self.streamer.set_paused(paused);
        self.backend.lock().set_paused(paused);
        self.state = if paused {
            PlaybackState::Paused
        } else {
            PlaybackState::Playing
        };
        tracing::debug!(paused, "pause toggled");
    }

    /// Change the output rate; only 32000 and 48000 are accepted.
    pub fn set_frequency(&mut self, hz: u32) {
        if !SUPPORTED_RATES.contains(&hz) {
            tracing::debug!(rate_hz = hz, "ignoring unsupported frequency");
            return;
        }
        self.frequency = hz;
        // the output may wait on its callback, which can need the backend lock
        self.output.set_sample_rate(hz);
        self.backend
            .lock()
            .set_frequency(self.config.backend_rate(hz));
    }

    /// Set left/right volume, each clamped to 0..=255.
    ///
    /// The louder side drives the backend volume; the ratio becomes the
    /// per-side output gain.
    pub fn set_volume(&mut self, left: i16, right: i16) {
        let l = left.clamp(0, 255) as u16;
        let r = right.clamp(0, 255) as u16;
        if (l, r) != (left as u16, right as u16) {
            tracing::debug!(left, right, "volume clamped to {l}/{r}");
        }
        self.volume = (l as u8, r as u8);

        let max = l.max(r);
        {
            let mut backend = self.backend.lock();
            let scaled = u32::from(max) * u32::from(backend.max_volume()) / 255;
            backend.set_volume(scaled as u8);
        }
        let (gl, gr) = if max == 0 {
            (BalanceGains::UNITY, BalanceGains::UNITY)
        } else {
            (l * BalanceGains::UNITY / max, r * BalanceGains::UNITY / max)
        };
        self.streamer.set_gains(gl, gr);
    }

    pub fn song_title(&self) -> Option<String> {
        self.backend.lock().song_title().map(str::to_owned)
    }

    pub fn mod_type(&self) -> Option<String> {
        self.backend.lock().mod_type().map(str::to_owned)
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn voice_frequency(&self, voice: u8) -> u32 {
        self.backend.lock().voice_frequency(voice)
    }

    pub fn voice_volume(&self, voice: u8) -> u32 {
        self.backend.lock().voice_volume(voice)
    }

    pub fn real_voice_volume(&self, voice: u8) -> u32 {
        self.backend.lock().real_voice_volume(voice)
    }

    /// Handle for polling voices from another thread.
    pub fn telemetry(&self) -> VoiceTelemetry {
        VoiceTelemetry::new(self.backend.clone())
    }

    pub fn status(&self) -> EngineStatus {
        let counters = self.streamer.counters();
        let backend = self.backend.lock();
        EngineStatus {
            state: self.state,
            backend: self.kind,
            loaded: backend.is_loaded(),
            title: backend.song_title().map(str::to_owned),
            mod_type: backend.mod_type().map(str::to_owned),
            sample_rate: self.frequency,
            volume: self.volume,
            live_buffer: self.streamer.live_buffer(),
            periods: counters.periods,
            underruns: counters.underruns,
            decode_failures: counters.decode_failures,
            duration_ms: backend.duration_ms(),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}
