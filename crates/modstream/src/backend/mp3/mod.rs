//! MPEG audio backend.
//!
//! Decoding is frame based: each `decode_into` call drains leftover PCM,
//! then pulls frames until the request is satisfied. Running out of input
//! pads the request with silence and rewinds, so tracks loop forever.

use std::collections::VecDeque;
use std::sync::Arc;

use modstream_types::BackendKind;

use crate::backend::CodecBackend;
use crate::error::{DecodeError, InitError, LoadError};
use crate::resample::{DEFAULT_CHUNK_FRAMES, StreamResampler};

pub mod metadata;
pub mod source;

use self::source::{FrameSource, FrameStatus, SourceInfo, SymphoniaSource};

/// Consecutive skipped frames tolerated within one decode call.
const MAX_RECOVERABLE: usize = 64;
const MAX_VOLUME: u8 = 100;
const DEFAULT_FREQUENCY: u32 = 48_000;

struct Mp3Track {
    source: Box<dyn FrameSource>,
    resampler: Option<StreamResampler>,
    pending: VecDeque<f32>,
    frame: Vec<f32>,
    mapped: Vec<f32>,
    out_channels: usize,
    title: Option<String>,
    mod_type: String,
    duration_ms: Option<u64>,
}

impl Mp3Track {
    /// Copy buffered PCM into `out`, returning how many samples were written.
    fn drain(&mut self, out: &mut [i16], gain: f32) -> usize {
        let n = out.len().min(self.pending.len());
        for (o, s) in out.iter_mut().zip(self.pending.drain(..n)) {
            *o = to_i16(s * gain);
        }
        n
    }

    fn push_frame(&mut self) -> Result<(), DecodeError> {
        let src_channels = self.source.spec().channels.max(1);
        map_channels(&self.frame, src_channels, self.out_channels, &mut self.mapped);
        match &mut self.resampler {
            Some(rs) => rs.process(&self.mapped, &mut self.pending),
            None => {
                self.pending.extend(self.mapped.iter().copied());
                Ok(())
            }
        }
    }

    /// End of input: flush the resampler tail into `pending` and rewind.
    /// Unlike [`Self::restart`], buffered PCM is kept for the next call.
    fn wrap_around(&mut self) -> Result<(), DecodeError> {
        if let Some(rs) = &mut self.resampler {
            rs.flush(&mut self.pending)?;
            rs.reset()?;
        }
        self.source.rewind()
    }

    fn restart(&mut self) -> Result<(), DecodeError> {
        self.pending.clear();
        if let Some(rs) = &mut self.resampler {
            rs.reset()?;
        }
        self.source.rewind()
    }
}

pub struct Mp3Backend {
    initialized: bool,
    stereo: bool,
    frequency: u32,
    volume: u8,
    track: Option<Mp3Track>,
}

impl Mp3Backend {
    pub fn new() -> Self {
        Self {
            initialized: false,
            stereo: true,
            frequency: DEFAULT_FREQUENCY,
            volume: MAX_VOLUME,
            track: None,
        }
    }

    fn gain(&self) -> f32 {
        f32::from(self.volume) / f32::from(MAX_VOLUME)
    }

    /// Attach an opened source as the current track.
    pub(crate) fn install(
        &mut self,
        source: Box<dyn FrameSource>,
        info: SourceInfo,
    ) -> Result<(), LoadError> {
        let out_channels = if self.stereo { 2 } else { 1 };
        let resampler = if info.spec.rate != self.frequency {
            tracing::info!(
                from_hz = info.spec.rate,
                to_hz = self.frequency,
                "resampling mpeg stream"
            );
            Some(
                StreamResampler::new(
                    info.spec.rate,
                    self.frequency,
                    out_channels,
                    DEFAULT_CHUNK_FRAMES,
                )
                .map_err(|e| LoadError::Malformed(e.to_string()))?,
            )
        } else {
            None
        };
        let mod_type = metadata::describe(info.layer, info.spec.rate, info.spec.channels);
        tracing::info!(
            title = info.title.as_deref().unwrap_or(""),
            kind = %mod_type,
            duration_ms = ?info.duration_ms,
            "mpeg stream loaded"
        );
        self.track = Some(Mp3Track {
            source,
            resampler,
            pending: VecDeque::new(),
            frame: Vec::new(),
            mapped: Vec::new(),
            out_channels,
            title: info.title,
            mod_type,
            duration_ms: info.duration_ms,
        });
        Ok(())
    }

    fn rewind(&mut self) {
        if let Some(track) = &mut self.track {
            if let Err(e) = track.restart() {
                tracing::warn!("mpeg rewind failed: {e}");
            }
        }
    }
}

impl Default for Mp3Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecBackend for Mp3Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mp3
    }

    fn init(&mut self, stereo: bool) -> Result<(), InitError> {
        self.stereo = stereo;
        self.initialized = true;
        tracing::info!(stereo, "mpeg decoder ready");
        Ok(())
    }

    fn end(&mut self) {
        self.unload();
        self.initialized = false;
    }

    fn load(&mut self, data: Arc<[u8]>) -> Result<(), LoadError> {
        self.unload();
        if !self.initialized {
            return Err(LoadError::NotInitialized);
        }
        if data.is_empty() {
            return Err(LoadError::Empty);
        }
        let (source, mut info) = SymphoniaSource::open(data.clone())?;
        if info.title.is_none() {
            info.title = metadata::id3v1_title(&data);
        }
        self.install(Box::new(source), info)
    }

    fn unload(&mut self) {
        self.track = None;
    }

    fn is_loaded(&self) -> bool {
        self.track.is_some()
    }

    fn start(&mut self) {
        if self.track.is_none() {
            tracing::debug!("mpeg start with nothing loaded");
        }
    }

    fn stop(&mut self) {
        self.rewind();
    }

    /// Pausing is handled by the streaming core, which stops pulling PCM.
    fn set_paused(&mut self, _paused: bool) {}

    /// Takes effect on the next `load`.
    fn set_frequency(&mut self, hz: u32) {
        self.frequency = hz;
    }

    fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(MAX_VOLUME);
    }

    fn max_volume(&self) -> u8 {
        MAX_VOLUME
    }

    fn output_channels(&self) -> usize {
        if self.stereo { 2 } else { 1 }
    }

    fn decode_into(&mut self, out: &mut [i16]) -> Result<(), DecodeError> {
        out.fill(0);
        let gain = self.gain();
        let Some(track) = &mut self.track else {
            return Ok(());
        };

        let mut filled = 0;
        let mut skipped = 0;
        loop {
            filled += track.drain(&mut out[filled..], gain);
            if filled == out.len() {
                return Ok(());
            }
            match track.source.next_frame(&mut track.frame) {
                FrameStatus::Frame => {
                    skipped = 0;
                    track.push_frame()?;
                }
                FrameStatus::Recoverable(msg) => {
                    skipped += 1;
                    tracing::debug!(skipped, "skipping corrupt mpeg frame: {msg}");
                    if skipped >= MAX_RECOVERABLE {
                        return Err(DecodeError::Stalled(skipped));
                    }
                }
                FrameStatus::NeedMore => {
                    // The rest of `out` stays silent and playback loops.
                    track.wrap_around()?;
                    track.drain(&mut out[filled..], gain);
                    return Ok(());
                }
                FrameStatus::Failed(msg) => return Err(DecodeError::Codec(msg)),
            }
        }
    }

    fn song_title(&self) -> Option<&str> {
        self.track.as_ref()?.title.as_deref()
    }

    fn mod_type(&self) -> Option<&str> {
        self.track.as_ref().map(|t| t.mod_type.as_str())
    }

    fn duration_ms(&self) -> Option<u64> {
        self.track.as_ref()?.duration_ms
    }
}

/// Remap interleaved `input` from `src` to `dst` channels (1 or 2).
fn map_channels(input: &[f32], src: usize, dst: usize, out: &mut Vec<f32>) {
    out.clear();
    for frame in input.chunks_exact(src) {
        match (src, dst) {
            (1, 1) => out.push(frame[0]),
            (1, _) => out.extend([frame[0], frame[0]]),
            (_, 1) => out.push(0.5 * (frame[0] + frame[1])),
            _ => out.extend([frame[0], frame[1]]),
        }
    }
}

fn to_i16(s: f32) -> i16 {
    (s * 32767.0).round().clamp(-32768.0, 32767.0) as i16
}
