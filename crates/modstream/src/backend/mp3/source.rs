//! MPEG frame source.
//!
//! Uses Symphonia to:
//! - probe the in-memory stream (ID3v2 tags are collected by the probe)
//! - decode one packet at a time into interleaved `f32`
//! - classify decoder outcomes so the backend can pad, retry or fail

use std::io;
use std::sync::Arc;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{
    CODEC_TYPE_MP1, CODEC_TYPE_MP2, CODEC_TYPE_MP3, CodecParameters, Decoder, DecoderOptions,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::backend::mp3::metadata;
use crate::error::{DecodeError, LoadError};
use crate::reader::StreamReader;

/// Bytes handed to the demuxer per read.
pub const READ_CHUNK: usize = 1024;

/// Native format of the decoded stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamSpec {
    pub rate: u32,
    pub channels: usize,
}

/// Everything learned while opening a stream.
#[derive(Clone, Debug)]
pub struct SourceInfo {
    pub spec: StreamSpec,
    /// MPEG layer (1..=3) when the codec identifies it.
    pub layer: Option<u8>,
    pub title: Option<String>,
    pub duration_ms: Option<u64>,
}

/// Outcome of one [`FrameSource::next_frame`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was decoded into the output vector.
    Frame,
    /// The input is exhausted.
    NeedMore,
    /// A corrupt frame was skipped; trying again may succeed.
    Recoverable(String),
    /// The decoder cannot continue.
    Failed(String),
}

/// Pull-based compressed-audio decoder.
pub trait FrameSource: Send {
    fn spec(&self) -> StreamSpec;

    /// Decode the next frame into `out` (cleared first), interleaved at `spec().channels`.
    fn next_frame(&mut self, out: &mut Vec<f32>) -> FrameStatus;

    /// Restart from the first byte of the input.
    fn rewind(&mut self) -> Result<(), DecodeError>;
}

pub struct SymphoniaSource {
    data: Arc<[u8]>,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    spec: StreamSpec,
}

impl SymphoniaSource {
    /// Identify `data` and set up a decoder for its default track.
    pub fn open(data: Arc<[u8]>) -> Result<(Self, SourceInfo), LoadError> {
        let reader = StreamReader::new(data.clone()).with_read_chunk(READ_CHUNK);
        let mss = MediaSourceStream::new(Box::new(reader), Default::default());
        let mut hint = Hint::new();
        hint.with_extension("mp3");

        let mut probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                tracing::debug!("mpeg probe failed: {e}");
                LoadError::UnrecognizedFormat
            })?;

        let mut title = probed
            .metadata
            .get()
            .as_ref()
            .and_then(|m| m.current())
            .and_then(metadata::revision_title);
        let mut format = probed.format;
        if title.is_none() {
            title = format.metadata().current().and_then(metadata::revision_title);
        }

        let track = format
            .default_track()
            .ok_or(LoadError::UnrecognizedFormat)?;
        let codec_params: CodecParameters = track.codec_params.clone();
        let track_id = track.id;

        let rate = codec_params
            .sample_rate
            .ok_or(LoadError::UnrecognizedFormat)?;
        let channels = codec_params
            .channels
            .ok_or(LoadError::UnrecognizedFormat)?
            .count();
        let layer = match codec_params.codec {
            CODEC_TYPE_MP1 => Some(1),
            CODEC_TYPE_MP2 => Some(2),
            CODEC_TYPE_MP3 => Some(3),
            _ => None,
        };

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| {
                tracing::debug!("no decoder for stream: {e}");
                LoadError::UnrecognizedFormat
            })?;

        let spec = StreamSpec { rate, channels };
        let info = SourceInfo {
            spec,
            layer,
            title,
            duration_ms: duration_ms_from_codec_params(&codec_params),
        };
        Ok((
            Self {
                data,
                format,
                decoder,
                track_id,
                spec,
            },
            info,
        ))
    }
}

impl FrameSource for SymphoniaSource {
    fn spec(&self) -> StreamSpec {
        self.spec
    }

    fn next_frame(&mut self, out: &mut Vec<f32>) -> FrameStatus {
        out.clear();
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return FrameStatus::NeedMore;
                }
                Err(SymphoniaError::DecodeError(e)) => return FrameStatus::Recoverable(e.to_string()),
                Err(e) => return FrameStatus::Failed(e.to_string()),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            return match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    self.spec.channels = spec.channels.count();
                    let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
                    sample_buf.copy_interleaved_ref(decoded);
                    out.extend_from_slice(sample_buf.samples());
                    FrameStatus::Frame
                }
                Err(SymphoniaError::DecodeError(e)) => FrameStatus::Recoverable(e.to_string()),
                Err(SymphoniaError::IoError(e)) => FrameStatus::Recoverable(e.to_string()),
                Err(e) => FrameStatus::Failed(e.to_string()),
            };
        }
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        let (fresh, _) =
            Self::open(self.data.clone()).map_err(|e| DecodeError::Codec(format!("rewind: {e}")))?;
        *self = fresh;
        Ok(())
    }
}

/// Best-effort duration in milliseconds from codec metadata.
///
/// Returns `None` if the stream does not provide total frames or sample rate.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}
