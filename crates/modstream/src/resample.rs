//! Synchronous sample-rate conversion for decoded streams.
//!
//! Wraps Rubato's sinc resampler behind a push interface: callers feed any
//! number of interleaved `f32` samples and receive whatever output full
//! input chunks produce. Leftover input waits for the next call, or for
//! [`StreamResampler::flush`] at the end of the stream.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::error::DecodeError;

/// Input frames per resampler call.
pub const DEFAULT_CHUNK_FRAMES: usize = 1024;

pub struct StreamResampler {
    inner: Box<dyn Resampler<f32>>,
    from_hz: u32,
    to_hz: u32,
    channels: usize,
    chunk_frames: usize,
    input: Vec<f32>,
    output: Vec<f32>,
}

impl StreamResampler {
    pub fn new(
        from_hz: u32,
        to_hz: u32,
        channels: usize,
        chunk_frames: usize,
    ) -> Result<Self, DecodeError> {
        let channels = channels.max(1);
        let chunk_frames = chunk_frames.max(1);
        let inner = build(from_hz, to_hz, channels, chunk_frames)?;
        let ratio = f64::from(to_hz) / f64::from(from_hz.max(1));
        let out_frames = (chunk_frames as f64 * ratio * 1.2).ceil() as usize + 64;
        Ok(Self {
            inner,
            from_hz,
            to_hz,
            channels,
            chunk_frames,
            input: Vec::with_capacity(chunk_frames * channels * 2),
            output: vec![0.0; out_frames * channels],
        })
    }

    pub fn rates(&self) -> (u32, u32) {
        (self.from_hz, self.to_hz)
    }

    /// Feed interleaved `input` and append converted samples to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut impl Extend<f32>) -> Result<(), DecodeError> {
        self.input.extend_from_slice(input);
        let chunk = self.chunk_frames * self.channels;
        let pending = std::mem::take(&mut self.input);
        let mut consumed = 0;
        while pending.len() - consumed >= chunk {
            let produced = self.run(&pending[consumed..consumed + chunk], None)?;
            out.extend(self.output[..produced].iter().copied());
            consumed += chunk;
        }
        self.input = pending;
        self.input.drain(..consumed);
        Ok(())
    }

    /// Convert buffered input shorter than a chunk and append it to `out`.
    pub fn flush(&mut self, out: &mut impl Extend<f32>) -> Result<(), DecodeError> {
        let frames = self.input.len() / self.channels;
        if frames == 0 {
            self.input.clear();
            return Ok(());
        }
        let mut tail = std::mem::take(&mut self.input);
        tail.resize(self.chunk_frames * self.channels, 0.0);
        let produced = self.run(&tail, Some(frames))?;
        out.extend(self.output[..produced].iter().copied());
        tail.clear();
        self.input = tail;
        Ok(())
    }

    /// Drop buffered input and filter state, e.g. after a seek.
    pub fn reset(&mut self) -> Result<(), DecodeError> {
        self.inner = build(self.from_hz, self.to_hz, self.channels, self.chunk_frames)?;
        self.input.clear();
        Ok(())
    }

    /// Resample one zero-padded chunk; `partial_len` marks how many frames are real.
    fn run(&mut self, chunk: &[f32], partial_len: Option<usize>) -> Result<usize, DecodeError> {
        let input_adapter = InterleavedSlice::new(chunk, self.channels, self.chunk_frames)
            .map_err(|e| DecodeError::Codec(format!("interleaved slice (input): {e}")))?;
        let out_capacity_frames = self.output.len() / self.channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.output, self.channels, out_capacity_frames)
                .map_err(|e| DecodeError::Codec(format!("interleaved slice (output): {e}")))?;
        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len,
        };
        let (_nbr_in, nbr_out) = self
            .inner
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| DecodeError::Codec(format!("resampler process: {e}")))?;
        Ok(nbr_out * self.channels)
    }
}

fn build(
    from_hz: u32,
    to_hz: u32,
    channels: usize,
    chunk_frames: usize,
) -> Result<Box<dyn Resampler<f32>>, DecodeError> {
    let f_ratio = f64::from(to_hz) / f64::from(from_hz.max(1));

    let sinc_len = 128;
    let oversampling_factor = 256;
    let interpolation = SincInterpolationType::Cubic;
    let window = WindowFunction::BlackmanHarris2;
    let f_cutoff = calculate_cutoff(sinc_len, window);

    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff,
        interpolation,
        oversampling_factor,
        window,
    };

    let resampler = Async::<f32>::new_sinc(
        f_ratio,
        1.1,
        &params,
        chunk_frames,
        channels,
        FixedAsync::Input,
    )
    .map_err(|e| DecodeError::Codec(format!("resampler init: {e}")))?;
    Ok(Box::new(resampler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_until_a_full_chunk() {
        let mut rs = StreamResampler::new(44_100, 48_000, 2, 256).unwrap();
        let mut out = Vec::new();
        rs.process(&vec![0.1; 100 * 2], &mut out).unwrap();
        assert!(out.is_empty());
        rs.process(&vec![0.1; 300 * 2], &mut out).unwrap();
        assert!(!out.is_empty());
        assert_eq!(out.len() % 2, 0);
    }

    #[test]
    fn output_length_tracks_ratio() {
        let mut rs = StreamResampler::new(24_000, 48_000, 1, 512).unwrap();
        let mut out = Vec::new();
        for _ in 0..20 {
            rs.process(&vec![0.0; 512], &mut out).unwrap();
        }
        let expected = 20 * 512 * 2;
        let diff = (out.len() as i64 - expected as i64).abs();
        assert!(diff < 1024, "got {} samples, expected ~{expected}", out.len());
    }

    #[test]
    fn flush_converts_a_partial_chunk() {
        let mut rs = StreamResampler::new(24_000, 48_000, 2, 256).unwrap();
        let mut out = Vec::new();
        rs.process(&vec![0.5; 100 * 2], &mut out).unwrap();
        assert!(out.is_empty());

        rs.flush(&mut out).unwrap();
        assert!(!out.is_empty());
        assert_eq!(out.len() % 2, 0);
        assert!(out.iter().any(|s| s.abs() > 0.1));

        // nothing left to flush
        let len = out.len();
        rs.flush(&mut out).unwrap();
        assert_eq!(out.len(), len);
    }

    #[test]
    fn reset_discards_pending_input() {
        let mut rs = StreamResampler::new(32_000, 48_000, 2, 128).unwrap();
        let mut out = Vec::new();
        rs.process(&vec![0.5; 100 * 2], &mut out).unwrap();
        rs.reset().unwrap();
        rs.process(&vec![0.5; 100 * 2], &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(rs.rates(), (32_000, 48_000));
    }
}
