//! Software mixer: resamples 8-bit voices into a 16-bit output.

use crate::error::InitError;

/// Lowest and highest mix rates the mixer accepts.
pub const MIN_RATE: u32 = 4_000;
pub const MAX_RATE: u32 = 96_000;

/// Settings the mixer is opened with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MixerSettings {
    pub rate: u32,
    pub stereo: bool,
    /// Upper bound on simultaneously mixed voices.
    pub max_voices: usize,
}

impl MixerSettings {
    pub fn validate(&self) -> Result<(), InitError> {
        if !(MIN_RATE..=MAX_RATE).contains(&self.rate) {
            return Err(InitError::EngineInitFailed(format!(
                "mix rate {} Hz outside {MIN_RATE}..={MAX_RATE}",
                self.rate
            )));
        }
        if self.max_voices == 0 {
            return Err(InitError::EngineInitFailed("no voices".into()));
        }
        Ok(())
    }

    pub fn channels(&self) -> usize {
        if self.stereo { 2 } else { 1 }
    }
}

/// Hard stereo placement of a voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pan {
    Left,
    Right,
}

impl Pan {
    /// Amiga channel layout: L R R L, repeating.
    pub fn for_channel(channel: usize) -> Self {
        match channel % 4 {
            0 | 3 => Pan::Left,
            _ => Pan::Right,
        }
    }
}

/// Playback cursor for one channel's sample.
#[derive(Clone, Debug)]
pub struct Voice {
    pub active: bool,
    /// Position in sample bytes, fractional.
    pub pos: f64,
    /// Source bytes advanced per output frame.
    pub step: f64,
    /// 0..=64.
    pub volume: u8,
    pub pan: Pan,
    /// Loudest scaled sample produced in the last mix call, 0..=65535.
    pub peak: u32,
}

impl Voice {
    pub fn new(pan: Pan) -> Self {
        Self {
            active: false,
            pos: 0.0,
            step: 0.0,
            volume: 0,
            pan,
            peak: 0,
        }
    }

    pub fn trigger(&mut self, offset: usize) {
        self.active = true;
        self.pos = offset as f64;
    }

    /// Mix `frames` frames of `pcm` into the interleaved accumulator.
    ///
    /// `loop_range` is `Some((start, end))` for looping samples.
    pub fn mix(
        &mut self,
        pcm: &[u8],
        loop_range: Option<(usize, usize)>,
        gain: i32,
        acc: &mut [i32],
        channels: usize,
    ) {
        if !self.active || pcm.is_empty() {
            return;
        }
        let end = loop_range.map_or(pcm.len(), |(_, e)| e.min(pcm.len()));
        let vol = i32::from(self.volume);
        let side = match (channels, self.pan) {
            (1, _) | (_, Pan::Left) => 0,
            _ => 1,
        };

        for frame in acc.chunks_exact_mut(channels) {
            let mut idx = self.pos as usize;
            if idx >= end {
                match loop_range {
                    Some((start, loop_end)) if loop_end > start => {
                        let len = (loop_end - start) as f64;
                        while self.pos as usize >= end {
                            self.pos -= len;
                        }
                        idx = self.pos as usize;
                    }
                    _ => {
                        self.active = false;
                        return;
                    }
                }
            }
            let s = i32::from(pcm[idx] as i8);
            let level = (s * vol).unsigned_abs() * 8;
            self.peak = self.peak.max(level.min(65_535));
            // s * 64 * 128 spans 2^20; shift down to leave headroom for four voices.
            frame[side] += (s * vol * gain) >> 6;
            self.pos += self.step;
        }
    }
}

/// Clamp an accumulator into 16-bit output, dividing wide mixes down.
pub fn clip_into(acc: &[i32], voices: usize, out: &mut [i16]) {
    let div = (voices / 4).max(1) as i32;
    for (o, &a) in out.iter_mut().zip(acc) {
        *o = (a / div).clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_reject_out_of_range_rates() {
        let ok = MixerSettings {
            rate: 48_000,
            stereo: true,
            max_voices: 128,
        };
        assert!(ok.validate().is_ok());
        let low = MixerSettings { rate: 1_000, ..ok };
        assert!(matches!(low.validate(), Err(InitError::EngineInitFailed(_))));
        let none = MixerSettings { max_voices: 0, ..ok };
        assert!(none.validate().is_err());
    }

    #[test]
    fn amiga_panning_is_lrrl() {
        let pans: Vec<Pan> = (0..8).map(Pan::for_channel).collect();
        assert_eq!(
            pans,
            [
                Pan::Left,
                Pan::Right,
                Pan::Right,
                Pan::Left,
                Pan::Left,
                Pan::Right,
                Pan::Right,
                Pan::Left
            ]
        );
    }

    #[test]
    fn one_shot_voice_stops_at_end() {
        let pcm = [64u8; 4];
        let mut voice = Voice::new(Pan::Left);
        voice.volume = 64;
        voice.step = 1.0;
        voice.trigger(0);
        let mut acc = vec![0i32; 16];
        voice.mix(&pcm, None, 128, &mut acc, 2);
        assert!(!voice.active);
        assert!(acc[0] > 0);
        assert_eq!(acc[1], 0);
        assert_eq!(acc[8], 0);
    }

    #[test]
    fn looping_voice_keeps_playing() {
        let pcm = [10u8, 20, 30, 40];
        let mut voice = Voice::new(Pan::Right);
        voice.volume = 64;
        voice.step = 1.0;
        voice.trigger(0);
        let mut acc = vec![0i32; 20];
        voice.mix(&pcm, Some((2, 4)), 128, &mut acc, 2);
        assert!(voice.active);
        assert!(acc.chunks(2).all(|f| f[1] != 0));
        assert!(voice.peak > 0);
    }

    #[test]
    fn clip_saturates() {
        let mut out = [0i16; 2];
        clip_into(&[100_000, -100_000], 4, &mut out);
        assert_eq!(out, [i16::MAX, i16::MIN]);
    }
}
