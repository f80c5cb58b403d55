//! Hardware-visible PCM buffers and staging expansion.
//!
//! A [`PcmBuffer`] is moved between the software side and the output: while
//! the output holds it, nothing else can touch it. Buffers are built from
//! 32-byte aligned lines so they satisfy the DMA alignment rule without
//! any unsafe code.

use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::{Pod, Zeroable};
use serde::Deserialize;

use crate::config::BUFFER_ALIGN;

const SAMPLES_PER_LINE: usize = BUFFER_ALIGN / 2;

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C, align(32))]
struct Line([i16; SAMPLES_PER_LINE]);

/// One of the two DMA buffers: interleaved stereo `i16`, 32-byte aligned.
pub struct PcmBuffer {
    index: u8,
    lines: Box<[Line]>,
}

impl PcmBuffer {
    /// Allocate a zeroed buffer of `bytes` bytes (rounded up to the alignment).
    pub fn new(index: u8, bytes: usize) -> Self {
        let lines = bytes.div_ceil(BUFFER_ALIGN);
        Self {
            index,
            lines: vec![Line::zeroed(); lines].into_boxed_slice(),
        }
    }

    /// Which half of the pair this is (0 or 1).
    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn samples(&self) -> &[i16] {
        bytemuck::cast_slice(&self.lines[..])
    }

    pub fn samples_mut(&mut self) -> &mut [i16] {
        bytemuck::cast_slice_mut(&mut self.lines[..])
    }

    /// Raw bytes as the DMA engine sees them.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.lines[..])
    }

    /// Stereo frames held by this buffer.
    pub fn frames(&self) -> usize {
        self.lines.len() * SAMPLES_PER_LINE / 2
    }

    pub fn zero(&mut self) {
        self.lines.fill(Line::zeroed());
    }

    pub fn is_silent(&self) -> bool {
        self.samples().iter().all(|&s| s == 0)
    }
}

impl std::fmt::Debug for PcmBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmBuffer")
            .field("index", &self.index)
            .field("frames", &self.frames())
            .finish()
    }
}

/// How staged backend frames map onto output frames.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpandMode {
    /// One staged frame per output frame.
    #[default]
    Copy,
    /// Every staged frame is written twice (backend runs at half the output rate).
    DuplicateFrames,
}

impl ExpandMode {
    /// Output frames produced per staged frame.
    pub fn frame_repeat(self) -> usize {
        match self {
            ExpandMode::Copy => 1,
            ExpandMode::DuplicateFrames => 2,
        }
    }
}

/// Left/right output gains in Q8 (256 = unity), readable from any thread.
#[derive(Debug)]
pub struct BalanceGains(AtomicU32);

impl BalanceGains {
    pub const UNITY: u16 = 256;

    pub fn new() -> Self {
        Self(AtomicU32::new(pack(Self::UNITY, Self::UNITY)))
    }

    pub fn set(&self, left: u16, right: u16) {
        self.0.store(pack(left, right), Ordering::Relaxed);
    }

    pub fn get(&self) -> (u16, u16) {
        let v = self.0.load(Ordering::Relaxed);
        ((v >> 16) as u16, v as u16)
    }
}

impl Default for BalanceGains {
    fn default() -> Self {
        Self::new()
    }
}

fn pack(left: u16, right: u16) -> u32 {
    (u32::from(left) << 16) | u32::from(right)
}

/// Expand interleaved `staging` (1 or 2 channels) into stereo `out`.
///
/// Mono staging is spread to both sides. Output frames beyond what the
/// staging data covers are left untouched (the caller zeroes `out` first).
pub fn expand(
    staging: &[i16],
    src_channels: usize,
    mode: ExpandMode,
    gains: (u16, u16),
    out: &mut [i16],
) {
    let src_channels = src_channels.clamp(1, 2);
    let repeat = mode.frame_repeat();
    let src_frames = staging.len() / src_channels;
    let unity = (BalanceGains::UNITY, BalanceGains::UNITY);

    for (i, frame) in out.chunks_exact_mut(2).enumerate() {
        let src = i / repeat;
        if src >= src_frames {
            break;
        }
        let base = src * src_channels;
        let l = staging[base];
        let r = staging[base + src_channels - 1];
        if gains == unity {
            frame[0] = l;
            frame[1] = r;
        } else {
            frame[0] = apply_gain(l, gains.0);
            frame[1] = apply_gain(r, gains.1);
        }
    }
}

fn apply_gain(sample: i16, gain_q8: u16) -> i16 {
    let v = (i32::from(sample) * i32::from(gain_q8)) >> 8;
    v.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}
