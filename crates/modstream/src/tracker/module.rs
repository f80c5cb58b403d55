//! Parsed module data: instruments, patterns and the order list.

use std::ops::Range;
use std::sync::Arc;

/// Rows in every pattern of the MOD family.
pub const ROWS_PER_PATTERN: usize = 64;

/// One instrument: 8-bit signed PCM borrowed from the track bytes.
#[derive(Clone, Debug, Default)]
pub struct Sample {
    pub name: String,
    /// Byte range of the PCM data inside [`Module::data`].
    pub range: Range<usize>,
    /// Finetune in eighths of a semitone (-8..=7).
    pub finetune: i8,
    /// Default volume, 0..=64.
    pub volume: u8,
    pub loop_start: usize,
    pub loop_len: usize,
}

impl Sample {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Loops shorter than two bytes are the format's "no loop" marker.
    pub fn has_loop(&self) -> bool {
        self.loop_len > 2
    }

    pub fn loop_end(&self) -> usize {
        self.loop_start + self.loop_len
    }
}

/// One pattern cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Note {
    /// 1-based instrument number, 0 for "keep current".
    pub sample: u8,
    /// Amiga period, 0 for "no new note".
    pub period: u16,
    pub effect: u8,
    pub param: u8,
}

impl Note {
    /// Unpack the 4-byte MOD cell layout.
    pub fn decode(b: [u8; 4]) -> Self {
        Self {
            sample: (b[0] & 0xF0) | (b[2] >> 4),
            period: (u16::from(b[0] & 0x0F) << 8) | u16::from(b[1]),
            effect: b[2] & 0x0F,
            param: b[3],
        }
    }
}

#[derive(Clone, Debug)]
pub struct Pattern {
    channels: usize,
    notes: Vec<Note>,
}

impl Pattern {
    pub fn new(channels: usize, notes: Vec<Note>) -> Self {
        Self { channels, notes }
    }

    pub fn note(&self, row: usize, channel: usize) -> Note {
        self.notes
            .get(row * self.channels + channel)
            .copied()
            .unwrap_or_default()
    }
}

/// A parsed module. Sample PCM stays in the shared track bytes.
#[derive(Clone, Debug)]
pub struct Module {
    pub title: String,
    /// Human-readable format name ("Protracker", "Soundtracker", ...).
    pub kind: String,
    pub channels: usize,
    pub samples: Vec<Sample>,
    pub orders: Vec<u8>,
    /// Order the song restarts from when it wraps.
    pub restart: usize,
    pub patterns: Vec<Pattern>,
    pub data: Arc<[u8]>,
}

impl Module {
    pub fn sample_data(&self, sample: &Sample) -> &[u8] {
        self.data.get(sample.range.clone()).unwrap_or(&[])
    }

    /// Pattern played at `order`, if the order exists.
    pub fn pattern_at(&self, order: usize) -> Option<&Pattern> {
        let idx = *self.orders.get(order)? as usize;
        self.patterns.get(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_splits_cell_fields() {
        let note = Note::decode([0x13, 0x58, 0xA4, 0x20]);
        assert_eq!(note.sample, 0x1A);
        assert_eq!(note.period, 0x358);
        assert_eq!(note.effect, 0x4);
        assert_eq!(note.param, 0x20);
    }

    #[test]
    fn short_loops_are_not_loops() {
        let mut sample = Sample {
            range: 0..100,
            loop_start: 10,
            loop_len: 2,
            ..Sample::default()
        };
        assert!(!sample.has_loop());
        sample.loop_len = 40;
        assert!(sample.has_loop());
        assert_eq!(sample.loop_end(), 50);
    }
}
