//! Module loaders for the MOD family.
//!
//! Loaders are tried in registration order; the first whose `test` accepts
//! the data parses it. Both loaders share the same body parser and differ
//! only in header layout.

use crate::error::{LoadError, ReadError};
use crate::reader::{StreamReader, Whence};
use crate::tracker::module::{Module, Note, Pattern, ROWS_PER_PATTERN, Sample};

const TITLE_LEN: usize = 20;
const SAMPLE_HEADER_LEN: usize = 30;
const ORDER_TABLE_LEN: usize = 128;
const CELL_LEN: usize = 4;

/// A format check plus parser.
pub trait ModuleLoader: Send + Sync {
    /// Format name used in logs.
    fn name(&self) -> &'static str;

    /// Cheap check whether `reader` holds this format. Leaves the cursor anywhere.
    fn test(&self, reader: &mut StreamReader) -> bool;

    /// Parse a module, refusing ones with more than `max_channels` channels.
    fn load(&self, reader: &mut StreamReader, max_channels: usize) -> Result<Module, LoadError>;
}

/// 31-instrument MOD with a format tag at offset 1080.
#[derive(Debug, Default)]
pub struct ProtrackerLoader;

/// Early 15-instrument Soundtracker layout, no format tag.
#[derive(Debug, Default)]
pub struct SoundtrackerLoader;

/// Every loader this engine knows, in the order they are tried.
pub fn all_loaders() -> Vec<Box<dyn ModuleLoader>> {
    vec![Box::new(ProtrackerLoader), Box::new(SoundtrackerLoader)]
}

struct Layout {
    instruments: usize,
    channels: usize,
    kind: String,
    /// Soundtracker stores loop starts in bytes rather than words.
    loop_start_in_bytes: bool,
}

impl Layout {
    fn header_len(&self) -> usize {
        let tag = if self.instruments == 31 { 4 } else { 0 };
        TITLE_LEN + self.instruments * SAMPLE_HEADER_LEN + 2 + ORDER_TABLE_LEN + tag
    }

    fn pattern_len(&self) -> usize {
        ROWS_PER_PATTERN * self.channels * CELL_LEN
    }
}

/// Channel count and format name for a 4-byte MOD tag.
pub fn tag_channels(tag: &[u8]) -> Option<(usize, &'static str)> {
    let tag: [u8; 4] = tag.try_into().ok()?;
    match &tag {
        b"M.K." | b"M!K!" | b"M&K!" | b"N.T." => Some((4, "Protracker")),
        b"FLT4" => Some((4, "Startrekker")),
        b"FLT8" => Some((8, "Startrekker")),
        b"CD81" | b"OKTA" => Some((8, "Oktalyzer")),
        [d, b'C', b'H', b'N'] if d.is_ascii_digit() && *d != b'0' => {
            Some(((d - b'0') as usize, "FastTracker"))
        }
        [d1, d2, b'C', b'H'] if d1.is_ascii_digit() && d2.is_ascii_digit() => {
            let n = ((d1 - b'0') * 10 + (d2 - b'0')) as usize;
            (n > 0).then_some((n, "FastTracker"))
        }
        _ => None,
    }
}

impl ModuleLoader for ProtrackerLoader {
    fn name(&self) -> &'static str {
        "Protracker"
    }

    fn test(&self, reader: &mut StreamReader) -> bool {
        let offset = TITLE_LEN + 31 * SAMPLE_HEADER_LEN + 2 + ORDER_TABLE_LEN;
        if reader.seek(offset as i64, Whence::Set).is_err() {
            return false;
        }
        reader
            .take_slice(4)
            .ok()
            .and_then(tag_channels)
            .is_some()
    }

    fn load(&self, reader: &mut StreamReader, max_channels: usize) -> Result<Module, LoadError> {
        let offset = TITLE_LEN + 31 * SAMPLE_HEADER_LEN + 2 + ORDER_TABLE_LEN;
        reader.seek(offset as i64, Whence::Set)?;
        let (channels, kind) = tag_channels(reader.take_slice(4)?).ok_or(LoadError::UnrecognizedFormat)?;
        let layout = Layout {
            instruments: 31,
            channels,
            kind: kind.to_string(),
            loop_start_in_bytes: false,
        };
        parse(reader, &layout, max_channels)
    }
}

impl ModuleLoader for SoundtrackerLoader {
    fn name(&self) -> &'static str {
        "Soundtracker"
    }

    fn test(&self, reader: &mut StreamReader) -> bool {
        let layout = soundtracker_layout();
        let data = reader.data().clone();
        if data.len() < layout.header_len() {
            return false;
        }
        if !data[..TITLE_LEN].iter().all(|&b| b == 0 || (0x20..0x7F).contains(&b)) {
            return false;
        }
        for i in 0..15 {
            let h = TITLE_LEN + i * SAMPLE_HEADER_LEN;
            let name = &data[h..h + 22];
            if !name.iter().all(|&b| b == 0 || (0x20..0x7F).contains(&b)) {
                return false;
            }
            if data[h + 24] & 0xF0 != 0 || data[h + 25] > 64 {
                return false;
            }
        }
        let song = TITLE_LEN + 15 * SAMPLE_HEADER_LEN;
        let song_len = data[song] as usize;
        if song_len == 0 || song_len > ORDER_TABLE_LEN {
            return false;
        }
        let orders = &data[song + 2..song + 2 + ORDER_TABLE_LEN];
        if orders.iter().any(|&o| o >= 64) {
            return false;
        }
        let patterns = orders.iter().copied().max().unwrap_or(0) as usize + 1;
        data.len() >= layout.header_len() + patterns * layout.pattern_len()
    }

    fn load(&self, reader: &mut StreamReader, max_channels: usize) -> Result<Module, LoadError> {
        parse(reader, &soundtracker_layout(), max_channels)
    }
}

fn soundtracker_layout() -> Layout {
    Layout {
        instruments: 15,
        channels: 4,
        kind: "Soundtracker".to_string(),
        loop_start_in_bytes: true,
    }
}

fn parse(reader: &mut StreamReader, layout: &Layout, max_channels: usize) -> Result<Module, LoadError> {
    if layout.channels > max_channels {
        return Err(LoadError::TooManyChannels {
            channels: layout.channels,
            max: max_channels,
        });
    }
    reader.seek(0, Whence::Set)?;
    let title = latin1_trimmed(reader.take_slice(TITLE_LEN)?);

    let mut samples = Vec::with_capacity(layout.instruments);
    let mut lengths = Vec::with_capacity(layout.instruments);
    for _ in 0..layout.instruments {
        let name = latin1_trimmed(reader.take_slice(22)?);
        let length = reader.read_u16_be()? as usize * 2;
        let finetune = reader.get_byte().ok_or(ReadError::ShortRead { wanted: 1, got: 0 })?;
        let volume = reader.get_byte().ok_or(ReadError::ShortRead { wanted: 1, got: 0 })?;
        let loop_start = reader.read_u16_be()? as usize;
        let loop_len = reader.read_u16_be()? as usize * 2;
        let loop_start = if layout.loop_start_in_bytes {
            loop_start
        } else {
            loop_start * 2
        };
        lengths.push(length);
        samples.push(Sample {
            name,
            range: 0..0,
            finetune: signed_nibble(finetune),
            volume: volume.min(64),
            loop_start,
            loop_len,
        });
    }

    let song_len = reader.get_byte().ok_or(ReadError::ShortRead { wanted: 1, got: 0 })? as usize;
    let restart = reader.get_byte().ok_or(ReadError::ShortRead { wanted: 1, got: 0 })? as usize;
    if song_len == 0 || song_len > ORDER_TABLE_LEN {
        return Err(LoadError::Malformed(format!("song length {song_len}")));
    }
    let table = reader.take_slice(ORDER_TABLE_LEN)?.to_vec();
    let pattern_count = table.iter().copied().max().unwrap_or(0) as usize + 1;
    let orders = table[..song_len].to_vec();
    let restart = if restart < song_len { restart } else { 0 };

    reader.seek(layout.header_len() as i64, Whence::Set)?;
    let mut patterns = Vec::with_capacity(pattern_count);
    for _ in 0..pattern_count {
        let bytes = reader.take_slice(layout.pattern_len())?;
        let notes = bytes
            .chunks_exact(CELL_LEN)
            .map(|c| Note::decode([c[0], c[1], c[2], c[3]]))
            .collect();
        patterns.push(Pattern::new(layout.channels, notes));
    }

    // Sample PCM follows the patterns back to back. Truncated data is tolerated.
    for (sample, length) in samples.iter_mut().zip(lengths) {
        let start = reader.tell() as usize;
        let available = reader.len() as usize - start;
        let length = length.min(available);
        reader.seek(length as i64, Whence::Current)?;
        sample.range = start..start + length;
        if sample.loop_start >= length {
            sample.loop_len = 0;
        } else if sample.loop_end() > length {
            sample.loop_len = length - sample.loop_start;
        }
    }

    Ok(Module {
        title,
        kind: layout.kind.clone(),
        channels: layout.channels,
        samples,
        orders,
        restart,
        patterns,
        data: reader.data().clone(),
    })
}

fn signed_nibble(b: u8) -> i8 {
    let n = (b & 0x0F) as i8;
    if n > 7 { n - 16 } else { n }
}

fn latin1_trimmed(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    bytes[..end]
        .iter()
        .map(|&b| char::from(b))
        .collect::<String>()
        .trim_end()
        .to_string()
}
