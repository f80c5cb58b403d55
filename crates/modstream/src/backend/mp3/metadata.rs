//! Title and stream-type strings for MPEG tracks.

use symphonia::core::meta::{MetadataRevision, StandardTagKey};

const ID3V1_LEN: usize = 128;

/// Title from a trailing ID3v1 block (`TAG` + 30-byte latin-1 title).
pub fn id3v1_title(data: &[u8]) -> Option<String> {
    let tag = data.get(data.len().checked_sub(ID3V1_LEN)?..)?;
    if &tag[..3] != b"TAG" {
        return None;
    }
    let raw = &tag[3..33];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let title: String = raw[..end].iter().map(|&b| char::from(b)).collect();
    non_empty(title.trim())
}

/// Track title from a decoded tag revision (ID3v2 and friends).
pub fn revision_title(rev: &MetadataRevision) -> Option<String> {
    rev.tags()
        .iter()
        .find(|t| t.std_key == Some(StandardTagKey::TrackTitle))
        .and_then(|t| non_empty(t.value.to_string().trim()))
}

/// `"Layer III"` style label for an MPEG layer number.
pub fn layer_label(layer: u8) -> Option<&'static str> {
    match layer {
        1 => Some("Layer I"),
        2 => Some("Layer II"),
        3 => Some("Layer III"),
        _ => None,
    }
}

/// Stream description reported as the track type; `channels` is the
/// stream's own count, not the output's.
pub fn describe(layer: Option<u8>, rate: u32, channels: usize) -> String {
    match layer.and_then(layer_label) {
        Some(label) => format!("MPEG {label}: {rate} Hz, {channels} channels, encoding 0xd0"),
        None => format!("MPEG: {rate} Hz, {channels} channels, encoding 0xd0"),
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}
