//! Backend selection.
//!
//! Exactly one backend is bound per engine; it is picked from
//! [`BackendKind`] at init time, or supplied directly by the caller.

use std::sync::Arc;

use parking_lot::Mutex;

use modstream_types::BackendKind;

use crate::backend::{CodecBackend, Mp3Backend, TrackerBackend};
use crate::config::EngineConfig;
use crate::reader::StreamReader;
use crate::tracker::loader::{ModuleLoader, SoundtrackerLoader, tag_channels};

/// Backend shared between the controller and the decode context.
pub type SharedBackend = Arc<Mutex<Box<dyn CodecBackend>>>;

/// Build the backend `kind` names.
pub fn create_backend(kind: BackendKind, config: &EngineConfig) -> Box<dyn CodecBackend> {
    match kind {
        BackendKind::Tracker => Box::new(TrackerBackend::new(config.max_voices)),
        BackendKind::Mp3 => Box::new(Mp3Backend::new()),
    }
}

pub fn share(backend: Box<dyn CodecBackend>) -> SharedBackend {
    Arc::new(Mutex::new(backend))
}

/// Guess which backend can play `data` from its leading/tag bytes.
pub fn sniff_kind(data: &[u8]) -> Option<BackendKind> {
    if data.get(1080..1084).and_then(tag_channels).is_some() {
        return Some(BackendKind::Tracker);
    }
    if data.starts_with(b"ID3") || is_mpeg_sync(data) {
        return Some(BackendKind::Mp3);
    }
    let mut reader = StreamReader::new(Arc::from(data));
    if SoundtrackerLoader.test(&mut reader) {
        return Some(BackendKind::Tracker);
    }
    None
}

fn is_mpeg_sync(data: &[u8]) -> bool {
    matches!(data, [0xFF, b1, ..] if b1 & 0xE0 == 0xE0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ModFixture;

    #[test]
    fn creates_requested_backend() {
        let cfg = EngineConfig::default();
        assert_eq!(
            create_backend(BackendKind::Tracker, &cfg).kind(),
            BackendKind::Tracker
        );
        assert_eq!(create_backend(BackendKind::Mp3, &cfg).kind(), BackendKind::Mp3);
    }

    #[test]
    fn sniffs_formats() {
        assert_eq!(
            sniff_kind(&ModFixture::new().build()),
            Some(BackendKind::Tracker)
        );
        assert_eq!(
            sniff_kind(&ModFixture::new().build_15()),
            Some(BackendKind::Tracker)
        );
        assert_eq!(sniff_kind(b"ID3\x04\x00rest"), Some(BackendKind::Mp3));
        assert_eq!(sniff_kind(&[0xFF, 0xFB, 0x90, 0x00]), Some(BackendKind::Mp3));
        assert_eq!(sniff_kind(b"RIFF....WAVE"), None);
        assert_eq!(sniff_kind(&[]), None);
    }
}
