use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use modstream::{EngineConfig, StreamingMode};

use crate::cli::Args;

/// Player settings file.
///
/// ```toml
/// device = "USB"
///
/// [engine]
/// frequency = 32000
/// period_bytes = 8192
/// streaming = "inline"
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub device: Option<String>,
    pub seconds: Option<u64>,
    pub engine: EngineConfig,
}

impl PlayerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<PlayerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Command-line flags win over the file.
    pub fn apply_args(&mut self, args: &Args) {
        if args.device.is_some() {
            self.device = args.device.clone();
        }
        if args.seconds.is_some() {
            self.seconds = args.seconds;
        }
        if args.mono {
            self.engine.stereo = false;
        }
        if let Some(hz) = args.frequency {
            self.engine.frequency = hz;
        }
        if args.inline {
            self.engine.streaming = StreamingMode::Inline;
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parses_partial_file() {
        let cfg: PlayerConfig = toml::from_str(
            r#"
            seconds = 10
            [engine]
            backend = "mp3"
            frequency = 32000
            expand = "duplicate_frames"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.seconds, Some(10));
        assert_eq!(cfg.engine.backend, modstream::BackendKind::Mp3);
        assert_eq!(cfg.engine.frequency, 32_000);
        assert_eq!(cfg.engine.period_bytes, 4096);
        assert!(cfg.engine.stereo);
    }

    #[test]
    fn flags_override_file() {
        let mut cfg = PlayerConfig::default();
        let args = Args::parse_from([
            "modstream",
            "song.mod",
            "--mono",
            "--inline",
            "--frequency",
            "32000",
            "--device",
            "dac",
        ]);
        cfg.apply_args(&args);
        assert!(!cfg.engine.stereo);
        assert_eq!(cfg.engine.streaming, StreamingMode::Inline);
        assert_eq!(cfg.engine.frequency, 32_000);
        assert_eq!(cfg.device.as_deref(), Some("dac"));
    }

    #[test]
    fn path_optional_only_when_listing() {
        assert!(Args::try_parse_from(["modstream"]).is_err());
        assert!(Args::try_parse_from(["modstream", "--list-devices"]).is_ok());
    }
}
