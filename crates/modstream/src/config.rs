use serde::Deserialize;

use modstream_types::BackendKind;

use crate::buffer::ExpandMode;
use crate::error::InitError;

/// Output rates the engine accepts; anything else is ignored by `set_frequency`.
pub const SUPPORTED_RATES: [u32; 2] = [32_000, 48_000];

/// Byte alignment (and granularity) the output requires for its buffers.
pub const BUFFER_ALIGN: usize = 32;

/// How decode work is scheduled relative to the completion event.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    /// The completion event swaps buffers and signals a decode thread.
    #[default]
    Worker,
    /// Decode runs inside the completion event itself.
    ///
    /// Only safe when one decode cycle reliably fits inside one period.
    Inline,
}

/// Engine tuning shared by the controller, streaming core and backends.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Codec backend bound at init.
    pub backend: BackendKind,
    /// Ask the backend for stereo output (mono is spread to both sides).
    pub stereo: bool,
    /// Output sample rate in Hz (32000 or 48000).
    pub frequency: u32,
    /// Size of each hardware buffer in bytes (stereo `i16` frames).
    pub period_bytes: usize,
    /// Staging-to-output expansion.
    pub expand: ExpandMode,
    /// Where decode runs.
    pub streaming: StreamingMode,
    /// Polyphony cap for tracker modules.
    pub max_voices: usize,
    /// Initial left/right volume, 0..=255.
    pub volume: (u8, u8),
}

impl Default for EngineConfig {
    /// Defaults matching the console's 48 kHz DSP and 4 KiB DMA periods.
    fn default() -> Self {
        Self {
            backend: BackendKind::Tracker,
            stereo: true,
            frequency: 48_000,
            period_bytes: 4096,
            expand: ExpandMode::Copy,
            streaming: StreamingMode::Worker,
            max_voices: 128,
            volume: (255, 255),
        }
    }
}

impl EngineConfig {
    /// Reject configurations the streaming core cannot honor.
    pub fn validate(&self) -> Result<(), InitError> {
        if self.period_bytes == 0 || self.period_bytes % BUFFER_ALIGN != 0 {
            return Err(InitError::InvalidConfig(format!(
                "period_bytes must be a non-zero multiple of {BUFFER_ALIGN}, got {}",
                self.period_bytes
            )));
        }
        if !SUPPORTED_RATES.contains(&self.frequency) {
            return Err(InitError::InvalidConfig(format!(
                "unsupported frequency {} Hz",
                self.frequency
            )));
        }
        if self.max_voices == 0 {
            return Err(InitError::InvalidConfig("max_voices must be > 0".into()));
        }
        Ok(())
    }

    /// Stereo frames per hardware buffer.
    pub fn period_frames(&self) -> usize {
        self.period_bytes / 4
    }

    /// Frames the backend produces per period, before expansion.
    pub fn staging_frames(&self) -> usize {
        self.period_frames() / self.expand.frame_repeat()
    }

    /// Rate the backend should decode at so that expansion lands on `output_rate`.
    pub fn backend_rate(&self, output_rate: u32) -> u32 {
        output_rate / self.expand.frame_repeat() as u32
    }
}
