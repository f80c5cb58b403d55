//! Background music engine streaming tracker modules and MP3 into a
//! double-buffered DMA-style audio output.
//!
//! The usual flow:
//! 1. build an [`AudioOutput`] ([`CpalOutput`] or [`ClockOutput`]),
//! 2. [`Engine::init`] it with an [`EngineConfig`],
//! 3. [`Engine::set_track`] from memory and [`Engine::start`].

pub mod backend;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod reader;
pub mod registry;
pub mod resample;
pub mod status;
pub mod stream;
pub mod telemetry;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{CodecBackend, Mp3Backend, TrackerBackend};
pub use config::{EngineConfig, StreamingMode};
pub use engine::Engine;
pub use error::{DecodeError, InitError, LoadError, ReadError};
pub use output::{AudioOutput, ClockOutput, CpalOutput};
pub use registry::sniff_kind;
pub use telemetry::VoiceTelemetry;

pub use modstream_types::{BackendKind, EngineStatus, PlaybackState, VoiceReadout};
