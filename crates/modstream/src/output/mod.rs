//! Audio output collaborator.
//!
//! Models a double-buffered DMA engine: one [`PcmBuffer`] at a time is bound
//! to the output by moving it in with [`AudioOutput::submit`], and the
//! completion callback fires once the bound buffer has been consumed. The
//! callback runs on the output's own thread and is expected to rebind a
//! buffer before returning.

use std::sync::Arc;

use crate::buffer::PcmBuffer;
use crate::error::InitError;

pub mod clock;
pub mod host;

pub use self::clock::ClockOutput;
pub use self::host::CpalOutput;

/// Invoked from the output context each time the bound buffer finishes playing.
pub type CompletionCallback = Arc<dyn Fn() + Send + Sync>;

/// DMA-style audio output.
///
/// Methods take `&self` because the completion callback calls back into the
/// output from another thread; implementations keep their own locking short
/// and never hold a lock while invoking the callback.
pub trait AudioOutput: Send + Sync {
    /// Bring the output up. Called once by the engine.
    fn init(&self) -> Result<(), InitError>;

    /// Program the hardware sample rate in Hz.
    fn set_sample_rate(&self, hz: u32);

    /// Install or remove the completion callback.
    fn register_completion(&self, callback: Option<CompletionCallback>);

    /// Bind `buffer` for the next transfer and hand back the one it replaces.
    fn submit(&self, buffer: PcmBuffer) -> Option<PcmBuffer>;

    /// Take back the bound buffer, leaving the output with nothing to play.
    fn reclaim(&self) -> Option<PcmBuffer>;

    fn start_dma(&self);

    fn stop_dma(&self);

    /// Make `buffer`'s contents visible to the DMA engine.
    fn flush(&self, _buffer: &PcmBuffer) {}
}
