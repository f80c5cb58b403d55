//! Double-buffered streaming core.
//!
//! Two [`PcmBuffer`]s alternate between the output and software. On every
//! completion event the filled buffer is bound and the vacated one is sent
//! back to be refilled. Ownership moves with the buffer itself, so a buffer
//! the output is playing can never be written.
//!
//! ## Threading
//! - [`StreamingMode::Worker`]: the completion callback only swaps buffers and
//!   signals the `modstream-decode` thread, which decodes and expands.
//! - [`StreamingMode::Inline`]: decoding runs inside the completion callback.
//!
//! The backend is locked only for the duration of one decode, so a track
//! swap on the controller thread and a decode on the worker never overlap.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::buffer::{self, BalanceGains, ExpandMode, PcmBuffer};
use crate::config::{EngineConfig, StreamingMode};
use crate::output::{AudioOutput, CompletionCallback};
use crate::registry::SharedBackend;
use crate::status::{CounterSnapshot, StreamCounters};

/// Messages from the completion context to the decode worker.
enum WorkerSignal {
    /// Refill this vacated buffer and send it back.
    Refill(PcmBuffer),
    Shutdown,
}

#[derive(Default)]
struct InlineState {
    ready: Option<PcmBuffer>,
    staging: Vec<i16>,
}

struct Shared {
    output: Arc<dyn AudioOutput>,
    backend: SharedBackend,
    streaming: AtomicBool,
    paused: AtomicBool,
    live: AtomicU8,
    gains: BalanceGains,
    counters: StreamCounters,
    expand: ExpandMode,
    staging_frames: usize,
    inline: Mutex<InlineState>,
    /// Held by every completion callback for its whole body and by `stop`
    /// while it tears down, so no callback can rebind after `stop` returns.
    irq: Mutex<()>,
}

impl Shared {
    /// Zero `buf` and fill it with one period of decoded (or silent) audio.
    fn refill(&self, staging: &mut Vec<i16>, buf: &mut PcmBuffer) {
        buf.zero();
        let channels = {
            let mut backend = self.backend.lock();
            let channels = backend.output_channels().clamp(1, 2);
            staging.resize(self.staging_frames * channels, 0);
            if self.paused.load(Ordering::Acquire) {
                staging.fill(0);
            } else if let Err(e) = backend.decode_into(staging) {
                staging.fill(0);
                self.counters.record_decode_failure(&e);
            }
            channels
        };
        buffer::expand(
            staging,
            channels,
            self.expand,
            self.gains.get(),
            buf.samples_mut(),
        );
    }

    /// Bind `buf`, returning the buffer it displaced.
    fn bind(&self, buf: PcmBuffer) -> Option<PcmBuffer> {
        let index = buf.index();
        self.output.flush(&buf);
        let vacated = self.output.submit(buf);
        self.output.start_dma();
        self.live.store(index, Ordering::Release);
        vacated
    }

    /// Nothing filled in time: replay the bound buffer as silence.
    fn underrun(&self) {
        if let Some(mut buf) = self.output.reclaim() {
            buf.zero();
            self.output.flush(&buf);
            let _ = self.output.submit(buf);
        }
        self.output.start_dma();
        self.counters
            .record_underrun(self.live.load(Ordering::Relaxed));
    }

    fn on_complete_worker(&self, filled: &Receiver<PcmBuffer>, signal: &Sender<WorkerSignal>) {
        let _irq = self.irq.lock();
        if !self.streaming.load(Ordering::Acquire) {
            return;
        }
        self.output.stop_dma();
        match filled.try_recv() {
            Ok(buf) => {
                let vacated = self.bind(buf);
                self.counters.record_period();
                if let Some(vacated) = vacated {
                    if signal.try_send(WorkerSignal::Refill(vacated)).is_err() {
                        tracing::debug!("decode worker gone, dropping vacated buffer");
                    }
                }
            }
            Err(_) => self.underrun(),
        }
    }

    fn on_complete_inline(&self) {
        let _irq = self.irq.lock();
        let mut st = self.inline.lock();
        let InlineState { ready, staging } = &mut *st;
        if !self.streaming.load(Ordering::Acquire) {
            staging.fill(0);
            return;
        }
        self.output.stop_dma();
        match ready.take() {
            Some(buf) => {
                let vacated = self.bind(buf);
                self.counters.record_period();
                if let Some(mut vacated) = vacated {
                    self.refill(staging, &mut vacated);
                    *ready = Some(vacated);
                }
            }
            None => self.underrun(),
        }
    }
}

fn decode_worker(
    shared: Arc<Shared>,
    signals: Receiver<WorkerSignal>,
    filled: Sender<PcmBuffer>,
) {
    tracing::debug!("decode worker started");
    let mut staging = Vec::new();
    for signal in signals.iter() {
        let mut buf = match signal {
            WorkerSignal::Refill(buf) => buf,
            WorkerSignal::Shutdown => break,
        };
        if !shared.streaming.load(Ordering::Acquire) {
            break;
        }
        shared.refill(&mut staging, &mut buf);
        if filled.send(buf).is_err() {
            break;
        }
    }
    tracing::debug!("decode worker exiting");
}

struct WorkerHandle {
    signal: Sender<WorkerSignal>,
    thread: JoinHandle<()>,
}

/// Drives the output from a backend through two alternating buffers.
pub struct Streamer {
    shared: Arc<Shared>,
    mode: StreamingMode,
    period_bytes: usize,
    worker: Option<WorkerHandle>,
}

impl Streamer {
    pub fn new(config: &EngineConfig, output: Arc<dyn AudioOutput>, backend: SharedBackend) -> Self {
        Self {
            shared: Arc::new(Shared {
                output,
                backend,
                streaming: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                live: AtomicU8::new(0),
                gains: BalanceGains::new(),
                counters: StreamCounters::default(),
                expand: config.expand,
                staging_frames: config.staging_frames(),
                inline: Mutex::new(InlineState::default()),
                irq: Mutex::new(()),
            }),
            mode: config.streaming,
            period_bytes: config.period_bytes,
            worker: None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.streaming.load(Ordering::Acquire)
    }

    /// Index (0 or 1) of the buffer bound to the output.
    pub fn live_buffer(&self) -> u8 {
        self.shared.live.load(Ordering::Acquire)
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.shared.counters.snapshot()
    }

    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::Release);
    }

    /// Per-side expansion gains, Q8.
    pub fn set_gains(&self, left: u16, right: u16) {
        self.shared.gains.set(left, right);
    }

    /// Start streaming: buffer 0 goes out as silence, buffer 1 is primed.
    ///
    /// No-op while already streaming.
    pub fn start(&mut self, paused: bool) -> io::Result<()> {
        if self.is_streaming() {
            return Ok(());
        }
        let shared = &self.shared;
        let first = PcmBuffer::new(0, self.period_bytes);
        let second = PcmBuffer::new(1, self.period_bytes);
        shared.output.flush(&first);
        shared.output.flush(&second);
        let mut second = Some(second);
        shared.counters.reset();
        shared.live.store(0, Ordering::Release);
        shared.paused.store(paused, Ordering::Release);
        shared.streaming.store(true, Ordering::Release);

        let callback: CompletionCallback = match self.mode {
            StreamingMode::Worker => {
                let (signal_tx, signal_rx) = crossbeam_channel::bounded(2);
                let (filled_tx, filled_rx) = crossbeam_channel::bounded(2);
                let worker_shared = shared.clone();
                let thread = thread::Builder::new()
                    .name("modstream-decode".into())
                    .spawn(move || decode_worker(worker_shared, signal_rx, filled_tx));
                let thread = match thread {
                    Ok(t) => t,
                    Err(e) => {
                        shared.streaming.store(false, Ordering::Release);
                        return Err(e);
                    }
                };
                let cb_shared = shared.clone();
                let cb_signal = signal_tx.clone();
                self.worker = Some(WorkerHandle {
                    signal: signal_tx,
                    thread,
                });
                Arc::new(move || cb_shared.on_complete_worker(&filled_rx, &cb_signal))
            }
            StreamingMode::Inline => {
                let mut st = shared.inline.lock();
                let InlineState { ready, staging } = &mut *st;
                if let Some(buf) = second.as_mut() {
                    shared.refill(staging, buf);
                }
                *ready = second.take();
                let cb_shared = shared.clone();
                Arc::new(move || cb_shared.on_complete_inline())
            }
        };

        shared.output.register_completion(Some(callback));
        if let Some(stale) = shared.output.submit(first) {
            tracing::debug!(index = stale.index(), "dropping stale bound buffer");
        }
        shared.output.start_dma();

        if let (Some(worker), Some(buf)) = (&self.worker, second.take()) {
            if worker.signal.send(WorkerSignal::Refill(buf)).is_err() {
                tracing::warn!("decode worker exited before priming buffer 1");
            }
        }
        tracing::info!(
            mode = ?self.mode,
            period_bytes = self.period_bytes,
            "streaming started"
        );
        Ok(())
    }

    /// Stop streaming and take both buffers back. No-op when idle.
    pub fn stop(&mut self) {
        if !self.is_streaming() {
            return;
        }
        let shared = &self.shared;
        {
            // waits out a completion already past its streaming check
            let _irq = shared.irq.lock();
            shared.streaming.store(false, Ordering::Release);
            shared.output.stop_dma();
            shared.output.register_completion(None);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.signal.send(WorkerSignal::Shutdown);
            drop(worker.signal);
            if worker.thread.join().is_err() {
                tracing::error!("decode worker panicked");
            }
        }
        let _ = shared.output.reclaim();
        shared.inline.lock().ready = None;
        let c = shared.counters.snapshot();
        tracing::info!(
            periods = c.periods,
            underruns = c.underruns,
            decode_failures = c.decode_failures,
            "streaming stopped"
        );
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::registry;
    use crate::testing::{FakeOutput, OutputCall, ScriptLog, ScriptedBackend};

    fn config(streaming: StreamingMode) -> EngineConfig {
        EngineConfig {
            period_bytes: 64,
            streaming,
            ..EngineConfig::default()
        }
    }

    fn streamer(streaming: StreamingMode) -> (Streamer, Arc<FakeOutput>, Arc<ScriptLog>) {
        let out = FakeOutput::new();
        let (backend, log) = ScriptedBackend::new(2);
        let streamer = Streamer::new(
            &config(streaming),
            out.clone(),
            registry::share(Box::new(backend)),
        );
        (streamer, out, log)
    }

    #[test]
    fn start_binds_silence_and_primes_second_buffer() {
        let (mut s, out, log) = streamer(StreamingMode::Inline);
        s.start(false).unwrap();

        assert!(s.is_streaming());
        assert_eq!(
            out.calls(),
            vec![
                OutputCall::Flush(0),
                OutputCall::Flush(1),
                OutputCall::Register(true),
                OutputCall::Submit(0),
                OutputCall::StartDma,
            ]
        );
        assert_eq!(out.bound_index(), Some(0));
        assert!(out.bound_samples().unwrap().iter().all(|&v| v == 0));
        assert_eq!(log.decodes.load(Ordering::SeqCst), 1);
        assert_eq!(s.live_buffer(), 0);
    }

    #[test]
    fn inline_buffers_alternate() {
        let (mut s, out, log) = streamer(StreamingMode::Inline);
        s.start(false).unwrap();

        for expected in 1..=6u8 {
            assert!(out.fire());
            let index = expected % 2;
            assert_eq!(out.bound_index(), Some(index));
            assert_eq!(s.live_buffer(), index);
            // the bound buffer holds the decode made one period earlier
            let samples = out.bound_samples().unwrap();
            assert!(samples.iter().all(|&v| v == i16::from(expected)));
        }
        assert_eq!(log.decodes.load(Ordering::SeqCst), 7);
        assert_eq!(
            s.counters(),
            CounterSnapshot {
                periods: 6,
                underruns: 0,
                decode_failures: 0
            }
        );
    }

    #[test]
    fn completion_stops_dma_before_rebinding() {
        let (mut s, out, _log) = streamer(StreamingMode::Inline);
        s.start(false).unwrap();
        out.clear_calls();
        out.fire();
        assert_eq!(
            out.calls(),
            vec![
                OutputCall::StopDma,
                OutputCall::Flush(1),
                OutputCall::Submit(1),
                OutputCall::StartDma,
            ]
        );
    }

    #[test]
    fn worker_counts_every_completion() {
        let (mut s, out, _log) = streamer(StreamingMode::Worker);
        s.start(false).unwrap();

        let mut fires = 0u64;
        while s.counters().periods == 0 {
            assert!(fires < 2000, "worker never filled a buffer");
            std::thread::sleep(Duration::from_millis(1));
            out.fire();
            fires += 1;
        }
        assert_eq!(out.bound_index(), Some(1));

        for _ in 0..50 {
            std::thread::sleep(Duration::from_millis(1));
            let before = s.counters();
            let index = out.bound_index();
            out.fire();
            fires += 1;
            let after = s.counters();
            if after.periods > before.periods {
                assert_ne!(out.bound_index(), index);
            } else {
                assert_eq!(after.underruns, before.underruns + 1);
                assert_eq!(out.bound_index(), index);
            }
        }
        let c = s.counters();
        assert_eq!(c.periods + c.underruns, fires);
        s.stop();
        assert!(!s.is_streaming());
    }

    #[test]
    fn underrun_replays_silence() {
        let (mut s, out, _log) = streamer(StreamingMode::Inline);
        s.start(false).unwrap();
        // take the primed buffer away so the next completion finds nothing ready
        s.shared.inline.lock().ready = None;
        out.fire();

        assert_eq!(out.bound_index(), Some(0));
        assert!(out.bound_samples().unwrap().iter().all(|&v| v == 0));
        assert_eq!(s.counters().underruns, 1);
        assert_eq!(s.counters().periods, 0);
        assert!(out.is_running());
    }

    #[test]
    fn paused_stream_outputs_silence_without_decoding() {
        let (mut s, out, log) = streamer(StreamingMode::Inline);
        s.start(true).unwrap();
        for _ in 0..3 {
            out.fire();
            assert!(out.bound_samples().unwrap().iter().all(|&v| v == 0));
        }
        assert_eq!(log.decodes.load(Ordering::SeqCst), 0);

        s.set_paused(false);
        out.fire();
        out.fire();
        assert!(out.bound_samples().unwrap().iter().all(|&v| v == 1));
    }

    #[test]
    fn decode_failure_is_silenced_and_counted() {
        let (mut s, out, log) = streamer(StreamingMode::Inline);
        log.fail_decode.store(true, Ordering::SeqCst);
        s.start(false).unwrap();
        out.fire();

        assert!(out.bound_samples().unwrap().iter().all(|&v| v == 0));
        assert_eq!(s.counters().decode_failures, 2);
        assert!(s.is_streaming());
    }

    #[test]
    fn gains_scale_each_side() {
        let (mut s, out, _log) = streamer(StreamingMode::Inline);
        s.set_gains(128, 0);
        s.start(false).unwrap();
        out.fire();
        s.set_gains(256, 512);
        out.fire();
        out.fire();

        let samples = out.bound_samples().unwrap();
        assert_eq!(samples[0], 3);
        assert_eq!(samples[1], 6);
    }

    #[test]
    fn stop_releases_output_and_is_idempotent() {
        let (mut s, out, _log) = streamer(StreamingMode::Worker);
        s.start(false).unwrap();
        out.clear_calls();
        s.stop();

        let calls = out.calls();
        assert_eq!(calls[0], OutputCall::StopDma);
        assert_eq!(calls[1], OutputCall::Register(false));
        assert!(calls.contains(&OutputCall::Reclaim));
        assert!(!out.has_completion());
        assert_eq!(out.bound_index(), None);
        assert!(!out.fire());

        out.clear_calls();
        s.stop();
        assert!(out.calls().is_empty());
    }

    #[test]
    fn stop_waits_for_a_completion_in_flight() {
        let (mut s, out, _log) = streamer(StreamingMode::Inline);
        s.start(false).unwrap();

        // the completion passes its streaming check, then stalls in stop_dma
        let (entered, release) = out.hold_next_stop_dma();
        let irq_out = out.clone();
        let irq = std::thread::spawn(move || irq_out.fire());
        entered.recv_timeout(Duration::from_secs(5)).unwrap();

        let stopper = std::thread::spawn(move || {
            s.stop();
            s
        });
        std::thread::sleep(Duration::from_millis(30));
        assert!(!stopper.is_finished());

        release.send(()).unwrap();
        assert!(irq.join().unwrap());
        let s = stopper.join().unwrap();

        assert!(!s.is_streaming());
        assert!(!out.is_running());
        assert_eq!(out.bound_index(), None);
        assert!(!out.fire());
    }

    #[test]
    fn restart_resets_counters() {
        let (mut s, out, _log) = streamer(StreamingMode::Inline);
        s.start(false).unwrap();
        out.fire();
        out.fire();
        s.stop();
        s.start(false).unwrap();
        assert_eq!(s.counters(), CounterSnapshot::default());
        assert_eq!(out.bound_index(), Some(0));
    }
}
