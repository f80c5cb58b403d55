//! Headless output paced by the wall clock.
//!
//! Nothing is played: a `modstream-clock` thread waits one period
//! (bound frames / rate) after each `start_dma` and then fires the
//! completion callback. Used with `--null-output` and in tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::buffer::PcmBuffer;
use crate::error::InitError;
use crate::output::{AudioOutput, CompletionCallback};

struct ClockState {
    bound: Option<PcmBuffer>,
    running: bool,
    started: Instant,
    rate: u32,
    completion: Option<CompletionCallback>,
}

impl ClockState {
    fn period(&self) -> Option<Duration> {
        let buf = self.bound.as_ref().filter(|_| self.running)?;
        Some(Duration::from_secs_f64(
            buf.frames() as f64 / f64::from(self.rate.max(1)),
        ))
    }
}

enum ClockCommand {
    Wake,
    Shutdown,
}

struct Shared {
    state: Mutex<ClockState>,
    frames_played: AtomicU64,
}

pub struct ClockOutput {
    shared: Arc<Shared>,
    commands: Sender<ClockCommand>,
    receiver: Receiver<ClockCommand>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ClockOutput {
    pub fn new() -> Self {
        let (commands, receiver) = crossbeam_channel::unbounded();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ClockState {
                    bound: None,
                    running: false,
                    started: Instant::now(),
                    rate: 48_000,
                    completion: None,
                }),
                frames_played: AtomicU64::new(0),
            }),
            commands,
            receiver,
            thread: Mutex::new(None),
        }
    }

    /// Frames "played" so far.
    pub fn frames_played(&self) -> u64 {
        self.shared.frames_played.load(Ordering::Relaxed)
    }
}

impl Default for ClockOutput {
    fn default() -> Self {
        Self::new()
    }
}

fn clock_thread(shared: Arc<Shared>, commands: Receiver<ClockCommand>) {
    loop {
        let deadline = {
            let st = shared.state.lock();
            st.period().map(|p| st.started + p)
        };
        let cmd = match deadline {
            Some(at) => commands.recv_deadline(at),
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match cmd {
            Ok(ClockCommand::Wake) => continue,
            Ok(ClockCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let completion = {
            let mut st = shared.state.lock();
            match st.period() {
                Some(p) if st.started.elapsed() >= p => {
                    st.running = false;
                    let frames = st.bound.as_ref().map_or(0, PcmBuffer::frames);
                    shared
                        .frames_played
                        .fetch_add(frames as u64, Ordering::Relaxed);
                    st.completion.clone()
                }
                _ => None,
            }
        };
        if let Some(cb) = completion {
            cb();
        }
    }
    tracing::debug!("clock output exiting");
}

impl AudioOutput for ClockOutput {
    fn init(&self) -> Result<(), InitError> {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Ok(());
        }
        let shared = self.shared.clone();
        let commands = self.receiver.clone();
        let handle = thread::Builder::new()
            .name("modstream-clock".into())
            .spawn(move || clock_thread(shared, commands))
            .map_err(|e| InitError::Hardware(format!("spawn clock thread: {e}")))?;
        *thread = Some(handle);
        tracing::info!("headless output ready");
        Ok(())
    }

    fn set_sample_rate(&self, hz: u32) {
        self.shared.state.lock().rate = hz;
    }

    fn register_completion(&self, callback: Option<CompletionCallback>) {
        self.shared.state.lock().completion = callback;
    }

    fn submit(&self, buffer: PcmBuffer) -> Option<PcmBuffer> {
        self.shared.state.lock().bound.replace(buffer)
    }

    fn reclaim(&self) -> Option<PcmBuffer> {
        let mut st = self.shared.state.lock();
        st.running = false;
        st.bound.take()
    }

    fn start_dma(&self) {
        {
            let mut st = self.shared.state.lock();
            st.running = true;
            st.started = Instant::now();
        }
        let _ = self.commands.send(ClockCommand::Wake);
    }

    fn stop_dma(&self) {
        self.shared.state.lock().running = false;
    }
}

impl Drop for ClockOutput {
    fn drop(&mut self) {
        if let Some(handle) = self.thread.lock().take() {
            let _ = self.commands.send(ClockCommand::Shutdown);
            if handle.join().is_err() {
                tracing::error!("clock thread panicked");
            }
        }
    }
}
