//! Test doubles shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use modstream_types::BackendKind;

use crate::backend::CodecBackend;
use crate::buffer::PcmBuffer;
use crate::error::{DecodeError, InitError, LoadError};
use crate::output::{AudioOutput, CompletionCallback};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum OutputCall {
    Init,
    SetSampleRate(u32),
    Register(bool),
    Submit(u8),
    Reclaim,
    StartDma,
    StopDma,
    Flush(u8),
}

#[derive(Default)]
struct FakeState {
    bound: Option<PcmBuffer>,
    completion: Option<CompletionCallback>,
    calls: Vec<OutputCall>,
    running: bool,
    rate: u32,
}

/// Output whose completion events are fired by hand.
#[derive(Default)]
pub(crate) struct FakeOutput {
    state: Mutex<FakeState>,
    fail_init: AtomicBool,
    stop_gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl FakeOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let out = Self::default();
        out.fail_init.store(true, Ordering::SeqCst);
        Arc::new(out)
    }

    /// Deliver one completion event; returns `false` when no callback is registered.
    pub fn fire(&self) -> bool {
        let callback = self.state.lock().completion.clone();
        match callback {
            Some(cb) => {
                cb();
                true
            }
            None => false,
        }
    }

    /// Make the next `stop_dma` report entry on the first channel and block
    /// until the second one is signalled.
    pub fn hold_next_stop_dma(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        *self.stop_gate.lock() = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }

    pub fn calls(&self) -> Vec<OutputCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn bound_index(&self) -> Option<u8> {
        self.state.lock().bound.as_ref().map(PcmBuffer::index)
    }

    pub fn bound_samples(&self) -> Option<Vec<i16>> {
        self.state
            .lock()
            .bound
            .as_ref()
            .map(|b| b.samples().to_vec())
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn has_completion(&self) -> bool {
        self.state.lock().completion.is_some()
    }

    pub fn rate(&self) -> u32 {
        self.state.lock().rate
    }
}

impl AudioOutput for FakeOutput {
    fn init(&self) -> Result<(), InitError> {
        self.state.lock().calls.push(OutputCall::Init);
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(InitError::Hardware("fake output refused".into()));
        }
        Ok(())
    }

    fn set_sample_rate(&self, hz: u32) {
        let mut st = self.state.lock();
        st.rate = hz;
        st.calls.push(OutputCall::SetSampleRate(hz));
    }

    fn register_completion(&self, callback: Option<CompletionCallback>) {
        let mut st = self.state.lock();
        st.calls.push(OutputCall::Register(callback.is_some()));
        st.completion = callback;
    }

    fn submit(&self, buffer: PcmBuffer) -> Option<PcmBuffer> {
        let mut st = self.state.lock();
        st.calls.push(OutputCall::Submit(buffer.index()));
        st.bound.replace(buffer)
    }

    fn reclaim(&self) -> Option<PcmBuffer> {
        let mut st = self.state.lock();
        st.calls.push(OutputCall::Reclaim);
        st.bound.take()
    }

    fn start_dma(&self) {
        let mut st = self.state.lock();
        st.running = true;
        st.calls.push(OutputCall::StartDma);
    }

    fn stop_dma(&self) {
        let gate = self.stop_gate.lock().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv();
        }
        let mut st = self.state.lock();
        st.running = false;
        st.calls.push(OutputCall::StopDma);
    }

    fn flush(&self, buffer: &PcmBuffer) {
        self.state.lock().calls.push(OutputCall::Flush(buffer.index()));
    }
}

/// Observations shared between a test and its [`ScriptedBackend`].
#[derive(Default)]
pub(crate) struct ScriptLog {
    pub decodes: AtomicUsize,
    pub calls: Mutex<Vec<&'static str>>,
    pub volume: AtomicU8,
    pub frequency: AtomicU32,
    pub paused: AtomicBool,
    pub fail_decode: AtomicBool,
}

impl ScriptLog {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn push(&self, call: &'static str) {
        self.calls.lock().push(call);
    }
}

/// Backend that fills every decode with the decode's sequence number.
///
/// Data starting with `0xEE` is rejected; otherwise the bytes are the title.
pub(crate) struct ScriptedBackend {
    log: Arc<ScriptLog>,
    channels: usize,
    track: Option<String>,
}

impl ScriptedBackend {
    pub fn new(channels: usize) -> (Self, Arc<ScriptLog>) {
        let log = Arc::new(ScriptLog::default());
        (
            Self {
                log: log.clone(),
                channels,
                track: None,
            },
            log,
        )
    }
}

impl CodecBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Tracker
    }

    fn init(&mut self, _stereo: bool) -> Result<(), InitError> {
        self.log.push("init");
        Ok(())
    }

    fn end(&mut self) {
        self.unload();
        self.log.push("end");
    }

    fn load(&mut self, data: Arc<[u8]>) -> Result<(), LoadError> {
        self.unload();
        self.log.push("load");
        match data.first() {
            None => Err(LoadError::Empty),
            Some(0xEE) => Err(LoadError::UnrecognizedFormat),
            Some(_) => {
                self.track = Some(String::from_utf8_lossy(&data).into_owned());
                Ok(())
            }
        }
    }

    fn unload(&mut self) {
        if self.track.take().is_some() {
            self.log.push("unload");
        }
    }

    fn is_loaded(&self) -> bool {
        self.track.is_some()
    }

    fn start(&mut self) {
        self.log.push("start");
    }

    fn stop(&mut self) {
        self.log.push("stop");
    }

    fn set_paused(&mut self, paused: bool) {
        self.log.paused.store(paused, Ordering::SeqCst);
    }

    fn set_frequency(&mut self, hz: u32) {
        self.log.frequency.store(hz, Ordering::SeqCst);
    }

    fn set_volume(&mut self, volume: u8) {
        self.log.volume.store(volume, Ordering::SeqCst);
    }

    fn max_volume(&self) -> u8 {
        128
    }

    fn output_channels(&self) -> usize {
        self.channels
    }

    fn decode_into(&mut self, out: &mut [i16]) -> Result<(), DecodeError> {
        let n = self.log.decodes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.log.fail_decode.load(Ordering::SeqCst) {
            return Err(DecodeError::Codec("scripted failure".into()));
        }
        out.fill(n as i16);
        Ok(())
    }

    fn song_title(&self) -> Option<&str> {
        self.track.as_deref()
    }

    fn mod_type(&self) -> Option<&str> {
        self.track.as_ref().map(|_| "Scripted")
    }

    fn voice_frequency(&self, voice: u8) -> u32 {
        if self.track.is_some() && voice < 4 {
            8_000 + u32::from(voice)
        } else {
            0
        }
    }
}

/// Builder for small MOD files.
pub(crate) struct ModFixture {
    title: String,
    channels: usize,
    tag: [u8; 4],
    orders: Vec<u8>,
    cells: Vec<(usize, usize, usize, [u8; 4])>,
}

impl ModFixture {
    /// Length in bytes of the single looping square-wave instrument.
    pub const SAMPLE_LEN: usize = 64;

    pub fn new() -> Self {
        Self {
            title: String::new(),
            channels: 4,
            tag: *b"M.K.",
            orders: vec![0],
            cells: Vec::new(),
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn channels(mut self, channels: usize, tag: [u8; 4]) -> Self {
        self.channels = channels;
        self.tag = tag;
        self
    }

    pub fn orders(mut self, orders: &[u8]) -> Self {
        self.orders = orders.to_vec();
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn cell(
        mut self,
        pattern: usize,
        row: usize,
        channel: usize,
        sample: u8,
        period: u16,
        effect: u8,
        param: u8,
    ) -> Self {
        let bytes = [
            (sample & 0xF0) | ((period >> 8) as u8 & 0x0F),
            period as u8,
            ((sample & 0x0F) << 4) | (effect & 0x0F),
            param,
        ];
        self.cells.push((pattern, row, channel, bytes));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.assemble(31)
    }

    /// 15-instrument layout without a format tag.
    pub fn build_15(&self) -> Vec<u8> {
        self.assemble(15)
    }

    fn assemble(&self, instruments: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut title = self.title.as_bytes().to_vec();
        title.resize(20, 0);
        out.extend(title);

        for i in 0..instruments {
            let mut header = [0u8; 30];
            if i == 0 {
                header[..6].copy_from_slice(b"square");
                let words = (Self::SAMPLE_LEN / 2) as u16;
                header[22..24].copy_from_slice(&words.to_be_bytes());
                header[25] = 64;
                header[28..30].copy_from_slice(&words.to_be_bytes());
            }
            out.extend(header);
        }

        out.push(self.orders.len() as u8);
        out.push(if instruments == 31 { 127 } else { 120 });
        let mut table = self.orders.clone();
        table.resize(128, 0);
        out.extend(&table);
        if instruments == 31 {
            out.extend(self.tag);
        }

        let patterns = self.orders.iter().copied().max().unwrap_or(0) as usize + 1;
        let pattern_len = 64 * self.channels * 4;
        let mut data = vec![0u8; patterns * pattern_len];
        for &(pattern, row, channel, bytes) in &self.cells {
            let at = pattern * pattern_len + (row * self.channels + channel) * 4;
            data[at..at + 4].copy_from_slice(&bytes);
        }
        out.extend(data);

        out.extend(std::iter::repeat_n(0x40u8, Self::SAMPLE_LEN / 2));
        out.extend(std::iter::repeat_n(0xC0u8, Self::SAMPLE_LEN / 2));
        out
    }
}
