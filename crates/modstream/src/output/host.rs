//! Host sound card output through CPAL.
//!
//! Emulates the console's DMA engine on a desktop machine: the bound
//! [`PcmBuffer`] is copied out from the CPAL data callback, and the
//! completion callback fires from that same callback as soon as the last
//! frame has been handed to the device.
//!
//! `cpal::Stream` is not `Send` on every host, so streams are built, kept and
//! dropped on a dedicated `modstream-output` thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::buffer::PcmBuffer;
use crate::error::InitError;
use crate::output::{AudioOutput, CompletionCallback};

#[derive(Default)]
struct DmaState {
    bound: Option<PcmBuffer>,
    /// Next sample to copy out of `bound`.
    pos: usize,
    running: bool,
    completion: Option<CompletionCallback>,
}

enum StreamCommand {
    Open { rate: u32, reply: Sender<Result<u32>> },
    Shutdown,
}

struct StreamThread {
    commands: Sender<StreamCommand>,
    thread: JoinHandle<()>,
}

pub struct CpalOutput {
    device: Option<String>,
    period_frames: u32,
    rate: AtomicU32,
    dma: Arc<Mutex<DmaState>>,
    stream: Mutex<Option<StreamThread>>,
}

impl CpalOutput {
    /// `device` is a case-insensitive substring of the device name; `None` picks the default.
    pub fn new(device: Option<String>, period_frames: usize) -> Self {
        Self {
            device,
            period_frames: u32::try_from(period_frames).unwrap_or(u32::MAX),
            rate: AtomicU32::new(48_000),
            dma: Arc::new(Mutex::new(DmaState::default())),
            stream: Mutex::new(None),
        }
    }

    /// (Re)open the device stream at `rate`; returns the rate the device accepted.
    fn open(&self, rate: u32) -> Result<u32> {
        let guard = self.stream.lock();
        let st = guard
            .as_ref()
            .ok_or_else(|| anyhow!("output not initialized"))?;
        let (reply, response) = crossbeam_channel::bounded(1);
        st.commands
            .send(StreamCommand::Open { rate, reply })
            .map_err(|_| anyhow!("output thread exited"))?;
        response
            .recv()
            .map_err(|_| anyhow!("output thread exited"))?
    }
}

impl AudioOutput for CpalOutput {
    fn init(&self) -> Result<(), InitError> {
        {
            let mut stream = self.stream.lock();
            if stream.is_none() {
                let (tx, rx) = crossbeam_channel::unbounded();
                let device = self.device.clone();
                let period_frames = self.period_frames;
                let dma = self.dma.clone();
                let thread = thread::Builder::new()
                    .name("modstream-output".into())
                    .spawn(move || stream_thread(device, period_frames, dma, rx))
                    .map_err(|e| InitError::Hardware(format!("spawn output thread: {e}")))?;
                *stream = Some(StreamThread {
                    commands: tx,
                    thread,
                });
            }
        }
        self.open(self.rate.load(Ordering::Relaxed))
            .map(|_| ())
            .map_err(|e| InitError::Hardware(format!("{e:#}")))
    }

    fn set_sample_rate(&self, hz: u32) {
        if self.rate.swap(hz, Ordering::Relaxed) == hz {
            return;
        }
        if self.stream.lock().is_none() {
            return;
        }
        if let Err(e) = self.open(hz) {
            tracing::warn!(rate = hz, "output rate change failed: {e:#}");
        }
    }

    fn register_completion(&self, callback: Option<CompletionCallback>) {
        self.dma.lock().completion = callback;
    }

    fn submit(&self, buffer: PcmBuffer) -> Option<PcmBuffer> {
        let mut st = self.dma.lock();
        st.pos = 0;
        st.bound.replace(buffer)
    }

    fn reclaim(&self) -> Option<PcmBuffer> {
        let mut st = self.dma.lock();
        st.running = false;
        st.pos = 0;
        st.bound.take()
    }

    fn start_dma(&self) {
        self.dma.lock().running = true;
    }

    fn stop_dma(&self) {
        self.dma.lock().running = false;
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Some(st) = self.stream.lock().take() {
            let _ = st.commands.send(StreamCommand::Shutdown);
            if st.thread.join().is_err() {
                tracing::error!("output thread panicked");
            }
        }
    }
}

fn stream_thread(
    device: Option<String>,
    period_frames: u32,
    dma: Arc<Mutex<DmaState>>,
    commands: Receiver<StreamCommand>,
) {
    let host = cpal::default_host();
    let mut current: Option<cpal::Stream> = None;
    for cmd in commands.iter() {
        match cmd {
            StreamCommand::Open { rate, reply } => {
                // the old stream must be gone before the device is reopened
                current = None;
                let result = open_stream(&host, device.as_deref(), rate, period_frames, &dma)
                    .map(|(stream, actual)| {
                        current = Some(stream);
                        actual
                    });
                let _ = reply.send(result);
            }
            StreamCommand::Shutdown => break,
        }
    }
    drop(current);
    tracing::debug!("output thread exiting");
}

fn open_stream(
    host: &cpal::Host,
    needle: Option<&str>,
    rate: u32,
    period_frames: u32,
    dma: &Arc<Mutex<DmaState>>,
) -> Result<(cpal::Stream, u32)> {
    let device = pick_device(host, needle)?;
    let config = pick_output_config(&device, rate)?;
    let mut stream_config: cpal::StreamConfig = config.clone().into();
    if let Some(buf) = pick_buffer_size(config.buffer_size(), period_frames) {
        stream_config.buffer_size = buf;
    }
    if stream_config.sample_rate != rate {
        tracing::warn!(
            requested = rate,
            actual = stream_config.sample_rate,
            "device does not support the requested rate; pitch will be off"
        );
    }

    let dma = dma.clone();
    let stream = match config.sample_format() {
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, dma),
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, dma),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, dma),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, dma),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }?;
    stream.play().context("start output stream")?;

    tracing::info!(
        device = %device.description().map(|d| d.to_string()).unwrap_or_default(),
        rate = stream_config.sample_rate,
        channels = stream_config.channels,
        format = ?config.sample_format(),
        "output stream open"
    );
    Ok((stream, stream_config.sample_rate))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    dma: Arc<Mutex<DmaState>>,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<i16>,
{
    let channels_out = usize::from(config.channels).max(1);
    let err_fn = |err| tracing::warn!("stream error: {err}");
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| fill_from_dma(&dma, data, channels_out),
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Copy the bound buffer into `data`, firing the completion callback each
/// time it runs out. The lock is never held across the callback.
fn fill_from_dma<T>(dma: &Mutex<DmaState>, data: &mut [T], channels_out: usize)
where
    T: cpal::Sample + cpal::FromSample<i16>,
{
    let frames = data.len() / channels_out;
    let mut written = 0usize;
    while written < frames {
        let completion = {
            let mut st = dma.lock();
            let DmaState {
                bound,
                pos,
                running,
                completion,
            } = &mut *st;
            if !*running {
                break;
            }
            let Some(buf) = bound.as_ref() else {
                break;
            };
            let src = buf.samples();
            while written < frames && *pos < src.len() {
                let out = &mut data[written * channels_out..(written + 1) * channels_out];
                map_frame(src[*pos], src[*pos + 1], out);
                *pos += 2;
                written += 1;
            }
            if *pos >= src.len() {
                *running = false;
                completion.clone()
            } else {
                None
            }
        };
        match completion {
            Some(cb) => cb(),
            None => break,
        }
    }
    data[written * channels_out..].fill(T::from_sample(0i16));
}

/// Stereo to mono is averaged; channels past the second stay silent.
fn map_frame<T>(l: i16, r: i16, out: &mut [T])
where
    T: cpal::Sample + cpal::FromSample<i16>,
{
    match out {
        [mono] => {
            let avg = (i32::from(l) + i32::from(r)) / 2;
            *mono = T::from_sample(avg as i16);
        }
        [left, right, rest @ ..] => {
            *left = T::from_sample(l);
            *right = T::from_sample(r);
            rest.fill(T::from_sample(0i16));
        }
        [] => {}
    }
}

/// Pick the first output device whose name contains `needle` (case-insensitive), or the default device.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let found = host
            .output_devices()
            .context("No output devices")?
            .find(|d| {
                d.description()
                    .map(|n| matches_device_name(&n.name(), needle))
                    .unwrap_or(false)
            });
        return found.ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose an output config for `rate`.
///
/// Ranges containing `rate` win over the rest, then stereo over other
/// layouts, then the sample format closest to our `i16` buffers.
pub fn pick_output_config(
    device: &cpal::Device,
    rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<((bool, bool, u8), cpal::SupportedStreamConfig)> = None;
    for range in device.supported_output_configs()? {
        let min = range.min_sample_rate();
        let max = range.max_sample_rate();
        let exact = (min..=max).contains(&rate);
        let key = (
            exact,
            range.channels() == 2,
            u8::MAX - sample_format_rank(range.sample_format()),
        );
        if best.as_ref().is_some_and(|(k, _)| *k >= key) {
            continue;
        }
        best = Some((key, range.with_sample_rate(rate.clamp(min, max))));
    }
    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Ask for a device buffer as close to one period as the device allows.
///
/// Returns `None` when the device only reports its default size.
pub fn pick_buffer_size(
    supported: &cpal::SupportedBufferSize,
    period_frames: u32,
) -> Option<cpal::BufferSize> {
    match supported {
        cpal::SupportedBufferSize::Range { min, max } if min <= max => {
            Some(cpal::BufferSize::Fixed(period_frames.clamp(*min, *max)))
        }
        _ => None,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

/// Print available output devices to stdout (for `--list-devices`).
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn buffer(index: u8, value: i16) -> PcmBuffer {
        // 32 bytes: 8 stereo frames
        let mut buf = PcmBuffer::new(index, 32);
        buf.samples_mut().fill(value);
        buf
    }

    #[test]
    fn silence_when_nothing_is_running() {
        let dma = Mutex::new(DmaState {
            bound: Some(buffer(0, 5)),
            ..DmaState::default()
        });
        let mut data = [1i16; 8];
        fill_from_dma(&dma, &mut data, 2);
        assert_eq!(data, [0; 8]);
    }

    #[test]
    fn completion_rebinds_mid_callback() {
        let dma = Arc::new(Mutex::new(DmaState {
            bound: Some(buffer(0, 5)),
            running: true,
            ..DmaState::default()
        }));
        let fired = Arc::new(AtomicUsize::new(0));
        let cb_dma = dma.clone();
        let cb_fired = fired.clone();
        dma.lock().completion = Some(Arc::new(move || {
            cb_fired.fetch_add(1, Ordering::SeqCst);
            let mut st = cb_dma.lock();
            st.bound = Some(buffer(1, 7));
            st.pos = 0;
            st.running = true;
        }));

        let mut data = [0i16; 24];
        fill_from_dma(&dma, &mut data, 2);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(data[..16].iter().all(|&v| v == 5));
        assert!(data[16..].iter().all(|&v| v == 7));
        assert_eq!(dma.lock().pos, 8);
    }

    #[test]
    fn stalls_to_silence_when_completion_does_not_restart() {
        let dma = Mutex::new(DmaState {
            bound: Some(buffer(0, 5)),
            running: true,
            completion: Some(Arc::new(|| {})),
            ..DmaState::default()
        });
        let mut data = [9i16; 20];
        fill_from_dma(&dma, &mut data, 2);
        assert!(data[..16].iter().all(|&v| v == 5));
        assert!(data[16..].iter().all(|&v| v == 0));
        assert!(!dma.lock().running);
    }

    #[test]
    fn maps_to_device_layouts() {
        let mut mono = [0i16; 1];
        map_frame(100, 300, &mut mono);
        assert_eq!(mono, [200]);

        let mut quad = [9i16; 4];
        map_frame(1, 2, &mut quad);
        assert_eq!(quad, [1, 2, 0, 0]);

        let mut float = [0f32; 2];
        map_frame(i16::MAX, 0, &mut float);
        assert!(float[0] > 0.99);
        assert_eq!(float[1], 0.0);
    }

    #[test]
    fn buffer_size_targets_period() {
        let range = cpal::SupportedBufferSize::Range { min: 64, max: 4096 };
        assert!(matches!(
            pick_buffer_size(&range, 1024),
            Some(cpal::BufferSize::Fixed(1024))
        ));
        assert!(matches!(
            pick_buffer_size(&range, 16_384),
            Some(cpal::BufferSize::Fixed(4096))
        ));
        assert!(pick_buffer_size(&cpal::SupportedBufferSize::Unknown, 1024).is_none());
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", " "));
    }
}
