//! modstream player: loads one track into memory and streams it through the
//! engine, either to a sound card or to a headless clock.
//!
//! Status (periods, underruns, the first voices) is logged once a second.

mod cli;
mod config;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use modstream::output::host;
use modstream::{AudioOutput, ClockOutput, CpalOutput, Engine};

const STATUS_INTERVAL: Duration = Duration::from_secs(1);
const TELEMETRY_VOICES: u8 = 4;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,modstream=info")
        }))
        .init();

    if args.list_devices {
        host::list_devices(&cpal::default_host())?;
        return Ok(());
    }

    let mut cfg = match &args.config {
        Some(path) => config::PlayerConfig::load(path)?,
        None => config::PlayerConfig::default(),
    };
    cfg.apply_args(&args);

    let path = args.path.as_ref().context("no track given")?;
    let data = std::fs::read(path).with_context(|| format!("read track {:?}", path))?;
    match modstream::sniff_kind(&data) {
        Some(kind) => cfg.engine.backend = kind,
        None => tracing::warn!(
            backend = cfg.engine.backend.label(),
            "could not identify track format, using configured backend"
        ),
    }

    let output: Arc<dyn AudioOutput> = if args.null_output {
        Arc::new(ClockOutput::new())
    } else {
        Arc::new(CpalOutput::new(
            cfg.device.clone(),
            cfg.engine.period_frames(),
        ))
    };
    let mut engine = Engine::init(cfg.engine.clone(), output).context("engine init")?;
    // a track that fails to load is fatal for the player, not for the engine
    engine
        .set_track(data)
        .with_context(|| format!("load track {:?}", path))?;
    tracing::info!(
        title = engine.song_title().unwrap_or_default(),
        kind = engine.mod_type().unwrap_or_default(),
        backend = cfg.engine.backend.label(),
        "ready"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let stop_signal = stop.clone();
    ctrlc::set_handler(move || stop_signal.store(true, Ordering::SeqCst))
        .context("install Ctrl-C handler")?;

    engine.start();
    let telemetry = engine.telemetry();
    let deadline = cfg
        .seconds
        .map(|s| Instant::now() + Duration::from_secs(s));
    while !stop.load(Ordering::SeqCst) && deadline.is_none_or(|d| Instant::now() < d) {
        std::thread::sleep(STATUS_INTERVAL);
        let status = engine.status();
        tracing::info!(
            state = ?status.state,
            periods = status.periods,
            underruns = status.underruns,
            decode_failures = status.decode_failures,
            "status"
        );
        for v in telemetry.snapshot(TELEMETRY_VOICES) {
            tracing::debug!(
                voice = v.voice,
                frequency_hz = v.frequency,
                volume = v.volume,
                level = v.real_volume,
                "voice"
            );
        }
    }

    engine.stop();
    let status = engine.status();
    tracing::info!(
        periods = status.periods,
        underruns = status.underruns,
        "playback finished"
    );
    engine.end();
    Ok(())
}
