use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "modstream", version)]
pub struct Args {
    /// Track to play (ProTracker MOD or MP3)
    #[arg(required_unless_present = "list_devices")]
    pub path: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Pace playback with a timer instead of a sound card
    #[arg(long)]
    pub null_output: bool,

    /// Stop after this many seconds (default: until Ctrl-C)
    #[arg(long)]
    pub seconds: Option<u64>,

    /// TOML file with engine settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Ask the backend for mono output
    #[arg(long)]
    pub mono: bool,

    /// Output rate in Hz (32000 or 48000)
    #[arg(long)]
    pub frequency: Option<u32>,

    /// Decode inside the output callback instead of on a worker thread
    #[arg(long)]
    pub inline: bool,
}
