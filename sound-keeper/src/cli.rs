//! Command line and configuration assembly.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::LevelFilter;

use sound_keeper_core::models::config::{DeviceScope, KeeperConfig, MutePolicy, StreamConfig, StreamKind, WorkaroundMode};
use sound_keeper_core::models::mode_string::apply_mode_string;

#[derive(Parser, Debug, Default)]
#[command(name = "sound-keeper")]
#[command(about = "Keeps audio outputs awake by playing an inaudible signal into them")]
#[command(after_help = "Mode words work like a renamed executable, e.g. `sound-keeper all sine f=440 a=5`.")]
pub struct Args {
    /// Mode words: primary|all|analog|digital|kill, zero|fluctuate|sine|white|brown|pink
    /// with optional f<hz> a<percent> l<play-s> w<wait-s> t<fade-s> parameters
    #[arg(value_name = "MODE")]
    pub words: Vec<String>,

    /// JSON configuration file, applied before mode words and flags
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Devices to keep awake
    #[arg(short, long, value_parser = parse_scope)]
    pub device: Option<DeviceScope>,

    /// Signal to play
    #[arg(short, long, value_parser = parse_kind)]
    pub stream: Option<StreamKind>,

    /// Tone frequency in Hz
    #[arg(short, long)]
    pub frequency: Option<f64>,

    /// Amplitude in percent of full scale
    #[arg(short, long)]
    pub amplitude: Option<f64>,

    /// Seconds of playback per period
    #[arg(short = 'l', long)]
    pub play: Option<f64>,

    /// Seconds of silence per period
    #[arg(short, long)]
    pub wait: Option<f64>,

    /// Fade-in and fade-out length in seconds
    #[arg(short = 't', long)]
    pub fade: Option<f64>,

    /// Keep remote desktop audio endpoints awake too
    #[arg(long)]
    pub allow_remote: bool,

    /// Reaction to a muted endpoint
    #[arg(long, value_parser = parse_mute_policy)]
    pub on_mute: Option<MutePolicy>,

    /// Stream buffer duration in milliseconds
    #[arg(long)]
    pub buffer_ms: Option<u32>,

    /// Exclusive-mode workaround: auto, on or off
    #[arg(long, value_parser = parse_workaround)]
    pub workaround: Option<WorkaroundMode>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Trace logging, including every submitted buffer
    #[arg(long)]
    pub trace: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    pub print_config: bool,
}

impl Args {
    pub fn mode_text(&self) -> String {
        self.words.join(" ")
    }

    /// Requested log level; `None` leaves it to `RUST_LOG`.
    pub fn log_level(&self, exe_name: &str) -> Option<LevelFilter> {
        let mode = format!("{} {}", exe_name, self.mode_text()).to_ascii_lowercase();
        if self.trace || mode.contains("trace") {
            Some(LevelFilter::Trace)
        } else if self.verbose {
            Some(LevelFilter::Debug)
        } else {
            None
        }
    }
}

/// Build the effective configuration: defaults, then the config file, then
/// mode words from the executable name and the command line, then flags.
pub fn build_config(args: &Args, exe_name: &str) -> Result<KeeperConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => KeeperConfig::default(),
    };

    if apply_mode_string(&mut config, exe_name) {
        log::debug!("mode from executable name '{}'", exe_name);
    }
    let words = args.mode_text();
    if !words.is_empty() && !apply_mode_string(&mut config, &words) {
        log::warn!("no mode keywords in '{}'", words);
    }

    if let Some(scope) = args.device {
        config.device_scope = scope;
    }
    if let Some(kind) = args.stream {
        config.stream = StreamConfig::with_defaults(kind);
    }
    let stream = &mut config.stream;
    if let Some(hz) = args.frequency {
        stream.set_frequency(hz);
    }
    if let Some(percent) = args.amplitude {
        stream.set_amplitude_percent(percent);
    }
    if let Some(seconds) = args.play {
        stream.set_play_seconds(seconds);
    }
    if let Some(seconds) = args.wait {
        stream.set_wait_seconds(seconds);
    }
    if let Some(seconds) = args.fade {
        stream.set_fade_seconds(seconds);
    }
    if args.allow_remote {
        config.allow_remote = true;
    }
    if let Some(policy) = args.on_mute {
        config.mute_policy = policy;
    }
    if let Some(buffer_ms) = args.buffer_ms {
        config.buffer_ms = buffer_ms;
    }
    if let Some(mode) = args.workaround {
        config.quirks.wait_exclusive_workaround = mode;
    }

    if let Err(reason) = config.validate() {
        bail!("invalid configuration: {}", reason);
    }
    Ok(config)
}

fn load_config(path: &Path) -> Result<KeeperConfig> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn parse_scope(value: &str) -> Result<DeviceScope, String> {
    match value.to_ascii_lowercase().as_str() {
        "none" | "kill" => Ok(DeviceScope::None),
        "primary" => Ok(DeviceScope::Primary),
        "all" => Ok(DeviceScope::All),
        "analog" => Ok(DeviceScope::Analog),
        "digital" => Ok(DeviceScope::Digital),
        other => Err(format!("unknown device scope '{}'", other)),
    }
}

fn parse_kind(value: &str) -> Result<StreamKind, String> {
    match value.to_ascii_lowercase().as_str() {
        "none" => Ok(StreamKind::None),
        "zero" | "null" => Ok(StreamKind::Zero),
        "fluctuate" => Ok(StreamKind::Fluctuate),
        "sine" => Ok(StreamKind::Sine),
        "white" => Ok(StreamKind::WhiteNoise),
        "brown" => Ok(StreamKind::BrownNoise),
        "pink" => Ok(StreamKind::PinkNoise),
        other => Err(format!("unknown stream kind '{}'", other)),
    }
}

fn parse_mute_policy(value: &str) -> Result<MutePolicy, String> {
    match value.to_ascii_lowercase().as_str() {
        "ignore" => Ok(MutePolicy::Ignore),
        "shutdown" => Ok(MutePolicy::Shutdown),
        "restart" => Ok(MutePolicy::Restart),
        other => Err(format!("unknown mute policy '{}'", other)),
    }
}

fn parse_workaround(value: &str) -> Result<WorkaroundMode, String> {
    match value.to_ascii_lowercase().as_str() {
        "auto" => Ok(WorkaroundMode::Auto),
        "on" => Ok(WorkaroundMode::On),
        "off" => Ok(WorkaroundMode::Off),
        other => Err(format!("unknown workaround mode '{}'", other)),
    }
}
