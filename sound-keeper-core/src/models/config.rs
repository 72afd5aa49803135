use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Highest tone frequency accepted from configuration, in Hz.
pub const MAX_FREQUENCY: f64 = 96_000.0;

/// Longest play, wait or fade time accepted from configuration (one year).
pub const MAX_PERIOD_SECONDS: f64 = 365.0 * 24.0 * 3600.0;

/// Kind of signal streamed into each endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Open the device but never submit a buffer.
    None,
    /// Submit buffers flagged as silent.
    Zero,
    /// Smallest non-zero sample values, below audibility.
    Fluctuate,
    Sine,
    #[serde(rename = "white")]
    WhiteNoise,
    #[serde(rename = "brown")]
    BrownNoise,
    #[serde(rename = "pink")]
    PinkNoise,
}

impl StreamKind {
    pub fn is_noise(self) -> bool {
        matches!(self, Self::WhiteNoise | Self::BrownNoise | Self::PinkNoise)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Zero => "zero",
            Self::Fluctuate => "fluctuate",
            Self::Sine => "sine",
            Self::WhiteNoise => "white",
            Self::BrownNoise => "brown",
            Self::PinkNoise => "pink",
        }
    }
}

/// Which render endpoints get a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceScope {
    /// Do not keep anything alive.
    None,
    /// The default console render endpoint only.
    Primary,
    All,
    Analog,
    Digital,
}

/// Reaction to a session volume event that reports the endpoint as muted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutePolicy {
    #[default]
    Ignore,
    Shutdown,
    Restart,
}

/// Signal parameters for one stream.
///
/// All setters clamp to the accepted range, so a `StreamConfig` built through
/// them is always valid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub kind: StreamKind,
    /// Tone frequency in Hz. For `Fluctuate`, 0 selects the fixed 4-frame pattern.
    pub frequency: f64,
    /// Unit fraction, 0.0..=1.0.
    pub amplitude: f64,
    pub play_seconds: f64,
    pub wait_seconds: f64,
    pub fade_seconds: f64,
}

impl StreamConfig {
    /// Parameters the stream kind uses when nothing else was configured.
    pub fn with_defaults(kind: StreamKind) -> Self {
        let mut config = Self {
            kind,
            frequency: 0.0,
            amplitude: 0.0,
            play_seconds: 0.0,
            wait_seconds: 0.0,
            fade_seconds: 0.0,
        };
        match kind {
            StreamKind::Fluctuate => config.set_frequency(50.0),
            StreamKind::Sine | StreamKind::WhiteNoise | StreamKind::BrownNoise | StreamKind::PinkNoise => {
                config.set_frequency(1.0);
                config.set_amplitude(0.01);
                config.set_fade_seconds(0.1);
            }
            StreamKind::None | StreamKind::Zero => {}
        }
        config
    }

    pub fn set_frequency(&mut self, hz: f64) {
        self.frequency = non_negative(hz).min(MAX_FREQUENCY);
    }

    pub fn set_amplitude(&mut self, amplitude: f64) {
        self.amplitude = non_negative(amplitude).min(1.0);
    }

    /// Amplitude given as a percentage of full scale.
    pub fn set_amplitude_percent(&mut self, percent: f64) {
        self.set_amplitude(non_negative(percent) / 100.0);
    }

    pub fn set_play_seconds(&mut self, seconds: f64) {
        self.play_seconds = non_negative(seconds).min(MAX_PERIOD_SECONDS);
    }

    pub fn set_wait_seconds(&mut self, seconds: f64) {
        self.wait_seconds = non_negative(seconds).min(MAX_PERIOD_SECONDS);
    }

    pub fn set_fade_seconds(&mut self, seconds: f64) {
        self.fade_seconds = non_negative(seconds).min(MAX_PERIOD_SECONDS);
    }

    pub fn is_periodic(&self) -> bool {
        self.play_seconds > 0.0 && self.wait_seconds > 0.0
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=MAX_FREQUENCY).contains(&self.frequency) {
            return Err(format!("frequency out of range: {}", self.frequency));
        }
        if !(0.0..=1.0).contains(&self.amplitude) {
            return Err(format!("amplitude out of range: {}", self.amplitude));
        }
        for (name, value) in [
            ("play", self.play_seconds),
            ("wait", self.wait_seconds),
            ("fade", self.fade_seconds),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{} seconds must be a non-negative number: {}", name, value));
            }
            if value > MAX_PERIOD_SECONDS {
                return Err(format!("{} seconds out of range: {}", name, value));
            }
        }
        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::with_defaults(StreamKind::Fluctuate)
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() {
        value.abs()
    } else {
        0.0
    }
}

/// Delays and ceilings of the per-device rendering state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Backoff after an interruption that happened while playing cleanly.
    pub playing_retry_ms: u64,
    /// Backoff after a failed (re)initialisation.
    pub failing_retry_ms: u64,
    /// Consecutive failed play attempts before giving up (leaky platforms only).
    pub max_play_attempts: u32,
    /// Settle delay before entering `WaitExclusive` (leaky platforms only).
    pub exclusive_settle_ms: u64,
    /// Delay between polls for the exclusive session.
    pub exclusive_poll_ms: u64,
    /// Polls without finding an active session before forcing a retry.
    pub max_wait_attempts: u32,
    /// Upper bound on how long `Stop` waits for the rendering thread.
    pub stop_timeout_ms: u64,
}

impl RetryPolicy {
    pub fn playing_retry(&self) -> Duration {
        Duration::from_millis(self.playing_retry_ms)
    }

    pub fn failing_retry(&self) -> Duration {
        Duration::from_millis(self.failing_retry_ms)
    }

    pub fn exclusive_settle(&self) -> Duration {
        Duration::from_millis(self.exclusive_settle_ms)
    }

    pub fn exclusive_poll(&self) -> Duration {
        Duration::from_millis(self.exclusive_poll_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            playing_retry_ms: 100,
            failing_retry_ms: 750,
            max_play_attempts: 10,
            exclusive_settle_ms: 30,
            exclusive_poll_ms: 100,
            max_wait_attempts: 100,
            stop_timeout_ms: 5000,
        }
    }
}

/// Poll intervals of the orchestrator control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlTimings {
    pub fast_poll_ms: u64,
    pub slow_poll_ms: u64,
    /// Quiet period required before acting on a burst of retry/restart requests.
    pub debounce_ms: u64,
    /// Poll fast when the system is predicted to sleep within this many seconds.
    pub sleep_threshold_secs: i64,
}

impl ControlTimings {
    pub fn fast_poll(&self) -> Duration {
        Duration::from_millis(self.fast_poll_ms)
    }

    pub fn slow_poll(&self) -> Duration {
        Duration::from_millis(self.slow_poll_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for ControlTimings {
    fn default() -> Self {
        Self {
            fast_poll_ms: 500,
            slow_poll_ms: 5000,
            debounce_ms: 500,
            sleep_threshold_secs: 30,
        }
    }
}

/// Whether the exclusive-mode polling workaround is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkaroundMode {
    /// Decide from the OS build number.
    #[default]
    Auto,
    On,
    Off,
}

/// How to detect audio stacks that leak handles under exclusive-mode churn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuirkConfig {
    pub wait_exclusive_workaround: WorkaroundMode,
    /// First OS build considered leaky (inclusive).
    pub leaky_min_build: u32,
    /// Last OS build considered leaky (inclusive); `None` means no upper bound.
    pub leaky_max_build: Option<u32>,
}

impl QuirkConfig {
    /// Resolve the quirk set for the running OS build, if known.
    pub fn resolve(&self, os_build: Option<u32>) -> PlatformQuirks {
        let leaky_wasapi = match self.wait_exclusive_workaround {
            WorkaroundMode::On => true,
            WorkaroundMode::Off => false,
            WorkaroundMode::Auto => os_build.is_some_and(|build| {
                build >= self.leaky_min_build && self.leaky_max_build.map_or(true, |max| build <= max)
            }),
        };
        PlatformQuirks { leaky_wasapi }
    }
}

impl Default for QuirkConfig {
    fn default() -> Self {
        Self {
            wait_exclusive_workaround: WorkaroundMode::Auto,
            leaky_min_build: 22000,
            leaky_max_build: None,
        }
    }
}

/// Platform bugs to work around, computed once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlatformQuirks {
    /// The audio stack leaks handles when a shared stream keeps retrying
    /// against an exclusive-mode owner; poll for the owner instead.
    pub leaky_wasapi: bool,
}

/// Everything a single device session needs besides its stream parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub buffer_ms: u32,
    pub retry: RetryPolicy,
    pub quirks: PlatformQuirks,
    pub mute_policy: MutePolicy,
}

impl SessionSettings {
    pub fn buffer_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.buffer_ms))
    }

    /// Pump wake-up interval: three quarters of the buffer duration.
    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.buffer_ms / 2 + self.buffer_ms / 4))
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            buffer_ms: 1000,
            retry: RetryPolicy::default(),
            quirks: PlatformQuirks::default(),
            mute_policy: MutePolicy::Ignore,
        }
    }
}

/// Top-level keeper configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub device_scope: DeviceScope,
    pub stream: StreamConfig,
    /// Keep remote-desktop virtual endpoints alive too.
    pub allow_remote: bool,
    pub mute_policy: MutePolicy,
    /// Requested stream buffer duration in milliseconds.
    pub buffer_ms: u32,
    pub retry: RetryPolicy,
    pub timings: ControlTimings,
    pub quirks: QuirkConfig,
}

impl KeeperConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.stream.validate()?;
        if !(10..=10_000).contains(&self.buffer_ms) {
            return Err(format!("buffer duration out of range: {} ms", self.buffer_ms));
        }
        if self.retry.stop_timeout_ms == 0 {
            return Err("stop timeout must be positive".into());
        }
        if self.timings.fast_poll_ms == 0 || self.timings.slow_poll_ms == 0 {
            return Err("poll intervals must be positive".into());
        }
        Ok(())
    }

    /// Per-session settings for the given resolved quirks.
    pub fn session_settings(&self, quirks: PlatformQuirks) -> SessionSettings {
        SessionSettings {
            buffer_ms: self.buffer_ms,
            retry: self.retry,
            quirks,
            mute_policy: self.mute_policy,
        }
    }
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            device_scope: DeviceScope::Primary,
            stream: StreamConfig::default(),
            allow_remote: false,
            mute_policy: MutePolicy::Ignore,
            buffer_ms: 1000,
            retry: RetryPolicy::default(),
            timings: ControlTimings::default(),
            quirks: QuirkConfig::default(),
        }
    }
}
