//! # sound-keeper-core
//!
//! Platform-agnostic core of the sound keeper: keeps audio render endpoints
//! from powering down by playing an inaudible (or configurable) signal into
//! them.
//!
//! Platform backends (Windows WASAPI) implement the traits in [`traits`] and
//! hand a [`DeviceEnumerator`] to the [`SoundKeeper`] orchestrator.
//!
//! ## Architecture
//!
//! ```text
//! sound-keeper-core (this crate)
//! ├── traits/       ← AudioEndpoint, StreamClient, RenderClient, SessionControl, SessionEvents, ...
//! ├── models/       ← KeeperError, RenderingMode, KeeperConfig, StreamConfig, mode strings
//! ├── processing/   ← SignalGenerator, noise filters, periodic envelope, wave-format parsing
//! └── session/      ← DeviceSession (per-endpoint render thread), SoundKeeper (orchestrator)
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

#[cfg(test)]
mod testing;

// Re-export key types at crate root for convenience.
pub use models::audio_models::{
    AudioSessionState, DataFlow, DeviceRole, DeviceState, DisconnectReason, FormFactor, KeeperStatus,
    SessionDiagnostics, SessionStatus, TopologyEvent,
};
pub use models::config::{
    DeviceScope, KeeperConfig, MutePolicy, PlatformQuirks, QuirkConfig, StreamConfig, StreamKind, WorkaroundMode,
};
pub use models::error::KeeperError;
pub use models::mode_string::apply_mode_string;
pub use models::state::RenderingMode;
pub use processing::signal_generator::SignalGenerator;
pub use processing::wave_format::{MixFormat, SampleEncoding, WaveFormat};
pub use session::device_session::DeviceSession;
pub use session::keeper::SoundKeeper;
pub use session::signals::{ControlSignal, KeeperSignals};
pub use traits::platform::{
    AudioEndpoint, DeviceEnumerator, NotificationRegistration, PowerMonitor, RenderClient, SessionControl,
    StreamClient, ThreadScope, TopologyCallback,
};
pub use traits::session_events::SessionEvents;
pub use traits::session_owner::SessionOwner;
