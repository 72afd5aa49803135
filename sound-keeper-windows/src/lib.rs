//! # sound-keeper-windows
//!
//! Windows WASAPI backend for sound-keeper.
//!
//! Provides:
//! - `MmDeviceEnumerator`: render endpoints and topology notifications via the MMDevice API
//! - `WasapiEndpoint`: one render endpoint (form factor, device format, session enumeration)
//! - `WasapiStreamClient` / `WasapiRenderClient`: shared-mode render stream
//! - `WindowsPowerMonitor`: idle-sleep prediction via `CallNtPowerInformation`
//! - `detect_quirks`: OS build based workaround selection
//!
//! Status-code mapping, power-reading interpretation and quirk resolution
//! are plain Rust and build on every platform.
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use sound_keeper_core::{KeeperConfig, SoundKeeper};
//! use sound_keeper_windows::{detect_quirks, ComGuard, MmDeviceEnumerator, WindowsPowerMonitor};
//!
//! let _com = ComGuard::initialize_mta()?;
//! let config = KeeperConfig::default();
//! let quirks = detect_quirks(&config.quirks);
//! let keeper = SoundKeeper::new(config, quirks, Arc::new(MmDeviceEnumerator::new()?));
//! keeper.run(&mut WindowsPowerMonitor::new());
//! ```

pub mod hresult;
pub mod power;
pub mod quirks;

#[cfg(target_os = "windows")]
pub mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod endpoint;
#[cfg(target_os = "windows")]
pub mod session_events;
#[cfg(target_os = "windows")]
pub mod wasapi_render;

pub use power::SleepPredictor;
pub use quirks::{detect_quirks, os_build_number};

#[cfg(target_os = "windows")]
pub use com::{ComGuard, RenderThreadScope};
#[cfg(target_os = "windows")]
pub use device_enumerator::MmDeviceEnumerator;
#[cfg(target_os = "windows")]
pub use endpoint::WasapiEndpoint;
#[cfg(target_os = "windows")]
pub use power::WindowsPowerMonitor;
#[cfg(target_os = "windows")]
pub use wasapi_render::{WasapiRenderClient, WasapiSessionControl, WasapiStreamClient};
