use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use crate::models::audio_models::{AudioSessionState, DeviceState, FormFactor, TopologyEvent};
use crate::models::error::KeeperError;
use crate::processing::signal_generator::BufferFill;
use crate::processing::wave_format::WaveFormat;
use crate::traits::session_events::SessionEvents;

/// Callback invoked for every endpoint topology change.
///
/// Fires on a platform notification thread; implementations must only
/// record the event and return.
pub type TopologyCallback = Arc<dyn Fn(TopologyEvent) + Send + Sync + 'static>;

/// Per-thread platform state held for the lifetime of a rendering thread
/// (apartment initialisation, scheduler class). Dropped on the same thread.
pub type ThreadScope = Box<dyn Any>;

/// A render endpoint device.
///
/// Implemented by:
/// - `WasapiEndpoint` (Windows)
/// - the scripted endpoint in the core test harness
pub trait AudioEndpoint: Send + Sync {
    /// Stable platform identifier of the endpoint.
    fn id(&self) -> &str;

    fn state(&self) -> Result<DeviceState, KeeperError>;

    fn form_factor(&self) -> Result<FormFactor, KeeperError>;

    /// Format the device finally converts to, when the platform reports one.
    fn device_format(&self) -> Option<WaveFormat>;

    /// Prepare the calling thread for rendering. The returned scope must be
    /// dropped on the same thread before it exits.
    fn enter_render_thread(&self) -> Result<ThreadScope, KeeperError>;

    /// Create a new, uninitialised shared-mode stream client.
    fn activate_client(&self) -> Result<Box<dyn StreamClient>, KeeperError>;

    /// Audio sessions currently open on this endpoint by any process.
    fn audio_sessions(&self) -> Result<Vec<Box<dyn SessionControl>>, KeeperError>;
}

/// A shared-mode output stream, used only on the rendering thread.
pub trait StreamClient {
    fn mix_format(&self) -> Result<WaveFormat, KeeperError>;

    /// Initialise in shared mode with PCM auto-conversion and no persisted
    /// session settings. Returns [`KeeperError::DeviceInUse`] when another
    /// application holds the endpoint exclusively.
    fn initialize(&mut self, format: &WaveFormat, buffer_duration: Duration) -> Result<(), KeeperError>;

    /// Size of the engine buffer in frames.
    fn buffer_frames(&self) -> Result<u32, KeeperError>;

    /// Frames queued and not yet played.
    fn current_padding(&self) -> Result<u32, KeeperError>;

    fn render_client(&self) -> Result<Box<dyn RenderClient>, KeeperError>;

    fn session_control(&self) -> Result<Box<dyn SessionControl>, KeeperError>;

    fn start(&mut self) -> Result<(), KeeperError>;

    fn stop(&mut self) -> Result<(), KeeperError>;
}

/// Buffer submission for an initialised stream.
pub trait RenderClient {
    /// Acquire `frames` frames of engine buffer, let `fill` write them and
    /// release the buffer, flagged silent if `fill` says so.
    fn write(
        &mut self,
        frames: u32,
        fill: &mut dyn FnMut(&mut [u8]) -> BufferFill,
    ) -> Result<BufferFill, KeeperError>;
}

/// Control interface of one audio session on an endpoint.
pub trait SessionControl {
    fn state(&self) -> Result<AudioSessionState, KeeperError>;

    /// Subscribe `events` to this session until the registration is dropped.
    fn register(&self, events: Arc<dyn SessionEvents>) -> Result<NotificationRegistration, KeeperError>;
}

/// Enumerates render endpoints and reports topology changes.
pub trait DeviceEnumerator: Send + Sync {
    /// The default console render endpoint, `None` when there is none.
    fn default_render_endpoint(&self) -> Result<Option<Arc<dyn AudioEndpoint>>, KeeperError>;

    fn active_render_endpoints(&self) -> Result<Vec<Arc<dyn AudioEndpoint>>, KeeperError>;

    fn register_topology_listener(&self, callback: TopologyCallback) -> Result<NotificationRegistration, KeeperError>;
}

/// Source of the system idle-sleep prediction.
pub trait PowerMonitor {
    /// Seconds until the system goes to sleep, `None` when unknown.
    fn seconds_to_sleep(&mut self) -> Option<i64>;
}

/// Keeps a platform notification subscription alive; unsubscribes on drop.
#[must_use = "dropping the registration unsubscribes immediately"]
pub struct NotificationRegistration {
    release: Option<Box<dyn FnOnce()>>,
}

impl NotificationRegistration {
    pub fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A registration that has nothing to release.
    pub fn empty() -> Self {
        Self { release: None }
    }
}

impl Drop for NotificationRegistration {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for NotificationRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRegistration")
            .field("active", &self.release.is_some())
            .finish()
    }
}
