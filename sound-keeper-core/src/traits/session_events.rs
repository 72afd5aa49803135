use crate::models::audio_models::{AudioSessionState, DisconnectReason};

/// Listener for audio-session notifications.
///
/// All methods are called from platform notification threads, never from the
/// rendering thread. Implementations must not block.
pub trait SessionEvents: Send + Sync {
    /// Called when the session (or, while waiting for an exclusive owner, a
    /// foreign session) changes state.
    fn on_state_changed(&self, state: AudioSessionState);

    /// Called when the platform tears the session down.
    fn on_disconnected(&self, reason: DisconnectReason);

    /// Called when session volume or mute changes.
    fn on_volume_changed(&self, volume: f32, muted: bool);
}
