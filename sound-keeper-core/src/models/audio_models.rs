use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Endpoint category reported by the platform (`EndpointFormFactor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormFactor {
    RemoteNetworkDevice,
    Speakers,
    LineLevel,
    Headphones,
    Microphone,
    Headset,
    Handset,
    UnknownDigitalPassthrough,
    Spdif,
    /// HDMI and DisplayPort sinks.
    DigitalAudioDisplayDevice,
    Unknown,
}

impl FormFactor {
    pub fn from_raw(value: u32) -> Self {
        match value {
            0 => Self::RemoteNetworkDevice,
            1 => Self::Speakers,
            2 => Self::LineLevel,
            3 => Self::Headphones,
            4 => Self::Microphone,
            5 => Self::Headset,
            6 => Self::Handset,
            7 => Self::UnknownDigitalPassthrough,
            8 => Self::Spdif,
            9 => Self::DigitalAudioDisplayDevice,
            _ => Self::Unknown,
        }
    }

    /// SPDIF and HDMI receivers are the ones that drop their link on silence.
    pub fn is_digital(self) -> bool {
        matches!(self, Self::Spdif | Self::DigitalAudioDisplayDevice)
    }

    pub fn is_remote(self) -> bool {
        matches!(self, Self::RemoteNetworkDevice)
    }
}

/// Endpoint device state (`DEVICE_STATE_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceState {
    Active,
    Disabled,
    NotPresent,
    Unplugged,
    Unknown,
}

impl DeviceState {
    pub fn from_raw(value: u32) -> Self {
        match value {
            0x1 => Self::Active,
            0x2 => Self::Disabled,
            0x4 => Self::NotPresent,
            0x8 => Self::Unplugged,
            _ => Self::Unknown,
        }
    }
}

/// State of an audio session on an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioSessionState {
    Inactive,
    Active,
    Expired,
}

impl AudioSessionState {
    pub fn from_raw(value: i32) -> Self {
        match value {
            1 => Self::Active,
            2 => Self::Expired,
            _ => Self::Inactive,
        }
    }
}

/// Why the platform disconnected an audio session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    DeviceRemoval,
    ServerShutdown,
    FormatChanged,
    SessionLogoff,
    SessionDisconnected,
    ExclusiveModeOverride,
}

impl DisconnectReason {
    pub fn from_raw(value: i32) -> Self {
        match value {
            0 => Self::DeviceRemoval,
            1 => Self::ServerShutdown,
            2 => Self::FormatChanged,
            3 => Self::SessionLogoff,
            5 => Self::ExclusiveModeOverride,
            _ => Self::SessionDisconnected,
        }
    }
}

/// Direction of an endpoint (`EDataFlow`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFlow {
    Render,
    Capture,
    All,
}

impl DataFlow {
    pub fn from_raw(value: i32) -> Self {
        match value {
            0 => Self::Render,
            1 => Self::Capture,
            _ => Self::All,
        }
    }
}

/// Role a default endpoint is assigned to (`ERole`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    Console,
    Multimedia,
    Communications,
}

impl DeviceRole {
    pub fn from_raw(value: i32) -> Self {
        match value {
            0 => Self::Console,
            1 => Self::Multimedia,
            _ => Self::Communications,
        }
    }
}

/// Endpoint topology change delivered by the platform device enumerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    DefaultDeviceChanged {
        flow: DataFlow,
        role: DeviceRole,
        device_id: Option<String>,
    },
    DeviceAdded {
        device_id: String,
    },
    DeviceRemoved {
        device_id: String,
    },
    DeviceStateChanged {
        device_id: String,
        state: DeviceState,
    },
}

/// Counters and timestamps collected by a device session for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionDiagnostics {
    pub render_attempts: u64,
    pub buffers_submitted: u64,
    pub frames_submitted: u64,
    pub silent_buffers: u64,
    pub skipped_ticks: u64,
    pub mix_format: String,
    pub last_playback_started: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Snapshot of one device session, as reported by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub device_id: Option<String>,
    pub is_started: bool,
    pub is_valid: bool,
    pub diagnostics: SessionDiagnostics,
}

/// Snapshot of the orchestrator and all of its sessions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeeperStatus {
    pub is_started: bool,
    pub is_retry_required: bool,
    pub sessions: Vec<SessionStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_change_roles() {
        assert_eq!(DataFlow::from_raw(0), DataFlow::Render);
        assert_eq!(DeviceRole::from_raw(0), DeviceRole::Console);
        assert_eq!(DeviceRole::from_raw(2), DeviceRole::Communications);
    }

    #[test]
    fn digital_form_factors() {
        assert!(FormFactor::from_raw(8).is_digital());
        assert!(FormFactor::from_raw(9).is_digital());
        assert!(!FormFactor::from_raw(1).is_digital());
        assert!(!FormFactor::from_raw(7).is_digital());
        assert!(FormFactor::from_raw(0).is_remote());
        assert_eq!(FormFactor::from_raw(42), FormFactor::Unknown);
    }

    #[test]
    fn disconnect_reasons_from_raw() {
        assert_eq!(DisconnectReason::from_raw(2), DisconnectReason::FormatChanged);
        assert_eq!(DisconnectReason::from_raw(5), DisconnectReason::ExclusiveModeOverride);
        assert_eq!(DisconnectReason::from_raw(0), DisconnectReason::DeviceRemoval);
    }

    #[test]
    fn device_and_session_states_from_raw() {
        assert_eq!(DeviceState::from_raw(1), DeviceState::Active);
        assert_eq!(DeviceState::from_raw(8), DeviceState::Unplugged);
        assert_eq!(AudioSessionState::from_raw(1), AudioSessionState::Active);
        assert_eq!(AudioSessionState::from_raw(0), AudioSessionState::Inactive);
    }
}
