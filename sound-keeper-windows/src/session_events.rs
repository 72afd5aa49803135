//! COM bridges forwarding audio notifications to core listeners.

use std::sync::Arc;

use log::trace;
use windows::core::{implement, Result, GUID, PCWSTR};
use windows::Win32::Foundation::PROPERTYKEY;
use windows::Win32::Media::Audio::{
    AudioSessionDisconnectReason, AudioSessionState, EDataFlow, ERole, IAudioSessionEvents, IAudioSessionEvents_Impl,
    IMMNotificationClient, IMMNotificationClient_Impl, DEVICE_STATE,
};
use windows_core::BOOL;

use sound_keeper_core::models::audio_models::{
    AudioSessionState as SessionState, DataFlow, DeviceRole, DeviceState, DisconnectReason, TopologyEvent,
};
use sound_keeper_core::traits::platform::TopologyCallback;
use sound_keeper_core::traits::session_events::SessionEvents;

/// `IAudioSessionEvents` implementation owned by one registration.
#[implement(IAudioSessionEvents)]
pub struct SessionEventsBridge {
    events: Arc<dyn SessionEvents>,
}

impl SessionEventsBridge {
    pub fn new(events: Arc<dyn SessionEvents>) -> IAudioSessionEvents {
        Self { events }.into()
    }
}

impl IAudioSessionEvents_Impl for SessionEventsBridge_Impl {
    fn OnDisplayNameChanged(&self, _name: &PCWSTR, _context: *const GUID) -> Result<()> {
        Ok(())
    }

    fn OnIconPathChanged(&self, _path: &PCWSTR, _context: *const GUID) -> Result<()> {
        Ok(())
    }

    fn OnSimpleVolumeChanged(&self, volume: f32, mute: BOOL, _context: *const GUID) -> Result<()> {
        self.events.on_volume_changed(volume, mute.as_bool());
        Ok(())
    }

    fn OnChannelVolumeChanged(
        &self,
        _channel_count: u32,
        _volumes: *const f32,
        _changed_channel: u32,
        _context: *const GUID,
    ) -> Result<()> {
        Ok(())
    }

    fn OnGroupingParamChanged(&self, _grouping: *const GUID, _context: *const GUID) -> Result<()> {
        Ok(())
    }

    fn OnStateChanged(&self, state: AudioSessionState) -> Result<()> {
        self.events.on_state_changed(SessionState::from_raw(state.0));
        Ok(())
    }

    fn OnSessionDisconnected(&self, reason: AudioSessionDisconnectReason) -> Result<()> {
        self.events.on_disconnected(DisconnectReason::from_raw(reason.0));
        Ok(())
    }
}

/// `IMMNotificationClient` implementation feeding topology events to a callback.
#[implement(IMMNotificationClient)]
pub struct TopologyBridge {
    callback: TopologyCallback,
}

impl TopologyBridge {
    pub fn new(callback: TopologyCallback) -> IMMNotificationClient {
        Self { callback }.into()
    }

    fn emit(&self, event: TopologyEvent) {
        trace!("topology event {:?}", event);
        (self.callback)(event);
    }
}

fn device_id(id: &PCWSTR) -> Option<String> {
    if id.is_null() {
        return None;
    }
    unsafe { id.to_string() }.ok()
}

impl IMMNotificationClient_Impl for TopologyBridge_Impl {
    fn OnDeviceStateChanged(&self, id: &PCWSTR, state: DEVICE_STATE) -> Result<()> {
        self.emit(TopologyEvent::DeviceStateChanged {
            device_id: device_id(id).unwrap_or_default(),
            state: DeviceState::from_raw(state.0),
        });
        Ok(())
    }

    fn OnDeviceAdded(&self, id: &PCWSTR) -> Result<()> {
        self.emit(TopologyEvent::DeviceAdded {
            device_id: device_id(id).unwrap_or_default(),
        });
        Ok(())
    }

    fn OnDeviceRemoved(&self, id: &PCWSTR) -> Result<()> {
        self.emit(TopologyEvent::DeviceRemoved {
            device_id: device_id(id).unwrap_or_default(),
        });
        Ok(())
    }

    fn OnDefaultDeviceChanged(&self, flow: EDataFlow, role: ERole, id: &PCWSTR) -> Result<()> {
        self.emit(TopologyEvent::DefaultDeviceChanged {
            flow: DataFlow::from_raw(flow.0),
            role: DeviceRole::from_raw(role.0),
            device_id: device_id(id),
        });
        Ok(())
    }

    fn OnPropertyValueChanged(&self, _id: &PCWSTR, _key: &PROPERTYKEY) -> Result<()> {
        Ok(())
    }
}
