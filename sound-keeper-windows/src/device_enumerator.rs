//! Render endpoint enumeration and topology notifications via the MMDevice API.

use std::sync::Arc;

use log::{debug, warn};
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use sound_keeper_core::models::error::KeeperError;
use sound_keeper_core::traits::platform::{AudioEndpoint, DeviceEnumerator, NotificationRegistration, TopologyCallback};

use crate::endpoint::WasapiEndpoint;
use crate::hresult::platform_error;
use crate::session_events::TopologyBridge;

/// Audio device enumerator using the Windows MMDevice API.
pub struct MmDeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

// SAFETY: the enumerator is free-threaded; all callers live in the MTA.
unsafe impl Send for MmDeviceEnumerator {}
unsafe impl Sync for MmDeviceEnumerator {}

impl MmDeviceEnumerator {
    /// Create a new device enumerator.
    ///
    /// Requires COM to be initialized on the calling thread.
    pub fn new() -> Result<Self, KeeperError> {
        let enumerator: IMMDeviceEnumerator = unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
            .map_err(platform_error("CoCreateInstance(MMDeviceEnumerator)"))?;
        Ok(Self { enumerator })
    }
}

impl DeviceEnumerator for MmDeviceEnumerator {
    fn default_render_endpoint(&self) -> Result<Option<Arc<dyn AudioEndpoint>>, KeeperError> {
        match unsafe { self.enumerator.GetDefaultAudioEndpoint(eRender, eConsole) }
            .map_err(platform_error("GetDefaultAudioEndpoint"))
        {
            Ok(device) => {
                let endpoint = WasapiEndpoint::new(device);
                debug!("default render device '{}'", endpoint.id());
                Ok(Some(Arc::new(endpoint)))
            }
            Err(KeeperError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn active_render_endpoints(&self) -> Result<Vec<Arc<dyn AudioEndpoint>>, KeeperError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(eRender, DEVICE_STATE_ACTIVE)
                .map_err(platform_error("EnumAudioEndpoints"))?;
            let count = collection.GetCount().map_err(platform_error("IMMDeviceCollection::GetCount"))?;

            let mut endpoints: Vec<Arc<dyn AudioEndpoint>> = Vec::new();
            for index in 0..count {
                match collection.Item(index) {
                    Ok(device) => endpoints.push(Arc::new(WasapiEndpoint::new(device))),
                    Err(err) => warn!("unable to get render device #{}: {}", index, err),
                }
            }
            debug!("{} active render device(s)", endpoints.len());
            Ok(endpoints)
        }
    }

    fn register_topology_listener(&self, callback: TopologyCallback) -> Result<NotificationRegistration, KeeperError> {
        let bridge = TopologyBridge::new(callback);
        unsafe { self.enumerator.RegisterEndpointNotificationCallback(&bridge) }
            .map_err(platform_error("RegisterEndpointNotificationCallback"))?;

        let enumerator = self.enumerator.clone();
        Ok(NotificationRegistration::new(move || {
            if let Err(err) = unsafe { enumerator.UnregisterEndpointNotificationCallback(&bridge) } {
                warn!("UnregisterEndpointNotificationCallback failed: {}", err);
            }
        }))
    }
}
