//! Render endpoint wrapper over `IMMDevice`.

use log::warn;
use windows::core::PROPVARIANT;
use windows::Win32::Devices::FunctionDiscovery::*;
use windows::Win32::Foundation::PROPERTYKEY;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::{CLSCTX_ALL, STGM_READ};
use windows::Win32::System::Variant::VT_BLOB;

use sound_keeper_core::models::audio_models::{DeviceState, FormFactor};
use sound_keeper_core::models::error::KeeperError;
use sound_keeper_core::processing::wave_format::WaveFormat;
use sound_keeper_core::traits::platform::{AudioEndpoint, SessionControl, StreamClient, ThreadScope};

use crate::com::{take_co_string, RenderThreadScope};
use crate::hresult::platform_error;
use crate::wasapi_render::{WasapiSessionControl, WasapiStreamClient};

/// One render endpoint, shared between the enumerator and its session.
pub struct WasapiEndpoint {
    device: IMMDevice,
    id: String,
}

// SAFETY: MMDevice objects are free-threaded and every thread touching them
// joins the multithreaded apartment first.
unsafe impl Send for WasapiEndpoint {}
unsafe impl Sync for WasapiEndpoint {}

impl WasapiEndpoint {
    pub fn new(device: IMMDevice) -> Self {
        let id = match unsafe { device.GetId() } {
            Ok(id) => unsafe { take_co_string(id) },
            Err(err) => {
                warn!("unable to get device id: {}", err);
                String::new()
            }
        };
        Self { device, id }
    }

    fn property(&self, key: &PROPERTYKEY) -> Result<PROPVARIANT, KeeperError> {
        unsafe {
            let store = self
                .device
                .OpenPropertyStore(STGM_READ)
                .map_err(platform_error("OpenPropertyStore"))?;
            store.GetValue(key).map_err(platform_error("IPropertyStore::GetValue"))
        }
    }
}

impl AudioEndpoint for WasapiEndpoint {
    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> Result<DeviceState, KeeperError> {
        let state = unsafe { self.device.GetState() }.map_err(platform_error("IMMDevice::GetState"))?;
        Ok(DeviceState::from_raw(state.0))
    }

    fn form_factor(&self) -> Result<FormFactor, KeeperError> {
        let value = self.property(&PKEY_AudioEndpoint_FormFactor)?;
        let raw = u32::try_from(&value).map_err(platform_error("PropVariantToUInt32"))?;
        Ok(FormFactor::from_raw(raw))
    }

    fn device_format(&self) -> Option<WaveFormat> {
        let value = match self.property(&PKEY_AudioEngine_DeviceFormat) {
            Ok(value) => value,
            Err(err) => {
                warn!("unable to read device format of '{}': {}", self.id, err);
                return None;
            }
        };
        let raw = value.as_raw();
        unsafe {
            if raw.Anonymous.Anonymous.vt != VT_BLOB.0 {
                return None;
            }
            let blob = &raw.Anonymous.Anonymous.Anonymous.blob;
            if blob.pBlobData.is_null() {
                return None;
            }
            let bytes = std::slice::from_raw_parts(blob.pBlobData, blob.cbSize as usize);
            WaveFormat::from_bytes(bytes).ok()
        }
    }

    fn enter_render_thread(&self) -> Result<ThreadScope, KeeperError> {
        Ok(Box::new(RenderThreadScope::enter()?))
    }

    fn activate_client(&self) -> Result<Box<dyn StreamClient>, KeeperError> {
        let client: IAudioClient =
            unsafe { self.device.Activate(CLSCTX_ALL, None) }.map_err(platform_error("IMMDevice::Activate"))?;
        Ok(Box::new(WasapiStreamClient::new(client)))
    }

    fn audio_sessions(&self) -> Result<Vec<Box<dyn SessionControl>>, KeeperError> {
        unsafe {
            let manager: IAudioSessionManager2 = self
                .device
                .Activate(CLSCTX_ALL, None)
                .map_err(platform_error("Activate(IAudioSessionManager2)"))?;
            let sessions = manager
                .GetSessionEnumerator()
                .map_err(platform_error("GetSessionEnumerator"))?;
            let count = sessions.GetCount().map_err(platform_error("IAudioSessionEnumerator::GetCount"))?;

            let mut controls: Vec<Box<dyn SessionControl>> = Vec::new();
            for index in 0..count {
                let control = sessions
                    .GetSession(index)
                    .map_err(platform_error("IAudioSessionEnumerator::GetSession"))?;
                controls.push(Box::new(WasapiSessionControl::new(control)));
            }
            Ok(controls)
        }
    }
}
