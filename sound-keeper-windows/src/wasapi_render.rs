//! Shared-mode WASAPI render stream.
//!
//! One `WasapiStreamClient` per render attempt, confined to the rendering
//! thread that created it. Mirrors the engine calls one to one:
//!
//! 1. `GetMixFormat`
//! 2. `Initialize` (shared, `NOPERSIST | AUTOCONVERTPCM`)
//! 3. `GetBufferSize`, `GetService` (render client, session control)
//! 4. `Start`, then `GetCurrentPadding` / `GetBuffer` / `ReleaseBuffer` per tick
//! 5. `Stop`

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::CoTaskMemFree;

use sound_keeper_core::models::audio_models::AudioSessionState as SessionState;
use sound_keeper_core::models::error::KeeperError;
use sound_keeper_core::processing::signal_generator::BufferFill;
use sound_keeper_core::processing::wave_format::WaveFormat;
use sound_keeper_core::traits::platform::{NotificationRegistration, RenderClient, SessionControl, StreamClient};
use sound_keeper_core::traits::session_events::SessionEvents;

use crate::hresult::{platform_error, reference_time};
use crate::session_events::SessionEventsBridge;

/// Size in bytes of the `WAVEFORMATEX` header before its extension.
const WAVEFORMATEX_SIZE: usize = 18;

/// Copy an engine-allocated `WAVEFORMATEX` (with extension) and free it.
///
/// # Safety
/// `format` must be a valid `CoTaskMemAlloc`ed format block.
pub(crate) unsafe fn take_wave_format(format: *mut WAVEFORMATEX) -> Result<WaveFormat, KeeperError> {
    if format.is_null() {
        return Err(KeeperError::UnsupportedFormat("null format".into()));
    }
    let extension = usize::from(std::ptr::addr_of!((*format).cbSize).read_unaligned());
    let bytes = std::slice::from_raw_parts(format as *const u8, WAVEFORMATEX_SIZE + extension).to_vec();
    CoTaskMemFree(Some(format as *const _));
    WaveFormat::from_bytes(&bytes)
}

pub struct WasapiStreamClient {
    client: IAudioClient,
    /// Frame stride of the initialised stream.
    block_align: Option<usize>,
}

impl WasapiStreamClient {
    pub(crate) fn new(client: IAudioClient) -> Self {
        Self {
            client,
            block_align: None,
        }
    }
}

impl StreamClient for WasapiStreamClient {
    fn mix_format(&self) -> Result<WaveFormat, KeeperError> {
        unsafe {
            let format = self.client.GetMixFormat().map_err(platform_error("GetMixFormat"))?;
            take_wave_format(format)
        }
    }

    fn initialize(&mut self, format: &WaveFormat, buffer_duration: Duration) -> Result<(), KeeperError> {
        debug!("initializing shared stream for {}", format.mix_format());
        unsafe {
            self.client
                .Initialize(
                    AUDCLNT_SHAREMODE_SHARED,
                    AUDCLNT_STREAMFLAGS_NOPERSIST | AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM,
                    reference_time(buffer_duration),
                    0,
                    format.as_bytes().as_ptr() as *const WAVEFORMATEX,
                    None,
                )
                .map_err(platform_error("IAudioClient::Initialize"))?;
        }
        self.block_align = Some(usize::from(format.block_align()));
        Ok(())
    }

    fn buffer_frames(&self) -> Result<u32, KeeperError> {
        unsafe { self.client.GetBufferSize() }.map_err(platform_error("GetBufferSize"))
    }

    fn current_padding(&self) -> Result<u32, KeeperError> {
        unsafe { self.client.GetCurrentPadding() }.map_err(platform_error("GetCurrentPadding"))
    }

    fn render_client(&self) -> Result<Box<dyn RenderClient>, KeeperError> {
        let block_align = self
            .block_align
            .ok_or_else(|| KeeperError::ConfigurationFailed("render client requested before Initialize".into()))?;
        let render: IAudioRenderClient =
            unsafe { self.client.GetService() }.map_err(platform_error("GetService(IAudioRenderClient)"))?;
        Ok(Box::new(WasapiRenderClient { render, block_align }))
    }

    fn session_control(&self) -> Result<Box<dyn SessionControl>, KeeperError> {
        let control: IAudioSessionControl =
            unsafe { self.client.GetService() }.map_err(platform_error("GetService(IAudioSessionControl)"))?;
        Ok(Box::new(WasapiSessionControl::new(control)))
    }

    fn start(&mut self) -> Result<(), KeeperError> {
        unsafe { self.client.Start() }.map_err(platform_error("IAudioClient::Start"))
    }

    fn stop(&mut self) -> Result<(), KeeperError> {
        unsafe { self.client.Stop() }.map_err(platform_error("IAudioClient::Stop"))
    }
}

pub struct WasapiRenderClient {
    render: IAudioRenderClient,
    block_align: usize,
}

impl RenderClient for WasapiRenderClient {
    fn write(
        &mut self,
        frames: u32,
        fill: &mut dyn FnMut(&mut [u8]) -> BufferFill,
    ) -> Result<BufferFill, KeeperError> {
        unsafe {
            let data = self.render.GetBuffer(frames).map_err(platform_error("GetBuffer"))?;
            let result = if data.is_null() {
                BufferFill::Silent
            } else {
                fill(std::slice::from_raw_parts_mut(data, frames as usize * self.block_align))
            };
            let flags = match result {
                BufferFill::Silent => AUDCLNT_BUFFERFLAGS_SILENT.0 as u32,
                BufferFill::Written => 0,
            };
            self.render
                .ReleaseBuffer(frames, flags)
                .map_err(platform_error("ReleaseBuffer"))?;
            Ok(result)
        }
    }
}

/// Control interface of one audio session on an endpoint.
pub struct WasapiSessionControl {
    control: IAudioSessionControl,
}

impl WasapiSessionControl {
    pub(crate) fn new(control: IAudioSessionControl) -> Self {
        Self { control }
    }
}

impl SessionControl for WasapiSessionControl {
    fn state(&self) -> Result<SessionState, KeeperError> {
        let state = unsafe { self.control.GetState() }.map_err(platform_error("IAudioSessionControl::GetState"))?;
        Ok(SessionState::from_raw(state.0))
    }

    fn register(&self, events: Arc<dyn SessionEvents>) -> Result<NotificationRegistration, KeeperError> {
        let bridge = SessionEventsBridge::new(events);
        unsafe { self.control.RegisterAudioSessionNotification(&bridge) }
            .map_err(platform_error("RegisterAudioSessionNotification"))?;

        let control = self.control.clone();
        Ok(NotificationRegistration::new(move || {
            if let Err(err) = unsafe { control.UnregisterAudioSessionNotification(&bridge) } {
                log::warn!("UnregisterAudioSessionNotification failed: {}", err);
            }
        }))
    }
}
