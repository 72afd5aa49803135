//! Per-thread COM apartment and MMCSS scheduling guards.

use log::{debug, warn};
use windows::core::{HSTRING, PWSTR};
use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::Com::{CoInitializeEx, CoTaskMemFree, CoUninitialize, COINIT_MULTITHREADED};
use windows::Win32::System::Threading::{AvRevertMmThreadCharacteristics, AvSetMmThreadCharacteristicsW};

use sound_keeper_core::models::error::KeeperError;

/// Joins the calling thread to the multithreaded apartment until dropped.
pub struct ComGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ComGuard {
    pub fn initialize_mta() -> Result<Self, KeeperError> {
        unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }
            .ok()
            .map_err(|err| KeeperError::platform("CoInitializeEx", err.code().0 as u32))?;
        Ok(Self {
            _not_send: std::marker::PhantomData,
        })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        unsafe { CoUninitialize() };
    }
}

/// Multimedia class scheduling registration, reverted on drop.
pub struct MmcssGuard(HANDLE);

impl MmcssGuard {
    /// Best effort: `None` when the thread stays at normal priority.
    pub fn register(task: &str) -> Option<Self> {
        let mut task_index = 0u32;
        let name = HSTRING::from(task);
        match unsafe { AvSetMmThreadCharacteristicsW(&name, &mut task_index) } {
            Ok(handle) => {
                debug!("registered with MMCSS task '{}' #{}", task, task_index);
                Some(Self(handle))
            }
            Err(err) => {
                warn!("unable to register with MMCSS task '{}': {}", task, err);
                None
            }
        }
    }
}

impl Drop for MmcssGuard {
    fn drop(&mut self) {
        let _ = unsafe { AvRevertMmThreadCharacteristics(self.0) };
    }
}

/// Held by a rendering thread for its lifetime. MMCSS is reverted before
/// COM is released.
pub struct RenderThreadScope {
    _mmcss: Option<MmcssGuard>,
    _com: ComGuard,
}

impl RenderThreadScope {
    pub fn enter() -> Result<Self, KeeperError> {
        let com = ComGuard::initialize_mta()?;
        Ok(Self {
            _mmcss: MmcssGuard::register("Audio"),
            _com: com,
        })
    }
}

/// Copy and free a COM-allocated wide string.
///
/// # Safety
/// `text` must be null or a `CoTaskMemAlloc`ed, nul-terminated string that
/// is not used afterwards.
pub unsafe fn take_co_string(text: PWSTR) -> String {
    if text.is_null() {
        return String::new();
    }
    let value = text.to_string().unwrap_or_default();
    CoTaskMemFree(Some(text.0 as *const _));
    value
}
