//! Detection of audio stack bugs by OS build number.

use log::info;

use sound_keeper_core::models::config::{PlatformQuirks, QuirkConfig};

/// Resolve the quirks for the running system once, at startup.
pub fn detect_quirks(config: &QuirkConfig) -> PlatformQuirks {
    let build = os_build_number();
    let quirks = config.resolve(build);
    info!("os build {:?}, {:?}", build, quirks);
    quirks
}

#[cfg(target_os = "windows")]
pub fn os_build_number() -> Option<u32> {
    use windows::Wdk::System::SystemServices::RtlGetVersion;
    use windows::Win32::System::SystemInformation::OSVERSIONINFOW;

    let mut version = OSVERSIONINFOW {
        dwOSVersionInfoSize: std::mem::size_of::<OSVERSIONINFOW>() as u32,
        ..Default::default()
    };
    let status = unsafe { RtlGetVersion(&mut version) };
    if status.is_err() {
        log::warn!("RtlGetVersion failed: 0x{:08X}", status.0);
        return None;
    }
    Some(version.dwBuildNumber)
}

#[cfg(not(target_os = "windows"))]
pub fn os_build_number() -> Option<u32> {
    None
}
