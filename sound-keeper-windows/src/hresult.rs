//! Mapping of platform status codes onto [`KeeperError`].

use std::time::Duration;

use sound_keeper_core::models::error::KeeperError;

/// The endpoint is held in exclusive mode by another application.
pub const AUDCLNT_E_DEVICE_IN_USE: u32 = 0x8889_000A;
/// The endpoint was removed or disabled while in use.
pub const AUDCLNT_E_DEVICE_INVALIDATED: u32 = 0x8889_0004;
/// `HRESULT_FROM_WIN32(ERROR_NOT_FOUND)`, e.g. no default endpoint.
pub const E_NOTFOUND: u32 = 0x8007_0490;

/// Classify a failed platform call.
pub fn map_code(context: &str, code: u32) -> KeeperError {
    match code {
        AUDCLNT_E_DEVICE_IN_USE => KeeperError::DeviceInUse,
        E_NOTFOUND => KeeperError::NotFound,
        _ => KeeperError::platform(context, code),
    }
}

/// Duration in the 100-nanosecond units used by the audio engine.
pub fn reference_time(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos() / 100).unwrap_or(i64::MAX)
}

#[cfg(target_os = "windows")]
pub(crate) fn platform_error(context: &str) -> impl Fn(windows::core::Error) -> KeeperError + '_ {
    move |err| map_code(context, err.code().0 as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_use_and_missing_device_are_recognised() {
        assert_eq!(map_code("Initialize", AUDCLNT_E_DEVICE_IN_USE), KeeperError::DeviceInUse);
        assert_eq!(map_code("GetDefaultAudioEndpoint", E_NOTFOUND), KeeperError::NotFound);
    }

    #[test]
    fn other_codes_keep_context() {
        let err = map_code("Initialize", AUDCLNT_E_DEVICE_INVALIDATED);
        assert_eq!(err, KeeperError::platform("Initialize", AUDCLNT_E_DEVICE_INVALIDATED));
        assert_eq!(err.to_string(), "Initialize failed: 0x88890004");
    }

    #[test]
    fn buffer_duration_in_reference_time() {
        assert_eq!(reference_time(Duration::from_millis(1000)), 10_000_000);
        assert_eq!(reference_time(Duration::from_millis(20)), 200_000);
        assert_eq!(reference_time(Duration::ZERO), 0);
    }
}
