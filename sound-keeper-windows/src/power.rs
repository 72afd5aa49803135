//! Idle-sleep prediction from the power manager.

use log::warn;

/// Interprets successive "time until idle sleep" readings.
///
/// Some systems always report 0, which would look like an imminent sleep
/// forever. A zero on the very first reading marks the source as broken
/// for the rest of the process lifetime.
#[derive(Debug, Default)]
pub struct SleepPredictor {
    readings: u64,
    broken: bool,
}

impl SleepPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds until sleep for a raw reading, `None` when unknown.
    pub fn interpret(&mut self, reading: Option<u32>) -> Option<i64> {
        let first = self.readings == 0;
        self.readings += 1;

        if self.broken {
            return None;
        }
        let seconds = reading?;
        if first && seconds == 0 {
            warn!("power information reports no time to sleep, ignoring it");
            self.broken = true;
            return None;
        }
        Some(i64::from(seconds))
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

#[cfg(target_os = "windows")]
pub use self::windows_power::WindowsPowerMonitor;

#[cfg(target_os = "windows")]
mod windows_power {
    use log::debug;
    use windows::Win32::System::Power::{CallNtPowerInformation, SystemPowerInformation};

    use sound_keeper_core::traits::platform::PowerMonitor;

    use super::SleepPredictor;

    /// `SYSTEM_POWER_INFORMATION` as returned by `CallNtPowerInformation`.
    #[repr(C)]
    #[derive(Default)]
    struct PowerInformation {
        max_idleness_allowed: u32,
        idleness: u32,
        time_remaining: u32,
        cooling_mode: u8,
    }

    /// Reads `SystemPowerInformation` on every poll.
    #[derive(Debug, Default)]
    pub struct WindowsPowerMonitor {
        predictor: SleepPredictor,
    }

    impl WindowsPowerMonitor {
        pub fn new() -> Self {
            Self::default()
        }

        fn read_time_remaining() -> Option<u32> {
            let mut info = PowerInformation::default();
            let status = unsafe {
                CallNtPowerInformation(
                    SystemPowerInformation,
                    None,
                    0,
                    Some(&mut info as *mut PowerInformation as *mut _),
                    std::mem::size_of::<PowerInformation>() as u32,
                )
            };
            if status.is_err() {
                debug!("CallNtPowerInformation failed: 0x{:08X}", status.0);
                return None;
            }
            debug!(
                "idleness {}/{}, {} s to sleep",
                info.idleness, info.max_idleness_allowed, info.time_remaining
            );
            Some(info.time_remaining)
        }
    }

    impl PowerMonitor for WindowsPowerMonitor {
        fn seconds_to_sleep(&mut self) -> Option<i64> {
            if self.predictor.is_broken() {
                return None;
            }
            self.predictor.interpret(Self::read_time_remaining())
        }
    }
}
