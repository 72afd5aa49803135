use thiserror::Error;

/// Errors reported by the keeper core and by platform backends.
///
/// Platform failures carry the raw status code so that the rendering state
/// machine can log them; classification into recoverable or fatal happens in
/// the session, not here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeeperError {
    /// The endpoint is opened in exclusive mode by another application.
    #[error("device is in exclusive use by another application")]
    DeviceInUse,

    #[error("not found")]
    NotFound,

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("{context} failed: 0x{code:08X}")]
    Platform { context: String, code: u32 },

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(String),

    #[error("rendering thread did not stop in time")]
    StopTimeout,

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl KeeperError {
    /// Shorthand for a failed platform call.
    pub fn platform(context: impl Into<String>, code: u32) -> Self {
        Self::Platform {
            context: context.into(),
            code,
        }
    }

    pub fn is_device_in_use(&self) -> bool {
        matches!(self, Self::DeviceInUse)
    }
}
