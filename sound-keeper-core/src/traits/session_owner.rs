/// Requests a device session can raise against whoever owns it.
///
/// All requests are fire-and-forget and may be raised from any thread.
pub trait SessionOwner: Send + Sync {
    /// Some session failed to start; try again later.
    fn request_retry(&self);

    /// A session became unrecoverable; rebuild the whole device topology.
    fn request_restart(&self);

    /// Stop keeping devices awake and leave the control loop.
    fn request_shutdown(&self);
}
