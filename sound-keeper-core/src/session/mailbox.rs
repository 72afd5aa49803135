use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::state::RenderingMode;

/// Single-slot "next mode" request with an auto-resetting wake-up.
///
/// Requests do not queue: several posts before the rendering thread wakes
/// collapse into the last one. A pending terminal request (`Stop`,
/// `Invalid`) is never replaced by a non-terminal one, so a stop cannot be
/// lost to a late session event.
#[derive(Debug, Default)]
pub struct ModeMailbox {
    slot: Mutex<Option<RenderingMode>>,
    wake: Condvar,
}

impl ModeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, mode: RenderingMode) {
        let mut slot = self.slot.lock();
        if let Some(pending) = *slot {
            if pending.is_terminal() && !mode.is_terminal() {
                return;
            }
        }
        *slot = Some(mode);
        self.wake.notify_all();
    }

    /// Consume a pending request without waiting.
    pub fn take(&self) -> Option<RenderingMode> {
        self.slot.lock().take()
    }

    /// Wait up to `timeout` for a request and consume it. `None` on timeout.
    pub fn wait(&self, timeout: Duration) -> Option<RenderingMode> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while slot.is_none() {
            if self.wake.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.take()
    }

    /// Wait without a timeout and consume the request.
    pub fn wait_forever(&self) -> RenderingMode {
        let mut slot = self.slot.lock();
        loop {
            if let Some(mode) = slot.take() {
                return mode;
            }
            self.wake.wait(&mut slot);
        }
    }

    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}
