use std::time::{Duration, Instant};

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::traits::session_owner::SessionOwner;

/// Control requests delivered to the keeper's run loop, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlSignal {
    Retry,
    Restart,
    Shutdown,
    Stop,
}

impl ControlSignal {
    const ALL: [ControlSignal; 4] = [Self::Retry, Self::Restart, Self::Shutdown, Self::Stop];

    fn index(self) -> usize {
        self as usize
    }
}

/// Auto-resetting flags the run loop waits on.
///
/// Raising a signal that is already pending is a no-op; waiting consumes
/// exactly one signal.
#[derive(Debug, Default)]
pub struct KeeperSignals {
    pending: Mutex<[bool; 4]>,
    raised: Condvar,
}

impl KeeperSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, signal: ControlSignal) {
        debug!("control signal {:?}", signal);
        self.pending.lock()[signal.index()] = true;
        self.raised.notify_all();
    }

    /// Ask the run loop to stop keeping devices awake and return.
    pub fn request_stop(&self) {
        self.raise(ControlSignal::Stop);
    }

    pub fn is_pending(&self, signal: ControlSignal) -> bool {
        self.pending.lock()[signal.index()]
    }

    /// Wait up to `timeout` for any signal and consume the most urgent one.
    pub fn wait_any(&self, timeout: Duration) -> Option<ControlSignal> {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        loop {
            if let Some(signal) = ControlSignal::ALL.into_iter().find(|signal| pending[signal.index()]) {
                pending[signal.index()] = false;
                return Some(signal);
            }
            if self.raised.wait_until(&mut pending, deadline).timed_out() {
                return None;
            }
        }
    }

    /// Wait up to `timeout` for `signal` alone and consume it.
    pub fn wait_one(&self, signal: ControlSignal, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while !pending[signal.index()] {
            if self.raised.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut pending[signal.index()], false)
    }
}

impl SessionOwner for KeeperSignals {
    fn request_retry(&self) {
        self.raise(ControlSignal::Retry);
    }

    fn request_restart(&self) {
        self.raise(ControlSignal::Restart);
    }

    fn request_shutdown(&self) {
        self.raise(ControlSignal::Shutdown);
    }
}
