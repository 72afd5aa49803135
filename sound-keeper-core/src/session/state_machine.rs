use std::time::Duration;

use log::{debug, info};

use crate::models::config::{PlatformQuirks, RetryPolicy};
use crate::models::state::{AtomicMode, RenderingMode};

/// Attempt counters carried across iterations of the outer loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Render entries since playback last reached the steady state.
    pub play_attempts: u32,
    /// Consecutive polls that found no active foreign session.
    pub wait_attempts: u32,
}

/// The mode handlers the outer loop dispatches to.
pub trait ModeDriver {
    /// Open a stream, pump it until interrupted and report the next mode.
    /// Must bump `play_attempts` on entry and zero it once playback runs.
    fn render(&mut self, counters: &mut Counters) -> RenderingMode;

    /// Look for the session holding the endpoint exclusively and wait for it.
    fn wait_exclusive(&mut self, counters: &mut Counters) -> RenderingMode;

    /// Wait up to `delay` for an external mode request. A zero delay only
    /// consumes a request that is already pending.
    fn wait_request(&mut self, delay: Duration) -> Option<RenderingMode>;

    /// The attempt ceiling was hit and the loop is about to stop.
    fn gave_up(&mut self) {}
}

/// Outer loop of a device session's rendering thread.
#[derive(Debug, Clone, Copy)]
pub struct RenderingStateMachine {
    retry: RetryPolicy,
    quirks: PlatformQuirks,
}

impl RenderingStateMachine {
    pub fn new(retry: RetryPolicy, quirks: PlatformQuirks) -> Self {
        Self { retry, quirks }
    }

    /// Drive `driver` from `Render` until a terminal mode. `mode` is kept
    /// current so that event callbacks can see what the thread is doing.
    pub fn run(&self, driver: &mut dyn ModeDriver, mode: &AtomicMode) -> RenderingMode {
        let mut counters = Counters::default();
        let mut delay = Duration::ZERO;
        mode.store(RenderingMode::Render);

        loop {
            debug!("rendering mode {:?}, delay {:?}", mode.load(), delay);
            if let Some(next) = driver.wait_request(delay) {
                debug!("requested rendering mode {:?}", next);
                mode.store(next);
            }
            delay = Duration::ZERO;

            match mode.load() {
                RenderingMode::Render => {
                    let next = driver.render(&mut counters);
                    mode.store(next);
                    if self.quirks.leaky_wasapi && next == RenderingMode::WaitExclusive {
                        delay = self.retry.exclusive_settle();
                    }
                }
                RenderingMode::WaitExclusive if self.quirks.leaky_wasapi => {
                    let next = driver.wait_exclusive(&mut counters);
                    mode.store(next);
                    if next == RenderingMode::WaitExclusive {
                        delay = self.retry.exclusive_poll();
                    }
                }
                RenderingMode::WaitExclusive | RenderingMode::Retry => {
                    if self.quirks.leaky_wasapi && counters.play_attempts > self.retry.max_play_attempts {
                        info!("giving up after {} attempts", counters.play_attempts);
                        driver.gave_up();
                        mode.store(RenderingMode::Stop);
                        continue;
                    }
                    delay = if counters.play_attempts == 0 {
                        self.retry.playing_retry()
                    } else {
                        self.retry.failing_retry()
                    };
                    debug!("retry in {:?}, attempt #{}", delay, counters.play_attempts);
                    mode.store(RenderingMode::Render);
                }
                terminal @ (RenderingMode::Stop | RenderingMode::Invalid) => return terminal,
            }
        }
    }
}
