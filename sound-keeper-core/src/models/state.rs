use std::sync::atomic::{AtomicU8, Ordering};

/// Rendering state machine mode of one device session.
///
/// State transitions:
/// ```text
///            ┌──────────── format changed / failure ────────────┐
///            ▼                                                  │
/// Retry ──► Render ──► (steady state) ──────────────────────────┤
///  ▲          │                                                  │
///  │          ├── device in use / exclusive override ──► WaitExclusive
///  │          │                                                  │
///  └──────────┴───────── exclusive session ended ◄───────────────┘
///
/// any ──► Stop     (explicit stop, attempt ceiling)
/// any ──► Invalid  (unrecoverable endpoint failure)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RenderingMode {
    Render = 0,
    Retry = 1,
    WaitExclusive = 2,
    Stop = 3,
    Invalid = 4,
}

impl RenderingMode {
    /// `Stop` and `Invalid` end the rendering thread.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stop | Self::Invalid)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Render,
            1 => Self::Retry,
            2 => Self::WaitExclusive,
            3 => Self::Stop,
            _ => Self::Invalid,
        }
    }
}

/// Lock-free cell holding the mode the rendering thread is currently in.
///
/// Session event callbacks read it from arbitrary threads to decide whether
/// an event is relevant.
#[derive(Debug)]
pub struct AtomicMode(AtomicU8);

impl AtomicMode {
    pub fn new(mode: RenderingMode) -> Self {
        Self(AtomicU8::new(mode as u8))
    }

    pub fn load(&self) -> RenderingMode {
        RenderingMode::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, mode: RenderingMode) {
        self.0.store(mode as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_modes() {
        assert!(RenderingMode::Stop.is_terminal());
        assert!(RenderingMode::Invalid.is_terminal());
        assert!(!RenderingMode::Render.is_terminal());
        assert!(!RenderingMode::Retry.is_terminal());
        assert!(!RenderingMode::WaitExclusive.is_terminal());
    }

    #[test]
    fn atomic_mode_round_trips_every_mode() {
        let cell = AtomicMode::new(RenderingMode::Stop);
        for mode in [
            RenderingMode::Render,
            RenderingMode::Retry,
            RenderingMode::WaitExclusive,
            RenderingMode::Stop,
            RenderingMode::Invalid,
        ] {
            cell.store(mode);
            assert_eq!(cell.load(), mode);
        }
    }
}
