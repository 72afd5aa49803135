//! Play/wait windows and the fade envelope, in frames.

use crate::models::config::StreamConfig;

/// Frame-domain view of a stream's periodicity and fade settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Periodicity {
    play_frames: u64,
    wait_frames: u64,
    fade_frames: u64,
}

impl Periodicity {
    pub fn new(config: &StreamConfig, sample_rate: u32) -> Self {
        let to_frames = |seconds: f64| (seconds * f64::from(sample_rate)) as u64;
        let mut play_frames = to_frames(config.play_seconds);
        let mut wait_frames = to_frames(config.wait_seconds);
        let mut fade_frames = to_frames(config.fade_seconds);

        if play_frames == 0 || wait_frames == 0 {
            play_frames = 0;
            wait_frames = 0;
        } else {
            fade_frames = fade_frames.min(play_frames / 2);
        }

        Self {
            play_frames,
            wait_frames,
            fade_frames,
        }
    }

    pub fn play_frames(&self) -> u64 {
        self.play_frames
    }

    pub fn fade_frames(&self) -> u64 {
        self.fade_frames
    }

    /// Length of one play+wait cycle, or 0 when the stream is continuous.
    pub fn period_frames(&self) -> u64 {
        self.play_frames.saturating_add(self.wait_frames)
    }

    pub fn is_periodic(&self) -> bool {
        self.period_frames() != 0
    }

    /// True when `frames` frames starting at `frame` all fall into the wait window.
    pub fn is_silent_span(&self, frame: u64, frames: u64) -> bool {
        let period = self.period_frames();
        period != 0 && self.play_frames <= frame && frame.saturating_add(frames) <= period
    }

    /// Whether `frame` lies inside the play window.
    pub fn is_playing(&self, frame: u64) -> bool {
        !self.is_periodic() || frame < self.play_frames
    }

    /// Counter value after advancing `frames` from `frame`.
    pub fn advance(&self, frame: u64, frames: u64) -> u64 {
        match self.period_frames() {
            0 => frame.saturating_add(frames),
            period => ((u128::from(frame) + u128::from(frames)) % u128::from(period)) as u64,
        }
    }

    /// Envelope gain in 0.0..=1.0 at `frame`.
    ///
    /// Quadratic fade-in over the first `fade_frames` of the play window,
    /// quadratic fade-out over its last `fade_frames`, zero during the wait
    /// window. Continuous streams only fade in.
    pub fn gain_at(&self, frame: u64) -> f64 {
        let fade = self.fade_frames;
        if !self.is_periodic() && frame >= fade {
            return 1.0;
        }
        if frame < fade {
            ramp(frame, fade)
        } else if !self.is_periodic() || frame < self.play_frames - fade {
            1.0
        } else if frame < self.play_frames {
            ramp(self.play_frames - frame, fade)
        } else {
            0.0
        }
    }
}

fn ramp(position: u64, length: u64) -> f64 {
    let linear = position as f64 / length as f64;
    linear * linear
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::StreamKind;
    use approx::assert_relative_eq;

    fn periodic(play: f64, wait: f64, fade: f64) -> StreamConfig {
        let mut config = StreamConfig::with_defaults(StreamKind::Sine);
        config.set_play_seconds(play);
        config.set_wait_seconds(wait);
        config.set_fade_seconds(fade);
        config
    }

    #[test]
    fn one_sided_periodicity_is_disabled() {
        let only_play = Periodicity::new(&periodic(2.0, 0.0, 0.1), 1000);
        assert!(!only_play.is_periodic());
        assert_eq!(only_play.fade_frames(), 100);

        let only_wait = Periodicity::new(&periodic(0.0, 2.0, 0.1), 1000);
        assert_eq!(only_wait.period_frames(), 0);
    }

    #[test]
    fn fade_is_clamped_to_half_the_play_window() {
        let p = Periodicity::new(&periodic(1.0, 1.0, 5.0), 1000);
        assert_eq!(p.fade_frames(), 500);
        assert_eq!(p.period_frames(), 2000);
    }

    #[test]
    fn envelope_shape_over_one_period() {
        let p = Periodicity::new(&periodic(1.0, 0.5, 0.1), 1000);
        assert_eq!(p.gain_at(0), 0.0);
        assert_relative_eq!(p.gain_at(50), 0.25);
        assert_eq!(p.gain_at(100), 1.0);
        assert_eq!(p.gain_at(899), 1.0);
        assert_eq!(p.gain_at(900), 1.0);
        assert_relative_eq!(p.gain_at(950), 0.25);
        assert_relative_eq!(p.gain_at(999), 1e-4, epsilon = 1e-12);
        assert_eq!(p.gain_at(1000), 0.0);
        assert_eq!(p.gain_at(1499), 0.0);

        let mut previous = 0.0;
        for frame in 0..=100 {
            let gain = p.gain_at(frame);
            assert!(gain >= previous);
            previous = gain;
        }
        for frame in 900..=1000 {
            let gain = p.gain_at(frame);
            assert!(gain <= previous);
            previous = gain;
        }
    }

    #[test]
    fn continuous_stream_only_fades_in() {
        let p = Periodicity::new(&periodic(0.0, 0.0, 0.1), 1000);
        assert_eq!(p.gain_at(0), 0.0);
        assert_eq!(p.gain_at(100), 1.0);
        assert_eq!(p.gain_at(1_000_000), 1.0);
        assert_eq!(p.advance(u64::MAX - 1, 10), u64::MAX);
    }

    #[test]
    fn silent_span_detection() {
        let p = Periodicity::new(&periodic(1.0, 1.0, 0.0), 1000);
        assert!(p.is_silent_span(1000, 1000));
        assert!(!p.is_silent_span(999, 10));
        assert!(!p.is_silent_span(1500, 501));
        assert_eq!(p.advance(1500, 600), 100);
    }

    #[test]
    fn huge_windows_do_not_overflow() {
        let mut config = periodic(1.0, 1.0, 0.0);
        config.play_seconds = 1e300;
        config.wait_seconds = 1e300;
        let p = Periodicity::new(&config, 48000);
        assert_eq!(p.period_frames(), u64::MAX);
        assert!(p.is_playing(u64::MAX - 10));
        assert!(!p.is_silent_span(u64::MAX - 1, 10));
        assert!(p.advance(u64::MAX - 1, 480) < p.period_frames());
    }
}
