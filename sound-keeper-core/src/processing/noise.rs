//! Noise sources: a 64-bit LCG plus brown and pink shaping filters.

/// Linear congruential generator with the musl constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next uniform value in -1.0..=1.0, taken from the high 31 bits of the state.
    pub fn next_unit(&mut self) -> f64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let high = (self.state >> 32) & 0x7FFF_FFFF;
        (high as f64 / f64::from(0x7FFF_FFFFu32)) * 2.0 - 1.0
    }
}

/// Integrated white noise with a leaky integrator against low-frequency drift.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BrownIntegrator {
    value: f64,
}

impl BrownIntegrator {
    pub fn next(&mut self, white: f64) -> f64 {
        self.value += white / 16.0;
        self.value /= 1.02;
        self.value %= 4.0;
        mirror_fold(self.value)
    }
}

/// Fold a value in -4.0..4.0 back into -1.0..=1.0 by reflecting at the edges,
/// e.g. 0.9, 1.0, 1.1 -> 0.9, 1.0, 0.9.
pub fn mirror_fold(value: f64) -> f64 {
    if (-1.0..=1.0).contains(&value) {
        return value;
    }
    let magnitude = value.abs();
    let folded = if magnitude <= 3.0 { 2.0 - magnitude } else { magnitude - 4.0 };
    folded * value.signum()
}

/// Paul Kellet's pink noise filter.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PinkFilter {
    state: [f64; 7],
}

const PINK_POLES: [(f64, f64); 6] = [
    (0.99886, 0.0555179),
    (0.99332, 0.0750759),
    (0.96900, 0.1538520),
    (0.86650, 0.3104856),
    (0.55000, 0.5329522),
    (-0.7616, -0.0168980),
];

impl PinkFilter {
    pub fn next(&mut self, white: f64) -> f64 {
        for (state, (feedback, gain)) in self.state.iter_mut().zip(PINK_POLES) {
            *state = feedback * *state + white * gain;
        }
        let sum: f64 = self.state.iter().sum::<f64>() + white * 0.5362;
        self.state[6] = white * 0.115926;
        sum * 0.11
    }
}
