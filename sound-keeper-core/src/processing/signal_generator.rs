/// Per-device signal generator.
///
/// Produces one value per frame and writes it into every channel of the
/// frame in the mix encoding. All phase state (frame counter, sine angle,
/// noise filters) lives here and is reset by [`SignalGenerator::reconfigure`].
use std::f64::consts::TAU;

use super::envelope::Periodicity;
use super::noise::{BrownIntegrator, Lcg, PinkFilter};
use super::wave_format::{MixFormat, SampleEncoding};
use crate::models::config::{StreamConfig, StreamKind};
use crate::models::error::KeeperError;

/// Float bit pattern of 1/32767, the smallest step a 16-bit output can show.
pub const FLOAT_EPSILON_16_BIT: u32 = 0x3800_0100;
/// Float bit pattern of 1/8388607, the smallest step a 24-bit output can show.
pub const FLOAT_EPSILON_24_BIT: u32 = 0x3400_0001;

const SIGN_BIT: u32 = 0x8000_0000;

/// How a buffer should be released to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferFill {
    /// Sample data was written.
    Written,
    /// Nothing was written; release the buffer flagged as silent.
    Silent,
}

/// Encodes sample values into interleaved frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleWriter {
    encoding: SampleEncoding,
    channels: usize,
    stride: usize,
    float_epsilon: u32,
}

impl SampleWriter {
    /// `output` is the encoding the device finally converts to; it only picks
    /// the float epsilon used by fluctuate pulses.
    pub fn new(mix: &MixFormat, output: SampleEncoding) -> Result<Self, KeeperError> {
        let sample_bytes = mix.encoding.sample_bytes();
        if sample_bytes == 0 {
            return Err(KeeperError::UnsupportedFormat(format!("mix format {}", mix)));
        }
        let stride = usize::from(mix.block_align);
        if stride < sample_bytes {
            return Err(KeeperError::UnsupportedFormat(format!(
                "block align {} smaller than one sample",
                stride
            )));
        }
        let float_epsilon = if output == SampleEncoding::Int16 {
            FLOAT_EPSILON_16_BIT
        } else {
            FLOAT_EPSILON_24_BIT
        };
        Ok(Self {
            encoding: mix.encoding,
            channels: usize::from(mix.channels).min(stride / sample_bytes),
            stride,
            float_epsilon,
        })
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Write `level` (-1.0..=1.0) into every channel of `frame`.
    pub fn write_level(&self, frame: &mut [u8], level: f32) {
        let level = level.clamp(-1.0, 1.0);
        let bytes = match self.encoding {
            SampleEncoding::Float32 => level.to_le_bytes(),
            SampleEncoding::Int16 => {
                let [lo, hi] = ((level * i16::MAX as f32) as i16).to_le_bytes();
                [lo, hi, 0, 0]
            }
            SampleEncoding::Int24 => ((f64::from(level) * 8_388_607.0) as i32).to_le_bytes(),
            SampleEncoding::Int32 => ((f64::from(level) * f64::from(i32::MAX)) as i32).to_le_bytes(),
            SampleEncoding::Unknown => [0; 4],
        };
        self.write_all_channels(frame, bytes);
    }

    /// Write the smallest non-zero value with the given sign, or zero.
    pub fn write_pulse(&self, frame: &mut [u8], sign: i8) {
        let bytes = match (self.encoding, sign.signum()) {
            (_, 0) => [0; 4],
            (SampleEncoding::Float32, s) => {
                let bits = if s < 0 { self.float_epsilon | SIGN_BIT } else { self.float_epsilon };
                bits.to_le_bytes()
            }
            (_, s) => i32::from(s).to_le_bytes(),
        };
        self.write_all_channels(frame, bytes);
    }

    fn write_all_channels(&self, frame: &mut [u8], bytes: [u8; 4]) {
        let sample_bytes = self.encoding.sample_bytes();
        for sample in frame.chunks_exact_mut(sample_bytes).take(self.channels) {
            sample.copy_from_slice(&bytes[..sample_bytes]);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SignalGenerator {
    config: StreamConfig,
    mix: MixFormat,
    output: SampleEncoding,
    sample_rate: u32,
    writer: SampleWriter,
    periodicity: Periodicity,
    frame: u64,
    theta: f64,
    rng: Lcg,
    brown: BrownIntegrator,
    pink: PinkFilter,
}

impl SignalGenerator {
    pub fn new(
        config: StreamConfig,
        mix: &MixFormat,
        output: SampleEncoding,
        seed: u64,
    ) -> Result<Self, KeeperError> {
        let writer = SampleWriter::new(mix, output)?;
        Ok(Self {
            config,
            mix: *mix,
            output,
            sample_rate: mix.sample_rate,
            writer,
            periodicity: Periodicity::new(&config, mix.sample_rate),
            frame: 0,
            theta: 0.0,
            rng: Lcg::new(seed),
            brown: BrownIntegrator::default(),
            pink: PinkFilter::default(),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Whether this generator writes for the given formats, so that its
    /// phase can carry over to a reopened stream.
    pub fn renders_to(&self, mix: &MixFormat, output: SampleEncoding) -> bool {
        self.mix == *mix && self.output == output
    }

    /// Current position of the frame counter.
    pub fn frame_position(&self) -> u64 {
        self.frame
    }

    pub fn periodicity(&self) -> &Periodicity {
        &self.periodicity
    }

    /// Switch to new stream parameters, starting over from phase zero.
    pub fn reconfigure(&mut self, config: StreamConfig) {
        self.config = config;
        self.periodicity = Periodicity::new(&config, self.sample_rate);
        self.reset_phase();
    }

    pub fn reset_phase(&mut self) {
        self.frame = 0;
        self.theta = 0.0;
        self.brown = BrownIntegrator::default();
        self.pink = PinkFilter::default();
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = Lcg::new(seed);
    }

    /// Generate `frames` frames into `buffer`. Never touches bytes past
    /// `frames * stride`; a short buffer shortens the fill instead.
    pub fn fill(&mut self, buffer: &mut [u8], frames: usize) -> BufferFill {
        let frames = frames.min(buffer.len() / self.writer.stride());
        if frames == 0 {
            return BufferFill::Silent;
        }

        if self.periodicity.is_silent_span(self.frame, frames as u64) {
            self.frame = self.periodicity.advance(self.frame, frames as u64);
            return BufferFill::Silent;
        }

        let buffer = &mut buffer[..frames * self.writer.stride()];
        let StreamConfig {
            kind,
            frequency,
            amplitude,
            ..
        } = self.config;

        match kind {
            StreamKind::Fluctuate => self.fill_fluctuate(buffer),
            StreamKind::Sine if frequency > 0.0 && amplitude > 0.0 => self.fill_sine(buffer),
            StreamKind::WhiteNoise | StreamKind::BrownNoise | StreamKind::PinkNoise if amplitude > 0.0 => {
                self.fill_noise(buffer)
            }
            _ => return BufferFill::Silent,
        }
        BufferFill::Written
    }

    fn fill_fluctuate(&mut self, buffer: &mut [u8]) {
        let once = if self.config.frequency > 0.0 {
            ((f64::from(self.sample_rate) / self.config.frequency) as u64).max(2)
        } else {
            0
        };

        for frame in buffer.chunks_exact_mut(self.writer.stride()) {
            let sign = if !self.periodicity.is_playing(self.frame) {
                0
            } else if once == 0 {
                match self.frame % 4 {
                    0 => -1,
                    2 => 1,
                    _ => 0,
                }
            } else if self.frame % once == 0 {
                if (self.frame / once) & 1 == 1 {
                    -1
                } else {
                    1
                }
            } else {
                0
            };
            self.writer.write_pulse(frame, sign);
            self.frame = self.periodicity.advance(self.frame, 1);
        }
    }

    fn fill_sine(&mut self, buffer: &mut [u8]) {
        let rate = f64::from(self.sample_rate);
        let increment = self.config.frequency.min(rate / 2.0) * TAU / rate;

        for frame in buffer.chunks_exact_mut(self.writer.stride()) {
            let amplitude = self.config.amplitude * self.periodicity.gain_at(self.frame);
            let mut sample = 0.0;
            if amplitude != 0.0 {
                sample = (self.theta.sin() * amplitude) as f32;
                self.theta += increment;
                if self.theta >= TAU {
                    self.theta -= TAU;
                }
            }
            self.writer.write_level(frame, sample);
            self.frame = self.periodicity.advance(self.frame, 1);
        }
    }

    fn fill_noise(&mut self, buffer: &mut [u8]) {
        for frame in buffer.chunks_exact_mut(self.writer.stride()) {
            let amplitude = self.config.amplitude * self.periodicity.gain_at(self.frame);
            let mut sample = 0.0;
            if amplitude != 0.0 {
                let white = self.rng.next_unit();
                let value = match self.config.kind {
                    StreamKind::BrownNoise => self.brown.next(white),
                    StreamKind::PinkNoise => self.pink.next(white),
                    _ => white,
                };
                sample = (value * amplitude) as f32;
            }
            self.writer.write_level(frame, sample);
            self.frame = self.periodicity.advance(self.frame, 1);
        }
    }
}
