pub mod envelope;
pub mod noise;
pub mod signal_generator;
pub mod wave_format;
