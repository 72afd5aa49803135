pub mod audio_models;
pub mod config;
pub mod error;
pub mod mode_string;
pub mod state;
