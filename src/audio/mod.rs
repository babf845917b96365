//! # Audio Module
//!
//! Client audio handling between the WebSocket and the recognition engine.
//!
//! ## Key Components:
//! - **Format**: PCM format description, WAV header construction and level probing
//! - **Sink**: Write-only byte channel from a session into its recognizer
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz (8kHz accepted by configuration)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod format; // PCM format, WAV header, peak amplitude
pub mod sink; // Audio sink / source channel pair

pub use format::AudioFormat;
pub use sink::{audio_channel, AudioSink, AudioSource};
