//! # Recognition Module
//!
//! Streaming speech recognition behind a small engine abstraction.
//!
//! ## Key Components:
//! - **Events**: What an engine reports while audio streams in (partial, final, canceled, session markers)
//! - **Engine traits**: [`SpeechEngine`] opens one recognition stream, [`EngineSession`] stops it
//! - **Adapter**: [`RecognitionAdapter`] pairs one engine stream with one audio sink
//! - **Azure**: WebSocket implementation of the Azure Speech protocol
//!
//! ## Event delivery:
//! Engines push [`RecognitionEvent`]s into an unbounded channel handed to them at
//! start. Each recognizer gets its own channel, so events of one session stay in
//! engine order while sessions never wait on each other.

pub mod adapter; // Audio sink + engine stream pairing
pub mod azure; // Azure Speech WebSocket engine
pub mod protocol; // Azure Speech wire messages

#[cfg(test)]
pub mod testing;

pub use adapter::RecognitionAdapter;
pub use azure::AzureSpeechEngine;

use crate::audio::{AudioFormat, AudioSource};
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

/// Something a recognition engine observed.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// Provisional hypothesis, may still change
    Partial {
        text: String,
        detected_language: Option<String>,
    },
    /// Committed utterance
    Final {
        text: String,
        detected_language: Option<String>,
    },
    /// Recognition stopped abnormally (timeout, service error, dropped connection)
    Canceled { reason: String },
    SessionStarted,
    SessionStopped,
}

impl RecognitionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RecognitionEvent::Partial { .. } => "partial",
            RecognitionEvent::Final { .. } => "final",
            RecognitionEvent::Canceled { .. } => "canceled",
            RecognitionEvent::SessionStarted => "session_started",
            RecognitionEvent::SessionStopped => "session_stopped",
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<RecognitionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<RecognitionEvent>;

/// Which language(s) a recognizer listens for. Tags are full regional tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionMode {
    Fixed(String),
    AutoDetect(Vec<String>),
}

impl fmt::Display for RecognitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionMode::Fixed(tag) => write!(f, "fixed({})", tag),
            RecognitionMode::AutoDetect(tags) => write!(f, "auto({})", tags.join(",")),
        }
    }
}

/// Errors from building or stopping a recognizer.
#[derive(Debug)]
pub enum RecognitionError {
    /// Engine credentials are absent
    MissingCredentials,
    /// Engine settings are present but unusable (bad endpoint, bad header value)
    Config(String),
    /// The engine could not be reached or refused the stream
    Connect(String),
    /// The engine failed while shutting a stream down
    Stop(String),
}

impl fmt::Display for RecognitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionError::MissingCredentials => write!(f, "speech engine credentials are not configured"),
            RecognitionError::Config(msg) => write!(f, "speech engine configuration error: {}", msg),
            RecognitionError::Connect(msg) => write!(f, "speech engine connection failed: {}", msg),
            RecognitionError::Stop(msg) => write!(f, "speech engine stop failed: {}", msg),
        }
    }
}

impl std::error::Error for RecognitionError {}

/// A streaming speech-recognition capability.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Whether credentials for the engine are present.
    fn is_configured(&self) -> bool;

    /// Audio format the engine expects from clients.
    fn audio_format(&self) -> AudioFormat;

    /// Start continuous recognition reading from `audio` and reporting into `events`.
    ///
    /// The engine owns both ends from here on; the returned session is the
    /// only handle the caller keeps.
    async fn start(
        &self,
        mode: RecognitionMode,
        audio: AudioSource,
        events: EventSender,
    ) -> Result<Box<dyn EngineSession>, RecognitionError>;
}

/// One running recognition stream.
#[async_trait]
pub trait EngineSession: Send {
    /// Request graceful termination and wait until the engine acknowledges it.
    ///
    /// Must tolerate being called more than once.
    async fn stop(&mut self) -> Result<(), RecognitionError>;
}
