//! # Audio Sink
//!
//! The write-only byte channel a session pushes client audio into. The other
//! end ([`AudioSource`]) belongs to the recognition engine.
//!
//! ## Behaviour:
//! - `write` never blocks: bytes are queued and the engine consumes them on its own task
//! - Writing after `close` (or after the engine went away) is logged and ignored
//! - Closing is idempotent; dropping the sink closes it too, which the engine
//!   observes as end of audio

use crate::audio::format::{peak_amplitude, AudioFormat};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Every Nth chunk is logged with its peak amplitude.
const DIAGNOSTIC_EVERY: u64 = 50;

/// Create a connected sink/source pair for one recognizer.
pub fn audio_channel(format: AudioFormat) -> (AudioSink, AudioSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        AudioSink {
            tx: Some(tx),
            format,
            chunks: 0,
            bytes: 0,
        },
        AudioSource { rx, format },
    )
}

/// Writing end held by the session's recognizer.
#[derive(Debug)]
pub struct AudioSink {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    format: AudioFormat,
    chunks: u64,
    bytes: u64,
}

impl AudioSink {
    /// Queue a chunk of PCM audio for the engine.
    ///
    /// Returns whether the bytes were accepted; failures are already logged.
    pub fn write(&mut self, data: &[u8]) -> bool {
        if data.is_empty() {
            return false;
        }

        let Some(tx) = &self.tx else {
            debug!(bytes = data.len(), "Audio sink closed, dropping chunk");
            return false;
        };

        if tx.send(data.to_vec()).is_err() {
            warn!(bytes = data.len(), "Audio write failed: engine no longer reading");
            self.tx = None;
            return false;
        }

        self.chunks += 1;
        self.bytes += data.len() as u64;

        if self.chunks % DIAGNOSTIC_EVERY == 1 {
            debug!(
                chunk = self.chunks,
                bytes = data.len(),
                peak = peak_amplitude(data).unwrap_or(0),
                streamed_ms = self.format.duration_ms(self.bytes as usize),
                "Audio chunk"
            );
        }

        true
    }

    /// Signal end of audio to the engine.
    pub fn close(&mut self) {
        if self.tx.take().is_some() {
            debug!(chunks = self.chunks, bytes = self.bytes, "Audio sink closed");
        }
    }

    /// Total bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }
}

/// Reading end consumed by a recognition engine.
#[derive(Debug)]
pub struct AudioSource {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    format: AudioFormat,
}

impl AudioSource {
    /// Next chunk, or `None` once the sink is closed and drained.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_reaches_source() {
        let (mut sink, mut source) = audio_channel(AudioFormat::default());

        assert!(sink.write(&[1, 2, 3, 4]));
        assert!(sink.write(&[5, 6]));
        assert_eq!(sink.bytes_written(), 6);

        assert_eq!(source.recv().await, Some(vec![1, 2, 3, 4]));
        assert_eq!(source.recv().await, Some(vec![5, 6]));
    }

    #[tokio::test]
    async fn test_close_ends_source_and_ignores_late_writes() {
        let (mut sink, mut source) = audio_channel(AudioFormat::default());
        assert!(sink.write(&[0, 1]));

        sink.close();
        sink.close();
        assert!(!sink.write(&[2, 3]));
        assert_eq!(sink.bytes_written(), 2);

        // Queued audio still drains before end of stream
        assert_eq!(source.recv().await, Some(vec![0, 1]));
        assert_eq!(source.recv().await, None);
    }

    #[test]
    fn test_write_after_engine_gone() {
        let (mut sink, source) = audio_channel(AudioFormat::default());
        drop(source);

        assert!(!sink.write(&[0, 1]));
        assert_eq!(sink.bytes_written(), 0);
    }

    #[test]
    fn test_empty_chunk_is_ignored() {
        let (mut sink, _source) = audio_channel(AudioFormat::default());
        assert!(!sink.write(&[]));
        assert_eq!(sink.bytes_written(), 0);
    }
}
