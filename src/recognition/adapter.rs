//! # Recognition Adapter
//!
//! Pairs one audio sink with one running engine stream. The two are created
//! together in [`RecognitionAdapter::start`] and released together in
//! [`RecognitionAdapter::stop`], so a session can never hold one without the other.

use crate::audio::{audio_channel, AudioSink};
use crate::recognition::{
    EngineSession, EventReceiver, RecognitionError, RecognitionMode, SpeechEngine,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A live recognizer bound to its own audio sink.
pub struct RecognitionAdapter {
    sink: AudioSink,
    session: Option<Box<dyn EngineSession>>,
    mode: RecognitionMode,
}

impl RecognitionAdapter {
    /// Open a sink and start the engine reading from it.
    ///
    /// ## Returns:
    /// - **Ok((adapter, events))**: recognizer running; `events` yields what it hears
    /// - **Err(MissingCredentials)**: engine not configured, nothing was created
    /// - **Err(..)**: engine failed to start; the sink is dropped with it
    pub async fn start(
        engine: &dyn SpeechEngine,
        mode: RecognitionMode,
    ) -> Result<(Self, EventReceiver), RecognitionError> {
        if !engine.is_configured() {
            return Err(RecognitionError::MissingCredentials);
        }

        let (sink, source) = audio_channel(engine.audio_format());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let session = engine.start(mode.clone(), source, events_tx).await?;
        info!(%mode, "Recognizer started");

        Ok((
            Self {
                sink,
                session: Some(session),
                mode,
            },
            events_rx,
        ))
    }

    /// Forward audio to the engine. Late or failed writes are logged no-ops.
    pub fn write(&mut self, data: &[u8]) -> bool {
        self.sink.write(data)
    }

    /// Close the sink and stop the engine, waiting no later than `deadline`.
    ///
    /// Never fails: engine errors and timeouts are logged. Safe to call again.
    pub async fn stop(&mut self, deadline: Instant) {
        self.sink.close();

        let Some(mut session) = self.session.take() else {
            debug!(mode = %self.mode, "Recognizer already stopped");
            return;
        };

        match tokio::time::timeout_at(deadline, session.stop()).await {
            Ok(Ok(())) => {
                info!(mode = %self.mode, bytes = self.sink.bytes_written(), "Recognizer stopped");
            }
            Ok(Err(err)) => {
                warn!(mode = %self.mode, error = %err, "Recognizer stop reported an error");
            }
            Err(_) => {
                warn!(mode = %self.mode, "Recognizer did not acknowledge stop in time, abandoning it");
            }
        }
    }

    pub fn mode(&self) -> &RecognitionMode {
        &self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::testing::ScriptedEngine;
    use crate::recognition::RecognitionEvent;
    use std::time::Duration;

    fn within(duration: Duration) -> Instant {
        Instant::now() + duration
    }

    #[tokio::test]
    async fn test_start_write_stop() {
        let engine = ScriptedEngine::new();
        let mode = RecognitionMode::Fixed("en-US".to_string());
        let (mut adapter, mut events) =
            RecognitionAdapter::start(&engine, mode.clone()).await.unwrap();

        assert_eq!(adapter.mode(), &mode);
        assert_eq!(engine.started_modes(), vec![mode]);
        assert_eq!(events.recv().await, Some(RecognitionEvent::SessionStarted));

        assert!(adapter.write(b"hello"));
        assert!(matches!(events.recv().await, Some(RecognitionEvent::Partial { .. })));
        assert!(matches!(events.recv().await, Some(RecognitionEvent::Final { .. })));

        adapter.stop(within(Duration::from_secs(1))).await;
        assert!(!adapter.write(b"late"));
        assert_eq!(events.recv().await, Some(RecognitionEvent::SessionStopped));
        assert_eq!(events.recv().await, None);

        // Second stop is a no-op
        adapter.stop(within(Duration::from_secs(1))).await;
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let engine = ScriptedEngine::unconfigured();
        let result = RecognitionAdapter::start(&engine, RecognitionMode::Fixed("en-US".to_string())).await;

        assert!(matches!(result, Err(RecognitionError::MissingCredentials)));
        assert!(engine.started_modes().is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_bounded() {
        let engine = ScriptedEngine::new().hang_on_stop();
        let (mut adapter, _events) =
            RecognitionAdapter::start(&engine, RecognitionMode::Fixed("en-US".to_string()))
                .await
                .unwrap();

        let started = Instant::now();
        adapter.stop(within(Duration::from_millis(50))).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!adapter.write(b"late"));
    }
}
