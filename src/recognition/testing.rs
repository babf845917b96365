//! In-process speech engine for session tests.
//!
//! Every audio chunk is read as UTF-8 text and "recognized" verbatim: one
//! partial and one final per chunk. A chunk of the form `"fr-FR:bonjour"`
//! reports `fr-FR` as the detected language.

use crate::audio::{AudioFormat, AudioSource};
use crate::recognition::{
    EngineSession, EventSender, RecognitionError, RecognitionEvent, RecognitionMode, SpeechEngine,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

#[derive(Clone, Copy, PartialEq)]
enum Behaviour {
    Normal,
    Unconfigured,
    FailStart,
    HangOnStop,
}

pub struct ScriptedEngine {
    behaviour: Behaviour,
    started: Arc<Mutex<Vec<RecognitionMode>>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            behaviour: Behaviour::Normal,
            started: Arc::default(),
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            behaviour: Behaviour::Unconfigured,
            ..Self::new()
        }
    }

    /// Configured, but every start fails as if the service were unreachable.
    pub fn failing() -> Self {
        Self {
            behaviour: Behaviour::FailStart,
            ..Self::new()
        }
    }

    /// Sessions never acknowledge stop.
    pub fn hang_on_stop(self) -> Self {
        Self {
            behaviour: Behaviour::HangOnStop,
            ..self
        }
    }

    /// Modes of every recognizer started so far, oldest first.
    pub fn started_modes(&self) -> Vec<RecognitionMode> {
        self.started.lock().unwrap().clone()
    }
}

fn recognize(chunk: &[u8]) -> (String, Option<String>) {
    let text = String::from_utf8_lossy(chunk).to_string();
    match text.split_once(':') {
        Some((tag, rest)) if tag.contains('-') && tag.len() <= 8 => {
            (rest.to_string(), Some(tag.to_string()))
        }
        _ => (text, None),
    }
}

#[async_trait]
impl SpeechEngine for ScriptedEngine {
    fn is_configured(&self) -> bool {
        self.behaviour != Behaviour::Unconfigured
    }

    fn audio_format(&self) -> AudioFormat {
        AudioFormat::default()
    }

    async fn start(
        &self,
        mode: RecognitionMode,
        mut audio: AudioSource,
        events: EventSender,
    ) -> Result<Box<dyn EngineSession>, RecognitionError> {
        if self.behaviour == Behaviour::FailStart {
            return Err(RecognitionError::Connect("scripted failure".to_string()));
        }
        self.started.lock().unwrap().push(mode);

        let handle = tokio::spawn(async move {
            let _ = events.send(RecognitionEvent::SessionStarted);
            while let Some(chunk) = audio.recv().await {
                let (text, detected_language) = recognize(&chunk);
                let _ = events.send(RecognitionEvent::Partial {
                    text: text.clone(),
                    detected_language: detected_language.clone(),
                });
                let _ = events.send(RecognitionEvent::Final {
                    text,
                    detected_language,
                });
            }
            let _ = events.send(RecognitionEvent::SessionStopped);
        });

        Ok(Box::new(ScriptedSession {
            handle: Some(handle),
            hang: self.behaviour == Behaviour::HangOnStop,
        }))
    }
}

struct ScriptedSession {
    handle: Option<JoinHandle<()>>,
    hang: bool,
}

#[async_trait]
impl EngineSession for ScriptedSession {
    async fn stop(&mut self) -> Result<(), RecognitionError> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| RecognitionError::Stop(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
