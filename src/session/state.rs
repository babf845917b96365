//! # Session State
//!
//! Per-connection record: the language pair, the auto-detect flag and at most
//! one live recognizer. The recognizer's audio sink lives inside its
//! [`RecognitionAdapter`], so the two are always created and released together.
//!
//! ## State machine
//! - **Idle**: no recognizer; audio chunks are dropped
//! - **Streaming**: recognizer running; audio chunks are forwarded
//!
//! `start_stream` always tears down before building, so a session never has
//! two recognizers. `end_of_stream` returns to Idle but keeps the language
//! settings. Removal (disconnect) is handled by the registry via [`Session::close`].

use crate::language::{detection_candidates, short_code, to_full_tag};
use crate::recognition::{RecognitionAdapter, RecognitionError, RecognitionMode, SpeechEngine};
use crate::session::protocol::{
    error_codes, AudioChunk, ServerEvent, SetAutoDetect, SetLangs, StartStream,
};
use crate::session::router::{EventRouter, Generation};
use crate::state::AppState;
use crate::translation::Translator;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Channel carrying events back to the client connection.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

/// Source and target languages as lowercase short codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
    /// Full tag the recognizer is configured with (keeps the script/region
    /// detail the short code drops, e.g. `zh-Hans`)
    pub recognition_tag: String,
}

impl LanguagePair {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: short_code(source),
            target: short_code(target),
            recognition_tag: to_full_tag(source),
        }
    }

    fn with_source(&self, source: &str) -> Self {
        Self {
            source: short_code(source),
            recognition_tag: to_full_tag(source),
            ..self.clone()
        }
    }

    fn with_target(&self, target: &str) -> Self {
        Self {
            target: short_code(target),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Streaming,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Streaming => "streaming",
        }
    }
}

/// Collaborators every session uses.
pub struct SessionServices {
    pub engine: Arc<dyn SpeechEngine>,
    pub translator: Arc<dyn Translator>,
    pub state: AppState,
}

/// A running recognizer and the task routing its events.
struct LiveRecognizer {
    adapter: RecognitionAdapter,
    router: JoinHandle<()>,
}

/// How the current recognizer is being released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// Let in-flight results drain before returning (end of stream)
    Drain,
    /// Discard anything still in flight (rebuild, disconnect)
    Discard,
}

pub struct Session {
    connection_id: String,
    languages: watch::Sender<LanguagePair>,
    default_pair: LanguagePair,
    auto_detect: bool,
    live: Option<LiveRecognizer>,
    generation: Generation,
    outbox: Outbox,
    services: Arc<SessionServices>,
}

impl Session {
    /// Fresh Idle session with the default language pair.
    pub fn new(
        connection_id: String,
        auto_detect: bool,
        default_pair: LanguagePair,
        outbox: Outbox,
        services: Arc<SessionServices>,
    ) -> Self {
        let (languages, _) = watch::channel(default_pair.clone());
        Self {
            connection_id,
            languages,
            default_pair,
            auto_detect,
            live: None,
            generation: Arc::new(Mutex::new(0)),
            outbox,
            services,
        }
    }

    pub fn status(&self) -> SessionStatus {
        if self.live.is_some() {
            SessionStatus::Streaming
        } else {
            SessionStatus::Idle
        }
    }

    pub fn languages(&self) -> LanguagePair {
        self.languages.borrow().clone()
    }

    fn send(&self, event: ServerEvent) {
        if self.outbox.send(event).is_err() {
            debug!(connection_id = %self.connection_id, "Client gone, dropping event");
        }
    }

    pub fn set_auto_detect(&mut self, payload: SetAutoDetect) {
        self.auto_detect = payload.enabled;
        info!(connection_id = %self.connection_id, enabled = payload.enabled, "Auto-detect updated");
        self.send(ServerEvent::AutoDetectUpdated {
            enabled: payload.enabled,
        });
    }

    /// Replace the language pair; a fixed-language stream is rebuilt to match.
    pub async fn set_langs(&mut self, payload: SetLangs) {
        let src = non_blank(payload.src_lang).unwrap_or_else(|| self.default_pair.source.clone());
        let tgt = non_blank(payload.tgt_lang).unwrap_or_else(|| self.default_pair.target.clone());

        self.languages.send_replace(LanguagePair::new(&src, &tgt));
        info!(connection_id = %self.connection_id, %src, %tgt, "Languages updated");
        self.send(ServerEvent::LangsUpdated { src, tgt });

        if !self.auto_detect && self.live.is_some() {
            debug!(connection_id = %self.connection_id, "Rebuilding recognizer for new source language");
            self.teardown(Teardown::Discard).await;
            self.build().await;
        }
    }

    /// Tear down any recognizer and start a new one with the current settings.
    pub async fn start_stream(&mut self, payload: StartStream) {
        self.teardown(Teardown::Discard).await;

        let mut pair = self.languages();
        if let Some(src) = non_blank(payload.src_lang) {
            pair = pair.with_source(&src);
        }
        if let Some(tgt) = non_blank(payload.tgt_lang) {
            pair = pair.with_target(&tgt);
        }
        self.languages.send_replace(pair);
        if let Some(auto_detect) = payload.auto_detect {
            self.auto_detect = auto_detect;
        }

        if self.build().await {
            self.send(ServerEvent::Started { ok: true });
        }
    }

    /// Forward audio to the recognizer, or drop it while Idle.
    pub fn audio_chunk(&mut self, payload: AudioChunk) {
        let Some(live) = self.live.as_mut() else {
            debug!(connection_id = %self.connection_id, bytes = payload.chunk.len(), "No active stream, dropping audio chunk");
            return;
        };

        // Inline hints patch the pair without rebuilding the recognizer
        let src = non_blank(payload.src_lang);
        let tgt = non_blank(payload.tgt_lang);
        if src.is_some() || tgt.is_some() {
            self.languages.send_modify(|pair| {
                if let Some(src) = &src {
                    *pair = pair.with_source(src);
                }
                if let Some(tgt) = &tgt {
                    *pair = pair.with_target(tgt);
                }
            });
        }

        live.adapter.write(&payload.chunk);
    }

    /// Stop the recognizer, deliver whatever it still reports, return to Idle.
    pub async fn end_of_stream(&mut self) {
        self.teardown(Teardown::Drain).await;
        self.send(ServerEvent::Stopped { ok: true });
    }

    /// Release everything. Called exactly once by the registry on disconnect.
    pub async fn close(&mut self) {
        self.teardown(Teardown::Discard).await;
    }

    fn recognition_mode(&self) -> RecognitionMode {
        let tag = self.languages.borrow().recognition_tag.clone();
        if self.auto_detect {
            RecognitionMode::AutoDetect(detection_candidates(&tag))
        } else {
            RecognitionMode::Fixed(tag)
        }
    }

    fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.services.state.get_config().speech.stop_timeout_ms)
    }

    /// Build a recognizer and its router. Failures are reported to the client;
    /// the session stays Idle.
    async fn build(&mut self) -> bool {
        let mode = self.recognition_mode();
        let started = RecognitionAdapter::start(self.services.engine.as_ref(), mode.clone()).await;

        let (adapter, events) = match started {
            Ok(started) => started,
            Err(RecognitionError::MissingCredentials) => {
                warn!(connection_id = %self.connection_id, "Speech credentials missing, cannot start stream");
                self.services.state.record_recognizer_failure();
                self.send(ServerEvent::error(error_codes::MISSING_SPEECH_ENV));
                return false;
            }
            Err(err) => {
                warn!(connection_id = %self.connection_id, %mode, error = %err, "Failed to start recognizer");
                self.services.state.record_recognizer_failure();
                self.send(ServerEvent::error(error_codes::RECOGNIZER_START_FAILED));
                return false;
            }
        };

        let generation = *self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        let router = EventRouter {
            connection_id: self.connection_id.clone(),
            generation,
            current: self.generation.clone(),
            languages: self.languages.subscribe(),
            outbox: self.outbox.clone(),
            translator: self.services.translator.clone(),
            state: self.services.state.clone(),
        };

        self.live = Some(LiveRecognizer {
            adapter,
            router: tokio::spawn(router.run(events)),
        });
        self.services.state.record_stream_started();
        info!(connection_id = %self.connection_id, %mode, generation, "Stream started");
        true
    }

    async fn teardown(&mut self, how: Teardown) {
        let Some(mut live) = self.live.take() else {
            return;
        };

        // One bound for the whole teardown, engine stop and drain included
        let deadline = Instant::now() + self.stop_timeout();

        if how == Teardown::Discard {
            self.retire();
            live.router.abort();
        }

        live.adapter.stop(deadline).await;

        if how == Teardown::Drain {
            // Stopping the engine closes its event channel; the router gets
            // whatever is left of the deadline for trailing finals and translations
            if tokio::time::timeout_at(deadline, &mut live.router).await.is_err() {
                warn!(connection_id = %self.connection_id, "Recognition events did not drain in time");
            }
            self.retire();
            live.router.abort();
        }

        info!(connection_id = %self.connection_id, mode = %live.adapter.mode(), "Stream stopped");
    }

    /// Invalidate the current router generation.
    fn retire(&self) {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation += 1;
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
