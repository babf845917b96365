//! # Recognition Event Router
//!
//! One router task per recognizer. It consumes the recognizer's events in
//! order, turns them into client events and sends finals through the
//! translator.
//!
//! ## Stale events
//! Every router is stamped with the generation of the recognizer it serves.
//! Teardown bumps the session's generation before the router is detached, and
//! the router only sends while holding the generation lock with a matching
//! value. Once it sees a newer generation it stops, so nothing from a replaced
//! recognizer ever reaches the client.

use crate::language::short_code;
use crate::recognition::{EventReceiver, RecognitionEvent};
use crate::session::protocol::ServerEvent;
use crate::session::state::{LanguagePair, Outbox};
use crate::state::AppState;
use crate::translation::Translator;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Generation counter shared by a session and its routers.
pub type Generation = Arc<Mutex<u64>>;

pub struct EventRouter {
    pub connection_id: String,
    pub generation: u64,
    pub current: Generation,
    pub languages: watch::Receiver<LanguagePair>,
    pub outbox: Outbox,
    pub translator: Arc<dyn Translator>,
    pub state: AppState,
}

impl EventRouter {
    /// Route events until the recognizer goes away or this router is retired.
    pub async fn run(self, mut events: EventReceiver) {
        while let Some(event) = events.recv().await {
            if !self.route(event).await {
                debug!(
                    connection_id = %self.connection_id,
                    generation = self.generation,
                    "Router retired, discarding remaining recognition events"
                );
                return;
            }
        }
        debug!(connection_id = %self.connection_id, generation = self.generation, "Recognition events drained");
    }

    /// Returns false once this router may no longer emit.
    async fn route(&self, event: RecognitionEvent) -> bool {
        match event {
            RecognitionEvent::Partial {
                text,
                detected_language,
            } => {
                let mut out = self.detection_events(detected_language.as_deref());
                out.push(ServerEvent::PartialResult { text });
                self.emit(out)
            }
            RecognitionEvent::Final {
                text,
                detected_language,
            } => self.route_final(text, detected_language).await,
            RecognitionEvent::Canceled { reason } => {
                warn!(connection_id = %self.connection_id, %reason, "Recognition canceled");
                true
            }
            RecognitionEvent::SessionStarted | RecognitionEvent::SessionStopped => {
                info!(connection_id = %self.connection_id, event = event.kind(), "Recognition session event");
                true
            }
        }
    }

    async fn route_final(&self, text: String, detected_language: Option<String>) -> bool {
        let mut out = self.detection_events(detected_language.as_deref());
        out.push(ServerEvent::FinalResult { text: text.clone() });
        if !self.emit(out) {
            return false;
        }
        self.state.record_final_delivered();

        let languages = self.languages.borrow().clone();
        let source = detected_language
            .as_deref()
            .map(short_code)
            .unwrap_or(languages.source);

        let translation = self
            .translator
            .translate(&text, &source, &languages.target)
            .await;
        if translation.is_empty() {
            return true;
        }

        let delivered = self.emit(vec![ServerEvent::FinalTranslation { translation }]);
        if delivered {
            self.state.record_translation_delivered();
        }
        delivered
    }

    /// `lang_detected` for every detection, plus one `lang_warning` when it
    /// disagrees with the session's source language.
    fn detection_events(&self, detected: Option<&str>) -> Vec<ServerEvent> {
        let Some(detected) = detected else {
            return Vec::new();
        };

        let mut out = vec![ServerEvent::LangDetected {
            detected: detected.to_string(),
        }];

        let detected_short = short_code(detected);
        if detected_short != self.languages.borrow().source {
            out.push(ServerEvent::LangWarning {
                detected: detected_short,
            });
        }
        out
    }

    /// Send a batch atomically with respect to teardown.
    fn emit(&self, events: Vec<ServerEvent>) -> bool {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != self.generation {
            return false;
        }
        events.into_iter().all(|event| self.outbox.send(event).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::translation::testing::StubTranslator;
    use tokio::sync::mpsc;

    struct Harness {
        events: mpsc::UnboundedSender<RecognitionEvent>,
        outbox: mpsc::UnboundedReceiver<ServerEvent>,
        current: Generation,
        translator: Arc<StubTranslator>,
        task: tokio::task::JoinHandle<()>,
    }

    fn harness(source: &str, translator: StubTranslator) -> Harness {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let (_languages_tx, languages_rx) = watch::channel(LanguagePair::new(source, "es"));
        let current: Generation = Arc::new(Mutex::new(1));
        let translator = Arc::new(translator);

        let router = EventRouter {
            connection_id: "conn-1".to_string(),
            generation: 1,
            current: current.clone(),
            languages: languages_rx,
            outbox: outbox_tx,
            translator: translator.clone(),
            state: AppState::new(AppConfig::default()),
        };
        let task = tokio::spawn(router.run(events_rx));

        Harness {
            events: events_tx,
            outbox: outbox_rx,
            current,
            translator,
            task,
        }
    }

    async fn drain(harness: Harness) -> (Vec<ServerEvent>, Arc<StubTranslator>) {
        drop(harness.events);
        harness.task.await.unwrap();
        let mut outbox = harness.outbox;
        let mut out = Vec::new();
        while let Ok(event) = outbox.try_recv() {
            out.push(event);
        }
        (out, harness.translator)
    }

    #[tokio::test]
    async fn test_final_is_translated() {
        let h = harness("en", StubTranslator::default().with("hello", "en", "es", "hola"));
        h.events
            .send(RecognitionEvent::Final {
                text: "hello".to_string(),
                detected_language: None,
            })
            .unwrap();

        let (out, _) = drain(h).await;
        assert_eq!(
            out,
            vec![
                ServerEvent::FinalResult { text: "hello".to_string() },
                ServerEvent::FinalTranslation { translation: "hola".to_string() },
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_translation_sends_nothing_more() {
        let h = harness("en", StubTranslator::default());
        h.events
            .send(RecognitionEvent::Final {
                text: "unknown".to_string(),
                detected_language: None,
            })
            .unwrap();

        let (out, translator) = drain(h).await;
        assert_eq!(out, vec![ServerEvent::FinalResult { text: "unknown".to_string() }]);
        assert_eq!(translator.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_detection_mismatch_warns_once_per_event() {
        let h = harness("en", StubTranslator::default().with("bonjour", "fr", "es", "hola"));
        h.events
            .send(RecognitionEvent::Partial {
                text: "bonj".to_string(),
                detected_language: Some("fr-FR".to_string()),
            })
            .unwrap();
        h.events
            .send(RecognitionEvent::Final {
                text: "bonjour".to_string(),
                detected_language: Some("fr-FR".to_string()),
            })
            .unwrap();

        let (out, translator) = drain(h).await;
        assert_eq!(
            out,
            vec![
                ServerEvent::LangDetected { detected: "fr-FR".to_string() },
                ServerEvent::LangWarning { detected: "fr".to_string() },
                ServerEvent::PartialResult { text: "bonj".to_string() },
                ServerEvent::LangDetected { detected: "fr-FR".to_string() },
                ServerEvent::LangWarning { detected: "fr".to_string() },
                ServerEvent::FinalResult { text: "bonjour".to_string() },
                ServerEvent::FinalTranslation { translation: "hola".to_string() },
            ]
        );
        // Detected language wins over the session source
        assert_eq!(
            translator.calls(),
            vec![("bonjour".to_string(), "fr".to_string(), "es".to_string())]
        );
    }

    #[tokio::test]
    async fn test_matching_detection_does_not_warn() {
        let h = harness("en", StubTranslator::default());
        h.events
            .send(RecognitionEvent::Partial {
                text: "hi".to_string(),
                detected_language: Some("en-GB".to_string()),
            })
            .unwrap();

        let (out, _) = drain(h).await;
        assert_eq!(
            out,
            vec![
                ServerEvent::LangDetected { detected: "en-GB".to_string() },
                ServerEvent::PartialResult { text: "hi".to_string() },
            ]
        );
    }

    #[tokio::test]
    async fn test_session_markers_and_cancel_are_not_forwarded() {
        let h = harness("en", StubTranslator::default());
        h.events.send(RecognitionEvent::SessionStarted).unwrap();
        h.events
            .send(RecognitionEvent::Canceled {
                reason: "Error".to_string(),
            })
            .unwrap();
        h.events.send(RecognitionEvent::SessionStopped).unwrap();

        let (out, _) = drain(h).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_retired_router_emits_nothing() {
        let h = harness("en", StubTranslator::default());
        *h.current.lock().unwrap() += 1;
        h.events
            .send(RecognitionEvent::Partial {
                text: "stale".to_string(),
                detected_language: None,
            })
            .unwrap();

        let (out, _) = drain(h).await;
        assert!(out.is_empty());
    }
}
