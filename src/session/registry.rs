//! # Session Registry
//!
//! Maps connection ids to live [`Session`]s and drives them from client events.
//!
//! ## Concurrency:
//! - The map is only locked long enough to find, insert or remove a session
//! - Each session sits behind its own async mutex, so one slow session (for
//!   example a recognizer stop waiting on the engine) never blocks another
//! - Each connection feeds its events through [`SessionRegistry::serve_connection`],
//!   which handles them strictly in arrival order

use crate::error::{AppError, AppResult};
use crate::recognition::SpeechEngine;
use crate::session::protocol::ClientEvent;
use crate::session::state::{LanguagePair, Outbox, Session, SessionServices};
use crate::state::AppState;
use crate::translation::Translator;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Snapshot of the registry for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySummary {
    pub total_sessions: usize,
    pub max_sessions: usize,
    /// Sessions per status; sessions busy with a command are counted as "busy"
    pub status_counts: HashMap<String, usize>,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    services: Arc<SessionServices>,
}

impl SessionRegistry {
    pub fn new(engine: Arc<dyn SpeechEngine>, translator: Arc<dyn Translator>, state: AppState) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            services: Arc::new(SessionServices {
                engine,
                translator,
                state,
            }),
        }
    }

    fn max_sessions(&self) -> usize {
        self.services.state.get_config().performance.max_concurrent_sessions
    }

    /// Register an empty Idle session for a new connection.
    ///
    /// ## Returns:
    /// - **Ok(())**: session created
    /// - **Err(ServiceUnavailable)**: session limit reached
    /// - **Err(BadRequest)**: connection id already registered
    pub async fn connect(&self, connection_id: &str, auto_detect: bool, outbox: Outbox) -> AppResult<()> {
        let config = self.services.state.get_config();
        let mut sessions = self.sessions.write().await;

        if sessions.len() >= config.performance.max_concurrent_sessions {
            return Err(AppError::ServiceUnavailable(format!(
                "Maximum concurrent sessions ({}) reached",
                config.performance.max_concurrent_sessions
            )));
        }

        if sessions.contains_key(connection_id) {
            return Err(AppError::BadRequest(format!(
                "Connection '{}' already has a session",
                connection_id
            )));
        }

        let default_pair = LanguagePair::new(&config.languages.source, &config.languages.target);
        let session = Session::new(
            connection_id.to_string(),
            auto_detect,
            default_pair,
            outbox,
            self.services.clone(),
        );
        sessions.insert(connection_id.to_string(), Arc::new(Mutex::new(session)));
        drop(sessions);

        self.services.state.increment_active_sessions();
        info!(%connection_id, auto_detect, "Session connected");
        Ok(())
    }

    async fn get(&self, connection_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(connection_id).cloned()
    }

    /// Apply one client event to its session. Unknown connections are ignored.
    pub async fn dispatch(&self, connection_id: &str, event: ClientEvent) {
        let Some(session) = self.get(connection_id).await else {
            debug!(%connection_id, event = event.name(), "Event for unknown session ignored");
            return;
        };
        let mut session = session.lock().await;

        match event {
            ClientEvent::SetAutoDetect(payload) => session.set_auto_detect(payload),
            ClientEvent::SetLangs(payload) => session.set_langs(payload).await,
            ClientEvent::StartStream(payload) => session.start_stream(payload).await,
            ClientEvent::AudioChunk(payload) => session.audio_chunk(payload),
            ClientEvent::EndOfStream => session.end_of_stream().await,
        }
    }

    /// Remove a session and release its recognizer.
    ///
    /// Idempotent: returns false (and does nothing) if the session is already gone.
    pub async fn disconnect(&self, connection_id: &str) -> bool {
        let Some(session) = self.sessions.write().await.remove(connection_id) else {
            debug!(%connection_id, "Disconnect for unknown session ignored");
            return false;
        };

        session.lock().await.close().await;
        self.services.state.decrement_active_sessions();
        info!(%connection_id, "Session disconnected");
        true
    }

    /// Own one connection's session from connect to disconnect.
    ///
    /// Events are handled one at a time in arrival order. The session is removed
    /// once the inbound channel closes. If the session cannot be created the
    /// outbox is dropped, which the transport sees as the end of the connection.
    pub async fn serve_connection(
        self: Arc<Self>,
        connection_id: String,
        auto_detect: bool,
        mut inbound: mpsc::UnboundedReceiver<ClientEvent>,
        outbox: Outbox,
    ) {
        if let Err(err) = self.connect(&connection_id, auto_detect, outbox).await {
            warn!(%connection_id, error = %err, "Session rejected");
            return;
        }

        while let Some(event) = inbound.recv().await {
            self.dispatch(&connection_id, event).await;
        }

        self.disconnect(&connection_id).await;
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_full(&self) -> bool {
        self.session_count().await >= self.max_sessions()
    }

    pub async fn summary(&self) -> RegistrySummary {
        let sessions = self.sessions.read().await;
        let mut status_counts = HashMap::new();

        for session in sessions.values() {
            let status = match session.try_lock() {
                Ok(session) => session.status().as_str(),
                Err(_) => "busy",
            };
            *status_counts.entry(status.to_string()).or_insert(0) += 1;
        }

        RegistrySummary {
            total_sessions: sessions.len(),
            max_sessions: self.max_sessions(),
            status_counts,
        }
    }
}
