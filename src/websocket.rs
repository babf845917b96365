//! # Live Translation WebSocket
//!
//! Transport for live sessions. Clients connect to `/ws/live` (or the legacy
//! `/azure-live` path), optionally with `?auto_detect=true`, and exchange the
//! events described in [`crate::session::protocol`].
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: the upgrade is refused with 503 when the session limit is reached
//! 2. **Control**: JSON text frames (`set_langs`, `start_stream`, `end_of_stream`, ...)
//! 3. **Audio Streaming**: binary frames of 16-bit, 16kHz, mono PCM
//! 4. **Results**: JSON text frames (`partial_result`, `final_result`, `final_translation`, ...)
//! 5. **Disconnect**: close frame, protocol error or heartbeat timeout; the session is removed
//!
//! ## Actor Model:
//! Each connection is an actix actor. The actor never touches the session
//! directly: it forwards parsed events to a per-connection dispatcher task
//! (see [`SessionRegistry::serve_connection`]) and writes whatever the session
//! pushes back through its outbox.

use crate::error::AppError;
use crate::session::protocol::{error_codes, AudioChunk, ClientEvent, ProtocolError, ServerEvent};
use crate::session::{parse_client_event, SessionRegistry};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// WebSocket actor for one live session.
pub struct LiveWebSocket {
    connection_id: String,

    /// Events for the dispatcher; dropping it ends the session
    inbound: Option<mpsc::UnboundedSender<ClientEvent>>,

    /// Session output, attached as a stream when the actor starts
    outbound: Option<mpsc::UnboundedReceiver<ServerEvent>>,

    /// Last time the client proved it is alive
    last_heartbeat: Instant,

    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl LiveWebSocket {
    pub fn new(
        connection_id: String,
        inbound: mpsc::UnboundedSender<ClientEvent>,
        outbound: mpsc::UnboundedReceiver<ServerEvent>,
        heartbeat_interval: Duration,
        client_timeout: Duration,
    ) -> Self {
        Self {
            connection_id,
            inbound: Some(inbound),
            outbound: Some(outbound),
            last_heartbeat: Instant::now(),
            heartbeat_interval,
            client_timeout,
        }
    }

    fn forward(&mut self, event: ClientEvent, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(inbound) = &self.inbound else {
            return;
        };

        if inbound.send(event).is_err() {
            warn!(connection_id = %self.connection_id, "Session dispatcher gone, closing connection");
            self.inbound = None;
            ctx.stop();
        }
    }

    fn send_event(&self, event: &ServerEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match event.to_frame() {
            Ok(frame) => ctx.text(frame),
            Err(err) => error!(connection_id = %self.connection_id, error = %err, "Failed to encode event"),
        }
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match parse_client_event(text) {
            Ok(event) => {
                debug!(connection_id = %self.connection_id, event = event.name(), "Client event");
                self.forward(event, ctx);
            }
            Err(ProtocolError::UnknownEvent(name)) => {
                warn!(connection_id = %self.connection_id, event = %name, "Ignoring unknown event");
            }
            Err(err) => {
                warn!(connection_id = %self.connection_id, error = %err, "Invalid client message");
                self.send_event(&ServerEvent::error(error_codes::INVALID_MESSAGE), ctx);
            }
        }
    }
}

impl Actor for LiveWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "WebSocket connection started");

        if let Some(outbound) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(outbound));
        }

        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(connection_id = %act.connection_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "WebSocket connection stopped");
        // Closing the inbound channel makes the dispatcher disconnect the session
        self.inbound = None;
    }
}

/// Frames from the client.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for LiveWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_text(&text, ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.forward(ClientEvent::AudioChunk(AudioChunk::binary(data.to_vec())), ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.connection_id, ?reason, "WebSocket closed by client");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection_id = %self.connection_id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.connection_id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// Events from the session.
impl StreamHandler<ServerEvent> for LiveWebSocket {
    fn handle(&mut self, event: ServerEvent, ctx: &mut Self::Context) {
        self.send_event(&event, ctx);
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        // The session is gone (rejected at connect or removed); nothing more will come
        debug!(connection_id = %self.connection_id, "Session outbox closed");
        ctx.stop();
    }
}

/// Truthy query flag: `true`, `1`, `yes` or `on` (any case).
fn parse_flag(value: Option<&String>) -> bool {
    value.is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"))
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Checks capacity, starts the session dispatcher, then upgrades the connection
/// and hands it to a [`LiveWebSocket`] actor.
pub async fn live_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
    registry: web::Data<SessionRegistry>,
) -> ActixResult<HttpResponse> {
    let query = web::Query::<HashMap<String, String>>::from_query(req.query_string())
        .unwrap_or_else(|_| web::Query(HashMap::new()));
    let auto_detect = parse_flag(query.get("auto_detect"));

    if registry.is_full().await {
        warn!(peer = ?req.connection_info().peer_addr(), "Session limit reached, refusing WebSocket");
        let max = app_state.get_config().performance.max_concurrent_sessions;
        return Err(AppError::ServiceUnavailable(format!(
            "Maximum concurrent sessions ({}) reached",
            max
        ))
        .into());
    }

    let connection_id = Uuid::new_v4().to_string();
    info!(%connection_id, auto_detect, peer = ?req.connection_info().peer_addr(), "New live WebSocket connection");

    let config = app_state.get_config();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();

    let actor = LiveWebSocket::new(
        connection_id.clone(),
        inbound_tx,
        outbox_rx,
        Duration::from_secs(config.performance.heartbeat_interval_secs),
        Duration::from_secs(config.performance.client_timeout_secs),
    );

    let response = ws::start(actor, &req, stream)?;

    tokio::spawn(registry.into_inner().serve_connection(
        connection_id,
        auto_detect,
        inbound_rx,
        outbox_tx,
    ));

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::recognition::testing::ScriptedEngine;
    use crate::translation::testing::StubTranslator;
    use actix_web::{http::StatusCode, test, App};
    use std::sync::Arc;

    fn app_data(max_sessions: usize) -> (web::Data<AppState>, web::Data<SessionRegistry>) {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = max_sessions;
        let state = AppState::new(config);
        let registry = SessionRegistry::new(
            Arc::new(ScriptedEngine::new()),
            Arc::new(StubTranslator::default()),
            state.clone(),
        );
        (web::Data::new(state), web::Data::new(registry))
    }

    fn upgrade_request(uri: &str) -> test::TestRequest {
        test::TestRequest::get()
            .uri(uri)
            .insert_header(("upgrade", "websocket"))
            .insert_header(("connection", "upgrade"))
            .insert_header(("sec-websocket-version", "13"))
            .insert_header(("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="))
    }

    #[actix_web::test]
    async fn test_parse_flag() {
        assert!(parse_flag(Some(&"true".to_string())));
        assert!(parse_flag(Some(&"1".to_string())));
        assert!(parse_flag(Some(&"TRUE".to_string())));
        assert!(!parse_flag(Some(&"false".to_string())));
        assert!(!parse_flag(Some(&"".to_string())));
        assert!(!parse_flag(None));
    }

    #[actix_web::test]
    async fn test_upgrade_accepted() {
        let (state, registry) = app_data(5);
        let app = test::init_service(
            App::new()
                .app_data(state)
                .app_data(registry)
                .route("/ws/live", web::get().to(live_websocket)),
        )
        .await;

        let resp = test::call_service(&app, upgrade_request("/ws/live?auto_detect=true").to_request()).await;
        assert_eq!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);
    }

    #[actix_web::test]
    async fn test_upgrade_refused_when_full() {
        let (state, registry) = app_data(1);
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.connect("existing", false, tx).await.unwrap();

        let app = test::init_service(
            App::new()
                .app_data(state)
                .app_data(registry)
                .route("/ws/live", web::get().to(live_websocket)),
        )
        .await;

        let resp = test::call_service(&app, upgrade_request("/ws/live").to_request()).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn test_plain_http_request_is_rejected() {
        let (state, registry) = app_data(5);
        let app = test::init_service(
            App::new()
                .app_data(state)
                .app_data(registry.clone())
                .route("/ws/live", web::get().to(live_websocket)),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/ws/live").to_request()).await;
        assert!(resp.status().is_client_error());
        assert_eq!(registry.session_count().await, 0);
    }
}
