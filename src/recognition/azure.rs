//! # Azure Speech Engine
//!
//! Continuous recognition against the Azure Speech service over its WebSocket
//! protocol (see [`super::protocol`] for the message format).
//!
//! ## Connection lifecycle:
//! 1. `start` opens the WebSocket with subscription-key authentication and sends
//!    `speech.config` (plus `speech.context` in auto-detect mode)
//! 2. A connection task forwards audio from the [`AudioSource`] and decodes
//!    service messages into [`RecognitionEvent`]s
//! 3. A `turn.end` the service sends on its own (silence, turn length) opens a
//!    new turn on the same connection, so recognition is continuous
//! 4. When the audio source ends, an empty audio frame tells the service the
//!    audio is over; the task keeps reading so trailing finals still arrive
//! 5. `stop` signals the task and waits for it; the task exits on the final
//!    `turn.end` or a closed socket. The caller bounds the wait

use crate::audio::{AudioFormat, AudioSource};
use crate::config::SpeechConfig;
use crate::recognition::protocol::{
    audio_message, new_request_id, parse_text_message, recognition_url, service_base,
    speech_config_message, speech_context_message, to_event,
};
use crate::recognition::{
    EngineSession, EventSender, RecognitionError, RecognitionEvent, RecognitionMode, SpeechEngine,
};
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type SpeechSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Credentials resolved from [`SpeechConfig`].
#[derive(Debug, Clone)]
struct Credentials {
    key: String,
    region: String,
}

/// Azure Speech implementation of [`SpeechEngine`].
pub struct AzureSpeechEngine {
    credentials: Option<Credentials>,
    endpoint: Option<String>,
    format: AudioFormat,
}

impl AzureSpeechEngine {
    /// Build an engine from configuration. Missing key or region leaves it unconfigured.
    pub fn new(config: &SpeechConfig) -> Self {
        let non_blank = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let credentials = match (non_blank(&config.key), non_blank(&config.region)) {
            (Some(key), Some(region)) => Some(Credentials { key, region }),
            _ => None,
        };

        Self {
            credentials,
            endpoint: non_blank(&config.endpoint),
            format: AudioFormat::pcm16_mono(config.sample_rate),
        }
    }

    async fn connect(
        &self,
        credentials: &Credentials,
        mode: &RecognitionMode,
        connection_id: &str,
    ) -> Result<SpeechSocket, RecognitionError> {
        let base = service_base(&credentials.region, self.endpoint.as_deref());
        let url = recognition_url(&base, mode);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RecognitionError::Config(format!("invalid speech URL {}: {}", url, e)))?;

        let key = HeaderValue::from_str(&credentials.key)
            .map_err(|e| RecognitionError::Config(format!("invalid speech key: {}", e)))?;
        let id = HeaderValue::from_str(connection_id)
            .map_err(|e| RecognitionError::Config(format!("invalid connection id: {}", e)))?;
        request.headers_mut().insert("Ocp-Apim-Subscription-Key", key);
        request.headers_mut().insert("X-ConnectionId", id);

        let (socket, _response) = timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| {
                RecognitionError::Connect(format!(
                    "timed out after {}s connecting to {}",
                    CONNECT_TIMEOUT.as_secs(),
                    base
                ))
            })?
            .map_err(|e| RecognitionError::Connect(e.to_string()))?;

        Ok(socket)
    }
}

#[async_trait]
impl SpeechEngine for AzureSpeechEngine {
    fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    fn audio_format(&self) -> AudioFormat {
        self.format
    }

    async fn start(
        &self,
        mode: RecognitionMode,
        audio: AudioSource,
        events: EventSender,
    ) -> Result<Box<dyn EngineSession>, RecognitionError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(RecognitionError::MissingCredentials)?;

        let connection_id = new_request_id();
        let mut socket = self.connect(credentials, &mode, &connection_id).await?;

        let request_id = new_request_id();
        socket
            .send(Message::Text(speech_config_message(&request_id)))
            .await
            .map_err(|e| RecognitionError::Connect(format!("speech.config rejected: {}", e)))?;
        if let Some(context) = speech_context_message(&request_id, &mode) {
            socket
                .send(Message::Text(context))
                .await
                .map_err(|e| RecognitionError::Connect(format!("speech.context rejected: {}", e)))?;
        }

        info!(%connection_id, %mode, "Connected to Azure Speech");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let wav_header = audio.format().wav_header();
        let task = ConnectionTask {
            request_id,
            connection_id,
            mode,
            audio,
            events,
            wav_header,
            turn_has_audio: false,
        };
        let handle = tokio::spawn(task.run(socket, shutdown_rx));

        Ok(Box::new(AzureSession {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }))
    }
}

type SpeechSink = SplitSink<SpeechSocket, Message>;

/// State owned by the per-connection task.
struct ConnectionTask {
    /// Id of the current turn; audio frames must carry it
    request_id: String,
    connection_id: String,
    mode: RecognitionMode,
    audio: AudioSource,
    events: EventSender,
    wav_header: Vec<u8>,
    /// Set once the current turn has sent audio (the first chunk carries the WAV header)
    turn_has_audio: bool,
}

impl ConnectionTask {
    async fn run(mut self, socket: SpeechSocket, mut shutdown_rx: oneshot::Receiver<()>) {
        let (mut ws_sink, mut ws_stream) = socket.split();
        let mut audio_open = true;
        let mut stopping = false;

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown_rx, if !stopping => {
                    debug!(connection_id = %self.connection_id, "Stop requested");
                    stopping = true;
                    // Nothing was sent this turn, so no result can still be on its way.
                    // Otherwise keep reading until the service ends the turn; the
                    // caller bounds how long that may take
                    if !audio_open && !self.turn_has_audio {
                        break;
                    }
                }

                chunk = self.audio.recv(), if audio_open => {
                    let frame = match chunk {
                        Some(chunk) => {
                            let mut payload = if self.turn_has_audio {
                                Vec::with_capacity(chunk.len())
                            } else {
                                self.wav_header.clone()
                            };
                            payload.extend_from_slice(&chunk);
                            self.turn_has_audio = true;
                            audio_message(&self.request_id, &payload)
                        }
                        None => {
                            audio_open = false;
                            if !self.turn_has_audio {
                                debug!(connection_id = %self.connection_id, "Audio ended before any was sent");
                                if stopping {
                                    break;
                                }
                                continue;
                            }
                            debug!(connection_id = %self.connection_id, "Audio ended, sending end of audio");
                            audio_message(&self.request_id, &[])
                        }
                    };

                    if let Err(e) = ws_sink.send(Message::Binary(frame)).await {
                        error!(connection_id = %self.connection_id, error = %e, "Failed to send audio to Azure Speech");
                        self.emit(RecognitionEvent::Canceled { reason: format!("send failed: {}", e) });
                        break;
                    }
                }

                message = ws_stream.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            let Some(inbound) = parse_text_message(&text) else {
                                debug!(connection_id = %self.connection_id, "Ignoring unframed text message");
                                continue;
                            };
                            let turn_ended = inbound.path == "turn.end";
                            if let Some(event) = to_event(&inbound) {
                                if !self.emit(event) {
                                    break;
                                }
                            }
                            if !turn_ended {
                                continue;
                            }
                            // After end of audio this is the last turn
                            if stopping || !audio_open {
                                break;
                            }
                            // The service closed the turn on its own (silence, turn
                            // length); recognition continues in a new one
                            if let Err(e) = self.begin_turn(&mut ws_sink).await {
                                error!(connection_id = %self.connection_id, error = %e, "Failed to open a new recognition turn");
                                self.emit(RecognitionEvent::Canceled { reason: format!("new turn failed: {}", e) });
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            if !stopping {
                                let reason = frame
                                    .map(|f| format!("{} {}", f.code, f.reason))
                                    .unwrap_or_else(|| "closed by service".to_string());
                                warn!(connection_id = %self.connection_id, %reason, "Azure Speech closed the connection");
                                self.emit(RecognitionEvent::Canceled { reason });
                            }
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(connection_id = %self.connection_id, error = %e, "Azure Speech WebSocket error");
                            self.emit(RecognitionEvent::Canceled { reason: e.to_string() });
                            break;
                        }
                        None => {
                            debug!(connection_id = %self.connection_id, "Azure Speech stream ended");
                            break;
                        }
                    }
                }
            }
        }

        let _ = ws_sink.send(Message::Close(None)).await;
        info!(connection_id = %self.connection_id, "Azure Speech connection closed");
    }

    /// Start a new turn on the open connection: fresh request id, `speech.context`
    /// again in auto-detect mode, and a WAV header on the next chunk.
    async fn begin_turn(&mut self, ws_sink: &mut SpeechSink) -> Result<(), WsError> {
        self.request_id = new_request_id();
        self.turn_has_audio = false;
        debug!(connection_id = %self.connection_id, request_id = %self.request_id, "Starting new recognition turn");

        if let Some(context) = speech_context_message(&self.request_id, &self.mode) {
            ws_sink.send(Message::Text(context)).await?;
        }
        Ok(())
    }

    /// Returns false once nobody is listening anymore.
    fn emit(&self, event: RecognitionEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

/// Handle to one running Azure recognition connection.
struct AzureSession {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

#[async_trait]
impl EngineSession for AzureSession {
    async fn stop(&mut self) -> Result<(), RecognitionError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| RecognitionError::Stop(format!("connection task failed: {}", e))),
            None => Ok(()),
        }
    }
}

impl Drop for AzureSession {
    fn drop(&mut self) {
        // Abandoned (e.g. stop timed out): make sure the socket task goes away
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
