//! # Live Session Wire Protocol
//!
//! Client and server events exchanged over the live WebSocket.
//!
//! ## Framing:
//! - **Text frames**: JSON envelope `{"event": "<name>", "data": {...}}`; `data`
//!   may be omitted or `null` for events without payload
//! - **Binary frames**: a raw `audio_chunk` (16-bit little-endian mono PCM)
//!
//! Server events use the same envelope, e.g.
//! `{"event": "final_result", "data": {"text": "hello"}}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `error` codes sent to clients.
pub mod error_codes {
    /// Recognition credentials are not configured
    pub const MISSING_SPEECH_ENV: &str = "missing_speech_env";
    /// Credentials are present but the recognizer could not be built
    pub const RECOGNIZER_START_FAILED: &str = "recognizer_start_failed";
    /// A text frame was not a valid event envelope
    pub const INVALID_MESSAGE: &str = "invalid_message";
}

/// `set_langs` payload. Missing values fall back to the default pair.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SetLangs {
    pub src_lang: Option<String>,
    pub tgt_lang: Option<String>,
}

/// `set_auto_detect` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SetAutoDetect {
    #[serde(default)]
    pub enabled: bool,
}

/// `start_stream` payload. Every field overrides the session setting when present.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StartStream {
    pub src_lang: Option<String>,
    pub tgt_lang: Option<String>,
    pub auto_detect: Option<bool>,
}

/// `audio_chunk` payload, either from a binary frame or from JSON with inline language hints.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AudioChunk {
    pub src_lang: Option<String>,
    pub tgt_lang: Option<String>,
    #[serde(default)]
    pub chunk: Vec<u8>,
}

impl AudioChunk {
    pub fn binary(data: Vec<u8>) -> Self {
        Self {
            src_lang: None,
            tgt_lang: None,
            chunk: data,
        }
    }
}

/// Everything a client can ask of its session.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    SetAutoDetect(SetAutoDetect),
    SetLangs(SetLangs),
    StartStream(StartStream),
    AudioChunk(AudioChunk),
    EndOfStream,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SetAutoDetect(_) => "set_auto_detect",
            ClientEvent::SetLangs(_) => "set_langs",
            ClientEvent::StartStream(_) => "start_stream",
            ClientEvent::AudioChunk(_) => "audio_chunk",
            ClientEvent::EndOfStream => "end_of_stream",
        }
    }
}

/// Why a text frame could not be turned into a [`ClientEvent`].
#[derive(Debug)]
pub enum ProtocolError {
    /// Not JSON, not an envelope, or a payload of the wrong shape
    Malformed(serde_json::Error),
    /// Well-formed envelope naming an event this server does not handle
    UnknownEvent(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Malformed(err) => write!(f, "malformed message: {}", err),
            ProtocolError::UnknownEvent(name) => write!(f, "unknown event '{}'", name),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

fn payload<T: DeserializeOwned + Default>(data: serde_json::Value) -> Result<T, ProtocolError> {
    if data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(data).map_err(ProtocolError::Malformed)
}

/// Decode one text frame.
pub fn parse_client_event(text: &str) -> Result<ClientEvent, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;

    let event = match envelope.event.as_str() {
        "set_auto_detect" => ClientEvent::SetAutoDetect(payload(envelope.data)?),
        "set_langs" => ClientEvent::SetLangs(payload(envelope.data)?),
        "start_stream" => ClientEvent::StartStream(payload(envelope.data)?),
        "audio_chunk" => ClientEvent::AudioChunk(payload(envelope.data)?),
        "end_of_stream" => ClientEvent::EndOfStream,
        _ => return Err(ProtocolError::UnknownEvent(envelope.event)),
    };

    Ok(event)
}

/// Events pushed to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    AutoDetectUpdated { enabled: bool },
    LangsUpdated { src: String, tgt: String },
    Started { ok: bool },
    Error { error: String },
    LangDetected { detected: String },
    LangWarning { detected: String },
    PartialResult { text: String },
    FinalResult { text: String },
    FinalTranslation { translation: String },
    Stopped { ok: bool },
}

impl ServerEvent {
    pub fn error(code: &str) -> Self {
        ServerEvent::Error {
            error: code.to_string(),
        }
    }

    /// JSON text frame for this event.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_events() {
        assert_eq!(
            parse_client_event(r#"{"event":"set_langs","data":{"src_lang":"fr","tgt_lang":"de"}}"#).unwrap(),
            ClientEvent::SetLangs(SetLangs {
                src_lang: Some("fr".to_string()),
                tgt_lang: Some("de".to_string()),
            })
        );
        assert_eq!(
            parse_client_event(r#"{"event":"set_auto_detect","data":{"enabled":true}}"#).unwrap(),
            ClientEvent::SetAutoDetect(SetAutoDetect { enabled: true })
        );
        assert_eq!(
            parse_client_event(r#"{"event":"end_of_stream"}"#).unwrap(),
            ClientEvent::EndOfStream
        );
    }

    #[test]
    fn test_missing_data_uses_defaults() {
        assert_eq!(
            parse_client_event(r#"{"event":"start_stream"}"#).unwrap(),
            ClientEvent::StartStream(StartStream::default())
        );
        assert_eq!(
            parse_client_event(r#"{"event":"set_langs","data":null}"#).unwrap(),
            ClientEvent::SetLangs(SetLangs::default())
        );
    }

    #[test]
    fn test_json_audio_chunk() {
        let event = parse_client_event(
            r#"{"event":"audio_chunk","data":{"src_lang":"es","chunk":[1,2,255]}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::AudioChunk(AudioChunk {
                src_lang: Some("es".to_string()),
                tgt_lang: None,
                chunk: vec![1, 2, 255],
            })
        );
    }

    #[test]
    fn test_invalid_messages() {
        assert!(matches!(parse_client_event("not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(
            parse_client_event(r#"{"data":{}}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            parse_client_event(r#"{"event":"set_auto_detect","data":{"enabled":"yes"}}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            parse_client_event(r#"{"event":"chat","data":{}}"#),
            Err(ProtocolError::UnknownEvent(name)) if name == "chat"
        ));
    }

    #[test]
    fn test_server_event_envelope() {
        let frame = ServerEvent::FinalTranslation {
            translation: "hola".to_string(),
        }
        .to_frame()
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["event"], "final_translation");
        assert_eq!(json["data"]["translation"], "hola");

        let frame = ServerEvent::error(error_codes::MISSING_SPEECH_ENV).to_frame().unwrap();
        assert_eq!(frame, r#"{"event":"error","data":{"error":"missing_speech_env"}}"#);

        let frame = ServerEvent::AutoDetectUpdated { enabled: true }.to_frame().unwrap();
        assert_eq!(frame, r#"{"event":"auto_detect_updated","data":{"enabled":true}}"#);
    }
}
