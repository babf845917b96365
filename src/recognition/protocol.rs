//! # Azure Speech WebSocket Messages
//!
//! Encoding and decoding for the speech service's WebSocket wire format. Pure
//! functions only; the connection loop lives in [`super::azure`].
//!
//! ## Outbound:
//! - **Text messages**: `Header: value` lines, a blank line, then a JSON body
//!   (`speech.config`, `speech.context`)
//! - **Audio messages**: binary frames starting with a 2-byte big-endian header
//!   length, the header block, then raw audio. The first frame of a turn carries
//!   a WAV header; an empty payload marks end of audio.
//!
//! ## Inbound:
//! Text messages addressed by their `Path` header. Only the paths that matter to
//! a live session are decoded:
//! - `speech.hypothesis` → partial result
//! - `speech.phrase` → final result (or cancellation on an error status)
//! - `turn.start` / `turn.end` → session markers

use crate::recognition::{RecognitionEvent, RecognitionMode};
use byteorder::{BigEndian, WriteBytesExt};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

const RECOGNITION_PATH: &str = "/speech/recognition/conversation/cognitiveservices/v1";
const LANGUAGE_ID_PATH: &str = "/speech/universal/v2";

/// Fresh request/connection id in the dash-less form the service expects.
pub fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string().to_uppercase()
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// WebSocket base URL for a region, unless an explicit endpoint overrides it.
pub fn service_base(region: &str, endpoint: Option<&str>) -> String {
    match endpoint.map(str::trim).filter(|e| !e.is_empty()) {
        Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
        None => format!("wss://{}.stt.speech.microsoft.com", region.trim()),
    }
}

/// Full connection URL for a recognition mode.
///
/// A fixed language goes in the query string; auto-detection uses the
/// language-identification endpoint and announces candidates in `speech.context`.
pub fn recognition_url(base: &str, mode: &RecognitionMode) -> String {
    match mode {
        RecognitionMode::Fixed(tag) => {
            format!("{}{}?language={}&format=detailed", base, RECOGNITION_PATH, tag)
        }
        RecognitionMode::AutoDetect(_) => format!("{}{}?format=detailed", base, LANGUAGE_ID_PATH),
    }
}

fn text_message(path: &str, request_id: &str, body: &serde_json::Value) -> String {
    format!(
        "Path: {}\r\nX-RequestId: {}\r\nX-Timestamp: {}\r\nContent-Type: application/json\r\n\r\n{}",
        path,
        request_id,
        timestamp(),
        body
    )
}

/// `speech.config`: client description sent once per connection.
pub fn speech_config_message(request_id: &str) -> String {
    let body = json!({
        "context": {
            "system": { "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") },
            "os": { "platform": std::env::consts::OS, "name": std::env::consts::FAMILY, "version": "" },
            "audio": { "source": { "type": "Stream" } }
        }
    });
    text_message("speech.config", request_id, &body)
}

/// `speech.context`: per-turn settings. Carries the candidate list in auto-detect mode.
pub fn speech_context_message(request_id: &str, mode: &RecognitionMode) -> Option<String> {
    let RecognitionMode::AutoDetect(languages) = mode else {
        return None;
    };

    let body = json!({
        "languageId": {
            "languages": languages,
            "mode": "DetectContinuous",
            "onSuccess": { "action": "Recognize" },
            "onUnknown": { "action": "None" },
            "priority": "PrioritizeLatency"
        },
        "phraseDetection": { "mode": "Conversation" },
        "phraseOutput": { "format": "Detailed" }
    });
    Some(text_message("speech.context", request_id, &body))
}

/// Binary `audio` frame. An empty `payload` tells the service audio has ended.
pub fn audio_message(request_id: &str, payload: &[u8]) -> Vec<u8> {
    let headers = format!(
        "Path: audio\r\nX-RequestId: {}\r\nX-Timestamp: {}\r\nContent-Type: audio/x-wav\r\n",
        request_id,
        timestamp()
    );

    let mut frame = Vec::with_capacity(2 + headers.len() + payload.len());
    // Writes into a Vec cannot fail
    let _ = frame.write_u16::<BigEndian>(headers.len() as u16);
    frame.extend_from_slice(headers.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// A decoded inbound text message.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage<'a> {
    pub path: String,
    pub body: &'a str,
}

/// Split a text message into its `Path` header and body.
///
/// Returns `None` if the message has no header/body separator or no `Path`.
pub fn parse_text_message(raw: &str) -> Option<InboundMessage<'_>> {
    let (headers, body) = raw.split_once("\r\n\r\n")?;

    let path = headers.split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("path")
            .then(|| value.trim().to_ascii_lowercase())
    })?;

    Some(InboundMessage { path, body })
}

#[derive(Debug, Deserialize)]
struct PrimaryLanguage {
    #[serde(rename = "Language")]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Hypothesis {
    #[serde(rename = "Text", default)]
    text: String,
    #[serde(rename = "PrimaryLanguage")]
    primary_language: Option<PrimaryLanguage>,
}

#[derive(Debug, Deserialize)]
struct NBestEntry {
    #[serde(rename = "Display", default)]
    display: String,
}

#[derive(Debug, Deserialize)]
struct Phrase {
    #[serde(rename = "RecognitionStatus", default)]
    status: String,
    #[serde(rename = "DisplayText")]
    display_text: Option<String>,
    #[serde(rename = "NBest", default)]
    nbest: Vec<NBestEntry>,
    #[serde(rename = "PrimaryLanguage")]
    primary_language: Option<PrimaryLanguage>,
}

fn detected(primary: Option<PrimaryLanguage>) -> Option<String> {
    primary
        .and_then(|p| p.language)
        .filter(|language| !language.trim().is_empty())
}

/// Map an inbound message to the event a session cares about.
///
/// Unknown paths, silence results and undecodable bodies yield `None`.
pub fn to_event(message: &InboundMessage<'_>) -> Option<RecognitionEvent> {
    match message.path.as_str() {
        "turn.start" => Some(RecognitionEvent::SessionStarted),
        "turn.end" => Some(RecognitionEvent::SessionStopped),
        "speech.hypothesis" => {
            let hypothesis: Hypothesis = serde_json::from_str(message.body).ok()?;
            Some(RecognitionEvent::Partial {
                text: hypothesis.text,
                detected_language: detected(hypothesis.primary_language),
            })
        }
        "speech.phrase" => {
            let phrase: Phrase = serde_json::from_str(message.body).ok()?;
            match phrase.status.as_str() {
                "Success" => {
                    let text = phrase
                        .display_text
                        .or_else(|| phrase.nbest.into_iter().next().map(|best| best.display))
                        .unwrap_or_default();
                    Some(RecognitionEvent::Final {
                        text,
                        detected_language: detected(phrase.primary_language),
                    })
                }
                // Silence and end-of-audio markers, not failures
                "NoMatch" | "InitialSilenceTimeout" | "BabbleTimeout" | "EndOfDictation" => None,
                other => Some(RecognitionEvent::Canceled {
                    reason: other.to_string(),
                }),
            }
        }
        _ => None,
    }
}
