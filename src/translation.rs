//! # Translation Gateway
//!
//! Best-effort text translation for final recognition results.
//!
//! ## Contract:
//! - [`Translator::translate`] never fails: an empty string means "no translation
//!   available" and the caller still delivers the untranslated final result
//! - Empty input and a missing endpoint/key return immediately, without any
//!   network traffic
//! - HTTP and decoding failures are logged and collapsed to an empty string
//!
//! The production implementation talks to the Azure Translator v3 REST API.

use crate::config::TranslatorConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Text translation capability consumed by the session orchestrator.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` from `source` to `target` (both short codes).
    async fn translate(&self, text: &str, source: &str, target: &str) -> String;

    /// Whether the gateway has what it needs to attempt a translation.
    fn is_configured(&self) -> bool;
}

/// Azure Translator API version this client speaks.
const API_VERSION: &str = "3.0";

/// Failure inside one translation call. Never leaves this module.
#[derive(Debug)]
enum TranslationError {
    Http(reqwest::Error),
    EmptyResponse,
}

impl fmt::Display for TranslationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslationError::Http(err) => write!(f, "translator request failed: {}", err),
            TranslationError::EmptyResponse => write!(f, "translator returned no translations"),
        }
    }
}

impl From<reqwest::Error> for TranslationError {
    fn from(err: reqwest::Error) -> Self {
        TranslationError::Http(err)
    }
}

#[derive(Debug, Serialize)]
struct TranslateItem<'a> {
    #[serde(rename = "Text")]
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranslateResult {
    #[serde(default)]
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
struct Translation {
    #[serde(default)]
    text: String,
}

/// Credentials resolved from [`TranslatorConfig`]; absent when not configured.
#[derive(Debug, Clone)]
struct Credentials {
    endpoint: String,
    key: String,
    region: Option<String>,
}

/// Azure Translator REST client.
pub struct AzureTranslator {
    http: reqwest::Client,
    credentials: Option<Credentials>,
}

impl AzureTranslator {
    /// Build a translator from configuration.
    ///
    /// A missing endpoint or key is not an error: the gateway is created in an
    /// unconfigured state and every call returns an empty translation.
    pub fn new(config: &TranslatorConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build translator HTTP client: {}", e))?;

        let credentials = match (non_blank(&config.endpoint), non_blank(&config.key)) {
            (Some(endpoint), Some(key)) => Some(Credentials {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                key: key.to_string(),
                region: non_blank(&config.region).map(str::to_string),
            }),
            _ => None,
        };

        Ok(Self { http, credentials })
    }

    async fn request(
        &self,
        credentials: &Credentials,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<String, TranslationError> {
        let url = format!("{}/translate", credentials.endpoint);

        let mut request = self
            .http
            .post(&url)
            .query(&[("api-version", API_VERSION), ("to", target), ("from", source)])
            .header("Ocp-Apim-Subscription-Key", &credentials.key)
            .json(&[TranslateItem { text }]);

        if let Some(region) = &credentials.region {
            request = request.header("Ocp-Apim-Subscription-Region", region);
        }

        let results: Vec<TranslateResult> = request.send().await?.error_for_status()?.json().await?;

        results
            .into_iter()
            .next()
            .and_then(|result| result.translations.into_iter().next())
            .map(|translation| translation.text)
            .filter(|text| !text.is_empty())
            .ok_or(TranslationError::EmptyResponse)
    }
}

#[async_trait]
impl Translator for AzureTranslator {
    async fn translate(&self, text: &str, source: &str, target: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let Some(credentials) = &self.credentials else {
            debug!("Translator not configured, skipping translation");
            return String::new();
        };

        match self.request(credentials, text, source, target).await {
            Ok(translated) => translated,
            Err(err) => {
                warn!(source, target, error = %err, "Translation failed");
                String::new()
            }
        }
    }

    fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}


#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(endpoint: Option<String>) -> TranslatorConfig {
        TranslatorConfig {
            endpoint,
            key: Some("test-key".to_string()),
            region: Some("westeurope".to_string()),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_translate_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/translate"))
            .and(query_param("api-version", "3.0"))
            .and(query_param("from", "en"))
            .and(query_param("to", "es"))
            .and(header("Ocp-Apim-Subscription-Key", "test-key"))
            .and(header("Ocp-Apim-Subscription-Region", "westeurope"))
            .and(body_json(serde_json::json!([{"Text": "hello"}])))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"translations": [{"text": "hola", "to": "es"}]}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        // Trailing slash on the endpoint is tolerated
        let translator = AzureTranslator::new(&config_for(Some(format!("{}/", server.uri())))).unwrap();
        assert!(translator.is_configured());
        assert_eq!(translator.translate("hello", "en", "es").await, "hola");
    }

    #[tokio::test]
    async fn test_empty_text_makes_no_request() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let translator = AzureTranslator::new(&config_for(Some(server.uri()))).unwrap();
        assert_eq!(translator.translate("", "en", "es").await, "");
    }

    #[tokio::test]
    async fn test_unconfigured_returns_empty() {
        let translator = AzureTranslator::new(&config_for(None)).unwrap();
        assert!(!translator.is_configured());
        assert_eq!(translator.translate("hello", "en", "es").await, "");
    }

    #[tokio::test]
    async fn test_http_error_returns_empty() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/translate"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .expect(1)
            .mount(&server)
            .await;

        let translator = AzureTranslator::new(&config_for(Some(server.uri()))).unwrap();
        assert_eq!(translator.translate("hello", "en", "es").await, "");
    }

    #[tokio::test]
    async fn test_unexpected_body_returns_empty() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/translate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let translator = AzureTranslator::new(&config_for(Some(server.uri()))).unwrap();
        assert_eq!(translator.translate("hello", "en", "es").await, "");
    }
}
