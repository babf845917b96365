//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//! - The Azure variables the live-translation service has always been deployed with
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment variables (HOST, PORT, AZURE_SPEECH_KEY, AZURE_TRANSLATOR_KEY, ...)
//! 2. Environment variables (APP_SERVER__PORT, APP_SPEECH__STOP_TIMEOUT_MS, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Secrets:
//! Engine keys live in `speech.key` and `translator.key`. They are never echoed
//! back by the config endpoint (see [`AppConfig::redacted`]).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub performance: PerformanceConfig,
    pub speech: SpeechConfig,
    pub translator: TranslatorConfig,
    pub languages: LanguageDefaults,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Connection and session limits.
///
/// ## Fields:
/// - `max_concurrent_sessions`: Live WebSocket sessions accepted at once
/// - `heartbeat_interval_secs`: How often the server pings each client
/// - `client_timeout_secs`: Silence after which a client is considered gone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

/// Streaming speech-recognition engine settings.
///
/// `key` and `region` are both required before a stream can start; a session
/// that asks to start without them receives a `missing_speech_env` error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    pub key: Option<String>,
    pub region: Option<String>,
    /// Full `wss://` base URL overriding the regional endpoint (sovereign clouds, proxies)
    pub endpoint: Option<String>,
    /// PCM sample rate of the client audio (16-bit mono)
    pub sample_rate: u32,
    /// Upper bound on how long a recognizer stop may take
    pub stop_timeout_ms: u64,
}

/// Text translation engine settings.
///
/// Translation is best-effort: when `endpoint` or `key` is missing, finals are
/// delivered untranslated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    pub endpoint: Option<String>,
    pub key: Option<String>,
    pub region: Option<String>,
    pub timeout_secs: u64,
}

/// Language pair every new session starts with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageDefaults {
    pub source: String,
    pub target: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 5000,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 50,
                heartbeat_interval_secs: 15,
                client_timeout_secs: 45,
            },
            speech: SpeechConfig {
                key: None,
                region: None,
                endpoint: None,
                sample_rate: 16000,
                stop_timeout_ms: 5000,
            },
            translator: TranslatorConfig {
                endpoint: None,
                key: None,
                region: None,
                timeout_secs: 10,
            },
            languages: LanguageDefaults {
                source: "en".to_string(),
                target: "es".to_string(),
            },
        }
    }
}

/// Deployment variables mapped onto their configuration keys.
const DEPLOYMENT_OVERRIDES: &[(&str, &str)] = &[
    ("HOST", "server.host"),
    ("PORT", "server.port"),
    ("AZURE_SPEECH_KEY", "speech.key"),
    ("AZURE_SPEECH_REGION", "speech.region"),
    ("AZURE_SPEECH_ENDPOINT", "speech.endpoint"),
    ("AZURE_TRANSLATOR_ENDPOINT", "translator.endpoint"),
    ("AZURE_TRANSLATOR_KEY", "translator.key"),
    ("AZURE_TRANSLATOR_REGION", "translator.region"),
];

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_PERFORMANCE__MAX_CONCURRENT_SESSIONS=200`: Raise the session limit
    /// - `AZURE_SPEECH_REGION=westeurope`: Speech region
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        for (var, key) in DEPLOYMENT_OVERRIDES {
            // Blank values are treated as unset, matching how the variables are
            // usually templated into container environments
            if let Ok(value) = env::var(var) {
                if !value.trim().is_empty() {
                    settings = settings.set_override(*key, value.trim().to_string())?;
                }
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.performance.client_timeout_secs <= self.performance.heartbeat_interval_secs {
            return Err(anyhow::anyhow!(
                "Client timeout ({}s) must be longer than the heartbeat interval ({}s)",
                self.performance.client_timeout_secs,
                self.performance.heartbeat_interval_secs
            ));
        }

        if !matches!(self.speech.sample_rate, 8000 | 16000) {
            return Err(anyhow::anyhow!(
                "Unsupported speech sample rate {} (expected 8000 or 16000)",
                self.speech.sample_rate
            ));
        }

        if self.speech.stop_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Speech stop timeout must be greater than 0"));
        }

        if self.translator.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Translator timeout must be greater than 0"));
        }

        if self.languages.source.trim().is_empty() || self.languages.target.trim().is_empty() {
            return Err(anyhow::anyhow!("Default source and target languages must be set"));
        }

        Ok(())
    }

    /// Whether both credentials the recognition engine needs are present.
    pub fn speech_configured(&self) -> bool {
        is_set(&self.speech.key) && is_set(&self.speech.region)
    }

    /// Whether the translator has an endpoint and a key.
    pub fn translator_configured(&self) -> bool {
        is_set(&self.translator.endpoint) && is_set(&self.translator.key)
    }

    /// Copy of this configuration safe to return over HTTP.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.speech.key = copy.speech.key.as_ref().map(|_| "***".to_string());
        copy.translator.key = copy.translator.key.as_ref().map(|_| "***".to_string());
        copy
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only non-secret fields can be changed at runtime, e.g.
    /// `{"languages": {"target": "fr"}}` or `{"performance": {"max_concurrent_sessions": 20}}`.
    /// Engine credentials, endpoints and the translator timeout are fixed when
    /// the engines are built at startup, so they are ignored here.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Server port {} is out of range", port))?;
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance.get("max_concurrent_sessions").and_then(|v| v.as_u64()) {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
            if let Some(secs) = performance.get("heartbeat_interval_secs").and_then(|v| v.as_u64()) {
                self.performance.heartbeat_interval_secs = secs;
            }
            if let Some(secs) = performance.get("client_timeout_secs").and_then(|v| v.as_u64()) {
                self.performance.client_timeout_secs = secs;
            }
        }

        if let Some(speech) = partial_config.get("speech") {
            if let Some(ms) = speech.get("stop_timeout_ms").and_then(|v| v.as_u64()) {
                self.speech.stop_timeout_ms = ms;
            }
        }

        if let Some(languages) = partial_config.get("languages") {
            if let Some(source) = languages.get("source").and_then(|v| v.as_str()) {
                self.languages.source = source.to_string();
            }
            if let Some(target) = languages.get("target").and_then(|v| v.as_str()) {
                self.languages.target = target.to_string();
            }
        }

        self.validate()?;
        Ok(())
    }
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.languages.source, "en");
        assert_eq!(config.languages.target, "es");
        assert!(config.validate().is_ok());
        // No engine credentials out of the box
        assert!(!config.speech_configured());
        assert!(!config.translator_configured());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.speech.sample_rate = 44100;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.client_timeout_secs = config.performance.heartbeat_interval_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "languages": {"target": "fr"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.languages.target, "fr");
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_config_update_ignores_startup_only_engine_settings() {
        let mut config = AppConfig::default();
        let timeout_secs = config.translator.timeout_secs;
        let json = r#"{"translator": {"timeout_secs": 99, "key": "k"}, "speech": {"key": "k", "stop_timeout_ms": 750}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.translator.timeout_secs, timeout_secs);
        assert_eq!(config.translator.key, None);
        assert_eq!(config.speech.key, None);
        // Read per session, so it stays updatable
        assert_eq!(config.speech.stop_timeout_ms, 750);
    }

    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"server": {"port": 70000}}"#).is_err());
        assert!(config.update_from_json(r#"{"speech": {"stop_timeout_ms": 0}}"#).is_err());
    }

    #[test]
    fn test_credentials_and_redaction() {
        let mut config = AppConfig::default();
        config.speech.key = Some("secret".to_string());
        assert!(!config.speech_configured());
        config.speech.region = Some("westeurope".to_string());
        assert!(config.speech_configured());

        config.translator.endpoint = Some("https://api.cognitive.microsofttranslator.com".to_string());
        config.translator.key = Some("   ".to_string());
        assert!(!config.translator_configured());

        let redacted = config.redacted();
        assert_eq!(redacted.speech.key.as_deref(), Some("***"));
        assert_eq!(redacted.speech.region.as_deref(), Some("westeurope"));
    }
}
