//! # Application State Management
//!
//! Shared state accessed by HTTP handlers, WebSocket actors and the session
//! registry at the same time.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (every handler and every session task holds a reference)
//! - **RwLock**: Many readers OR one writer
//! - **T**: The actual data being protected
//!
//! ### Poisoned locks
//! A lock is "poisoned" when a thread panicked while holding it. The data behind
//! these locks is plain counters and configuration that are always left in a
//! consistent state, so a poisoned lock is recovered with `into_inner` instead
//! of taking the whole server down.

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// The main application state shared across all handlers and sessions.
///
/// ## Rust Concepts:
/// - **#[derive(Clone)]**: Cloning only copies the `Arc` pointers, all clones see the same data
/// - **Instant**: Server start time, never changes so it needs no lock
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request and session counters
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests and live sessions.
///
/// ## Why these metrics matter:
/// - **request_count / error_count**: HTTP load and reliability
/// - **active_sessions**: Live WebSocket sessions right now (capacity planning)
/// - **streams_started / recognizer_failures**: How often recognition starts and fails
/// - **finals_delivered / translations_delivered**: Output actually reaching clients
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of failed HTTP requests since server start
    pub error_count: u64,

    /// Current number of live sessions
    pub active_sessions: u32,

    /// Sessions accepted since server start
    pub sessions_total: u64,

    /// Recognizers successfully started
    pub streams_started: u64,

    /// Recognizers that failed to start (missing credentials included)
    pub recognizer_failures: u64,

    /// `final_result` events sent to clients
    pub finals_delivered: u64,

    /// `final_translation` events sent to clients
    pub translations_delivered: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

impl AppState {
    /// Create a new AppState with the given configuration.
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// ## Why clone:
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
        Ok(())
    }

    fn with_metrics(&self, update: impl FnOnce(&mut AppMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut metrics);
    }

    pub fn increment_request_count(&self) {
        self.with_metrics(|m| m.request_count += 1);
    }

    pub fn increment_error_count(&self) {
        self.with_metrics(|m| m.error_count += 1);
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// ## Parameters:
    /// - **endpoint**: The API endpoint (e.g., "GET /health")
    /// - **duration_ms**: How long the request took to process
    /// - **is_error**: Whether this request resulted in an error
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        self.with_metrics(|m| {
            let endpoint_metric = m.endpoint_metrics.entry(endpoint.to_string()).or_default();
            endpoint_metric.request_count += 1;
            endpoint_metric.total_duration_ms += duration_ms;
            if is_error {
                endpoint_metric.error_count += 1;
            }
        });
    }

    /// Called when the registry accepts a new session.
    pub fn increment_active_sessions(&self) {
        self.with_metrics(|m| {
            m.active_sessions += 1;
            m.sessions_total += 1;
        });
    }

    /// Called when a session is removed. Never goes below zero.
    pub fn decrement_active_sessions(&self) {
        self.with_metrics(|m| m.active_sessions = m.active_sessions.saturating_sub(1));
    }

    pub fn record_stream_started(&self) {
        self.with_metrics(|m| m.streams_started += 1);
    }

    pub fn record_recognizer_failure(&self) {
        self.with_metrics(|m| m.recognizer_failures += 1);
    }

    pub fn record_final_delivered(&self) {
        self.with_metrics(|m| m.finals_delivered += 1);
    }

    pub fn record_translation_delivered(&self) {
        self.with_metrics(|m| m.translations_delivered += 1);
    }

    /// Get a consistent copy of the current metrics (used for the /metrics endpoint).
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
