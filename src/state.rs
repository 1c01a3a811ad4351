//! # Application State
//!
//! Shared state handed to every HTTP handler through `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: the startup configuration, read-only after boot
//! - **models**: the model lifecycle manager (download/load/unload/current)
//! - **llm_configs**: the saved LLM endpoint registry
//! - **llm**: the chat-completion client
//! - **transcriber**: upload validation + recognition + optimization
//! - **metrics**: request counters, updated by the metrics middleware
//!
//! Every component is behind an `Arc`, so cloning `AppState` for each
//! actix worker is cheap and all workers see the same models and configs.

use crate::config::AppConfig;
use crate::llm::{LlmClient, LlmConfigRegistry};
use crate::transcription::{ModelManager, TranscriptionGateway};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub models: Arc<ModelManager>,
    pub llm_configs: Arc<LlmConfigRegistry>,
    pub llm: Arc<LlmClient>,
    pub transcriber: Arc<TranscriptionGateway>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of failed requests (4xx and 5xx) since server start
    pub error_count: u64,

    /// Recognition requests currently running
    pub active_transcriptions: u32,

    /// Key: route pattern (e.g., "POST /api/models/{model_id}/load")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    pub error_count: u64,
}

impl AppState {
    /// Wire the shared components together.
    ///
    /// The transcription gateway is built here from the other components so
    /// it always shares their instances.
    pub fn new(
        config: AppConfig,
        models: Arc<ModelManager>,
        llm_configs: Arc<LlmConfigRegistry>,
        llm: Arc<LlmClient>,
    ) -> Self {
        let transcriber = Arc::new(TranscriptionGateway::new(
            models.clone(),
            llm_configs.clone(),
            llm.clone(),
            config.max_upload_bytes(),
        ));

        Self {
            config: Arc::new(config),
            models,
            llm_configs,
            llm,
            transcriber,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().error_count += 1;
    }

    /// Record one finished request against its route.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write();

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count one recognition as active until the returned guard is dropped.
    ///
    /// The guard decrements on drop, so a request cancelled mid-transcription
    /// (client disconnect) still leaves the counter balanced.
    pub fn track_transcription(&self) -> ActiveTranscription {
        self.metrics.write().active_transcriptions += 1;
        ActiveTranscription {
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Copy of the counters, so the lock isn't held while serializing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_transcriptions: metrics.active_transcriptions,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Guard returned by [`AppState::track_transcription`].
pub struct ActiveTranscription {
    metrics: Arc<RwLock<AppMetrics>>,
}

impl Drop for ActiveTranscription {
    fn drop(&mut self) {
        let mut metrics = self.metrics.write();
        metrics.active_transcriptions = metrics.active_transcriptions.saturating_sub(1);
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
