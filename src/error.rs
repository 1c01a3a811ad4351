//! # Error Handling
//!
//! This module defines the HTTP-facing error type and how it's converted into
//! JSON responses. Components below the HTTP layer have their own `thiserror`
//! enums (`ModelError`, `RegistryError`, `LlmError`, `EngineError`); each of
//! them converts into `AppError` through a `From` impl, so handlers can use `?`.
//!
//! ## HTTP Status Code Mapping:
//! - NotFound → 404
//! - BadRequest / InvalidConfig → 400
//! - AlreadyDownloading / AlreadyLoaded / NotReady / ModelNotLoaded → 409
//! - UnsupportedAudio → 415, DecodeError → 422
//! - OptimizationUnavailable → 503
//! - UpstreamError → 502, TimeoutError → 504
//! - Internal → 500
//!
//! Nothing is retried on the server side; the client sees the message and
//! decides what to do.

use crate::llm::client::LlmError;
use crate::llm::registry::RegistryError;
use crate::transcription::engine::EngineError;
use crate::transcription::lifecycle::ModelError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Error types surfaced to HTTP clients.
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::BadRequest("No audio file provided".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (I/O failures, panicked workers, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested model tier or LLM config does not exist
    NotFound(String),

    /// An LLM config is missing a required field
    InvalidConfig(String),

    /// A download for this tier is already running
    AlreadyDownloading(String),

    /// A different model is loaded; it has to be unloaded first
    AlreadyLoaded(String),

    /// The tier has not finished downloading
    NotReady(String),

    /// No speech model is loaded
    ModelNotLoaded(String),

    /// Optimization requested but no default LLM config exists
    OptimizationUnavailable(String),

    /// The LLM endpoint answered with a non-success status
    UpstreamError { status: Option<u16>, message: String },

    /// The LLM endpoint did not answer before the deadline
    TimeoutError(String),

    /// The uploaded audio container is not recognised
    UnsupportedAudio(String),

    /// The uploaded audio could not be decoded
    DecodeError(String),
}

impl AppError {
    /// Machine-readable error type used in the JSON body.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidConfig(_) => "invalid_config",
            AppError::AlreadyDownloading(_) => "already_downloading",
            AppError::AlreadyLoaded(_) => "already_loaded",
            AppError::NotReady(_) => "not_ready",
            AppError::ModelNotLoaded(_) => "model_not_loaded",
            AppError::OptimizationUnavailable(_) => "optimization_unavailable",
            AppError::UpstreamError { .. } => "upstream_error",
            AppError::TimeoutError(_) => "timeout_error",
            AppError::UnsupportedAudio(_) => "unsupported_audio",
            AppError::DecodeError(_) => "decode_error",
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::UpstreamError { status: Some(status), message } => {
                format!("LLM endpoint returned {}: {}", status, message)
            }
            AppError::UpstreamError { status: None, message } => message.clone(),
            AppError::Internal(msg)
            | AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::InvalidConfig(msg)
            | AppError::AlreadyDownloading(msg)
            | AppError::AlreadyLoaded(msg)
            | AppError::NotReady(msg)
            | AppError::ModelNotLoaded(msg)
            | AppError::OptimizationUnavailable(msg)
            | AppError::TimeoutError(msg)
            | AppError::UnsupportedAudio(msg)
            | AppError::DecodeError(msg) => msg.clone(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
            AppError::AlreadyDownloading(msg) => write!(f, "Already downloading: {}", msg),
            AppError::AlreadyLoaded(msg) => write!(f, "Already loaded: {}", msg),
            AppError::NotReady(msg) => write!(f, "Model not ready: {}", msg),
            AppError::ModelNotLoaded(msg) => write!(f, "Model not loaded: {}", msg),
            AppError::OptimizationUnavailable(msg) => {
                write!(f, "Optimization unavailable: {}", msg)
            }
            AppError::UpstreamError { .. } => write!(f, "Upstream error: {}", self.message()),
            AppError::TimeoutError(msg) => write!(f, "Timeout: {}", msg),
            AppError::UnsupportedAudio(msg) => write!(f, "Unsupported audio: {}", msg),
            AppError::DecodeError(msg) => write!(f, "Decode error: {}", msg),
        }
    }
}

/// Converts errors into HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "model_not_loaded",
///     "message": "No speech model is loaded",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyDownloading(_)
            | AppError::AlreadyLoaded(_)
            | AppError::NotReady(_)
            | AppError::ModelNotLoaded(_) => StatusCode::CONFLICT,
            AppError::OptimizationUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::UpstreamError { .. } => StatusCode::BAD_GATEWAY,
            AppError::TimeoutError(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::UnsupportedAudio(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::DecodeError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": self.error_type(),
                "message": self.message(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// `anyhow` errors only come from plumbing (spawned tasks, file I/O), so they
/// become 500s.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<ModelError> for AppError {
    fn from(err: ModelError) -> Self {
        let message = err.to_string();
        match err {
            ModelError::UnknownModel(_) => AppError::NotFound(message),
            ModelError::AlreadyDownloading(_) => AppError::AlreadyDownloading(message),
            ModelError::AlreadyLoaded { .. } => AppError::AlreadyLoaded(message),
            ModelError::NotReady { .. } => AppError::NotReady(message),
            ModelError::NotLoaded => AppError::ModelNotLoaded(message),
            ModelError::Engine(engine) => engine.into(),
            ModelError::LoadFailed(_) | ModelError::WorkerFailed(_) => AppError::Internal(message),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::UnsupportedFormat(_) => AppError::UnsupportedAudio(message),
            EngineError::Decode(_) => AppError::DecodeError(message),
            EngineError::Inference(_) => AppError::Internal(message),
        }
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        let message = err.to_string();
        match err {
            RegistryError::NotFound(_) => AppError::NotFound(message),
            RegistryError::InvalidConfig(_) => AppError::InvalidConfig(message),
            RegistryError::Storage(_) => AppError::Internal(message),
        }
    }
}

impl From<LlmError> for AppError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Upstream { status, message } => AppError::UpstreamError {
                status: Some(status),
                message,
            },
            LlmError::Timeout => AppError::TimeoutError(err.to_string()),
            LlmError::Request(_) | LlmError::EmptyResponse => AppError::UpstreamError {
                status: None,
                message: err.to_string(),
            },
            LlmError::InvalidInput(_) => AppError::BadRequest(err.to_string()),
        }
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::model::ModelSize;

    #[test]
    fn test_lifecycle_errors_map_to_conflict() {
        let err: AppError = ModelError::AlreadyDownloading(ModelSize::Tiny).into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.error_type(), "already_downloading");

        let err: AppError = ModelError::NotLoaded.into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.error_type(), "model_not_loaded");
    }

    #[test]
    fn test_unknown_model_is_not_found() {
        let err: AppError = ModelError::UnknownModel("huge".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(err.to_string().contains("huge"));
    }

    #[test]
    fn test_llm_errors() {
        let err: AppError = LlmError::Upstream {
            status: 401,
            message: "bad key".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.to_string().contains("401"));

        let err: AppError = LlmError::Timeout.into();
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_decode_errors() {
        let err: AppError = EngineError::UnsupportedFormat("text/plain".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let err: AppError = EngineError::Decode("truncated header".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
