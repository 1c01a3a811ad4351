//! # Model Management REST API Handlers
//!
//! HTTP endpoints over the model lifecycle manager.
//!
//! ## Available Endpoints:
//! - `GET /api/models` - All tiers with status, plus the current model
//! - `POST /api/models/{model_id}/download` - Start a background download
//! - `GET /api/models/{model_id}/status` - Poll one tier
//! - `POST /api/models/{model_id}/load` - Make a downloaded tier current
//! - `POST /api/models/unload` - Release the current model

use crate::error::AppError;
use crate::state::AppState;
use crate::transcription::{DownloadTicket, LoadOutcome, ModelDescriptor, ModelSize};
use actix_web::{web, HttpResponse};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct ModelListResponse {
    pub available_models: Vec<ModelSize>,
    pub downloaded_models: Vec<ModelSize>,
    pub current_model: Option<ModelSize>,
    pub models: Vec<ModelDescriptor>,
}

/// Outcome of a lifecycle action.
#[derive(Debug, Serialize)]
pub struct ModelActionResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_time_seconds: Option<f64>,
}

impl ModelActionResponse {
    fn ok(message: String) -> Self {
        Self {
            success: true,
            message,
            load_time_seconds: None,
        }
    }
}

/// List every tier with its live status.
///
/// ## Endpoint: `GET /api/models`
///
/// ## Response:
/// ```json
/// {
///   "available_models": ["tiny", "base", "small", "medium", "large"],
///   "downloaded_models": ["medium"],
///   "current_model": "medium",
///   "models": [
///     {"id": "tiny", "status": "downloading", "progress": 37, "loaded": false, ...}
///   ]
/// }
/// ```
pub async fn list_models(app_state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let models = &app_state.models;
    Ok(HttpResponse::Ok().json(ModelListResponse {
        available_models: ModelSize::ALL.to_vec(),
        downloaded_models: models.downloaded_models(),
        current_model: models.current_model(),
        models: models.list_models(),
    }))
}

/// Start downloading a tier.
///
/// ## Endpoint: `POST /api/models/{model_id}/download`
///
/// Returns `202 Accepted` once the download has started, or `200 OK` when
/// the tier is already downloaded. Progress is polled with the status
/// endpoint.
pub async fn download_model(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let model_id = path.into_inner();

    match app_state.models.download(&model_id)? {
        DownloadTicket::AlreadyPresent => Ok(HttpResponse::Ok().json(ModelActionResponse::ok(
            format!("Model {} is already downloaded", model_id.to_lowercase()),
        ))),
        DownloadTicket::Started(_) => {
            info!(model = %model_id, "Download requested");
            Ok(HttpResponse::Accepted().json(ModelActionResponse::ok(format!(
                "Download of model {} started",
                model_id.to_lowercase()
            ))))
        }
    }
}

/// ## Endpoint: `GET /api/models/{model_id}/status`
pub async fn get_model_status(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let descriptor = app_state.models.get_status(&path)?;
    Ok(HttpResponse::Ok().json(descriptor))
}

/// Load a downloaded tier.
///
/// ## Endpoint: `POST /api/models/{model_id}/load`
///
/// Fails with 409 when the tier isn't downloaded or another tier is loaded.
pub async fn load_model(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let response = match app_state.models.load(&path).await? {
        LoadOutcome::Loaded { size, elapsed } => ModelActionResponse {
            success: true,
            message: format!("Model {} loaded", size),
            load_time_seconds: Some(elapsed.as_secs_f64()),
        },
        LoadOutcome::AlreadyCurrent(size) => {
            ModelActionResponse::ok(format!("Model {} is already loaded", size))
        }
    };
    Ok(HttpResponse::Ok().json(response))
}

/// ## Endpoint: `POST /api/models/unload`
pub async fn unload_model(app_state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let message = match app_state.models.unload().await {
        Some(size) => format!("Model {} unloaded", size),
        None => "No model was loaded".to_string(),
    };
    Ok(HttpResponse::Ok().json(ModelActionResponse::ok(message)))
}
