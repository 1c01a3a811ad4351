//! # LLM Config & Optimization Handlers
//!
//! ## Available Endpoints:
//! - `GET /api/llm-configs` - All saved configs, keys masked
//! - `POST /api/llm-configs` - Create a config
//! - `GET|PUT|DELETE /api/llm-configs/{id}` - Read, patch or remove one config
//! - `POST /api/llm-configs/test` - Probe an unsaved endpoint
//! - `POST /api/llm-configs/{id}/test` - Probe a saved endpoint
//! - `GET /api/llm-status` - Whether optimization is available
//! - `POST /api/optimize-text` - Run text through the default config
//!
//! API keys only ever leave the server in masked form.

use crate::error::AppError;
use crate::llm::{LlmConfigPatch, LlmConfigView, NewLlmConfig};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct LlmConfigListResponse {
    pub configs: Vec<LlmConfigView>,
}

/// Body of `POST /api/llm-configs/test`.
#[derive(Debug, Deserialize)]
pub struct ConnectionTestRequest {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct LlmStatusResponse {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_config: Option<LlmConfigView>,
}

#[derive(Debug, Deserialize)]
pub struct OptimizeTextRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct OptimizeTextResponse {
    pub optimized_text: String,
}

/// ## Endpoint: `GET /api/llm-configs`
///
/// ## Response:
/// ```json
/// {"configs": [{"id": "…", "name": "deepseek", "api_key": "sk-1****abcd",
///   "base_url": "https://api.deepseek.com/v1", "model": "deepseek-chat", "is_default": true}]}
/// ```
pub async fn list_llm_configs(app_state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(LlmConfigListResponse {
        configs: app_state.llm_configs.list(),
    }))
}

/// ## Endpoint: `GET /api/llm-configs/{id}`
pub async fn get_llm_config(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(app_state.llm_configs.get(&path)?))
}

/// Create a config. When `is_default` is set, every other config loses its
/// default flag.
///
/// ## Endpoint: `POST /api/llm-configs` → `201 Created`
pub async fn create_llm_config(
    app_state: web::Data<AppState>,
    body: web::Json<NewLlmConfig>,
) -> Result<HttpResponse, AppError> {
    let created = app_state.llm_configs.create(body.into_inner())?;
    Ok(HttpResponse::Created().json(created))
}

/// Patch a config. Omitted fields stay as they are; a masked `api_key`
/// keeps the stored key.
///
/// ## Endpoint: `PUT /api/llm-configs/{id}`
pub async fn update_llm_config(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<LlmConfigPatch>,
) -> Result<HttpResponse, AppError> {
    let updated = app_state.llm_configs.update(&path, body.into_inner())?;
    Ok(HttpResponse::Ok().json(updated))
}

/// ## Endpoint: `DELETE /api/llm-configs/{id}`
pub async fn delete_llm_config(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    app_state.llm_configs.delete(&path)?;
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

/// Probe a saved config with its stored key.
///
/// ## Endpoint: `POST /api/llm-configs/{id}/test`
///
/// Connectivity failures are a `200` with `available: false`.
pub async fn test_llm_config(
    app_state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let config = app_state.llm_configs.get_secret(&path)?;
    let probe = app_state
        .llm
        .test(&config.base_url, &config.api_key, &config.model)
        .await;
    info!(config_id = %config.id, available = probe.available, "LLM config tested");
    Ok(HttpResponse::Ok().json(probe))
}

/// Probe an endpoint that hasn't been saved yet.
///
/// ## Endpoint: `POST /api/llm-configs/test`
pub async fn test_llm_connection(
    app_state: web::Data<AppState>,
    body: web::Json<ConnectionTestRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    if request.base_url.trim().is_empty() || request.model.trim().is_empty() {
        return Err(AppError::BadRequest(
            "base_url and model are required".to_string(),
        ));
    }

    let probe = app_state
        .llm
        .test(request.base_url.trim(), &request.api_key, request.model.trim())
        .await;
    Ok(HttpResponse::Ok().json(probe))
}

/// Whether `/recognize?optimize=true` can do anything.
///
/// ## Endpoint: `GET /api/llm-status`
///
/// ## Response:
/// ```json
/// {"enabled": true, "current_config": {"id": "…", "name": "deepseek", "api_key": "sk-1****abcd", ...}}
/// ```
/// `current_config` is omitted when no config is marked default.
pub async fn llm_status(app_state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let current = app_state.llm_configs.get_default();
    Ok(HttpResponse::Ok().json(LlmStatusResponse {
        enabled: current.is_some(),
        current_config: current.as_ref().map(LlmConfigView::from),
    }))
}

/// Run already-transcribed text through the default config.
///
/// ## Endpoint: `POST /api/optimize-text`
///
/// ## Request / Response:
/// ```json
/// {"text": "嗯 那个 今天天气不错"}
/// {"optimized_text": "今天天气不错。"}
/// ```
///
/// Returns 503 when no default config is set, 502/504 when the endpoint
/// fails or times out.
pub async fn optimize_text(
    app_state: web::Data<AppState>,
    body: web::Json<OptimizeTextRequest>,
) -> Result<HttpResponse, AppError> {
    let optimized_text = app_state.transcriber.optimize(&body.text).await?;
    Ok(HttpResponse::Ok().json(OptimizeTextResponse { optimized_text }))
}
