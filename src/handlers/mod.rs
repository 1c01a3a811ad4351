pub mod config;
pub mod llm;
pub mod models;
pub mod recognize;

pub use self::config::*;
pub use llm::*;
pub use models::*;
pub use recognize::*;

use crate::error::AppError;
use crate::health;
use actix_web::web;

/// Register every HTTP route.
///
/// Shared by `main` and the handler tests so both see the same table.
/// Literal segments (`/api/models/unload`, `/api/llm-configs/test`) are
/// registered before the `{id}` routes they would otherwise match.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        AppError::BadRequest(format!("Invalid JSON body: {}", err)).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        AppError::BadRequest(format!("Invalid query string: {}", err)).into()
    }))
    .route("/recognize", web::post().to(recognize))
    .route("/health", web::get().to(health::health_check))
    .route("/config", web::get().to(get_config))
    .service(
        web::scope("/api")
            .route("/models", web::get().to(list_models))
            .route("/models/unload", web::post().to(unload_model))
            .route("/models/{model_id}/download", web::post().to(download_model))
            .route("/models/{model_id}/status", web::get().to(get_model_status))
            .route("/models/{model_id}/load", web::post().to(load_model))
            .route("/llm-configs", web::get().to(list_llm_configs))
            .route("/llm-configs", web::post().to(create_llm_config))
            .route("/llm-configs/test", web::post().to(test_llm_connection))
            .route("/llm-configs/{id}", web::get().to(get_llm_config))
            .route("/llm-configs/{id}", web::put().to(update_llm_config))
            .route("/llm-configs/{id}", web::delete().to(delete_llm_config))
            .route("/llm-configs/{id}/test", web::post().to(test_llm_config))
            .route("/llm-status", web::get().to(llm_status))
            .route("/optimize-text", web::post().to(optimize_text))
            .route("/v1/metrics", web::get().to(health::detailed_metrics)),
    );
}
