use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Startup settings the browser UI needs.
///
/// ## Endpoint: `GET /config`
///
/// `model` is the tier configured at startup, which is not necessarily the
/// one loaded right now (see `/health`).
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = &state.config;

    Ok(HttpResponse::Ok().json(json!({
        "model": config.model.name,
        "port": config.server.port,
        "host": config.server.host
    })))
}

#[cfg(test)]
mod tests {
    use crate::testing::{test_app, test_state};
    use actix_web::test;
    use serde_json::Value;

    #[actix_web::test]
    async fn test_get_config() {
        let cache = tempfile::tempdir().unwrap();
        let state = test_state(cache.path());
        let app = test_app!(state);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/config").to_request()).await;
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["model"], state.config.model.name.as_str());
        assert_eq!(body["port"], state.config.server.port);
        assert_eq!(body["host"], state.config.server.host.as_str());
    }
}
