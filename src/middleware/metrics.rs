use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

/// Per-route request counters.
///
/// Routes are keyed by their pattern (`POST /api/models/{model_id}/load`),
/// so one entry covers every tier and config id. Unmatched paths share a
/// single `"{METHOD} <unmatched>"` entry.
pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let endpoint = endpoint_label(req.method().as_str(), req.match_pattern().as_deref());
        let app_state = req.app_data::<web::Data<AppState>>().cloned();

        if let Some(state) = &app_state {
            state.increment_request_count();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            let is_error = match &result {
                Ok(response) => {
                    response.status().is_client_error() || response.status().is_server_error()
                }
                Err(_) => true,
            };

            if let Some(state) = app_state {
                state.record_endpoint_request(&endpoint, duration_ms, is_error);
                if is_error {
                    state.increment_error_count();
                }
            }

            result
        })
    }
}

fn endpoint_label(method: &str, pattern: Option<&str>) -> String {
    format!("{} {}", method, pattern.unwrap_or("<unmatched>"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_state;
    use actix_web::test::{call_service, init_service, TestRequest};
    use actix_web::App;

    #[test]
    fn test_endpoint_label() {
        assert_eq!(
            endpoint_label("POST", Some("/api/models/{model_id}/load")),
            "POST /api/models/{model_id}/load"
        );
        assert_eq!(endpoint_label("GET", None), "GET <unmatched>");
    }

    #[actix_web::test]
    async fn test_requests_grouped_by_route_pattern() {
        let cache = tempfile::tempdir().unwrap();
        let state = test_state(cache.path());
        let app = init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(MetricsMiddleware)
                .configure(crate::handlers::configure_routes),
        )
        .await;

        for uri in ["/api/models/tiny/status", "/api/models/base/status", "/api/models/nope/status"] {
            call_service(&app, TestRequest::get().uri(uri).to_request()).await;
        }

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 3);
        assert_eq!(snapshot.error_count, 1);
        let metric = &snapshot.endpoint_metrics["GET /api/models/{model_id}/status"];
        assert_eq!(metric.request_count, 3);
        assert_eq!(metric.error_count, 1);
    }
}
