use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::bootstrap::Application;
use crate::{chat, health, inventory};

/// Full HTTP surface: chat, inventory, stats and health behind one CORS layer.
pub fn build_router(app: &Application) -> Router {
    Router::new()
        .merge(chat::router(app.orchestrator.clone()))
        .merge(inventory::router(app.catalog.clone()))
        .merge(health::router(app.db_pool.clone(), app.catalog.clone()))
        .layer(cors_layer(&app.config.server.cors_origins))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    if origins.is_empty() {
        info!(
            event_name = "system.server.cors_open",
            correlation_id = "bootstrap",
            "no cors origins configured, allowing any origin"
        );
        return cors.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(
                    event_name = "system.server.cors_origin_invalid",
                    correlation_id = "bootstrap",
                    origin = %origin,
                    "ignoring cors origin that is not a valid header value"
                );
                None
            }
        })
        .collect();
    cors.allow_origin(allowed)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::build_router;
    use crate::bootstrap::tests::{test_application, workspace};

    #[tokio::test]
    async fn configured_origin_passes_cors_preflight() {
        let dir = workspace();
        let app = test_application(&dir).await;
        let origin = app.config.server.cors_origins.first().cloned().expect("default origin");
        let router = build_router(&app);

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/chat")
            .header(header::ORIGIN, &origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .expect("request");
        let response = router.oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).map(|v| v.as_bytes()),
            Some(origin.as_bytes())
        );
    }

    #[tokio::test]
    async fn health_and_inventory_share_one_router() {
        let dir = workspace();
        let app = test_application(&dir).await;
        let router = build_router(&app);

        for uri in ["/", "/health", "/api/inventory", "/api/stats", "/api/inventory/AX10000"] {
            let request = Request::get(uri).body(Body::empty()).expect("request");
            let response = router.clone().oneshot(request).await.expect("response");
            assert_eq!(response.status(), StatusCode::OK, "GET {uri}");
        }
    }
}
