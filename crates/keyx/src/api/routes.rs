use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Extension, Router};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::api::extract::IDENTITY_HEADER;
use crate::api::handlers::{
    ack_handler, get_handler, health_handler, hello_handler, send_handler, server_key_handler,
};
use crate::api::security::RateLimitLayer;
use crate::config::{CorsConfig, KeyxConfig};
use crate::server::AppState;

/// Creates and configures the router with all routes and middleware
pub fn create_router(state: Arc<AppState>, config: &KeyxConfig) -> Router {
    let mut router = Router::new()
        // Registration handshake
        .route("/hello", post(hello_handler))
        .route("/ack", post(ack_handler))
        // Encrypted message exchange
        .route("/get", get(get_handler))
        .route("/send", post(send_handler))
        // Bootstrap and monitoring
        .route("/server-key", get(server_key_handler))
        .route("/health", get(health_handler))
        .layer(RequestBodyLimitLayer::new(config.security.max_body_size));

    if config.security.rate_limit.enabled {
        router = router.layer(RateLimitLayer::new(
            config.security.rate_limit,
            config.security.trust_proxy,
        ));
    }

    router
        .layer(cors_layer(&config.cors))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    if config.allow_all_origins {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let methods: Vec<Method> = config
        .allowed_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();

    let headers: Vec<HeaderName> = config
        .allowed_headers
        .iter()
        .filter_map(|h| h.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
        .expose_headers([HeaderName::from_static(IDENTITY_HEADER)])
}
