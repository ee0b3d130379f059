use std::sync::Arc;

use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::engine::ProtocolError;
use crate::server::AppState;

pub mod exchange;

pub use exchange::{ack_handler, get_handler, hello_handler, send_handler};

pub type ApiResponse = (StatusCode, HeaderMap, Json<serde_json::Value>);

pub fn success_response<T: Serialize>(data: T, headers: Option<HeaderMap>) -> ApiResponse {
    (
        StatusCode::OK,
        headers.unwrap_or_default(),
        Json(json!({
            "data": data,
            "error": null
        })),
    )
}

pub fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    headers: Option<HeaderMap>,
) -> ApiResponse {
    (
        status,
        headers.unwrap_or_default(),
        Json(json!({
            "data": null,
            "error": error.into()
        })),
    )
}

impl ProtocolError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidKeyMaterial(_) | Self::MalformedIdentity | Self::DecryptionFailure => {
                StatusCode::BAD_REQUEST
            }
            Self::UnknownIdentity => StatusCode::NOT_FOUND,
            Self::ChallengeMismatch => StatusCode::FORBIDDEN,
            Self::Storage(_) | Self::Crypto(_) | Self::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ProtocolError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal details stay in the log
        let message = if status.is_server_error() {
            error!(err = %self, "Request failed");
            "Internal server error".to_owned()
        } else {
            self.to_string()
        };

        error_response(status, message, None).into_response()
    }
}

/// Server public key handler
///
/// Returns the server's public JWK, ready for WebCrypto `importKey`.
pub async fn server_key_handler(state: Extension<Arc<AppState>>) -> impl IntoResponse {
    Json(state.0.engine.server_key().public_jwk().clone())
}

/// Health check handler
///
/// This endpoint returns the health status of the key exchange service.
///
/// # Arguments
///
/// * `state` - The application state
///
/// # Returns
///
/// * `impl IntoResponse` - The response
pub async fn health_handler(state: Extension<Arc<AppState>>) -> impl IntoResponse {
    // Check the connection to the storage backend
    let storage_ok = state.0.key_store.storage().exists("health-check").await.is_ok();

    let response = json!({
        "status": if storage_ok { "healthy" } else { "unhealthy" },
        "storage": storage_ok,
        "identities": state.0.engine.registry().len(),
        "uptime_seconds": state.0.started_at.elapsed().as_secs(),
    });

    success_response(response, None)
}
