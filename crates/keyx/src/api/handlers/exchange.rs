use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::Extension;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use tracing::debug;

use crate::api::extract::{ClientMetadata, IdentityToken, IDENTITY_HEADER};
use crate::crypto::{KeyImportError, RsaJwk};
use crate::engine::ProtocolError;
use crate::server::AppState;

const OCTET_STREAM: &str = "application/octet-stream";

/// Hello handler
///
/// Takes the client's public JWK and answers with the encrypted challenge.
/// The new identity token travels in the `uuid` response header.
pub async fn hello_handler(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<RsaJwk>, JsonRejection>,
) -> Result<impl IntoResponse, ProtocolError> {
    let Json(jwk) = payload.map_err(|err| KeyImportError::Invalid(err.body_text()))?;

    let outcome = state.0.engine.hello(&jwk)?;

    Ok((
        [
            (HeaderName::from_static(IDENTITY_HEADER), outcome.token.to_string()),
            (CONTENT_TYPE, OCTET_STREAM.to_owned()),
        ],
        outcome.encrypted_challenge,
    ))
}

/// Ack handler
///
/// The body is the raw challenge the client decrypted. Verification and
/// promotion run on their own task and finish even if the client goes away.
pub async fn ack_handler(
    Extension(state): Extension<Arc<AppState>>,
    IdentityToken(token): IdentityToken,
    ClientMetadata(metadata): ClientMetadata,
    body: Bytes,
) -> Result<StatusCode, ProtocolError> {
    let task = tokio::spawn(async move { state.engine.ack(token, &body, metadata).await });

    task.await.map_err(|e| ProtocolError::Task(e.to_string()))??;

    Ok(StatusCode::NO_CONTENT)
}

/// Get handler
///
/// Returns a status message encrypted for the registered caller.
pub async fn get_handler(
    state: Extension<Arc<AppState>>,
    IdentityToken(token): IdentityToken,
) -> Result<impl IntoResponse, ProtocolError> {
    let payload = state.0.engine.fetch(token).await?;

    Ok(([(CONTENT_TYPE, OCTET_STREAM)], payload))
}

/// Send handler
///
/// Decrypts a message addressed to the server and echoes the plaintext.
pub async fn send_handler(
    state: Extension<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ProtocolError> {
    let plaintext = state.0.engine.deliver(body.to_vec()).await?;
    let text = String::from_utf8_lossy(&plaintext).into_owned();

    debug!(message = %text, "Decrypted message");

    Ok(([(CONTENT_TYPE, "text/plain; charset=utf-8")], text))
}
