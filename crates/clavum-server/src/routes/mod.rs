//! HTTP route handlers for the Clavum server.
//!
//! Routes are organized by caller:
//! - `secrets`: agent-authenticated metadata and retrieval endpoints
//! - `approvals`: phone-authenticated consent endpoints
//! - `audit`: agent-authenticated audit listing
//!
//! Request bodies are parsed from the bytes the auth gate already
//! buffered (the body is part of the signed payload), so malformed JSON
//! maps onto the same `BadRequest` kind as every other input fault.

pub mod approvals;
pub mod audit;
pub mod secrets;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::authgate::{agent_auth, phone_auth};
use crate::error::ApiError;
use crate::state::AppState;

/// Build the full API router.
pub fn router(state: Arc<AppState>) -> Router {
    let agent_routes = Router::new()
        .route("/api/secrets/register", post(secrets::register))
        .route("/api/secrets", get(secrets::list))
        .route("/api/secrets/{id}", delete(secrets::remove))
        .route("/api/secrets/{id}/retrieve", post(secrets::retrieve))
        .route(
            "/api/secrets/{id}/retrieve/status",
            get(secrets::retrieve_status),
        )
        .route("/api/audit", get(audit::list))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            agent_auth,
        ));

    let phone_routes = Router::new()
        .route("/api/approvals/pending", get(approvals::pending))
        .route("/api/approvals/{id}/approve", post(approvals::approve))
        .route("/api/approvals/{id}/reject", post(approvals::reject))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            phone_auth,
        ));

    Router::new()
        .merge(agent_routes)
        .merge(phone_routes)
        .route("/healthz", get(health))
        .with_state(state)
}

/// Liveness probe. Public; carries no state.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

// ── Shared helpers ───────────────────────────────────────────────────

/// Encode opaque bytes for the wire: base64url, no padding.
pub(crate) fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode a base64url field that must be exactly 32 bytes.
pub(crate) fn decode32(field: &str, value: &str) -> Result<[u8; 32], ApiError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| ApiError::BadRequest(format!("{field} is not valid base64url")))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| ApiError::BadRequest(format!("{field} must be 32 bytes")))
}

/// Parse a JSON body from the buffered request bytes.
pub(crate) fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|err| ApiError::BadRequest(format!("invalid request body: {err}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn decode32_accepts_exact_length() {
        let encoded = b64(&[7u8; 32]);
        assert_eq!(decode32("field", &encoded).unwrap(), [7u8; 32]);
    }

    #[test]
    fn decode32_rejects_wrong_length_and_bad_encoding() {
        let short = b64(&[7u8; 16]);
        assert!(matches!(
            decode32("field", &short),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            decode32("field", "not~base64url"),
            Err(ApiError::BadRequest(_))
        ));
    }
}
