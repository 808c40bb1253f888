//! Approval routes: the phone's view of pending consent requests.
//!
//! All routes here are phone-authenticated. A phone only ever sees
//! approvals addressed to it; a foreign approval id answers `NotFound`
//! rather than `Forbidden` so ids cannot be probed.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clavum_core::primitives::{ct_eq, x25519_shared, zeroize, KEY_LEN};
use clavum_storage::models::{ApprovalRequest, ApprovalStatus, Phone, Tier};

use crate::authgate::AuthedPhone;
use crate::error::ApiError;
use crate::routes::{b64, decode32, parse_json};
use crate::state::AppState;

// ── Request/response types ───────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApprovalView {
    id: Uuid,
    secret_id: String,
    reason: String,
    /// The exact challenge bytes the phone must sign, base64url.
    challenge: String,
    created_at: String,
    expires_at: String,
}

impl From<ApprovalRequest> for ApprovalView {
    fn from(approval: ApprovalRequest) -> Self {
        Self {
            id: approval.id,
            secret_id: approval.secret_id,
            reason: approval.reason,
            challenge: b64(&approval.challenge),
            created_at: approval.created_at.to_rfc3339(),
            expires_at: approval.expires_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PendingListResponse {
    approvals: Vec<ApprovalView>,
}

#[derive(Debug, Deserialize)]
struct ApproveRequest {
    signature: String,
    /// The phone's ECDH output with the server; required for
    /// critical-tier secrets, ignored otherwise.
    #[serde(default)]
    k_phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolutionResponse {
    id: Uuid,
    status: ApprovalStatus,
    responded_at: Option<String>,
}

impl From<ApprovalRequest> for ResolutionResponse {
    fn from(approval: ApprovalRequest) -> Self {
        Self {
            id: approval.id,
            status: approval.status,
            responded_at: approval.responded_at.map(|t| t.to_rfc3339()),
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────────

/// List pending approvals for the phone's tenant, oldest first.
/// Past-deadline records are expired before the read, so the result
/// contains no stale rows.
pub async fn pending(
    State(state): State<Arc<AppState>>,
    Extension(AuthedPhone(phone)): Extension<AuthedPhone>,
) -> Result<Json<PendingListResponse>, ApiError> {
    let approvals = state
        .approvals
        .pending_for_tenant(phone.tenant_id)
        .await?
        .into_iter()
        .map(ApprovalView::from)
        .collect();
    Ok(Json(PendingListResponse { approvals }))
}

/// Approve a pending request with a signature over its stored challenge.
///
/// For critical-tier secrets the body must also carry `k_phone` — the
/// phone's X25519 output with the server — which is checked in constant
/// time against the server's own derivation and then wiped. It is a
/// proof of key possession; it is never persisted.
pub async fn approve(
    State(state): State<Arc<AppState>>,
    Extension(AuthedPhone(phone)): Extension<AuthedPhone>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<ResolutionResponse>, ApiError> {
    let body: ApproveRequest = parse_json(&body)?;
    let signature = URL_SAFE_NO_PAD
        .decode(&body.signature)
        .map_err(|_| ApiError::BadRequest("signature is not valid base64url".to_owned()))?;

    let approval = addressed_approval(&state, &phone, id).await?;

    if let Some(secret) = state.store.secret(&approval.secret_id).await? {
        if secret.tier == Tier::Critical {
            verify_key_contribution(&state, &phone, body.k_phone.as_deref()).await?;
        }
    }

    let resolved = state
        .approvals
        .approve(id, &signature, &phone_signing_key(&phone)?)
        .await?;
    Ok(Json(ResolutionResponse::from(resolved)))
}

/// Deny a pending request.
pub async fn reject(
    State(state): State<Arc<AppState>>,
    Extension(AuthedPhone(phone)): Extension<AuthedPhone>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResolutionResponse>, ApiError> {
    addressed_approval(&state, &phone, id).await?;
    let resolved = state.approvals.reject(id).await?;
    Ok(Json(ResolutionResponse::from(resolved)))
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Load an approval and require that it is addressed to this phone.
///
/// Reads the raw record without lazy expiry; the state machine's
/// ordered checks decide between `Expired` and `AlreadyResolved`.
async fn addressed_approval(
    state: &AppState,
    phone: &Phone,
    id: Uuid,
) -> Result<ApprovalRequest, ApiError> {
    let approval = state
        .store
        .approval(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("approval not found".to_owned()))?;
    if approval.phone_id != phone.id {
        return Err(ApiError::NotFound("approval not found".to_owned()));
    }
    Ok(approval)
}

/// Check the phone's claimed ECDH output against the server's own
/// `X25519(server_priv, phone_pub)` and wipe both buffers.
async fn verify_key_contribution(
    state: &AppState,
    phone: &Phone,
    supplied: Option<&str>,
) -> Result<(), ApiError> {
    let supplied = supplied.ok_or_else(|| {
        ApiError::BadRequest("k_phone is required for critical secrets".to_owned())
    })?;
    let mut supplied = decode32("k_phone", supplied)?;

    let phone_pub: [u8; KEY_LEN] = phone
        .x25519_public
        .as_slice()
        .try_into()
        .map_err(|_| ApiError::internal("stored public key is malformed"))?;

    let server_key = state.key_cache.server_key(phone.tenant_id).await?;
    let expected = x25519_shared(&server_key, &phone_pub)?;

    let matches = ct_eq(expected.as_slice(), &supplied);
    zeroize(&mut supplied);

    if matches {
        Ok(())
    } else {
        Err(ApiError::BadRequest(
            "k_phone does not match the registered device key".to_owned(),
        ))
    }
}

fn phone_signing_key(phone: &Phone) -> Result<[u8; KEY_LEN], ApiError> {
    phone
        .ed25519_public
        .as_slice()
        .try_into()
        .map_err(|_| ApiError::internal("stored public key is malformed"))
}
