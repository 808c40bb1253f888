//! Secrets routes: registration, listing, deletion, and retrieval.
//!
//! All routes here are agent-authenticated; the auth gate has already
//! bound [`AuthedAgent`] into request extensions and buffered the body.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clavum_storage::models::{SecretMetadata, Tier};
use clavum_storage::StoreError;

use crate::authgate::AuthedAgent;
use crate::coordinator::{PollOutcome, Retrieval, RetrieveParams, WrappedKek};
use crate::error::ApiError;
use crate::routes::{b64, decode32, parse_json};
use crate::state::AppState;

/// Maximum length of a secret id or name.
const MAX_IDENTIFIER_LEN: usize = 256;

/// Validate a client-supplied identifier (secret id or name).
///
/// Non-empty, bounded length, no control characters. Anything else is
/// fine — identifiers are opaque.
fn validate_identifier(field: &str, value: &str) -> Result<(), ApiError> {
    if value.is_empty() {
        return Err(ApiError::BadRequest(format!("{field} must not be empty")));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(ApiError::BadRequest(format!(
            "{field} exceeds {MAX_IDENTIFIER_LEN} bytes"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(ApiError::BadRequest(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

// ── Request/response types ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    secret_id: String,
    name: String,
    tier: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    id: String,
    name: String,
    tier: Tier,
}

#[derive(Debug, Serialize)]
struct SecretView {
    id: String,
    name: String,
    tier: Tier,
    created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    secrets: Vec<SecretView>,
}

#[derive(Debug, Deserialize)]
struct RetrieveRequest {
    eph_x25519_pub: String,
    kek_salt: String,
    reason: String,
}

#[derive(Debug, Serialize)]
struct GrantedResponse {
    enc_kek: String,
    enc_kek_iv: String,
    enc_kek_tag: String,
}

impl From<WrappedKek> for GrantedResponse {
    fn from(wrapped: WrappedKek) -> Self {
        Self {
            enc_kek: b64(&wrapped.enc_kek),
            enc_kek_iv: b64(&wrapped.iv),
            enc_kek_tag: b64(&wrapped.tag),
        }
    }
}

#[derive(Debug, Serialize)]
struct PendingResponse {
    status: &'static str,
    approval_id: Uuid,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    approval_id: Uuid,
    eph_pub: String,
    kek_salt: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    responded_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enc_kek: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enc_kek_iv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enc_kek_tag: Option<String>,
}

// ── Handlers ─────────────────────────────────────────────────────────

/// Register secret metadata. The ciphertext itself stays in the agent's
/// local vault; the server only learns `(id, name, tier)`.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Extension(AuthedAgent(agent)): Extension<AuthedAgent>,
    body: Bytes,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let body: RegisterRequest = parse_json(&body)?;
    validate_identifier("secret_id", &body.secret_id)?;
    validate_identifier("name", &body.name)?;
    let tier: Tier = body
        .tier
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("unknown tier: {}", body.tier)))?;

    let meta = SecretMetadata {
        id: body.secret_id,
        tenant_id: agent.tenant_id,
        agent_id: agent.id,
        name: body.name,
        tier,
        created_at: state.clock.now(),
    };

    match state.store.insert_secret(&meta).await {
        Ok(()) => {}
        Err(StoreError::Duplicate) => {
            return Err(ApiError::Conflict(
                "secret id or name already registered".to_owned(),
            ));
        }
        Err(err) => return Err(err.into()),
    }

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id: meta.id,
            name: meta.name,
            tier,
        }),
    ))
}

/// List the authenticated agent's secrets.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(AuthedAgent(agent)): Extension<AuthedAgent>,
) -> Result<Json<ListResponse>, ApiError> {
    let secrets = state
        .store
        .secrets_for_agent(agent.id)
        .await?
        .into_iter()
        .map(|s| SecretView {
            id: s.id,
            name: s.name,
            tier: s.tier,
            created_at: s.created_at.to_rfc3339(),
        })
        .collect();
    Ok(Json(ListResponse { secrets }))
}

/// Remove secret metadata. Only the owning agent may delete.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    Extension(AuthedAgent(agent)): Extension<AuthedAgent>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let secret = state
        .store
        .secret(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("secret not found".to_owned()))?;
    if secret.agent_id != agent.id {
        return Err(ApiError::Forbidden(
            "secret belongs to another agent".to_owned(),
        ));
    }

    state.store.delete_secret(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Retrieve a secret's KEK (routine tier) or initiate the consent flow
/// (sensitive/critical tiers).
pub async fn retrieve(
    State(state): State<Arc<AppState>>,
    Extension(AuthedAgent(agent)): Extension<AuthedAgent>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body: RetrieveRequest = parse_json(&body)?;
    let eph_pub = decode32("eph_x25519_pub", &body.eph_x25519_pub)?;
    let kek_salt = decode32("kek_salt", &body.kek_salt)?;
    if body.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("reason must not be empty".to_owned()));
    }

    let outcome = state
        .coordinator
        .retrieve(
            &agent,
            &id,
            RetrieveParams {
                eph_pub,
                kek_salt,
                reason: body.reason,
            },
        )
        .await?;

    Ok(match outcome {
        Retrieval::Granted(wrapped) => {
            (StatusCode::OK, Json(GrantedResponse::from(wrapped))).into_response()
        }
        Retrieval::Pending {
            approval_id,
            expires_at,
        } => (
            StatusCode::ACCEPTED,
            Json(PendingResponse {
                status: "pending",
                approval_id,
                expires_at: expires_at.to_rfc3339(),
            }),
        )
            .into_response(),
    })
}

/// Poll a pending retrieval. Carries the same key-derivation inputs as
/// the initial request so an approved poll can derive the KEK.
pub async fn retrieve_status(
    State(state): State<Arc<AppState>>,
    Extension(AuthedAgent(agent)): Extension<AuthedAgent>,
    Path(id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let eph_pub = decode32("eph_pub", &query.eph_pub)?;
    let kek_salt = decode32("kek_salt", &query.kek_salt)?;

    let outcome = state
        .coordinator
        .poll(&agent, &id, query.approval_id, eph_pub, kek_salt)
        .await?;

    let response = match outcome {
        PollOutcome::Pending { expires_at } => StatusResponse {
            status: "pending",
            expires_at: Some(expires_at.to_rfc3339()),
            responded_at: None,
            enc_kek: None,
            enc_kek_iv: None,
            enc_kek_tag: None,
        },
        PollOutcome::Granted(wrapped) => StatusResponse {
            status: "approved",
            expires_at: None,
            responded_at: None,
            enc_kek: Some(b64(&wrapped.enc_kek)),
            enc_kek_iv: Some(b64(&wrapped.iv)),
            enc_kek_tag: Some(b64(&wrapped.tag)),
        },
        PollOutcome::Denied { responded_at } => StatusResponse {
            status: "denied",
            expires_at: None,
            responded_at: Some(responded_at.to_rfc3339()),
            enc_kek: None,
            enc_kek_iv: None,
            enc_kek_tag: None,
        },
        PollOutcome::Expired { responded_at } => StatusResponse {
            status: "expired",
            expires_at: None,
            responded_at: Some(responded_at.to_rfc3339()),
            enc_kek: None,
            enc_kek_iv: None,
            enc_kek_tag: None,
        },
    };
    Ok(Json(response))
}
