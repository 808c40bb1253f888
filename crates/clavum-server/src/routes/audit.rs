//! Audit routes: an agent reads its own retrieval history.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clavum_storage::models::{AuditFilter, AuditResult, Tier};

use crate::authgate::AuthedAgent;
use crate::error::ApiError;
use crate::routes::b64;
use crate::state::AppState;

/// Hard cap on a single audit page.
const MAX_AUDIT_LIMIT: i64 = 1_000;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    secret_id: Option<String>,
    #[serde(default)]
    from: Option<DateTime<Utc>>,
    #[serde(default)]
    to: Option<DateTime<Utc>>,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct AuditEntryView {
    id: Uuid,
    secret_id: String,
    reason: String,
    tier: Tier,
    result: AuditResult,
    latency_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    proof: Option<String>,
    created_at: String,
}

#[derive(Debug, Serialize)]
pub struct AuditListResponse {
    entries: Vec<AuditEntryView>,
}

/// List the agent's own audit entries, newest first.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(AuthedAgent(agent)): Extension<AuthedAgent>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditListResponse>, ApiError> {
    let limit = query
        .limit
        .filter(|&n| n > 0)
        .map_or(100, |n| n.min(MAX_AUDIT_LIMIT));

    let filter = AuditFilter {
        secret_id: query.secret_id,
        from: query.from,
        to: query.to,
        limit: Some(limit),
    };

    let entries = state
        .store
        .audit_entries(agent.id, &filter)
        .await?
        .into_iter()
        .map(|e| AuditEntryView {
            id: e.id,
            secret_id: e.secret_id,
            reason: e.reason,
            tier: e.tier,
            result: e.result,
            latency_ms: e.latency_ms,
            proof: e.proof.as_deref().map(b64),
            created_at: e.created_at.to_rfc3339(),
        })
        .collect();

    Ok(Json(AuditListResponse { entries }))
}
