//! Signed-request authentication for agents and phones.
//!
//! Every authenticated route passes through one of two near-identical
//! pipelines: extract the identity/timestamp/signature headers, read the
//! body once, look up the identity's Ed25519 key, verify the canonical
//! signature, then record the signature's SHA-256 digest in the nonce
//! store. A digest that is already present — including one inserted by a
//! concurrent request losing the race — means replay.
//!
//! Externally the gate admits exactly two rejection kinds:
//! `Unauthenticated` (missing header, unknown identity, bad or stale
//! signature — never distinguished) and `Replayed`. The cause is logged
//! at debug level for operators, never surfaced in the response.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use clavum_core::clock::Clock;
use clavum_core::primitives::{sha256, KEY_LEN};
use clavum_core::signing::verify_request;
use clavum_storage::models::{Agent, Phone};
use clavum_storage::{Store, StoreError};

use crate::error::ApiError;
use crate::state::AppState;

/// Identity header for agent-authenticated routes.
pub const AGENT_ID_HEADER: &str = "x-agent-id";
/// Identity header for phone-authenticated routes.
pub const PHONE_ID_HEADER: &str = "x-phone-id";
/// Decimal milliseconds since the epoch.
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
/// Base64url (no padding) Ed25519 signature.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Maximum request body the gate will buffer for verification.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// An authenticated agent, injected into request extensions.
#[derive(Debug, Clone)]
pub struct AuthedAgent(pub Agent);

/// An authenticated phone, injected into request extensions.
#[derive(Debug, Clone)]
pub struct AuthedPhone(pub Phone);

/// The signature-verification and replay-rejection pipeline.
pub struct AuthGate {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    max_age_ms: i64,
    gc_stride: u64,
    insert_count: AtomicU64,
}

impl AuthGate {
    /// Create a gate with the given freshness window and GC stride.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        max_age_ms: i64,
        gc_stride: u64,
    ) -> Self {
        Self {
            store,
            clock,
            max_age_ms,
            gc_stride: gc_stride.max(1),
            insert_count: AtomicU64::new(0),
        }
    }

    /// Authenticate a request as an agent.
    ///
    /// # Errors
    ///
    /// [`ApiError::Unauthenticated`] for any header, identity, or
    /// signature problem; [`ApiError::Replayed`] for a seen signature.
    pub async fn authenticate_agent(
        &self,
        parts: &Parts,
        body: &[u8],
    ) -> Result<Agent, ApiError> {
        let (id, timestamp, signature) = extract_credentials(parts, AGENT_ID_HEADER)?;

        // Unknown identity is indistinguishable from a bad signature.
        let agent = self
            .store
            .agent(id)
            .await?
            .ok_or(ApiError::Unauthenticated)?;
        let public = signing_key(&agent.ed25519_public)?;

        self.verify_and_record(&public, &timestamp, parts, body, &signature)
            .await?;
        Ok(agent)
    }

    /// Authenticate a request as a phone.
    ///
    /// # Errors
    ///
    /// Same semantics as [`authenticate_agent`](Self::authenticate_agent).
    pub async fn authenticate_phone(
        &self,
        parts: &Parts,
        body: &[u8],
    ) -> Result<Phone, ApiError> {
        let (id, timestamp, signature) = extract_credentials(parts, PHONE_ID_HEADER)?;

        let phone = self
            .store
            .phone(id)
            .await?
            .ok_or(ApiError::Unauthenticated)?;
        let public = signing_key(&phone.ed25519_public)?;

        self.verify_and_record(&public, &timestamp, parts, body, &signature)
            .await?;
        Ok(phone)
    }

    async fn verify_and_record(
        &self,
        public: &[u8; KEY_LEN],
        timestamp: &str,
        parts: &Parts,
        body: &[u8],
        signature: &[u8],
    ) -> Result<(), ApiError> {
        let verified = verify_request(
            public,
            timestamp,
            parts.method.as_str(),
            parts.uri.path(),
            body,
            signature,
            self.clock.now_ms(),
            self.max_age_ms,
        );
        if !verified {
            debug!(path = parts.uri.path(), "request signature rejected");
            return Err(ApiError::Unauthenticated);
        }

        let digest = sha256(signature);
        let expires_at = self.clock.now() + Duration::milliseconds(self.max_age_ms * 2);
        match self.store.insert_nonce(&digest, expires_at).await {
            Ok(()) => {}
            Err(StoreError::Duplicate) => {
                debug!(path = parts.uri.path(), "replayed request signature");
                return Err(ApiError::Replayed);
            }
            Err(err) => return Err(err.into()),
        }

        self.maybe_collect_nonces();
        Ok(())
    }

    /// Reclaim expired nonces on every Nth insert, off the request path.
    fn maybe_collect_nonces(&self) {
        let count = self.insert_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.gc_stride != 0 {
            return;
        }

        let store = Arc::clone(&self.store);
        let now = self.clock.now();
        tokio::spawn(async move {
            match store.purge_expired_nonces(now).await {
                Ok(purged) if purged > 0 => debug!(purged, "nonce store reclaimed"),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "nonce reclaim failed"),
            }
        });
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("max_age_ms", &self.max_age_ms)
            .field("gc_stride", &self.gc_stride)
            .finish_non_exhaustive()
    }
}

/// Pull `(identity, timestamp, signature)` out of the headers. Any
/// missing or malformed piece is `Unauthenticated`.
fn extract_credentials(
    parts: &Parts,
    id_header: &str,
) -> Result<(Uuid, String, Vec<u8>), ApiError> {
    let id = header_str(parts, id_header)?
        .parse::<Uuid>()
        .map_err(|_| ApiError::Unauthenticated)?;
    let timestamp = header_str(parts, TIMESTAMP_HEADER)?.to_owned();
    let signature = URL_SAFE_NO_PAD
        .decode(header_str(parts, SIGNATURE_HEADER)?)
        .map_err(|_| ApiError::Unauthenticated)?;
    Ok((id, timestamp, signature))
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, ApiError> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthenticated)
}

fn signing_key(stored: &[u8]) -> Result<[u8; KEY_LEN], ApiError> {
    stored.try_into().map_err(|_| ApiError::Unauthenticated)
}

// ── Axum middleware ──────────────────────────────────────────────────

/// Middleware for agent-authenticated routes. Buffers the body (it is
/// part of the signed payload), authenticates, and injects
/// [`AuthedAgent`] for handlers.
pub async fn agent_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| ApiError::Unauthenticated)?;

    let agent = state.authgate.authenticate_agent(&parts, &bytes).await?;

    let mut req = Request::from_parts(parts, Body::from(bytes));
    req.extensions_mut().insert(AuthedAgent(agent));
    Ok(next.run(req).await)
}

/// Middleware for phone-authenticated routes.
pub async fn phone_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| ApiError::Unauthenticated)?;

    let phone = state.authgate.authenticate_phone(&parts, &bytes).await?;

    let mut req = Request::from_parts(parts, Body::from(bytes));
    req.extensions_mut().insert(AuthedPhone(phone));
    Ok(next.run(req).await)
}
