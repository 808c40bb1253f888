//! Shared application state for the Clavum server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`. Every collaborator — store, clock, auth gate,
//! approval machine, tenant key cache, coordinator — is injected here;
//! there are no module-scoped singletons. Tests assemble the same graph
//! over a `MemoryStore` and a `ManualClock`.

use std::sync::Arc;
use std::time::Duration;

use clavum_core::approval::ApprovalMachine;
use clavum_core::clock::Clock;
use clavum_storage::Store;

use crate::authgate::AuthGate;
use crate::coordinator::RetrievalCoordinator;
use crate::keycache::TenantKeyCache;

/// Runtime knobs for state assembly.
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Request-signature freshness window in milliseconds.
    pub signature_max_age_ms: i64,
    /// Default approval timeout in milliseconds.
    pub approval_timeout_ms: i64,
    /// Reclaim expired nonces on every Nth insert.
    pub nonce_gc_stride: u64,
    /// Tenant private-key cache TTL.
    pub key_cache_ttl: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            signature_max_age_ms: 60_000,
            approval_timeout_ms: 300_000,
            nonce_gc_stride: 50,
            key_cache_ttl: Duration::from_secs(60),
        }
    }
}

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Entity persistence.
    pub store: Arc<dyn Store>,
    /// Time source for freshness windows and deadlines.
    pub clock: Arc<dyn Clock>,
    /// Signed-request verification and replay rejection.
    pub authgate: AuthGate,
    /// Approval lifecycle.
    pub approvals: Arc<ApprovalMachine>,
    /// Tenant private-key cache.
    pub key_cache: Arc<TenantKeyCache>,
    /// Tier-routed retrieval orchestration.
    pub coordinator: RetrievalCoordinator,
}

impl AppState {
    /// Assemble the full collaborator graph over a store and clock.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, options: &AppOptions) -> Arc<Self> {
        let authgate = AuthGate::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            options.signature_max_age_ms,
            options.nonce_gc_stride,
        );
        let approvals = Arc::new(ApprovalMachine::new(Arc::clone(&store), Arc::clone(&clock)));
        let key_cache = Arc::new(TenantKeyCache::new(
            Arc::clone(&store),
            options.key_cache_ttl,
        ));
        let coordinator = RetrievalCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&key_cache),
            Arc::clone(&approvals),
            options.approval_timeout_ms,
        );

        Arc::new(Self {
            store,
            clock,
            authgate,
            approvals,
            key_cache,
            coordinator,
        })
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
