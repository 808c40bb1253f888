//! Bounded-TTL cache of tenant X25519 private keys.
//!
//! Tenant keys are read-many, write-never after provisioning, so each
//! retrieval would otherwise pay a storage round-trip. Entries live for a
//! fixed TTL; eviction drops the key wrapper, which zeroizes the secret
//! scalar. Handing a key to a caller clones it — the clone is its own
//! zeroizing buffer owned by the handler that requested it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

use clavum_core::primitives::{zeroize, X25519SecretKey, KEY_LEN};
use clavum_storage::Store;

use crate::error::ApiError;

struct CacheEntry {
    key: X25519SecretKey,
    loaded_at: Instant,
}

/// Per-tenant server key cache.
pub struct TenantKeyCache {
    store: Arc<dyn Store>,
    ttl: Duration,
    entries: RwLock<HashMap<Uuid, CacheEntry>>,
}

impl TenantKeyCache {
    /// Create a cache with the given entry TTL.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the tenant's X25519 private key, from cache if fresh.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Internal`] if the tenant record is missing or
    /// its stored key is malformed — an authenticated identity always
    /// references an existing tenant, so either is a provisioning fault.
    pub async fn server_key(&self, tenant_id: Uuid) -> Result<X25519SecretKey, ApiError> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&tenant_id) {
                if entry.loaded_at.elapsed() < self.ttl {
                    return Ok(entry.key.clone());
                }
            }
        }

        let tenant = self
            .store
            .tenant(tenant_id)
            .await?
            .ok_or_else(|| ApiError::internal("tenant record missing"))?;

        let mut raw: [u8; KEY_LEN] = tenant
            .x25519_private
            .as_slice()
            .try_into()
            .map_err(|_| ApiError::internal("tenant key is malformed"))?;
        let key = X25519SecretKey::from_bytes(raw);
        zeroize(&mut raw);

        let mut entries = self.entries.write().await;
        // Stale entries are replaced here and dropped, wiping their scalar.
        entries.insert(
            tenant_id,
            CacheEntry {
                key: key.clone(),
                loaded_at: Instant::now(),
            },
        );

        Ok(key)
    }
}

impl std::fmt::Debug for TenantKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantKeyCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use clavum_core::primitives::x25519_keygen;
    use clavum_storage::models::Tenant;
    use clavum_storage::MemoryStore;

    use super::*;

    async fn seeded_store() -> (Arc<MemoryStore>, Uuid, [u8; 32]) {
        let store = Arc::new(MemoryStore::new());
        let (secret, public) = x25519_keygen();
        let tenant_id = Uuid::new_v4();
        store
            .insert_tenant(&Tenant {
                id: tenant_id,
                name: "acme".to_owned(),
                x25519_public: public.to_vec(),
                x25519_private: secret.to_bytes().to_vec(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        (store, tenant_id, public)
    }

    #[tokio::test]
    async fn loads_and_caches_tenant_key() {
        let (store, tenant_id, public) = seeded_store().await;
        let cache = TenantKeyCache::new(store, Duration::from_secs(60));

        let key = cache.server_key(tenant_id).await.unwrap();
        assert_eq!(key.public_key(), public);

        // Second fetch hits the cache and agrees.
        let again = cache.server_key(tenant_id).await.unwrap();
        assert_eq!(again.public_key(), public);
    }

    #[tokio::test]
    async fn missing_tenant_is_internal_error() {
        let store = Arc::new(MemoryStore::new());
        let cache = TenantKeyCache::new(store, Duration::from_secs(60));
        let err = cache.server_key(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
    }

    #[tokio::test]
    async fn zero_ttl_reloads_from_store() {
        let (store, tenant_id, public) = seeded_store().await;
        let cache = TenantKeyCache::new(store, Duration::from_secs(0));
        // Every access is a reload; both still resolve the same key.
        assert_eq!(cache.server_key(tenant_id).await.unwrap().public_key(), public);
        assert_eq!(cache.server_key(tenant_id).await.unwrap().public_key(), public);
    }
}
