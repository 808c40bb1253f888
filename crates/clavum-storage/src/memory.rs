//! In-memory store for testing and development.
//!
//! All data lives in maps behind a single `RwLock` and is lost when the
//! process exits. Uniqueness checks and the approval compare-and-swap run
//! under the write lock, so this backend gives the same atomicity
//! guarantees as the SQL backend within one process.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    Agent, ApprovalRequest, ApprovalStatus, AuditEntry, AuditFilter, Phone, SecretMetadata, Tenant,
};
use crate::{Store, StoreError};

/// Default audit listing limit when the filter does not set one.
const DEFAULT_AUDIT_LIMIT: i64 = 100;

#[derive(Default)]
struct Inner {
    tenants: HashMap<Uuid, Tenant>,
    agents: HashMap<Uuid, Agent>,
    phones: HashMap<Uuid, Phone>,
    secrets: HashMap<String, SecretMetadata>,
    approvals: HashMap<Uuid, ApprovalRequest>,
    nonces: HashMap<Vec<u8>, DateTime<Utc>>,
    audit: Vec<AuditEntry>,
}

/// An in-memory [`Store`]. Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.tenants.contains_key(&tenant.id) {
            return Err(StoreError::Duplicate);
        }
        inner.tenants.insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn tenant(&self, id: Uuid) -> Result<Option<Tenant>, StoreError> {
        Ok(self.inner.read().await.tenants.get(&id).cloned())
    }

    async fn insert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.agents.contains_key(&agent.id) {
            return Err(StoreError::Duplicate);
        }
        inner.agents.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn agent(&self, id: Uuid) -> Result<Option<Agent>, StoreError> {
        Ok(self.inner.read().await.agents.get(&id).cloned())
    }

    async fn insert_phone(&self, phone: &Phone) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.phones.contains_key(&phone.id) {
            return Err(StoreError::Duplicate);
        }
        inner.phones.insert(phone.id, phone.clone());
        Ok(())
    }

    async fn phone(&self, id: Uuid) -> Result<Option<Phone>, StoreError> {
        Ok(self.inner.read().await.phones.get(&id).cloned())
    }

    async fn phones_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<Phone>, StoreError> {
        let inner = self.inner.read().await;
        let mut phones: Vec<Phone> = inner
            .phones
            .values()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect();
        phones.sort_by_key(|p| p.created_at);
        Ok(phones)
    }

    async fn insert_secret(&self, meta: &SecretMetadata) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.secrets.contains_key(&meta.id) {
            return Err(StoreError::Duplicate);
        }
        let name_taken = inner
            .secrets
            .values()
            .any(|s| s.agent_id == meta.agent_id && s.name == meta.name);
        if name_taken {
            return Err(StoreError::Duplicate);
        }
        inner.secrets.insert(meta.id.clone(), meta.clone());
        Ok(())
    }

    async fn secret(&self, id: &str) -> Result<Option<SecretMetadata>, StoreError> {
        Ok(self.inner.read().await.secrets.get(id).cloned())
    }

    async fn secrets_for_agent(&self, agent_id: Uuid) -> Result<Vec<SecretMetadata>, StoreError> {
        let inner = self.inner.read().await;
        let mut secrets: Vec<SecretMetadata> = inner
            .secrets
            .values()
            .filter(|s| s.agent_id == agent_id)
            .cloned()
            .collect();
        secrets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(secrets)
    }

    async fn delete_secret(&self, id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.secrets.remove(id).is_some())
    }

    async fn insert_approval(&self, approval: &ApprovalRequest) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.approvals.contains_key(&approval.id) {
            return Err(StoreError::Duplicate);
        }
        inner.approvals.insert(approval.id, approval.clone());
        Ok(())
    }

    async fn approval(&self, id: Uuid) -> Result<Option<ApprovalRequest>, StoreError> {
        Ok(self.inner.read().await.approvals.get(&id).cloned())
    }

    async fn resolve_approval(
        &self,
        id: Uuid,
        status: ApprovalStatus,
        responded_at: DateTime<Utc>,
        signature: Option<&[u8]>,
    ) -> Result<ApprovalRequest, StoreError> {
        let mut inner = self.inner.write().await;
        let record = inner.approvals.get_mut(&id).ok_or(StoreError::Missing)?;
        if record.status != ApprovalStatus::Pending {
            return Err(StoreError::Conflict);
        }
        record.status = status;
        record.responded_at = Some(responded_at);
        if let Some(sig) = signature {
            record.approval_signature = Some(sig.to_vec());
        }
        Ok(record.clone())
    }

    async fn expire_pending_for_tenant(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let mut expired = 0u64;
        for record in inner.approvals.values_mut() {
            if record.tenant_id == tenant_id
                && record.status == ApprovalStatus::Pending
                && now >= record.expires_at
            {
                record.status = ApprovalStatus::Expired;
                record.responded_at = Some(now);
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn pending_approvals(&self, tenant_id: Uuid) -> Result<Vec<ApprovalRequest>, StoreError> {
        let inner = self.inner.read().await;
        let mut pending: Vec<ApprovalRequest> = inner
            .approvals
            .values()
            .filter(|a| a.tenant_id == tenant_id && a.status == ApprovalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|a| a.created_at);
        Ok(pending)
    }

    async fn insert_nonce(
        &self,
        digest: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.nonces.contains_key(digest) {
            return Err(StoreError::Duplicate);
        }
        inner.nonces.insert(digest.to_vec(), expires_at);
        Ok(())
    }

    async fn purge_expired_nonces(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.nonces.len();
        inner.nonces.retain(|_, expires_at| *expires_at > now);
        Ok((before - inner.nonces.len()) as u64)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.audit.push(entry.clone());
        Ok(())
    }

    async fn audit_entries(
        &self,
        agent_id: Uuid,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let inner = self.inner.read().await;
        let limit = filter.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).max(0) as usize;
        let mut entries: Vec<AuditEntry> = inner
            .audit
            .iter()
            .filter(|e| e.agent_id == agent_id)
            .filter(|e| filter.secret_id.as_ref().map_or(true, |id| &e.secret_id == id))
            .filter(|e| filter.from.map_or(true, |from| e.created_at >= from))
            .filter(|e| filter.to.map_or(true, |to| e.created_at <= to))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit);
        Ok(entries)
    }
}
