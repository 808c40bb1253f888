//! Storage contracts and domain records for Clavum.
//!
//! This crate defines the [`Store`] trait — the entity-level persistence
//! interface the core reads and writes — plus the records themselves and
//! two backends:
//!
//! - [`PostgresStore`] — production backend over sqlx/PostgreSQL
//! - [`MemoryStore`] — in-memory, for testing and development
//!
//! Two properties are load-bearing and must hold in every backend:
//!
//! 1. **Nonce uniqueness** is enforced by the backend itself (a primary
//!    key on the signature digest), not by a process-local mutex, so
//!    replay rejection survives multiple server processes.
//! 2. **Approval resolution is a compare-and-swap**: at most one of
//!    approve / reject / expire wins per record; losers observe
//!    [`StoreError::Conflict`].

mod error;
mod memory;
pub mod models;
mod postgres;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use models::{
    Agent, ApprovalRequest, ApprovalStatus, AuditEntry, AuditFilter, Phone, SecretMetadata, Tenant,
};

/// Entity-level persistence contract.
///
/// Implementations must be safe to share across async tasks. Each method
/// is an independent transactional operation; callers compose them without
/// an enclosing transaction.
#[async_trait::async_trait]
pub trait Store: Send + Sync + 'static {
    // ── Tenants ──────────────────────────────────────────────────────

    /// Insert a tenant record (including its private key half).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if the id is taken.
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError>;

    /// Fetch a tenant by id. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn tenant(&self, id: Uuid) -> Result<Option<Tenant>, StoreError>;

    // ── Agents & phones ──────────────────────────────────────────────

    /// Insert an agent identity (public key halves only).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if the id is taken.
    async fn insert_agent(&self, agent: &Agent) -> Result<(), StoreError>;

    /// Fetch an agent by id. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn agent(&self, id: Uuid) -> Result<Option<Agent>, StoreError>;

    /// Insert a phone identity (public key halves only).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if the id is taken.
    async fn insert_phone(&self, phone: &Phone) -> Result<(), StoreError>;

    /// Fetch a phone by id. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn phone(&self, id: Uuid) -> Result<Option<Phone>, StoreError>;

    /// List phones paired to a tenant, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn phones_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<Phone>, StoreError>;

    // ── Secret metadata ──────────────────────────────────────────────

    /// Register secret metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if the id or the
    /// `(agent_id, name)` pair is taken.
    async fn insert_secret(&self, meta: &SecretMetadata) -> Result<(), StoreError>;

    /// Fetch secret metadata by id. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn secret(&self, id: &str) -> Result<Option<SecretMetadata>, StoreError>;

    /// List an agent's secrets, by name ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn secrets_for_agent(&self, agent_id: Uuid) -> Result<Vec<SecretMetadata>, StoreError>;

    /// Delete secret metadata. Returns `true` if a record was removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn delete_secret(&self, id: &str) -> Result<bool, StoreError>;

    // ── Approvals ────────────────────────────────────────────────────

    /// Insert a new approval record (status `pending`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if the id is taken.
    async fn insert_approval(&self, approval: &ApprovalRequest) -> Result<(), StoreError>;

    /// Fetch an approval by id. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn approval(&self, id: Uuid) -> Result<Option<ApprovalRequest>, StoreError>;

    /// Atomically transition a `pending` approval to a terminal status,
    /// recording `responded_at` and (for approvals) the signature.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Missing`] if the record does not exist.
    /// - [`StoreError::Conflict`] if the record is no longer pending —
    ///   a concurrent approve/reject/expire won the race.
    async fn resolve_approval(
        &self,
        id: Uuid,
        status: ApprovalStatus,
        responded_at: DateTime<Utc>,
        signature: Option<&[u8]>,
    ) -> Result<ApprovalRequest, StoreError>;

    /// Bulk-expire a tenant's pending approvals whose deadline has
    /// passed. Returns the number of records transitioned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn expire_pending_for_tenant(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// List a tenant's pending approvals, `created_at` ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn pending_approvals(&self, tenant_id: Uuid) -> Result<Vec<ApprovalRequest>, StoreError>;

    // ── Replay nonces ────────────────────────────────────────────────

    /// Record an observed signature digest.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if the digest has been seen —
    /// including when a concurrent insert wins the race. Callers treat
    /// this as replay detection.
    async fn insert_nonce(&self, digest: &[u8], expires_at: DateTime<Utc>)
        -> Result<(), StoreError>;

    /// Reclaim expired nonce records. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn purge_expired_nonces(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    // ── Audit ────────────────────────────────────────────────────────

    /// Append an audit entry. The log is append-only; there is no
    /// update or delete operation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    /// List an agent's audit entries matching the filter, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    async fn audit_entries(
        &self,
        agent_id: Uuid,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, StoreError>;
}
