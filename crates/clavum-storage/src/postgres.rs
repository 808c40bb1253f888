//! PostgreSQL store over sqlx.
//!
//! Every method is a parameterized statement against a `PgPool`. Replay
//! uniqueness rides on the `nonces` primary key (unique-violation folds
//! into [`StoreError::Duplicate`] in the error conversion), and approval
//! resolution uses a conditional `UPDATE … WHERE status = 'pending'
//! RETURNING *` so at most one caller wins each transition.
//!
//! Schema lives in `migrations/0001_init.sql`.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    Agent, ApprovalRequest, ApprovalStatus, AuditEntry, AuditFilter, Phone, SecretMetadata, Tenant,
};
use crate::{Store, StoreError};

/// Default audit listing limit when the filter does not set one.
const DEFAULT_AUDIT_LIMIT: i64 = 100;

/// A [`Store`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to the database at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (used by tests that manage their own pool).
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO tenants (id, name, x25519_public, x25519_private, created_at)
              VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.x25519_public)
        .bind(&tenant.x25519_private)
        .bind(tenant.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn tenant(&self, id: Uuid) -> Result<Option<Tenant>, StoreError> {
        let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tenant)
    }

    async fn insert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO agents (id, tenant_id, x25519_public, ed25519_public, created_at)
              VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(agent.id)
        .bind(agent.tenant_id)
        .bind(&agent.x25519_public)
        .bind(&agent.ed25519_public)
        .bind(agent.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn agent(&self, id: Uuid) -> Result<Option<Agent>, StoreError> {
        let agent = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(agent)
    }

    async fn insert_phone(&self, phone: &Phone) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO phones (id, tenant_id, x25519_public, ed25519_public, created_at)
              VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(phone.id)
        .bind(phone.tenant_id)
        .bind(&phone.x25519_public)
        .bind(&phone.ed25519_public)
        .bind(phone.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn phone(&self, id: Uuid) -> Result<Option<Phone>, StoreError> {
        let phone = sqlx::query_as::<_, Phone>("SELECT * FROM phones WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(phone)
    }

    async fn phones_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<Phone>, StoreError> {
        let phones = sqlx::query_as::<_, Phone>(
            "SELECT * FROM phones WHERE tenant_id = $1 ORDER BY created_at",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(phones)
    }

    async fn insert_secret(&self, meta: &SecretMetadata) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO secrets (id, tenant_id, agent_id, name, tier, created_at)
              VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&meta.id)
        .bind(meta.tenant_id)
        .bind(meta.agent_id)
        .bind(&meta.name)
        .bind(meta.tier)
        .bind(meta.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn secret(&self, id: &str) -> Result<Option<SecretMetadata>, StoreError> {
        let secret = sqlx::query_as::<_, SecretMetadata>("SELECT * FROM secrets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(secret)
    }

    async fn secrets_for_agent(&self, agent_id: Uuid) -> Result<Vec<SecretMetadata>, StoreError> {
        let secrets = sqlx::query_as::<_, SecretMetadata>(
            "SELECT * FROM secrets WHERE agent_id = $1 ORDER BY name",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(secrets)
    }

    async fn delete_secret(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM secrets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_approval(&self, approval: &ApprovalRequest) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO approvals
              (id, tenant_id, phone_id, secret_id, reason, challenge, status,
               created_at, expires_at, responded_at, approval_signature)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(approval.id)
        .bind(approval.tenant_id)
        .bind(approval.phone_id)
        .bind(&approval.secret_id)
        .bind(&approval.reason)
        .bind(&approval.challenge)
        .bind(approval.status)
        .bind(approval.created_at)
        .bind(approval.expires_at)
        .bind(approval.responded_at)
        .bind(&approval.approval_signature)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn approval(&self, id: Uuid) -> Result<Option<ApprovalRequest>, StoreError> {
        let approval =
            sqlx::query_as::<_, ApprovalRequest>("SELECT * FROM approvals WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(approval)
    }

    async fn resolve_approval(
        &self,
        id: Uuid,
        status: ApprovalStatus,
        responded_at: DateTime<Utc>,
        signature: Option<&[u8]>,
    ) -> Result<ApprovalRequest, StoreError> {
        // Conditional update: only a pending row transitions, so the
        // database arbitrates concurrent approve/reject/expire callers.
        let updated = sqlx::query_as::<_, ApprovalRequest>(
            r"UPDATE approvals
              SET status = $2, responded_at = $3,
                  approval_signature = COALESCE($4, approval_signature)
              WHERE id = $1 AND status = 'pending'
              RETURNING *",
        )
        .bind(id)
        .bind(status)
        .bind(responded_at)
        .bind(signature)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(record) => Ok(record),
            None => {
                // Distinguish a lost race from a missing record.
                let exists: Option<i32> =
                    sqlx::query_scalar("SELECT 1 FROM approvals WHERE id = $1")
                        .bind(id)
                        .fetch_optional(&self.pool)
                        .await?;
                if exists.is_some() {
                    Err(StoreError::Conflict)
                } else {
                    Err(StoreError::Missing)
                }
            }
        }
    }

    async fn expire_pending_for_tenant(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"UPDATE approvals
              SET status = 'expired', responded_at = $2
              WHERE tenant_id = $1 AND status = 'pending' AND expires_at <= $2",
        )
        .bind(tenant_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn pending_approvals(&self, tenant_id: Uuid) -> Result<Vec<ApprovalRequest>, StoreError> {
        let approvals = sqlx::query_as::<_, ApprovalRequest>(
            r"SELECT * FROM approvals
              WHERE tenant_id = $1 AND status = 'pending'
              ORDER BY created_at",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(approvals)
    }

    async fn insert_nonce(
        &self,
        digest: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO nonces (digest, expires_at) VALUES ($1, $2)")
            .bind(digest)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired_nonces(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM nonces WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO audit_log
              (id, tenant_id, agent_id, secret_id, reason, tier, result,
               latency_ms, proof, created_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(entry.id)
        .bind(entry.tenant_id)
        .bind(entry.agent_id)
        .bind(&entry.secret_id)
        .bind(&entry.reason)
        .bind(entry.tier)
        .bind(entry.result)
        .bind(entry.latency_ms)
        .bind(&entry.proof)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn audit_entries(
        &self,
        agent_id: Uuid,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let limit = filter.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).max(0);
        let entries = sqlx::query_as::<_, AuditEntry>(
            r"SELECT * FROM audit_log
              WHERE agent_id = $1
                AND ($2::text IS NULL OR secret_id = $2)
                AND ($3::timestamptz IS NULL OR created_at >= $3)
                AND ($4::timestamptz IS NULL OR created_at <= $4)
              ORDER BY created_at DESC
              LIMIT $5",
        )
        .bind(agent_id)
        .bind(filter.secret_id.as_deref())
        .bind(filter.from)
        .bind(filter.to)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}
