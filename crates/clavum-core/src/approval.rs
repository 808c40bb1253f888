//! Approval lifecycle for sensitive- and critical-tier secrets.
//!
//! Records move `pending → {approved, denied, expired}`; terminal states
//! are permanent. Expiry is lazy: nothing scans for deadlines — a record
//! past its deadline is transitioned at the next touch (approve, status
//! read, or pending listing), and the storage compare-and-swap guarantees
//! at most one of approve/reject/expire wins a race. Losers observe
//! [`ApprovalError::AlreadyResolved`].

use std::sync::Arc;

use chrono::Duration;
use tracing::info;
use uuid::Uuid;

use clavum_storage::models::{ApprovalRequest, ApprovalStatus};
use clavum_storage::{Store, StoreError};

use crate::clock::Clock;
use crate::error::ApprovalError;
use crate::primitives::KEY_LEN;
use crate::signing::{build_challenge, verify_challenge};

/// Default approval timeout.
pub const DEFAULT_APPROVAL_TIMEOUT_MS: i64 = 300_000;

/// Creates, resolves, and lazily expires approval records.
pub struct ApprovalMachine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl ApprovalMachine {
    /// Create a machine over the given store and clock.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create a pending approval for `(secret, reason)` addressed to a
    /// phone. The challenge is built here, stored verbatim, and never
    /// rewritten.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Store`] if the insert fails.
    pub async fn create(
        &self,
        tenant_id: Uuid,
        phone_id: Uuid,
        secret_id: &str,
        reason: &str,
        timeout_ms: Option<i64>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let now = self.clock.now();
        let timeout_ms = timeout_ms.unwrap_or(DEFAULT_APPROVAL_TIMEOUT_MS);

        let record = ApprovalRequest {
            id: Uuid::new_v4(),
            tenant_id,
            phone_id,
            secret_id: secret_id.to_owned(),
            reason: reason.to_owned(),
            challenge: build_challenge(secret_id, reason, None),
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at: now + Duration::milliseconds(timeout_ms),
            responded_at: None,
            approval_signature: None,
        };
        self.store.insert_approval(&record).await?;

        info!(
            approval_id = %record.id,
            secret_id = %record.secret_id,
            timeout_ms,
            "approval created"
        );
        Ok(record)
    }

    /// Approve a pending record with the phone's signature over its
    /// stored challenge.
    ///
    /// Checks run in a fixed order: missing record, already-resolved,
    /// past-deadline (lazily expired, then reported as `Expired`),
    /// invalid signature (record stays pending), then the transition.
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::NotFound`] — no such record.
    /// - [`ApprovalError::AlreadyResolved`] — terminal status, or a
    ///   concurrent resolution won.
    /// - [`ApprovalError::Expired`] — deadline passed; the record is now
    ///   `expired` with `responded_at` set.
    /// - [`ApprovalError::InvalidSignature`] — signature does not verify.
    pub async fn approve(
        &self,
        id: Uuid,
        signature: &[u8],
        phone_public: &[u8; KEY_LEN],
    ) -> Result<ApprovalRequest, ApprovalError> {
        let record = self
            .store
            .approval(id)
            .await?
            .ok_or(ApprovalError::NotFound)?;

        if record.status != ApprovalStatus::Pending {
            return Err(ApprovalError::AlreadyResolved(record.status));
        }

        let now = self.clock.now();
        if now >= record.expires_at {
            return match self
                .store
                .resolve_approval(id, ApprovalStatus::Expired, now, None)
                .await
            {
                Ok(_) => Err(ApprovalError::Expired),
                Err(StoreError::Conflict) => Err(self.lost_race(id).await),
                Err(err) => Err(err.into()),
            };
        }

        if !verify_challenge(phone_public, &record.challenge, signature) {
            return Err(ApprovalError::InvalidSignature);
        }

        match self
            .store
            .resolve_approval(id, ApprovalStatus::Approved, now, Some(signature))
            .await
        {
            Ok(resolved) => {
                info!(approval_id = %id, secret_id = %resolved.secret_id, "approval granted");
                Ok(resolved)
            }
            Err(StoreError::Conflict) => Err(self.lost_race(id).await),
            Err(err) => Err(err.into()),
        }
    }

    /// Deny a pending record.
    ///
    /// # Errors
    ///
    /// Same missing/already-resolved semantics as [`approve`](Self::approve);
    /// no signature or deadline is involved.
    pub async fn reject(&self, id: Uuid) -> Result<ApprovalRequest, ApprovalError> {
        let record = self
            .store
            .approval(id)
            .await?
            .ok_or(ApprovalError::NotFound)?;

        if record.status != ApprovalStatus::Pending {
            return Err(ApprovalError::AlreadyResolved(record.status));
        }

        let now = self.clock.now();
        match self
            .store
            .resolve_approval(id, ApprovalStatus::Denied, now, None)
            .await
        {
            Ok(resolved) => {
                info!(approval_id = %id, secret_id = %resolved.secret_id, "approval denied");
                Ok(resolved)
            }
            Err(StoreError::Conflict) => Err(self.lost_race(id).await),
            Err(err) => Err(err.into()),
        }
    }

    /// List a tenant's pending approvals, oldest first.
    ///
    /// Past-deadline records of the tenant are bulk-expired first, so the
    /// returned set contains no stale rows.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Store`] on backend failure.
    pub async fn pending_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        let now = self.clock.now();
        self.store.expire_pending_for_tenant(tenant_id, now).await?;
        Ok(self.store.pending_approvals(tenant_id).await?)
    }

    /// Read a record's current state, lazily expiring it if its deadline
    /// has passed. Returns `None` for a missing record.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Store`] on backend failure.
    pub async fn status(&self, id: Uuid) -> Result<Option<ApprovalRequest>, ApprovalError> {
        let Some(record) = self.store.approval(id).await? else {
            return Ok(None);
        };

        if record.status == ApprovalStatus::Pending && self.clock.now() >= record.expires_at {
            let now = self.clock.now();
            return match self
                .store
                .resolve_approval(id, ApprovalStatus::Expired, now, None)
                .await
            {
                Ok(expired) => Ok(Some(expired)),
                // A concurrent resolution won; report whatever it chose.
                Err(StoreError::Conflict) => Ok(self.store.approval(id).await?),
                Err(err) => Err(err.into()),
            };
        }

        Ok(Some(record))
    }

    /// Re-read a record after a lost compare-and-swap to report the
    /// winning status.
    async fn lost_race(&self, id: Uuid) -> ApprovalError {
        match self.store.approval(id).await {
            Ok(Some(record)) => ApprovalError::AlreadyResolved(record.status),
            Ok(None) => ApprovalError::NotFound,
            Err(err) => err.into(),
        }
    }
}

impl std::fmt::Debug for ApprovalMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalMachine").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use clavum_storage::MemoryStore;

    use crate::clock::ManualClock;
    use crate::primitives::Ed25519KeyPair;
    use crate::signing::sign_challenge;

    use super::*;

    struct Fixture {
        machine: ApprovalMachine,
        clock: Arc<ManualClock>,
        tenant_id: Uuid,
        phone_id: Uuid,
        phone_key: Ed25519KeyPair,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let machine = ApprovalMachine::new(store, Arc::clone(&clock) as Arc<dyn Clock>);
        Fixture {
            machine,
            clock,
            tenant_id: Uuid::new_v4(),
            phone_id: Uuid::new_v4(),
            phone_key: Ed25519KeyPair::generate(),
        }
    }

    impl Fixture {
        async fn create(&self, timeout_ms: Option<i64>) -> ApprovalRequest {
            self.machine
                .create(self.tenant_id, self.phone_id, "sec-1", "ci deploy", timeout_ms)
                .await
                .unwrap()
        }
    }

    // ── Create ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_uses_default_timeout() {
        let fx = fixture();
        let record = fx.create(None).await;
        assert_eq!(record.status, ApprovalStatus::Pending);
        assert_eq!(
            record.expires_at - record.created_at,
            Duration::milliseconds(DEFAULT_APPROVAL_TIMEOUT_MS)
        );
        assert!(record.responded_at.is_none());
    }

    #[tokio::test]
    async fn create_fixes_challenge_with_context() {
        let fx = fixture();
        let record = fx.create(None).await;
        // nonce32 || "sec-1" || sha256(reason)
        assert_eq!(record.challenge.len(), 32 + 5 + 32);
        assert_eq!(&record.challenge[32..37], b"sec-1");
    }

    #[tokio::test]
    async fn two_creates_yield_distinct_challenges() {
        let fx = fixture();
        let a = fx.create(None).await;
        let b = fx.create(None).await;
        assert_ne!(a.challenge, b.challenge);
    }

    // ── Approve ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn approve_with_valid_signature() {
        let fx = fixture();
        let record = fx.create(None).await;
        let sig = sign_challenge(&fx.phone_key, &record.challenge);

        let resolved = fx
            .machine
            .approve(record.id, &sig, &fx.phone_key.public_key())
            .await
            .unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(resolved.approval_signature, Some(sig.to_vec()));
        assert!(resolved.responded_at.is_some());
    }

    #[tokio::test]
    async fn approve_missing_record_is_not_found() {
        let fx = fixture();
        let err = fx
            .machine
            .approve(Uuid::new_v4(), &[0; 64], &fx.phone_key.public_key())
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::NotFound));
    }

    #[tokio::test]
    async fn approve_resolved_record_reports_winner() {
        let fx = fixture();
        let record = fx.create(None).await;
        fx.machine.reject(record.id).await.unwrap();

        let sig = sign_challenge(&fx.phone_key, &record.challenge);
        let err = fx
            .machine
            .approve(record.id, &sig, &fx.phone_key.public_key())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApprovalError::AlreadyResolved(ApprovalStatus::Denied)
        ));
    }

    #[tokio::test]
    async fn approve_after_deadline_expires_lazily() {
        let fx = fixture();
        let record = fx.create(Some(1)).await;
        fx.clock.advance_ms(5);

        let sig = sign_challenge(&fx.phone_key, &record.challenge);
        let err = fx
            .machine
            .approve(record.id, &sig, &fx.phone_key.public_key())
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::Expired));

        let stored = fx.machine.status(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ApprovalStatus::Expired);
        assert!(stored.responded_at.is_some());
    }

    #[tokio::test]
    async fn approve_at_exact_deadline_expires() {
        let fx = fixture();
        let record = fx.create(Some(1_000)).await;
        fx.clock.advance_ms(1_000);

        let sig = sign_challenge(&fx.phone_key, &record.challenge);
        let err = fx
            .machine
            .approve(record.id, &sig, &fx.phone_key.public_key())
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::Expired));
    }

    #[tokio::test]
    async fn bad_signature_leaves_record_pending() {
        let fx = fixture();
        let record = fx.create(None).await;

        let other = Ed25519KeyPair::generate();
        let sig = sign_challenge(&other, &record.challenge);
        let err = fx
            .machine
            .approve(record.id, &sig, &fx.phone_key.public_key())
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::InvalidSignature));

        let stored = fx.machine.status(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ApprovalStatus::Pending);

        // A correct signature still succeeds afterwards.
        let sig = sign_challenge(&fx.phone_key, &record.challenge);
        fx.machine
            .approve(record.id, &sig, &fx.phone_key.public_key())
            .await
            .unwrap();
    }

    // ── Reject ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn reject_sets_denied_and_responded_at() {
        let fx = fixture();
        let record = fx.create(None).await;
        let resolved = fx.machine.reject(record.id).await.unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Denied);
        assert!(resolved.responded_at.is_some());
    }

    #[tokio::test]
    async fn reject_twice_is_already_resolved() {
        let fx = fixture();
        let record = fx.create(None).await;
        fx.machine.reject(record.id).await.unwrap();
        let err = fx.machine.reject(record.id).await.unwrap_err();
        assert!(matches!(
            err,
            ApprovalError::AlreadyResolved(ApprovalStatus::Denied)
        ));
    }

    // ── Pending listing ──────────────────────────────────────────────

    #[tokio::test]
    async fn pending_listing_expires_stale_rows_first() {
        let fx = fixture();
        let stale = fx.create(Some(1)).await;
        let fresh = fx.create(Some(60_000)).await;
        fx.clock.advance_ms(10);

        let pending = fx.machine.pending_for_tenant(fx.tenant_id).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, fresh.id);

        let stale = fx.machine.status(stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, ApprovalStatus::Expired);
    }

    #[tokio::test]
    async fn pending_listing_is_created_at_ascending() {
        let fx = fixture();
        let first = fx.create(None).await;
        fx.clock.advance_ms(10);
        let second = fx.create(None).await;

        let pending = fx.machine.pending_for_tenant(fx.tenant_id).await.unwrap();
        assert_eq!(
            pending.iter().map(|a| a.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );
    }

    // ── Status ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn status_of_missing_record_is_none() {
        let fx = fixture();
        assert!(fx.machine.status(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lazy_expiry_is_idempotent() {
        let fx = fixture();
        let record = fx.create(Some(1)).await;
        fx.clock.advance_ms(5);

        let first = fx.machine.status(record.id).await.unwrap().unwrap();
        assert_eq!(first.status, ApprovalStatus::Expired);
        let responded_at = first.responded_at.unwrap();

        fx.clock.advance_ms(1_000);
        let second = fx.machine.status(record.id).await.unwrap().unwrap();
        assert_eq!(second.status, ApprovalStatus::Expired);
        assert_eq!(second.responded_at, Some(responded_at));
    }
}
