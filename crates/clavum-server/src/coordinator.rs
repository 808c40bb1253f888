//! Tier-routed retrieval orchestration.
//!
//! The coordinator is the entry point for secret retrieval, running after
//! the auth gate has bound an agent identity. It validates ownership,
//! routes by tier, derives the tier's KEK, wraps it under the
//! agent↔tenant session secret for transport, and writes the audit entry
//! before any key material leaves the process.
//!
//! Two rules shape the code here:
//!
//! - **Audit before response.** The audit insert happens after the KEK
//!   bytes exist but before they are returned; if the insert fails the
//!   caller gets `InternalError` and no key material.
//! - **Disconnect-proof completion.** Once a KEK derivation starts, the
//!   derive→wrap→audit sequence runs in a spawned task. A client
//!   disconnect drops the handler future, not the task, so the audit
//!   write always lands; the response is simply discarded.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use clavum_core::approval::ApprovalMachine;
use clavum_core::clock::Clock;
use clavum_core::flows::{derive_green_kek, derive_red_kek, KEK_SALT_LEN};
use clavum_core::primitives::{
    aesgcm_encrypt, x25519_shared, SecretBytes, X25519SecretKey, AES_IV_LEN, AES_TAG_LEN, KEY_LEN,
};
use clavum_storage::models::{
    Agent, ApprovalStatus, AuditEntry, AuditResult, Phone, SecretMetadata, Tier,
};
use clavum_storage::Store;

use crate::error::ApiError;
use crate::keycache::TenantKeyCache;

/// Decoded inputs of a retrieval request.
#[derive(Debug)]
pub struct RetrieveParams {
    pub eph_pub: [u8; KEY_LEN],
    pub kek_salt: [u8; KEK_SALT_LEN],
    pub reason: String,
}

/// A KEK encrypted under the agent↔tenant session secret.
#[derive(Debug, Clone)]
pub struct WrappedKek {
    pub enc_kek: Vec<u8>,
    pub iv: [u8; AES_IV_LEN],
    pub tag: [u8; AES_TAG_LEN],
}

/// Outcome of the initial retrieval call.
#[derive(Debug)]
pub enum Retrieval {
    /// Routine tier: key material, ready to transport.
    Granted(WrappedKek),
    /// Sensitive/critical tier: consent is pending; poll for status.
    Pending {
        approval_id: Uuid,
        expires_at: DateTime<Utc>,
    },
}

/// Outcome of a status poll.
#[derive(Debug)]
pub enum PollOutcome {
    Pending {
        expires_at: DateTime<Utc>,
    },
    Granted(WrappedKek),
    Denied {
        responded_at: DateTime<Utc>,
    },
    Expired {
        responded_at: DateTime<Utc>,
    },
}

/// How to derive the KEK for a grant.
enum KekPlan {
    Green {
        eph_pub: [u8; KEY_LEN],
        kek_salt: [u8; KEK_SALT_LEN],
    },
    Red {
        phone_pub: [u8; KEY_LEN],
        challenge: Vec<u8>,
    },
}

/// The retrieval coordinator.
pub struct RetrievalCoordinator {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    keys: Arc<TenantKeyCache>,
    approvals: Arc<ApprovalMachine>,
    approval_timeout_ms: i64,
}

impl RetrievalCoordinator {
    /// Assemble a coordinator from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        keys: Arc<TenantKeyCache>,
        approvals: Arc<ApprovalMachine>,
        approval_timeout_ms: i64,
    ) -> Self {
        Self {
            store,
            clock,
            keys,
            approvals,
            approval_timeout_ms,
        }
    }

    /// Retrieve a secret's KEK or initiate the consent flow, depending
    /// on tier.
    ///
    /// # Errors
    ///
    /// - [`ApiError::NotFound`] / [`ApiError::Forbidden`] for unknown or
    ///   foreign secrets.
    /// - [`ApiError::BadRequest`] if the ephemeral key is invalid.
    /// - [`ApiError::Internal`] if key loading, audit, or storage fails.
    pub async fn retrieve(
        &self,
        agent: &Agent,
        secret_id: &str,
        params: RetrieveParams,
    ) -> Result<Retrieval, ApiError> {
        let started = Instant::now();
        let secret = self.owned_secret(agent, secret_id).await?;

        match secret.tier {
            Tier::Routine => {
                let wrapped = self
                    .grant(
                        agent,
                        &secret,
                        KekPlan::Green {
                            eph_pub: params.eph_pub,
                            kek_salt: params.kek_salt,
                        },
                        params.reason,
                        AuditResult::AutoGranted,
                        None,
                        started,
                    )
                    .await?;
                Ok(Retrieval::Granted(wrapped))
            }
            Tier::Sensitive | Tier::Critical => {
                let phone = self.tenant_phone(secret.tenant_id).await?;
                let approval = self
                    .approvals
                    .create(
                        secret.tenant_id,
                        phone.id,
                        secret_id,
                        &params.reason,
                        Some(self.approval_timeout_ms),
                    )
                    .await?;
                info!(
                    secret_id,
                    approval_id = %approval.id,
                    tier = %secret.tier,
                    "retrieval pending human consent"
                );
                Ok(Retrieval::Pending {
                    approval_id: approval.id,
                    expires_at: approval.expires_at,
                })
            }
        }
    }

    /// Poll a pending retrieval. On an approved record this performs the
    /// same derivation as the routine path (or the three-party one for
    /// critical secrets) and audits the grant; denied and expired
    /// records audit their terminal outcome.
    ///
    /// # Errors
    ///
    /// - [`ApiError::NotFound`] for unknown secrets or approvals, or an
    ///   approval that does not belong to this `(agent, secret)` pair.
    /// - [`ApiError::Forbidden`] for foreign secrets.
    /// - [`ApiError::BadRequest`] if the ephemeral key is invalid.
    pub async fn poll(
        &self,
        agent: &Agent,
        secret_id: &str,
        approval_id: Uuid,
        eph_pub: [u8; KEY_LEN],
        kek_salt: [u8; KEK_SALT_LEN],
    ) -> Result<PollOutcome, ApiError> {
        let started = Instant::now();
        let secret = self.owned_secret(agent, secret_id).await?;

        let approval = self
            .approvals
            .status(approval_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("approval not found".to_owned()))?;
        if approval.secret_id != secret.id || approval.tenant_id != agent.tenant_id {
            return Err(ApiError::NotFound("approval not found".to_owned()));
        }

        let responded_at = approval.responded_at.unwrap_or_else(|| self.clock.now());
        match approval.status {
            ApprovalStatus::Pending => Ok(PollOutcome::Pending {
                expires_at: approval.expires_at,
            }),
            ApprovalStatus::Approved => {
                let proof = approval.approval_signature.clone();
                let (plan, result) = match secret.tier {
                    Tier::Sensitive => (KekPlan::Green { eph_pub, kek_salt }, AuditResult::HumanApproved),
                    Tier::Critical => {
                        let phone = self
                            .store
                            .phone(approval.phone_id)
                            .await?
                            .ok_or_else(|| ApiError::internal("phone record missing"))?;
                        let phone_pub = public_key(&phone.x25519_public)?;
                        (
                            KekPlan::Red {
                                phone_pub,
                                challenge: approval.challenge.clone(),
                            },
                            AuditResult::DeviceUnlocked,
                        )
                    }
                    Tier::Routine => {
                        return Err(ApiError::NotFound("approval not found".to_owned()));
                    }
                };
                let wrapped = self
                    .grant(agent, &secret, plan, approval.reason.clone(), result, proof, started)
                    .await?;
                Ok(PollOutcome::Granted(wrapped))
            }
            ApprovalStatus::Denied => {
                self.audit(agent, &secret, &approval.reason, AuditResult::Denied, None, started)
                    .await?;
                Ok(PollOutcome::Denied { responded_at })
            }
            ApprovalStatus::Expired => {
                self.audit(agent, &secret, &approval.reason, AuditResult::Expired, None, started)
                    .await?;
                Ok(PollOutcome::Expired { responded_at })
            }
        }
    }

    /// Load a secret and require that the authenticated agent owns it.
    async fn owned_secret(
        &self,
        agent: &Agent,
        secret_id: &str,
    ) -> Result<SecretMetadata, ApiError> {
        let secret = self
            .store
            .secret(secret_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("secret not found".to_owned()))?;
        if secret.agent_id != agent.id {
            return Err(ApiError::Forbidden(
                "secret belongs to another agent".to_owned(),
            ));
        }
        Ok(secret)
    }

    /// Select the tenant's phone. Single-phone assumption: the earliest
    /// paired phone wins deterministically if several exist.
    async fn tenant_phone(&self, tenant_id: Uuid) -> Result<Phone, ApiError> {
        self.store
            .phones_for_tenant(tenant_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::internal("no phone paired for tenant"))
    }

    /// Derive the planned KEK, wrap it for transport, and write the
    /// audit entry — all inside a spawned task so a client disconnect
    /// cannot cancel the section once key material exists.
    #[allow(clippy::too_many_arguments)]
    async fn grant(
        &self,
        agent: &Agent,
        secret: &SecretMetadata,
        plan: KekPlan,
        reason: String,
        result: AuditResult,
        proof: Option<Vec<u8>>,
        started: Instant,
    ) -> Result<WrappedKek, ApiError> {
        let server_key = self.keys.server_key(secret.tenant_id).await?;
        let agent_pub = public_key(&agent.x25519_public)?;

        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let agent = agent.clone();
        let secret = secret.clone();

        let task = tokio::spawn(async move {
            let kek = derive_kek(&server_key, &agent_pub, &secret, &plan)?;
            let wrapped = wrap_for_transport(&server_key, &agent_pub, &kek)?;
            // `kek` and the session secret inside `wrap_for_transport`
            // are zeroized on drop before the audit write below.
            drop(kek);

            let latency_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
            let entry = AuditEntry {
                id: Uuid::new_v4(),
                tenant_id: secret.tenant_id,
                agent_id: agent.id,
                secret_id: secret.id.clone(),
                reason,
                tier: secret.tier,
                result,
                latency_ms: Some(latency_ms),
                proof,
                created_at: clock.now(),
            };
            store
                .append_audit(&entry)
                .await
                .map_err(|err| ApiError::internal(format!("audit write failed: {err}")))?;

            info!(
                secret_id = %secret.id,
                result = %result,
                latency_ms,
                "retrieval granted"
            );
            Ok::<WrappedKek, ApiError>(wrapped)
        });

        task.await
            .map_err(|_| ApiError::internal("grant task failed"))?
    }

    /// Write a terminal audit entry with the observed latency.
    async fn audit(
        &self,
        agent: &Agent,
        secret: &SecretMetadata,
        reason: &str,
        result: AuditResult,
        proof: Option<Vec<u8>>,
        started: Instant,
    ) -> Result<(), ApiError> {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            tenant_id: secret.tenant_id,
            agent_id: agent.id,
            secret_id: secret.id.clone(),
            reason: reason.to_owned(),
            tier: secret.tier,
            result,
            latency_ms: Some(i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)),
            proof,
            created_at: self.clock.now(),
        };
        self.store
            .append_audit(&entry)
            .await
            .map_err(|err| ApiError::internal(format!("audit write failed: {err}")))
    }
}

impl std::fmt::Debug for RetrievalCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalCoordinator")
            .field("approval_timeout_ms", &self.approval_timeout_ms)
            .finish_non_exhaustive()
    }
}

/// Derive the KEK described by the plan.
fn derive_kek(
    server_key: &X25519SecretKey,
    agent_pub: &[u8; KEY_LEN],
    secret: &SecretMetadata,
    plan: &KekPlan,
) -> Result<SecretBytes, ApiError> {
    match plan {
        KekPlan::Green { eph_pub, kek_salt } => {
            derive_green_kek(server_key, eph_pub, kek_salt, &secret.id)
                .map_err(|_| ApiError::BadRequest("invalid ephemeral public key".to_owned()))
        }
        KekPlan::Red {
            phone_pub,
            challenge,
        } => Ok(derive_red_kek(
            server_key, agent_pub, phone_pub, challenge, &secret.id,
        )?),
    }
}

/// Encrypt a KEK under the agent↔tenant session secret (`K_session`),
/// with empty AAD per the transport contract. The session secret is a
/// fresh buffer, zeroized when this function returns.
fn wrap_for_transport(
    server_key: &X25519SecretKey,
    agent_pub: &[u8; KEY_LEN],
    kek: &SecretBytes,
) -> Result<WrappedKek, ApiError> {
    let k_session = x25519_shared(server_key, agent_pub)?;
    let (enc_kek, iv, tag) = aesgcm_encrypt(k_session.as_key()?, kek.as_slice(), b"", None)?;
    Ok(WrappedKek { enc_kek, iv, tag })
}

/// Interpret stored public-key bytes as a fixed 32-byte key.
fn public_key(stored: &[u8]) -> Result<[u8; KEY_LEN], ApiError> {
    stored
        .try_into()
        .map_err(|_| ApiError::internal("stored public key is malformed"))
}
