//! Domain records for Clavum.
//!
//! Everything the storage layer persists: tenants with their long-lived
//! X25519 keypair, paired agent and phone identities (public halves only),
//! secret metadata, approval requests, replay nonces, and audit entries.
//! Secret ciphertext never appears here — encrypted blobs and wrapped DEKs
//! live in the agent's local vault.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Tiers ────────────────────────────────────────────────────────────

/// Access tier of a secret. Immutable after registration.
///
/// Governs how many independent parties must participate in decryption:
/// two for `Routine`, two plus explicit human consent for `Sensitive`,
/// three for `Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Auto-granted: agent + server.
    Routine,
    /// Human-signed approval: agent + server + phone consent.
    Sensitive,
    /// Three-party key contribution: agent + server + phone.
    Critical,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Routine => write!(f, "routine"),
            Self::Sensitive => write!(f, "sensitive"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "routine" => Ok(Self::Routine),
            "sensitive" => Ok(Self::Sensitive),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

// ── Approval lifecycle ───────────────────────────────────────────────

/// Status of an approval request. `Pending` is the sole non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl ApprovalStatus {
    /// Whether this status admits no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Denied => write!(f, "denied"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

// ── Audit outcomes ───────────────────────────────────────────────────

/// Terminal outcome recorded for every completed retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    AutoGranted,
    HumanApproved,
    DeviceUnlocked,
    Denied,
    Expired,
    Error,
}

impl std::fmt::Display for AuditResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AutoGranted => write!(f, "auto_granted"),
            Self::HumanApproved => write!(f, "human_approved"),
            Self::DeviceUnlocked => write!(f, "device_unlocked"),
            Self::Denied => write!(f, "denied"),
            Self::Expired => write!(f, "expired"),
            Self::Error => write!(f, "error"),
        }
    }
}

// ── Identities ───────────────────────────────────────────────────────

/// An isolation boundary owning one long-lived X25519 keypair.
///
/// The private half never leaves this record; it is loaded into a
/// zeroizing buffer on demand and cached with a bounded TTL.
#[derive(Clone, sqlx::FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub x25519_public: Vec<u8>,
    pub x25519_private: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for Tenant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tenant")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("x25519_private", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// A paired machine identity. The server stores only public key halves.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Agent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// X25519 public key for ECDH with the tenant's server keypair.
    pub x25519_public: Vec<u8>,
    /// Ed25519 public key for request-signature verification.
    pub ed25519_public: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// A paired phone identity, symmetric to [`Agent`].
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Phone {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub x25519_public: Vec<u8>,
    pub ed25519_public: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

// ── Secrets ──────────────────────────────────────────────────────────

/// Metadata for a registered secret. `(agent_id, name)` is unique; the id
/// is a client-supplied opaque token, unique across the deployment.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SecretMetadata {
    pub id: String,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub name: String,
    pub tier: Tier,
    pub created_at: DateTime<Utc>,
}

// ── Approvals ────────────────────────────────────────────────────────

/// A human-consent request for a sensitive or critical secret.
///
/// The challenge is fixed at creation and never rewritten; terminal
/// states are permanent and always carry `responded_at`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub phone_id: Uuid,
    pub secret_id: String,
    pub reason: String,
    pub challenge: Vec<u8>,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub approval_signature: Option<Vec<u8>>,
}

// ── Replay nonces ────────────────────────────────────────────────────

/// A briefly-kept record that a request signature has been observed.
/// Presence of the digest means "reject a replay of this signature".
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NonceRecord {
    pub digest: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

// ── Audit ────────────────────────────────────────────────────────────

/// Append-only record of a retrieval outcome.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub secret_id: String,
    pub reason: String,
    pub tier: Tier,
    pub result: AuditResult,
    pub latency_ms: Option<i64>,
    /// Approval signature bytes, when a human or device consented.
    pub proof: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

/// Filter for audit listings. `limit` is clamped by the caller.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub secret_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}
