//! Core cryptographic and lifecycle logic for Clavum.
//!
//! - [`primitives`] — the narrow crypto layer (X25519, Ed25519,
//!   AES-256-GCM, HKDF/HMAC/SHA-256, CSPRNG, constant-time compare,
//!   zeroizing containers)
//! - [`flows`] — tier-specific KEK derivation and DEK/secret envelopes
//! - [`signing`] — canonical request signatures and approval challenges
//! - [`approval`] — the approval state machine with lazy expiry
//! - [`clock`] — the injectable time source everything measures against

pub mod approval;
pub mod clock;
pub mod error;
pub mod flows;
pub mod primitives;
pub mod signing;

pub use error::{ApprovalError, CryptoError};
