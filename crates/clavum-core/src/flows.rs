//! Tier-specific key flows.
//!
//! Composes the primitives into the five operations the retrieval paths
//! use: the routine-tier KEK (ephemeral ECDH + HKDF), the critical-tier
//! KEK (dual ECDH + challenge-salted HKDF), DEK wrapping, and secret
//! encryption. KEKs are 32 bytes, derived on demand, and never persisted.
//!
//! The AAD convention and the HKDF info string are part of the wire
//! contract: both sides of every exchange must produce identical bytes,
//! so the encodings here must not change without a version bump.

use clavum_storage::models::Tier;

use crate::error::CryptoError;
use crate::primitives::{
    aesgcm_decrypt, aesgcm_encrypt, hkdf_sha256, x25519_shared, SecretBytes, X25519SecretKey,
    AES_IV_LEN, AES_TAG_LEN, KEY_LEN,
};

/// ASCII prefix of the HKDF info string for KEK derivation.
pub const KEK_INFO_PREFIX: &str = "clavum-kek-v1";

/// Length of the per-secret KEK salt supplied by the requester.
pub const KEK_SALT_LEN: usize = 32;

/// Ciphertext plus the AEAD parameters needed to reverse it.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; AES_IV_LEN],
    pub tag: [u8; AES_TAG_LEN],
}

/// HKDF info for a secret's KEK: `"clavum-kek-v1" || secret_id` (UTF-8,
/// no delimiter).
#[must_use]
pub fn kek_info(secret_id: &str) -> Vec<u8> {
    let mut info = Vec::with_capacity(KEK_INFO_PREFIX.len() + secret_id.len());
    info.extend_from_slice(KEK_INFO_PREFIX.as_bytes());
    info.extend_from_slice(secret_id.as_bytes());
    info
}

/// AAD bound into DEK wrapping and secret encryption:
/// `secret_id || tier || agent_id`, each in its UTF-8 textual form with
/// no delimiter.
#[must_use]
pub fn build_aad(secret_id: &str, tier: Tier, agent_id: &str) -> Vec<u8> {
    let tier = tier.to_string();
    let mut aad = Vec::with_capacity(secret_id.len() + tier.len() + agent_id.len());
    aad.extend_from_slice(secret_id.as_bytes());
    aad.extend_from_slice(tier.as_bytes());
    aad.extend_from_slice(agent_id.as_bytes());
    aad
}

/// Derive the routine-tier KEK.
///
/// `KEK = HKDF(ikm = X25519(local, remote), salt = kek_salt,
/// info = kek_info(secret_id), len = 32)`. The agent calls this with its
/// ephemeral private key and the server public key; the server calls it
/// with the tenant private key and the agent's ephemeral public key.
/// Both arrive at the same bytes.
///
/// The intermediate shared secret is zeroized before returning, on every
/// path.
///
/// # Errors
///
/// Returns [`CryptoError`] if the peer key is invalid or derivation fails.
pub fn derive_green_kek(
    local: &X25519SecretKey,
    remote_public: &[u8; KEY_LEN],
    kek_salt: &[u8; KEK_SALT_LEN],
    secret_id: &str,
) -> Result<SecretBytes, CryptoError> {
    let shared = x25519_shared(local, remote_public)?;
    hkdf_sha256(shared.as_slice(), kek_salt, &kek_info(secret_id), KEY_LEN)
}

/// Derive the critical-tier KEK.
///
/// `KEK = HKDF(ikm = K_agent || K_phone, salt = challenge,
/// info = kek_info(secret_id), len = 32)` where `K_agent` and `K_phone`
/// are the server's ECDH outputs with the agent and phone respectively.
/// The challenge salt makes every retrieval's KEK unique.
///
/// # Errors
///
/// Returns [`CryptoError`] if either peer key is invalid.
pub fn derive_red_kek(
    server: &X25519SecretKey,
    agent_public: &[u8; KEY_LEN],
    phone_public: &[u8; KEY_LEN],
    challenge: &[u8],
    secret_id: &str,
) -> Result<SecretBytes, CryptoError> {
    let k_agent = x25519_shared(server, agent_public)?;
    let k_phone = x25519_shared(server, phone_public)?;

    // The concatenated IKM is its own zeroizing buffer; it and the two
    // halves all wipe when this function returns, on any path.
    let mut ikm_buf = Vec::with_capacity(KEY_LEN * 2);
    ikm_buf.extend_from_slice(k_agent.as_slice());
    ikm_buf.extend_from_slice(k_phone.as_slice());
    let ikm = SecretBytes::new(ikm_buf);

    hkdf_sha256(ikm.as_slice(), challenge, &kek_info(secret_id), KEY_LEN)
}

/// Wrap a DEK under a KEK with a fresh IV.
///
/// # Errors
///
/// Returns [`CryptoError`] if the KEK is not 32 bytes or the AEAD fails.
pub fn wrap_dek(kek: &SecretBytes, dek: &SecretBytes, aad: &[u8]) -> Result<Sealed, CryptoError> {
    let (ciphertext, iv, tag) = aesgcm_encrypt(kek.as_key()?, dek.as_slice(), aad, None)?;
    Ok(Sealed {
        ciphertext,
        iv,
        tag,
    })
}

/// Unwrap a DEK. Requires the same KEK, IV, AAD, and tag.
///
/// # Errors
///
/// Returns [`CryptoError`] on any authentication failure.
pub fn unwrap_dek(
    kek: &SecretBytes,
    wrapped: &Sealed,
    aad: &[u8],
) -> Result<SecretBytes, CryptoError> {
    aesgcm_decrypt(
        kek.as_key()?,
        &wrapped.ciphertext,
        &wrapped.iv,
        aad,
        &wrapped.tag,
    )
}

/// Encrypt a secret's plaintext under its DEK.
///
/// # Errors
///
/// Returns [`CryptoError`] if the DEK is not 32 bytes or the AEAD fails.
pub fn encrypt_secret(
    dek: &SecretBytes,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Sealed, CryptoError> {
    let (ciphertext, iv, tag) = aesgcm_encrypt(dek.as_key()?, plaintext, aad, None)?;
    Ok(Sealed {
        ciphertext,
        iv,
        tag,
    })
}

/// Decrypt a secret's plaintext. Requires matching parameters.
///
/// # Errors
///
/// Returns [`CryptoError`] on any authentication failure.
pub fn decrypt_secret(
    dek: &SecretBytes,
    sealed: &Sealed,
    aad: &[u8],
) -> Result<SecretBytes, CryptoError> {
    aesgcm_decrypt(dek.as_key()?, &sealed.ciphertext, &sealed.iv, aad, &sealed.tag)
}
