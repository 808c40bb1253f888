//! Cryptographic primitives for Clavum.
//!
//! A narrow, auditable layer: X25519 key agreement, Ed25519 signatures,
//! AES-256-GCM with detached tags, HKDF-SHA256, HMAC-SHA256, SHA-256, the
//! OS CSPRNG, constant-time comparison, and zeroization. Nothing above
//! this module touches a crypto crate directly.
//!
//! # Security model
//!
//! - Key material is returned in [`SecretBytes`], which overwrites its
//!   contents on drop. Private-key wrappers never expose bytes in `Debug`.
//! - Every failure — tag mismatch, invalid point, wrong key length, bad
//!   signature encoding — surfaces as the one opaque [`CryptoError`].
//!   Callers cannot distinguish causes, and primitives never retry.
//! - AES-GCM IVs are 12 bytes; when the caller does not supply one it is
//!   drawn from the OS CSPRNG.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// AES-256-GCM IV length (96 bits).
pub const AES_IV_LEN: usize = 12;

/// AES-256-GCM authentication tag length.
pub const AES_TAG_LEN: usize = 16;

/// Length of symmetric keys, ECDH outputs, and hash digests.
pub const KEY_LEN: usize = 32;

/// Ed25519 signature length.
pub const SIGNATURE_LEN: usize = 64;

// ── SecretBytes ──────────────────────────────────────────────────────

/// An owned byte buffer that is overwritten with zeros when dropped.
///
/// Every primitive that materializes a DEK, KEK, ECDH output, or session
/// key returns one of these, so the zeroize obligation discharges on all
/// exit paths, including errors and panics during unwind.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    /// Take ownership of raw bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Copy a slice into a fresh buffer. The copy carries its own
    /// zeroize obligation, independent of the source.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// Borrow the raw bytes. Callers must not log or persist them.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// View the buffer as a 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if the buffer is not exactly 32 bytes.
    pub fn as_key(&self) -> Result<&[u8; KEY_LEN], CryptoError> {
        <&[u8; KEY_LEN]>::try_from(self.0.as_slice()).map_err(|_| CryptoError)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes([REDACTED; {}])", self.0.len())
    }
}

// ── X25519 ───────────────────────────────────────────────────────────

/// An X25519 private key. Zeroized on drop by the underlying secret.
#[derive(Clone)]
pub struct X25519SecretKey(StaticSecret);

impl X25519SecretKey {
    /// Generate a fresh key from the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng))
    }

    /// Reconstruct a key from its 32 raw bytes (RFC 7748 clamping applies).
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Export the raw private bytes for persistence in a tenant record.
    /// Handle with care; zeroize the destination when done.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        self.0.to_bytes()
    }

    /// The corresponding public key.
    #[must_use]
    pub fn public_key(&self) -> [u8; KEY_LEN] {
        X25519PublicKey::from(&self.0).to_bytes()
    }
}

impl fmt::Debug for X25519SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519SecretKey([REDACTED])")
    }
}

/// Generate an X25519 keypair: `(private, public)`.
#[must_use]
pub fn x25519_keygen() -> (X25519SecretKey, [u8; KEY_LEN]) {
    let secret = X25519SecretKey::generate();
    let public = secret.public_key();
    (secret, public)
}

/// RFC 7748 Diffie-Hellman. The output is a fresh zeroizing buffer.
///
/// # Errors
///
/// Returns [`CryptoError`] if the peer key is a low-order point (the
/// shared secret would be non-contributory).
pub fn x25519_shared(
    secret: &X25519SecretKey,
    peer_public: &[u8; KEY_LEN],
) -> Result<SecretBytes, CryptoError> {
    let shared = secret.0.diffie_hellman(&X25519PublicKey::from(*peer_public));
    if !shared.was_contributory() {
        return Err(CryptoError);
    }
    Ok(SecretBytes::from_slice(shared.as_bytes()))
}

// ── Ed25519 ──────────────────────────────────────────────────────────

/// An Ed25519 signing keypair (RFC 8032, deterministic signatures).
pub struct Ed25519KeyPair {
    signing: SigningKey,
}

impl Ed25519KeyPair {
    /// Generate a fresh keypair from the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstruct a keypair from its 32-byte seed.
    #[must_use]
    pub fn from_seed(seed: &[u8; KEY_LEN]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// The 32-byte public half.
    #[must_use]
    pub fn public_key(&self) -> [u8; KEY_LEN] {
        self.signing.verifying_key().to_bytes()
    }

    /// Sign a message. Deterministic: same key and message, same bytes.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing.sign(message).to_bytes()
    }
}

impl fmt::Debug for Ed25519KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519KeyPair")
            .field("public", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

/// Verify an Ed25519 signature. A malformed public key or signature
/// encoding verifies false, the same as a wrong signature.
#[must_use]
pub fn ed25519_verify(public: &[u8; KEY_LEN], message: &[u8], signature: &[u8]) -> bool {
    let Ok(verifying) = VerifyingKey::from_bytes(public) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    verifying.verify(message, &sig).is_ok()
}

// ── AES-256-GCM ──────────────────────────────────────────────────────

/// Encrypt with AES-256-GCM. Returns `(ciphertext, iv, tag)` with the
/// tag detached. When `iv` is `None` a fresh one is drawn from the CSPRNG.
///
/// # Errors
///
/// Returns [`CryptoError`] if the AEAD operation fails.
pub fn aesgcm_encrypt(
    key: &[u8; KEY_LEN],
    plaintext: &[u8],
    aad: &[u8],
    iv: Option<[u8; AES_IV_LEN]>,
) -> Result<(Vec<u8>, [u8; AES_IV_LEN], [u8; AES_TAG_LEN]), CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let iv = iv.unwrap_or_else(|| {
        let mut fresh = [0u8; AES_IV_LEN];
        OsRng.fill_bytes(&mut fresh);
        fresh
    });

    let mut combined = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError)?;

    // aes-gcm appends the tag; detach it for the wire contract.
    let tag_start = combined.len().checked_sub(AES_TAG_LEN).ok_or(CryptoError)?;
    let tag: [u8; AES_TAG_LEN] = combined[tag_start..].try_into().map_err(|_| CryptoError)?;
    combined.truncate(tag_start);

    Ok((combined, iv, tag))
}

/// Decrypt AES-256-GCM output. Fails atomically on any tampering of the
/// key, ciphertext, IV, AAD, or tag; no partial plaintext is released.
///
/// # Errors
///
/// Returns [`CryptoError`] on authentication failure.
pub fn aesgcm_decrypt(
    key: &[u8; KEY_LEN],
    ciphertext: &[u8],
    iv: &[u8; AES_IV_LEN],
    aad: &[u8],
    tag: &[u8; AES_TAG_LEN],
) -> Result<SecretBytes, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut combined = Vec::with_capacity(ciphertext.len() + AES_TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: &combined,
                aad,
            },
        )
        .map_err(|_| CryptoError)?;

    Ok(SecretBytes::new(plaintext))
}

// ── Hashing & derivation ─────────────────────────────────────────────

/// HKDF-SHA256 extract-and-expand.
///
/// # Errors
///
/// Returns [`CryptoError`] if `out_len` exceeds the HKDF expansion bound.
pub fn hkdf_sha256(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    out_len: usize,
) -> Result<SecretBytes, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; out_len];
    hk.expand(info, &mut okm).map_err(|_| {
        okm.zeroize();
        CryptoError
    })?;
    Ok(SecretBytes::new(okm))
}

/// HMAC-SHA256. Accepts any key length per RFC 2104.
#[must_use]
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; KEY_LEN] {
    // new_from_slice never fails for HMAC.
    #[allow(clippy::unwrap_used)]
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).unwrap();
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// SHA-256 digest.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; KEY_LEN] {
    Sha256::digest(data).into()
}

/// Draw `n` bytes from the OS CSPRNG.
#[must_use]
pub fn csprng(n: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; n];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

// ── Comparison & erasure ─────────────────────────────────────────────

/// Constant-time equality. Length mismatch returns false immediately;
/// length is not treated as secret.
#[must_use]
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Overwrite a mutable buffer with zeros.
pub fn zeroize(buf: &mut [u8]) {
    buf.zeroize();
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ── X25519 ───────────────────────────────────────────────────────

    #[test]
    fn x25519_both_sides_agree() {
        let (a_priv, a_pub) = x25519_keygen();
        let (b_priv, b_pub) = x25519_keygen();
        let ab = x25519_shared(&a_priv, &b_pub).unwrap();
        let ba = x25519_shared(&b_priv, &a_pub).unwrap();
        assert_eq!(ab.as_slice(), ba.as_slice());
    }

    #[test]
    fn x25519_rejects_low_order_point() {
        let (secret, _) = x25519_keygen();
        // The all-zero point is low-order; the DH output is non-contributory.
        let result = x25519_shared(&secret, &[0u8; 32]);
        assert_eq!(result.unwrap_err(), CryptoError);
    }

    #[test]
    fn x25519_key_roundtrips_through_bytes() {
        let (secret, public) = x25519_keygen();
        let restored = X25519SecretKey::from_bytes(secret.to_bytes());
        assert_eq!(restored.public_key(), public);
    }

    // ── Ed25519 ──────────────────────────────────────────────────────

    #[test]
    fn ed25519_sign_verify_roundtrip() {
        let key = Ed25519KeyPair::generate();
        let sig = key.sign(b"retrieval request");
        assert!(ed25519_verify(&key.public_key(), b"retrieval request", &sig));
        assert!(!ed25519_verify(&key.public_key(), b"other message", &sig));
    }

    #[test]
    fn ed25519_signatures_are_deterministic() {
        let key = Ed25519KeyPair::from_seed(&[5u8; 32]);
        assert_eq!(key.sign(b"msg"), key.sign(b"msg"));
    }

    #[test]
    fn ed25519_verify_rejects_malformed_inputs() {
        let key = Ed25519KeyPair::generate();
        let sig = key.sign(b"msg");
        // Truncated signature.
        assert!(!ed25519_verify(&key.public_key(), b"msg", &sig[..63]));
        // Non-canonical public key bytes.
        assert!(!ed25519_verify(&[0xFF; 32], b"msg", &sig));
    }

    #[test]
    fn ed25519_wrong_key_fails() {
        let key = Ed25519KeyPair::generate();
        let other = Ed25519KeyPair::generate();
        let sig = key.sign(b"msg");
        assert!(!ed25519_verify(&other.public_key(), b"msg", &sig));
    }

    // ── AES-256-GCM ──────────────────────────────────────────────────

    #[test]
    fn aesgcm_roundtrip() {
        let key = [7u8; 32];
        let (ct, iv, tag) = aesgcm_encrypt(&key, b"plaintext", b"aad", None).unwrap();
        let pt = aesgcm_decrypt(&key, &ct, &iv, b"aad", &tag).unwrap();
        assert_eq!(pt.as_slice(), b"plaintext");
    }

    #[test]
    fn aesgcm_empty_plaintext_and_aad() {
        let key = [7u8; 32];
        let (ct, iv, tag) = aesgcm_encrypt(&key, b"", b"", None).unwrap();
        assert!(ct.is_empty());
        let pt = aesgcm_decrypt(&key, &ct, &iv, b"", &tag).unwrap();
        assert!(pt.is_empty());
    }

    #[test]
    fn aesgcm_explicit_iv_is_honored() {
        let key = [7u8; 32];
        let iv = [9u8; 12];
        let (ct1, iv1, tag1) = aesgcm_encrypt(&key, b"data", b"", Some(iv)).unwrap();
        let (ct2, iv2, tag2) = aesgcm_encrypt(&key, b"data", b"", Some(iv)).unwrap();
        assert_eq!(iv1, iv);
        assert_eq!(iv2, iv);
        assert_eq!(ct1, ct2);
        assert_eq!(tag1, tag2);
    }

    #[test]
    fn aesgcm_fresh_ivs_differ() {
        let key = [7u8; 32];
        let (_, iv1, _) = aesgcm_encrypt(&key, b"data", b"", None).unwrap();
        let (_, iv2, _) = aesgcm_encrypt(&key, b"data", b"", None).unwrap();
        assert_ne!(iv1, iv2);
    }

    #[test]
    fn aesgcm_rejects_any_single_tamper() {
        let key = [7u8; 32];
        let (ct, iv, tag) = aesgcm_encrypt(&key, b"payload", b"aad", None).unwrap();

        let mut bad_key = key;
        bad_key[0] ^= 1;
        assert!(aesgcm_decrypt(&bad_key, &ct, &iv, b"aad", &tag).is_err());

        let mut bad_ct = ct.clone();
        bad_ct[0] ^= 1;
        assert!(aesgcm_decrypt(&key, &bad_ct, &iv, b"aad", &tag).is_err());

        let mut bad_iv = iv;
        bad_iv[0] ^= 1;
        assert!(aesgcm_decrypt(&key, &ct, &bad_iv, b"aad", &tag).is_err());

        assert!(aesgcm_decrypt(&key, &ct, &iv, b"tampered", &tag).is_err());

        let mut bad_tag = tag;
        bad_tag[0] ^= 1;
        assert!(aesgcm_decrypt(&key, &ct, &iv, b"aad", &bad_tag).is_err());
    }

    // ── Hashing & derivation ─────────────────────────────────────────

    #[test]
    fn hkdf_is_deterministic_and_input_sensitive() {
        let k1 = hkdf_sha256(b"ikm", b"salt", b"info", 32).unwrap();
        let k2 = hkdf_sha256(b"ikm", b"salt", b"info", 32).unwrap();
        assert_eq!(k1.as_slice(), k2.as_slice());

        let k3 = hkdf_sha256(b"ikm", b"salt", b"infX", 32).unwrap();
        assert_ne!(k1.as_slice(), k3.as_slice());
        let k4 = hkdf_sha256(b"ikm", b"salX", b"info", 32).unwrap();
        assert_ne!(k1.as_slice(), k4.as_slice());
        let k5 = hkdf_sha256(b"ikX", b"salt", b"info", 32).unwrap();
        assert_ne!(k1.as_slice(), k5.as_slice());
    }

    #[test]
    fn hkdf_rejects_oversized_output() {
        // HKDF-SHA256 caps output at 255 * 32 bytes.
        assert!(hkdf_sha256(b"ikm", b"salt", b"info", 256 * 32).is_err());
    }

    #[test]
    fn sha256_known_answer() {
        let digest = sha256(b"abc");
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hmac_is_key_sensitive() {
        let a = hmac_sha256(b"key-a", b"msg");
        let b = hmac_sha256(b"key-b", b"msg");
        assert_ne!(a, b);
        assert_eq!(a, hmac_sha256(b"key-a", b"msg"));
    }

    #[test]
    fn csprng_outputs_differ() {
        assert_ne!(csprng(32), csprng(32));
        assert_eq!(csprng(7).len(), 7);
    }

    // ── Comparison & erasure ─────────────────────────────────────────

    #[test]
    fn ct_eq_semantics() {
        assert!(ct_eq(b"same", b"same"));
        assert!(!ct_eq(b"same", b"diff"));
        assert!(!ct_eq(b"short", b"longer"));
        assert!(ct_eq(b"", b""));
    }

    #[test]
    fn zeroize_clears_buffer() {
        let mut buf = [0xAAu8; 16];
        zeroize(&mut buf);
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn secret_bytes_debug_is_redacted() {
        let secret = SecretBytes::from_slice(&[1, 2, 3]);
        let debug = format!("{secret:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("1, 2, 3"));
    }

    #[test]
    fn secret_bytes_as_key_requires_32_bytes() {
        assert!(SecretBytes::from_slice(&[0u8; 32]).as_key().is_ok());
        assert!(SecretBytes::from_slice(&[0u8; 31]).as_key().is_err());
    }
}
