//! Request signatures and approval challenges.
//!
//! The request payload is a rigid canonical byte sequence:
//!
//! ```text
//! TIMESTAMP_ASCII ":" METHOD ":" PATH ":" hex_lower(sha256(BODY))
//! ```
//!
//! where the timestamp is unsigned decimal milliseconds since the epoch,
//! the method is uppercase, and the path excludes the query string. Any
//! whitespace, case, or encoding deviation breaks verification, which is
//! the point: there is exactly one valid byte sequence per request.
//!
//! Approval challenges bind a phone's consent to a specific
//! `(secret, reason)` pair: `nonce32 || secret_id || sha256(reason)`.

use crate::primitives::{csprng, ed25519_verify, sha256, Ed25519KeyPair, KEY_LEN, SIGNATURE_LEN};

/// Default request-signature freshness window in milliseconds.
pub const SIGNATURE_MAX_AGE_MS: i64 = 60_000;

/// Length of the random prefix of an approval challenge.
pub const CHALLENGE_NONCE_LEN: usize = 32;

/// Build the canonical signature payload from its already-ASCII parts.
///
/// `timestamp` must be the literal decimal string as transmitted — the
/// payload is byte-exact, so the verifier must not re-format it.
#[must_use]
pub fn request_payload(timestamp: &str, method: &str, path: &str, body: &[u8]) -> Vec<u8> {
    let body_hash = hex::encode(sha256(body));
    let mut payload =
        Vec::with_capacity(timestamp.len() + method.len() + path.len() + body_hash.len() + 3);
    payload.extend_from_slice(timestamp.as_bytes());
    payload.push(b':');
    payload.extend_from_slice(method.as_bytes());
    payload.push(b':');
    payload.extend_from_slice(path.as_bytes());
    payload.push(b':');
    payload.extend_from_slice(body_hash.as_bytes());
    payload
}

/// Sign a request with the caller's Ed25519 key.
#[must_use]
pub fn sign_request(
    key: &Ed25519KeyPair,
    timestamp_ms: u64,
    method: &str,
    path: &str,
    body: &[u8],
) -> [u8; SIGNATURE_LEN] {
    let payload = request_payload(&timestamp_ms.to_string(), method, path, body);
    key.sign(&payload)
}

/// Verify a request signature.
///
/// Returns false — with no further detail — when the timestamp is not a
/// plain decimal integer, when the request is older (or newer) than
/// `max_age_ms`, or when the Ed25519 check fails. A request at exactly
/// `max_age_ms` of age still verifies.
#[must_use]
pub fn verify_request(
    public: &[u8; KEY_LEN],
    timestamp: &str,
    method: &str,
    path: &str,
    body: &[u8],
    signature: &[u8],
    now_ms: i64,
    max_age_ms: i64,
) -> bool {
    // Strict decimal: no sign, no whitespace, no leading '+'.
    if timestamp.is_empty() || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let Ok(ts) = timestamp.parse::<u64>() else {
        return false;
    };

    let age = i128::from(now_ms) - i128::from(ts);
    if age.unsigned_abs() > u128::try_from(max_age_ms).unwrap_or(0) {
        return false;
    }

    let payload = request_payload(timestamp, method, path, body);
    ed25519_verify(public, &payload, signature)
}

/// Build an approval challenge: `nonce32 || secret_id || sha256(reason)`.
///
/// An explicit nonce makes the output deterministic for tests; the
/// default draws from the CSPRNG, so two calls with the same inputs
/// yield distinct challenges.
#[must_use]
pub fn build_challenge(
    secret_id: &str,
    reason: &str,
    nonce: Option<[u8; CHALLENGE_NONCE_LEN]>,
) -> Vec<u8> {
    let nonce = nonce.unwrap_or_else(random_nonce);
    let reason_hash = sha256(reason.as_bytes());

    let mut challenge =
        Vec::with_capacity(CHALLENGE_NONCE_LEN + secret_id.len() + reason_hash.len());
    challenge.extend_from_slice(&nonce);
    challenge.extend_from_slice(secret_id.as_bytes());
    challenge.extend_from_slice(&reason_hash);
    challenge
}

fn random_nonce() -> [u8; CHALLENGE_NONCE_LEN] {
    let mut nonce = [0u8; CHALLENGE_NONCE_LEN];
    nonce.copy_from_slice(&csprng(CHALLENGE_NONCE_LEN));
    nonce
}

/// Sign an approval challenge with the phone's Ed25519 key.
#[must_use]
pub fn sign_challenge(key: &Ed25519KeyPair, challenge: &[u8]) -> [u8; SIGNATURE_LEN] {
    key.sign(challenge)
}

/// Verify a phone's approval signature over the exact challenge bytes.
#[must_use]
pub fn verify_challenge(public: &[u8; KEY_LEN], challenge: &[u8], signature: &[u8]) -> bool {
    ed25519_verify(public, challenge, signature)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const NOW_MS: i64 = 1_700_000_000_000;

    fn keypair() -> Ed25519KeyPair {
        Ed25519KeyPair::from_seed(&[11u8; 32])
    }

    // ── Payload canonicalization ─────────────────────────────────────

    #[test]
    fn payload_layout_is_exact() {
        let payload = request_payload("1700000000000", "POST", "/api/secrets/sec-1/retrieve", b"");
        let expected = format!(
            "1700000000000:POST:/api/secrets/sec-1/retrieve:{}",
            hex::encode(crate::primitives::sha256(b""))
        );
        assert_eq!(payload, expected.as_bytes());
    }

    #[test]
    fn payload_body_hash_is_lowercase_hex() {
        let payload = request_payload("0", "GET", "/", b"body");
        let text = String::from_utf8(payload).unwrap();
        let hash = text.rsplit(':').next().unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    // ── Verification ─────────────────────────────────────────────────

    #[test]
    fn signed_request_verifies_within_window() {
        let key = keypair();
        let ts = u64::try_from(NOW_MS).unwrap();
        let sig = sign_request(&key, ts, "POST", "/api/secrets", b"{}");
        assert!(verify_request(
            &key.public_key(),
            &ts.to_string(),
            "POST",
            "/api/secrets",
            b"{}",
            &sig,
            NOW_MS,
            SIGNATURE_MAX_AGE_MS,
        ));
    }

    #[test]
    fn empty_body_signature_verifies() {
        let key = keypair();
        let ts = u64::try_from(NOW_MS).unwrap();
        let sig = sign_request(&key, ts, "GET", "/api/secrets", b"");
        assert!(verify_request(
            &key.public_key(),
            &ts.to_string(),
            "GET",
            "/api/secrets",
            b"",
            &sig,
            NOW_MS,
            SIGNATURE_MAX_AGE_MS,
        ));
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let key = keypair();
        let ts = u64::try_from(NOW_MS).unwrap();
        let sig = sign_request(&key, ts, "GET", "/", b"");
        let public = key.public_key();
        let ts_str = ts.to_string();

        // Exactly 60 000 ms old: true.
        assert!(verify_request(
            &public,
            &ts_str,
            "GET",
            "/",
            b"",
            &sig,
            NOW_MS + 60_000,
            SIGNATURE_MAX_AGE_MS,
        ));
        // 60 001 ms old: false.
        assert!(!verify_request(
            &public,
            &ts_str,
            "GET",
            "/",
            b"",
            &sig,
            NOW_MS + 60_001,
            SIGNATURE_MAX_AGE_MS,
        ));
        // Timestamps from the future are held to the same window.
        assert!(!verify_request(
            &public,
            &ts_str,
            "GET",
            "/",
            b"",
            &sig,
            NOW_MS - 60_001,
            SIGNATURE_MAX_AGE_MS,
        ));
    }

    #[test]
    fn malformed_timestamps_verify_false() {
        let key = keypair();
        let sig = sign_request(&key, 0, "GET", "/", b"");
        let public = key.public_key();
        for ts in ["", "-5", "+5", " 5", "5 ", "5.0", "abc"] {
            assert!(
                !verify_request(&public, ts, "GET", "/", b"", &sig, NOW_MS, 60_000),
                "timestamp {ts:?} should not verify"
            );
        }
    }

    #[test]
    fn any_component_deviation_breaks_verification() {
        let key = keypair();
        let ts = u64::try_from(NOW_MS).unwrap();
        let sig = sign_request(&key, ts, "POST", "/api/secrets", b"{}");
        let public = key.public_key();
        let ts_str = ts.to_string();

        assert!(!verify_request(&public, &ts_str, "post", "/api/secrets", b"{}", &sig, NOW_MS, 60_000));
        assert!(!verify_request(&public, &ts_str, "POST", "/api/secret", b"{}", &sig, NOW_MS, 60_000));
        assert!(!verify_request(&public, &ts_str, "POST", "/api/secrets", b"{ }", &sig, NOW_MS, 60_000));
        let other_ts = (ts + 1).to_string();
        assert!(!verify_request(&public, &other_ts, "POST", "/api/secrets", b"{}", &sig, NOW_MS, 60_000));
    }

    // ── Challenges ───────────────────────────────────────────────────

    #[test]
    fn challenge_layout_with_explicit_nonce() {
        let nonce = [0xABu8; 32];
        let challenge = build_challenge("sec-1", "ci deploy", Some(nonce));
        assert_eq!(challenge.len(), 32 + "sec-1".len() + 32);
        assert_eq!(&challenge[..32], &nonce);
        assert_eq!(&challenge[32..37], b"sec-1");
        assert_eq!(
            &challenge[37..],
            crate::primitives::sha256(b"ci deploy").as_slice()
        );
    }

    #[test]
    fn identical_inputs_yield_distinct_challenges() {
        let c1 = build_challenge("sec-1", "ci deploy", None);
        let c2 = build_challenge("sec-1", "ci deploy", None);
        assert_ne!(c1, c2);
    }

    #[test]
    fn different_reasons_yield_different_challenges() {
        let nonce = [0u8; 32];
        let c1 = build_challenge("sec-1", "reason one", Some(nonce));
        let c2 = build_challenge("sec-1", "reason two", Some(nonce));
        assert_ne!(c1, c2);
    }

    #[test]
    fn challenge_signature_roundtrip() {
        let phone = keypair();
        let challenge = build_challenge("sec-1", "ci deploy", None);
        let sig = sign_challenge(&phone, &challenge);
        assert!(verify_challenge(&phone.public_key(), &challenge, &sig));

        let mut tampered = challenge;
        tampered[0] ^= 1;
        assert!(!verify_challenge(&phone.public_key(), &tampered, &sig));
    }
}
