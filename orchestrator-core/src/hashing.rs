//! Hashing and HMAC primitives shared by the API-key store, the
//! idempotency ledger, and the service-task callback signature scheme.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded SHA-256 digest of `data`, used for API-key storage and
/// for canonical-JSON request hashing.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hex-encoded HMAC-SHA256 of `body || timestamp` keyed by the
/// tenant's raw API key, used to sign and verify service-task
/// callback requests.
pub fn callback_signature(raw_api_key: &[u8], body: &[u8], timestamp: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(raw_api_key).expect("HMAC accepts keys of any length");
    mac.update(body);
    mac.update(timestamp.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of two hex-encoded signatures.
pub fn verify_callback_signature(
    raw_api_key: &[u8],
    body: &[u8],
    timestamp: &str,
    candidate: &str,
) -> bool {
    let expected = callback_signature(raw_api_key, body, timestamp);
    constant_time_eq(expected.as_bytes(), candidate.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn signature_round_trips() {
        let key = b"tenant-secret";
        let body = b"{\"a\":1}";
        let sig = callback_signature(key, body, "1700000000");
        assert!(verify_callback_signature(key, body, "1700000000", &sig));
    }

    #[test]
    fn signature_rejects_tampered_body() {
        let key = b"tenant-secret";
        let sig = callback_signature(key, b"{\"a\":1}", "1700000000");
        assert!(!verify_callback_signature(
            key,
            b"{\"a\":2}",
            "1700000000",
            &sig
        ));
    }

    #[test]
    fn signature_rejects_wrong_key() {
        let sig = callback_signature(b"key-a", b"body", "123");
        assert!(!verify_callback_signature(b"key-b", b"body", "123", &sig));
    }
}
