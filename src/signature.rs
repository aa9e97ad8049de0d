//! GitHub style `X-Hub-Signature-256` verification

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Computes `sha256=<hex>` for the given secret and payload.
pub fn sign(secret: &str, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    let digest = mac.finalize().into_bytes();
    Some(format!("{}{}", SIGNATURE_PREFIX, hex::encode(digest)))
}

/// Verifies the signature header against an HMAC-SHA256 of the raw payload.
///
/// Fails closed: a missing header, an empty secret, a header without the
/// `sha256=` prefix or any HMAC failure all yield `false`. The comparison is
/// constant time over the full header value.
pub fn verify_github_signature(secret: &str, payload: &[u8], signature_header: Option<&str>) -> bool {
    let Some(signature_header) = signature_header else {
        debug!("No signature header supplied");
        return false;
    };
    if secret.is_empty() {
        return false;
    }
    // Expected format: "sha256=..."
    if !signature_header.starts_with(SIGNATURE_PREFIX) {
        debug!("Signature header has no '{}' prefix", SIGNATURE_PREFIX);
        return false;
    }

    let Some(expected) = sign(secret, payload) else {
        return false;
    };

    expected
        .as_bytes()
        .ct_eq(signature_header.as_bytes())
        .into()
}
