//! HMAC-SHA256 webhook signature verification.
//!
//! The platform signs the exact raw request body with the shared webhook
//! secret and sends the hex digest either in the dedicated signature header
//! (optionally prefixed with `sha256=`) or, on some deliveries, as a bearer
//! value in the `Authorization` header.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Length in bytes of a SHA-256 digest.
const DIGEST_LEN: usize = 32;

/// Verifies that a webhook body was signed with the shared secret.
pub trait SignatureVerifier: Send + Sync {
    /// Returns `true` only when `signature` is a valid HMAC-SHA256 of `payload`.
    ///
    /// Never panics and never errors: any missing or malformed input is a
    /// verification failure.
    fn verify(&self, payload: &[u8], signature: Option<&str>) -> bool;
}

/// [`SignatureVerifier`] keyed by a literal shared secret from configuration.
pub struct HmacSignatureVerifier {
    secret: Zeroizing<String>,
}

impl HmacSignatureVerifier {
    /// Construct a verifier for the given shared secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
        }
    }
}

impl std::fmt::Debug for HmacSignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSignatureVerifier")
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

impl SignatureVerifier for HmacSignatureVerifier {
    #[instrument(skip(self, payload, signature), fields(body_len = payload.len()))]
    fn verify(&self, payload: &[u8], signature: Option<&str>) -> bool {
        let Some(signature) = signature else {
            warn!("Webhook signature missing");
            return false;
        };

        let valid = verify_signature(payload, signature, &self.secret);
        if !valid {
            warn!("Webhook signature rejected");
        }
        valid
    }
}

/// Verify `signature` against the HMAC-SHA256 of the raw `payload` bytes.
///
/// The signature may carry a `sha256=` prefix. A non-hex value or a digest of
/// the wrong length fails immediately; otherwise the comparison runs in
/// constant time.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    if payload.is_empty() || secret.is_empty() {
        return false;
    }

    let hex_part = strip_scheme(signature.trim());
    if hex_part.is_empty() {
        return false;
    }

    let provided = match hex::decode(hex_part) {
        Ok(bytes) => bytes,
        Err(_) => {
            debug!("Signature is not valid hex");
            return false;
        }
    };

    if provided.len() != DIGEST_LEN {
        debug!(len = provided.len(), "Signature has unexpected length");
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    expected.as_slice().ct_eq(provided.as_slice()).into()
}

/// Pick the signature out of the request headers.
///
/// The dedicated signature header wins. The `Authorization` header is only
/// consulted when `allow_authorization` is set, and its value is only
/// accepted when it has the shape of a hex SHA-256 digest, so unrelated
/// bearer credentials are never treated as signatures.
pub fn extract_signature(
    signature_header: Option<&str>,
    authorization: Option<&str>,
    allow_authorization: bool,
) -> Option<String> {
    if let Some(value) = signature_header {
        let value = strip_scheme(strip_bearer(value.trim()));
        return (!value.is_empty()).then(|| value.to_string());
    }

    if !allow_authorization {
        return None;
    }

    let value = strip_scheme(strip_bearer(authorization?.trim()));
    is_hex_sha256(value).then(|| value.to_string())
}

/// Returns `true` for exactly 64 hexadecimal characters.
pub fn is_hex_sha256(value: &str) -> bool {
    value.len() == DIGEST_LEN * 2 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

fn strip_bearer(value: &str) -> &str {
    match value.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => value[7..].trim(),
        _ => value,
    }
}

fn strip_scheme(value: &str) -> &str {
    match value.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("sha256=") => value[7..].trim(),
        _ => value,
    }
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
