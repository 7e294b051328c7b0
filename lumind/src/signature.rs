//! Webhook signature verification.
//!
//! GitHub signs each delivery with `X-Hub-Signature-256: sha256=<hex>`, an
//! HMAC-SHA256 of the raw request body keyed by the App's webhook secret.
//! The check must run over the bytes exactly as received, before any JSON
//! parsing, because re-serialising a payload does not reproduce it.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Prefix GitHub puts in front of the hex digest.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Compute the header value GitHub would send for `payload`.
pub fn sign(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    };
    mac.update(payload);
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

/// Check a delivery signature.
///
/// Returns false, never panics, when the secret or header is missing or empty
/// or when the header length differs from the expected one. The byte
/// comparison itself is constant time.
pub fn verify(secret: Option<&str>, payload: &[u8], signature: Option<&str>) -> bool {
    let (Some(secret), Some(signature)) = (secret, signature) else {
        return false;
    };
    if secret.is_empty() || signature.is_empty() {
        return false;
    }

    let expected = sign(secret.as_bytes(), payload);
    if expected.len() != signature.len() {
        return false;
    }
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

/// Verifier bound to a configured webhook secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<String>,
}

impl SignatureVerifier {
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    pub fn verify(&self, payload: &[u8], signature: Option<&str>) -> bool {
        verify(self.secret.as_deref(), payload, signature)
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .finish()
    }
}
