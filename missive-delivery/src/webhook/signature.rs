//! `X-Missive-Signature: sha256=<hex>` over the raw request body

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::WebhookError;

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

/// The header value a provider holding `secret` would send for `body`
#[must_use]
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return String::new();
    };
    mac.update(body);
    format!("{PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of `header` against `body`
///
/// # Errors
/// `InvalidSignature` if the header is malformed or does not match.
pub fn verify(secret: &[u8], body: &[u8], header: &str) -> Result<(), WebhookError> {
    let digest = header
        .trim()
        .strip_prefix(PREFIX)
        .and_then(|hex_digest| hex::decode(hex_digest).ok())
        .ok_or(WebhookError::InvalidSignature)?;

    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&digest)
        .map_err(|_| WebhookError::InvalidSignature)
}
