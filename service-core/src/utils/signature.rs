use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex-encoded HMAC-SHA256 of a webhook body.
///
/// Format: HMAC-SHA256(body, secret)
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    mac.update(body);

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a webhook body against the signature a collaborator sent with it.
///
/// Comparison is constant-time; a `sha256=` prefix on the header value is accepted.
pub fn verify_payload(secret: &str, body: &[u8], signature: &str) -> Result<bool, anyhow::Error> {
    let expected = sign_payload(secret, body)?;
    let provided = signature.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);

    let expected_bytes = expected.as_bytes();
    let provided_bytes = provided.as_bytes();

    if expected_bytes.len() != provided_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(provided_bytes).into())
}
