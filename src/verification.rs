use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

fn keyed_mac(
    secret: &[u8],
    message_id: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<HmacSha256, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(message_id.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body);
    Ok(mac)
}

/// Compute the raw HMAC-SHA256 digest of an EventSub delivery.
///
/// The signed message is the byte concatenation of message id, timestamp
/// and the unmodified request body.
///
/// Errors only if the key is rejected, which HMAC never does.
pub fn compute_signature(
    secret: &str,
    message_id: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<Vec<u8>, InvalidLength> {
    let mac = keyed_mac(secret.as_bytes(), message_id, timestamp, body)?;
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Format a digest as a signature header value: "sha256=<hex>".
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("{SIGNATURE_PREFIX}{}", hex::encode(signature))
}

/// Verify an EventSub signature header against the raw delivery.
/// Expects header value like "sha256=<hex>".
///
/// `body` must be the exact bytes received on the wire; re-serialised JSON
/// will not verify.
pub fn verify_eventsub_signature(
    message_id: &str,
    timestamp: &str,
    body: &[u8],
    secret: &str,
    signature_header: &str,
) -> bool {
    let provided = match signature_header
        .strip_prefix(SIGNATURE_PREFIX)
        .and_then(|h| hex::decode(h).ok())
    {
        Some(bytes) => bytes,
        None => return false,
    };

    let mac = match keyed_mac(secret.as_bytes(), message_id, timestamp, body) {
        Ok(m) => m,
        Err(_) => return false,
    };

    // verify_slice compares in constant time
    mac.verify_slice(&provided).is_ok()
}
