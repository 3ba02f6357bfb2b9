//! CEX.IO request signing.
//!
//! The WebSocket auth handshake signs the concatenation of the request
//! timestamp (Unix seconds, as sent in the frame) and the API key with
//! HMAC-SHA256 keyed by the API secret. The digest is sent hex-encoded.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute an HMAC-SHA256 signature and return it as a lowercase hex string.
///
/// # Arguments
///
/// * `secret`: the API secret key (UTF-8 string).
/// * `message`: the data to sign.
pub fn hmac_sha256_sign(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Signature for the WebSocket auth handshake:
/// `hex(HMAC-SHA256(secret, timestamp ‖ api_key))`.
///
/// `timestamp` is rendered as JSON number text, the same text it has in the
/// auth frame, so the server recomputes the same message. Whole seconds keep
/// their fraction (`1700000000.0`).
///
/// # Example
///
/// ```ignore
/// let sig = ws_auth_signature("my_key", "my_secret", 1_700_000_000.25);
/// assert_eq!(sig, hmac_sha256_sign("my_secret", "1700000000.25my_key"));
/// ```
pub fn ws_auth_signature(api_key: &str, secret: &str, timestamp: f64) -> String {
    hmac_sha256_sign(secret, &format!("{}{api_key}", timestamp_text(timestamp)))
}

/// JSON text of `timestamp`, as serde_json writes it into a frame.
fn timestamp_text(timestamp: f64) -> String {
    serde_json::Value::from(timestamp).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sha256_rfc4231_vector() {
        // RFC 4231 test case 2.
        let sig = hmac_sha256_sign("Jefe", "what do ya want for nothing?");
        assert_eq!(sig, "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843");
    }

    #[test]
    fn auth_signature_covers_timestamp_then_key() {
        let sig = ws_auth_signature("K", "S", 1_700_000_000.5);
        assert_eq!(sig, hmac_sha256_sign("S", "1700000000.5K"));
        assert_eq!(sig.len(), 64);
        assert_ne!(sig, ws_auth_signature("K", "S", 1_700_000_001.5));
    }

    #[test]
    fn whole_second_timestamp_keeps_fraction() {
        assert_eq!(timestamp_text(1_700_000_000.0), "1700000000.0");
        assert_eq!(
            ws_auth_signature("K", "S", 1_700_000_000.0),
            hmac_sha256_sign("S", "1700000000.0K")
        );
    }
}
