//! HMAC-SHA256 request signing.
//!
//! The signature travels as the `HashSHA256` header, lowercase hex over
//! the plaintext payload bytes. Signing happens before encryption on
//! the agent; the server verifies after decryption.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use pulse_core::PulseError;

pub const SIGN_HEADER: &str = "HashSHA256";

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a hex signature over `payload`.
pub fn verify(secret: &str, payload: &[u8], signature_hex: &str) -> Result<(), PulseError> {
    let signature = hex::decode(signature_hex)
        .map_err(|e| PulseError::Decode(format!("signature hex: {}", e)))?;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    mac.verify_slice(&signature)
        .map_err(|_| PulseError::Auth("signature mismatch".to_string()))
}
