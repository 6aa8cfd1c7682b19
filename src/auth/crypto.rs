use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use tracing::error;

use crate::error::{AuthError, AuthResult};

type HmacSha256 = Hmac<Sha256>;

/// One-way digest of a token secret. Lookups compare digests; the raw
/// secret is never stored.
pub fn hash_token(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cryptographically secure random token material, hex-encoded.
pub fn random_secret(n_bytes: usize) -> AuthResult<String> {
    let mut buf = vec![0u8; n_bytes];
    OsRng.try_fill_bytes(&mut buf).map_err(|e| {
        error!(error = %e, "OS RNG unavailable");
        AuthError::Crypto(e.to_string())
    })?;
    Ok(hex::encode(buf))
}

pub fn sign_hmac(data: &[u8], key: &[u8]) -> AuthResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| AuthError::Crypto(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Constant-time HMAC verification; `verify_slice` does the comparison
/// without early exit.
pub fn verify_hmac(data: &[u8], key: &[u8], signature: &[u8]) -> AuthResult<bool> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| AuthError::Crypto(e.to_string()))?;
    mac.update(data);
    Ok(mac.verify_slice(signature).is_ok())
}

/// Tamper-evident wrapper for the OAuth state parameter:
/// `hex(payload).hex(hmac)`.
pub fn seal_state(payload: &str, key: &[u8]) -> AuthResult<String> {
    let sig = sign_hmac(payload.as_bytes(), key)?;
    Ok(format!(
        "{}.{}",
        hex::encode(payload.as_bytes()),
        hex::encode(sig)
    ))
}

/// Unwraps a sealed state value. Anything malformed or with a bad signature
/// comes back as `None`; only key trouble is an error.
pub fn open_state(sealed: &str, key: &[u8]) -> AuthResult<Option<String>> {
    let Some((payload_hex, sig_hex)) = sealed.split_once('.') else {
        return Ok(None);
    };
    let (Ok(payload), Ok(sig)) = (hex::decode(payload_hex), hex::decode(sig_hex)) else {
        return Ok(None);
    };
    if !verify_hmac(&payload, key, &sig)? {
        return Ok(None);
    }
    Ok(String::from_utf8(payload).ok())
}
