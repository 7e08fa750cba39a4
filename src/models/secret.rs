//! Random secrets, password hashing and token digests.
//!
//! Passwords and OAuth2 client secrets are stored as argon2 PHC strings.
//! Access tokens are looked up on every request, so they use a salted
//! HMAC-SHA256 digest instead of a slow KDF.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::Rng;
use rand::distr::Alphanumeric;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("hashing failed: {0}")]
    Hash(String),
}

#[must_use]
pub fn random_bytes<const N: usize>() -> [u8; N] {
    rand::rng().random()
}

/// Lowercase hex of `N` random bytes.
#[must_use]
pub fn random_hex<const N: usize>() -> String {
    hex::encode(random_bytes::<N>())
}

#[must_use]
pub fn random_alphanumeric(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// RFC 4648 base32 with a lowercase alphabet and no padding.
#[must_use]
pub fn base32_lower(bytes: &[u8]) -> String {
    BASE32_NOPAD.encode(bytes).to_ascii_lowercase()
}

/// Hash `secret` into an argon2 PHC string salted with `salt` (at most 48 bytes).
///
/// # Errors
///
/// Returns `SecretError::Hash` if the salt is unusable or hashing fails.
pub fn hash_password_with_salt(secret: &str, salt: &[u8]) -> Result<String, SecretError> {
    let salt = SaltString::encode_b64(salt).map_err(|e| SecretError::Hash(e.to_string()))?;
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| SecretError::Hash(e.to_string()))
}

/// Hash `secret` with a fresh random salt.
///
/// # Errors
///
/// Returns `SecretError::Hash` if hashing fails.
pub fn hash_password(secret: &str) -> Result<String, SecretError> {
    hash_password_with_salt(secret, &random_bytes::<16>())
}

/// Check `secret` against a PHC string. Malformed hashes never verify.
#[must_use]
pub fn verify_password(secret: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default().verify_password(secret.as_bytes(), &parsed).is_ok()
}

/// Hex HMAC-SHA256 of `token` keyed by `salt`.
///
/// # Errors
///
/// Returns `SecretError::Hash` if the MAC cannot be keyed.
pub fn hash_token(token: &str, salt: &str) -> Result<String, SecretError> {
    let mut mac = HmacSha256::new_from_slice(salt.as_bytes()).map_err(|e| SecretError::Hash(e.to_string()))?;
    mac.update(token.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
#[path = "secret_test.rs"]
mod tests;
