//! Credential primitives
//!
//! Argon2id password hashing plus the OS-random secrets the services hand
//! out (session tokens, verification codes, unusable passwords).

use anyhow::{Context, Result};
use argon2::{
    password_hash::{
        rand_core::{OsRng, RngCore},
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Argon2,
};
use data_encoding::HEXLOWER;
use std::sync::OnceLock;

/// Bytes of entropy in a session token
pub const TOKEN_BYTES: usize = 32;

/// Hash a password using Argon2id with secure defaults.
///
/// Returns a PHC string (algorithm, parameters, salt and hash).
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
        .context("Password hashing failed")?;

    Ok(password_hash.to_string())
}

/// Verify a password against a stored hash.
///
/// Errors only when the stored hash is malformed.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))
        .context("Failed to parse password hash")?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("Password verification failed: {}", e))
            .context("Password verification error"),
    }
}

/// Burn the same argon2 work as a real verification.
///
/// Used when the username does not exist so failed logins take the same
/// time either way.
pub fn verify_against_dummy(password: &str) {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    let dummy = DUMMY.get_or_init(|| hash_password("tiergate-dummy-password").ok());
    if let Some(hash) = dummy {
        let _ = verify_password(password, hash);
    }
}

/// Lowercase hex of `bytes` bytes from the OS RNG
pub fn random_hex(bytes: usize) -> Result<String> {
    let mut buf = vec![0u8; bytes];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| anyhow::anyhow!("OS randomness unavailable: {}", e))?;
    Ok(HEXLOWER.encode(&buf))
}

/// Opaque session token
pub fn generate_session_token() -> Result<String> {
    random_hex(TOKEN_BYTES)
}

/// Six-digit email verification code
pub fn generate_verification_code() -> Result<String> {
    let mut buf = [0u8; 4];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| anyhow::anyhow!("OS randomness unavailable: {}", e))?;
    Ok(format!("{:06}", u32::from_le_bytes(buf) % 1_000_000))
}

/// Hash of a random secret nobody knows, for accounts that only sign in
/// through the legacy provider
pub fn unusable_password_hash() -> Result<String> {
    hash_password(&random_hex(TOKEN_BYTES)?)
}
