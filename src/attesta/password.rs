//! Password hashing boundary.
//!
//! The primitive is opaque to the rest of the service: one function turns a
//! password into a PHC string, one checks a password against a stored PHC
//! string. Argon2id with default parameters.

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use rand::rngs::OsRng;

/// Hash a password into a PHC string for storage.
///
/// # Errors
///
/// Propagates the hasher's error (effectively only on parameter or RNG
/// failure).
pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Check a password against a stored PHC string. Unparseable stored hashes
/// count as a mismatch.
#[must_use]
pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
