//! Argon2id password hashing.
//!
//! Both operations are CPU bound and run on tokio's blocking pool so a slow hash
//! never stalls the request executor.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::auth::AuthError;

/// Hashes `password` with a fresh random salt and returns the PHC string.
pub async fn hash_password(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Hashing(format!("password hashing failed: {}", e)))
    })
    .await
    .map_err(|e| AuthError::Hashing(format!("hashing task failed: {}", e)))?
}

/// Checks `password` against a stored PHC hash in constant time.
///
/// A mismatch is `Ok(false)`; only a malformed hash or a runtime failure is an error.
pub async fn verify_password(password: String, password_hash: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&password_hash)
            .map_err(|e| AuthError::Hashing(format!("invalid password hash format: {}", e)))?;

        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::Hashing(format!(
                "password verification failed: {}",
                e
            ))),
        }
    })
    .await
    .map_err(|e| AuthError::Hashing(format!("verification task failed: {}", e)))?
}
