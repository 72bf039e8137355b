//! Password verifier creation and checking using argon2id.
//!
//! The hub stores only the PHC-format verifier string; plaintext passwords
//! never leave the registration/login handlers.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::error::HubError;

/// Derive a verifier for a new password using argon2id with a random salt.
pub fn create_verifier(password: &str) -> Result<String, HubError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| HubError::internal(format!("password hashing failed: {e}")))?;
    Ok(hash.to_string())
}

/// Check a password against a stored verifier.
///
/// A malformed stored verifier is an internal error, not a wrong password.
pub fn verify_password(password: &str, verifier: &str) -> Result<bool, HubError> {
    let parsed = PasswordHash::new(verifier)
        .map_err(|e| HubError::internal(format!("stored verifier is malformed: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let verifier = create_verifier("mysecret").unwrap();
        assert!(verify_password("mysecret", &verifier).unwrap());
        assert!(!verify_password("wrongpassword", &verifier).unwrap());
    }

    #[test]
    fn different_passwords_different_verifiers() {
        let v1 = create_verifier("password1").unwrap();
        let v2 = create_verifier("password2").unwrap();
        assert_ne!(v1, v2);
    }

    #[test]
    fn malformed_verifier_is_an_error() {
        assert!(verify_password("whatever", "not-a-phc-string").is_err());
    }
}
