//! Password hashing (argon2id, PHC string format).

use std::sync::OnceLock;

use argon2::Argon2;
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("password hashing failed: {0}")]
pub struct PasswordError(String);

pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError(e.to_string()))
}

/// `false` for a wrong password and for an unparseable stored hash.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Like [`verify_password`], but with no stored hash it still runs one full
/// verification against a decoy, so unknown accounts cost as much as a wrong
/// password. Always `false` without a stored hash.
pub fn verify_stored(password: &str, stored: Option<&str>) -> bool {
    match stored {
        Some(hash) => verify_password(password, hash),
        None => {
            let _ = verify_password(password, decoy_hash());
            false
        }
    }
}

fn decoy_hash() -> &'static str {
    static DECOY: OnceLock<String> = OnceLock::new();
    DECOY.get_or_init(|| hash_password("decoy-password").unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("Super@2025").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("Super@2025", &hash));
        assert!(!verify_password("super@2025", &hash));
    }

    #[test]
    fn salts_differ() {
        assert_ne!(hash_password("same").unwrap(), hash_password("same").unwrap());
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn missing_account_still_pays_for_a_real_verification() {
        assert!(PasswordHash::new(decoy_hash()).is_ok());
        assert!(decoy_hash().starts_with("$argon2"));
        assert!(!verify_stored("decoy-password", None));
        assert!(!verify_stored("anything", None));
    }

    #[test]
    fn stored_hash_is_checked_normally() {
        let hash = hash_password("Super@2025").unwrap();
        assert!(verify_stored("Super@2025", Some(&hash)));
        assert!(!verify_stored("wrong", Some(&hash)));
    }
}
