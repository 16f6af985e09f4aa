//! Staff password hashing (bcrypt).

use thiserror::Error;

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    TooShort,

    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

/// Hash `plain` with the given bcrypt cost (4..=31; 10 in production).
pub fn hash_password(plain: &str, cost: u32) -> Result<String, PasswordError> {
    if plain.chars().count() < MIN_PASSWORD_LEN {
        return Err(PasswordError::TooShort);
    }
    Ok(bcrypt::hash(plain, cost)?)
}

/// `Ok(false)` for a wrong password; `Err` only when `hash` is not a bcrypt hash.
pub fn verify_password(plain: &str, hash: &str) -> Result<bool, PasswordError> {
    Ok(bcrypt::verify(plain, hash)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("correct horse", 4).unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong horse", &hash).unwrap());
    }

    #[test]
    fn short_passwords_are_refused() {
        assert!(matches!(hash_password("short", 4), Err(PasswordError::TooShort)));
    }

    #[test]
    fn garbage_hash_is_an_error() {
        assert!(verify_password("whatever1", "not-a-hash").is_err());
    }
}
