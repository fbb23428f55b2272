use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2,
};

use crate::error::{AppError, FieldError};

const SPECIAL_CHARACTERS: &str = "@$!%*?&";

/// Argon2id hashing with a random salt per password.
#[derive(Debug, Clone, Default)]
pub struct PasswordHasher;

impl PasswordHasher {
    pub fn new() -> Self {
        Self
    }

    pub fn hash(&self, password: &str) -> Result<String, AppError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| AppError::Internal(format!("password hashing failed: {err}")))
    }

    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, AppError> {
        let parsed = PasswordHash::new(hash)
            .map_err(|err| AppError::Internal(format!("invalid password hash: {err}")))?;

        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(err) => Err(AppError::Internal(format!(
                "password verification failed: {err}"
            ))),
        }
    }
}

/// At least 8 characters with a lowercase letter, an uppercase letter, a
/// digit and one of `@$!%*?&`.
pub fn check_password_policy(password: &str) -> Result<(), FieldError> {
    let long_enough = password.chars().count() >= 8;
    let lower = password.chars().any(|c| c.is_ascii_lowercase());
    let upper = password.chars().any(|c| c.is_ascii_uppercase());
    let digit = password.chars().any(|c| c.is_ascii_digit());
    let special = password.chars().any(|c| SPECIAL_CHARACTERS.contains(c));

    if !long_enough {
        return Err(FieldError::new(
            "password",
            "Password must be at least 8 characters long",
        ));
    }
    if !(lower && upper && digit && special) {
        return Err(FieldError::new(
            "password",
            "Password must contain at least one uppercase letter, one lowercase letter, one number, and one special character",
        ));
    }
    Ok(())
}
