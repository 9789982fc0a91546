use std::borrow::ToOwned;
use std::time::Duration;

use argon2::{
    password_hash::{
        rand_core::OsRng, Error as PasswordHashError, PasswordHash, PasswordHasher,
        PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use thiserror::Error;
use tokio::task;

/// Minimum allowed length for usernames.
const USERNAME_MIN_LEN: usize = 3;
/// Maximum allowed length for usernames.
const USERNAME_MAX_LEN: usize = 64;
/// Minimum required length for passwords.
pub const PASSWORD_MIN_LEN: usize = 8;
/// Argon2 memory cost in kibibytes (~19 MB).
const ARGON2_MEMORY_COST: u32 = 19_456;
/// Argon2 time cost (iterations).
const ARGON2_TIME_COST: u32 = 2;
/// Argon2 parallelism (lanes).
const ARGON2_PARALLELISM: u32 = 1;
/// Length of the produced password hash output (bytes).
const ARGON2_OUTPUT_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid username")]
    InvalidUsername,
    #[error("Invalid password")]
    InvalidPassword,
    #[error("Authentication failed")]
    InvalidCredentials,
    #[error("Password hashing join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Password hashing error: {0:?}")]
    PasswordHash(PasswordHashError),
    #[error("Argon2 error: {0:?}")]
    Argon2(argon2::Error),
}

/// Combine the optional pepper with the provided password.
fn combine_password_and_pepper(password: &str, pepper: Option<&str>) -> String {
    match pepper {
        Some(pepper) => {
            let mut combined = String::with_capacity(pepper.len() + password.len());
            combined.push_str(pepper);
            combined.push_str(password);
            combined
        }
        None => password.to_owned(),
    }
}

fn configured_argon2() -> Result<Argon2<'static>, AuthError> {
    let params = Params::new(
        ARGON2_MEMORY_COST,
        ARGON2_TIME_COST,
        ARGON2_PARALLELISM,
        Some(ARGON2_OUTPUT_LENGTH),
    )
    .map_err(AuthError::Argon2)?;

    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password using Argon2id with a fresh random salt.
pub async fn hash_password(password: &str, pepper: Option<&str>) -> Result<String, AuthError> {
    let password = password.to_owned();
    let pepper = pepper.map(ToOwned::to_owned);

    task::spawn_blocking(move || {
        let password_material = combine_password_and_pepper(&password, pepper.as_deref());
        let argon2 = configured_argon2()?;
        let salt = SaltString::generate(&mut OsRng);
        let hash = argon2
            .hash_password(password_material.as_bytes(), &salt)
            .map_err(AuthError::PasswordHash)?
            .to_string();
        Ok::<_, AuthError>(hash)
    })
    .await?
}

/// Verify a password against a stored PHC hash string.
///
/// Returns [`AuthError::InvalidCredentials`] on mismatch; any other error means the stored hash
/// could not be processed.
pub async fn verify_password(
    password: &str,
    stored_hash: &str,
    pepper: Option<&str>,
) -> Result<(), AuthError> {
    let password = password.to_owned();
    let stored_hash = stored_hash.to_owned();
    let pepper = pepper.map(ToOwned::to_owned);

    task::spawn_blocking(move || {
        let parsed_hash = PasswordHash::new(&stored_hash).map_err(AuthError::PasswordHash)?;
        let password_material = combine_password_and_pepper(&password, pepper.as_deref());
        let verifier = configured_argon2()?;

        match verifier.verify_password(password_material.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(()),
            Err(PasswordHashError::Password) => Err(AuthError::InvalidCredentials),
            Err(err) => Err(AuthError::PasswordHash(err)),
        }
    })
    .await?
}

/// Validate username constraints and return the trimmed username. Case is preserved.
pub fn normalize_username(input: &str) -> Result<String, AuthError> {
    let trimmed = input.trim();
    let length = trimmed.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&length) {
        return Err(AuthError::InvalidUsername);
    }

    if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AuthError::InvalidUsername);
    }

    Ok(trimmed.to_string())
}

/// Validate password constraints.
pub fn validate_password_strength(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < PASSWORD_MIN_LEN {
        return Err(AuthError::InvalidPassword);
    }
    Ok(())
}

/// Introduce a small random backoff when login fails to slow brute-force attempts.
pub async fn randomized_backoff() {
    let base_delay = Duration::from_millis(150);
    let jitter = Duration::from_millis(fastrand::u64(0..150));
    tokio::time::sleep(base_delay + jitter).await;
}
