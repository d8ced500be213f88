//! Password and PIN hashing plus the password policy.
//!
//! Both secrets are stored as Argon2id PHC strings. The directory receives the
//! same PHC string under the `{ARGON2}` scheme, so a record can be re-pushed
//! without ever keeping the plaintext.

use anyhow::{Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use rand::rngs::OsRng;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;
const MIN_PIN_LEN: usize = 4;
const MAX_PIN_LEN: usize = 8;
const DIRECTORY_SCHEME: &str = "{ARGON2}";

/// Check a new password against the portal policy; the error is user-facing.
///
/// # Errors
/// Returns a human readable reason when the password is rejected.
pub fn check_policy(password: &str) -> Result<(), String> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        ));
    }
    if length > MAX_PASSWORD_LEN {
        return Err(format!(
            "Password must be at most {MAX_PASSWORD_LEN} characters"
        ));
    }
    if !password.chars().any(char::is_uppercase) {
        return Err("Password must contain an uppercase letter".to_string());
    }
    if !password.chars().any(char::is_lowercase) {
        return Err("Password must contain a lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain a digit".to_string());
    }
    if !password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
        return Err("Password must contain a symbol".to_string());
    }
    Ok(())
}

/// PINs are 4 to 8 ASCII digits.
#[must_use]
pub fn valid_pin(pin: &str) -> bool {
    (MIN_PIN_LEN..=MAX_PIN_LEN).contains(&pin.len()) && pin.chars().all(|c| c.is_ascii_digit())
}

/// Hash a secret with Argon2id and a random salt.
///
/// # Errors
/// Returns an error if Argon2 fails to produce a hash.
pub fn hash_secret(secret: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash secret: {err}"))
}

/// Constant-time check of a secret against a stored PHC string. Malformed
/// hashes never verify.
#[must_use]
pub fn verify_secret(secret: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok()
    })
}

/// Value written to the directory's `userPassword` attribute.
#[must_use]
pub fn directory_value(password_hash: &str) -> String {
    format!("{DIRECTORY_SCHEME}{password_hash}")
}
