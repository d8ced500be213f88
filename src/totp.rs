//! TOTP second factor: enrollment secrets, otpauth URLs and code checks.

use anyhow::{Result, anyhow};
use totp_rs::{Algorithm, Secret, TOTP};

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECONDS: u64 = 30;

/// Secret and provisioning URL handed to the user during enrollment.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub secret: String,
    pub otpauth_url: String,
}

#[derive(Debug, Clone)]
pub struct TotpService {
    issuer: String,
}

impl TotpService {
    #[must_use]
    pub fn new(issuer: String) -> Self {
        Self { issuer }
    }

    /// Generate a fresh 160-bit secret for `account`.
    ///
    /// # Errors
    /// Returns an error if the secret or the otpauth URL cannot be built.
    pub fn enroll(&self, account: &str) -> Result<Enrollment> {
        let secret_bytes = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| anyhow!("Secret gen error: {e}"))?;
        let totp = self.build(secret_bytes, account)?;

        Ok(Enrollment {
            secret: totp.get_secret_base32(),
            otpauth_url: totp.get_url(),
        })
    }

    /// Check `code` against a base32 secret for the current time window.
    ///
    /// # Errors
    /// Returns an error if the stored secret is not valid base32 or the clock
    /// is before the Unix epoch.
    pub fn verify(&self, secret_base32: &str, account: &str, code: &str) -> Result<bool> {
        let totp = self.from_base32(secret_base32, account)?;
        totp.check_current(code.trim())
            .map_err(|e| anyhow!("TOTP clock error: {e}"))
    }

    /// Code an authenticator app would show right now.
    #[cfg(test)]
    pub(crate) fn current_code(&self, secret_base32: &str, account: &str) -> Result<String> {
        let totp = self.from_base32(secret_base32, account)?;
        totp.generate_current()
            .map_err(|e| anyhow!("TOTP clock error: {e}"))
    }

    fn from_base32(&self, secret_base32: &str, account: &str) -> Result<TOTP> {
        let secret_bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|e| anyhow!("Invalid TOTP secret: {e}"))?;
        self.build(secret_bytes, account)
    }

    fn build(&self, secret_bytes: Vec<u8>, account: &str) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }
}
