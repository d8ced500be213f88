use async_trait::async_trait;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::{sync::Arc, time::Duration};
use subtle::ConstantTimeEq;
use tracing::debug;

use super::{Channel, RecoveryError, mask_email};
use crate::email::{EmailMessage, EmailSender};
use crate::password;
use crate::store::User;
use crate::totp::TotpService;

const EMAIL_CODE_DIGITS: usize = 6;

/// What `identify` hands back: verifier state kept server side and an
/// optional hint shown to the user.
#[derive(Debug, Clone, Default)]
pub struct Challenge {
    pub state: Option<String>,
    pub hint: Option<String>,
}

/// Second factor used by one recovery channel.
#[async_trait]
pub trait VerifyStrategy: Send + Sync {
    fn channel(&self) -> Channel;

    /// Runs during `identify`. Fails when the user cannot use this channel.
    async fn begin(&self, user: &User) -> Result<Challenge, RecoveryError>;

    /// Check the user's answer. `Ok(false)` means a wrong answer.
    async fn verify(
        &self,
        user: &User,
        challenge: Option<&str>,
        response: &str,
    ) -> Result<bool, RecoveryError>;
}

/// Six digit code mailed to the recovery address; only its SHA-256 is kept.
pub struct EmailCodeStrategy {
    sender: Arc<dyn EmailSender>,
    code_ttl: Duration,
}

impl EmailCodeStrategy {
    #[must_use]
    pub fn new(sender: Arc<dyn EmailSender>, code_ttl: Duration) -> Self {
        Self { sender, code_ttl }
    }
}

#[async_trait]
impl VerifyStrategy for EmailCodeStrategy {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn begin(&self, user: &User) -> Result<Challenge, RecoveryError> {
        let code = generate_code();
        let to_email = user.recovery_email();
        let ttl_minutes = (self.code_ttl.as_secs() / 60).max(1);

        self.sender
            .send(&EmailMessage::recovery_code(to_email, &code, ttl_minutes))
            .await
            .map_err(RecoveryError::Delivery)?;
        debug!(username = %user.username, "recovery code sent");

        Ok(Challenge {
            state: Some(hash_code(&code)),
            hint: Some(mask_email(to_email)),
        })
    }

    async fn verify(
        &self,
        _user: &User,
        challenge: Option<&str>,
        response: &str,
    ) -> Result<bool, RecoveryError> {
        Ok(challenge.is_some_and(|expected| code_matches(response, expected)))
    }
}

pub struct PinStrategy;

#[async_trait]
impl VerifyStrategy for PinStrategy {
    fn channel(&self) -> Channel {
        Channel::Pin
    }

    async fn begin(&self, user: &User) -> Result<Challenge, RecoveryError> {
        if user.pin_hash.is_none() {
            return Err(RecoveryError::PinNotConfigured);
        }
        Ok(Challenge::default())
    }

    async fn verify(
        &self,
        user: &User,
        _challenge: Option<&str>,
        response: &str,
    ) -> Result<bool, RecoveryError> {
        let pin_hash = user
            .pin_hash
            .as_deref()
            .ok_or(RecoveryError::PinNotConfigured)?;
        Ok(password::verify_secret(response.trim(), pin_hash))
    }
}

pub struct TotpStrategy {
    totp: TotpService,
}

impl TotpStrategy {
    #[must_use]
    pub fn new(totp: TotpService) -> Self {
        Self { totp }
    }
}

#[async_trait]
impl VerifyStrategy for TotpStrategy {
    fn channel(&self) -> Channel {
        Channel::Totp
    }

    async fn begin(&self, user: &User) -> Result<Challenge, RecoveryError> {
        if !user.two_factor_enabled || user.two_factor_secret.is_none() {
            return Err(RecoveryError::TwoFactorNotEnabled);
        }
        Ok(Challenge::default())
    }

    async fn verify(
        &self,
        user: &User,
        _challenge: Option<&str>,
        response: &str,
    ) -> Result<bool, RecoveryError> {
        let secret = user
            .two_factor_secret
            .as_deref()
            .filter(|_| user.two_factor_enabled)
            .ok_or(RecoveryError::TwoFactorNotEnabled)?;
        self.totp
            .verify(secret, &user.username, response)
            .map_err(RecoveryError::Internal)
    }
}

fn generate_code() -> String {
    let value: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{value:0width$}", width = EMAIL_CODE_DIGITS)
}

fn hash_code(code: &str) -> String {
    format!("{:x}", Sha256::digest(code.as_bytes()))
}

fn code_matches(response: &str, expected_hash: &str) -> bool {
    hash_code(response.trim())
        .as_bytes()
        .ct_eq(expected_hash.as_bytes())
        .into()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::Affiliation;
    use crate::testing::RecordingSender;

    fn user() -> User {
        User::provisioned("jdoe", "jdoe@campus.edu", "Jane Doe", Affiliation::Student)
    }

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn code_comparison_uses_hash_of_trimmed_response() {
        let expected = hash_code("123456");
        assert!(code_matches("123456", &expected));
        assert!(code_matches(" 123456\n", &expected));
        assert!(!code_matches("123457", &expected));
        assert!(!code_matches("123456", &expected[..32]));
        assert!(!code_matches("123456", ""));
    }

    #[tokio::test]
    async fn email_code_goes_to_backup_address_and_only_hash_is_kept() {
        let outbox = Arc::new(RecordingSender::default());
        let strategy = EmailCodeStrategy::new(outbox.clone(), Duration::from_secs(900));
        let mut user = user();
        user.backup_email = Some("jane@example.com".to_string());

        let challenge = strategy.begin(&user).await.unwrap();
        let sent = outbox.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_email, "jane@example.com");
        assert!(sent[0].body.contains("15 minutes"));

        let code = outbox.last_code().unwrap();
        let state = challenge.state.unwrap();
        assert_ne!(state, code);
        assert_eq!(state.len(), 64);
        assert_eq!(challenge.hint.as_deref(), Some("j***@example.com"));

        assert!(strategy.verify(&user, Some(&state), &code).await.unwrap());
        assert!(!strategy.verify(&user, Some(&state), "abcdef").await.unwrap());
        assert!(!strategy.verify(&user, None, &code).await.unwrap());
    }

    #[tokio::test]
    async fn email_delivery_failure_is_reported() {
        let outbox = Arc::new(RecordingSender::default());
        outbox.set_failing(true);
        let strategy = EmailCodeStrategy::new(outbox, Duration::from_secs(900));
        assert!(matches!(
            strategy.begin(&user()).await,
            Err(RecoveryError::Delivery(_))
        ));
    }

    #[tokio::test]
    async fn pin_requires_configuration() {
        let strategy = PinStrategy;
        let mut user = user();
        assert!(matches!(
            strategy.begin(&user).await,
            Err(RecoveryError::PinNotConfigured)
        ));

        user.pin_hash = Some(password::hash_secret("4821").unwrap());
        assert!(strategy.begin(&user).await.is_ok());
        assert!(strategy.verify(&user, None, "4821").await.unwrap());
        assert!(!strategy.verify(&user, None, "0000").await.unwrap());
    }

    #[tokio::test]
    async fn totp_requires_enabled_second_factor() {
        let totp = TotpService::new("CampusPortal".to_string());
        let strategy = TotpStrategy::new(totp.clone());
        let mut user = user();
        assert!(matches!(
            strategy.begin(&user).await,
            Err(RecoveryError::TwoFactorNotEnabled)
        ));

        let enrollment = totp.enroll(&user.username).unwrap();
        user.two_factor_secret = Some(enrollment.secret.clone());
        assert!(matches!(
            strategy.begin(&user).await,
            Err(RecoveryError::TwoFactorNotEnabled)
        ));

        user.two_factor_enabled = true;
        assert!(strategy.begin(&user).await.is_ok());
        let code = totp.current_code(&enrollment.secret, &user.username).unwrap();
        assert!(strategy.verify(&user, None, &code).await.unwrap());
    }
}
