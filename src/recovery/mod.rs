//! Password recovery wizard.
//!
//! Every channel (email code, PIN, TOTP) walks the same four steps:
//! `identify -> verify -> reset -> success`. [`RecoveryWizard`] owns the step
//! transitions and the session store; a [`VerifyStrategy`] per channel owns
//! the second factor. A session only reaches `reset` after its own `verify`
//! succeeded, and `back` is the only way to move in the other direction.

mod session;
mod strategy;
mod wizard;

pub use session::{MAX_VERIFY_ATTEMPTS, RecoverySession, SessionStore};
pub use strategy::{Challenge, EmailCodeStrategy, PinStrategy, TotpStrategy, VerifyStrategy};
pub use wizard::{LOGIN_REDIRECT, REDIRECT_DELAY_SECONDS, RecoveryWizard, ResetOutcome, StepView};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use utoipa::ToSchema;

use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Channel {
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "pin")]
    Pin,
    #[serde(rename = "2fa")]
    Totp,
}

impl Channel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Pin => "pin",
            Self::Totp => "2fa",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WizardStep {
    Identify,
    Verify,
    Reset,
    Success,
}

impl WizardStep {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Identify => "identify",
            Self::Verify => "verify",
            Self::Reset => "reset",
            Self::Success => "success",
        }
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("User not found")]
    UserNotFound,
    #[error("Account is not activated")]
    AccountInactive,
    #[error("PIN not configured")]
    PinNotConfigured,
    #[error("2FA not enabled")]
    TwoFactorNotEnabled,
    #[error("Recovery session not found or expired")]
    SessionNotFound,
    #[error("Recovery session is at step {actual}, expected {expected}")]
    WrongStep {
        expected: WizardStep,
        actual: WizardStep,
    },
    #[error("Cannot go back from step {0}")]
    NoPreviousStep(WizardStep),
    #[error("Invalid verification code")]
    InvalidCode,
    #[error("Too many attempts")]
    TooManyAttempts,
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("{0}")]
    WeakPassword(String),
    #[error("Failed to send recovery email")]
    Delivery(#[source] anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Recovery failed")]
    Internal(#[source] anyhow::Error),
}

/// `j***@example.com` style hint so the user knows where the code went.
#[must_use]
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{first}***@{domain}")
        }
        None => "***".to_string(),
    }
}
