use anyhow::anyhow;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tracing::{info, instrument};
use utoipa::ToSchema;

use super::{
    Channel, RecoveryError, RecoverySession, SessionStore, VerifyStrategy, WizardStep,
};
use crate::password;
use crate::store::{User, UserStatus, UserStore};
use crate::sync::{SyncError, SyncService};

pub const LOGIN_REDIRECT: &str = "/login";
pub const REDIRECT_DELAY_SECONDS: u64 = 3;

/// Where the wizard stands after a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct StepView {
    pub step: WizardStep,
    pub channel: Channel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Masked destination of an emailed code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_delay_seconds: Option<u64>,
}

impl StepView {
    fn at(step: WizardStep, channel: Channel, session_id: Option<String>) -> Self {
        Self {
            step,
            channel,
            session_id,
            hint: None,
            redirect_to: None,
            redirect_delay_seconds: None,
        }
    }

    fn success(channel: Channel) -> Self {
        Self {
            redirect_to: Some(LOGIN_REDIRECT.to_string()),
            redirect_delay_seconds: Some(REDIRECT_DELAY_SECONDS),
            ..Self::at(WizardStep::Success, channel, None)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetOutcome {
    pub view: StepView,
    pub directory_synced: bool,
}

/// Drives recovery sessions through `identify -> verify -> reset -> success`.
pub struct RecoveryWizard {
    store: Arc<dyn UserStore>,
    sync: SyncService,
    sessions: SessionStore,
    strategies: HashMap<Channel, Arc<dyn VerifyStrategy>>,
}

impl RecoveryWizard {
    #[must_use]
    pub fn new(store: Arc<dyn UserStore>, sync: SyncService, sessions: SessionStore) -> Self {
        Self {
            store,
            sync,
            sessions,
            strategies: HashMap::new(),
        }
    }

    /// Register the verifier for its channel, replacing any previous one.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn VerifyStrategy>) -> Self {
        self.strategies.insert(strategy.channel(), strategy);
        self
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Find the account, start the channel's challenge and open a session.
    ///
    /// # Errors
    /// `UserNotFound`, `AccountInactive`, or whatever the channel rejects
    /// (`PinNotConfigured`, `TwoFactorNotEnabled`, `Delivery`).
    #[instrument(skip(self, channel, identifier), fields(channel = %channel))]
    pub async fn identify(
        &self,
        channel: Channel,
        identifier: &str,
    ) -> Result<StepView, RecoveryError> {
        let strategy = self.strategy(channel)?;
        let user = self
            .store
            .find_by_identifier(identifier.trim())
            .await?
            .ok_or(RecoveryError::UserNotFound)?;

        if user.status != UserStatus::Active {
            return Err(RecoveryError::AccountInactive);
        }

        let challenge = strategy.begin(&user).await?;
        let session = self
            .sessions
            .create(channel, &user.username, challenge.state)
            .await;
        info!(username = %user.username, "recovery started");

        Ok(StepView {
            hint: challenge.hint,
            ..StepView::at(WizardStep::Verify, channel, Some(session.id))
        })
    }

    /// Check the second factor. Success moves the session to `reset`; a wrong
    /// answer leaves it at `verify` and counts against the attempt cap.
    ///
    /// # Errors
    /// `SessionNotFound`, `WrongStep`, `TooManyAttempts` or `InvalidCode`.
    #[instrument(skip(self, channel, session_id, response), fields(channel = %channel))]
    pub async fn verify(
        &self,
        channel: Channel,
        session_id: &str,
        response: &str,
    ) -> Result<StepView, RecoveryError> {
        let strategy = self.strategy(channel)?;
        let session = self.sessions.begin_attempt(session_id, channel).await?;

        let user = self.session_user(&session).await?;
        if !strategy
            .verify(&user, session.challenge.as_deref(), response)
            .await?
        {
            return Err(RecoveryError::InvalidCode);
        }

        let session = self
            .sessions
            .transition(&session.id, WizardStep::Verify, WizardStep::Reset)
            .await?;

        Ok(StepView::at(WizardStep::Reset, channel, Some(session.id)))
    }

    /// Set the new password through the sync service and close the session.
    ///
    /// A directory failure still completes the reset; `directory_synced`
    /// reports it.
    ///
    /// # Errors
    /// `SessionNotFound`, `WrongStep`, `PasswordMismatch`, `WeakPassword`, or
    /// a store failure.
    #[instrument(
        skip(self, channel, session_id, new_password, confirm_password),
        fields(channel = %channel)
    )]
    pub async fn reset(
        &self,
        channel: Channel,
        session_id: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<ResetOutcome, RecoveryError> {
        let session = self.load(Some(channel), session_id).await?;
        expect_step(&session, WizardStep::Reset)?;

        if new_password != confirm_password {
            return Err(RecoveryError::PasswordMismatch);
        }
        password::check_policy(new_password).map_err(RecoveryError::WeakPassword)?;

        let user = self.session_user(&session).await?;
        let directory_synced = match self.sync.sync_password(&user, new_password).await {
            Ok(()) => true,
            Err(SyncError::DirectoryPending(_)) => false,
            Err(SyncError::Store(err)) => return Err(RecoveryError::Store(err)),
            Err(SyncError::Hash(err)) => return Err(RecoveryError::Internal(err)),
        };

        self.sessions.remove(&session.id).await;
        info!(username = %user.username, directory_synced, "password reset via recovery");

        Ok(ResetOutcome {
            view: StepView::success(channel),
            directory_synced,
        })
    }

    /// Step back: `reset -> verify` keeps the session, `verify -> identify`
    /// discards it.
    ///
    /// # Errors
    /// `SessionNotFound`, or `NoPreviousStep` from any other step.
    #[instrument(skip(self, session_id))]
    pub async fn back(&self, session_id: &str) -> Result<StepView, RecoveryError> {
        let session = self.load(None, session_id).await?;

        match session.step {
            WizardStep::Reset => {
                let session = self
                    .sessions
                    .transition(&session.id, WizardStep::Reset, WizardStep::Verify)
                    .await?;
                Ok(StepView::at(
                    WizardStep::Verify,
                    session.channel,
                    Some(session.id),
                ))
            }
            WizardStep::Verify => {
                self.sessions.remove(&session.id).await;
                Ok(StepView::at(WizardStep::Identify, session.channel, None))
            }
            step => Err(RecoveryError::NoPreviousStep(step)),
        }
    }

    fn strategy(&self, channel: Channel) -> Result<&Arc<dyn VerifyStrategy>, RecoveryError> {
        self.strategies
            .get(&channel)
            .ok_or_else(|| RecoveryError::Internal(anyhow!("no verifier for channel {channel}")))
    }

    async fn load(
        &self,
        channel: Option<Channel>,
        session_id: &str,
    ) -> Result<RecoverySession, RecoveryError> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or(RecoveryError::SessionNotFound)?;

        match channel {
            Some(channel) if channel != session.channel => Err(RecoveryError::SessionNotFound),
            _ => Ok(session),
        }
    }

    async fn session_user(&self, session: &RecoverySession) -> Result<User, RecoveryError> {
        if let Some(user) = self.store.find_by_username(&session.username).await? {
            return Ok(user);
        }
        self.sessions.remove(&session.id).await;
        Err(RecoveryError::UserNotFound)
    }
}

fn expect_step(session: &RecoverySession, expected: WizardStep) -> Result<(), RecoveryError> {
    if session.step == expected {
        Ok(())
    } else {
        Err(RecoveryError::WrongStep {
            expected,
            actual: session.step,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::recovery::{
        Challenge, EmailCodeStrategy, MAX_VERIFY_ATTEMPTS, PinStrategy, TotpStrategy,
    };
    use crate::store::{Affiliation, MemoryStore};
    use crate::testing::{FakeDirectory, RecordingSender, active_user};
    use crate::totp::TotpService;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const OLD_PASSWORD: &str = "OldPass1!";
    const NEW_PASSWORD: &str = "NewPass1!";

    /// Wraps the PIN strategy and counts calls to `verify`.
    struct SpyPin {
        verify_calls: AtomicUsize,
    }

    #[async_trait]
    impl VerifyStrategy for SpyPin {
        fn channel(&self) -> Channel {
            Channel::Pin
        }

        async fn begin(&self, user: &User) -> Result<Challenge, RecoveryError> {
            PinStrategy.begin(user).await
        }

        async fn verify(
            &self,
            user: &User,
            challenge: Option<&str>,
            response: &str,
        ) -> Result<bool, RecoveryError> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            PinStrategy.verify(user, challenge, response).await
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        directory: Arc<FakeDirectory>,
        outbox: Arc<RecordingSender>,
        pin_spy: Arc<SpyPin>,
        wizard: RecoveryWizard,
    }

    fn fixture_with_ttl(ttl: Duration) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(FakeDirectory::default());
        let outbox = Arc::new(RecordingSender::default());
        let pin_spy = Arc::new(SpyPin {
            verify_calls: AtomicUsize::new(0),
        });
        let sync = SyncService::new(store.clone(), directory.clone());
        let wizard = RecoveryWizard::new(store.clone(), sync, SessionStore::new(ttl))
            .with_strategy(Arc::new(EmailCodeStrategy::new(outbox.clone(), ttl)))
            .with_strategy(pin_spy.clone())
            .with_strategy(Arc::new(TotpStrategy::new(TotpService::new(
                "CampusPortal".to_string(),
            ))));
        Fixture {
            store,
            directory,
            outbox,
            pin_spy,
            wizard,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_ttl(Duration::from_secs(900))
    }

    async fn stored_hash(store: &MemoryStore, username: &str) -> Result<String> {
        Ok(store
            .find_by_username(username)
            .await?
            .and_then(|user| user.password_hash)
            .unwrap_or_default())
    }

    #[tokio::test]
    async fn email_flow_reaches_success_with_redirect() -> Result<()> {
        let fx = fixture();
        active_user(&fx.store, "jdoe", OLD_PASSWORD).await?;

        let view = fx.wizard.identify(Channel::Email, "jdoe@campus.edu").await?;
        assert_eq!(view.step, WizardStep::Verify);
        assert_eq!(view.hint.as_deref(), Some("j***@example.com"));
        let session_id = view.session_id.unwrap();
        assert_eq!(fx.outbox.messages()[0].to_email, "jdoe@example.com");

        let code = fx.outbox.last_code().unwrap();
        let view = fx.wizard.verify(Channel::Email, &session_id, &code).await?;
        assert_eq!(view.step, WizardStep::Reset);

        let outcome = fx
            .wizard
            .reset(Channel::Email, &session_id, NEW_PASSWORD, NEW_PASSWORD)
            .await?;
        assert!(outcome.directory_synced);
        assert_eq!(outcome.view.step, WizardStep::Success);
        assert_eq!(outcome.view.redirect_to.as_deref(), Some("/login"));
        assert_eq!(outcome.view.redirect_delay_seconds, Some(3));

        let hash = stored_hash(&fx.store, "jdoe").await?;
        assert!(password::verify_secret(NEW_PASSWORD, &hash));
        assert_eq!(fx.directory.pushes().len(), 1);

        let replay = fx.wizard.verify(Channel::Email, &session_id, &code).await;
        assert!(matches!(replay, Err(RecoveryError::SessionNotFound)));
        Ok(())
    }

    #[tokio::test]
    async fn reset_is_unreachable_without_verify() -> Result<()> {
        let fx = fixture();
        active_user(&fx.store, "jdoe", OLD_PASSWORD).await?;
        let session_id = fx
            .wizard
            .identify(Channel::Email, "jdoe")
            .await?
            .session_id
            .unwrap();

        let result = fx
            .wizard
            .reset(Channel::Email, &session_id, NEW_PASSWORD, NEW_PASSWORD)
            .await;
        assert!(matches!(
            result,
            Err(RecoveryError::WrongStep {
                expected: WizardStep::Reset,
                actual: WizardStep::Verify
            })
        ));

        let wrong = fx.wizard.verify(Channel::Email, &session_id, "abcdef").await;
        assert!(matches!(wrong, Err(RecoveryError::InvalidCode)));
        let result = fx
            .wizard
            .reset(Channel::Email, &session_id, NEW_PASSWORD, NEW_PASSWORD)
            .await;
        assert!(matches!(result, Err(RecoveryError::WrongStep { .. })));

        let hash = stored_hash(&fx.store, "jdoe").await?;
        assert!(password::verify_secret(OLD_PASSWORD, &hash));
        assert!(fx.directory.pushes().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn pin_not_configured_fails_identify_without_verifying() -> Result<()> {
        let fx = fixture();
        active_user(&fx.store, "jdoe", OLD_PASSWORD).await?;

        let result = fx.wizard.identify(Channel::Pin, "jdoe").await;
        assert!(matches!(result, Err(RecoveryError::PinNotConfigured)));
        assert_eq!(fx.pin_spy.verify_calls.load(Ordering::SeqCst), 0);
        assert!(fx.wizard.sessions().is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn pin_flow_verifies_against_stored_hash() -> Result<()> {
        let fx = fixture();
        active_user(&fx.store, "jdoe", OLD_PASSWORD).await?;
        fx.store
            .set_pin("jdoe", &password::hash_secret("4821")?)
            .await?;

        let session_id = fx
            .wizard
            .identify(Channel::Pin, "jdoe")
            .await?
            .session_id
            .unwrap();
        assert!(matches!(
            fx.wizard.verify(Channel::Pin, &session_id, "1111").await,
            Err(RecoveryError::InvalidCode)
        ));
        let view = fx.wizard.verify(Channel::Pin, &session_id, "4821").await?;
        assert_eq!(view.step, WizardStep::Reset);
        assert_eq!(fx.pin_spy.verify_calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn two_factor_channel_requires_enabled_totp() -> Result<()> {
        let fx = fixture();
        active_user(&fx.store, "jdoe", OLD_PASSWORD).await?;
        let result = fx.wizard.identify(Channel::Totp, "jdoe").await;
        assert!(matches!(result, Err(RecoveryError::TwoFactorNotEnabled)));

        let totp = TotpService::new("CampusPortal".to_string());
        let enrollment = totp.enroll("jdoe")?;
        fx.store
            .set_two_factor("jdoe", Some(&enrollment.secret), true)
            .await?;

        let session_id = fx
            .wizard
            .identify(Channel::Totp, "jdoe")
            .await?
            .session_id
            .unwrap();
        let code = totp.current_code(&enrollment.secret, "jdoe")?;
        let view = fx.wizard.verify(Channel::Totp, &session_id, &code).await?;
        assert_eq!(view.step, WizardStep::Reset);
        Ok(())
    }

    #[tokio::test]
    async fn back_moves_to_previous_step_only() -> Result<()> {
        let fx = fixture();
        active_user(&fx.store, "jdoe", OLD_PASSWORD).await?;
        let session_id = fx
            .wizard
            .identify(Channel::Email, "jdoe")
            .await?
            .session_id
            .unwrap();
        let code = fx.outbox.last_code().unwrap();
        fx.wizard.verify(Channel::Email, &session_id, &code).await?;

        let view = fx.wizard.back(&session_id).await?;
        assert_eq!(view.step, WizardStep::Verify);
        assert_eq!(view.session_id.as_deref(), Some(session_id.as_str()));

        // Back at verify, reset needs a fresh verification.
        let result = fx
            .wizard
            .reset(Channel::Email, &session_id, NEW_PASSWORD, NEW_PASSWORD)
            .await;
        assert!(matches!(result, Err(RecoveryError::WrongStep { .. })));

        let view = fx.wizard.back(&session_id).await?;
        assert_eq!(view.step, WizardStep::Identify);
        assert!(view.session_id.is_none());
        assert!(matches!(
            fx.wizard.back(&session_id).await,
            Err(RecoveryError::SessionNotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn attempts_are_capped() -> Result<()> {
        let fx = fixture();
        active_user(&fx.store, "jdoe", OLD_PASSWORD).await?;
        let session_id = fx
            .wizard
            .identify(Channel::Email, "jdoe")
            .await?
            .session_id
            .unwrap();
        let code = fx.outbox.last_code().unwrap();

        for _ in 0..MAX_VERIFY_ATTEMPTS {
            let result = fx.wizard.verify(Channel::Email, &session_id, "abcdef").await;
            assert!(matches!(result, Err(RecoveryError::InvalidCode)));
        }
        let result = fx.wizard.verify(Channel::Email, &session_id, &code).await;
        assert!(matches!(result, Err(RecoveryError::TooManyAttempts)));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_pin_guesses_respect_the_cap() -> Result<()> {
        let fx = fixture();
        active_user(&fx.store, "jdoe", OLD_PASSWORD).await?;
        fx.store
            .set_pin("jdoe", &password::hash_secret("4821")?)
            .await?;
        let session_id = fx
            .wizard
            .identify(Channel::Pin, "jdoe")
            .await?
            .session_id
            .unwrap();

        let wizard = Arc::new(fx.wizard);
        let guesses: Vec<_> = (0..20)
            .map(|n| {
                let wizard = wizard.clone();
                let session_id = session_id.clone();
                tokio::spawn(async move {
                    wizard
                        .verify(Channel::Pin, &session_id, &format!("{:04}", 1000 + n))
                        .await
                })
            })
            .collect();

        let mut capped = 0;
        for guess in guesses {
            match guess.await? {
                Err(RecoveryError::TooManyAttempts) => capped += 1,
                Err(RecoveryError::InvalidCode) => {}
                other => panic!("unexpected verify result: {other:?}"),
            }
        }
        let evaluated = fx.pin_spy.verify_calls.load(Ordering::SeqCst);
        assert_eq!(evaluated, MAX_VERIFY_ATTEMPTS as usize);
        assert_eq!(capped, 20 - evaluated);
        Ok(())
    }

    #[tokio::test]
    async fn session_is_bound_to_its_channel() -> Result<()> {
        let fx = fixture();
        active_user(&fx.store, "jdoe", OLD_PASSWORD).await?;
        let session_id = fx
            .wizard
            .identify(Channel::Email, "jdoe")
            .await?
            .session_id
            .unwrap();

        let result = fx.wizard.verify(Channel::Pin, &session_id, "4821").await;
        assert!(matches!(result, Err(RecoveryError::SessionNotFound)));
        assert_eq!(fx.pin_spy.verify_calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn directory_failure_still_completes_reset() -> Result<()> {
        let fx = fixture();
        active_user(&fx.store, "jdoe", OLD_PASSWORD).await?;
        fx.directory.fail_for("jdoe");
        let session_id = fx
            .wizard
            .identify(Channel::Email, "jdoe")
            .await?
            .session_id
            .unwrap();
        let code = fx.outbox.last_code().unwrap();
        fx.wizard.verify(Channel::Email, &session_id, &code).await?;

        let outcome = fx
            .wizard
            .reset(Channel::Email, &session_id, NEW_PASSWORD, NEW_PASSWORD)
            .await?;
        assert!(!outcome.directory_synced);
        assert_eq!(outcome.view.step, WizardStep::Success);

        let user = fx.store.find_by_username("jdoe").await?.unwrap();
        assert!(!user.ldap_synced);
        Ok(())
    }

    #[tokio::test]
    async fn reset_rejects_mismatch_and_weak_passwords_without_advancing() -> Result<()> {
        let fx = fixture();
        active_user(&fx.store, "jdoe", OLD_PASSWORD).await?;
        let session_id = fx
            .wizard
            .identify(Channel::Email, "jdoe")
            .await?
            .session_id
            .unwrap();
        let code = fx.outbox.last_code().unwrap();
        fx.wizard.verify(Channel::Email, &session_id, &code).await?;

        let mismatch = fx
            .wizard
            .reset(Channel::Email, &session_id, NEW_PASSWORD, "Other1!x")
            .await;
        assert!(matches!(mismatch, Err(RecoveryError::PasswordMismatch)));

        let weak = fx
            .wizard
            .reset(Channel::Email, &session_id, "short", "short")
            .await;
        assert!(matches!(weak, Err(RecoveryError::WeakPassword(_))));

        let outcome = fx
            .wizard
            .reset(Channel::Email, &session_id, NEW_PASSWORD, NEW_PASSWORD)
            .await?;
        assert_eq!(outcome.view.step, WizardStep::Success);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_and_inactive_users_are_rejected() -> Result<()> {
        let fx = fixture();
        let result = fx.wizard.identify(Channel::Email, "ghost").await;
        assert!(matches!(result, Err(RecoveryError::UserNotFound)));

        fx.store
            .insert(&User::provisioned(
                "fresh",
                "fresh@campus.edu",
                "Fresh",
                Affiliation::Employee,
            ))
            .await?;
        let result = fx.wizard.identify(Channel::Email, "fresh").await;
        assert!(matches!(result, Err(RecoveryError::AccountInactive)));
        assert!(fx.outbox.messages().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn expired_session_is_rejected() -> Result<()> {
        let fx = fixture_with_ttl(Duration::ZERO);
        active_user(&fx.store, "jdoe", OLD_PASSWORD).await?;
        let session_id = fx
            .wizard
            .identify(Channel::Email, "jdoe")
            .await?
            .session_id
            .unwrap();
        let code = fx.outbox.last_code().unwrap();

        let result = fx.wizard.verify(Channel::Email, &session_id, &code).await;
        assert!(matches!(result, Err(RecoveryError::SessionNotFound)));
        Ok(())
    }
}
