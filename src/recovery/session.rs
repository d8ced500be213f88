use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Channel, RecoveryError, WizardStep};

pub const MAX_VERIFY_ATTEMPTS: u32 = 5;
const SESSION_ID_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct RecoverySession {
    pub id: String,
    pub channel: Channel,
    pub username: String,
    pub step: WizardStep,
    /// Channel-specific verifier state, e.g. the SHA-256 of an emailed code.
    pub challenge: Option<String>,
    pub attempts: u32,
    expires_at: Instant,
}

impl RecoverySession {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process recovery sessions with a fixed TTL. Expired entries behave as
/// if they never existed.
#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, RecoverySession>>,
}

impl SessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Open a session that is waiting for verification.
    pub async fn create(
        &self,
        channel: Channel,
        username: &str,
        challenge: Option<String>,
    ) -> RecoverySession {
        let now = Instant::now();
        let session = RecoverySession {
            id: new_session_id(),
            channel,
            username: username.to_string(),
            step: WizardStep::Verify,
            challenge,
            attempts: 0,
            expires_at: now + self.ttl,
        };

        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, existing| !existing.is_expired(now));
        sessions.insert(session.id.clone(), session.clone());
        session
    }

    pub async fn get(&self, id: &str) -> Option<RecoverySession> {
        let mut sessions = self.sessions.lock().await;
        let expired = sessions.get(id)?.is_expired(Instant::now());
        if expired {
            debug!("recovery session expired");
            sessions.remove(id);
            return None;
        }
        sessions.get(id).cloned()
    }

    /// Count one verification attempt on a `verify` session of `channel`.
    /// The step and cap checks and the increment happen under one lock, so
    /// parallel guesses cannot share an attempt.
    ///
    /// # Errors
    /// `SessionNotFound` (also for another channel's session), `WrongStep`
    /// or `TooManyAttempts`.
    pub async fn begin_attempt(
        &self,
        id: &str,
        channel: Channel,
    ) -> Result<RecoverySession, RecoveryError> {
        let mut sessions = self.sessions.lock().await;
        let session = live_session(&mut sessions, id, channel)?;

        if session.step != WizardStep::Verify {
            return Err(RecoveryError::WrongStep {
                expected: WizardStep::Verify,
                actual: session.step,
            });
        }
        if session.attempts >= MAX_VERIFY_ATTEMPTS {
            warn!(username = %session.username, "recovery attempt cap reached");
            return Err(RecoveryError::TooManyAttempts);
        }
        session.attempts += 1;
        Ok(session.clone())
    }

    /// Move a session from `from` to `to`. The expiry is never extended.
    ///
    /// # Errors
    /// `SessionNotFound`, or `WrongStep` when it is no longer at `from`.
    pub async fn transition(
        &self,
        id: &str,
        from: WizardStep,
        to: WizardStep,
    ) -> Result<RecoverySession, RecoveryError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(id).ok_or(RecoveryError::SessionNotFound)?;
        if session.step != from {
            return Err(RecoveryError::WrongStep {
                expected: from,
                actual: session.step,
            });
        }
        session.step = to;
        Ok(session.clone())
    }

    pub async fn remove(&self, id: &str) {
        self.sessions.lock().await.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn live_session<'a>(
    sessions: &'a mut HashMap<String, RecoverySession>,
    id: &str,
    channel: Channel,
) -> Result<&'a mut RecoverySession, RecoveryError> {
    let expired = sessions
        .get(id)
        .ok_or(RecoveryError::SessionNotFound)?
        .is_expired(Instant::now());
    if expired {
        sessions.remove(id);
        return Err(RecoveryError::SessionNotFound);
    }
    match sessions.get_mut(id) {
        Some(session) if session.channel == channel => Ok(session),
        _ => Err(RecoveryError::SessionNotFound),
    }
}

fn new_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
