//! Fakes shared by unit tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::io;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use tracing::subscriber::DefaultGuard;

use crate::directory::{Directory, DirectoryError};
use crate::email::{EmailMessage, EmailSender};
use crate::password;
use crate::store::{Affiliation, MemoryStore, StoreError, User, UserStore};

/// Captures formatted log output for the current thread.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    /// Route events at `WARN` and above into this buffer until the guard drops.
    pub fn install(&self) -> DefaultGuard {
        let buffer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .with_writer(move || buffer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        self.0
            .lock()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut bytes) = self.0.lock() {
            bytes.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Directory that fails for selected usernames and records every push.
#[derive(Default)]
pub struct FakeDirectory {
    failing: Mutex<HashSet<String>>,
    pushed: Mutex<Vec<(String, String)>>,
}

impl FakeDirectory {
    pub fn fail_for(&self, username: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(username.to_string());
        }
    }

    pub fn recover(&self, username: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(username);
        }
    }

    pub fn pushes(&self) -> Vec<(String, String)> {
        self.pushed
            .lock()
            .map(|pushed| pushed.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn set_password(&self, username: &str, password_value: &str) -> Result<(), DirectoryError> {
        if let Ok(mut pushed) = self.pushed.lock() {
            pushed.push((username.to_string(), password_value.to_string()));
        }
        let failing = self
            .failing
            .lock()
            .map(|failing| failing.contains(username))
            .unwrap_or(false);
        if failing {
            return Err(DirectoryError::Timeout(5));
        }
        Ok(())
    }
}

/// Email sender that keeps messages in memory.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<EmailMessage>>,
    failing: AtomicBool,
}

impl RecordingSender {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<EmailMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Six digit code from the most recent message.
    pub fn last_code(&self) -> Option<String> {
        let message = self.messages().pop()?;
        message
            .body
            .split_whitespace()
            .map(|word| word.trim_end_matches('.'))
            .find(|word| word.len() == 6 && word.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string)
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("smtp down"));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        Ok(())
    }
}

/// Insert an activated account with `password` already set.
pub async fn active_user(store: &MemoryStore, username: &str, password: &str) -> Result<User> {
    store
        .insert(&User::provisioned(
            username,
            &format!("{username}@campus.edu"),
            "Test User",
            Affiliation::Student,
        ))
        .await?;
    store
        .activate(
            username,
            &format!("{username}@example.com"),
            &password::hash_secret(password)?,
            true,
            Utc::now(),
        )
        .await?;
    store
        .find_by_username(username)
        .await?
        .ok_or_else(|| anyhow!(StoreError::NotFound))
}
