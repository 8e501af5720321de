//! Outgoing mail.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{PortError, Result};
use crate::sync::lock;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<()>;
}

/// A mail accepted by [`InMemoryMailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Default)]
struct InMemoryMailerState {
    sent: Vec<SentMail>,
    fail_send: bool,
}

/// In-memory mailer for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMailer {
    state: Arc<Mutex<InMemoryMailerState>>,
}

impl InMemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_send(&self, fail: bool) {
        lock(&self.state).fail_send = fail;
    }

    pub fn sent(&self) -> Vec<SentMail> {
        lock(&self.state).sent.clone()
    }
}

#[async_trait]
impl Mailer for InMemoryMailer {
    async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_send {
            return Err(PortError::Mail("SMTP server unavailable".to_string()));
        }
        state.sent.push(SentMail {
            to: to.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Mailer that writes every message to the log instead of delivering it.
#[derive(Debug, Clone)]
pub struct LogMailer {
    from: String,
    relay: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>, relay: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            relay: relay.into(),
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<()> {
        if to.is_empty() {
            return Err(PortError::Mail("no recipients".to_string()));
        }
        tracing::info!(
            from = %self.from,
            relay = %self.relay,
            to = ?to,
            subject,
            bytes = body.len(),
            "Mail sent"
        );
        Ok(())
    }
}
