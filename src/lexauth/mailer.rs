//! Outbound email abstraction.
//!
//! The service builds an [`EmailMessage`] per account event and hands it to a
//! [`Mailer`]. Delivery is fire-and-forget: a failed send is logged and the
//! request that triggered it still succeeds.

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplate {
    VerifyEmail,
    PasswordReset,
    Invitation,
}

impl EmailTemplate {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VerifyEmail => "verify_email",
            Self::PasswordReset => "password_reset",
            Self::Invitation => "invitation",
        }
    }
}

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: EmailTemplate,
    pub payload: Value,
}

impl EmailMessage {
    /// The `link` field of the payload, if any.
    #[must_use]
    pub fn link(&self) -> Option<&str> {
        self.payload.get("link").and_then(Value::as_str)
    }
}

/// Email delivery abstraction.
pub trait Mailer: Send + Sync {
    /// Deliver a message. Errors are logged by the caller and never surfaced to clients.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev mailer that logs the recipient and template instead of sending.
#[derive(Clone, Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        // the payload holds a live token, keep it out of the logs
        info!(
            to_email = %message.to_email,
            template = message.template.as_str(),
            "email send stub"
        );
        Ok(())
    }
}

/// Keeps every message in memory so callers can inspect what would have been sent.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingMailer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<EmailMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Most recent message of `template` addressed to `to_email`.
    #[must_use]
    pub fn last_to(&self, to_email: &str, template: EmailTemplate) -> Option<EmailMessage> {
        self.messages()
            .into_iter()
            .rev()
            .find(|m| m.to_email == to_email && m.template == template)
    }

    /// Token carried in the `#token=` fragment of the most recent matching link.
    #[must_use]
    pub fn last_token(&self, to_email: &str, template: EmailTemplate) -> Option<String> {
        let message = self.last_to(to_email, template)?;
        let link = message.link()?;
        link.split_once("#token=").map(|(_, token)| token.to_string())
    }
}

impl Mailer for RecordingMailer {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("recording mailer poisoned"))?
            .push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recording_mailer_extracts_token() -> Result<()> {
        let mailer = RecordingMailer::new();
        mailer.send(&EmailMessage {
            to_email: "a@example.com".to_string(),
            template: EmailTemplate::PasswordReset,
            payload: json!({ "link": "https://app.test/reset-password#token=abc123" }),
        })?;

        assert_eq!(
            mailer.last_token("a@example.com", EmailTemplate::PasswordReset),
            Some("abc123".to_string())
        );
        assert!(mailer
            .last_token("a@example.com", EmailTemplate::VerifyEmail)
            .is_none());
        Ok(())
    }

    #[test]
    fn log_mailer_never_fails() {
        let message = EmailMessage {
            to_email: "a@example.com".to_string(),
            template: EmailTemplate::Invitation,
            payload: Value::Null,
        };
        assert!(LogMailer.send(&message).is_ok());
    }
}
