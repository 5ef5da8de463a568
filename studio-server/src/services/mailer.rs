//! Transactional email dispatch
//!
//! The lifecycle and signing services depend only on the `EmailSender` trait,
//! not on a concrete transport. Two implementations ship: an HTTP gateway
//! relay (reqwest POST with bearer auth) and a log-only sender used when no
//! gateway is configured and in tests.
//!
//! All dispatch is best-effort: a failed email is logged and never unwinds a
//! committed state transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Mail transport errors
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Gateway error {0}: {1}")]
    Gateway(u16, String),
}

/// Rendered email content produced by the template builders
#[derive(Debug, Clone)]
pub struct EmailContent {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// A fully addressed outbound message
#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl EmailMessage {
    pub fn new(to: &str, from: &str, content: EmailContent) -> Self {
        EmailMessage {
            to: to.to_string(),
            from: from.to_string(),
            subject: content.subject,
            html: content.html,
            text: content.text,
        }
    }
}

/// Transport boundary for transactional email
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;
}

/// Sends through an HTTP email gateway (SES-compatible relay)
pub struct HttpEmailSender {
    client: reqwest::Client,
    gateway_url: String,
    token: Option<String>,
}

impl HttpEmailSender {
    pub fn new(gateway_url: String, token: Option<String>) -> Self {
        HttpEmailSender {
            client: reqwest::Client::new(),
            gateway_url,
            token,
        }
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let mut request = self.client.post(&self.gateway_url).json(message);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MailError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(MailError::Gateway(status.as_u16(), body))
        }
    }
}

/// Logs messages instead of sending them. Default when no gateway is
/// configured; also the test transport.
#[derive(Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            "Email dispatch (log-only transport)"
        );
        Ok(())
    }
}

/// Dispatch a message, logging any failure. Never returns an error.
pub async fn send_best_effort(sender: &dyn EmailSender, message: EmailMessage) {
    if let Err(e) = sender.send(&message).await {
        tracing::warn!(to = %message.to, subject = %message.subject, error = %e,
            "Email dispatch failed");
    }
}

// ── Template builders ──────────────────────────────────────────────────
//
// Pure string formatting: structured data in, {subject, html, text} out.

pub fn magic_link_email(
    client_name: &str,
    contract_title: &str,
    contract_number: &str,
    link_url: &str,
    expires_at: DateTime<Utc>,
) -> EmailContent {
    let expires = expires_at.format("%B %e, %Y at %H:%M UTC");
    EmailContent {
        subject: format!("Your contract is ready to sign: {}", contract_title),
        html: format!(
            "<p>Hi {client_name},</p>\
             <p>Your contract <strong>{contract_title}</strong> ({contract_number}) \
             is ready for review and signature.</p>\
             <p><a href=\"{link_url}\">Review and sign your contract</a></p>\
             <p>This link expires on {expires}.</p>"
        ),
        text: format!(
            "Hi {client_name},\n\n\
             Your contract {contract_title} ({contract_number}) is ready for \
             review and signature.\n\n\
             Review and sign: {link_url}\n\n\
             This link expires on {expires}.\n"
        ),
    }
}

pub fn otp_email(code: &str, contract_number: &str, ttl_minutes: i64) -> EmailContent {
    EmailContent {
        subject: format!("Your verification code for contract {}", contract_number),
        html: format!(
            "<p>Your verification code is <strong>{code}</strong>.</p>\
             <p>It expires in {ttl_minutes} minutes.</p>"
        ),
        text: format!(
            "Your verification code is {code}.\nIt expires in {ttl_minutes} minutes.\n"
        ),
    }
}

/// Confirmation sent to the signer after signing
pub fn signed_confirmation_email(
    signer_name: &str,
    contract_title: &str,
    contract_number: &str,
    signed_at: DateTime<Utc>,
) -> EmailContent {
    let when = signed_at.format("%B %e, %Y at %H:%M UTC");
    EmailContent {
        subject: format!("Signed: {} ({})", contract_title, contract_number),
        html: format!(
            "<p>Hi {signer_name},</p>\
             <p>You signed <strong>{contract_title}</strong> ({contract_number}) \
             on {when}.</p>\
             <p>A copy of the signed document is kept on file.</p>"
        ),
        text: format!(
            "Hi {signer_name},\n\n\
             You signed {contract_title} ({contract_number}) on {when}.\n\
             A copy of the signed document is kept on file.\n"
        ),
    }
}

/// Notification sent to the studio admin after signing
pub fn signed_admin_email(
    signer_name: &str,
    signer_email: &str,
    contract_title: &str,
    contract_number: &str,
) -> EmailContent {
    EmailContent {
        subject: format!("Contract signed: {} ({})", contract_title, contract_number),
        html: format!(
            "<p><strong>{contract_title}</strong> ({contract_number}) was signed by \
             {signer_name} &lt;{signer_email}&gt;.</p>"
        ),
        text: format!(
            "{contract_title} ({contract_number}) was signed by {signer_name} <{signer_email}>.\n"
        ),
    }
}

/// Decline notice sent to the studio admin
pub fn declined_email(
    contract_title: &str,
    contract_number: &str,
    reason: Option<&str>,
) -> EmailContent {
    let reason_line = match reason {
        Some(r) => format!("Reason given: {}", r),
        None => "No reason was given.".to_string(),
    };
    EmailContent {
        subject: format!("Contract declined: {} ({})", contract_title, contract_number),
        html: format!(
            "<p><strong>{contract_title}</strong> ({contract_number}) was declined.</p>\
             <p>{reason_line}</p>"
        ),
        text: format!("{contract_title} ({contract_number}) was declined.\n{reason_line}\n"),
    }
}

/// Signing invitation for one envelope party
pub fn envelope_invite_email(
    signer_name: &str,
    envelope_title: &str,
    link_url: &str,
    expires_at: Option<DateTime<Utc>>,
) -> EmailContent {
    let expiry_line = match expires_at {
        Some(at) => format!(
            "This request expires on {}.",
            at.format("%B %e, %Y at %H:%M UTC")
        ),
        None => String::new(),
    };
    EmailContent {
        subject: format!("Signature requested: {}", envelope_title),
        html: format!(
            "<p>Hi {signer_name},</p>\
             <p>Your signature is requested on <strong>{envelope_title}</strong>.</p>\
             <p><a href=\"{link_url}\">Review and sign</a></p>\
             <p>{expiry_line}</p>"
        ),
        text: format!(
            "Hi {signer_name},\n\n\
             Your signature is requested on {envelope_title}.\n\n\
             Review and sign: {link_url}\n\n\
             {expiry_line}\n"
        ),
    }
}

pub fn expiring_reminder_email(
    client_name: &str,
    contract_title: &str,
    contract_number: &str,
    sign_by_at: DateTime<Utc>,
    link_url: &str,
) -> EmailContent {
    let deadline = sign_by_at.format("%B %e, %Y at %H:%M UTC");
    EmailContent {
        subject: format!("Reminder: {} awaits your signature", contract_title),
        html: format!(
            "<p>Hi {client_name},</p>\
             <p><strong>{contract_title}</strong> ({contract_number}) is still \
             awaiting your signature and expires on {deadline}.</p>\
             <p><a href=\"{link_url}\">Sign now</a></p>"
        ),
        text: format!(
            "Hi {client_name},\n\n\
             {contract_title} ({contract_number}) is still awaiting your \
             signature and expires on {deadline}.\n\n\
             Sign now: {link_url}\n"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_link_builder_includes_link_and_expiry() {
        let content = magic_link_email(
            "Jane Doe",
            "Wedding shoot",
            "CT-2025-0001",
            "https://studio.example.com/sign/abc123",
            Utc::now(),
        );
        assert!(content.subject.contains("Wedding shoot"));
        assert!(content.html.contains("https://studio.example.com/sign/abc123"));
        assert!(content.text.contains("CT-2025-0001"));
    }

    #[test]
    fn declined_builder_handles_missing_reason() {
        let with_reason = declined_email("Wedding shoot", "CT-2025-0001", Some("too expensive"));
        assert!(with_reason.text.contains("too expensive"));

        let without = declined_email("Wedding shoot", "CT-2025-0001", None);
        assert!(without.text.contains("No reason was given"));
    }

    #[tokio::test]
    async fn log_sender_always_succeeds() {
        let sender = LogEmailSender;
        let message = EmailMessage::new(
            "jane@example.com",
            "contracts@studio.local",
            otp_email("123456", "CT-2025-0001", 10),
        );
        assert!(sender.send(&message).await.is_ok());
    }
}
