#[cfg(feature = "web")]
use crate::config::SmtpConfig;
#[cfg(feature = "web")]
use lettre::transport::smtp::authentication::Credentials;
#[cfg(feature = "web")]
use lettre::transport::smtp::client::{Tls, TlsParameters};
#[cfg(feature = "web")]
use lettre::{Message, SmtpTransport, Transport};
use log::{debug, info};
use rand::Rng;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to deliver message to {to}: {reason}")]
pub struct NotifyError {
    pub to: String,
    pub reason: String,
}

/// A message handed to a [`Notifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Out-of-band delivery of confirmation and challenge codes.
pub trait Notifier: Send + Sync {
    fn send(&self, message: OutgoingMessage) -> Result<(), NotifyError>;

    fn send_email_confirmation(&self, to: &str, code: &str) -> Result<(), NotifyError> {
        self.send(OutgoingMessage {
            to: to.to_string(),
            subject: "Confirm your RINL account".to_string(),
            body: format!(
                "Your account confirmation code is: {}\nEnter it on the sign-in page to activate your account.",
                code
            ),
        })
    }

    fn send_payment_challenge(&self, to: &str, code: &str, amount: u64) -> Result<(), NotifyError> {
        self.send(OutgoingMessage {
            to: to.to_string(),
            subject: "Confirm your vendor order payment".to_string(),
            body: format!(
                "Your one-time payment code is: {}\nIt authorizes a charge of Rs. {}.\nThis code will expire in 10 minutes.",
                code, amount
            ),
        })
    }
}

/// Keeps messages in memory. Used when no SMTP relay is configured.
#[derive(Default)]
pub struct Outbox {
    sent: Mutex<Vec<OutgoingMessage>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn last_to(&self, to: &str) -> Option<OutgoingMessage> {
        self.messages().into_iter().rev().find(|m| m.to == to)
    }
}

impl Notifier for Outbox {
    fn send(&self, message: OutgoingMessage) -> Result<(), NotifyError> {
        info!("queued '{}' for {}", message.subject, message.to);
        debug!("message body: {}", message.body);
        let mut sent = self.sent.lock().map_err(|_| NotifyError {
            to: message.to.clone(),
            reason: "outbox lock poisoned".to_string(),
        })?;
        sent.push(message);
        Ok(())
    }
}

#[cfg(feature = "web")]
pub struct Mailer {
    smtp: SmtpTransport,
    from: String,
}

#[cfg(feature = "web")]
impl Mailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());

        let tls_parameters = TlsParameters::new(config.host.clone())?;

        let smtp = SmtpTransport::relay(&config.host)?
            .credentials(creds)
            .port(config.port)
            .tls(Tls::Wrapper(tls_parameters))
            .build();

        Ok(Mailer {
            smtp,
            from: config.from.clone(),
        })
    }
}

#[cfg(feature = "web")]
impl Notifier for Mailer {
    fn send(&self, message: OutgoingMessage) -> Result<(), NotifyError> {
        let failed = |reason: String| NotifyError {
            to: message.to.clone(),
            reason,
        };

        let from = self.from.parse().map_err(|e| failed(format!("{}", e)))?;
        let to = message.to.parse().map_err(|e| failed(format!("{}", e)))?;
        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.clone())
            .body(message.body.clone())
            .map_err(|e| failed(e.to_string()))?;

        self.smtp.send(&email).map_err(|e| failed(e.to_string()))?;
        info!("sent '{}' to {}", message.subject, message.to);
        Ok(())
    }
}

/// Random code over `A-Z0-9`.
pub fn generate_code(len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();

    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Six-digit numeric code, never starting with zero.
pub fn generate_numeric_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_use_the_expected_alphabet() {
        let code = generate_code(8);
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

        let otp = generate_numeric_code();
        assert_eq!(otp.len(), 6);
        assert!(!otp.starts_with('0'));
    }

    #[test]
    fn outbox_keeps_the_latest_message_per_recipient() {
        let outbox = Outbox::new();
        outbox.send_email_confirmation("a@rinl.test", "FIRST123").unwrap();
        outbox.send_payment_challenge("b@rinl.test", "482913", 90000).unwrap();
        outbox.send_email_confirmation("a@rinl.test", "SECOND45").unwrap();

        assert_eq!(outbox.messages().len(), 3);
        let last = outbox.last_to("a@rinl.test").unwrap();
        assert!(last.body.contains("SECOND45"));
        let challenge = outbox.last_to("b@rinl.test").unwrap();
        assert!(challenge.body.contains("Rs. 90000"));
        assert!(outbox.last_to("c@rinl.test").is_none());
    }
}
