//! Payment gateway seam.
//!
//! Checkout talks to a [`PaymentGateway`]: `authorize` reserves the amount
//! and sends a one-time challenge code to the customer out of band,
//! `confirm` checks the code the customer typed, and `void` releases an
//! authorization that will not be captured. The code never travels back
//! through the API.
//!
//! [`SimulatedGateway`] implements the trait in-process and delivers codes
//! through a [`Notifier`]. Settlement events from a real gateway arrive on
//! the webhook, authenticated with an HMAC-SHA256 signature.

use crate::mailer::{Notifier, NotifyError, generate_numeric_code};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC of a webhook body.
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment declined: {0}")]
    Declined(String),

    #[error("unknown payment reference {0}")]
    UnknownReference(String),

    #[error("challenge for {0} has expired")]
    ChallengeExpired(String),

    #[error("could not deliver challenge code: {0}")]
    Delivery(#[from] NotifyError),
}

impl PaymentError {
    pub fn user_message(&self) -> &'static str {
        match self {
            PaymentError::Declined(_) => "Your card was declined. Please try another card.",
            PaymentError::ChallengeExpired(_) | PaymentError::UnknownReference(_) => {
                "The payment code has expired. Please restart the payment process."
            }
            PaymentError::Delivery(_) => "Payment processing failed. Please try again.",
        }
    }
}

/// What the gateway needs to authorize a charge.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub amount: u64,
    pub card_last4: String,
    pub cardholder_name: String,
    /// Where the challenge code goes.
    pub notify_email: String,
}

/// A pending authorization awaiting its challenge code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentChallenge {
    pub reference: String,
    pub amount: u64,
    pub card_last4: String,
    pub delivered_to: String,
    pub expires_at: DateTime<Utc>,
}

pub trait PaymentGateway: Send + Sync {
    fn authorize(&self, request: &ChargeRequest) -> Result<PaymentChallenge, PaymentError>;

    /// Ok(true) captures the charge; Ok(false) means the code did not match.
    fn confirm(&self, reference: &str, code: &str) -> Result<bool, PaymentError>;

    fn void(&self, reference: &str);

    /// Release authorizations whose challenge has expired. Returns how many
    /// were released.
    fn sweep_expired(&self) -> usize {
        0
    }
}

struct PendingCharge {
    code: String,
    amount: u64,
    expires_at: DateTime<Utc>,
}

/// In-process gateway for development and tests.
pub struct SimulatedGateway {
    notifier: Arc<dyn Notifier>,
    pending: Mutex<HashMap<String, PendingCharge>>,
    ttl: Duration,
}

impl SimulatedGateway {
    pub fn new(notifier: Arc<dyn Notifier>, ttl: Duration) -> Self {
        SimulatedGateway {
            notifier,
            pending: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl PaymentGateway for SimulatedGateway {
    fn authorize(&self, request: &ChargeRequest) -> Result<PaymentChallenge, PaymentError> {
        if request.amount == 0 {
            return Err(PaymentError::Declined("amount must be positive".to_string()));
        }

        let reference = format!("pay_{}", Uuid::new_v4().simple());
        let code = generate_numeric_code();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::minutes(10));
        let expires_at = Utc::now() + ttl;

        self.notifier
            .send_payment_challenge(&request.notify_email, &code, request.amount)?;

        self.sweep_expired();
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).insert(
            reference.clone(),
            PendingCharge {
                code,
                amount: request.amount,
                expires_at,
            },
        );
        info!(
            "authorized {} for Rs. {} on card ending {}",
            reference, request.amount, request.card_last4
        );

        Ok(PaymentChallenge {
            reference,
            amount: request.amount,
            card_last4: request.card_last4.clone(),
            delivered_to: mask_email(&request.notify_email),
            expires_at,
        })
    }

    fn confirm(&self, reference: &str, code: &str) -> Result<bool, PaymentError> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let charge = pending
            .get(reference)
            .ok_or_else(|| PaymentError::UnknownReference(reference.to_string()))?;

        if charge.expires_at <= Utc::now() {
            pending.remove(reference);
            return Err(PaymentError::ChallengeExpired(reference.to_string()));
        }
        if charge.code != code {
            return Ok(false);
        }

        if let Some(captured) = pending.remove(reference) {
            info!("captured {} for Rs. {}", reference, captured.amount);
        }
        Ok(true)
    }

    fn void(&self, reference: &str) {
        if self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(reference)
            .is_some()
        {
            info!("voided {}", reference);
        }
    }

    fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let before = pending.len();
        pending.retain(|_, charge| charge.expires_at > now);
        let released = before - pending.len();
        if released > 0 {
            info!("released {} expired authorizations", released);
        }
        released
    }
}

/// `someone@example.com` → `s******@example.com`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first: String = local.chars().take(1).collect();
            format!("{}{}@{}", first, "*".repeat(local.chars().count() - 1), domain)
        }
        _ => email.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayEventKind {
    #[serde(rename = "charge.refunded")]
    Refunded,
    #[serde(rename = "charge.failed")]
    Failed,
}

/// Settlement notification posted by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub event: GatewayEventKind,
    pub reference: String,
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a webhook signature.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        warn!("webhook signature is not valid hex");
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::Outbox;

    fn gateway() -> (Arc<Outbox>, SimulatedGateway) {
        let outbox = Arc::new(Outbox::new());
        let gateway = SimulatedGateway::new(outbox.clone(), Duration::from_secs(600));
        (outbox, gateway)
    }

    fn request(amount: u64) -> ChargeRequest {
        ChargeRequest {
            amount,
            card_last4: "3456".to_string(),
            cardholder_name: "Test Buyer".to_string(),
            notify_email: "buyer@rinl.test".to_string(),
        }
    }

    fn code_from(outbox: &Outbox) -> String {
        let body = outbox.last_to("buyer@rinl.test").unwrap().body;
        body.split_whitespace()
            .find(|w| w.len() == 6 && w.chars().all(|c| c.is_ascii_digit()))
            .unwrap()
            .to_string()
    }

    #[test]
    fn challenge_code_is_mailed_not_returned() {
        let (outbox, gateway) = gateway();
        let challenge = gateway.authorize(&request(90_000)).unwrap();

        let code = code_from(&outbox);
        let json = serde_json::to_string(&challenge).unwrap();
        assert!(!json.contains(&code));
        assert_eq!(challenge.delivered_to, "b****@rinl.test");
        assert_eq!(gateway.pending_count(), 1);
    }

    #[test]
    fn wrong_code_keeps_charge_pending() {
        let (outbox, gateway) = gateway();
        let challenge = gateway.authorize(&request(1000)).unwrap();
        let code = code_from(&outbox);
        let wrong = if code == "123456" { "654321" } else { "123456" };

        assert!(!gateway.confirm(&challenge.reference, wrong).unwrap());
        assert!(gateway.confirm(&challenge.reference, &code).unwrap());
        assert_eq!(gateway.pending_count(), 0);
    }

    #[test]
    fn voided_charge_cannot_be_confirmed() {
        let (outbox, gateway) = gateway();
        let challenge = gateway.authorize(&request(1000)).unwrap();
        let code = code_from(&outbox);

        gateway.void(&challenge.reference);
        assert!(matches!(
            gateway.confirm(&challenge.reference, &code),
            Err(PaymentError::UnknownReference(_))
        ));
    }

    #[test]
    fn expired_authorizations_are_released() {
        let outbox = Arc::new(Outbox::new());
        let gateway = SimulatedGateway::new(outbox, Duration::ZERO);
        gateway.authorize(&request(1000)).unwrap();
        gateway.authorize(&request(2000)).unwrap();
        // each authorize sweeps the ones before it
        assert_eq!(gateway.pending_count(), 1);

        assert_eq!(gateway.sweep_expired(), 1);
        assert_eq!(gateway.pending_count(), 0);
    }

    #[test]
    fn zero_amount_is_declined() {
        let (_, gateway) = gateway();
        assert!(matches!(
            gateway.authorize(&request(0)),
            Err(PaymentError::Declined(_))
        ));
    }

    #[test]
    fn webhook_signature_round_trip() {
        let body = br#"{"event":"charge.refunded","reference":"pay_1"}"#;
        let sig = sign_payload("whsec", body);

        assert!(verify_signature("whsec", body, &sig));
        assert!(!verify_signature("other", body, &sig));
        assert!(!verify_signature("whsec", b"{}", &sig));
        assert!(!verify_signature("whsec", body, "not-hex"));
    }
}
