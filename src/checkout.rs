//! Vendor checkout: cart assembly, card capture and challenge-code
//! confirmation.
//!
//! A [`Checkout`] belongs to one signed-in user and moves through
//! [`Stage::Browsing`] → [`Stage::Payment`] → [`Stage::OtpVerification`] →
//! [`Stage::Success`]. Orders are written only after the payment gateway
//! accepts the challenge code, and the caller supplies the function that
//! writes them so a failed write can put the flow back into payment with
//! the cart untouched.

use crate::catalog::{self, ORDER_UNIT};
use crate::payment::{ChargeRequest, PaymentChallenge, PaymentError, PaymentGateway};
use crate::store::StoreError;
use chrono::NaiveDate;
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

lazy_static! {
    static ref EXPIRY_REGEX: Regex = Regex::new(r"^\d{2}/\d{2}$").unwrap();
}

pub const MAX_OTP_ATTEMPTS: u32 = 3;
const CARD_DIGITS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Browsing,
    Payment,
    OtpVerification,
    Success,
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("{0}")]
    Validation(&'static str),

    #[error("cannot {action} while in {stage:?}")]
    WrongStage { action: &'static str, stage: Stage },

    #[error("no cart line at index {0}")]
    LineNotFound(usize),

    #[error("unknown product {0}")]
    UnknownProduct(String),

    #[error("Invalid OTP. {remaining} attempts remaining.")]
    InvalidOtp { remaining: u32 },

    #[error("Maximum OTP attempts exceeded. Please restart the payment process.")]
    AttemptsExceeded,

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("orders could not be saved: {0}")]
    OrderNotSaved(#[source] StoreError),
}

/// One line of the cart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartItem {
    pub product_id: String,
    pub name: String,
    pub price: u64,
    pub quantity: u32,
    pub unit: String,
    pub specifications: String,
    pub delivery_date: Option<NaiveDate>,
}

impl CartItem {
    pub fn line_total(&self) -> u64 {
        self.price * u64::from(self.quantity)
    }

    fn same_line(&self, other: &CartItem) -> bool {
        self.product_id == other.product_id
            && self.specifications == other.specifications
            && self.delivery_date == other.delivery_date
    }
}

/// Product selection from the add-to-cart or buy-now dialog.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductSelection {
    #[serde(alias = "productId")]
    pub product_id: String,
    pub quantity: i64,
    #[serde(default)]
    pub specifications: Option<String>,
    #[serde(default, alias = "deliveryDate")]
    pub delivery_date: Option<NaiveDate>,
}

impl ProductSelection {
    /// Price the selection from the catalog.
    pub fn into_cart_item(self) -> Result<CartItem, CheckoutError> {
        if self.quantity <= 0 {
            return Err(CheckoutError::Validation("Quantity must be greater than 0"));
        }
        let quantity = u32::try_from(self.quantity)
            .map_err(|_| CheckoutError::Validation("Quantity is too large"))?;
        let product = catalog::find_product(&self.product_id)
            .ok_or_else(|| CheckoutError::UnknownProduct(self.product_id.clone()))?;

        Ok(CartItem {
            product_id: product.id.to_string(),
            name: product.name.to_string(),
            price: product.price,
            quantity,
            unit: ORDER_UNIT.to_string(),
            specifications: self.specifications.unwrap_or_default().trim().to_string(),
            delivery_date: self.delivery_date,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    /// Add a line, merging it into an existing line for the same product,
    /// specifications and delivery date. A merge that would overflow the
    /// line quantity leaves the cart unchanged.
    pub fn add(&mut self, item: CartItem) -> Result<(), CheckoutError> {
        match self.items.iter_mut().find(|existing| existing.same_line(&item)) {
            Some(existing) => {
                existing.quantity = existing
                    .quantity
                    .checked_add(item.quantity)
                    .ok_or(CheckoutError::Validation("Quantity is too large"))?;
            }
            None => self.items.push(item),
        }
        Ok(())
    }

    /// Set a line's quantity; zero or less removes the line.
    pub fn set_quantity(&mut self, index: usize, quantity: i64) -> Result<(), CheckoutError> {
        if index >= self.items.len() {
            return Err(CheckoutError::LineNotFound(index));
        }
        if quantity <= 0 {
            self.items.remove(index);
            return Ok(());
        }
        self.items[index].quantity = u32::try_from(quantity)
            .map_err(|_| CheckoutError::Validation("Quantity is too large"))?;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<CartItem, CheckoutError> {
        if index >= self.items.len() {
            return Err(CheckoutError::LineNotFound(index));
        }
        Ok(self.items.remove(index))
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn total(&self) -> u64 {
        self.items.iter().map(CartItem::line_total).sum()
    }

    pub fn item_count(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity)).sum()
    }
}

/// Card details as typed into the payment form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentForm {
    #[serde(alias = "cardNumber")]
    pub card_number: String,
    #[serde(alias = "expiryDate")]
    pub expiry_date: String,
    pub cvv: String,
    #[serde(alias = "cardholderName")]
    pub cardholder_name: String,
}

/// A payment form that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidCard {
    pub last4: String,
    pub cardholder_name: String,
}

impl PaymentForm {
    pub fn validate(&self) -> Result<ValidCard, CheckoutError> {
        let digits: String = self.card_number.chars().filter(|c| !c.is_whitespace()).collect();
        if digits.len() != CARD_DIGITS || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(CheckoutError::Validation(
                "Please enter a valid 16-digit card number",
            ));
        }
        if !EXPIRY_REGEX.is_match(self.expiry_date.trim()) {
            return Err(CheckoutError::Validation(
                "Please enter expiry date in MM/YY format",
            ));
        }
        let cvv = self.cvv.trim();
        if !(3..=4).contains(&cvv.len()) || !cvv.chars().all(|c| c.is_ascii_digit()) {
            return Err(CheckoutError::Validation(
                "Please enter a valid CVV (3-4 digits)",
            ));
        }
        if self.cardholder_name.trim().is_empty() {
            return Err(CheckoutError::Validation("Please enter cardholder name"));
        }

        Ok(ValidCard {
            last4: digits[CARD_DIGITS - 4..].to_string(),
            cardholder_name: self.cardholder_name.trim().to_string(),
        })
    }
}

/// Group card digits in blocks of four, keeping at most sixteen digits.
/// Fewer than four digits come back unchanged.
pub fn format_card_number(value: &str) -> String {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return digits;
    }
    let digits = &digits[..digits.len().min(CARD_DIGITS)];
    digits
        .as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `1226` → `12/26`
pub fn format_expiry_date(value: &str) -> String {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 2 {
        return digits;
    }
    let end = digits.len().min(4);
    format!("{}/{}", &digits[..2], &digits[2..end])
}

/// A challenge code must be exactly six digits. A malformed code does not
/// count as an attempt.
pub fn check_otp_format(code: &str) -> Result<(), CheckoutError> {
    let code = code.trim();
    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(CheckoutError::Validation("Please enter a valid 6-digit OTP"));
    }
    Ok(())
}

/// What the buyer sees after a successful checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderReceipt {
    pub order_id: String,
    pub order_ids: Vec<String>,
    pub items: usize,
    pub total_amount: u64,
    pub status: String,
    pub payment_reference: String,
    pub estimated_delivery: NaiveDate,
}

/// Serializable snapshot of a checkout for the client.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutView {
    pub stage: Stage,
    pub items: Vec<CartItem>,
    pub total: u64,
    pub item_count: u64,
    pub otp_attempts: u32,
    pub attempts_remaining: u32,
    pub challenge: Option<PaymentChallenge>,
    pub receipt: Option<OrderReceipt>,
}

/// Per-user checkout state machine.
#[derive(Debug, Clone)]
pub struct Checkout {
    stage: Stage,
    cart: Cart,
    otp_attempts: u32,
    challenge: Option<PaymentChallenge>,
    receipt: Option<OrderReceipt>,
}

impl Default for Checkout {
    fn default() -> Self {
        Self::new()
    }
}

impl Checkout {
    pub fn new() -> Self {
        Checkout {
            stage: Stage::Browsing,
            cart: Cart::default(),
            otp_attempts: 0,
            challenge: None,
            receipt: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn otp_attempts(&self) -> u32 {
        self.otp_attempts
    }

    pub fn challenge(&self) -> Option<&PaymentChallenge> {
        self.challenge.as_ref()
    }

    pub fn receipt(&self) -> Option<&OrderReceipt> {
        self.receipt.as_ref()
    }

    pub fn view(&self) -> CheckoutView {
        CheckoutView {
            stage: self.stage,
            items: self.cart.items().to_vec(),
            total: self.cart.total(),
            item_count: self.cart.item_count(),
            otp_attempts: self.otp_attempts,
            attempts_remaining: MAX_OTP_ATTEMPTS - self.otp_attempts,
            challenge: self.challenge.clone(),
            receipt: self.receipt.clone(),
        }
    }

    fn expect_stage(&self, expected: Stage, action: &'static str) -> Result<(), CheckoutError> {
        if self.stage != expected {
            return Err(CheckoutError::WrongStage {
                action,
                stage: self.stage,
            });
        }
        Ok(())
    }

    pub fn add_to_cart(&mut self, item: CartItem) -> Result<(), CheckoutError> {
        self.expect_stage(Stage::Browsing, "change the cart")?;
        self.cart.add(item)
    }

    pub fn update_quantity(&mut self, index: usize, quantity: i64) -> Result<(), CheckoutError> {
        self.expect_stage(Stage::Browsing, "change the cart")?;
        self.cart.set_quantity(index, quantity)
    }

    pub fn remove_line(&mut self, index: usize) -> Result<CartItem, CheckoutError> {
        self.expect_stage(Stage::Browsing, "change the cart")?;
        self.cart.remove(index)
    }

    /// Replace the cart with a single line and go straight to payment.
    pub fn buy_now(&mut self, item: CartItem) -> Result<(), CheckoutError> {
        self.expect_stage(Stage::Browsing, "buy now")?;
        self.cart.clear();
        self.cart.add(item)?;
        self.stage = Stage::Payment;
        Ok(())
    }

    pub fn begin_checkout(&mut self) -> Result<(), CheckoutError> {
        self.expect_stage(Stage::Browsing, "check out")?;
        if self.cart.is_empty() {
            return Err(CheckoutError::Validation("Your cart is empty"));
        }
        self.stage = Stage::Payment;
        Ok(())
    }

    /// Authorize the cart total and wait for the challenge code.
    pub fn submit_payment(
        &mut self,
        gateway: &dyn PaymentGateway,
        form: &PaymentForm,
        notify_email: &str,
    ) -> Result<&PaymentChallenge, CheckoutError> {
        self.expect_stage(Stage::Payment, "submit payment")?;
        let card = form.validate()?;

        let challenge = gateway.authorize(&ChargeRequest {
            amount: self.cart.total(),
            card_last4: card.last4,
            cardholder_name: card.cardholder_name,
            notify_email: notify_email.to_string(),
        })?;

        self.otp_attempts = 0;
        self.stage = Stage::OtpVerification;
        Ok(self.challenge.insert(challenge))
    }

    /// Leave the payment form. The cart is kept.
    pub fn cancel_payment(&mut self) -> Result<(), CheckoutError> {
        self.expect_stage(Stage::Payment, "cancel payment")?;
        self.stage = Stage::Browsing;
        Ok(())
    }

    /// Check a challenge code. On a match `place_orders` writes the cart
    /// and its receipt becomes the result.
    pub fn verify_otp<F>(
        &mut self,
        gateway: &dyn PaymentGateway,
        code: &str,
        place_orders: F,
    ) -> Result<&OrderReceipt, CheckoutError>
    where
        F: FnOnce(&[CartItem], &str) -> Result<OrderReceipt, StoreError>,
    {
        self.expect_stage(Stage::OtpVerification, "verify a payment code")?;
        let code = code.trim();
        check_otp_format(code)?;
        let reference = match &self.challenge {
            Some(challenge) => challenge.reference.clone(),
            None => {
                self.back_to_payment(gateway);
                return Err(CheckoutError::WrongStage {
                    action: "verify a payment code",
                    stage: Stage::Payment,
                });
            }
        };

        match gateway.confirm(&reference, code) {
            Err(e) => {
                warn!("challenge {} rejected: {}", reference, e);
                self.back_to_payment(gateway);
                Err(e.into())
            }
            Ok(false) => {
                self.otp_attempts += 1;
                if self.otp_attempts >= MAX_OTP_ATTEMPTS {
                    info!("challenge {} exhausted its attempts", reference);
                    self.back_to_payment(gateway);
                    return Err(CheckoutError::AttemptsExceeded);
                }
                Err(CheckoutError::InvalidOtp {
                    remaining: MAX_OTP_ATTEMPTS - self.otp_attempts,
                })
            }
            Ok(true) => match place_orders(self.cart.items(), &reference) {
                Ok(receipt) => {
                    self.cart.clear();
                    self.challenge = None;
                    self.otp_attempts = 0;
                    self.stage = Stage::Success;
                    Ok(self.receipt.insert(receipt))
                }
                Err(e) => {
                    warn!("orders for {} not saved, reversing charge: {}", reference, e);
                    self.back_to_payment(gateway);
                    Err(CheckoutError::OrderNotSaved(e))
                }
            },
        }
    }

    /// Abandon the challenge and return to the payment form.
    pub fn cancel_otp(&mut self, gateway: &dyn PaymentGateway) -> Result<(), CheckoutError> {
        self.expect_stage(Stage::OtpVerification, "cancel verification")?;
        self.back_to_payment(gateway);
        Ok(())
    }

    /// Continue shopping after a completed order.
    pub fn reset(&mut self) -> Result<(), CheckoutError> {
        self.expect_stage(Stage::Success, "start a new order")?;
        self.receipt = None;
        self.stage = Stage::Browsing;
        Ok(())
    }

    /// Drop the checkout when its owner leaves, voiding any pending charge.
    pub fn abandon(&mut self, gateway: &dyn PaymentGateway) {
        if let Some(challenge) = self.challenge.take() {
            info!("abandoning challenge {}", challenge.reference);
            gateway.void(&challenge.reference);
        }
        *self = Checkout::new();
    }

    fn back_to_payment(&mut self, gateway: &dyn PaymentGateway) {
        if let Some(challenge) = self.challenge.take() {
            gateway.void(&challenge.reference);
        }
        self.otp_attempts = 0;
        self.stage = Stage::Payment;
    }
}
