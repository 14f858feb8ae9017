mod common;

use common::code_in;
use plantops::checkout::{
    CartItem, Checkout, CheckoutError, PaymentForm, ProductSelection, Stage,
};
use plantops::error::AppError;
use plantops::mailer::{NotifyError, Notifier, OutgoingMessage, Outbox};
use plantops::payment::{PaymentError, SimulatedGateway};
use plantops::store::{Database, StoreError};
use plantops::vendor::{self, PaymentStatus};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const BUYER: &str = "buyer@rinl.test";

fn gateway() -> (Arc<Outbox>, SimulatedGateway) {
    let outbox = Arc::new(Outbox::new());
    let gateway = SimulatedGateway::new(outbox.clone(), Duration::from_secs(600));
    (outbox, gateway)
}

fn selection(product_id: &str, quantity: i64) -> CartItem {
    ProductSelection {
        product_id: product_id.to_string(),
        quantity,
        specifications: None,
        delivery_date: None,
    }
    .into_cart_item()
    .unwrap()
}

fn card() -> PaymentForm {
    PaymentForm {
        card_number: "4111 1111 1111 1111".to_string(),
        expiry_date: "12/28".to_string(),
        cvv: "123".to_string(),
        cardholder_name: "Ravi Kumar".to_string(),
    }
}

fn wrong_code(code: &str) -> &'static str {
    if code == "000000" { "111111" } else { "000000" }
}

/// A checkout waiting on the challenge for two tons of hot rolled coil.
fn at_otp(gateway: &SimulatedGateway, outbox: &Outbox) -> (Checkout, String) {
    let mut checkout = Checkout::new();
    checkout.add_to_cart(selection("1", 2)).unwrap();
    checkout.begin_checkout().unwrap();
    checkout.submit_payment(gateway, &card(), BUYER).unwrap();
    let code = code_in(&outbox.last_to(BUYER).unwrap().body);
    (checkout, code)
}

#[test]
fn correct_code_places_one_paid_order() {
    let db = Database::in_memory();
    let (outbox, gateway) = gateway();
    let user = Uuid::new_v4();
    let (mut checkout, code) = at_otp(&gateway, &outbox);

    let challenge = checkout.challenge().unwrap();
    assert_eq!(challenge.amount, 90_000);
    assert_eq!(challenge.card_last4, "1111");
    assert_eq!(challenge.delivered_to, "b****@rinl.test");
    assert!(!serde_json::to_string(&checkout.view()).unwrap().contains(&code));

    let receipt = checkout
        .verify_otp(&gateway, &code, |items, reference| {
            vendor::place_orders(&db, user, items, reference)
        })
        .unwrap()
        .clone();
    assert_eq!(receipt.total_amount, 90_000);
    assert_eq!(receipt.items, 1);
    assert_eq!(receipt.status, "Processing");

    assert_eq!(checkout.stage(), Stage::Success);
    assert!(checkout.cart().is_empty());
    assert_eq!(gateway.pending_count(), 0);

    let orders = vendor::order_history(&db, user).unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].product, "Hot Rolled Coils");
    assert_eq!(orders[0].total_amount, 90_000);
    assert_eq!(orders[0].payment_status, PaymentStatus::Paid);
    assert_eq!(orders[0].payment_reference, receipt.payment_reference);

    checkout.reset().unwrap();
    assert_eq!(checkout.stage(), Stage::Browsing);
    assert!(checkout.receipt().is_none());
}

#[test]
fn three_wrong_codes_return_to_payment() {
    let db = Database::in_memory();
    let (outbox, gateway) = gateway();
    let (mut checkout, code) = at_otp(&gateway, &outbox);
    let wrong = wrong_code(&code);
    let place = |items: &[CartItem], reference: &str| {
        vendor::place_orders(&db, Uuid::new_v4(), items, reference)
    };

    let err = checkout.verify_otp(&gateway, wrong, place).unwrap_err();
    assert_eq!(err.to_string(), "Invalid OTP. 2 attempts remaining.");
    let err = checkout.verify_otp(&gateway, wrong, place).unwrap_err();
    assert!(matches!(err, CheckoutError::InvalidOtp { remaining: 1 }));
    assert_eq!(checkout.otp_attempts(), 2);

    let err = checkout.verify_otp(&gateway, wrong, place).unwrap_err();
    assert!(matches!(err, CheckoutError::AttemptsExceeded));
    assert_eq!(checkout.stage(), Stage::Payment);
    assert_eq!(checkout.otp_attempts(), 0);
    assert_eq!(checkout.cart().total(), 90_000);
    assert_eq!(gateway.pending_count(), 0);

    // the voided challenge cannot be reused
    assert!(matches!(
        checkout.verify_otp(&gateway, &code, place).unwrap_err(),
        CheckoutError::WrongStage { .. }
    ));
    assert!(db.vendor_orders.is_empty().unwrap());
}

#[test]
fn correct_code_on_the_last_attempt_places_the_order() {
    let db = Database::in_memory();
    let (outbox, gateway) = gateway();
    let user = Uuid::new_v4();
    let (mut checkout, code) = at_otp(&gateway, &outbox);
    let wrong = wrong_code(&code);
    let place = |items: &[CartItem], reference: &str| {
        vendor::place_orders(&db, user, items, reference)
    };
    assert_eq!(checkout.view().attempts_remaining, 3);

    checkout.verify_otp(&gateway, wrong, place).unwrap_err();
    assert_eq!(checkout.view().attempts_remaining, 2);
    checkout.verify_otp(&gateway, wrong, place).unwrap_err();
    assert_eq!(checkout.view().attempts_remaining, 1);
    assert_eq!(checkout.stage(), Stage::OtpVerification);

    let receipt = checkout.verify_otp(&gateway, &code, place).unwrap().clone();
    assert_eq!(checkout.stage(), Stage::Success);
    assert_eq!(receipt.total_amount, 90_000);
    assert_eq!(gateway.pending_count(), 0);

    let orders = vendor::order_history(&db, user).unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].payment_status, PaymentStatus::Paid);
}

#[test]
fn correct_code_after_one_miss_places_the_order() {
    let db = Database::in_memory();
    let (outbox, gateway) = gateway();
    let user = Uuid::new_v4();
    let (mut checkout, code) = at_otp(&gateway, &outbox);

    checkout
        .verify_otp(&gateway, wrong_code(&code), |items, reference| {
            vendor::place_orders(&db, user, items, reference)
        })
        .unwrap_err();
    assert_eq!(checkout.view().attempts_remaining, 2);

    checkout
        .verify_otp(&gateway, &code, |items, reference| {
            vendor::place_orders(&db, user, items, reference)
        })
        .unwrap();
    assert_eq!(checkout.stage(), Stage::Success);
    assert_eq!(vendor::order_history(&db, user).unwrap().len(), 1);
}

#[test]
fn oversized_merge_keeps_the_cart() {
    let mut checkout = Checkout::new();
    checkout.add_to_cart(selection("1", i64::from(u32::MAX))).unwrap();

    let err = checkout
        .add_to_cart(selection("1", i64::from(u32::MAX)))
        .unwrap_err();
    assert_eq!(AppError::from(err).user_message(), "Quantity is too large");
    assert_eq!(checkout.cart().items().len(), 1);
    assert_eq!(checkout.cart().items()[0].quantity, u32::MAX);
    assert_eq!(checkout.stage(), Stage::Browsing);
}

#[test]
fn abandoned_checkout_voids_its_charge() {
    let (outbox, gateway) = gateway();
    let (mut checkout, _) = at_otp(&gateway, &outbox);
    assert_eq!(gateway.pending_count(), 1);

    checkout.abandon(&gateway);
    assert_eq!(gateway.pending_count(), 0);
    assert_eq!(checkout.stage(), Stage::Browsing);
    assert!(checkout.cart().is_empty());
}

#[test]
fn malformed_code_does_not_use_an_attempt() {
    let db = Database::in_memory();
    let (outbox, gateway) = gateway();
    let (mut checkout, _) = at_otp(&gateway, &outbox);

    let err = checkout
        .verify_otp(&gateway, "12ab", |items, reference| {
            vendor::place_orders(&db, Uuid::new_v4(), items, reference)
        })
        .unwrap_err();
    assert_eq!(err.to_string(), "Please enter a valid 6-digit OTP");
    assert_eq!(checkout.otp_attempts(), 0);
    assert_eq!(checkout.stage(), Stage::OtpVerification);
}

#[test]
fn failed_order_batch_voids_the_charge() {
    let (outbox, gateway) = gateway();
    let (mut checkout, code) = at_otp(&gateway, &outbox);

    let err = checkout
        .verify_otp(&gateway, &code, |_, _| {
            Err(StoreError::DuplicateKey {
                constraint: "vendor_orders_order_id_key",
            })
        })
        .unwrap_err();
    assert!(matches!(err, CheckoutError::OrderNotSaved(_)));
    assert_eq!(
        AppError::from(err).user_message(),
        "OTP verification failed. Please try again."
    );

    assert_eq!(checkout.stage(), Stage::Payment);
    assert!(checkout.challenge().is_none());
    assert_eq!(checkout.cart().items().len(), 1);
    assert_eq!(gateway.pending_count(), 0);
}

#[test]
fn expired_challenge_restarts_payment() {
    let db = Database::in_memory();
    let outbox = Arc::new(Outbox::new());
    let gateway = SimulatedGateway::new(outbox.clone(), Duration::ZERO);
    let (mut checkout, code) = at_otp(&gateway, &outbox);

    let err = checkout
        .verify_otp(&gateway, &code, |items, reference| {
            vendor::place_orders(&db, Uuid::new_v4(), items, reference)
        })
        .unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::Payment(PaymentError::ChallengeExpired(_))
    ));
    assert_eq!(
        AppError::from(err).user_message(),
        "The payment code has expired. Please restart the payment process."
    );
    assert_eq!(checkout.stage(), Stage::Payment);
    assert!(db.vendor_orders.is_empty().unwrap());
}

#[test]
fn cancelling_verification_voids_the_charge() {
    let (outbox, gateway) = gateway();
    let (mut checkout, _) = at_otp(&gateway, &outbox);
    assert_eq!(gateway.pending_count(), 1);

    checkout.cancel_otp(&gateway).unwrap();
    assert_eq!(checkout.stage(), Stage::Payment);
    assert_eq!(gateway.pending_count(), 0);

    checkout.cancel_payment().unwrap();
    assert_eq!(checkout.stage(), Stage::Browsing);
    assert_eq!(checkout.cart().items().len(), 1);
}

#[test]
fn cart_is_frozen_outside_browsing() {
    let (outbox, gateway) = gateway();
    let (mut checkout, _) = at_otp(&gateway, &outbox);

    assert!(matches!(
        checkout.add_to_cart(selection("2", 1)).unwrap_err(),
        CheckoutError::WrongStage { stage: Stage::OtpVerification, .. }
    ));
    assert!(checkout.buy_now(selection("2", 1)).is_err());
    assert!(checkout.reset().is_err());
}

struct Bouncing;

impl Notifier for Bouncing {
    fn send(&self, message: OutgoingMessage) -> Result<(), NotifyError> {
        Err(NotifyError {
            to: message.to,
            reason: "mailbox unavailable".to_string(),
        })
    }
}

#[test]
fn undeliverable_code_keeps_the_payment_form() {
    let gateway = SimulatedGateway::new(Arc::new(Bouncing), Duration::from_secs(600));
    let mut checkout = Checkout::new();
    checkout.buy_now(selection("6", 1)).unwrap();
    assert_eq!(checkout.stage(), Stage::Payment);

    let err = checkout.submit_payment(&gateway, &card(), BUYER).unwrap_err();
    let err = AppError::from(err);
    assert_eq!(err.status_code(), 502);
    assert_eq!(err.user_message(), "Payment processing failed. Please try again.");
    assert_eq!(checkout.stage(), Stage::Payment);
    assert_eq!(gateway.pending_count(), 0);
}
