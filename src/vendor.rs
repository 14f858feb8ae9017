//! Vendor orders and the HTTP side of checkout.

#[cfg(feature = "web")]
use crate::app::{AppState, SharedState};
#[cfg(feature = "web")]
use crate::auth::CurrentSession;
use crate::checkout::{CartItem, OrderReceipt};
#[cfg(feature = "web")]
use crate::checkout::{Checkout, CheckoutView, PaymentForm, ProductSelection, check_otp_format};
#[cfg(feature = "web")]
use crate::error::AppError;
use crate::payment::{GatewayEvent, GatewayEventKind};
#[cfg(feature = "web")]
use crate::payment::{SIGNATURE_HEADER, verify_signature};
use crate::store::{Database, Query, Record, StoreError};
#[cfg(feature = "web")]
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

const DELIVERY_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Processing,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Paid,
    Refunded,
    Failed,
}

/// Row of the `vendor_orders` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VendorOrder {
    pub id: Uuid,
    pub order_id: String,
    pub product: String,
    pub quantity: u32,
    pub unit: String,
    pub unit_price: u64,
    pub total_amount: u64,
    pub specifications: Option<String>,
    pub delivery_date: Option<NaiveDate>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_reference: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Record for VendorOrder {
    const TABLE: &'static str = "vendor_orders";

    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![("vendor_orders_order_id_key", self.order_id.clone())]
    }
}

/// One order row per cart line, ids `ORD<millis>-<product>` with a numeric
/// suffix when the same product appears on more than one line.
pub fn build_orders(
    user_id: Uuid,
    items: &[CartItem],
    payment_reference: &str,
    now: DateTime<Utc>,
) -> Vec<VendorOrder> {
    let stamp = now.timestamp_millis();
    let mut seen: HashMap<&str, u32> = HashMap::new();

    items
        .iter()
        .map(|item| {
            let n = seen.entry(item.product_id.as_str()).or_insert(0);
            *n += 1;
            let order_id = match *n {
                1 => format!("ORD{}-{}", stamp, item.product_id),
                n => format!("ORD{}-{}-{}", stamp, item.product_id, n),
            };

            VendorOrder {
                id: Uuid::new_v4(),
                order_id,
                product: item.name.clone(),
                quantity: item.quantity,
                unit: item.unit.clone(),
                unit_price: item.price,
                total_amount: item.line_total(),
                specifications: Some(item.specifications.clone()).filter(|s| !s.is_empty()),
                delivery_date: item.delivery_date,
                status: OrderStatus::Processing,
                payment_status: PaymentStatus::Paid,
                payment_reference: payment_reference.to_string(),
                user_id,
                created_at: now,
            }
        })
        .collect()
}

/// Write every line of a paid cart in one batch and build the receipt.
pub fn place_orders(
    db: &Database,
    user_id: Uuid,
    items: &[CartItem],
    payment_reference: &str,
) -> Result<OrderReceipt, StoreError> {
    let now = Utc::now();
    let orders = db
        .vendor_orders
        .insert_all(build_orders(user_id, items, payment_reference, now))?;

    let receipt = OrderReceipt {
        order_id: format!("ORD{}", now.timestamp_millis()),
        order_ids: orders.iter().map(|o| o.order_id.clone()).collect(),
        items: orders.len(),
        total_amount: orders.iter().map(|o| o.total_amount).sum(),
        status: "Processing".to_string(),
        payment_reference: payment_reference.to_string(),
        estimated_delivery: now.date_naive() + Duration::days(DELIVERY_DAYS),
    };
    info!(
        "placed {} orders for Rs. {} under {}",
        receipt.items, receipt.total_amount, payment_reference
    );
    Ok(receipt)
}

/// A user's orders, newest first.
pub fn order_history(db: &Database, user_id: Uuid) -> Result<Vec<VendorOrder>, StoreError> {
    db.vendor_orders
        .select(Query::new().filter(move |o: &VendorOrder| o.user_id == user_id).newest_first())
}

/// Apply a settlement event to every order paid under its reference.
pub fn apply_payment_event(db: &Database, event: &GatewayEvent) -> Result<usize, StoreError> {
    let payment_status = match event.event {
        GatewayEventKind::Refunded => PaymentStatus::Refunded,
        GatewayEventKind::Failed => PaymentStatus::Failed,
    };
    let reference = event.reference.clone();
    let touched = db.vendor_orders.update_where(
        |o| o.payment_reference == reference,
        |o| {
            o.payment_status = payment_status;
            o.status = OrderStatus::Cancelled;
        },
    )?;

    if touched == 0 {
        warn!("payment event for unknown reference {}", event.reference);
    } else {
        info!(
            "marked {} orders {:?} for {}",
            touched, payment_status, event.reference
        );
    }
    Ok(touched)
}

#[cfg(feature = "web")]
#[derive(Debug, Deserialize)]
pub struct QuantityChange {
    pub quantity: i64,
}

#[cfg(feature = "web")]
#[derive(Debug, Deserialize)]
pub struct OtpForm {
    pub otp: String,
}

/// Run `f` against the caller's checkout, creating it on first use. Only
/// that user's checkout is locked while `f` runs.
#[cfg(feature = "web")]
fn with_checkout<T>(
    state: &AppState,
    user_id: Uuid,
    f: impl FnOnce(&mut Checkout) -> Result<T, AppError>,
) -> Result<T, AppError> {
    let checkout = state.checkout_for(user_id);
    let mut checkout = checkout
        .lock()
        .map_err(|_| AppError::Internal("checkout lock poisoned".to_string()))?;
    f(&mut checkout)
}

/// [`with_checkout`] on the blocking pool, for steps that mail a code or
/// write orders.
#[cfg(feature = "web")]
async fn with_checkout_blocking<T, F>(
    state: &SharedState,
    user_id: Uuid,
    f: F,
) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&AppState, &mut Checkout) -> Result<T, AppError> + Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || with_checkout(&state, user_id, |c| f(&state, c)))
        .await
        .map_err(|e| AppError::Internal(format!("checkout task failed: {}", e)))?
}

#[cfg(feature = "web")]
pub async fn handle_view(
    State(state): State<SharedState>,
    session: CurrentSession,
) -> Result<Json<CheckoutView>, AppError> {
    with_checkout(&state, session.user_id, |c| Ok(Json(c.view())))
}

#[cfg(feature = "web")]
pub async fn handle_add_to_cart(
    State(state): State<SharedState>,
    session: CurrentSession,
    Json(selection): Json<ProductSelection>,
) -> Result<Json<CheckoutView>, AppError> {
    let item = selection.into_cart_item()?;
    with_checkout(&state, session.user_id, |c| {
        c.add_to_cart(item)?;
        Ok(Json(c.view()))
    })
}

#[cfg(feature = "web")]
pub async fn handle_update_line(
    State(state): State<SharedState>,
    session: CurrentSession,
    Path(index): Path<usize>,
    Json(change): Json<QuantityChange>,
) -> Result<Json<CheckoutView>, AppError> {
    with_checkout(&state, session.user_id, |c| {
        c.update_quantity(index, change.quantity)?;
        Ok(Json(c.view()))
    })
}

#[cfg(feature = "web")]
pub async fn handle_remove_line(
    State(state): State<SharedState>,
    session: CurrentSession,
    Path(index): Path<usize>,
) -> Result<Json<CheckoutView>, AppError> {
    with_checkout(&state, session.user_id, |c| {
        c.remove_line(index)?;
        Ok(Json(c.view()))
    })
}

#[cfg(feature = "web")]
pub async fn handle_buy_now(
    State(state): State<SharedState>,
    session: CurrentSession,
    Json(selection): Json<ProductSelection>,
) -> Result<Json<CheckoutView>, AppError> {
    let item = selection.into_cart_item()?;
    with_checkout(&state, session.user_id, |c| {
        c.buy_now(item)?;
        Ok(Json(c.view()))
    })
}

#[cfg(feature = "web")]
pub async fn handle_begin(
    State(state): State<SharedState>,
    session: CurrentSession,
) -> Result<Json<CheckoutView>, AppError> {
    with_checkout(&state, session.user_id, |c| {
        c.begin_checkout()?;
        Ok(Json(c.view()))
    })
}

#[cfg(feature = "web")]
pub async fn handle_payment(
    State(state): State<SharedState>,
    session: CurrentSession,
    Json(form): Json<PaymentForm>,
) -> Result<Json<CheckoutView>, AppError> {
    form.validate()?;
    tokio::time::sleep(state.config.payment_delay).await;

    let email = session.email.clone();
    with_checkout_blocking(&state, session.user_id, move |state, c| {
        c.submit_payment(state.gateway.as_ref(), &form, &email)?;
        Ok(Json(c.view()))
    })
    .await
}

#[cfg(feature = "web")]
pub async fn handle_cancel_payment(
    State(state): State<SharedState>,
    session: CurrentSession,
) -> Result<Json<CheckoutView>, AppError> {
    with_checkout(&state, session.user_id, |c| {
        c.cancel_payment()?;
        Ok(Json(c.view()))
    })
}

#[cfg(feature = "web")]
pub async fn handle_verify_otp(
    State(state): State<SharedState>,
    session: CurrentSession,
    Json(form): Json<OtpForm>,
) -> Result<Json<CheckoutView>, AppError> {
    check_otp_format(&form.otp)?;
    tokio::time::sleep(state.config.otp_delay).await;

    let user_id = session.user_id;
    with_checkout_blocking(&state, user_id, move |state, c| {
        c.verify_otp(state.gateway.as_ref(), &form.otp, |items, reference| {
            place_orders(&state.db, user_id, items, reference)
        })?;
        Ok(Json(c.view()))
    })
    .await
}

#[cfg(feature = "web")]
pub async fn handle_cancel_otp(
    State(state): State<SharedState>,
    session: CurrentSession,
) -> Result<Json<CheckoutView>, AppError> {
    with_checkout(&state, session.user_id, |c| {
        c.cancel_otp(state.gateway.as_ref())?;
        Ok(Json(c.view()))
    })
}

#[cfg(feature = "web")]
pub async fn handle_reset(
    State(state): State<SharedState>,
    session: CurrentSession,
) -> Result<Json<CheckoutView>, AppError> {
    with_checkout(&state, session.user_id, |c| {
        c.reset()?;
        Ok(Json(c.view()))
    })
}

#[cfg(feature = "web")]
pub async fn handle_orders(
    State(state): State<SharedState>,
    session: CurrentSession,
) -> Result<Json<Vec<VendorOrder>>, AppError> {
    Ok(Json(order_history(&state.db, session.user_id)?))
}

#[cfg(feature = "web")]
pub async fn handle_webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let secret = state
        .config
        .webhook_secret
        .as_deref()
        .ok_or_else(|| AppError::Unavailable("Payment webhooks are not configured".to_string()))?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::BadSignature)?;
    if !verify_signature(secret, &body, signature) {
        warn!("rejected webhook with bad signature");
        return Err(AppError::BadSignature);
    }

    let event: GatewayEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::validation(format!("Malformed payment event: {}", e)))?;
    let updated = apply_payment_event(&state.db, &event)?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;

    fn line(product_id: &str, quantity: u32, specs: &str) -> CartItem {
        let p = catalog::find_product(product_id).unwrap();
        CartItem {
            product_id: p.id.to_string(),
            name: p.name.to_string(),
            price: p.price,
            quantity,
            unit: catalog::ORDER_UNIT.to_string(),
            specifications: specs.to_string(),
            delivery_date: None,
        }
    }

    #[test]
    fn repeated_products_get_distinct_ids() {
        let now = Utc::now();
        let orders = build_orders(
            Uuid::nil(),
            &[line("1", 1, "A"), line("2", 1, ""), line("1", 2, "B")],
            "pay_x",
            now,
        );
        let stamp = now.timestamp_millis();

        assert_eq!(orders[0].order_id, format!("ORD{}-1", stamp));
        assert_eq!(orders[1].order_id, format!("ORD{}-2", stamp));
        assert_eq!(orders[2].order_id, format!("ORD{}-1-2", stamp));
        assert_eq!(orders[1].specifications, None);
        assert_eq!(orders[2].total_amount, 90_000);
    }
}
