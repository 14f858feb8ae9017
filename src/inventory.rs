#[cfg(feature = "web")]
use crate::app::SharedState;
#[cfg(feature = "web")]
use crate::auth::session_from_cookies;
#[cfg(feature = "web")]
use crate::downloader;
use crate::error::AppError;
use crate::store::{Database, Query, Record, StoreError};
#[cfg(feature = "web")]
use axum::{
    Json,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
#[cfg(feature = "web")]
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_MIN_THRESHOLD: i64 = 100;
pub const DEFAULT_MAX_THRESHOLD: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InventoryStatus {
    #[default]
    #[serde(rename = "In Stock")]
    InStock,
    #[serde(rename = "Low Stock")]
    LowStock,
    #[serde(rename = "Critical")]
    Critical,
}

impl InventoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryStatus::InStock => "In Stock",
            InventoryStatus::LowStock => "Low Stock",
            InventoryStatus::Critical => "Critical",
        }
    }
}

/// Row of the `inventory` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryItem {
    pub id: Uuid,
    pub item_id: String,
    pub name: String,
    pub category: String,
    pub quantity: u64,
    pub unit: String,
    pub status: InventoryStatus,
    pub min_threshold: u64,
    pub max_threshold: u64,
    pub location: Option<String>,
    pub supplier: Option<String>,
    pub cost_per_unit: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for InventoryItem {
    const TABLE: &'static str = "inventory";

    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![("inventory_item_id_key", self.item_id.clone())]
    }
}

fn default_unit() -> String {
    "tons".to_string()
}

/// The add-item form.
#[derive(Debug, Clone, Deserialize)]
pub struct NewInventoryItem {
    pub item_id: String,
    pub name: String,
    pub category: String,
    pub quantity: i64,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default)]
    pub status: InventoryStatus,
    #[serde(default)]
    pub min_threshold: Option<i64>,
    #[serde(default)]
    pub max_threshold: Option<i64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub supplier: Option<String>,
    #[serde(default)]
    pub cost_per_unit: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryUpdate {
    pub quantity: i64,
    pub status: InventoryStatus,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct InventorySummary {
    pub total: usize,
    pub in_stock: usize,
    pub low_stock: usize,
    pub critical: usize,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl NewInventoryItem {
    fn into_record(self) -> Result<InventoryItem, AppError> {
        let item_id = self.item_id.trim().to_string();
        if item_id.is_empty() {
            return Err(AppError::validation("Item ID is required"));
        }
        if self.name.trim().is_empty() {
            return Err(AppError::validation("Item name is required"));
        }
        if self.category.trim().is_empty() {
            return Err(AppError::validation("Category is required"));
        }
        if self.quantity < 0 {
            return Err(AppError::validation("Quantity cannot be negative"));
        }

        let min = self.min_threshold.unwrap_or(DEFAULT_MIN_THRESHOLD);
        let max = self.max_threshold.unwrap_or(DEFAULT_MAX_THRESHOLD);
        if min < 0 || max < 0 {
            return Err(AppError::validation("Thresholds cannot be negative"));
        }
        if min > max {
            return Err(AppError::validation(
                "Minimum threshold cannot exceed maximum threshold",
            ));
        }
        if self.cost_per_unit.is_some_and(|c| c < 0.0 || !c.is_finite()) {
            return Err(AppError::validation("Cost per unit cannot be negative"));
        }

        Ok(InventoryItem {
            id: Uuid::new_v4(),
            item_id,
            name: self.name.trim().to_string(),
            category: self.category.trim().to_string(),
            quantity: self.quantity as u64,
            unit: self.unit.trim().to_string(),
            status: self.status,
            min_threshold: min as u64,
            max_threshold: max as u64,
            location: non_empty(self.location),
            supplier: non_empty(self.supplier),
            cost_per_unit: self.cost_per_unit,
            created_at: Utc::now(),
            updated_at: None,
        })
    }
}

/// Every item, newest first.
pub fn list_items(db: &Database) -> Result<Vec<InventoryItem>, StoreError> {
    db.inventory.select(Query::new().newest_first())
}

pub fn summarize(items: &[InventoryItem]) -> InventorySummary {
    let count = |status: InventoryStatus| items.iter().filter(|i| i.status == status).count();
    InventorySummary {
        total: items.len(),
        in_stock: count(InventoryStatus::InStock),
        low_stock: count(InventoryStatus::LowStock),
        critical: count(InventoryStatus::Critical),
    }
}

pub fn add_item(db: &Database, form: NewInventoryItem) -> Result<InventoryItem, AppError> {
    let item = form.into_record()?;
    let item = db.inventory.insert(item).map_err(|e| {
        if e.is_duplicate_of("inventory_item_id_key") {
            AppError::Conflict("Item ID already exists. Please use a unique Item ID.".to_string())
        } else {
            AppError::Store(e)
        }
    })?;
    info!("added inventory item {}", item.item_id);
    Ok(item)
}

/// Set the quantity and status of one item.
pub fn update_item(db: &Database, id: Uuid, update: InventoryUpdate) -> Result<InventoryItem, AppError> {
    if update.quantity < 0 {
        return Err(AppError::validation("Quantity cannot be negative"));
    }
    let quantity = update.quantity as u64;

    let item = db
        .inventory
        .update(id, |item| {
            item.quantity = quantity;
            item.status = update.status;
            item.updated_at = Some(Utc::now());
        })
        .map_err(|e| match e {
            StoreError::NotFound { .. } => AppError::NotFound("Inventory item not found".to_string()),
            other => AppError::Store(other),
        })?;
    info!(
        "updated {}: quantity {} status {}",
        item.item_id,
        item.quantity,
        item.status.as_str()
    );
    Ok(item)
}

#[cfg(feature = "web")]
pub async fn handle_list(State(state): State<SharedState>) -> Result<Json<Vec<InventoryItem>>, AppError> {
    Ok(Json(list_items(&state.db)?))
}

#[cfg(feature = "web")]
pub async fn handle_summary(State(state): State<SharedState>) -> Result<Json<InventorySummary>, AppError> {
    let items = list_items(&state.db)?;
    Ok(Json(summarize(&items)))
}

#[cfg(feature = "web")]
pub async fn handle_add(
    State(state): State<SharedState>,
    jar: CookieJar,
    Json(form): Json<NewInventoryItem>,
) -> Result<Json<InventoryItem>, AppError> {
    session_from_cookies(&state.auth, &jar)
        .ok_or(AppError::LoginRequired("You must be logged in to add inventory items."))?;
    Ok(Json(add_item(&state.db, form)?))
}

#[cfg(feature = "web")]
pub async fn handle_update(
    State(state): State<SharedState>,
    jar: CookieJar,
    Path(id): Path<Uuid>,
    Json(update): Json<InventoryUpdate>,
) -> Result<Json<InventoryItem>, AppError> {
    session_from_cookies(&state.auth, &jar)
        .ok_or(AppError::LoginRequired("You must be logged in to update inventory."))?;
    Ok(Json(update_item(&state.db, id, update)?))
}

#[cfg(feature = "web")]
pub async fn handle_export_csv(State(state): State<SharedState>) -> Result<Response, AppError> {
    let items = list_items(&state.db)?;
    let csv = downloader::to_csv(&items);

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"inventory.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}

#[cfg(feature = "web")]
pub async fn handle_export_xlsx(State(state): State<SharedState>) -> Result<Response, AppError> {
    let items = list_items(&state.db)?;
    let xlsx = downloader::to_xlsx(&items)
        .map_err(|e| AppError::Internal(format!("xlsx export failed: {}", e)))?;

    Ok((
        [
            (
                header::CONTENT_TYPE,
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"inventory.xlsx\"",
            ),
        ],
        xlsx,
    )
        .into_response())
}
