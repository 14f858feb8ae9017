//! Material requests: submission, tracking and the approval workflow.

#[cfg(feature = "web")]
use crate::app::SharedState;
use crate::auth::Role;
#[cfg(feature = "web")]
use crate::auth::CurrentSession;
use crate::error::AppError;
use crate::store::{Database, Query, Record, StoreError};
#[cfg(feature = "web")]
use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_LEAD_DAYS: i64 = 10;
const REQUEST_ID_RETRIES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Approved,
    #[serde(rename = "In Transit")]
    InTransit,
    Delivered,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "Pending",
            RequestStatus::Approved => "Approved",
            RequestStatus::InTransit => "In Transit",
            RequestStatus::Delivered => "Delivered",
            RequestStatus::Rejected => "Rejected",
        }
    }

    /// Whether a request may move from `self` to `next`.
    pub fn can_become(&self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Approved, InTransit) | (InTransit, Delivered)
        )
    }
}

/// Row of the `material_requests` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaterialRequest {
    pub id: Uuid,
    pub request_id: String,
    pub material: String,
    pub quantity: u64,
    pub unit: String,
    pub priority: Priority,
    pub status: RequestStatus,
    pub request_date: NaiveDate,
    pub required_date: Option<NaiveDate>,
    pub estimated_delivery: NaiveDate,
    pub notes: Option<String>,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for MaterialRequest {
    const TABLE: &'static str = "material_requests";

    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![("material_requests_request_id_key", self.request_id.clone())]
    }
}

fn default_unit() -> String {
    "tons".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMaterialRequest {
    pub material: String,
    pub quantity: i64,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub required_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusChange {
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RequestSummary {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub in_transit: usize,
}

/// `REQ` followed by the last six digits of the millisecond clock.
pub fn request_id_at(millis: i64) -> String {
    format!("REQ{:06}", millis.rem_euclid(1_000_000))
}

pub fn submit_request(
    db: &Database,
    user_id: Uuid,
    form: NewMaterialRequest,
) -> Result<MaterialRequest, AppError> {
    let material = form.material.trim().to_string();
    if material.is_empty() {
        return Err(AppError::validation("Material is required"));
    }
    if form.quantity <= 0 {
        return Err(AppError::validation("Quantity must be greater than 0"));
    }

    let now = Utc::now();
    let today = now.date_naive();
    let mut request = MaterialRequest {
        id: Uuid::new_v4(),
        request_id: String::new(),
        material,
        quantity: form.quantity as u64,
        unit: form.unit.trim().to_string(),
        priority: form.priority,
        status: RequestStatus::Pending,
        request_date: today,
        required_date: form.required_date,
        estimated_delivery: form
            .required_date
            .unwrap_or(today + Duration::days(DEFAULT_LEAD_DAYS)),
        notes: form
            .notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()),
        user_id,
        created_at: now,
        updated_at: None,
    };

    // Two submissions in the same millisecond share an id; step the clock.
    let millis = now.timestamp_millis();
    for attempt in 0..REQUEST_ID_RETRIES {
        request.request_id = request_id_at(millis + attempt);
        match db.material_requests.insert(request.clone()) {
            Ok(saved) => {
                info!("submitted {} for {} {}", saved.request_id, saved.quantity, saved.material);
                return Ok(saved);
            }
            Err(e) if e.is_duplicate_of("material_requests_request_id_key") => {
                warn!("request id {} taken, retrying", request.request_id);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(AppError::Internal("no free request id".to_string()))
}

/// Every request, newest first.
pub fn list_requests(db: &Database) -> Result<Vec<MaterialRequest>, StoreError> {
    db.material_requests.select(Query::new().newest_first())
}

pub fn summarize(requests: &[MaterialRequest]) -> RequestSummary {
    let count = |status: RequestStatus| requests.iter().filter(|r| r.status == status).count();
    RequestSummary {
        total: requests.len(),
        pending: count(RequestStatus::Pending),
        approved: count(RequestStatus::Approved),
        in_transit: count(RequestStatus::InTransit),
    }
}

pub fn track_request(db: &Database, request_id: &str) -> Result<MaterialRequest, AppError> {
    let wanted = request_id.trim().to_uppercase();
    db.material_requests
        .find(|r| r.request_id == wanted)?
        .ok_or_else(|| AppError::NotFound("Request not found".to_string()))
}

/// Move a request along its lifecycle on behalf of `role`.
pub fn change_status(
    db: &Database,
    role: Role,
    id: Uuid,
    next: RequestStatus,
) -> Result<MaterialRequest, AppError> {
    if !role.can_manage_requests() {
        return Err(AppError::Forbidden(
            "Only admins and supervisors can update request status.".to_string(),
        ));
    }
    let mut previous = None;
    let updated = db
        .material_requests
        .try_update(id, |r| {
            if !r.status.can_become(next) {
                return Err(AppError::validation(format!(
                    "Cannot change a {} request to {}",
                    r.status.as_str(),
                    next.as_str()
                )));
            }
            previous = Some(r.status);
            r.status = next;
            r.updated_at = Some(Utc::now());
            Ok(())
        })
        .map_err(|e| match e {
            AppError::Store(StoreError::NotFound { .. }) => {
                AppError::NotFound("Request not found".to_string())
            }
            other => other,
        })?;
    if let Some(previous) = previous {
        info!(
            "{} moved from {} to {} by {}",
            updated.request_id,
            previous.as_str(),
            next.as_str(),
            role.as_str()
        );
    }
    Ok(updated)
}

#[cfg(feature = "web")]
pub async fn handle_list(
    State(state): State<SharedState>,
) -> Result<Json<Vec<MaterialRequest>>, AppError> {
    Ok(Json(list_requests(&state.db)?))
}

#[cfg(feature = "web")]
pub async fn handle_summary(
    State(state): State<SharedState>,
) -> Result<Json<RequestSummary>, AppError> {
    Ok(Json(summarize(&list_requests(&state.db)?)))
}

#[cfg(feature = "web")]
pub async fn handle_submit(
    State(state): State<SharedState>,
    session: CurrentSession,
    Json(form): Json<NewMaterialRequest>,
) -> Result<Json<MaterialRequest>, AppError> {
    Ok(Json(submit_request(&state.db, session.user_id, form)?))
}

#[cfg(feature = "web")]
pub async fn handle_track(
    State(state): State<SharedState>,
    Path(request_id): Path<String>,
) -> Result<Json<MaterialRequest>, AppError> {
    Ok(Json(track_request(&state.db, &request_id)?))
}

#[cfg(feature = "web")]
pub async fn handle_change_status(
    State(state): State<SharedState>,
    session: CurrentSession,
    Path(id): Path<Uuid>,
    Json(change): Json<StatusChange>,
) -> Result<Json<MaterialRequest>, AppError> {
    Ok(Json(change_status(&state.db, session.role, id, change.status)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_uses_last_six_digits() {
        assert_eq!(request_id_at(1_760_000_123_456), "REQ123456");
        assert_eq!(request_id_at(1_760_000_000_042), "REQ000042");
    }

    #[test]
    fn transitions_are_forward_only() {
        use RequestStatus::*;
        assert!(Pending.can_become(Approved));
        assert!(Pending.can_become(Rejected));
        assert!(Approved.can_become(InTransit));
        assert!(InTransit.can_become(Delivered));

        assert!(!Pending.can_become(Delivered));
        assert!(!Approved.can_become(Pending));
        assert!(!Rejected.can_become(Approved));
        assert!(!Delivered.can_become(InTransit));
    }

    #[test]
    fn status_serializes_with_space() {
        let json = serde_json::to_string(&RequestStatus::InTransit).unwrap();
        assert_eq!(json, "\"In Transit\"");
    }
}
