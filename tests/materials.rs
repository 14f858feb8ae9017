mod common;

use chrono::{Duration, Utc};
use common::confirmed_user;
use plantops::auth::Role;
use plantops::mailer::Outbox;
use plantops::materials::{self, NewMaterialRequest, Priority, RequestStatus};
use plantops::store::Database;
use std::sync::{Arc, Barrier};
use std::thread;
use uuid::Uuid;

fn request(material: &str, quantity: i64) -> NewMaterialRequest {
    serde_json::from_value(serde_json::json!({
        "material": material,
        "quantity": quantity,
        "priority": "High",
    }))
    .unwrap()
}

#[test]
fn submission_fills_in_defaults() {
    let db = Database::in_memory();
    let user = Uuid::new_v4();
    let saved = materials::submit_request(&db, user, request("Limestone", 300)).unwrap();

    assert!(saved.request_id.starts_with("REQ"));
    assert_eq!(saved.request_id.len(), 9);
    assert_eq!(saved.status, RequestStatus::Pending);
    assert_eq!(saved.priority, Priority::High);
    assert_eq!(saved.unit, "tons");
    let today = Utc::now().date_naive();
    assert_eq!(saved.request_date, today);
    assert_eq!(saved.estimated_delivery, today + Duration::days(10));
}

#[test]
fn required_date_becomes_the_estimate() {
    let db = Database::in_memory();
    let due = Utc::now().date_naive() + Duration::days(3);
    let mut form = request("Coking Coal", 50);
    form.required_date = Some(due);

    let saved = materials::submit_request(&db, Uuid::new_v4(), form).unwrap();
    assert_eq!(saved.estimated_delivery, due);
}

#[test]
fn invalid_requests_are_rejected() {
    let db = Database::in_memory();
    let err = materials::submit_request(&db, Uuid::new_v4(), request("  ", 5)).unwrap_err();
    assert_eq!(err.user_message(), "Material is required");
    let err = materials::submit_request(&db, Uuid::new_v4(), request("Dolomite", 0)).unwrap_err();
    assert_eq!(err.user_message(), "Quantity must be greater than 0");
}

#[test]
fn rapid_submissions_get_distinct_ids() {
    let db = Database::in_memory();
    let user = Uuid::new_v4();
    let ids: Vec<String> = (0..4)
        .map(|_| {
            materials::submit_request(&db, user, request("Iron Ore", 10))
                .unwrap()
                .request_id
        })
        .collect();

    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), ids.len());
}

#[test]
fn tracking_is_case_insensitive() {
    let db = Database::in_memory();
    let saved = materials::submit_request(&db, Uuid::new_v4(), request("Limestone", 1)).unwrap();

    let found = materials::track_request(&db, &saved.request_id.to_lowercase()).unwrap();
    assert_eq!(found.id, saved.id);

    let err = materials::track_request(&db, "REQ999999x").unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert_eq!(err.user_message(), "Request not found");
}

#[test]
fn only_managers_move_requests_forward() {
    let db = Database::in_memory();
    let outbox = Outbox::new();
    let vendor = confirmed_user(&db, &outbox, "vendor@rinl.test", "vendor");
    let saved = materials::submit_request(&db, vendor.id, request("Limestone", 1)).unwrap();

    let err = materials::change_status(&db, Role::Vendor, saved.id, RequestStatus::Approved)
        .unwrap_err();
    assert_eq!(err.status_code(), 403);

    materials::change_status(&db, Role::Supervisor, saved.id, RequestStatus::Approved).unwrap();
    let moved =
        materials::change_status(&db, Role::Admin, saved.id, RequestStatus::InTransit).unwrap();
    assert_eq!(moved.status, RequestStatus::InTransit);
    assert!(moved.updated_at.is_some());

    let err = materials::change_status(&db, Role::Admin, saved.id, RequestStatus::Pending)
        .unwrap_err();
    assert_eq!(err.user_message(), "Cannot change a In Transit request to Pending");

    let summary = materials::summarize(&materials::list_requests(&db).unwrap());
    assert_eq!(summary.total, 1);
    assert_eq!(summary.in_transit, 1);
    assert_eq!(summary.pending, 0);
}

#[test]
fn competing_decisions_on_a_pending_request_settle_once() {
    for _ in 0..50 {
        let db = Arc::new(Database::in_memory());
        let outbox = Outbox::new();
        let vendor = confirmed_user(&db, &outbox, "vendor@rinl.test", "vendor");
        let saved = materials::submit_request(&db, vendor.id, request("Coke", 3)).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [RequestStatus::Approved, RequestStatus::Rejected]
            .into_iter()
            .map(|next| {
                let db = db.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    materials::change_status(&db, Role::Admin, saved.id, next)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(loser.status_code(), 400);

        let stored = materials::track_request(&db, &saved.request_id).unwrap();
        assert_eq!(stored.status, winners[0].status);
    }
}

#[test]
fn unknown_request_cannot_change_status() {
    let db = Database::in_memory();
    let err = materials::change_status(&db, Role::Admin, Uuid::new_v4(), RequestStatus::Approved)
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert_eq!(err.user_message(), "Request not found");
}
