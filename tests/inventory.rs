use plantops::downloader;
use plantops::error::AppError;
use plantops::inventory::{
    self, InventoryStatus, InventoryUpdate, NewInventoryItem,
};
use plantops::store::Database;
use uuid::Uuid;

fn form(item_id: &str, quantity: i64) -> NewInventoryItem {
    serde_json::from_value(serde_json::json!({
        "item_id": item_id,
        "name": "Iron Ore Fines",
        "category": "Raw Materials",
        "quantity": quantity,
        "location": "  Yard 3 ",
        "supplier": "",
    }))
    .unwrap()
}

#[test]
fn form_defaults_apply() {
    let db = Database::in_memory();
    let item = inventory::add_item(&db, form("IRN-001", 1200)).unwrap();

    assert_eq!(item.unit, "tons");
    assert_eq!(item.status, InventoryStatus::InStock);
    assert_eq!((item.min_threshold, item.max_threshold), (100, 10_000));
    assert_eq!(item.location.as_deref(), Some("Yard 3"));
    assert_eq!(item.supplier, None);
}

#[test]
fn invalid_forms_are_rejected_with_their_message() {
    let db = Database::in_memory();
    let cases = [
        (serde_json::json!({"item_id": " ", "name": "x", "category": "c", "quantity": 1}), "Item ID is required"),
        (serde_json::json!({"item_id": "A", "name": "", "category": "c", "quantity": 1}), "Item name is required"),
        (serde_json::json!({"item_id": "A", "name": "x", "category": "", "quantity": 1}), "Category is required"),
        (serde_json::json!({"item_id": "A", "name": "x", "category": "c", "quantity": -1}), "Quantity cannot be negative"),
        (
            serde_json::json!({"item_id": "A", "name": "x", "category": "c", "quantity": 1, "min_threshold": 500, "max_threshold": 50}),
            "Minimum threshold cannot exceed maximum threshold",
        ),
        (
            serde_json::json!({"item_id": "A", "name": "x", "category": "c", "quantity": 1, "cost_per_unit": -4.0}),
            "Cost per unit cannot be negative",
        ),
    ];

    for (body, message) in cases {
        let form: NewInventoryItem = serde_json::from_value(body).unwrap();
        let err = inventory::add_item(&db, form).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.user_message(), message);
    }
    assert!(db.inventory.is_empty().unwrap());
}

#[test]
fn duplicate_item_id_is_a_conflict() {
    let db = Database::in_memory();
    inventory::add_item(&db, form("IRN-001", 10)).unwrap();

    let err = inventory::add_item(&db, form("IRN-001", 20)).unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(
        err.user_message(),
        "Item ID already exists. Please use a unique Item ID."
    );
}

#[test]
fn update_sets_quantity_and_status() {
    let db = Database::in_memory();
    let item = inventory::add_item(&db, form("COK-002", 900)).unwrap();

    let updated = inventory::update_item(
        &db,
        item.id,
        InventoryUpdate {
            quantity: 40,
            status: InventoryStatus::Critical,
        },
    )
    .unwrap();
    assert_eq!(updated.quantity, 40);
    assert_eq!(updated.status, InventoryStatus::Critical);
    assert!(updated.updated_at.is_some());

    let err = inventory::update_item(
        &db,
        Uuid::new_v4(),
        InventoryUpdate {
            quantity: 1,
            status: InventoryStatus::InStock,
        },
    )
    .unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert_eq!(err.user_message(), "Inventory item not found");
}

#[test]
fn summary_counts_each_status() {
    let db = Database::in_memory();
    for (id, status) in [
        ("A", InventoryStatus::InStock),
        ("B", InventoryStatus::LowStock),
        ("C", InventoryStatus::LowStock),
        ("D", InventoryStatus::Critical),
    ] {
        let mut f = form(id, 10);
        f.status = status;
        inventory::add_item(&db, f).unwrap();
    }

    let items = inventory::list_items(&db).unwrap();
    let summary = inventory::summarize(&items);
    assert_eq!(summary.total, 4);
    assert_eq!(summary.in_stock, 1);
    assert_eq!(summary.low_stock, 2);
    assert_eq!(summary.critical, 1);
}

#[test]
fn exports_include_every_item() {
    let db = Database::in_memory();
    inventory::add_item(&db, form("IRN-001", 10)).unwrap();
    inventory::add_item(&db, form("IRN-002", 20)).unwrap();
    let items = inventory::list_items(&db).unwrap();

    let csv = downloader::to_csv(&items);
    assert_eq!(csv.lines().count(), 3);
    assert!(csv.contains("IRN-001"));

    let xlsx = downloader::to_xlsx(&items).unwrap();
    // xlsx files are zip archives
    assert_eq!(&xlsx[..2], b"PK");
}
