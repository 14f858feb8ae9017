use plantops::production::{self, ProductionForm, Shift};
use plantops::store::Database;
use uuid::Uuid;

fn form(date: &str, shift: &str, output: f64, efficiency: f64) -> ProductionForm {
    serde_json::from_value(serde_json::json!({
        "date": date,
        "shift": shift,
        "steel_production": output,
        "molten_iron": output * 1.1,
        "efficiency": efficiency,
        "quality_rate": 98.5,
        "uptime_hours": 21.5,
        "downtime_hours": 2.5,
        "downtime_reason": "  ",
    }))
    .unwrap()
}

#[test]
fn one_record_per_date_and_shift() {
    let db = Database::in_memory();
    let operator = Uuid::new_v4();
    production::add_record(&db, operator, form("2024-03-04", "Day", 2400.0, 93.0)).unwrap();
    production::add_record(&db, operator, form("2024-03-04", "Night", 2300.0, 91.0)).unwrap();

    let err = production::add_record(&db, operator, form("2024-03-04", "Day", 1.0, 50.0))
        .unwrap_err();
    assert_eq!(err.status_code(), 409);
    assert_eq!(
        err.user_message(),
        "Production data for this date and shift already exists."
    );
    assert_eq!(db.production.len().unwrap(), 2);
}

#[test]
fn out_of_range_values_are_rejected() {
    let db = Database::in_memory();
    let operator = Uuid::new_v4();

    let err = production::add_record(&db, operator, form("2024-03-04", "Day", 2400.0, 101.0))
        .unwrap_err();
    assert_eq!(err.user_message(), "Efficiency must be between 0 and 100");

    let mut f = form("2024-03-04", "Day", 2400.0, 90.0);
    f.uptime_hours = 25.0;
    let err = production::add_record(&db, operator, f).unwrap_err();
    assert_eq!(err.user_message(), "Uptime hours must be between 0 and 24");

    let err = production::add_record(&db, operator, form("2024-03-04", "Day", -5.0, 90.0))
        .unwrap_err();
    assert_eq!(err.user_message(), "Steel production cannot be negative");
}

#[test]
fn blank_text_fields_are_dropped() {
    let db = Database::in_memory();
    let record =
        production::add_record(&db, Uuid::new_v4(), form("2024-03-04", "Evening", 2400.0, 93.0))
            .unwrap();
    assert_eq!(record.shift, Shift::Evening);
    assert_eq!(record.downtime_reason, None);
}

#[test]
fn recent_list_is_newest_date_first_and_limited() {
    let db = Database::in_memory();
    let operator = Uuid::new_v4();
    for day in ["2024-03-02", "2024-03-05", "2024-03-01", "2024-03-04"] {
        production::add_record(&db, operator, form(day, "Day", 2400.0, 90.0)).unwrap();
    }

    let recent = production::list_recent(&db, 3).unwrap();
    let dates: Vec<String> = recent.iter().map(|r| r.date.to_string()).collect();
    assert_eq!(dates, ["2024-03-05", "2024-03-04", "2024-03-02"]);
}

#[test]
fn overview_reflects_latest_record() {
    let db = Database::in_memory();
    let operator = Uuid::new_v4();
    production::add_record(&db, operator, form("2024-02-10", "Day", 2000.0, 88.0)).unwrap();
    production::add_record(&db, operator, form("2024-03-10", "Day", 2600.0, 95.5)).unwrap();

    let records = production::list_recent(&db, 30).unwrap();
    let overview = production::overview(&records);

    assert_eq!(overview.stats.daily_output, 2600.0);
    assert_eq!(overview.stats.efficiency, 95.5);
    assert_eq!(overview.records, 2);

    let months: Vec<_> = overview.monthly.iter().map(|m| m.month.as_str()).collect();
    assert_eq!(months, ["Feb", "Mar"]);
    assert_eq!(overview.daily_trend.len(), 2);
    assert_eq!(overview.daily_trend[1].efficiency, 95.5);
    assert_eq!(
        overview.insights[1],
        "Best efficiency recorded: 95.5% on 3/10/2024"
    );
}
