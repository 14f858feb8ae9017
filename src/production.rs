//! Shift production log and the figures derived from it.

#[cfg(feature = "web")]
use crate::app::SharedState;
#[cfg(feature = "web")]
use crate::auth::session_from_cookies;
use crate::error::AppError;
use crate::store::{Database, Query, Record, StoreError};
#[cfg(feature = "web")]
use axum::{Json, extract::State};
#[cfg(feature = "web")]
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Monthly output target in tons.
pub const MONTHLY_TARGET: f64 = 2500.0;
const MAX_MONTHS: usize = 6;
const TREND_DAYS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Shift {
    #[default]
    Day,
    Evening,
    Night,
}

impl Shift {
    pub fn as_str(&self) -> &'static str {
        match self {
            Shift::Day => "Day",
            Shift::Evening => "Evening",
            Shift::Night => "Night",
        }
    }
}

/// Row of the `production` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductionRecord {
    pub id: Uuid,
    pub date: NaiveDate,
    pub shift: Shift,
    pub steel_production: f64,
    pub molten_iron: f64,
    pub efficiency: f64,
    pub quality_rate: f64,
    pub uptime_hours: f64,
    pub downtime_hours: f64,
    pub downtime_reason: Option<String>,
    pub energy_consumption: Option<f64>,
    pub notes: Option<String>,
    pub operator_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Record for ProductionRecord {
    const TABLE: &'static str = "production";

    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![(
            "production_date_shift_key",
            format!("{}/{}", self.date, self.shift.as_str()),
        )]
    }
}

/// The shift report form.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductionForm {
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub shift: Shift,
    pub steel_production: f64,
    pub molten_iron: f64,
    pub efficiency: f64,
    pub quality_rate: f64,
    pub uptime_hours: f64,
    #[serde(default)]
    pub downtime_hours: Option<f64>,
    #[serde(default)]
    pub downtime_reason: Option<String>,
    #[serde(default)]
    pub energy_consumption: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn check(ok: bool, message: &'static str) -> Result<(), AppError> {
    if ok {
        Ok(())
    } else {
        Err(AppError::validation(message))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ProductionForm {
    fn into_record(self, operator_id: Uuid) -> Result<ProductionRecord, AppError> {
        let finite = |v: f64| v.is_finite();
        let percent = |v: f64| finite(v) && (0.0..=100.0).contains(&v);
        let hours = |v: f64| finite(v) && (0.0..=24.0).contains(&v);
        let downtime = self.downtime_hours.unwrap_or(0.0);

        check(
            finite(self.steel_production) && self.steel_production >= 0.0,
            "Steel production cannot be negative",
        )?;
        check(
            finite(self.molten_iron) && self.molten_iron >= 0.0,
            "Molten iron cannot be negative",
        )?;
        check(percent(self.efficiency), "Efficiency must be between 0 and 100")?;
        check(percent(self.quality_rate), "Quality rate must be between 0 and 100")?;
        check(hours(self.uptime_hours), "Uptime hours must be between 0 and 24")?;
        check(hours(downtime), "Downtime hours must be between 0 and 24")?;
        check(
            self.energy_consumption.is_none_or(|e| finite(e) && e >= 0.0),
            "Energy consumption cannot be negative",
        )?;

        Ok(ProductionRecord {
            id: Uuid::new_v4(),
            date: self.date.unwrap_or_else(|| Utc::now().date_naive()),
            shift: self.shift,
            steel_production: self.steel_production,
            molten_iron: self.molten_iron,
            efficiency: self.efficiency,
            quality_rate: self.quality_rate,
            uptime_hours: self.uptime_hours,
            downtime_hours: downtime,
            downtime_reason: non_empty(self.downtime_reason),
            energy_consumption: self.energy_consumption,
            notes: non_empty(self.notes),
            operator_id,
            created_at: Utc::now(),
        })
    }
}

/// The latest `limit` records, newest date first.
pub fn list_recent(db: &Database, limit: usize) -> Result<Vec<ProductionRecord>, StoreError> {
    db.production.select(
        Query::new()
            .order_by(|a: &ProductionRecord, b: &ProductionRecord| {
                b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at))
            })
            .limit(limit),
    )
}

pub fn add_record(
    db: &Database,
    operator_id: Uuid,
    form: ProductionForm,
) -> Result<ProductionRecord, AppError> {
    let record = form.into_record(operator_id)?;
    let record = db.production.insert(record).map_err(|e| {
        if e.is_duplicate_of("production_date_shift_key") {
            AppError::Conflict("Production data for this date and shift already exists.".to_string())
        } else {
            AppError::Store(e)
        }
    })?;
    info!(
        "recorded {} shift of {}: {} tons",
        record.shift.as_str(),
        record.date,
        record.steel_production
    );
    Ok(record)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CurrentStats {
    pub daily_output: f64,
    pub efficiency: f64,
    pub uptime: f64,
    pub quality_rate: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MonthlyProduction {
    pub month: String,
    pub production: f64,
    pub target: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailyEfficiency {
    pub day: String,
    pub efficiency: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProductShare {
    pub name: &'static str,
    pub value: u32,
    pub color: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProductionOverview {
    pub stats: CurrentStats,
    pub monthly: Vec<MonthlyProduction>,
    pub daily_trend: Vec<DailyEfficiency>,
    pub breakdown: Vec<ProductShare>,
    pub insights: Vec<String>,
    /// Number of records the figures were computed from.
    pub records: usize,
}

pub fn product_breakdown() -> Vec<ProductShare> {
    [
        ("Hot Rolled Coils", 35, "#0088FE"),
        ("Cold Rolled Sheets", 25, "#00C49F"),
        ("Wire Rods", 20, "#FFBB28"),
        ("Structural Steel", 15, "#FF8042"),
        ("Others", 5, "#8884D8"),
    ]
    .into_iter()
    .map(|(name, value, color)| ProductShare { name, value, color })
    .collect()
}

fn default_monthly() -> Vec<MonthlyProduction> {
    [
        ("Jan", 2400.0),
        ("Feb", 2600.0),
        ("Mar", 2300.0),
        ("Apr", 2700.0),
        ("May", 2500.0),
        ("Jun", 2800.0),
    ]
    .into_iter()
    .map(|(month, production)| MonthlyProduction {
        month: month.to_string(),
        production,
        target: MONTHLY_TARGET,
    })
    .collect()
}

fn default_trend() -> Vec<DailyEfficiency> {
    [
        ("Mon", 94.0),
        ("Tue", 96.0),
        ("Wed", 92.0),
        ("Thu", 98.0),
        ("Fri", 95.0),
        ("Sat", 93.0),
        ("Sun", 89.0),
    ]
    .into_iter()
    .map(|(day, efficiency)| DailyEfficiency {
        day: day.to_string(),
        efficiency,
    })
    .collect()
}

fn default_insights() -> Vec<String> {
    [
        "Production efficiency has improved by 3.2% compared to last month",
        "Hot Rolled Coils production is 12% above target for this quarter",
        "Weekend production efficiency drops by 6% on average - consider maintenance scheduling",
        "April showed the highest production output with 2,700 tons",
        "Wire Rods production line shows consistent performance with minimal variance",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Mean output per calendar month, oldest of the six most recent months first.
pub fn monthly_production(records: &[ProductionRecord]) -> Vec<MonthlyProduction> {
    let mut months: BTreeMap<(i32, u32), (f64, u32)> = BTreeMap::new();
    for r in records {
        let entry = months.entry((r.date.year(), r.date.month())).or_insert((0.0, 0));
        entry.0 += r.steel_production;
        entry.1 += 1;
    }

    let skip = months.len().saturating_sub(MAX_MONTHS);
    months
        .into_iter()
        .skip(skip)
        .filter_map(|((year, month), (sum, count))| {
            let label = NaiveDate::from_ymd_opt(year, month, 1)?.format("%b").to_string();
            Some(MonthlyProduction {
                month: label,
                production: (sum / f64::from(count)).round(),
                target: MONTHLY_TARGET,
            })
        })
        .collect()
}

/// Efficiency of the most recent records, oldest first. `records` must be
/// newest first.
pub fn efficiency_trend(records: &[ProductionRecord]) -> Vec<DailyEfficiency> {
    records
        .iter()
        .take(TREND_DAYS)
        .rev()
        .map(|r| DailyEfficiency {
            day: r.date.format("%a").to_string(),
            efficiency: r.efficiency,
        })
        .collect()
}

pub fn insights(records: &[ProductionRecord]) -> Vec<String> {
    let Some(first) = records.first() else {
        return default_insights();
    };
    let n = records.len() as f64;
    let sum = |f: fn(&ProductionRecord) -> f64| records.iter().map(f).sum::<f64>();

    let best = records
        .iter()
        .fold(first, |best, r| if r.efficiency > best.efficiency { r } else { best });

    vec![
        format!(
            "Current average production efficiency is {:.1}%",
            sum(|r| r.efficiency) / n
        ),
        format!(
            "Best efficiency recorded: {:.1}% on {}",
            best.efficiency,
            best.date.format("%-m/%-d/%Y")
        ),
        format!(
            "Total steel production in last {} records: {:.0} tons",
            records.len(),
            sum(|r| r.steel_production)
        ),
        format!(
            "Average quality rate maintained at {:.1}%",
            sum(|r| r.quality_rate) / n
        ),
        format!(
            "Total downtime in recent operations: {:.1} hours",
            sum(|r| r.downtime_hours)
        ),
    ]
}

/// Dashboard figures for `records`, which must be newest first.
pub fn overview(records: &[ProductionRecord]) -> ProductionOverview {
    let stats = match records.first() {
        Some(latest) => CurrentStats {
            daily_output: latest.steel_production,
            efficiency: latest.efficiency,
            uptime: latest.uptime_hours,
            quality_rate: latest.quality_rate,
        },
        None => CurrentStats {
            daily_output: 2500.0,
            efficiency: 94.2,
            uptime: 22.1,
            quality_rate: 98.7,
        },
    };

    let (monthly, daily_trend) = if records.is_empty() {
        (default_monthly(), default_trend())
    } else {
        (monthly_production(records), efficiency_trend(records))
    };

    ProductionOverview {
        stats,
        monthly,
        daily_trend,
        breakdown: product_breakdown(),
        insights: insights(records),
        records: records.len(),
    }
}

#[cfg(feature = "web")]
pub async fn handle_list(
    State(state): State<SharedState>,
) -> Result<Json<Vec<ProductionRecord>>, AppError> {
    Ok(Json(list_recent(&state.db, state.config.production_limit)?))
}

#[cfg(feature = "web")]
pub async fn handle_overview(
    State(state): State<SharedState>,
) -> Result<Json<ProductionOverview>, AppError> {
    let records = list_recent(&state.db, state.config.production_limit)?;
    Ok(Json(overview(&records)))
}

#[cfg(feature = "web")]
pub async fn handle_add(
    State(state): State<SharedState>,
    jar: CookieJar,
    Json(form): Json<ProductionForm>,
) -> Result<Json<ProductionRecord>, AppError> {
    let session = session_from_cookies(&state.auth, &jar)
        .ok_or(AppError::LoginRequired("You must be logged in to update production data."))?;
    Ok(Json(add_record(&state.db, session.user_id, form)?))
}
