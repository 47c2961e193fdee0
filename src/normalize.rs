//! Raw remote rows → domain values.
//!
//! The remote store returns rows whose related records may be embedded as a
//! single object, a one-element array, or `null`, with optional columns
//! missing entirely. All of that ambiguity is resolved here; nothing past
//! this module ever sees a `serde_json::Value`.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeError {
    pub table: Table,
    pub field: &'static str,
    pub reason: String,
}

impl NormalizeError {
    fn new(table: Table, field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            table,
            field,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed {:?} row: {}: {}", self.table, self.field, self.reason)
    }
}

impl std::error::Error for NormalizeError {}

/// Rows for one window exactly as the store hands them over.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawWindow {
    #[serde(default)]
    pub shifts: Vec<Value>,
    #[serde(default)]
    pub availability: Vec<Value>,
    #[serde(default)]
    pub time_off: Vec<Value>,
    #[serde(default)]
    pub employees: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn first(&self) -> Option<&T> {
        match self {
            OneOrMany::One(t) => Some(t),
            OneOrMany::Many(v) => v.first(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RelatedRef {
    #[serde(default)]
    id: Option<String>,
}

/// Prefer the flat foreign key, fall back to the embedded record.
fn related_id(
    table: Table,
    field: &'static str,
    flat: Option<&str>,
    embedded: Option<&OneOrMany<RelatedRef>>,
) -> Result<Option<Ulid>, NormalizeError> {
    let raw = flat.or_else(|| embedded.and_then(|e| e.first()).and_then(|r| r.id.as_deref()));
    raw.map(|s| parse_id(table, field, s)).transpose()
}

fn parse_id(table: Table, field: &'static str, raw: &str) -> Result<Ulid, NormalizeError> {
    Ulid::from_string(raw).map_err(|e| NormalizeError::new(table, field, e.to_string()))
}

fn parse_row<T: for<'de> Deserialize<'de>>(table: Table, row: &Value) -> Result<T, NormalizeError> {
    T::deserialize(row).map_err(|e| NormalizeError::new(table, "row", e.to_string()))
}

// ── Shifts ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawShift {
    id: String,
    #[serde(default)]
    employee_id: Option<String>,
    #[serde(default)]
    employee: Option<OneOrMany<RelatedRef>>,
    #[serde(default)]
    position_id: Option<String>,
    #[serde(default)]
    position: Option<OneOrMany<RelatedRef>>,
    #[serde(default)]
    location_id: Option<String>,
    #[serde(default)]
    location: Option<OneOrMany<RelatedRef>>,
    start_time: DateTime<FixedOffset>,
    end_time: DateTime<FixedOffset>,
    #[serde(default)]
    break_minutes: Option<i64>,
    #[serde(default)]
    status: Option<ShiftStatus>,
    #[serde(default)]
    notes: Option<String>,
}

pub fn shift_from_row(row: &Value) -> Result<Shift, NormalizeError> {
    const TABLE: Table = Table::Shifts;
    let raw: RawShift = parse_row(TABLE, row)?;

    let span = Span::new(raw.start_time.timestamp_millis(), raw.end_time.timestamp_millis());
    if !span.is_valid() {
        return Err(NormalizeError::new(TABLE, "end_time", "not after start_time"));
    }
    let break_minutes = match raw.break_minutes {
        None => 0,
        Some(m) if (0..=i64::from(MAX_BREAK_MINUTES)).contains(&m) => m as u32,
        Some(m) => return Err(NormalizeError::new(TABLE, "break_minutes", format!("out of range: {m}"))),
    };

    Ok(Shift {
        id: parse_id(TABLE, "id", &raw.id)?,
        employee_id: related_id(TABLE, "employee_id", raw.employee_id.as_deref(), raw.employee.as_ref())?,
        position_id: related_id(TABLE, "position_id", raw.position_id.as_deref(), raw.position.as_ref())?,
        location_id: related_id(TABLE, "location_id", raw.location_id.as_deref(), raw.location.as_ref())?,
        span,
        break_minutes,
        status: raw.status.unwrap_or(ShiftStatus::Scheduled),
        notes: raw.notes.filter(|n| !n.is_empty()),
    })
}

/// Outbound row for a shift, instants as RFC 3339 UTC.
pub fn shift_to_row(org_id: &str, shift: &Shift) -> Value {
    let instant = |ms: Ms| DateTime::<Utc>::from_timestamp_millis(ms).map(|dt| dt.to_rfc3339());
    json!({
        "id": shift.id.to_string(),
        "organization_id": org_id,
        "employee_id": shift.employee_id.map(|id| id.to_string()),
        "position_id": shift.position_id.map(|id| id.to_string()),
        "location_id": shift.location_id.map(|id| id.to_string()),
        "start_time": instant(shift.span.start),
        "end_time": instant(shift.span.end),
        "break_minutes": shift.break_minutes,
        "status": shift.status.as_str(),
        "notes": shift.notes,
    })
}

// ── Availability ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawAvailability {
    id: String,
    employee_id: String,
    #[serde(alias = "weekday")]
    day_of_week: i64,
    start_time: String,
    end_time: String,
}

fn parse_clock(table: Table, field: &'static str, raw: &str) -> Result<NaiveTime, NormalizeError> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|e| NormalizeError::new(table, field, format!("{raw}: {e}")))
}

pub fn availability_from_row(row: &Value) -> Result<AvailabilityRange, NormalizeError> {
    const TABLE: Table = Table::Availability;
    let raw: RawAvailability = parse_row(TABLE, row)?;
    if !(0..=6).contains(&raw.day_of_week) {
        return Err(NormalizeError::new(TABLE, "day_of_week", format!("out of range: {}", raw.day_of_week)));
    }
    let start_time = parse_clock(TABLE, "start_time", &raw.start_time)?;
    let end_time = parse_clock(TABLE, "end_time", &raw.end_time)?;
    if end_time <= start_time {
        return Err(NormalizeError::new(TABLE, "end_time", "not after start_time"));
    }
    Ok(AvailabilityRange {
        id: parse_id(TABLE, "id", &raw.id)?,
        employee_id: parse_id(TABLE, "employee_id", &raw.employee_id)?,
        weekday: raw.day_of_week as u8,
        start_time,
        end_time,
    })
}

// ── Time off ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawTimeOff {
    id: String,
    #[serde(default)]
    employee_id: Option<String>,
    #[serde(default)]
    employee: Option<OneOrMany<RelatedRef>>,
    #[serde(alias = "start_date")]
    starts_at: NaiveDate,
    #[serde(alias = "end_date")]
    ends_at: NaiveDate,
    #[serde(default, alias = "type")]
    category: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

fn category_from_str(raw: Option<&str>) -> TimeOffCategory {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("vacation") | Some("holiday") => TimeOffCategory::Vacation,
        Some("sick") => TimeOffCategory::Sick,
        Some("unpaid") => TimeOffCategory::Unpaid,
        _ => TimeOffCategory::Other,
    }
}

pub fn time_off_from_row(row: &Value) -> Result<TimeOffPeriod, NormalizeError> {
    const TABLE: Table = Table::TimeOff;
    let raw: RawTimeOff = parse_row(TABLE, row)?;
    let employee_id = related_id(TABLE, "employee_id", raw.employee_id.as_deref(), raw.employee.as_ref())?
        .ok_or_else(|| NormalizeError::new(TABLE, "employee_id", "missing"))?;
    if raw.ends_at < raw.starts_at {
        return Err(NormalizeError::new(TABLE, "ends_at", "before starts_at"));
    }
    // Missing status is treated as pending so it stays out of conflict checks.
    let status = match raw.status.map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("approved") => TimeOffStatus::Approved,
        Some("denied") | Some("rejected") => TimeOffStatus::Denied,
        _ => TimeOffStatus::Pending,
    };
    Ok(TimeOffPeriod {
        id: parse_id(TABLE, "id", &raw.id)?,
        employee_id,
        starts_at: raw.starts_at,
        ends_at: raw.ends_at,
        category: category_from_str(raw.category.as_deref()),
        status,
    })
}

// ── Employees ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawEmployee {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default, alias = "is_active")]
    active: Option<bool>,
}

pub fn employee_from_row(row: &Value) -> Result<Employee, NormalizeError> {
    const TABLE: Table = Table::Employees;
    let raw: RawEmployee = parse_row(TABLE, row)?;
    let name = match raw.name {
        Some(n) => n,
        None => [raw.first_name, raw.last_name]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" "),
    };
    Ok(Employee {
        id: parse_id(TABLE, "id", &raw.id)?,
        name,
        active: raw.active.unwrap_or(true),
    })
}

// ── Whole window ─────────────────────────────────────────────────

fn collect<T>(rows: &[Value], parse: fn(&Value) -> Result<T, NormalizeError>, out: &mut Vec<T>) -> usize {
    let mut skipped = 0;
    for row in rows {
        match parse(row) {
            Ok(v) => out.push(v),
            Err(e) => {
                warn!("skipping row: {e}");
                skipped += 1;
            }
        }
    }
    skipped
}

/// Normalize a whole window. Malformed rows are skipped and logged rather
/// than failing the load; the count of skipped rows is returned.
pub fn snapshot_from_rows(raw: &RawWindow) -> (WindowSnapshot, usize) {
    let mut snapshot = WindowSnapshot::default();
    let mut skipped = 0;
    skipped += collect(&raw.shifts, shift_from_row, &mut snapshot.shifts);
    skipped += collect(&raw.availability, availability_from_row, &mut snapshot.availability);
    skipped += collect(&raw.time_off, time_off_from_row, &mut snapshot.time_off);
    skipped += collect(&raw.employees, employee_from_row, &mut snapshot.employees);
    (snapshot, skipped)
}
