use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Back-to-back spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && self.end > other.start
    }
}

// ── Local time helpers ───────────────────────────────────────────

/// Wall-clock date/time of an instant in `tz`.
pub fn local_datetime(tz: Tz, at: Ms) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(at).map(|dt| dt.with_timezone(&tz).naive_local())
}

/// Calendar day an instant falls on in `tz`. This is the index day-key.
pub fn day_key(tz: Tz, at: Ms) -> Option<NaiveDate> {
    local_datetime(tz, at).map(|dt| dt.date())
}

/// Resolve a wall-clock date/time in `tz` to an instant.
/// Ambiguous times (DST fall-back) resolve to the earlier instant; times
/// inside a DST gap do not exist and yield `None`.
pub fn local_to_ms(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<Ms> {
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.timestamp_millis())
}

/// Weekday number with Sunday = 0 .. Saturday = 6.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

// ── Shifts ───────────────────────────────────────────────────────

/// Who a shift belongs to. Unassigned shifts are tracked under `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Assignee {
    Open,
    Employee(Ulid),
}

impl Assignee {
    pub fn from_employee(employee_id: Option<Ulid>) -> Self {
        match employee_id {
            Some(id) => Assignee::Employee(id),
            None => Assignee::Open,
        }
    }

    pub fn employee_id(&self) -> Option<Ulid> {
        match self {
            Assignee::Open => None,
            Assignee::Employee(id) => Some(*id),
        }
    }
}

impl fmt::Display for Assignee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assignee::Open => f.write_str("OPEN"),
            Assignee::Employee(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftStatus {
    Scheduled,
    Published,
    Completed,
    Cancelled,
}

impl ShiftStatus {
    /// Completed and cancelled shifts are finished business.
    pub fn is_final(&self) -> bool {
        matches!(self, ShiftStatus::Completed | ShiftStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftStatus::Scheduled => "scheduled",
            ShiftStatus::Published => "published",
            ShiftStatus::Completed => "completed",
            ShiftStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ShiftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled block of work. `employee_id = None` is an open shift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub id: Ulid,
    pub employee_id: Option<Ulid>,
    pub position_id: Option<Ulid>,
    pub location_id: Option<Ulid>,
    pub span: Span,
    pub break_minutes: u32,
    pub status: ShiftStatus,
    pub notes: Option<String>,
}

impl Shift {
    pub fn assignee(&self) -> Assignee {
        Assignee::from_employee(self.employee_id)
    }

    /// Paid minutes: length minus break, never negative.
    pub fn worked_minutes(&self) -> i64 {
        (self.span.duration_ms() / MINUTE_MS - i64::from(self.break_minutes)).max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: Ulid,
    pub name: String,
    pub active: bool,
}

// ── Availability & time off ──────────────────────────────────────

/// Recurring weekly window in which an employee can work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRange {
    pub id: Ulid,
    pub employee_id: Ulid,
    /// Sunday = 0 .. Saturday = 6.
    pub weekday: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl AvailabilityRange {
    pub fn covers(&self, start: NaiveTime, end: NaiveTime) -> bool {
        self.start_time <= start && end <= self.end_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOffCategory {
    Vacation,
    Sick,
    Unpaid,
    Other,
}

impl fmt::Display for TimeOffCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimeOffCategory::Vacation => "vacation",
            TimeOffCategory::Sick => "sick",
            TimeOffCategory::Unpaid => "unpaid",
            TimeOffCategory::Other => "other",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOffStatus {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOffPeriod {
    pub id: Ulid,
    pub employee_id: Ulid,
    pub starts_at: NaiveDate,
    /// Inclusive.
    pub ends_at: NaiveDate,
    pub category: TimeOffCategory,
    pub status: TimeOffStatus,
}

impl TimeOffPeriod {
    pub fn is_approved(&self) -> bool {
        self.status == TimeOffStatus::Approved
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        self.starts_at <= date && date <= self.ends_at
    }
}

// ── Window ───────────────────────────────────────────────────────

/// Seven consecutive days starting on the configured anchor weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeekWindow {
    pub start: NaiveDate,
}

impl WeekWindow {
    pub fn containing(date: NaiveDate, anchor: Weekday) -> Self {
        let offset = (date.weekday().num_days_from_monday() + 7 - anchor.num_days_from_monday()) % 7;
        Self {
            start: date - Duration::days(i64::from(offset)),
        }
    }

    /// Last day, inclusive.
    pub fn end(&self) -> NaiveDate {
        self.start + Duration::days(6)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end()
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        (0..7).map(move |d| self.start + Duration::days(d))
    }

    pub fn next(&self) -> Self {
        Self {
            start: self.start + Duration::days(7),
        }
    }

    pub fn prev(&self) -> Self {
        Self {
            start: self.start - Duration::days(7),
        }
    }
}

/// Everything the gateway returns for one window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub shifts: Vec<Shift>,
    pub availability: Vec<AvailabilityRange>,
    pub time_off: Vec<TimeOffPeriod>,
    pub employees: Vec<Employee>,
}

// ── Caller input ─────────────────────────────────────────────────

/// A shift as the grid or form describes it: a day plus wall-clock times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftDraft {
    #[serde(default)]
    pub employee_id: Option<Ulid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default)]
    pub position_id: Option<Ulid>,
    #[serde(default)]
    pub location_id: Option<Ulid>,
    #[serde(default)]
    pub break_minutes: u32,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Candidate placement handed to the conflict detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub assignee: Assignee,
    pub span: Span,
    /// The shift being edited or moved; never conflicts with itself.
    pub exclude: Option<Ulid>,
}

// ── Change feed ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Shifts,
    Availability,
    TimeOff,
    Employees,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Org-scoped notification pushed by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub org_id: String,
    pub table: Table,
    pub op: ChangeOp,
}
