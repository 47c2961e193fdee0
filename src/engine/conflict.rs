use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use ulid::Ulid;

use crate::index::ScheduleIndex;
use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// A placement problem that only blocks until someone signs it off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SoftConflict {
    /// No declared range for that weekday fully contains the shift.
    OutsideAvailability {
        employee_id: Ulid,
        date: NaiveDate,
        /// Ranges declared for that weekday, possibly none.
        declared: Vec<(NaiveTime, NaiveTime)>,
    },
    /// The date falls inside an approved time-off period.
    TimeOff {
        employee_id: Ulid,
        date: NaiveDate,
        period_id: Ulid,
        category: TimeOffCategory,
    },
}

impl SoftConflict {
    pub fn employee_id(&self) -> Ulid {
        match self {
            SoftConflict::OutsideAvailability { employee_id, .. }
            | SoftConflict::TimeOff { employee_id, .. } => *employee_id,
        }
    }

    /// Prompt text for the person asked to override.
    pub fn describe(&self, index: &ScheduleIndex) -> String {
        let who = index
            .employee(&self.employee_id())
            .map(|e| e.name.clone())
            .unwrap_or_else(|| "This employee".to_string());
        match self {
            SoftConflict::TimeOff { date, category, .. } => format!(
                "{who} has approved {category} time off on {date}. Schedule anyway?"
            ),
            SoftConflict::OutsideAvailability { date, declared, .. } if declared.is_empty() => format!(
                "{who} has no availability on {}s. Schedule anyway?",
                date.format("%A")
            ),
            SoftConflict::OutsideAvailability { date, declared, .. } => {
                let ranges: Vec<String> = declared
                    .iter()
                    .map(|(s, e)| format!("{}-{}", s.format("%H:%M"), e.format("%H:%M")))
                    .collect();
                format!(
                    "This shift is outside {who}'s availability on {}s ({}). Schedule anyway?",
                    date.format("%A"),
                    ranges.join(", ")
                )
            }
        }
    }
}

/// Everything the detector found for one placement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Assessment {
    /// Same-slot shifts the placement overlaps.
    pub overlaps: Vec<Ulid>,
    /// An employee placement with overlaps. Stacked open shifts are only
    /// listed in `overlaps`, never refused.
    pub double_booked: bool,
    /// At most one soft conflict; time off wins over an availability gap.
    pub soft: Option<SoftConflict>,
}

impl Assessment {
    pub fn is_clear(&self) -> bool {
        !self.double_booked && self.soft.is_none()
    }
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if !span.is_valid() {
        return Err(EngineError::InvalidRange(*span));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SHIFT_DURATION_MS {
        return Err(EngineError::LimitExceeded("shift too long"));
    }
    Ok(())
}

/// Ids of shifts in the placement's `(assignee, day)` slot whose span
/// overlaps it. The excluded shift and cancelled shifts never count.
pub fn overlapping_shifts(index: &ScheduleIndex, placement: &Placement) -> Vec<Ulid> {
    let Some(key) = index.slot_key(placement.assignee, placement.span.start) else {
        return Vec::new();
    };
    index
        .overlapping(key, placement.span)
        .filter(|s| Some(s.id) != placement.exclude)
        .filter(|s| s.status != ShiftStatus::Cancelled)
        .map(|s| s.id)
        .collect()
}

/// Overlaps that refuse the placement. Only an employee can be double-booked.
pub fn blocking_overlaps(index: &ScheduleIndex, placement: &Placement) -> Vec<Ulid> {
    match placement.assignee {
        Assignee::Open => Vec::new(),
        Assignee::Employee(_) => overlapping_shifts(index, placement),
    }
}

/// `None` when at least one range for the shift's weekday contains it.
/// A weekday without ranges is reported as unavailable, never unknown.
pub fn check_availability(index: &ScheduleIndex, employee_id: Ulid, span: &Span) -> Option<SoftConflict> {
    let tz = index.timezone();
    let start = local_datetime(tz, span.start)?;
    let end = local_datetime(tz, span.end)?;
    let date = start.date();
    let weekday = weekday_index(date);

    let declared: Vec<(NaiveTime, NaiveTime)> = index
        .availability_for(&employee_id)
        .iter()
        .filter(|r| r.weekday == weekday)
        .map(|r| (r.start_time, r.end_time))
        .collect();

    // A shift running past midnight cannot sit inside a single clock range.
    let covered = end.date() == date
        && declared
            .iter()
            .any(|&(s, e)| s <= start.time() && end.time() <= e);
    if covered {
        return None;
    }
    Some(SoftConflict::OutsideAvailability {
        employee_id,
        date,
        declared,
    })
}

/// First approved period whose inclusive date range holds `date`.
pub fn check_time_off(index: &ScheduleIndex, employee_id: Ulid, date: NaiveDate) -> Option<&TimeOffPeriod> {
    index
        .time_off_for(&employee_id)
        .iter()
        .find(|p| p.covers(date))
}

/// Run every check for a placement. Open shifts only get the overlap check.
pub fn assess(index: &ScheduleIndex, placement: &Placement) -> Assessment {
    let overlaps = overlapping_shifts(index, placement);
    let double_booked = placement.assignee != Assignee::Open && !overlaps.is_empty();
    let soft = match placement.assignee {
        Assignee::Open => None,
        Assignee::Employee(employee_id) => soft_conflict(index, employee_id, &placement.span),
    };
    Assessment {
        overlaps,
        double_booked,
        soft,
    }
}

fn soft_conflict(index: &ScheduleIndex, employee_id: Ulid, span: &Span) -> Option<SoftConflict> {
    let date = day_key(index.timezone(), span.start)?;
    if let Some(period) = check_time_off(index, employee_id, date) {
        return Some(SoftConflict::TimeOff {
            employee_id,
            date,
            period_id: period.id,
            category: period.category,
        });
    }
    check_availability(index, employee_id, span)
}
