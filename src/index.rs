use std::collections::HashMap;

use chrono::NaiveDate;
use chrono_tz::Tz;
use tracing::warn;
use ulid::Ulid;

use crate::model::*;

/// Grouping key for shifts: who, and which local calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub assignee: Assignee,
    pub day: NaiveDate,
}

/// In-memory lookup structures for one window.
///
/// Shifts are grouped by `(assignee, day-key)` and kept sorted by start;
/// availability and approved time off are grouped by employee. Pending and
/// denied time off never enter the index.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleIndex {
    tz: Tz,
    slots: HashMap<SlotKey, Vec<Shift>>,
    /// Reverse lookup: shift id → slot it lives in.
    locator: HashMap<Ulid, SlotKey>,
    availability: HashMap<Ulid, Vec<AvailabilityRange>>,
    time_off: HashMap<Ulid, Vec<TimeOffPeriod>>,
    employees: HashMap<Ulid, Employee>,
}

impl ScheduleIndex {
    pub fn empty(tz: Tz) -> Self {
        Self {
            tz,
            slots: HashMap::new(),
            locator: HashMap::new(),
            availability: HashMap::new(),
            time_off: HashMap::new(),
            employees: HashMap::new(),
        }
    }

    /// Build from a snapshot. Pure and O(n); building twice from the same
    /// snapshot yields equal indexes.
    pub fn build(tz: Tz, snapshot: &WindowSnapshot) -> Self {
        let mut index = Self::empty(tz);
        for shift in &snapshot.shifts {
            index.insert_shift(shift.clone());
        }
        for range in &snapshot.availability {
            index
                .availability
                .entry(range.employee_id)
                .or_default()
                .push(range.clone());
        }
        for period in snapshot.time_off.iter().filter(|p| p.is_approved()) {
            index
                .time_off
                .entry(period.employee_id)
                .or_default()
                .push(period.clone());
        }
        for employee in &snapshot.employees {
            index.employees.insert(employee.id, employee.clone());
        }
        index
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn slot_key(&self, assignee: Assignee, at: Ms) -> Option<SlotKey> {
        day_key(self.tz, at).map(|day| SlotKey { assignee, day })
    }

    /// Insert maintaining sort order by start. Replaces any shift with the same id.
    pub fn insert_shift(&mut self, shift: Shift) {
        self.remove_shift(shift.id);
        let Some(key) = self.slot_key(shift.assignee(), shift.span.start) else {
            warn!(shift = %shift.id, start = shift.span.start, "shift start not representable, skipped");
            return;
        };
        let slot = self.slots.entry(key).or_default();
        let pos = slot
            .binary_search_by_key(&shift.span.start, |s| s.span.start)
            .unwrap_or_else(|e| e);
        self.locator.insert(shift.id, key);
        slot.insert(pos, shift);
    }

    pub fn remove_shift(&mut self, id: Ulid) -> Option<Shift> {
        let key = self.locator.remove(&id)?;
        let slot = self.slots.get_mut(&key)?;
        let pos = slot.iter().position(|s| s.id == id)?;
        let removed = slot.remove(pos);
        if slot.is_empty() {
            self.slots.remove(&key);
        }
        Some(removed)
    }

    pub fn shift(&self, id: &Ulid) -> Option<&Shift> {
        let key = self.locator.get(id)?;
        self.slots.get(key)?.iter().find(|s| s.id == *id)
    }

    pub fn contains_shift(&self, id: &Ulid) -> bool {
        self.locator.contains_key(id)
    }

    pub fn shift_count(&self) -> usize {
        self.locator.len()
    }

    /// All shifts in a slot, sorted by start.
    pub fn slot(&self, key: &SlotKey) -> &[Shift] {
        self.slots.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Shifts in a slot whose span overlaps `query`.
    /// Uses binary search to skip shifts starting at or after `query.end`.
    pub fn overlapping(&self, key: SlotKey, query: Span) -> impl Iterator<Item = &Shift> {
        let slot = self.slot(&key);
        let right_bound = slot.partition_point(|s| s.span.start < query.end);
        slot[..right_bound]
            .iter()
            .filter(move |s| s.span.end > query.start)
    }

    /// Every shift, ordered by slot then start.
    pub fn shifts(&self) -> Vec<&Shift> {
        let mut keys: Vec<&SlotKey> = self.slots.keys().collect();
        keys.sort();
        keys.into_iter()
            .flat_map(|k| self.slots[k].iter())
            .collect()
    }

    pub fn availability_for(&self, employee_id: &Ulid) -> &[AvailabilityRange] {
        self.availability
            .get(employee_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Approved time off only.
    pub fn time_off_for(&self, employee_id: &Ulid) -> &[TimeOffPeriod] {
        self.time_off
            .get(employee_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn employee(&self, id: &Ulid) -> Option<&Employee> {
        self.employees.get(id)
    }
}
