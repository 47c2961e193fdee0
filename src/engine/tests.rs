use super::*;
use crate::gateway::{GatewayError, InMemoryGateway};
use crate::index::SlotKey;
use crate::normalize::RawWindow;

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde_json::{json, Value};

const H: Ms = 3_600_000; // 1 hour in ms
const ORG: &str = "org-test";

/// Answers every prompt the same way and keeps the messages.
struct Recorder {
    accept: bool,
    asked: Mutex<Vec<String>>,
}

impl Recorder {
    fn new(accept: bool) -> Arc<Self> {
        Arc::new(Self {
            accept,
            asked: Mutex::new(Vec::new()),
        })
    }

    fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl Confirmer for Recorder {
    async fn request(&self, message: &str) -> bool {
        self.asked.lock().unwrap().push(message.to_string());
        self.accept
    }
}

fn mon() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

fn tue() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 3).unwrap()
}

fn wed() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 4).unwrap()
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn at(date: NaiveDate, h: u32) -> Ms {
    local_to_ms(chrono_tz::UTC, date, hm(h, 0)).unwrap()
}

fn iso(date: NaiveDate, h: u32) -> String {
    format!("{date}T{h:02}:00:00Z")
}

fn shift_row(id: Ulid, employee: Option<Ulid>, date: NaiveDate, start: u32, end: u32) -> Value {
    json!({
        "id": id.to_string(),
        "employee_id": employee.map(|e| e.to_string()),
        "start_time": iso(date, start),
        "end_time": iso(date, end),
        "status": "scheduled",
    })
}

fn availability_row(employee: Ulid, weekday: u8, start: &str, end: &str) -> Value {
    json!({
        "id": Ulid::new().to_string(),
        "employee_id": employee.to_string(),
        "day_of_week": weekday,
        "start_time": start,
        "end_time": end,
    })
}

fn vacation_row(employee: Ulid, date: NaiveDate) -> Value {
    json!({
        "id": Ulid::new().to_string(),
        "employee_id": employee.to_string(),
        "start_date": date.to_string(),
        "end_date": date.to_string(),
        "type": "vacation",
        "status": "approved",
    })
}

fn employee_row(id: Ulid, first: &str, last: &str) -> Value {
    json!({ "id": id.to_string(), "first_name": first, "last_name": last })
}

fn draft(employee: Option<Ulid>, date: NaiveDate, start: u32, end: u32) -> ShiftDraft {
    ShiftDraft {
        employee_id: employee,
        date,
        start_time: hm(start, 0),
        end_time: hm(end, 0),
        position_id: None,
        location_id: None,
        break_minutes: 0,
        notes: None,
    }
}

/// Employee available Mon-Fri 09:00-17:00, nothing else seeded.
fn weekday_rows(employee: Ulid) -> RawWindow {
    RawWindow {
        availability: (1..=5)
            .map(|d| availability_row(employee, d, "09:00", "17:00"))
            .collect(),
        employees: vec![employee_row(employee, "Ada", "Lovelace")],
        ..Default::default()
    }
}

struct Harness {
    engine: Arc<Engine>,
    gateway: Arc<InMemoryGateway>,
    confirmer: Arc<Recorder>,
}

async fn harness_with(rows: RawWindow, accept: bool, config: EngineConfig) -> Harness {
    let gateway = Arc::new(InMemoryGateway::new(config.timezone));
    gateway.seed(ORG, rows);
    let confirmer = Recorder::new(accept);
    let engine = Arc::new(Engine::new(config, gateway.clone(), confirmer.clone()));
    engine.load_window(mon()).await.unwrap();
    Harness {
        engine,
        gateway,
        confirmer,
    }
}

async fn harness(rows: RawWindow, accept: bool) -> Harness {
    let config = EngineConfig {
        org_id: ORG.into(),
        ..Default::default()
    };
    harness_with(rows, accept, config).await
}

fn committed(outcome: MutationOutcome) -> Shift {
    match outcome {
        MutationOutcome::Committed { shift, .. } => shift,
        other => panic!("expected commit, got {other:?}"),
    }
}

// ── Pure detector properties ─────────────────────────────

fn index_with(shifts: Vec<Shift>, rows: &RawWindow) -> ScheduleIndex {
    let (mut snapshot, _) = crate::normalize::snapshot_from_rows(rows);
    snapshot.shifts.extend(shifts);
    ScheduleIndex::build(chrono_tz::UTC, &snapshot)
}

fn plain_shift(employee: Option<Ulid>, start: Ms, end: Ms) -> Shift {
    Shift {
        id: Ulid::new(),
        employee_id: employee,
        position_id: None,
        location_id: None,
        span: Span::new(start, end),
        break_minutes: 0,
        status: ShiftStatus::Scheduled,
        notes: None,
    }
}

#[test]
fn overlap_is_symmetric_and_half_open() {
    let e = Ulid::new();
    let a = plain_shift(Some(e), at(mon(), 9), at(mon(), 13));
    let b = plain_shift(Some(e), at(mon(), 12), at(mon(), 16));
    let c = plain_shift(Some(e), at(mon(), 13), at(mon(), 17));

    assert_eq!(a.span.overlaps(&b.span), b.span.overlaps(&a.span));
    assert!(a.span.overlaps(&b.span));
    assert!(!a.span.overlaps(&c.span));
    assert!(!c.span.overlaps(&a.span));

    let index = index_with(vec![a.clone()], &RawWindow::default());
    let back_to_back = Placement {
        assignee: Assignee::Employee(e),
        span: c.span,
        exclude: None,
    };
    assert!(overlapping_shifts(&index, &back_to_back).is_empty());
    let overlapping = Placement {
        assignee: Assignee::Employee(e),
        span: b.span,
        exclude: None,
    };
    assert_eq!(overlapping_shifts(&index, &overlapping), vec![a.id]);
}

#[test]
fn other_employees_and_open_shifts_do_not_collide() {
    let e = Ulid::new();
    let other = plain_shift(Some(Ulid::new()), at(mon(), 9), at(mon(), 17));
    let open = plain_shift(None, at(mon(), 9), at(mon(), 17));
    let index = index_with(vec![other, open.clone()], &RawWindow::default());

    let mine = Placement {
        assignee: Assignee::Employee(e),
        span: Span::new(at(mon(), 10), at(mon(), 12)),
        exclude: None,
    };
    assert!(overlapping_shifts(&index, &mine).is_empty());

    // Open shifts see each other but may stack.
    let another_open = Placement {
        assignee: Assignee::Open,
        ..mine
    };
    assert_eq!(overlapping_shifts(&index, &another_open), vec![open.id]);
    assert!(blocking_overlaps(&index, &another_open).is_empty());
    let assessment = assess(&index, &another_open);
    assert!(!assessment.double_booked);
    assert!(assessment.is_clear());
}

#[test]
fn same_times_never_conflict_with_self() {
    let e = Ulid::new();
    let a = plain_shift(Some(e), at(mon(), 9), at(mon(), 17));
    let index = index_with(vec![a.clone()], &weekday_rows(e));
    let same = Placement {
        assignee: Assignee::Employee(e),
        span: a.span,
        exclude: Some(a.id),
    };
    assert!(assess(&index, &same).is_clear());
}

#[test]
fn cancelled_shifts_are_ignored() {
    let e = Ulid::new();
    let mut a = plain_shift(Some(e), at(mon(), 9), at(mon(), 17));
    a.status = ShiftStatus::Cancelled;
    let index = index_with(vec![a.clone()], &RawWindow::default());
    let p = Placement {
        assignee: Assignee::Employee(e),
        span: a.span,
        exclude: None,
    };
    assert!(overlapping_shifts(&index, &p).is_empty());
}

#[test]
fn weekday_without_ranges_is_always_unavailable() {
    let e = Ulid::new();
    let rows = RawWindow {
        availability: vec![availability_row(e, 1, "00:00", "23:59")],
        ..Default::default()
    };
    let index = index_with(Vec::new(), &rows);
    for h in 0..23 {
        let span = Span::new(at(tue(), h), at(tue(), h + 1));
        match check_availability(&index, e, &span) {
            Some(SoftConflict::OutsideAvailability { declared, .. }) => assert!(declared.is_empty()),
            other => panic!("hour {h}: expected unavailable, got {other:?}"),
        }
    }

    // No ranges at all behaves like an empty weekday.
    let stranger = Ulid::new();
    let span = Span::new(at(mon(), 9), at(mon(), 10));
    assert!(check_availability(&index, stranger, &span).is_some());
}

#[test]
fn split_availability_needs_one_covering_range() {
    let e = Ulid::new();
    let rows = RawWindow {
        availability: vec![
            availability_row(e, 1, "06:00", "10:00"),
            availability_row(e, 1, "14:00", "22:00"),
        ],
        ..Default::default()
    };
    let index = index_with(Vec::new(), &rows);
    let morning = Span::new(at(mon(), 6), at(mon(), 10));
    let evening = Span::new(at(mon(), 15), at(mon(), 22));
    let straddling = Span::new(at(mon(), 9), at(mon(), 15));
    assert!(check_availability(&index, e, &morning).is_none());
    assert!(check_availability(&index, e, &evening).is_none());
    assert!(check_availability(&index, e, &straddling).is_some());
}

#[test]
fn time_off_takes_precedence_over_availability() {
    let e = Ulid::new();
    let rows = RawWindow {
        time_off: vec![vacation_row(e, wed())],
        ..Default::default()
    };
    let index = index_with(Vec::new(), &rows);
    let p = Placement {
        assignee: Assignee::Employee(e),
        span: Span::new(at(wed(), 20), at(wed(), 23)),
        exclude: None,
    };
    match assess(&index, &p).soft {
        Some(SoftConflict::TimeOff { category, .. }) => {
            assert_eq!(category, TimeOffCategory::Vacation)
        }
        other => panic!("expected time off, got {other:?}"),
    }
}

#[test]
fn open_placement_skips_soft_checks() {
    let e = Ulid::new();
    let rows = RawWindow {
        time_off: vec![vacation_row(e, wed())],
        ..Default::default()
    };
    let index = index_with(Vec::new(), &rows);
    let p = Placement {
        assignee: Assignee::Open,
        span: Span::new(at(wed(), 2), at(wed(), 4)),
        exclude: None,
    };
    assert!(assess(&index, &p).is_clear());
}

#[test]
fn validate_span_rejects_bad_ranges() {
    assert!(matches!(
        conflict::validate_span(&Span::new(at(mon(), 9), at(mon(), 9))),
        Err(EngineError::InvalidRange(_))
    ));
    assert!(matches!(
        conflict::validate_span(&Span::new(at(mon(), 9), at(mon(), 9) + 25 * H)),
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(conflict::validate_span(&Span::new(at(mon(), 9), at(mon(), 17))).is_ok());
}

// ── Example scenarios ────────────────────────────────────

#[tokio::test]
async fn create_before_availability_asks_for_override() {
    let e = Ulid::new();
    let h = harness(weekday_rows(e), true).await;

    let outcome = h.engine.create_shift(draft(Some(e), mon(), 8, 12)).await.unwrap();
    match &outcome {
        MutationOutcome::Committed {
            overridden: Some(SoftConflict::OutsideAvailability { .. }),
            ..
        } => {}
        other => panic!("expected overridden availability, got {other:?}"),
    }
    let asked = h.confirmer.asked();
    assert_eq!(asked.len(), 1);
    assert!(asked[0].contains("Ada Lovelace"));
    assert!(asked[0].contains("09:00-17:00"));

    let shift = committed(outcome);
    assert!(h.engine.shift(&shift.id).await.is_some());
    assert!(h.gateway.shift_row(ORG, &shift.id).is_some());
}

#[tokio::test]
async fn time_off_prompt_names_category() {
    let e = Ulid::new();
    let mut rows = weekday_rows(e);
    rows.time_off.push(vacation_row(e, wed()));
    let h = harness(rows, false).await;

    let outcome = h.engine.create_shift(draft(Some(e), wed(), 10, 14)).await.unwrap();
    assert!(matches!(
        outcome,
        MutationOutcome::Declined {
            conflict: SoftConflict::TimeOff { .. }
        }
    ));
    let asked = h.confirmer.asked();
    assert_eq!(asked.len(), 1);
    assert!(asked[0].contains("vacation"), "{}", asked[0]);
}

#[tokio::test]
async fn overlapping_create_is_rejected_without_prompt() {
    let e = Ulid::new();
    let a = Ulid::new();
    let mut rows = weekday_rows(e);
    rows.shifts.push(shift_row(a, Some(e), tue(), 9, 17));
    let h = harness(rows, true).await;

    let err = h.engine.create_shift(draft(Some(e), tue(), 16, 20)).await.unwrap_err();
    match err {
        EngineError::HardOverlap { conflicting, .. } => assert_eq!(conflicting, vec![a]),
        other => panic!("expected overlap, got {other:?}"),
    }
    assert!(h.confirmer.asked().is_empty());
    assert_eq!(h.gateway.write_count(), 0);
}

#[tokio::test]
async fn move_to_free_day_keeps_hours() {
    let e = Ulid::new();
    let a = Ulid::new();
    let mut rows = weekday_rows(e);
    rows.shifts.push(shift_row(a, Some(e), mon(), 9, 17));
    let h = harness(rows, false).await;

    let outcome = h
        .engine
        .move_shift(a, Assignee::Employee(e), tue())
        .await
        .unwrap();
    let moved = committed(outcome);
    assert_eq!(moved.span, Span::new(at(tue(), 9), at(tue(), 17)));
    assert_eq!(moved.span.duration_ms(), 8 * H);
    assert!(h.confirmer.asked().is_empty());

    let view = h.engine.view().await;
    let tue_slot = SlotKey {
        assignee: Assignee::Employee(e),
        day: tue(),
    };
    assert_eq!(view.slot(&tue_slot).len(), 1);
    assert_eq!(h.engine.pending_overlays().await, 0);
}

#[tokio::test]
async fn failed_move_restores_original_slot() {
    let e = Ulid::new();
    let a = Ulid::new();
    let mut rows = weekday_rows(e);
    rows.shifts.push(shift_row(a, Some(e), mon(), 9, 17));
    let h = harness(rows, false).await;
    let before = h.engine.view().await;

    h.gateway
        .fail_next_write(GatewayError::with_code("500", "boom"))
        .await;
    let err = h
        .engine
        .move_shift(a, Assignee::Employee(e), tue())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RemoteWrite(_)));
    assert!(err.to_string().contains("boom"));

    let after = h.engine.view().await;
    assert_eq!(after, before);
    let mon_slot = SlotKey {
        assignee: Assignee::Employee(e),
        day: mon(),
    };
    assert_eq!(after.slot(&mon_slot)[0].id, a);
    assert_eq!(h.engine.pending_overlays().await, 0);
}

// ── Transaction behaviour ────────────────────────────────

#[tokio::test]
async fn move_preserves_duration_and_time_of_day() {
    let e = Ulid::new();
    let a = Ulid::new();
    let mut rows = weekday_rows(e);
    rows.shifts.push(json!({
        "id": a.to_string(),
        "employee_id": e.to_string(),
        "start_time": "2026-03-02T09:15:00Z",
        "end_time": "2026-03-02T16:45:00Z",
    }));
    let h = harness(rows, true).await;
    let original = h.engine.shift(&a).await.unwrap();

    let moved = committed(
        h.engine
            .move_shift(a, Assignee::Employee(e), NaiveDate::from_ymd_opt(2026, 3, 6).unwrap())
            .await
            .unwrap(),
    );
    assert_eq!(moved.span.duration_ms(), original.span.duration_ms());
    let tz = chrono_tz::UTC;
    assert_eq!(
        local_datetime(tz, moved.span.start).unwrap().time(),
        local_datetime(tz, original.span.start).unwrap().time()
    );
    assert_eq!(
        local_datetime(tz, moved.span.end).unwrap().time(),
        local_datetime(tz, original.span.end).unwrap().time()
    );
}

#[tokio::test]
async fn move_to_open_clears_employee_and_skips_checks() {
    let e = Ulid::new();
    let a = Ulid::new();
    let mut rows = weekday_rows(e);
    rows.time_off.push(vacation_row(e, wed()));
    rows.shifts.push(shift_row(a, Some(e), wed(), 9, 17));
    let h = harness(rows, false).await;

    let moved = committed(h.engine.move_shift(a, Assignee::Open, wed()).await.unwrap());
    assert_eq!(moved.employee_id, None);
    assert!(h.confirmer.asked().is_empty());
    let row = h.gateway.shift_row(ORG, &a).unwrap();
    assert!(row["employee_id"].is_null());
}

#[tokio::test]
async fn update_to_same_times_commits_silently() {
    let e = Ulid::new();
    let a = Ulid::new();
    let mut rows = weekday_rows(e);
    rows.shifts.push(shift_row(a, Some(e), mon(), 9, 17));
    let h = harness(rows, false).await;

    let mut edit = draft(Some(e), mon(), 9, 17);
    edit.break_minutes = 30;
    edit.notes = Some("till".into());
    let updated = committed(h.engine.update_shift(a, edit).await.unwrap());
    assert_eq!(updated.break_minutes, 30);
    assert_eq!(updated.worked_minutes(), 450);
    assert!(h.confirmer.asked().is_empty());
    assert_eq!(h.gateway.shift_row(ORG, &a).unwrap()["notes"], "till");
}

#[tokio::test]
async fn declined_override_has_no_side_effects() {
    let e = Ulid::new();
    let a = Ulid::new();
    let mut rows = weekday_rows(e);
    rows.shifts.push(shift_row(a, Some(e), mon(), 9, 17));
    let h = harness(rows, false).await;
    let before = h.engine.view().await;

    // Saturday has no availability.
    let sat = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
    let outcome = h
        .engine
        .move_shift(a, Assignee::Employee(e), sat)
        .await
        .unwrap();
    assert!(matches!(outcome, MutationOutcome::Declined { .. }));
    assert_eq!(h.engine.view().await, before);
    assert_eq!(h.gateway.write_count(), 0);
}

#[tokio::test]
async fn failed_create_leaves_index_untouched() {
    let e = Ulid::new();
    let h = harness(weekday_rows(e), true).await;
    let before = h.engine.view().await;

    h.gateway.fail_next_write(GatewayError::new("offline")).await;
    let err = h.engine.create_shift(draft(Some(e), mon(), 9, 12)).await.unwrap_err();
    assert!(matches!(err, EngineError::RemoteWrite(_)));
    assert_eq!(h.engine.view().await, before);
}

#[tokio::test]
async fn failed_update_restores_snapshot() {
    let e = Ulid::new();
    let a = Ulid::new();
    let mut rows = weekday_rows(e);
    rows.shifts.push(shift_row(a, Some(e), mon(), 9, 17));
    let h = harness(rows, true).await;
    let before = h.engine.view().await;

    h.gateway
        .fail_next_write(GatewayError::with_code("503", "unavailable"))
        .await;
    let mut edit = draft(Some(e), mon(), 10, 14);
    edit.break_minutes = 15;
    edit.notes = Some("cover lunch".into());
    let err = h.engine.update_shift(a, edit).await.unwrap_err();
    assert!(matches!(err, EngineError::RemoteWrite(_)));

    assert_eq!(h.engine.view().await, before);
    let shown = h.engine.shift(&a).await.unwrap();
    assert_eq!(shown.span, Span::new(at(mon(), 9), at(mon(), 17)));
    assert_eq!(shown.notes, None);
    assert_eq!(h.engine.pending_overlays().await, 0);
}

#[tokio::test]
async fn failed_delete_reinserts_shift() {
    let e = Ulid::new();
    let a = Ulid::new();
    let mut rows = weekday_rows(e);
    rows.shifts.push(shift_row(a, Some(e), mon(), 9, 17));
    let h = harness(rows, false).await;
    let before = h.engine.view().await;

    h.gateway.fail_next_write(GatewayError::new("offline")).await;
    assert!(h.engine.delete_shift(a).await.is_err());
    assert_eq!(h.engine.view().await, before);

    let removed = committed(h.engine.delete_shift(a).await.unwrap());
    assert_eq!(removed.id, a);
    assert!(h.engine.shift(&a).await.is_none());
    assert!(h.gateway.shift_row(ORG, &a).is_none());
}

#[tokio::test]
async fn write_timeout_rolls_back() {
    let e = Ulid::new();
    let a = Ulid::new();
    let mut rows = weekday_rows(e);
    rows.shifts.push(shift_row(a, Some(e), mon(), 9, 17));
    let config = EngineConfig {
        org_id: ORG.into(),
        write_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let h = harness_with(rows, false, config).await;
    let before = h.engine.view().await;

    h.gateway.pause_writes();
    let err = h
        .engine
        .move_shift(a, Assignee::Employee(e), tue())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RemoteTimeout));
    assert_eq!(h.engine.view().await, before);
}

#[tokio::test]
async fn reconcile_keeps_in_flight_overlay() {
    let e = Ulid::new();
    let a = Ulid::new();
    let mut rows = weekday_rows(e);
    rows.shifts.push(shift_row(a, Some(e), mon(), 9, 17));
    let h = harness(rows, false).await;

    h.gateway.pause_writes();
    let engine = h.engine.clone();
    let pending = tokio::spawn(async move {
        engine.move_shift(a, Assignee::Employee(e), tue()).await
    });
    while h.engine.pending_overlays().await == 0 {
        tokio::task::yield_now().await;
    }

    // Store still has Monday; the sweep must not undo the optimistic Tuesday.
    h.engine.reconcile().await.unwrap();
    let shown = h.engine.shift(&a).await.unwrap();
    assert_eq!(day_key(chrono_tz::UTC, shown.span.start), Some(tue()));

    h.gateway.resume_writes();
    committed(pending.await.unwrap().unwrap());
    assert_eq!(h.engine.pending_overlays().await, 0);

    h.engine.reconcile().await.unwrap();
    let shown = h.engine.shift(&a).await.unwrap();
    assert_eq!(day_key(chrono_tz::UTC, shown.span.start), Some(tue()));
}

#[tokio::test]
async fn pending_create_blocks_overlapping_create() {
    let e = Ulid::new();
    let h = harness(weekday_rows(e), true).await;

    h.gateway.pause_writes();
    let engine = h.engine.clone();
    let first = tokio::spawn(async move {
        engine.create_shift(draft(Some(e), mon(), 9, 17)).await
    });
    while h.engine.pending_overlays().await == 0 {
        tokio::task::yield_now().await;
    }

    let err = h.engine.create_shift(draft(Some(e), mon(), 12, 16)).await.unwrap_err();
    assert!(matches!(err, EngineError::HardOverlap { .. }));

    h.gateway.resume_writes();
    let created = committed(first.await.unwrap().unwrap());
    assert_eq!(h.gateway.write_count(), 1);
    let view = h.engine.view().await;
    assert_eq!(view.shift_count(), 1);
    assert!(view.shift(&created.id).is_some());
}

#[tokio::test]
async fn write_landing_after_week_change_stays_in_its_week() {
    let e = Ulid::new();
    let a = Ulid::new();
    let mut rows = weekday_rows(e);
    rows.shifts.push(shift_row(a, Some(e), mon(), 9, 17));
    let h = harness(rows, true).await;

    h.gateway.pause_writes();
    let engine = h.engine.clone();
    let pending = tokio::spawn(async move {
        engine.move_shift(a, Assignee::Employee(e), tue()).await
    });
    while h.engine.pending_overlays().await == 0 {
        tokio::task::yield_now().await;
    }

    let window = h.engine.next_window().await.unwrap();
    assert_eq!(window.start, NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());
    assert!(h.engine.shift(&a).await.is_none());

    h.gateway.resume_writes();
    committed(pending.await.unwrap().unwrap());
    assert_eq!(h.engine.pending_overlays().await, 0);
    assert!(h.engine.shift(&a).await.is_none());
    assert_eq!(h.engine.view().await.shift_count(), 0);
    assert!(h.engine.worked_minutes().await.is_empty());
    assert!(h.engine.conflicts_in_window().await.is_empty());

    h.engine.prev_window().await.unwrap();
    let shown = h.engine.shift(&a).await.unwrap();
    assert_eq!(day_key(chrono_tz::UTC, shown.span.start), Some(tue()));
}

#[tokio::test]
async fn reconcile_picks_up_external_writes() {
    let e = Ulid::new();
    let h = harness(weekday_rows(e), false).await;
    let b = Ulid::new();
    h.gateway.external_write(
        ORG,
        crate::model::Table::Shifts,
        shift_row(b, Some(e), tue(), 9, 12),
    );
    assert!(h.engine.shift(&b).await.is_none());
    h.engine.reconcile().await.unwrap();
    assert!(h.engine.shift(&b).await.is_some());

    // The new shift now blocks an overlapping create.
    let err = h.engine.create_shift(draft(Some(e), tue(), 11, 14)).await.unwrap_err();
    assert!(matches!(err, EngineError::HardOverlap { .. }));
}

#[tokio::test]
async fn finalized_shifts_locked_when_configured() {
    let e = Ulid::new();
    let a = Ulid::new();
    let mut rows = weekday_rows(e);
    let mut row = shift_row(a, Some(e), mon(), 9, 17);
    row["status"] = json!("completed");
    rows.shifts.push(row);

    let open = harness(rows.clone(), false).await;
    assert!(open.engine.delete_shift(a).await.is_ok());

    let config = EngineConfig {
        org_id: ORG.into(),
        lock_finalized_shifts: true,
        ..Default::default()
    };
    let locked = harness_with(rows, false, config).await;
    let err = locked
        .engine
        .move_shift(a, Assignee::Employee(e), tue())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ShiftFinalized(id, ShiftStatus::Completed) if id == a));
    assert_eq!(locked.gateway.write_count(), 0);
}

#[tokio::test]
async fn invalid_and_out_of_window_input_rejected() {
    let e = Ulid::new();
    let h = harness(weekday_rows(e), true).await;

    let err = h.engine.create_shift(draft(Some(e), mon(), 17, 9)).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRange(_)));
    assert_eq!(err.to_string(), "end time must be after start time");

    let next_monday = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
    let err = h
        .engine
        .create_shift(draft(Some(e), next_monday, 9, 17))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::OutsideWindow(d) if d == next_monday));

    let err = h.engine.delete_shift(Ulid::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert_eq!(h.gateway.write_count(), 0);
}

#[tokio::test]
async fn nothing_placed_before_a_window_loads() {
    let gateway = Arc::new(InMemoryGateway::new(chrono_tz::UTC));
    let engine = Engine::new(EngineConfig::default(), gateway, Recorder::new(true));
    let err = engine
        .create_shift(draft(None, mon(), 9, 17))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoWindow));
    assert!(matches!(engine.reconcile().await, Err(EngineError::NoWindow)));
}

#[tokio::test]
async fn dst_gap_is_unresolvable() {
    let config = EngineConfig {
        org_id: ORG.into(),
        timezone: chrono_tz::America::New_York,
        ..Default::default()
    };
    let h = harness_with(RawWindow::default(), true, config).await;
    // Clocks jump from 02:00 to 03:00 on 2026-03-08.
    let sunday = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
    let mut d = draft(None, sunday, 1, 5);
    d.start_time = hm(2, 30);
    let err = h.engine.create_shift(d).await.unwrap_err();
    assert!(matches!(err, EngineError::UnresolvableLocalTime(_, t) if t == hm(2, 30)));
}

#[tokio::test]
async fn queued_confirmations_resolve_in_order() {
    let e = Ulid::new();
    let gateway = Arc::new(InMemoryGateway::new(chrono_tz::UTC));
    gateway.seed(ORG, weekday_rows(e));
    let (queue, mut prompts) = ConfirmationQueue::new();
    let config = EngineConfig {
        org_id: ORG.into(),
        ..Default::default()
    };
    let engine = Arc::new(Engine::new(config, gateway.clone(), Arc::new(queue)));
    engine.load_window(mon()).await.unwrap();

    let sat = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.create_shift(draft(Some(e), mon(), 6, 8)).await }
    });
    let second = tokio::spawn({
        let engine = engine.clone();
        async move { engine.create_shift(draft(Some(e), sat, 10, 12)).await }
    });

    // Decline the early-morning one, accept the weekend one.
    for _ in 0..2 {
        let prompt = prompts.recv().await.unwrap();
        if prompt.message.contains("Saturday") {
            prompt.accept();
        } else {
            prompt.reject();
        }
    }

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert!(matches!(first, MutationOutcome::Declined { .. }));
    assert!(matches!(second, MutationOutcome::Committed { overridden: Some(_), .. }));
    assert_eq!(gateway.write_count(), 1);
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn assess_draft_reports_without_changing_anything() {
    let e = Ulid::new();
    let a = Ulid::new();
    let mut rows = weekday_rows(e);
    rows.shifts.push(shift_row(a, Some(e), mon(), 9, 17));
    rows.time_off.push(vacation_row(e, wed()));
    let h = harness(rows, true).await;

    let clash = h.engine.assess_draft(&draft(Some(e), mon(), 16, 18), None).await.unwrap();
    assert_eq!(clash.overlaps, vec![a]);
    assert!(matches!(clash.soft, Some(SoftConflict::OutsideAvailability { .. })));

    let own = h.engine.assess_draft(&draft(Some(e), mon(), 10, 16), Some(a)).await.unwrap();
    assert!(own.is_clear());

    let away = h.engine.assess_draft(&draft(Some(e), wed(), 9, 17), None).await.unwrap();
    assert!(matches!(away.soft, Some(SoftConflict::TimeOff { .. })));

    assert!(h.confirmer.asked().is_empty());
    assert_eq!(h.gateway.write_count(), 0);
}

#[tokio::test]
async fn window_scan_lists_conflicted_shifts() {
    let e = Ulid::new();
    let (a, b, c) = (Ulid::new(), Ulid::new(), Ulid::new());
    let mut rows = weekday_rows(e);
    rows.shifts.push(shift_row(a, Some(e), mon(), 9, 13));
    rows.shifts.push(shift_row(b, Some(e), mon(), 12, 16));
    rows.shifts.push(shift_row(c, Some(e), tue(), 9, 17));
    let h = harness(rows, true).await;

    let found = h.engine.conflicts_in_window().await;
    let ids: Vec<Ulid> = found.iter().map(|(s, _)| s.id).collect();
    assert_eq!(ids, vec![a, b]);
    assert_eq!(found[0].1.overlaps, vec![b]);
}

#[tokio::test]
async fn identical_open_shifts_can_coexist() {
    let e = Ulid::new();
    let h = harness(weekday_rows(e), false).await;

    let first = committed(h.engine.create_shift(draft(None, mon(), 9, 17)).await.unwrap());
    let second = committed(h.engine.create_shift(draft(None, mon(), 9, 17)).await.unwrap());
    assert_ne!(first.id, second.id);
    assert!(h.confirmer.asked().is_empty());

    let view = h.engine.view().await;
    let open_slot = SlotKey {
        assignee: Assignee::Open,
        day: mon(),
    };
    assert_eq!(view.slot(&open_slot).len(), 2);
    assert!(h.engine.conflicts_in_window().await.is_empty());

    let third = h.engine.assess_draft(&draft(None, mon(), 9, 17), None).await.unwrap();
    assert_eq!(third.overlaps.len(), 2);
    assert!(third.is_clear());
}

#[tokio::test]
async fn worked_minutes_per_employee() {
    let e = Ulid::new();
    let mut rows = weekday_rows(e);
    let mut row = shift_row(Ulid::new(), Some(e), mon(), 9, 17);
    row["break_minutes"] = json!(30);
    rows.shifts.push(row);
    rows.shifts.push(shift_row(Ulid::new(), Some(e), tue(), 9, 13));
    rows.shifts.push(shift_row(Ulid::new(), None, tue(), 9, 13));
    let h = harness(rows, true).await;

    assert_eq!(h.engine.worked_minutes().await, vec![(e, 450 + 240)]);
}

#[tokio::test]
async fn oversized_fetch_fails_and_keeps_current_view() {
    let e = Ulid::new();
    let a = Ulid::new();
    let mut rows = weekday_rows(e);
    rows.shifts.push(shift_row(a, Some(e), mon(), 9, 17));
    let h = harness(rows, true).await;
    let before = h.engine.view().await;

    let flood = RawWindow {
        availability: (0..=crate::limits::MAX_WINDOW_RECORDS)
            .map(|_| availability_row(e, 1, "09:00", "17:00"))
            .collect(),
        ..Default::default()
    };
    h.gateway.seed(ORG, flood);

    let err = h.engine.reconcile().await.unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
    assert_eq!(h.engine.view().await, before);
}

#[tokio::test]
async fn week_navigation_refetches() {
    let e = Ulid::new();
    let next_tue = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
    let b = Ulid::new();
    let mut rows = weekday_rows(e);
    rows.shifts.push(shift_row(b, Some(e), next_tue, 9, 17));
    let h = harness(rows, true).await;
    assert!(h.engine.shift(&b).await.is_none());

    let window = h.engine.next_window().await.unwrap();
    assert_eq!(window.start, NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());
    assert!(h.engine.shift(&b).await.is_some());

    let window = h.engine.prev_window().await.unwrap();
    assert_eq!(window.start, mon());
    assert!(h.engine.shift(&b).await.is_none());
}
