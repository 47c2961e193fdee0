use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, NaiveTime};
use chrono_tz::Tz;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::debug;
use ulid::Ulid;

use crate::model::*;
use crate::normalize::{self, RawWindow};
use crate::notify::ChangeFeed;

/// Structured failure reported by the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayError {
    pub code: Option<String>,
    pub message: String,
}

impl GatewayError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Persistence and query boundary. Implementations own all remote I/O and
/// hand back normalized domain values.
#[async_trait]
pub trait ScheduleGateway: Send + Sync {
    /// Persist a new shift and return it as stored.
    async fn create_shift(&self, org_id: &str, shift: &Shift) -> Result<Shift, GatewayError>;

    async fn update_shift(&self, org_id: &str, shift: &Shift) -> Result<(), GatewayError>;

    async fn delete_shift(&self, org_id: &str, id: Ulid) -> Result<(), GatewayError>;

    /// Everything needed to index `[start, end]` (inclusive local dates).
    async fn fetch_window(
        &self,
        org_id: &str,
        window: WeekWindow,
    ) -> Result<WindowSnapshot, GatewayError>;
}

// ── In-memory store ──────────────────────────────────────────────

#[derive(Default)]
struct OrgTables {
    shifts: BTreeMap<Ulid, Value>,
    availability: Vec<Value>,
    time_off: Vec<Value>,
    employees: Vec<Value>,
}

/// Row store kept in process. Rows are held in their raw JSON form so every
/// read goes through the same normalization as a real remote. Writes can be
/// paused or made to fail, and every write is published to an attached
/// change feed.
pub struct InMemoryGateway {
    tz: Tz,
    orgs: DashMap<String, OrgTables>,
    feed: Option<Arc<ChangeFeed>>,
    failures: Mutex<VecDeque<GatewayError>>,
    paused: watch::Sender<bool>,
    writes: AtomicUsize,
}

impl InMemoryGateway {
    /// `tz` decides which local day a stored shift belongs to when filtering.
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            orgs: DashMap::new(),
            feed: None,
            failures: Mutex::new(VecDeque::new()),
            paused: watch::channel(false).0,
            writes: AtomicUsize::new(0),
        }
    }

    pub fn with_feed(mut self, feed: Arc<ChangeFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Load raw rows for an organization without publishing anything.
    pub fn seed(&self, org_id: &str, raw: RawWindow) {
        let mut tables = self.orgs.entry(org_id.to_string()).or_default();
        for row in raw.shifts {
            match normalize::shift_from_row(&row) {
                Ok(shift) => {
                    tables.shifts.insert(shift.id, row);
                }
                Err(e) => debug!("seed: dropping shift row: {e}"),
            }
        }
        tables.availability.extend(raw.availability);
        tables.time_off.extend(raw.time_off);
        tables.employees.extend(raw.employees);
    }

    /// Simulate a write made by someone else: store the row and publish.
    pub fn external_write(&self, org_id: &str, table: Table, row: Value) {
        let op = {
            let mut tables = self.orgs.entry(org_id.to_string()).or_default();
            match table {
                Table::Shifts => match normalize::shift_from_row(&row) {
                    Ok(shift) => {
                        if tables.shifts.insert(shift.id, row).is_some() {
                            ChangeOp::Update
                        } else {
                            ChangeOp::Insert
                        }
                    }
                    Err(e) => {
                        debug!("external_write: dropping shift row: {e}");
                        return;
                    }
                },
                Table::Availability => {
                    tables.availability.push(row);
                    ChangeOp::Insert
                }
                Table::TimeOff => {
                    tables.time_off.push(row);
                    ChangeOp::Insert
                }
                Table::Employees => {
                    tables.employees.push(row);
                    ChangeOp::Insert
                }
            }
        };
        self.publish(org_id, table, op);
    }

    /// Make the next write fail with `error`. Queued failures apply in order.
    pub async fn fail_next_write(&self, error: GatewayError) {
        self.failures.lock().await.push_back(error);
    }

    /// Hold every write until `resume_writes`.
    pub fn pause_writes(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume_writes(&self) {
        self.paused.send_replace(false);
    }

    /// Writes attempted so far, failed ones included.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn shift_row(&self, org_id: &str, id: &Ulid) -> Option<Value> {
        self.orgs.get(org_id)?.shifts.get(id).cloned()
    }

    fn publish(&self, org_id: &str, table: Table, op: ChangeOp) {
        if let Some(feed) = &self.feed {
            feed.publish(&ChangeEvent {
                org_id: org_id.to_string(),
                table,
                op,
            });
        }
    }

    /// Common prologue for writes: count, honour pause, pop an injected failure.
    async fn begin_write(&self) -> Result<(), GatewayError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.paused.subscribe();
        if rx.wait_for(|paused| !*paused).await.is_err() {
            return Err(GatewayError::new("store shut down"));
        }
        match self.failures.lock().await.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ScheduleGateway for InMemoryGateway {
    async fn create_shift(&self, org_id: &str, shift: &Shift) -> Result<Shift, GatewayError> {
        self.begin_write().await?;
        {
            let mut tables = self.orgs.entry(org_id.to_string()).or_default();
            if tables.shifts.contains_key(&shift.id) {
                return Err(GatewayError::with_code("23505", "duplicate shift id"));
            }
            tables
                .shifts
                .insert(shift.id, normalize::shift_to_row(org_id, shift));
        }
        self.publish(org_id, Table::Shifts, ChangeOp::Insert);
        Ok(shift.clone())
    }

    async fn update_shift(&self, org_id: &str, shift: &Shift) -> Result<(), GatewayError> {
        self.begin_write().await?;
        {
            let mut tables = self
                .orgs
                .get_mut(org_id)
                .ok_or_else(|| GatewayError::with_code("PGRST116", "shift not found"))?;
            let row = tables
                .shifts
                .get_mut(&shift.id)
                .ok_or_else(|| GatewayError::with_code("PGRST116", "shift not found"))?;
            *row = normalize::shift_to_row(org_id, shift);
        }
        self.publish(org_id, Table::Shifts, ChangeOp::Update);
        Ok(())
    }

    async fn delete_shift(&self, org_id: &str, id: Ulid) -> Result<(), GatewayError> {
        self.begin_write().await?;
        let removed = self
            .orgs
            .get_mut(org_id)
            .and_then(|mut tables| tables.shifts.remove(&id));
        if removed.is_none() {
            return Err(GatewayError::with_code("PGRST116", "shift not found"));
        }
        self.publish(org_id, Table::Shifts, ChangeOp::Delete);
        Ok(())
    }

    async fn fetch_window(
        &self,
        org_id: &str,
        window: WeekWindow,
    ) -> Result<WindowSnapshot, GatewayError> {
        let raw = match self.orgs.get(org_id) {
            Some(tables) => RawWindow {
                shifts: tables.shifts.values().cloned().collect(),
                availability: tables.availability.clone(),
                time_off: tables.time_off.clone(),
                employees: tables.employees.clone(),
            },
            None => return Ok(WindowSnapshot::default()),
        };
        let (mut snapshot, skipped) = normalize::snapshot_from_rows(&raw);
        if skipped > 0 {
            debug!(org_id, skipped, "fetch_window skipped malformed rows");
        }

        let lower = local_to_ms(self.tz, window.start, NaiveTime::MIN);
        let upper = local_to_ms(self.tz, window.end() + Duration::days(1), NaiveTime::MIN);
        if let (Some(lower), Some(upper)) = (lower, upper) {
            snapshot
                .shifts
                .retain(|s| s.span.start >= lower && s.span.start < upper);
        }
        snapshot
            .time_off
            .retain(|p| p.starts_at <= window.end() && p.ends_at >= window.start);
        Ok(snapshot)
    }
}
