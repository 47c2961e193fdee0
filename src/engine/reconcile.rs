use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, info, warn};

use crate::index::ScheduleIndex;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

impl Engine {
    /// Load the week containing `date` and make it the current window.
    pub async fn load_window(&self, date: NaiveDate) -> Result<WeekWindow, EngineError> {
        let window = WeekWindow::containing(date, self.config.week_starts_on);
        let generation = {
            let mut state = self.state.write().await;
            state.generation += 1;
            state.window = Some(window);
            state.generation
        };
        info!(org = %self.config.org_id, start = %window.start, "loading window");
        self.fetch_and_rebuild(window, generation).await?;
        Ok(window)
    }

    pub async fn next_window(&self) -> Result<WeekWindow, EngineError> {
        let current = self.window().await.ok_or(EngineError::NoWindow)?;
        self.load_window(current.next().start).await
    }

    pub async fn prev_window(&self) -> Result<WeekWindow, EngineError> {
        let current = self.window().await.ok_or(EngineError::NoWindow)?;
        self.load_window(current.prev().start).await
    }

    /// Full re-fetch and rebuild of the current window. Never patches
    /// individual records, and never touches in-flight overlays.
    pub async fn reconcile(&self) -> Result<(), EngineError> {
        let (window, generation) = {
            let state = self.state.read().await;
            (state.window.ok_or(EngineError::NoWindow)?, state.generation)
        };
        self.fetch_and_rebuild(window, generation).await
    }

    async fn fetch_and_rebuild(&self, window: WeekWindow, generation: u64) -> Result<(), EngineError> {
        let started = Instant::now();
        let since_epoch = self.state.read().await.epoch;

        let fresh = match self.fetch_index(window).await {
            Ok(fresh) => fresh,
            Err(e) => {
                record_sweep("error", started);
                return Err(e);
            }
        };

        let mut state = self.state.write().await;
        if state.generation != generation {
            debug!(start = %window.start, "window changed during fetch, dropping result");
            record_sweep("stale", started);
            return Ok(());
        }
        state.replace_committed(fresh, since_epoch);
        debug!(
            start = %window.start,
            shifts = state.committed.shift_count(),
            pending = state.overlays.len(),
            "index rebuilt"
        );
        record_sweep("ok", started);
        Ok(())
    }

    async fn fetch_index(&self, window: WeekWindow) -> Result<ScheduleIndex, EngineError> {
        let snapshot = self
            .gateway
            .fetch_window(&self.config.org_id, window)
            .await
            .map_err(EngineError::Fetch)?;
        let records = snapshot.shifts.len()
            + snapshot.availability.len()
            + snapshot.time_off.len()
            + snapshot.employees.len();
        if records > MAX_WINDOW_RECORDS {
            return Err(EngineError::LimitExceeded("too many records in window"));
        }
        Ok(ScheduleIndex::build(self.config.timezone, &snapshot))
    }
}

fn record_sweep(status: &'static str, started: Instant) {
    metrics::counter!(observability::RECONCILE_TOTAL, "status" => status).increment(1);
    metrics::histogram!(observability::RECONCILE_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
}

/// Background task: rebuild the index whenever the organization's data
/// changes remotely. Bursts of events collapse into one sweep.
pub async fn run_reconciler(engine: Arc<Engine>, mut rx: broadcast::Receiver<ChangeEvent>) {
    let org = engine.config.org_id.clone();
    loop {
        match rx.recv().await {
            Ok(event) if event.org_id != org => continue,
            Ok(event) => debug!(table = ?event.table, op = ?event.op, "change received"),
            Err(RecvError::Lagged(missed)) => debug!(missed, "change feed lagged"),
            Err(RecvError::Closed) => break,
        }

        // Drain whatever else is queued; one rebuild covers it all.
        let mut closed = false;
        loop {
            match rx.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => {
                    closed = true;
                    break;
                }
            }
        }

        match engine.reconcile().await {
            Ok(()) | Err(EngineError::NoWindow) => {}
            Err(e) => warn!(org = %org, "reconcile failed: {e}"),
        }
        if closed {
            break;
        }
    }
    info!(org = %org, "change feed closed, reconciler stopped");
}
