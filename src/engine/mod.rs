mod conflict;
mod confirm;
mod error;
mod mutations;
mod queries;
mod reconcile;
#[cfg(test)]
mod tests;

pub use conflict::{
    assess, blocking_overlaps, check_availability, check_time_off, overlapping_shifts, Assessment,
    SoftConflict,
};
pub use confirm::{ConfirmationQueue, Confirmer, Prompt};
pub use error::EngineError;
pub use mutations::{MutationKind, MutationOutcome, TxnPhase};
pub use reconcile::run_reconciler;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono_tz::Tz;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::gateway::ScheduleGateway;
use crate::index::ScheduleIndex;
use crate::limits::*;
use crate::model::*;

/// Committed changes remembered for replay over a fetch that raced them.
const RECENT_COMMITS: usize = 256;

/// One optimistic change: the shift as it was, and as it should become.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct Overlay {
    /// `None` for a shift that did not exist yet.
    pub before: Option<Shift>,
    /// `None` for a deletion.
    pub after: Option<Shift>,
}

impl Overlay {
    fn shift_id(&self) -> Option<Ulid> {
        self.before
            .as_ref()
            .or(self.after.as_ref())
            .map(|s| s.id)
    }

    /// Patch `index`. The new version only lands if its day is in `window`,
    /// so a change made under an earlier window cannot leak into this one.
    fn apply(&self, index: &mut ScheduleIndex, window: Option<WeekWindow>) {
        if let Some(id) = self.shift_id() {
            index.remove_shift(id);
        }
        let Some(after) = &self.after else { return };
        let in_window = match window {
            Some(w) => day_key(index.timezone(), after.span.start).is_some_and(|d| w.contains(d)),
            None => true,
        };
        if in_window {
            index.insert_shift(after.clone());
        }
    }
}

/// Index state with a clean split between what the store has acknowledged
/// and what is still in flight.
///
/// `view` is always `committed` with every live overlay applied in start
/// order. Rolling back discards an overlay; a reconcile sweep only ever
/// replaces `committed`, so it cannot erase an in-flight change.
pub(super) struct EngineState {
    pub window: Option<WeekWindow>,
    /// Bumped whenever the window changes; fetches for older windows are dropped.
    pub generation: u64,
    pub committed: ScheduleIndex,
    pub overlays: BTreeMap<u64, Overlay>,
    next_overlay: u64,
    pub view: ScheduleIndex,
    /// Count of commits applied to `committed`.
    pub epoch: u64,
    recent: VecDeque<(u64, Overlay)>,
}

impl EngineState {
    fn new(tz: Tz) -> Self {
        Self {
            window: None,
            generation: 0,
            committed: ScheduleIndex::empty(tz),
            overlays: BTreeMap::new(),
            next_overlay: 0,
            view: ScheduleIndex::empty(tz),
            epoch: 0,
            recent: VecDeque::new(),
        }
    }

    fn rematerialize(&mut self) {
        let mut view = self.committed.clone();
        for overlay in self.overlays.values() {
            overlay.apply(&mut view, self.window);
        }
        self.view = view;
        metrics::gauge!(crate::observability::OVERLAYS_PENDING).set(self.overlays.len() as f64);
    }

    /// Apply an optimistic change to the view. Returns its handle.
    pub fn push_overlay(&mut self, overlay: Overlay) -> u64 {
        let seq = self.next_overlay;
        self.next_overlay += 1;
        overlay.apply(&mut self.view, self.window);
        self.overlays.insert(seq, overlay);
        metrics::gauge!(crate::observability::OVERLAYS_PENDING).set(self.overlays.len() as f64);
        seq
    }

    /// Rollback: forget the overlay and rebuild the view without it.
    pub fn discard_overlay(&mut self, seq: u64) {
        if self.overlays.remove(&seq).is_some() {
            self.rematerialize();
        }
    }

    /// The store acknowledged the change: fold it into `committed`.
    /// `stored` replaces the optimistic version when the store returned one.
    pub fn commit_overlay(&mut self, seq: u64, stored: Option<Shift>) {
        if let Some(mut overlay) = self.overlays.remove(&seq) {
            if stored.is_some() {
                overlay.after = stored;
            }
            self.record_commit(overlay);
            self.rematerialize();
        }
    }

    fn record_commit(&mut self, overlay: Overlay) {
        overlay.apply(&mut self.committed, self.window);
        self.epoch += 1;
        self.recent.push_back((self.epoch, overlay));
        while self.recent.len() > RECENT_COMMITS {
            self.recent.pop_front();
        }
    }

    /// Install a freshly fetched index as the committed state. Commits that
    /// landed after the fetch began (`since_epoch`) are replayed on top.
    pub fn replace_committed(&mut self, mut fresh: ScheduleIndex, since_epoch: u64) {
        for (_, overlay) in self.recent.iter().filter(|(e, _)| *e > since_epoch) {
            overlay.apply(&mut fresh, self.window);
        }
        self.committed = fresh;
        self.rematerialize();
    }
}

/// The scheduling conflict engine for one organization.
pub struct Engine {
    pub config: EngineConfig,
    pub(super) gateway: Arc<dyn ScheduleGateway>,
    pub(super) confirmer: Arc<dyn Confirmer>,
    pub(super) state: RwLock<EngineState>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        gateway: Arc<dyn ScheduleGateway>,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        let state = EngineState::new(config.timezone);
        Self {
            config,
            gateway,
            confirmer,
            state: RwLock::new(state),
        }
    }

    /// Turn caller input into an instant span, rejecting anything malformed.
    pub(super) fn resolve_draft(&self, draft: &ShiftDraft) -> Result<Span, EngineError> {
        if draft.break_minutes > MAX_BREAK_MINUTES {
            return Err(EngineError::LimitExceeded("break too long"));
        }
        if let Some(notes) = &draft.notes
            && notes.len() > MAX_NOTES_LEN
        {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        let tz = self.config.timezone;
        let start = local_to_ms(tz, draft.date, draft.start_time)
            .ok_or(EngineError::UnresolvableLocalTime(draft.date, draft.start_time))?;
        let end = local_to_ms(tz, draft.date, draft.end_time)
            .ok_or(EngineError::UnresolvableLocalTime(draft.date, draft.end_time))?;
        let span = Span::new(start, end);
        conflict::validate_span(&span)?;
        Ok(span)
    }

    pub(super) fn ensure_mutable(&self, shift: &Shift) -> Result<(), EngineError> {
        if self.config.lock_finalized_shifts && shift.status.is_final() {
            return Err(EngineError::ShiftFinalized(shift.id, shift.status));
        }
        Ok(())
    }

    /// Placements are only checked against the loaded window.
    pub(super) async fn require_in_window(&self, span: &Span) -> Result<(), EngineError> {
        let state = self.state.read().await;
        let window = state.window.ok_or(EngineError::NoWindow)?;
        let day = day_key(self.config.timezone, span.start)
            .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
        if !window.contains(day) {
            return Err(EngineError::OutsideWindow(day));
        }
        Ok(())
    }
}
