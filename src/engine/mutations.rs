use std::future::Future;
use std::time::Instant;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::gateway::GatewayError;
use crate::index::ScheduleIndex;
use crate::model::*;
use crate::observability;

use super::conflict::{self, SoftConflict};
use super::{Engine, EngineError, Overlay};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Move,
    Delete,
}

/// `Validating → (Confirming) → Applying → Committed | RolledBack`.
/// `Declined` ends a transaction at the confirmation point with nothing applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnPhase {
    Validating,
    Confirming,
    Applying,
    Committed,
    RolledBack,
    Declined,
}

/// How a mutation that passed validation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MutationOutcome {
    /// Stored remotely. For deletes `shift` is the removed shift.
    Committed {
        shift: Shift,
        /// Soft conflict a human signed off on, if any.
        overridden: Option<SoftConflict>,
    },
    /// A human declined the override. Nothing was changed.
    Declined { conflict: SoftConflict },
}

enum Gate {
    Proceed(Option<SoftConflict>),
    Declined(SoftConflict),
}

struct Txn {
    id: Ulid,
    kind: MutationKind,
    phase: TxnPhase,
}

impl Txn {
    fn begin(kind: MutationKind) -> Self {
        let txn = Self {
            id: Ulid::new(),
            kind,
            phase: TxnPhase::Validating,
        };
        debug!(txn = %txn.id, ?kind, "validating");
        txn
    }

    fn advance(&mut self, next: TxnPhase) {
        debug!(txn = %self.id, kind = ?self.kind, from = ?self.phase, to = ?next, "phase");
        self.phase = next;
    }

    fn finish(&self, result: &Result<MutationOutcome, EngineError>) {
        let outcome = match result {
            Ok(MutationOutcome::Committed { .. }) => "committed",
            Ok(MutationOutcome::Declined { .. }) => "declined",
            Err(EngineError::RemoteWrite(_) | EngineError::RemoteTimeout) => "rolled_back",
            Err(_) => "rejected",
        };
        metrics::counter!(
            observability::MUTATIONS_TOTAL,
            "kind" => observability::kind_label(self.kind),
            "outcome" => outcome
        )
        .increment(1);
    }
}

impl Engine {
    pub async fn create_shift(&self, draft: ShiftDraft) -> Result<MutationOutcome, EngineError> {
        let mut txn = Txn::begin(MutationKind::Create);
        let result = self.create_inner(&mut txn, draft).await;
        txn.finish(&result);
        result
    }

    /// Edit a shift in place: times, assignee, position, location, break, notes.
    pub async fn update_shift(
        &self,
        shift_id: Ulid,
        draft: ShiftDraft,
    ) -> Result<MutationOutcome, EngineError> {
        let mut txn = Txn::begin(MutationKind::Update);
        let result = self.update_inner(&mut txn, shift_id, draft).await;
        txn.finish(&result);
        result
    }

    /// Drag-drop: same wall-clock start and same duration, new day and/or assignee.
    pub async fn move_shift(
        &self,
        shift_id: Ulid,
        target: Assignee,
        target_date: NaiveDate,
    ) -> Result<MutationOutcome, EngineError> {
        let mut txn = Txn::begin(MutationKind::Move);
        let result = self.move_inner(&mut txn, shift_id, target, target_date).await;
        txn.finish(&result);
        result
    }

    pub async fn delete_shift(&self, shift_id: Ulid) -> Result<MutationOutcome, EngineError> {
        let mut txn = Txn::begin(MutationKind::Delete);
        let result = self.delete_inner(&mut txn, shift_id).await;
        txn.finish(&result);
        result
    }

    async fn create_inner(
        &self,
        txn: &mut Txn,
        draft: ShiftDraft,
    ) -> Result<MutationOutcome, EngineError> {
        let span = self.resolve_draft(&draft)?;
        self.require_in_window(&span).await?;
        let placement = Placement {
            assignee: Assignee::from_employee(draft.employee_id),
            span,
            exclude: None,
        };
        let overridden = match self.gate(txn, &placement).await? {
            Gate::Proceed(overridden) => overridden,
            Gate::Declined(conflict) => return Ok(self.declined(txn, conflict)),
        };

        txn.advance(TxnPhase::Applying);
        let shift = Shift {
            id: Ulid::new(),
            employee_id: draft.employee_id,
            position_id: draft.position_id,
            location_id: draft.location_id,
            span,
            break_minutes: draft.break_minutes,
            status: ShiftStatus::Scheduled,
            notes: draft.notes,
        };
        // Reserve the slot so a concurrent create for the same person sees it.
        let seq = {
            let mut state = self.state.write().await;
            refuse_double_booking(&state.view, &placement)?;
            state.push_overlay(Overlay {
                before: None,
                after: Some(shift.clone()),
            })
        };
        let write = self
            .remote(txn, self.gateway.create_shift(&self.config.org_id, &shift))
            .await
            .map(Some);
        let stored = self.settle(txn, seq, shift.id, write).await?;
        Ok(MutationOutcome::Committed {
            shift: stored.unwrap_or(shift),
            overridden,
        })
    }

    async fn update_inner(
        &self,
        txn: &mut Txn,
        shift_id: Ulid,
        draft: ShiftDraft,
    ) -> Result<MutationOutcome, EngineError> {
        let current = self.current_shift(shift_id).await?;
        self.ensure_mutable(&current)?;
        let span = self.resolve_draft(&draft)?;
        self.require_in_window(&span).await?;
        let placement = Placement {
            assignee: Assignee::from_employee(draft.employee_id),
            span,
            exclude: Some(shift_id),
        };
        let overridden = match self.gate(txn, &placement).await? {
            Gate::Proceed(overridden) => overridden,
            Gate::Declined(conflict) => return Ok(self.declined(txn, conflict)),
        };

        let after = Shift {
            id: shift_id,
            employee_id: draft.employee_id,
            position_id: draft.position_id,
            location_id: draft.location_id,
            span,
            break_minutes: draft.break_minutes,
            status: current.status,
            notes: draft.notes,
        };
        self.apply_and_write(txn, Some(&placement), shift_id, Some(after.clone()))
            .await?;
        Ok(MutationOutcome::Committed {
            shift: after,
            overridden,
        })
    }

    async fn move_inner(
        &self,
        txn: &mut Txn,
        shift_id: Ulid,
        target: Assignee,
        target_date: NaiveDate,
    ) -> Result<MutationOutcome, EngineError> {
        let current = self.current_shift(shift_id).await?;
        self.ensure_mutable(&current)?;

        let tz = self.config.timezone;
        let local_start = local_datetime(tz, current.span.start)
            .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
        let start = local_to_ms(tz, target_date, local_start.time())
            .ok_or(EngineError::UnresolvableLocalTime(target_date, local_start.time()))?;
        let span = Span::new(start, start + current.span.duration_ms());
        conflict::validate_span(&span)?;
        self.require_in_window(&span).await?;

        let placement = Placement {
            assignee: target,
            span,
            exclude: Some(shift_id),
        };
        let overridden = match self.gate(txn, &placement).await? {
            Gate::Proceed(overridden) => overridden,
            Gate::Declined(conflict) => return Ok(self.declined(txn, conflict)),
        };

        let after = Shift {
            employee_id: target.employee_id(),
            span,
            ..current
        };
        self.apply_and_write(txn, Some(&placement), shift_id, Some(after.clone()))
            .await?;
        Ok(MutationOutcome::Committed {
            shift: after,
            overridden,
        })
    }

    async fn delete_inner(
        &self,
        txn: &mut Txn,
        shift_id: Ulid,
    ) -> Result<MutationOutcome, EngineError> {
        let current = self.current_shift(shift_id).await?;
        self.ensure_mutable(&current)?;
        let removed = self.apply_and_write(txn, None, shift_id, None).await?;
        Ok(MutationOutcome::Committed {
            shift: removed,
            overridden: None,
        })
    }

    async fn current_shift(&self, shift_id: Ulid) -> Result<Shift, EngineError> {
        self.state
            .read()
            .await
            .view
            .shift(&shift_id)
            .cloned()
            .ok_or(EngineError::NotFound(shift_id))
    }

    fn declined(&self, txn: &mut Txn, conflict: SoftConflict) -> MutationOutcome {
        txn.advance(TxnPhase::Declined);
        MutationOutcome::Declined { conflict }
    }

    /// Validating, and Confirming when a soft conflict needs sign-off.
    /// Double-booking fails immediately and is never offered for override.
    async fn gate(&self, txn: &mut Txn, placement: &Placement) -> Result<Gate, EngineError> {
        let (assessment, prompt) = {
            let state = self.state.read().await;
            let assessment = conflict::assess(&state.view, placement);
            let prompt = assessment.soft.as_ref().map(|c| c.describe(&state.view));
            (assessment, prompt)
        };
        if assessment.double_booked {
            return Err(EngineError::HardOverlap {
                span: placement.span,
                conflicting: assessment.overlaps,
            });
        }
        let (Some(conflict), Some(message)) = (assessment.soft, prompt) else {
            return Ok(Gate::Proceed(None));
        };

        txn.advance(TxnPhase::Confirming);
        if self.confirmer.request(&message).await {
            debug!(txn = %txn.id, "override accepted");
            Ok(Gate::Proceed(Some(conflict)))
        } else {
            Ok(Gate::Declined(conflict))
        }
    }

    /// Applying for update/move/delete: snapshot, patch the view, write,
    /// then commit or roll back. Returns the pre-mutation shift.
    async fn apply_and_write(
        &self,
        txn: &mut Txn,
        placement: Option<&Placement>,
        shift_id: Ulid,
        after: Option<Shift>,
    ) -> Result<Shift, EngineError> {
        txn.advance(TxnPhase::Applying);
        let (seq, before) = {
            let mut state = self.state.write().await;
            let before = state
                .view
                .shift(&shift_id)
                .cloned()
                .ok_or(EngineError::NotFound(shift_id))?;
            if let Some(placement) = placement {
                refuse_double_booking(&state.view, placement)?;
            }
            let seq = state.push_overlay(Overlay {
                before: Some(before.clone()),
                after: after.clone(),
            });
            (seq, before)
        };

        let org = &self.config.org_id;
        let write = match &after {
            Some(shift) => self.remote(txn, self.gateway.update_shift(org, shift)).await,
            None => self.remote(txn, self.gateway.delete_shift(org, shift_id)).await,
        };
        self.settle(txn, seq, shift_id, write.map(|()| None)).await?;
        Ok(before)
    }

    /// Commit the overlay once the store acknowledged it, or roll it back.
    async fn settle(
        &self,
        txn: &mut Txn,
        seq: u64,
        shift_id: Ulid,
        write: Result<Option<Shift>, EngineError>,
    ) -> Result<Option<Shift>, EngineError> {
        let mut state = self.state.write().await;
        match write {
            Ok(stored) => {
                state.commit_overlay(seq, stored.clone());
                txn.advance(TxnPhase::Committed);
                Ok(stored)
            }
            Err(e) => {
                state.discard_overlay(seq);
                txn.advance(TxnPhase::RolledBack);
                metrics::counter!(
                    observability::ROLLBACKS_TOTAL,
                    "kind" => observability::kind_label(txn.kind)
                )
                .increment(1);
                warn!(txn = %txn.id, shift = %shift_id, "rolled back: {e}");
                Err(e)
            }
        }
    }

    /// Await a remote write under the configured timeout.
    async fn remote<T>(
        &self,
        txn: &Txn,
        write: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, EngineError> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.config.write_timeout, write).await;
        metrics::histogram!(
            observability::REMOTE_WRITE_DURATION_SECONDS,
            "kind" => observability::kind_label(txn.kind)
        )
        .record(started.elapsed().as_secs_f64());
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(EngineError::RemoteWrite(e)),
            Err(_) => {
                warn!(txn = %txn.id, timeout = ?self.config.write_timeout, "remote write timed out");
                Err(EngineError::RemoteTimeout)
            }
        }
    }
}

/// The index may have moved while a human was deciding.
fn refuse_double_booking(view: &ScheduleIndex, placement: &Placement) -> Result<(), EngineError> {
    let conflicting = conflict::blocking_overlaps(view, placement);
    if conflicting.is_empty() {
        return Ok(());
    }
    Err(EngineError::HardOverlap {
        span: placement.span,
        conflicting,
    })
}
