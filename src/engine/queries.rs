use ulid::Ulid;

use crate::index::ScheduleIndex;
use crate::model::*;

use super::conflict::{self, Assessment};
use super::{Engine, EngineError};

impl Engine {
    /// The index callers render: committed state plus in-flight changes.
    pub async fn view(&self) -> ScheduleIndex {
        self.state.read().await.view.clone()
    }

    pub async fn window(&self) -> Option<WeekWindow> {
        self.state.read().await.window
    }

    pub async fn shift(&self, shift_id: &Ulid) -> Option<Shift> {
        self.state.read().await.view.shift(shift_id).cloned()
    }

    /// Optimistic changes still waiting on the store.
    pub async fn pending_overlays(&self) -> usize {
        self.state.read().await.overlays.len()
    }

    /// Dry run of a placement. Nothing is prompted or applied.
    ///
    /// `exclude` names the shift being edited so it does not collide with itself.
    pub async fn assess_draft(
        &self,
        draft: &ShiftDraft,
        exclude: Option<Ulid>,
    ) -> Result<Assessment, EngineError> {
        let span = self.resolve_draft(draft)?;
        let placement = Placement {
            assignee: Assignee::from_employee(draft.employee_id),
            span,
            exclude,
        };
        let state = self.state.read().await;
        Ok(conflict::assess(&state.view, &placement))
    }

    /// Every non-cancelled shift in the view that currently has a problem,
    /// in start order. Picks up conflicts introduced by outside writes.
    pub async fn conflicts_in_window(&self) -> Vec<(Shift, Assessment)> {
        let state = self.state.read().await;
        let mut found: Vec<(Shift, Assessment)> = state
            .view
            .shifts()
            .into_iter()
            .filter(|s| s.status != ShiftStatus::Cancelled)
            .filter_map(|s| {
                let placement = Placement {
                    assignee: s.assignee(),
                    span: s.span,
                    exclude: Some(s.id),
                };
                let assessment = conflict::assess(&state.view, &placement);
                (!assessment.is_clear()).then(|| (s.clone(), assessment))
            })
            .collect();
        found.sort_by_key(|(s, _)| (s.span.start, s.id));
        found
    }

    /// Minutes worked per employee across the view, breaks deducted.
    /// Open and cancelled shifts are not counted.
    pub async fn worked_minutes(&self) -> Vec<(Ulid, i64)> {
        let state = self.state.read().await;
        let mut totals: std::collections::BTreeMap<Ulid, i64> = std::collections::BTreeMap::new();
        for shift in state.view.shifts() {
            if shift.status == ShiftStatus::Cancelled {
                continue;
            }
            if let Some(employee_id) = shift.employee_id {
                *totals.entry(employee_id).or_default() += shift.worked_minutes();
            }
        }
        totals.into_iter().collect()
    }
}
