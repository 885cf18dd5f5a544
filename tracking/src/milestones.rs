//! Milestone Tracker: planned vs. actual completion per (order, stage)
//!
//! [`derive_updates`] is the pure rule set applied whenever the ledger
//! records a transition:
//!
//! ```text
//! earlier stages  PENDING/IN_PROGRESS → COMPLETED  (skip-ahead, annotated)
//!                 DELAYED / SKIPPED   → unchanged  (DELAYED gets a note)
//! target stage    anything            → COMPLETED  (actual date, actor, drift)
//! next stage      PENDING             → IN_PROGRESS
//! ```
//!
//! A stage's `sla_hours` is the time allowed to reach it after the previous
//! stage was reached, so while an order sits in stage X the milestone at
//! risk is the one for the stage after X.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::{SharedCatalog, StageCatalog, StageCode};
use crate::clock::SharedClock;
use crate::error::{TrackingError, TrackingResult};
use crate::events::{SharedEventBus, TrackingEvent};
use crate::locks::{OrderGuard, OrderLocks};
use crate::state::{Milestone, MilestoneStatus, OrderId, SharedStore, StatusTransition};

/// Compute the milestone rows that change because of `transition`.
///
/// Only rows whose content differs from `current` are returned. Stages the
/// catalog does not know are ignored.
pub fn derive_updates(
    catalog: &StageCatalog,
    transition: &StatusTransition,
    current: &[Milestone],
) -> Vec<Milestone> {
    let target = transition.current_stage_code;
    let Some(target_idx) = catalog.position(target) else {
        return Vec::new();
    };

    let by_stage: HashMap<StageCode, &Milestone> =
        current.iter().map(|m| (m.stage_code, m)).collect();
    let row = |code: StageCode| -> Milestone {
        by_stage
            .get(&code)
            .map(|m| (*m).clone())
            .unwrap_or_else(|| Milestone::pending(&transition.order_id, code, None))
    };

    let mut updates = Vec::new();

    for stage in catalog.stages_before(target) {
        let mut milestone = row(stage.code);
        match milestone.status {
            MilestoneStatus::Pending | MilestoneStatus::InProgress => {
                milestone.status = MilestoneStatus::Completed;
                milestone.actual_date = Some(transition.changed_at);
                milestone.completed_by = Some(transition.changed_by.clone());
                milestone.days_early_late = drift_days(milestone.planned_date, transition.changed_at);
                milestone.annotate(format!("completed via skip-ahead to {}", target));
            }
            MilestoneStatus::Delayed => {
                let note = format!("still delayed when order reached {}", target);
                if milestone.notes.last() == Some(&note) {
                    continue;
                }
                milestone.annotate(note);
            }
            MilestoneStatus::Completed | MilestoneStatus::Skipped => continue,
        }
        updates.push(milestone);
    }

    let mut reached = row(target);
    let was = reached.status;
    reached.status = MilestoneStatus::Completed;
    reached.actual_date = Some(transition.changed_at);
    reached.completed_by = Some(transition.changed_by.clone());
    reached.days_early_late = drift_days(reached.planned_date, transition.changed_at);
    match was {
        MilestoneStatus::Delayed => reached.annotate("reached after being flagged delayed"),
        MilestoneStatus::Completed => reached.annotate("stage re-entered"),
        MilestoneStatus::Skipped => reached.annotate("reached after being skipped"),
        _ => {}
    }
    updates.push(reached);

    if let Some(next) = catalog.stages().get(target_idx + 1) {
        let mut milestone = row(next.code);
        if milestone.status == MilestoneStatus::Pending {
            milestone.status = MilestoneStatus::InProgress;
            updates.push(milestone);
        }
    }

    updates
}

/// Whole days between planned and actual; positive means late.
fn drift_days(planned: Option<DateTime<Utc>>, actual: DateTime<Utc>) -> Option<i64> {
    planned.map(|planned| (actual - planned).num_days())
}

/// Fresh PENDING rows for every catalog stage with planned dates derived
/// from cumulative SLA hours starting at `start`.
pub fn plan_milestones(catalog: &StageCatalog, order_id: &str, start: DateTime<Utc>) -> Vec<Milestone> {
    let mut elapsed_hours: i64 = 0;
    catalog
        .stages()
        .iter()
        .map(|stage| {
            let planned = stage.sla_hours.map(|hours| {
                elapsed_hours += i64::from(hours);
                start + Duration::hours(elapsed_hours)
            });
            Milestone::pending(order_id, stage.code, planned)
        })
        .collect()
}

/// Sort milestones by catalog position, dropping stages the catalog lacks.
pub fn in_catalog_order(catalog: &StageCatalog, milestones: Vec<Milestone>) -> Vec<Milestone> {
    let mut rows: Vec<(usize, Milestone)> = milestones
        .into_iter()
        .filter_map(|m| catalog.position(m.stage_code).map(|idx| (idx, m)))
        .collect();
    rows.sort_by_key(|(idx, _)| *idx);
    rows.into_iter().map(|(_, m)| m).collect()
}

/// An order that has stayed in its current stage longer than the next
/// stage's SLA allows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaBreach {
    pub order_id: OrderId,
    pub current_stage: StageCode,
    pub at_risk_stage: StageCode,
    pub entered_at: DateTime<Utc>,
    pub sla_hours: u32,
    pub overdue_hours: i64,
}

impl SlaBreach {
    pub fn reason(&self) -> String {
        format!(
            "SLA of {}h to reach {} exceeded by {}h (in {} since {})",
            self.sla_hours,
            self.at_risk_stage,
            self.overdue_hours,
            self.current_stage,
            self.entered_at.format("%Y-%m-%d %H:%M UTC")
        )
    }
}

/// Explicit milestone operations and SLA checks.
pub struct MilestoneTracker {
    store: SharedStore,
    catalog: SharedCatalog,
    clock: SharedClock,
    locks: OrderLocks,
    bus: SharedEventBus,
}

impl MilestoneTracker {
    pub fn new(
        store: SharedStore,
        catalog: SharedCatalog,
        clock: SharedClock,
        locks: OrderLocks,
        bus: SharedEventBus,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
            locks,
            bus,
        }
    }

    /// Milestones of an order in catalog order
    pub fn milestones(&self, order_id: &str) -> TrackingResult<Vec<Milestone>> {
        let rows = self.store.milestones(order_id)?;
        if rows.is_empty() {
            return Err(TrackingError::not_initialized(order_id));
        }
        Ok(in_catalog_order(&self.catalog, rows))
    }

    /// Flag a stage as delayed without a stage change.
    pub async fn mark_delayed(
        &self,
        order_id: &str,
        stage: StageCode,
        reason: &str,
    ) -> TrackingResult<Milestone> {
        let guard = self.locks.lock(order_id).await;
        self.mark_delayed_locked(&guard, stage, reason)
    }

    pub(crate) fn mark_delayed_locked(
        &self,
        guard: &OrderGuard,
        stage: StageCode,
        reason: &str,
    ) -> TrackingResult<Milestone> {
        let order_id = guard.order_id();
        let mut milestone = self.load(order_id, stage)?;

        match milestone.status {
            MilestoneStatus::Pending | MilestoneStatus::InProgress => {
                milestone.status = MilestoneStatus::Delayed;
            }
            MilestoneStatus::Delayed => {}
            status @ (MilestoneStatus::Completed | MilestoneStatus::Skipped) => {
                return Err(TrackingError::InvalidMilestoneState {
                    order_id: order_id.to_string(),
                    stage: stage.to_string(),
                    status: status.to_string(),
                    action: "marked delayed".to_string(),
                });
            }
        }
        milestone.annotate(format!("delayed: {}", reason));
        self.store.put_milestone(&milestone)?;

        warn!(order_id, stage = %stage, reason, "Milestone marked delayed");
        self.bus.publish(TrackingEvent::MilestoneDelayed {
            order_id: order_id.to_string(),
            stage,
            reason: reason.to_string(),
            timestamp: self.clock.now(),
        });
        Ok(milestone)
    }

    /// Explicitly skip a stage that has not been reached.
    pub async fn mark_skipped(
        &self,
        order_id: &str,
        stage: StageCode,
        actor: &str,
    ) -> TrackingResult<Milestone> {
        let guard = self.locks.lock(order_id).await;
        let mut milestone = self.load(guard.order_id(), stage)?;

        if !milestone.status.is_open() {
            return Err(TrackingError::InvalidMilestoneState {
                order_id: order_id.to_string(),
                stage: stage.to_string(),
                status: milestone.status.to_string(),
                action: "skipped".to_string(),
            });
        }
        milestone.status = MilestoneStatus::Skipped;
        milestone.annotate(format!("skipped by {}", actor));
        self.store.put_milestone(&milestone)?;

        info!(order_id, stage = %stage, actor, "Milestone skipped");
        Ok(milestone)
    }

    /// SLA breach of the stage after the current one, if any.
    pub fn sla_breach(&self, order_id: &str, now: DateTime<Utc>) -> TrackingResult<Option<SlaBreach>> {
        let snapshot = self.store.snapshot(order_id)?;
        let Some(latest) = snapshot.latest() else {
            return Err(TrackingError::not_initialized(order_id));
        };

        let Some(next) = self.catalog.next_after(latest.current_stage_code) else {
            return Ok(None);
        };
        let Some(sla_hours) = next.sla_hours else {
            return Ok(None);
        };

        let still_open = snapshot
            .milestones
            .iter()
            .find(|m| m.stage_code == next.code)
            .map_or(true, |m| m.status.is_open());
        if !still_open {
            return Ok(None);
        }

        let deadline = latest.changed_at + Duration::hours(i64::from(sla_hours));
        if now <= deadline {
            return Ok(None);
        }

        Ok(Some(SlaBreach {
            order_id: order_id.to_string(),
            current_stage: latest.current_stage_code,
            at_risk_stage: next.code,
            entered_at: latest.changed_at,
            sla_hours,
            overdue_hours: (now - deadline).num_hours(),
        }))
    }

    fn load(&self, order_id: &str, stage: StageCode) -> TrackingResult<Milestone> {
        self.catalog.require(stage)?;
        let rows = self.store.milestones(order_id)?;
        if rows.is_empty() {
            return Err(TrackingError::not_initialized(order_id));
        }
        Ok(rows
            .into_iter()
            .find(|m| m.stage_code == stage)
            .unwrap_or_else(|| Milestone::pending(order_id, stage, None)))
    }
}
