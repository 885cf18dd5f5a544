//! Read-only timeline view of one order

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::catalog::{SharedCatalog, StageDefinition};
use crate::clock::SharedClock;
use crate::error::TrackingResult;
use crate::milestones::in_catalog_order;
use crate::state::{Milestone, MilestoneStatus, OrderId, SharedStore, StatusTransition};

/// Everything a dashboard needs to render one order.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineView {
    pub order_id: OrderId,
    pub current_stage: StageDefinition,
    pub all_stages: Vec<StageDefinition>,
    pub completed_stages: Vec<StageDefinition>,
    pub milestones: Vec<Milestone>,
    pub status_history: Vec<StatusTransition>,
    /// Completed share of the catalog, two decimals
    pub overall_progress_percent: f64,
    pub is_on_schedule: bool,
    pub total_days_elapsed: i64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TimelineProjection {
    NotInitialized { order_id: OrderId },
    Tracked(Box<TimelineView>),
}

impl TimelineProjection {
    pub fn view(&self) -> Option<&TimelineView> {
        match self {
            Self::Tracked(view) => Some(view),
            Self::NotInitialized { .. } => None,
        }
    }

    pub fn is_tracked(&self) -> bool {
        self.view().is_some()
    }
}

pub struct TimelineProjector {
    store: SharedStore,
    catalog: SharedCatalog,
    clock: SharedClock,
}

impl TimelineProjector {
    pub fn new(store: SharedStore, catalog: SharedCatalog, clock: SharedClock) -> Self {
        Self {
            store,
            catalog,
            clock,
        }
    }

    /// Build the view from one consistent store read.
    pub fn project(&self, order_id: &str) -> TrackingResult<TimelineProjection> {
        let snapshot = self.store.snapshot(order_id)?;
        let (Some(first), Some(latest)) = (snapshot.transitions.first(), snapshot.latest()) else {
            return Ok(TimelineProjection::NotInitialized {
                order_id: order_id.to_string(),
            });
        };

        let current_stage = self.catalog.require(latest.current_stage_code)?.clone();
        let milestones = in_catalog_order(&self.catalog, snapshot.milestones.clone());
        let completed_stages: Vec<StageDefinition> = milestones
            .iter()
            .filter(|m| m.status == MilestoneStatus::Completed)
            .filter_map(|m| self.catalog.get(m.stage_code).cloned())
            .collect();
        let is_on_schedule = milestones
            .iter()
            .all(|m| m.status != MilestoneStatus::Delayed);

        let now = self.clock.now();
        let view = TimelineView {
            order_id: order_id.to_string(),
            current_stage,
            all_stages: self.catalog.stages().to_vec(),
            overall_progress_percent: progress_percent(completed_stages.len(), self.catalog.len()),
            completed_stages,
            milestones,
            is_on_schedule,
            total_days_elapsed: (now - first.changed_at).num_days().max(0),
            status_history: snapshot.transitions.clone(),
            generated_at: now,
        };
        debug!(
            order_id,
            progress = view.overall_progress_percent,
            on_schedule = view.is_on_schedule,
            "Timeline projected"
        );
        Ok(TimelineProjection::Tracked(Box::new(view)))
    }
}

fn progress_percent(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = 100.0 * completed as f64 / total as f64;
    (raw * 100.0).round() / 100.0
}
