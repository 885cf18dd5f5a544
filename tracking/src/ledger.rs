//! Status History Ledger
//!
//! Append-only, per-order history of stage transitions. The latest row is
//! the order's current stage; there is no separate "current stage" field to
//! drift out of sync. Every append commits the new row together with the
//! milestone rows it changes, guarded by an expected-previous-stage check in
//! the store.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{SharedCatalog, StageCode};
use crate::clock::SharedClock;
use crate::error::{TrackingError, TrackingResult};
use crate::events::{SharedEventBus, TrackingEvent};
use crate::locks::{OrderGuard, OrderLocks};
use crate::milestones::{derive_updates, plan_milestones};
use crate::state::{ChangeSource, Milestone, SharedStore, StatusTransition};

/// Input for one ledger append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub order_id: String,
    pub target_stage: StageCode,
    pub changed_by: String,
    pub source: ChangeSource,
    pub correlation_id: Option<String>,
    pub notes: Option<String>,
    /// Hours late; anything above zero marks the transition not on time
    pub delay_hours: Option<f64>,
}

impl TransitionRequest {
    pub fn new(order_id: &str, target_stage: StageCode, changed_by: &str) -> Self {
        Self {
            order_id: order_id.to_string(),
            target_stage,
            changed_by: changed_by.to_string(),
            source: ChangeSource::WorkflowEvent,
            correlation_id: None,
            notes: None,
            delay_hours: None,
        }
    }

    pub fn with_source(mut self, source: ChangeSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.correlation_id = Some(correlation_id.to_string());
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }

    pub fn with_delay_hours(mut self, hours: f64) -> Self {
        self.delay_hours = Some(hours);
        self
    }

    fn validate(&self) -> TrackingResult<()> {
        if self.order_id.trim().is_empty() {
            return Err(TrackingError::validation("order_id is empty"));
        }
        if self.changed_by.trim().is_empty() {
            return Err(TrackingError::validation("changed_by is empty"));
        }
        if let Some(hours) = self.delay_hours {
            if !hours.is_finite() || hours < 0.0 {
                return Err(TrackingError::validation(format!(
                    "delay_hours must be a non-negative number, got {}",
                    hours
                )));
            }
        }
        Ok(())
    }
}

/// Result of [`StatusLedger::initialize_tracking`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitOutcome {
    /// The order's first transition, new or pre-existing
    pub transition: StatusTransition,
    /// False when the order was already tracked
    pub created: bool,
}

/// A broken link found by [`StatusLedger::verify_chain`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ChainViolation {
    FirstHasPrevious {
        previous: StageCode,
    },
    SequenceGap {
        expected: u64,
        found: u64,
    },
    BrokenLink {
        sequence: u64,
        expected: Option<StageCode>,
        found: Option<StageCode>,
    },
    TimeRegression {
        sequence: u64,
    },
}

pub struct StatusLedger {
    store: SharedStore,
    catalog: SharedCatalog,
    clock: SharedClock,
    locks: OrderLocks,
    bus: SharedEventBus,
}

impl StatusLedger {
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

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    /// Start tracking an order at `initial_stage`. Safe to repeat.
    pub async fn initialize_tracking(
        &self,
        order_id: &str,
        initial_stage: StageCode,
        created_by: &str,
    ) -> TrackingResult<InitOutcome> {
        let guard = self.locks.lock(order_id).await;
        self.initialize_tracking_locked(&guard, initial_stage, created_by)
    }

    pub(crate) fn initialize_tracking_locked(
        &self,
        guard: &OrderGuard,
        initial_stage: StageCode,
        created_by: &str,
    ) -> TrackingResult<InitOutcome> {
        let order_id = guard.order_id();
        if order_id.trim().is_empty() {
            return Err(TrackingError::validation("order_id is empty"));
        }
        if created_by.trim().is_empty() {
            return Err(TrackingError::validation("created_by is empty"));
        }
        self.catalog.require(initial_stage)?;

        if let Some(existing) = self.first_transition(order_id)? {
            debug!(order_id, "Order already tracked; initialization skipped");
            return Ok(InitOutcome {
                transition: existing,
                created: false,
            });
        }

        let now = self.clock.now();
        let first = StatusTransition {
            id: StatusTransition::new_id(),
            order_id: order_id.to_string(),
            sequence: 1,
            previous_stage_code: None,
            current_stage_code: initial_stage,
            changed_at: now,
            changed_by: created_by.to_string(),
            change_source: ChangeSource::SystemInit,
            correlation_id: None,
            is_on_time: true,
            delay_hours: Some(0.0),
            notes: None,
        };

        let mut milestones = plan_milestones(&self.catalog, order_id, now);
        let updates = derive_updates(&self.catalog, &first, &milestones);
        merge(&mut milestones, updates);

        if !self.store.initialize_order(&first, &milestones)? {
            let existing = self
                .first_transition(order_id)?
                .ok_or_else(|| TrackingError::not_initialized(order_id))?;
            return Ok(InitOutcome {
                transition: existing,
                created: false,
            });
        }

        info!(order_id, stage = %initial_stage, created_by, "Tracking initialized");
        self.bus.publish(TrackingEvent::TrackingInitialized {
            order_id: order_id.to_string(),
            stage: initial_stage,
            created_by: created_by.to_string(),
            timestamp: now,
        });
        Ok(InitOutcome {
            transition: first,
            created: true,
        })
    }

    /// Append one transition and the milestone changes it implies.
    pub async fn append_transition(
        &self,
        request: TransitionRequest,
    ) -> TrackingResult<StatusTransition> {
        let guard = self.locks.lock(&request.order_id).await;
        self.append_transition_locked(&guard, request)
    }

    pub(crate) fn append_transition_locked(
        &self,
        guard: &OrderGuard,
        request: TransitionRequest,
    ) -> TrackingResult<StatusTransition> {
        request.validate()?;
        if !guard.covers(&request.order_id) {
            return Err(TrackingError::validation(format!(
                "lock held for {} cannot append to {}",
                guard.order_id(),
                request.order_id
            )));
        }
        self.catalog.require(request.target_stage)?;

        let order_id = request.order_id.as_str();
        let mut expected = None;
        for round in 0..2 {
            let snapshot = self.store.snapshot(order_id)?;
            let latest = snapshot
                .latest()
                .ok_or_else(|| TrackingError::not_initialized(order_id))?;
            expected = Some(latest.current_stage_code);

            let now = self.clock.now();
            let delay = request.delay_hours.unwrap_or(0.0);
            let transition = StatusTransition {
                id: StatusTransition::new_id(),
                order_id: order_id.to_string(),
                sequence: latest.sequence + 1,
                previous_stage_code: Some(latest.current_stage_code),
                current_stage_code: request.target_stage,
                changed_at: now.max(latest.changed_at),
                changed_by: request.changed_by.clone(),
                change_source: request.source,
                correlation_id: request.correlation_id.clone(),
                is_on_time: delay <= 0.0,
                delay_hours: Some(delay),
                notes: request.notes.clone(),
            };
            let updates = derive_updates(&self.catalog, &transition, &snapshot.milestones);

            match self
                .store
                .commit_transition(latest.current_stage_code, &transition, &updates)
            {
                Ok(()) => {
                    info!(
                        order_id,
                        sequence = transition.sequence,
                        from = %latest.current_stage_code,
                        stage = %transition.current_stage_code,
                        source = %transition.change_source,
                        milestones_changed = updates.len(),
                        "Transition recorded"
                    );
                    self.bus.publish(TrackingEvent::TransitionRecorded {
                        order_id: order_id.to_string(),
                        sequence: transition.sequence,
                        from: transition.previous_stage_code,
                        to: transition.current_stage_code,
                        source: transition.change_source,
                        timestamp: transition.changed_at,
                    });
                    return Ok(transition);
                }
                Err(e) if e.is_conflict() && round == 0 => {
                    warn!(order_id, error = %e, "Ledger moved underneath append; re-reading");
                }
                Err(e) if e.is_conflict() => break,
                Err(e) => return Err(e.into()),
            }
        }

        Err(TrackingError::ConcurrentModification {
            order_id: order_id.to_string(),
            expected: expected.map(|s| s.to_string()).unwrap_or_default(),
        })
    }

    /// The order's latest transition; `None` when not tracked
    pub fn latest(&self, order_id: &str) -> TrackingResult<Option<StatusTransition>> {
        Ok(self.store.latest_transition(order_id)?)
    }

    pub fn current_stage(&self, order_id: &str) -> TrackingResult<StageCode> {
        self.latest(order_id)?
            .map(|t| t.current_stage_code)
            .ok_or_else(|| TrackingError::not_initialized(order_id))
    }

    /// All transitions in ledger order
    pub fn history(&self, order_id: &str) -> TrackingResult<Vec<StatusTransition>> {
        Ok(self.store.transitions(order_id)?)
    }

    /// Check the ledger links, sequence numbers and timestamps.
    ///
    /// An empty result means the chain is intact.
    pub fn verify_chain(&self, order_id: &str) -> TrackingResult<Vec<ChainViolation>> {
        Ok(check_chain(&self.history(order_id)?))
    }

    fn first_transition(&self, order_id: &str) -> TrackingResult<Option<StatusTransition>> {
        Ok(self.store.transitions(order_id)?.into_iter().next())
    }
}

fn merge(rows: &mut [Milestone], updates: Vec<Milestone>) {
    for update in updates {
        if let Some(row) = rows.iter_mut().find(|m| m.stage_code == update.stage_code) {
            *row = update;
        }
    }
}

pub(crate) fn check_chain(transitions: &[StatusTransition]) -> Vec<ChainViolation> {
    let mut violations = Vec::new();
    if let Some(previous) = transitions.first().and_then(|t| t.previous_stage_code) {
        violations.push(ChainViolation::FirstHasPrevious { previous });
    }

    for (idx, transition) in transitions.iter().enumerate() {
        let expected = idx as u64 + 1;
        if transition.sequence != expected {
            violations.push(ChainViolation::SequenceGap {
                expected,
                found: transition.sequence,
            });
        }
        if idx == 0 {
            continue;
        }

        let prior = &transitions[idx - 1];
        if transition.previous_stage_code != Some(prior.current_stage_code) {
            violations.push(ChainViolation::BrokenLink {
                sequence: transition.sequence,
                expected: Some(prior.current_stage_code),
                found: transition.previous_stage_code,
            });
        }
        if transition.changed_at < prior.changed_at {
            violations.push(ChainViolation::TimeRegression {
                sequence: transition.sequence,
            });
        }
    }
    violations
}
