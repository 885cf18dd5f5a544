//! Order Tracker: the entry point workflow collaborators call
//!
//! Wires the ledger, milestone tracker, timeline projector and retry
//! coordinator around one store, one clock and one set of per-order locks.
//! `record_event` runs ledger append, milestone update and (for stages that
//! require it) the integration sync inside a single per-order critical
//! section.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{SharedCatalog, StageCode};
use crate::clock::{SharedClock, SystemClock};
use crate::config::TrackingConfig;
use crate::error::TrackingResult;
use crate::events::{EventBus, SharedEventBus, TrackingEvent};
use crate::gateway::{
    GoodsReceiptPayload, IntegrationGateway, OutcomeGenerator, RandomOutcomes, SharedTransport,
    SimulatedErp,
};
use crate::ledger::{ChainViolation, InitOutcome, StatusLedger, TransitionRequest};
use crate::locks::OrderLocks;
use crate::milestones::{MilestoneTracker, SlaBreach};
use crate::state::{
    IntegrationAttempt, MemoryStore, Milestone, OrderSyncState, SharedStore, StatusTransition,
};
use crate::sync::{ConnectionHealth, HealthCheck, RetryCoordinator, SimulatedHealthCheck};
use crate::timeline::{TimelineProjection, TimelineProjector};

/// Result of [`OrderTracker::record_event`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventOutcome {
    pub transition: StatusTransition,
    /// Present when the stage required a sync and a payload was supplied
    pub sync: Option<OrderSyncState>,
}

pub struct OrderTracker {
    store: SharedStore,
    catalog: SharedCatalog,
    clock: SharedClock,
    locks: OrderLocks,
    bus: SharedEventBus,
    ledger: StatusLedger,
    milestones: MilestoneTracker,
    timeline: TimelineProjector,
    coordinator: RetryCoordinator,
    max_retries: u32,
}

impl OrderTracker {
    pub fn builder(config: TrackingConfig) -> TrackerBuilder {
        TrackerBuilder::new(config)
    }

    /// Tracker with default collaborators for `config`
    pub fn from_config(config: TrackingConfig) -> TrackingResult<Self> {
        Self::builder(config).build()
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &StatusLedger {
        &self.ledger
    }

    pub fn coordinator(&self) -> &RetryCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.bus.subscribe()
    }

    pub async fn initialize_tracking(
        &self,
        order_id: &str,
        initial_stage: StageCode,
        created_by: &str,
    ) -> TrackingResult<InitOutcome> {
        self.ledger
            .initialize_tracking(order_id, initial_stage, created_by)
            .await
    }

    /// Record a workflow event and sync when the stage requires it.
    ///
    /// The payload is validated before the transition is appended, so a bad
    /// payload leaves the ledger untouched. A sync-requiring stage reached
    /// without a payload is recorded and left NOT_SYNCED for a later
    /// [`sync_order`](Self::sync_order).
    pub async fn record_event(
        &self,
        request: TransitionRequest,
        payload: Option<&GoodsReceiptPayload>,
    ) -> TrackingResult<EventOutcome> {
        let stage = self.catalog.require(request.target_stage)?;
        let wants_sync = stage.requires_external_sync;
        if let (true, Some(payload)) = (wants_sync, payload) {
            payload.validate_for(&request.order_id)?;
        }

        let guard = self.locks.lock(&request.order_id).await;
        let transition = self.ledger.append_transition_locked(&guard, request)?;

        let sync = match (wants_sync, payload) {
            (true, Some(payload)) => Some(
                self.coordinator
                    .sync_order_locked(&guard, payload, self.max_retries)
                    .await?,
            ),
            (true, None) => {
                info!(
                    order_id = %transition.order_id,
                    stage = %transition.current_stage_code,
                    "Stage requires sync but no payload was supplied"
                );
                None
            }
            (false, Some(_)) => {
                debug!(
                    order_id = %transition.order_id,
                    stage = %transition.current_stage_code,
                    "Payload ignored for stage without external sync"
                );
                None
            }
            (false, None) => None,
        };

        Ok(EventOutcome { transition, sync })
    }

    pub async fn mark_delayed(
        &self,
        order_id: &str,
        stage: StageCode,
        reason: &str,
    ) -> TrackingResult<Milestone> {
        self.milestones.mark_delayed(order_id, stage, reason).await
    }

    pub async fn mark_skipped(
        &self,
        order_id: &str,
        stage: StageCode,
        actor: &str,
    ) -> TrackingResult<Milestone> {
        self.milestones.mark_skipped(order_id, stage, actor).await
    }

    pub fn project(&self, order_id: &str) -> TrackingResult<TimelineProjection> {
        self.timeline.project(order_id)
    }

    pub fn milestones(&self, order_id: &str) -> TrackingResult<Vec<Milestone>> {
        self.milestones.milestones(order_id)
    }

    pub fn history(&self, order_id: &str) -> TrackingResult<Vec<StatusTransition>> {
        self.ledger.history(order_id)
    }

    pub fn verify_chain(&self, order_id: &str) -> TrackingResult<Vec<ChainViolation>> {
        self.ledger.verify_chain(order_id)
    }

    /// Sync with the configured retry budget
    pub async fn sync_order(
        &self,
        order_id: &str,
        payload: &GoodsReceiptPayload,
    ) -> TrackingResult<OrderSyncState> {
        self.coordinator
            .sync_order(order_id, payload, self.max_retries)
            .await
    }

    pub async fn sync_order_with_cancel(
        &self,
        order_id: &str,
        payload: &GoodsReceiptPayload,
        cancel: CancellationToken,
    ) -> TrackingResult<OrderSyncState> {
        self.coordinator
            .sync_order_with_cancel(order_id, payload, self.max_retries, cancel)
            .await
    }

    pub fn sync_state(&self, order_id: &str) -> TrackingResult<OrderSyncState> {
        self.coordinator.sync_state(order_id)
    }

    pub fn attempt_history(&self, order_id: &str) -> TrackingResult<Vec<IntegrationAttempt>> {
        self.coordinator.attempt_history(order_id)
    }

    pub async fn connection_health(&self) -> ConnectionHealth {
        self.coordinator.connection_health().await
    }

    /// Flag every next-stage milestone whose SLA has run out.
    ///
    /// Orders that fail to sweep are logged and skipped.
    pub async fn sweep_sla(&self) -> TrackingResult<Vec<SlaBreach>> {
        let mut breaches = Vec::new();
        for order_id in self.store.order_ids()? {
            let guard = self.locks.lock(&order_id).await;
            let breach = match self.milestones.sla_breach(&order_id, self.clock.now()) {
                Ok(Some(breach)) => breach,
                Ok(None) => continue,
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "SLA check failed");
                    continue;
                }
            };
            match self
                .milestones
                .mark_delayed_locked(&guard, breach.at_risk_stage, &breach.reason())
            {
                Ok(_) => breaches.push(breach),
                Err(e) => warn!(order_id = %order_id, error = %e, "Could not flag SLA breach"),
            }
        }
        self.locks.prune();

        if !breaches.is_empty() {
            info!(count = breaches.len(), "SLA sweep flagged delayed milestones");
        }
        Ok(breaches)
    }
}

/// Assembles an [`OrderTracker`], with overridable collaborators.
pub struct TrackerBuilder {
    config: TrackingConfig,
    store: Option<SharedStore>,
    clock: Option<SharedClock>,
    outcomes: Option<Arc<dyn OutcomeGenerator>>,
    transport: Option<SharedTransport>,
    health_check: Option<Arc<dyn HealthCheck>>,
    bus: Option<SharedEventBus>,
}

impl TrackerBuilder {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            outcomes: None,
            transport: None,
            health_check: None,
            bus: None,
        }
    }

    pub fn store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Outcome source for the simulated transport
    pub fn outcomes(mut self, outcomes: Arc<dyn OutcomeGenerator>) -> Self {
        self.outcomes = Some(outcomes);
        self
    }

    /// Replace the simulated transport entirely
    pub fn transport(mut self, transport: SharedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn health_check(mut self, health_check: Arc<dyn HealthCheck>) -> Self {
        self.health_check = Some(health_check);
        self
    }

    pub fn bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> TrackingResult<OrderTracker> {
        let config = self.config;
        config.validate()?;

        let catalog = config.build_catalog()?.shared();
        let clock: SharedClock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = match self.store {
            Some(store) => store,
            None => open_store(&config)?,
        };
        let bus = self.bus.unwrap_or_else(|| EventBus::new().shared());
        let locks = OrderLocks::new();

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let outcomes = self.outcomes.unwrap_or_else(|| {
                    let random = RandomOutcomes::new(config.gateway.failure_probability);
                    Arc::new(match config.gateway.forced_error_code {
                        Some(code) => random.with_forced_code(code),
                        None => random,
                    })
                });
                let issued = store.document_numbers()?;
                SimulatedErp::new(clock.clone(), outcomes)
                    .with_latency(config.gateway.min_latency_ms, config.gateway.max_latency_ms)
                    .with_document_prefix(&config.gateway.document_prefix)
                    .continuing_after(issued.iter().map(String::as_str))
                    .shared()
            }
        };
        let health_check: Arc<dyn HealthCheck> = match self.health_check {
            Some(health_check) => health_check,
            None => Arc::new(SimulatedHealthCheck::new(
                config.health.weights(),
                clock.clone(),
            )?),
        };

        let gateway = Arc::new(IntegrationGateway::new(
            store.clone(),
            transport,
            clock.clone(),
            Duration::from_millis(config.gateway.call_timeout_ms),
        ));

        Ok(OrderTracker {
            ledger: StatusLedger::new(
                store.clone(),
                catalog.clone(),
                clock.clone(),
                locks.clone(),
                bus.clone(),
            ),
            milestones: MilestoneTracker::new(
                store.clone(),
                catalog.clone(),
                clock.clone(),
                locks.clone(),
                bus.clone(),
            ),
            timeline: TimelineProjector::new(store.clone(), catalog.clone(), clock.clone()),
            coordinator: RetryCoordinator::new(
                store.clone(),
                gateway,
                health_check,
                clock.clone(),
                locks.clone(),
                bus.clone(),
            ),
            max_retries: config.retry.max_retries,
            store,
            catalog,
            clock,
            locks,
            bus,
        })
    }
}

#[cfg(feature = "heavy-state")]
fn open_store(config: &TrackingConfig) -> TrackingResult<SharedStore> {
    match &config.state_path {
        Some(path) => Ok(crate::state::RocksStore::open(path)?.shared()),
        None => Ok(MemoryStore::new().shared()),
    }
}

#[cfg(not(feature = "heavy-state"))]
fn open_store(config: &TrackingConfig) -> TrackingResult<SharedStore> {
    if let Some(path) = &config.state_path {
        return Err(crate::error::TrackingError::config(format!(
            "state_path {} needs the heavy-state feature",
            path.display()
        )));
    }
    Ok(MemoryStore::new().shared())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::gateway::{
        DocumentType, ErrorCode, LineItem, ScriptedOutcomes, SimulatedOutcome,
    };
    use crate::state::{MilestoneStatus, SyncStatus};
    use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};

    fn payload(order_id: &str) -> GoodsReceiptPayload {
        GoodsReceiptPayload {
            order_id: order_id.to_string(),
            reference_number: "DN-100".to_string(),
            counterparty_id: "V-100".to_string(),
            line_items: vec![LineItem {
                line_number: 1,
                material_code: "M-100".to_string(),
                description: "Motor".to_string(),
                quantity: 1.0,
                unit: "EA".to_string(),
            }],
            delivery_date: NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
            delivery_location: "Dock 1".to_string(),
            document_type: DocumentType::GoodsReceipt,
        }
    }

    fn tracker(outcomes: ScriptedOutcomes) -> (OrderTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 4, 1, 7, 0, 0).unwrap(),
        ));
        let mut config = TrackingConfig::default();
        config.gateway.min_latency_ms = 0;
        config.gateway.max_latency_ms = 0;
        let tracker = OrderTracker::builder(config)
            .clock(clock.clone())
            .outcomes(Arc::new(outcomes))
            .build()
            .unwrap();
        (tracker, clock)
    }

    #[tokio::test]
    async fn test_receipt_stage_syncs_inside_event() {
        let (tracker, _clock) = tracker(ScriptedOutcomes::always(SimulatedOutcome::Succeed));
        tracker
            .initialize_tracking("PO-1", StageCode::OrderCreated, "system")
            .await
            .unwrap();

        let outcome = tracker
            .record_event(
                TransitionRequest::new("PO-1", StageCode::OrderReceived, "erp-bridge"),
                Some(&payload("PO-1")),
            )
            .await
            .unwrap();

        let sync = outcome.sync.unwrap();
        assert_eq!(sync.sync_status, SyncStatus::Synced);
        assert_eq!(tracker.attempt_history("PO-1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_stage_without_payload_stays_not_synced() {
        let (tracker, _clock) = tracker(ScriptedOutcomes::always(SimulatedOutcome::Succeed));
        tracker
            .initialize_tracking("PO-1", StageCode::OrderCreated, "system")
            .await
            .unwrap();

        let outcome = tracker
            .record_event(
                TransitionRequest::new("PO-1", StageCode::OrderReceived, "clerk"),
                None,
            )
            .await
            .unwrap();
        assert!(outcome.sync.is_none());
        assert_eq!(
            tracker.sync_state("PO-1").unwrap().sync_status,
            SyncStatus::NotSynced
        );
    }

    #[tokio::test]
    async fn test_invalid_payload_leaves_ledger_untouched() {
        let (tracker, _clock) = tracker(ScriptedOutcomes::always(SimulatedOutcome::Succeed));
        tracker
            .initialize_tracking("PO-1", StageCode::OrderCreated, "system")
            .await
            .unwrap();

        let err = tracker
            .record_event(
                TransitionRequest::new("PO-1", StageCode::OrderReceived, "clerk"),
                Some(&payload("PO-OTHER")),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(tracker.history("PO-1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_sync_keeps_transition() {
        let (tracker, _clock) = tracker(ScriptedOutcomes::always(SimulatedOutcome::Fail(
            ErrorCode::QuantityMismatch,
        )));
        tracker
            .initialize_tracking("PO-1", StageCode::HandoverApproved, "system")
            .await
            .unwrap();

        let outcome = tracker
            .record_event(
                TransitionRequest::new("PO-1", StageCode::OrderReceived, "clerk"),
                Some(&payload("PO-1")),
            )
            .await
            .unwrap();
        assert_eq!(outcome.sync.unwrap().sync_status, SyncStatus::RetryPending);
        assert_eq!(
            tracker.ledger().current_stage("PO-1").unwrap(),
            StageCode::OrderReceived
        );
    }

    #[tokio::test]
    async fn test_lock_table_empties_between_operations() {
        let (tracker, _clock) = tracker(ScriptedOutcomes::always(SimulatedOutcome::Succeed));
        for n in 0..20 {
            let order_id = format!("PO-{n}");
            tracker
                .initialize_tracking(&order_id, StageCode::HandoverApproved, "system")
                .await
                .unwrap();
            tracker
                .record_event(
                    TransitionRequest::new(&order_id, StageCode::OrderReceived, "clerk"),
                    Some(&payload(&order_id)),
                )
                .await
                .unwrap();
        }
        assert!(tracker.locks.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_flags_next_stage_once() {
        let (tracker, clock) = tracker(ScriptedOutcomes::always(SimulatedOutcome::Succeed));
        tracker
            .initialize_tracking("PO-1", StageCode::OrderCreated, "system")
            .await
            .unwrap();

        assert!(tracker.sweep_sla().await.unwrap().is_empty());
        clock.advance(ChronoDuration::hours(49));

        let breaches = tracker.sweep_sla().await.unwrap();
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].at_risk_stage, StageCode::VendorConfirmed);
        assert_eq!(breaches[0].overdue_hours, 1);

        let vendor = tracker
            .milestones("PO-1")
            .unwrap()
            .into_iter()
            .find(|m| m.stage_code == StageCode::VendorConfirmed)
            .unwrap();
        assert_eq!(vendor.status, MilestoneStatus::Delayed);

        assert!(tracker.sweep_sla().await.unwrap().is_empty());
    }

    #[cfg(not(feature = "heavy-state"))]
    #[test]
    fn test_state_path_without_backend_is_config_error() {
        let mut config = TrackingConfig::default();
        config.state_path = Some(std::path::PathBuf::from("/tmp/tracking-state"));
        let result = OrderTracker::from_config(config);
        assert_eq!(result.err().map(|e| e.code()), Some("CONFIG_ERROR"));
    }
}
