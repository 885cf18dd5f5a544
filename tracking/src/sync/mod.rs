//! Retry Coordinator: caller-driven sync with a hard attempt ceiling
//!
//! Each `sync_order` call makes at most one gateway call. Nothing retries in
//! the background; the caller (workflow engine, operator, CLI) decides when
//! to try again. Attempts are counted from the attempt log, so a row left by
//! a cancelled call uses up budget like any other failure.
//! A SUCCESS row settles the order even when the sync state write after it
//! was lost.

pub mod health;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::error::{TrackingError, TrackingResult};
use crate::events::{SharedEventBus, TrackingEvent};
use crate::gateway::{GoodsReceiptPayload, IntegrationGateway, ReceiptConfirmation};
use crate::locks::{OrderGuard, OrderLocks};
use crate::state::{AttemptStatus, IntegrationAttempt, OrderSyncState, SharedStore, SyncStatus};

pub use health::{
    ConnectionHealth, ConnectionStatus, HealthCheck, HealthWeights, SimulatedHealthCheck,
};

/// Attempts allowed per order unless configured otherwise
pub const DEFAULT_MAX_RETRIES: u32 = 3;

pub struct RetryCoordinator {
    store: SharedStore,
    gateway: Arc<IntegrationGateway>,
    health_check: Arc<dyn HealthCheck>,
    clock: SharedClock,
    locks: OrderLocks,
    bus: SharedEventBus,
}

impl RetryCoordinator {
    pub fn new(
        store: SharedStore,
        gateway: Arc<IntegrationGateway>,
        health_check: Arc<dyn HealthCheck>,
        clock: SharedClock,
        locks: OrderLocks,
        bus: SharedEventBus,
    ) -> Self {
        Self {
            store,
            gateway,
            health_check,
            clock,
            locks,
            bus,
        }
    }

    /// Try to sync `order_id` once, unless it is synced or out of budget.
    pub async fn sync_order(
        &self,
        order_id: &str,
        payload: &GoodsReceiptPayload,
        max_retries: u32,
    ) -> TrackingResult<OrderSyncState> {
        let guard = self.locks.lock(order_id).await;
        self.sync_order_locked(&guard, payload, max_retries).await
    }

    /// Like [`sync_order`](Self::sync_order), abandoning the call when
    /// `cancel` fires.
    ///
    /// The in-flight attempt is logged as a failed `CONN_TIMEOUT` and the
    /// sync state moves to RETRY_PENDING before `Cancelled` is returned.
    pub async fn sync_order_with_cancel(
        &self,
        order_id: &str,
        payload: &GoodsReceiptPayload,
        max_retries: u32,
        cancel: CancellationToken,
    ) -> TrackingResult<OrderSyncState> {
        let guard = self.locks.lock(order_id).await;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.record_cancelled(order_id)?;
                Err(TrackingError::Cancelled { order_id: order_id.to_string() })
            }
            result = self.sync_order_locked(&guard, payload, max_retries) => result,
        }
    }

    pub(crate) async fn sync_order_locked(
        &self,
        guard: &OrderGuard,
        payload: &GoodsReceiptPayload,
        max_retries: u32,
    ) -> TrackingResult<OrderSyncState> {
        let order_id = guard.order_id();
        if max_retries == 0 {
            return Err(TrackingError::validation("max_retries must be at least 1"));
        }

        let mut state = self.current_state(order_id)?;
        if state.is_synced() {
            debug!(order_id, "Order already synced; no call made");
            return Ok(state);
        }

        let attempts = self.store.attempts(order_id)?;
        let adopted = attempts.iter().rev().find(|a| a.status == AttemptStatus::Success);
        if let Some(success) = adopted {
            return self.reconcile(state, success);
        }
        let made = attempts.len() as u32;
        if made >= max_retries {
            return self.exhaust(state, made, max_retries);
        }

        let attempt_number = next_attempt_number(&attempts);
        let result = self.gateway.send(order_id, attempt_number, payload).await?;

        state.last_attempt_number = attempt_number;
        state.last_attempt_status = Some(result.attempt_record.status);
        state.updated_at = self.clock.now();
        if result.success {
            state.sync_status = SyncStatus::Synced;
            state.external_document_number = result.external_document_number.clone();
            state.last_error_code = None;
            state.last_error_message = None;
            info!(
                order_id,
                attempt = attempt_number,
                document = state.external_document_number.as_deref().unwrap_or_default(),
                "Order synced"
            );
        } else {
            state.sync_status = SyncStatus::RetryPending;
            state.last_error_code = result.error_code;
            state.last_error_message = result.error_message.clone();
            info!(
                order_id,
                attempt = attempt_number,
                remaining = max_retries - attempt_number.min(max_retries),
                "Sync failed; retry pending"
            );
        }
        self.store.put_sync_state(&state)?;

        self.bus.publish(TrackingEvent::SyncAttempted {
            order_id: order_id.to_string(),
            attempt_number,
            status: result.attempt_record.status,
            sync_status: state.sync_status,
            error_code: result.error_code,
            timestamp: state.updated_at,
        });
        Ok(state)
    }

    /// Stored sync state, NOT_SYNCED when none was recorded yet
    pub fn sync_state(&self, order_id: &str) -> TrackingResult<OrderSyncState> {
        self.current_state(order_id)
    }

    /// Every attempt for an order in attempt order
    pub fn attempt_history(&self, order_id: &str) -> TrackingResult<Vec<IntegrationAttempt>> {
        Ok(self.store.attempts(order_id)?)
    }

    pub async fn connection_health(&self) -> ConnectionHealth {
        self.health_check.check().await
    }

    fn current_state(&self, order_id: &str) -> TrackingResult<OrderSyncState> {
        Ok(self
            .store
            .sync_state(order_id)?
            .unwrap_or_else(|| OrderSyncState::new(order_id, self.clock.now())))
    }

    /// Adopt a SUCCESS row whose sync state was never written.
    fn reconcile(
        &self,
        mut state: OrderSyncState,
        success: &IntegrationAttempt,
    ) -> TrackingResult<OrderSyncState> {
        let confirmation = success
            .response_payload
            .as_deref()
            .map(serde_json::from_str::<ReceiptConfirmation>)
            .transpose()?;

        state.sync_status = SyncStatus::Synced;
        state.last_attempt_number = success.attempt_number;
        state.last_attempt_status = Some(AttemptStatus::Success);
        state.external_document_number = confirmation.map(|c| c.document_number);
        state.last_error_code = None;
        state.last_error_message = None;
        state.updated_at = self.clock.now();
        self.store.put_sync_state(&state)?;

        warn!(
            order_id = %state.order_id,
            attempt = success.attempt_number,
            document = state.external_document_number.as_deref().unwrap_or_default(),
            "Sync state recovered from attempt log; no call made"
        );
        Ok(state)
    }

    fn exhaust(
        &self,
        mut state: OrderSyncState,
        made: u32,
        max_retries: u32,
    ) -> TrackingResult<OrderSyncState> {
        let newly_exhausted = state.sync_status != SyncStatus::RetryExhausted;
        state.sync_status = SyncStatus::RetryExhausted;
        state.updated_at = self.clock.now();
        self.store.put_sync_state(&state)?;

        warn!(
            order_id = %state.order_id,
            attempts = made,
            max_retries,
            last_error_code = ?state.last_error_code,
            "Retry budget exhausted; operator reconciliation required"
        );
        if newly_exhausted {
            self.bus.publish(TrackingEvent::SyncExhausted {
                order_id: state.order_id.clone(),
                attempts: made,
                timestamp: state.updated_at,
            });
        }
        Ok(state)
    }

    /// Fold the attempt resolved by a cancelled call into the sync state.
    fn record_cancelled(&self, order_id: &str) -> TrackingResult<()> {
        let mut state = self.current_state(order_id)?;
        let Some(last) = self.store.attempts(order_id)?.pop() else {
            return Ok(());
        };
        if state.is_synced() || last.attempt_number <= state.last_attempt_number {
            return Ok(());
        }

        state.sync_status = SyncStatus::RetryPending;
        state.last_attempt_number = last.attempt_number;
        state.last_attempt_status = Some(AttemptStatus::Failed);
        state.last_error_code = last.error_code;
        state.last_error_message = last.error_message.clone();
        state.updated_at = self.clock.now();
        self.store.put_sync_state(&state)?;

        warn!(order_id, attempt = last.attempt_number, "Sync cancelled by caller");
        self.bus.publish(TrackingEvent::SyncAttempted {
            order_id: order_id.to_string(),
            attempt_number: last.attempt_number,
            status: last.status,
            sync_status: state.sync_status,
            error_code: last.error_code,
            timestamp: state.updated_at,
        });
        Ok(())
    }
}

fn next_attempt_number(attempts: &[IntegrationAttempt]) -> u32 {
    attempts
        .iter()
        .map(|a| a.attempt_number)
        .max()
        .unwrap_or(0)
        + 1
}
