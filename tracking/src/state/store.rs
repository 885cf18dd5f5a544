//! Storage seam for the ledger, milestones, attempt log and sync state
//!
//! The [`TrackingStore`] trait is synchronous: every call is a short
//! critical section with no suspension point. Multi-row writes that must be
//! observed together (a transition and its milestone updates) go through a
//! single call so readers never see one without the other.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::catalog::StageCode;

use super::types::*;

/// Error type for state store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "heavy-state")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Write conflict on {key}: {message}")]
    Conflict { key: String, message: String },

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),
}

impl StoreError {
    pub fn conflict(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Result type for state store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a store
pub type SharedStore = Arc<dyn TrackingStore>;

/// Persistence contract shared by the in-memory and RocksDB stores.
pub trait TrackingStore: Send + Sync {
    /// All transitions of an order in ledger order
    fn transitions(&self, order_id: &str) -> StoreResult<Vec<StatusTransition>>;

    /// Most recent transition of an order
    fn latest_transition(&self, order_id: &str) -> StoreResult<Option<StatusTransition>>;

    /// All milestones of an order (unordered)
    fn milestones(&self, order_id: &str) -> StoreResult<Vec<Milestone>>;

    /// Transitions and milestones read as one consistent view
    fn snapshot(&self, order_id: &str) -> StoreResult<OrderSnapshot>;

    /// Every order that has a ledger
    fn order_ids(&self) -> StoreResult<Vec<OrderId>>;

    /// Create the first transition and the milestone rows atomically.
    ///
    /// Returns `false` without writing anything when the order already has
    /// a ledger.
    fn initialize_order(
        &self,
        first: &StatusTransition,
        milestones: &[Milestone],
    ) -> StoreResult<bool>;

    /// Append a transition and upsert the changed milestones atomically.
    ///
    /// Fails with [`StoreError::Conflict`] when the latest recorded stage is
    /// not `expected_previous` or the sequence does not follow it.
    fn commit_transition(
        &self,
        expected_previous: StageCode,
        transition: &StatusTransition,
        milestones: &[Milestone],
    ) -> StoreResult<()>;

    /// Upsert a single milestone
    fn put_milestone(&self, milestone: &Milestone) -> StoreResult<()>;

    /// Record a write-ahead PENDING attempt; the attempt number must be new
    fn begin_attempt(&self, attempt: &IntegrationAttempt) -> StoreResult<()>;

    /// Resolve a PENDING attempt exactly once
    fn resolve_attempt(&self, attempt: &IntegrationAttempt) -> StoreResult<()>;

    /// All attempts of an order by attempt number
    fn attempts(&self, order_id: &str) -> StoreResult<Vec<IntegrationAttempt>>;

    fn sync_state(&self, order_id: &str) -> StoreResult<Option<OrderSyncState>>;

    fn put_sync_state(&self, state: &OrderSyncState) -> StoreResult<()>;

    /// External document numbers of every synced order
    fn document_numbers(&self) -> StoreResult<Vec<String>>;
}

/// Check that `transition` may follow `latest`.
pub(crate) fn check_successor(
    latest: Option<&StatusTransition>,
    expected_previous: StageCode,
    transition: &StatusTransition,
) -> StoreResult<()> {
    let Some(latest) = latest else {
        return Err(StoreError::conflict(
            &transition.order_id,
            "order has no ledger",
        ));
    };

    if latest.current_stage_code != expected_previous
        || transition.previous_stage_code != Some(expected_previous)
    {
        return Err(StoreError::conflict(
            &transition.order_id,
            format!(
                "latest stage is {}, writer expected {}",
                latest.current_stage_code, expected_previous
            ),
        ));
    }

    if transition.sequence != latest.sequence + 1 {
        return Err(StoreError::conflict(
            &transition.order_id,
            format!(
                "sequence {} does not follow {}",
                transition.sequence, latest.sequence
            ),
        ));
    }

    Ok(())
}

#[derive(Debug, Default)]
struct Tables {
    transitions: BTreeMap<OrderId, Vec<StatusTransition>>,
    milestones: HashMap<OrderId, BTreeMap<StageCode, Milestone>>,
    attempts: HashMap<OrderId, BTreeMap<u32, IntegrationAttempt>>,
    sync_state: HashMap<OrderId, OrderSyncState>,
}

/// In-memory store; all tables behind one lock so multi-row writes are
/// atomic and snapshots are consistent.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedStore {
        Arc::new(self)
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl TrackingStore for MemoryStore {
    fn transitions(&self, order_id: &str) -> StoreResult<Vec<StatusTransition>> {
        Ok(self
            .read()?
            .transitions
            .get(order_id)
            .cloned()
            .unwrap_or_default())
    }

    fn latest_transition(&self, order_id: &str) -> StoreResult<Option<StatusTransition>> {
        Ok(self
            .read()?
            .transitions
            .get(order_id)
            .and_then(|rows| rows.last().cloned()))
    }

    fn milestones(&self, order_id: &str) -> StoreResult<Vec<Milestone>> {
        Ok(self
            .read()?
            .milestones
            .get(order_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn snapshot(&self, order_id: &str) -> StoreResult<OrderSnapshot> {
        let tables = self.read()?;
        Ok(OrderSnapshot {
            transitions: tables
                .transitions
                .get(order_id)
                .cloned()
                .unwrap_or_default(),
            milestones: tables
                .milestones
                .get(order_id)
                .map(|rows| rows.values().cloned().collect())
                .unwrap_or_default(),
        })
    }

    fn order_ids(&self) -> StoreResult<Vec<OrderId>> {
        Ok(self.read()?.transitions.keys().cloned().collect())
    }

    fn initialize_order(
        &self,
        first: &StatusTransition,
        milestones: &[Milestone],
    ) -> StoreResult<bool> {
        let mut tables = self.write()?;
        let ledger = tables.transitions.entry(first.order_id.clone()).or_default();
        if !ledger.is_empty() {
            return Ok(false);
        }
        ledger.push(first.clone());

        let rows = tables.milestones.entry(first.order_id.clone()).or_default();
        for milestone in milestones {
            rows.insert(milestone.stage_code, milestone.clone());
        }
        Ok(true)
    }

    fn commit_transition(
        &self,
        expected_previous: StageCode,
        transition: &StatusTransition,
        milestones: &[Milestone],
    ) -> StoreResult<()> {
        let mut tables = self.write()?;
        check_successor(
            tables
                .transitions
                .get(&transition.order_id)
                .and_then(|rows| rows.last()),
            expected_previous,
            transition,
        )?;

        tables
            .transitions
            .entry(transition.order_id.clone())
            .or_default()
            .push(transition.clone());

        let rows = tables
            .milestones
            .entry(transition.order_id.clone())
            .or_default();
        for milestone in milestones {
            rows.insert(milestone.stage_code, milestone.clone());
        }
        Ok(())
    }

    fn put_milestone(&self, milestone: &Milestone) -> StoreResult<()> {
        self.write()?
            .milestones
            .entry(milestone.order_id.clone())
            .or_default()
            .insert(milestone.stage_code, milestone.clone());
        Ok(())
    }

    fn begin_attempt(&self, attempt: &IntegrationAttempt) -> StoreResult<()> {
        let mut tables = self.write()?;
        let rows = tables.attempts.entry(attempt.order_id.clone()).or_default();
        if rows.contains_key(&attempt.attempt_number) {
            return Err(StoreError::conflict(
                &attempt.order_id,
                format!("attempt {} already recorded", attempt.attempt_number),
            ));
        }
        rows.insert(attempt.attempt_number, attempt.clone());
        Ok(())
    }

    fn resolve_attempt(&self, attempt: &IntegrationAttempt) -> StoreResult<()> {
        let mut tables = self.write()?;
        let existing = tables
            .attempts
            .get_mut(&attempt.order_id)
            .and_then(|rows| rows.get_mut(&attempt.attempt_number))
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "attempt {} of {}",
                    attempt.attempt_number, attempt.order_id
                ))
            })?;

        if existing.is_resolved() {
            return Err(StoreError::conflict(
                &attempt.order_id,
                format!("attempt {} already resolved", attempt.attempt_number),
            ));
        }
        *existing = attempt.clone();
        Ok(())
    }

    fn attempts(&self, order_id: &str) -> StoreResult<Vec<IntegrationAttempt>> {
        Ok(self
            .read()?
            .attempts
            .get(order_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn sync_state(&self, order_id: &str) -> StoreResult<Option<OrderSyncState>> {
        Ok(self.read()?.sync_state.get(order_id).cloned())
    }

    fn put_sync_state(&self, state: &OrderSyncState) -> StoreResult<()> {
        self.write()?
            .sync_state
            .insert(state.order_id.clone(), state.clone());
        Ok(())
    }

    fn document_numbers(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .read()?
            .sync_state
            .values()
            .filter_map(|state| state.external_document_number.clone())
            .collect())
    }
}
