//! RocksDB-backed tracking store
//!
//! Column families separate the logical tables; bincode encodes values.
//! Multi-row commits go through a `WriteBatch`, and reads that must agree
//! with each other go through a RocksDB snapshot. Writers that check before
//! writing (ledger successor, attempt uniqueness) hold `write_gate` so the
//! check and the batch are one step.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};

use super::schema::{self, ALL_CFS};
use super::store::{check_successor, SharedStore, StoreError, StoreResult, TrackingStore};
use super::types::*;
use crate::catalog::StageCode;

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| StoreError::Deserialization(e.to_string()))
}

/// RocksDB-backed persistent tracking store
pub struct RocksStore {
    db: DB,
    path: PathBuf,
    write_gate: Mutex<()>,
}

impl RocksStore {
    /// Open or create a store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        Ok(Self {
            db,
            path,
            write_gate: Mutex::new(()),
        })
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedStore {
        Arc::new(self)
    }

    /// Get the database path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn cf(&self, name: &str) -> StoreResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(name.to_string()))
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> StoreResult<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(&self, cf_name: &str, key: &str, value: &T) -> StoreResult<()> {
        let cf = self.cf(cf_name)?;
        self.db.put_cf(cf, key.as_bytes(), encode(value)?)?;
        Ok(())
    }

    /// Decode every value whose key starts with `prefix`
    fn scan<T: DeserializeOwned>(&self, cf_name: &str, prefix: &str) -> StoreResult<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_bytes(), Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            values.push(decode(&value)?);
        }
        Ok(values)
    }

    fn lock_writes(&self) -> StoreResult<std::sync::MutexGuard<'_, ()>> {
        self.write_gate.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl TrackingStore for RocksStore {
    fn transitions(&self, order_id: &str) -> StoreResult<Vec<StatusTransition>> {
        self.scan(
            schema::CF_TRANSITIONS,
            &schema::keys::transition_prefix(order_id),
        )
    }

    fn latest_transition(&self, order_id: &str) -> StoreResult<Option<StatusTransition>> {
        Ok(self.transitions(order_id)?.pop())
    }

    fn milestones(&self, order_id: &str) -> StoreResult<Vec<Milestone>> {
        self.scan(
            schema::CF_MILESTONES,
            &schema::keys::milestone_prefix(order_id),
        )
    }

    fn snapshot(&self, order_id: &str) -> StoreResult<OrderSnapshot> {
        let snapshot = self.db.snapshot();

        let read = |cf_name: &str, prefix: String| -> StoreResult<Vec<Box<[u8]>>> {
            let cf = self.cf(cf_name)?;
            let mut rows = Vec::new();
            for item in snapshot
                .iterator_cf(cf, IteratorMode::From(prefix.as_bytes(), Direction::Forward))
            {
                let (key, value) = item?;
                if !key.starts_with(prefix.as_bytes()) {
                    break;
                }
                rows.push(value);
            }
            Ok(rows)
        };

        let transitions = read(
            schema::CF_TRANSITIONS,
            schema::keys::transition_prefix(order_id),
        )?;
        let milestones = read(
            schema::CF_MILESTONES,
            schema::keys::milestone_prefix(order_id),
        )?;

        Ok(OrderSnapshot {
            transitions: transitions
                .iter()
                .map(|bytes| decode(bytes))
                .collect::<StoreResult<_>>()?,
            milestones: milestones
                .iter()
                .map(|bytes| decode(bytes))
                .collect::<StoreResult<_>>()?,
        })
    }

    fn order_ids(&self) -> StoreResult<Vec<OrderId>> {
        let cf = self.cf(schema::CF_TRANSITIONS)?;
        let mut ids: Vec<OrderId> = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            if let Some(order_id) = schema::keys::parse_transition_order(&key) {
                if ids.last() != Some(&order_id) {
                    ids.push(order_id);
                }
            }
        }
        Ok(ids)
    }

    fn initialize_order(
        &self,
        first: &StatusTransition,
        milestones: &[Milestone],
    ) -> StoreResult<bool> {
        let _gate = self.lock_writes()?;
        if self.latest_transition(&first.order_id)?.is_some() {
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(schema::CF_TRANSITIONS)?,
            schema::keys::transition(&first.order_id, first.sequence),
            encode(first)?,
        );
        let cf_milestones = self.cf(schema::CF_MILESTONES)?;
        for milestone in milestones {
            batch.put_cf(
                cf_milestones,
                schema::keys::milestone(&milestone.order_id, milestone.stage_code.as_str()),
                encode(milestone)?,
            );
        }
        self.db.write(batch)?;
        Ok(true)
    }

    fn commit_transition(
        &self,
        expected_previous: StageCode,
        transition: &StatusTransition,
        milestones: &[Milestone],
    ) -> StoreResult<()> {
        let _gate = self.lock_writes()?;
        let latest = self.latest_transition(&transition.order_id)?;
        check_successor(latest.as_ref(), expected_previous, transition)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(schema::CF_TRANSITIONS)?,
            schema::keys::transition(&transition.order_id, transition.sequence),
            encode(transition)?,
        );
        let cf_milestones = self.cf(schema::CF_MILESTONES)?;
        for milestone in milestones {
            batch.put_cf(
                cf_milestones,
                schema::keys::milestone(&milestone.order_id, milestone.stage_code.as_str()),
                encode(milestone)?,
            );
        }
        self.db.write(batch)?;
        Ok(())
    }

    fn put_milestone(&self, milestone: &Milestone) -> StoreResult<()> {
        self.put(
            schema::CF_MILESTONES,
            &schema::keys::milestone(&milestone.order_id, milestone.stage_code.as_str()),
            milestone,
        )
    }

    fn begin_attempt(&self, attempt: &IntegrationAttempt) -> StoreResult<()> {
        let _gate = self.lock_writes()?;
        let key = schema::keys::attempt(&attempt.order_id, attempt.attempt_number);
        if self
            .get::<IntegrationAttempt>(schema::CF_ATTEMPTS, &key)?
            .is_some()
        {
            return Err(StoreError::conflict(key, "attempt already recorded"));
        }
        self.put(schema::CF_ATTEMPTS, &key, attempt)
    }

    fn resolve_attempt(&self, attempt: &IntegrationAttempt) -> StoreResult<()> {
        let _gate = self.lock_writes()?;
        let key = schema::keys::attempt(&attempt.order_id, attempt.attempt_number);
        match self.get::<IntegrationAttempt>(schema::CF_ATTEMPTS, &key)? {
            None => Err(StoreError::NotFound(key)),
            Some(existing) if existing.is_resolved() => {
                Err(StoreError::conflict(key, "attempt already resolved"))
            }
            Some(_) => self.put(schema::CF_ATTEMPTS, &key, attempt),
        }
    }

    fn attempts(&self, order_id: &str) -> StoreResult<Vec<IntegrationAttempt>> {
        self.scan(schema::CF_ATTEMPTS, &schema::keys::attempt_prefix(order_id))
    }

    fn sync_state(&self, order_id: &str) -> StoreResult<Option<OrderSyncState>> {
        self.get(schema::CF_SYNC_STATE, &schema::keys::sync_state(order_id))
    }

    fn put_sync_state(&self, state: &OrderSyncState) -> StoreResult<()> {
        self.put(
            schema::CF_SYNC_STATE,
            &schema::keys::sync_state(&state.order_id),
            state,
        )
    }

    fn document_numbers(&self) -> StoreResult<Vec<String>> {
        let states: Vec<OrderSyncState> =
            self.scan(schema::CF_SYNC_STATE, schema::keys::SYNC_STATE_PREFIX)?;
        Ok(states
            .into_iter()
            .filter_map(|state| state.external_document_number)
            .collect())
    }
}
