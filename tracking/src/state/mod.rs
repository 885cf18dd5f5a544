//! State persistence for order tracking
//!
//! Logical tables:
//! - `status_transitions`: append-only ledger per order
//! - `milestones`: one row per order x stage
//! - `integration_attempts`: append-only attempt log
//! - `order_sync_state`: one row per order
//!
//! [`MemoryStore`] is the default backend. With the `heavy-state` feature,
//! [`RocksStore`] persists the same tables in RocksDB column families.
//!
//! # Usage
//!
//! ```ignore
//! use tracking::state::{MemoryStore, TrackingStore};
//!
//! let store = MemoryStore::new().shared();
//! let history = store.transitions("PO-1")?;
//! ```

#[cfg(feature = "heavy-state")]
pub mod rocks;
pub mod schema;
pub mod store;
pub mod types;

#[cfg(feature = "heavy-state")]
pub use rocks::RocksStore;
pub use store::{MemoryStore, SharedStore, StoreError, StoreResult, TrackingStore};
pub use types::{
    AttemptStatus, ChangeSource, IntegrationAttempt, Milestone, MilestoneStatus, OrderId,
    OrderSnapshot, OrderSyncState, StatusTransition, SyncStatus, TransitionId,
};
