//! Order Lifecycle Tracking Library
//!
//! This library provides:
//! - An append-only status ledger per purchase order
//! - Planned vs. actual milestones derived from every transition
//! - A read-only timeline projection for dashboards
//! - Goods-receipt sync to the enterprise system with a write-ahead attempt
//!   log and a hard, caller-driven retry ceiling
//!
//! # Components
//!
//! - [`catalog`]: ordered stage definitions with SLA hours
//! - [`ledger`]: `initialize_tracking`, `append_transition`, chain checks
//! - [`milestones`]: derivation rules, `mark_delayed`, SLA breaches
//! - [`timeline`]: `project` an order into a [`TimelineView`]
//! - [`gateway`]: one logged call per send through an [`ErpTransport`]
//! - [`sync`]: [`RetryCoordinator`] and connection health
//! - [`tracker`]: the [`OrderTracker`] facade
//! - [`schedule`]: periodic SLA sweeps
//! - [`state`]: in-memory and RocksDB (`heavy-state`) stores
//!
//! # Usage
//!
//! ```ignore
//! let tracker = OrderTracker::from_config(TrackingConfig::from_env())?;
//! tracker.initialize_tracking("PO-1", StageCode::OrderCreated, "system").await?;
//! tracker
//!     .record_event(TransitionRequest::new("PO-1", StageCode::Shipped, "alice"), None)
//!     .await?;
//! let timeline = tracker.project("PO-1")?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod ledger;
pub mod locks;
pub mod milestones;
pub mod schedule;
pub mod state;
pub mod sync;
pub mod timeline;
pub mod tracker;

pub use catalog::{SharedCatalog, StageCatalog, StageCategory, StageCode, StageDefinition};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{GatewayConfig, HealthConfig, RetryConfig, TrackingConfig};
pub use error::{StructuredError, TrackingError, TrackingResult};
pub use events::{EventBus, SharedEventBus, TrackingEvent};
pub use gateway::{
    ErpTransport, ErrorCode, ExternalError, GoodsReceiptPayload, IntegrationGateway,
    IntegrationResult, LineItem, OutboundRequest, ReceiptConfirmation, SimulatedErp,
};
pub use ledger::{ChainViolation, InitOutcome, StatusLedger, TransitionRequest};
pub use locks::{OrderGuard, OrderLocks};
pub use milestones::{MilestoneTracker, SlaBreach};
pub use schedule::SlaMonitor;
pub use state::{
    AttemptStatus, ChangeSource, IntegrationAttempt, MemoryStore, Milestone, MilestoneStatus,
    OrderSyncState, StatusTransition, SyncStatus, TrackingStore,
};
pub use sync::{ConnectionHealth, ConnectionStatus, RetryCoordinator, DEFAULT_MAX_RETRIES};
pub use timeline::{TimelineProjection, TimelineProjector, TimelineView};
pub use tracker::{EventOutcome, OrderTracker, TrackerBuilder};
