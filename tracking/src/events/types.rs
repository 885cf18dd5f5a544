//! Event types published by the tracking core
//!
//! Dashboards and workflow collaborators subscribe to these instead of
//! polling the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::StageCode;
use crate::gateway::ErrorCode;
use crate::state::{AttemptStatus, ChangeSource, OrderId, SyncStatus};

/// All tracking events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingEvent {
    /// Ledger and milestones created for an order
    TrackingInitialized {
        order_id: OrderId,
        stage: StageCode,
        created_by: String,
        timestamp: DateTime<Utc>,
    },

    /// A transition was appended to the ledger
    TransitionRecorded {
        order_id: OrderId,
        sequence: u64,
        from: Option<StageCode>,
        to: StageCode,
        source: ChangeSource,
        timestamp: DateTime<Utc>,
    },

    /// A milestone was flagged as delayed
    MilestoneDelayed {
        order_id: OrderId,
        stage: StageCode,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// An integration attempt resolved
    SyncAttempted {
        order_id: OrderId,
        attempt_number: u32,
        status: AttemptStatus,
        sync_status: SyncStatus,
        error_code: Option<ErrorCode>,
        timestamp: DateTime<Utc>,
    },

    /// Retry budget used up; an operator must reconcile
    SyncExhausted {
        order_id: OrderId,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
}

impl TrackingEvent {
    /// Snake-case event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TrackingInitialized { .. } => "tracking_initialized",
            Self::TransitionRecorded { .. } => "transition_recorded",
            Self::MilestoneDelayed { .. } => "milestone_delayed",
            Self::SyncAttempted { .. } => "sync_attempted",
            Self::SyncExhausted { .. } => "sync_exhausted",
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            Self::TrackingInitialized { order_id, .. }
            | Self::TransitionRecorded { order_id, .. }
            | Self::MilestoneDelayed { order_id, .. }
            | Self::SyncAttempted { order_id, .. }
            | Self::SyncExhausted { order_id, .. } => order_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::TrackingInitialized { timestamp, .. }
            | Self::TransitionRecorded { timestamp, .. }
            | Self::MilestoneDelayed { timestamp, .. }
            | Self::SyncAttempted { timestamp, .. }
            | Self::SyncExhausted { timestamp, .. } => *timestamp,
        }
    }
}
