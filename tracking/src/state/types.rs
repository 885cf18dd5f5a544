//! Persisted records: transitions, milestones, integration attempts and
//! per-order sync state.
//!
//! Stored types avoid `skip_serializing_if` so they stay readable by the
//! binary (bincode) encoding used by the RocksDB store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::StageCode;
use crate::gateway::ErrorCode;

/// Order identifier (purchase order number)
pub type OrderId = String;

/// Unique identifier for a transition row
pub type TransitionId = String;

/// What caused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeSource {
    Manual,
    WorkflowEvent,
    ExternalSync,
    SystemInit,
}

impl std::fmt::Display for ChangeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "MANUAL"),
            Self::WorkflowEvent => write!(f, "WORKFLOW_EVENT"),
            Self::ExternalSync => write!(f, "EXTERNAL_SYNC"),
            Self::SystemInit => write!(f, "SYSTEM_INIT"),
        }
    }
}

/// One immutable row of the status history ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub id: TransitionId,
    pub order_id: OrderId,
    /// 1-based position in the order's ledger
    pub sequence: u64,
    pub previous_stage_code: Option<StageCode>,
    pub current_stage_code: StageCode,
    pub changed_at: DateTime<Utc>,
    pub changed_by: String,
    pub change_source: ChangeSource,
    pub correlation_id: Option<String>,
    pub is_on_time: bool,
    pub delay_hours: Option<f64>,
    pub notes: Option<String>,
}

impl StatusTransition {
    pub fn new_id() -> TransitionId {
        Uuid::new_v4().to_string()
    }
}

/// Completion state of one (order, stage) milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Completed,
    Delayed,
    Skipped,
}

impl MilestoneStatus {
    /// Still waiting to be reached
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl std::fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Delayed => write!(f, "DELAYED"),
            Self::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Planned vs. actual completion for one (order, stage) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub order_id: OrderId,
    pub stage_code: StageCode,
    pub planned_date: Option<DateTime<Utc>>,
    pub actual_date: Option<DateTime<Utc>>,
    pub status: MilestoneStatus,
    pub completed_by: Option<String>,
    /// Positive when late, negative when early
    pub days_early_late: Option<i64>,
    /// Free-text annotations (delay reasons, skip-ahead notes)
    #[serde(default)]
    pub notes: Vec<String>,
}

impl Milestone {
    /// A fresh PENDING milestone
    pub fn pending(
        order_id: &str,
        stage_code: StageCode,
        planned_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            order_id: order_id.to_string(),
            stage_code,
            planned_date,
            actual_date: None,
            status: MilestoneStatus::Pending,
            completed_by: None,
            days_early_late: None,
            notes: Vec::new(),
        }
    }

    pub fn annotate(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

/// Outcome of one integration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    /// Written before the call; resolved exactly once
    Pending,
    Success,
    Failed,
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// One logged call to the external system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationAttempt {
    pub order_id: OrderId,
    /// 1-based attempt counter per order
    pub attempt_number: u32,
    pub idempotency_key: String,
    /// Request envelope as JSON text
    pub request_payload: String,
    pub requested_at: DateTime<Utc>,
    pub response_payload: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub status: AttemptStatus,
    pub http_like_status_code: Option<u16>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
}

impl IntegrationAttempt {
    /// Write-ahead row recorded before the outbound call
    pub fn pending(
        order_id: &str,
        attempt_number: u32,
        idempotency_key: String,
        request_payload: String,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: order_id.to_string(),
            attempt_number,
            idempotency_key,
            request_payload,
            requested_at,
            response_payload: None,
            responded_at: None,
            status: AttemptStatus::Pending,
            http_like_status_code: None,
            error_code: None,
            error_message: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status != AttemptStatus::Pending
    }
}

/// Sync status of an order against the external system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    NotSynced,
    Synced,
    RetryPending,
    RetryExhausted,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotSynced => write!(f, "NOT_SYNCED"),
            Self::Synced => write!(f, "SYNCED"),
            Self::RetryPending => write!(f, "RETRY_PENDING"),
            Self::RetryExhausted => write!(f, "RETRY_EXHAUSTED"),
        }
    }
}

/// Per-order sync state, mutated only by the retry coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSyncState {
    pub order_id: OrderId,
    pub external_document_number: Option<String>,
    pub sync_status: SyncStatus,
    pub last_attempt_number: u32,
    pub last_attempt_status: Option<AttemptStatus>,
    pub last_error_code: Option<ErrorCode>,
    pub last_error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl OrderSyncState {
    pub fn new(order_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            order_id: order_id.to_string(),
            external_document_number: None,
            sync_status: SyncStatus::NotSynced,
            last_attempt_number: 0,
            last_attempt_status: None,
            last_error_code: None,
            last_error_message: None,
            updated_at: now,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.sync_status == SyncStatus::Synced
    }

    /// Surface exhaustion as an error for callers that must stop here
    pub fn ensure_not_exhausted(self) -> crate::error::TrackingResult<Self> {
        if self.sync_status == SyncStatus::RetryExhausted {
            return Err(crate::error::TrackingError::RetryExhausted {
                order_id: self.order_id,
                attempts: self.last_attempt_number,
            });
        }
        Ok(self)
    }
}

/// Consistent read of one order's ledger and milestones.
#[derive(Debug, Clone, Default)]
pub struct OrderSnapshot {
    pub transitions: Vec<StatusTransition>,
    pub milestones: Vec<Milestone>,
}

impl OrderSnapshot {
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn latest(&self) -> Option<&StatusTransition> {
        self.transitions.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::to_string(&ChangeSource::WorkflowEvent).unwrap(),
            "\"WORKFLOW_EVENT\""
        );
        assert_eq!(
            serde_json::to_string(&SyncStatus::RetryExhausted).unwrap(),
            "\"RETRY_EXHAUSTED\""
        );
        assert_eq!(MilestoneStatus::InProgress.to_string(), "IN_PROGRESS");
    }

    #[test]
    fn test_exhausted_state_surfaces_as_error() {
        let mut state = OrderSyncState::new("PO-1", Utc::now());
        state.last_attempt_number = 3;
        assert!(state.clone().ensure_not_exhausted().is_ok());

        state.sync_status = SyncStatus::RetryExhausted;
        let err = state.ensure_not_exhausted().unwrap_err();
        assert_eq!(err.code(), "RETRY_EXHAUSTED");
    }
}
