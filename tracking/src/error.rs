//! Tracking error types
//!
//! Every failure carries a stable machine-readable code and a human-readable
//! message. `to_structured` renders the operator-facing envelope used by the
//! CLI and by reporting collaborators.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::state::StoreError;

/// Result type alias for tracking operations
pub type TrackingResult<T> = Result<T, TrackingError>;

/// Structured error response for operators and reporting collaborators.
///
/// # Example Response
/// ```json
/// {
///   "code": "RETRY_EXHAUSTED",
///   "message": "Retry budget exhausted for order PO-1 after 3 attempt(s)",
///   "recovery_action": "Reconcile the attempt log manually ...",
///   "context": { "order_id": "PO-1" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Machine-readable error code (e.g., "UNKNOWN_STAGE", "RETRY_EXHAUSTED")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Actionable recovery instruction
    pub recovery_action: String,

    /// Relevant context for debugging and recovery
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Whether this error is retryable (transient failure)
    #[serde(default)]
    pub retryable: bool,
}

impl StructuredError {
    /// Create a new structured error
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        recovery_action: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recovery_action: recovery_action.into(),
            context: HashMap::new(),
            retryable: false,
        }
    }

    /// Add context key-value pair
    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Mark as retryable
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for StructuredError {}

/// Errors that can occur during tracking and sync operations
#[derive(Error, Debug)]
pub enum TrackingError {
    /// Stage code is not part of the deployment's catalog
    #[error("Unknown stage: {stage}")]
    UnknownStage { stage: String },

    /// No ledger exists for the order yet
    #[error("Order {order_id} is not tracked yet")]
    NotInitialized { order_id: String },

    /// Malformed input (payload, identifiers, parameters)
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Catalog definition violates ordering or uniqueness rules
    #[error("Invalid stage catalog: {message}")]
    InvalidCatalog { message: String },

    /// Milestone cannot move to the requested status
    #[error("Milestone {stage} of order {order_id} is {status} and cannot be {action}")]
    InvalidMilestoneState {
        order_id: String,
        stage: String,
        status: String,
        action: String,
    },

    /// Another writer advanced the ledger between read and commit
    #[error("Concurrent modification of order {order_id}: expected previous stage {expected}")]
    ConcurrentModification { order_id: String, expected: String },

    /// Sync budget used up; requires an operator
    #[error("Retry budget exhausted for order {order_id} after {attempts} attempt(s)")]
    RetryExhausted { order_id: String, attempts: u32 },

    /// Caller cancelled an in-flight sync
    #[error("Sync of order {order_id} was cancelled")]
    Cancelled { order_id: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Storage layer failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrackingError {
    pub fn unknown_stage(stage: impl Into<String>) -> Self {
        Self::UnknownStage {
            stage: stage.into(),
        }
    }

    pub fn not_initialized(order_id: impl Into<String>) -> Self {
        Self::NotInitialized {
            order_id: order_id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invalid_catalog(message: impl Into<String>) -> Self {
        Self::InvalidCatalog {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownStage { .. } => "UNKNOWN_STAGE",
            Self::NotInitialized { .. } => "NOT_INITIALIZED",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::InvalidCatalog { .. } => "INVALID_CATALOG",
            Self::InvalidMilestoneState { .. } => "INVALID_MILESTONE_STATE",
            Self::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            Self::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Self::Cancelled { .. } => "CANCELLED",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Store(_) => "STORE_ERROR",
            Self::Json(_) => "STORE_ERROR",
        }
    }

    /// Check if this error is retryable (transient failure)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConcurrentModification { .. } => true,
            Self::Cancelled { .. } => true,
            Self::Store(e) => matches!(e, StoreError::LockPoisoned),
            _ => false,
        }
    }

    /// Get recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::UnknownStage { .. } => {
                "Use a stage code from the active catalog (tracking-cli catalog lists them)."
            }
            Self::NotInitialized { .. } => {
                "Call initialize_tracking for the order before recording transitions."
            }
            Self::Validation { .. } => "Correct the request data and resubmit.",
            Self::InvalidCatalog { .. } => {
                "Fix the catalog configuration: codes must be unique and order strictly increasing."
            }
            Self::InvalidMilestoneState { .. } => {
                "Check the milestone status in the order timeline before changing it."
            }
            Self::ConcurrentModification { .. } => {
                "Another writer advanced the order. Re-read the timeline and retry the event."
            }
            Self::RetryExhausted { .. } => {
                "Reconcile the attempt log with the external system manually, then correct \
                 the order data before calling sync_order with a larger retry budget."
            }
            Self::Cancelled { .. } => {
                "The attempt was logged as failed. Call sync_order again when ready."
            }
            Self::Config { .. } => {
                "Check configuration settings and TRACKING_* environment variables."
            }
            Self::Store(_) | Self::Json(_) => {
                "Check the state directory for corruption and disk space, then retry."
            }
        }
    }

    /// Convert to structured error for operator-facing responses
    pub fn to_structured(&self) -> StructuredError {
        let mut structured =
            StructuredError::new(self.code(), self.to_string(), self.recovery_suggestion());

        match self {
            Self::NotInitialized { order_id }
            | Self::Cancelled { order_id }
            | Self::ConcurrentModification { order_id, .. } => {
                structured = structured.with_context("order_id", order_id.clone());
            }
            Self::RetryExhausted { order_id, attempts } => {
                structured = structured
                    .with_context("order_id", order_id.clone())
                    .with_context("attempts", *attempts);
            }
            Self::InvalidMilestoneState {
                order_id, stage, ..
            } => {
                structured = structured
                    .with_context("order_id", order_id.clone())
                    .with_context("stage", stage.clone());
            }
            Self::UnknownStage { stage } => {
                structured = structured.with_context("stage", stage.clone());
            }
            _ => {}
        }

        if self.is_retryable() {
            structured = structured.retryable();
        }
        structured
    }
}
