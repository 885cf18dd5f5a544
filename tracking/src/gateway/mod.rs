//! Integration Gateway: one logged call to the enterprise system per send
//!
//! The attempt row is written as PENDING before the transport is awaited and
//! resolved exactly once afterwards. If the send future is dropped while the
//! call is in flight, the attempt guard resolves the row as a failed
//! `CONN_TIMEOUT`, so the log never holds a row nobody will finish.
//!
//! # Usage
//!
//! ```ignore
//! let gateway = IntegrationGateway::new(store, transport, clock, Duration::from_secs(5));
//! let result = gateway.send("PO-1", 1, &payload).await?;
//! if result.success { /* document number in result.external_document_number */ }
//! ```

pub mod erp;
pub mod outcome;
pub mod payload;

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::error::TrackingResult;
use crate::state::{AttemptStatus, IntegrationAttempt, SharedStore};

pub use erp::{ErpTransport, SharedTransport, SimulatedErp, DEFAULT_DOCUMENT_PREFIX};
pub use outcome::{OutcomeGenerator, RandomOutcomes, ScriptedOutcomes, SimulatedOutcome};
pub use payload::{
    DocumentType, ErrorCode, ExternalError, GoodsReceiptPayload, LineItem, OutboundRequest,
    ReceiptConfirmation,
};

/// Result of one gateway call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrationResult {
    pub success: bool,
    pub external_document_number: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub attempt_record: IntegrationAttempt,
}

/// Resolves a write-ahead attempt row exactly once.
struct AttemptGuard {
    store: SharedStore,
    clock: SharedClock,
    attempt: IntegrationAttempt,
    armed: bool,
}

impl AttemptGuard {
    fn resolve(
        mut self,
        outcome: Result<ReceiptConfirmation, ExternalError>,
    ) -> TrackingResult<IntegrationAttempt> {
        let mut attempt = self.attempt.clone();
        attempt.responded_at = Some(self.clock.now());
        match outcome {
            Ok(confirmation) => {
                attempt.status = AttemptStatus::Success;
                attempt.http_like_status_code = Some(200);
                attempt.response_payload = Some(serde_json::to_string(&confirmation)?);
            }
            Err(error) => {
                attempt.status = AttemptStatus::Failed;
                attempt.http_like_status_code = Some(error.error_code.http_status());
                attempt.error_code = Some(error.error_code);
                attempt.error_message = Some(error.message.clone());
                attempt.response_payload = Some(serde_json::to_string(&error)?);
            }
        }
        self.armed = false;
        self.store.resolve_attempt(&attempt)?;
        Ok(attempt)
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut attempt = self.attempt.clone();
        let code = ErrorCode::ConnTimeout;
        attempt.status = AttemptStatus::Failed;
        attempt.responded_at = Some(self.clock.now());
        attempt.http_like_status_code = Some(code.http_status());
        attempt.error_code = Some(code);
        attempt.error_message = Some("cancelled before the enterprise system responded".into());

        match self.store.resolve_attempt(&attempt) {
            Ok(()) => warn!(
                order_id = %attempt.order_id,
                attempt = attempt.attempt_number,
                "In-flight attempt cancelled; logged as CONN_TIMEOUT"
            ),
            Err(e) => warn!(
                order_id = %attempt.order_id,
                attempt = attempt.attempt_number,
                error = %e,
                "Failed to resolve cancelled attempt"
            ),
        }
    }
}

/// Sends goods receipts through a transport and logs every attempt.
pub struct IntegrationGateway {
    store: SharedStore,
    transport: SharedTransport,
    clock: SharedClock,
    call_timeout: Duration,
}

impl IntegrationGateway {
    pub fn new(
        store: SharedStore,
        transport: SharedTransport,
        clock: SharedClock,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            clock,
            call_timeout,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Make exactly one call for `order_id` and log it as `attempt_number`.
    ///
    /// Validation errors return before anything is logged. External
    /// failures are not errors: they come back as an unsuccessful
    /// [`IntegrationResult`].
    pub async fn send(
        &self,
        order_id: &str,
        attempt_number: u32,
        payload: &GoodsReceiptPayload,
    ) -> TrackingResult<IntegrationResult> {
        payload.validate_for(order_id)?;

        let request = OutboundRequest {
            order_id: order_id.to_string(),
            attempt_number,
            idempotency_key: payload.idempotency_key(order_id)?,
            payload: payload.clone(),
        };
        let attempt = IntegrationAttempt::pending(
            order_id,
            attempt_number,
            request.idempotency_key.clone(),
            serde_json::to_string(&request)?,
            self.clock.now(),
        );
        self.store.begin_attempt(&attempt)?;

        let guard = AttemptGuard {
            store: self.store.clone(),
            clock: self.clock.clone(),
            attempt,
            armed: true,
        };

        let outcome =
            match tokio::time::timeout(self.call_timeout, self.transport.post_goods_receipt(&request))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ExternalError::new(
                    ErrorCode::ConnTimeout,
                    format!("no response within {}ms", self.call_timeout.as_millis()),
                )),
            };

        let document_number = outcome.as_ref().ok().map(|c| c.document_number.clone());
        let record = guard.resolve(outcome)?;

        match &document_number {
            Some(document) => info!(
                order_id,
                attempt = attempt_number,
                document = %document,
                "Goods receipt posted"
            ),
            None => warn!(
                order_id,
                attempt = attempt_number,
                error_code = ?record.error_code,
                error = record.error_message.as_deref().unwrap_or_default(),
                "Goods receipt post failed"
            ),
        }

        Ok(IntegrationResult {
            success: record.status == AttemptStatus::Success,
            external_document_number: document_number,
            error_code: record.error_code,
            error_message: record.error_message.clone(),
            attempt_record: record,
        })
    }
}
