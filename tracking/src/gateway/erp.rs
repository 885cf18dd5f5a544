//! Transport to the enterprise system and its simulation

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::outcome::{OutcomeGenerator, SimulatedOutcome};
use super::payload::{ExternalError, OutboundRequest, ReceiptConfirmation};
use crate::clock::SharedClock;

/// Default document number prefix for goods receipts
pub const DEFAULT_DOCUMENT_PREFIX: &str = "GR";

/// Posts goods receipts to the enterprise system.
#[async_trait]
pub trait ErpTransport: Send + Sync {
    async fn post_goods_receipt(
        &self,
        request: &OutboundRequest,
    ) -> Result<ReceiptConfirmation, ExternalError>;
}

/// Shared transport handle
pub type SharedTransport = Arc<dyn ErpTransport>;

/// In-process stand-in for the enterprise system.
///
/// Sleeps a bounded latency, then succeeds or fails as the
/// [`OutcomeGenerator`] decides. A key that was already confirmed gets the
/// same confirmation back. The replay cache lives in memory only; numbering
/// survives a restart through [`continuing_after`](Self::continuing_after).
pub struct SimulatedErp {
    clock: SharedClock,
    outcomes: Arc<dyn OutcomeGenerator>,
    min_latency_ms: u64,
    max_latency_ms: u64,
    document_prefix: String,
    sequence: AtomicU64,
    confirmed: Mutex<HashMap<String, ReceiptConfirmation>>,
}

impl SimulatedErp {
    pub fn new(clock: SharedClock, outcomes: Arc<dyn OutcomeGenerator>) -> Self {
        Self {
            clock,
            outcomes,
            min_latency_ms: 0,
            max_latency_ms: 0,
            document_prefix: DEFAULT_DOCUMENT_PREFIX.to_string(),
            sequence: AtomicU64::new(1),
            confirmed: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.min_latency_ms = min_ms;
        self.max_latency_ms = max_ms.max(min_ms);
        self
    }

    pub fn with_document_prefix(mut self, prefix: &str) -> Self {
        self.document_prefix = prefix.to_string();
        self
    }

    /// Continue numbering after documents issued by an earlier process.
    ///
    /// Only numbers carrying this transport's prefix count; the next document
    /// takes the highest trailing sequence among them plus one.
    pub fn continuing_after<'a>(mut self, issued: impl IntoIterator<Item = &'a str>) -> Self {
        let highest = issued
            .into_iter()
            .filter_map(|number| number.strip_prefix(self.document_prefix.as_str()))
            .filter(|rest| rest.len() == 14 && rest.bytes().all(|b| b.is_ascii_digit()))
            .filter_map(|rest| rest[8..].parse::<u64>().ok())
            .max();
        if let Some(highest) = highest {
            self.sequence = AtomicU64::new(highest + 1);
        }
        self
    }

    pub fn shared(self) -> SharedTransport {
        Arc::new(self)
    }

    /// Number of distinct receipts posted so far
    pub fn posted_count(&self) -> usize {
        self.confirmed.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn next_document_number(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        format!(
            "{}{}{:06}",
            self.document_prefix,
            self.clock.now().format("%Y%m%d"),
            seq
        )
    }
}

#[async_trait]
impl ErpTransport for SimulatedErp {
    async fn post_goods_receipt(
        &self,
        request: &OutboundRequest,
    ) -> Result<ReceiptConfirmation, ExternalError> {
        let latency = self
            .outcomes
            .latency_ms(self.min_latency_ms, self.max_latency_ms);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let cached = self
            .confirmed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&request.idempotency_key)
            .cloned();
        if let Some(confirmation) = cached {
            debug!(
                order_id = %request.order_id,
                document = %confirmation.document_number,
                "Replayed confirmation for known idempotency key"
            );
            return Ok(confirmation);
        }

        if let SimulatedOutcome::Fail(code) = self.outcomes.next_outcome() {
            return Err(ExternalError::from_code(code));
        }

        let confirmation = ReceiptConfirmation {
            document_number: self.next_document_number(),
            external_reference: request.payload.reference_number.clone(),
            posting_date: self.clock.now(),
            status: "POSTED".to_string(),
            total_quantity: request.payload.total_quantity(),
            items_count: request.payload.line_items.len(),
        };
        self.confirmed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request.idempotency_key.clone(), confirmation.clone());
        Ok(confirmation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::gateway::outcome::ScriptedOutcomes;
    use crate::gateway::payload::{DocumentType, ErrorCode, GoodsReceiptPayload, LineItem};
    use chrono::{NaiveDate, TimeZone, Utc};
    use regex::Regex;

    fn request(key: &str) -> OutboundRequest {
        OutboundRequest {
            order_id: "PO-1".to_string(),
            attempt_number: 1,
            idempotency_key: key.to_string(),
            payload: GoodsReceiptPayload {
                order_id: "PO-1".to_string(),
                reference_number: "DN-1".to_string(),
                counterparty_id: "V-1".to_string(),
                line_items: vec![LineItem {
                    line_number: 1,
                    material_code: "M".to_string(),
                    description: "Widget".to_string(),
                    quantity: 3.0,
                    unit: "EA".to_string(),
                }],
                delivery_date: NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(),
                delivery_location: "Dock 2".to_string(),
                document_type: DocumentType::GoodsReceipt,
            },
        }
    }

    fn erp(outcomes: ScriptedOutcomes) -> SimulatedErp {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap(),
        ));
        SimulatedErp::new(clock, Arc::new(outcomes))
    }

    #[tokio::test]
    async fn test_success_document_number_format() {
        let erp = erp(ScriptedOutcomes::always(SimulatedOutcome::Succeed));
        let confirmation = erp.post_goods_receipt(&request("k1")).await.unwrap();

        let re = Regex::new(r"^GR\d{14}$").unwrap();
        assert!(re.is_match(&confirmation.document_number));
        assert_eq!(confirmation.document_number, "GR20260504000001");
        assert_eq!(confirmation.items_count, 1);
        assert_eq!(confirmation.total_quantity, 3.0);
    }

    #[tokio::test]
    async fn test_same_key_replays_confirmation() {
        let erp = erp(ScriptedOutcomes::new([SimulatedOutcome::Succeed])
            .with_fallback(SimulatedOutcome::Fail(ErrorCode::SystemError)));

        let first = erp.post_goods_receipt(&request("k1")).await.unwrap();
        let again = erp.post_goods_receipt(&request("k1")).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(erp.posted_count(), 1);

        let other = erp.post_goods_receipt(&request("k2")).await.unwrap_err();
        assert_eq!(other.error_code, ErrorCode::SystemError);
    }

    #[tokio::test]
    async fn test_numbering_continues_after_issued_documents() {
        let continued = erp(ScriptedOutcomes::always(SimulatedOutcome::Succeed)).continuing_after([
            "GR20260503000007",
            "GR20260504000041",
            "XX20260504000900",
            "GR-not-a-number",
        ]);
        let confirmation = continued.post_goods_receipt(&request("k1")).await.unwrap();
        assert_eq!(confirmation.document_number, "GR20260504000042");

        let fresh = erp(ScriptedOutcomes::always(SimulatedOutcome::Succeed))
            .continuing_after(std::iter::empty());
        let confirmation = fresh.post_goods_receipt(&request("k1")).await.unwrap();
        assert_eq!(confirmation.document_number, "GR20260504000001");
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_slept() {
        let erp = erp(ScriptedOutcomes::always(SimulatedOutcome::Succeed)).with_latency(250, 250);
        let started = tokio::time::Instant::now();
        erp.post_goods_receipt(&request("k1")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
    }
}
