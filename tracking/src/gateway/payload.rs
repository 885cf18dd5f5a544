//! Outbound goods-receipt payload and the external error taxonomy

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{TrackingError, TrackingResult};

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9\-/]*$").expect("REFERENCE_RE regex should compile")
});

/// Error codes reported by the external enterprise system.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConnTimeout,
    InvalidReference,
    QuantityMismatch,
    CounterpartyBlocked,
    SystemError,
}

impl ErrorCode {
    /// Codes a simulated failure picks from
    pub const ALL: [ErrorCode; 5] = [
        ErrorCode::ConnTimeout,
        ErrorCode::InvalidReference,
        ErrorCode::QuantityMismatch,
        ErrorCode::CounterpartyBlocked,
        ErrorCode::SystemError,
    ];

    pub fn http_status(&self) -> u16 {
        match self {
            Self::ConnTimeout => 504,
            Self::InvalidReference => 404,
            Self::QuantityMismatch => 422,
            Self::CounterpartyBlocked => 403,
            Self::SystemError => 500,
        }
    }

    /// Whether resubmitting the same payload may succeed.
    ///
    /// Reported to operators only; the retry budget treats every failure
    /// alike.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnTimeout | Self::SystemError)
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            Self::ConnTimeout => "Connection to the enterprise system timed out",
            Self::InvalidReference => "Purchase order reference not found",
            Self::QuantityMismatch => "Received quantity does not match the order",
            Self::CounterpartyBlocked => "Vendor is blocked for posting",
            Self::SystemError => "Enterprise system internal error",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnTimeout => "CONN_TIMEOUT",
            Self::InvalidReference => "INVALID_REFERENCE",
            Self::QuantityMismatch => "QUANTITY_MISMATCH",
            Self::CounterpartyBlocked => "COUNTERPARTY_BLOCKED",
            Self::SystemError => "SYSTEM_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorCode {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| TrackingError::validation(format!("unknown error code '{}'", s)))
    }
}

/// Failure returned by the external system for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalError {
    pub error_code: ErrorCode,
    pub message: String,
}

impl ExternalError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
        }
    }

    /// Error carrying the code's default message
    pub fn from_code(error_code: ErrorCode) -> Self {
        Self::new(error_code, error_code.default_message())
    }
}

impl std::fmt::Display for ExternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code, self.message)
    }
}

/// Kind of receipt document posted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    #[default]
    GoodsReceipt,
    ReturnDelivery,
}

/// One received line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct LineItem {
    #[schemars(description = "Purchase order line number, unique within the payload")]
    pub line_number: u32,
    pub material_code: String,
    pub description: String,
    #[schemars(description = "Received quantity, must be greater than zero")]
    pub quantity: f64,
    pub unit: String,
}

/// Goods-receipt data posted to the enterprise system.
///
/// Built by the caller for each sync request; never persisted except as the
/// attempt log's request text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct GoodsReceiptPayload {
    #[schemars(description = "Purchase order being received")]
    pub order_id: String,
    #[schemars(description = "Delivery note or external reference (alphanumeric, '-' and '/')")]
    pub reference_number: String,
    pub counterparty_id: String,
    pub line_items: Vec<LineItem>,
    pub delivery_date: NaiveDate,
    pub delivery_location: String,
    #[serde(default)]
    pub document_type: DocumentType,
}

impl GoodsReceiptPayload {
    /// Check the payload before anything is logged or sent.
    pub fn validate_for(&self, order_id: &str) -> TrackingResult<()> {
        if self.order_id.trim().is_empty() {
            return Err(TrackingError::validation("payload order_id is empty"));
        }
        if self.order_id != order_id {
            return Err(TrackingError::validation(format!(
                "payload order_id '{}' does not match sync target '{}'",
                self.order_id, order_id
            )));
        }
        if self.reference_number.trim().is_empty() {
            return Err(TrackingError::validation("reference_number is empty"));
        }
        if !REFERENCE_RE.is_match(&self.reference_number) {
            return Err(TrackingError::validation(format!(
                "reference_number '{}' may only contain letters, digits, '-' and '/'",
                self.reference_number
            )));
        }
        if self.counterparty_id.trim().is_empty() {
            return Err(TrackingError::validation("counterparty_id is empty"));
        }
        if self.line_items.is_empty() {
            return Err(TrackingError::validation("at least one line item is required"));
        }

        let mut seen = HashSet::new();
        for item in &self.line_items {
            if item.quantity.is_nan() || item.quantity <= 0.0 {
                return Err(TrackingError::validation(format!(
                    "line {} has non-positive quantity {}",
                    item.line_number, item.quantity
                )));
            }
            if !seen.insert(item.line_number) {
                return Err(TrackingError::validation(format!(
                    "duplicate line number {}",
                    item.line_number
                )));
            }
        }
        Ok(())
    }

    /// blake3 of the order id and the payload JSON, hex encoded.
    ///
    /// Struct fields serialize in declaration order, so equal payloads
    /// always hash equal.
    pub fn idempotency_key(&self, order_id: &str) -> TrackingResult<String> {
        let body = serde_json::to_vec(self)?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(order_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(&body);
        Ok(hasher.finalize().to_hex().to_string())
    }

    pub fn total_quantity(&self) -> f64 {
        self.line_items.iter().map(|item| item.quantity).sum()
    }
}

/// Envelope handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub order_id: String,
    pub attempt_number: u32,
    pub idempotency_key: String,
    pub payload: GoodsReceiptPayload,
}

/// Posted receipt returned on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptConfirmation {
    pub document_number: String,
    pub external_reference: String,
    pub posting_date: DateTime<Utc>,
    pub status: String,
    pub total_quantity: f64,
    pub items_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(order_id: &str) -> GoodsReceiptPayload {
        GoodsReceiptPayload {
            order_id: order_id.to_string(),
            reference_number: "DN-2026/0042".to_string(),
            counterparty_id: "V-1001".to_string(),
            line_items: vec![
                LineItem {
                    line_number: 10,
                    material_code: "MAT-7".to_string(),
                    description: "Bearing".to_string(),
                    quantity: 4.0,
                    unit: "EA".to_string(),
                },
                LineItem {
                    line_number: 20,
                    material_code: "MAT-9".to_string(),
                    description: "Seal".to_string(),
                    quantity: 12.5,
                    unit: "EA".to_string(),
                },
            ],
            delivery_date: NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(),
            delivery_location: "Plant 1".to_string(),
            document_type: DocumentType::GoodsReceipt,
        }
    }

    #[test]
    fn test_error_code_taxonomy() {
        assert_eq!(ErrorCode::ConnTimeout.http_status(), 504);
        assert_eq!(ErrorCode::InvalidReference.http_status(), 404);
        assert_eq!(ErrorCode::QuantityMismatch.http_status(), 422);
        assert_eq!(ErrorCode::CounterpartyBlocked.http_status(), 403);
        assert_eq!(ErrorCode::SystemError.http_status(), 500);
        assert!(ErrorCode::ConnTimeout.is_transient());
        assert!(!ErrorCode::QuantityMismatch.is_transient());
        assert_eq!("COUNTERPARTY_BLOCKED".parse::<ErrorCode>().unwrap(), ErrorCode::CounterpartyBlocked);
        assert!("NOPE".parse::<ErrorCode>().is_err());
    }

    #[test]
    fn test_valid_payload_passes() {
        let p = payload("PO-1");
        assert!(p.validate_for("PO-1").is_ok());
        assert_eq!(p.total_quantity(), 16.5);
    }

    #[test]
    fn test_validation_rejects_bad_payloads() {
        assert!(payload("PO-1").validate_for("PO-2").is_err());

        let mut p = payload("PO-1");
        p.reference_number = "DN 42!".to_string();
        assert_eq!(p.validate_for("PO-1").unwrap_err().code(), "VALIDATION_ERROR");

        let mut p = payload("PO-1");
        p.line_items.clear();
        assert!(p.validate_for("PO-1").is_err());

        let mut p = payload("PO-1");
        p.line_items[1].quantity = 0.0;
        assert!(p.validate_for("PO-1").is_err());

        let mut p = payload("PO-1");
        p.line_items[1].line_number = 10;
        assert!(p.validate_for("PO-1").is_err());

        let mut p = payload("PO-1");
        p.counterparty_id = "  ".to_string();
        assert!(p.validate_for("PO-1").is_err());
    }

    #[test]
    fn test_idempotency_key_is_stable_per_payload() {
        let a = payload("PO-1").idempotency_key("PO-1").unwrap();
        let b = payload("PO-1").idempotency_key("PO-1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let mut changed = payload("PO-1");
        changed.line_items[0].quantity = 5.0;
        assert_ne!(a, changed.idempotency_key("PO-1").unwrap());
    }
}
