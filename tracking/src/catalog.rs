//! Stage Catalog: the fixed, ordered lifecycle a purchase order moves through
//!
//! The catalog is configuration: it is built once (from the standard
//! procurement lifecycle or from a TOML `[[catalog]]` table), validated, and
//! then shared behind an `Arc` without locking.
//!
//! ```text
//! ORDER_CREATED → VENDOR_CONFIRMED → SHIPPED → DELIVERED → IN_INSPECTION
//!   → INSPECTION_PASSED → HANDOVER_APPROVED → ORDER_RECEIVED → CLOSED
//! ```

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{TrackingError, TrackingResult};

/// Shared reference to a validated catalog
pub type SharedCatalog = Arc<StageCatalog>;

/// Lifecycle stages a deployment may put in its catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageCode {
    OrderCreated,
    VendorConfirmed,
    Shipped,
    Delivered,
    InInspection,
    InspectionPassed,
    HandoverApproved,
    OrderReceived,
    Closed,
}

impl StageCode {
    /// Every known stage code, in standard lifecycle order
    pub fn all() -> &'static [StageCode] {
        &[
            Self::OrderCreated,
            Self::VendorConfirmed,
            Self::Shipped,
            Self::Delivered,
            Self::InInspection,
            Self::InspectionPassed,
            Self::HandoverApproved,
            Self::OrderReceived,
            Self::Closed,
        ]
    }

    /// Stable wire identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderCreated => "ORDER_CREATED",
            Self::VendorConfirmed => "VENDOR_CONFIRMED",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
            Self::InInspection => "IN_INSPECTION",
            Self::InspectionPassed => "INSPECTION_PASSED",
            Self::HandoverApproved => "HANDOVER_APPROVED",
            Self::OrderReceived => "ORDER_RECEIVED",
            Self::Closed => "CLOSED",
        }
    }
}

impl std::fmt::Display for StageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageCode {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        Self::all()
            .iter()
            .copied()
            .find(|code| code.as_str() == normalized)
            .ok_or_else(|| TrackingError::unknown_stage(s))
    }
}

/// Broad grouping used by reporting collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageCategory {
    Ordering,
    Logistics,
    Quality,
    Receipt,
}

/// One step of the lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub code: StageCode,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Position in the lifecycle; strictly increasing across the catalog
    pub order: u32,
    pub category: StageCategory,
    /// Hours allowed to reach this stage once the previous one was reached
    #[serde(default)]
    pub sla_hours: Option<u32>,
    /// Reaching this stage should push a goods receipt to the external system
    #[serde(default)]
    pub requires_external_sync: bool,
}

impl StageDefinition {
    /// Create a definition with no SLA and no external sync
    pub fn new(code: StageCode, name: &str, order: u32, category: StageCategory) -> Self {
        Self {
            code,
            name: name.to_string(),
            description: String::new(),
            order,
            category,
            sla_hours: None,
            requires_external_sync: false,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_sla_hours(mut self, hours: u32) -> Self {
        self.sla_hours = Some(hours);
        self
    }

    pub fn requiring_sync(mut self) -> Self {
        self.requires_external_sync = true;
        self
    }
}

/// Validated, ordered, read-only list of stages.
#[derive(Debug, Clone)]
pub struct StageCatalog {
    stages: Vec<StageDefinition>,
}

impl StageCatalog {
    /// Validate and build a catalog.
    ///
    /// Stages are kept in the order given; `order` values must be strictly
    /// increasing and codes unique.
    pub fn new(stages: Vec<StageDefinition>) -> TrackingResult<Self> {
        if stages.is_empty() {
            return Err(TrackingError::invalid_catalog("catalog has no stages"));
        }

        let mut seen = HashSet::new();
        for stage in &stages {
            if !seen.insert(stage.code) {
                return Err(TrackingError::invalid_catalog(format!(
                    "duplicate stage code {}",
                    stage.code
                )));
            }
        }

        for pair in stages.windows(2) {
            if pair[1].order <= pair[0].order {
                return Err(TrackingError::invalid_catalog(format!(
                    "stage {} (order {}) must come after {} (order {})",
                    pair[1].code, pair[1].order, pair[0].code, pair[0].order
                )));
            }
        }

        Ok(Self { stages })
    }

    /// The standard procurement lifecycle.
    pub fn standard() -> Self {
        use StageCategory::*;
        use StageCode::*;

        let stages = vec![
            StageDefinition::new(OrderCreated, "Order Created", 0, Ordering)
                .with_description("Purchase order released to the vendor"),
            StageDefinition::new(VendorConfirmed, "Vendor Confirmed", 1, Ordering)
                .with_description("Vendor acknowledged quantities and dates")
                .with_sla_hours(48),
            StageDefinition::new(Shipped, "Shipped", 2, Logistics)
                .with_description("Goods left the vendor site")
                .with_sla_hours(120),
            StageDefinition::new(Delivered, "Delivered", 3, Logistics)
                .with_description("Goods arrived at the delivery location")
                .with_sla_hours(72),
            StageDefinition::new(InInspection, "In Inspection", 4, Quality)
                .with_description("Incoming quality inspection submitted")
                .with_sla_hours(24),
            StageDefinition::new(InspectionPassed, "Inspection Passed", 5, Quality)
                .with_description("Inspection accepted the delivered goods")
                .with_sla_hours(48),
            StageDefinition::new(HandoverApproved, "Handover Approved", 6, Receipt)
                .with_description("Receiving party approved the handover")
                .with_sla_hours(24),
            StageDefinition::new(OrderReceived, "Order Received", 7, Receipt)
                .with_description("Goods receipt posted to the enterprise system")
                .with_sla_hours(24)
                .requiring_sync(),
            StageDefinition::new(Closed, "Closed", 8, Receipt)
                .with_description("Order closed for invoicing"),
        ];

        Self { stages }
    }

    /// Create a shared reference to this catalog
    pub fn shared(self) -> SharedCatalog {
        Arc::new(self)
    }

    /// All stages in lifecycle order
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// First stage of the lifecycle
    pub fn first(&self) -> &StageDefinition {
        // Construction rejects empty catalogs.
        &self.stages[0]
    }

    pub fn get(&self, code: StageCode) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.code == code)
    }

    pub fn contains(&self, code: StageCode) -> bool {
        self.get(code).is_some()
    }

    /// Look up a stage, failing with `UnknownStage` if the deployment does
    /// not use it.
    pub fn require(&self, code: StageCode) -> TrackingResult<&StageDefinition> {
        self.get(code)
            .ok_or_else(|| TrackingError::unknown_stage(code.as_str()))
    }

    /// Index of a stage in the catalog
    pub fn position(&self, code: StageCode) -> Option<usize> {
        self.stages.iter().position(|s| s.code == code)
    }

    /// Stages strictly before `code`
    pub fn stages_before(&self, code: StageCode) -> &[StageDefinition] {
        match self.position(code) {
            Some(idx) => &self.stages[..idx],
            None => &[],
        }
    }

    /// Stage immediately after `code`, if any
    pub fn next_after(&self, code: StageCode) -> Option<&StageDefinition> {
        self.position(code).and_then(|idx| self.stages.get(idx + 1))
    }
}

impl Default for StageCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_stage() -> Vec<StageDefinition> {
        vec![
            StageDefinition::new(StageCode::OrderCreated, "Created", 0, StageCategory::Ordering),
            StageDefinition::new(StageCode::InInspection, "Inspection", 1, StageCategory::Quality),
            StageDefinition::new(StageCode::OrderReceived, "Received", 2, StageCategory::Receipt),
        ]
    }

    #[test]
    fn test_standard_catalog_is_valid() {
        let standard = StageCatalog::standard();
        let rebuilt = StageCatalog::new(standard.stages().to_vec()).unwrap();
        assert_eq!(rebuilt.len(), 9);
        assert_eq!(rebuilt.first().code, StageCode::OrderCreated);
    }

    #[test]
    fn test_rejects_duplicate_codes() {
        let mut stages = three_stage();
        stages[2].code = StageCode::OrderCreated;
        let err = StageCatalog::new(stages).unwrap_err();
        assert_eq!(err.code(), "INVALID_CATALOG");
    }

    #[test]
    fn test_rejects_non_increasing_order() {
        let mut stages = three_stage();
        stages[2].order = 1;
        assert!(StageCatalog::new(stages).is_err());
        assert!(StageCatalog::new(Vec::new()).is_err());
    }

    #[test]
    fn test_lookup_helpers() {
        let catalog = StageCatalog::new(three_stage()).unwrap();
        assert_eq!(catalog.position(StageCode::InInspection), Some(1));
        assert_eq!(catalog.stages_before(StageCode::OrderReceived).len(), 2);
        assert!(catalog.stages_before(StageCode::Shipped).is_empty());
        assert_eq!(
            catalog.next_after(StageCode::OrderCreated).map(|s| s.code),
            Some(StageCode::InInspection)
        );
        assert!(catalog.next_after(StageCode::OrderReceived).is_none());
        assert!(catalog.require(StageCode::Shipped).is_err());
    }

    #[test]
    fn test_stage_code_parsing() {
        assert_eq!("in_inspection".parse::<StageCode>().unwrap(), StageCode::InInspection);
        assert_eq!(StageCode::OrderReceived.to_string(), "ORDER_RECEIVED");
        let err = "TELEPORTED".parse::<StageCode>().unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_STAGE");
    }

    #[test]
    fn test_stage_code_serde_matches_display() {
        let json = serde_json::to_string(&StageCode::HandoverApproved).unwrap();
        assert_eq!(json, "\"HANDOVER_APPROVED\"");
    }
}
