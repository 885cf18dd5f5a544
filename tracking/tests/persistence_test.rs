//! Tracker state survives a restart on the RocksDB store
//!
//! Run with: cargo test -p tracking --features heavy-state --test persistence_test

#![cfg(feature = "heavy-state")]

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;
use tracking::gateway::{DocumentType, ErrorCode, LineItem, ScriptedOutcomes, SimulatedOutcome};
use tracking::{
    AttemptStatus, GoodsReceiptPayload, ManualClock, MilestoneStatus, OrderTracker, StageCode,
    SyncStatus, TrackingConfig, TransitionRequest,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tracking=debug")
        .with_test_writer()
        .try_init();
}

fn open(path: &Path, clock: Arc<ManualClock>, script: Vec<SimulatedOutcome>) -> OrderTracker {
    let mut config = TrackingConfig::default();
    config.state_path = Some(path.to_path_buf());
    config.gateway.min_latency_ms = 0;
    config.gateway.max_latency_ms = 0;
    OrderTracker::builder(config)
        .clock(clock)
        .outcomes(Arc::new(ScriptedOutcomes::new(script)))
        .build()
        .unwrap()
}

fn payload(order_id: &str) -> GoodsReceiptPayload {
    GoodsReceiptPayload {
        order_id: order_id.to_string(),
        reference_number: "DN-88".to_string(),
        counterparty_id: "VENDOR-88".to_string(),
        line_items: vec![LineItem {
            line_number: 1,
            material_code: "MAT-8".to_string(),
            description: "Gearbox".to_string(),
            quantity: 1.0,
            unit: "EA".to_string(),
        }],
        delivery_date: NaiveDate::from_ymd_opt(2026, 10, 14).unwrap(),
        delivery_location: "Yard".to_string(),
        document_type: DocumentType::GoodsReceipt,
    }
}

#[tokio::test]
async fn test_ledger_and_attempts_survive_reopen() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 10, 13, 12, 0, 0).unwrap(),
    ));

    {
        let tracker = open(
            dir.path(),
            clock.clone(),
            vec![SimulatedOutcome::Fail(ErrorCode::QuantityMismatch)],
        );
        tracker
            .initialize_tracking("PO-88", StageCode::HandoverApproved, "system")
            .await
            .unwrap();
        clock.advance(Duration::hours(5));
        let outcome = tracker
            .record_event(
                TransitionRequest::new("PO-88", StageCode::OrderReceived, "clerk"),
                Some(&payload("PO-88")),
            )
            .await
            .unwrap();
        assert_eq!(outcome.sync.unwrap().sync_status, SyncStatus::RetryPending);
    }

    let tracker = open(dir.path(), clock.clone(), vec![SimulatedOutcome::Succeed]);

    let history = tracker.history("PO-88").unwrap();
    assert_eq!(history.len(), 2);
    assert!(tracker.verify_chain("PO-88").unwrap().is_empty());
    assert_eq!(
        tracker.ledger().current_stage("PO-88").unwrap(),
        StageCode::OrderReceived
    );

    let received = tracker
        .milestones("PO-88")
        .unwrap()
        .into_iter()
        .find(|m| m.stage_code == StageCode::OrderReceived)
        .unwrap();
    assert_eq!(received.status, MilestoneStatus::Completed);

    let before = tracker.sync_state("PO-88").unwrap();
    assert_eq!(before.sync_status, SyncStatus::RetryPending);
    assert_eq!(before.last_error_code, Some(ErrorCode::QuantityMismatch));

    let after = tracker.sync_order("PO-88", &payload("PO-88")).await.unwrap();
    assert_eq!(after.sync_status, SyncStatus::Synced);
    assert_eq!(after.last_attempt_number, 2);

    let attempts = tracker.attempt_history("PO-88").unwrap();
    let statuses: Vec<_> = attempts.iter().map(|a| a.status).collect();
    assert_eq!(statuses, vec![AttemptStatus::Failed, AttemptStatus::Success]);
}

#[tokio::test]
async fn test_document_numbers_continue_across_restart() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 10, 13, 12, 0, 0).unwrap(),
    ));

    let first = {
        let tracker = open(dir.path(), clock.clone(), vec![SimulatedOutcome::Succeed]);
        tracker.sync_order("PO-90", &payload("PO-90")).await.unwrap()
    };
    assert_eq!(first.external_document_number.as_deref(), Some("GR20261013000001"));

    let tracker = open(dir.path(), clock.clone(), vec![SimulatedOutcome::Succeed]);
    let second = tracker.sync_order("PO-91", &payload("PO-91")).await.unwrap();
    assert_eq!(second.external_document_number.as_deref(), Some("GR20261013000002"));
}
