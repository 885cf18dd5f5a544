//! End-to-end scenarios on a three-stage catalog
//!
//! ```text
//! ORDER_CREATED(0) → IN_INSPECTION(1) → ORDER_RECEIVED(2, sync)
//! ```

use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use regex::Regex;
use tracking::gateway::{DocumentType, ErrorCode, LineItem};
use tracking::{
    AttemptStatus, ChangeSource, GoodsReceiptPayload, ManualClock, MilestoneStatus, OrderTracker,
    StageCategory, StageCode, StageDefinition, SyncStatus, TimelineProjection, TrackingConfig,
    TransitionRequest,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tracking=debug")
        .with_test_writer()
        .try_init();
}

fn three_stage_config(failure_probability: f64) -> TrackingConfig {
    let mut config = TrackingConfig::default();
    config.catalog = vec![
        StageDefinition::new(StageCode::OrderCreated, "Order Created", 0, StageCategory::Ordering),
        StageDefinition::new(StageCode::InInspection, "In Inspection", 1, StageCategory::Quality)
            .with_sla_hours(72),
        StageDefinition::new(StageCode::OrderReceived, "Order Received", 2, StageCategory::Receipt)
            .with_sla_hours(24)
            .requiring_sync(),
    ];
    config.gateway.failure_probability = failure_probability;
    config.gateway.min_latency_ms = 0;
    config.gateway.max_latency_ms = 0;
    config
}

fn tracker(config: TrackingConfig) -> (OrderTracker, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 9, 14, 8, 0, 0).unwrap(),
    ));
    let tracker = OrderTracker::builder(config)
        .clock(clock.clone())
        .build()
        .unwrap();
    (tracker, clock)
}

fn payload(order_id: &str) -> GoodsReceiptPayload {
    GoodsReceiptPayload {
        order_id: order_id.to_string(),
        reference_number: "DN-4711/A".to_string(),
        counterparty_id: "VENDOR-7".to_string(),
        line_items: vec![LineItem {
            line_number: 10,
            material_code: "MAT-55".to_string(),
            description: "Control valve".to_string(),
            quantity: 6.0,
            unit: "EA".to_string(),
        }],
        delivery_date: NaiveDate::from_ymd_opt(2026, 9, 16).unwrap(),
        delivery_location: "Receiving dock".to_string(),
        document_type: DocumentType::GoodsReceipt,
    }
}

fn tracked(projection: TimelineProjection) -> Box<tracking::TimelineView> {
    match projection {
        TimelineProjection::Tracked(view) => view,
        TimelineProjection::NotInitialized { order_id } => panic!("{} not tracked", order_id),
    }
}

#[tokio::test]
async fn scenario_a_initialize_projects_first_stage() {
    let (tracker, _clock) = tracker(three_stage_config(0.0));

    let init = tracker
        .initialize_tracking("PO-1", StageCode::OrderCreated, "system")
        .await
        .unwrap();
    assert!(init.created);
    assert_eq!(init.transition.change_source, ChangeSource::SystemInit);
    assert_eq!(init.transition.previous_stage_code, None);

    let view = tracked(tracker.project("PO-1").unwrap());
    assert_eq!(view.current_stage.code, StageCode::OrderCreated);
    assert_eq!(view.overall_progress_percent, 33.33);
    assert!(view.is_on_schedule);
    assert_eq!(view.all_stages.len(), 3);
    assert_eq!(view.milestones.len(), 3);
    assert_eq!(view.status_history.len(), 1);
    assert_eq!(view.total_days_elapsed, 0);
}

#[tokio::test]
async fn scenario_b_workflow_transition_completes_milestones() {
    let (tracker, clock) = tracker(three_stage_config(0.0));
    tracker
        .initialize_tracking("PO-1", StageCode::OrderCreated, "system")
        .await
        .unwrap();
    clock.advance(Duration::hours(30));

    let outcome = tracker
        .record_event(
            TransitionRequest::new("PO-1", StageCode::InInspection, "alice")
                .with_source(ChangeSource::WorkflowEvent),
            None,
        )
        .await
        .unwrap();
    assert_eq!(outcome.transition.previous_stage_code, Some(StageCode::OrderCreated));
    assert!(outcome.sync.is_none());

    let view = tracked(tracker.project("PO-1").unwrap());
    assert_eq!(view.current_stage.code, StageCode::InInspection);
    assert_eq!(view.overall_progress_percent, 66.67);

    let status = |code| {
        view.milestones
            .iter()
            .find(|m| m.stage_code == code)
            .unwrap()
            .status
    };
    assert_eq!(status(StageCode::OrderCreated), MilestoneStatus::Completed);
    assert_eq!(status(StageCode::InInspection), MilestoneStatus::Completed);
    assert_eq!(status(StageCode::OrderReceived), MilestoneStatus::InProgress);

    let inspection = view
        .milestones
        .iter()
        .find(|m| m.stage_code == StageCode::InInspection)
        .unwrap();
    assert_eq!(inspection.completed_by.as_deref(), Some("alice"));
    assert_eq!(inspection.days_early_late, Some(-1));
}

#[tokio::test]
async fn scenario_c_retry_ceiling_reached() {
    init_tracing();
    let mut config = three_stage_config(1.0);
    config.gateway.forced_error_code = Some(ErrorCode::ConnTimeout);
    let (tracker, _clock) = tracker(config);
    let payload = payload("PO-1");

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let state = tracker
            .coordinator()
            .sync_order("PO-1", &payload, 2)
            .await
            .unwrap();
        statuses.push(state.sync_status);
    }
    assert_eq!(
        statuses,
        vec![
            SyncStatus::RetryPending,
            SyncStatus::RetryPending,
            SyncStatus::RetryExhausted
        ]
    );

    let attempts = tracker.attempt_history("PO-1").unwrap();
    assert_eq!(attempts.len(), 2);
    for (idx, attempt) in attempts.iter().enumerate() {
        assert_eq!(attempt.attempt_number, idx as u32 + 1);
        assert_eq!(attempt.status, AttemptStatus::Failed);
        assert_eq!(attempt.error_code, Some(ErrorCode::ConnTimeout));
        assert_eq!(attempt.http_like_status_code, Some(504));
    }

    let err = tracker
        .sync_state("PO-1")
        .unwrap()
        .ensure_not_exhausted()
        .unwrap_err();
    assert_eq!(err.code(), "RETRY_EXHAUSTED");
    assert!(err.to_structured().recovery_action.contains("Reconcile"));
}

#[tokio::test]
async fn scenario_d_sync_succeeds_with_document_number() {
    init_tracing();
    let (tracker, _clock) = tracker(three_stage_config(0.0));
    tracker
        .initialize_tracking("PO-1", StageCode::OrderCreated, "system")
        .await
        .unwrap();

    let outcome = tracker
        .record_event(
            TransitionRequest::new("PO-1", StageCode::OrderReceived, "receiving-clerk"),
            Some(&payload("PO-1")),
        )
        .await
        .unwrap();

    let state = outcome.sync.unwrap();
    assert_eq!(state.sync_status, SyncStatus::Synced);
    let document = state.external_document_number.unwrap();
    assert!(Regex::new(r"^GR\d{14}$").unwrap().is_match(&document));
    assert!(document.starts_with("GR20260914"));

    let attempts = tracker.attempt_history("PO-1").unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, AttemptStatus::Success);

    let view = tracked(tracker.project("PO-1").unwrap());
    assert_eq!(view.overall_progress_percent, 100.0);
}

#[tokio::test]
async fn untracked_order_projects_not_initialized() {
    let (tracker, _clock) = tracker(three_stage_config(0.0));
    assert!(!tracker.project("PO-UNKNOWN").unwrap().is_tracked());
    match tracker.project("PO-UNKNOWN").unwrap() {
        TimelineProjection::NotInitialized { order_id } => assert_eq!(order_id, "PO-UNKNOWN"),
        TimelineProjection::Tracked(_) => panic!("order should not be tracked"),
    }
}

#[tokio::test]
async fn delayed_milestone_breaks_schedule_until_reached() {
    let (tracker, clock) = tracker(three_stage_config(0.0));
    tracker
        .initialize_tracking("PO-1", StageCode::OrderCreated, "system")
        .await
        .unwrap();

    tracker
        .mark_delayed("PO-1", StageCode::InInspection, "inspector unavailable")
        .await
        .unwrap();
    let view = tracked(tracker.project("PO-1").unwrap());
    assert!(!view.is_on_schedule);
    assert_eq!(view.overall_progress_percent, 33.33);

    clock.advance(Duration::days(4));
    tracker
        .record_event(TransitionRequest::new("PO-1", StageCode::InInspection, "bob"), None)
        .await
        .unwrap();
    let view = tracked(tracker.project("PO-1").unwrap());
    assert!(view.is_on_schedule);
    assert_eq!(view.overall_progress_percent, 66.67);
    assert_eq!(view.total_days_elapsed, 4);

    let err = tracker
        .mark_delayed("PO-1", StageCode::InInspection, "too late")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_MILESTONE_STATE");
}
