//! Operator CLI for order tracking and goods-receipt sync
//!
//! # Usage
//!
//! ```bash
//! # Drive one order through the whole lifecycle and print its timeline
//! tracking-cli demo --order-id PO-1001
//!
//! # Force failures to watch the retry ceiling
//! tracking-cli --failure-probability 1.0 --max-retries 2 demo
//!
//! # Inspect configuration
//! tracking-cli --config tracking.toml catalog
//! tracking-cli health
//! tracking-cli schema
//!
//! # Step an order by hand (heavy-state builds keep it between runs)
//! tracking-cli --state-path ./tracking-state init --order-id PO-1001
//! tracking-cli --state-path ./tracking-state transition --order-id PO-1001 --stage SHIPPED
//! tracking-cli --state-path ./tracking-state transition --order-id PO-1001 \
//!     --stage ORDER_RECEIVED --payload receipt.json
//! tracking-cli --state-path ./tracking-state sync --order-id PO-1001 --payload receipt.json
//! tracking-cli --state-path ./tracking-state timeline --order-id PO-1001
//! tracking-cli --state-path ./tracking-state sweep
//! tracking-cli --state-path ./tracking-state watch
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracking::{
    ChangeSource, GoodsReceiptPayload, LineItem, OrderTracker, SlaMonitor, StageCode,
    SyncStatus, TrackingConfig, TrackingError, TransitionRequest,
};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (TRACKING_* variables still apply on top)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// RocksDB state directory (overrides TRACKING_STATE_PATH)
    #[arg(long, global = true)]
    state_path: Option<PathBuf>,

    /// Attempts allowed per order (overrides TRACKING_MAX_RETRIES)
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Simulated failure probability in [0, 1] (overrides TRACKING_FAILURE_PROBABILITY)
    #[arg(long, global = true)]
    failure_probability: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive one order through every catalog stage, syncing at the receipt stage
    Demo {
        #[arg(long, default_value = "PO-DEMO-0001")]
        order_id: String,

        /// Actor recorded on every transition
        #[arg(long, default_value = "demo-operator")]
        actor: String,
    },
    /// Start tracking an order
    Init {
        #[arg(long)]
        order_id: String,

        #[arg(long, default_value = "ORDER_CREATED")]
        stage: StageCode,

        #[arg(long, default_value = "system")]
        actor: String,
    },
    /// Record a stage change; syncs when the stage requires it and a payload is given
    Transition {
        #[arg(long)]
        order_id: String,

        #[arg(long)]
        stage: StageCode,

        #[arg(long, default_value = "operator")]
        actor: String,

        /// Record as a manual correction instead of a workflow event
        #[arg(long)]
        manual: bool,

        #[arg(long)]
        notes: Option<String>,

        /// Hours behind plan; zero or less counts as on time
        #[arg(long)]
        delay_hours: Option<f64>,

        /// Goods-receipt payload as a JSON file
        #[arg(long)]
        payload: Option<PathBuf>,
    },
    /// Flag a milestone as delayed
    Delay {
        #[arg(long)]
        order_id: String,

        #[arg(long)]
        stage: StageCode,

        #[arg(long)]
        reason: String,
    },
    /// Make one sync attempt within the configured retry budget
    Sync {
        #[arg(long)]
        order_id: String,

        /// Goods-receipt payload as a JSON file
        #[arg(long)]
        payload: PathBuf,
    },
    /// Print the timeline projection of an order
    Timeline {
        #[arg(long)]
        order_id: String,
    },
    /// Print the integration attempt log and sync state of an order
    Attempts {
        #[arg(long)]
        order_id: String,
    },
    /// Flag every milestone whose SLA has run out
    Sweep,
    /// Sweep SLAs on the configured interval until Ctrl-C
    Watch,
    /// Print the active stage catalog
    Catalog,
    /// Check the enterprise system connection
    Health,
    /// Print the JSON schema of the goods-receipt payload
    Schema,
}

fn load_config(args: &Args) -> Result<TrackingConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = TrackingConfig::from_toml_file(path)?;
            config.apply_env();
            config
        }
        None => TrackingConfig::from_env(),
    };

    if let Some(path) = &args.state_path {
        config.state_path = Some(path.clone());
    }
    if let Some(n) = args.max_retries {
        config.retry.max_retries = n;
    }
    if let Some(p) = args.failure_probability {
        config.gateway.failure_probability = p;
    }
    config.validate()?;
    Ok(config)
}

fn read_payload(path: &Path) -> Result<GoodsReceiptPayload> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading payload {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing payload {}", path.display()))
}

fn demo_payload(order_id: &str) -> GoodsReceiptPayload {
    GoodsReceiptPayload {
        order_id: order_id.to_string(),
        reference_number: format!("DN-{}", order_id),
        counterparty_id: "VENDOR-0042".to_string(),
        line_items: vec![
            LineItem {
                line_number: 10,
                material_code: "MAT-1001".to_string(),
                description: "Hydraulic pump".to_string(),
                quantity: 2.0,
                unit: "EA".to_string(),
            },
            LineItem {
                line_number: 20,
                material_code: "MAT-2002".to_string(),
                description: "Seal kit".to_string(),
                quantity: 10.0,
                unit: "EA".to_string(),
            },
        ],
        delivery_date: chrono::Utc::now().date_naive(),
        delivery_location: "Main warehouse".to_string(),
        document_type: Default::default(),
    }
}

async fn run_demo(tracker: &OrderTracker, order_id: &str, actor: &str) -> Result<serde_json::Value> {
    let stages: Vec<StageCode> = tracker.catalog().stages().iter().map(|s| s.code).collect();
    let Some((first, rest)) = stages.split_first() else {
        anyhow::bail!("catalog has no stages");
    };

    let init = tracker.initialize_tracking(order_id, *first, actor).await?;
    tracing::info!(order_id, created = init.created, "Demo order initialized");

    let payload = demo_payload(order_id);
    for stage in rest {
        let needs_sync = tracker.catalog().require(*stage)?.requires_external_sync;
        let request = TransitionRequest::new(order_id, *stage, actor)
            .with_correlation_id(&format!("demo-{}", stage));
        let outcome = tracker
            .record_event(request, needs_sync.then_some(&payload))
            .await
            .with_context(|| format!("recording {} for {}", stage, order_id))?;

        let Some(mut state) = outcome.sync else {
            continue;
        };
        while state.sync_status == SyncStatus::RetryPending {
            tracing::info!(
                order_id,
                attempt = state.last_attempt_number,
                "Retrying goods receipt sync"
            );
            state = tracker.sync_order(order_id, &payload).await?;
        }
        if state.sync_status == SyncStatus::RetryExhausted {
            tracing::warn!(order_id, "Sync exhausted; stopping lifecycle for reconciliation");
            break;
        }
    }

    Ok(json!({
        "timeline": tracker.project(order_id)?,
        "sync_state": tracker.sync_state(order_id)?,
        "attempts": tracker.attempt_history(order_id)?,
        "chain_violations": tracker.verify_chain(order_id)?,
    }))
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    let output = match &args.command {
        Command::Schema => serde_json::to_value(schemars::schema_for!(GoodsReceiptPayload))?,
        Command::Catalog => serde_json::to_value(config.build_catalog()?.stages())?,
        Command::Health => {
            let tracker = OrderTracker::from_config(config)?;
            serde_json::to_value(tracker.connection_health().await)?
        }
        Command::Init {
            order_id,
            stage,
            actor,
        } => {
            let tracker = OrderTracker::from_config(config)?;
            let init = tracker.initialize_tracking(order_id, *stage, actor).await?;
            json!({ "created": init.created, "transition": init.transition })
        }
        Command::Transition {
            order_id,
            stage,
            actor,
            manual,
            notes,
            delay_hours,
            payload,
        } => {
            let payload = payload.as_deref().map(read_payload).transpose()?;
            let mut request = TransitionRequest::new(order_id, *stage, actor);
            if *manual {
                request = request.with_source(ChangeSource::Manual);
            }
            if let Some(notes) = notes {
                request = request.with_notes(notes);
            }
            if let Some(hours) = delay_hours {
                request = request.with_delay_hours(*hours);
            }
            let tracker = OrderTracker::from_config(config)?;
            let outcome = tracker.record_event(request, payload.as_ref()).await?;
            serde_json::to_value(outcome)?
        }
        Command::Delay {
            order_id,
            stage,
            reason,
        } => {
            let tracker = OrderTracker::from_config(config)?;
            serde_json::to_value(tracker.mark_delayed(order_id, *stage, reason).await?)?
        }
        Command::Sync { order_id, payload } => {
            let payload = read_payload(payload)?;
            let tracker = OrderTracker::from_config(config)?;
            let state = tracker.sync_order(order_id, &payload).await?;
            if state.sync_status == SyncStatus::RetryExhausted {
                tracing::warn!(order_id = %order_id, "Retry budget exhausted");
            }
            serde_json::to_value(state)?
        }
        Command::Timeline { order_id } => {
            let tracker = OrderTracker::from_config(config)?;
            serde_json::to_value(tracker.project(order_id)?)?
        }
        Command::Attempts { order_id } => {
            let tracker = OrderTracker::from_config(config)?;
            json!({
                "sync_state": tracker.sync_state(order_id)?,
                "attempts": tracker.attempt_history(order_id)?,
            })
        }
        Command::Sweep => {
            let tracker = OrderTracker::from_config(config)?;
            let breaches = tracker.sweep_sla().await?;
            json!({
                "flagged": breaches.len(),
                "breaches": breaches.iter().map(|b| json!({
                    "order_id": b.order_id,
                    "stage": b.at_risk_stage,
                    "reason": b.reason(),
                })).collect::<Vec<_>>(),
            })
        }
        Command::Watch => {
            let period = Duration::from_secs(config.sla_sweep_interval_secs);
            let tracker = Arc::new(OrderTracker::from_config(config)?);
            let monitor = SlaMonitor::spawn(tracker, period, CancellationToken::new());
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
            json!({ "sweeps": monitor.stop().await })
        }
        Command::Demo { order_id, actor } => {
            tracing::info!(
                max_retries = config.retry.max_retries,
                failure_probability = config.gateway.failure_probability,
                "Starting demo"
            );
            let tracker = OrderTracker::from_config(config)?;
            run_demo(&tracker, order_id, actor).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tracking=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<TrackingError>() {
                Some(tracking_error) => {
                    let structured = tracking_error.to_structured();
                    eprintln!(
                        "{}",
                        serde_json::to_string_pretty(&structured).unwrap_or_else(|_| e.to_string())
                    );
                }
                None => eprintln!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}
