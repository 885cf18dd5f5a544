//! Tracking notifications
//!
//! - **Event Types** (`types.rs`): what dashboards can observe
//! - **Event Bus** (`bus.rs`): Tokio broadcast pub/sub

pub mod bus;
pub mod types;

pub use bus::{EventBus, OrderReceiver, SharedEventBus};
pub use types::TrackingEvent;
