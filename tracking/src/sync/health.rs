//! Connection health of the enterprise system link

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::error::{TrackingError, TrackingResult};

/// Link status as seen by the health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connected,
    Degraded,
    Disconnected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "CONNECTED"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Disconnected => write!(f, "DISCONNECTED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionHealth {
    pub status: ConnectionStatus,
    /// Round-trip time; absent when disconnected
    pub latency_ms: Option<u64>,
    pub checked_at: DateTime<Utc>,
}

/// Reports the link status. Informational only; sync never consults it.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> ConnectionHealth;
}

/// Relative likelihood of each status in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthWeights {
    pub connected: u32,
    pub degraded: u32,
    pub disconnected: u32,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            connected: 85,
            degraded: 10,
            disconnected: 5,
        }
    }
}

impl HealthWeights {
    pub fn total(&self) -> u32 {
        self.connected + self.degraded + self.disconnected
    }

    pub fn validate(&self) -> TrackingResult<()> {
        if self.total() == 0 {
            return Err(TrackingError::config("health weights must not all be zero"));
        }
        Ok(())
    }

    fn pick(&self, roll: u32) -> ConnectionStatus {
        if roll < self.connected {
            ConnectionStatus::Connected
        } else if roll < self.connected + self.degraded {
            ConnectionStatus::Degraded
        } else {
            ConnectionStatus::Disconnected
        }
    }
}

/// Weighted-random status with a latency band per status.
pub struct SimulatedHealthCheck {
    weights: HealthWeights,
    clock: SharedClock,
    rng: Mutex<StdRng>,
}

impl SimulatedHealthCheck {
    pub fn new(weights: HealthWeights, clock: SharedClock) -> TrackingResult<Self> {
        weights.validate()?;
        Ok(Self {
            weights,
            clock,
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    pub fn seeded(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }
}

#[async_trait]
impl HealthCheck for SimulatedHealthCheck {
    async fn check(&self) -> ConnectionHealth {
        let (status, latency_ms) = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            let status = self.weights.pick(rng.gen_range(0..self.weights.total()));
            let latency = match status {
                ConnectionStatus::Connected => Some(rng.gen_range(20..=150)),
                ConnectionStatus::Degraded => Some(rng.gen_range(400..=2_000)),
                ConnectionStatus::Disconnected => None,
            };
            (status, latency)
        };

        ConnectionHealth {
            status,
            latency_ms,
            checked_at: self.clock.now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::sync::Arc;

    #[test]
    fn test_weight_bands() {
        let weights = HealthWeights {
            connected: 2,
            degraded: 1,
            disconnected: 1,
        };
        assert_eq!(weights.pick(0), ConnectionStatus::Connected);
        assert_eq!(weights.pick(1), ConnectionStatus::Connected);
        assert_eq!(weights.pick(2), ConnectionStatus::Degraded);
        assert_eq!(weights.pick(3), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_zero_weights_rejected() {
        let weights = HealthWeights {
            connected: 0,
            degraded: 0,
            disconnected: 0,
        };
        assert!(SimulatedHealthCheck::new(weights, Arc::new(SystemClock)).is_err());
    }

    #[tokio::test]
    async fn test_single_status_weighting() {
        let weights = HealthWeights {
            connected: 0,
            degraded: 0,
            disconnected: 1,
        };
        let checker = SimulatedHealthCheck::new(weights, Arc::new(SystemClock))
            .unwrap()
            .seeded(3);
        let health = checker.check().await;
        assert_eq!(health.status, ConnectionStatus::Disconnected);
        assert_eq!(health.latency_ms, None);

        let checker = SimulatedHealthCheck::new(HealthWeights::default(), Arc::new(SystemClock))
            .unwrap()
            .seeded(3);
        for _ in 0..20 {
            let health = checker.check().await;
            if let Some(latency) = health.latency_ms {
                assert!((20..=2_000).contains(&latency));
            }
        }
    }
}
